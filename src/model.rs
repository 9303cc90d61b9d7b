use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

/// Account role. Only the owner-registration flow promotes a user; webhook
/// sync never touches it.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum Role {
    #[default]
    User,
    HotelOwner,
}

/// Profile fields owned by the identity provider.
///
/// These are the only fields a `user.updated` delivery is allowed to
/// overwrite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub username: String,
    pub email: String,
    pub image: String,
}

/// One account mirrored from the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub id: String,
    pub username: String,
    pub email: String,
    pub image: String,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub recent_searched_cities: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserRecord {
    /// Fresh record as written on `user.created`.
    pub fn new(id: impl Into<String>, profile: UserProfile, now: DateTime<Utc>) -> Self {
        let UserProfile {
            username,
            email,
            image,
        } = profile;
        Self {
            id: id.into(),
            username,
            email,
            image,
            role: Role::User,
            recent_searched_cities: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Overwrite the provider-owned fields, leaving role, searched cities and
    /// creation time alone.
    pub fn apply_profile(&mut self, profile: UserProfile, now: DateTime<Utc>) {
        self.username = profile.username;
        self.email = profile.email;
        self.image = profile.image;
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn profile(name: &str) -> UserProfile {
        UserProfile {
            username: name.to_string(),
            email: format!("{name}@example.com"),
            image: format!("https://img.example.com/{name}.png"),
        }
    }

    #[test]
    fn new_record_defaults() {
        let now = Utc::now();
        let record = UserRecord::new("user_1", profile("ada"), now);
        assert_eq!(record.role, Role::User);
        assert!(record.recent_searched_cities.is_empty());
        assert_eq!(record.created_at, now);
        assert_eq!(record.updated_at, now);
    }

    #[test]
    fn apply_profile_keeps_owned_fields() {
        let created = Utc::now();
        let mut record = UserRecord::new("user_1", profile("ada"), created);
        record.role = Role::HotelOwner;
        record.recent_searched_cities = vec!["Lisbon".into(), "Osaka".into()];

        let later = created + chrono::Duration::seconds(30);
        record.apply_profile(profile("grace"), later);

        assert_eq!(record.username, "grace");
        assert_eq!(record.email, "grace@example.com");
        assert_eq!(record.role, Role::HotelOwner);
        assert_eq!(record.recent_searched_cities, vec!["Lisbon", "Osaka"]);
        assert_eq!(record.created_at, created);
        assert_eq!(record.updated_at, later);
    }

    #[test]
    fn serializes_with_document_field_names() {
        let record = UserRecord::new("user_1", profile("ada"), Utc::now());
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["role"], "user");
        assert!(json["recentSearchedCities"].is_array());
        assert!(json["createdAt"].is_string());
        assert!(json["updatedAt"].is_string());
    }

    #[test]
    fn role_names() {
        assert_eq!(Role::HotelOwner.to_string(), "hotelOwner");
        assert_eq!(Role::from_str("hotelOwner").unwrap(), Role::HotelOwner);
        let role: Role = serde_json::from_str("\"hotelOwner\"").unwrap();
        assert_eq!(role, Role::HotelOwner);
    }
}
