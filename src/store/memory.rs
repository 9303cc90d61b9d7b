use super::{StoreError, UserStore};
use crate::model::{UserProfile, UserRecord};
use async_trait::async_trait;
use chrono::Utc;
use indexmap::IndexMap;
use indexmap::map::Entry;
use parking_lot::RwLock;

/// Process-local store, used for `memory://` and in tests.
#[derive(Debug, Default)]
pub struct MemoryUserStore {
    users: RwLock<IndexMap<String, UserRecord>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Put a full record in place, replacing any existing one with the same id.
    pub fn insert_record(&self, record: UserRecord) {
        self.users.write().insert(record.id.clone(), record);
    }

    /// Snapshot of all records in insertion order.
    pub fn records(&self) -> Vec<UserRecord> {
        self.users.read().values().cloned().collect()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn create(&self, id: &str, profile: UserProfile) -> Result<UserRecord, StoreError> {
        let mut users = self.users.write();
        match users.entry(id.to_string()) {
            Entry::Occupied(_) => Err(StoreError::Duplicate { id: id.to_string() }),
            Entry::Vacant(slot) => {
                let record = UserRecord::new(id, profile, Utc::now());
                slot.insert(record.clone());
                Ok(record)
            }
        }
    }

    async fn update(
        &self,
        id: &str,
        profile: UserProfile,
    ) -> Result<Option<UserRecord>, StoreError> {
        let mut users = self.users.write();
        Ok(users.get_mut(id).map(|record| {
            record.apply_profile(profile, Utc::now());
            record.clone()
        }))
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.users.write().shift_remove(id).is_some())
    }

    async fn get(&self, id: &str) -> Result<Option<UserRecord>, StoreError> {
        Ok(self.users.read().get(id).cloned())
    }

    async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.users.read().len())
    }
}
