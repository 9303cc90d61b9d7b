use super::{StoreError, UserStore};
use crate::model::{UserProfile, UserRecord};
use async_trait::async_trait;
use chrono::Utc;
use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// `users` table: provider id -> JSON user document.
const USERS: TableDefinition<&str, &[u8]> = TableDefinition::new("users");

/// UserStore backed by an embedded redb database file.
///
/// Each operation runs in its own transaction on the blocking pool, so a
/// create's existence check and insert commit together. Commits use redb's
/// default immediate durability.
pub struct RedbUserStore {
    db: Arc<Database>,
    path: PathBuf,
}

impl RedbUserStore {
    /// Open or create the database at `path`, creating parent directories.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(StoreError::backend)?;
        }

        let db = Database::create(path).map_err(StoreError::backend)?;

        let write_txn = db.begin_write().map_err(StoreError::backend)?;
        {
            let _table = write_txn.open_table(USERS).map_err(StoreError::backend)?;
        }
        write_txn.commit().map_err(StoreError::backend)?;

        tracing::debug!(path = %path.display(), "opened redb user store");

        Ok(Self {
            db: Arc::new(db),
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Put a full record in place, replacing any existing one with the same id.
    pub async fn insert_record(&self, record: UserRecord) -> Result<(), StoreError> {
        self.run(move |db| {
            let bytes = serde_json::to_vec(&record)?;
            let write_txn = db.begin_write().map_err(StoreError::backend)?;
            {
                let mut table = write_txn.open_table(USERS).map_err(StoreError::backend)?;
                table
                    .insert(record.id.as_str(), bytes.as_slice())
                    .map_err(StoreError::backend)?;
            }
            write_txn.commit().map_err(StoreError::backend)
        })
        .await
    }

    async fn run<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Database) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || op(&db))
            .await
            .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

#[async_trait]
impl UserStore for RedbUserStore {
    fn backend(&self) -> &'static str {
        "redb"
    }

    async fn create(&self, id: &str, profile: UserProfile) -> Result<UserRecord, StoreError> {
        let id = id.to_string();
        self.run(move |db| {
            let write_txn = db.begin_write().map_err(StoreError::backend)?;
            let record = {
                let mut table = write_txn.open_table(USERS).map_err(StoreError::backend)?;
                let exists = table
                    .get(id.as_str())
                    .map_err(StoreError::backend)?
                    .is_some();
                if exists {
                    return Err(StoreError::Duplicate { id });
                }
                let record = UserRecord::new(id.as_str(), profile, Utc::now());
                let bytes = serde_json::to_vec(&record)?;
                table
                    .insert(id.as_str(), bytes.as_slice())
                    .map_err(StoreError::backend)?;
                record
            };
            write_txn.commit().map_err(StoreError::backend)?;
            Ok(record)
        })
        .await
    }

    async fn update(
        &self,
        id: &str,
        profile: UserProfile,
    ) -> Result<Option<UserRecord>, StoreError> {
        let id = id.to_string();
        self.run(move |db| {
            let write_txn = db.begin_write().map_err(StoreError::backend)?;
            let updated = {
                let mut table = write_txn.open_table(USERS).map_err(StoreError::backend)?;
                let existing = match table.get(id.as_str()).map_err(StoreError::backend)? {
                    Some(guard) => Some(serde_json::from_slice::<UserRecord>(guard.value())?),
                    None => None,
                };
                match existing {
                    Some(mut record) => {
                        record.apply_profile(profile, Utc::now());
                        let bytes = serde_json::to_vec(&record)?;
                        table
                            .insert(id.as_str(), bytes.as_slice())
                            .map_err(StoreError::backend)?;
                        Some(record)
                    }
                    None => None,
                }
            };
            write_txn.commit().map_err(StoreError::backend)?;
            Ok(updated)
        })
        .await
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let id = id.to_string();
        self.run(move |db| {
            let write_txn = db.begin_write().map_err(StoreError::backend)?;
            let existed = {
                let mut table = write_txn.open_table(USERS).map_err(StoreError::backend)?;
                table
                    .remove(id.as_str())
                    .map_err(StoreError::backend)?
                    .is_some()
            };
            write_txn.commit().map_err(StoreError::backend)?;
            Ok(existed)
        })
        .await
    }

    async fn get(&self, id: &str) -> Result<Option<UserRecord>, StoreError> {
        let id = id.to_string();
        self.run(move |db| {
            let read_txn = db.begin_read().map_err(StoreError::backend)?;
            let table = read_txn.open_table(USERS).map_err(StoreError::backend)?;
            let record = match table.get(id.as_str()).map_err(StoreError::backend)? {
                Some(guard) => Some(serde_json::from_slice(guard.value())?),
                None => None,
            };
            Ok(record)
        })
        .await
    }

    async fn count(&self) -> Result<usize, StoreError> {
        self.run(|db| {
            let read_txn = db.begin_read().map_err(StoreError::backend)?;
            let table = read_txn.open_table(USERS).map_err(StoreError::backend)?;
            let len = table.len().map_err(StoreError::backend)?;
            Ok(len as usize)
        })
        .await
    }
}
