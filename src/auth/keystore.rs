//! Published token verification keys
//!
//! The token service writes a public key here before it signs anything with
//! the matching private key, and looks keys up by the `kid` of every token it
//! verifies. Removing a record revokes every token signed under it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::db::public_keys::{self, PublicKeyRecord};
use crate::db::Database;
use crate::error::{AgoraError, Result};

/// Storage for verification keys, indexed by key id
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Publish a key. Reusing a key id is an error.
    async fn create(&self, record: PublicKeyRecord) -> Result<()>;

    async fn get(&self, key_id: u64) -> Result<Option<PublicKeyRecord>>;

    /// Returns false if no key had this id
    async fn delete(&self, key_id: u64) -> Result<bool>;

    async fn list(&self) -> Result<Vec<PublicKeyRecord>>;

    /// Remove keys created before `cutoff`, sparing `keep`. Returns the ids removed.
    async fn delete_created_before(&self, cutoff: DateTime<Utc>, keep: u64) -> Result<Vec<u64>>;
}

/// [`KeyStore`] backed by the `token_public_keys` table
#[derive(Debug, Clone)]
pub struct SqliteKeyStore {
    db: Database,
}

impl SqliteKeyStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl KeyStore for SqliteKeyStore {
    async fn create(&self, record: PublicKeyRecord) -> Result<()> {
        self.db
            .run(move |session| {
                let tx = session.begin()?;
                public_keys::insert(&tx, &record)?;
                tx.commit()?;
                Ok::<_, AgoraError>(())
            })
            .await
    }

    async fn get(&self, key_id: u64) -> Result<Option<PublicKeyRecord>> {
        self.db
            .run(move |session| Ok(public_keys::get(session.conn(), key_id)?))
            .await
    }

    async fn delete(&self, key_id: u64) -> Result<bool> {
        self.db
            .run(move |session| {
                let tx = session.begin()?;
                let removed = public_keys::delete(&tx, key_id)?;
                tx.commit()?;
                Ok(removed)
            })
            .await
    }

    async fn list(&self) -> Result<Vec<PublicKeyRecord>> {
        self.db
            .run(|session| Ok(public_keys::list(session.conn())?))
            .await
    }

    async fn delete_created_before(&self, cutoff: DateTime<Utc>, keep: u64) -> Result<Vec<u64>> {
        self.db
            .run(move |session| {
                let tx = session.begin()?;
                let removed = public_keys::delete_created_before(&tx, cutoff, keep)?;
                tx.commit()?;
                Ok(removed)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn record(id: u64) -> PublicKeyRecord {
        PublicKeyRecord {
            id,
            public_key: format!("pk-{}", id),
            created_at: DateTime::from_timestamp_millis(1_700_000_000_000 + id as i64).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_sqlite_keystore() {
        let dir = TempDir::new().unwrap();
        let db = Database::open(dir.path().join("keys.db"), Duration::from_secs(1)).unwrap();
        let store = SqliteKeyStore::new(db);

        store.create(record(1)).await.unwrap();
        store.create(record(2)).await.unwrap();

        let err = store.create(record(1)).await.unwrap_err();
        assert!(matches!(err, AgoraError::AlreadyExists(_)));

        assert_eq!(store.get(2).await.unwrap(), Some(record(2)));
        assert_eq!(store.list().await.unwrap().len(), 2);

        assert!(store.delete(1).await.unwrap());
        assert!(!store.delete(1).await.unwrap());
        assert!(store.get(1).await.unwrap().is_none());
    }
}
