//! Ownership guard for updates and deletes
//!
//! Inside an open [`WriteTx`]: lock the target row, compare its owner with
//! the authenticated caller, and only then hand the row back for mutation.
//! Because the transaction holds the writer lock from `BEGIN IMMEDIATE`
//! onwards, the owner observed here is the one the mutation will act on, and
//! a competing writer sees this transaction's outcome before its own check.

use tracing::warn;

use crate::db::comments::Comment;
use crate::db::posts::Post;
use crate::db::WriteTx;
use crate::error::{AgoraError, Result, StoreError};

/// A row with a single owning account
pub trait Owned {
    /// Name used in error messages and logs
    const KIND: &'static str;

    fn owner_id(&self) -> u64;
}

impl Owned for Post {
    const KIND: &'static str = "post";

    fn owner_id(&self) -> u64 {
        self.account_id
    }
}

impl Owned for Comment {
    const KIND: &'static str = "comment";

    fn owner_id(&self) -> u64 {
        self.account_id
    }
}

/// Lock `id` through `lock` and check that `caller` owns it.
///
/// Absent row: `NotFound`. Foreign owner: `PermissionDenied`. Either way the
/// caller drops `tx` and nothing is written.
pub fn lock_owned<T, F>(tx: &WriteTx<'_>, caller: u64, id: u64, action: &str, lock: F) -> Result<T>
where
    T: Owned,
    F: FnOnce(&WriteTx<'_>, u64) -> std::result::Result<Option<T>, StoreError>,
{
    tx.ensure_active()?;
    let row = lock(tx, id)?.ok_or_else(|| AgoraError::NotFound(format!("{} {}", T::KIND, id)))?;

    let owner = row.owner_id();
    if owner != caller {
        warn!(
            kind = T::KIND,
            id,
            caller,
            owner,
            action,
            "Ownership check failed"
        );
        return Err(AgoraError::PermissionDenied(format!(
            "only the owner may {} {} {}",
            action,
            T::KIND,
            id
        )));
    }

    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{posts, Database};
    use std::time::Duration;
    use tempfile::TempDir;

    async fn seeded() -> (Database, TempDir) {
        let dir = TempDir::new().unwrap();
        let db = Database::open(dir.path().join("guard.db"), Duration::from_secs(1)).unwrap();
        db.run(|session| {
            let tx = session.begin()?;
            crate::db::seed_account(&tx, 1);
            crate::db::seed_account(&tx, 2);
            posts::insert(
                &tx,
                &Post {
                    id: 10,
                    account_id: 1,
                    content: "mine".into(),
                    created_at: crate::db::from_millis(0),
                },
            )?;
            tx.commit()
        })
        .await
        .unwrap();
        (db, dir)
    }

    #[tokio::test]
    async fn test_owner_passes() {
        let (db, _dir) = seeded().await;
        let post = db
            .run(|session| {
                let tx = session.begin()?;
                lock_owned(&tx, 1, 10, "update", posts::lock_for_update)
            })
            .await
            .unwrap();
        assert_eq!(post.id, 10);
    }

    #[tokio::test]
    async fn test_foreign_owner_denied() {
        let (db, _dir) = seeded().await;
        let err = db
            .run(|session| {
                let tx = session.begin()?;
                lock_owned(&tx, 2, 10, "delete", posts::lock_for_update)
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AgoraError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn test_missing_row_not_found() {
        let (db, _dir) = seeded().await;
        let err = db
            .run(|session| {
                let tx = session.begin()?;
                lock_owned(&tx, 1, 11, "update", posts::lock_for_update)
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AgoraError::NotFound(_)));
    }
}
