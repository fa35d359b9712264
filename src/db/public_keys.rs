//! Token verification keys, indexed by key id

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use super::{from_millis, sql_id, to_millis};
use crate::error::StoreError;

/// A published public key. `public_key` is the base64url-encoded Ed25519 key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublicKeyRecord {
    pub id: u64,
    pub public_key: String,
    pub created_at: DateTime<Utc>,
}

impl PublicKeyRecord {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get::<_, i64>("id")? as u64,
            public_key: row.get("public_key")?,
            created_at: from_millis(row.get("created_at")?),
        })
    }
}

pub fn insert(conn: &Connection, record: &PublicKeyRecord) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO token_public_keys (id, public_key, created_at) VALUES (?, ?, ?)",
        params![
            sql_id(record.id),
            record.public_key,
            to_millis(record.created_at),
        ],
    )?;
    Ok(())
}

pub fn get(conn: &Connection, id: u64) -> Result<Option<PublicKeyRecord>, StoreError> {
    Ok(conn
        .query_row(
            "SELECT id, public_key, created_at FROM token_public_keys WHERE id = ?",
            params![sql_id(id)],
            PublicKeyRecord::from_row,
        )
        .optional()?)
}

pub fn delete(conn: &Connection, id: u64) -> Result<bool, StoreError> {
    let changed = conn.execute(
        "DELETE FROM token_public_keys WHERE id = ?",
        params![sql_id(id)],
    )?;
    Ok(changed > 0)
}

/// All published keys, oldest first
pub fn list(conn: &Connection) -> Result<Vec<PublicKeyRecord>, StoreError> {
    let mut stmt =
        conn.prepare("SELECT id, public_key, created_at FROM token_public_keys ORDER BY id ASC")?;
    let rows = stmt.query_map([], PublicKeyRecord::from_row)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Delete keys created before `cutoff`, except `keep`. Returns the ids removed.
pub fn delete_created_before(
    conn: &Connection,
    cutoff: DateTime<Utc>,
    keep: u64,
) -> Result<Vec<u64>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT id FROM token_public_keys WHERE created_at < ? AND id != ? ORDER BY id ASC",
    )?;
    let rows = stmt.query_map(params![to_millis(cutoff), sql_id(keep)], |row| {
        row.get::<_, i64>(0)
    })?;
    let stale = rows.collect::<Result<Vec<_>, _>>()?;

    for id in &stale {
        conn.execute("DELETE FROM token_public_keys WHERE id = ?", params![id])?;
    }

    Ok(stale.into_iter().map(|id| id as u64).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_conn;

    fn record(id: u64, at: i64) -> PublicKeyRecord {
        PublicKeyRecord {
            id,
            public_key: format!("key-{}", id),
            created_at: from_millis(at),
        }
    }

    #[test]
    fn test_insert_get_delete() {
        let conn = test_conn();
        insert(&conn, &record(7, 1_000)).unwrap();

        assert_eq!(get(&conn, 7).unwrap(), Some(record(7, 1_000)));
        assert!(delete(&conn, 7).unwrap());
        assert!(get(&conn, 7).unwrap().is_none());
        assert!(!delete(&conn, 7).unwrap());
    }

    #[test]
    fn test_duplicate_key_id_conflicts() {
        let conn = test_conn();
        insert(&conn, &record(7, 1_000)).unwrap();
        let err = insert(&conn, &record(7, 2_000)).unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[test]
    fn test_delete_created_before_spares_active_key() {
        let conn = test_conn();
        insert(&conn, &record(1, 1_000)).unwrap();
        insert(&conn, &record(2, 2_000)).unwrap();
        insert(&conn, &record(3, 3_000)).unwrap();
        insert(&conn, &record(4, 9_000)).unwrap();

        let removed = delete_created_before(&conn, from_millis(5_000), 2).unwrap();
        assert_eq!(removed, vec![1, 3]);

        let left: Vec<u64> = list(&conn).unwrap().iter().map(|r| r.id).collect();
        assert_eq!(left, vec![2, 4]);
    }
}
