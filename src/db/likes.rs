//! Like rows, keyed by (account_id, post_id)

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::Serialize;

use super::{sql_id, to_millis};
use crate::error::StoreError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Like {
    pub account_id: u64,
    pub post_id: u64,
    pub created_at: DateTime<Utc>,
}

/// Record a like. Liking twice surfaces as [`StoreError::Conflict`].
pub fn insert(conn: &Connection, like: &Like) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO likes (account_id, post_id, created_at) VALUES (?, ?, ?)",
        params![
            sql_id(like.account_id),
            sql_id(like.post_id),
            to_millis(like.created_at),
        ],
    )?;
    Ok(())
}

/// Returns false if the account had not liked the post
pub fn delete(conn: &Connection, account_id: u64, post_id: u64) -> Result<bool, StoreError> {
    let changed = conn.execute(
        "DELETE FROM likes WHERE account_id = ? AND post_id = ?",
        params![sql_id(account_id), sql_id(post_id)],
    )?;
    Ok(changed > 0)
}

pub fn count_of_post(conn: &Connection, post_id: u64) -> Result<u64, StoreError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM likes WHERE post_id = ?",
        params![sql_id(post_id)],
        |row| row.get(0),
    )?;
    Ok(count as u64)
}

/// Ids of the accounts that liked a post, in order of liking
pub fn accounts_of_post(conn: &Connection, post_id: u64) -> Result<Vec<u64>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT account_id FROM likes WHERE post_id = ? ORDER BY created_at ASC, account_id ASC",
    )?;
    let rows = stmt.query_map(params![sql_id(post_id)], |row| row.get::<_, i64>(0))?;
    let ids = rows.collect::<Result<Vec<_>, _>>()?;
    Ok(ids.into_iter().map(|id| id as u64).collect())
}

pub fn delete_of_post(conn: &Connection, post_id: u64) -> Result<usize, StoreError> {
    Ok(conn.execute("DELETE FROM likes WHERE post_id = ?", params![sql_id(post_id)])?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{from_millis, posts, seed_account, test_conn};

    fn setup() -> Connection {
        let conn = test_conn();
        for id in 1..=3 {
            seed_account(&conn, id);
        }
        posts::insert(
            &conn,
            &posts::Post {
                id: 70,
                account_id: 1,
                content: "post".into(),
                created_at: from_millis(0),
            },
        )
        .unwrap();
        conn
    }

    fn like(account_id: u64, at: i64) -> Like {
        Like {
            account_id,
            post_id: 70,
            created_at: from_millis(at),
        }
    }

    #[test]
    fn test_like_is_unique_per_account() {
        let conn = setup();
        insert(&conn, &like(2, 10)).unwrap();

        let err = insert(&conn, &like(2, 11)).unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert_eq!(count_of_post(&conn, 70).unwrap(), 1);
    }

    #[test]
    fn test_accounts_in_like_order() {
        let conn = setup();
        insert(&conn, &like(3, 10)).unwrap();
        insert(&conn, &like(1, 20)).unwrap();
        insert(&conn, &like(2, 30)).unwrap();

        assert_eq!(accounts_of_post(&conn, 70).unwrap(), vec![3, 1, 2]);

        assert!(delete(&conn, 1, 70).unwrap());
        assert!(!delete(&conn, 1, 70).unwrap());
        assert_eq!(accounts_of_post(&conn, 70).unwrap(), vec![3, 2]);

        assert_eq!(delete_of_post(&conn, 70).unwrap(), 2);
        assert_eq!(count_of_post(&conn, 70).unwrap(), 0);
    }
}
