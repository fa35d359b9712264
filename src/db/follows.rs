//! Follow rows, keyed by (account_id, following_id)
//!
//! `account_id` follows `following_id`.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::Serialize;

use super::{sql_id, to_millis};
use crate::error::StoreError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Follow {
    pub account_id: u64,
    pub following_id: u64,
    pub created_at: DateTime<Utc>,
}

pub fn insert(conn: &Connection, follow: &Follow) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO follows (account_id, following_id, created_at) VALUES (?, ?, ?)",
        params![
            sql_id(follow.account_id),
            sql_id(follow.following_id),
            to_millis(follow.created_at),
        ],
    )?;
    Ok(())
}

pub fn delete(conn: &Connection, account_id: u64, following_id: u64) -> Result<bool, StoreError> {
    let changed = conn.execute(
        "DELETE FROM follows WHERE account_id = ? AND following_id = ?",
        params![sql_id(account_id), sql_id(following_id)],
    )?;
    Ok(changed > 0)
}

/// How many accounts follow `account_id`
pub fn follower_count(conn: &Connection, account_id: u64) -> Result<u64, StoreError> {
    count(conn, "SELECT COUNT(*) FROM follows WHERE following_id = ?", account_id)
}

/// How many accounts `account_id` follows
pub fn following_count(conn: &Connection, account_id: u64) -> Result<u64, StoreError> {
    count(conn, "SELECT COUNT(*) FROM follows WHERE account_id = ?", account_id)
}

/// Ids of the accounts following `account_id`
pub fn followers(conn: &Connection, account_id: u64) -> Result<Vec<u64>, StoreError> {
    ids(
        conn,
        "SELECT account_id FROM follows WHERE following_id = ? ORDER BY created_at ASC, account_id ASC",
        account_id,
    )
}

/// Ids of the accounts `account_id` follows
pub fn followings(conn: &Connection, account_id: u64) -> Result<Vec<u64>, StoreError> {
    ids(
        conn,
        "SELECT following_id FROM follows WHERE account_id = ? ORDER BY created_at ASC, following_id ASC",
        account_id,
    )
}

fn count(conn: &Connection, sql: &str, account_id: u64) -> Result<u64, StoreError> {
    let count: i64 = conn.query_row(sql, params![sql_id(account_id)], |row| row.get(0))?;
    Ok(count as u64)
}

fn ids(conn: &Connection, sql: &str, account_id: u64) -> Result<Vec<u64>, StoreError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params![sql_id(account_id)], |row| row.get::<_, i64>(0))?;
    let ids = rows.collect::<Result<Vec<_>, _>>()?;
    Ok(ids.into_iter().map(|id| id as u64).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{from_millis, seed_account, test_conn};

    fn follow(account_id: u64, following_id: u64, at: i64) -> Follow {
        Follow {
            account_id,
            following_id,
            created_at: from_millis(at),
        }
    }

    #[test]
    fn test_follow_graph_queries() {
        let conn = test_conn();
        for id in 1..=4 {
            seed_account(&conn, id);
        }

        insert(&conn, &follow(2, 1, 10)).unwrap();
        insert(&conn, &follow(3, 1, 20)).unwrap();
        insert(&conn, &follow(1, 4, 30)).unwrap();

        assert_eq!(follower_count(&conn, 1).unwrap(), 2);
        assert_eq!(following_count(&conn, 1).unwrap(), 1);
        assert_eq!(followers(&conn, 1).unwrap(), vec![2, 3]);
        assert_eq!(followings(&conn, 1).unwrap(), vec![4]);
        assert!(followers(&conn, 4).unwrap().contains(&1));
    }

    #[test]
    fn test_duplicate_follow_and_unfollow() {
        let conn = test_conn();
        seed_account(&conn, 1);
        seed_account(&conn, 2);

        insert(&conn, &follow(1, 2, 10)).unwrap();
        let err = insert(&conn, &follow(1, 2, 11)).unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        assert!(delete(&conn, 1, 2).unwrap());
        assert!(!delete(&conn, 1, 2).unwrap());
        assert_eq!(follower_count(&conn, 2).unwrap(), 0);
    }

    #[test]
    fn test_follow_unknown_account_rejected() {
        let conn = test_conn();
        seed_account(&conn, 1);
        let err = insert(&conn, &follow(1, 99, 10)).unwrap_err();
        assert!(matches!(err, StoreError::MissingReference(_)));
    }
}
