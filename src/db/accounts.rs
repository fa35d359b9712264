//! Account rows

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::Serialize;

use super::{from_millis, sql_id, to_millis};
use crate::error::StoreError;

/// Account row from database
#[derive(Debug, Clone, Serialize)]
pub struct Account {
    pub id: u64,
    pub account_name: String,
    #[serde(skip)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

impl Account {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get::<_, i64>("id")? as u64,
            account_name: row.get("account_name")?,
            password_hash: row.get("password_hash")?,
            created_at: from_millis(row.get("created_at")?),
        })
    }
}

const COLUMNS: &str = "id, account_name, password_hash, created_at";

/// Insert an account. A taken name surfaces as [`StoreError::Conflict`].
pub fn insert(conn: &Connection, account: &Account) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO accounts (id, account_name, password_hash, created_at) VALUES (?, ?, ?, ?)",
        params![
            sql_id(account.id),
            account.account_name,
            account.password_hash,
            to_millis(account.created_at),
        ],
    )?;
    Ok(())
}

pub fn get_by_id(conn: &Connection, id: u64) -> Result<Option<Account>, StoreError> {
    let sql = format!("SELECT {} FROM accounts WHERE id = ?", COLUMNS);
    Ok(conn
        .query_row(&sql, params![sql_id(id)], Account::from_row)
        .optional()?)
}

pub fn get_by_name(conn: &Connection, account_name: &str) -> Result<Option<Account>, StoreError> {
    let sql = format!("SELECT {} FROM accounts WHERE account_name = ?", COLUMNS);
    Ok(conn
        .query_row(&sql, params![account_name], Account::from_row)
        .optional()?)
}

/// Fetch several accounts at once, in the order of `ids`. Unknown ids are
/// skipped.
pub fn get_by_ids(conn: &Connection, ids: &[u64]) -> Result<Vec<Account>, StoreError> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let placeholders = vec!["?"; ids.len()].join(", ");
    let sql = format!("SELECT {} FROM accounts WHERE id IN ({})", COLUMNS, placeholders);

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(ids.iter().map(|id| sql_id(*id))), Account::from_row)?;
    let mut by_id = rows
        .map(|row| row.map(|account| (account.id, account)))
        .collect::<Result<HashMap<_, _>, _>>()?;

    Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
}

pub fn exists_by_name(conn: &Connection, account_name: &str) -> Result<bool, StoreError> {
    Ok(conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM accounts WHERE account_name = ?)",
        params![account_name],
        |row| row.get(0),
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_conn;

    fn account(id: u64, name: &str) -> Account {
        Account {
            id,
            account_name: name.to_string(),
            password_hash: "$argon2id$stub".to_string(),
            created_at: from_millis(1_700_000_000_000),
        }
    }

    #[test]
    fn test_insert_and_lookup() {
        let conn = test_conn();
        insert(&conn, &account(10, "alice")).unwrap();

        let by_id = get_by_id(&conn, 10).unwrap().unwrap();
        assert_eq!(by_id.account_name, "alice");
        assert_eq!(by_id.created_at, from_millis(1_700_000_000_000));

        let by_name = get_by_name(&conn, "alice").unwrap().unwrap();
        assert_eq!(by_name.id, 10);

        assert!(get_by_id(&conn, 11).unwrap().is_none());
        assert!(get_by_name(&conn, "bob").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_name_is_conflict() {
        let conn = test_conn();
        insert(&conn, &account(1, "alice")).unwrap();

        let err = insert(&conn, &account(2, "alice")).unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert!(exists_by_name(&conn, "alice").unwrap());
        assert!(!exists_by_name(&conn, "bob").unwrap());
    }

    #[test]
    fn test_get_by_ids_keeps_requested_order() {
        let conn = test_conn();
        insert(&conn, &account(3, "carol")).unwrap();
        insert(&conn, &account(1, "alice")).unwrap();
        insert(&conn, &account(5, "erin")).unwrap();

        let found = get_by_ids(&conn, &[3, 2, 5, 1]).unwrap();
        let ids: Vec<u64> = found.iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![3, 5, 1]);
        assert!(get_by_ids(&conn, &[]).unwrap().is_empty());
    }

    #[test]
    fn test_password_hash_not_serialized() {
        let json = serde_json::to_value(account(1, "alice")).unwrap();
        assert!(json.get("password_hash").is_none());
        assert_eq!(json["account_name"], "alice");
    }
}
