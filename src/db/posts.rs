//! Post rows

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use super::{from_millis, sql_id, to_millis, WriteTx};
use crate::error::StoreError;

/// Post row from database
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Post {
    pub id: u64,
    pub account_id: u64,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl Post {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get::<_, i64>("id")? as u64,
            account_id: row.get::<_, i64>("account_id")? as u64,
            content: row.get("content")?,
            created_at: from_millis(row.get("created_at")?),
        })
    }
}

const COLUMNS: &str = "id, account_id, content, created_at";

/// Insert a post. An unknown owner surfaces as [`StoreError::MissingReference`].
pub fn insert(conn: &Connection, post: &Post) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO posts (id, account_id, content, created_at) VALUES (?, ?, ?, ?)",
        params![
            sql_id(post.id),
            sql_id(post.account_id),
            post.content,
            to_millis(post.created_at),
        ],
    )?;
    Ok(())
}

pub fn get_by_id(conn: &Connection, id: u64) -> Result<Option<Post>, StoreError> {
    let sql = format!("SELECT {} FROM posts WHERE id = ?", COLUMNS);
    Ok(conn
        .query_row(&sql, params![sql_id(id)], Post::from_row)
        .optional()?)
}

/// Read a post inside a write transaction.
///
/// The transaction already holds the writer lock, so the row cannot change
/// until it commits or rolls back.
pub fn lock_for_update(tx: &WriteTx<'_>, id: u64) -> Result<Option<Post>, StoreError> {
    get_by_id(tx, id)
}

/// Posts of one account, newest first
pub fn list_of_account(conn: &Connection, account_id: u64) -> Result<Vec<Post>, StoreError> {
    let sql = format!(
        "SELECT {} FROM posts WHERE account_id = ? ORDER BY id DESC",
        COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![sql_id(account_id)], Post::from_row)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Returns false if no post has this id
pub fn update_content(conn: &Connection, id: u64, content: &str) -> Result<bool, StoreError> {
    let changed = conn.execute(
        "UPDATE posts SET content = ? WHERE id = ?",
        params![content, sql_id(id)],
    )?;
    Ok(changed > 0)
}

/// Delete the post row only. Dependent comments and likes must go first.
pub fn delete(conn: &Connection, id: u64) -> Result<bool, StoreError> {
    let changed = conn.execute("DELETE FROM posts WHERE id = ?", params![sql_id(id)])?;
    Ok(changed > 0)
}
