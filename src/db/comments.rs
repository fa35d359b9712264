//! Comment rows

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use super::{from_millis, sql_id, to_millis, WriteTx};
use crate::error::StoreError;

/// Comment row from database
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Comment {
    pub id: u64,
    pub post_id: u64,
    pub account_id: u64,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl Comment {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get::<_, i64>("id")? as u64,
            post_id: row.get::<_, i64>("post_id")? as u64,
            account_id: row.get::<_, i64>("account_id")? as u64,
            content: row.get("content")?,
            created_at: from_millis(row.get("created_at")?),
        })
    }
}

const COLUMNS: &str = "id, post_id, account_id, content, created_at";

pub fn insert(conn: &Connection, comment: &Comment) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO comments (id, post_id, account_id, content, created_at) VALUES (?, ?, ?, ?, ?)",
        params![
            sql_id(comment.id),
            sql_id(comment.post_id),
            sql_id(comment.account_id),
            comment.content,
            to_millis(comment.created_at),
        ],
    )?;
    Ok(())
}

pub fn get_by_id(conn: &Connection, id: u64) -> Result<Option<Comment>, StoreError> {
    let sql = format!("SELECT {} FROM comments WHERE id = ?", COLUMNS);
    Ok(conn
        .query_row(&sql, params![sql_id(id)], Comment::from_row)
        .optional()?)
}

/// Read a comment inside a write transaction, stable until it ends
pub fn lock_for_update(tx: &WriteTx<'_>, id: u64) -> Result<Option<Comment>, StoreError> {
    get_by_id(tx, id)
}

/// Comments on a post, oldest first
pub fn list_of_post(conn: &Connection, post_id: u64) -> Result<Vec<Comment>, StoreError> {
    let sql = format!(
        "SELECT {} FROM comments WHERE post_id = ? ORDER BY id ASC",
        COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![sql_id(post_id)], Comment::from_row)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn count_of_post(conn: &Connection, post_id: u64) -> Result<u64, StoreError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM comments WHERE post_id = ?",
        params![sql_id(post_id)],
        |row| row.get(0),
    )?;
    Ok(count as u64)
}

pub fn update_content(conn: &Connection, id: u64, content: &str) -> Result<bool, StoreError> {
    let changed = conn.execute(
        "UPDATE comments SET content = ? WHERE id = ?",
        params![content, sql_id(id)],
    )?;
    Ok(changed > 0)
}

pub fn delete(conn: &Connection, id: u64) -> Result<bool, StoreError> {
    let changed = conn.execute("DELETE FROM comments WHERE id = ?", params![sql_id(id)])?;
    Ok(changed > 0)
}

/// Delete every comment on a post, returning how many were removed
pub fn delete_of_post(conn: &Connection, post_id: u64) -> Result<usize, StoreError> {
    Ok(conn.execute(
        "DELETE FROM comments WHERE post_id = ?",
        params![sql_id(post_id)],
    )?)
}
