//! Agora - social network backend core
//!
//! Accounts, posts, comments, likes and follows over a small HTTP API.
//!
//! ## Components
//!
//! - **Ids**: snowflake generator, unique per node and strictly increasing
//! - **Tokens**: EdDSA session tokens signed with rotating keys whose public
//!   halves live in a key store
//! - **Storage**: SQLite units of work, with the write lock held from the
//!   ownership check to the commit
//! - **Services**: one use case per method, each authenticated, validated
//!   and run in its own transaction
//! - **Server**: hyper HTTP/1 transport with per-request deadlines

pub mod auth;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod server;
pub mod services;
pub mod snowflake;

pub use config::Args;
pub use error::{AgoraError, ErrorKind, Result};
pub use server::{run, AppState};
