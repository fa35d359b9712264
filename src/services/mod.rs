//! Use cases for accounts, posts, comments, likes and follows
//!
//! Each service wraps the accessors in `db/` with:
//! - Token verification (every call except account creation and login)
//! - Input validation
//! - One unit of work per use case, with the ownership guard on updates
//!   and deletes
//! - Event emission after commit
//!
//! ## Architecture
//!
//! ```text
//! HTTP Handlers (thin)
//!     ↓
//! Service Layer (auth, guard, transactions)
//!     ↓
//! Accessors (db/*.rs)
//!     ↓
//! SQLite Database
//! ```
//!
//! Services translate every storage failure into an [`AgoraError`]; nothing
//! from `rusqlite` reaches their callers.

pub mod account_service;
pub mod comment_service;
pub mod events;
pub mod follow_service;
pub mod guard;
pub mod like_service;
pub mod post_service;

pub use account_service::{AccountService, AccountSession};
pub use comment_service::CommentService;
pub use events::{spawn_logging_listener, DomainEvent, EventBus, EventListener};
pub use follow_service::FollowService;
pub use like_service::LikeService;
pub use post_service::PostService;

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::auth::TokenService;
use crate::clock::Clock;
use crate::db::Database;
use crate::error::{AgoraError, Result};
use crate::snowflake::IdGenerator;

/// Collaborators shared by every service
#[derive(Clone)]
pub struct ServiceContext {
    pub db: Database,
    pub tokens: Arc<TokenService>,
    pub ids: Arc<IdGenerator>,
    pub clock: Arc<dyn Clock>,
    pub events: Arc<EventBus>,
}

impl ServiceContext {
    /// Resolve a token to the caller's account id
    pub async fn authenticate(&self, token: &str) -> Result<u64> {
        Ok(self.tokens.verify(token).await?.account_id)
    }

    /// Current time at the millisecond resolution rows are stored at
    pub fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.clock.now_millis()).unwrap_or_default()
    }
}

/// Reject empty or whitespace-only input
pub(crate) fn require_non_empty(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(AgoraError::InvalidArgument(format!("{} must not be empty", field)));
    }
    Ok(())
}

/// Service container handed to the HTTP layer
pub struct Services {
    pub accounts: Arc<AccountService>,
    pub posts: Arc<PostService>,
    pub comments: Arc<CommentService>,
    pub likes: Arc<LikeService>,
    pub follows: Arc<FollowService>,
    pub tokens: Arc<TokenService>,
    pub events: Arc<EventBus>,
}

impl Services {
    pub fn new(
        db: Database,
        tokens: Arc<TokenService>,
        ids: Arc<IdGenerator>,
        clock: Arc<dyn Clock>,
        events: Arc<EventBus>,
    ) -> Self {
        let ctx = ServiceContext {
            db,
            tokens: tokens.clone(),
            ids,
            clock,
            events: events.clone(),
        };

        Self {
            accounts: Arc::new(AccountService::new(ctx.clone())),
            posts: Arc::new(PostService::new(ctx.clone())),
            comments: Arc::new(CommentService::new(ctx.clone())),
            likes: Arc::new(LikeService::new(ctx.clone())),
            follows: Arc::new(FollowService::new(ctx)),
            tokens,
            events,
        }
    }
}
