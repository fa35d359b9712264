//! Follow service
//!
//! The caller always acts as the follower; `following_id` is the account
//! being followed.

use tracing::info;

use crate::db::accounts::{self, Account};
use crate::db::follows::{self, Follow};
use crate::db::Session;
use crate::error::{AgoraError, Result, StoreError};

use super::events::DomainEvent;
use super::ServiceContext;

pub struct FollowService {
    ctx: ServiceContext,
}

impl FollowService {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    // =========================================================================
    // Read Operations
    // =========================================================================

    pub async fn follower_count(&self, token: &str, account_id: u64) -> Result<u64> {
        self.ctx.authenticate(token).await?;

        self.ctx
            .db
            .run(move |session| Ok(follows::follower_count(session.conn(), account_id)?))
            .await
    }

    pub async fn following_count(&self, token: &str, account_id: u64) -> Result<u64> {
        self.ctx.authenticate(token).await?;

        self.ctx
            .db
            .run(move |session| Ok(follows::following_count(session.conn(), account_id)?))
            .await
    }

    /// Accounts following `account_id`
    pub async fn followers(&self, token: &str, account_id: u64) -> Result<Vec<Account>> {
        self.ctx.authenticate(token).await?;

        self.ctx
            .db
            .run(move |session| resolve_accounts(session, account_id, follows::followers))
            .await
    }

    /// Accounts `account_id` follows
    pub async fn followings(&self, token: &str, account_id: u64) -> Result<Vec<Account>> {
        self.ctx.authenticate(token).await?;

        self.ctx
            .db
            .run(move |session| resolve_accounts(session, account_id, follows::followings))
            .await
    }

    // =========================================================================
    // Write Operations
    // =========================================================================

    /// Follow `following_id`. Following yourself is rejected, following twice
    /// is `AlreadyExists`.
    pub async fn create_follow(&self, token: &str, following_id: u64) -> Result<()> {
        let caller = self.ctx.authenticate(token).await?;
        if caller == following_id {
            return Err(AgoraError::InvalidArgument("an account cannot follow itself".into()));
        }

        let follow = Follow {
            account_id: caller,
            following_id,
            created_at: self.ctx.now(),
        };

        self.ctx
            .db
            .run(move |session| {
                let tx = session.begin()?;
                if accounts::get_by_id(&tx, following_id)?.is_none() {
                    return Err(AgoraError::NotFound(format!("account {}", following_id)));
                }
                follows::insert(&tx, &follow).map_err(|e| match AgoraError::from(e) {
                    AgoraError::AlreadyExists(_) => AgoraError::AlreadyExists(format!(
                        "already following account {}",
                        following_id
                    )),
                    other => other,
                })?;
                tx.commit()?;
                Ok(())
            })
            .await?;

        info!(account_id = caller, following_id, "Follow created");
        self.ctx.events.emit(DomainEvent::FollowCreated {
            account_id: caller,
            following_id,
        });

        Ok(())
    }

    /// Stop following `following_id`. Not following it is `NotFound`.
    pub async fn delete_follow(&self, token: &str, following_id: u64) -> Result<()> {
        let caller = self.ctx.authenticate(token).await?;

        self.ctx
            .db
            .run(move |session| {
                let tx = session.begin()?;
                if !follows::delete(&tx, caller, following_id)? {
                    return Err(AgoraError::NotFound(format!(
                        "follow of account {}",
                        following_id
                    )));
                }
                tx.commit()?;
                Ok(())
            })
            .await?;

        info!(account_id = caller, following_id, "Follow removed");
        self.ctx.events.emit(DomainEvent::FollowDeleted {
            account_id: caller,
            following_id,
        });

        Ok(())
    }
}

/// List ids with `list`, then load their accounts, all from one snapshot
fn resolve_accounts(
    session: &mut Session,
    account_id: u64,
    list: fn(&rusqlite::Connection, u64) -> std::result::Result<Vec<u64>, StoreError>,
) -> Result<Vec<Account>> {
    let snapshot = session.snapshot()?;
    let ids = list(&snapshot, account_id)?;
    Ok(accounts::get_by_ids(&snapshot, &ids)?)
}
