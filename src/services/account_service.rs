//! Account service - signup, login and profile lookup

use serde::Serialize;
use tracing::{debug, info};

use crate::auth::{hash_password, verify_password, IssuedToken};
use crate::db::accounts::{self, Account};
use crate::error::{AgoraError, Result};

use super::events::DomainEvent;
use super::{require_non_empty, ServiceContext};

/// A successful login
#[derive(Debug, Clone, Serialize)]
pub struct AccountSession {
    pub account: Account,
    pub token: IssuedToken,
}

pub struct AccountService {
    ctx: ServiceContext,
}

impl AccountService {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    /// Register a new account. A taken name is `AlreadyExists`.
    pub async fn create_account(&self, account_name: &str, password: &str) -> Result<Account> {
        require_non_empty("account_name", account_name)?;
        require_non_empty("password", password)?;

        // Cheap check before paying for the hash; the insert below re-checks
        let name = account_name.to_string();
        let taken = self
            .ctx
            .db
            .run(move |session| Ok::<_, AgoraError>(accounts::exists_by_name(session.conn(), &name)?))
            .await?;
        if taken {
            return Err(name_taken(account_name));
        }

        let password = password.to_string();
        let password_hash = tokio::task::spawn_blocking(move || hash_password(&password))
            .await
            .map_err(|e| AgoraError::Internal(format!("Hash task failed: {}", e)))??;

        let id = self.ctx.ids.generate()?;
        let account = Account {
            id,
            account_name: account_name.to_string(),
            password_hash,
            created_at: self.ctx.now(),
        };

        let row = account.clone();
        self.ctx
            .db
            .run(move |session| {
                let tx = session.begin()?;
                if accounts::exists_by_name(&tx, &row.account_name)? {
                    return Err(name_taken(&row.account_name));
                }
                accounts::insert(&tx, &row)?;
                tx.commit()?;
                Ok(())
            })
            .await?;

        info!(account_id = id, account_name = %account.account_name, "Account created");
        self.ctx.events.emit(DomainEvent::AccountCreated {
            id,
            account_name: account.account_name.clone(),
        });

        Ok(account)
    }

    /// Check credentials and issue a session token.
    ///
    /// An unknown name and a wrong password are indistinguishable to the caller.
    pub async fn create_session(&self, account_name: &str, password: &str) -> Result<AccountSession> {
        require_non_empty("account_name", account_name)?;
        require_non_empty("password", password)?;

        let name = account_name.to_string();
        let account = self
            .ctx
            .db
            .run(move |session| Ok::<_, AgoraError>(accounts::get_by_name(session.conn(), &name)?))
            .await?
            .ok_or_else(|| {
                debug!(account_name, "Login for unknown account");
                bad_credentials()
            })?;

        let password = password.to_string();
        let hash = account.password_hash.clone();
        let matches = tokio::task::spawn_blocking(move || verify_password(&password, &hash))
            .await
            .map_err(|e| AgoraError::Internal(format!("Hash task failed: {}", e)))??;
        if !matches {
            debug!(account_id = account.id, "Login with wrong password");
            return Err(bad_credentials());
        }

        let token = self.ctx.tokens.issue(account.id)?;
        self.ctx.events.emit(DomainEvent::SessionCreated {
            account_id: account.id,
            key_id: token.key_id,
        });

        Ok(AccountSession { account, token })
    }

    pub async fn get_account(&self, token: &str, account_id: u64) -> Result<Account> {
        self.ctx.authenticate(token).await?;

        self.ctx
            .db
            .run(move |session| Ok::<_, AgoraError>(accounts::get_by_id(session.conn(), account_id)?))
            .await?
            .ok_or_else(|| AgoraError::NotFound(format!("account {}", account_id)))
    }
}

fn name_taken(account_name: &str) -> AgoraError {
    AgoraError::AlreadyExists(format!("account name {} is already taken", account_name))
}

fn bad_credentials() -> AgoraError {
    AgoraError::Unauthenticated("incorrect account name or password".into())
}
