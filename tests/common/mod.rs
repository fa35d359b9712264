//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use agora::auth::{SqliteKeyStore, TokenService};
use agora::clock::{Clock, SystemClock};
use agora::db::Database;
use agora::services::{EventBus, Services};
use agora::snowflake::IdGenerator;
use tempfile::TempDir;

pub struct TestApp {
    pub services: Services,
    pub db: Database,
    pub dir: TempDir,
}

impl TestApp {
    /// Services over a fresh database file, on the system clock
    pub async fn new(lock_timeout: Duration) -> Self {
        let dir = TempDir::new().unwrap();
        let db = Database::open(dir.path().join("agora.db"), lock_timeout).unwrap();
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let ids = Arc::new(IdGenerator::new(7, clock.clone()).unwrap());
        let tokens = Arc::new(
            TokenService::provision(
                Arc::new(SqliteKeyStore::new(db.clone())),
                ids.clone(),
                clock.clone(),
                Duration::from_secs(3600),
            )
            .await
            .unwrap(),
        );
        let services = Services::new(db.clone(), tokens, ids, clock, Arc::new(EventBus::new()));

        Self {
            services,
            db,
            dir,
        }
    }

    /// Create an account and log it in, returning (account id, token)
    pub async fn signup(&self, name: &str) -> (u64, String) {
        let account = self
            .services
            .accounts
            .create_account(name, "secret")
            .await
            .unwrap();
        let session = self
            .services
            .accounts
            .create_session(name, "secret")
            .await
            .unwrap();
        (account.id, session.token.token)
    }
}
