//! Like service

use tracing::info;

use crate::db::accounts::{self, Account};
use crate::db::likes::{self, Like};
use crate::db::posts;
use crate::error::{AgoraError, Result};

use super::events::DomainEvent;
use super::ServiceContext;

pub struct LikeService {
    ctx: ServiceContext,
}

impl LikeService {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    pub async fn like_count_of_post(&self, token: &str, post_id: u64) -> Result<u64> {
        self.ctx.authenticate(token).await?;

        self.ctx
            .db
            .run(move |session| Ok(likes::count_of_post(session.conn(), post_id)?))
            .await
    }

    /// Accounts that liked a post, earliest like first
    pub async fn like_accounts_of_post(&self, token: &str, post_id: u64) -> Result<Vec<Account>> {
        self.ctx.authenticate(token).await?;

        self.ctx
            .db
            .run(move |session| {
                let snapshot = session.snapshot()?;
                let ids = likes::accounts_of_post(&snapshot, post_id)?;
                Ok(accounts::get_by_ids(&snapshot, &ids)?)
            })
            .await
    }

    /// Like a post. Liking it again is `AlreadyExists`.
    pub async fn create_like(&self, token: &str, post_id: u64) -> Result<()> {
        let caller = self.ctx.authenticate(token).await?;

        let like = Like {
            account_id: caller,
            post_id,
            created_at: self.ctx.now(),
        };

        self.ctx
            .db
            .run(move |session| {
                let tx = session.begin()?;
                if posts::get_by_id(&tx, post_id)?.is_none() {
                    return Err(AgoraError::NotFound(format!("post {}", post_id)));
                }
                likes::insert(&tx, &like).map_err(|e| match AgoraError::from(e) {
                    AgoraError::AlreadyExists(_) => {
                        AgoraError::AlreadyExists(format!("post {} is already liked", post_id))
                    }
                    other => other,
                })?;
                tx.commit()?;
                Ok(())
            })
            .await?;

        info!(post_id, account_id = caller, "Post liked");
        self.ctx.events.emit(DomainEvent::LikeCreated {
            account_id: caller,
            post_id,
        });

        Ok(())
    }

    /// Remove the caller's like. No like to remove is `NotFound`.
    pub async fn delete_like(&self, token: &str, post_id: u64) -> Result<()> {
        let caller = self.ctx.authenticate(token).await?;

        self.ctx
            .db
            .run(move |session| {
                let tx = session.begin()?;
                if !likes::delete(&tx, caller, post_id)? {
                    return Err(AgoraError::NotFound(format!("like on post {}", post_id)));
                }
                tx.commit()?;
                Ok(())
            })
            .await?;

        info!(post_id, account_id = caller, "Like removed");
        self.ctx.events.emit(DomainEvent::LikeDeleted {
            account_id: caller,
            post_id,
        });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::services::testing::Harness;
    use std::time::Duration;

    #[tokio::test]
    async fn test_like_lifecycle() {
        let h = Harness::new().await;
        let (alice, alice_token) = h.signup("alice").await;
        let (bob, bob_token) = h.signup("bob").await;
        let post = h.services.posts.create_post(&alice_token, "post").await.unwrap();
        let likes = &h.services.likes;

        likes.create_like(&alice_token, post.id).await.unwrap();
        likes.create_like(&bob_token, post.id).await.unwrap();

        let err = likes.create_like(&bob_token, post.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);

        assert_eq!(likes.like_count_of_post(&alice_token, post.id).await.unwrap(), 2);
        let likers: Vec<u64> = likes
            .like_accounts_of_post(&alice_token, post.id)
            .await
            .unwrap()
            .iter()
            .map(|a| a.id)
            .collect();
        assert_eq!(likers, vec![alice, bob]);

        likes.delete_like(&bob_token, post.id).await.unwrap();
        let err = likes.delete_like(&bob_token, post.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(likes.like_count_of_post(&bob_token, post.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_likers_listed_in_order_of_liking() {
        let h = Harness::new().await;
        let (alice, alice_token) = h.signup("alice").await;
        let (bob, bob_token) = h.signup("bob").await;
        let (carol, carol_token) = h.signup("carol").await;
        let post = h.services.posts.create_post(&alice_token, "post").await.unwrap();
        let likes = &h.services.likes;

        // Newest account first, oldest last
        for token in [&carol_token, &alice_token, &bob_token] {
            h.clock.advance(Duration::from_millis(1));
            likes.create_like(token, post.id).await.unwrap();
        }

        let likers: Vec<u64> = likes
            .like_accounts_of_post(&alice_token, post.id)
            .await
            .unwrap()
            .iter()
            .map(|a| a.id)
            .collect();
        assert_eq!(likers, vec![carol, alice, bob]);
    }

    #[tokio::test]
    async fn test_like_missing_post() {
        let h = Harness::new().await;
        let (_, token) = h.signup("alice").await;

        let err = h.services.likes.create_like(&token, 77).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
