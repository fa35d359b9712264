//! Post service
//!
//! Updates and deletes go through the ownership guard. Deleting a post also
//! deletes its comments and likes in the same transaction.

use tracing::info;

use crate::db::posts::{self, Post};
use crate::db::{comments, likes};
use crate::error::{AgoraError, Result};

use super::events::DomainEvent;
use super::guard::lock_owned;
use super::{require_non_empty, ServiceContext};

pub struct PostService {
    ctx: ServiceContext,
}

impl PostService {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    // =========================================================================
    // Read Operations
    // =========================================================================

    pub async fn get_post(&self, token: &str, post_id: u64) -> Result<Post> {
        self.ctx.authenticate(token).await?;

        self.ctx
            .db
            .run(move |session| Ok::<_, AgoraError>(posts::get_by_id(session.conn(), post_id)?))
            .await?
            .ok_or_else(|| AgoraError::NotFound(format!("post {}", post_id)))
    }

    /// Posts written by `account_id`, newest first
    pub async fn posts_of_account(&self, token: &str, account_id: u64) -> Result<Vec<Post>> {
        self.ctx.authenticate(token).await?;

        self.ctx
            .db
            .run(move |session| Ok(posts::list_of_account(session.conn(), account_id)?))
            .await
    }

    // =========================================================================
    // Write Operations
    // =========================================================================

    pub async fn create_post(&self, token: &str, content: &str) -> Result<Post> {
        let caller = self.ctx.authenticate(token).await?;
        require_non_empty("content", content)?;

        let post = Post {
            id: self.ctx.ids.generate()?,
            account_id: caller,
            content: content.to_string(),
            created_at: self.ctx.now(),
        };

        let row = post.clone();
        self.ctx
            .db
            .run(move |session| {
                let tx = session.begin()?;
                posts::insert(&tx, &row)?;
                tx.commit()?;
                Ok::<_, AgoraError>(())
            })
            .await?;

        info!(post_id = post.id, account_id = caller, "Post created");
        self.ctx.events.emit(DomainEvent::PostCreated {
            id: post.id,
            account_id: caller,
        });

        Ok(post)
    }

    /// Replace a post's content. Only its author may.
    pub async fn update_post(&self, token: &str, post_id: u64, content: &str) -> Result<Post> {
        let caller = self.ctx.authenticate(token).await?;
        require_non_empty("content", content)?;

        let content = content.to_string();
        let updated = self
            .ctx
            .db
            .run(move |session| {
                let tx = session.begin()?;
                let mut post = lock_owned(&tx, caller, post_id, "update", posts::lock_for_update)?;
                posts::update_content(&tx, post_id, &content)?;
                tx.commit()?;
                post.content = content;
                Ok::<_, AgoraError>(post)
            })
            .await?;

        info!(post_id, account_id = caller, "Post updated");
        self.ctx.events.emit(DomainEvent::PostUpdated { id: post_id });

        Ok(updated)
    }

    /// Delete a post with all of its comments and likes. Only its author may.
    pub async fn delete_post(&self, token: &str, post_id: u64) -> Result<()> {
        let caller = self.ctx.authenticate(token).await?;

        let (comments_removed, likes_removed) = self
            .ctx
            .db
            .run(move |session| {
                let tx = session.begin()?;
                lock_owned(&tx, caller, post_id, "delete", posts::lock_for_update)?;
                let comments_removed = comments::delete_of_post(&tx, post_id)?;
                let likes_removed = likes::delete_of_post(&tx, post_id)?;
                posts::delete(&tx, post_id)?;
                tx.commit()?;
                Ok::<_, AgoraError>((comments_removed, likes_removed))
            })
            .await?;

        info!(
            post_id,
            account_id = caller,
            comments_removed,
            likes_removed,
            "Post deleted"
        );
        self.ctx.events.emit(DomainEvent::PostDeleted {
            id: post_id,
            comments_removed,
            likes_removed,
        });

        Ok(())
    }
}
