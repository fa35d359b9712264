//! Comment service

use tracing::info;

use crate::db::comments::{self, Comment};
use crate::db::posts;
use crate::error::{AgoraError, Result};

use super::events::DomainEvent;
use super::guard::lock_owned;
use super::{require_non_empty, ServiceContext};

pub struct CommentService {
    ctx: ServiceContext,
}

impl CommentService {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    /// Comments on a post, oldest first
    pub async fn comments_of_post(&self, token: &str, post_id: u64) -> Result<Vec<Comment>> {
        self.ctx.authenticate(token).await?;

        self.ctx
            .db
            .run(move |session| Ok(comments::list_of_post(session.conn(), post_id)?))
            .await
    }

    pub async fn comment_count_of_post(&self, token: &str, post_id: u64) -> Result<u64> {
        self.ctx.authenticate(token).await?;

        self.ctx
            .db
            .run(move |session| Ok(comments::count_of_post(session.conn(), post_id)?))
            .await
    }

    /// Comment on an existing post
    pub async fn create_comment(&self, token: &str, post_id: u64, content: &str) -> Result<Comment> {
        let caller = self.ctx.authenticate(token).await?;
        require_non_empty("content", content)?;

        let comment = Comment {
            id: self.ctx.ids.generate()?,
            post_id,
            account_id: caller,
            content: content.to_string(),
            created_at: self.ctx.now(),
        };

        let row = comment.clone();
        self.ctx
            .db
            .run(move |session| {
                let tx = session.begin()?;
                // The writer lock keeps the post from being deleted under us
                if posts::get_by_id(&tx, row.post_id)?.is_none() {
                    return Err(AgoraError::NotFound(format!("post {}", row.post_id)));
                }
                comments::insert(&tx, &row)?;
                tx.commit()?;
                Ok(())
            })
            .await?;

        info!(comment_id = comment.id, post_id, account_id = caller, "Comment created");
        self.ctx.events.emit(DomainEvent::CommentCreated {
            id: comment.id,
            post_id,
            account_id: caller,
        });

        Ok(comment)
    }

    /// Replace a comment's content. Only its author may.
    pub async fn update_comment(&self, token: &str, comment_id: u64, content: &str) -> Result<Comment> {
        let caller = self.ctx.authenticate(token).await?;
        require_non_empty("content", content)?;

        let content = content.to_string();
        let (updated, replaced) = self
            .ctx
            .db
            .run(move |session| {
                let tx = session.begin()?;
                let mut comment =
                    lock_owned(&tx, caller, comment_id, "update", comments::lock_for_update)?;
                comments::update_content(&tx, comment_id, &content)?;
                tx.commit()?;
                let replaced = std::mem::replace(&mut comment.content, content);
                Ok::<_, AgoraError>((comment, replaced))
            })
            .await?;

        info!(comment_id, account_id = caller, "Comment updated");
        self.ctx.events.emit(DomainEvent::CommentUpdated {
            id: comment_id,
            replaced,
        });

        Ok(updated)
    }

    /// Delete a comment. Only its author may.
    pub async fn delete_comment(&self, token: &str, comment_id: u64) -> Result<()> {
        let caller = self.ctx.authenticate(token).await?;

        let post_id = self
            .ctx
            .db
            .run(move |session| {
                let tx = session.begin()?;
                let comment =
                    lock_owned(&tx, caller, comment_id, "delete", comments::lock_for_update)?;
                comments::delete(&tx, comment_id)?;
                tx.commit()?;
                Ok::<_, AgoraError>(comment.post_id)
            })
            .await?;

        info!(comment_id, post_id, account_id = caller, "Comment deleted");
        self.ctx.events.emit(DomainEvent::CommentDeleted {
            id: comment_id,
            post_id,
        });

        Ok(())
    }
}
