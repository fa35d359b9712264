//! Domain events published after each committed mutation
//!
//! Downstream consumers (feed fan-out, cache invalidation, audit) subscribe to
//! the [`EventBus`]. Events are only emitted once the transaction that
//! produced them has committed, so a subscriber never sees a rolled-back write.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, info, trace};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainEvent {
    AccountCreated {
        id: u64,
        account_name: String,
    },
    SessionCreated {
        account_id: u64,
        key_id: u64,
    },

    PostCreated {
        id: u64,
        account_id: u64,
    },
    PostUpdated {
        id: u64,
    },
    PostDeleted {
        id: u64,
        comments_removed: usize,
        likes_removed: usize,
    },

    CommentCreated {
        id: u64,
        post_id: u64,
        account_id: u64,
    },
    /// `replaced` is the content the update overwrote, as read under the row lock
    CommentUpdated {
        id: u64,
        replaced: String,
    },
    CommentDeleted {
        id: u64,
        post_id: u64,
    },

    LikeCreated {
        account_id: u64,
        post_id: u64,
    },
    LikeDeleted {
        account_id: u64,
        post_id: u64,
    },

    FollowCreated {
        account_id: u64,
        following_id: u64,
    },
    FollowDeleted {
        account_id: u64,
        following_id: u64,
    },
}

/// Trait for event listeners
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &DomainEvent);
}

/// Broadcast channel for [`DomainEvent`]s
pub struct EventBus {
    sender: broadcast::Sender<DomainEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish to all current subscribers. Dropped if there are none.
    pub fn emit(&self, event: DomainEvent) {
        trace!(event = ?event, "Emitting domain event");
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Writes an audit line per event
pub struct LoggingEventListener;

impl EventListener for LoggingEventListener {
    fn on_event(&self, event: &DomainEvent) {
        match event {
            DomainEvent::AccountCreated { id, account_name } => {
                info!(account_id = id, account_name = %account_name, "Account created");
            }
            DomainEvent::PostDeleted {
                id,
                comments_removed,
                likes_removed,
            } => {
                info!(
                    post_id = id,
                    comments_removed, likes_removed, "Post deleted with its comments and likes"
                );
            }
            DomainEvent::SessionCreated { account_id, key_id } => {
                debug!(account_id, key_id, "Session created");
            }
            _ => {
                debug!(event = ?event, "Domain event");
            }
        }
    }
}

/// Spawn a background task that logs all events
pub fn spawn_logging_listener(event_bus: Arc<EventBus>) -> tokio::task::JoinHandle<()> {
    let mut receiver = event_bus.subscribe();
    let listener = LoggingEventListener;

    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) => listener.on_event(&event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!(skipped = n, "Event listener lagged, skipped events");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed, stopping listener");
                    break;
                }
            }
        }
    })
}
