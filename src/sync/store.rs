use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::board::models::{Comment, CommentChange, NewComment, RetroDetail};
use crate::errors::BoardError;

/// A live stream of one retro's comment changes.
///
/// Dropping the subscription aborts the task feeding it, so the underlying
/// transport is released on every exit path.
pub struct FeedSubscription {
    rx: mpsc::Receiver<CommentChange>,
    forwarder: Option<JoinHandle<()>>,
}

impl FeedSubscription {
    pub fn new(rx: mpsc::Receiver<CommentChange>) -> Self {
        Self { rx, forwarder: None }
    }

    /// A subscription fed by `forwarder`, which is aborted on drop.
    pub fn with_forwarder(rx: mpsc::Receiver<CommentChange>, forwarder: JoinHandle<()>) -> Self {
        Self {
            rx,
            forwarder: Some(forwarder),
        }
    }

    /// Next change, or `None` once the feed has closed.
    pub async fn next(&mut self) -> Option<CommentChange> {
        self.rx.recv().await
    }
}

impl Drop for FeedSubscription {
    fn drop(&mut self) {
        if let Some(task) = self.forwarder.take() {
            task.abort();
        }
    }
}

/// Record store and change feed as seen by a board session.
#[async_trait]
pub trait RetroStore: Send + Sync {
    /// The retro with its template columns, team, and current comments.
    async fn fetch_retro(&self, retro_id: &str) -> Result<RetroDetail, BoardError>;

    async fn insert_comment(&self, new: NewComment) -> Result<Comment, BoardError>;

    async fn update_comment_column(&self, comment_id: &str, column_id: &str) -> Result<Comment, BoardError>;

    async fn update_comment_body(&self, comment_id: &str, body: &str) -> Result<Comment, BoardError>;

    async fn delete_comment(&self, comment_id: &str) -> Result<(), BoardError>;

    async fn subscribe(&self, retro_id: &str) -> Result<FeedSubscription, BoardError>;
}
