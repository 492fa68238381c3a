use async_trait::async_trait;
use tokio::sync::mpsc;

use super::store::{FeedSubscription, RetroStore};
use crate::board::models::{Comment, Identity, NewComment, RetroDetail};
use crate::board::policy::BoardService;
use crate::errors::BoardError;

const SUBSCRIPTION_BUFFER: usize = 64;

/// In-process store acting as one identity, under the same access policy as
/// the HTTP API.
#[derive(Clone)]
pub struct LocalStore {
    service: BoardService,
    identity: Identity,
}

impl LocalStore {
    pub fn new(service: BoardService, identity: Identity) -> Self {
        Self { service, identity }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }
}

#[async_trait]
impl RetroStore for LocalStore {
    async fn fetch_retro(&self, retro_id: &str) -> Result<RetroDetail, BoardError> {
        self.service.retro_detail(&self.identity, retro_id).await
    }

    async fn insert_comment(&self, new: NewComment) -> Result<Comment, BoardError> {
        if new.user_id != self.identity.user_id {
            tracing::debug!(requested = %new.user_id, acting = %self.identity.user_id, "comment author set to acting user");
        }
        self.service
            .insert_comment(&self.identity, &new.retro_id, &new.column_id, &new.comment)
            .await
    }

    async fn update_comment_column(&self, comment_id: &str, column_id: &str) -> Result<Comment, BoardError> {
        self.service
            .relocate_comment(&self.identity, comment_id, column_id)
            .await
    }

    async fn update_comment_body(&self, comment_id: &str, body: &str) -> Result<Comment, BoardError> {
        self.service.edit_comment(&self.identity, comment_id, body).await
    }

    async fn delete_comment(&self, comment_id: &str) -> Result<(), BoardError> {
        self.service.delete_comment(&self.identity, comment_id).await
    }

    async fn subscribe(&self, retro_id: &str) -> Result<FeedSubscription, BoardError> {
        self.service.check_retro(&self.identity, retro_id).await?;
        let receiver = self.service.feed().subscribe(retro_id);
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let forwarder = tokio::spawn(receiver.forward(tx));
        Ok(FeedSubscription::with_forwarder(rx, forwarder))
    }
}
