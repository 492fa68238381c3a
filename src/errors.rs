//! Typed error hierarchy for retroboard.
//!
//! Two top-level enums cover the two halves of the system:
//! - `BoardError` — store, access-policy, and identity failures
//! - `SyncError` — board session (client-side state machine) failures

use thiserror::Error;

use crate::validate::ValidationErrors;

/// Errors from the record store, the access policy, and identity handling.
#[derive(Debug, Error)]
pub enum BoardError {
    #[error("Retro {id} not found")]
    RetroNotFound { id: String },

    #[error("Comment {id} not found")]
    CommentNotFound { id: String },

    #[error("Template {id} not found")]
    TemplateNotFound { id: String },

    #[error("Column '{column}' is not part of template {template_id}")]
    InvalidColumn { column: String, template_id: String },

    #[error("Invalid token")]
    InvalidInviteToken,

    #[error("Email {email} is already registered")]
    EmailTaken { email: String },

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationErrors),

    #[error("Database error: {0}")]
    Database(#[source] anyhow::Error),

    #[error("Store request failed: {0}")]
    Transport(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors from a mounted board session.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Comment {id} is not on this board")]
    UnknownComment { id: String },

    #[error("Column '{column}' is not part of this board's template")]
    UnknownColumn { column: String },

    #[error("Not permitted to {action} comment {comment_id}")]
    NotPermitted {
        action: &'static str,
        comment_id: String,
    },

    #[error("Invalid input: {0}")]
    Validation(#[from] ValidationErrors),

    #[error("Change feed closed")]
    FeedClosed,

    #[error(transparent)]
    Store(#[from] BoardError),
}
