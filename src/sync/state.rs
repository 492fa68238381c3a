//! In-memory comment state for one mounted board.
//!
//! Holds the board's comments and a map of relocations whose echo has not yet
//! come back on the change feed. Everything here is synchronous; the session
//! decides when store writes happen.

use std::collections::HashMap;

use crate::board::models::{Comment, CommentChange, TemplateColumn};
use crate::errors::SyncError;

/// What a feed event did to the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Inserted,
    /// Insert for an id already on the board.
    Duplicate,
    Updated,
    /// Update for a comment with a pending relocation; discarded.
    EchoSuppressed,
    Deleted,
    /// Update or delete for an id not on the board.
    Ignored,
}

#[derive(Debug, Clone)]
pub struct BoardState {
    retro_id: String,
    columns: Vec<TemplateColumn>,
    comments: Vec<Comment>,
    /// comment id → column the local relocation moved it to
    pending_echoes: HashMap<String, String>,
}

impl BoardState {
    /// Seed from an initial fetch. Repeated ids keep their first occurrence.
    pub fn new(retro_id: &str, columns: Vec<TemplateColumn>, comments: Vec<Comment>) -> Self {
        let mut state = Self {
            retro_id: retro_id.to_string(),
            columns,
            comments: Vec::with_capacity(comments.len()),
            pending_echoes: HashMap::new(),
        };
        state.reset(comments);
        state
    }

    pub fn retro_id(&self) -> &str {
        &self.retro_id
    }

    pub fn columns(&self) -> &[TemplateColumn] {
        &self.columns
    }

    pub fn has_column(&self, column_id: &str) -> bool {
        self.columns.iter().any(|c| c.id == column_id)
    }

    pub fn comments(&self) -> &[Comment] {
        &self.comments
    }

    pub fn comments_in<'a>(&'a self, column_id: &'a str) -> impl Iterator<Item = &'a Comment> + 'a {
        self.comments.iter().filter(move |c| c.column_id == column_id)
    }

    pub fn comment(&self, id: &str) -> Option<&Comment> {
        self.comments.iter().find(|c| c.id == id)
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.comments.iter().position(|c| c.id == id)
    }

    pub fn is_awaiting_echo(&self, comment_id: &str) -> bool {
        self.pending_echoes.contains_key(comment_id)
    }

    pub fn pending_echo_count(&self) -> usize {
        self.pending_echoes.len()
    }

    /// No relocation is waiting for its echo.
    pub fn is_synchronized(&self) -> bool {
        self.pending_echoes.is_empty()
    }

    /// Replace the comment set with freshly fetched rows and forget pending echoes.
    pub fn reset(&mut self, comments: Vec<Comment>) {
        self.comments.clear();
        self.pending_echoes.clear();
        for comment in comments {
            if self.position(&comment.id).is_none() {
                self.comments.push(comment);
            }
        }
    }

    /// Apply one change-feed event.
    pub fn apply(&mut self, change: CommentChange) -> Applied {
        match change {
            CommentChange::Insert { comment } => {
                if self.position(&comment.id).is_some() {
                    return Applied::Duplicate;
                }
                self.comments.push(comment);
                Applied::Inserted
            }
            CommentChange::Update { comment } => {
                if self.pending_echoes.remove(&comment.id).is_some() {
                    return Applied::EchoSuppressed;
                }
                match self.position(&comment.id) {
                    Some(idx) => {
                        self.comments[idx] = comment;
                        Applied::Updated
                    }
                    None => {
                        tracing::debug!(comment_id = %comment.id, "update for unknown comment ignored");
                        Applied::Ignored
                    }
                }
            }
            CommentChange::Delete { comment_id } => match self.position(&comment_id) {
                Some(idx) => {
                    self.comments.remove(idx);
                    Applied::Deleted
                }
                None => {
                    tracing::debug!(comment_id = %comment_id, "delete for unknown comment ignored");
                    Applied::Ignored
                }
            },
        }
    }

    /// Validate a relocation. `Ok(false)` means the comment is already there
    /// and nothing should happen.
    pub fn check_relocation(&self, comment_id: &str, column_id: &str) -> Result<bool, SyncError> {
        let comment = self.comment(comment_id).ok_or_else(|| SyncError::UnknownComment {
            id: comment_id.to_string(),
        })?;
        if comment.column_id == column_id {
            return Ok(false);
        }
        if !self.has_column(column_id) {
            return Err(SyncError::UnknownColumn {
                column: column_id.to_string(),
            });
        }
        Ok(true)
    }

    pub fn mark_pending(&mut self, comment_id: &str, column_id: &str) {
        self.pending_echoes
            .insert(comment_id.to_string(), column_id.to_string());
    }

    /// Optimistically move a comment locally.
    pub fn move_local(&mut self, comment_id: &str, column_id: &str) {
        if let Some(idx) = self.position(comment_id) {
            self.comments[idx].column_id = column_id.to_string();
        }
    }

    /// Drop the pending echo for a failed relocation, unless a newer
    /// relocation of the same comment has replaced it.
    pub fn clear_pending(&mut self, comment_id: &str, column_id: &str) -> bool {
        if self.pending_echoes.get(comment_id).map(String::as_str) == Some(column_id) {
            self.pending_echoes.remove(comment_id);
            true
        } else {
            false
        }
    }
}
