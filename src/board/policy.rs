//! Access-checked board operations.
//!
//! Every write that reaches the database goes through here, whether it comes
//! from an HTTP handler or from the in-process `LocalStore`. The checks are
//! plain functions over `&RetroDb` so they run inside a single `DbHandle::call`;
//! `BoardService` wraps them and publishes the resulting comment changes.

use super::db::{DbHandle, RetroDb};
use super::feed::ChangeFeed;
use super::models::{Comment, CommentChange, Identity, Retro, RetroDetail, RetroSummary, Template};
use crate::errors::BoardError;
use crate::validate::{NewRetroForm, validate_comment_body};

type PolicyResult<T> = Result<T, BoardError>;

/// Comment deletion is open to the author and to admins of the board's team.
pub fn can_delete_comment(identity: &Identity, comment: &Comment) -> bool {
    comment.user_id == identity.user_id || identity.is_admin()
}

pub fn can_edit_comment(identity: &Identity, comment: &Comment) -> bool {
    comment.user_id == identity.user_id
}

/// Look up a retro owned by the caller's team. Retros of other teams are
/// indistinguishable from missing ones.
pub fn team_retro(db: &RetroDb, identity: &Identity, retro_id: &str) -> PolicyResult<Retro> {
    match db.get_retro(retro_id).map_err(BoardError::Database)? {
        Some(retro) if retro.team_id == identity.team_id => Ok(retro),
        _ => Err(BoardError::RetroNotFound {
            id: retro_id.to_string(),
        }),
    }
}

fn retro_template(db: &RetroDb, retro: &Retro) -> PolicyResult<Template> {
    db.get_template(&retro.template_id)
        .map_err(BoardError::Database)?
        .ok_or_else(|| BoardError::TemplateNotFound {
            id: retro.template_id.clone(),
        })
}

fn require_column(template: &Template, column_id: &str) -> PolicyResult<()> {
    if template.has_column(column_id) {
        Ok(())
    } else {
        Err(BoardError::InvalidColumn {
            column: column_id.to_string(),
            template_id: template.id.clone(),
        })
    }
}

/// Look up a comment on one of the caller's team's retros.
fn team_comment(db: &RetroDb, identity: &Identity, comment_id: &str) -> PolicyResult<(Comment, Retro)> {
    let not_found = || BoardError::CommentNotFound {
        id: comment_id.to_string(),
    };
    let comment = db
        .get_comment(comment_id)
        .map_err(BoardError::Database)?
        .ok_or_else(not_found)?;
    let retro = team_retro(db, identity, &comment.retro_id).map_err(|_| not_found())?;
    Ok((comment, retro))
}

pub fn retro_detail(db: &RetroDb, identity: &Identity, retro_id: &str) -> PolicyResult<RetroDetail> {
    team_retro(db, identity, retro_id)?;
    db.get_retro_detail(retro_id)
        .map_err(BoardError::Database)?
        .ok_or_else(|| BoardError::RetroNotFound {
            id: retro_id.to_string(),
        })
}

pub fn list_retros(db: &RetroDb, identity: &Identity) -> PolicyResult<Vec<RetroSummary>> {
    db.list_retros(&identity.team_id).map_err(BoardError::Database)
}

pub fn create_retro(db: &RetroDb, identity: &Identity, form: &NewRetroForm) -> PolicyResult<Retro> {
    form.validate()?;
    let template_id = form.template_id.trim();
    if db.get_template(template_id).map_err(BoardError::Database)?.is_none() {
        return Err(BoardError::TemplateNotFound {
            id: template_id.to_string(),
        });
    }
    db.create_retro(&identity.team_id, template_id, form.name.trim())
        .map_err(BoardError::Database)
}

/// Delete a retro and return the comments that went with it.
pub fn delete_retro(db: &RetroDb, identity: &Identity, retro_id: &str) -> PolicyResult<Vec<Comment>> {
    team_retro(db, identity, retro_id)?;
    if !identity.is_admin() {
        return Err(BoardError::Forbidden(
            "Only team admins can delete a retro".into(),
        ));
    }
    let comments = db.list_comments(retro_id).map_err(BoardError::Database)?;
    db.delete_retro(retro_id).map_err(BoardError::Database)?;
    Ok(comments)
}

/// Insert a comment authored by the caller.
pub fn insert_comment(
    db: &RetroDb,
    identity: &Identity,
    retro_id: &str,
    column_id: &str,
    body: &str,
) -> PolicyResult<Comment> {
    validate_comment_body(body)?;
    let retro = team_retro(db, identity, retro_id)?;
    let template = retro_template(db, &retro)?;
    require_column(&template, column_id)?;
    db.create_comment(&super::models::NewComment {
        comment: body.to_string(),
        column_id: column_id.to_string(),
        retro_id: retro.id,
        user_id: identity.user_id.clone(),
    })
    .map_err(BoardError::Database)
}

/// Move a comment. Any member of the board's team may do this.
pub fn relocate_comment(
    db: &RetroDb,
    identity: &Identity,
    comment_id: &str,
    column_id: &str,
) -> PolicyResult<Comment> {
    let (_, retro) = team_comment(db, identity, comment_id)?;
    let template = retro_template(db, &retro)?;
    require_column(&template, column_id)?;
    db.update_comment_column(comment_id, column_id)
        .map_err(BoardError::Database)?
        .ok_or_else(|| BoardError::CommentNotFound {
            id: comment_id.to_string(),
        })
}

pub fn edit_comment(
    db: &RetroDb,
    identity: &Identity,
    comment_id: &str,
    body: &str,
) -> PolicyResult<Comment> {
    validate_comment_body(body)?;
    let (comment, _) = team_comment(db, identity, comment_id)?;
    if !can_edit_comment(identity, &comment) {
        return Err(BoardError::Forbidden(
            "Only the author can edit a comment".into(),
        ));
    }
    db.update_comment_body(comment_id, body)
        .map_err(BoardError::Database)?
        .ok_or_else(|| BoardError::CommentNotFound {
            id: comment_id.to_string(),
        })
}

/// Delete a comment and return the removed row.
pub fn delete_comment(db: &RetroDb, identity: &Identity, comment_id: &str) -> PolicyResult<Comment> {
    let (comment, _) = team_comment(db, identity, comment_id)?;
    if !can_delete_comment(identity, &comment) {
        return Err(BoardError::Forbidden(
            "Only the author or a team admin can delete a comment".into(),
        ));
    }
    if !db.delete_comment(comment_id).map_err(BoardError::Database)? {
        return Err(BoardError::CommentNotFound {
            id: comment_id.to_string(),
        });
    }
    Ok(comment)
}

// ── Async service ─────────────────────────────────────────────────────

/// Runs policy-checked operations on the blocking pool and publishes each
/// successful comment write to the change feed.
#[derive(Clone)]
pub struct BoardService {
    db: DbHandle,
    feed: ChangeFeed,
}

impl BoardService {
    pub fn new(db: DbHandle, feed: ChangeFeed) -> Self {
        Self { db, feed }
    }

    pub fn db(&self) -> &DbHandle {
        &self.db
    }

    pub fn feed(&self) -> &ChangeFeed {
        &self.feed
    }

    async fn run<T, F>(&self, f: F) -> PolicyResult<T>
    where
        F: FnOnce(&RetroDb) -> PolicyResult<T> + Send + 'static,
        T: Send + 'static,
    {
        self.db
            .call(move |db| Ok(f(db)))
            .await
            .map_err(BoardError::Database)?
    }

    pub async fn retro_detail(&self, identity: &Identity, retro_id: &str) -> PolicyResult<RetroDetail> {
        let (identity, retro_id) = (identity.clone(), retro_id.to_string());
        self.run(move |db| retro_detail(db, &identity, &retro_id)).await
    }

    /// Check the caller can see a retro without loading its comments.
    pub async fn check_retro(&self, identity: &Identity, retro_id: &str) -> PolicyResult<Retro> {
        let (identity, retro_id) = (identity.clone(), retro_id.to_string());
        self.run(move |db| team_retro(db, &identity, &retro_id)).await
    }

    pub async fn list_retros(&self, identity: &Identity) -> PolicyResult<Vec<RetroSummary>> {
        let identity = identity.clone();
        self.run(move |db| list_retros(db, &identity)).await
    }

    pub async fn create_retro(&self, identity: &Identity, form: NewRetroForm) -> PolicyResult<Retro> {
        let identity = identity.clone();
        let retro = self.run(move |db| create_retro(db, &identity, &form)).await?;
        tracing::info!(retro_id = %retro.id, template_id = %retro.template_id, "retro created");
        Ok(retro)
    }

    pub async fn delete_retro(&self, identity: &Identity, retro_id: &str) -> PolicyResult<()> {
        let (identity, id) = (identity.clone(), retro_id.to_string());
        let removed = self.run(move |db| delete_retro(db, &identity, &id)).await?;
        for comment in removed {
            self.feed.publish(retro_id, CommentChange::Delete { comment_id: comment.id });
        }
        tracing::info!(retro_id, "retro deleted");
        Ok(())
    }

    pub async fn insert_comment(
        &self,
        identity: &Identity,
        retro_id: &str,
        column_id: &str,
        body: &str,
    ) -> PolicyResult<Comment> {
        let identity = identity.clone();
        let (retro_id, column_id, body) = (retro_id.to_string(), column_id.to_string(), body.to_string());
        let comment = self
            .run(move |db| insert_comment(db, &identity, &retro_id, &column_id, &body))
            .await?;
        self.feed.publish(&comment.retro_id, CommentChange::Insert { comment: comment.clone() });
        Ok(comment)
    }

    pub async fn relocate_comment(
        &self,
        identity: &Identity,
        comment_id: &str,
        column_id: &str,
    ) -> PolicyResult<Comment> {
        let identity = identity.clone();
        let (comment_id, column_id) = (comment_id.to_string(), column_id.to_string());
        let comment = self
            .run(move |db| relocate_comment(db, &identity, &comment_id, &column_id))
            .await?;
        self.feed.publish(&comment.retro_id, CommentChange::Update { comment: comment.clone() });
        Ok(comment)
    }

    pub async fn edit_comment(
        &self,
        identity: &Identity,
        comment_id: &str,
        body: &str,
    ) -> PolicyResult<Comment> {
        let identity = identity.clone();
        let (comment_id, body) = (comment_id.to_string(), body.to_string());
        let comment = self
            .run(move |db| edit_comment(db, &identity, &comment_id, &body))
            .await?;
        self.feed.publish(&comment.retro_id, CommentChange::Update { comment: comment.clone() });
        Ok(comment)
    }

    pub async fn delete_comment(&self, identity: &Identity, comment_id: &str) -> PolicyResult<()> {
        let (identity, id) = (identity.clone(), comment_id.to_string());
        let comment = self.run(move |db| delete_comment(db, &identity, &id)).await?;
        self.feed.publish(&comment.retro_id, CommentChange::Delete { comment_id: comment.id });
        Ok(())
    }
}
