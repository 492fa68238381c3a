use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State, WebSocketUpgrade},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, patch, post},
};
use chrono::Duration;
use serde::Deserialize;

use super::auth::{self, CurrentUser};
use super::db::{DbHandle, RetroDb};
use super::feed::{self, ChangeFeed, Keepalive};
use super::policy::BoardService;
use crate::config::AuthSection;
use crate::errors::BoardError;
use crate::validate::{LoginForm, NewRetroForm, RegisterForm};

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub board: BoardService,
    pub auth: AuthSection,
    pub keepalive: Keepalive,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(db: DbHandle, feed: ChangeFeed, auth: AuthSection, keepalive: Keepalive) -> SharedState {
        Arc::new(Self {
            board: BoardService::new(db, feed),
            auth,
            keepalive,
        })
    }

    fn session_ttl(&self) -> Duration {
        Duration::hours(self.auth.session_ttl_hours)
    }
}

// ── Request payload types ─────────────────────────────────────────────

#[derive(Deserialize)]
pub struct TemplateQuery {
    pub search: Option<String>,
}

#[derive(Deserialize)]
pub struct CreateCommentRequest {
    pub comment: String,
    pub column_id: String,
}

#[derive(Deserialize)]
pub struct MoveCommentRequest {
    pub column_id: String,
}

#[derive(Deserialize)]
pub struct EditCommentRequest {
    pub comment: String,
}

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Unauthorized(String),
    Forbidden(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

impl From<BoardError> for ApiError {
    fn from(err: BoardError) -> Self {
        let msg = err.to_string();
        match err {
            BoardError::RetroNotFound { .. }
            | BoardError::CommentNotFound { .. }
            | BoardError::TemplateNotFound { .. } => ApiError::NotFound(msg),
            BoardError::InvalidColumn { .. }
            | BoardError::InvalidInviteToken
            | BoardError::EmailTaken { .. }
            | BoardError::Validation(_) => ApiError::BadRequest(msg),
            BoardError::Unauthorized(reason) => ApiError::Unauthorized(reason),
            BoardError::Forbidden(reason) => ApiError::Forbidden(reason),
            BoardError::Database(_) | BoardError::Transport(_) | BoardError::Other(_) => {
                tracing::error!("Request failed: {:#}", err);
                ApiError::Internal(msg)
            }
        }
    }
}

/// Run a fallible closure against the database on the blocking pool.
async fn with_db<T, F>(state: &SharedState, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&RetroDb) -> Result<T, BoardError> + Send + 'static,
    T: Send + 'static,
{
    let result = state
        .board
        .db()
        .call(move |db| Ok(f(db)))
        .await
        .map_err(BoardError::Database)?;
    Ok(result?)
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
        .route("/api/auth/logout", post(logout))
        .route("/api/me", get(me))
        .route("/api/teams/invite/{token}", get(check_invite))
        .route("/api/templates", get(list_templates))
        .route("/api/templates/{id}", get(get_template))
        .route("/api/retros", get(list_retros).post(create_retro))
        .route("/api/retros/{id}", get(get_retro).delete(delete_retro))
        .route("/api/retros/{id}/changes", get(retro_changes))
        .route("/api/retros/{id}/comments", post(create_comment))
        .route("/api/comments/{id}/move", patch(move_comment))
        .route(
            "/api/comments/{id}",
            patch(edit_comment).delete(delete_comment),
        )
        .route("/ws/retros/{id}", get(retro_feed_ws))
        .route("/health", get(health_check))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

async fn register(
    State(state): State<SharedState>,
    Json(form): Json<RegisterForm>,
) -> Result<impl IntoResponse, ApiError> {
    let min_len = state.auth.min_password_len;
    let ttl = state.session_ttl();
    let session = with_db(&state, move |db| {
        let created = auth::register(db, &form, min_len)?;
        auth::open_session(db, created.user, ttl)
    })
    .await?;
    Ok((
        StatusCode::CREATED,
        [(header::SET_COOKIE, auth::session_cookie(&session.token))],
        Json(session),
    ))
}

async fn login(
    State(state): State<SharedState>,
    Json(form): Json<LoginForm>,
) -> Result<impl IntoResponse, ApiError> {
    let ttl = state.session_ttl();
    let session = with_db(&state, move |db| auth::login(db, &form, ttl)).await?;
    tracing::info!(user_id = %session.user.id, "user signed in");
    Ok((
        [(header::SET_COOKIE, auth::session_cookie(&session.token))],
        Json(session),
    ))
}

async fn logout(
    State(state): State<SharedState>,
    current: CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    let token = current.token;
    with_db(&state, move |db| db.delete_session(&token).map_err(BoardError::Database)).await?;
    Ok((
        StatusCode::NO_CONTENT,
        [(header::SET_COOKIE, auth::clear_session_cookie())],
    ))
}

async fn me(
    State(state): State<SharedState>,
    current: CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    let user = current.user;
    let team_id = user.team_id.clone();
    let team = with_db(&state, move |db| db.get_team(&team_id).map_err(BoardError::Database))
        .await?
        .ok_or_else(|| ApiError::Internal("Team missing for user".into()))?;
    Ok(Json(super::models::UserWithTeam { user, team }))
}

async fn check_invite(
    State(state): State<SharedState>,
    Path(token): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let team = with_db(&state, move |db| {
        db.get_team_by_invite_token(&token).map_err(BoardError::Database)
    })
    .await?;
    Ok(Json(serde_json::json!({
        "is_valid": team.is_some(),
        "team": team,
    })))
}

async fn list_templates(
    State(state): State<SharedState>,
    _current: CurrentUser,
    Query(query): Query<TemplateQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let templates = with_db(&state, move |db| {
        db.list_templates(query.search.as_deref()).map_err(BoardError::Database)
    })
    .await?;
    Ok(Json(templates))
}

async fn get_template(
    State(state): State<SharedState>,
    _current: CurrentUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let lookup = id.clone();
    let template = with_db(&state, move |db| db.get_template(&lookup).map_err(BoardError::Database)).await?;
    match template {
        Some(t) => Ok(Json(t)),
        None => Err(ApiError::NotFound(format!("Template {} not found", id))),
    }
}

async fn list_retros(
    State(state): State<SharedState>,
    current: CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    let retros = state.board.list_retros(&current.identity()).await?;
    Ok(Json(retros))
}

async fn create_retro(
    State(state): State<SharedState>,
    current: CurrentUser,
    Json(form): Json<NewRetroForm>,
) -> Result<impl IntoResponse, ApiError> {
    let retro = state.board.create_retro(&current.identity(), form).await?;
    Ok((StatusCode::CREATED, Json(retro)))
}

async fn get_retro(
    State(state): State<SharedState>,
    current: CurrentUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let detail = state.board.retro_detail(&current.identity(), &id).await?;
    Ok(Json(detail))
}

async fn delete_retro(
    State(state): State<SharedState>,
    current: CurrentUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.board.delete_retro(&current.identity(), &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn retro_changes(
    State(state): State<SharedState>,
    current: CurrentUser,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    state.board.check_retro(&current.identity(), &id).await?;
    tracing::info!(retro_id = %id, user_id = %current.user.id, "change stream opened");
    Ok(feed::ndjson_response(state.board.feed().subscribe(&id)))
}

async fn retro_feed_ws(
    State(state): State<SharedState>,
    current: CurrentUser,
    Path(id): Path<String>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    state.board.check_retro(&current.identity(), &id).await?;
    let receiver = state.board.feed().subscribe(&id);
    Ok(feed::ws_upgrade(ws, receiver, state.keepalive))
}

async fn create_comment(
    State(state): State<SharedState>,
    current: CurrentUser,
    Path(retro_id): Path<String>,
    Json(req): Json<CreateCommentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let comment = state
        .board
        .insert_comment(&current.identity(), &retro_id, &req.column_id, &req.comment)
        .await?;
    Ok((StatusCode::CREATED, Json(comment)))
}

async fn move_comment(
    State(state): State<SharedState>,
    current: CurrentUser,
    Path(id): Path<String>,
    Json(req): Json<MoveCommentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let comment = state
        .board
        .relocate_comment(&current.identity(), &id, &req.column_id)
        .await?;
    Ok(Json(comment))
}

async fn edit_comment(
    State(state): State<SharedState>,
    current: CurrentUser,
    Path(id): Path<String>,
    Json(req): Json<EditCommentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let comment = state
        .board
        .edit_comment(&current.identity(), &id, &req.comment)
        .await?;
    Ok(Json(comment))
}

async fn delete_comment(
    State(state): State<SharedState>,
    current: CurrentUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.board.delete_comment(&current.identity(), &id).await?;
    Ok(StatusCode::NO_CONTENT)
}
