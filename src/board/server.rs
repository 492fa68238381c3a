use std::future::Future;
use std::path::PathBuf;

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::{Path, State},
    middleware,
    response::IntoResponse,
    routing::get,
};
use tower_http::cors::CorsLayer;

use super::api::{self, AppState, SharedState};
use super::auth::{self, CurrentUser};
use super::db::{DbHandle, RetroDb};
use super::feed::{ChangeFeed, Keepalive};
use crate::config::{AuthSection, ConfigToml, FeedSection};

/// Configuration for the retro server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub dev_mode: bool,
    pub feed: FeedSection,
    pub auth: AuthSection,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from_config(&ConfigToml::default())
    }
}

impl ServerConfig {
    pub fn from_config(config: &ConfigToml) -> Self {
        Self {
            host: config.server.host.clone(),
            port: config.server.port,
            db_path: config.server.db_path.clone(),
            dev_mode: config.server.dev_mode,
            feed: config.feed.clone(),
            auth: config.auth.clone(),
        }
    }

    fn keepalive(&self) -> Keepalive {
        Keepalive {
            ping_interval: self.feed.ping_interval(),
            pong_timeout: self.feed.pong_timeout(),
        }
    }

    /// Open the database (creating its directory) and assemble shared state.
    pub fn open_state(&self) -> Result<SharedState> {
        if let Some(parent) = self.db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).context("Failed to create database directory")?;
        }
        let db = RetroDb::new(&self.db_path).context("Failed to initialize retro database")?;
        Ok(AppState::new(
            DbHandle::new(db),
            ChangeFeed::new(self.feed.channel_capacity),
            self.auth.clone(),
            self.keepalive(),
        ))
    }
}

/// Build the full application router: API, change feeds, and guarded page routes.
pub fn build_router(state: SharedState) -> Router {
    let pages = Router::new()
        .route("/", get(dashboard_page))
        .route("/login", get(login_page))
        .route("/register", get(register_page))
        .route("/retro/{id}", get(retro_page))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::route_guard));

    api::api_router().merge(pages).with_state(state)
}

// Page routes answer with a small JSON description of where the client landed;
// the board itself is driven through the API.

async fn dashboard_page(State(state): State<SharedState>, current: CurrentUser) -> impl IntoResponse {
    let retros = state
        .board
        .list_retros(&current.identity())
        .await
        .map(|r| r.len())
        .unwrap_or_default();
    Json(serde_json::json!({
        "page": "dashboard",
        "user": current.user.email,
        "retros": retros,
    }))
}

async fn login_page() -> impl IntoResponse {
    Json(serde_json::json!({"page": "login", "action": "/api/auth/login"}))
}

async fn register_page() -> impl IntoResponse {
    Json(serde_json::json!({"page": "register", "action": "/api/auth/register"}))
}

async fn retro_page(Path(id): Path<String>) -> impl IntoResponse {
    Json(serde_json::json!({
        "page": "retro",
        "retro_id": id,
        "api": format!("/api/retros/{}", id),
        "feed": format!("/ws/retros/{}", id),
    }))
}

/// Serve an already-bound listener until `shutdown` resolves.
pub async fn serve<F>(listener: tokio::net::TcpListener, state: SharedState, dev_mode: bool, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let mut app = build_router(state);
    if dev_mode {
        app = app.layer(CorsLayer::permissive());
    }
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("Server error")
}

/// Start the retro server.
pub async fn start_server(config: ServerConfig) -> Result<()> {
    let state = config.open_state()?;

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    tracing::info!(db = %config.db_path.display(), dev_mode = config.dev_mode, "database ready");
    println!("Retroboard running at http://{}", local_addr);

    serve(listener, state, config.dev_mode, shutdown_signal()).await?;

    println!("Server shut down gracefully.");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to install Ctrl+C handler: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn test_router() -> Router {
        let state = AppState::new(
            DbHandle::new(RetroDb::new_in_memory().unwrap()),
            ChangeFeed::new(16),
            AuthSection::default(),
            Keepalive::default(),
        );
        build_router(state)
    }

    async fn register(app: &Router) -> String {
        let req = Request::builder()
            .method("POST")
            .uri("/api/auth/register")
            .header("content-type", "application/json")
            .body(Body::from(
                serde_json::json!({
                    "email": "ada@example.com",
                    "first_name": "Ada",
                    "last_name": "Lovelace",
                    "password": "password1",
                    "confirm_password": "password1",
                })
                .to_string(),
            ))
            .unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        json["token"].as_str().unwrap().to_string()
    }

    fn page(uri: &str, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(token) = token {
            builder = builder.header("cookie", format!("retro_session={}", token));
        }
        builder.body(Body::empty()).unwrap()
    }

    fn location(resp: &axum::response::Response) -> &str {
        resp.headers()[header::LOCATION].to_str().unwrap()
    }

    #[tokio::test]
    async fn test_health_via_full_router() {
        let app = test_router();
        let resp = app.oneshot(page("/health", None)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_anonymous_pages_redirect_to_login() {
        let app = test_router();
        for uri in ["/", "/retro/abc"] {
            let resp = app.clone().oneshot(page(uri, None)).await.unwrap();
            assert_eq!(resp.status(), StatusCode::SEE_OTHER, "{}", uri);
            assert_eq!(location(&resp), "/login");
        }
        let resp = app.oneshot(page("/login", None)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_signed_in_user_bounced_from_auth_pages() {
        let app = test_router();
        let token = register(&app).await;
        for uri in ["/login", "/register"] {
            let resp = app.clone().oneshot(page(uri, Some(&token))).await.unwrap();
            assert_eq!(resp.status(), StatusCode::SEE_OTHER, "{}", uri);
            assert_eq!(location(&resp), "/");
        }
        let resp = app.clone().oneshot(page("/", Some(&token))).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["page"], "dashboard");
        assert_eq!(json["retros"], 0);
    }

    #[tokio::test]
    async fn test_api_is_not_redirected() {
        let app = test_router();
        let resp = app.oneshot(page("/api/retros", None)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 4173);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.db_path, PathBuf::from(".retro/retro.db"));
        assert!(!config.dev_mode);
    }

    #[test]
    fn test_open_state_creates_db_directory() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = ServerConfig {
            db_path: dir.path().join("nested/retro.db"),
            ..ServerConfig::default()
        };
        config.open_state().unwrap();
        assert!(dir.path().join("nested/retro.db").exists());
    }
}
