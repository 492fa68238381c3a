//! `RetroStore` over the retro server's REST API.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio_util::io::StreamReader;

use super::store::{FeedSubscription, RetroStore};
use crate::board::auth::AuthSession;
use crate::board::models::{Comment, CommentChange, Identity, NewComment, RetroDetail, Template, User};
use crate::config::ClientSection;
use crate::errors::BoardError;

const SUBSCRIPTION_BUFFER: usize = 64;

fn transport(e: reqwest::Error) -> BoardError {
    BoardError::Transport(e.to_string())
}

/// Authenticated client for one user session.
pub struct HttpStore {
    client: Client,
    base_url: String,
    timeout: Duration,
    token: String,
    user: User,
}

impl HttpStore {
    /// Sign in and keep the session token for every later request.
    pub async fn login(config: &ClientSection, email: &str, password: &str) -> Result<Self, BoardError> {
        let timeout = config.request_timeout();
        // The change stream is long-lived, so only connecting is bounded
        // client-wide; ordinary requests set their own timeout.
        let client = Client::builder()
            .connect_timeout(timeout)
            .build()
            .map_err(transport)?;
        let base_url = config.server_url.trim_end_matches('/').to_string();

        let resp = client
            .post(format!("{}/api/auth/login", base_url))
            .timeout(timeout)
            .json(&serde_json::json!({"email": email, "password": password}))
            .send()
            .await
            .map_err(transport)?;
        let session: AuthSession = decode(resp, || BoardError::Unauthorized("Login failed".into())).await?;
        tracing::info!(user_id = %session.user.id, server = %base_url, "signed in");

        Ok(Self {
            client,
            base_url,
            timeout,
            token: session.token,
            user: session.user,
        })
    }

    pub fn identity(&self) -> Identity {
        self.user.identity()
    }

    pub fn user(&self) -> &User {
        &self.user
    }

    fn request(&self, method: reqwest::Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url, path))
            .bearer_auth(&self.token)
    }

    /// Templates matching an optional title search.
    pub async fn templates(&self, search: Option<&str>) -> Result<Vec<Template>, BoardError> {
        let mut req = self.request(reqwest::Method::GET, "/api/templates").timeout(self.timeout);
        if let Some(search) = search {
            req = req.query(&[("search", search)]);
        }
        let resp = req.send().await.map_err(transport)?;
        decode(resp, || BoardError::Transport("templates endpoint missing".into())).await
    }

    pub async fn logout(self) -> Result<(), BoardError> {
        let resp = self
            .request(reqwest::Method::POST, "/api/auth/logout")
            .timeout(self.timeout)
            .send()
            .await
            .map_err(transport)?;
        check(resp, || BoardError::Transport("logout endpoint missing".into())).await?;
        Ok(())
    }
}

/// Map non-success statuses onto store errors.
async fn check<F>(resp: Response, not_found: F) -> Result<Response, BoardError>
where
    F: FnOnce() -> BoardError,
{
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let message = resp
        .json::<serde_json::Value>()
        .await
        .ok()
        .and_then(|v| v["error"].as_str().map(str::to_string))
        .unwrap_or_else(|| status.to_string());
    Err(match status {
        StatusCode::NOT_FOUND => not_found(),
        StatusCode::UNAUTHORIZED => BoardError::Unauthorized(message),
        StatusCode::FORBIDDEN => BoardError::Forbidden(message),
        _ => BoardError::Transport(format!("{}: {}", status, message)),
    })
}

async fn decode<T, F>(resp: Response, not_found: F) -> Result<T, BoardError>
where
    T: DeserializeOwned,
    F: FnOnce() -> BoardError,
{
    check(resp, not_found).await?.json::<T>().await.map_err(transport)
}

#[async_trait]
impl RetroStore for HttpStore {
    async fn fetch_retro(&self, retro_id: &str) -> Result<RetroDetail, BoardError> {
        let resp = self
            .request(reqwest::Method::GET, &format!("/api/retros/{}", retro_id))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(transport)?;
        decode(resp, || BoardError::RetroNotFound { id: retro_id.to_string() }).await
    }

    async fn insert_comment(&self, new: NewComment) -> Result<Comment, BoardError> {
        let resp = self
            .request(reqwest::Method::POST, &format!("/api/retros/{}/comments", new.retro_id))
            .timeout(self.timeout)
            .json(&serde_json::json!({"comment": new.comment, "column_id": new.column_id}))
            .send()
            .await
            .map_err(transport)?;
        decode(resp, || BoardError::RetroNotFound { id: new.retro_id.clone() }).await
    }

    async fn update_comment_column(&self, comment_id: &str, column_id: &str) -> Result<Comment, BoardError> {
        let resp = self
            .request(reqwest::Method::PATCH, &format!("/api/comments/{}/move", comment_id))
            .timeout(self.timeout)
            .json(&serde_json::json!({"column_id": column_id}))
            .send()
            .await
            .map_err(transport)?;
        decode(resp, || BoardError::CommentNotFound { id: comment_id.to_string() }).await
    }

    async fn update_comment_body(&self, comment_id: &str, body: &str) -> Result<Comment, BoardError> {
        let resp = self
            .request(reqwest::Method::PATCH, &format!("/api/comments/{}", comment_id))
            .timeout(self.timeout)
            .json(&serde_json::json!({"comment": body}))
            .send()
            .await
            .map_err(transport)?;
        decode(resp, || BoardError::CommentNotFound { id: comment_id.to_string() }).await
    }

    async fn delete_comment(&self, comment_id: &str) -> Result<(), BoardError> {
        let resp = self
            .request(reqwest::Method::DELETE, &format!("/api/comments/{}", comment_id))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(transport)?;
        check(resp, || BoardError::CommentNotFound { id: comment_id.to_string() }).await?;
        Ok(())
    }

    async fn subscribe(&self, retro_id: &str) -> Result<FeedSubscription, BoardError> {
        let resp = self
            .request(reqwest::Method::GET, &format!("/api/retros/{}/changes", retro_id))
            .send()
            .await
            .map_err(transport)?;
        let resp = check(resp, || BoardError::RetroNotFound { id: retro_id.to_string() }).await?;

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let retro_id = retro_id.to_string();
        let body = StreamReader::new(resp.bytes_stream().map(|chunk| chunk.map_err(std::io::Error::other)));
        let forwarder = tokio::spawn(async move {
            forward_changes(body, tx).await;
            tracing::info!(retro_id = %retro_id, "change stream ended");
        });
        Ok(FeedSubscription::with_forwarder(rx, forwarder))
    }
}

/// Read newline-delimited `CommentChange` JSON and forward each change until
/// the stream ends, fails, or the receiver goes away. Malformed lines are
/// logged and skipped.
async fn forward_changes<R>(reader: R, tx: mpsc::Sender<CommentChange>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!("change stream failed: {}", e);
                break;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<CommentChange>(line) {
            Ok(change) => {
                if tx.send(change).await.is_err() {
                    break;
                }
            }
            Err(e) => tracing::warn!("Skipping malformed change line: {}", e),
        }
    }
}
