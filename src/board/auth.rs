//! Accounts, sessions, and request authentication.

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{HeaderMap, header, request::Parts},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::api::{ApiError, SharedState};
use super::db::{NewUser, RetroDb};
use super::models::{Identity, Role, Team, User, UserWithTeam};
use crate::errors::BoardError;
use crate::validate::{LoginForm, RegisterForm};

pub const SESSION_COOKIE: &str = "retro_session";

/// Returned by login and registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSession {
    pub token: String,
    pub user: User,
    pub team: Team,
}

pub fn new_salt() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Hex-encoded SHA-256 of salt followed by password.
pub fn hash_password(password: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

/// Compares in constant time with respect to the hash contents.
pub fn verify_password(password: &str, salt: &str, expected_hash: &str) -> bool {
    let actual = hash_password(password, salt);
    let (actual, expected) = (actual.as_bytes(), expected_hash.as_bytes());
    if actual.len() != expected.len() {
        return false;
    }
    actual
        .iter()
        .zip(expected)
        .fold(0u8, |diff, (a, b)| diff | (a ^ b))
        == 0
}

pub fn profile_picture_url(first_name: &str, last_name: &str) -> String {
    let name = format!("{} {}", first_name.trim(), last_name.trim());
    let name: Vec<&str> = name.split_whitespace().collect();
    format!("https://ui-avatars.com/api/?name={}", name.join("+"))
}

fn new_team_name() -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("Team-{}", &suffix[..8])
}

/// Register a user. With an invite token the user joins that team as a
/// regular member; without one a fresh team is created with the user as admin.
pub fn register(db: &RetroDb, form: &RegisterForm, min_password_len: usize) -> Result<UserWithTeam, BoardError> {
    form.validate(min_password_len)?;
    let email = form.email.trim();
    if db.email_exists(email).map_err(BoardError::Database)? {
        return Err(BoardError::EmailTaken {
            email: email.to_string(),
        });
    }

    let invite = form
        .invite_token
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty());
    let (team, role) = match invite {
        Some(token) => {
            let team = db
                .get_team_by_invite_token(token)
                .map_err(BoardError::Database)?
                .ok_or(BoardError::InvalidInviteToken)?;
            (team, Role::User)
        }
        None => {
            let team = db.create_team(&new_team_name()).map_err(BoardError::Database)?;
            (team, Role::Admin)
        }
    };

    let salt = new_salt();
    let password_hash = hash_password(&form.password, &salt);
    let first_name = form.first_name.trim();
    let last_name = form.last_name.trim();
    let user = insert_user(
        db,
        &NewUser {
            email,
            first_name,
            last_name,
            role,
            team_id: &team.id,
            profile_picture: &profile_picture_url(first_name, last_name),
            password_hash: &password_hash,
            salt: &salt,
        },
    )?;
    tracing::info!(user_id = %user.id, team_id = %team.id, role = %role, "user registered");
    Ok(UserWithTeam { user, team })
}

/// Insert a user row. A registration that lost a race on the same email
/// surfaces as `EmailTaken` rather than a storage failure.
fn insert_user(db: &RetroDb, new: &NewUser<'_>) -> Result<User, BoardError> {
    db.create_user(new).map_err(|e| {
        if is_unique_violation(&e) {
            BoardError::EmailTaken {
                email: new.email.to_string(),
            }
        } else {
            BoardError::Database(e)
        }
    })
}

fn is_unique_violation(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<rusqlite::Error>(),
        Some(rusqlite::Error::SqliteFailure(e, _))
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

/// Check credentials and open a session.
pub fn login(db: &RetroDb, form: &LoginForm, ttl: Duration) -> Result<AuthSession, BoardError> {
    form.validate()?;
    let invalid = || BoardError::Unauthorized("Invalid email or password".into());
    let creds = db
        .find_credentials(form.email.trim())
        .map_err(BoardError::Database)?
        .ok_or_else(invalid)?;
    if !verify_password(&form.password, &creds.salt, &creds.password_hash) {
        return Err(invalid());
    }
    open_session(db, creds.user, ttl)
}

pub fn open_session(db: &RetroDb, user: User, ttl: Duration) -> Result<AuthSession, BoardError> {
    let team = db
        .get_team(&user.team_id)
        .map_err(BoardError::Database)?
        .ok_or_else(|| BoardError::Other(anyhow::anyhow!("Team {} missing for user {}", user.team_id, user.id)))?;
    let session = db.create_session(&user.id, ttl).map_err(BoardError::Database)?;
    Ok(AuthSession {
        token: session.token,
        user,
        team,
    })
}

/// Session token from `Authorization: Bearer` or the session cookie.
pub fn session_token(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty());
    if let Some(token) = bearer {
        return Some(token.to_string());
    }
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.to_string())
        .filter(|t| !t.is_empty())
}

pub fn session_cookie(token: &str) -> String {
    format!("{}={}; Path=/; HttpOnly; SameSite=Lax", SESSION_COOKIE, token)
}

pub fn clear_session_cookie() -> String {
    format!("{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0", SESSION_COOKIE)
}

async fn resolve_user(state: &SharedState, headers: &HeaderMap) -> Result<Option<(User, String)>, BoardError> {
    let Some(token) = session_token(headers) else {
        return Ok(None);
    };
    let lookup = token.clone();
    let user = state
        .board
        .db()
        .call(move |db| db.session_user(&lookup))
        .await
        .map_err(BoardError::Database)?;
    Ok(user.map(|u| (u, token)))
}

/// The authenticated caller of an API route.
pub struct CurrentUser {
    pub user: User,
    pub token: String,
}

impl CurrentUser {
    pub fn identity(&self) -> Identity {
        self.user.identity()
    }
}

impl FromRequestParts<SharedState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &SharedState) -> Result<Self, Self::Rejection> {
        match resolve_user(state, &parts.headers).await? {
            Some((user, token)) => Ok(CurrentUser { user, token }),
            None => Err(ApiError::Unauthorized("Not signed in".into())),
        }
    }
}

// ── Page route guard ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteDecision {
    Proceed,
    Redirect(&'static str),
}

fn is_auth_page(path: &str) -> bool {
    matches!(path, "/login" | "/register")
}

/// Signed-in users are bounced off the auth pages; anonymous users may only
/// see the auth pages.
pub fn route_decision(path: &str, authenticated: bool) -> RouteDecision {
    match (is_auth_page(path), authenticated) {
        (true, true) => RouteDecision::Redirect("/"),
        (false, false) => RouteDecision::Redirect("/login"),
        _ => RouteDecision::Proceed,
    }
}

pub async fn route_guard(State(state): State<SharedState>, request: Request, next: Next) -> Response {
    let headers = request.headers().clone();
    let authenticated = match resolve_user(&state, &headers).await {
        Ok(user) => user.is_some(),
        Err(e) => {
            tracing::error!("Session lookup failed: {}", e);
            false
        }
    };
    match route_decision(request.uri().path(), authenticated) {
        RouteDecision::Proceed => next.run(request).await,
        RouteDecision::Redirect(to) => {
            tracing::debug!(from = %request.uri().path(), to, "route guard redirect");
            Redirect::to(to).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn form(email: &str, invite_token: Option<String>) -> RegisterForm {
        RegisterForm {
            email: email.into(),
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            password: "analytical".into(),
            confirm_password: "analytical".into(),
            invite_token,
        }
    }

    #[test]
    fn test_hash_is_salted() {
        let a = hash_password("secret", "salt-a");
        let b = hash_password("secret", "salt-b");
        assert_ne!(a, b);
        assert_eq!(a.len(), 64);
        assert!(verify_password("secret", "salt-a", &a));
        assert!(!verify_password("Secret", "salt-a", &a));
    }

    #[test]
    fn test_profile_picture_url() {
        assert_eq!(
            profile_picture_url("Ada", "Lovelace"),
            "https://ui-avatars.com/api/?name=Ada+Lovelace"
        );
        assert_eq!(
            profile_picture_url(" Mary Ann ", "Evans"),
            "https://ui-avatars.com/api/?name=Mary+Ann+Evans"
        );
    }

    #[test]
    fn test_register_without_invite_creates_team_as_admin() {
        let db = RetroDb::new_in_memory().unwrap();
        let created = register(&db, &form("ada@example.com", None), 6).unwrap();
        assert_eq!(created.user.role, Role::Admin);
        assert!(created.team.name.starts_with("Team-"));
        assert!(created.team.invite_token.is_some());
        assert_eq!(created.user.team_id, created.team.id);
    }

    #[test]
    fn test_register_with_invite_joins_team_as_user() {
        let db = RetroDb::new_in_memory().unwrap();
        let first = register(&db, &form("ada@example.com", None), 6).unwrap();
        let token = first.team.invite_token.clone();
        let second = register(&db, &form("bob@example.com", token), 6).unwrap();
        assert_eq!(second.user.role, Role::User);
        assert_eq!(second.team.id, first.team.id);
    }

    #[test]
    fn test_register_rejects_bad_invite_and_duplicate_email() {
        let db = RetroDb::new_in_memory().unwrap();
        let err = register(&db, &form("ada@example.com", Some("bogus".into())), 6).unwrap_err();
        assert_eq!(err.to_string(), "Invalid token");

        register(&db, &form("ada@example.com", None), 6).unwrap();
        let err = register(&db, &form("ADA@example.com", None), 6).unwrap_err();
        assert!(matches!(err, BoardError::EmailTaken { .. }));
    }

    #[test]
    fn test_duplicate_email_insert_maps_to_email_taken() {
        let db = RetroDb::new_in_memory().unwrap();
        let team = db.create_team("Team-race").unwrap();
        let user = |email| NewUser {
            email,
            first_name: "Ada",
            last_name: "Lovelace",
            role: Role::User,
            team_id: &team.id,
            profile_picture: "",
            password_hash: "h",
            salt: "s",
        };
        // The earlier existence check passed for both; the second insert
        // hits the unique index.
        insert_user(&db, &user("ada@example.com")).unwrap();
        let err = insert_user(&db, &user("Ada@Example.com")).unwrap_err();
        assert!(matches!(err, BoardError::EmailTaken { ref email } if email == "Ada@Example.com"));
    }

    #[test]
    fn test_verify_password_rejects_malformed_hash() {
        let hash = hash_password("secret", "salt");
        assert!(!verify_password("secret", "salt", &hash[..63]));
        assert!(!verify_password("secret", "salt", ""));
        let mut flipped = hash.clone().into_bytes();
        flipped[63] = if flipped[63] == b'0' { b'1' } else { b'0' };
        assert!(!verify_password("secret", "salt", std::str::from_utf8(&flipped).unwrap()));
    }

    #[test]
    fn test_login_and_session_lookup() {
        let db = RetroDb::new_in_memory().unwrap();
        let created = register(&db, &form("ada@example.com", None), 6).unwrap();
        let session = login(
            &db,
            &LoginForm {
                email: "ada@example.com".into(),
                password: "analytical".into(),
            },
            Duration::hours(1),
        )
        .unwrap();
        assert_eq!(session.user.id, created.user.id);
        assert_eq!(session.team.id, created.team.id);
        assert_eq!(db.session_user(&session.token).unwrap().unwrap().id, created.user.id);

        let err = login(
            &db,
            &LoginForm {
                email: "ada@example.com".into(),
                password: "wrong-password".into(),
            },
            Duration::hours(1),
        )
        .unwrap_err();
        assert!(matches!(err, BoardError::Unauthorized(_)));
    }

    #[test]
    fn test_session_token_from_bearer_or_cookie() {
        let mut headers = HeaderMap::new();
        assert_eq!(session_token(&headers), None);

        headers.insert(header::COOKIE, HeaderValue::from_static("theme=dark; retro_session=abc123"));
        assert_eq!(session_token(&headers).as_deref(), Some("abc123"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer tok"));
        assert_eq!(session_token(&headers).as_deref(), Some("tok"));
    }

    #[test]
    fn test_route_decision() {
        assert_eq!(route_decision("/login", true), RouteDecision::Redirect("/"));
        assert_eq!(route_decision("/register", true), RouteDecision::Redirect("/"));
        assert_eq!(route_decision("/login", false), RouteDecision::Proceed);
        assert_eq!(route_decision("/", false), RouteDecision::Redirect("/login"));
        assert_eq!(route_decision("/retro/r1", false), RouteDecision::Redirect("/login"));
        assert_eq!(route_decision("/retro/r1", true), RouteDecision::Proceed);
    }
}
