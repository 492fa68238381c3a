use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use super::models::*;

/// Async-safe handle to the retro database.
///
/// Wraps `RetroDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`, so synchronous SQLite I/O never
/// ties up async worker threads.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<RetroDb>>,
}

impl DbHandle {
    pub fn new(db: RetroDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&RetroDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db
                .lock()
                .map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }
}

/// Stored login material for a user.
pub struct Credentials {
    pub user: User,
    pub password_hash: String,
    pub salt: String,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub token: String,
    pub user_id: String,
    pub expires_at: String,
}

pub struct NewUser<'a> {
    pub email: &'a str,
    pub first_name: &'a str,
    pub last_name: &'a str,
    pub role: Role,
    pub team_id: &'a str,
    pub profile_picture: &'a str,
    pub password_hash: &'a str,
    pub salt: &'a str,
}

pub struct RetroDb {
    conn: Connection,
}

fn now() -> String {
    Utc::now().to_rfc3339()
}

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Escape `LIKE` wildcards so user text matches literally (with `ESCAPE '\'`).
fn escape_like(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

impl RetroDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        self.run_migrations().context("Failed to run migrations")?;
        self.seed_templates().context("Failed to seed templates")?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS teams (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    invite_token TEXT UNIQUE,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS users (
                    id TEXT PRIMARY KEY,
                    email TEXT NOT NULL UNIQUE COLLATE NOCASE,
                    first_name TEXT NOT NULL,
                    last_name TEXT NOT NULL,
                    role TEXT NOT NULL DEFAULT 'user',
                    team_id TEXT NOT NULL REFERENCES teams(id),
                    profile_picture TEXT NOT NULL DEFAULT '',
                    password_hash TEXT NOT NULL,
                    salt TEXT NOT NULL,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS sessions (
                    token TEXT PRIMARY KEY,
                    user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    expires_at TEXT NOT NULL,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS retro_templates (
                    id TEXT PRIMARY KEY,
                    title TEXT NOT NULL,
                    description TEXT,
                    cover_url TEXT,
                    background_color TEXT,
                    template_columns TEXT NOT NULL DEFAULT '[]',
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS retros (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL DEFAULT '',
                    team_id TEXT NOT NULL REFERENCES teams(id) ON DELETE CASCADE,
                    template_id TEXT NOT NULL REFERENCES retro_templates(id),
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS retro_comments (
                    id TEXT PRIMARY KEY,
                    comment TEXT NOT NULL DEFAULT '',
                    column_id TEXT NOT NULL,
                    retro_id TEXT NOT NULL REFERENCES retros(id) ON DELETE CASCADE,
                    user_id TEXT NOT NULL REFERENCES users(id),
                    created_at TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_users_team ON users(team_id);
                CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id);
                CREATE INDEX IF NOT EXISTS idx_retros_team ON retros(team_id);
                CREATE INDEX IF NOT EXISTS idx_comments_retro ON retro_comments(retro_id);
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }

    /// Insert the built-in templates. Safe to re-run.
    fn seed_templates(&self) -> Result<()> {
        for seed in super::templates::builtin_templates() {
            let columns = serde_json::to_string(&seed.columns)
                .context("Failed to serialize template columns")?;
            self.conn
                .execute(
                    "INSERT OR IGNORE INTO retro_templates
                        (id, title, description, cover_url, background_color, template_columns, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        seed.id,
                        seed.title,
                        seed.description,
                        seed.cover_url,
                        seed.background_color,
                        columns,
                        now()
                    ],
                )
                .with_context(|| format!("Failed to seed template {}", seed.id))?;
        }
        Ok(())
    }

    // ── Teams ─────────────────────────────────────────────────────────

    pub fn create_team(&self, name: &str) -> Result<Team> {
        let id = new_id();
        let invite_token = uuid::Uuid::new_v4().simple().to_string();
        self.conn
            .execute(
                "INSERT INTO teams (id, name, invite_token, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![id, name, invite_token, now()],
            )
            .context("Failed to insert team")?;
        self.get_team(&id)?.context("Team not found after insert")
    }

    pub fn get_team(&self, id: &str) -> Result<Option<Team>> {
        self.conn
            .query_row(
                "SELECT id, name, invite_token, created_at FROM teams WHERE id = ?1",
                params![id],
                team_from_row,
            )
            .optional()
            .context("Failed to query team")
    }

    pub fn get_team_by_invite_token(&self, token: &str) -> Result<Option<Team>> {
        self.conn
            .query_row(
                "SELECT id, name, invite_token, created_at FROM teams WHERE invite_token = ?1",
                params![token],
                team_from_row,
            )
            .optional()
            .context("Failed to query team by invite token")
    }

    // ── Users & sessions ──────────────────────────────────────────────

    pub fn create_user(&self, new: &NewUser<'_>) -> Result<User> {
        let id = new_id();
        self.conn
            .execute(
                "INSERT INTO users
                    (id, email, first_name, last_name, role, team_id, profile_picture, password_hash, salt, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    id,
                    new.email,
                    new.first_name,
                    new.last_name,
                    new.role.as_str(),
                    new.team_id,
                    new.profile_picture,
                    new.password_hash,
                    new.salt,
                    now()
                ],
            )
            .context("Failed to insert user")?;
        self.get_user(&id)?.context("User not found after insert")
    }

    pub fn email_exists(&self, email: &str) -> Result<bool> {
        let count: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM users WHERE email = ?1",
                params![email],
                |row| row.get(0),
            )
            .context("Failed to check email")?;
        Ok(count > 0)
    }

    pub fn get_user(&self, id: &str) -> Result<Option<User>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![id],
                UserRow::from_row,
            )
            .optional()
            .context("Failed to query user")?;
        row.map(UserRow::into_user).transpose()
    }

    pub fn find_credentials(&self, email: &str) -> Result<Option<Credentials>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {USER_COLUMNS}, password_hash, salt FROM users WHERE email = ?1"),
                params![email],
                |row| {
                    let user = UserRow::from_row(row)?;
                    let hash: String = row.get(8)?;
                    let salt: String = row.get(9)?;
                    Ok((user, hash, salt))
                },
            )
            .optional()
            .context("Failed to query credentials")?;
        match row {
            Some((user, password_hash, salt)) => Ok(Some(Credentials {
                user: user.into_user()?,
                password_hash,
                salt,
            })),
            None => Ok(None),
        }
    }

    pub fn create_session(&self, user_id: &str, ttl: Duration) -> Result<Session> {
        let token = uuid::Uuid::new_v4().simple().to_string();
        let expires_at = (Utc::now() + ttl).to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO sessions (token, user_id, expires_at, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![token, user_id, expires_at, now()],
            )
            .context("Failed to insert session")?;
        Ok(Session {
            token,
            user_id: user_id.to_string(),
            expires_at,
        })
    }

    /// Resolve a session token to its user. Expired sessions are deleted and
    /// reported as absent.
    pub fn session_user(&self, token: &str) -> Result<Option<User>> {
        let session = self
            .conn
            .query_row(
                "SELECT user_id, expires_at FROM sessions WHERE token = ?1",
                params![token],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()
            .context("Failed to query session")?;
        let Some((user_id, expires_at)) = session else {
            return Ok(None);
        };
        let expires_at = DateTime::parse_from_rfc3339(&expires_at)
            .context("Invalid session expiry")?
            .with_timezone(&Utc);
        if expires_at <= Utc::now() {
            self.delete_session(token)?;
            return Ok(None);
        }
        self.get_user(&user_id)
    }

    pub fn delete_session(&self, token: &str) -> Result<bool> {
        let affected = self
            .conn
            .execute("DELETE FROM sessions WHERE token = ?1", params![token])
            .context("Failed to delete session")?;
        Ok(affected > 0)
    }

    // ── Templates ─────────────────────────────────────────────────────

    /// List templates, optionally filtered by a case-insensitive title substring.
    pub fn list_templates(&self, search: Option<&str>) -> Result<Vec<Template>> {
        let pattern = format!("%{}%", escape_like(search.unwrap_or_default()));
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {TEMPLATE_COLUMNS} FROM retro_templates WHERE title LIKE ?1 ESCAPE '\\' ORDER BY title"
            ))
            .context("Failed to prepare list_templates")?;
        let rows = stmt
            .query_map(params![pattern], TemplateRow::from_row)
            .context("Failed to query templates")?;
        let mut templates = Vec::new();
        for row in rows {
            let r = row.context("Failed to read template row")?;
            templates.push(r.into_template()?);
        }
        Ok(templates)
    }

    pub fn get_template(&self, id: &str) -> Result<Option<Template>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {TEMPLATE_COLUMNS} FROM retro_templates WHERE id = ?1"),
                params![id],
                TemplateRow::from_row,
            )
            .optional()
            .context("Failed to query template")?;
        row.map(TemplateRow::into_template).transpose()
    }

    // ── Retros ────────────────────────────────────────────────────────

    pub fn create_retro(&self, team_id: &str, template_id: &str, name: &str) -> Result<Retro> {
        let id = new_id();
        self.conn
            .execute(
                "INSERT INTO retros (id, name, team_id, template_id, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id, name, team_id, template_id, now()],
            )
            .context("Failed to insert retro")?;
        self.get_retro(&id)?.context("Retro not found after insert")
    }

    pub fn get_retro(&self, id: &str) -> Result<Option<Retro>> {
        self.conn
            .query_row(
                "SELECT id, name, team_id, template_id, created_at FROM retros WHERE id = ?1",
                params![id],
                retro_from_row,
            )
            .optional()
            .context("Failed to query retro")
    }

    pub fn list_retros(&self, team_id: &str) -> Result<Vec<RetroSummary>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT r.id, r.name, r.team_id, r.template_id, r.created_at, t.title, t.cover_url
                 FROM retros r JOIN retro_templates t ON t.id = r.template_id
                 WHERE r.team_id = ?1 ORDER BY r.created_at DESC, r.rowid DESC",
            )
            .context("Failed to prepare list_retros")?;
        let rows = stmt
            .query_map(params![team_id], |row| {
                Ok(RetroSummary {
                    retro: retro_from_row(row)?,
                    template_title: row.get(5)?,
                    cover_url: row.get(6)?,
                })
            })
            .context("Failed to query retros")?;
        let mut retros = Vec::new();
        for row in rows {
            retros.push(row.context("Failed to read retro row")?);
        }
        Ok(retros)
    }

    /// Load a retro with its template, team, and comments.
    pub fn get_retro_detail(&self, id: &str) -> Result<Option<RetroDetail>> {
        let Some(retro) = self.get_retro(id)? else {
            return Ok(None);
        };
        let template = self
            .get_template(&retro.template_id)?
            .with_context(|| format!("Template {} missing for retro {}", retro.template_id, id))?;
        let team = self
            .get_team(&retro.team_id)?
            .with_context(|| format!("Team {} missing for retro {}", retro.team_id, id))?;
        let comments = self.list_comments(id)?;
        Ok(Some(RetroDetail {
            retro,
            template,
            team,
            comments,
        }))
    }

    pub fn delete_retro(&self, id: &str) -> Result<bool> {
        let affected = self
            .conn
            .execute("DELETE FROM retros WHERE id = ?1", params![id])
            .context("Failed to delete retro")?;
        Ok(affected > 0)
    }

    // ── Comments ──────────────────────────────────────────────────────

    pub fn create_comment(&self, new: &NewComment) -> Result<Comment> {
        let id = new_id();
        self.conn
            .execute(
                "INSERT INTO retro_comments (id, comment, column_id, retro_id, user_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    id,
                    new.comment,
                    new.column_id,
                    new.retro_id,
                    new.user_id,
                    now()
                ],
            )
            .context("Failed to insert comment")?;
        self.get_comment(&id)?
            .context("Comment not found after insert")
    }

    pub fn get_comment(&self, id: &str) -> Result<Option<Comment>> {
        self.conn
            .query_row(
                &format!("SELECT {COMMENT_COLUMNS} FROM retro_comments WHERE id = ?1"),
                params![id],
                comment_from_row,
            )
            .optional()
            .context("Failed to query comment")
    }

    pub fn list_comments(&self, retro_id: &str) -> Result<Vec<Comment>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {COMMENT_COLUMNS} FROM retro_comments WHERE retro_id = ?1 ORDER BY created_at, rowid"
            ))
            .context("Failed to prepare list_comments")?;
        let rows = stmt
            .query_map(params![retro_id], comment_from_row)
            .context("Failed to query comments")?;
        let mut comments = Vec::new();
        for row in rows {
            comments.push(row.context("Failed to read comment row")?);
        }
        Ok(comments)
    }

    /// Move a comment to another column. Returns `None` if the comment does not exist.
    pub fn update_comment_column(&self, id: &str, column_id: &str) -> Result<Option<Comment>> {
        let affected = self
            .conn
            .execute(
                "UPDATE retro_comments SET column_id = ?1 WHERE id = ?2",
                params![column_id, id],
            )
            .context("Failed to move comment")?;
        if affected == 0 {
            return Ok(None);
        }
        self.get_comment(id)
    }

    pub fn update_comment_body(&self, id: &str, body: &str) -> Result<Option<Comment>> {
        let affected = self
            .conn
            .execute(
                "UPDATE retro_comments SET comment = ?1 WHERE id = ?2",
                params![body, id],
            )
            .context("Failed to update comment")?;
        if affected == 0 {
            return Ok(None);
        }
        self.get_comment(id)
    }

    pub fn delete_comment(&self, id: &str) -> Result<bool> {
        let affected = self
            .conn
            .execute("DELETE FROM retro_comments WHERE id = ?1", params![id])
            .context("Failed to delete comment")?;
        Ok(affected > 0)
    }
}

// ── Row mapping ───────────────────────────────────────────────────────

const USER_COLUMNS: &str =
    "id, email, first_name, last_name, role, team_id, profile_picture, created_at";
const TEMPLATE_COLUMNS: &str =
    "id, title, description, cover_url, background_color, template_columns, created_at";
const COMMENT_COLUMNS: &str = "id, comment, column_id, retro_id, user_id, created_at";

fn team_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Team> {
    Ok(Team {
        id: row.get(0)?,
        name: row.get(1)?,
        invite_token: row.get(2)?,
        created_at: row.get(3)?,
    })
}

fn retro_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Retro> {
    Ok(Retro {
        id: row.get(0)?,
        name: row.get(1)?,
        team_id: row.get(2)?,
        template_id: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn comment_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Comment> {
    Ok(Comment {
        id: row.get(0)?,
        comment: row.get(1)?,
        column_id: row.get(2)?,
        retro_id: row.get(3)?,
        user_id: row.get(4)?,
        created_at: row.get(5)?,
    })
}

/// Raw user row; `role` is parsed after the query so a bad value surfaces
/// as an error instead of a panic inside the row mapper.
struct UserRow {
    id: String,
    email: String,
    first_name: String,
    last_name: String,
    role: String,
    team_id: String,
    profile_picture: String,
    created_at: String,
}

impl UserRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            email: row.get(1)?,
            first_name: row.get(2)?,
            last_name: row.get(3)?,
            role: row.get(4)?,
            team_id: row.get(5)?,
            profile_picture: row.get(6)?,
            created_at: row.get(7)?,
        })
    }

    fn into_user(self) -> Result<User> {
        let role = self.role.parse::<Role>().map_err(|e| anyhow::anyhow!(e))?;
        Ok(User {
            id: self.id,
            email: self.email,
            first_name: self.first_name,
            last_name: self.last_name,
            role,
            team_id: self.team_id,
            profile_picture: self.profile_picture,
            created_at: self.created_at,
        })
    }
}

struct TemplateRow {
    id: String,
    title: String,
    description: Option<String>,
    cover_url: Option<String>,
    background_color: Option<String>,
    template_columns: String,
    created_at: String,
}

impl TemplateRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            title: row.get(1)?,
            description: row.get(2)?,
            cover_url: row.get(3)?,
            background_color: row.get(4)?,
            template_columns: row.get(5)?,
            created_at: row.get(6)?,
        })
    }

    fn into_template(self) -> Result<Template> {
        let columns: Vec<TemplateColumn> = serde_json::from_str(&self.template_columns)
            .with_context(|| format!("Invalid columns JSON for template {}", self.id))?;
        Ok(Template {
            id: self.id,
            title: self.title,
            description: self.description,
            cover_url: self.cover_url,
            background_color: self.background_color,
            columns,
            created_at: self.created_at,
        })
    }
}
