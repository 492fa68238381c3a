//! Retro board back-end: accounts, teams, templates, retros, comments, and
//! the live comment change feed.
//!
//! ## Module Map
//!
//! ```text
//! ┌──────────┐   HTTP   ┌──────────────────────────────────────────────────┐
//! │  Client  │ ───────> │  server.rs  (axum Router, ServerConfig)          │
//! │ (retro   │ <─────── │    ├─ auth.rs   (sessions, route guard)          │
//! │  CLI)    │ NDJSON / │    └─ api.rs    (route handlers, AppState)       │
//! └──────────┘ WebSocket│         │                                        │
//!                       │         v                                        │
//!                       │  policy.rs  (BoardService, access checks)        │
//!                       │         │                     │                  │
//!                       │         v                     v                  │
//!                       │  db.rs (RetroDb, DbHandle)   feed.rs (ChangeFeed)│
//!                       └──────────────────────────────────────────────────┘
//! ```
//!
//! | Module      | Responsibility                                          |
//! |-------------|---------------------------------------------------------|
//! | `models`    | Shared types: `Comment`, `Retro`, `Template`, `Identity` |
//! | `templates` | Built-in templates seeded into every database           |
//! | `db`        | SQLite access via `DbHandle` (`Arc<Mutex<_>>` + blocking pool) |
//! | `feed`      | Per-retro change broadcast, WebSocket and NDJSON transports |
//! | `policy`    | Team scoping and author/admin rules for every write     |
//!
//! ## Typical Request Flow (move a comment)
//!
//! 1. `PATCH /api/comments/{id}/move` → `api::move_comment()`
//! 2. `BoardService::relocate_comment()` checks team membership and that the
//!    target column belongs to the retro's template, then updates the row.
//! 3. The updated row is published as `CommentChange::Update` on the feed;
//!    every subscriber of that retro (including the writer) receives it.

pub mod api;
pub mod auth;
pub mod db;
pub mod feed;
pub mod models;
pub mod policy;
pub mod server;
pub mod templates;
