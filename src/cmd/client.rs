//! Board client commands — `retro watch`, `retro move`, `retro post`.
//!
//! Each command logs in over HTTP, mounts a `BoardSession` on the retro and
//! drives it from the terminal.

use anyhow::{Context, Result, bail};
use std::sync::Arc;

use retroboard::board::models::CommentChange;
use retroboard::config::ConfigToml;
use retroboard::sync::http::HttpStore;
use retroboard::sync::{BoardEvent, BoardSession, WriteOp};

use super::super::LoginArgs;

async fn open_session(config: &ConfigToml, login: &LoginArgs, retro_id: &str) -> Result<BoardSession> {
    let mut client = config.client.clone();
    if let Some(server) = &login.server {
        client.server_url = server.clone();
    }
    let store = HttpStore::login(&client, &login.email, &login.password)
        .await
        .with_context(|| format!("Failed to log in to {}", client.server_url))?;
    let identity = store.identity();
    let session = BoardSession::mount(Arc::new(store), retro_id, identity)
        .await
        .with_context(|| format!("Failed to open retro {}", retro_id))?;
    Ok(session)
}

fn print_board(session: &BoardSession) {
    println!();
    for column in session.columns() {
        println!("{} [{}]", column.name, column.id);
        for comment in session.comments_in(&column.id) {
            println!("  - {}  ({})", comment.comment, comment.id);
        }
    }
    println!();
}

/// Wait until the write matching `op` settles.
async fn await_write(session: &mut BoardSession, config: &ConfigToml, op: &WriteOp) -> Result<()> {
    let deadline = config.client.request_timeout() * 2;
    let settle = async {
        loop {
            match session.next_event().await {
                BoardEvent::WriteConfirmed { op: done } if &done == op => return Ok(()),
                BoardEvent::WriteFailed { op: failed, error } if &failed == op => {
                    bail!("Failed to {}: {}", failed, error)
                }
                BoardEvent::FeedClosed => bail!("Change feed closed before the write settled"),
                _ => {}
            }
        }
    };
    tokio::time::timeout(deadline, settle)
        .await
        .with_context(|| format!("Timed out waiting to {}", op))?
}

pub async fn cmd_watch(config: &ConfigToml, login: &LoginArgs, retro_id: &str) -> Result<()> {
    let mut session = open_session(config, login, retro_id).await?;
    print_board(&session);
    println!("Watching retro {} (Ctrl+C to stop)", retro_id);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = session.next_event() => match event {
                BoardEvent::Change { change, applied } => {
                    tracing::debug!(?applied, "applied change");
                    match change {
                        CommentChange::Insert { comment } => {
                            println!("+ [{}] {}  ({})", comment.column_id, comment.comment, comment.id);
                        }
                        CommentChange::Update { comment } => {
                            println!("~ [{}] {}  ({})", comment.column_id, comment.comment, comment.id);
                        }
                        CommentChange::Delete { comment_id } => println!("- {}", comment_id),
                    }
                }
                BoardEvent::FeedClosed => {
                    println!("Change feed closed.");
                    break;
                }
                BoardEvent::WriteConfirmed { .. } | BoardEvent::WriteFailed { .. } => {}
            },
        }
    }
    Ok(())
}

pub async fn cmd_move(
    config: &ConfigToml,
    login: &LoginArgs,
    retro_id: &str,
    comment_id: &str,
    column_id: &str,
) -> Result<()> {
    let mut session = open_session(config, login, retro_id).await?;
    if !session.relocate(comment_id, column_id)? {
        println!("Comment {} is already in {}", comment_id, column_id);
        return Ok(());
    }
    let op = WriteOp::Relocate {
        comment_id: comment_id.to_string(),
        column_id: column_id.to_string(),
    };
    await_write(&mut session, config, &op).await?;
    println!("Moved comment {} to {}", comment_id, column_id);
    Ok(())
}

pub async fn cmd_post(
    config: &ConfigToml,
    login: &LoginArgs,
    retro_id: &str,
    column_id: &str,
    text: &str,
) -> Result<()> {
    let mut session = open_session(config, login, retro_id).await?;
    session.add_comment(text, column_id)?;
    let op = WriteOp::Insert {
        column_id: column_id.to_string(),
    };
    await_write(&mut session, config, &op).await?;
    println!("Added comment to {}", column_id);
    Ok(())
}
