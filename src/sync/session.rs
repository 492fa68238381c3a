//! A mounted board view: the comment state machine wired to a store.
//!
//! The session owns its `BoardState` and is the only thing that mutates it.
//! Store writes run as spawned tasks and report back through a channel that
//! `next_event` drains alongside the change feed, so every mutation happens on
//! the caller's task, one event at a time.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::mpsc;

use super::state::{Applied, BoardState};
use super::store::{FeedSubscription, RetroStore};
use crate::board::models::{Comment, CommentChange, Identity, NewComment, TemplateColumn};
use crate::board::policy;
use crate::errors::{BoardError, SyncError};
use crate::validate::validate_comment_body;

/// A store write issued by the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    Insert { column_id: String },
    Relocate { comment_id: String, column_id: String },
    Edit { comment_id: String },
    Delete { comment_id: String },
}

impl std::fmt::Display for WriteOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Insert { column_id } => write!(f, "add comment to {}", column_id),
            Self::Relocate { comment_id, column_id } => {
                write!(f, "move comment {} to {}", comment_id, column_id)
            }
            Self::Edit { comment_id } => write!(f, "edit comment {}", comment_id),
            Self::Delete { comment_id } => write!(f, "delete comment {}", comment_id),
        }
    }
}

struct WriteOutcome {
    op: WriteOp,
    result: Result<(), String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BoardEvent {
    /// A change-feed event was applied.
    Change { change: CommentChange, applied: Applied },
    WriteConfirmed { op: WriteOp },
    /// A write failed. Local state is left as it was; call `resync` to
    /// reconcile with the store.
    WriteFailed { op: WriteOp, error: String },
    /// The change feed ended. The session accepts no further writes.
    FeedClosed,
}

pub struct BoardSession {
    store: Arc<dyn RetroStore>,
    identity: Identity,
    state: BoardState,
    subscription: FeedSubscription,
    outcomes_tx: mpsc::UnboundedSender<WriteOutcome>,
    outcomes_rx: mpsc::UnboundedReceiver<WriteOutcome>,
    /// Spawned writes whose outcome has not been applied yet.
    in_flight: AtomicUsize,
    feed_closed: bool,
}

impl BoardSession {
    /// Subscribe to the retro's change feed, then load its current state.
    ///
    /// Subscribing first means no change between the two steps is lost; an
    /// insert seen both in the fetch and on the feed is absorbed.
    pub async fn mount(
        store: Arc<dyn RetroStore>,
        retro_id: &str,
        identity: Identity,
    ) -> Result<Self, SyncError> {
        let subscription = store.subscribe(retro_id).await?;
        let detail = store.fetch_retro(retro_id).await?;
        tracing::info!(
            retro_id,
            comments = detail.comments.len(),
            columns = detail.template.columns.len(),
            "board mounted"
        );
        let state = BoardState::new(retro_id, detail.template.columns, detail.comments);
        let (outcomes_tx, outcomes_rx) = mpsc::unbounded_channel();
        Ok(Self {
            store,
            identity,
            state,
            subscription,
            outcomes_tx,
            outcomes_rx,
            in_flight: AtomicUsize::new(0),
            feed_closed: false,
        })
    }

    pub fn retro_id(&self) -> &str {
        self.state.retro_id()
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn comments(&self) -> &[Comment] {
        self.state.comments()
    }

    pub fn comments_in<'a>(&'a self, column_id: &'a str) -> impl Iterator<Item = &'a Comment> + 'a {
        self.state.comments_in(column_id)
    }

    pub fn columns(&self) -> &[TemplateColumn] {
        self.state.columns()
    }

    pub fn is_awaiting_echo(&self, comment_id: &str) -> bool {
        self.state.is_awaiting_echo(comment_id)
    }

    pub fn is_synchronized(&self) -> bool {
        self.state.is_synchronized()
    }

    fn ensure_open(&self) -> Result<(), SyncError> {
        if self.feed_closed {
            Err(SyncError::FeedClosed)
        } else {
            Ok(())
        }
    }

    fn known_comment(&self, comment_id: &str) -> Result<&Comment, SyncError> {
        self.state
            .comment(comment_id)
            .ok_or_else(|| SyncError::UnknownComment {
                id: comment_id.to_string(),
            })
    }

    fn spawn_write<F, Fut>(&self, op: WriteOp, write: F)
    where
        F: FnOnce(Arc<dyn RetroStore>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), BoardError>> + Send + 'static,
    {
        let store = self.store.clone();
        let tx = self.outcomes_tx.clone();
        tracing::debug!(op = %op, "issuing store write");
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(async move {
            let result = write(store).await.map_err(|e| e.to_string());
            let _ = tx.send(WriteOutcome { op, result });
        });
    }

    /// Move a comment to another column, optimistically.
    ///
    /// Returns `Ok(false)` without writing when the comment is already in
    /// `column_id`. Otherwise the echo is recorded as pending, the store
    /// update is issued, and the local comment moves before this returns.
    pub fn relocate(&mut self, comment_id: &str, column_id: &str) -> Result<bool, SyncError> {
        self.ensure_open()?;
        if !self.state.check_relocation(comment_id, column_id)? {
            return Ok(false);
        }

        self.state.mark_pending(comment_id, column_id);
        let (id, col) = (comment_id.to_string(), column_id.to_string());
        self.spawn_write(
            WriteOp::Relocate {
                comment_id: id.clone(),
                column_id: col.clone(),
            },
            move |store| async move { store.update_comment_column(&id, &col).await.map(|_| ()) },
        );
        self.state.move_local(comment_id, column_id);
        Ok(true)
    }

    /// Ask the store to add a comment. The board only shows it once the
    /// insert arrives on the feed.
    pub fn add_comment(&self, body: &str, column_id: &str) -> Result<(), SyncError> {
        self.ensure_open()?;
        validate_comment_body(body)?;
        if !self.state.has_column(column_id) {
            return Err(SyncError::UnknownColumn {
                column: column_id.to_string(),
            });
        }
        let new = NewComment {
            comment: body.to_string(),
            column_id: column_id.to_string(),
            retro_id: self.retro_id().to_string(),
            user_id: self.identity.user_id.clone(),
        };
        self.spawn_write(
            WriteOp::Insert {
                column_id: column_id.to_string(),
            },
            move |store| async move { store.insert_comment(new).await.map(|_| ()) },
        );
        Ok(())
    }

    /// Ask the store to change a comment's text. Only its author may.
    pub fn edit_comment(&self, comment_id: &str, body: &str) -> Result<(), SyncError> {
        self.ensure_open()?;
        validate_comment_body(body)?;
        let comment = self.known_comment(comment_id)?;
        if !policy::can_edit_comment(&self.identity, comment) {
            return Err(SyncError::NotPermitted {
                action: "edit",
                comment_id: comment_id.to_string(),
            });
        }
        let (id, body) = (comment_id.to_string(), body.to_string());
        self.spawn_write(
            WriteOp::Edit {
                comment_id: id.clone(),
            },
            move |store| async move { store.update_comment_body(&id, &body).await.map(|_| ()) },
        );
        Ok(())
    }

    /// Ask the store to delete a comment. The local check mirrors the store's
    /// rule (author or team admin); the store has the final say.
    pub fn delete_comment(&self, comment_id: &str) -> Result<(), SyncError> {
        self.ensure_open()?;
        let comment = self.known_comment(comment_id)?;
        if !policy::can_delete_comment(&self.identity, comment) {
            return Err(SyncError::NotPermitted {
                action: "delete",
                comment_id: comment_id.to_string(),
            });
        }
        let id = comment_id.to_string();
        self.spawn_write(
            WriteOp::Delete {
                comment_id: id.clone(),
            },
            move |store| async move { store.delete_comment(&id).await },
        );
        Ok(())
    }

    /// Reload the board from the store, dropping local overrides.
    pub async fn resync(&mut self) -> Result<(), SyncError> {
        let detail = self.store.fetch_retro(self.state.retro_id()).await?;
        tracing::info!(retro_id = %detail.retro.id, comments = detail.comments.len(), "board resynchronized");
        self.state.reset(detail.comments);
        Ok(())
    }

    /// Wait for the next feed event or write outcome and apply it.
    ///
    /// After the feed closes, writes still in flight are reported before
    /// `FeedClosed` is returned again.
    pub async fn next_event(&mut self) -> BoardEvent {
        if self.feed_closed {
            if self.in_flight.load(Ordering::SeqCst) == 0 {
                return BoardEvent::FeedClosed;
            }
            return match self.outcomes_rx.recv().await {
                Some(outcome) => self.apply_outcome(outcome),
                None => BoardEvent::FeedClosed,
            };
        }

        tokio::select! {
            Some(outcome) = self.outcomes_rx.recv() => self.apply_outcome(outcome),
            change = self.subscription.next() => match change {
                Some(change) => {
                    let applied = self.state.apply(change.clone());
                    tracing::debug!(kind = change.kind(), comment_id = change.comment_id(), ?applied, "feed event");
                    BoardEvent::Change { change, applied }
                }
                None => {
                    tracing::warn!(retro_id = %self.state.retro_id(), "change feed closed");
                    self.feed_closed = true;
                    BoardEvent::FeedClosed
                }
            },
        }
    }

    fn apply_outcome(&mut self, outcome: WriteOutcome) -> BoardEvent {
        let WriteOutcome { op, result } = outcome;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        match result {
            Ok(()) => BoardEvent::WriteConfirmed { op },
            Err(error) => {
                if let WriteOp::Relocate { comment_id, column_id } = &op {
                    // No echo will come for a failed write.
                    self.state.clear_pending(comment_id, column_id);
                }
                tracing::warn!(op = %op, "store write failed: {}", error);
                BoardEvent::WriteFailed { op, error }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::models::{Retro, RetroDetail, Role, Team, Template};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicBool;
    use tokio::sync::Notify;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Subscribe,
        Fetch,
        Insert(String, String),
        Move(String, String),
        Edit(String, String),
        Delete(String),
    }

    /// Records calls and serves a fixed board; the test drives the feed.
    struct FakeStore {
        calls: Mutex<Vec<Call>>,
        comments: Mutex<Vec<Comment>>,
        feed_tx: Mutex<Option<mpsc::Sender<CommentChange>>>,
        feed_rx: Mutex<Option<mpsc::Receiver<CommentChange>>>,
        fail_writes: AtomicBool,
        /// When set, column updates wait for `release` before completing.
        hold_moves: AtomicBool,
        release: Notify,
    }

    impl FakeStore {
        fn new(comments: Vec<Comment>) -> Arc<Self> {
            let (tx, rx) = mpsc::channel(32);
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                comments: Mutex::new(comments),
                feed_tx: Mutex::new(Some(tx)),
                feed_rx: Mutex::new(Some(rx)),
                fail_writes: AtomicBool::new(false),
                hold_moves: AtomicBool::new(false),
                release: Notify::new(),
            })
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: Call) -> Result<(), BoardError> {
            self.calls.lock().unwrap().push(call);
            if self.fail_writes.load(Ordering::SeqCst) {
                Err(BoardError::Transport("connection reset".into()))
            } else {
                Ok(())
            }
        }

        async fn push(&self, change: CommentChange) {
            let tx = self.feed_tx.lock().unwrap().clone().unwrap();
            tx.send(change).await.unwrap();
        }

        fn close_feed(&self) {
            self.feed_tx.lock().unwrap().take();
        }
    }

    #[async_trait]
    impl RetroStore for FakeStore {
        async fn fetch_retro(&self, retro_id: &str) -> Result<RetroDetail, BoardError> {
            self.calls.lock().unwrap().push(Call::Fetch);
            Ok(RetroDetail {
                retro: Retro {
                    id: retro_id.into(),
                    name: "Sprint".into(),
                    team_id: "t1".into(),
                    template_id: "tpl".into(),
                    created_at: "now".into(),
                },
                template: Template {
                    id: "tpl".into(),
                    title: "ABC".into(),
                    description: None,
                    cover_url: None,
                    background_color: None,
                    columns: ["A", "B", "C"]
                        .iter()
                        .map(|id| TemplateColumn {
                            id: id.to_string(),
                            name: id.to_string(),
                            description: String::new(),
                            image_url: String::new(),
                        })
                        .collect(),
                    created_at: "now".into(),
                },
                team: Team {
                    id: "t1".into(),
                    name: "Team".into(),
                    invite_token: None,
                    created_at: "now".into(),
                },
                comments: self.comments.lock().unwrap().clone(),
            })
        }

        async fn insert_comment(&self, new: NewComment) -> Result<Comment, BoardError> {
            self.record(Call::Insert(new.column_id.clone(), new.comment.clone()))?;
            Ok(comment("new", &new.column_id, &new.user_id))
        }

        async fn update_comment_column(&self, comment_id: &str, column_id: &str) -> Result<Comment, BoardError> {
            if self.hold_moves.load(Ordering::SeqCst) {
                self.release.notified().await;
            }
            self.record(Call::Move(comment_id.into(), column_id.into()))?;
            Ok(comment(comment_id, column_id, "u1"))
        }

        async fn update_comment_body(&self, comment_id: &str, body: &str) -> Result<Comment, BoardError> {
            self.record(Call::Edit(comment_id.into(), body.into()))?;
            Ok(comment(comment_id, "A", "u1"))
        }

        async fn delete_comment(&self, comment_id: &str) -> Result<(), BoardError> {
            self.record(Call::Delete(comment_id.into()))
        }

        async fn subscribe(&self, _retro_id: &str) -> Result<FeedSubscription, BoardError> {
            self.calls.lock().unwrap().push(Call::Subscribe);
            let rx = self
                .feed_rx
                .lock()
                .unwrap()
                .take()
                .ok_or_else(|| BoardError::Transport("already subscribed".into()))?;
            Ok(FeedSubscription::new(rx))
        }
    }

    fn comment(id: &str, column_id: &str, user_id: &str) -> Comment {
        Comment {
            id: id.into(),
            comment: format!("comment {}", id),
            column_id: column_id.into(),
            retro_id: "r1".into(),
            user_id: user_id.into(),
            created_at: "2024-01-01T00:00:00Z".into(),
        }
    }

    fn identity(user_id: &str, role: Role) -> Identity {
        Identity {
            user_id: user_id.into(),
            team_id: "t1".into(),
            role,
        }
    }

    async fn mount(store: &Arc<FakeStore>, who: Identity) -> BoardSession {
        let dyn_store: Arc<dyn RetroStore> = store.clone();
        BoardSession::mount(dyn_store, "r1", who).await.unwrap()
    }

    async fn next_outcome(session: &mut BoardSession) -> BoardEvent {
        loop {
            match session.next_event().await {
                BoardEvent::Change { .. } => continue,
                other => return other,
            }
        }
    }

    #[tokio::test]
    async fn test_mount_subscribes_before_fetching() {
        let store = FakeStore::new(vec![comment("1", "A", "u1")]);
        let session = mount(&store, identity("u1", Role::User)).await;
        assert_eq!(store.calls(), vec![Call::Subscribe, Call::Fetch]);
        assert_eq!(session.comments().len(), 1);
        assert_eq!(session.columns().len(), 3);
        assert!(session.is_synchronized());
    }

    #[tokio::test]
    async fn test_event_between_subscribe_and_fetch_is_absorbed() {
        let store = FakeStore::new(vec![comment("1", "A", "u1")]);
        // Already queued when the fetch runs, and also part of the fetch.
        store.push(CommentChange::Insert { comment: comment("1", "A", "u1") }).await;
        let mut session = mount(&store, identity("u1", Role::User)).await;
        match session.next_event().await {
            BoardEvent::Change { applied, .. } => assert_eq!(applied, Applied::Duplicate),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(session.comments().len(), 1);
    }

    #[tokio::test]
    async fn test_relocate_scenario() {
        let store = FakeStore::new(vec![comment("1", "A", "u1")]);
        let mut session = mount(&store, identity("u1", Role::User)).await;

        assert!(session.relocate("1", "B").unwrap());
        // Moved locally before any feed event or write outcome.
        assert_eq!(session.comments()[0].column_id, "B");
        assert!(session.is_awaiting_echo("1"));

        assert_eq!(
            next_outcome(&mut session).await,
            BoardEvent::WriteConfirmed {
                op: WriteOp::Relocate {
                    comment_id: "1".into(),
                    column_id: "B".into()
                }
            }
        );
        assert_eq!(store.calls().last(), Some(&Call::Move("1".into(), "B".into())));

        let before = session.comments().to_vec();
        store.push(CommentChange::Update { comment: comment("1", "B", "u1") }).await;
        match session.next_event().await {
            BoardEvent::Change { applied, .. } => assert_eq!(applied, Applied::EchoSuppressed),
            other => panic!("unexpected {:?}", other),
        }
        assert!(!session.is_awaiting_echo("1"));
        assert_eq!(session.comments(), before.as_slice());
    }

    #[tokio::test]
    async fn test_relocate_to_current_column_issues_no_write() {
        let store = FakeStore::new(vec![comment("1", "A", "u1")]);
        let mut session = mount(&store, identity("u1", Role::User)).await;
        assert!(!session.relocate("1", "A").unwrap());
        tokio::task::yield_now().await;
        assert_eq!(store.calls(), vec![Call::Subscribe, Call::Fetch]);
        assert!(session.is_synchronized());
    }

    #[tokio::test]
    async fn test_relocate_rejects_before_writing() {
        let store = FakeStore::new(vec![comment("1", "A", "u1")]);
        let mut session = mount(&store, identity("u1", Role::User)).await;
        assert!(matches!(session.relocate("9", "B"), Err(SyncError::UnknownComment { .. })));
        assert!(matches!(session.relocate("1", "Z"), Err(SyncError::UnknownColumn { .. })));
        tokio::task::yield_now().await;
        assert_eq!(store.calls().len(), 2);
        assert!(session.is_synchronized());
    }

    #[tokio::test]
    async fn test_failed_relocation_clears_echo_without_rollback() {
        let store = FakeStore::new(vec![comment("1", "A", "u1")]);
        store.fail_writes.store(true, Ordering::SeqCst);
        let mut session = mount(&store, identity("u1", Role::User)).await;

        session.relocate("1", "C").unwrap();
        match next_outcome(&mut session).await {
            BoardEvent::WriteFailed { op, error } => {
                assert!(matches!(op, WriteOp::Relocate { .. }));
                assert!(error.contains("connection reset"));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(!session.is_awaiting_echo("1"));
        assert_eq!(session.comments()[0].column_id, "C");

        session.resync().await.unwrap();
        assert_eq!(session.comments()[0].column_id, "A");
    }

    #[tokio::test]
    async fn test_add_comment_waits_for_insert_event() {
        let store = FakeStore::new(vec![]);
        let mut session = mount(&store, identity("u1", Role::User)).await;

        session.add_comment("Celebrate the launch", "C").unwrap();
        assert!(matches!(next_outcome(&mut session).await, BoardEvent::WriteConfirmed { .. }));
        assert!(store.calls().contains(&Call::Insert("C".into(), "Celebrate the launch".into())));
        assert!(session.comments().is_empty());

        store.push(CommentChange::Insert { comment: comment("new", "C", "u1") }).await;
        session.next_event().await;
        assert_eq!(session.comments_in("C").count(), 1);
    }

    #[tokio::test]
    async fn test_add_comment_validates_input() {
        let store = FakeStore::new(vec![]);
        let session = mount(&store, identity("u1", Role::User)).await;
        assert!(matches!(session.add_comment("  ", "A"), Err(SyncError::Validation(_))));
        assert!(matches!(session.add_comment("ok", "Z"), Err(SyncError::UnknownColumn { .. })));
    }

    #[tokio::test]
    async fn test_delete_advisory_check() {
        let store = FakeStore::new(vec![comment("1", "A", "author"), comment("2", "A", "u2")]);
        let member = mount(&store, identity("u2", Role::User)).await;
        assert!(matches!(
            member.delete_comment("1"),
            Err(SyncError::NotPermitted { action: "delete", .. })
        ));
        member.delete_comment("2").unwrap();
        drop(member);

        let store = FakeStore::new(vec![comment("1", "A", "author")]);
        let mut admin = mount(&store, identity("boss", Role::Admin)).await;
        admin.delete_comment("1").unwrap();
        assert!(matches!(next_outcome(&mut admin).await, BoardEvent::WriteConfirmed { .. }));
        // Still present until the delete event arrives.
        assert_eq!(admin.comments().len(), 1);
        store.push(CommentChange::Delete { comment_id: "1".into() }).await;
        admin.next_event().await;
        assert!(admin.comments().is_empty());
    }

    #[tokio::test]
    async fn test_edit_comment_is_author_only() {
        let store = FakeStore::new(vec![comment("1", "A", "u1")]);
        let mut author = mount(&store, identity("u1", Role::User)).await;
        author.edit_comment("1", "Sharper wording").unwrap();
        assert!(matches!(next_outcome(&mut author).await, BoardEvent::WriteConfirmed { .. }));
        assert!(store.calls().contains(&Call::Edit("1".into(), "Sharper wording".into())));

        let store = FakeStore::new(vec![comment("1", "A", "u1")]);
        let admin = mount(&store, identity("boss", Role::Admin)).await;
        assert!(matches!(
            admin.edit_comment("1", "x"),
            Err(SyncError::NotPermitted { action: "edit", .. })
        ));
    }

    #[tokio::test]
    async fn test_feed_close_stops_session() {
        let store = FakeStore::new(vec![comment("1", "A", "u1")]);
        let mut session = mount(&store, identity("u1", Role::User)).await;
        store.close_feed();
        assert_eq!(session.next_event().await, BoardEvent::FeedClosed);
        assert_eq!(session.next_event().await, BoardEvent::FeedClosed);
        assert!(matches!(session.relocate("1", "B"), Err(SyncError::FeedClosed)));
    }

    #[tokio::test]
    async fn test_write_outcome_reported_after_feed_close() {
        let store = FakeStore::new(vec![comment("1", "A", "u1")]);
        store.fail_writes.store(true, Ordering::SeqCst);
        store.hold_moves.store(true, Ordering::SeqCst);
        let mut session = mount(&store, identity("u1", Role::User)).await;

        session.relocate("1", "B").unwrap();
        store.close_feed();
        assert_eq!(session.next_event().await, BoardEvent::FeedClosed);

        store.release.notify_one();
        match session.next_event().await {
            BoardEvent::WriteFailed { op, error } => {
                assert_eq!(
                    op,
                    WriteOp::Relocate {
                        comment_id: "1".into(),
                        column_id: "B".into()
                    }
                );
                assert!(error.contains("connection reset"));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(!session.is_awaiting_echo("1"));
        assert_eq!(session.next_event().await, BoardEvent::FeedClosed);
    }

    #[tokio::test]
    async fn test_feed_lag_closes_local_session() {
        use crate::board::db::{DbHandle, NewUser, RetroDb};
        use crate::board::feed::ChangeFeed;
        use crate::board::policy::BoardService;
        use crate::sync::local::LocalStore;

        let db = RetroDb::new_in_memory().unwrap();
        let team = db.create_team("Team-lag").unwrap();
        let user = db
            .create_user(&NewUser {
                email: "ada@example.com",
                first_name: "Ada",
                last_name: "Lovelace",
                role: Role::Admin,
                team_id: &team.id,
                profile_picture: "",
                password_hash: "h",
                salt: "s",
            })
            .unwrap();
        let retro = db.create_retro(&team.id, "mad-sad-glad", "Busy week").unwrap();
        let feed = ChangeFeed::new(2);
        let service = BoardService::new(DbHandle::new(db), feed.clone());
        let store: Arc<dyn RetroStore> = Arc::new(LocalStore::new(service, user.identity()));
        let mut session = BoardSession::mount(store, &retro.id, user.identity()).await.unwrap();

        // Another retro floods the shared bus before the forwarder catches up.
        for i in 0..8 {
            feed.publish("elsewhere", CommentChange::Delete { comment_id: format!("x{}", i) });
        }
        assert_eq!(session.next_event().await, BoardEvent::FeedClosed);
        assert!(matches!(session.add_comment("Too late", "glad"), Err(SyncError::FeedClosed)));
    }

    #[tokio::test]
    async fn test_unknown_feed_events_are_ignored() {
        let store = FakeStore::new(vec![comment("1", "A", "u1")]);
        let mut session = mount(&store, identity("u1", Role::User)).await;
        store.push(CommentChange::Delete { comment_id: "ghost".into() }).await;
        store.push(CommentChange::Update { comment: comment("ghost", "B", "u1") }).await;
        for _ in 0..2 {
            match session.next_event().await {
                BoardEvent::Change { applied, .. } => assert_eq!(applied, Applied::Ignored),
                other => panic!("unexpected {:?}", other),
            }
        }
        assert_eq!(session.comments().len(), 1);
    }

    #[tokio::test]
    async fn test_session_over_local_store() {
        use crate::board::db::{DbHandle, NewUser, RetroDb};
        use crate::board::feed::ChangeFeed;
        use crate::board::policy::BoardService;
        use crate::sync::local::LocalStore;

        let db = RetroDb::new_in_memory().unwrap();
        let team = db.create_team("Team-l").unwrap();
        let user = db
            .create_user(&NewUser {
                email: "ada@example.com",
                first_name: "Ada",
                last_name: "Lovelace",
                role: Role::Admin,
                team_id: &team.id,
                profile_picture: "",
                password_hash: "h",
                salt: "s",
            })
            .unwrap();
        let retro = db.create_retro(&team.id, "went-well-to-improve", "Q1").unwrap();
        let service = BoardService::new(DbHandle::new(db), ChangeFeed::new(32));
        let store: Arc<dyn RetroStore> = Arc::new(LocalStore::new(service, user.identity()));

        let mut session = BoardSession::mount(store, &retro.id, user.identity()).await.unwrap();
        session.add_comment("Fewer meetings", "to-improve").unwrap();
        let mut comment_id = None;
        while comment_id.is_none() {
            if let BoardEvent::Change { change: CommentChange::Insert { comment }, .. } = session.next_event().await {
                comment_id = Some(comment.id);
            }
        }
        let comment_id = comment_id.unwrap();

        session.relocate(&comment_id, "action-items").unwrap();
        let mut suppressed = false;
        let mut confirmed = false;
        while !(suppressed && confirmed) {
            match session.next_event().await {
                BoardEvent::Change { applied: Applied::EchoSuppressed, .. } => suppressed = true,
                BoardEvent::WriteConfirmed { op: WriteOp::Relocate { .. } } => confirmed = true,
                BoardEvent::WriteFailed { op, error } => panic!("{} failed: {}", op, error),
                _ => {}
            }
        }
        assert_eq!(session.comments_in("action-items").count(), 1);

        session.delete_comment(&comment_id).unwrap();
        loop {
            if let BoardEvent::Change { applied: Applied::Deleted, .. } = session.next_event().await {
                break;
            }
        }
        assert!(session.comments().is_empty());
    }
}
