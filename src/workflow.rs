//! The stateful, resumable, token-addressed workflow engine. The hardest
//! subsystem: persists per-token session state keyed by an opaque token,
//! advances a cursor over a frozen message-id list, applies actions, and
//! enforces TTL on load (never on a background reaper).
//!
//! Grounded on the teacher's `state.rs` checkpoint/save/load shape,
//! generalized from a single global `ProcessingState` to many independent,
//! token-keyed `WorkflowState` files, each written atomically via
//! `groups::atomic_write` the same way the group store and style store persist.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;

use crate::client::{ActionSpec, GmailAdapter};
use crate::error::{GmailError, Result};
use crate::groups::atomic_write;
use crate::models::{Full, MessageId, Summary};

/// The narrow port the Workflow Engine depends on instead of the Composer
/// directly, breaking the cyclic reference between the two: the Composer
/// implements this, the engine only ever sees the port.
#[async_trait]
pub trait Sender: Send + Sync {
    async fn send_reply(&self, original_id: &MessageId, body: &str) -> Result<MessageId>;
}

/// A named, reusable query template. Persisted as a flat list in a single
/// YAML document (`workflows.yaml`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub name: String,
    pub query: String,
    #[serde(default)]
    pub auto_mark_read: bool,
    #[serde(default)]
    pub description: Option<String>,
}

/// On-disk store for `WorkflowDefinition`s, one YAML document for the whole set.
pub struct WorkflowStore {
    path: PathBuf,
}

impl WorkflowStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn read_all(&self) -> Result<Vec<WorkflowDefinition>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.path)
            .await
            .map_err(|e| GmailError::FilesystemError(format!("reading {:?}: {}", self.path, e)))?;
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_yaml::from_str(&content).map_err(GmailError::from)
    }

    async fn write_all(&self, defs: &[WorkflowDefinition]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| GmailError::FilesystemError(e.to_string()))?;
        }
        let content = serde_yaml::to_string(defs)?;
        atomic_write(&self.path, content.as_bytes()).await
    }

    pub async fn list(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.read_all().await?.into_iter().map(|d| d.name).collect();
        names.sort();
        Ok(names)
    }

    pub async fn show(&self, name: &str) -> Result<WorkflowDefinition> {
        self.read_all()
            .await?
            .into_iter()
            .find(|d| d.name == name)
            .ok_or_else(|| GmailError::UnknownWorkflow(name.to_string()))
    }

    pub async fn create(
        &self,
        name: &str,
        query: &str,
        auto_mark_read: bool,
        description: Option<String>,
    ) -> Result<()> {
        let mut defs = self.read_all().await?;
        if defs.iter().any(|d| d.name == name) {
            return Err(GmailError::ValidationError(format!("workflow '{}' already exists", name)));
        }
        defs.push(WorkflowDefinition {
            name: name.to_string(),
            query: query.to_string(),
            auto_mark_read,
            description,
        });
        self.write_all(&defs).await
    }

    pub async fn delete(&self, name: &str) -> Result<()> {
        let mut defs = self.read_all().await?;
        let before = defs.len();
        defs.retain(|d| d.name != name);
        if defs.len() == before {
            return Err(GmailError::UnknownWorkflow(name.to_string()));
        }
        self.write_all(&defs).await
    }
}

/// One closed-over record of a dispatched action, appended to `history`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: MessageId,
    pub action: String,
    pub ts: DateTime<Utc>,
    pub ok: bool,
    pub error: Option<String>,
}

/// Per-token session state. See module docs for persistence/TTL invariants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState {
    pub token: String,
    pub workflow_name: String,
    pub query: String,
    pub auto_mark_read: bool,
    pub ids: Vec<MessageId>,
    pub cursor: usize,
    pub total: usize,
    pub history: Vec<HistoryEntry>,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

impl WorkflowState {
    pub fn completed(&self) -> bool {
        self.cursor == self.total
    }

    pub fn progress(&self) -> Progress {
        Progress {
            total: self.total,
            processed: self.cursor,
            remaining: self.total - self.cursor,
            current: if self.cursor < self.total { self.cursor + 1 } else { self.total },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Progress {
    pub total: usize,
    pub processed: usize,
    pub remaining: usize,
    pub current: usize,
}

/// The closed action variant dispatched exhaustively by `continue`.
#[derive(Debug, Clone)]
pub enum Action {
    View,
    Archive,
    Skip,
    Reply { body: String },
    Quit,
}

impl Action {
    fn name(&self) -> &'static str {
        match self {
            Action::View => "view",
            Action::Archive => "archive",
            Action::Skip => "skip",
            Action::Reply { .. } => "reply",
            Action::Quit => "quit",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResult {
    pub id: MessageId,
    pub action: String,
    pub ok: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StartResponse {
    pub token: String,
    pub email: Option<Summary>,
    pub progress: Progress,
    pub completed: bool,
}

/// `continue`'s `email` field: a `Summary` (or none, when drained) for every
/// action except `view`, which returns a `Full` without advancing the cursor.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ContinueEmail {
    Summary(Option<Summary>),
    Full(Box<Full>),
}

#[derive(Debug, Clone, Serialize)]
pub struct ContinueResponse {
    pub token: String,
    pub email: ContinueEmail,
    pub action_result: Option<ActionResult>,
    pub progress: Progress,
    pub completed: bool,
    pub terminated: bool,
}

fn generate_token() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Drives workflow sessions over a [`GmailAdapter`]. One engine instance is
/// enough for a whole CLI invocation; it holds no session-specific state
/// itself, only the directory and TTL.
pub struct WorkflowEngine {
    adapter: Arc<dyn GmailAdapter>,
    states_dir: PathBuf,
    ttl: Duration,
    sender: Arc<dyn Sender>,
}

impl WorkflowEngine {
    pub fn new(adapter: Arc<dyn GmailAdapter>, sender: Arc<dyn Sender>, states_dir: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            adapter,
            sender,
            states_dir: states_dir.into(),
            ttl,
        }
    }

    fn state_path(&self, token: &str) -> PathBuf {
        self.states_dir.join(format!("{}.json", token))
    }

    async fn persist(&self, state: &WorkflowState) -> Result<()> {
        fs::create_dir_all(&self.states_dir)
            .await
            .map_err(|e| GmailError::FilesystemError(e.to_string()))?;
        let path = self.state_path(&state.token);
        let json = serde_json::to_string_pretty(state)?;
        atomic_write(&path, json.as_bytes()).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            let _ = fs::set_permissions(&path, perms).await;
        }
        Ok(())
    }

    /// Load state by token, applying the TTL-on-load rule: missing, unparseable,
    /// or expired state is uniformly `TokenExpired`. Expired files are left on
    /// disk; `cleanup` is the only thing that removes them.
    async fn load_state(&self, token: &str) -> Result<WorkflowState> {
        let path = self.state_path(token);
        let content = fs::read_to_string(&path).await.map_err(|_| GmailError::TokenExpired)?;
        let state: WorkflowState = serde_json::from_str(&content).map_err(|_| GmailError::TokenExpired)?;
        let age = Utc::now() - state.last_activity_at;
        if age > ChronoDuration::from_std(self.ttl).unwrap_or(ChronoDuration::MAX) {
            return Err(GmailError::TokenExpired);
        }
        Ok(state)
    }

    async fn delete_state(&self, token: &str) -> Result<()> {
        let path = self.state_path(token);
        if path.exists() {
            fs::remove_file(&path)
                .await
                .map_err(|e| GmailError::FilesystemError(format!("removing {:?}: {}", path, e)))?;
        }
        Ok(())
    }

    /// `start(workflowName)`. Drains every page of `listIds` into the session's
    /// immutable `ids` list, persists a new token-addressed state, and returns
    /// the first message's summary.
    pub async fn start(&self, definitions: &WorkflowStore, name: &str) -> Result<StartResponse> {
        let def = definitions.show(name).await?;

        let mut ids = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let (batch, next) = self.adapter.list_ids(&def.query, page_token.as_deref(), 500).await?;
            ids.extend(batch);
            match next {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        let token = generate_token();
        let now = Utc::now();
        let total = ids.len();
        let state = WorkflowState {
            token: token.clone(),
            workflow_name: def.name,
            query: def.query,
            auto_mark_read: def.auto_mark_read,
            ids: ids.clone(),
            cursor: 0,
            total,
            history: Vec::new(),
            created_at: now,
            last_activity_at: now,
        };
        self.persist(&state).await?;

        let email = match ids.first() {
            Some(first) => Some(self.adapter.get_summary(first).await?),
            None => None,
        };

        Ok(StartResponse {
            token,
            email,
            progress: state.progress(),
            completed: total == 0,
        })
    }

    /// `continue(token, action)`. See module docs and spec for the full
    /// dispatch table; this is the load-bearing state transition.
    pub async fn continue_workflow(&self, token: &str, action: Action) -> Result<ContinueResponse> {
        let mut state = self.load_state(token).await?;

        if state.completed() {
            if matches!(action, Action::Quit) {
                self.delete_state(token).await?;
                return Ok(ContinueResponse {
                    token: token.to_string(),
                    email: ContinueEmail::Summary(None),
                    action_result: None,
                    progress: state.progress(),
                    completed: true,
                    terminated: true,
                });
            }
            return Ok(ContinueResponse {
                token: token.to_string(),
                email: ContinueEmail::Summary(None),
                action_result: None,
                progress: state.progress(),
                completed: true,
                terminated: false,
            });
        }

        let current_id = state.ids[state.cursor].clone();

        if matches!(action, Action::View) {
            state.last_activity_at = Utc::now();
            self.persist(&state).await?;
            let full = self.adapter.get_full(&current_id).await?;
            return Ok(ContinueResponse {
                token: token.to_string(),
                email: ContinueEmail::Full(Box::new(full)),
                action_result: None,
                progress: state.progress(),
                completed: false,
                terminated: false,
            });
        }

        if matches!(action, Action::Quit) {
            self.delete_state(token).await?;
            return Ok(ContinueResponse {
                token: token.to_string(),
                email: ContinueEmail::Summary(None),
                action_result: Some(ActionResult {
                    id: current_id,
                    action: "quit".to_string(),
                    ok: true,
                    error: None,
                }),
                progress: Progress {
                    total: state.total,
                    processed: state.cursor,
                    remaining: state.total - state.cursor,
                    current: state.total,
                },
                completed: true,
                terminated: true,
            });
        }

        let action_name = action.name().to_string();
        let dispatch_result = self.dispatch(&mut state, &current_id, action).await;

        match dispatch_result {
            Ok(()) => {
                state.cursor += 1;
                state.history.push(HistoryEntry {
                    id: current_id.clone(),
                    action: action_name.clone(),
                    ts: Utc::now(),
                    ok: true,
                    error: None,
                });
                state.last_activity_at = Utc::now();
                self.persist(&state).await?;

                let next_summary = match state.ids.get(state.cursor) {
                    Some(next_id) => Some(self.adapter.get_summary(next_id).await?),
                    None => None,
                };

                Ok(ContinueResponse {
                    token: token.to_string(),
                    email: ContinueEmail::Summary(next_summary),
                    action_result: Some(ActionResult {
                        id: current_id,
                        action: action_name,
                        ok: true,
                        error: None,
                    }),
                    progress: state.progress(),
                    completed: state.completed(),
                    terminated: false,
                })
            }
            Err(e) => {
                // Cursor does not advance: the caller can safely retry by
                // re-issuing the same `continue`.
                state.history.push(HistoryEntry {
                    id: current_id.clone(),
                    action: action_name.clone(),
                    ts: Utc::now(),
                    ok: false,
                    error: Some(e.to_string()),
                });
                state.last_activity_at = Utc::now();
                self.persist(&state).await?;

                if matches!(e, GmailError::NotAuthorized(_)) {
                    return Err(e);
                }

                Ok(ContinueResponse {
                    token: token.to_string(),
                    email: ContinueEmail::Summary(Some(self.adapter.get_summary(&current_id).await?)),
                    action_result: Some(ActionResult {
                        id: current_id,
                        action: action_name,
                        ok: false,
                        error: Some(e.to_string()),
                    }),
                    progress: state.progress(),
                    completed: false,
                    terminated: false,
                })
            }
        }
    }

    /// Dispatches the server-side effect for a non-`view`/non-`quit` action.
    /// Returns `Err` without mutating `state.cursor`/`history` — the caller
    /// is responsible for recording the outcome.
    async fn dispatch(&self, state: &mut WorkflowState, current_id: &MessageId, action: Action) -> Result<()> {
        match action {
            Action::Archive => {
                let mut spec = ActionSpec {
                    remove_labels: vec!["INBOX".to_string()],
                    add_labels: vec![],
                };
                if state.auto_mark_read {
                    spec.remove_labels.push("UNREAD".to_string());
                }
                self.adapter.apply_action(current_id, &spec).await
            }
            Action::Skip => {
                if state.auto_mark_read {
                    let spec = ActionSpec {
                        remove_labels: vec!["UNREAD".to_string()],
                        add_labels: vec![],
                    };
                    self.adapter.apply_action(current_id, &spec).await?;
                }
                Ok(())
            }
            Action::Reply { body } => {
                self.sender.send_reply(current_id, &body).await?;
                let spec = ActionSpec {
                    remove_labels: vec!["INBOX".to_string()],
                    add_labels: vec![],
                };
                self.adapter.apply_action(current_id, &spec).await.map_err(|e| {
                    GmailError::PartialReplyFailure(format!("reply sent but label update failed: {}", e))
                })
            }
            Action::View | Action::Quit => unreachable!("handled by the caller before dispatch"),
        }
    }

    /// Scans the state directory, removing files whose `lastActivityAt` is
    /// past TTL and files that fail to parse. Idempotent; safe to run
    /// concurrently with other `cleanup` invocations.
    pub async fn cleanup(&self) -> Result<usize> {
        if !self.states_dir.exists() {
            return Ok(0);
        }
        let mut removed = 0;
        let mut entries = fs::read_dir(&self.states_dir)
            .await
            .map_err(|e| GmailError::FilesystemError(e.to_string()))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| GmailError::FilesystemError(e.to_string()))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let should_remove = match fs::read_to_string(&path).await {
                Ok(content) => match serde_json::from_str::<WorkflowState>(&content) {
                    Ok(state) => {
                        let age = Utc::now() - state.last_activity_at;
                        age > ChronoDuration::from_std(self.ttl).unwrap_or(ChronoDuration::MAX)
                    }
                    Err(_) => true,
                },
                Err(_) => true,
            };
            if should_remove && fs::remove_file(&path).await.is_ok() {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ActionSpec as CA, GmailAdapter};
    use crate::error::Result as GResult;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;
    use tempfile::TempDir;

    struct FakeAdapter {
        messages: Vec<MessageId>,
        failures: StdMutex<std::collections::HashMap<String, usize>>,
        applied: StdMutex<Vec<(MessageId, CA)>>,
    }

    impl FakeAdapter {
        fn new(ids: &[&str]) -> Self {
            Self {
                messages: ids.iter().map(|s| MessageId(s.to_string())).collect(),
                failures: StdMutex::new(std::collections::HashMap::new()),
                applied: StdMutex::new(Vec::new()),
            }
        }

        fn fail_next(&self, op: &str, times: usize) {
            self.failures.lock().unwrap().insert(op.to_string(), times);
        }

        fn maybe_fail(&self, op: &str) -> GResult<()> {
            let mut failures = self.failures.lock().unwrap();
            if let Some(count) = failures.get_mut(op) {
                if *count > 0 {
                    *count -= 1;
                    return Err(GmailError::ServerError {
                        status: 500,
                        message: "injected failure".to_string(),
                    });
                }
            }
            Ok(())
        }
    }

    fn dummy_summary(id: &MessageId) -> Summary {
        use crate::models::Address;
        Summary {
            id: id.clone(),
            thread_id: crate::models::ThreadId(format!("t-{}", id.0)),
            from: Address::parse("sender@x.com").unwrap(),
            to: vec![],
            cc: vec![],
            subject: "subject".to_string(),
            date: Utc::now(),
            snippet: "snippet".to_string(),
            label_ids: vec!["INBOX".to_string()],
            is_unread: true,
            is_important: false,
            has_attachment: false,
            size_estimate: 100,
        }
    }

    fn dummy_full(id: &MessageId) -> Full {
        let summary = dummy_summary(id);
        Full {
            id: summary.id,
            thread_id: summary.thread_id,
            from: summary.from,
            to: summary.to,
            cc: summary.cc,
            subject: summary.subject,
            date: summary.date,
            body_text: "body".to_string(),
            body_html: String::new(),
            headers: vec![],
            attachments: vec![],
            warnings: vec![],
        }
    }

    #[async_trait]
    impl GmailAdapter for FakeAdapter {
        async fn list_ids(&self, _query: &str, _page_token: Option<&str>, _max: u32) -> GResult<(Vec<MessageId>, Option<String>)> {
            Ok((self.messages.clone(), None))
        }
        async fn get_summary(&self, id: &MessageId) -> GResult<Summary> {
            Ok(dummy_summary(id))
        }
        async fn get_full(&self, id: &MessageId) -> GResult<Full> {
            Ok(dummy_full(id))
        }
        async fn batch_get_summaries(&self, ids: &[MessageId], _concurrency: usize) -> GResult<Vec<Summary>> {
            Ok(ids.iter().map(dummy_summary).collect())
        }
        async fn apply_action(&self, id: &MessageId, spec: &CA) -> GResult<()> {
            self.maybe_fail("apply_action")?;
            self.applied.lock().unwrap().push((id.clone(), spec.clone()));
            Ok(())
        }
        async fn send_mime(&self, _bytes: Vec<u8>) -> GResult<MessageId> {
            self.maybe_fail("send_mime")?;
            Ok(MessageId("sent-1".to_string()))
        }
        async fn label_counts(&self) -> GResult<Vec<(crate::client::LabelHeader, u64, u64)>> {
            Ok(vec![])
        }
        async fn get_thread(&self, id: &MessageId) -> GResult<Vec<Summary>> {
            Ok(vec![dummy_summary(id)])
        }
        async fn get_profile_email(&self) -> GResult<String> {
            Ok("me@example.com".to_string())
        }
    }

    struct FakeSender {
        replies: StdMutex<Vec<(MessageId, String)>>,
    }

    impl FakeSender {
        fn new() -> Self {
            Self {
                replies: StdMutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Sender for FakeSender {
        async fn send_reply(&self, original_id: &MessageId, body: &str) -> Result<MessageId> {
            self.replies.lock().unwrap().push((original_id.clone(), body.to_string()));
            Ok(MessageId(format!("reply-to-{}", original_id.0)))
        }
    }

    async fn engine_with(ids: &[&str], dir: &TempDir) -> (WorkflowEngine, WorkflowStore, Arc<FakeAdapter>) {
        let adapter = Arc::new(FakeAdapter::new(ids));
        let sender: Arc<dyn Sender> = Arc::new(FakeSender::new());
        let engine = WorkflowEngine::new(
            adapter.clone() as Arc<dyn GmailAdapter>,
            sender,
            dir.path().join("workflow-states"),
            Duration::from_secs(3600),
        );
        let store = WorkflowStore::new(dir.path().join("workflows.yaml"));
        store.create("inbox-triage", "is:unread", false, None).await.unwrap();
        (engine, store, adapter)
    }

    #[tokio::test]
    async fn test_drain_of_three() {
        let dir = TempDir::new().unwrap();
        let (engine, store, _adapter) = engine_with(&["m1", "m2", "m3"], &dir).await;

        let start = engine.start(&store, "inbox-triage").await.unwrap();
        assert_eq!(start.email.unwrap().id, MessageId("m1".to_string()));
        assert_eq!(start.progress.total, 3);
        assert!(!start.completed);

        let r1 = engine.continue_workflow(&start.token, Action::Archive).await.unwrap();
        assert_eq!(r1.progress.processed, 1);
        assert!(!r1.completed);
        match r1.email {
            ContinueEmail::Summary(Some(s)) => assert_eq!(s.id, MessageId("m2".to_string())),
            _ => panic!("expected m2 summary"),
        }

        let r2 = engine.continue_workflow(&start.token, Action::Skip).await.unwrap();
        assert_eq!(r2.progress.processed, 2);

        let r3 = engine.continue_workflow(&start.token, Action::Archive).await.unwrap();
        assert!(r3.completed);
        assert!(matches!(r3.email, ContinueEmail::Summary(None)));

        let r4 = engine.continue_workflow(&start.token, Action::Archive).await.unwrap();
        assert!(r4.completed);
        assert!(r4.action_result.is_none());
    }

    #[tokio::test]
    async fn test_view_does_not_advance() {
        let dir = TempDir::new().unwrap();
        let (engine, store, _adapter) = engine_with(&["m1", "m2"], &dir).await;
        let start = engine.start(&store, "inbox-triage").await.unwrap();

        let viewed = engine.continue_workflow(&start.token, Action::View).await.unwrap();
        assert!(matches!(viewed.email, ContinueEmail::Full(_)));
        assert_eq!(viewed.progress.processed, 0);

        let archived = engine.continue_workflow(&start.token, Action::Archive).await.unwrap();
        match archived.action_result {
            Some(r) => assert_eq!(r.id, MessageId("m1".to_string())),
            None => panic!("expected an action result"),
        }
    }

    #[tokio::test]
    async fn test_expiry() {
        let dir = TempDir::new().unwrap();
        let adapter = Arc::new(FakeAdapter::new(&["m1"]));
        let sender: Arc<dyn Sender> = Arc::new(FakeSender::new());
        let engine = WorkflowEngine::new(
            adapter.clone() as Arc<dyn GmailAdapter>,
            sender,
            dir.path().join("workflow-states"),
            Duration::from_millis(10),
        );
        let store = WorkflowStore::new(dir.path().join("workflows.yaml"));
        store.create("inbox-triage", "is:unread", false, None).await.unwrap();

        let start = engine.start(&store, "inbox-triage").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let result = engine.continue_workflow(&start.token, Action::Skip).await;
        assert!(matches!(result, Err(GmailError::TokenExpired)));

        let removed = engine.cleanup().await.unwrap();
        assert_eq!(removed, 1);
    }

    #[tokio::test]
    async fn test_empty_workflow_completes_immediately() {
        let dir = TempDir::new().unwrap();
        let (engine, store, _adapter) = engine_with(&[], &dir).await;
        let start = engine.start(&store, "inbox-triage").await.unwrap();
        assert!(start.completed);
        assert!(start.email.is_none());

        let r = engine.continue_workflow(&start.token, Action::Skip).await.unwrap();
        assert!(r.completed);
    }

    #[tokio::test]
    async fn test_partial_reply_failure_does_not_advance_cursor() {
        let dir = TempDir::new().unwrap();
        let (engine, store, adapter) = engine_with(&["m1"], &dir).await;
        adapter.fail_next("apply_action", 100);

        let start = engine.start(&store, "inbox-triage").await.unwrap();
        let result = engine
            .continue_workflow(&start.token, Action::Reply { body: "thanks".to_string() })
            .await
            .unwrap();

        assert!(!result.completed);
        assert_eq!(result.progress.processed, 0);
        let action_result = result.action_result.unwrap();
        assert!(!action_result.ok);
        assert!(action_result.error.unwrap().contains("reply sent but label update failed"));

        // skip should now advance past m1 without re-sending.
        let skip_result = engine.continue_workflow(&start.token, Action::Skip).await.unwrap();
        assert!(skip_result.completed);
    }

    #[tokio::test]
    async fn test_quit_terminates_and_deletes_state() {
        let dir = TempDir::new().unwrap();
        let (engine, store, _adapter) = engine_with(&["m1", "m2"], &dir).await;
        let start = engine.start(&store, "inbox-triage").await.unwrap();

        let result = engine.continue_workflow(&start.token, Action::Quit).await.unwrap();
        assert!(result.terminated);
        assert!(result.completed);

        let reuse = engine.continue_workflow(&start.token, Action::Skip).await;
        assert!(matches!(reuse, Err(GmailError::TokenExpired)));
    }
}
