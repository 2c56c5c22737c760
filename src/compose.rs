//! The Composer: recipient expansion, style resolution, preview, confirmation,
//! MIME assembly, and send. Grounded in the teacher's `confirm_action` blocking
//! stdin prompt (`cli.rs`), generalized into a `Confirmer` port per spec §9's
//! redesign flag so the non-TTY-is-"no" safety property is testable without
//! simulating stdin.

use async_trait::async_trait;
use std::collections::HashSet;
use std::io::{IsTerminal, Write};
use std::path::PathBuf;
use std::sync::Arc;

use crate::client::{send_reply, GmailAdapter};
use crate::error::{GmailError, Result};
use crate::groups::GroupStore;
use crate::linter;
use crate::mime::{self, MimeAttachment};
use crate::models::{Address, MessageId, ThreadId};
use crate::styles::StyleStore;
use crate::workflow::Sender;

/// What the user decided at the confirmation gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Yes,
    No,
}

/// Abstracts the blocking confirmation read (spec §4.4 step 4, §9 redesign flag).
#[async_trait]
pub trait Confirmer: Send + Sync {
    async fn confirm(&self, prompt: &str) -> Decision;
}

/// TTY-backed confirmer: piped/closed stdin is always "no", never implicit "yes".
pub struct StdinConfirmer;

#[async_trait]
impl Confirmer for StdinConfirmer {
    async fn confirm(&self, prompt: &str) -> Decision {
        if !std::io::stdin().is_terminal() {
            return Decision::No;
        }
        print!("{} [y/N]: ", prompt);
        if std::io::stdout().flush().is_err() {
            return Decision::No;
        }
        let mut input = String::new();
        match std::io::stdin().read_line(&mut input) {
            Ok(0) => Decision::No, // EOF on a TTY that closed mid-read
            Ok(_) => {
                let trimmed = input.trim().to_lowercase();
                if trimmed == "y" || trimmed == "yes" {
                    Decision::Yes
                } else {
                    Decision::No
                }
            }
            Err(_) => Decision::No,
        }
    }
}

/// Always declines. Used when a caller wants dry-run-like semantics without a
/// terminal at all (e.g. inside `mail workflows run`'s scripted driver).
pub struct AlwaysNoConfirmer;

#[async_trait]
impl Confirmer for AlwaysNoConfirmer {
    async fn confirm(&self, _prompt: &str) -> Decision {
        Decision::No
    }
}

/// Input contract for one outbound message (spec §4.4).
#[derive(Debug, Clone)]
pub struct ComposeRequest {
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub subject: String,
    pub body: String,
    pub style_name: Option<String>,
    pub attachment_paths: Vec<PathBuf>,
    pub dry_run: bool,
    pub force: bool,
    pub yolo: bool,
}

/// The style's advisory guidance surfaced on the preview. Never concatenated
/// into the body automatically — spec §4.4 step 3 is explicit that the style
/// is guidance text, not a template the composer injects.
#[derive(Debug, Clone)]
pub struct StyleGuidance {
    pub name: String,
    pub raw: String,
}

/// Deterministic, stable-ordered preview of the message about to be sent.
#[derive(Debug, Clone)]
pub struct Preview {
    pub to: Vec<Address>,
    pub cc: Vec<Address>,
    pub bcc: Vec<Address>,
    pub subject: String,
    pub body: String,
    pub style: Option<StyleGuidance>,
    pub attachment_filenames: Vec<String>,
}

/// What happened when `Composer::compose` ran to completion.
#[derive(Debug, Clone)]
pub enum ComposeOutcome {
    /// `--dry-run`: preview printed, nothing sent.
    DryRun(Preview),
    /// The user (or non-TTY default) declined to send.
    Cancelled(Preview),
    /// Sent successfully.
    Sent {
        message_id: MessageId,
        thread_id: Option<ThreadId>,
        preview: Preview,
    },
}

/// A single-domain → style-name heuristic table consulted when no `--style`
/// is given. Falls back to `professional-friendly` (spec §4.4 step 2), the
/// teacher's corpus analogue being per-domain filter defaults in the
/// (removed) classifier's rule table.
const DOMAIN_STYLE_HEURISTIC: &[(&str, &str)] = &[("gmail.com", "casual-friendly"), ("slack.com", "concise")];

fn default_style_name() -> &'static str {
    "professional-friendly"
}

fn heuristic_style_for_domains(domains: &[String]) -> &'static str {
    if domains.len() == 1 {
        if let Some((_, style)) = DOMAIN_STYLE_HEURISTIC.iter().find(|(d, _)| d == &domains[0]) {
            return style;
        }
    }
    default_style_name()
}

/// Takes `{to, cc, bcc, subject, body, style?, attachments?}`, expands groups,
/// resolves a style, previews, gates on confirmation, and sends via the
/// Gmail Adapter. Implements [`Sender`] for the Workflow Engine's narrow
/// reply port, so the engine never depends on this type directly (spec §9's
/// cyclic-reference redesign flag).
pub struct Composer {
    adapter: Arc<dyn GmailAdapter>,
    groups: Arc<GroupStore>,
    styles: Arc<StyleStore>,
    confirmer: Arc<dyn Confirmer>,
    from_address: String,
    max_attachment_bytes: u64,
}

impl Composer {
    pub fn new(
        adapter: Arc<dyn GmailAdapter>,
        groups: Arc<GroupStore>,
        styles: Arc<StyleStore>,
        confirmer: Arc<dyn Confirmer>,
        from_address: String,
        max_attachment_bytes: u64,
    ) -> Self {
        Self {
            adapter,
            groups,
            styles,
            confirmer,
            from_address,
            max_attachment_bytes,
        }
    }

    /// The address every outbound send goes out as; `mail reply`'s standalone
    /// confirm-gated path reuses this rather than re-fetching the profile.
    pub fn from_address(&self) -> &str {
        &self.from_address
    }

    /// Step 1: expand `to`/`cc`/`bcc` through the Group Store, then de-duplicate
    /// across the whole combined list preserving first occurrence in
    /// `to`, then `cc`, then `bcc` order (spec §4.4 step 1 / §8 scenario 4:
    /// an address already placed in `to` is dropped from `cc`/`bcc`, not kept
    /// in both). `to` must be non-empty after expansion; `cc`/`bcc` may be empty.
    async fn expand_recipients(&self, req: &ComposeRequest) -> Result<(Vec<Address>, Vec<Address>, Vec<Address>)> {
        let to = self.groups.expand(&req.to).await?;
        let cc = self.groups.expand(&req.cc).await?;
        let bcc = self.groups.expand(&req.bcc).await?;
        if to.is_empty() {
            return Err(GmailError::ValidationError("at least one 'to' recipient is required".to_string()));
        }

        let mut seen: HashSet<String> = to.iter().map(|a| a.dedup_key()).collect();
        let cc: Vec<Address> = cc
            .into_iter()
            .filter(|a| seen.insert(a.dedup_key()))
            .collect();
        let bcc: Vec<Address> = bcc
            .into_iter()
            .filter(|a| seen.insert(a.dedup_key()))
            .collect();

        Ok((to, cc, bcc))
    }

    /// Step 2: resolve the named style, or fall back to the domain heuristic.
    /// A heuristic miss (the style doesn't exist in the store) degrades to no
    /// guidance rather than failing the whole send; an explicit `--style` that
    /// doesn't exist is an error the caller should see.
    async fn resolve_style(&self, req: &ComposeRequest, to: &[Address]) -> Result<Option<StyleGuidance>> {
        let explicit = req.style_name.is_some();
        let name = match &req.style_name {
            Some(n) => n.clone(),
            None => {
                let mut domains: Vec<String> = to.iter().map(|a| a.domain.to_lowercase()).collect();
                domains.sort();
                domains.dedup();
                heuristic_style_for_domains(&domains).to_string()
            }
        };

        match self.styles.show(&name).await {
            Ok(style) => Ok(Some(StyleGuidance { name, raw: style.raw })),
            Err(GmailError::NotFound(_)) if !explicit => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Step 3: render a deterministic preview. Attachments are read here so
    /// their filenames can be shown; the bytes are re-read at MIME-build time.
    fn render_preview(
        &self,
        req: &ComposeRequest,
        to: Vec<Address>,
        cc: Vec<Address>,
        bcc: Vec<Address>,
        style: Option<StyleGuidance>,
    ) -> Preview {
        Preview {
            to,
            cc,
            bcc,
            subject: req.subject.clone(),
            body: req.body.clone(),
            style,
            attachment_filenames: req
                .attachment_paths
                .iter()
                .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().to_string()))
                .collect(),
        }
    }

    async fn load_attachments(&self, paths: &[PathBuf]) -> Result<Vec<MimeAttachment>> {
        let mut out = Vec::with_capacity(paths.len());
        let mut total: u64 = 0;
        for path in paths {
            let data = tokio::fs::read(path)
                .await
                .map_err(|e| GmailError::FilesystemError(format!("reading attachment {:?}: {}", path, e)))?;
            total += data.len() as u64;
            if total > self.max_attachment_bytes {
                return Err(GmailError::ValidationError(format!(
                    "attachments exceed the {}-byte cap",
                    self.max_attachment_bytes
                )));
            }
            let filename = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "attachment".to_string());
            let content_type = mime::sniff_extension(&filename)
                .map(str::to_string)
                .unwrap_or_else(|| mime::sniff_magic_bytes(&data).to_string());
            out.push(MimeAttachment {
                filename,
                content_type,
                data,
            });
        }
        Ok(out)
    }

    /// Run the full pipeline: expand → resolve style → preview → confirm →
    /// build MIME → send.
    pub async fn compose(&self, req: ComposeRequest) -> Result<ComposeOutcome> {
        let (to, cc, bcc) = self.expand_recipients(&req).await?;
        let style = self.resolve_style(&req, &to).await?;
        let preview = self.render_preview(&req, to.clone(), cc.clone(), bcc.clone(), style);

        if req.dry_run {
            return Ok(ComposeOutcome::DryRun(preview));
        }

        if !req.yolo {
            let decision = if req.force {
                Decision::Yes
            } else {
                self.confirmer.confirm("Send this message?").await
            };
            if decision == Decision::No {
                return Ok(ComposeOutcome::Cancelled(preview));
            }
        }

        let attachments = self.load_attachments(&req.attachment_paths).await?;

        let bytes = mime::build_mime_bytes(&self.from_address, &to, &cc, &bcc, &req.subject, &req.body, &attachments, None, None);

        let message_id = self.adapter.send_mime(bytes).await?;
        let thread_id = self.adapter.get_summary(&message_id).await.ok().map(|s| s.thread_id);

        Ok(ComposeOutcome::Sent {
            message_id,
            thread_id,
            preview,
        })
    }
}

#[async_trait]
impl Sender for Composer {
    /// Narrow port the Workflow Engine calls for `reply`. Builds a `Re:`
    /// message threaded via `In-Reply-To`/`References` and sends it with no
    /// confirmation gate — `reply` inside a workflow always runs as `yolo`
    /// (spec §4.5.2).
    async fn send_reply(&self, original_id: &MessageId, body: &str) -> Result<MessageId> {
        let full = self.adapter.get_full(original_id).await?;
        send_reply(self.adapter.as_ref(), &full, &self.from_address, body, Vec::new()).await
    }
}

/// Validate raw style content is lint-clean before letting the composer
/// surface it as guidance; used by `mail styles validate` but kept here so
/// the composer and the CLI agree on what "a usable style" means.
pub fn style_is_usable(raw: &str) -> bool {
    linter::lint(raw).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ActionSpec, LabelHeader};
    use crate::config::Env;
    use crate::error::Result as GResult;
    use crate::models::{Full, Summary, ThreadId};
    use chrono::Utc;
    use tempfile::TempDir;

    struct FakeAdapter {
        sent: std::sync::Mutex<Vec<Vec<u8>>>,
    }

    impl FakeAdapter {
        fn new() -> Self {
            Self {
                sent: std::sync::Mutex::new(Vec::new()),
            }
        }
    }

    fn dummy_summary(id: &MessageId) -> Summary {
        Summary {
            id: id.clone(),
            thread_id: ThreadId(format!("t-{}", id.0)),
            from: Address::parse("me@example.com").unwrap(),
            to: vec![],
            cc: vec![],
            subject: "subject".to_string(),
            date: Utc::now(),
            snippet: String::new(),
            label_ids: vec![],
            is_unread: false,
            is_important: false,
            has_attachment: false,
            size_estimate: 10,
        }
    }

    #[async_trait]
    impl GmailAdapter for FakeAdapter {
        async fn list_ids(&self, _query: &str, _page_token: Option<&str>, _max: u32) -> GResult<(Vec<MessageId>, Option<String>)> {
            Ok((vec![], None))
        }
        async fn get_summary(&self, id: &MessageId) -> GResult<Summary> {
            Ok(dummy_summary(id))
        }
        async fn get_full(&self, id: &MessageId) -> GResult<Full> {
            let summary = dummy_summary(id);
            Ok(Full {
                id: summary.id,
                thread_id: summary.thread_id,
                from: summary.from,
                to: summary.to,
                cc: summary.cc,
                subject: summary.subject,
                date: summary.date,
                body_text: "hi".to_string(),
                body_html: String::new(),
                headers: vec![],
                attachments: vec![],
                warnings: vec![],
            })
        }
        async fn batch_get_summaries(&self, ids: &[MessageId], _concurrency: usize) -> GResult<Vec<Summary>> {
            Ok(ids.iter().map(dummy_summary).collect())
        }
        async fn apply_action(&self, _id: &MessageId, _spec: &ActionSpec) -> GResult<()> {
            Ok(())
        }
        async fn send_mime(&self, bytes: Vec<u8>) -> GResult<MessageId> {
            self.sent.lock().unwrap().push(bytes);
            Ok(MessageId("sent-1".to_string()))
        }
        async fn label_counts(&self) -> GResult<Vec<(LabelHeader, u64, u64)>> {
            Ok(vec![])
        }
        async fn get_thread(&self, id: &MessageId) -> GResult<Vec<Summary>> {
            Ok(vec![dummy_summary(id)])
        }
        async fn get_profile_email(&self) -> GResult<String> {
            Ok("me@example.com".to_string())
        }
    }

    fn composer_with(dir: &TempDir, confirmer: Arc<dyn Confirmer>) -> (Composer, Arc<GroupStore>) {
        let env = Env::with_root(dir.path());
        let groups = Arc::new(GroupStore::new(env.groups_path()));
        let styles = Arc::new(StyleStore::new(env.styles_dir()));
        let adapter = Arc::new(FakeAdapter::new());
        let composer = Composer::new(adapter, groups.clone(), styles, confirmer, "me@example.com".to_string(), 25 * 1024 * 1024);
        (composer, groups)
    }

    fn req(to: Vec<&str>) -> ComposeRequest {
        ComposeRequest {
            to: to.into_iter().map(String::from).collect(),
            cc: vec![],
            bcc: vec![],
            subject: "Hello".to_string(),
            body: "Hi there".to_string(),
            style_name: None,
            attachment_paths: vec![],
            dry_run: false,
            force: false,
            yolo: false,
        }
    }

    #[tokio::test]
    async fn test_dry_run_never_sends() {
        let dir = TempDir::new().unwrap();
        let (composer, _groups) = composer_with(&dir, Arc::new(AlwaysNoConfirmer));
        let mut r = req(vec!["a@x.com"]);
        r.dry_run = true;
        let outcome = composer.compose(r).await.unwrap();
        assert!(matches!(outcome, ComposeOutcome::DryRun(_)));
    }

    #[tokio::test]
    async fn test_non_tty_default_cancels_without_yolo() {
        let dir = TempDir::new().unwrap();
        let (composer, _groups) = composer_with(&dir, Arc::new(AlwaysNoConfirmer));
        let outcome = composer.compose(req(vec!["a@x.com"])).await.unwrap();
        assert!(matches!(outcome, ComposeOutcome::Cancelled(_)));
    }

    #[tokio::test]
    async fn test_yolo_sends_without_confirmation() {
        let dir = TempDir::new().unwrap();
        let (composer, _groups) = composer_with(&dir, Arc::new(AlwaysNoConfirmer));
        let mut r = req(vec!["a@x.com"]);
        r.yolo = true;
        let outcome = composer.compose(r).await.unwrap();
        assert!(matches!(outcome, ComposeOutcome::Sent { .. }));
    }

    #[tokio::test]
    async fn test_force_sends_without_confirmation() {
        let dir = TempDir::new().unwrap();
        let (composer, _groups) = composer_with(&dir, Arc::new(AlwaysNoConfirmer));
        let mut r = req(vec!["a@x.com"]);
        r.force = true;
        let outcome = composer.compose(r).await.unwrap();
        assert!(matches!(outcome, ComposeOutcome::Sent { .. }));
    }

    #[tokio::test]
    async fn test_group_expansion_with_dedup() {
        let dir = TempDir::new().unwrap();
        let (composer, groups) = composer_with(&dir, Arc::new(AlwaysNoConfirmer));
        groups
            .create("team", &[Address::parse("a@x.com").unwrap(), Address::parse("b@x.com").unwrap()])
            .await
            .unwrap();
        groups.create("ops", &[Address::parse("c@y.com").unwrap()]).await.unwrap();

        let mut r = req(vec!["#team", "#ops"]);
        r.cc = vec!["a@x.com".to_string()];
        r.dry_run = true;
        let outcome = composer.compose(r).await.unwrap();
        match outcome {
            ComposeOutcome::DryRun(preview) => {
                let to_emails: Vec<String> = preview.to.iter().map(|a| a.email()).collect();
                assert_eq!(to_emails, vec!["a@x.com", "b@x.com", "c@y.com"]);
                // a@x.com already appears in `to`; first-occurrence dedup across
                // the combined recipient list drops it from `cc`.
                assert!(preview.cc.is_empty());
            }
            _ => panic!("expected dry run"),
        }
    }

    #[tokio::test]
    async fn test_empty_to_after_expansion_fails() {
        let dir = TempDir::new().unwrap();
        let (composer, _groups) = composer_with(&dir, Arc::new(AlwaysNoConfirmer));
        let mut r = req(vec![]);
        r.dry_run = true;
        let result = composer.compose(r).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_unknown_group_fails() {
        let dir = TempDir::new().unwrap();
        let (composer, _groups) = composer_with(&dir, Arc::new(AlwaysNoConfirmer));
        let mut r = req(vec!["#nonexistent"]);
        r.dry_run = true;
        let result = composer.compose(r).await;
        assert!(matches!(result, Err(GmailError::UnknownGroup(_))));
    }

    #[tokio::test]
    async fn test_explicit_unknown_style_fails() {
        let dir = TempDir::new().unwrap();
        let (composer, _groups) = composer_with(&dir, Arc::new(AlwaysNoConfirmer));
        let mut r = req(vec!["a@x.com"]);
        r.style_name = Some("does-not-exist".to_string());
        r.dry_run = true;
        let result = composer.compose(r).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_heuristic_style_miss_degrades_gracefully() {
        let dir = TempDir::new().unwrap();
        let (composer, _groups) = composer_with(&dir, Arc::new(AlwaysNoConfirmer));
        let mut r = req(vec!["a@x.com"]);
        r.dry_run = true;
        let outcome = composer.compose(r).await.unwrap();
        match outcome {
            ComposeOutcome::DryRun(preview) => assert!(preview.style.is_none()),
            _ => panic!("expected dry run"),
        }
    }

    #[tokio::test]
    async fn test_send_reply_threads_headers() {
        let dir = TempDir::new().unwrap();
        let (composer, _groups) = composer_with(&dir, Arc::new(AlwaysNoConfirmer));
        let id = composer.send_reply(&MessageId("m1".to_string()), "thanks").await.unwrap();
        assert_eq!(id.0, "sent-1");
    }
}
