//! Entry point: crypto provider install, tracing setup, wiring of `Env`,
//! `Config`, `GmailSession`, the Gmail Adapter, the stores, the Composer and
//! the Workflow Engine, then dispatch over every `Commands` variant.
//!
//! Generalized from the teacher's `MultiProgressWriter`/crypto-provider
//! bootstrap; the pipeline-specific `run`/`rollback`/`unmanage` dispatch is
//! replaced with the `mail` command tree.

use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use indicatif::MultiProgress;
use serde::Serialize;
use serde_json::{json, Value};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

use mail::cli::{ActionArg, Cli, Commands, GroupsCommand, OutputFormat, ProgressReporter, ReadFormat, StylesCommand, WorkflowsCommand};
use mail::client::{self, GmailAdapter, ProductionGmailAdapter};
use mail::compose::{ComposeOutcome, ComposeRequest, Composer, Confirmer, Decision, StdinConfirmer};
use mail::config::{Config, Env};
use mail::error::GmailError;
use mail::groups::GroupStore;
use mail::models::{Address, MessageId};
use mail::styles::StyleStore;
use mail::workflow::{Action, ContinueEmail, Sender, WorkflowEngine, WorkflowStore};
use mail::GmailSession;

/// Prints through `MultiProgress` to avoid progress bar/log interleaving
/// corruption, kept from the teacher verbatim.
#[derive(Clone)]
struct MultiProgressWriter {
    multi: Arc<MultiProgress>,
    buffer: Arc<std::sync::Mutex<Vec<u8>>>,
}

impl MultiProgressWriter {
    fn new(multi: Arc<MultiProgress>) -> Self {
        Self {
            multi,
            buffer: Arc::new(std::sync::Mutex::new(Vec::new())),
        }
    }
}

impl Write for MultiProgressWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buffer.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let mut buffer = self.buffer.lock().unwrap();
        if !buffer.is_empty() {
            let msg = String::from_utf8_lossy(&buffer);
            let msg = msg.trim_end_matches('\n');
            if !msg.is_empty() {
                let _ = self.multi.println(msg);
            }
            buffer.clear();
        }
        Ok(())
    }
}

impl Drop for MultiProgressWriter {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

#[derive(Clone)]
struct MultiProgressMakeWriter {
    multi: Arc<MultiProgress>,
}

impl<'a> MakeWriter<'a> for MultiProgressMakeWriter {
    type Writer = MultiProgressWriter;

    fn make_writer(&'a self) -> Self::Writer {
        MultiProgressWriter::new(Arc::clone(&self.multi))
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    #[cfg(not(windows))]
    let provider_installed = rustls::crypto::aws_lc_rs::default_provider().install_default().is_ok();
    #[cfg(windows)]
    let provider_installed = rustls::crypto::ring::default_provider().install_default().is_ok();
    if !provider_installed {
        eprintln!("fatal: failed to install default TLS crypto provider");
        return ExitCode::from(1);
    }

    let cli = Cli::parse();
    let output_format = cli.output_format;

    let filter = if cli.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("mail=debug,info"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("mail=info,warn,error"))
    };
    let multi_progress = Arc::new(MultiProgress::new());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(MultiProgressMakeWriter { multi: Arc::clone(&multi_progress) })
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    match run(cli, output_format).await {
        Ok(()) => ExitCode::from(0),
        Err(e) => {
            report_error(&e, output_format);
            ExitCode::from(e.exit_code() as u8)
        }
    }
}

fn report_error(err: &GmailError, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let body = json!({"success": false, "error": {"code": err.code(), "message": err.to_string()}});
            println!("{}", serde_json::to_string_pretty(&body).unwrap_or_default());
        }
        OutputFormat::Rich => {
            eprintln!("Error: {}", err);
            if let Some(hint) = error_hint(err) {
                eprintln!("{}", hint);
            }
        }
    }
}

/// The concrete next action named per spec §7's user-visible failure
/// behavior requirement.
fn error_hint(err: &GmailError) -> Option<&'static str> {
    match err {
        GmailError::UnknownGroup(_) => Some("Run 'mail groups list' to see available groups."),
        GmailError::UnknownWorkflow(_) => Some("Run 'mail workflows list' to see available workflows."),
        GmailError::InvalidStyleName(_) | GmailError::NotFound(_) => Some("Run 'mail styles list' to see available styles."),
        GmailError::TokenExpired => Some("The session has expired. Run 'mail workflows start <name>' again."),
        GmailError::NotAuthorized(_) | GmailError::AuthError(_) => Some("Re-run 'mail verify' to refresh your Gmail credentials."),
        GmailError::RateLimitExceeded { .. } | GmailError::RateLimitError(_) | GmailError::ServerError { .. } => {
            Some("This looks transient. Wait a moment and try again.")
        }
        _ => None,
    }
}

/// Merges `"success": true` into a JSON-serializable value's top-level
/// object, matching spec §6.3's flat response shape for `start`/`continue`
/// and reused for every other command's JSON envelope.
fn ok_envelope<T: Serialize>(value: &T) -> Value {
    let mut v = serde_json::to_value(value).unwrap_or(Value::Null);
    match v {
        Value::Object(ref mut map) => {
            map.insert("success".to_string(), Value::Bool(true));
        }
        _ => {
            v = json!({"success": true, "result": v});
        }
    }
    v
}

fn print_json<T: Serialize>(value: &T) {
    println!("{}", serde_json::to_string_pretty(&ok_envelope(value)).unwrap_or_default());
}

struct App {
    env: Env,
    adapter: Arc<dyn GmailAdapter>,
    groups: Arc<GroupStore>,
    styles: Arc<StyleStore>,
    composer: Arc<Composer>,
    engine: WorkflowEngine,
    workflows: WorkflowStore,
    output: OutputFormat,
}

async fn run(cli: Cli, output: OutputFormat) -> mail::Result<()> {
    let env = Env::discover()?;
    env.ensure_dirs().await?;
    let config = Config::load(&env.config_path()).await?;

    let session = GmailSession::connect(&env).await?;
    let adapter: Arc<dyn GmailAdapter> = Arc::new(ProductionGmailAdapter::new(session.hub, &config));

    let groups = Arc::new(GroupStore::new(env.groups_path()));
    let styles = Arc::new(StyleStore::new(env.styles_dir()));
    let workflows = WorkflowStore::new(env.workflows_path());

    let from_address = adapter.get_profile_email().await?;
    let confirmer: Arc<dyn Confirmer> = Arc::new(StdinConfirmer);
    let composer = Arc::new(Composer::new(
        adapter.clone(),
        groups.clone(),
        styles.clone(),
        confirmer,
        from_address,
        config.compose.max_attachment_bytes,
    ));
    let sender: Arc<dyn Sender> = composer.clone();
    let engine = WorkflowEngine::new(
        adapter.clone(),
        sender,
        env.workflow_states_dir(),
        Duration::from_secs(config.workflow.ttl_secs),
    );

    let app = App {
        env,
        adapter,
        groups,
        styles,
        composer,
        engine,
        workflows,
        output,
    };

    dispatch(app, cli.command).await
}

async fn dispatch(app: App, command: Commands) -> mail::Result<()> {
    match command {
        Commands::Verify => cmd_verify(&app).await,
        Commands::Status => cmd_status(&app).await,
        Commands::List { folder, max, page_token } => cmd_list(&app, folder, max, page_token).await,
        Commands::Read { message_id, format } => cmd_read(&app, &message_id, format).await,
        Commands::Thread { message_id } => cmd_thread(&app, &message_id).await,
        Commands::Search { query, max } => cmd_search(&app, &query, max).await,
        Commands::Send {
            to,
            cc,
            bcc,
            subject,
            body,
            attachment,
            style,
            dry_run,
            force,
            yolo,
        } => {
            cmd_send(
                &app,
                ComposeRequest {
                    to,
                    cc,
                    bcc,
                    subject,
                    body,
                    style_name: style,
                    attachment_paths: attachment,
                    dry_run,
                    force,
                    yolo,
                },
            )
            .await
        }
        Commands::Reply { message_id, body, yolo } => cmd_reply(&app, &message_id, &body, yolo).await,
        Commands::Groups { command } => cmd_groups(&app, command).await,
        Commands::Styles { command } => cmd_styles(&app, command).await,
        Commands::Workflows { command } => cmd_workflows(&app, command).await,
    }
}

async fn cmd_verify(app: &App) -> mail::Result<()> {
    let email = app.adapter.get_profile_email().await?;
    match app.output {
        OutputFormat::Json => print_json(&json!({"email": email})),
        OutputFormat::Rich => println!("Connected as {}", email),
    }
    Ok(())
}

async fn cmd_status(app: &App) -> mail::Result<()> {
    let groups = app.groups.list().await?;
    let styles = app.styles.list().await?;
    let workflows = app.workflows.list().await?;
    let open_sessions = count_open_sessions(&app.env).await;

    match app.output {
        OutputFormat::Json => print_json(&json!({
            "config_root": app.env.root,
            "groups": groups.len(),
            "styles": styles.len(),
            "workflows": workflows.len(),
            "open_workflow_sessions": open_sessions,
        })),
        OutputFormat::Rich => {
            println!("Config root: {:?}", app.env.root);
            println!("Groups: {}", groups.len());
            println!("Styles: {}", styles.len());
            println!("Saved workflows: {}", workflows.len());
            println!("Open workflow sessions: {}", open_sessions);
        }
    }
    Ok(())
}

async fn count_open_sessions(env: &Env) -> usize {
    let dir = env.workflow_states_dir();
    let mut count = 0;
    if let Ok(mut entries) = tokio::fs::read_dir(&dir).await {
        while let Ok(Some(entry)) = entries.next_entry().await {
            if entry.path().extension().and_then(|e| e.to_str()) == Some("json") {
                count += 1;
            }
        }
    }
    count
}

async fn cmd_list(app: &App, folder: Option<String>, max: u32, page_token: Option<String>) -> mail::Result<()> {
    let query = folder.map(|f| format!("in:{}", f)).unwrap_or_default();
    let (ids, next_page_token) = fetch_ids_with_progress(app, &query, page_token, max).await?;
    let summaries = app.adapter.batch_get_summaries(&ids, 8).await?;
    match app.output {
        OutputFormat::Json => print_json(&json!({"messages": summaries, "next_page_token": next_page_token})),
        OutputFormat::Rich => print_summary_table(&summaries),
    }
    Ok(())
}

async fn cmd_search(app: &App, query: &str, max: u32) -> mail::Result<()> {
    let (ids, next_page_token) = fetch_ids_with_progress(app, query, None, max).await?;
    let summaries = app.adapter.batch_get_summaries(&ids, 8).await?;
    match app.output {
        OutputFormat::Json => print_json(&json!({"messages": summaries, "next_page_token": next_page_token})),
        OutputFormat::Rich => print_summary_table(&summaries),
    }
    Ok(())
}

/// `--output-format json` callers never construct a [`ProgressReporter`]; rich
/// mode gets a spinner over the single `listIds` call, matching the teacher's
/// spinner-per-network-call convention.
async fn fetch_ids_with_progress(
    app: &App,
    query: &str,
    page_token: Option<String>,
    max: u32,
) -> mail::Result<(Vec<MessageId>, Option<String>)> {
    match app.output {
        OutputFormat::Json => app.adapter.list_ids(query, page_token.as_deref(), max).await,
        OutputFormat::Rich => {
            let reporter = ProgressReporter::new();
            let spinner = reporter.add_spinner("Fetching messages...");
            let result = app.adapter.list_ids(query, page_token.as_deref(), max).await;
            reporter.finish_spinner(&spinner, "Fetched");
            result
        }
    }
}

fn print_summary_table(summaries: &[mail::Summary]) {
    if summaries.is_empty() {
        println!("No messages.");
        return;
    }
    for s in summaries {
        let flag = if s.is_unread { "*" } else { " " };
        println!("{} {:<20} {:<40} {}", flag, s.id.0, truncate(&s.from.to_string(), 40), truncate(&s.subject, 60));
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        format!("{}...", s.chars().take(max.saturating_sub(3)).collect::<String>())
    }
}

async fn cmd_read(app: &App, message_id: &str, format: ReadFormat) -> mail::Result<()> {
    let id = MessageId(message_id.to_string());
    match format {
        ReadFormat::Summary => {
            let summary = app.adapter.get_summary(&id).await?;
            match app.output {
                OutputFormat::Json => print_json(&summary),
                OutputFormat::Rich => print_summary_rich(&summary),
            }
        }
        ReadFormat::Full => {
            let full = app.adapter.get_full(&id).await?;
            match app.output {
                OutputFormat::Json => print_json(&full),
                OutputFormat::Rich => print_full_rich(&full),
            }
        }
    }
    Ok(())
}

fn print_summary_rich(s: &mail::Summary) {
    println!("From:    {}", s.from);
    println!("Subject: {}", s.subject);
    println!("Date:    {}", s.date);
    println!("Snippet: {}", s.snippet);
    if s.has_attachment {
        println!("(has attachment)");
    }
}

fn print_full_rich(f: &mail::Full) {
    println!("From:    {}", f.from);
    println!("To:      {}", f.to.iter().map(|a| a.to_string()).collect::<Vec<_>>().join(", "));
    if !f.cc.is_empty() {
        println!("Cc:      {}", f.cc.iter().map(|a| a.to_string()).collect::<Vec<_>>().join(", "));
    }
    println!("Subject: {}", f.subject);
    println!("Date:    {}", f.date);
    println!();
    println!("{}", f.body_text);
    if !f.attachments.is_empty() {
        println!();
        println!("Attachments:");
        for a in &f.attachments {
            println!("  - {} ({}, {} bytes)", a.filename, a.mime_type, a.size);
        }
    }
    for w in &f.warnings {
        println!("warning: {}", w);
    }
}

async fn cmd_thread(app: &App, message_id: &str) -> mail::Result<()> {
    let id = MessageId(message_id.to_string());
    let messages = app.adapter.get_thread(&id).await?;
    match app.output {
        OutputFormat::Json => print_json(&json!({"messages": messages})),
        OutputFormat::Rich => print_summary_table(&messages),
    }
    Ok(())
}

async fn cmd_send(app: &App, req: ComposeRequest) -> mail::Result<()> {
    let outcome = app.composer.compose(req).await?;
    match app.output {
        OutputFormat::Json => print_json(&compose_outcome_json(&outcome)),
        OutputFormat::Rich => print_compose_outcome_rich(&outcome),
    }
    Ok(())
}

fn compose_outcome_json(outcome: &ComposeOutcome) -> Value {
    match outcome {
        ComposeOutcome::DryRun(preview) => json!({"status": "dry_run", "preview": preview_json(preview)}),
        ComposeOutcome::Cancelled(preview) => json!({"status": "cancelled", "preview": preview_json(preview)}),
        ComposeOutcome::Sent { message_id, thread_id, preview } => json!({
            "status": "sent",
            "message_id": message_id.0,
            "thread_id": thread_id.as_ref().map(|t| t.0.clone()),
            "preview": preview_json(preview),
        }),
    }
}

fn preview_json(preview: &mail::compose::Preview) -> Value {
    json!({
        "to": preview.to.iter().map(|a| a.to_string()).collect::<Vec<_>>(),
        "cc": preview.cc.iter().map(|a| a.to_string()).collect::<Vec<_>>(),
        "bcc": preview.bcc.iter().map(|a| a.to_string()).collect::<Vec<_>>(),
        "subject": preview.subject,
        "body": preview.body,
        "style": preview.style.as_ref().map(|s| &s.name),
        "attachments": preview.attachment_filenames,
    })
}

fn print_compose_outcome_rich(outcome: &ComposeOutcome) {
    match outcome {
        ComposeOutcome::DryRun(preview) => {
            println!("Dry run; nothing sent.");
            print_preview_rich(preview);
        }
        ComposeOutcome::Cancelled(preview) => {
            println!("Cancelled; nothing sent.");
            print_preview_rich(preview);
        }
        ComposeOutcome::Sent { message_id, thread_id, preview } => {
            print_preview_rich(preview);
            println!();
            println!("Sent. message_id={} thread_id={}", message_id.0, thread_id.as_ref().map(|t| t.0.as_str()).unwrap_or("?"));
        }
    }
}

fn print_preview_rich(preview: &mail::compose::Preview) {
    println!("To:      {}", preview.to.iter().map(|a| a.to_string()).collect::<Vec<_>>().join(", "));
    if !preview.cc.is_empty() {
        println!("Cc:      {}", preview.cc.iter().map(|a| a.to_string()).collect::<Vec<_>>().join(", "));
    }
    if !preview.bcc.is_empty() {
        println!("Bcc:     {}", preview.bcc.iter().map(|a| a.to_string()).collect::<Vec<_>>().join(", "));
    }
    println!("Subject: {}", preview.subject);
    if let Some(style) = &preview.style {
        println!("Style:   {} (guidance only, not auto-applied)", style.name);
    }
    println!();
    println!("{}", preview.body);
    if !preview.attachment_filenames.is_empty() {
        println!();
        println!("Attachments: {}", preview.attachment_filenames.join(", "));
    }
}

async fn cmd_reply(app: &App, message_id: &str, body: &str, yolo: bool) -> mail::Result<()> {
    let id = MessageId(message_id.to_string());
    let full = app.adapter.get_full(&id).await?;

    if !yolo {
        let confirmer = StdinConfirmer;
        let decision = confirmer.confirm(&format!("Send this reply to {}?", full.from)).await;
        if decision == Decision::No {
            return Err(GmailError::OperationCancelled("reply not sent".to_string()));
        }
    }

    let reply_id = client::send_reply(app.adapter.as_ref(), &full, app_from_address(app), body, Vec::new()).await?;
    match app.output {
        OutputFormat::Json => print_json(&json!({"message_id": reply_id.0})),
        OutputFormat::Rich => println!("Sent reply. message_id={}", reply_id.0),
    }
    Ok(())
}

/// `Composer` doesn't expose `from_address` directly; every outbound send
/// routes through it, so reuse its copy rather than re-fetching the profile.
fn app_from_address(app: &App) -> &str {
    app.composer.from_address()
}

async fn cmd_groups(app: &App, command: GroupsCommand) -> mail::Result<()> {
    match command {
        GroupsCommand::List => {
            let names = app.groups.list().await?;
            match app.output {
                OutputFormat::Json => print_json(&json!({"groups": names})),
                OutputFormat::Rich => names.iter().for_each(|n| println!("{}", n)),
            }
        }
        GroupsCommand::Show { name } => {
            let members = app.groups.get(&name).await?;
            let emails: Vec<String> = members.iter().map(|a| a.to_string()).collect();
            match app.output {
                OutputFormat::Json => print_json(&json!({"name": name, "members": emails})),
                OutputFormat::Rich => {
                    println!("{}:", name);
                    emails.iter().for_each(|e| println!("  {}", e));
                }
            }
        }
        GroupsCommand::Create { name, emails, json_input_path, force: _ } => {
            let mut raw = emails;
            if let Some(path) = json_input_path {
                let content = tokio::fs::read_to_string(&path)
                    .await
                    .map_err(|e| GmailError::FilesystemError(format!("reading {:?}: {}", path, e)))?;
                let extra: Vec<String> = serde_json::from_str(&content)?;
                raw.extend(extra);
            }
            let members: Vec<Address> = raw.iter().map(|s| Address::parse(s)).collect::<mail::Result<_>>()?;
            app.groups.create(&name, &members).await?;
            report_ok(app, &format!("Created group '{}' with {} member(s).", name, members.len()));
        }
        GroupsCommand::Add { name, email } => {
            let addr = Address::parse(&email)?;
            app.groups.add_member(&name, &addr).await?;
            report_ok(app, &format!("Added {} to '{}'.", addr, name));
        }
        GroupsCommand::Remove { name, email, force: _ } => {
            let addr = Address::parse(&email)?;
            app.groups.remove_member(&name, &addr).await?;
            report_ok(app, &format!("Removed {} from '{}'.", addr, name));
        }
        GroupsCommand::Delete { name, force: _ } => {
            app.groups.delete(&name).await?;
            report_ok(app, &format!("Deleted group '{}'.", name));
        }
        GroupsCommand::Validate { name } => {
            let reports = app.groups.validate(name.as_deref()).await?;
            match app.output {
                OutputFormat::Json => print_json(&json!({
                    "groups": reports.iter().map(|r| json!({
                        "name": r.name,
                        "ok": r.ok(),
                        "malformed_addresses": r.malformed_addresses,
                        "duplicate_addresses": r.duplicate_addresses,
                    })).collect::<Vec<_>>()
                })),
                OutputFormat::Rich => {
                    for r in &reports {
                        if r.ok() {
                            println!("{}: ok", r.name);
                        } else {
                            println!("{}: FAILED", r.name);
                            r.malformed_addresses.iter().for_each(|a| println!("  malformed: {}", a));
                            r.duplicate_addresses.iter().for_each(|a| println!("  duplicate: {}", a));
                        }
                    }
                }
            }
        }
    }
    Ok(())
}

async fn cmd_styles(app: &App, command: StylesCommand) -> mail::Result<()> {
    match command {
        StylesCommand::List => {
            let names = app.styles.list().await?;
            match app.output {
                OutputFormat::Json => print_json(&json!({"styles": names})),
                OutputFormat::Rich => names.iter().for_each(|n| println!("{}", n)),
            }
        }
        StylesCommand::Show { name } => {
            let style = app.styles.show(&name).await?;
            match app.output {
                OutputFormat::Json => print_json(&json!({"name": style.name, "content": style.raw})),
                OutputFormat::Rich => println!("{}", style.raw),
            }
        }
        StylesCommand::Create { name, skip_validation } => {
            let report = app.styles.create(&name, skip_validation).await?;
            match app.output {
                OutputFormat::Json => print_json(&report),
                OutputFormat::Rich => println!("Created style '{}' ({} issue(s)).", name, report.errors.len()),
            }
        }
        StylesCommand::Edit { name, skip_validation } => {
            edit_style(app, &name, skip_validation).await?;
        }
        StylesCommand::Delete { name, force: _ } => {
            app.styles.delete(&name).await?;
            report_ok(app, &format!("Deleted style '{}'.", name));
        }
        StylesCommand::Validate { name, fix } => {
            let report = app.styles.validate(&name, fix).await?;
            match app.output {
                OutputFormat::Json => print_json(&report),
                OutputFormat::Rich => print_validation_report_rich(&name, &report),
            }
        }
        StylesCommand::ValidateAll { fix } => {
            let reports = app.styles.validate_all(fix).await?;
            match app.output {
                OutputFormat::Json => print_json(&json!({
                    "styles": reports.iter().map(|(n, r)| json!({"name": n, "ok": r.ok(), "errors": r.errors})).collect::<Vec<_>>()
                })),
                OutputFormat::Rich => reports.iter().for_each(|(n, r)| print_validation_report_rich(n, r)),
            }
        }
    }
    Ok(())
}

fn print_validation_report_rich(name: &str, report: &mail::ValidationReport) {
    if report.ok() {
        println!("{}: ok", name);
    } else {
        println!("{}: {} issue(s)", name, report.errors.len());
        report.errors.iter().for_each(|e| println!("  {}", e));
    }
    if let Some(fixed) = &report.fixed {
        let _ = fixed;
        println!("  (auto-fixed and saved)");
    }
}

/// Opens `$EDITOR` (falling back to `vi`) on the style's file, then re-lints
/// the result. Mirrors the teacher's external-process confirmation pattern,
/// generalized from a blocking stdin read to a blocking child process.
async fn edit_style(app: &App, name: &str, skip_validation: bool) -> mail::Result<()> {
    app.styles.show(name).await?;
    let path = app.env.styles_dir().join(format!("{}.md", name));
    let editor = std::env::var("EDITOR").unwrap_or_else(|_| "vi".to_string());

    let status = std::process::Command::new(&editor)
        .arg(&path)
        .status()
        .map_err(|e| GmailError::FilesystemError(format!("launching editor {:?}: {}", editor, e)))?;
    if !status.success() {
        return Err(GmailError::ValidationError(format!("editor {:?} exited with {:?}", editor, status.code())));
    }

    let edited = tokio::fs::read_to_string(&path)
        .await
        .map_err(|e| GmailError::FilesystemError(format!("reading {:?}: {}", path, e)))?;
    let report = app.styles.save(name, &edited, skip_validation).await?;
    match app.output {
        OutputFormat::Json => print_json(&report),
        OutputFormat::Rich => print_validation_report_rich(name, &report),
    }
    Ok(())
}

fn report_ok(app: &App, message: &str) {
    match app.output {
        OutputFormat::Json => print_json(&json!({})),
        OutputFormat::Rich => println!("{}", message),
    }
}

async fn cmd_workflows(app: &App, command: WorkflowsCommand) -> mail::Result<()> {
    match command {
        WorkflowsCommand::List => {
            let names = app.workflows.list().await?;
            match app.output {
                OutputFormat::Json => print_json(&json!({"workflows": names})),
                OutputFormat::Rich => names.iter().for_each(|n| println!("{}", n)),
            }
        }
        WorkflowsCommand::Show { name } => {
            let def = app.workflows.show(&name).await?;
            match app.output {
                OutputFormat::Json => print_json(&def),
                OutputFormat::Rich => {
                    println!("{}", def.name);
                    println!("  query: {}", def.query);
                    println!("  auto_mark_read: {}", def.auto_mark_read);
                    if let Some(d) = &def.description {
                        println!("  description: {}", d);
                    }
                }
            }
        }
        WorkflowsCommand::Create { name, query, auto_mark_read, description } => {
            app.workflows.create(&name, &query, auto_mark_read, description).await?;
            report_ok(app, &format!("Created workflow '{}'.", name));
        }
        WorkflowsCommand::Delete { name } => {
            app.workflows.delete(&name).await?;
            report_ok(app, &format!("Deleted workflow '{}'.", name));
        }
        WorkflowsCommand::Start { name } => {
            let resp = app.engine.start(&app.workflows, &name).await?;
            match app.output {
                OutputFormat::Json => print_json(&resp),
                OutputFormat::Rich => {
                    println!("token: {}", resp.token);
                    println!("progress: {}/{}", resp.progress.processed, resp.progress.total);
                    match &resp.email {
                        Some(s) => print_summary_rich(s),
                        None => println!("(no messages matched the query)"),
                    }
                }
            }
        }
        WorkflowsCommand::Continue { token, action, body } => {
            let action = parse_action(action, body)?;
            let resp = app.engine.continue_workflow(&token, action).await?;
            match app.output {
                OutputFormat::Json => print_json(&resp),
                OutputFormat::Rich => print_continue_response_rich(&resp),
            }
        }
        WorkflowsCommand::Run { name } => run_workflow_interactive(app, &name).await?,
        WorkflowsCommand::Cleanup => {
            let removed = app.engine.cleanup().await?;
            match app.output {
                OutputFormat::Json => print_json(&json!({"removed": removed})),
                OutputFormat::Rich => println!("Removed {} expired/unreadable session(s).", removed),
            }
        }
    }
    Ok(())
}

fn parse_action(action: ActionArg, body: Option<String>) -> mail::Result<Action> {
    match action {
        ActionArg::View => Ok(Action::View),
        ActionArg::Archive => Ok(Action::Archive),
        ActionArg::Skip => Ok(Action::Skip),
        ActionArg::Quit => Ok(Action::Quit),
        ActionArg::Reply => {
            let body = body.ok_or_else(|| GmailError::UsageError("reply requires --body".to_string()))?;
            Ok(Action::Reply { body })
        }
    }
}

fn print_continue_response_rich(resp: &mail::workflow::ContinueResponse) {
    if let Some(result) = &resp.action_result {
        if result.ok {
            println!("{} {}: ok", result.action, result.id.0);
        } else {
            println!("{} {}: FAILED ({})", result.action, result.id.0, result.error.as_deref().unwrap_or(""));
        }
    }
    println!("progress: {}/{}", resp.progress.processed, resp.progress.total);
    match &resp.email {
        ContinueEmail::Summary(Some(s)) => print_summary_rich(s),
        ContinueEmail::Summary(None) => println!("(drained)"),
        ContinueEmail::Full(f) => print_full_rich(f),
    }
    if resp.terminated {
        println!("(session terminated)");
    }
}

/// Interactive driver over `start`/`continue` for a terminal session. Not
/// part of the stable JSON contract; always renders rich text.
async fn run_workflow_interactive(app: &App, name: &str) -> mail::Result<()> {
    let start = app.engine.start(&app.workflows, name).await?;
    println!("Started '{}'. token={}", name, start.token);
    if start.completed {
        println!("No messages matched the query.");
        return Ok(());
    }
    if let Some(s) = &start.email {
        print_summary_rich(s);
    }

    let token = start.token;
    loop {
        print!("\n[v]iew [a]rchive [s]kip [r]eply [q]uit > ");
        std::io::stdout().flush().ok();
        let mut input = String::new();
        if std::io::stdin().read_line(&mut input).unwrap_or(0) == 0 {
            break;
        }
        let action = match input.trim().to_lowercase().as_str() {
            "v" | "view" => Action::View,
            "a" | "archive" => Action::Archive,
            "s" | "skip" => Action::Skip,
            "q" | "quit" => Action::Quit,
            "r" | "reply" => {
                print!("body> ");
                std::io::stdout().flush().ok();
                let mut body = String::new();
                std::io::stdin().read_line(&mut body).ok();
                Action::Reply { body: body.trim().to_string() }
            }
            _ => {
                println!("unrecognized action");
                continue;
            }
        };

        let resp = app.engine.continue_workflow(&token, action).await?;
        print_continue_response_rich(&resp);
        if resp.completed || resp.terminated {
            break;
        }
    }
    Ok(())
}
