//! Scenario 5 (style lint auto-fix) and a workflow definition → session
//! round trip exercised through `WorkflowStore`/`WorkflowEngine` together,
//! complementing the per-module unit tests with a cross-store integration
//! pass.

mod common;

use std::sync::Arc;
use std::time::Duration;

use mail::styles::StyleStore;
use mail::workflow::{Action, ContinueEmail, Sender, WorkflowEngine, WorkflowStore};
use tempfile::TempDir;

use common::FakeAdapter;

const VALID_STYLE: &str = "---\nname: friendly\ndescription: When to use: replying to a casual internal teammate message\n---\n<examples>\nHi there, thanks for the update!   \n</examples>\n<greeting>\n- \"Hi,\"\n</greeting>\n<body>\nKeep it short.   \n</body>\n<closing>\n- \"Thanks,\"\n</closing>\n<do>\n- Be concise\n</do>\n<dont>\n-Skip the greeting\n</dont>\n";

struct NoopSender;

#[async_trait::async_trait]
impl Sender for NoopSender {
    async fn send_reply(&self, original_id: &mail::models::MessageId, _body: &str) -> mail::Result<mail::models::MessageId> {
        Ok(original_id.clone())
    }
}

#[tokio::test]
async fn style_validate_with_fix_strips_whitespace_and_normalizes_bullets_only() {
    let dir = TempDir::new().unwrap();
    let store = StyleStore::new(dir.path().join("email-styles"));
    tokio::fs::create_dir_all(dir.path().join("email-styles")).await.unwrap();
    tokio::fs::write(dir.path().join("email-styles/friendly.md"), VALID_STYLE).await.unwrap();

    let before = store.validate("friendly", false).await.unwrap();
    assert!(!before.ok());
    assert!(before.errors.iter().any(|e| e.rule == "W001"));
    assert!(before.errors.iter().any(|e| e.rule == "C003"));

    let fixed = store.validate("friendly", true).await.unwrap();
    assert!(fixed.fixed.is_some());

    let after = store.validate("friendly", false).await.unwrap();
    assert!(after.ok(), "auto-fix must converge to a valid document: {:?}", after.errors);

    // Auto-fix only ever touches whitespace/bullet-spacing; the prose content survives.
    let persisted = tokio::fs::read_to_string(dir.path().join("email-styles/friendly.md")).await.unwrap();
    assert!(persisted.contains("Keep it short."));
    assert!(persisted.contains("- Skip the greeting"));
}

#[tokio::test]
async fn style_missing_one_section_fails_with_single_s001() {
    let dir = TempDir::new().unwrap();
    let store = StyleStore::new(dir.path().join("email-styles"));
    tokio::fs::create_dir_all(dir.path().join("email-styles")).await.unwrap();
    let missing_closing = "---\nname: terse\ndescription: When to use: short acknowledgements only, nothing else\n---\n<examples>\nGot it, thanks.\n</examples>\n<greeting>\n- \"Hi,\"\n</greeting>\n<body>\nOne line only.\n</body>\n<do>\n- Be brief\n</do>\n<dont>\n- Ramble\n</dont>\n";
    tokio::fs::write(dir.path().join("email-styles/terse.md"), missing_closing).await.unwrap();

    let report = store.validate("terse", false).await.unwrap();
    assert!(!report.ok());
    let s001: Vec<_> = report.errors.iter().filter(|e| e.rule == "S001").collect();
    assert_eq!(s001.len(), 1);
    assert!(s001[0].message.contains("closing"));
    assert!(report.fixed.is_none());
}

#[tokio::test]
async fn workflow_definition_persists_across_store_instances_and_drives_a_session() {
    let dir = TempDir::new().unwrap();
    let workflows_path = dir.path().join("workflows.yaml");

    // Simulate two separate CLI invocations: `workflows create`, then `workflows start`.
    {
        let store = WorkflowStore::new(&workflows_path);
        store
            .create("inbox-triage", "is:unread", true, Some("daily triage".to_string()))
            .await
            .unwrap();
    }

    let store = WorkflowStore::new(&workflows_path);
    let def = store.show("inbox-triage").await.unwrap();
    assert_eq!(def.query, "is:unread");
    assert!(def.auto_mark_read);

    let adapter = Arc::new(FakeAdapter::new(&["m1", "m2"]));
    let engine = WorkflowEngine::new(
        adapter.clone() as Arc<dyn mail::client::GmailAdapter>,
        Arc::new(NoopSender),
        dir.path().join("workflow-states"),
        Duration::from_secs(3600),
    );

    let start = engine.start(&store, "inbox-triage").await.unwrap();
    assert_eq!(start.progress.total, 2);

    // auto_mark_read=true means `skip` still issues a label removal call.
    let result = engine.continue_workflow(&start.token, Action::Skip).await.unwrap();
    assert!(matches!(result.email, ContinueEmail::Summary(Some(_))));
    let applied = adapter.applied.lock().unwrap();
    assert_eq!(applied.len(), 1);
    assert_eq!(applied[0].1.remove_labels, vec!["UNREAD".to_string()]);
}
