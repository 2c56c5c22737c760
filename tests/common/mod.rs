//! Shared fixtures for cross-module integration tests: a fake `GmailAdapter`
//! the workflow/composer integration tests drive instead of real Gmail,
//! mirroring the teacher's `tests/common/mod.rs` mock-fixture convention.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use mail::client::{ActionSpec, GmailAdapter, LabelHeader};
use mail::error::Result;
use mail::models::{Address, Full, MessageId, Summary};

pub struct FakeAdapter {
    pub messages: Vec<MessageId>,
    pub sent: Mutex<Vec<Vec<u8>>>,
    pub applied: Mutex<Vec<(MessageId, ActionSpec)>>,
}

impl FakeAdapter {
    pub fn new(ids: &[&str]) -> Self {
        Self {
            messages: ids.iter().map(|s| MessageId(s.to_string())).collect(),
            sent: Mutex::new(Vec::new()),
            applied: Mutex::new(Vec::new()),
        }
    }

    pub fn summary_for(id: &MessageId) -> Summary {
        Summary {
            id: id.clone(),
            thread_id: mail::models::ThreadId(format!("thread-{}", id.0)),
            from: Address::parse("sender@example.com").unwrap(),
            to: vec![Address::parse("me@example.com").unwrap()],
            cc: vec![],
            subject: "subject".to_string(),
            date: Utc::now(),
            snippet: "snippet".to_string(),
            label_ids: vec!["INBOX".to_string(), "UNREAD".to_string()],
            is_unread: true,
            is_important: false,
            has_attachment: false,
            size_estimate: 256,
        }
    }
}

#[async_trait]
impl GmailAdapter for FakeAdapter {
    async fn list_ids(&self, _query: &str, _page_token: Option<&str>, _max: u32) -> Result<(Vec<MessageId>, Option<String>)> {
        Ok((self.messages.clone(), None))
    }

    async fn get_summary(&self, id: &MessageId) -> Result<Summary> {
        Ok(Self::summary_for(id))
    }

    async fn get_full(&self, id: &MessageId) -> Result<Full> {
        let s = Self::summary_for(id);
        Ok(Full {
            id: s.id,
            thread_id: s.thread_id,
            from: s.from,
            to: s.to,
            cc: s.cc,
            subject: s.subject,
            date: s.date,
            body_text: "hello".to_string(),
            body_html: String::new(),
            headers: vec![],
            attachments: vec![],
            warnings: vec![],
        })
    }

    async fn batch_get_summaries(&self, ids: &[MessageId], _concurrency: usize) -> Result<Vec<Summary>> {
        Ok(ids.iter().map(Self::summary_for).collect())
    }

    async fn apply_action(&self, id: &MessageId, spec: &ActionSpec) -> Result<()> {
        self.applied.lock().unwrap().push((id.clone(), spec.clone()));
        Ok(())
    }

    async fn send_mime(&self, bytes: Vec<u8>) -> Result<MessageId> {
        self.sent.lock().unwrap().push(bytes);
        Ok(MessageId("sent-message".to_string()))
    }

    async fn label_counts(&self) -> Result<Vec<(LabelHeader, u64, u64)>> {
        Ok(vec![])
    }

    async fn get_thread(&self, id: &MessageId) -> Result<Vec<Summary>> {
        Ok(vec![Self::summary_for(id)])
    }

    async fn get_profile_email(&self) -> Result<String> {
        Ok("me@example.com".to_string())
    }
}
