//! The Gmail Adapter: a thin capability shim over the Gmail REST surface.
//! Parses raw API payloads into the read model (via `mime.rs`), normalizes
//! label IDs, batches fetches, and handles pagination. Generalized from the
//! teacher's `GmailClient`/`ProductionGmailClient` — same rate-limiter,
//! circuit-breaker, and exponential-backoff composition, retargeted at the
//! adapter operations the workflow engine and composer depend on instead of
//! the teacher's classification/filter-management surface.

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use futures::stream::{self, StreamExt};
use google_gmail1::{api::Message, api::ModifyMessageRequest, hyper_rustls, hyper_util, Gmail};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::circuit_breaker::CircuitBreaker;
use crate::config::{CircuitBreakerConfig, Config};
use crate::error::{GmailError, Result};
use crate::mime::{self, MimeAttachment};
use crate::models::{Full, LabelId, MessageId, Summary};
use crate::rate_limiter::{QuotaCost, QuotaRateLimiter};

/// A Gmail label's id/name pair, as returned by `listLabels`.
#[derive(Debug, Clone)]
pub struct LabelHeader {
    pub id: String,
    pub name: String,
}

/// What to change on a message in one call, per spec's `applyAction` contract.
#[derive(Debug, Clone, Default)]
pub struct ActionSpec {
    pub add_labels: Vec<LabelId>,
    pub remove_labels: Vec<LabelId>,
}

pub type GmailHub = Gmail<hyper_rustls::HttpsConnector<hyper_util::client::legacy::connect::HttpConnector>>;

/// The Gmail Adapter contract (spec §4.1). Implementations MUST satisfy the
/// `labelCounts` "no shortcuts" rule: never read `messagesTotal` off a
/// `listLabels` entry, always issue a per-label `getLabel` call.
#[async_trait]
pub trait GmailAdapter: Send + Sync {
    async fn list_ids(
        &self,
        query: &str,
        page_token: Option<&str>,
        max: u32,
    ) -> Result<(Vec<MessageId>, Option<String>)>;

    async fn get_summary(&self, id: &MessageId) -> Result<Summary>;

    async fn get_full(&self, id: &MessageId) -> Result<Full>;

    async fn batch_get_summaries(&self, ids: &[MessageId], concurrency: usize) -> Result<Vec<Summary>>;

    async fn apply_action(&self, id: &MessageId, spec: &ActionSpec) -> Result<()>;

    async fn send_mime(&self, bytes: Vec<u8>) -> Result<MessageId>;

    async fn label_counts(&self) -> Result<Vec<(LabelHeader, u64, u64)>>;

    /// `getThread(id) -> [Message]`, projected to `Summary`. Backs `mail thread`.
    async fn get_thread(&self, id: &MessageId) -> Result<Vec<Summary>>;

    /// Supplemented beyond the distilled spec: backs `mail verify`.
    async fn get_profile_email(&self) -> Result<String>;
}

/// Production adapter: real Gmail API calls behind a circuit breaker, a
/// quota-aware rate limiter, and jittered exponential backoff.
pub struct ProductionGmailAdapter {
    hub: GmailHub,
    rate_limiter: QuotaRateLimiter,
    circuit_breaker: CircuitBreaker,
    retry_attempts: u32,
    request_timeout: Duration,
    query_max_len: usize,
}

impl ProductionGmailAdapter {
    pub fn new(hub: GmailHub, config: &Config) -> Self {
        Self {
            hub,
            rate_limiter: QuotaRateLimiter::new(),
            circuit_breaker: CircuitBreaker::new(config.circuit_breaker.clone()),
            retry_attempts: config.execution.retry_attempts,
            request_timeout: Duration::from_secs(config.execution.request_timeout_secs),
            query_max_len: config.compose.query_max_len,
        }
    }

    #[cfg(test)]
    pub fn with_defaults(hub: GmailHub) -> Self {
        Self {
            hub,
            rate_limiter: QuotaRateLimiter::new(),
            circuit_breaker: CircuitBreaker::new(CircuitBreakerConfig {
                enabled: false,
                failure_threshold: 5,
                reset_timeout_secs: 60,
            }),
            retry_attempts: 5,
            request_timeout: Duration::from_secs(30),
            query_max_len: 500,
        }
    }

    /// Runs `op` under the circuit breaker and rate limiter, retrying
    /// transient failures with jittered exponential backoff honoring
    /// `Retry-After`, up to `retry_attempts`.
    async fn with_resilience<T, F, Fut>(&self, cost: QuotaCost, op_name: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        self.circuit_breaker.check_request().await?;
        let _permit = self.rate_limiter.acquire(cost).await;

        let mut attempt = 0u32;
        let mut delay = Duration::from_millis(250);

        loop {
            attempt += 1;
            let result = tokio::time::timeout(self.request_timeout, op()).await;

            let outcome = match result {
                Ok(inner) => inner,
                Err(_) => Err(GmailError::NetworkError(format!(
                    "{} timed out after {:?}",
                    op_name, self.request_timeout
                ))),
            };

            match outcome {
                Ok(value) => {
                    self.circuit_breaker.record_success().await;
                    return Ok(value);
                }
                Err(e) if e.is_transient() && attempt <= self.retry_attempts => {
                    self.circuit_breaker.record_failure(&e).await;
                    let retry_after = match &e {
                        GmailError::RateLimitExceeded { retry_after } => Some(Duration::from_secs(*retry_after)),
                        _ => None,
                    };
                    let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..250));
                    let sleep_for = retry_after.unwrap_or(delay) + jitter;
                    warn!(
                        "{} failed (attempt {}/{}): {}. Retrying in {:?}",
                        op_name,
                        attempt,
                        self.retry_attempts + 1,
                        e,
                        sleep_for
                    );
                    tokio::time::sleep(sleep_for).await;
                    delay = std::cmp::min(delay * 2, Duration::from_secs(30));
                }
                Err(e) => {
                    self.circuit_breaker.record_failure(&e).await;
                    return Err(e);
                }
            }
        }
    }
}

#[async_trait]
impl GmailAdapter for ProductionGmailAdapter {
    async fn list_ids(
        &self,
        query: &str,
        page_token: Option<&str>,
        max: u32,
    ) -> Result<(Vec<MessageId>, Option<String>)> {
        if query.len() > self.query_max_len {
            return Err(GmailError::QueryTooLarge {
                len: query.len(),
                limit: self.query_max_len,
            });
        }

        let query = query.to_string();
        let page_token = page_token.map(|s| s.to_string());
        self.with_resilience(QuotaCost::Read, "list_ids", || {
            let query = query.clone();
            let page_token = page_token.clone();
            async move {
                let mut call = self.hub.users().messages_list("me").q(&query).max_results(max as u32);
                if let Some(token) = page_token.as_ref() {
                    call = call.page_token(token);
                }
                let (_, response) = call
                    .add_scope("https://www.googleapis.com/auth/gmail.modify")
                    .doit()
                    .await?;

                let ids = response
                    .messages
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|m| m.id.map(MessageId))
                    .collect();
                Ok((ids, response.next_page_token))
            }
        })
        .await
    }

    async fn get_summary(&self, id: &MessageId) -> Result<Summary> {
        let id = id.clone();
        self.with_resilience(QuotaCost::Read, "get_summary", || {
            let id = id.clone();
            async move {
                let (_, msg) = self
                    .hub
                    .users()
                    .messages_get("me", &id.0)
                    .format("metadata")
                    .add_metadata_headers("From")
                    .add_metadata_headers("To")
                    .add_metadata_headers("Cc")
                    .add_metadata_headers("Subject")
                    .add_metadata_headers("Date")
                    .add_scope("https://www.googleapis.com/auth/gmail.modify")
                    .doit()
                    .await?;
                mime::parse_summary(&msg)
            }
        })
        .await
    }

    async fn get_full(&self, id: &MessageId) -> Result<Full> {
        let id = id.clone();
        self.with_resilience(QuotaCost::Read, "get_full", || {
            let id = id.clone();
            async move {
                let (_, msg) = self
                    .hub
                    .users()
                    .messages_get("me", &id.0)
                    .format("full")
                    .add_scope("https://www.googleapis.com/auth/gmail.modify")
                    .doit()
                    .await?;
                mime::parse_full(msg)
            }
        })
        .await
    }

    async fn batch_get_summaries(&self, ids: &[MessageId], concurrency: usize) -> Result<Vec<Summary>> {
        let indexed: Vec<(usize, MessageId)> = ids.iter().cloned().enumerate().collect();
        let mut results: Vec<Option<Summary>> = vec![None; ids.len()];

        let fetched: Vec<Result<(usize, Summary)>> = stream::iter(indexed)
            .map(|(idx, id)| async move {
                let summary = self.get_summary(&id).await?;
                Ok((idx, summary))
            })
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await;

        for item in fetched {
            let (idx, summary) = item?;
            results[idx] = Some(summary);
        }
        Ok(results.into_iter().map(|s| s.expect("every index fetched")).collect())
    }

    async fn apply_action(&self, id: &MessageId, spec: &ActionSpec) -> Result<()> {
        if spec.add_labels.is_empty() && spec.remove_labels.is_empty() {
            return Ok(());
        }
        let id = id.clone();
        let spec = spec.clone();
        self.with_resilience(QuotaCost::Write, "apply_action", || {
            let id = id.clone();
            let spec = spec.clone();
            async move {
                let request = ModifyMessageRequest {
                    add_label_ids: if spec.add_labels.is_empty() {
                        None
                    } else {
                        Some(spec.add_labels.clone())
                    },
                    remove_label_ids: if spec.remove_labels.is_empty() {
                        None
                    } else {
                        Some(spec.remove_labels.clone())
                    },
                };

                let (_, result) = self
                    .hub
                    .users()
                    .messages_modify(request, "me", &id.0)
                    .add_scope("https://www.googleapis.com/auth/gmail.modify")
                    .doit()
                    .await?;

                let resulting_labels = result.label_ids.unwrap_or_default();
                let added_missing = spec
                    .add_labels
                    .iter()
                    .any(|l| !resulting_labels.contains(l));
                let removed_present = spec
                    .remove_labels
                    .iter()
                    .any(|l| resulting_labels.contains(l));
                if added_missing || removed_present {
                    return Err(GmailError::LabelApplyFailed(format!(
                        "message {} did not reflect requested label change",
                        id
                    )));
                }
                Ok(())
            }
        })
        .await
    }

    async fn send_mime(&self, bytes: Vec<u8>) -> Result<MessageId> {
        let raw = URL_SAFE_NO_PAD.encode(&bytes);
        self.with_resilience(QuotaCost::Write, "send_mime", || {
            let raw = raw.clone();
            async move {
                let message = Message {
                    raw: Some(raw),
                    ..Default::default()
                };
                let (_, sent) = self
                    .hub
                    .users()
                    .messages_send(message, "me")
                    .add_scope("https://www.googleapis.com/auth/gmail.modify")
                    .doit()
                    .await?;
                sent.id
                    .map(MessageId)
                    .ok_or_else(|| GmailError::GmailClientError("send response missing message id".to_string()))
            }
        })
        .await
    }

    async fn label_counts(&self) -> Result<Vec<(LabelHeader, u64, u64)>> {
        let headers: Vec<LabelHeader> = self
            .with_resilience(QuotaCost::Read, "list_labels", || async {
                let (_, response) = self
                    .hub
                    .users()
                    .labels_list("me")
                    .add_scope("https://www.googleapis.com/auth/gmail.labels")
                    .doit()
                    .await?;
                Ok(response
                    .labels
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|l| match (l.id, l.name) {
                        (Some(id), Some(name)) => Some(LabelHeader { id, name }),
                        _ => None,
                    })
                    .collect())
            })
            .await?;

        let mut out = Vec::with_capacity(headers.len());
        for header in headers {
            let id = header.id.clone();
            let (total, unread) = self
                .with_resilience(QuotaCost::Read, "get_label", || {
                    let id = id.clone();
                    async move {
                        let (_, label) = self
                            .hub
                            .users()
                            .labels_get("me", &id)
                            .add_scope("https://www.googleapis.com/auth/gmail.labels")
                            .doit()
                            .await?;
                        Ok((
                            label.messages_total.unwrap_or(0) as u64,
                            label.messages_unread.unwrap_or(0) as u64,
                        ))
                    }
                })
                .await?;
            out.push((header, total, unread));
        }
        Ok(out)
    }

    async fn get_thread(&self, id: &MessageId) -> Result<Vec<Summary>> {
        let summary = self.get_summary(id).await?;
        let thread_id = summary.thread_id.0.clone();
        let messages = self
            .with_resilience(QuotaCost::Read, "get_thread", || {
                let thread_id = thread_id.clone();
                async move {
                    let (_, thread) = self
                        .hub
                        .users()
                        .threads_get("me", &thread_id)
                        .format("metadata")
                        .add_metadata_headers("From")
                        .add_metadata_headers("To")
                        .add_metadata_headers("Cc")
                        .add_metadata_headers("Subject")
                        .add_metadata_headers("Date")
                        .add_scope("https://www.googleapis.com/auth/gmail.modify")
                        .doit()
                        .await?;
                    Ok(thread.messages.unwrap_or_default())
                }
            })
            .await?;

        messages.iter().map(mime::parse_summary).collect()
    }

    async fn get_profile_email(&self) -> Result<String> {
        self.with_resilience(QuotaCost::Read, "get_profile", || async {
            let (_, profile) = self
                .hub
                .users()
                .get_profile("me")
                .add_scope("https://www.googleapis.com/auth/gmail.readonly")
                .doit()
                .await?;
            profile
                .email_address
                .ok_or_else(|| GmailError::GmailClientError("profile response missing email address".to_string()))
        })
        .await
    }
}

/// Build the raw MIME bytes for a reply and hand them to `send_mime`,
/// grounded on `mime::build_mime_bytes`/`mime::reply_subject`. Used by the
/// Workflow Engine's narrow `Sender` port (see `workflow.rs`) so the engine
/// never depends on the Composer directly.
pub async fn send_reply(
    adapter: &dyn GmailAdapter,
    original: &Full,
    from: &str,
    body: &str,
    attachments: Vec<MimeAttachment>,
) -> Result<MessageId> {
    let subject = mime::reply_subject(&original.subject);
    let in_reply_to = original.header("Message-Id").map(|s| s.to_string());
    let references = original.header("References").map(|s| s.to_string());

    let bytes = mime::build_mime_bytes(
        from,
        &[original.from.clone()],
        &[],
        &[],
        &subject,
        body,
        &attachments,
        in_reply_to.as_deref(),
        references.as_deref(),
    );

    adapter.send_mime(bytes).await
}
