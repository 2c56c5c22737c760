//! The progressive-disclosure read model: `Summary` and `Full` message projections,
//! plus the address type shared by the read model, groups, and the composer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Opaque, stable identifier for a single message, as returned by Gmail.
///
/// Distinct from [`ThreadId`] even when a thread holds exactly one message —
/// the two are separate namespaces and are never interchangeable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub String);

/// Opaque, stable identifier shared by every message in a Gmail thread.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThreadId(pub String);

/// Gmail label identifier, e.g. `"INBOX"`, `"UNREAD"`, or a user label id like `"Label_12"`.
pub type LabelId = String;

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        MessageId(s)
    }
}

impl From<String> for ThreadId {
    fn from(s: String) -> Self {
        ThreadId(s)
    }
}

/// A parsed email address, `local@domain` with an optional display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub display_name: Option<String>,
    pub local: String,
    pub domain: String,
}

impl Address {
    /// Parse `"Name" <x@y>`, `Name <x@y>`, or bare `x@y`.
    pub fn parse(raw: &str) -> crate::error::Result<Self> {
        let raw = raw.trim();
        let (display_name, addr_part) = if let Some(start) = raw.find('<') {
            let end = raw
                .find('>')
                .ok_or_else(|| crate::error::GmailError::MalformedAddress(raw.to_string()))?;
            if end < start {
                return Err(crate::error::GmailError::MalformedAddress(raw.to_string()));
            }
            let name = raw[..start].trim().trim_matches('"').trim();
            let name = if name.is_empty() {
                None
            } else {
                Some(name.to_string())
            };
            (name, raw[start + 1..end].trim())
        } else {
            (None, raw)
        };

        let (local, domain) = addr_part
            .split_once('@')
            .ok_or_else(|| crate::error::GmailError::MalformedAddress(raw.to_string()))?;

        if !is_valid_local(local) || !is_valid_domain(domain) {
            return Err(crate::error::GmailError::MalformedAddress(raw.to_string()));
        }

        Ok(Address {
            display_name,
            local: local.to_string(),
            domain: domain.to_string(),
        })
    }

    /// `local@domain`, ignoring any display name.
    pub fn email(&self) -> String {
        format!("{}@{}", self.local, self.domain)
    }

    /// Dedup key: local part is case-sensitive, domain is case-insensitive.
    pub fn dedup_key(&self) -> String {
        format!("{}@{}", self.local, self.domain.to_lowercase())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.display_name {
            Some(name) => write!(f, "{} <{}>", name, self.email()),
            None => write!(f, "{}", self.email()),
        }
    }
}

fn is_valid_local(local: &str) -> bool {
    !local.is_empty()
        && local
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "!#$%&'*+-/=?^_`{|}~.".contains(c))
}

fn is_valid_domain(domain: &str) -> bool {
    if domain.is_empty() || !domain.contains('.') {
        return false;
    }
    domain
        .split('.')
        .all(|label| !label.is_empty() && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-'))
}

/// De-duplicate a flat address list, case-sensitive on local part, case-insensitive
/// on domain, preserving first-occurrence order.
pub fn dedup_addresses(addrs: Vec<Address>) -> Vec<Address> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(addrs.len());
    for addr in addrs {
        if seen.insert(addr.dedup_key()) {
            out.push(addr);
        }
    }
    out
}

/// Cheap, list-friendly message projection. Never carries body content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    pub id: MessageId,
    pub thread_id: ThreadId,
    pub from: Address,
    pub to: Vec<Address>,
    pub cc: Vec<Address>,
    pub subject: String,
    pub date: DateTime<Utc>,
    pub snippet: String,
    pub label_ids: Vec<LabelId>,
    pub is_unread: bool,
    pub is_important: bool,
    pub has_attachment: bool,
    pub size_estimate: u64,
}

/// A MIME attachment, enumerated only when it carries a real `attachmentId`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentRef {
    pub filename: String,
    pub mime_type: String,
    pub size: u64,
    pub attachment_id: String,
}

/// Full message projection: adds bodies, the complete header set, and attachments.
///
/// Deliberately not a superset-by-inheritance of [`Summary`]: the two are distinct
/// types so a function accepting one cannot read fields that only exist on the other.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Full {
    pub id: MessageId,
    pub thread_id: ThreadId,
    pub from: Address,
    pub to: Vec<Address>,
    pub cc: Vec<Address>,
    pub subject: String,
    pub date: DateTime<Utc>,
    pub body_text: String,
    pub body_html: String,
    /// Multi-valued, case-insensitive-lookup header map, insertion order preserved.
    pub headers: Vec<(String, Vec<String>)>,
    pub attachments: Vec<AttachmentRef>,
    /// Non-fatal per-part decode warnings (e.g. a malformed base64url body part).
    pub warnings: Vec<String>,
}

impl Full {
    /// Case-insensitive, first-match header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .and_then(|(_, values)| values.first())
            .map(|s| s.as_str())
    }

    /// All values for a header name, case-insensitive.
    pub fn header_values(&self, name: &str) -> Vec<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, values)| values.iter().map(|s| s.as_str()).collect())
            .unwrap_or_default()
    }

    /// The `Summary` that corresponds to this `Full` projection; primary-key fields match.
    pub fn to_summary(&self, snippet: String, size_estimate: u64) -> Summary {
        Summary {
            id: self.id.clone(),
            thread_id: self.thread_id.clone(),
            from: self.from.clone(),
            to: self.to.clone(),
            cc: self.cc.clone(),
            subject: self.subject.clone(),
            date: self.date,
            snippet,
            label_ids: Vec::new(),
            is_unread: false,
            is_important: false,
            has_attachment: !self.attachments.is_empty(),
            size_estimate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_address() {
        let addr = Address::parse("user@example.com").unwrap();
        assert_eq!(addr.local, "user");
        assert_eq!(addr.domain, "example.com");
        assert!(addr.display_name.is_none());
    }

    #[test]
    fn test_parse_named_address() {
        let addr = Address::parse("John Doe <john@example.com>").unwrap();
        assert_eq!(addr.display_name, Some("John Doe".to_string()));
        assert_eq!(addr.email(), "john@example.com");
    }

    #[test]
    fn test_parse_quoted_named_address() {
        let addr = Address::parse("\"Doe, John\" <john@example.com>").unwrap();
        assert_eq!(addr.display_name, Some("Doe, John".to_string()));
    }

    #[test]
    fn test_parse_rejects_missing_dot_domain() {
        assert!(Address::parse("user@localhost").is_err());
    }

    #[test]
    fn test_parse_rejects_missing_at() {
        assert!(Address::parse("not-an-address").is_err());
    }

    #[test]
    fn test_parse_rejects_unbalanced_angle_brackets() {
        assert!(Address::parse("John <john@example.com").is_err());
    }

    #[test]
    fn test_dedup_key_case_rules() {
        let a = Address::parse("User@Example.com").unwrap();
        let b = Address::parse("User@example.com").unwrap();
        let c = Address::parse("user@example.com").unwrap();
        assert_eq!(a.dedup_key(), b.dedup_key());
        assert_ne!(a.dedup_key(), c.dedup_key());
    }

    #[test]
    fn test_dedup_addresses_preserves_first_occurrence_order() {
        let addrs = vec![
            Address::parse("a@x.com").unwrap(),
            Address::parse("b@x.com").unwrap(),
            Address::parse("A@X.com").unwrap(),
            Address::parse("c@y.com").unwrap(),
        ];
        let deduped = dedup_addresses(addrs);
        let emails: Vec<String> = deduped.iter().map(|a| a.email()).collect();
        assert_eq!(emails, vec!["a@x.com", "b@x.com", "c@y.com"]);
    }

    #[test]
    fn test_full_to_summary_matches_primary_key_fields() {
        let full = Full {
            id: MessageId("m1".into()),
            thread_id: ThreadId("t1".into()),
            from: Address::parse("a@x.com").unwrap(),
            to: vec![Address::parse("b@x.com").unwrap()],
            cc: vec![],
            subject: "hi".to_string(),
            date: Utc::now(),
            body_text: "hello".to_string(),
            body_html: String::new(),
            headers: vec![],
            attachments: vec![],
            warnings: vec![],
        };
        let summary = full.to_summary("hello".to_string(), 42);
        assert_eq!(summary.id, full.id);
        assert_eq!(summary.thread_id, full.thread_id);
        assert_eq!(summary.from, full.from);
        assert_eq!(summary.subject, full.subject);
    }

    #[test]
    fn test_header_lookup_case_insensitive() {
        let full = Full {
            id: MessageId("m1".into()),
            thread_id: ThreadId("t1".into()),
            from: Address::parse("a@x.com").unwrap(),
            to: vec![],
            cc: vec![],
            subject: String::new(),
            date: Utc::now(),
            body_text: String::new(),
            body_html: String::new(),
            headers: vec![("Message-Id".to_string(), vec!["<abc@x.com>".to_string()])],
            attachments: vec![],
            warnings: vec![],
        };
        assert_eq!(full.header("message-id"), Some("<abc@x.com>"));
        assert_eq!(full.header("MESSAGE-ID"), Some("<abc@x.com>"));
        assert_eq!(full.header("nope"), None);
    }
}
