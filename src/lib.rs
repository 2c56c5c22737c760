//! Gmail CLI/automation toolkit.
//!
//! A Gmail client with a progressive-disclosure read model (`Summary`
//! before `Full`), address groups, a style linter for reply guidance, a
//! composer, and a stateful, resumable, token-addressed workflow engine
//! for driving triage sessions against a saved query.
//!
//! # Module Organization
//!
//! - [`auth`] - OAuth2 authentication and Gmail API hub initialization
//! - [`client`] - The Gmail Adapter: rate-limited, circuit-broken, retrying API access
//! - [`cli`] - Command-line surface
//! - [`compose`] - Recipient expansion, style guidance, confirmation gate, MIME send
//! - [`config`] - Configuration and on-disk layout discovery
//! - [`error`] - Error taxonomy and result alias
//! - [`groups`] - Address group store
//! - [`linter`] - Style document linter
//! - [`mime`] - MIME tree parsing and construction
//! - [`models`] - Core read-model data structures
//! - [`rate_limiter`] - Quota-aware token bucket
//! - [`circuit_breaker`] - Circuit breaker wrapping adapter calls
//! - [`styles`] - Style document store
//! - [`workflow`] - The stateful, resumable workflow engine

pub mod auth;
pub mod circuit_breaker;
pub mod client;
pub mod cli;
pub mod compose;
pub mod config;
pub mod error;
pub mod groups;
pub mod linter;
pub mod mime;
pub mod models;
pub mod rate_limiter;
pub mod styles;
pub mod workflow;

pub use error::{GmailError, Result};

pub use models::{Address, AttachmentRef, Full, MessageId, Summary, ThreadId};

pub use config::{Config, Env};

pub use auth::GmailSession;

pub use client::{GmailAdapter, ProductionGmailAdapter};

pub use groups::GroupStore;

pub use styles::StyleStore;

pub use linter::ValidationReport;

pub use compose::{Composer, ComposeOutcome, ComposeRequest, Confirmer};

pub use workflow::{Action, Sender, WorkflowEngine, WorkflowStore};

pub use cli::{Cli, Commands};
