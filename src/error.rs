use thiserror::Error;

/// Type alias for Result with GmailError
pub type Result<T> = std::result::Result<T, GmailError>;

/// Comprehensive error types for the mail CLI and its subsystems
#[derive(Error, Debug)]
pub enum GmailError {
    /// Missing required flag, invalid enum value, malformed command invocation
    #[error("usage error: {0}")]
    UsageError(String),

    /// Gmail API returned an error not otherwise classified
    #[error("Gmail API error: {0}")]
    ApiError(String),

    /// OAuth token expired/invalid with no refresh available
    #[error("not authorized: {0}")]
    NotAuthorized(String),

    /// Legacy alias kept for source compatibility with the adapter's HTTP mapping
    #[error("Authentication failed: {0}")]
    AuthError(String),

    /// Rate limit exceeded - should retry after specified seconds
    #[error("Rate limit exceeded, retry after {retry_after} seconds")]
    RateLimitExceeded { retry_after: u64 },

    /// Rate limit error (alias for backwards compatibility)
    #[error("Rate limit error: {0}")]
    RateLimitError(String),

    /// User cancelled operation (e.g. declined the send confirmation)
    #[error("Operation cancelled: {0}")]
    OperationCancelled(String),

    /// Network-related error (connection issues, timeouts, etc.)
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Server returned 5xx error
    #[error("Server error (HTTP {status}): {message}")]
    ServerError { status: u16, message: String },

    /// A named group/style/workflow/token/message does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Resource not found (404) surfaced directly by the Gmail API
    #[error("Message not found: {0}")]
    MessageNotFound(String),

    /// Bad request (400) or other unclassified 4xx from the Gmail API
    #[error("Gmail client error: {0}")]
    GmailClientError(String),

    /// Bad request (400)
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Forbidden (403)
    #[error("Access forbidden: {0}")]
    Forbidden(String),

    /// Invalid message format or MIME parsing error
    #[error("Invalid message format: {0}")]
    InvalidMessageFormat(String),

    /// Workflow state found on disk is past its TTL
    #[error("workflow token expired")]
    TokenExpired,

    /// A referenced workflow definition does not exist
    #[error("unknown workflow: {0}")]
    UnknownWorkflow(String),

    /// A referenced group does not exist
    #[error("unknown group: {0}")]
    UnknownGroup(String),

    /// Address already a member of the group
    #[error("{address} is already a member of {group}")]
    DuplicateMember { group: String, address: String },

    /// Address failed RFC-5321-ish parsing
    #[error("malformed address: {0}")]
    MalformedAddress(String),

    /// Style name fails the charset/length check or escapes the styles directory
    #[error("invalid style name: {0}")]
    InvalidStyleName(String),

    /// Gmail search query exceeds the adapter's length limit
    #[error("query too large: {len} characters exceeds the {limit} character limit")]
    QueryTooLarge { len: usize, limit: usize },

    /// Style lint, group, or address validation failed; carries every violation found
    #[error("validation failed: {0}")]
    ValidationError(String),

    /// `modifyMessage` returned 200 but the label was not present afterward
    #[error("label apply failed: {0}")]
    LabelApplyFailed(String),

    /// A workflow reply's send succeeded but the follow-up archive/modify failed
    #[error("reply sent but label modification failed: {0}")]
    PartialReplyFailure(String),

    /// Label-related errors outside the adapter contract (unused by the CLI surface,
    /// kept for source compatibility with the adapter's internals)
    #[error("Label error: {0}")]
    LabelError(String),

    /// IO error (file operations, etc.)
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// YAML serialization/deserialization error (workflow definitions)
    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// TOML serialization/deserialization error (config file)
    #[error("TOML error: {0}")]
    TomlError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// State management errors not otherwise classified
    #[error("State error: {0}")]
    StateError(String),

    /// State file unreadable/unwritable
    #[error("filesystem error: {0}")]
    FilesystemError(String),

    /// Quota exceeded
    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    /// Circuit breaker is open (rejecting requests)
    #[error("Circuit breaker open: {message}. Will retry after {retry_after_secs} seconds")]
    CircuitBreakerOpen {
        message: String,
        retry_after_secs: u64,
    },

    /// Generic catch-all error
    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl GmailError {
    /// Check if the error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            GmailError::RateLimitExceeded { .. }
                | GmailError::RateLimitError(_)
                | GmailError::ServerError { .. }
                | GmailError::NetworkError(_)
                | GmailError::CircuitBreakerOpen { .. }
        )
    }

    /// Check if the error is permanent and should not be retried
    pub fn is_permanent(&self) -> bool {
        !self.is_transient()
    }

    /// Stable machine-readable code used in JSON error envelopes.
    pub fn code(&self) -> &'static str {
        match self {
            GmailError::UsageError(_) => "UsageError",
            GmailError::NotAuthorized(_) | GmailError::AuthError(_) => "NotAuthorized",
            GmailError::NotFound(_) | GmailError::MessageNotFound(_) => "NotFound",
            GmailError::TokenExpired => "TokenExpired",
            GmailError::UnknownWorkflow(_) => "UnknownWorkflow",
            GmailError::UnknownGroup(_) => "UnknownGroup",
            GmailError::DuplicateMember { .. } => "DuplicateMember",
            GmailError::MalformedAddress(_) => "MalformedAddress",
            GmailError::InvalidStyleName(_) => "InvalidStyleName",
            GmailError::QueryTooLarge { .. } => "QueryTooLarge",
            GmailError::ValidationError(_) => "ValidationError",
            GmailError::RateLimitExceeded { .. }
            | GmailError::RateLimitError(_)
            | GmailError::ServerError { .. }
            | GmailError::NetworkError(_)
            | GmailError::CircuitBreakerOpen { .. }
            | GmailError::QuotaExceeded(_) => "TransientGmailError",
            GmailError::BadRequest(_)
            | GmailError::Forbidden(_)
            | GmailError::GmailClientError(_)
            | GmailError::ApiError(_) => "GmailClientError",
            GmailError::LabelApplyFailed(_) => "LabelApplyFailed",
            GmailError::PartialReplyFailure(_) => "PartialReplyFailure",
            GmailError::FilesystemError(_) | GmailError::IoError(_) => "FilesystemError",
            GmailError::OperationCancelled(_) => "OperationCancelled",
            _ => "Unknown",
        }
    }

    /// Exit code per the CLI surface's code table.
    pub fn exit_code(&self) -> i32 {
        match self {
            GmailError::UsageError(_) => 2,
            GmailError::NotAuthorized(_) | GmailError::AuthError(_) => 3,
            GmailError::NotFound(_)
            | GmailError::MessageNotFound(_)
            | GmailError::UnknownWorkflow(_)
            | GmailError::UnknownGroup(_) => 4,
            GmailError::TokenExpired => 5,
            GmailError::ValidationError(_)
            | GmailError::DuplicateMember { .. }
            | GmailError::MalformedAddress(_)
            | GmailError::InvalidStyleName(_)
            | GmailError::QueryTooLarge { .. } => 6,
            GmailError::RateLimitExceeded { .. }
            | GmailError::RateLimitError(_)
            | GmailError::ServerError { .. }
            | GmailError::NetworkError(_)
            | GmailError::CircuitBreakerOpen { .. }
            | GmailError::QuotaExceeded(_) => 7,
            _ => 1,
        }
    }
}

/// Parse the Retry-After header from an HTTP response
///
/// The Retry-After header can be specified in two formats:
/// 1. Delay-seconds: An integer indicating seconds to wait (e.g., "120")
/// 2. HTTP-date: An HTTP date format (e.g., "Wed, 21 Oct 2015 07:28:00 GMT")
///
/// Returns the number of seconds to wait. If the header is missing or invalid,
/// returns a default of 5 seconds.
pub fn parse_retry_after_header<B>(response: &hyper::Response<B>) -> u64 {
    const DEFAULT_RETRY_AFTER: u64 = 5;

    if let Some(retry_after_value) = response.headers().get("retry-after") {
        if let Ok(retry_after_str) = retry_after_value.to_str() {
            // Try to parse as integer (delay-seconds format)
            if let Ok(seconds) = retry_after_str.parse::<u64>() {
                return seconds;
            }

            // Try to parse as HTTP date format
            if let Ok(http_date) = httpdate::parse_http_date(retry_after_str) {
                // Calculate seconds until that time
                let now = std::time::SystemTime::now();
                if let Ok(duration) = http_date.duration_since(now) {
                    return duration.as_secs();
                }
            }
        }
    }

    DEFAULT_RETRY_AFTER
}

impl From<google_gmail1::Error> for GmailError {
    fn from(error: google_gmail1::Error) -> Self {
        match error {
            // HTTP response with status code (non-success responses)
            google_gmail1::Error::Failure(ref response) => {
                let status = response.status();
                let status_code = status.as_u16();
                let message = format!(
                    "HTTP {}: {}",
                    status_code,
                    status.canonical_reason().unwrap_or("Unknown")
                );

                match status_code {
                    // Rate limiting - transient
                    429 => {
                        let retry_after = parse_retry_after_header(response);
                        GmailError::RateLimitExceeded { retry_after }
                    }
                    // Auth failures - never retried
                    401 => GmailError::NotAuthorized(message),
                    // Not found
                    404 => GmailError::MessageNotFound("Resource not found".to_string()),
                    // Bad request
                    400 => GmailError::BadRequest(message),
                    // Forbidden
                    403 => GmailError::Forbidden(message),
                    // Server errors - transient
                    500..=599 => GmailError::ServerError {
                        status: status_code,
                        message,
                    },
                    // Other non-success status codes
                    _ => GmailError::GmailClientError(message),
                }
            }
            // BadRequest variant (request not understood by server)
            google_gmail1::Error::BadRequest(ref err) => GmailError::BadRequest(format!("{}", err)),
            // Network/connection errors - transient
            google_gmail1::Error::HttpError(ref err) => {
                GmailError::NetworkError(format!("Connection error: {}", err))
            }
            // IO errors - transient
            google_gmail1::Error::Io(err) => GmailError::NetworkError(err.to_string()),
            // All other errors
            _ => GmailError::ApiError(error.to_string()),
        }
    }
}
