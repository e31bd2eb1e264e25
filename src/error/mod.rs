use std::time::Duration;

use thiserror::Error;

use crate::model::SessionStatus;

/// Coarse error taxonomy used for retry decisions and API mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Retryable: timeout, rate limit, network failure, dependency unavailable.
    Transient,
    /// Caller-caused and not retryable.
    Permanent,
    /// Operator-actionable: storage, configuration, internal faults.
    System,
}

impl ErrorClass {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Transient => "transient",
            ErrorClass::Permanent => "permanent",
            ErrorClass::System => "system",
        }
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Errors that can be placed in the [`ErrorClass`] taxonomy.
pub trait Classify {
    /// The class of this error.
    fn class(&self) -> ErrorClass;

    /// Server-provided hint for when a rate-limited call may be retried.
    fn retry_after(&self) -> Option<Duration> {
        None
    }

    /// Shorthand for `class() == Transient`.
    fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }
}

/// Classify an HTTP status code returned by an upstream dependency.
pub fn classify_status(status: u16) -> ErrorClass {
    match status {
        408 | 425 | 429 => ErrorClass::Transient,
        501 => ErrorClass::Permanent,
        500..=599 => ErrorClass::Transient,
        400..=499 => ErrorClass::Permanent,
        _ => ErrorClass::System,
    }
}

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Oracle error: {0}")]
    Oracle(#[from] OracleError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("MCP protocol error: {0}")]
    Mcp(#[from] McpError),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Storage layer errors. All of them are System-class.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database connection failed: {message}")]
    Connection { message: String },

    #[error("Query failed: {message}")]
    Query { message: String },

    #[error("Migration failed: {message}")]
    Migration { message: String },

    #[error("Invalid record key: {message}")]
    InvalidKey { message: String },

    #[error("Corrupt record {key}: {message}")]
    Corrupt { key: String, message: String },

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

/// Reasoning service (oracle) errors
#[derive(Debug, Error)]
pub enum OracleError {
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Invalid response: {message}")]
    InvalidResponse { message: String },

    #[error("Request timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Data-source connector errors
#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("Invalid endpoint: {endpoint}")]
    InvalidEndpoint { endpoint: String },

    #[error("Connector API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Connector rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Connector request timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Invalid connector response: {message}")]
    InvalidResponse { message: String },

    #[error("Connector HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Failure of an operation wrapped by the resilience layer.
#[derive(Debug, Error)]
pub enum ResilienceError<E>
where
    E: std::error::Error + 'static,
{
    #[error("Retries exhausted for {dependency} after {attempts} attempts: {source}")]
    RetryExhausted {
        dependency: String,
        attempts: u32,
        #[source]
        source: E,
    },

    #[error("Circuit open for {dependency} (retry in {retry_in:?})")]
    CircuitOpen {
        dependency: String,
        retry_in: Option<Duration>,
    },

    #[error("{0}")]
    Rejected(#[source] E),
}

/// Errors raised by pipeline collaborators (task agents, planner, ...)
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Reasoning call failed: {0}")]
    Oracle(#[from] ResilienceError<OracleError>),

    #[error("Data source call failed: {0}")]
    Connector(#[from] ResilienceError<ConnectorError>),

    #[error("Invalid collaborator output: {message}")]
    InvalidOutput { message: String },

    #[error("Deadline exceeded")]
    DeadlineExceeded,

    #[error("Validation failed: {field} - {reason}")]
    Validation { field: String, reason: String },
}

/// Pipeline (state machine) errors
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition {
        from: SessionStatus,
        to: SessionStatus,
    },

    #[error("Operation {operation} not allowed in state {status}")]
    InvalidOperation {
        operation: String,
        status: SessionStatus,
    },

    #[error("Session not found: {session_id}")]
    SessionNotFound { session_id: String },

    #[error("No completed brief draft to approve for session {session_id}")]
    BriefNotReady { session_id: String },

    #[error("Invalid brief: {message}")]
    InvalidBrief { message: String },

    #[error("Validation failed: {field} - {reason}")]
    Validation { field: String, reason: String },

    #[error("Limit exceeded: {message}")]
    LimitExceeded { message: String },

    #[error("Missing record {record} for session {session_id}")]
    MissingRecord { session_id: String, record: String },

    #[error("{stage} failed: {source}")]
    Collaborator {
        stage: String,
        #[source]
        source: AgentError,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// MCP protocol errors
#[derive(Debug, Error)]
pub enum McpError {
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Unknown tool: {tool_name}")]
    UnknownTool { tool_name: String },

    #[error("Invalid parameters for {tool_name}: {message}")]
    InvalidParameters { tool_name: String, message: String },

    #[error("Tool execution failed: {message}")]
    ExecutionFailed { message: String },

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Classify for StorageError {
    fn class(&self) -> ErrorClass {
        ErrorClass::System
    }
}

impl Classify for OracleError {
    fn class(&self) -> ErrorClass {
        match self {
            OracleError::Api { status, .. } => classify_status(*status),
            OracleError::RateLimited { .. } | OracleError::Timeout { .. } => ErrorClass::Transient,
            OracleError::InvalidResponse { .. } => ErrorClass::Permanent,
            OracleError::Http(e) => classify_reqwest(e),
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            OracleError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

impl Classify for ConnectorError {
    fn class(&self) -> ErrorClass {
        match self {
            ConnectorError::InvalidEndpoint { .. } => ErrorClass::Permanent,
            ConnectorError::Api { status, .. } => classify_status(*status),
            ConnectorError::RateLimited { .. } | ConnectorError::Timeout { .. } => {
                ErrorClass::Transient
            }
            ConnectorError::InvalidResponse { .. } => ErrorClass::System,
            ConnectorError::Http(e) => classify_reqwest(e),
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            ConnectorError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

fn classify_reqwest(err: &reqwest::Error) -> ErrorClass {
    if let Some(status) = err.status() {
        return classify_status(status.as_u16());
    }
    if err.is_builder() || err.is_decode() {
        ErrorClass::System
    } else {
        // connect, timeout, request and body errors are network failures
        ErrorClass::Transient
    }
}

impl<E> Classify for ResilienceError<E>
where
    E: Classify + std::error::Error + 'static,
{
    fn class(&self) -> ErrorClass {
        match self {
            ResilienceError::RetryExhausted { .. } => ErrorClass::Permanent,
            ResilienceError::CircuitOpen { .. } => ErrorClass::Transient,
            ResilienceError::Rejected(e) => e.class(),
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            ResilienceError::CircuitOpen { retry_in, .. } => *retry_in,
            ResilienceError::Rejected(e) => e.retry_after(),
            ResilienceError::RetryExhausted { .. } => None,
        }
    }
}

impl Classify for AgentError {
    fn class(&self) -> ErrorClass {
        match self {
            AgentError::Oracle(e) => e.class(),
            AgentError::Connector(e) => e.class(),
            AgentError::InvalidOutput { .. } => ErrorClass::Permanent,
            AgentError::DeadlineExceeded => ErrorClass::Transient,
            AgentError::Validation { .. } => ErrorClass::Permanent,
        }
    }
}

impl Classify for PipelineError {
    fn class(&self) -> ErrorClass {
        match self {
            PipelineError::InvalidStateTransition { .. }
            | PipelineError::InvalidOperation { .. }
            | PipelineError::SessionNotFound { .. }
            | PipelineError::BriefNotReady { .. }
            | PipelineError::InvalidBrief { .. }
            | PipelineError::Validation { .. }
            | PipelineError::LimitExceeded { .. } => ErrorClass::Permanent,
            PipelineError::Collaborator { source, .. } => source.class(),
            PipelineError::MissingRecord { .. } | PipelineError::Storage(_) => ErrorClass::System,
        }
    }
}

impl Classify for AppError {
    fn class(&self) -> ErrorClass {
        match self {
            AppError::Config { .. } | AppError::Internal { .. } => ErrorClass::System,
            AppError::Storage(e) => e.class(),
            AppError::Oracle(e) => e.class(),
            AppError::Pipeline(e) => e.class(),
            AppError::Mcp(e) => e.class(),
        }
    }
}

impl Classify for McpError {
    fn class(&self) -> ErrorClass {
        match self {
            McpError::InvalidRequest { .. }
            | McpError::UnknownTool { .. }
            | McpError::InvalidParameters { .. } => ErrorClass::Permanent,
            McpError::Pipeline(e) => e.class(),
            McpError::ExecutionFailed { .. } | McpError::Json(_) => ErrorClass::System,
        }
    }
}

impl PipelineError {
    /// Stable error code recorded in [`crate::model::SessionError`].
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::Storage(_) | PipelineError::MissingRecord { .. } => "STORAGE_FAILURE",
            PipelineError::InvalidStateTransition { .. } => "INVALID_TRANSITION",
            PipelineError::InvalidOperation { .. } => "INVALID_OPERATION",
            PipelineError::LimitExceeded { .. } => "LIMIT_EXCEEDED",
            PipelineError::Collaborator { .. } => "COLLABORATOR_FAILURE",
            PipelineError::SessionNotFound { .. } => "SESSION_NOT_FOUND",
            PipelineError::BriefNotReady { .. } => "BRIEF_NOT_READY",
            PipelineError::InvalidBrief { .. } | PipelineError::Validation { .. } => {
                "VALIDATION_FAILED"
            }
        }
    }

    /// HTTP-equivalent status for the API layer.
    pub fn http_status(&self) -> u16 {
        match self {
            PipelineError::SessionNotFound { .. } => 404,
            PipelineError::InvalidStateTransition { .. }
            | PipelineError::InvalidOperation { .. }
            | PipelineError::BriefNotReady { .. } => 409,
            PipelineError::InvalidBrief { .. } | PipelineError::Validation { .. } => 422,
            PipelineError::LimitExceeded { .. } => 429,
            _ => match self.class() {
                ErrorClass::Transient => 503,
                ErrorClass::Permanent => 400,
                ErrorClass::System => 500,
            },
        }
    }
}

impl McpError {
    /// Stable error code for tool results.
    pub fn code(&self) -> &'static str {
        match self {
            McpError::InvalidRequest { .. } => "INVALID_REQUEST",
            McpError::UnknownTool { .. } => "UNKNOWN_TOOL",
            McpError::InvalidParameters { .. } => "VALIDATION_FAILED",
            McpError::Pipeline(e) => e.code(),
            McpError::ExecutionFailed { .. } | McpError::Json(_) => "INTERNAL",
        }
    }

    /// HTTP-equivalent status for tool results.
    pub fn http_status(&self) -> u16 {
        match self {
            McpError::InvalidRequest { .. } => 400,
            McpError::UnknownTool { .. } => 404,
            McpError::InvalidParameters { .. } => 422,
            McpError::Pipeline(e) => e.http_status(),
            McpError::ExecutionFailed { .. } | McpError::Json(_) => 500,
        }
    }
}

impl From<AppError> for McpError {
    fn from(err: AppError) -> Self {
        McpError::ExecutionFailed {
            message: err.to_string(),
        }
    }
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type alias for oracle operations
pub type OracleResult<T> = Result<T, OracleError>;

/// Result type alias for data connector operations
pub type ConnectorResult<T> = Result<T, ConnectorError>;

/// Result type alias for collaborator operations
pub type AgentResult<T> = Result<T, AgentError>;

/// Result type alias for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Result type alias for MCP operations
pub type McpResult<T> = Result<T, McpError>;
