//! Error taxonomy for the orchestration core.
//!
//! Every failure a caller can branch on is a typed variant here:
//!
//! * [`HookError`]: a hook raised while running `observe` or `reply`.
//! * [`AllBackendsExhaustedError`]: every configured backend failed; carries
//!   the per-backend failures in the order they were attempted.
//! * [`ToolError`]: tool lookup, argument validation, timeout or execution fault.
//! * [`BackendError`]: a single backend attempt failed (used inside the pool).
//! * [`AgentError`]: the umbrella returned by [`Agent`](crate::Agent) operations.

use crate::miniagent::hooks::HookPoint;
use std::error::Error;
use std::time::Duration;
use thiserror::Error;

/// Boxed fault raised by a collaborator (hook, tool capability).
pub type BoxError = Box<dyn Error + Send + Sync>;

/// A hook failed. The enclosing `observe`/`reply` call is aborted and no later
/// hook in the chain runs.
#[derive(Debug, Error)]
#[error("hook '{hook}' at {point} failed: {source}")]
pub struct HookError {
    /// Extension point the failing hook was registered on.
    pub point: HookPoint,
    /// Registered name of the failing hook.
    pub hook: String,
    /// The fault raised by the hook.
    #[source]
    pub source: BoxError,
}

/// Failure of a single backend attempt.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    /// Could not reach the backend (DNS, TCP, TLS, ...).
    #[error("connection error: {0}")]
    Connection(String),
    /// Non-2xx HTTP status.
    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },
    /// The provider answered with an application level error payload.
    #[error("API error: {0}")]
    Api(String),
    /// HTTP 429 or equivalent provider signal.
    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },
    /// The request did not complete in time.
    #[error("request timed out")]
    Timeout,
    /// The response did not match the expected schema.
    #[error("malformed response: {0}")]
    Malformed(String),
    /// A streaming response broke while being read.
    #[error("stream error: {0}")]
    Stream(String),
    /// The backend has no streaming mode.
    #[error("streaming not supported by backend '{0}'")]
    Unsupported(String),
}

/// HTTP status codes treated as transient.
pub const RETRYABLE_STATUS_CODES: &[u16] = &[500, 502, 503, 504];

impl BackendError {
    /// Whether the same backend should be tried again before failing over.
    pub fn is_retryable(&self) -> bool {
        match self {
            BackendError::Timeout | BackendError::RateLimited { .. } => true,
            BackendError::Status { status, .. } => RETRYABLE_STATUS_CODES.contains(status),
            _ => false,
        }
    }

    /// Server supplied back-off hint, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            BackendError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// One entry of an [`AllBackendsExhaustedError`].
#[derive(Debug, Clone)]
pub struct BackendFailure {
    /// Name of the backend that failed.
    pub backend: String,
    /// The last error observed for this backend.
    pub error: BackendError,
    /// How many attempts were made (1 + retries).
    pub attempts: u32,
}

/// Every backend in a [`BackendPool`](crate::BackendPool) failed.
#[derive(Debug, Clone, Error)]
#[error("all backends exhausted: {}", describe_failures(.failures))]
pub struct AllBackendsExhaustedError {
    /// Per-backend failures in attempt order.
    pub failures: Vec<BackendFailure>,
}

fn describe_failures(failures: &[BackendFailure]) -> String {
    if failures.is_empty() {
        return "no backends configured".to_string();
    }
    failures
        .iter()
        .map(|f| format!("[{}] {} (after {} attempt(s))", f.backend, f.error, f.attempts))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Failures around tool lookup and invocation.
#[derive(Debug, Error)]
pub enum ToolError {
    /// No tool with this name is registered.
    #[error("tool not found: {0}")]
    NotFound(String),
    /// Arguments did not match the tool's declared schema.
    #[error("invalid arguments for tool '{tool}': {reason}")]
    InvalidArguments { tool: String, reason: String },
    /// The invocation exceeded its time budget.
    #[error("tool '{tool}' timed out after {timeout:?}")]
    Timeout { tool: String, timeout: Duration },
    /// The capability itself raised.
    #[error("tool '{tool}' failed: {source}")]
    Execution {
        tool: String,
        #[source]
        source: BoxError,
    },
}

impl ToolError {
    /// `true` for lookup/schema mismatches, as opposed to runtime faults.
    pub fn is_mismatch(&self) -> bool {
        matches!(
            self,
            ToolError::NotFound(_) | ToolError::InvalidArguments { .. }
        )
    }

    /// Name of the tool involved.
    pub fn tool_name(&self) -> &str {
        match self {
            ToolError::NotFound(tool) => tool,
            ToolError::InvalidArguments { tool, .. }
            | ToolError::Timeout { tool, .. }
            | ToolError::Execution { tool, .. } => tool,
        }
    }
}

/// Error returned by agent, hub and pipeline operations.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Hook(#[from] HookError),
    #[error(transparent)]
    AllBackendsExhausted(#[from] AllBackendsExhaustedError),
    #[error(transparent)]
    Tool(#[from] ToolError),
    /// A backend failed after partial output had already been delivered.
    #[error("backend '{backend}' failed mid-stream: {source}")]
    StreamInterrupted {
        backend: String,
        #[source]
        source: BackendError,
    },
    #[error("configuration error: {0}")]
    Config(String),
}
