/*!
 * Error types for Lumen
 */

use std::fmt;
use std::io;

use lumen_core_resilience::ResilienceError;

use crate::restart::RestartReason;

pub type Result<T> = std::result::Result<T, LumenError>;

/// Exit code constants for structured process exit
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;
pub const EXIT_CONFIG: i32 = 2;
/// Asks the supervisor to start us again
pub const EXIT_RESTART: i32 = 75;

#[derive(Debug)]
pub enum LumenError {
    /// Configuration error
    Config(String),

    /// I/O error
    Io(io::Error),

    /// Fetch or connection failure surfaced from the resilience core
    Resilience(ResilienceError),

    /// Renderer failed to draw a view
    Render(String),

    /// Payload could not be interpreted
    Payload(String),

    /// The process should restart
    Restart(RestartReason),

    /// Shutdown was requested
    Shutdown,

    /// Generic error with message
    Other(String),
}

impl LumenError {
    /// Get the process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            LumenError::Config(_) => EXIT_CONFIG,
            LumenError::Restart(_) => EXIT_RESTART,
            LumenError::Shutdown => EXIT_SUCCESS,
            _ => EXIT_FAILURE,
        }
    }

    /// Control-flow signals travel as errors so `?` unwinds the cycle
    pub fn is_control(&self) -> bool {
        matches!(self, LumenError::Restart(_) | LumenError::Shutdown)
    }

    /// Check if this error is fatal (the loop cannot continue)
    pub fn is_fatal(&self) -> bool {
        matches!(self, LumenError::Config(_))
    }

    /// Get error category for logging
    pub fn category(&self) -> ErrorCategory {
        match self {
            LumenError::Config(_) => ErrorCategory::Configuration,
            LumenError::Io(_) => ErrorCategory::IoError,
            LumenError::Resilience(e) if e.is_wedged() => ErrorCategory::Resource,
            LumenError::Resilience(_) => ErrorCategory::Network,
            LumenError::Render(_) => ErrorCategory::Display,
            LumenError::Payload(_) => ErrorCategory::Codec,
            LumenError::Restart(_) | LumenError::Shutdown => ErrorCategory::Lifecycle,
            LumenError::Other(_) => ErrorCategory::Unknown,
        }
    }
}

/// Error category for classification and reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Configuration errors
    Configuration,
    /// I/O operation errors
    IoError,
    /// Socket or buffer exhaustion
    Resource,
    /// Network/upstream errors
    Network,
    /// Rendering errors
    Display,
    /// Payload decoding errors
    Codec,
    /// Restart and shutdown
    Lifecycle,
    /// Uncategorized errors
    Unknown,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Configuration => write!(f, "configuration"),
            ErrorCategory::IoError => write!(f, "io"),
            ErrorCategory::Resource => write!(f, "resource"),
            ErrorCategory::Network => write!(f, "network"),
            ErrorCategory::Display => write!(f, "display"),
            ErrorCategory::Codec => write!(f, "codec"),
            ErrorCategory::Lifecycle => write!(f, "lifecycle"),
            ErrorCategory::Unknown => write!(f, "unknown"),
        }
    }
}

impl fmt::Display for LumenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LumenError::Config(msg) => write!(f, "Configuration error: {}", msg),
            LumenError::Io(err) => write!(f, "I/O error: {}", err),
            LumenError::Resilience(err) => write!(f, "{}", err),
            LumenError::Render(msg) => write!(f, "Render error: {}", msg),
            LumenError::Payload(msg) => write!(f, "Payload error: {}", msg),
            LumenError::Restart(reason) => write!(f, "Restart requested: {}", reason),
            LumenError::Shutdown => write!(f, "Shutdown requested"),
            LumenError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for LumenError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LumenError::Io(err) => Some(err),
            LumenError::Resilience(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for LumenError {
    fn from(err: io::Error) -> Self {
        LumenError::Io(err)
    }
}

impl From<ResilienceError> for LumenError {
    fn from(err: ResilienceError) -> Self {
        match err {
            ResilienceError::Cancelled => LumenError::Shutdown,
            other => LumenError::Resilience(other),
        }
    }
}

impl From<toml::de::Error> for LumenError {
    fn from(err: toml::de::Error) -> Self {
        LumenError::Config(format!("TOML parse error: {}", err))
    }
}

impl From<serde_json::Error> for LumenError {
    fn from(err: serde_json::Error) -> Self {
        LumenError::Payload(format!("JSON parse error: {}", err))
    }
}
