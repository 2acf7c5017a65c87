//! Error Types

use thiserror::Error;

/// Result type alias for agent operations
pub type Result<T> = std::result::Result<T, AgentError>;

/// Agent error types
#[derive(Error, Debug)]
pub enum AgentError {
    /// LLM provider error
    #[error("Provider error: {0}")]
    Provider(String),

    /// Provider unavailable or not responding
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Tool not found in registry
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// Tool arguments do not satisfy the tool's input schema
    #[error("Tool validation error: {0}")]
    ToolValidation(String),

    /// Tool execution failed on the provider side
    #[error("Tool execution error: {0}")]
    ToolExecution(String),

    /// Tool did not answer within its deadline
    #[error("Tool '{name}' timed out after {secs}s")]
    ToolTimeout { name: String, secs: u64 },

    /// Maximum reasoning round-trips reached
    #[error("Maximum iterations ({0}) reached")]
    MaxIterations(usize),

    /// Parse error (e.g., malformed model response)
    #[error("Parse error: {0}")]
    Parse(String),

    /// Transcript breaks the tool call / tool result pairing
    #[error("Invalid transcript: {0}")]
    InvalidTranscript(String),

    /// Checkpoint store failure
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// Another writer committed to the thread first
    #[error("Checkpoint conflict on thread {thread_id}: expected seq {expected:?}, found {found:?}")]
    Conflict {
        thread_id: String,
        expected: Option<u64>,
        found: Option<u64>,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Rate limited
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other/unknown error
    #[error("{0}")]
    Other(String),
}

impl AgentError {
    /// Check if error is retryable
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ProviderUnavailable(_)
                | Self::RateLimited(_)
                | Self::Conflict { .. }
                | Self::Io(_)
        )
    }

    /// Convert to a user-friendly message
    pub fn user_message(&self) -> String {
        match self {
            Self::Provider(msg) => format!("The AI service encountered an error: {msg}"),
            Self::ProviderUnavailable(_) => "The AI service is currently unavailable. Please try again.".into(),
            Self::ToolNotFound(name) => format!("The tool '{name}' is not available."),
            Self::ToolValidation(msg) => format!("Invalid tool input: {msg}"),
            Self::ToolExecution(msg) => format!("Tool error: {msg}"),
            Self::ToolTimeout { name, .. } => format!("The tool '{name}' took too long to respond."),
            Self::MaxIterations(_) => "The request needed too many research steps. Please try a narrower question.".into(),
            Self::Checkpoint(_) => "Your conversation could not be saved. Please try again.".into(),
            Self::Conflict { .. } => "This conversation was updated by another request. Please retry.".into(),
            Self::RateLimited(_) => "You've made too many requests. Please wait a moment.".into(),
            Self::Auth(_) => "Authentication with the AI service failed.".into(),
            _ => "An unexpected error occurred.".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(AgentError::RateLimited("slow down".into()).is_retryable());
        assert!(AgentError::ProviderUnavailable("502".into()).is_retryable());
        assert!(!AgentError::Auth("bad key".into()).is_retryable());
        assert!(!AgentError::MaxIterations(10).is_retryable());
    }
}
