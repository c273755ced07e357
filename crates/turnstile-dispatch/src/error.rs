use thiserror::Error;
use turnstile_store::StoreError;

/// A failure a bot reports about the user's command itself, such as an
/// invalid guess. `message` is shown to the user verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainError {
    /// Stable machine-readable code (e.g. `"no_game"`).
    pub code: String,
    pub message: String,
    /// Part of normal play; logged at debug rather than warn.
    pub expected: bool,
}

impl DomainError {
    pub fn expected(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            expected: true,
        }
    }

    pub fn unexpected(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            expected: false,
        }
    }
}

impl std::fmt::Display for DomainError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// Errors produced while running one command.
#[derive(Debug, Error)]
pub enum ExecError {
    /// The executor did not finish within its deadline.
    #[error("Operation timed out after {ms}ms")]
    Timeout { ms: u64 },

    #[error("Domain error: {0}")]
    Domain(DomainError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<DomainError> for ExecError {
    fn from(e: DomainError) -> Self {
        ExecError::Domain(e)
    }
}
