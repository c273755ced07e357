use thiserror::Error;

#[derive(Debug, Error)]
pub enum TurnstileError {
    /// The config file or environment could not be read or parsed.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Settings parsed but the pipeline cannot run with them.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl TurnstileError {
    /// Short error code string used in structured log fields.
    pub fn code(&self) -> &'static str {
        match self {
            TurnstileError::Config(_) => "CONFIG_ERROR",
            TurnstileError::Invalid(_) => "INVALID_CONFIG",
        }
    }
}

pub type Result<T> = std::result::Result<T, TurnstileError>;
