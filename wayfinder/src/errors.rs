use thiserror::Error;

#[derive(Error, Debug)]
pub enum NavigationError {
    #[error("Perception unavailable: {0}")]
    PerceptionUnavailable(String),

    #[error("Screen capture failed: {0}")]
    CaptureFailed(String),

    #[error("Identification failed: {0}")]
    IdentificationFailed(String),

    #[error("Learning rejected: {0}")]
    LearningRejected(String),

    #[error("Action failed: {0}")]
    ActionFailed(String),

    #[error("Verification failed: {0}")]
    VerificationFailed(String),

    #[error("Graph corruption: {0}")]
    GraphCorruption(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Input error: {0}")]
    Input(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl NavigationError {
    /// Whether the error message carries a provider throttling indicator.
    pub fn is_rate_limit(&self) -> bool {
        if matches!(self, NavigationError::RateLimited(_)) {
            return true;
        }
        let message = self.to_string().to_lowercase();
        message.contains("rate limit")
            || message.contains("rate_limit")
            || message.contains("too many requests")
            || message.contains("429")
    }
}
