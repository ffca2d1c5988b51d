//! Error handling

use thiserror::Error;

pub type FederationResult<T> = Result<T, FederationError>;

#[derive(Debug, Error)]
pub enum FederationError {
    // Privacy errors
    #[error(
        "Privacy budget exhausted: requested (eps={requested_epsilon}, delta={requested_delta}), \
         remaining (eps={remaining_epsilon}, delta={remaining_delta})"
    )]
    BudgetExhausted {
        requested_epsilon: f64,
        requested_delta: f64,
        remaining_epsilon: f64,
        remaining_delta: f64,
    },

    #[error("Invalid privacy parameter: {0}")]
    InvalidPrivacyParameter(String),

    // Aggregation errors
    #[error("Insufficient shares: {received} < {threshold}")]
    InsufficientShares { received: usize, threshold: usize },

    #[error("Insufficient participants: {received} < {required}")]
    InsufficientParticipants { received: usize, required: usize },

    #[error("Secure aggregation enabled but no pairwise masking context was set")]
    MissingMaskingContext,

    // Local model errors
    #[error("Local model exposes no supported weight capability")]
    UnsupportedModel,

    #[error("Training failed: {0}")]
    Training(String),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    Config(String),

    // External service errors
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Federation transport errors
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Server error: {0}")]
    Server(u16),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Update rejected: {0}")]
    Rejected(String),
}

impl TransportError {
    /// Transient failures worth another attempt
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Network(_) | TransportError::Timeout => true,
            TransportError::Server(code) => *code >= 500,
            TransportError::Parse(_) | TransportError::Rejected(_) => false,
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout
        } else if err.is_decode() {
            TransportError::Parse(err.to_string())
        } else if let Some(status) = err.status() {
            TransportError::Server(status.as_u16())
        } else {
            TransportError::Network(err.to_string())
        }
    }
}
