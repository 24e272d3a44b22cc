use thiserror::Error;

/// Why a webhook delivery attempt failed.
#[derive(Debug, Error)]
pub enum SinkDeliveryError {
    #[error("webhook request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("webhook returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),
}

impl SinkDeliveryError {
    /// Transport errors, 5xx, 408 and 429 are worth another attempt. Other
    /// client errors will fail the same way again.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Request(_) => true,
            Self::Status { status, .. } => matches!(status, 408 | 429 | 500..=599),
            Self::Encode(_) => false,
        }
    }
}
