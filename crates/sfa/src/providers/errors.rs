use reqwest::StatusCode;
use thiserror::Error;

/// Failures talking to a vendor API
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Rate limited by the provider (429)")]
    RateLimited,

    #[error("Server error: {0}")]
    Server(StatusCode),

    #[error("Request failed: {status} - {body}")]
    RequestFailed { status: StatusCode, body: String },

    #[error("Input message too long. Message: {0}")]
    ContextLengthExceeded(String),

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Malformed response from provider: {0}")]
    MalformedResponse(String),
}

impl ProviderError {
    /// Whether waiting and sending the same request again could succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited | ProviderError::Server(_) | ProviderError::Transport(_)
        )
    }

    /// Classify a non-200 status the same way for every vendor
    pub fn from_status(status: StatusCode, body: String) -> Self {
        if status == StatusCode::TOO_MANY_REQUESTS {
            ProviderError::RateLimited
        } else if status.is_server_error() {
            ProviderError::Server(status)
        } else {
            ProviderError::RequestFailed { status, body }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status_classification() {
        assert!(matches!(
            ProviderError::from_status(StatusCode::TOO_MANY_REQUESTS, String::new()),
            ProviderError::RateLimited
        ));
        assert!(matches!(
            ProviderError::from_status(StatusCode::BAD_GATEWAY, String::new()),
            ProviderError::Server(_)
        ));
        let err = ProviderError::from_status(StatusCode::UNAUTHORIZED, "bad key".into());
        assert_eq!(err.to_string(), "Request failed: 401 Unauthorized - bad key");
    }

    #[test]
    fn test_retryable() {
        assert!(ProviderError::RateLimited.is_retryable());
        assert!(ProviderError::Server(StatusCode::INTERNAL_SERVER_ERROR).is_retryable());
        assert!(!ProviderError::ContextLengthExceeded("x".into()).is_retryable());
        assert!(!ProviderError::MalformedResponse("x".into()).is_retryable());
    }
}
