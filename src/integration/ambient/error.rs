//! Error handling for the Ambient Weather client.
use reqwest::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),
    #[error("Request rejected: circuit breaker open")]
    RequestRejected,
    #[error("Response JSON error: {0}")]
    ResponseJsonError(#[from] serde_json::Error),
    #[error("Invalid request URL: {0}")]
    InvalidUrl(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Returns `true` if the error may go away on a later attempt.
    ///
    /// Timeouts, connection errors, 5xx, 429 and circuit breaker rejections are
    /// transient. Other 4xx, decoding and URL errors are permanent.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::RequestFailed(err) => match err.status() {
                Some(status) => {
                    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
                }
                None => err.is_timeout() || err.is_connect() || err.is_request(),
            },
            Error::RequestRejected => true,
            Error::ResponseJsonError(_) => false,
            Error::InvalidUrl(_) => false,
        }
    }
}
