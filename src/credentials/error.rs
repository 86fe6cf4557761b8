use crate::error::ApiError;

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("{0} not found")]
    NotFound(String),

    /// The backend refused the request or could not be reached.
    #[error("{0}")]
    Backend(String),
}

impl From<reqwest::Error> for BrokerError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Backend("secret backend request timed out".into())
        } else {
            Self::Backend(format!("secret backend request failed: {err}"))
        }
    }
}

impl From<BrokerError> for ApiError {
    fn from(err: BrokerError) -> Self {
        match err {
            BrokerError::NotFound(what) => Self::NotFound(what),
            BrokerError::Backend(msg) => Self::Backend(msg),
        }
    }
}
