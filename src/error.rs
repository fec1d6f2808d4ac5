use thiserror::Error;

/// Errors are `Clone` so a single job outcome can be handed to every reader
/// of a deferred result; transport errors are carried rendered.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParleyError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("LLM backend unreachable: {0}")]
    BackendUnreachable(String),

    #[error("LLM backend error{}: {message}", status_suffix(.status))]
    Backend {
        status: Option<u16>,
        message: String,
    },

    #[error("Work queue is shut down")]
    QueueClosed,

    #[error("Job abandoned before producing a result: {0}")]
    JobAbandoned(String),

    #[error("Server error: {0}")]
    Server(String),
}

impl ParleyError {
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            status: None,
            message: message.into(),
        }
    }

    /// Map a reqwest failure onto the backend taxonomy: anything that never
    /// produced a response counts as unreachable.
    pub fn from_transport(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() || err.is_request() {
            Self::BackendUnreachable(err.to_string())
        } else if err.is_decode() {
            Self::backend(format!("malformed response body: {}", err))
        } else {
            Self::Backend {
                status: err.status().map(|s| s.as_u16()),
                message: err.to_string(),
            }
        }
    }

    pub fn is_backend_failure(&self) -> bool {
        matches!(self, Self::BackendUnreachable(_) | Self::Backend { .. })
    }
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" {}", s)).unwrap_or_default()
}

pub type Result<T> = std::result::Result<T, ParleyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_error_display() {
        let with_status = ParleyError::Backend {
            status: Some(503),
            message: "loading model".to_string(),
        };
        assert_eq!(with_status.to_string(), "LLM backend error 503: loading model");
        assert_eq!(
            ParleyError::backend("bad json").to_string(),
            "LLM backend error: bad json"
        );
        assert!(with_status.is_backend_failure());
        assert!(!ParleyError::QueueClosed.is_backend_failure());
    }
}
