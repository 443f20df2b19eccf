//! Errors returned by call operations.

use cr_domain::error::Error;
use cr_supervisor::SupervisorError;

/// What went wrong with a call operation, classified so the API boundary
/// can pick a status code and a user-facing message.
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    /// Bad input. Never retried, never reaches a provider.
    #[error("invalid call request: {0}")]
    InvalidRequest(String),

    #[error("calling is not configured, missing: {}", .missing.join(", "))]
    NotConfigured { missing: Vec<&'static str> },

    /// The relay could not be brought up.
    #[error("{message}")]
    Unavailable {
        /// `false` when an operator has to fix configuration first.
        retrying: bool,
        message: String,
        hints: Vec<String>,
    },

    /// The relay answered 4xx; `message` is its own error text.
    #[error("{message}")]
    Rejected { status: u16, message: String },

    #[error("request to the relay timed out")]
    TimedOut,

    #[error("relay request failed: {0}")]
    Network(String),

    #[error("telephony provider error{}: {message}", code_suffix(.code))]
    Provider {
        call_sid: Option<String>,
        code: Option<u32>,
        message: String,
    },
}

fn code_suffix(code: &Option<u32>) -> String {
    code.map(|c| format!(" {c}")).unwrap_or_default()
}

impl CallError {
    /// HTTP status the gateway should answer with.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::InvalidRequest(_) => 400,
            Self::Rejected { status, .. } => *status,
            Self::NotConfigured { .. } | Self::Unavailable { .. } => 503,
            Self::TimedOut => 504,
            Self::Network(_) | Self::Provider { .. } => 502,
        }
    }

    /// Attach the call a provider error belongs to.
    pub fn with_call_sid(self, sid: &str) -> Self {
        match self {
            Self::Provider { code, message, .. } => Self::Provider {
                call_sid: Some(sid.to_owned()),
                code,
                message,
            },
            other => other,
        }
    }

    pub fn hints(&self) -> Vec<String> {
        match self {
            Self::Unavailable { hints, .. } => hints.clone(),
            Self::NotConfigured { missing } => missing
                .iter()
                .map(|k| format!("Set the {k} environment variable."))
                .collect(),
            _ => Vec::new(),
        }
    }
}

impl From<Error> for CallError {
    fn from(e: Error) -> Self {
        match e {
            Error::Telephony { code, message, .. } => Self::Provider {
                call_sid: None,
                code,
                message,
            },
            Error::Agent(message) => Self::Provider {
                call_sid: None,
                code: None,
                message: format!("voice agent: {message}"),
            },
            Error::Timeout(_) => Self::TimedOut,
            Error::Http(message) => Self::Network(message),
            other => Self::Network(other.to_string()),
        }
    }
}

impl From<SupervisorError> for CallError {
    fn from(e: SupervisorError) -> Self {
        match e {
            SupervisorError::MissingCredentials(missing) => Self::NotConfigured { missing },
            other => Self::Unavailable {
                retrying: !other.is_configuration(),
                message: format!("{} ({other})", other.user_message()),
                hints: other.troubleshooting(),
            },
        }
    }
}
