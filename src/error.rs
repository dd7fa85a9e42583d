//! Error handling utilities for the crate
use thiserror::Error;

use reqwest::Error as ReqwestError;

/// The longest body excerpt kept on a [`ViewingError::Remote`]
pub(crate) const BODY_SNIPPET_LIMIT: usize = 1024;

/// All errors raised by this crate will be instances of ViewingError
#[derive(Error, Debug)]
pub enum ViewingError {
    #[error("Invalid input: {0}")]
    Validation(String),
    #[error("Unable to obtain an access token: {0}")]
    Auth(#[source] Box<ViewingError>),
    #[error("Remote service error ({status} {status_text}): {body}")]
    Remote {
        status: u16,
        status_text: String,
        body: String,
    },
    #[error("Internal HTTP error: {0}")]
    Transport(#[from] ReqwestError),
    #[error("Unable to decode response: {0}")]
    Decode(String),
    #[error("Invalid url: {0}")]
    InvalidUrl(String),
    #[error("Missing or invalid configuration: {0}")]
    Configuration(String),
}

impl ViewingError {
    pub fn remote(status_code: reqwest::StatusCode, body: &str) -> Self {
        ViewingError::Remote {
            status: status_code.as_u16(),
            status_text: status_code
                .canonical_reason()
                .unwrap_or("Unknown Error")
                .to_string(),
            body: snippet(body),
        }
    }

    pub fn required(field_name: &str) -> Self {
        ViewingError::Validation(format!("{} is required", field_name))
    }

    pub(crate) fn auth(cause: ViewingError) -> Self {
        match cause {
            // Authenticators built on this crate may already wrap their errors
            ViewingError::Auth(_) => cause,
            other => ViewingError::Auth(Box::new(other)),
        }
    }

    /// True if the error came from obtaining or refreshing a token
    pub fn is_auth(&self) -> bool {
        matches!(self, ViewingError::Auth(_))
    }

    /// The HTTP status reported by the remote service, if any
    pub fn status_code(&self) -> Option<u16> {
        match self {
            ViewingError::Remote { status, .. } => Some(*status),
            ViewingError::Auth(cause) => cause.status_code(),
            ViewingError::Transport(err) => err.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

fn snippet(body: &str) -> String {
    if body.chars().count() <= BODY_SNIPPET_LIMIT {
        body.to_string()
    } else {
        let mut cut: String = body.chars().take(BODY_SNIPPET_LIMIT).collect();
        cut.push_str("...");
        cut
    }
}

pub(crate) type Result<T> = std::result::Result<T, ViewingError>;
