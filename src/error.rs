use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error as ThisError;

/// Classification hook used by the retry layers.
pub trait IsRetryable {
    fn is_retryable(&self) -> bool;
}

#[derive(Debug, ThisError)]
pub enum BqStreamError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("HTTP request error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("JWT signing error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    #[error("no service account key file; set BQSTREAM_CREDENTIALS_PATH or GOOGLE_APPLICATION_CREDENTIALS")]
    MissingCredentials,

    #[error("bad service account key file {path}: {reason}")]
    BadKeyFile { path: String, reason: String },

    #[error("token exchange failed with status {status}: {body}")]
    TokenExchange { status: StatusCode, body: String },

    #[error("invalid table id {0:?}; expected project.dataset.table")]
    InvalidTableId(String),

    #[error("read session {session} has no Arrow schema")]
    MissingArrowSchema { session: String },

    #[error("malformed response stream: {0}")]
    Framing(String),

    #[error("BigQuery Storage API error: {0:?}")]
    Api(ApiError),
}

impl IsRetryable for BqStreamError {
    fn is_retryable(&self) -> bool {
        match self {
            // reqwest surfaces a response body dropped mid-transfer as a
            // body or decode error; request-construction errors stay fatal.
            BqStreamError::Reqwest(e) => {
                e.is_timeout() || e.is_connect() || e.is_body() || e.is_decode()
            }
            BqStreamError::TokenExchange { status, .. } => retryable_status(*status),
            BqStreamError::Api(api) => StatusCode::from_u16(api.error.code as u16)
                .map(retryable_status)
                .unwrap_or(false),
            _ => false,
        }
    }
}

fn retryable_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
}

/// Google API error envelope, as returned both in non-2xx bodies and as
/// in-stream frames during `readRows`.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiError {
    pub error: ApiErrorBody,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    pub code: u32,
    pub message: String,
    #[serde(default)]
    pub status: String,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

impl From<ApiError> for BqStreamError {
    fn from(e: ApiError) -> Self {
        BqStreamError::Api(e)
    }
}
