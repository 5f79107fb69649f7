//! Error taxonomy shared by every podwatch component
//!
//! Remote-facing clients (RPC, geolocation, credits) never swallow errors:
//! they normalize whatever went wrong into one of the variants below and
//! return it to the caller. Enrichment layers (accessibility, per-node
//! aggregation) turn these into "no data" and log them instead.
//!
//! `PodError` is `Clone` because a single in-flight fetch can be awaited by
//! several callers at once (see `cache::SwrCache`), and each of them gets a
//! copy of the same outcome.

use thiserror::Error;

/// Fixed code used when an RPC envelope carries neither `result` nor `error`
pub const NO_RESULT_CODE: i64 = -32000;

#[derive(Debug, Clone, Error)]
pub enum PodError {
    /// Network or HTTP-status failure reaching a remote peer
    #[error("transport error for {endpoint}: {message}")]
    Transport {
        endpoint: String,
        status: Option<u16>,
        message: String,
    },

    /// Response did not have the expected shape
    #[error("invalid response for {method}: {message}")]
    ProtocolValidation { method: String, message: String },

    /// Remote peer reported an application-level error
    #[error("rpc error {code} from {method}: {message}")]
    Rpc {
        method: String,
        code: i64,
        message: String,
        data: Option<serde_json::Value>,
    },

    /// Third-party HTTP API failure
    #[error("{service} failed: {message}")]
    ExternalService {
        service: String,
        status: Option<u16>,
        message: String,
    },

    /// Caller supplied invalid input
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, PodError>;

impl PodError {
    pub fn transport(endpoint: impl Into<String>, message: impl ToString) -> Self {
        PodError::Transport {
            endpoint: endpoint.into(),
            status: None,
            message: message.to_string(),
        }
    }

    pub fn external(service: impl Into<String>, message: impl ToString) -> Self {
        PodError::ExternalService {
            service: service.into(),
            status: None,
            message: message.to_string(),
        }
    }

    /// Remote RPC error code, if this is an `Rpc` error
    pub fn rpc_code(&self) -> Option<i64> {
        match self {
            PodError::Rpc { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// HTTP status carried by a transport or provider failure
    pub fn status(&self) -> Option<u16> {
        match self {
            PodError::Transport { status, .. } | PodError::ExternalService { status, .. } => *status,
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for PodError {
    fn from(e: rusqlite::Error) -> Self {
        PodError::Store(e.to_string())
    }
}

impl From<serde_json::Error> for PodError {
    fn from(e: serde_json::Error) -> Self {
        PodError::Store(format!("json encoding: {}", e))
    }
}
