//! Error types for the agent's collaborators and pipelines.
//!
//! Only [`LinkError`] escalates to a restart. Every other error is absorbed by
//! the component that hit it and reported over the ack/log topics.

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("device identity must not be empty")]
    Empty,
    #[error("device identity {0:?} contains a topic separator or wildcard")]
    InvalidCharacter(String),
}

/// Network association failed; fatal until restart.
#[derive(Error, Debug)]
pub enum LinkError {
    #[error("could not resolve {host}: {source}")]
    Resolve {
        host: String,
        #[source]
        source: std::io::Error,
    },
    #[error("no route to {0}")]
    NoRoute(String),
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("broker session not established")]
    NotConnected,
    #[error("broker connection failed: {0}")]
    Connect(String),
    #[error("timed out after {0:?} waiting for broker")]
    Timeout(Duration),
    #[error("request rejected by client: {0}")]
    Request(String),
}

#[derive(Error, Debug)]
pub enum FetchError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("not enough space for image: need {required} bytes, have {available}")]
    InsufficientSpace { required: u64, available: u64 },
    #[error("no write session open")]
    NoSession,
    #[error("image incomplete: {written} of {expected} bytes")]
    Incomplete { written: u64, expected: u64 },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Why a single update attempt failed. The `Display` text is what the
/// operator sees in the ack.
#[derive(Error, Debug)]
pub enum UpdateFailure {
    #[error("Failed to fetch update: {0}")]
    Fetch(String),
    #[error("Failed to fetch update: HTTP {0}")]
    HttpStatus(u16),
    #[error("Failed to fetch update: unknown content length")]
    UnknownLength,
    #[error("Not enough space: {0}")]
    NoSpace(StorageError),
    #[error("OTA failed: transfer stalled for {0:?}")]
    Stalled(Duration),
    #[error("OTA failed: {0}")]
    Body(String),
    #[error("OTA write failed: {0}")]
    Write(StorageError),
    #[error("OTA failed: wrote {written} of {expected} bytes")]
    ShortWrite { written: u64, expected: u64 },
    #[error("OTA failed: image not finalized: {0}")]
    Finalize(String),
}

impl UpdateFailure {
    /// Short stable label for structured logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            UpdateFailure::Fetch(_) => "fetch",
            UpdateFailure::HttpStatus(_) => "http_status",
            UpdateFailure::UnknownLength => "unknown_length",
            UpdateFailure::NoSpace(_) => "no_space",
            UpdateFailure::Stalled(_) => "stalled",
            UpdateFailure::Body(_) => "body",
            UpdateFailure::Write(_) => "write",
            UpdateFailure::ShortWrite { .. } => "short_write",
            UpdateFailure::Finalize(_) => "finalize",
        }
    }
}

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("malformed command payload: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("unknown command {0:?}")]
    Unknown(String),
}
