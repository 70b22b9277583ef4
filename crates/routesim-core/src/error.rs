//! Error types surfaced by the substrate.
//!
//! Per the spec's error-handling design, only configuration errors are expected to
//! reach an operator; everything else (unknown link endpoints, empty mailboxes, handler
//! panics) is absorbed by the loops that encounter it and logged instead.

use thiserror::Error;

/// A configuration file failed validation before any task was started.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("address {addr:?} is used by both a router and a client")]
    DuplicateAddress { addr: String },

    #[error("link references unknown address {addr:?}")]
    UnknownLinkAddress { addr: String },

    #[error("change event references unknown address {addr:?}")]
    UnknownChangeAddress { addr: String },

    #[error("correct_routes entry references unknown address {addr:?}")]
    UnknownRouteAddress { addr: String },

    #[error("link ({a1:?}, {a2:?}) reuses port {port} already used on {owner:?}")]
    DuplicatePort {
        a1: String,
        a2: String,
        port: u32,
        owner: String,
    },

    #[error("`down` change targets link ({a1:?}, {a2:?}) which was never declared")]
    UnknownLink { a1: String, a2: String },

    #[error("end_time must be positive, got {0}")]
    NonPositiveEndTime(i64),

    #[error("client_send_rate must be positive, got {0}")]
    NonPositiveSendRate(i64),

    #[error("{field} must not be empty")]
    EmptyField { field: &'static str },

    #[error("malformed change event at index {index}: {reason}")]
    MalformedChange { index: usize, reason: String },
}
