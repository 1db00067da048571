//! Protocol adapters. Each adapter turns one wire format into
//! [`DecodedFrame`](crate::ingest::DecodedFrame)s; the core never sees
//! connector internals.

pub mod json;
pub mod osc;

use thiserror::Error;

pub use json::JsonAdapter;
pub use osc::OscAdapter;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid JSON frame: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid OSC packet: {0}")]
    Osc(String),
    #[error("malformed message: {0}")]
    Malformed(String),
}

/// Connection lifecycle of a live source, as reported by the stream
/// task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectorStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Error,
}

impl std::fmt::Display for ConnectorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectorStatus::Disconnected => "DISCONNECTED",
            ConnectorStatus::Connecting => "CONNECTING",
            ConnectorStatus::Connected => "CONNECTED",
            ConnectorStatus::Reconnecting => "RECONNECTING",
            ConnectorStatus::Error => "ERROR",
        };
        f.write_str(s)
    }
}
