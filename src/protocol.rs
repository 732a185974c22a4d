//! Handoff wire messages.
//!
//! Distributor → worker: `{"act":"newconn","key":<distributor key>}` sent
//! together with the connection handle.
//!
//! Worker → distributor: `{"accepted":<bool>}`.
//!
//! Transports that cross a process boundary serialize these with
//! `serde_json`; in-process transports pass them as values.

use serde::{Deserialize, Serialize};

/// Message action. Only connection handoff exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Act {
    NewConn,
}

/// Announces a connection handle to a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewConn {
    pub act: Act,
    /// Key of the distributor that owns the listening socket.
    pub key: String,
}

impl NewConn {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            act: Act::NewConn,
            key: key.into(),
        }
    }
}

/// Worker's answer to a `NewConn`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub accepted: bool,
}

impl Ack {
    pub const ACCEPTED: Ack = Ack { accepted: true };
    pub const REJECTED: Ack = Ack { accepted: false };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newconn_wire_shape() {
        let json = serde_json::to_value(NewConn::new("0.0.0.0:8080")).unwrap();
        assert_eq!(json, serde_json::json!({ "act": "newconn", "key": "0.0.0.0:8080" }));
    }

    #[test]
    fn ack_parses_worker_reply() {
        let ack: Ack = serde_json::from_str(r#"{"accepted":false}"#).unwrap();
        assert_eq!(ack, Ack::REJECTED);
        assert!(serde_json::from_str::<Ack>(r#"{"act":"newconn"}"#).is_err());
    }
}
