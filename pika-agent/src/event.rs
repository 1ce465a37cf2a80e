//! SSH login event, the unit carried over the hook socket.

use serde::{Deserialize, Serialize};

/// Username used when PAM did not provide one.
pub const UNKNOWN_USER: &str = "unknown";
/// Source address used when neither PAM nor sshd provided one.
pub const UNKNOWN_HOST: &str = "localhost";
/// Placeholder for TTY and auth method when they cannot be determined.
pub const UNKNOWN: &str = "unknown";
/// Status assigned to session-open events.
pub const STATUS_SUCCESS: &str = "success";

/// One observed SSH session start.
///
/// Serialized as a single JSON object per datagram. The descriptive field
/// names are accepted as aliases when decoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginEvent {
    #[serde(default)]
    pub username: String,
    #[serde(rename = "ip", alias = "sourceIP", default)]
    pub source_ip: String,
    #[serde(
        rename = "port",
        alias = "sourcePort",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub source_port: Option<String>,
    /// Epoch milliseconds. Zero means "not set by the sender".
    #[serde(rename = "timestamp", alias = "timestampMillis", default)]
    pub timestamp_millis: i64,
    #[serde(default)]
    pub status: String,
    #[serde(
        rename = "method",
        alias = "authMethod",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub auth_method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tty: Option<String>,
    /// Hook process id; only useful for correlating diagnostics.
    #[serde(
        rename = "sessionId",
        alias = "sessionID",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    pub session_id: String,
}

impl LoginEvent {
    /// Decode one datagram payload.
    pub fn decode(payload: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(payload)
    }

    /// Encode for a single datagram send.
    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    /// Fill in the fields the listener guarantees downstream.
    pub fn backfill(&mut self, now_millis: i64) {
        if self.username.is_empty() {
            self.username = UNKNOWN_USER.to_string();
        }
        if self.source_ip.is_empty() {
            self.source_ip = UNKNOWN_HOST.to_string();
        }
        if self.timestamp_millis == 0 {
            self.timestamp_millis = now_millis;
        }
        if self.status.is_empty() {
            self.status = STATUS_SUCCESS.to_string();
        }
    }
}
