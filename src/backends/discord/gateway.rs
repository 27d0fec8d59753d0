//! Discord gateway payload types and opcode/intent constants.

use serde::Deserialize;

pub mod opcode {
    pub const DISPATCH: i64 = 0;
    pub const HEARTBEAT: i64 = 1;
    pub const IDENTIFY: i64 = 2;
    pub const RESUME: i64 = 6;
    pub const RECONNECT: i64 = 7;
    pub const INVALID_SESS: i64 = 9;
    pub const HELLO: i64 = 10;
    pub const HEARTBEAT_ACK: i64 = 11;
}

pub mod intent {
    pub const GUILDS: i64 = 1 << 0;
    pub const GUILD_MESSAGES: i64 = 1 << 9;
    pub const GUILD_MESSAGE_REACTIONS: i64 = 1 << 10;
}

/// The connection lifecycle. `Reconnecting` restarts the identify
/// handshake on the same process after INVALID_SESS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Connecting,
    Identifying,
    AwaitingReady,
    Connected,
    Disconnecting,
    Reconnecting,
}

/// The generic gateway envelope: op, data, sequence, event type.
#[derive(Debug, Deserialize)]
pub struct Payload {
    pub op: i64,
    #[serde(default)]
    pub d: serde_json::Value,
    #[serde(default)]
    pub s: Option<i64>,
    #[serde(default)]
    pub t: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Hello {
    pub heartbeat_interval: u64,
}

#[derive(Debug, Deserialize)]
pub struct GatewayBot {
    pub url: String,
    pub session_start_limit: SessionStartLimit,
}

#[derive(Debug, Deserialize)]
pub struct SessionStartLimit {
    pub remaining: i64,
    #[serde(default)]
    pub reset_after: i64,
}

pub fn identify_payload(token: &str) -> serde_json::Value {
    serde_json::json!({
        "op": opcode::IDENTIFY,
        "d": {
            "token": token,
            "compress": false,
            "intents": intent::GUILDS | intent::GUILD_MESSAGES | intent::GUILD_MESSAGE_REACTIONS,
            "guild_subscriptions": false,
            "properties": {
                "$os": std::env::consts::OS,
                "$browser": "ikura",
                "$device": "ikura",
            },
        },
    })
}

pub fn heartbeat_payload(sequence: Option<i64>) -> serde_json::Value {
    serde_json::json!({
        "op": opcode::HEARTBEAT,
        "d": sequence,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_parses() {
        let raw = r#"{"op":10,"d":{"heartbeat_interval":41250},"s":null,"t":null}"#;
        let payload: Payload = serde_json::from_str(raw).unwrap();
        assert_eq!(payload.op, opcode::HELLO);

        let hello: Hello = serde_json::from_value(payload.d).unwrap();
        assert_eq!(hello.heartbeat_interval, 41250);
    }

    #[test]
    fn test_dispatch_envelope_carries_sequence_and_type() {
        let raw = r#"{"op":0,"d":{},"s":42,"t":"MESSAGE_CREATE"}"#;
        let payload: Payload = serde_json::from_str(raw).unwrap();
        assert_eq!(payload.s, Some(42));
        assert_eq!(payload.t.as_deref(), Some("MESSAGE_CREATE"));
    }

    #[test]
    fn test_heartbeat_payload_shapes() {
        assert_eq!(
            heartbeat_payload(None).to_string(),
            r#"{"d":null,"op":1}"#
        );
        assert_eq!(
            heartbeat_payload(Some(7)).to_string(),
            r#"{"d":7,"op":1}"#
        );
    }
}
