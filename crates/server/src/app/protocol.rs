use engine::{Direction, Snapshot};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub(crate) enum ProtocolError {
    #[error("invalid message at {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode {what}: {source}")]
    Encode {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// One newline-delimited JSON line sent by a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub(crate) enum ClientMessage {
    Join {
        #[serde(rename = "roomId")]
        room_id: String,
        token: String,
    },
    Keypress {
        direction: Direction,
    },
    Keyrelease {
        direction: Direction,
    },
}

impl ClientMessage {
    /// `(direction, is_down)` for key messages.
    pub(crate) fn key_change(&self) -> Option<(Direction, bool)> {
        match self {
            ClientMessage::Keypress { direction } => Some((*direction, true)),
            ClientMessage::Keyrelease { direction } => Some((*direction, false)),
            ClientMessage::Join { .. } => None,
        }
    }
}

/// Out-of-band replies that are not snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub(crate) enum ServerControl {
    Welcome {
        #[serde(rename = "roomId")]
        room_id: String,
        #[serde(rename = "userId")]
        user_id: String,
        #[serde(rename = "netId")]
        net_id: String,
    },
    Error {
        message: String,
    },
}

#[derive(Debug, Serialize)]
struct SnapshotEnvelope<'a> {
    snapshot: &'a Snapshot,
    #[serde(rename = "roomId")]
    room_id: &'a str,
}

pub(crate) fn decode_client_message(bytes: &[u8]) -> Result<ClientMessage, ProtocolError> {
    let mut deserializer = serde_json::Deserializer::from_slice(bytes);
    let message = serde_path_to_error::deserialize::<_, ClientMessage>(&mut deserializer)
        .map_err(|error| {
            let path = error.path().to_string();
            ProtocolError::Decode {
                path,
                source: error.into_inner(),
            }
        })?;
    deserializer
        .end()
        .map_err(|source| ProtocolError::Decode {
            path: ".".to_string(),
            source,
        })?;
    Ok(message)
}

pub(crate) fn encode_snapshot_line(
    room_id: &str,
    snapshot: &Snapshot,
) -> Result<String, ProtocolError> {
    serde_json::to_string(&SnapshotEnvelope { snapshot, room_id }).map_err(|source| {
        ProtocolError::Encode {
            what: "snapshot",
            source,
        }
    })
}

pub(crate) fn encode_control_line(control: &ServerControl) -> Result<String, ProtocolError> {
    serde_json::to_string(control).map_err(|source| ProtocolError::Encode {
        what: "control message",
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_join_and_key_messages() {
        assert_eq!(
            decode_client_message(br#"{"type":"join","roomId":"r1","token":"dev.amy"}"#)
                .expect("join"),
            ClientMessage::Join {
                room_id: "r1".to_string(),
                token: "dev.amy".to_string(),
            }
        );
        let press = decode_client_message(br#"{"type":"keypress","direction":"left"}"#)
            .expect("keypress");
        assert_eq!(press.key_change(), Some((Direction::Left, true)));
        let release = decode_client_message(br#"{"type":"keyrelease","direction":"up"}"#)
            .expect("keyrelease");
        assert_eq!(release.key_change(), Some((Direction::Up, false)));
    }

    #[test]
    fn rejects_unknown_direction_and_missing_fields() {
        let err = decode_client_message(br#"{"type":"keypress","direction":"north"}"#)
            .expect_err("unknown direction");
        assert!(err.to_string().contains("unknown variant"));

        let err = decode_client_message(br#"{"type":"keypress"}"#).expect_err("no direction");
        assert!(err.to_string().contains("direction"));

        let err = decode_client_message(br#"{"type":"jump"}"#).expect_err("unknown type");
        assert!(matches!(err, ProtocolError::Decode { .. }));
    }

    #[test]
    fn rejects_trailing_garbage() {
        let err = decode_client_message(br#"{"type":"keypress","direction":"up"} x"#)
            .expect_err("trailing input");
        assert!(matches!(err, ProtocolError::Decode { .. }));
    }

    #[test]
    fn snapshot_line_wraps_snapshot_with_room_id() {
        let line = encode_snapshot_line("r1", &Snapshot::empty()).expect("encode");
        assert_eq!(
            line,
            r#"{"snapshot":{"tick":0,"time_ms":0,"state":[]},"roomId":"r1"}"#
        );
    }

    #[test]
    fn control_lines_are_tagged_by_type() {
        let line = encode_control_line(&ServerControl::Error {
            message: "nope".to_string(),
        })
        .expect("encode");
        assert_eq!(line, r#"{"type":"error","message":"nope"}"#);
    }
}
