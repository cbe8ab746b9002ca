use thiserror::Error;

use crate::net::envelope::Envelope;
use crate::net::messages::{ClientMessage, ServerMessage};

/// Current protocol version, reported by `GET /healthz`.
pub const PROTOCOL_VERSION: u8 = 1;

/// Maximum accepted inbound frame size.
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024; // 64 KiB

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("failed to decode message: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("frame of {0} bytes exceeds the frame size limit")]
    TooLarge(usize),
}

/// Wrap a server message in a fresh envelope and encode it as a JSON text
/// frame.
pub fn encode_server_message(msg: &ServerMessage) -> Result<String, ProtocolError> {
    let envelope = Envelope::new(msg.clone());
    serde_json::to_string(&envelope).map_err(ProtocolError::Encode)
}

/// Decode an inbound text frame into a client envelope, enforcing the size
/// cap before touching the parser.
pub fn decode_client_envelope(text: &str) -> Result<Envelope<ClientMessage>, ProtocolError> {
    if text.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::TooLarge(text.len()));
    }
    serde_json::from_str(text).map_err(ProtocolError::Decode)
}

/// Decode a server envelope. Clients and the integration tests use this; the
/// server itself never parses its own output.
pub fn decode_server_envelope(text: &str) -> Result<Envelope<ServerMessage>, ProtocolError> {
    serde_json::from_str(text).map_err(ProtocolError::Decode)
}

/// Encode a client message; used by test clients.
pub fn encode_client_message(msg: &ClientMessage) -> Result<String, ProtocolError> {
    let envelope = Envelope::new(msg.clone());
    serde_json::to_string(&envelope).map_err(ProtocolError::Encode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::messages::{EmptyMsg, ServerMessage};

    #[test]
    fn server_message_encodes_and_decodes() {
        let text = encode_server_message(&ServerMessage::HideScoreboard(EmptyMsg {})).unwrap();
        let envelope = decode_server_envelope(&text).unwrap();
        assert_eq!(envelope.msg, ServerMessage::HideScoreboard(EmptyMsg {}));
    }

    #[test]
    fn oversized_frame_rejected_before_parsing() {
        let huge = " ".repeat(MAX_MESSAGE_SIZE + 1);
        assert!(matches!(
            decode_client_envelope(&huge),
            Err(ProtocolError::TooLarge(_))
        ));
    }

    #[test]
    fn unknown_type_is_a_decode_error() {
        let frame = r#"{"type":"NOT_A_THING","id":"01ARZ3NDEKTSV4RRFFQ69G5FAV","ts":0,"payload":{}}"#;
        assert!(matches!(
            decode_client_envelope(frame),
            Err(ProtocolError::Decode(_))
        ));
    }

    #[test]
    fn client_message_round_trips() {
        let text = encode_client_message(&crate::net::messages::ClientMessage::GetSessionState(
            EmptyMsg {},
        ))
        .unwrap();
        let envelope = decode_client_envelope(&text).unwrap();
        assert!(matches!(
            envelope.msg,
            crate::net::messages::ClientMessage::GetSessionState(_)
        ));
    }
}
