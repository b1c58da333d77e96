//! Per-connection parser state: the irrevocable protocol detection result
//! and the shrink-policy frame counter.

use crate::protocol::{detect_protocol, Protocol};

/// Errors a connection's parser state can hit.
///
/// Malformed binary headers are reported separately, directly by the frame
/// dispatcher through [`crate::dispatch::FrameCallbacks::parse_error`], since
/// header parsing never touches this type.
#[derive(Debug)]
pub enum DispatchError {
    /// The first byte observed on this connection did not match any known
    /// protocol.
    UnknownProtocol(u8),
}

impl std::fmt::Display for DispatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DispatchError::UnknownProtocol(byte) => {
                write!(f, "unrecognized first byte 0x{byte:02x}")
            }
        }
    }
}

impl std::error::Error for DispatchError {}

/// Tracks the protocol a connection has settled on, once its first byte has
/// been observed, plus the frame counter the buffer's shrink policy reads.
pub struct ParserState {
    protocol: Protocol,
    messages_parsed_since_adjust: u64,
}

impl ParserState {
    pub fn new() -> Self {
        Self { protocol: Protocol::Unknown, messages_parsed_since_adjust: 0 }
    }

    /// The protocol this connection has settled on, or `Unknown` if no byte
    /// has been observed yet.
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// `true` once detection has run, successfully or not.
    pub fn is_detected(&self) -> bool {
        self.protocol != Protocol::Unknown
    }

    /// Classifies the connection's first byte. Detection is irrevocable:
    /// calling this again after a successful classification is a no-op.
    pub fn observe_first_byte(&mut self, byte: u8) -> Result<(), DispatchError> {
        if self.protocol != Protocol::Unknown {
            return Ok(());
        }
        let detected = detect_protocol(byte);
        if detected == Protocol::Unknown {
            return Err(DispatchError::UnknownProtocol(byte));
        }
        self.protocol = detected;
        Ok(())
    }

    pub fn messages_parsed_since_adjust(&mut self) -> &mut u64 {
        &mut self.messages_parsed_since_adjust
    }

    pub fn record_delivered_frame(&mut self) {
        self.messages_parsed_since_adjust += 1;
    }
}

impl Default for ParserState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detection_is_irrevocable() {
        let mut state = ParserState::new();
        state.observe_first_byte(crate::protocol::umbrella::MAGIC).unwrap();
        assert_eq!(state.protocol(), Protocol::Umbrella);
        // a later, differently-shaped byte does not reclassify.
        state.observe_first_byte(crate::protocol::caret::MAGIC).unwrap();
        assert_eq!(state.protocol(), Protocol::Umbrella);
    }

    #[test]
    fn unknown_first_byte_is_an_error() {
        let mut state = ParserState::new();
        assert!(state.observe_first_byte(b'z').is_err());
        assert_eq!(state.protocol(), Protocol::Unknown);
    }
}
