//! Wire message types for both channels.
//!
//! One enum covers everything: the reliable asset channel carries
//! `Manifest`, `NeedChunks`, `Chunk`, `ScriptPush`, and `GameStart`; the
//! lossy live channel carries `Input` and `StateHash`. The byte layouts
//! live in [`super::codec`]; the opcode constants here are the single
//! source of truth for frame tags.

use crate::assets::Manifest;
use crate::input::InputMask;
use crate::Frame;

/// Opcode byte for [`Message::Manifest`].
pub const OPCODE_MANIFEST: u8 = 0x01;
/// Opcode byte for [`Message::NeedChunks`].
pub const OPCODE_NEED_CHUNKS: u8 = 0x02;
/// Opcode byte for [`Message::Chunk`].
pub const OPCODE_CHUNK: u8 = 0x03;
/// Opcode byte for [`Message::Input`].
pub const OPCODE_INPUT: u8 = 0x10;
/// Opcode byte for [`Message::StateHash`].
pub const OPCODE_STATE_HASH: u8 = 0x11;
/// Opcode byte for [`Message::ScriptPush`].
pub const OPCODE_SCRIPT_PUSH: u8 = 0x20;
/// Opcode byte for [`Message::GameStart`].
pub const OPCODE_GAME_START: u8 = 0x22;

/// A decoded wire message from either channel.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Announces an asset bundle (JSON payload on the wire).
    Manifest(Manifest),
    /// Requests the listed chunk hashes from the peer.
    NeedChunks {
        /// Requested content keys, in request order.
        hashes: Vec<String>,
    },
    /// Delivers one chunk's payload.
    Chunk {
        /// Content key of the chunk.
        hash: String,
        /// Byte offset of this payload within the chunk. The current
        /// protocol always sends whole chunks at offset 0.
        offset: u32,
        /// The chunk bytes.
        payload: Vec<u8>,
    },
    /// Pushes a logic script to the peer.
    ScriptPush {
        /// Display name of the script.
        name: String,
        /// UTF-8 script source.
        body: Vec<u8>,
    },
    /// Arms the peer's game-start gate. No payload.
    GameStart,
    /// One frame's input from the peer, with an acknowledgment.
    Input {
        /// The frame the mask belongs to.
        frame: Frame,
        /// The held-button mask.
        mask: InputMask,
        /// The sender's latest-confirmed remote frame.
        ack: Frame,
    },
    /// A periodic state fingerprint for desync detection.
    StateHash {
        /// The frame the fingerprint describes.
        frame: Frame,
        /// The 32-bit fingerprint.
        hash: u32,
    },
}

impl Message {
    /// The opcode byte this message encodes under.
    #[must_use]
    pub fn opcode(&self) -> u8 {
        match self {
            Message::Manifest(_) => OPCODE_MANIFEST,
            Message::NeedChunks { .. } => OPCODE_NEED_CHUNKS,
            Message::Chunk { .. } => OPCODE_CHUNK,
            Message::ScriptPush { .. } => OPCODE_SCRIPT_PUSH,
            Message::GameStart => OPCODE_GAME_START,
            Message::Input { .. } => OPCODE_INPUT,
            Message::StateHash { .. } => OPCODE_STATE_HASH,
        }
    }
}

// #########
// # TESTS #
// #########

#[cfg(test)]
#[allow(clippy::panic, clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn opcodes_match_the_wire_assignment() {
        assert_eq!(OPCODE_MANIFEST, 0x01);
        assert_eq!(OPCODE_NEED_CHUNKS, 0x02);
        assert_eq!(OPCODE_CHUNK, 0x03);
        assert_eq!(OPCODE_INPUT, 0x10);
        assert_eq!(OPCODE_STATE_HASH, 0x11);
        assert_eq!(OPCODE_SCRIPT_PUSH, 0x20);
        assert_eq!(OPCODE_GAME_START, 0x22);
    }

    #[test]
    fn message_reports_its_opcode() {
        assert_eq!(Message::GameStart.opcode(), OPCODE_GAME_START);
        let input = Message::Input {
            frame: Frame::new(1),
            mask: InputMask::NONE,
            ack: Frame::ZERO,
        };
        assert_eq!(input.opcode(), OPCODE_INPUT);
    }
}
