//! Byte-exact encoding and decoding of wire messages.
//!
//! Every codec here is a pure function: no session state, no allocation
//! surprises, and a hard guarantee that decoding never panics on any
//! input. All multi-byte integers are little-endian. The binary layouts
//! are protocol, so nothing in this module goes through a serialization
//! framework — the one structured payload (the manifest) travels as UTF-8
//! JSON and uses serde_json.

use std::fmt;

use crate::assets::Manifest;
use crate::input::InputMask;
use crate::network::messages::{
    Message, OPCODE_CHUNK, OPCODE_GAME_START, OPCODE_INPUT, OPCODE_MANIFEST, OPCODE_NEED_CHUNKS,
    OPCODE_SCRIPT_PUSH, OPCODE_STATE_HASH,
};
use crate::Frame;

/// Longest length-prefixed string the wire can carry (u8 length).
pub const MAX_PREFIXED_STRING: usize = u8::MAX as usize;

/// Most hashes a single `NeedChunks` frame can carry (u16 count).
pub const MAX_NEED_CHUNKS: usize = u16::MAX as usize;

/// Errors from encoding or decoding a wire frame.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CodecError {
    /// The frame had no bytes at all.
    Empty,
    /// The opcode byte is not one this protocol defines.
    UnknownOpcode(u8),
    /// The frame ended before a field could be read.
    Truncated {
        /// The opcode being decoded.
        opcode: u8,
        /// Bytes the next field needed.
        expected: usize,
        /// Bytes remaining.
        actual: usize,
    },
    /// A length-prefixed string was not valid UTF-8.
    InvalidUtf8 {
        /// The opcode being decoded.
        opcode: u8,
    },
    /// The manifest payload was not valid manifest JSON.
    BadManifestJson(String),
    /// A field exceeds what its length prefix can represent.
    FieldTooLong {
        /// Which field.
        field: &'static str,
        /// Actual length.
        len: usize,
        /// Maximum representable length.
        max: usize,
    },
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "empty frame"),
            Self::UnknownOpcode(op) => write!(f, "unknown opcode {op:#04x}"),
            Self::Truncated {
                opcode,
                expected,
                actual,
            } => write!(
                f,
                "truncated frame (opcode {opcode:#04x}): needed {expected} bytes, had {actual}"
            ),
            Self::InvalidUtf8 { opcode } => {
                write!(f, "invalid UTF-8 in frame (opcode {opcode:#04x})")
            }
            Self::BadManifestJson(msg) => write!(f, "bad manifest JSON: {msg}"),
            Self::FieldTooLong { field, len, max } => {
                write!(f, "{field} length {len} exceeds wire maximum {max}")
            }
        }
    }
}

impl std::error::Error for CodecError {}

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Encodes a message into a fresh byte vector.
///
/// # Errors
///
/// Fails only on unrepresentable values: a string longer than its u8
/// length prefix, more than 2¹⁶-1 requested hashes, or a manifest that
/// does not serialize (which serde_json only does for pathological maps).
pub fn encode(message: &Message) -> CodecResult<Vec<u8>> {
    let mut out = Vec::with_capacity(16);
    out.push(message.opcode());
    match message {
        Message::Manifest(manifest) => {
            let json = serde_json::to_vec(manifest)
                .map_err(|e| CodecError::BadManifestJson(e.to_string()))?;
            out.extend_from_slice(&json);
        }
        Message::NeedChunks { hashes } => {
            if hashes.len() > MAX_NEED_CHUNKS {
                return Err(CodecError::FieldTooLong {
                    field: "need-chunks count",
                    len: hashes.len(),
                    max: MAX_NEED_CHUNKS,
                });
            }
            out.extend_from_slice(&(hashes.len() as u16).to_le_bytes());
            for hash in hashes {
                push_prefixed_str(&mut out, "chunk hash", hash)?;
            }
        }
        Message::Chunk {
            hash,
            offset,
            payload,
        } => {
            push_prefixed_str(&mut out, "chunk hash", hash)?;
            out.extend_from_slice(&offset.to_le_bytes());
            out.extend_from_slice(payload);
        }
        Message::ScriptPush { name, body } => {
            push_prefixed_str(&mut out, "script name", name)?;
            out.extend_from_slice(&(body.len() as u32).to_le_bytes());
            out.extend_from_slice(body);
        }
        Message::GameStart => {}
        Message::Input { frame, mask, ack } => {
            out.extend_from_slice(&frame.raw().to_le_bytes());
            out.extend_from_slice(&mask.bits().to_le_bytes());
            out.extend_from_slice(&ack.raw().to_le_bytes());
        }
        Message::StateHash { frame, hash } => {
            out.extend_from_slice(&frame.raw().to_le_bytes());
            out.extend_from_slice(&hash.to_le_bytes());
        }
    }
    Ok(out)
}

/// Decodes one wire frame. Never panics; every malformed input maps to a
/// structured [`CodecError`] the caller drops and logs.
pub fn decode(bytes: &[u8]) -> CodecResult<Message> {
    let (&opcode, rest) = bytes.split_first().ok_or(CodecError::Empty)?;
    let mut reader = Reader::new(opcode, rest);
    match opcode {
        OPCODE_MANIFEST => {
            let manifest: Manifest = serde_json::from_slice(reader.take_rest())
                .map_err(|e| CodecError::BadManifestJson(e.to_string()))?;
            Ok(Message::Manifest(manifest))
        }
        OPCODE_NEED_CHUNKS => {
            let count = reader.read_u16()?;
            let mut hashes = Vec::with_capacity(usize::from(count).min(1024));
            for _ in 0..count {
                hashes.push(reader.read_prefixed_str()?);
            }
            Ok(Message::NeedChunks { hashes })
        }
        OPCODE_CHUNK => {
            let hash = reader.read_prefixed_str()?;
            let offset = reader.read_u32()?;
            let payload = reader.take_rest().to_vec();
            Ok(Message::Chunk {
                hash,
                offset,
                payload,
            })
        }
        OPCODE_SCRIPT_PUSH => {
            let name = reader.read_prefixed_str()?;
            let body_len = reader.read_u32()?;
            let body = reader.read_bytes(body_len as usize)?.to_vec();
            Ok(Message::ScriptPush { name, body })
        }
        OPCODE_GAME_START => Ok(Message::GameStart),
        OPCODE_INPUT => {
            let frame = Frame::new(reader.read_u16()?);
            let mask = InputMask::from_bits(reader.read_u16()?);
            let ack = Frame::new(reader.read_u16()?);
            Ok(Message::Input { frame, mask, ack })
        }
        OPCODE_STATE_HASH => {
            let frame = Frame::new(reader.read_u16()?);
            let hash = reader.read_u32()?;
            Ok(Message::StateHash { frame, hash })
        }
        other => Err(CodecError::UnknownOpcode(other)),
    }
}

fn push_prefixed_str(out: &mut Vec<u8>, field: &'static str, value: &str) -> CodecResult<()> {
    if value.len() > MAX_PREFIXED_STRING {
        return Err(CodecError::FieldTooLong {
            field,
            len: value.len(),
            max: MAX_PREFIXED_STRING,
        });
    }
    out.push(value.len() as u8);
    out.extend_from_slice(value.as_bytes());
    Ok(())
}

/// Bounds-checked little-endian cursor over one frame's payload.
struct Reader<'a> {
    opcode: u8,
    bytes: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(opcode: u8, bytes: &'a [u8]) -> Self {
        Self { opcode, bytes }
    }

    fn read_bytes(&mut self, len: usize) -> CodecResult<&'a [u8]> {
        if self.bytes.len() < len {
            return Err(CodecError::Truncated {
                opcode: self.opcode,
                expected: len,
                actual: self.bytes.len(),
            });
        }
        let (head, tail) = self.bytes.split_at(len);
        self.bytes = tail;
        Ok(head)
    }

    fn read_u8(&mut self) -> CodecResult<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    fn read_u16(&mut self) -> CodecResult<u16> {
        let bytes = self.read_bytes(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    fn read_u32(&mut self) -> CodecResult<u32> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_prefixed_str(&mut self) -> CodecResult<String> {
        let len = self.read_u8()?;
        let bytes = self.read_bytes(usize::from(len))?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| CodecError::InvalidUtf8 {
                opcode: self.opcode,
            })
    }

    fn take_rest(&mut self) -> &'a [u8] {
        std::mem::take(&mut self.bytes)
    }
}

// #########
// # TESTS #
// #########

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::assets::{build_bundle, BundleKind};
    use crate::cas::Cas;

    fn roundtrip(message: Message) {
        let bytes = encode(&message).unwrap();
        assert_eq!(decode(&bytes).unwrap(), message);
    }

    #[test]
    fn manifest_roundtrip() {
        let cas = Cas::new();
        let manifest = build_bundle(
            &cas,
            "ryu",
            BundleKind::Sprite,
            &[(b"sheet-bytes", "image/png"), (b"{}", "application/json")],
            Some(1),
        );
        roundtrip(Message::Manifest(manifest));
    }

    #[test]
    fn need_chunks_roundtrip() {
        roundtrip(Message::NeedChunks {
            hashes: vec![Cas::hash_of(b"a"), Cas::hash_of(b"b")],
        });
    }

    #[test]
    fn empty_need_chunks_is_valid() {
        let bytes = encode(&Message::NeedChunks { hashes: vec![] }).unwrap();
        assert_eq!(bytes, vec![0x02, 0, 0]);
        roundtrip(Message::NeedChunks { hashes: vec![] });
    }

    #[test]
    fn chunk_roundtrip() {
        roundtrip(Message::Chunk {
            hash: Cas::hash_of(b"blob"),
            offset: 0,
            payload: vec![0xDE, 0xAD, 0xBE, 0xEF],
        });
    }

    #[test]
    fn chunk_with_empty_payload_roundtrips() {
        roundtrip(Message::Chunk {
            hash: Cas::hash_of(b"empty"),
            offset: 0,
            payload: vec![],
        });
    }

    #[test]
    fn script_push_roundtrip() {
        roundtrip(Message::ScriptPush {
            name: "fighter.logic".to_owned(),
            body: b"fn tick(frame, input) {}".to_vec(),
        });
    }

    #[test]
    fn game_start_is_one_byte() {
        let bytes = encode(&Message::GameStart).unwrap();
        assert_eq!(bytes, vec![0x22]);
        roundtrip(Message::GameStart);
    }

    #[test]
    fn input_layout_is_little_endian() {
        let message = Message::Input {
            frame: Frame::new(0x0201),
            mask: InputMask::from_bits(0x0108),
            ack: Frame::new(0x0403),
        };
        let bytes = encode(&message).unwrap();
        assert_eq!(bytes, vec![0x10, 0x01, 0x02, 0x08, 0x01, 0x03, 0x04]);
        roundtrip(message);
    }

    #[test]
    fn state_hash_layout_is_little_endian() {
        let message = Message::StateHash {
            frame: Frame::new(0x0010),
            hash: 0xAABB_CCDD,
        };
        let bytes = encode(&message).unwrap();
        assert_eq!(bytes, vec![0x11, 0x10, 0x00, 0xDD, 0xCC, 0xBB, 0xAA]);
        roundtrip(message);
    }

    #[test]
    fn decode_rejects_empty_and_unknown() {
        assert_eq!(decode(&[]), Err(CodecError::Empty));
        assert_eq!(decode(&[0x7F]), Err(CodecError::UnknownOpcode(0x7F)));
    }

    #[test]
    fn decode_rejects_truncated_input_frame() {
        // Input needs 6 payload bytes; give it 3.
        let result = decode(&[0x10, 0x01, 0x02, 0x08]);
        assert!(matches!(result, Err(CodecError::Truncated { opcode: 0x10, .. })));
    }

    #[test]
    fn decode_rejects_truncated_need_chunks() {
        // Claims one hash of length 10 but supplies 2 bytes.
        let result = decode(&[0x02, 0x01, 0x00, 0x0A, b'a', b'b']);
        assert!(matches!(result, Err(CodecError::Truncated { .. })));
    }

    #[test]
    fn decode_rejects_script_push_with_short_body() {
        let mut bytes = vec![0x20, 0x01, b'f'];
        bytes.extend_from_slice(&100u32.to_le_bytes());
        bytes.extend_from_slice(b"short");
        assert!(matches!(decode(&bytes), Err(CodecError::Truncated { .. })));
    }

    #[test]
    fn decode_rejects_bad_manifest_json() {
        let bytes = [0x01, b'{', b'b', b'a', b'd'];
        assert!(matches!(
            decode(&bytes),
            Err(CodecError::BadManifestJson(_))
        ));
    }

    #[test]
    fn decode_rejects_invalid_utf8_hash() {
        let bytes = [0x03, 0x02, 0xFF, 0xFE, 0, 0, 0, 0];
        assert_eq!(
            decode(&bytes),
            Err(CodecError::InvalidUtf8 { opcode: 0x03 })
        );
    }

    #[test]
    fn encode_rejects_oversized_script_name() {
        let result = encode(&Message::ScriptPush {
            name: "n".repeat(300),
            body: vec![],
        });
        assert!(matches!(result, Err(CodecError::FieldTooLong { .. })));
    }

    #[test]
    fn decoded_input_mask_drops_undefined_bits() {
        let bytes = [0x10, 0x00, 0x00, 0xFF, 0xFF, 0x00, 0x00];
        match decode(&bytes).unwrap() {
            Message::Input { mask, .. } => assert_eq!(mask.bits(), InputMask::VALID_BITS),
            other => panic!("unexpected message {other:?}"),
        }
    }
}
