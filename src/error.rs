//! Error types for the runtime.
//!
//! Errors are structured enums with numeric fields, formatted lazily in
//! their `Display` impls so construction stays allocation-free on hot
//! paths. The wire layer has its own [`CodecError`]; everything else
//! surfaces through [`RingsideError`].
//!
//! By design, no error propagates out of the simulation step: script
//! failures fall back to direct input mapping, late inputs are dropped,
//! and malformed frames are logged and discarded. The variants here cover
//! the fallible construction and operator paths.

use std::error::Error;
use std::fmt;

use crate::assets::ManifestError;
use crate::network::codec::CodecError;

/// Crate-level error type.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum RingsideError {
    /// The requested history length is outside the supported range.
    InvalidHistoryLength {
        /// The requested length.
        requested: usize,
        /// Minimum supported length.
        min: usize,
        /// Maximum supported length (bounded by wrap-aware frame compare).
        max: usize,
    },
    /// The requested tick rate is unusable.
    InvalidTickRate {
        /// The requested rate in Hz.
        hz: u32,
    },
    /// Backpressure watermarks are inconsistent (low above high, or zero).
    InvalidWatermarks {
        /// High-water mark in bytes.
        high: usize,
        /// Low-water threshold in bytes.
        low: usize,
    },
    /// The state-hash emit interval must be non-zero.
    InvalidHashInterval,
    /// The script failed to compile; the previous engine is untouched.
    ScriptCompile {
        /// The compiler's message, if the VM produced one.
        message: String,
    },
    /// A wire frame could not be encoded or decoded.
    Codec(CodecError),
    /// A manifest failed structural validation before sending.
    Manifest(ManifestError),
}

impl fmt::Display for RingsideError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidHistoryLength {
                requested,
                min,
                max,
            } => write!(
                f,
                "history length {requested} outside supported range {min}..={max}"
            ),
            Self::InvalidTickRate { hz } => write!(f, "tick rate {hz} Hz is unusable"),
            Self::InvalidWatermarks { high, low } => write!(
                f,
                "backpressure watermarks inconsistent (high: {high}, low: {low})"
            ),
            Self::InvalidHashInterval => write!(f, "state-hash interval must be non-zero"),
            Self::ScriptCompile { message } => write!(f, "script failed to compile: {message}"),
            Self::Codec(err) => write!(f, "wire codec error: {err}"),
            Self::Manifest(err) => write!(f, "invalid manifest: {err}"),
        }
    }
}

impl Error for RingsideError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Codec(err) => Some(err),
            Self::Manifest(err) => Some(err),
            _ => None,
        }
    }
}

impl From<CodecError> for RingsideError {
    fn from(err: CodecError) -> Self {
        Self::Codec(err)
    }
}

impl From<ManifestError> for RingsideError {
    fn from(err: ManifestError) -> Self {
        Self::Manifest(err)
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
    fn display_includes_the_numbers() {
        let err = RingsideError::InvalidHistoryLength {
            requested: 16,
            min: 64,
            max: 32768,
        };
        let msg = err.to_string();
        assert!(msg.contains("16"));
        assert!(msg.contains("64"));
        assert!(msg.contains("32768"));
    }

    #[test]
    fn codec_error_carries_source() {
        let err = RingsideError::from(CodecError::Empty);
        assert!(err.source().is_some());
        assert!(err.to_string().contains("wire codec error"));
    }

    #[test]
    fn script_compile_surfaces_message() {
        let err = RingsideError::ScriptCompile {
            message: "unexpected token".to_owned(),
        };
        assert!(err.to_string().contains("unexpected token"));
    }
}
