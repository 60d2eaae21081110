//! # Ringside
//!
//! Ringside is a peer-to-peer lockstep runtime for a two-player 2D
//! fighter, written in 100% safe Rust. Two peers exchange character
//! assets and logic scripts over a reliable channel, then co-simulate the
//! match frame-by-frame from the input stream alone: a lossy datagram
//! channel carries per-frame input masks, client-side prediction covers
//! the gaps, and a ring-buffered rollback engine repairs mispredictions
//! when remote inputs arrive late or out of order. There is no
//! authoritative server; both peers independently compute byte-identical
//! state and cross-check 32-bit fingerprints to detect divergence.
//!
//! The embedder supplies the outside world through trait seams: a
//! [`ScriptVm`] for the per-player logic programs, a [`ReliableChannel`]
//! and [`LiveChannel`] for the two transports, and a [`Viewer`] consuming
//! state snapshots and assembled asset bundles. Everything inside those
//! seams is deterministic by construction.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub use cas::Cas;
pub use error::RingsideError;
pub use input::InputMask;
pub use rollback::{RemoteInputOutcome, RollbackEngine};
pub use script::{Command, CommandList, ScriptVm};
pub use sessions::builder::SessionBuilder;
pub use sessions::config::RuntimeConfig;
pub use sessions::match_session::MatchSession;
pub use state::{Fighter, State};

pub mod assets;
pub mod cas;
pub mod error;
pub mod fixed;
pub mod hash;
pub mod input;
pub mod rollback;
pub mod script;
pub mod sim;
pub mod state;
/// The wire layer: message types, byte-exact codecs, and the two
/// channel engines.
pub mod network {
    pub mod asset_exchange;
    pub mod codec;
    pub mod live_channel;
    pub mod messages;
}
/// Session orchestration: builder, runtime configuration, and the 60 Hz
/// match loop.
pub mod sessions {
    pub mod builder;
    pub mod config;
    pub mod match_session;
}

// #############
// # CONSTANTS #
// #############

/// Nominal simulation rate in ticks per second.
pub const TICK_RATE_HZ: u32 = 60;

/// How often (in frames) a peer emits a state fingerprint by default.
pub const STATE_HASH_INTERVAL: u16 = 16;

/// A frame counter wrapping at 2¹⁶.
///
/// Sixteen bits keep the live datagrams compact at the cost of wraparound
/// every ~18.2 minutes at 60 Hz, so every ordering question is answered
/// with wrap-aware arithmetic: [`Frame::delta`] returns the signed
/// shortest distance between two frames, and "too old" is judged against
/// the history length, never by raw comparison.
///
/// # Examples
///
/// ```
/// use ringside::Frame;
///
/// let latest = Frame::new(10);
/// assert_eq!(Frame::new(7).delta(latest), -3);
/// assert_eq!(Frame::new(12).delta(latest), 2);
///
/// // Wrap-aware: one past the wrap point is still "one ahead".
/// assert_eq!(Frame::ZERO.delta(Frame::new(u16::MAX)), 1);
/// ```
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct Frame(u16);

impl Frame {
    /// Frame zero, where every seeded match starts.
    pub const ZERO: Frame = Frame(0);

    /// Creates a frame from its raw counter value.
    #[inline]
    #[must_use]
    pub const fn new(raw: u16) -> Self {
        Frame(raw)
    }

    /// Returns the raw counter value.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u16 {
        self.0
    }

    /// The following frame, wrapping at 2¹⁶.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Frame {
        Frame(self.0.wrapping_add(1))
    }

    /// The preceding frame, wrapping at 2¹⁶.
    #[inline]
    #[must_use]
    pub const fn prev(self) -> Frame {
        Frame(self.0.wrapping_sub(1))
    }

    /// The input-ring slot index for this frame (`frame & 0xFFFF`).
    #[inline]
    #[must_use]
    pub const fn slot(self) -> usize {
        self.0 as usize
    }

    /// Signed wrap-aware distance `self - other`, in frames.
    ///
    /// Positive means `self` is ahead of `other`. The result saturates the
    /// ambiguity of u16 wraparound by interpreting the difference as a
    /// two's-complement 16-bit value, so distances up to ±32767 are exact.
    #[inline]
    #[must_use]
    pub const fn delta(self, other: Frame) -> i16 {
        self.0.wrapping_sub(other.0) as i16
    }
}

impl std::fmt::Display for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which player a peer controls. The same state is simulated on both
/// peers, so the engine is parameterized by the local slot to keep "P1"
/// meaning the same fighter everywhere.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum PlayerSlot {
    /// Player one; simulated first every frame.
    One,
    /// Player two; simulated second every frame.
    Two,
}

impl PlayerSlot {
    /// Zero-based index, for ring addressing.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            PlayerSlot::One => 0,
            PlayerSlot::Two => 1,
        }
    }

    /// The other player.
    #[inline]
    #[must_use]
    pub const fn other(self) -> PlayerSlot {
        match self {
            PlayerSlot::One => PlayerSlot::Two,
            PlayerSlot::Two => PlayerSlot::One,
        }
    }
}

impl std::fmt::Display for PlayerSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlayerSlot::One => write!(f, "P1"),
            PlayerSlot::Two => write!(f, "P2"),
        }
    }
}

// #############
// #   ENUMS   #
// #############

/// The session lifecycle. Simulation runs only in [`Lifecycle::Running`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Lifecycle {
    /// Nothing loaded yet.
    Idle,
    /// Waiting for the asset bundle and/or a script.
    Loading,
    /// Assets and script ready; waiting for both peers' game-start.
    Armed,
    /// Simulating at the tick rate.
    Running,
}

/// Notifications drained from the session. Handling them is up to the
/// embedder; the opaque status strings are the user-visible failure
/// channel.
///
/// # Forward Compatibility
///
/// This enum is `#[non_exhaustive]`; always include a wildcard arm.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SessionEvent {
    /// A received asset bundle finished assembling.
    BundleReady {
        /// The manifest id of the assembled bundle.
        manifest_id: String,
    },
    /// A script compiled and the rollback engine was re-seeded at frame 0.
    ScriptApplied {
        /// The script's name (empty for locally loaded scripts).
        name: String,
    },
    /// A script failed to compile; the previous engine is untouched.
    ScriptRejected {
        /// The script's name.
        name: String,
        /// The compile error, as reported by the VM.
        error: String,
    },
    /// Both peers are armed and the match is running.
    GameStarted,
    /// The peer's fingerprint for `frame` differed from ours. Logged and
    /// surfaced; no automatic recovery.
    Desync {
        /// The frame both fingerprints describe.
        frame: Frame,
        /// Our fingerprint.
        local: u32,
        /// The peer's fingerprint.
        remote: u32,
    },
    /// A remote input arrived too late to roll back and was dropped.
    InputDropped {
        /// The frame the dropped input was for.
        frame: Frame,
    },
    /// An opaque human-readable status message.
    Status(String),
}

// #############
// #  TRAITS   #
// #############

/// Compile-time parameterization for sessions: bundles the embedder's
/// concrete VM, transport, and viewer types behind one marker type.
///
/// # Example
///
/// ```ignore
/// struct BrowserConfig;
///
/// impl Config for BrowserConfig {
///     type Vm = SandboxVm;
///     type Assets = DataChannel;   // reliable, ordered
///     type Live = DatagramChannel; // unordered, no retransmit
///     type Viewer = SceneGraph;
/// }
/// ```
pub trait Config: 'static {
    /// The script VM driving per-player logic.
    type Vm: ScriptVm;
    /// The reliable, ordered, message-oriented asset channel.
    type Assets: ReliableChannel;
    /// The unordered, zero-retransmit live channel.
    type Live: LiveChannel;
    /// The rendering surface consuming snapshots and bundles.
    type Viewer: Viewer;
}

/// A reliable, ordered, message-oriented binary channel to the peer.
///
/// Carries manifests, chunks, scripts, and control frames. The transport
/// owns delivery and retransmission; the engine only throttles itself
/// against [`buffered_amount`](Self::buffered_amount) so large chunk
/// streams never overrun the transport's send buffer.
pub trait ReliableChannel {
    /// Whether the channel is currently open. Sends before open are
    /// deferred by the engine, never lost.
    fn is_open(&self) -> bool;

    /// Queues one message for in-order delivery.
    fn send(&mut self, frame: &[u8]);

    /// Returns all messages received since the last call, in order.
    fn receive_all(&mut self) -> Vec<Vec<u8>>;

    /// Bytes accepted by [`send`](Self::send) but not yet handed to the
    /// network. The backpressure probe.
    fn buffered_amount(&self) -> usize;
}

/// An unordered, lossy, message-oriented binary channel to the peer.
///
/// Carries per-frame inputs and periodic state fingerprints. Loss and
/// reordering are expected; prediction and rollback absorb them.
pub trait LiveChannel {
    /// Whether the channel is currently open. Datagrams sent while closed
    /// may be silently dropped, like any other datagram.
    fn is_open(&self) -> bool;

    /// Fires one datagram at the peer, best-effort.
    fn send(&mut self, datagram: &[u8]);

    /// Returns all datagrams received since the last call, in arrival
    /// order (which need not be send order).
    fn receive_all(&mut self) -> Vec<Vec<u8>>;
}

/// The rendering surface: a pure consumer of state snapshots and
/// assembled asset bundles. The core never reads anything back from it.
pub trait Viewer {
    /// Called once per simulated tick with the latest committed snapshot.
    fn present(&mut self, state: &State);

    /// Called when an asset bundle finishes assembling. The viewer
    /// resolves chunk payloads by hash against the store.
    fn bundle_ready(&mut self, manifest: &assets::Manifest, cas: &Cas);
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
mod frame_tests {
    use super::*;

    #[test]
    fn next_and_prev_wrap() {
        assert_eq!(Frame::new(u16::MAX).next(), Frame::ZERO);
        assert_eq!(Frame::ZERO.prev(), Frame::new(u16::MAX));
    }

    #[test]
    fn delta_is_signed_shortest_distance() {
        assert_eq!(Frame::new(10).delta(Frame::new(10)), 0);
        assert_eq!(Frame::new(12).delta(Frame::new(10)), 2);
        assert_eq!(Frame::new(8).delta(Frame::new(10)), -2);
        // across the wrap point
        assert_eq!(Frame::new(2).delta(Frame::new(u16::MAX)), 3);
        assert_eq!(Frame::new(u16::MAX).delta(Frame::new(2)), -3);
    }

    #[test]
    fn delta_extremes() {
        assert_eq!(Frame::new(32767).delta(Frame::ZERO), 32767);
        assert_eq!(Frame::new(32768).delta(Frame::ZERO), -32768);
    }

    #[test]
    fn slot_is_raw_value() {
        assert_eq!(Frame::new(513).slot(), 513);
        assert_eq!(Frame::new(u16::MAX).slot(), 65535);
    }

    #[test]
    fn player_slot_roles() {
        assert_eq!(PlayerSlot::One.other(), PlayerSlot::Two);
        assert_eq!(PlayerSlot::Two.other(), PlayerSlot::One);
        assert_eq!(PlayerSlot::One.index(), 0);
        assert_eq!(PlayerSlot::Two.index(), 1);
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::unwrap_used, clippy::expect_used)]
mod frame_property_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// delta is antisymmetric except at the ambiguous half-way point.
        #[test]
        fn prop_delta_antisymmetric(a in any::<u16>(), b in any::<u16>()) {
            let d = Frame::new(a).delta(Frame::new(b));
            if d != i16::MIN {
                prop_assert_eq!(Frame::new(b).delta(Frame::new(a)), -d);
            }
        }

        /// Stepping forward then measuring gives +1.
        #[test]
        fn prop_next_is_one_ahead(a in any::<u16>()) {
            let f = Frame::new(a);
            prop_assert_eq!(f.next().delta(f), 1);
            prop_assert_eq!(f.prev().delta(f), -1);
        }
    }
}
