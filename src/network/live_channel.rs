//! The live-channel engine: per-frame inputs out, rollback steering in.
//!
//! The live channel is unordered and never retransmits. Dropped or
//! reordered datagrams are not errors — prediction covers the gaps and
//! rollback repairs the record once the real input lands. The engine
//! therefore does almost no bookkeeping of its own: it encodes outgoing
//! inputs and fingerprints, and on receive it injects remote inputs into
//! the rollback engine, triggering re-simulation when they land in the
//! past.

use tracing::{trace, warn};

use crate::input::InputMask;
use crate::network::codec;
use crate::network::messages::Message;
use crate::rollback::{RemoteInputOutcome, RollbackEngine};
use crate::script::ScriptVm;
use crate::{Frame, LiveChannel};

/// Events the live engine hands up to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveEvent {
    /// The peer's fingerprint for `frame` differed from ours.
    Desync {
        /// The compared frame.
        frame: Frame,
        /// Our fingerprint.
        local: u32,
        /// The peer's fingerprint.
        remote: u32,
    },
    /// A remote input arrived too late to roll back and was dropped.
    InputDropped {
        /// The dropped input's frame.
        frame: Frame,
    },
}

/// Datagram counters, for diagnostics.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct LiveStats {
    /// Datagrams sent.
    pub datagrams_sent: u64,
    /// Datagrams received and decoded.
    pub datagrams_received: u64,
    /// Datagrams dropped as malformed.
    pub malformed_dropped: u64,
}

/// The live-channel engine.
#[derive(Debug, Default)]
pub struct LiveLink {
    stats: LiveStats,
    /// Highest acknowledgment seen from the peer: the newest of our frames
    /// the peer has confirmed. Bounds how far back we can ever be asked to
    /// roll.
    peer_ack: Option<Frame>,
}

impl LiveLink {
    /// Creates an idle engine.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Datagram counters so far.
    #[must_use]
    pub fn stats(&self) -> LiveStats {
        self.stats
    }

    /// The newest of our frames the peer has acknowledged, if any.
    #[must_use]
    pub fn peer_ack(&self) -> Option<Frame> {
        self.peer_ack
    }

    /// Ships one frame's local input with the current acknowledgment.
    /// Loss is acceptable here, so a closed channel simply drops it.
    pub fn send_input<L: LiveChannel>(
        &mut self,
        channel: &mut L,
        frame: Frame,
        mask: InputMask,
        ack: Option<Frame>,
    ) {
        let message = Message::Input {
            frame,
            mask,
            ack: ack.unwrap_or(Frame::ZERO),
        };
        self.fire(channel, &message);
    }

    /// Ships a state fingerprint for periodic desync detection.
    pub fn send_state_hash<L: LiveChannel>(&mut self, channel: &mut L, frame: Frame, hash: u32) {
        self.fire(channel, &Message::StateHash { frame, hash });
    }

    /// Drains the channel, injecting remote inputs into the rollback
    /// engine (and rolling back when they land in the past) and comparing
    /// received fingerprints against our own history.
    pub fn drain<L: LiveChannel, V: ScriptVm>(
        &mut self,
        channel: &mut L,
        rollback: &mut RollbackEngine<V>,
    ) -> Vec<LiveEvent> {
        let mut events = Vec::new();
        for datagram in channel.receive_all() {
            match codec::decode(&datagram) {
                Ok(Message::Input { frame, mask, ack }) => {
                    self.stats.datagrams_received += 1;
                    self.note_peer_ack(ack);
                    match rollback.set_remote_input(frame, mask) {
                        RemoteInputOutcome::Buffered => {}
                        RemoteInputOutcome::NeedsRollback => {
                            rollback.rollback_from(frame);
                        }
                        RemoteInputOutcome::TooLate => {
                            events.push(LiveEvent::InputDropped { frame });
                        }
                    }
                }
                Ok(Message::StateHash { frame, hash }) => {
                    self.stats.datagrams_received += 1;
                    match rollback.fingerprint_at(frame) {
                        Some(local) if local != hash => {
                            warn!(
                                frame = %frame,
                                local = format_args!("{local:#010x}"),
                                remote = format_args!("{hash:#010x}"),
                                "state fingerprint mismatch"
                            );
                            events.push(LiveEvent::Desync {
                                frame,
                                local,
                                remote: hash,
                            });
                        }
                        Some(_) => trace!(frame = %frame, "fingerprint matches"),
                        None => trace!(frame = %frame, "fingerprint for frame outside history"),
                    }
                }
                Ok(other) => {
                    warn!(opcode = other.opcode(), "asset-channel frame on live channel, dropping");
                }
                Err(err) => {
                    self.stats.malformed_dropped += 1;
                    warn!(error = %err, len = datagram.len(), "dropping malformed datagram");
                }
            }
        }
        events
    }

    fn fire<L: LiveChannel>(&mut self, channel: &mut L, message: &Message) {
        if !channel.is_open() {
            trace!("live channel closed, datagram dropped");
            return;
        }
        match codec::encode(message) {
            Ok(bytes) => {
                channel.send(&bytes);
                self.stats.datagrams_sent += 1;
            }
            Err(err) => warn!(error = %err, "failed to encode live datagram"),
        }
    }

    fn note_peer_ack(&mut self, ack: Frame) {
        match self.peer_ack {
            Some(known) if ack.delta(known) <= 0 => {}
            _ => self.peer_ack = Some(ack),
        }
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
    use crate::hash::state_fingerprint;
    use crate::rollback::DEFAULT_HISTORY_LEN;
    use crate::script::testing::TableVm;
    use crate::state::State;
    use crate::PlayerSlot;

    #[derive(Default)]
    struct StubChannel {
        open: bool,
        sent: Vec<Vec<u8>>,
        inbox: Vec<Vec<u8>>,
    }

    impl StubChannel {
        fn open() -> Self {
            Self {
                open: true,
                ..Self::default()
            }
        }

        fn push(&mut self, message: &Message) {
            self.inbox.push(codec::encode(message).unwrap());
        }
    }

    impl LiveChannel for StubChannel {
        fn is_open(&self) -> bool {
            self.open
        }

        fn send(&mut self, datagram: &[u8]) {
            self.sent.push(datagram.to_vec());
        }

        fn receive_all(&mut self) -> Vec<Vec<u8>> {
            std::mem::take(&mut self.inbox)
        }
    }

    fn engine() -> RollbackEngine<TableVm> {
        RollbackEngine::seeded(
            State::initial(),
            TableVm::loaded("dir-walk"),
            TableVm::loaded("dir-walk"),
            PlayerSlot::One,
            DEFAULT_HISTORY_LEN,
        )
        .unwrap()
    }

    fn run_to(engine: &mut RollbackEngine<TableVm>, target: u16) {
        while engine.latest_frame().raw() != target {
            let next = engine.latest_frame().next();
            engine.set_local_input(next, InputMask::NONE);
            engine.simulate_to(next);
        }
    }

    #[test]
    fn send_input_encodes_ack() {
        let mut link = LiveLink::new();
        let mut channel = StubChannel::open();
        link.send_input(
            &mut channel,
            Frame::new(9),
            InputMask::RIGHT,
            Some(Frame::new(7)),
        );
        assert_eq!(
            codec::decode(&channel.sent[0]).unwrap(),
            Message::Input {
                frame: Frame::new(9),
                mask: InputMask::RIGHT,
                ack: Frame::new(7),
            }
        );
        assert_eq!(link.stats().datagrams_sent, 1);
    }

    #[test]
    fn closed_channel_drops_sends() {
        let mut link = LiveLink::new();
        let mut channel = StubChannel::default();
        link.send_input(&mut channel, Frame::new(1), InputMask::NONE, None);
        assert!(channel.sent.is_empty());
        assert_eq!(link.stats().datagrams_sent, 0);
    }

    #[test]
    fn received_past_input_triggers_rollback() {
        let mut link = LiveLink::new();
        let mut channel = StubChannel::open();
        let mut rollback = engine();
        run_to(&mut rollback, 30);
        let before = rollback.latest_state();

        channel.push(&Message::Input {
            frame: Frame::new(10),
            mask: InputMask::RIGHT,
            ack: Frame::new(4),
        });
        let events = link.drain(&mut channel, &mut rollback);
        assert!(events.is_empty());
        assert_eq!(link.peer_ack(), Some(Frame::new(4)));
        // Frames 10.. were re-simulated with the held input predicted
        // forward, so P2 drifted right relative to the mispredicted run.
        assert_ne!(rollback.latest_state(), before);
        assert_eq!(rollback.latest_frame(), Frame::new(30));
    }

    #[test]
    fn too_late_input_surfaces_an_event() {
        let mut link = LiveLink::new();
        let mut channel = StubChannel::open();
        let mut rollback = engine();
        run_to(&mut rollback, 400);
        channel.push(&Message::Input {
            frame: Frame::new(3),
            mask: InputMask::RIGHT,
            ack: Frame::ZERO,
        });
        let events = link.drain(&mut channel, &mut rollback);
        assert_eq!(
            events,
            vec![LiveEvent::InputDropped {
                frame: Frame::new(3)
            }]
        );
    }

    #[test]
    fn matching_fingerprint_is_quiet_mismatch_is_not() {
        let mut link = LiveLink::new();
        let mut channel = StubChannel::open();
        let mut rollback = engine();
        run_to(&mut rollback, 16);
        let snapshot = rollback.snapshot_at(Frame::new(16)).unwrap();
        let good = state_fingerprint(&snapshot);

        channel.push(&Message::StateHash {
            frame: Frame::new(16),
            hash: good,
        });
        assert!(link.drain(&mut channel, &mut rollback).is_empty());

        channel.push(&Message::StateHash {
            frame: Frame::new(16),
            hash: good ^ 1,
        });
        let events = link.drain(&mut channel, &mut rollback);
        assert_eq!(
            events,
            vec![LiveEvent::Desync {
                frame: Frame::new(16),
                local: good,
                remote: good ^ 1,
            }]
        );
    }

    #[test]
    fn fingerprint_outside_history_is_ignored() {
        let mut link = LiveLink::new();
        let mut channel = StubChannel::open();
        let mut rollback = engine();
        run_to(&mut rollback, 400);
        channel.push(&Message::StateHash {
            frame: Frame::new(2),
            hash: 0xDEAD_BEEF,
        });
        assert!(link.drain(&mut channel, &mut rollback).is_empty());
    }

    #[test]
    fn malformed_datagrams_are_counted_and_dropped() {
        let mut link = LiveLink::new();
        let mut channel = StubChannel::open();
        let mut rollback = engine();
        channel.inbox.push(vec![0x7F, 1, 2, 3]);
        channel.inbox.push(vec![]);
        assert!(link.drain(&mut channel, &mut rollback).is_empty());
        assert_eq!(link.stats().malformed_dropped, 2);
    }

    #[test]
    fn reordered_inputs_converge_to_the_in_order_result() {
        // Reference: inputs 1..=20 in order.
        let mut reference = engine();
        for f in 1..=20u16 {
            let _ = reference.set_remote_input(Frame::new(f), InputMask::RIGHT);
        }
        run_to(&mut reference, 20);

        // Shuffled arrival through the live engine after frame 20.
        let mut link = LiveLink::new();
        let mut channel = StubChannel::open();
        let mut rollback = engine();
        run_to(&mut rollback, 20);
        let order = [7u16, 3, 15, 1, 20, 9, 4, 11, 18, 2, 5, 13, 6, 19, 8, 10, 12, 16, 14, 17];
        for f in order {
            channel.push(&Message::Input {
                frame: Frame::new(f),
                mask: InputMask::RIGHT,
                ack: Frame::ZERO,
            });
        }
        let events = link.drain(&mut channel, &mut rollback);
        assert!(events.is_empty());
        assert_eq!(rollback.latest_state(), reference.latest_state());
    }
}
