//! The rollback engine: input rings, snapshot history, and
//! predict/correct re-simulation.
//!
//! Forward simulation uses whatever inputs have arrived; a missing remote
//! input is predicted by repeating the mask stored for the previous frame
//! (last-known-input prediction). When the real input later arrives for a
//! frame at or before the latest committed one, the engine rewinds to the
//! snapshot just before that frame and replays forward, overwriting each
//! history slot. Because the scripts are deterministic and the VM scopes
//! are restored from the same snapshot, the replay converges to exactly
//! what an in-order simulation would have produced.
//!
//! The VM scope is the subtle part: scripts accumulate mutable state
//! across ticks, and a naive replay would run on a scope the mispredicted
//! frames already mutated. This engine stores a scope snapshot per player
//! in every history slot and restores both before replaying, trading a
//! per-frame clone for bounded rollback cost.

use tracing::{debug, trace, warn};

use crate::error::RingsideError;
use crate::hash::state_fingerprint;
use crate::input::{InputMask, InputRing};
use crate::script::ScriptVm;
use crate::sim;
use crate::state::State;
use crate::{Frame, PlayerSlot};

/// Smallest supported history ring. Sized so the worst-case rollback
/// distance (RTT tail at 60 Hz plus margin) fits with room to spare.
pub const MIN_HISTORY_LEN: usize = 64;

/// Default history ring length (~2.1 seconds at 60 Hz).
pub const DEFAULT_HISTORY_LEN: usize = 128;

/// Largest supported history ring, bounded by the wrap-aware signed frame
/// comparison (half the 16-bit frame space).
pub const MAX_HISTORY_LEN: usize = 32768;

/// What happened to a remote input handed to the engine.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[must_use]
pub enum RemoteInputOutcome {
    /// The input is for a future frame; stored, and a later
    /// [`simulate_to`](RollbackEngine::simulate_to) will pick it up.
    Buffered,
    /// The input lands at or before the latest committed frame; stored,
    /// and the caller should trigger
    /// [`rollback_from`](RollbackEngine::rollback_from) for that frame.
    NeedsRollback,
    /// The input predates the history window and was dropped.
    TooLate,
}

/// One committed frame: the state plus both VMs' post-tick scopes.
#[derive(Clone)]
struct HistorySlot<S> {
    state: State,
    scope1: S,
    scope2: S,
}

/// The rollback engine. Owns the two instance VMs, both input rings, and
/// the snapshot history; see the module docs for the overall scheme.
pub struct RollbackEngine<V: ScriptVm> {
    local_player: PlayerSlot,
    history_len: usize,
    /// The latest committed frame; its slot always holds its state.
    latest: Frame,
    /// Working copy of the latest committed state.
    current: State,
    vm1: V,
    vm2: V,
    history: Vec<Option<HistorySlot<V::Scope>>>,
    /// Indexed by player: `rings[0]` is P1, `rings[1]` is P2.
    rings: [InputRing; 2],
    /// Highest remote frame confirmed off the wire; the ack we send back.
    last_remote_frame: Option<Frame>,
}

impl<V: ScriptVm> RollbackEngine<V> {
    /// Seeds an engine at `seed.frame` with two freshly loaded instance
    /// VMs. The seed is committed to history immediately, so the engine's
    /// latest frame equals the seed frame from the start.
    ///
    /// # Errors
    ///
    /// Returns [`RingsideError::InvalidHistoryLength`] if `history_len` is
    /// outside `MIN_HISTORY_LEN..=MAX_HISTORY_LEN`.
    pub fn seeded(
        seed: State,
        vm1: V,
        vm2: V,
        local_player: PlayerSlot,
        history_len: usize,
    ) -> Result<Self, RingsideError> {
        if !(MIN_HISTORY_LEN..=MAX_HISTORY_LEN).contains(&history_len) {
            return Err(RingsideError::InvalidHistoryLength {
                requested: history_len,
                min: MIN_HISTORY_LEN,
                max: MAX_HISTORY_LEN,
            });
        }
        let mut history = Vec::with_capacity(history_len);
        history.resize_with(history_len, || None);
        let mut engine = Self {
            local_player,
            history_len,
            latest: seed.frame,
            current: seed,
            vm1,
            vm2,
            history,
            rings: [InputRing::new(), InputRing::new()],
            last_remote_frame: None,
        };
        engine.commit();
        Ok(engine)
    }

    /// The latest committed frame.
    #[must_use]
    pub fn latest_frame(&self) -> Frame {
        self.latest
    }

    /// A deep copy of the latest committed snapshot.
    #[must_use]
    pub fn latest_state(&self) -> State {
        self.current
    }

    /// The configured history ring length.
    #[must_use]
    pub fn history_len(&self) -> usize {
        self.history_len
    }

    /// Which player this peer controls.
    #[must_use]
    pub fn local_player(&self) -> PlayerSlot {
        self.local_player
    }

    /// The highest remote frame confirmed so far, if any. This is the
    /// acknowledgment the live channel ships with every input.
    #[must_use]
    pub fn last_remote_frame(&self) -> Option<Frame> {
        self.last_remote_frame
    }

    /// Writes the local player's mask for `frame`.
    pub fn set_local_input(&mut self, frame: Frame, mask: InputMask) {
        self.rings[self.local_player.index()].store(frame, mask);
    }

    /// Writes the remote player's mask for `frame` and reports what the
    /// caller must do about it.
    ///
    /// Inputs ahead of the latest committed frame are simply buffered.
    /// Inputs at or before it invalidate the predicted frames from `frame`
    /// onward; the caller follows up with
    /// [`rollback_from`](RollbackEngine::rollback_from). Inputs older than
    /// the history window cannot be recovered from and are dropped — the
    /// engine never panics over them.
    pub fn set_remote_input(&mut self, frame: Frame, mask: InputMask) -> RemoteInputOutcome {
        let remote = self.local_player.other();
        let delta = frame.delta(self.latest);
        if delta <= 0 {
            let back = -i32::from(delta) as usize;
            if back >= self.history_len {
                warn!(
                    frame = %frame,
                    latest = %self.latest,
                    history_len = self.history_len,
                    "remote input too late to roll back, dropping"
                );
                return RemoteInputOutcome::TooLate;
            }
        }
        self.rings[remote.index()].store(frame, mask);
        self.note_remote_frame(frame);
        if delta > 0 {
            trace!(frame = %frame, "buffered future remote input");
            RemoteInputOutcome::Buffered
        } else {
            RemoteInputOutcome::NeedsRollback
        }
    }

    /// Advances simulation from the latest committed frame to `target`,
    /// committing every intermediate frame. A `target` at or behind the
    /// latest frame is a no-op.
    pub fn simulate_to(&mut self, target: Frame) {
        let steps = target.delta(self.latest);
        if steps <= 0 {
            return;
        }
        for _ in 0..steps {
            let next = self.current.frame.next();
            let input1 = self.input_for(PlayerSlot::One, next);
            let input2 = self.input_for(PlayerSlot::Two, next);
            sim::advance(&mut self.current, &mut self.vm1, &mut self.vm2, input1, input2);
            debug_assert_eq!(self.current.frame, next);
            self.commit();
        }
    }

    /// Rewinds to the snapshot before `frame` and replays forward to the
    /// previously committed latest frame, overwriting each history slot.
    ///
    /// Returns `false` (logging a warning) if the resume snapshot is no
    /// longer in history; the engine is left as it was.
    pub fn rollback_from(&mut self, frame: Frame) -> bool {
        let resume = frame.prev();
        let target = self.latest;
        let idx = resume.slot() % self.history_len;
        let (state, scope1, scope2) = match self.history[idx].as_ref() {
            Some(slot) if slot.state.frame == resume => {
                (slot.state, slot.scope1.clone(), slot.scope2.clone())
            }
            _ => {
                warn!(
                    frame = %frame,
                    resume = %resume,
                    "rollback requested but resume snapshot is gone"
                );
                return false;
            }
        };
        debug!(
            from = %frame,
            to = %target,
            depth = target.delta(frame),
            "rolling back"
        );
        self.current = state;
        self.vm1.restore(&scope1);
        self.vm2.restore(&scope2);
        self.latest = resume;
        self.simulate_to(target);
        true
    }

    /// The committed snapshot for `frame`, if its slot still holds it.
    #[must_use]
    pub fn snapshot_at(&self, frame: Frame) -> Option<State> {
        let idx = frame.slot() % self.history_len;
        match self.history[idx].as_ref() {
            Some(slot) if slot.state.frame == frame => Some(slot.state),
            _ => None,
        }
    }

    /// The fingerprint of the committed snapshot for `frame`, if held.
    #[must_use]
    pub fn fingerprint_at(&self, frame: Frame) -> Option<u32> {
        self.snapshot_at(frame).map(|s| state_fingerprint(&s))
    }

    /// Resolves the input for `player` at `frame` under the prediction
    /// policy: a received mask is used as-is; a missing remote mask
    /// repeats the slot value of the previous frame (and is written back,
    /// unmarked, so the repetition chains across gaps); a missing local
    /// mask reads as zero.
    fn input_for(&mut self, player: PlayerSlot, frame: Frame) -> InputMask {
        let ring = &mut self.rings[player.index()];
        if ring.is_received(frame) {
            return ring.value_at(frame);
        }
        if player == self.local_player {
            return InputMask::NONE;
        }
        let predicted = ring.value_at(frame.prev());
        ring.store_predicted(frame, predicted);
        predicted
    }

    fn commit(&mut self) {
        self.latest = self.current.frame;
        let idx = self.latest.slot() % self.history_len;
        self.history[idx] = Some(HistorySlot {
            state: self.current,
            scope1: self.vm1.snapshot(),
            scope2: self.vm2.snapshot(),
        });
    }

    fn note_remote_frame(&mut self, frame: Frame) {
        match self.last_remote_frame {
            Some(known) if frame.delta(known) <= 0 => {}
            _ => self.last_remote_frame = Some(frame),
        }
    }
}

impl<V: ScriptVm> std::fmt::Debug for RollbackEngine<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RollbackEngine")
            .field("local_player", &self.local_player)
            .field("latest", &self.latest)
            .field("history_len", &self.history_len)
            .field("last_remote_frame", &self.last_remote_frame)
            .finish_non_exhaustive()
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
    use crate::script::testing::TableVm;

    fn engine(program: &str, local: PlayerSlot) -> RollbackEngine<TableVm> {
        RollbackEngine::seeded(
            State::initial(),
            TableVm::loaded(program),
            TableVm::loaded(program),
            local,
            DEFAULT_HISTORY_LEN,
        )
        .unwrap()
    }

    /// Drives `engine` to `target`, committing a local mask every frame.
    fn run_to(engine: &mut RollbackEngine<TableVm>, target: u16, local_mask: InputMask) {
        while engine.latest_frame().raw() != target {
            let next = engine.latest_frame().next();
            engine.set_local_input(next, local_mask);
            engine.simulate_to(next);
        }
    }

    #[test]
    fn seeding_commits_frame_zero() {
        let engine = engine("idle", PlayerSlot::One);
        assert_eq!(engine.latest_frame(), Frame::ZERO);
        assert_eq!(engine.snapshot_at(Frame::ZERO), Some(State::initial()));
    }

    #[test]
    fn invalid_history_length_is_rejected() {
        let result = RollbackEngine::seeded(
            State::initial(),
            TableVm::loaded("idle"),
            TableVm::loaded("idle"),
            PlayerSlot::One,
            16,
        );
        assert!(matches!(
            result,
            Err(RingsideError::InvalidHistoryLength { requested: 16, .. })
        ));
    }

    #[test]
    fn idle_run_stays_put() {
        let mut engine = engine("idle", PlayerSlot::One);
        run_to(&mut engine, 600, InputMask::NONE);
        let state = engine.latest_state();
        assert_eq!(state.p1.x.raw(), -65536);
        assert_eq!(state.p2.x.raw(), 65536);
    }

    #[test]
    fn local_input_drives_local_slot_only() {
        let mut engine = engine("dir-walk", PlayerSlot::One);
        run_to(&mut engine, 60, InputMask::RIGHT);
        let state = engine.latest_state();
        assert_eq!(state.p1.x.raw(), 917_504);
        assert_eq!(state.p2.x.raw(), 65536);
    }

    #[test]
    fn role_parameterization_routes_local_input() {
        // Same engine, but this peer controls P2.
        let mut engine = engine("dir-walk", PlayerSlot::Two);
        run_to(&mut engine, 60, InputMask::RIGHT);
        let state = engine.latest_state();
        assert_eq!(state.p1.x.raw(), -65536);
        assert_eq!(state.p2.x.raw(), 65536 + 60 * 16384);
    }

    #[test]
    fn remote_prediction_repeats_last_known_input() {
        let mut engine = engine("dir-walk", PlayerSlot::One);
        // Remote held Right at frame 1, then went silent.
        let outcome = engine.set_remote_input(Frame::new(1), InputMask::RIGHT);
        assert_eq!(outcome, RemoteInputOutcome::Buffered);
        run_to(&mut engine, 10, InputMask::NONE);
        // Prediction chains the held input across all ten frames.
        assert_eq!(
            engine.latest_state().p2.x.raw(),
            65536 + 10 * 16384,
            "last-known input should repeat across the gap"
        );
    }

    #[test]
    fn future_remote_input_is_a_noop_until_simulated() {
        let mut engine = engine("dir-walk", PlayerSlot::One);
        let before = engine.latest_state();
        let outcome = engine.set_remote_input(Frame::new(5), InputMask::LEFT);
        assert_eq!(outcome, RemoteInputOutcome::Buffered);
        assert_eq!(engine.latest_state(), before);
        run_to(&mut engine, 5, InputMask::NONE);
        // Picked up when simulation reaches it: frames 1-4 predict zero,
        // frame 5 applies Left.
        assert_eq!(engine.latest_state().p2.x.raw(), 65536 - 16384);
    }

    #[test]
    fn late_remote_input_requests_rollback_and_converges() {
        // In-order reference run: remote holds Right from frame 10.
        let mut reference = engine("dir-walk", PlayerSlot::One);
        for f in 10..=30u16 {
            let _ = reference.set_remote_input(Frame::new(f), InputMask::RIGHT);
        }
        run_to(&mut reference, 30, InputMask::NONE);

        // Late run: the same inputs arrive only after frame 30 committed.
        let mut late = engine("dir-walk", PlayerSlot::One);
        run_to(&mut late, 30, InputMask::NONE);
        assert_ne!(late.latest_state(), reference.latest_state());
        for f in 10..=30u16 {
            match late.set_remote_input(Frame::new(f), InputMask::RIGHT) {
                RemoteInputOutcome::NeedsRollback => {
                    assert!(late.rollback_from(Frame::new(f)));
                }
                RemoteInputOutcome::Buffered => panic!("input {f} should be in the past"),
                RemoteInputOutcome::TooLate => panic!("input {f} should fit in history"),
            }
        }
        assert_eq!(late.latest_state(), reference.latest_state());
        assert_eq!(late.latest_frame(), Frame::new(30));
    }

    #[test]
    fn rollback_restores_vm_scope() {
        // counter-anim derives output from accumulated scope; a rollback
        // that failed to restore scopes would drift from the reference.
        let mut reference = engine("counter-anim", PlayerSlot::One);
        for f in 5..=20u16 {
            let _ = reference.set_remote_input(Frame::new(f), InputMask::RIGHT);
        }
        run_to(&mut reference, 20, InputMask::NONE);

        let mut late = engine("counter-anim", PlayerSlot::One);
        run_to(&mut late, 20, InputMask::NONE);
        for f in 5..=20u16 {
            if late.set_remote_input(Frame::new(f), InputMask::RIGHT)
                == RemoteInputOutcome::NeedsRollback
            {
                assert!(late.rollback_from(Frame::new(f)));
            }
        }
        assert_eq!(late.latest_state(), reference.latest_state());
    }

    #[test]
    fn too_late_input_is_dropped_without_panic() {
        let mut engine = engine("dir-walk", PlayerSlot::One);
        run_to(&mut engine, 300, InputMask::NONE);
        let outcome = engine.set_remote_input(Frame::new(10), InputMask::RIGHT);
        assert_eq!(outcome, RemoteInputOutcome::TooLate);
        // The drop leaves the engine fully usable.
        run_to(&mut engine, 310, InputMask::NONE);
        assert_eq!(engine.latest_frame(), Frame::new(310));
    }

    #[test]
    fn history_slot_always_holds_its_frame() {
        let mut engine = engine("idle", PlayerSlot::One);
        run_to(&mut engine, 400, InputMask::NONE);
        // Every frame still inside the window is present under f mod H.
        for f in 273..=400u16 {
            let snap = engine.snapshot_at(Frame::new(f)).unwrap();
            assert_eq!(snap.frame, Frame::new(f));
        }
        // Frames overwritten by the ring are correctly reported missing.
        assert!(engine.snapshot_at(Frame::new(100)).is_none());
    }

    #[test]
    fn ack_tracks_highest_remote_frame() {
        let mut engine = engine("idle", PlayerSlot::One);
        assert_eq!(engine.last_remote_frame(), None);
        let _ = engine.set_remote_input(Frame::new(3), InputMask::NONE);
        let _ = engine.set_remote_input(Frame::new(7), InputMask::NONE);
        let _ = engine.set_remote_input(Frame::new(5), InputMask::NONE);
        assert_eq!(engine.last_remote_frame(), Some(Frame::new(7)));
    }

    #[test]
    fn simulation_crosses_the_frame_wrap() {
        let mut engine = engine("dir-walk", PlayerSlot::One);
        run_to(&mut engine, u16::MAX, InputMask::NONE);
        let x_before = engine.latest_state().p1.x;
        // Hold Right across the wrap boundary.
        for _ in 0..4 {
            let next = engine.latest_frame().next();
            engine.set_local_input(next, InputMask::RIGHT);
            engine.simulate_to(next);
        }
        assert_eq!(engine.latest_frame(), Frame::new(3));
        assert_eq!(
            engine.latest_state().p1.x.raw(),
            x_before.raw().wrapping_add(4 * 16384)
        );
        // Rollback across the wrap also works.
        let outcome = engine.set_remote_input(Frame::new(u16::MAX), InputMask::RIGHT);
        assert_eq!(outcome, RemoteInputOutcome::NeedsRollback);
        assert!(engine.rollback_from(Frame::new(u16::MAX)));
        assert_eq!(engine.latest_frame(), Frame::new(3));
    }

    #[test]
    fn fingerprints_match_identical_runs() {
        let mut a = engine("dir-walk", PlayerSlot::One);
        let mut b = engine("dir-walk", PlayerSlot::Two);
        for f in 1..=120u16 {
            let frame = Frame::new(f);
            a.set_local_input(frame, InputMask::RIGHT);
            let _ = b.set_remote_input(frame, InputMask::RIGHT);
            a.simulate_to(frame);
            b.simulate_to(frame);
        }
        assert_eq!(
            a.fingerprint_at(Frame::new(120)),
            b.fingerprint_at(Frame::new(120))
        );
        assert_eq!(a.latest_state(), b.latest_state());
    }
}
