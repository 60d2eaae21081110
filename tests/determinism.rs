//! End-to-end determinism properties of the simulation and rollback
//! engine: identical runs, arrival-order independence, and correctness
//! across the 16-bit frame wrap.

mod common;

use common::stubs::StubVm;
use proptest::prelude::*;
use ringside::hash::state_fingerprint;
use ringside::rollback::DEFAULT_HISTORY_LEN;
use ringside::{Frame, InputMask, PlayerSlot, RemoteInputOutcome, RollbackEngine, ScriptVm, State};

fn engine(program: &str, local: PlayerSlot) -> RollbackEngine<StubVm> {
    let mut vm1 = StubVm::new();
    let mut vm2 = StubVm::new();
    assert!(vm1.load_source(program.as_bytes()));
    assert!(vm2.load_source(program.as_bytes()));
    RollbackEngine::seeded(State::initial(), vm1, vm2, local, DEFAULT_HISTORY_LEN).unwrap()
}

/// Advances one frame with a local mask, like the orchestrator's tick.
fn tick(engine: &mut RollbackEngine<StubVm>, mask: InputMask) {
    let next = engine.latest_frame().next();
    engine.set_local_input(next, mask);
    engine.simulate_to(next);
}

/// Feeds a remote input and performs the rollback the live engine would.
fn feed_remote(engine: &mut RollbackEngine<StubVm>, frame: Frame, mask: InputMask) {
    match engine.set_remote_input(frame, mask) {
        RemoteInputOutcome::NeedsRollback => {
            assert!(engine.rollback_from(frame));
        }
        RemoteInputOutcome::Buffered => {}
        RemoteInputOutcome::TooLate => panic!("unexpected too-late input for frame {frame}"),
    }
}

#[test]
fn idle_only_determinism_across_both_peers() {
    // Scenario: both peers idle for 600 frames under the idle script.
    let mut peer_a = engine("idle", PlayerSlot::One);
    let mut peer_b = engine("idle", PlayerSlot::Two);
    for f in 1..=600u16 {
        let frame = Frame::new(f);
        tick(&mut peer_a, InputMask::NONE);
        feed_remote(&mut peer_b, frame, InputMask::NONE);
        tick(&mut peer_b, InputMask::NONE);
    }
    let a = peer_a.latest_state();
    let b = peer_b.latest_state();
    assert_eq!(a.p1.x.raw(), -65536);
    assert_eq!(a.p2.x.raw(), 65536);
    assert_eq!(a.p1.vx.raw(), 0);
    assert_eq!(a.p2.vx.raw(), 0);
    assert_eq!(a, b);
    assert_eq!(state_fingerprint(&a), state_fingerprint(&b));
}

#[test]
fn mirror_walk_reaches_fourteen_units() {
    // Scenario: peer A (P1) holds Right for 60 frames; B mirrors A's
    // inputs off the wire.
    let mut peer_a = engine("dir-walk", PlayerSlot::One);
    let mut peer_b = engine("dir-walk", PlayerSlot::Two);
    for f in 1..=60u16 {
        let frame = Frame::new(f);
        tick(&mut peer_a, InputMask::RIGHT);
        feed_remote(&mut peer_b, frame, InputMask::RIGHT);
        tick(&mut peer_b, InputMask::NONE);
    }
    let a = peer_a.latest_state();
    let b = peer_b.latest_state();
    assert_eq!(a.p1.x.raw(), 917_504); // -65536 + 60 * 16384 = 14.0
    assert_eq!(a.p2.x.raw(), 65536);
    assert_eq!(a, b);
    assert_eq!(state_fingerprint(&a), state_fingerprint(&b));
}

#[test]
fn rollback_produces_the_in_order_result() {
    // Scenario: the remote input for frame 10 arrives only after frame 30
    // has been committed; the rolled-back timeline must equal the
    // clairvoyant one.
    let mut in_order = engine("dir-walk", PlayerSlot::One);
    feed_remote(&mut in_order, Frame::new(10), InputMask::RIGHT);
    for _ in 0..30 {
        tick(&mut in_order, InputMask::NONE);
    }

    let mut late = engine("dir-walk", PlayerSlot::One);
    for _ in 0..30 {
        tick(&mut late, InputMask::NONE);
    }
    assert_ne!(late.latest_state(), in_order.latest_state());
    feed_remote(&mut late, Frame::new(10), InputMask::RIGHT);

    assert_eq!(late.latest_frame(), Frame::new(30));
    assert_eq!(late.latest_state(), in_order.latest_state());
    assert_eq!(
        late.fingerprint_at(Frame::new(30)),
        in_order.fingerprint_at(Frame::new(30))
    );
}

#[test]
fn arrival_order_does_not_matter_once_all_inputs_land() {
    // Several deterministic permutations of the same remote input trace.
    let trace: Vec<(u16, InputMask)> = (1..=40u16)
        .map(|f| {
            let mask = match f % 4 {
                0 => InputMask::RIGHT,
                1 => InputMask::LEFT,
                2 => InputMask::NONE,
                _ => InputMask::RIGHT | InputMask::LIGHT_PUNCH,
            };
            (f, mask)
        })
        .collect();

    let mut reference = engine("counter-anim", PlayerSlot::One);
    for &(f, mask) in &trace {
        feed_remote(&mut reference, Frame::new(f), mask);
    }
    for _ in 0..40 {
        tick(&mut reference, InputMask::NONE);
    }
    let expected = reference.latest_state();

    // A small multiplicative-congruential shuffle gives stable, seeded
    // permutations without a rand dependency.
    for seed in [7u64, 1_237, 99_991] {
        let mut permuted = trace.clone();
        let mut state = seed;
        for i in (1..permuted.len()).rev() {
            state = state.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
            let j = (state >> 33) as usize % (i + 1);
            permuted.swap(i, j);
        }

        let mut shuffled = engine("counter-anim", PlayerSlot::One);
        for _ in 0..40 {
            tick(&mut shuffled, InputMask::NONE);
        }
        for &(f, mask) in &permuted {
            feed_remote(&mut shuffled, Frame::new(f), mask);
        }
        assert_eq!(
            shuffled.latest_state(),
            expected,
            "seed {seed} diverged after delivery completed"
        );
    }
}

#[test]
fn simulation_is_correct_on_both_sides_of_the_frame_wrap() {
    let mut peer_a = engine("dir-walk", PlayerSlot::One);
    let mut peer_b = engine("dir-walk", PlayerSlot::Two);
    // March both peers to just before the wrap, exchanging inputs fully.
    for f in 1..=u16::MAX {
        let frame = Frame::new(f);
        tick(&mut peer_a, InputMask::NONE);
        feed_remote(&mut peer_b, frame, InputMask::NONE);
        tick(&mut peer_b, InputMask::NONE);
        feed_remote(&mut peer_a, frame, InputMask::NONE);
    }
    assert_eq!(peer_a.latest_frame(), Frame::new(u16::MAX));

    // Cross the boundary with A holding Right.
    for _ in 0..8 {
        let frame = peer_a.latest_frame().next();
        tick(&mut peer_a, InputMask::RIGHT);
        feed_remote(&mut peer_b, frame, InputMask::RIGHT);
        tick(&mut peer_b, InputMask::NONE);
        feed_remote(&mut peer_a, frame, InputMask::NONE);
    }
    assert_eq!(peer_a.latest_frame(), Frame::new(7));
    assert_eq!(peer_a.latest_state(), peer_b.latest_state());

    // A late input just before the wrap still rolls back cleanly.
    feed_remote(&mut peer_a, Frame::new(u16::MAX - 1), InputMask::LEFT);
    feed_remote(&mut peer_b, Frame::new(u16::MAX - 1), InputMask::LEFT);
    assert_eq!(peer_a.latest_state(), peer_b.latest_state());
}

#[test]
fn history_slots_hold_their_frames_for_the_whole_window() {
    let mut e = engine("idle", PlayerSlot::One);
    for _ in 0..1000 {
        tick(&mut e, InputMask::NONE);
    }
    let latest = e.latest_frame();
    for back in 0..DEFAULT_HISTORY_LEN as u16 - 1 {
        let f = Frame::new(latest.raw() - back);
        let snap = e.snapshot_at(f).expect("frame inside window");
        assert_eq!(snap.frame, f);
    }
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 32,
        ..ProptestConfig::default()
    })]

    /// For arbitrary short traces, a peer that receives every remote input
    /// late (after committing under prediction) converges to the in-order
    /// peer once delivery completes.
    #[test]
    fn prop_late_delivery_converges(
        masks in proptest::collection::vec(0u16..=0x1FF, 1..60),
    ) {
        let mut in_order = engine("counter-anim", PlayerSlot::One);
        for (i, bits) in masks.iter().enumerate() {
            let frame = Frame::new(i as u16 + 1);
            feed_remote(&mut in_order, frame, InputMask::from_bits(*bits));
        }
        for _ in 0..masks.len() {
            tick(&mut in_order, InputMask::RIGHT);
        }

        let mut late = engine("counter-anim", PlayerSlot::One);
        for _ in 0..masks.len() {
            tick(&mut late, InputMask::RIGHT);
        }
        for (i, bits) in masks.iter().enumerate() {
            let frame = Frame::new(i as u16 + 1);
            feed_remote(&mut late, frame, InputMask::from_bits(*bits));
        }

        prop_assert_eq!(late.latest_state(), in_order.latest_state());
    }

    /// Two engines fed the same trace are bit-identical at every frame,
    /// regardless of which side is "local".
    #[test]
    fn prop_identical_traces_identical_states(
        local_masks in proptest::collection::vec(0u16..=0x1FF, 1..40),
    ) {
        let mut a = engine("dir-walk", PlayerSlot::One);
        let mut b = engine("dir-walk", PlayerSlot::Two);
        for (i, bits) in local_masks.iter().enumerate() {
            let frame = Frame::new(i as u16 + 1);
            let mask = InputMask::from_bits(*bits);
            tick(&mut a, mask);
            feed_remote(&mut b, frame, mask);
            tick(&mut b, InputMask::NONE);
            prop_assert_eq!(a.latest_state(), b.latest_state());
            prop_assert_eq!(a.fingerprint_at(frame), b.fingerprint_at(frame));
        }
    }
}
