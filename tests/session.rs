//! Full-session integration tests: two peers over loopback channels,
//! lifecycle gating, co-simulation, script swaps, late delivery, and
//! desync surfacing.

mod common;

use common::stubs::{live_pair, reliable_pair, LiveControl, RecordingViewer, StubConfig, StubVm};
use ringside::assets::{build_bundle, BundleKind};
use ringside::{
    Frame, InputMask, Lifecycle, MatchSession, PlayerSlot, SessionBuilder, SessionEvent,
};
use web_time::{Duration, Instant};

/// Two connected sessions plus the live-channel controls and a scripted
/// clock advancing ~one tick per poll.
struct Rig {
    a: MatchSession<StubConfig>,
    b: MatchSession<StubConfig>,
    live_a: LiveControl,
    live_b: LiveControl,
    t0: Instant,
    polls: u64,
}

impl Rig {
    fn new() -> Self {
        common::init_tracing();
        let (rel_a, rel_b) = reliable_pair();
        let ((live_end_a, live_a), (live_end_b, live_b)) = live_pair();
        let a = SessionBuilder::<StubConfig>::new()
            .with_local_player(PlayerSlot::One)
            .start(StubVm::new(), rel_a, live_end_a, RecordingViewer::default())
            .unwrap();
        let b = SessionBuilder::<StubConfig>::new()
            .with_local_player(PlayerSlot::Two)
            .start(StubVm::new(), rel_b, live_end_b, RecordingViewer::default())
            .unwrap();
        Self {
            a,
            b,
            live_a,
            live_b,
            t0: Instant::now(),
            polls: 0,
        }
    }

    /// One animation frame on both peers. 17 ms per poll covers at least
    /// one 60 Hz tick once the sessions are running.
    fn poll_both(&mut self, mask_a: InputMask, mask_b: InputMask) {
        self.polls += 1;
        let now = self.t0 + Duration::from_millis(17 * self.polls);
        self.a.poll(now, mask_a);
        self.b.poll(now, mask_b);
    }

    /// Exchanges bundles, pushes the given script from A, and issues
    /// game-start on both sides, polling until both sessions run.
    fn arm(&mut self, script: &[u8]) {
        let manifest_a = build_bundle(
            self.a.cas(),
            "fighter-a",
            BundleKind::Mesh,
            &[(b"mesh-a", "model/obj")],
            None,
        );
        self.a.send_bundle(&manifest_a).unwrap();
        let manifest_b = build_bundle(
            self.b.cas(),
            "fighter-b",
            BundleKind::Mesh,
            &[(b"mesh-b", "model/obj")],
            None,
        );
        self.b.send_bundle(&manifest_b).unwrap();

        self.a.push_script_to_peer("fighter.logic", script).unwrap();
        self.a.start_game().unwrap();
        self.b.start_game().unwrap();

        for _ in 0..8 {
            if self.a.lifecycle() == Lifecycle::Running
                && self.b.lifecycle() == Lifecycle::Running
            {
                return;
            }
            self.poll_both(InputMask::NONE, InputMask::NONE);
        }
        assert_eq!(self.a.lifecycle(), Lifecycle::Running);
        assert_eq!(self.b.lifecycle(), Lifecycle::Running);
    }

    /// Polls until both peers have committed at least `frame`, with a
    /// safety bound.
    fn run_until(&mut self, frame: u16, mask_a: InputMask, mask_b: InputMask) {
        for _ in 0..(u64::from(frame) * 4 + 64) {
            let a_done = self.a.latest_frame().is_some_and(|f| f.raw() >= frame);
            let b_done = self.b.latest_frame().is_some_and(|f| f.raw() >= frame);
            if a_done && b_done {
                return;
            }
            self.poll_both(mask_a, mask_b);
        }
        panic!("sessions never reached frame {frame}");
    }
}

#[test]
fn simulation_is_gated_until_both_peers_are_ready() {
    let mut rig = Rig::new();
    assert_eq!(rig.a.lifecycle(), Lifecycle::Idle);

    for _ in 0..10 {
        rig.poll_both(InputMask::RIGHT, InputMask::NONE);
    }
    assert_eq!(rig.a.latest_frame(), None);
    assert!(rig.a.viewer().snapshots.is_empty());

    // Loading assets and a script is still not enough without game-start.
    let manifest = build_bundle(
        rig.a.cas(),
        "fighter-a",
        BundleKind::Mesh,
        &[(b"mesh", "model/obj")],
        None,
    );
    rig.a.send_bundle(&manifest).unwrap();
    rig.a.load_script_local(b"dir-walk").unwrap();
    for _ in 0..5 {
        rig.poll_both(InputMask::RIGHT, InputMask::NONE);
    }
    assert_eq!(rig.a.lifecycle(), Lifecycle::Armed);
    assert_eq!(rig.a.latest_frame(), Some(Frame::ZERO));
    assert!(rig.a.viewer().snapshots.is_empty());
}

#[test]
fn armed_peers_run_and_agree() {
    let mut rig = Rig::new();
    rig.arm(b"dir-walk");

    let events_a = rig.a.drain_events();
    assert!(events_a.contains(&SessionEvent::GameStarted));
    assert!(events_a
        .iter()
        .any(|e| matches!(e, SessionEvent::BundleReady { .. })));
    assert!(events_a
        .iter()
        .any(|e| matches!(e, SessionEvent::ScriptApplied { .. })));

    rig.run_until(120, InputMask::RIGHT, InputMask::NONE);
    assert!(
        rig.a.latest_state().unwrap().p1.x.raw() > -65536,
        "P1 walked right"
    );

    // Let the trailing datagrams land, then both peers must describe the
    // same frame with the same fingerprint.
    rig.poll_both(InputMask::NONE, InputMask::NONE);
    rig.poll_both(InputMask::NONE, InputMask::NONE);
    assert_eq!(rig.a.latest_frame(), rig.b.latest_frame());
    let hash_a = latest_fingerprint(&rig.a);
    let hash_b = latest_fingerprint(&rig.b);
    assert!(hash_a.is_some());
    assert_eq!(hash_a, hash_b);

    // The viewer saw every committed snapshot in order.
    let snaps = &rig.a.viewer().snapshots;
    assert!(!snaps.is_empty());
    for pair in snaps.windows(2) {
        assert_eq!(pair[1].frame, pair[0].frame.next());
    }

    // Acks flow back: the peer has confirmed some of our frames.
    assert!(rig.a.peer_ack().is_some());
    assert!(rig.b.peer_ack().is_some());
}

/// Fingerprint of the latest committed snapshot.
fn latest_fingerprint(session: &MatchSession<StubConfig>) -> Option<u32> {
    session
        .latest_state()
        .map(|s| ringside::hash::state_fingerprint(&s))
}

#[test]
fn script_swap_reseeds_both_peers_at_frame_zero() {
    let mut rig = Rig::new();
    rig.arm(b"dir-walk");
    rig.run_until(100, InputMask::RIGHT, InputMask::NONE);

    // Swap at a frame boundary: local reset is immediate.
    rig.a.push_script_to_peer("fighter-v2.logic", b"counter-anim").unwrap();
    assert_eq!(rig.a.latest_frame(), Some(Frame::ZERO));

    // The peer applies it on its next poll and resets too.
    rig.poll_both(InputMask::NONE, InputMask::NONE);
    assert!(rig
        .b
        .drain_events()
        .iter()
        .any(|e| matches!(e, SessionEvent::ScriptApplied { name } if name == "fighter-v2.logic")));
    assert!(rig.b.latest_frame().is_some_and(|f| f.raw() < 100));

    // Subsequent simulation runs under the new logic: counter-anim writes
    // animation hashes the old script never set.
    rig.run_until(20, InputMask::NONE, InputMask::NONE);
    let state = rig.a.latest_state().unwrap();
    assert_ne!(state.p1.anim, 0);
    assert_ne!(state.p2.anim, 0);
}

#[test]
fn held_inputs_roll_back_and_converge_on_release() {
    let mut rig = Rig::new();
    rig.arm(b"dir-walk");

    // B's outgoing inputs stall in the network while B walks left; A
    // predicts B idle meanwhile.
    rig.live_b.hold();
    rig.run_until(40, InputMask::NONE, InputMask::LEFT);
    let a_view_of_p2 = rig.a.latest_state().unwrap().p2.x;
    let b_view_of_p2 = rig.b.latest_state().unwrap().p2.x;
    assert_ne!(a_view_of_p2, b_view_of_p2, "A mispredicted B's fighter");

    // Everything lands at once: A rolls back and re-simulates.
    rig.live_b.release();
    rig.run_until(48, InputMask::NONE, InputMask::LEFT);
    rig.poll_both(InputMask::NONE, InputMask::NONE);
    rig.poll_both(InputMask::NONE, InputMask::NONE);

    let a_state = rig.a.latest_state().unwrap();
    let b_state = rig.b.latest_state().unwrap();
    // Both peers now describe the same walked-left trajectory for P2.
    assert!(a_state.p2.x.raw() < 65536);
    assert!(b_state.p2.x.raw() < 65536);
}

#[test]
fn divergent_logic_surfaces_desync_events() {
    let mut rig = Rig::new();
    rig.arm(b"dir-walk");
    // B quietly swaps to different logic without telling A.
    rig.b.load_script_local(b"idle").unwrap();
    rig.a.load_script_local(b"dir-walk").unwrap();

    rig.run_until(48, InputMask::RIGHT, InputMask::NONE);
    let mut desyncs = rig.a.drain_events();
    desyncs.extend(rig.b.drain_events());
    assert!(
        desyncs
            .iter()
            .any(|e| matches!(e, SessionEvent::Desync { .. })),
        "fingerprint exchange should flag the divergence"
    );
}
