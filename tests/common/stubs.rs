//! Stub implementations of the trait seams: a deterministic scripted VM,
//! loopback channel pairs, and a recording viewer.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    dead_code
)]

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use smallvec::smallvec;

use ringside::assets::Manifest;
use ringside::{
    Cas, Command, CommandList, Config, InputMask, LiveChannel, ReliableChannel, ScriptVm, State,
    Viewer,
};

// ============================================================
// Scripted VM
// ============================================================

/// The source "language" of the stub VM is a single program name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Program {
    #[default]
    NotLoaded,
    /// `move(0)` every tick, never switches anim.
    Idle,
    /// Right→move(1), Left→move(-1), else move(0).
    DirWalk,
    /// Emits nothing; exercises the input fallback.
    Silent,
    /// DirWalk plus an animation derived from a scope counter.
    CounterAnim,
}

/// The stub VM's persistent scope: a tick counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StubScope {
    pub ticks: u32,
}

/// A deterministic table-driven VM good enough to exercise every
/// simulation and rollback path.
#[derive(Debug, Clone, Default)]
pub struct StubVm {
    program: Program,
    scope: StubScope,
    last_error: Option<String>,
}

impl StubVm {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ScriptVm for StubVm {
    type Scope = StubScope;

    fn load_source(&mut self, source: &[u8]) -> bool {
        let program = match source {
            b"idle" => Program::Idle,
            b"dir-walk" => Program::DirWalk,
            b"silent" => Program::Silent,
            b"counter-anim" => Program::CounterAnim,
            other => {
                self.last_error = Some(format!(
                    "unknown program {:?}",
                    String::from_utf8_lossy(other)
                ));
                return false;
            }
        };
        self.program = program;
        self.scope = StubScope::default();
        true
    }

    fn take_last_error(&mut self) -> Option<String> {
        self.last_error.take()
    }

    fn tick(&mut self, _frame: u32, input: InputMask) -> CommandList {
        self.scope.ticks = self.scope.ticks.wrapping_add(1);
        let dir = if input.pressed(InputMask::RIGHT) {
            1
        } else if input.pressed(InputMask::LEFT) {
            -1
        } else {
            0
        };
        match self.program {
            Program::NotLoaded | Program::Silent => smallvec![],
            Program::Idle => smallvec![Command::Move { dx: 0 }],
            Program::DirWalk => smallvec![Command::Move { dx: dir }],
            Program::CounterAnim => smallvec![
                Command::Move { dx: dir },
                Command::Anim {
                    name: format!("step-{}", self.scope.ticks % 4),
                },
            ],
        }
    }

    fn fresh(&self) -> Self {
        Self::default()
    }

    fn snapshot(&self) -> StubScope {
        self.scope
    }

    fn restore(&mut self, scope: &StubScope) {
        self.scope = *scope;
    }
}

// ============================================================
// Loopback channels
// ============================================================

#[derive(Default)]
struct Pipe {
    queue: VecDeque<Vec<u8>>,
}

/// One end of a reliable, ordered loopback channel. Delivery is instant,
/// so the backpressure probe always reads zero.
pub struct LoopReliable {
    outgoing: Arc<Mutex<Pipe>>,
    incoming: Arc<Mutex<Pipe>>,
    pub open: bool,
}

/// Creates a connected pair of reliable loopback ends.
pub fn reliable_pair() -> (LoopReliable, LoopReliable) {
    let a_to_b = Arc::new(Mutex::new(Pipe::default()));
    let b_to_a = Arc::new(Mutex::new(Pipe::default()));
    (
        LoopReliable {
            outgoing: a_to_b.clone(),
            incoming: b_to_a.clone(),
            open: true,
        },
        LoopReliable {
            outgoing: b_to_a,
            incoming: a_to_b,
            open: true,
        },
    )
}

impl ReliableChannel for LoopReliable {
    fn is_open(&self) -> bool {
        self.open
    }

    fn send(&mut self, frame: &[u8]) {
        self.outgoing.lock().queue.push_back(frame.to_vec());
    }

    fn receive_all(&mut self) -> Vec<Vec<u8>> {
        self.incoming.lock().queue.drain(..).collect()
    }

    fn buffered_amount(&self) -> usize {
        0
    }
}

#[derive(Default)]
struct LiveCtl {
    held: bool,
    pen: Vec<Vec<u8>>,
}

/// External handle to one live end, usable after the channel has moved
/// into a session: while held, that end's sends accumulate in a pen until
/// released (late delivery, long after the frames they describe).
#[derive(Clone)]
pub struct LiveControl {
    ctl: Arc<Mutex<LiveCtl>>,
    outgoing: Arc<Mutex<Pipe>>,
}

impl LiveControl {
    /// Starts holding this end's outgoing datagrams.
    pub fn hold(&self) {
        self.ctl.lock().held = true;
    }

    /// Delivers everything held so far and resumes normal delivery.
    pub fn release(&self) {
        let mut ctl = self.ctl.lock();
        ctl.held = false;
        let mut pipe = self.outgoing.lock();
        for datagram in ctl.pen.drain(..) {
            pipe.queue.push_back(datagram);
        }
    }
}

/// One end of an unordered loopback datagram channel.
pub struct LoopLive {
    outgoing: Arc<Mutex<Pipe>>,
    incoming: Arc<Mutex<Pipe>>,
    ctl: Arc<Mutex<LiveCtl>>,
}

/// Creates a connected pair of live loopback ends with their control
/// handles.
pub fn live_pair() -> ((LoopLive, LiveControl), (LoopLive, LiveControl)) {
    let a_to_b = Arc::new(Mutex::new(Pipe::default()));
    let b_to_a = Arc::new(Mutex::new(Pipe::default()));
    let ctl_a = Arc::new(Mutex::new(LiveCtl::default()));
    let ctl_b = Arc::new(Mutex::new(LiveCtl::default()));
    let end_a = LoopLive {
        outgoing: a_to_b.clone(),
        incoming: b_to_a.clone(),
        ctl: ctl_a.clone(),
    };
    let control_a = LiveControl {
        ctl: ctl_a,
        outgoing: a_to_b.clone(),
    };
    let end_b = LoopLive {
        outgoing: b_to_a.clone(),
        incoming: a_to_b,
        ctl: ctl_b.clone(),
    };
    let control_b = LiveControl {
        ctl: ctl_b,
        outgoing: b_to_a,
    };
    ((end_a, control_a), (end_b, control_b))
}

impl LiveChannel for LoopLive {
    fn is_open(&self) -> bool {
        true
    }

    fn send(&mut self, datagram: &[u8]) {
        let mut ctl = self.ctl.lock();
        if ctl.held {
            ctl.pen.push(datagram.to_vec());
        } else {
            self.outgoing.lock().queue.push_back(datagram.to_vec());
        }
    }

    fn receive_all(&mut self) -> Vec<Vec<u8>> {
        self.incoming.lock().queue.drain(..).collect()
    }
}

// ============================================================
// Recording viewer
// ============================================================

/// A viewer that just records what it was shown.
#[derive(Debug, Default)]
pub struct RecordingViewer {
    pub snapshots: Vec<State>,
    pub bundles: Vec<String>,
}

impl Viewer for RecordingViewer {
    fn present(&mut self, state: &State) {
        self.snapshots.push(*state);
    }

    fn bundle_ready(&mut self, manifest: &Manifest, _cas: &Cas) {
        self.bundles.push(manifest.id.clone());
    }
}

// ============================================================
// Config bundle
// ============================================================

/// The integration-test session configuration.
pub struct StubConfig;

impl Config for StubConfig {
    type Vm = StubVm;
    type Assets = LoopReliable;
    type Live = LoopLive;
    type Viewer = RecordingViewer;
}
