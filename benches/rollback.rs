//! Benchmarks for the rollback hot path: forward simulation, deep
//! rollbacks, fingerprinting, and the live-input codec.

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use smallvec::smallvec;

use ringside::hash::state_fingerprint;
use ringside::network::codec::{decode, encode};
use ringside::network::messages::Message;
use ringside::rollback::DEFAULT_HISTORY_LEN;
use ringside::{
    Command, CommandList, Frame, InputMask, PlayerSlot, RollbackEngine, ScriptVm, State,
};

/// A minimal deterministic VM for benching: walks by input direction and
/// keeps a tick counter as scope.
#[derive(Debug, Clone, Default)]
struct BenchVm {
    ticks: u32,
}

impl ScriptVm for BenchVm {
    type Scope = u32;

    fn load_source(&mut self, _source: &[u8]) -> bool {
        self.ticks = 0;
        true
    }

    fn take_last_error(&mut self) -> Option<String> {
        None
    }

    fn tick(&mut self, _frame: u32, input: InputMask) -> CommandList {
        self.ticks = self.ticks.wrapping_add(1);
        let dx = if input.pressed(InputMask::RIGHT) {
            1
        } else if input.pressed(InputMask::LEFT) {
            -1
        } else {
            0
        };
        smallvec![Command::Move { dx }]
    }

    fn fresh(&self) -> Self {
        Self::default()
    }

    fn snapshot(&self) -> u32 {
        self.ticks
    }

    fn restore(&mut self, scope: &u32) {
        self.ticks = *scope;
    }
}

fn seeded_engine() -> RollbackEngine<BenchVm> {
    RollbackEngine::seeded(
        State::initial(),
        BenchVm::default(),
        BenchVm::default(),
        PlayerSlot::One,
        DEFAULT_HISTORY_LEN,
    )
    .unwrap()
}

fn advance(engine: &mut RollbackEngine<BenchVm>, frames: u16, mask: InputMask) {
    for _ in 0..frames {
        let next = engine.latest_frame().next();
        engine.set_local_input(next, mask);
        engine.simulate_to(next);
    }
}

fn bench_forward_simulation(c: &mut Criterion) {
    c.bench_function("simulate 60 frames", |b| {
        b.iter_batched(
            seeded_engine,
            |mut engine| advance(&mut engine, 60, InputMask::RIGHT),
            BatchSize::SmallInput,
        );
    });
}

fn bench_rollback_depth_30(c: &mut Criterion) {
    c.bench_function("rollback depth 30", |b| {
        b.iter_batched(
            || {
                let mut engine = seeded_engine();
                advance(&mut engine, 60, InputMask::RIGHT);
                engine
            },
            |mut engine| {
                let frame = Frame::new(30);
                let _ = engine.set_remote_input(frame, InputMask::LEFT);
                engine.rollback_from(frame);
            },
            BatchSize::SmallInput,
        );
    });
}

fn bench_state_fingerprint(c: &mut Criterion) {
    let state = State::initial();
    c.bench_function("state fingerprint", |b| {
        b.iter(|| state_fingerprint(std::hint::black_box(&state)));
    });
}

fn bench_input_codec(c: &mut Criterion) {
    let message = Message::Input {
        frame: Frame::new(12345),
        mask: InputMask::RIGHT | InputMask::LIGHT_PUNCH,
        ack: Frame::new(12340),
    };
    let bytes = encode(&message).unwrap();
    c.bench_function("encode input datagram", |b| {
        b.iter(|| encode(std::hint::black_box(&message)).unwrap());
    });
    c.bench_function("decode input datagram", |b| {
        b.iter(|| decode(std::hint::black_box(&bytes)).unwrap());
    });
}

criterion_group!(
    benches,
    bench_forward_simulation,
    bench_rollback_depth_30,
    bench_state_fingerprint,
    bench_input_codec
);
criterion_main!(benches);
