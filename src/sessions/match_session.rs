//! The match session: wiring, lifecycle gating, and the 60 Hz loop.
//!
//! The session owns every subsystem — the shared store, the asset
//! exchange, the live link, and (once a script is loaded) the rollback
//! engine — and drives them from a single `poll` the embedder calls once
//! per animation frame. Inside a poll: drain the asset channel, drain the
//! live channel, then run as many fixed ticks as the accumulated wall
//! time covers. Within one tick the order is load-bearing: local input
//! commits before simulation, simulation before the viewer update and the
//! network emission, so the fingerprint both peers compute describes the
//! same snapshot.

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::{debug, trace, warn};
use web_time::Instant;

use crate::assets::Manifest;
use crate::cas::Cas;
use crate::error::RingsideError;
use crate::hash::state_fingerprint;
use crate::input::InputMask;
use crate::network::asset_exchange::{AssetEvent, AssetExchange, TransferStats};
use crate::network::live_channel::{LiveEvent, LiveLink, LiveStats};
use crate::rollback::RollbackEngine;
use crate::script::ScriptVm;
use crate::sessions::config::RuntimeConfig;
use crate::state::State;
use crate::{Config, Frame, Lifecycle, LiveChannel, PlayerSlot, ReliableChannel, SessionEvent, Viewer};

/// Maximum queued session events before the oldest are dropped.
const MAX_EVENT_QUEUE_SIZE: usize = 100;

/// Longest stretch of wall time one poll will convert into ticks. A tab
/// paused for minutes resumes with a bounded catch-up burst instead of a
/// frame storm.
const MAX_ACCUMULATED_SECS: f64 = 0.25;

/// A peer's half of the match: see the module docs for the overall shape.
///
/// Construct via [`crate::SessionBuilder`].
pub struct MatchSession<C: Config> {
    local_player: PlayerSlot,
    history_len: usize,
    tick_period: f64,
    hash_interval: u16,
    runtime: RuntimeConfig,

    cas: Arc<Cas>,
    exchange: AssetExchange,
    live: LiveLink,
    rollback: Option<RollbackEngine<C::Vm>>,

    global_vm: C::Vm,
    script_source: Option<Vec<u8>>,

    assets_chan: C::Assets,
    live_chan: C::Live,
    viewer: C::Viewer,

    accumulator: f64,
    last_poll: Option<Instant>,

    bundle_ready: bool,
    local_start: bool,
    remote_start: bool,
    announced_running: bool,
    warned_early_input: bool,

    events: VecDeque<SessionEvent>,
}

impl<C: Config> MatchSession<C> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        local_player: PlayerSlot,
        history_len: usize,
        tick_hz: u32,
        hash_interval: u16,
        high_water: usize,
        runtime: RuntimeConfig,
        vm: C::Vm,
        assets_chan: C::Assets,
        live_chan: C::Live,
        viewer: C::Viewer,
    ) -> Self {
        let cas = Arc::new(Cas::new());
        let exchange = AssetExchange::with_high_water(cas.clone(), high_water);
        Self {
            local_player,
            history_len,
            tick_period: 1.0 / f64::from(tick_hz),
            hash_interval,
            runtime,
            cas,
            exchange,
            live: LiveLink::new(),
            rollback: None,
            global_vm: vm,
            script_source: None,
            assets_chan,
            live_chan,
            viewer,
            accumulator: 0.0,
            last_poll: None,
            bundle_ready: false,
            local_start: false,
            remote_start: false,
            announced_running: false,
            warned_early_input: false,
            events: VecDeque::new(),
        }
    }

    // ###############
    // #  ACCESSORS  #
    // ###############

    /// The current lifecycle phase. A peer runs once it has the asset
    /// bundle and a script and game-start has been observed from the peer
    /// or issued locally.
    #[must_use]
    pub fn lifecycle(&self) -> Lifecycle {
        let loaded = self.bundle_ready && self.rollback.is_some();
        if loaded && (self.local_start || self.remote_start) {
            Lifecycle::Running
        } else if loaded {
            Lifecycle::Armed
        } else if self.bundle_ready
            || self.rollback.is_some()
            || self.exchange.pending_manifest().is_some()
            || self.local_start
            || self.remote_start
        {
            Lifecycle::Loading
        } else {
            Lifecycle::Idle
        }
    }

    /// Which player this peer controls.
    #[must_use]
    pub fn local_player(&self) -> PlayerSlot {
        self.local_player
    }

    /// The shared content-addressed store.
    #[must_use]
    pub fn cas(&self) -> &Arc<Cas> {
        &self.cas
    }

    /// The operator-level runtime configuration.
    #[must_use]
    pub fn runtime_config(&self) -> &RuntimeConfig {
        &self.runtime
    }

    /// The latest committed snapshot, once a script is loaded.
    #[must_use]
    pub fn latest_state(&self) -> Option<State> {
        self.rollback.as_ref().map(RollbackEngine::latest_state)
    }

    /// The latest committed frame, once a script is loaded.
    #[must_use]
    pub fn latest_frame(&self) -> Option<Frame> {
        self.rollback.as_ref().map(RollbackEngine::latest_frame)
    }

    /// Asset transfer counters.
    #[must_use]
    pub fn transfer_stats(&self) -> TransferStats {
        self.exchange.stats()
    }

    /// Live datagram counters.
    #[must_use]
    pub fn live_stats(&self) -> LiveStats {
        self.live.stats()
    }

    /// The newest of our frames the peer has acknowledged.
    #[must_use]
    pub fn peer_ack(&self) -> Option<Frame> {
        self.live.peer_ack()
    }

    /// Drains all pending session events.
    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        self.events.drain(..).collect()
    }

    /// The script source currently driving both instance VMs, if any.
    #[must_use]
    pub fn script_source(&self) -> Option<&[u8]> {
        self.script_source.as_deref()
    }

    /// The viewer handed in at construction.
    #[must_use]
    pub fn viewer(&self) -> &C::Viewer {
        &self.viewer
    }

    /// Mutable access to the viewer.
    pub fn viewer_mut(&mut self) -> &mut C::Viewer {
        &mut self.viewer
    }

    // ###############
    // #  OPERATOR   #
    // ###############

    /// Compiles `body` into the global VM and re-seeds the rollback engine
    /// at frame 0. On compile failure the previous engine is untouched.
    pub fn load_script_local(&mut self, body: &[u8]) -> Result<(), RingsideError> {
        self.apply_script("", body)
    }

    /// Applies `body` locally (re-seeding at frame 0) and pushes it to the
    /// peer on the asset channel, so both peers restart under the same
    /// logic from a common frame.
    pub fn push_script_to_peer(&mut self, name: &str, body: &[u8]) -> Result<(), RingsideError> {
        self.apply_script(name, body)?;
        self.exchange.push_script(name, body, &mut self.assets_chan)
    }

    /// Announces a locally built bundle to the peer. The bundle's chunks
    /// are already in our store, so this also satisfies the local asset
    /// gate and hands the bundle to the viewer.
    pub fn send_bundle(&mut self, manifest: &Manifest) -> Result<(), RingsideError> {
        self.exchange.send_manifest(manifest, &mut self.assets_chan)?;
        self.bundle_ready = true;
        self.viewer.bundle_ready(manifest, &self.cas);
        self.push_event(SessionEvent::BundleReady {
            manifest_id: manifest.id.clone(),
        });
        self.maybe_announce_running();
        Ok(())
    }

    /// Issues game-start: arms the local gate and tells the peer.
    pub fn start_game(&mut self) -> Result<(), RingsideError> {
        self.local_start = true;
        self.exchange.send_game_start(&mut self.assets_chan)?;
        self.maybe_announce_running();
        Ok(())
    }

    /// The transport's buffered byte count dropped to the low-water
    /// threshold; resume any paused chunk stream.
    pub fn notify_buffered_low(&mut self) {
        self.exchange.on_buffered_low(&mut self.assets_chan);
    }

    // ###############
    // #  MAIN LOOP  #
    // ###############

    /// One animation-frame worth of work: ingest both channels, then run
    /// however many fixed ticks the elapsed wall time covers, feeding
    /// `local_mask` as this peer's input for each. While the lifecycle
    /// gates are closed the accumulator is reset so no backlog builds up.
    pub fn poll(&mut self, now: Instant, local_mask: InputMask) {
        self.ingest_asset_channel();
        self.ingest_live_channel();

        let elapsed = match self.last_poll {
            Some(last) => now.saturating_duration_since(last).as_secs_f64(),
            None => 0.0,
        };
        self.last_poll = Some(now);

        if self.lifecycle() != Lifecycle::Running {
            self.accumulator = 0.0;
            return;
        }

        self.accumulator = (self.accumulator + elapsed).min(MAX_ACCUMULATED_SECS);
        while self.accumulator >= self.tick_period {
            self.step(local_mask);
            self.accumulator -= self.tick_period;
        }
    }

    fn step(&mut self, local_mask: InputMask) {
        let Some(engine) = self.rollback.as_mut() else {
            return;
        };
        let next = engine.latest_frame().next();
        engine.set_local_input(next, local_mask);
        engine.simulate_to(next);
        let snapshot = engine.latest_state();
        let ack = engine.last_remote_frame();

        self.viewer.present(&snapshot);
        self.live
            .send_input(&mut self.live_chan, next, local_mask, ack);
        if next.raw() % self.hash_interval == 0 {
            let hash = state_fingerprint(&snapshot);
            self.live.send_state_hash(&mut self.live_chan, next, hash);
        }
    }

    fn ingest_asset_channel(&mut self) {
        let frames = self.assets_chan.receive_all();
        let mut events = Vec::new();
        for bytes in frames {
            events.extend(self.exchange.on_frame(&bytes, &mut self.assets_chan));
        }
        // Keep a paused chunk stream moving even without new input.
        self.exchange.pump(&mut self.assets_chan);
        for event in events {
            self.on_asset_event(event);
        }
    }

    fn on_asset_event(&mut self, event: AssetEvent) {
        match event {
            AssetEvent::BundleReady(manifest) => {
                debug!(id = %manifest.id, "asset bundle ready");
                self.bundle_ready = true;
                self.viewer.bundle_ready(&manifest, &self.cas);
                self.push_event(SessionEvent::BundleReady {
                    manifest_id: manifest.id,
                });
                self.maybe_announce_running();
            }
            AssetEvent::ScriptReceived { name, body } => {
                debug!(name = %name, bytes = body.len(), "script pushed by peer");
                // A rejected push leaves the current engine running; the
                // error has already been surfaced as an event.
                let _ = self.apply_script(&name, &body);
            }
            AssetEvent::GameStartReceived => {
                debug!("peer issued game start");
                self.remote_start = true;
                self.maybe_announce_running();
            }
        }
    }

    fn ingest_live_channel(&mut self) {
        if let Some(engine) = self.rollback.as_mut() {
            let events = self.live.drain(&mut self.live_chan, engine);
            for event in events {
                match event {
                    LiveEvent::Desync {
                        frame,
                        local,
                        remote,
                    } => self.push_event(SessionEvent::Desync {
                        frame,
                        local,
                        remote,
                    }),
                    LiveEvent::InputDropped { frame } => {
                        self.push_event(SessionEvent::InputDropped { frame });
                    }
                }
            }
        } else {
            let dropped = self.live_chan.receive_all();
            if !dropped.is_empty() {
                trace!(count = dropped.len(), "live datagrams before script load, ignoring");
                if !self.warned_early_input {
                    self.warned_early_input = true;
                    self.push_event(SessionEvent::Status(
                        "live input ignored until a script is loaded".to_owned(),
                    ));
                }
            }
        }
    }

    fn apply_script(&mut self, name: &str, body: &[u8]) -> Result<(), RingsideError> {
        if !self.global_vm.load_source(body) {
            let error = self
                .global_vm
                .take_last_error()
                .unwrap_or_else(|| "unknown compile error".to_owned());
            warn!(name = %name, error = %error, "script rejected");
            self.push_event(SessionEvent::ScriptRejected {
                name: name.to_owned(),
                error: error.clone(),
            });
            return Err(RingsideError::ScriptCompile { message: error });
        }

        let mut vm1 = self.global_vm.fresh();
        let mut vm2 = self.global_vm.fresh();
        if !vm1.load_source(body) || !vm2.load_source(body) {
            // The global VM accepted this source a moment ago; an instance
            // refusing it means the VM violates its own contract.
            let error = vm1
                .take_last_error()
                .or_else(|| vm2.take_last_error())
                .unwrap_or_else(|| "instance VM rejected compiled source".to_owned());
            warn!(name = %name, error = %error, "instance VM rejected script");
            self.push_event(SessionEvent::ScriptRejected {
                name: name.to_owned(),
                error: error.clone(),
            });
            return Err(RingsideError::ScriptCompile { message: error });
        }

        let engine = RollbackEngine::seeded(
            State::initial(),
            vm1,
            vm2,
            self.local_player,
            self.history_len,
        )?;
        self.rollback = Some(engine);
        self.script_source = Some(body.to_vec());
        debug!(name = %name, bytes = body.len(), "script applied, engine re-seeded");
        self.push_event(SessionEvent::ScriptApplied {
            name: name.to_owned(),
        });
        self.maybe_announce_running();
        Ok(())
    }

    fn maybe_announce_running(&mut self) {
        if !self.announced_running && self.lifecycle() == Lifecycle::Running {
            self.announced_running = true;
            self.push_event(SessionEvent::GameStarted);
        }
    }

    fn push_event(&mut self, event: SessionEvent) {
        if self.events.len() >= MAX_EVENT_QUEUE_SIZE {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }
}

impl<C: Config> std::fmt::Debug for MatchSession<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatchSession")
            .field("lifecycle", &self.lifecycle())
            .field("local_player", &self.local_player)
            .field("latest_frame", &self.latest_frame())
            .field("bundle_ready", &self.bundle_ready)
            .field("local_start", &self.local_start)
            .field("remote_start", &self.remote_start)
            .finish_non_exhaustive()
    }
}
