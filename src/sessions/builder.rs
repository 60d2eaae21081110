//! Session construction with up-front validation.
//!
//! Every tunable is validated before a [`MatchSession`] exists, so a
//! running session never has to re-check its own configuration. The
//! builder is generic over [`Config`], which bundles the embedder's VM,
//! transport, and viewer types.

use std::marker::PhantomData;

use crate::error::RingsideError;
use crate::network::asset_exchange::HIGH_WATER_MARK;
use crate::rollback::{DEFAULT_HISTORY_LEN, MAX_HISTORY_LEN, MIN_HISTORY_LEN};
use crate::sessions::config::RuntimeConfig;
use crate::sessions::match_session::MatchSession;
use crate::{Config, PlayerSlot, STATE_HASH_INTERVAL, TICK_RATE_HZ};

/// Builder for a [`MatchSession`].
///
/// # Example
///
/// ```ignore
/// let session = SessionBuilder::<BrowserConfig>::new()
///     .with_local_player(PlayerSlot::Two)
///     .with_history_len(256)
///     .start(vm, assets_channel, live_channel, viewer)?;
/// ```
pub struct SessionBuilder<C: Config> {
    local_player: PlayerSlot,
    history_len: usize,
    tick_hz: u32,
    hash_interval: u16,
    high_water: usize,
    low_water: usize,
    runtime: RuntimeConfig,
    _marker: PhantomData<C>,
}

impl<C: Config> Default for SessionBuilder<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Config> SessionBuilder<C> {
    /// Creates a builder with the standard settings: player one, a
    /// 128-slot history ring, 60 Hz, fingerprints every 16 frames, and
    /// 1 MiB backpressure watermarks.
    #[must_use]
    pub fn new() -> Self {
        Self {
            local_player: PlayerSlot::One,
            history_len: DEFAULT_HISTORY_LEN,
            tick_hz: TICK_RATE_HZ,
            hash_interval: STATE_HASH_INTERVAL,
            high_water: HIGH_WATER_MARK,
            low_water: HIGH_WATER_MARK,
            runtime: RuntimeConfig::default(),
            _marker: PhantomData,
        }
    }

    /// Which player this peer controls. Must mirror the remote peer's
    /// choice, or both peers will drive the same fighter.
    #[must_use]
    pub fn with_local_player(mut self, slot: PlayerSlot) -> Self {
        self.local_player = slot;
        self
    }

    /// History ring length. Must cover the worst-case rollback distance
    /// (input latency tail in frames) with margin; validated to
    /// `MIN_HISTORY_LEN..=MAX_HISTORY_LEN` at start.
    #[must_use]
    pub fn with_history_len(mut self, len: usize) -> Self {
        self.history_len = len;
        self
    }

    /// Simulation tick rate in Hz. The protocol is specified at 60.
    #[must_use]
    pub fn with_tick_rate(mut self, hz: u32) -> Self {
        self.tick_hz = hz;
        self
    }

    /// How many frames between outgoing state fingerprints.
    #[must_use]
    pub fn with_hash_interval(mut self, frames: u16) -> Self {
        self.hash_interval = frames;
        self
    }

    /// Backpressure watermarks in bytes: sending pauses above `high` and
    /// the transport should signal buffered-amount-low at `low`.
    #[must_use]
    pub fn with_watermarks(mut self, high: usize, low: usize) -> Self {
        self.high_water = high;
        self.low_water = low;
        self
    }

    /// Operator-level runtime configuration.
    #[must_use]
    pub fn with_runtime_config(mut self, runtime: RuntimeConfig) -> Self {
        self.runtime = runtime;
        self
    }

    /// Validates the configuration and starts an idle session around the
    /// given VM, channels, and viewer.
    ///
    /// # Errors
    ///
    /// - [`RingsideError::InvalidHistoryLength`] if the ring is too short
    ///   to absorb rollbacks or too long for wrap-aware frame compares.
    /// - [`RingsideError::InvalidTickRate`] on a zero tick rate.
    /// - [`RingsideError::InvalidHashInterval`] on a zero interval.
    /// - [`RingsideError::InvalidWatermarks`] if `low > high` or `high`
    ///   is zero.
    pub fn start(
        self,
        vm: C::Vm,
        assets: C::Assets,
        live: C::Live,
        viewer: C::Viewer,
    ) -> Result<MatchSession<C>, RingsideError> {
        if !(MIN_HISTORY_LEN..=MAX_HISTORY_LEN).contains(&self.history_len) {
            return Err(RingsideError::InvalidHistoryLength {
                requested: self.history_len,
                min: MIN_HISTORY_LEN,
                max: MAX_HISTORY_LEN,
            });
        }
        if self.tick_hz == 0 {
            return Err(RingsideError::InvalidTickRate { hz: self.tick_hz });
        }
        if self.hash_interval == 0 {
            return Err(RingsideError::InvalidHashInterval);
        }
        if self.high_water == 0 || self.low_water > self.high_water {
            return Err(RingsideError::InvalidWatermarks {
                high: self.high_water,
                low: self.low_water,
            });
        }
        Ok(MatchSession::new(
            self.local_player,
            self.history_len,
            self.tick_hz,
            self.hash_interval,
            self.high_water,
            self.runtime,
            vm,
            assets,
            live,
            viewer,
        ))
    }
}

impl<C: Config> std::fmt::Debug for SessionBuilder<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let Self {
            local_player,
            history_len,
            tick_hz,
            hash_interval,
            high_water,
            low_water,
            runtime,
            _marker,
        } = self;
        f.debug_struct("SessionBuilder")
            .field("local_player", local_player)
            .field("history_len", history_len)
            .field("tick_hz", tick_hz)
            .field("hash_interval", hash_interval)
            .field("high_water", high_water)
            .field("low_water", low_water)
            .field("runtime", runtime)
            .finish()
    }
}
