//! The asset-exchange engine: manifest announce → need-list → chunk
//! stream → assembly, over the reliable channel.
//!
//! The engine never corrupts the store — chunks are put idempotently under
//! their content key, and failure only ever means "incomplete": an
//! unfinished bundle simply stays in `Awaiting` until the missing chunks
//! arrive. There are no retry timers; the reliable transport owns loss.
//!
//! Sending is throttled by watermark backpressure: queued frames drain
//! only while the transport's buffered byte count is at or below the
//! high-water mark, and resume on the embedder's buffered-amount-low
//! notification. Everything (manifests, chunks, scripts, control) flows
//! through one ordered queue so the channel's ordering guarantee is
//! preserved end to end.

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::assets::Manifest;
use crate::cas::Cas;
use crate::error::RingsideError;
use crate::network::codec::{self, CodecError};
use crate::network::messages::Message;
use crate::ReliableChannel;

/// Default high-water mark: pause sending above 1 MiB buffered.
pub const HIGH_WATER_MARK: usize = 1 << 20;

/// Default low-water threshold the transport should signal at (1 MiB).
pub const LOW_WATER_THRESHOLD: usize = 1 << 20;

/// Receive-side phase of the exchange.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum ExchangePhase {
    /// No manifest pending.
    #[default]
    Idle,
    /// A manifest is pending and chunks are still missing.
    Awaiting,
    /// The last pending manifest fully assembled.
    Ready,
}

/// Events the exchange hands up to the session.
#[derive(Debug, Clone, PartialEq)]
pub enum AssetEvent {
    /// Every chunk of the pending manifest is now in the store.
    BundleReady(Manifest),
    /// The peer pushed a logic script.
    ScriptReceived {
        /// Script display name.
        name: String,
        /// UTF-8 script source.
        body: Vec<u8>,
    },
    /// The peer issued game-start.
    GameStartReceived,
}

/// Transfer counters, for diagnostics.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct TransferStats {
    /// Chunk frames sent.
    pub chunks_sent: u64,
    /// Chunk frames received.
    pub chunks_received: u64,
    /// Total encoded bytes sent on the channel.
    pub bytes_sent: u64,
    /// Total chunk payload bytes received.
    pub bytes_received: u64,
}

/// The asset-exchange engine. Owns the send queue and the receive-side
/// state machine; shares the store with the viewer.
pub struct AssetExchange {
    cas: Arc<Cas>,
    phase: ExchangePhase,
    /// The last pending manifest, kept until it assembles.
    pending: Option<Manifest>,
    /// Encoded frames awaiting channel capacity, in send order.
    outgoing: VecDeque<Vec<u8>>,
    high_water: usize,
    stats: TransferStats,
}

impl AssetExchange {
    /// Creates an engine over the shared store with the default watermark.
    #[must_use]
    pub fn new(cas: Arc<Cas>) -> Self {
        Self::with_high_water(cas, HIGH_WATER_MARK)
    }

    /// Creates an engine with a custom high-water mark (validated by the
    /// session builder).
    #[must_use]
    pub fn with_high_water(cas: Arc<Cas>, high_water: usize) -> Self {
        Self {
            cas,
            phase: ExchangePhase::Idle,
            pending: None,
            outgoing: VecDeque::new(),
            high_water,
            stats: TransferStats::default(),
        }
    }

    /// The current receive-side phase.
    #[must_use]
    pub fn phase(&self) -> ExchangePhase {
        self.phase
    }

    /// The manifest still awaiting chunks, if any.
    #[must_use]
    pub fn pending_manifest(&self) -> Option<&Manifest> {
        self.pending.as_ref()
    }

    /// Transfer counters so far.
    #[must_use]
    pub fn stats(&self) -> TransferStats {
        self.stats
    }

    /// Frames queued but not yet handed to the transport.
    #[must_use]
    pub fn queued_frames(&self) -> usize {
        self.outgoing.len()
    }

    /// Announces a bundle to the peer. Validates the manifest first; an
    /// invalid manifest is refused rather than sent.
    pub fn send_manifest<R: ReliableChannel>(
        &mut self,
        manifest: &Manifest,
        channel: &mut R,
    ) -> Result<(), RingsideError> {
        manifest.validate()?;
        self.enqueue(&Message::Manifest(manifest.clone()))?;
        self.pump(channel);
        Ok(())
    }

    /// Pushes a logic script to the peer on the same ordered channel.
    pub fn push_script<R: ReliableChannel>(
        &mut self,
        name: &str,
        body: &[u8],
        channel: &mut R,
    ) -> Result<(), RingsideError> {
        self.enqueue(&Message::ScriptPush {
            name: name.to_owned(),
            body: body.to_vec(),
        })?;
        self.pump(channel);
        Ok(())
    }

    /// Sends the game-start control frame.
    pub fn send_game_start<R: ReliableChannel>(
        &mut self,
        channel: &mut R,
    ) -> Result<(), RingsideError> {
        self.enqueue(&Message::GameStart)?;
        self.pump(channel);
        Ok(())
    }

    /// Handles one received frame from the reliable channel, returning any
    /// events for the session. Malformed frames are dropped and logged.
    pub fn on_frame<R: ReliableChannel>(
        &mut self,
        bytes: &[u8],
        channel: &mut R,
    ) -> Vec<AssetEvent> {
        match codec::decode(bytes) {
            Ok(message) => self.on_message(message, channel),
            Err(err) => {
                warn!(error = %err, len = bytes.len(), "dropping malformed asset frame");
                Vec::new()
            }
        }
    }

    /// Handles one decoded message.
    pub fn on_message<R: ReliableChannel>(
        &mut self,
        message: Message,
        channel: &mut R,
    ) -> Vec<AssetEvent> {
        let mut events = Vec::new();
        match message {
            Message::Manifest(manifest) => self.on_manifest(manifest, channel, &mut events),
            Message::NeedChunks { hashes } => self.on_need_chunks(&hashes, channel),
            Message::Chunk {
                hash,
                offset,
                payload,
            } => self.on_chunk(&hash, offset, &payload, &mut events),
            Message::ScriptPush { name, body } => {
                events.push(AssetEvent::ScriptReceived { name, body });
            }
            Message::GameStart => events.push(AssetEvent::GameStartReceived),
            other @ (Message::Input { .. } | Message::StateHash { .. }) => {
                warn!(opcode = other.opcode(), "live-channel frame on asset channel, dropping");
            }
        }
        events
    }

    /// Drains the send queue while the transport has capacity. Called
    /// after every enqueue and from the session's buffered-amount-low
    /// notification.
    pub fn pump<R: ReliableChannel>(&mut self, channel: &mut R) {
        if !channel.is_open() {
            // Channel not open yet: defer, never lose data.
            return;
        }
        while let Some(frame) = self.outgoing.front() {
            if channel.buffered_amount() > self.high_water {
                trace!(
                    buffered = channel.buffered_amount(),
                    queued = self.outgoing.len(),
                    "backpressure pause"
                );
                return;
            }
            self.stats.bytes_sent += frame.len() as u64;
            channel.send(frame);
            self.outgoing.pop_front();
        }
    }

    /// The transport's buffered byte count dropped to the low-water
    /// threshold; resume sending.
    pub fn on_buffered_low<R: ReliableChannel>(&mut self, channel: &mut R) {
        self.pump(channel);
    }

    fn on_manifest<R: ReliableChannel>(
        &mut self,
        manifest: Manifest,
        channel: &mut R,
        events: &mut Vec<AssetEvent>,
    ) {
        if let Err(err) = manifest.validate() {
            warn!(error = %err, id = %manifest.id, "dropping invalid manifest");
            return;
        }
        let missing = manifest.missing_from(&self.cas);
        debug!(
            id = %manifest.id,
            chunks = manifest.chunks.len(),
            missing = missing.len(),
            "manifest received"
        );
        if missing.is_empty() && manifest.is_assembled(&self.cas) {
            self.phase = ExchangePhase::Ready;
            self.pending = None;
            events.push(AssetEvent::BundleReady(manifest));
            return;
        }
        self.pending = Some(manifest);
        self.phase = ExchangePhase::Awaiting;
        if let Err(err) = self.enqueue(&Message::NeedChunks { hashes: missing }) {
            warn!(error = %err, "failed to encode need-chunks");
            return;
        }
        self.pump(channel);
    }

    fn on_need_chunks<R: ReliableChannel>(&mut self, hashes: &[String], channel: &mut R) {
        for hash in hashes {
            let Some(payload) = self.cas.get(hash) else {
                // Unheld hashes are silently skipped per missing hash.
                debug!(hash = %hash, "need-chunks references unheld hash, skipping");
                continue;
            };
            let message = Message::Chunk {
                hash: hash.clone(),
                offset: 0,
                payload: payload.to_vec(),
            };
            match self.enqueue(&message) {
                Ok(()) => self.stats.chunks_sent += 1,
                Err(err) => warn!(error = %err, hash = %hash, "failed to encode chunk"),
            }
        }
        self.pump(channel);
    }

    fn on_chunk(
        &mut self,
        hash: &str,
        offset: u32,
        payload: &[u8],
        events: &mut Vec<AssetEvent>,
    ) {
        if offset != 0 {
            // The current protocol sends chunks whole; a partial write
            // under the content key would poison later reads.
            warn!(hash = %hash, offset, "partial chunk unsupported, dropping");
            return;
        }
        self.cas.put(hash, payload);
        self.stats.chunks_received += 1;
        self.stats.bytes_received += payload.len() as u64;
        let solicited = self
            .pending
            .as_ref()
            .is_some_and(|m| m.chunks.iter().any(|c| c.hash == hash));
        if !solicited {
            trace!(hash = %hash, "stored chunk outside the pending manifest");
        }
        if self.phase == ExchangePhase::Awaiting {
            let assembled = self
                .pending
                .as_ref()
                .is_some_and(|m| m.is_assembled(&self.cas));
            if assembled {
                self.phase = ExchangePhase::Ready;
                if let Some(manifest) = self.pending.take() {
                    debug!(id = %manifest.id, "bundle assembled");
                    events.push(AssetEvent::BundleReady(manifest));
                }
            }
        }
    }

    fn enqueue(&mut self, message: &Message) -> Result<(), CodecError> {
        let frame = codec::encode(message)?;
        self.outgoing.push_back(frame);
        Ok(())
    }
}

impl std::fmt::Debug for AssetExchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetExchange")
            .field("phase", &self.phase)
            .field("pending", &self.pending.as_ref().map(|m| &m.id))
            .field("queued", &self.outgoing.len())
            .field("stats", &self.stats)
            .finish()
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
    use crate::assets::{build_bundle, BundleKind};

    /// A channel that records sent frames and models a transport buffer:
    /// every send accumulates into the buffered-amount probe until the
    /// test "drains" it by zeroing `buffered`.
    #[derive(Default)]
    struct ScriptedChannel {
        open: bool,
        sent: Vec<Vec<u8>>,
        buffered: usize,
    }

    impl ScriptedChannel {
        fn open() -> Self {
            Self {
                open: true,
                ..Self::default()
            }
        }

        fn decoded(&self) -> Vec<Message> {
            self.sent.iter().map(|f| codec::decode(f).unwrap()).collect()
        }
    }

    impl ReliableChannel for ScriptedChannel {
        fn is_open(&self) -> bool {
            self.open
        }

        fn send(&mut self, frame: &[u8]) {
            self.buffered += frame.len();
            self.sent.push(frame.to_vec());
        }

        fn receive_all(&mut self) -> Vec<Vec<u8>> {
            Vec::new()
        }

        fn buffered_amount(&self) -> usize {
            self.buffered
        }
    }

    fn sprite_setup() -> (Arc<Cas>, Manifest) {
        let cas = Arc::new(Cas::new());
        let manifest = build_bundle(
            &cas,
            "ryu",
            BundleKind::Sprite,
            &[(b"sheet", "image/png"), (b"{}", "application/json")],
            Some(1),
        );
        (cas, manifest)
    }

    #[test]
    fn manifest_with_all_chunks_present_is_immediately_ready() {
        let (cas, manifest) = sprite_setup();
        let mut exchange = AssetExchange::new(cas);
        let mut channel = ScriptedChannel::open();
        let events = exchange.on_message(Message::Manifest(manifest.clone()), &mut channel);
        assert_eq!(events, vec![AssetEvent::BundleReady(manifest)]);
        assert_eq!(exchange.phase(), ExchangePhase::Ready);
        assert!(channel.sent.is_empty(), "no need-chunks when nothing is missing");
    }

    #[test]
    fn missing_chunks_elicit_a_need_list_and_awaiting() {
        let (_, manifest) = sprite_setup();
        // Receiver has an empty store.
        let mut exchange = AssetExchange::new(Arc::new(Cas::new()));
        let mut channel = ScriptedChannel::open();
        let events = exchange.on_message(Message::Manifest(manifest.clone()), &mut channel);
        assert!(events.is_empty());
        assert_eq!(exchange.phase(), ExchangePhase::Awaiting);
        match &channel.decoded()[0] {
            Message::NeedChunks { hashes } => {
                assert_eq!(hashes.len(), 2);
                assert_eq!(hashes[0], manifest.chunks[0].hash);
            }
            other => panic!("expected need-chunks, got {other:?}"),
        }
    }

    #[test]
    fn chunks_assemble_the_pending_manifest() {
        let (_, manifest) = sprite_setup();
        let mut exchange = AssetExchange::new(Arc::new(Cas::new()));
        let mut channel = ScriptedChannel::open();
        exchange.on_message(Message::Manifest(manifest.clone()), &mut channel);

        let first = exchange.on_message(
            Message::Chunk {
                hash: manifest.chunks[0].hash.clone(),
                offset: 0,
                payload: b"sheet".to_vec(),
            },
            &mut channel,
        );
        assert!(first.is_empty(), "still missing the atlas chunk");
        assert_eq!(exchange.phase(), ExchangePhase::Awaiting);

        let second = exchange.on_message(
            Message::Chunk {
                hash: manifest.chunks[1].hash.clone(),
                offset: 0,
                payload: b"{}".to_vec(),
            },
            &mut channel,
        );
        assert_eq!(second, vec![AssetEvent::BundleReady(manifest)]);
        assert_eq!(exchange.phase(), ExchangePhase::Ready);
        assert_eq!(exchange.stats().chunks_received, 2);
    }

    #[test]
    fn need_chunks_streams_held_chunks_and_skips_unheld() {
        let (cas, manifest) = sprite_setup();
        let mut exchange = AssetExchange::new(cas);
        let mut channel = ScriptedChannel::open();
        let unheld = Cas::hash_of(b"nobody has this");
        exchange.on_message(
            Message::NeedChunks {
                hashes: vec![
                    manifest.chunks[0].hash.clone(),
                    unheld,
                    manifest.chunks[1].hash.clone(),
                ],
            },
            &mut channel,
        );
        let sent = channel.decoded();
        assert_eq!(sent.len(), 2);
        assert!(matches!(&sent[0], Message::Chunk { hash, offset: 0, .. } if *hash == manifest.chunks[0].hash));
        assert!(matches!(&sent[1], Message::Chunk { hash, .. } if *hash == manifest.chunks[1].hash));
        assert_eq!(exchange.stats().chunks_sent, 2);
    }

    #[test]
    fn empty_need_chunks_elicits_zero_chunks() {
        let (cas, _) = sprite_setup();
        let mut exchange = AssetExchange::new(cas);
        let mut channel = ScriptedChannel::open();
        exchange.on_message(Message::NeedChunks { hashes: vec![] }, &mut channel);
        assert!(channel.sent.is_empty());
    }

    #[test]
    fn unsolicited_chunk_is_stored_without_state_change() {
        let cas = Arc::new(Cas::new());
        let mut exchange = AssetExchange::new(cas.clone());
        let mut channel = ScriptedChannel::open();
        let hash = Cas::hash_of(b"stray");
        let events = exchange.on_message(
            Message::Chunk {
                hash: hash.clone(),
                offset: 0,
                payload: b"stray".to_vec(),
            },
            &mut channel,
        );
        assert!(events.is_empty());
        assert_eq!(exchange.phase(), ExchangePhase::Idle);
        assert!(cas.has(&hash), "future-proofing: stray chunks are kept");
    }

    #[test]
    fn nonzero_offset_chunk_is_dropped() {
        let cas = Arc::new(Cas::new());
        let mut exchange = AssetExchange::new(cas.clone());
        let mut channel = ScriptedChannel::open();
        let hash = Cas::hash_of(b"partial");
        exchange.on_message(
            Message::Chunk {
                hash: hash.clone(),
                offset: 16,
                payload: b"tail".to_vec(),
            },
            &mut channel,
        );
        assert!(!cas.has(&hash));
    }

    #[test]
    fn backpressure_pauses_at_high_water_and_resumes_on_low() {
        let (cas, _) = sprite_setup();
        // Ten 512 KiB payloads queued through need-chunks.
        let mut hashes = Vec::new();
        for i in 0..10u8 {
            let payload = vec![i; 512 * 1024];
            hashes.push(cas.ingest(&payload));
        }
        let mut exchange = AssetExchange::new(cas);
        let mut channel = ScriptedChannel::open();

        // The first burst stops as soon as the buffered bytes cross 1 MiB:
        // two 512 KiB chunk frames fit, the third observes the pause.
        exchange.on_need_chunks(&hashes, &mut channel);
        assert!(exchange.queued_frames() > 0, "must pause above high water");
        assert!(channel.buffered > HIGH_WATER_MARK);
        let first_burst = channel.sent.len();
        assert!(first_burst < 10);

        // Each low-water notification resumes the stream for another burst.
        let mut resumes = 0;
        while exchange.queued_frames() > 0 {
            channel.buffered = 0; // transport drained below the threshold
            exchange.on_buffered_low(&mut channel);
            resumes += 1;
            assert!(resumes <= 10, "pump made no progress");
        }
        assert!(resumes > 1, "resume should have been needed more than once");

        let mut delivered_payload: usize = 0;
        for message in channel.decoded() {
            match message {
                Message::Chunk { payload, .. } => delivered_payload += payload.len(),
                other => panic!("unexpected frame {other:?}"),
            }
        }
        assert_eq!(delivered_payload, 10 * 512 * 1024);
        assert_eq!(exchange.stats().chunks_sent, 10);
    }

    #[test]
    fn closed_channel_defers_without_losing_frames() {
        let (cas, manifest) = sprite_setup();
        let mut exchange = AssetExchange::new(cas);
        let mut channel = ScriptedChannel::default(); // closed
        exchange.send_manifest(&manifest, &mut channel).unwrap();
        assert!(channel.sent.is_empty());
        assert_eq!(exchange.queued_frames(), 1);
        channel.open = true;
        exchange.pump(&mut channel);
        assert_eq!(channel.sent.len(), 1);
    }

    #[test]
    fn script_push_and_game_start_round_through() {
        let (cas, _) = sprite_setup();
        let mut exchange = AssetExchange::new(cas);
        let mut channel = ScriptedChannel::open();
        exchange
            .push_script("fighter.logic", b"tick", &mut channel)
            .unwrap();
        exchange.send_game_start(&mut channel).unwrap();
        let sent = channel.decoded();
        assert_eq!(sent.len(), 2);

        // Feed them back through a receiving exchange.
        let mut receiver = AssetExchange::new(Arc::new(Cas::new()));
        let mut back = ScriptedChannel::open();
        let mut events = Vec::new();
        for message in sent {
            events.extend(receiver.on_message(message, &mut back));
        }
        assert_eq!(
            events,
            vec![
                AssetEvent::ScriptReceived {
                    name: "fighter.logic".to_owned(),
                    body: b"tick".to_vec(),
                },
                AssetEvent::GameStartReceived,
            ]
        );
    }

    #[test]
    fn malformed_frames_are_dropped() {
        let (cas, _) = sprite_setup();
        let mut exchange = AssetExchange::new(cas);
        let mut channel = ScriptedChannel::open();
        assert!(exchange.on_frame(&[], &mut channel).is_empty());
        assert!(exchange.on_frame(&[0x7F, 1, 2], &mut channel).is_empty());
        assert_eq!(exchange.phase(), ExchangePhase::Idle);
    }

    #[test]
    fn invalid_manifest_is_refused_on_send() {
        let (cas, mut manifest) = sprite_setup();
        manifest.meta.clear(); // sprite without atlas meta
        let mut exchange = AssetExchange::new(cas);
        let mut channel = ScriptedChannel::open();
        let result = exchange.send_manifest(&manifest, &mut channel);
        assert!(matches!(result, Err(RingsideError::Manifest(_))));
        assert!(channel.sent.is_empty());
    }
}
