//! Uptrack receiver: one publisher track, up to three spatial layers.
//!
//! Owns the per-layer buffers and the downtrack spreader, runs one
//! forwarding loop per up-track, and routes packets, sender reports and
//! RTCP feedback between them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecParameters;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpHeaderExtensionParameters;

use crate::buffer::{Buffer, RtcpPackets, TwccSink, AUDIO_LEVEL_EXTENSION_URI};
use crate::config::{AudioConfig, PliThrottleConfig, StreamTrackerConfig};
use crate::error::{ReceiverError, Result};
use crate::packet::RtcpSenderReportDataExt;
use crate::red::{RedRole, RedSidecarReceiver};
use crate::spreader::DownTrackSpreader;
use crate::stream_tracker::StreamTrackerManager;
use crate::types::{
    Bitrates, ParticipantId, TrackId, TrackInfo, TrackKind, INVALID_LAYER_SPATIAL,
    MAX_SPATIAL_LAYER,
};

pub use crate::spreader::TrackSender;

/// Receive-side contract of a published track, shared by the concrete
/// receiver and the RED sidecar adapters.
pub trait TrackReceiver: Send + Sync {
    fn track_id(&self) -> TrackId;
    fn stream_id(&self) -> String;
    fn codec(&self) -> RTCRtpCodecParameters;
    fn header_extensions(&self) -> Vec<RTCRtpHeaderExtensionParameters>;
    fn kind(&self) -> TrackKind;
    fn track_info(&self) -> TrackInfo;

    /// Retained-packet lookup for NACK retransmission.
    fn read_rtp(&self, layer: i32, sn: u16) -> Result<Bytes>;

    fn get_layered_bitrate(&self) -> Bitrates;

    /// Smoothed audio level; `None` for video tracks.
    fn get_audio_level(&self) -> Option<(f64, bool)>;

    fn send_pli(&self, layer: i32, force: bool);

    fn set_up_track_paused(&self, paused: bool);
    fn set_max_expected_spatial_layer(&self, layer: i32);

    fn add_down_track(&self, down_track: Arc<dyn TrackSender>) -> Result<()>;
    fn delete_down_track(&self, subscriber_id: &ParticipantId);

    fn get_layer_dimension(&self, layer: i32) -> (u32, u32);
    fn get_temporal_layer_fps_for_spatial(&self, layer: i32) -> Vec<f32>;

    fn get_rtcp_sender_report_data_ext(&self, layer: i32) -> Option<RtcpSenderReportDataExt>;
    fn get_reference_layer_rtp_timestamp(
        &self,
        ts: u32,
        layer: i32,
        reference_layer: i32,
    ) -> Result<u32>;
}

/// Metadata for one inbound encoding (one simulcast RID, or the single
/// stream of an audio/SVC track).
#[derive(Debug, Clone, Default)]
pub struct UpTrack {
    pub ssrc: u32,
    pub rid: String,
}

type LayerSlots<T> = [Option<T>; MAX_SPATIAL_LAYER as usize + 1];

#[derive(Debug, Clone, Serialize)]
pub struct UpTrackDebugInfo {
    pub layer: i32,
    pub ssrc: u32,
    pub rid: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReceiverDebugInfo {
    pub simulcast: bool,
    pub svc: bool,
    pub red: bool,
    pub closed: bool,
    pub up_tracks: Vec<UpTrackDebugInfo>,
    pub down_tracks: usize,
}

/// Builds a [`Receiver`]; all tunables compose here.
pub struct ReceiverBuilder {
    track_info: TrackInfo,
    stream_id: String,
    twcc: Option<Arc<dyn TwccSink>>,
    pli_throttle: PliThrottleConfig,
    audio_config: AudioConfig,
    tracker_config: StreamTrackerConfig,
    use_trackers: bool,
    lb_threshold: usize,
}

impl ReceiverBuilder {
    #[must_use]
    pub fn new(track_info: TrackInfo, stream_id: impl Into<String>) -> Self {
        Self {
            track_info,
            stream_id: stream_id.into(),
            twcc: None,
            pli_throttle: PliThrottleConfig::default(),
            audio_config: AudioConfig::default(),
            tracker_config: StreamTrackerConfig::default(),
            use_trackers: false,
            lb_threshold: 0,
        }
    }

    /// Minimum time between PLIs, per layer.
    #[must_use]
    pub fn pli_throttle(mut self, config: PliThrottleConfig) -> Self {
        self.pli_throttle = config;
        self
    }

    /// Active-speaker detection parameters.
    #[must_use]
    pub fn audio_config(mut self, config: AudioConfig) -> Self {
        self.audio_config = config;
        self
    }

    /// Enable stream trackers for simulcast layer management.
    #[must_use]
    pub fn stream_trackers(mut self) -> Self {
        self.use_trackers = true;
        self
    }

    #[must_use]
    pub fn stream_tracker_config(mut self, config: StreamTrackerConfig) -> Self {
        self.tracker_config = config;
        self
    }

    /// Parallelize packet writes once downtracks exceed `threshold`.
    ///
    /// Use a smaller value for servers hosting a few large rooms and a
    /// larger value (or 0, disabled) for many small rooms.
    #[must_use]
    pub fn load_balance_threshold(mut self, threshold: usize) -> Self {
        self.lb_threshold = threshold;
        self
    }

    /// Congestion-control sink shared across this publisher's buffers.
    #[must_use]
    pub fn twcc(mut self, twcc: Arc<dyn TwccSink>) -> Self {
        self.twcc = Some(twcc);
        self
    }

    pub fn build(self) -> Arc<Receiver> {
        let is_simulcast = self.track_info.layers.iter().any(|l| !l.rid.is_empty());
        let is_svc = self.track_info.is_svc();
        let is_red = self.track_info.is_red();

        let stream_tracker_manager =
            StreamTrackerManager::new(self.track_info.clone(), self.tracker_config);

        let receiver = Arc::new(Receiver {
            track_info: self.track_info,
            stream_id: self.stream_id,
            is_simulcast,
            is_svc,
            is_red,
            use_trackers: self.use_trackers,
            pli_throttle: self.pli_throttle,
            audio_config: self.audio_config,
            lb_threshold: self.lb_threshold,
            twcc: self.twcc,
            closed: AtomicBool::new(false),
            close_started: AtomicBool::new(false),
            on_close: Mutex::new(None),
            rtcp_tx: Mutex::new(None),
            up_tracks: RwLock::new(Default::default()),
            buffers: RwLock::new(Default::default()),
            rtt: AtomicU32::new(0),
            stream_tracker_manager,
            spreader: DownTrackSpreader::new(self.lb_threshold),
            primary_receiver: OnceLock::new(),
            red_receiver: OnceLock::new(),
            red_pkt_writer: Mutex::new(None),
        });

        let weak = Arc::downgrade(&receiver);
        receiver
            .stream_tracker_manager
            .on_available_layers_changed(Box::new(move |available, exempted| {
                if let Some(receiver) = weak.upgrade() {
                    receiver.down_track_layer_change(available, exempted);
                }
            }));
        let weak = Arc::downgrade(&receiver);
        receiver
            .stream_tracker_manager
            .on_bitrate_availability_changed(Box::new(move || {
                if let Some(receiver) = weak.upgrade() {
                    receiver.down_track_bitrate_availability_change();
                }
            }));
        receiver.stream_tracker_manager.start();

        receiver
    }
}

/// Receives one publisher track and fans its packets out to downtracks.
pub struct Receiver {
    track_info: TrackInfo,
    stream_id: String,
    is_simulcast: bool,
    is_svc: bool,
    is_red: bool,
    use_trackers: bool,
    pli_throttle: PliThrottleConfig,
    audio_config: AudioConfig,
    lb_threshold: usize,
    twcc: Option<Arc<dyn TwccSink>>,

    closed: AtomicBool,
    close_started: AtomicBool,
    on_close: Mutex<Option<Box<dyn FnOnce() + Send>>>,

    rtcp_tx: Mutex<Option<mpsc::Sender<RtcpPackets>>>,

    up_tracks: RwLock<LayerSlots<UpTrack>>,
    buffers: RwLock<LayerSlots<Arc<Buffer>>>,
    rtt: AtomicU32,

    stream_tracker_manager: Arc<StreamTrackerManager>,
    spreader: DownTrackSpreader,

    primary_receiver: OnceLock<Arc<RedSidecarReceiver>>,
    red_receiver: OnceLock<Arc<RedSidecarReceiver>>,
    red_pkt_writer: Mutex<Option<Arc<RedSidecarReceiver>>>,
}

impl Receiver {
    #[must_use]
    pub fn builder(track_info: TrackInfo, stream_id: impl Into<String>) -> ReceiverBuilder {
        ReceiverBuilder::new(track_info, stream_id)
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_simulcast(&self) -> bool {
        self.is_simulcast
    }

    #[must_use]
    pub fn is_svc(&self) -> bool {
        self.is_svc
    }

    #[must_use]
    pub fn is_red(&self) -> bool {
        self.is_red
    }

    pub fn on_close_handler(&self, cb: Box<dyn FnOnce() + Send>) {
        *self.on_close.lock() = Some(cb);
    }

    pub fn set_rtcp_channel(&self, tx: mpsc::Sender<RtcpPackets>) {
        *self.rtcp_tx.lock() = Some(tx);
    }

    #[must_use]
    pub fn ssrc(&self, layer: i32) -> u32 {
        if !(0..=MAX_SPATIAL_LAYER).contains(&layer) {
            return 0;
        }
        self.up_tracks.read()[layer as usize]
            .as_ref()
            .map_or(0, |t| t.ssrc)
    }

    /// Wire one spatial layer: configure its buffer, store the handles and
    /// spawn the forwarding loop. Silently ignored after close.
    pub fn add_up_track(self: &Arc<Self>, track: UpTrack, buffer: Arc<Buffer>) {
        if self.is_closed() {
            return;
        }

        let layer = match self.track_info.kind {
            TrackKind::Audio => 0,
            // SVC carries every spatial layer in its single stream; the
            // buffer lives at the top slot and reads are redirected there
            TrackKind::Video if self.is_svc => MAX_SPATIAL_LAYER,
            TrackKind::Video => self.track_info.rid_to_spatial_layer(&track.rid),
        };

        if let Some(twcc) = self.twcc.as_ref() {
            buffer.set_twcc(twcc.clone());
        }
        buffer.set_audio_level_params(self.audio_config);
        if let Some(ext) = self
            .track_info
            .header_extensions
            .iter()
            .find(|ext| ext.uri == AUDIO_LEVEL_EXTENSION_URI)
        {
            buffer.set_audio_level_extension_id(ext.id as u8);
        }

        let weak = Arc::downgrade(self);
        buffer.on_rtcp_feedback(Box::new(move |packets| {
            if let Some(receiver) = weak.upgrade() {
                receiver.send_rtcp(packets);
            }
        }));

        let weak = Arc::downgrade(self);
        let payload_type = self.track_info.codec.payload_type;
        buffer.on_rtcp_sender_report(Box::new(move |sr_data| {
            if let Some(receiver) = weak.upgrade() {
                for dt in receiver.spreader.down_tracks() {
                    dt.handle_rtcp_sender_report_data(payload_type, layer, sr_data);
                }
            }
        }));

        let throttle = self.pli_throttle.for_layer(layer);
        if !throttle.is_zero() {
            buffer.set_pli_throttle(throttle);
        }

        self.up_tracks.write()[layer as usize] = Some(track);
        self.buffers.write()[layer as usize] = Some(buffer.clone());

        buffer.set_rtt(self.rtt.load(Ordering::Acquire));
        buffer.set_paused(self.stream_tracker_manager.is_paused());

        if self.track_info.kind == TrackKind::Video && self.use_trackers {
            self.stream_tracker_manager.add_tracker(layer);
        }

        let receiver = Arc::clone(self);
        tokio::spawn(async move {
            receiver.forward_rtp(layer).await;
        });
    }

    /// Upstream stopped sending (publisher mute); freezes the trackers so
    /// layers are not turned off, and pauses every buffer.
    pub fn set_up_track_paused(&self, paused: bool) {
        self.stream_tracker_manager.set_paused(paused);

        let buffers = self.buffers.read();
        for buffer in buffers.iter().flatten() {
            buffer.set_paused(paused);
        }
    }

    pub fn add_down_track(&self, down_track: Arc<dyn TrackSender>) -> Result<()> {
        if self.is_closed() {
            return Err(ReceiverError::ReceiverClosed);
        }

        if self.track_info.kind == TrackKind::Video {
            let (available, exempted) = self.stream_tracker_manager.available_layers();
            down_track.up_track_layers_change(&available, &exempted);
        }
        down_track.track_info_available();

        self.spreader.store(down_track);
        Ok(())
    }

    /// Idempotent; a no-op once the receiver has closed.
    pub fn delete_down_track(&self, subscriber_id: &ParticipantId) {
        if self.is_closed() {
            return;
        }
        self.spreader.free(subscriber_id);
    }

    pub fn set_rtt(&self, rtt_ms: u32) {
        if self.rtt.swap(rtt_ms, Ordering::AcqRel) == rtt_ms {
            return;
        }

        // snapshot first, then fan out without holding the array lock
        let buffers: Vec<Arc<Buffer>> = self.buffers.read().iter().flatten().cloned().collect();
        for buffer in buffers {
            buffer.set_rtt(rtt_ms);
        }
    }

    pub fn set_max_expected_spatial_layer(&self, layer: i32) {
        self.stream_tracker_manager.set_max_expected_spatial_layer(layer);
    }

    pub fn send_pli(&self, layer: i32, force: bool) {
        if let Some(buffer) = self.buffer_for_layer(layer) {
            buffer.send_pli(force);
        }
    }

    pub fn read_rtp(&self, layer: i32, sn: u16) -> Result<Bytes> {
        let buffer = self
            .buffer_for_layer(layer)
            .ok_or(ReceiverError::BufferNotFound { layer })?;
        buffer.get_packet(sn)
    }

    #[must_use]
    pub fn get_layer_dimension(&self, layer: i32) -> (u32, u32) {
        self.stream_tracker_manager.layer_dimension(layer)
    }

    #[must_use]
    pub fn get_layered_bitrate(&self) -> Bitrates {
        self.stream_tracker_manager.layered_bitrate()
    }

    #[must_use]
    pub fn get_temporal_layer_fps_for_spatial(&self, layer: i32) -> Vec<f32> {
        let Some(buffer) = self.buffer_for_layer(layer) else {
            return Vec::new();
        };

        if self.is_svc {
            buffer.temporal_layer_fps_for_spatial(layer)
        } else {
            buffer.temporal_layer_fps_for_spatial(0)
        }
    }

    /// First available buffer's level; audio tracks only.
    #[must_use]
    pub fn get_audio_level(&self) -> Option<(f64, bool)> {
        if self.track_info.kind == TrackKind::Video {
            return None;
        }

        let buffers = self.buffers.read();
        buffers
            .iter()
            .flatten()
            .next()
            .and_then(|buffer| buffer.audio_level())
    }

    #[must_use]
    pub fn get_rtcp_sender_report_data_ext(&self, layer: i32) -> Option<RtcpSenderReportDataExt> {
        if layer == INVALID_LAYER_SPATIAL {
            return None;
        }
        self.buffer_for_layer(layer)?.sender_report_data_ext()
    }

    /// Map an RTP timestamp from `layer` into `reference_layer`'s timebase
    /// using the NTP anchors of both layers' latest sender reports.
    ///
    /// The NTP difference is taken as a signed 64-bit value, so a reference
    /// layer whose clock lags the source layer yields a negative offset and
    /// wraps correctly under the modular u32 arithmetic.
    pub fn get_reference_layer_rtp_timestamp(
        &self,
        ts: u32,
        layer: i32,
        reference_layer: i32,
    ) -> Result<u32> {
        if layer == reference_layer {
            return Ok(ts);
        }

        let sr_layer = self
            .buffer_for_layer(layer)
            .ok_or(ReceiverError::InvalidLayer {
                track_id: self.track_info.id.clone(),
                layer,
            })?
            .sender_report_data_ext()
            .filter(|sr| sr.sender_report_data.ntp_timestamp != 0)
            .ok_or(ReceiverError::SenderReportNotAvailable { layer })?;

        let sr_ref = self
            .buffer_for_layer(reference_layer)
            .ok_or(ReceiverError::InvalidLayer {
                track_id: self.track_info.id.clone(),
                layer: reference_layer,
            })?
            .sender_report_data_ext()
            .filter(|sr| sr.sender_report_data.ntp_timestamp != 0)
            .ok_or(ReceiverError::SenderReportNotAvailable {
                layer: reference_layer,
            })?;

        // Line up the RTP timestamps using the NTP time of the most recent
        // sender report of each layer. The reference layer may have stopped
        // long ago; u32 modular arithmetic keeps the mapping valid.
        let ntp_diff = sr_ref
            .sender_report_data
            .ntp_timestamp
            .wrapping_sub(sr_layer.sender_report_data.ntp_timestamp) as i64
            as f64
            / (1u64 << 32) as f64;
        let clock_rate = f64::from(self.track_info.codec.capability.clock_rate);
        let offset = (ntp_diff * clock_rate).round() as i64;
        let normalized_ts = sr_layer
            .sender_report_data
            .rtp_timestamp
            .wrapping_add(offset as u32);

        Ok(ts.wrapping_add(sr_ref.sender_report_data.rtp_timestamp.wrapping_sub(normalized_ts)))
    }

    /// Aggregate statistics across all layers.
    #[must_use]
    pub fn get_track_stats(&self) -> crate::buffer::StreamStats {
        let buffers = self.buffers.read();
        let mut total = crate::buffer::StreamStats::default();
        for buffer in buffers.iter().flatten() {
            let stats = buffer.stats();
            total.packets += stats.packets;
            total.bytes += stats.bytes;
            total.lost += stats.lost;
            total.duplicates += stats.duplicates;
            total.out_of_order += stats.out_of_order;
        }
        total
    }

    /// Per-SSRC delta statistics, patched with the layer each buffer serves.
    pub fn delta_stats(&self) -> HashMap<u32, (i32, crate::buffer::StreamStats)> {
        let buffers: Vec<(i32, Arc<Buffer>)> = {
            let slots = self.buffers.read();
            slots
                .iter()
                .enumerate()
                .filter_map(|(layer, b)| b.as_ref().map(|b| (layer as i32, b.clone())))
                .collect()
        };

        let mut deltas = HashMap::with_capacity(buffers.len());
        for (layer, buffer) in buffers {
            deltas.insert(self.ssrc(layer), (layer, buffer.delta_stats()));
        }
        deltas
    }

    #[must_use]
    pub fn debug_info(&self) -> ReceiverDebugInfo {
        let up_tracks = {
            let slots = self.up_tracks.read();
            slots
                .iter()
                .enumerate()
                .filter_map(|(layer, t)| {
                    t.as_ref().map(|t| UpTrackDebugInfo {
                        layer: layer as i32,
                        ssrc: t.ssrc,
                        rid: t.rid.clone(),
                    })
                })
                .collect()
        };

        ReceiverDebugInfo {
            simulcast: self.is_simulcast,
            svc: self.is_svc,
            red: self.is_red,
            closed: self.is_closed(),
            up_tracks,
            down_tracks: self.spreader.len(),
        }
    }

    /// Primary-codec adapter for a RED track; lazily constructed exactly
    /// once, installing its forward hook into the packet path. Returns the
    /// receiver itself when it does not carry RED or is already closed.
    pub fn get_primary_receiver_for_red(self: &Arc<Self>) -> Arc<dyn TrackReceiver> {
        if !self.is_red || self.is_closed() {
            return Arc::clone(self) as Arc<dyn TrackReceiver>;
        }

        let mut created = false;
        let sidecar = self.primary_receiver.get_or_init(|| {
            created = true;
            RedSidecarReceiver::new(
                Arc::downgrade(self),
                RedRole::PrimaryFromRed,
                self.lb_threshold,
            )
        });
        if created {
            *self.red_pkt_writer.lock() = Some(sidecar.clone());
        }
        sidecar.clone() as Arc<dyn TrackReceiver>
    }

    /// RED-producing sidecar for a primary-codec track (opus-only
    /// publishers whose subscribers negotiated RED). Same lifecycle as
    /// [`Self::get_primary_receiver_for_red`].
    pub fn get_red_receiver(self: &Arc<Self>) -> Arc<dyn TrackReceiver> {
        if self.is_red || self.is_closed() {
            return Arc::clone(self) as Arc<dyn TrackReceiver>;
        }

        let mut created = false;
        let sidecar = self.red_receiver.get_or_init(|| {
            created = true;
            RedSidecarReceiver::new(
                Arc::downgrade(self),
                RedRole::RedFromPrimary,
                self.lb_threshold,
            )
        });
        if created {
            *self.red_pkt_writer.lock() = Some(sidecar.clone());
        }
        sidecar.clone() as Arc<dyn TrackReceiver>
    }

    fn send_rtcp(&self, packets: RtcpPackets) {
        if packets.is_empty() || self.is_closed() {
            return;
        }

        let tx = self.rtcp_tx.lock();
        if let Some(tx) = tx.as_ref() {
            if tx.try_send(packets).is_err() {
                warn!(track_id = %self.track_info.id, "rtcp channel full, dropping feedback");
            }
        }
    }

    fn down_track_layer_change(&self, available: &[i32], exempted: &[i32]) {
        for dt in self.spreader.down_tracks() {
            dt.up_track_layers_change(available, exempted);
        }
    }

    fn down_track_bitrate_availability_change(&self) {
        for dt in self.spreader.down_tracks() {
            dt.up_track_bitrate_availability_change();
        }
    }

    fn buffer_for_layer(&self, layer: i32) -> Option<Arc<Buffer>> {
        // svc codecs only have a buffer at full quality
        let layer = if self.is_svc { MAX_SPATIAL_LAYER } else { layer };
        if !(0..=MAX_SPATIAL_LAYER).contains(&layer) {
            return None;
        }
        self.buffers.read()[layer as usize].clone()
    }

    async fn forward_rtp(self: Arc<Self>, layer: i32) {
        let tracker = self.stream_tracker_manager.get_tracker(layer);

        loop {
            let (buffer, red_pkt_writer) = {
                let buffers = self.buffers.read();
                (
                    buffers[layer as usize].clone(),
                    self.red_pkt_writer.lock().clone(),
                )
            };
            let Some(buffer) = buffer else { break };

            let pkt = match buffer.read_extended().await {
                Ok(pkt) => pkt,
                Err(_) => break,
            };

            // svc packet, dispatch to the tracker of its spatial layer
            let mut spatial_layer = layer;
            let mut spatial_tracker = tracker.clone();
            if pkt.spatial >= 0 {
                spatial_layer = pkt.spatial;
                spatial_tracker = match self.stream_tracker_manager.get_tracker(pkt.spatial) {
                    Some(tracker) => Some(tracker),
                    None => Some(self.stream_tracker_manager.add_tracker(pkt.spatial)),
                };
            }

            if let Some(tracker) = spatial_tracker.as_ref() {
                tracker.observe(
                    pkt.temporal,
                    pkt.raw.len(),
                    pkt.payload.len(),
                    pkt.marker(),
                    pkt.timestamp(),
                );
            }

            let pkt = Arc::new(pkt);
            let broadcast_pkt = Arc::clone(&pkt);
            self.spreader
                .broadcast(move |dt| dt.write_rtp(&broadcast_pkt, spatial_layer))
                .await;

            if let Some(writer) = red_pkt_writer {
                writer.forward_rtp(&pkt, spatial_layer);
            }
        }

        // The loop owns the only path that observes EOF; the once-guard
        // makes the first exiting layer run the global teardown.
        if !self.close_started.swap(true, Ordering::AcqRel) {
            self.closed.store(true, Ordering::Release);
            debug!(track_id = %self.track_info.id, "receiver closing");
            self.close_tracks().await;
            if let Some(sidecar) = self.primary_receiver.get() {
                sidecar.close().await;
            }
            if let Some(sidecar) = self.red_receiver.get() {
                sidecar.close().await;
            }
            self.stream_tracker_manager.stop();
        }

        self.stream_tracker_manager.remove_tracker(layer);
        if self.is_svc {
            self.stream_tracker_manager.remove_all_trackers();
        }
    }

    async fn close_tracks(&self) {
        for dt in self.spreader.reset_and_get_down_tracks() {
            dt.close().await;
        }

        let on_close = self.on_close.lock().take();
        if let Some(cb) = on_close {
            cb();
        }
    }
}

impl TrackReceiver for Receiver {
    fn track_id(&self) -> TrackId {
        self.track_info.id.clone()
    }

    fn stream_id(&self) -> String {
        self.stream_id.clone()
    }

    fn codec(&self) -> RTCRtpCodecParameters {
        self.track_info.codec.clone()
    }

    fn header_extensions(&self) -> Vec<RTCRtpHeaderExtensionParameters> {
        self.track_info.header_extensions.clone()
    }

    fn kind(&self) -> TrackKind {
        self.track_info.kind
    }

    fn track_info(&self) -> TrackInfo {
        self.track_info.clone()
    }

    fn read_rtp(&self, layer: i32, sn: u16) -> Result<Bytes> {
        Receiver::read_rtp(self, layer, sn)
    }

    fn get_layered_bitrate(&self) -> Bitrates {
        Receiver::get_layered_bitrate(self)
    }

    fn get_audio_level(&self) -> Option<(f64, bool)> {
        Receiver::get_audio_level(self)
    }

    fn send_pli(&self, layer: i32, force: bool) {
        Receiver::send_pli(self, layer, force);
    }

    fn set_up_track_paused(&self, paused: bool) {
        Receiver::set_up_track_paused(self, paused);
    }

    fn set_max_expected_spatial_layer(&self, layer: i32) {
        Receiver::set_max_expected_spatial_layer(self, layer);
    }

    fn add_down_track(&self, down_track: Arc<dyn TrackSender>) -> Result<()> {
        Receiver::add_down_track(self, down_track)
    }

    fn delete_down_track(&self, subscriber_id: &ParticipantId) {
        Receiver::delete_down_track(self, subscriber_id);
    }

    fn get_layer_dimension(&self, layer: i32) -> (u32, u32) {
        Receiver::get_layer_dimension(self, layer)
    }

    fn get_temporal_layer_fps_for_spatial(&self, layer: i32) -> Vec<f32> {
        Receiver::get_temporal_layer_fps_for_spatial(self, layer)
    }

    fn get_rtcp_sender_report_data_ext(&self, layer: i32) -> Option<RtcpSenderReportDataExt> {
        Receiver::get_rtcp_sender_report_data_ext(self, layer)
    }

    fn get_reference_layer_rtp_timestamp(
        &self,
        ts: u32,
        layer: i32,
        reference_layer: i32,
    ) -> Result<u32> {
        Receiver::get_reference_layer_rtp_timestamp(self, ts, layer, reference_layer)
    }
}

impl std::fmt::Debug for Receiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Receiver")
            .field("track_id", &self.track_info.id)
            .field("kind", &self.track_info.kind)
            .field("simulcast", &self.is_simulcast)
            .field("svc", &self.is_svc)
            .field("red", &self.is_red)
            .field("closed", &self.is_closed())
            .finish()
    }
}
