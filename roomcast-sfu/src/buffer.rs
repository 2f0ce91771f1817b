//! Per-layer jitter/reorder buffer.
//!
//! The transport stack pushes raw, layer-tagged packets in; the receiver's
//! forwarding loop pulls in-order, de-duplicated [`ExtPacket`]s out. The
//! buffer also owns the layer's PLI throttle, audio-level observation,
//! per-layer statistics and the latest RTCP sender report.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Notify;
use tracing::warn;
use webrtc::rtcp::payload_feedbacks::picture_loss_indication::PictureLossIndication;
use webrtc::rtp::packet::Packet as RtpPacket;
use webrtc::util::marshal::Unmarshal;

use crate::config::AudioConfig;
use crate::error::{ReceiverError, Result};
use crate::packet::{ExtPacket, RtcpSenderReportData, RtcpSenderReportDataExt};

/// RTP header extension carrying the client-to-mixer audio level (RFC 6464).
pub const AUDIO_LEVEL_EXTENSION_URI: &str = "urn:ietf:params:rtp-hdrext:ssrc-audio-level";

/// Boxed RTCP packets handed to the feedback callback.
pub type RtcpPackets = Vec<Box<dyn webrtc::rtcp::packet::Packet + Send + Sync>>;

pub type RtcpFeedbackCallback = Box<dyn Fn(RtcpPackets) + Send + Sync>;
pub type SenderReportCallback = Box<dyn Fn(&RtcpSenderReportData) + Send + Sync>;

/// Transport-wide congestion control sink shared across a publisher's buffers.
pub trait TwccSink: Send + Sync {
    fn on_packet(&self, sn: u16, arrival: Instant, size: usize, marker: bool);
}

/// A raw packet plus the layer tags the transport stack derived for it.
#[derive(Debug, Clone)]
pub struct TaggedPacket {
    pub raw: Bytes,
    /// SVC spatial layer, −1 when the stream carries a single layer
    pub spatial: i32,
    /// Temporal layer, −1 when absent
    pub temporal: i32,
}

impl TaggedPacket {
    pub fn new(raw: Bytes) -> Self {
        Self {
            raw,
            spatial: -1,
            temporal: -1,
        }
    }
}

/// Cumulative per-layer stream statistics.
#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct StreamStats {
    pub packets: u64,
    pub bytes: u64,
    pub lost: u64,
    pub duplicates: u64,
    pub out_of_order: u64,
}

impl StreamStats {
    fn delta_since(&self, base: &StreamStats) -> StreamStats {
        StreamStats {
            packets: self.packets - base.packets,
            bytes: self.bytes - base.bytes,
            lost: self.lost - base.lost,
            duplicates: self.duplicates - base.duplicates,
            out_of_order: self.out_of_order - base.out_of_order,
        }
    }
}

// Gap the reader will jump over once this many packets queue up behind it.
const REORDER_TOLERANCE: usize = 16;
const RETRANSMIT_CACHE_SIZE: usize = 1024;
const FPS_WINDOW: Duration = Duration::from_secs(2);

struct Ring {
    pending: BTreeMap<u64, ExtPacket>,
    /// Next extended sequence number owed to the reader
    head: Option<u64>,
    highest: u64,
    cycles: u64,
    started: bool,
    cache: VecDeque<(u16, Bytes)>,
    stats: StreamStats,
    delta_base: StreamStats,
    /// Distinct RTP timestamps per (spatial, temporal), for fps estimation
    frames: HashMap<(i32, i32), VecDeque<(Instant, u32)>>,
}

impl Ring {
    fn new() -> Self {
        Self {
            pending: BTreeMap::new(),
            head: None,
            highest: 0,
            cycles: 0,
            started: false,
            cache: VecDeque::new(),
            stats: StreamStats::default(),
            delta_base: StreamStats::default(),
            frames: HashMap::new(),
        }
    }

    /// Unwrap a 16-bit sequence number against the highest one seen.
    fn extend_seq(&mut self, sn: u16) -> u64 {
        if !self.started {
            self.started = true;
            self.highest = (self.cycles << 16) | u64::from(sn);
            return self.highest;
        }

        let last = (self.highest & 0xFFFF) as u16;
        let ext = if sn.wrapping_sub(last) < 0x8000 {
            // at or ahead of the highest, possibly wrapping
            if sn < last {
                self.cycles += 1;
            }
            (self.cycles << 16) | u64::from(sn)
        } else {
            // behind the highest, possibly from before a wrap
            let cycles = if sn > last && self.cycles > 0 {
                self.cycles - 1
            } else {
                self.cycles
            };
            (cycles << 16) | u64::from(sn)
        };

        if ext > self.highest {
            self.highest = ext;
        }
        ext
    }

    fn pop_next(&mut self, flush: bool) -> Option<ExtPacket> {
        let head = self.head?;
        if let Some(pkt) = self.pending.remove(&head) {
            self.head = Some(head + 1);
            return Some(pkt);
        }

        // Jump the gap once enough packets pile up behind it, or
        // unconditionally when draining after close.
        if flush || self.pending.len() > REORDER_TOLERANCE {
            if let Some((next, pkt)) = self.pending.pop_first() {
                self.stats.lost += next - head;
                self.head = Some(next + 1);
                return Some(pkt);
            }
        }

        None
    }

    fn record_frame(&mut self, spatial: i32, temporal: i32, ts: u32, arrival: Instant) {
        let spatial = spatial.max(0);
        let temporal = temporal.max(0);
        let frames = self.frames.entry((spatial, temporal)).or_default();
        if frames.back().is_none_or(|&(_, last_ts)| last_ts != ts) {
            frames.push_back((arrival, ts));
        }
        while frames
            .front()
            .is_some_and(|&(at, _)| arrival.duration_since(at) > FPS_WINDOW)
        {
            frames.pop_front();
        }
    }
}

struct AudioLevelState {
    params: AudioConfig,
    window_start: Option<Instant>,
    frames: u32,
    active_frames: u32,
    level_sum: u64,
    smoothed: Option<f64>,
    active: bool,
}

impl AudioLevelState {
    fn observe(&mut self, level: u8, now: Instant) {
        let start = *self.window_start.get_or_insert(now);
        self.frames += 1;
        self.level_sum += u64::from(level);
        if level <= self.params.active_level {
            self.active_frames += 1;
        }

        if now.duration_since(start) < self.params.update_interval || self.frames == 0 {
            return;
        }

        let avg = self.level_sum as f64 / f64::from(self.frames);
        let pct = self.active_frames * 100 / self.frames;
        let n = f64::from(self.params.smooth_intervals.max(1));
        self.smoothed = Some(match self.smoothed {
            Some(prev) => (prev * (n - 1.0) + avg) / n,
            None => avg,
        });
        self.active = pct >= u32::from(self.params.min_percentile);

        self.window_start = Some(now);
        self.frames = 0;
        self.active_frames = 0;
        self.level_sum = 0;
    }
}

struct Callbacks {
    rtcp_feedback: Option<RtcpFeedbackCallback>,
    sender_report: Option<SenderReportCallback>,
}

/// Jitter/reorder buffer for one spatial layer.
pub struct Buffer {
    media_ssrc: AtomicU32,
    payload_type: u8,

    ring: Mutex<Ring>,
    notify: Notify,
    callbacks: Mutex<Callbacks>,

    paused: AtomicBool,
    closed: AtomicBool,

    pli_throttle_ns: AtomicU64,
    last_pli: Mutex<Option<Instant>>,
    rtt: AtomicU32,

    twcc: Mutex<Option<Arc<dyn TwccSink>>>,

    /// RTP header extension id carrying the audio level, 0 = none
    audio_level_ext_id: AtomicU32,
    audio: Mutex<AudioLevelState>,

    sender_report: Mutex<Option<RtcpSenderReportDataExt>>,
}

impl Buffer {
    #[must_use]
    pub fn new(payload_type: u8) -> Self {
        Self {
            media_ssrc: AtomicU32::new(0),
            payload_type,
            ring: Mutex::new(Ring::new()),
            notify: Notify::new(),
            callbacks: Mutex::new(Callbacks {
                rtcp_feedback: None,
                sender_report: None,
            }),
            paused: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            pli_throttle_ns: AtomicU64::new(Duration::from_millis(500).as_nanos() as u64),
            last_pli: Mutex::new(None),
            rtt: AtomicU32::new(0),
            twcc: Mutex::new(None),
            audio_level_ext_id: AtomicU32::new(0),
            audio: Mutex::new(AudioLevelState {
                params: AudioConfig::default(),
                window_start: None,
                frames: 0,
                active_frames: 0,
                level_sum: 0,
                smoothed: None,
                active: false,
            }),
            sender_report: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn payload_type(&self) -> u8 {
        self.payload_type
    }

    #[must_use]
    pub fn media_ssrc(&self) -> u32 {
        self.media_ssrc.load(Ordering::Acquire)
    }

    pub fn set_twcc(&self, sink: Arc<dyn TwccSink>) {
        *self.twcc.lock() = Some(sink);
    }

    pub fn set_audio_level_params(&self, params: AudioConfig) {
        self.audio.lock().params = params;
    }

    pub fn set_audio_level_extension_id(&self, id: u8) {
        self.audio_level_ext_id.store(u32::from(id), Ordering::Release);
    }

    pub fn on_rtcp_feedback(&self, cb: RtcpFeedbackCallback) {
        self.callbacks.lock().rtcp_feedback = Some(cb);
    }

    pub fn on_rtcp_sender_report(&self, cb: SenderReportCallback) {
        self.callbacks.lock().sender_report = Some(cb);
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Release);
    }

    pub fn set_pli_throttle(&self, min_interval: Duration) {
        self.pli_throttle_ns
            .store(min_interval.as_nanos() as u64, Ordering::Release);
    }

    pub fn set_rtt(&self, rtt_ms: u32) {
        self.rtt.store(rtt_ms, Ordering::Release);
    }

    #[must_use]
    pub fn rtt(&self) -> u32 {
        self.rtt.load(Ordering::Acquire)
    }

    /// Request a keyframe, honoring the throttle unless `force`.
    pub fn send_pli(&self, force: bool) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }

        let throttle = Duration::from_nanos(self.pli_throttle_ns.load(Ordering::Acquire));
        {
            let mut last = self.last_pli.lock();
            if !force {
                if let Some(at) = *last {
                    if at.elapsed() < throttle {
                        return;
                    }
                }
            }
            *last = Some(Instant::now());
        }

        let pli = PictureLossIndication {
            sender_ssrc: 0,
            media_ssrc: self.media_ssrc(),
        };
        let cbs = self.callbacks.lock();
        if let Some(cb) = cbs.rtcp_feedback.as_ref() {
            cb(vec![Box::new(pli)]);
        }
    }

    /// Feed one raw packet from the transport stack.
    ///
    /// Parses the header, updates statistics, TWCC and audio level, and
    /// queues the packet for in-order delivery. Packets pushed while paused
    /// are observed but not delivered.
    pub fn push(&self, tagged: TaggedPacket) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ReceiverError::Eof);
        }

        let mut buf = tagged.raw.clone();
        let pkt = RtpPacket::unmarshal(&mut buf)?;
        let arrival = Instant::now();
        let size = tagged.raw.len();

        self.media_ssrc.store(pkt.header.ssrc, Ordering::Release);

        if let Some(twcc) = self.twcc.lock().as_ref() {
            twcc.on_packet(pkt.header.sequence_number, arrival, size, pkt.header.marker);
        }

        let ext_id = self.audio_level_ext_id.load(Ordering::Acquire);
        if ext_id != 0 {
            if let Some(ext) = pkt.header.get_extension(ext_id as u8) {
                if let Some(&byte) = ext.first() {
                    self.audio.lock().observe(byte & 0x7F, arrival);
                }
            }
        }

        let ext_packet = ExtPacket {
            raw: tagged.raw,
            payload: pkt.payload.clone(),
            spatial: tagged.spatial,
            temporal: tagged.temporal,
            arrival,
            header: pkt.header,
        };

        let mut ring = self.ring.lock();
        ring.stats.packets += 1;
        ring.stats.bytes += size as u64;
        ring.record_frame(
            tagged.spatial,
            tagged.temporal,
            ext_packet.timestamp(),
            arrival,
        );

        let sn = ext_packet.sequence_number();
        ring.cache.push_back((sn, ext_packet.raw.clone()));
        while ring.cache.len() > RETRANSMIT_CACHE_SIZE {
            ring.cache.pop_front();
        }

        if self.paused.load(Ordering::Acquire) {
            return Ok(());
        }

        let ext_seq = ring.extend_seq(sn);
        let head = *ring.head.get_or_insert(ext_seq);
        if ext_seq < head || ring.pending.contains_key(&ext_seq) {
            ring.stats.duplicates += 1;
            return Ok(());
        }
        if ext_seq < ring.highest {
            ring.stats.out_of_order += 1;
        }
        ring.pending.insert(ext_seq, ext_packet);
        drop(ring);

        self.notify.notify_one();
        Ok(())
    }

    /// Record an RTCP sender report for this layer and notify the observer.
    pub fn push_sender_report(&self, data: RtcpSenderReportData) {
        *self.sender_report.lock() = Some(RtcpSenderReportDataExt {
            sender_report_data: data,
            arrival: Instant::now(),
        });

        let cbs = self.callbacks.lock();
        if let Some(cb) = cbs.sender_report.as_ref() {
            cb(&data);
        }
    }

    #[must_use]
    pub fn sender_report_data_ext(&self) -> Option<RtcpSenderReportDataExt> {
        *self.sender_report.lock()
    }

    /// Await the next in-order packet. Returns [`ReceiverError::Eof`] once
    /// the buffer is closed and drained.
    pub async fn read_extended(&self) -> Result<ExtPacket> {
        loop {
            let notified = self.notify.notified();
            {
                let closed = self.closed.load(Ordering::Acquire);
                let mut ring = self.ring.lock();
                if let Some(pkt) = ring.pop_next(closed) {
                    return Ok(pkt);
                }
                if closed {
                    return Err(ReceiverError::Eof);
                }
            }
            notified.await;
        }
    }

    /// Look up a retained packet for NACK retransmission.
    pub fn get_packet(&self, sn: u16) -> Result<Bytes> {
        let ring = self.ring.lock();
        ring.cache
            .iter()
            .rev()
            .find(|(cached_sn, _)| *cached_sn == sn)
            .map(|(_, raw)| raw.clone())
            .ok_or(ReceiverError::PacketNotFound { sn })
    }

    #[must_use]
    pub fn stats(&self) -> StreamStats {
        self.ring.lock().stats
    }

    /// Statistics accumulated since the previous call.
    pub fn delta_stats(&self) -> StreamStats {
        let mut ring = self.ring.lock();
        let delta = ring.stats.delta_since(&ring.delta_base);
        ring.delta_base = ring.stats;
        delta
    }

    /// Smoothed audio level (negated dBov) and speech-active flag.
    ///
    /// `None` until a full observation window has elapsed.
    #[must_use]
    pub fn audio_level(&self) -> Option<(f64, bool)> {
        let audio = self.audio.lock();
        audio.smoothed.map(|level| (level, audio.active))
    }

    /// Frames per second per temporal layer observed for a spatial layer.
    #[must_use]
    pub fn temporal_layer_fps_for_spatial(&self, spatial: i32) -> Vec<f32> {
        let ring = self.ring.lock();
        let window = FPS_WINDOW.as_secs_f32();
        (0..=MAX_TEMPORAL_IDX)
            .map(|t| {
                ring.frames
                    .get(&(spatial.max(0), t))
                    .map_or(0.0, |frames| frames.len() as f32 / window)
            })
            .collect()
    }

    /// Signal EOF to the reader. Queued packets drain first.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.notify.notify_waiters();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

const MAX_TEMPORAL_IDX: i32 = crate::types::MAX_TEMPORAL_LAYER;

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("payload_type", &self.payload_type)
            .field("ssrc", &self.media_ssrc())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Drop packets that arrive malformed instead of surfacing an error to the
/// transport stack; the stream keeps flowing on the next good packet.
pub fn push_or_warn(buffer: &Buffer, tagged: TaggedPacket) {
    if let Err(err) = buffer.push(tagged) {
        match err {
            ReceiverError::Eof => {}
            other => warn!(error = %other, "dropping unusable packet"),
        }
    }
}
