//! Shared fixtures for pipeline tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use webrtc::rtp::header::Header;
use webrtc::rtp::packet::Packet as RtpPacket;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTCRtpCodecParameters};
use webrtc::util::marshal::Marshal;

use crate::packet::{ExtPacket, RtcpSenderReportData};
use crate::spreader::TrackSender;
use crate::types::{ParticipantId, TrackId, TrackInfo, TrackKind, VideoLayer, VideoQuality};

/// Downtrack double that records everything written to it.
pub struct RecordingTrackSender {
    id: ParticipantId,
    pub written: Mutex<Vec<(u16, i32)>>,
    pub sender_reports: Mutex<Vec<(u8, i32)>>,
    pub layer_changes: Mutex<Vec<(Vec<i32>, Vec<i32>)>>,
    pub info_available: AtomicUsize,
    pub closed: AtomicUsize,
}

impl RecordingTrackSender {
    pub fn new(id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: ParticipantId::from(id),
            written: Mutex::new(Vec::new()),
            sender_reports: Mutex::new(Vec::new()),
            layer_changes: Mutex::new(Vec::new()),
            info_available: AtomicUsize::new(0),
            closed: AtomicUsize::new(0),
        })
    }

    pub fn written_count(&self) -> usize {
        self.written.lock().len()
    }

    pub fn close_count(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TrackSender for RecordingTrackSender {
    fn subscriber_id(&self) -> ParticipantId {
        self.id.clone()
    }

    fn write_rtp(&self, pkt: &ExtPacket, spatial_layer: i32) {
        self.written
            .lock()
            .push((pkt.sequence_number(), spatial_layer));
    }

    fn up_track_layers_change(&self, available: &[i32], exempted: &[i32]) {
        self.layer_changes
            .lock()
            .push((available.to_vec(), exempted.to_vec()));
    }

    fn up_track_bitrate_availability_change(&self) {}

    fn track_info_available(&self) {
        self.info_available.fetch_add(1, Ordering::SeqCst);
    }

    fn handle_rtcp_sender_report_data(
        &self,
        payload_type: u8,
        layer: i32,
        _sr_data: &RtcpSenderReportData,
    ) {
        self.sender_reports.lock().push((payload_type, layer));
    }

    async fn close(&self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }

    async fn close_with_flush(&self, _flush: bool) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn ext_packet(sn: u16) -> ExtPacket {
    ExtPacket {
        raw: Bytes::from_static(&[0u8; 12]),
        header: Header {
            sequence_number: sn,
            ..Default::default()
        },
        payload: Bytes::new(),
        spatial: -1,
        temporal: -1,
        arrival: std::time::Instant::now(),
    }
}

pub fn raw_rtp(sn: u16, ts: u32, ssrc: u32) -> Bytes {
    let pkt = RtpPacket {
        header: Header {
            version: 2,
            payload_type: 96,
            sequence_number: sn,
            timestamp: ts,
            ssrc,
            ..Default::default()
        },
        payload: Bytes::from_static(&[0u8; 64]),
    };
    pkt.marshal().expect("marshal")
}

/// Packet with an RFC 6464 audio-level extension (voice-activity bit set).
pub fn raw_rtp_with_audio_level(sn: u16, ext_id: u8, level: u8) -> Bytes {
    let mut header = Header {
        version: 2,
        payload_type: 111,
        sequence_number: sn,
        timestamp: u32::from(sn) * 960,
        ssrc: 0x5005,
        ..Default::default()
    };
    header
        .set_extension(ext_id, Bytes::copy_from_slice(&[0x80 | (level & 0x7F)]))
        .expect("set extension");

    let pkt = RtpPacket {
        header,
        payload: Bytes::from_static(&[0u8; 64]),
    };
    pkt.marshal().expect("marshal")
}

pub fn codec(mime: &str, clock_rate: u32) -> RTCRtpCodecParameters {
    RTCRtpCodecParameters {
        capability: RTCRtpCodecCapability {
            mime_type: mime.to_string(),
            clock_rate,
            ..Default::default()
        },
        payload_type: 96,
        ..Default::default()
    }
}

pub fn simulcast_video_info(id: &str) -> TrackInfo {
    TrackInfo {
        id: TrackId::from(id),
        kind: TrackKind::Video,
        codec: codec("video/vp8", 90_000),
        header_extensions: vec![],
        layers: vec![
            VideoLayer {
                quality: VideoQuality::Low,
                rid: "q".to_string(),
                width: 320,
                height: 180,
                bitrate: 150_000,
            },
            VideoLayer {
                quality: VideoQuality::Medium,
                rid: "h".to_string(),
                width: 640,
                height: 360,
                bitrate: 500_000,
            },
            VideoLayer {
                quality: VideoQuality::High,
                rid: "f".to_string(),
                width: 1280,
                height: 720,
                bitrate: 1_700_000,
            },
        ],
        muted: false,
    }
}

pub fn svc_video_info(id: &str) -> TrackInfo {
    TrackInfo {
        id: TrackId::from(id),
        kind: TrackKind::Video,
        codec: codec("video/av1", 90_000),
        header_extensions: vec![],
        layers: vec![],
        muted: false,
    }
}

pub fn audio_info(id: &str, mime: &str) -> TrackInfo {
    TrackInfo {
        id: TrackId::from(id),
        kind: TrackKind::Audio,
        codec: codec(mime, 48_000),
        header_extensions: vec![],
        layers: vec![],
        muted: false,
    }
}
