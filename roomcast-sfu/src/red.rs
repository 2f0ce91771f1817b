//! RED sidecar receivers.
//!
//! A RED-carrying track needs a primary-codec view for subscribers that did
//! not negotiate RED, and a primary-codec track needs a RED view for
//! subscribers that did. Either way the sidecar is a thin receiver with its
//! own downtrack set, fed by the parent's forwarding loop through the
//! installed forward hook. Payload re-encoding itself is the RED
//! packetizer's job downstream of this hook.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecParameters;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpHeaderExtensionParameters;

use crate::error::{ReceiverError, Result};
use crate::packet::{ExtPacket, RtcpSenderReportDataExt};
use crate::receiver::{Receiver, TrackReceiver};
use crate::spreader::{DownTrackSpreader, TrackSender};
use crate::types::{Bitrates, ParticipantId, TrackId, TrackInfo, TrackKind};

const MIME_TYPE_OPUS: &str = "audio/opus";

/// Which direction the sidecar adapts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedRole {
    /// Parent carries RED; this sidecar serves the primary encoding
    PrimaryFromRed,
    /// Parent carries the primary codec; this sidecar serves RED
    RedFromPrimary,
}

/// Companion receiver sharing the parent's packet stream.
pub struct RedSidecarReceiver {
    parent: Weak<Receiver>,
    role: RedRole,
    spreader: DownTrackSpreader,
    closed: AtomicBool,
}

impl RedSidecarReceiver {
    pub(crate) fn new(parent: Weak<Receiver>, role: RedRole, threshold: usize) -> Arc<Self> {
        Arc::new(Self {
            parent,
            role,
            spreader: DownTrackSpreader::new(threshold),
            closed: AtomicBool::new(false),
        })
    }

    #[must_use]
    pub fn role(&self) -> RedRole {
        self.role
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Forward hook invoked by the parent's loop once per packet, after the
    /// parent's own broadcast.
    pub(crate) fn forward_rtp(&self, pkt: &ExtPacket, spatial_layer: i32) {
        if self.is_closed() {
            return;
        }

        for dt in self.spreader.down_tracks() {
            dt.write_rtp(pkt, spatial_layer);
        }
    }

    pub(crate) async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        for dt in self.spreader.reset_and_get_down_tracks() {
            dt.close().await;
        }
    }

    fn parent(&self) -> Result<Arc<Receiver>> {
        self.parent.upgrade().ok_or(ReceiverError::ReceiverClosed)
    }
}

impl TrackReceiver for RedSidecarReceiver {
    fn track_id(&self) -> TrackId {
        self.parent().map(|p| p.track_id()).unwrap_or_default()
    }

    fn stream_id(&self) -> String {
        self.parent().map(|p| p.stream_id()).unwrap_or_default()
    }

    fn codec(&self) -> RTCRtpCodecParameters {
        let mut codec = self
            .parent()
            .map(|p| p.codec())
            .unwrap_or_default();
        if self.role == RedRole::PrimaryFromRed {
            codec.capability.mime_type = MIME_TYPE_OPUS.to_string();
        }
        codec
    }

    fn header_extensions(&self) -> Vec<RTCRtpHeaderExtensionParameters> {
        self.parent()
            .map(|p| p.header_extensions())
            .unwrap_or_default()
    }

    fn kind(&self) -> TrackKind {
        self.parent().map(|p| p.kind()).unwrap_or(TrackKind::Audio)
    }

    fn track_info(&self) -> TrackInfo {
        match self.parent() {
            Ok(parent) => parent.track_info(),
            Err(_) => TrackInfo {
                id: TrackId::default(),
                kind: TrackKind::Audio,
                codec: RTCRtpCodecParameters::default(),
                header_extensions: Vec::new(),
                layers: Vec::new(),
                muted: false,
            },
        }
    }

    fn read_rtp(&self, layer: i32, sn: u16) -> Result<Bytes> {
        self.parent()?.read_rtp(layer, sn)
    }

    fn get_layered_bitrate(&self) -> Bitrates {
        self.parent()
            .map(|p| p.get_layered_bitrate())
            .unwrap_or_default()
    }

    fn get_audio_level(&self) -> Option<(f64, bool)> {
        self.parent().ok()?.get_audio_level()
    }

    fn send_pli(&self, layer: i32, force: bool) {
        if let Ok(parent) = self.parent() {
            parent.send_pli(layer, force);
        }
    }

    fn set_up_track_paused(&self, paused: bool) {
        if let Ok(parent) = self.parent() {
            parent.set_up_track_paused(paused);
        }
    }

    fn set_max_expected_spatial_layer(&self, layer: i32) {
        if let Ok(parent) = self.parent() {
            parent.set_max_expected_spatial_layer(layer);
        }
    }

    fn add_down_track(&self, down_track: Arc<dyn TrackSender>) -> Result<()> {
        if self.is_closed() {
            return Err(ReceiverError::ReceiverClosed);
        }

        down_track.track_info_available();
        self.spreader.store(down_track);
        Ok(())
    }

    fn delete_down_track(&self, subscriber_id: &ParticipantId) {
        if self.is_closed() {
            return;
        }
        self.spreader.free(subscriber_id);
    }

    fn get_layer_dimension(&self, layer: i32) -> (u32, u32) {
        self.parent()
            .map(|p| p.get_layer_dimension(layer))
            .unwrap_or((0, 0))
    }

    fn get_temporal_layer_fps_for_spatial(&self, layer: i32) -> Vec<f32> {
        self.parent()
            .map(|p| p.get_temporal_layer_fps_for_spatial(layer))
            .unwrap_or_default()
    }

    fn get_rtcp_sender_report_data_ext(&self, layer: i32) -> Option<RtcpSenderReportDataExt> {
        self.parent().ok()?.get_rtcp_sender_report_data_ext(layer)
    }

    fn get_reference_layer_rtp_timestamp(
        &self,
        ts: u32,
        layer: i32,
        reference_layer: i32,
    ) -> Result<u32> {
        self.parent()?
            .get_reference_layer_rtp_timestamp(ts, layer, reference_layer)
    }
}

impl std::fmt::Debug for RedSidecarReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedSidecarReceiver")
            .field("role", &self.role)
            .field("closed", &self.is_closed())
            .field("down_tracks", &self.spreader.len())
            .finish()
    }
}
