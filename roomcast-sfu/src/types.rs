//! Common identifiers and layer types used throughout the SFU pipeline.

use std::fmt;

use serde::{Deserialize, Serialize};
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecParameters, RTPCodecType};
use webrtc::rtp_transceiver::rtp_codec::RTCRtpHeaderExtensionParameters;

/// Highest simulcast/SVC spatial layer index.
pub const MAX_SPATIAL_LAYER: i32 = 2;

/// Highest temporal layer index.
pub const MAX_TEMPORAL_LAYER: i32 = 3;

/// Sentinel for "no spatial layer".
pub const INVALID_LAYER_SPATIAL: i32 = -1;

/// Bits-per-second per `[spatial][temporal]` layer.
pub type Bitrates = [[i64; MAX_TEMPORAL_LAYER as usize + 1]; MAX_SPATIAL_LAYER as usize + 1];

/// Unique identifier for a published track
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrackId(String);

impl TrackId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for TrackId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for TrackId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Unique identifier for a participant (server-issued SID)
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParticipantId(String);

impl ParticipantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ParticipantId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ParticipantId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// User-facing participant identity, stable across reconnects
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParticipantIdentity(String);

impl ParticipantIdentity {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ParticipantIdentity {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ParticipantIdentity {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Media track kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

impl From<RTPCodecType> for TrackKind {
    fn from(codec_type: RTPCodecType) -> Self {
        match codec_type {
            RTPCodecType::Audio => Self::Audio,
            _ => Self::Video,
        }
    }
}

/// Simulcast quality rung for a declared video layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoQuality {
    Low,
    Medium,
    High,
}

impl VideoQuality {
    /// Spatial layer index this quality maps to.
    #[must_use]
    pub const fn spatial_layer(&self) -> i32 {
        match self {
            Self::Low => 0,
            Self::Medium => 1,
            Self::High => 2,
        }
    }
}

/// A video layer declared by the publisher at negotiation time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoLayer {
    pub quality: VideoQuality,
    /// Simulcast restriction identifier carried in RTP, empty for SVC
    pub rid: String,
    pub width: u32,
    pub height: u32,
    /// Declared target bitrate in bps, 0 if unknown
    pub bitrate: u32,
}

/// Read-mostly snapshot of a published track's negotiated parameters
#[derive(Debug, Clone)]
pub struct TrackInfo {
    pub id: TrackId,
    pub kind: TrackKind,
    pub codec: RTCRtpCodecParameters,
    pub header_extensions: Vec<RTCRtpHeaderExtensionParameters>,
    pub layers: Vec<VideoLayer>,
    pub muted: bool,
}

impl TrackInfo {
    /// SVC codecs carry all spatial layers in a single stream.
    #[must_use]
    pub fn is_svc(&self) -> bool {
        is_svc_mime(&self.codec.capability.mime_type)
    }

    #[must_use]
    pub fn is_red(&self) -> bool {
        is_red_mime(&self.codec.capability.mime_type)
    }

    /// Map a simulcast RID to its declared spatial layer.
    ///
    /// An empty RID means the track is not simulcast and always lands on
    /// layer 0. An unknown RID also falls back to 0.
    #[must_use]
    pub fn rid_to_spatial_layer(&self, rid: &str) -> i32 {
        if rid.is_empty() {
            return 0;
        }

        match self.layers.iter().find(|l| l.rid == rid) {
            Some(layer) => layer.quality.spatial_layer(),
            None => {
                tracing::warn!(track_id = %self.id, rid, "unknown rid, defaulting to layer 0");
                0
            }
        }
    }

    /// Declared dimensions for a spatial layer, (0, 0) if not declared.
    #[must_use]
    pub fn layer_dimension(&self, layer: i32) -> (u32, u32) {
        self.layers
            .iter()
            .find(|l| l.quality.spatial_layer() == layer)
            .map_or((0, 0), |l| (l.width, l.height))
    }
}

#[must_use]
pub fn is_svc_mime(mime: &str) -> bool {
    matches!(mime.to_lowercase().as_str(), "video/av1" | "video/vp9")
}

#[must_use]
pub fn is_red_mime(mime: &str) -> bool {
    mime.to_lowercase().ends_with("red")
}
