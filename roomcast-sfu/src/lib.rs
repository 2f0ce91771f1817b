//! Publisher-side media pipeline for the roomcast SFU.
//!
//! A publisher's RTP arrives here tagged per spatial layer. Each layer feeds
//! a reorder [`buffer::Buffer`], a per-layer forwarding loop pulls extended
//! packets out, informs the [`stream_tracker::StreamTrackerManager`] about
//! liveness and bitrate, and hands every packet to the
//! [`spreader::DownTrackSpreader`] which fans it out to all subscribed
//! downtracks.
//!
//! - **[`Receiver`]**: owns the per-layer up-tracks, buffers and the spreader
//! - **[`buffer::Buffer`]**: jitter/reorder buffer for one spatial layer
//! - **[`stream_tracker::StreamTrackerManager`]**: layer availability + bitrates
//! - **[`spreader::DownTrackSpreader`]**: concurrent downtrack set with
//!   optional parallel broadcast

pub mod buffer;
pub mod config;
pub mod error;
pub mod packet;
pub mod receiver;
pub mod red;
pub mod spreader;
pub mod stream_tracker;
pub mod types;

#[cfg(test)]
mod test_helpers;

pub use config::{AudioConfig, PliThrottleConfig, StreamTrackerConfig};
pub use error::{ReceiverError, Result};
pub use packet::{ExtPacket, RtcpSenderReportData, RtcpSenderReportDataExt};
pub use receiver::{Receiver, ReceiverBuilder, TrackReceiver, TrackSender, UpTrack};
pub use spreader::DownTrackSpreader;
pub use types::{
    Bitrates, ParticipantId, ParticipantIdentity, TrackId, TrackInfo, TrackKind, VideoLayer,
    VideoQuality, INVALID_LAYER_SPATIAL, MAX_SPATIAL_LAYER, MAX_TEMPORAL_LAYER,
};
