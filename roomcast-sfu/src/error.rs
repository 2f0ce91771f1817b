use thiserror::Error;

use crate::types::TrackId;

#[derive(Error, Debug)]
pub enum ReceiverError {
    #[error("receiver closed")]
    ReceiverClosed,

    #[error("buffer not found for layer {layer}")]
    BufferNotFound { layer: i32 },

    #[error("packet {sn} not in buffer")]
    PacketNotFound { sn: u16 },

    #[error("end of stream")]
    Eof,

    #[error("rtcp sender report not available for layer {layer}")]
    SenderReportNotAvailable { layer: i32 },

    #[error("invalid layer {layer} on track {track_id}")]
    InvalidLayer { track_id: TrackId, layer: i32 },

    #[error("malformed rtp packet: {0}")]
    MalformedPacket(#[from] webrtc::util::Error),
}

pub type Result<T> = std::result::Result<T, ReceiverError>;
