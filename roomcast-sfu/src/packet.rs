//! Extended packet envelope and RTCP sender-report data.

use std::time::Instant;

use bytes::Bytes;
use webrtc::rtp::header::Header;

/// A reassembled RTP packet with the layer tags the pipeline routes on.
///
/// `spatial`/`temporal` are parsed from the codec payload for SVC streams
/// and are −1 when absent (plain simulcast or audio).
#[derive(Debug, Clone)]
pub struct ExtPacket {
    /// Full packet as received, header included
    pub raw: Bytes,
    pub header: Header,
    pub payload: Bytes,
    pub spatial: i32,
    pub temporal: i32,
    pub arrival: Instant,
}

impl ExtPacket {
    #[must_use]
    pub fn marker(&self) -> bool {
        self.header.marker
    }

    #[must_use]
    pub fn timestamp(&self) -> u32 {
        self.header.timestamp
    }

    #[must_use]
    pub fn sequence_number(&self) -> u16 {
        self.header.sequence_number
    }
}

/// Data carried in the most recent RTCP sender report for a layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtcpSenderReportData {
    /// 64-bit NTP timestamp, 0 if never received
    pub ntp_timestamp: u64,
    /// RTP timestamp corresponding to the NTP timestamp
    pub rtp_timestamp: u32,
    pub packet_count: u32,
    pub octet_count: u32,
}

/// Sender-report data extended with local receive context.
#[derive(Debug, Clone, Copy)]
pub struct RtcpSenderReportDataExt {
    pub sender_report_data: RtcpSenderReportData,
    /// When the report was received locally
    pub arrival: Instant,
}
