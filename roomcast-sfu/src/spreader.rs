//! Concurrent-safe set of downtrack handles with snapshot broadcast.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::task::JoinSet;
use tracing::warn;

use crate::packet::{ExtPacket, RtcpSenderReportData};
use crate::types::ParticipantId;

/// Outbound track handle owned by a subscriber's session.
///
/// The receiver pipeline only ever holds these through the spreader; a
/// downtrack may outlive its spreader entry but not the other way around.
#[async_trait]
pub trait TrackSender: Send + Sync {
    fn subscriber_id(&self) -> ParticipantId;

    /// Enqueue one packet for delivery. Must not block.
    fn write_rtp(&self, pkt: &ExtPacket, spatial_layer: i32);

    fn up_track_layers_change(&self, available: &[i32], exempted: &[i32]);
    fn up_track_bitrate_availability_change(&self);

    /// The publisher's track metadata became available to forward.
    fn track_info_available(&self);

    fn handle_rtcp_sender_report_data(
        &self,
        payload_type: u8,
        layer: i32,
        sr_data: &RtcpSenderReportData,
    );

    async fn close(&self);
    async fn close_with_flush(&self, flush: bool);
}

/// Broadcast threshold bounds; 0 keeps broadcasts sequential.
const MIN_THRESHOLD: usize = 3;
const MAX_THRESHOLD: usize = 150;

/// Holds the downtracks subscribed to one receiver and applies callbacks
/// to all of them, optionally in parallel once membership exceeds the
/// configured threshold.
pub struct DownTrackSpreader {
    threshold: usize,
    down_tracks: RwLock<HashMap<ParticipantId, Arc<dyn TrackSender>>>,
}

impl DownTrackSpreader {
    #[must_use]
    pub fn new(threshold: usize) -> Self {
        let threshold = if threshold == 0 {
            0
        } else {
            let clamped = threshold.clamp(MIN_THRESHOLD, MAX_THRESHOLD);
            if clamped != threshold {
                warn!(threshold, clamped, "load balance threshold out of range");
            }
            clamped
        };

        Self {
            threshold,
            down_tracks: RwLock::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.down_tracks.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.down_tracks.read().is_empty()
    }

    #[must_use]
    pub fn has_down_track(&self, subscriber_id: &ParticipantId) -> bool {
        self.down_tracks.read().contains_key(subscriber_id)
    }

    /// Insert a downtrack, replacing any previous entry for the subscriber.
    pub fn store(&self, down_track: Arc<dyn TrackSender>) {
        let subscriber_id = down_track.subscriber_id();
        let replaced = self
            .down_tracks
            .write()
            .insert(subscriber_id.clone(), down_track);
        if replaced.is_some() {
            warn!(subscriber_id = %subscriber_id, "subscriber already exists, replacing downtrack");
        }
    }

    pub fn free(&self, subscriber_id: &ParticipantId) {
        self.down_tracks.write().remove(subscriber_id);
    }

    /// Atomically clear the set and return what it held.
    #[must_use]
    pub fn reset_and_get_down_tracks(&self) -> Vec<Arc<dyn TrackSender>> {
        let mut down_tracks = self.down_tracks.write();
        down_tracks.drain().map(|(_, dt)| dt).collect()
    }

    /// Snapshot of the current membership.
    #[must_use]
    pub fn down_tracks(&self) -> Vec<Arc<dyn TrackSender>> {
        self.down_tracks.read().values().cloned().collect()
    }

    /// Apply `f` to every member of a snapshot taken at entry.
    ///
    /// Sequential at or below the threshold; above it, the snapshot is
    /// partitioned across spawned tasks which all complete before return.
    /// Ordering across subscribers is unspecified.
    pub async fn broadcast<F>(&self, f: F)
    where
        F: Fn(&Arc<dyn TrackSender>) + Clone + Send + Sync + 'static,
    {
        let snapshot = self.down_tracks();
        if self.threshold == 0 || snapshot.len() <= self.threshold {
            for dt in &snapshot {
                f(dt);
            }
            return;
        }

        let mut workers = JoinSet::new();
        for chunk in snapshot.chunks(self.threshold) {
            let chunk: Vec<Arc<dyn TrackSender>> = chunk.to_vec();
            let f = f.clone();
            workers.spawn(async move {
                for dt in &chunk {
                    f(dt);
                }
            });
        }
        while workers.join_next().await.is_some() {}
    }
}
