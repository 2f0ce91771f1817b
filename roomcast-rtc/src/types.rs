//! Capability traits at the module boundary and the permission model.
//!
//! The registry and the reconciler see collaborators (media tracks, the
//! local participant, telemetry, resolvers) only through these traits;
//! the peer-connection stack implements them.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use roomcast_sfu::types::{
    ParticipantId, ParticipantIdentity, TrackId, TrackInfo, TrackKind, VideoLayer, VideoQuality,
};

use crate::error::{Result, RtcError};

/// Subscriber-requested rendering settings for one subscribed track.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateTrackSettings {
    pub disabled: bool,
    pub quality: Option<VideoQuality>,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

/// What one subscriber may receive from a publisher.
///
/// An empty identity with a filled SID is resolved at update time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackPermission {
    pub participant_identity: String,
    pub participant_sid: String,
    pub all_tracks: bool,
    pub track_sids: Vec<String>,
}

/// A publisher's full subscription permission update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionPermission {
    pub all_participants: bool,
    pub track_permissions: Vec<TrackPermission>,
}

/// Opaque handle to the RTP sender a subscribed track occupies on the
/// subscriber's peer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RtpSenderId(pub u64);

impl fmt::Display for RtpSenderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sender#{}", self.0)
    }
}

/// Observer registry for track-changed / track-removed signals.
pub trait ChangeNotifier: Send + Sync {
    fn add_observer(&self, key: &str, cb: Box<dyn Fn() + Send + Sync>);
    fn remove_observer(&self, key: &str);
}

/// A downtrack attachment as seen by the subscriber's session.
#[async_trait]
pub trait SubscribedTrack: Send + Sync {
    fn track_id(&self) -> TrackId;
    fn media_track(&self) -> Arc<dyn MediaTrack>;
    fn publisher_id(&self) -> ParticipantId;
    fn publisher_identity(&self) -> ParticipantIdentity;

    /// Replace the close observer; `None` detaches it.
    fn on_close(&self, cb: Option<Box<dyn Fn(bool) + Send + Sync>>);
    fn add_on_bind(&self, cb: Box<dyn Fn() + Send + Sync>);

    /// Whether attaching this track requires an SDP renegotiation.
    fn needs_negotiation(&self) -> bool;

    fn update_subscriber_settings(&self, settings: UpdateTrackSettings);

    fn rtp_sender(&self) -> Option<RtpSenderId>;

    async fn close_with_flush(&self, flush: bool);
}

/// A published media track as seen by the registry and the reconciler.
#[async_trait]
pub trait MediaTrack: Send + Sync {
    fn id(&self) -> TrackId;
    fn kind(&self) -> TrackKind;
    fn is_muted(&self) -> bool;
    fn set_muted(&self, muted: bool);
    fn to_proto(&self) -> TrackInfo;
    fn update_video_layers(&self, layers: Vec<VideoLayer>);

    /// Attach a subscriber. Returns the new subscribed track, or
    /// [`crate::error::RtcError::AlreadySubscribed`] when the participant
    /// is already attached (the caller treats that as success).
    async fn add_subscriber(
        &self,
        participant: Arc<dyn LocalParticipant>,
    ) -> Result<Arc<dyn SubscribedTrack>>;

    async fn remove_subscriber(&self, participant_id: &ParticipantId, will_be_resumed: bool);

    async fn clear_all_receivers(&self, will_be_resumed: bool);

    /// Drop every subscriber whose identity is not in `allowed`.
    async fn revoke_disallowed_subscribers(&self, allowed: &[ParticipantIdentity]);

    fn add_on_close(&self, cb: Box<dyn FnOnce() + Send>);

    async fn close(&self, will_be_resumed: bool);
}

/// The subscribing participant's session, as the reconciler needs it.
pub trait LocalParticipant: Send + Sync {
    fn id(&self) -> ParticipantId;
    fn identity(&self) -> ParticipantIdentity;
    fn can_subscribe(&self) -> bool;
    fn is_closed(&self) -> bool;
    fn is_disconnected(&self) -> bool;

    /// Kick off (or schedule) an SDP renegotiation.
    fn negotiate(&self, immediate: bool);

    fn remove_track_from_subscriber(&self, sender: RtpSenderId) -> Result<()>;

    /// Tell the client a publisher granted or revoked its permission.
    fn subscription_permission_update(
        &self,
        publisher_id: &ParticipantId,
        track_id: &TrackId,
        allowed: bool,
    );
}

/// Everything a resolver learns about a track for one subscriber.
pub struct TrackResolveResult {
    pub track: Option<Arc<dyn MediaTrack>>,
    pub publisher_id: ParticipantId,
    pub publisher_identity: ParticipantIdentity,
    pub has_permission: bool,
    pub changed_notifier: Option<Arc<dyn ChangeNotifier>>,
    pub removed_notifier: Option<Arc<dyn ChangeNotifier>>,
}

impl Default for TrackResolveResult {
    fn default() -> Self {
        Self {
            track: None,
            publisher_id: ParticipantId::default(),
            publisher_identity: ParticipantIdentity::default(),
            has_permission: true,
            changed_notifier: None,
            removed_notifier: None,
        }
    }
}

/// Looks a track up by (subscriber identity, track id).
pub type TrackResolver =
    Box<dyn Fn(&ParticipantIdentity, &TrackId) -> TrackResolveResult + Send + Sync>;

/// Subscription lifecycle events for the analytics pipeline.
pub trait Telemetry: Send + Sync {
    fn track_subscribe_requested(&self, participant_id: &ParticipantId, track_id: &TrackId);

    fn track_subscribed(
        &self,
        participant_id: &ParticipantId,
        track_info: &TrackInfo,
        publisher_id: &ParticipantId,
        publisher_identity: &ParticipantIdentity,
        counted: bool,
    );

    fn track_unsubscribed(
        &self,
        participant_id: &ParticipantId,
        track_id: &TrackId,
        kind: TrackKind,
        is_user_initiated: bool,
    );

    fn track_subscribe_failed(
        &self,
        participant_id: &ParticipantId,
        track_id: &TrackId,
        error: &RtcError,
        is_user_error: bool,
    );
}
