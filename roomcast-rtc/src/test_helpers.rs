//! Fakes and fixtures shared by registry and reconciler tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use roomcast_sfu::types::{
    ParticipantId, ParticipantIdentity, TrackId, TrackInfo, TrackKind, VideoLayer,
};

use crate::error::{Result, RtcError};
use crate::types::{
    ChangeNotifier, LocalParticipant, MediaTrack, RtpSenderId, SubscribedTrack, Telemetry,
    UpdateTrackSettings,
};

fn proto_track_info(id: &TrackId, kind: TrackKind) -> TrackInfo {
    TrackInfo {
        id: id.clone(),
        kind,
        codec: Default::default(),
        header_extensions: vec![],
        layers: vec![],
        muted: false,
    }
}

type OnCloseCallback = Box<dyn Fn(bool) + Send + Sync>;

/// Subscribed-track double; `fire_bind` / `fire_close` drive the callbacks
/// the way a live downtrack would.
pub struct FakeSubscribedTrack {
    pub media: Arc<FakeMediaTrack>,
    pub publisher_id: ParticipantId,
    pub publisher_identity: ParticipantIdentity,
    pub needs_negotiation: bool,
    pub rtp_sender: Option<RtpSenderId>,
    on_close: Mutex<Option<OnCloseCallback>>,
    on_bind: Mutex<Vec<Box<dyn Fn() + Send + Sync>>>,
    pub settings: Mutex<Vec<UpdateTrackSettings>>,
    pub flush_closes: Mutex<Vec<bool>>,
}

impl FakeSubscribedTrack {
    pub fn new(media: Arc<FakeMediaTrack>, publisher: &str) -> Arc<Self> {
        Arc::new(Self {
            media,
            publisher_id: ParticipantId::from(publisher),
            publisher_identity: ParticipantIdentity::from(publisher),
            needs_negotiation: false,
            rtp_sender: Some(RtpSenderId(7)),
            on_close: Mutex::new(None),
            on_bind: Mutex::new(Vec::new()),
            settings: Mutex::new(Vec::new()),
            flush_closes: Mutex::new(Vec::new()),
        })
    }

    pub fn fire_bind(&self) {
        for cb in self.on_bind.lock().iter() {
            cb();
        }
    }

    pub fn fire_close(&self, will_be_resumed: bool) {
        let cb = self.on_close.lock().take();
        if let Some(cb) = cb {
            cb(will_be_resumed);
        }
    }
}

#[async_trait]
impl SubscribedTrack for FakeSubscribedTrack {
    fn track_id(&self) -> TrackId {
        self.media.id()
    }

    fn media_track(&self) -> Arc<dyn MediaTrack> {
        self.media.clone()
    }

    fn publisher_id(&self) -> ParticipantId {
        self.publisher_id.clone()
    }

    fn publisher_identity(&self) -> ParticipantIdentity {
        self.publisher_identity.clone()
    }

    fn on_close(&self, cb: Option<OnCloseCallback>) {
        *self.on_close.lock() = cb;
    }

    fn add_on_bind(&self, cb: Box<dyn Fn() + Send + Sync>) {
        self.on_bind.lock().push(cb);
    }

    fn needs_negotiation(&self) -> bool {
        self.needs_negotiation
    }

    fn update_subscriber_settings(&self, settings: UpdateTrackSettings) {
        self.settings.lock().push(settings);
    }

    fn rtp_sender(&self) -> Option<RtpSenderId> {
        self.rtp_sender
    }

    async fn close_with_flush(&self, flush: bool) {
        self.flush_closes.lock().push(flush);
    }
}

/// Published-track double with scriptable `add_subscriber` behavior.
pub struct FakeMediaTrack {
    id: TrackId,
    kind: TrackKind,
    muted: AtomicBool,
    self_ref: Mutex<std::sync::Weak<FakeMediaTrack>>,
    /// When set, `add_subscriber` fails with this error
    pub subscribe_error: Mutex<Option<RtcError>>,
    pub subscribed: Mutex<Option<Arc<FakeSubscribedTrack>>>,
    pub removed_subscribers: Mutex<Vec<(ParticipantId, bool)>>,
    pub revocations: Mutex<Vec<Vec<ParticipantIdentity>>>,
    pub cleared_receivers: Mutex<Vec<bool>>,
    on_close: Mutex<Vec<Box<dyn FnOnce() + Send>>>,
    pub update_layer_calls: AtomicUsize,
}

impl FakeMediaTrack {
    pub fn new(id: &str, kind: TrackKind) -> Arc<Self> {
        let track = Arc::new(Self {
            id: TrackId::from(id),
            kind,
            muted: AtomicBool::new(false),
            self_ref: Mutex::new(std::sync::Weak::new()),
            subscribe_error: Mutex::new(None),
            subscribed: Mutex::new(None),
            removed_subscribers: Mutex::new(Vec::new()),
            revocations: Mutex::new(Vec::new()),
            cleared_receivers: Mutex::new(Vec::new()),
            on_close: Mutex::new(Vec::new()),
            update_layer_calls: AtomicUsize::new(0),
        });
        *track.self_ref.lock() = Arc::downgrade(&track);
        track
    }

    pub fn audio(id: &str) -> Arc<Self> {
        Self::new(id, TrackKind::Audio)
    }

    pub fn video(id: &str) -> Arc<Self> {
        Self::new(id, TrackKind::Video)
    }

    /// Run the close callbacks registered by the registry.
    pub fn trigger_close(&self) {
        let callbacks: Vec<_> = self.on_close.lock().drain(..).collect();
        for cb in callbacks {
            cb();
        }
    }

    pub fn revocation_count(&self) -> usize {
        self.revocations.lock().len()
    }
}

#[async_trait]
impl MediaTrack for FakeMediaTrack {
    fn id(&self) -> TrackId {
        self.id.clone()
    }

    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn is_muted(&self) -> bool {
        self.muted.load(Ordering::SeqCst)
    }

    fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::SeqCst);
    }

    fn to_proto(&self) -> TrackInfo {
        proto_track_info(&self.id, self.kind)
    }

    fn update_video_layers(&self, _layers: Vec<VideoLayer>) {
        self.update_layer_calls.fetch_add(1, Ordering::SeqCst);
    }

    async fn add_subscriber(
        &self,
        _participant: Arc<dyn LocalParticipant>,
    ) -> Result<Arc<dyn SubscribedTrack>> {
        if let Some(err) = self.subscribe_error.lock().clone() {
            return Err(err);
        }

        let mut subscribed = self.subscribed.lock();
        if subscribed.is_some() {
            return Err(RtcError::AlreadySubscribed);
        }

        let this = self.self_ref.lock().upgrade().expect("fake track alive");
        let sub_track = FakeSubscribedTrack::new(this, "publisher");
        *subscribed = Some(sub_track.clone());
        Ok(sub_track)
    }

    async fn remove_subscriber(&self, participant_id: &ParticipantId, will_be_resumed: bool) {
        self.removed_subscribers
            .lock()
            .push((participant_id.clone(), will_be_resumed));
        let sub_track = self.subscribed.lock().take();
        if let Some(sub_track) = sub_track {
            sub_track.fire_close(will_be_resumed);
        }
    }

    async fn clear_all_receivers(&self, will_be_resumed: bool) {
        self.cleared_receivers.lock().push(will_be_resumed);
    }

    async fn revoke_disallowed_subscribers(&self, allowed: &[ParticipantIdentity]) {
        self.revocations.lock().push(allowed.to_vec());
    }

    fn add_on_close(&self, cb: Box<dyn FnOnce() + Send>) {
        self.on_close.lock().push(cb);
    }

    async fn close(&self, will_be_resumed: bool) {
        self.cleared_receivers.lock().push(will_be_resumed);
        self.trigger_close();
    }
}

/// Local-participant double recording permission updates and negotiations.
pub struct FakeParticipant {
    pub sid: ParticipantId,
    pub participant_identity: ParticipantIdentity,
    pub subscribe_allowed: AtomicBool,
    pub closed: AtomicBool,
    pub disconnected: AtomicBool,
    pub negotiations: AtomicUsize,
    pub permission_updates: Mutex<Vec<(ParticipantId, TrackId, bool)>>,
    pub removed_senders: Mutex<Vec<RtpSenderId>>,
}

impl FakeParticipant {
    pub fn new(identity: &str) -> Arc<Self> {
        Arc::new(Self {
            sid: ParticipantId::from(identity),
            participant_identity: ParticipantIdentity::from(identity),
            subscribe_allowed: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            disconnected: AtomicBool::new(false),
            negotiations: AtomicUsize::new(0),
            permission_updates: Mutex::new(Vec::new()),
            removed_senders: Mutex::new(Vec::new()),
        })
    }
}

impl LocalParticipant for FakeParticipant {
    fn id(&self) -> ParticipantId {
        self.sid.clone()
    }

    fn identity(&self) -> ParticipantIdentity {
        self.participant_identity.clone()
    }

    fn can_subscribe(&self) -> bool {
        self.subscribe_allowed.load(Ordering::SeqCst)
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }

    fn negotiate(&self, _immediate: bool) {
        self.negotiations.fetch_add(1, Ordering::SeqCst);
    }

    fn remove_track_from_subscriber(&self, sender: RtpSenderId) -> Result<()> {
        self.removed_senders.lock().push(sender);
        Ok(())
    }

    fn subscription_permission_update(
        &self,
        publisher_id: &ParticipantId,
        track_id: &TrackId,
        allowed: bool,
    ) {
        self.permission_updates
            .lock()
            .push((publisher_id.clone(), track_id.clone(), allowed));
    }
}

/// Telemetry double counting events per kind.
#[derive(Default)]
pub struct FakeTelemetry {
    pub requested: Mutex<Vec<TrackId>>,
    pub subscribed: Mutex<Vec<(TrackId, bool)>>,
    pub unsubscribed: Mutex<Vec<(TrackId, bool)>>,
    pub failed: Mutex<Vec<(TrackId, RtcError, bool)>>,
}

impl FakeTelemetry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl Telemetry for FakeTelemetry {
    fn track_subscribe_requested(&self, _participant_id: &ParticipantId, track_id: &TrackId) {
        self.requested.lock().push(track_id.clone());
    }

    fn track_subscribed(
        &self,
        _participant_id: &ParticipantId,
        track_info: &TrackInfo,
        _publisher_id: &ParticipantId,
        _publisher_identity: &ParticipantIdentity,
        counted: bool,
    ) {
        self.subscribed.lock().push((track_info.id.clone(), counted));
    }

    fn track_unsubscribed(
        &self,
        _participant_id: &ParticipantId,
        track_id: &TrackId,
        _kind: TrackKind,
        is_user_initiated: bool,
    ) {
        self.unsubscribed
            .lock()
            .push((track_id.clone(), is_user_initiated));
    }

    fn track_subscribe_failed(
        &self,
        _participant_id: &ParticipantId,
        track_id: &TrackId,
        error: &RtcError,
        is_user_error: bool,
    ) {
        self.failed
            .lock()
            .push((track_id.clone(), error.clone(), is_user_error));
    }
}

/// Change-notifier double; `notify_all` simulates the source firing.
#[derive(Default)]
pub struct FakeChangeNotifier {
    observers: Mutex<HashMap<String, Box<dyn Fn() + Send + Sync>>>,
}

impl FakeChangeNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn notify_all(&self) {
        for cb in self.observers.lock().values() {
            cb();
        }
    }

    pub fn observer_count(&self) -> usize {
        self.observers.lock().len()
    }
}

impl ChangeNotifier for FakeChangeNotifier {
    fn add_observer(&self, key: &str, cb: Box<dyn Fn() + Send + Sync>) {
        self.observers.lock().insert(key.to_string(), cb);
    }

    fn remove_observer(&self, key: &str) {
        self.observers.lock().remove(key);
    }
}
