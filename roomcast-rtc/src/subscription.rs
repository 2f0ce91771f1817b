//! Per-subscriber subscription reconciliation.
//!
//! Desired state is flipped synchronously by the public API; a single
//! reconciler task drives actual state toward it, retrying failures on a
//! periodic tick and reacting immediately to targets queued on a bounded
//! mailbox. Overflowing the mailbox is fine, the next tick sweeps
//! everything.
//!
//! Error policy: resolver and permission failures are retried forever;
//! only `TrackNotFound` ever auto-unsubscribes, and only after
//! `not_found_timeout`. Everything else escalates through
//! `on_subscription_error` after `subscription_timeout` while the record
//! keeps retrying.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use roomcast_sfu::types::{ParticipantId, ParticipantIdentity, TrackId};

use crate::error::{Result, RtcError};
use crate::types::{
    ChangeNotifier, LocalParticipant, SubscribedTrack, Telemetry, TrackResolver,
    UpdateTrackSettings,
};

pub const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_secs(3);
/// Longer than the ICE failure timeout so a vanished publisher is
/// certainly not coming back before we give up on its track.
pub const DEFAULT_NOT_FOUND_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_SUBSCRIPTION_TIMEOUT: Duration = Duration::from_secs(15);

const RECONCILE_QUEUE_CAPACITY: usize = 50;
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

pub struct SubscriptionManagerParams {
    pub participant: Arc<dyn LocalParticipant>,
    pub track_resolver: TrackResolver,
    pub on_track_subscribed: Box<dyn Fn(Arc<dyn SubscribedTrack>) + Send + Sync>,
    pub on_track_unsubscribed: Box<dyn Fn(Arc<dyn SubscribedTrack>) + Send + Sync>,
    pub on_subscription_error: Box<dyn Fn(TrackId) + Send + Sync>,
    pub telemetry: Arc<dyn Telemetry>,
    pub reconcile_interval: Duration,
    pub subscription_timeout: Duration,
    pub not_found_timeout: Duration,
}

type SubscribeStatusCallback = Arc<dyn Fn(ParticipantId, bool) + Send + Sync>;

/// Manages one participant's subscriptions.
pub struct SubscriptionManager {
    params: SubscriptionManagerParams,
    subscriptions: DashMap<TrackId, Arc<TrackSubscription>>,
    subscribed_to: Mutex<HashMap<ParticipantId, HashSet<TrackId>>>,
    on_subscribe_status_changed: Mutex<Option<SubscribeStatusCallback>>,
    reconcile_tx: mpsc::Sender<TrackId>,
    close_tx: watch::Sender<bool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SubscriptionManager {
    pub fn new(params: SubscriptionManagerParams) -> Arc<Self> {
        let (reconcile_tx, reconcile_rx) = mpsc::channel(RECONCILE_QUEUE_CAPACITY);
        let (close_tx, close_rx) = watch::channel(false);

        let manager = Arc::new(Self {
            params,
            subscriptions: DashMap::new(),
            subscribed_to: Mutex::new(HashMap::new()),
            on_subscribe_status_changed: Mutex::new(None),
            reconcile_tx,
            close_tx,
            worker: Mutex::new(None),
        });

        let worker = tokio::spawn(Self::reconcile_worker(
            manager.clone(),
            reconcile_rx,
            close_rx,
        ));
        *manager.worker.lock() = Some(worker);
        manager
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        *self.close_tx.borrow()
    }

    /// Stop the reconciler, then close every subscribed downtrack; flushed
    /// unless the session will be resumed.
    pub async fn close(&self, will_be_resumed: bool) {
        if self.is_closed() {
            return;
        }
        let _ = self.close_tx.send(true);

        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            let _ = worker.await;
        }

        for sub_track in self.get_subscribed_tracks() {
            sub_track.close_with_flush(!will_be_resumed).await;
        }
    }

    pub fn subscribe_to_track(&self, track_id: TrackId) {
        let sub = self.subscription_for(&track_id);
        if sub.set_desired(true) {
            info!(track_id = %track_id, "subscribing to track");
        }

        // always reconcile, the track may have just become ready
        self.queue_reconcile(track_id);
    }

    pub fn unsubscribe_from_track(&self, track_id: &TrackId) {
        let Some(sub) = self.get_subscription(track_id) else {
            return;
        };

        if sub.set_desired(false) {
            info!(track_id = %track_id, "unsubscribing from track");
            self.queue_reconcile(track_id.clone());
        }
    }

    pub fn update_subscribed_track_settings(
        &self,
        track_id: TrackId,
        settings: UpdateTrackSettings,
    ) {
        let sub = self.subscription_for(&track_id);
        sub.set_settings(settings);
    }

    #[must_use]
    pub fn get_subscribed_tracks(&self) -> Vec<Arc<dyn SubscribedTrack>> {
        self.subscriptions
            .iter()
            .filter_map(|entry| entry.value().subscribed_track())
            .collect()
    }

    #[must_use]
    pub fn has_subscriptions(&self) -> bool {
        self.subscriptions.iter().any(|entry| entry.value().is_desired())
    }

    #[must_use]
    pub fn get_subscribed_participants(&self) -> Vec<ParticipantId> {
        self.subscribed_to.lock().keys().cloned().collect()
    }

    #[must_use]
    pub fn is_subscribed_to(&self, participant_id: &ParticipantId) -> bool {
        self.subscribed_to.lock().contains_key(participant_id)
    }

    /// Fires once per publisher on first-subscribed and once on
    /// last-unsubscribed, however many of its tracks are involved.
    pub fn on_subscribe_status_changed(&self, cb: SubscribeStatusCallback) {
        *self.on_subscribe_status_changed.lock() = Some(cb);
    }

    /// Poll until no subscription still needs a subscribe attempt.
    pub async fn wait_until_subscribed(&self, timeout: Duration) -> Result<()> {
        let expires_at = Instant::now() + timeout;
        while Instant::now() < expires_at {
            let all_subscribed = !self
                .subscriptions
                .iter()
                .any(|entry| entry.value().needs_subscribe());
            if all_subscribed {
                return Ok(());
            }
            tokio::time::sleep(WAIT_POLL_INTERVAL).await;
        }

        Err(RtcError::DeadlineExceeded)
    }

    fn subscription_for(&self, track_id: &TrackId) -> Arc<TrackSubscription> {
        self.subscriptions
            .entry(track_id.clone())
            .or_insert_with(|| {
                Arc::new(TrackSubscription::new(
                    self.params.participant.id(),
                    track_id.clone(),
                ))
            })
            .clone()
    }

    fn get_subscription(&self, track_id: &TrackId) -> Option<Arc<TrackSubscription>> {
        self.subscriptions.get(track_id).map(|entry| entry.value().clone())
    }

    /// Trigger an immediate reconcile. A full queue is silently dropped,
    /// the periodic tick picks up stragglers.
    fn queue_reconcile(&self, track_id: TrackId) {
        let _ = self.reconcile_tx.try_send(track_id);
    }

    fn can_reconcile(&self) -> bool {
        let participant = &self.params.participant;
        !(self.is_closed() || participant.is_closed() || participant.is_disconnected())
    }

    async fn reconcile_worker(
        self: Arc<Self>,
        mut reconcile_rx: mpsc::Receiver<TrackId>,
        mut close_rx: watch::Receiver<bool>,
    ) {
        let interval = self.params.reconcile_interval;
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);

        loop {
            tokio::select! {
                _ = close_rx.changed() => return,
                _ = ticker.tick() => self.reconcile_all().await,
                Some(track_id) = reconcile_rx.recv() => {
                    match self.get_subscription(&track_id) {
                        Some(sub) => self.reconcile_subscription(&sub).await,
                        None => self.reconcile_all().await,
                    }
                }
            }
        }
    }

    async fn reconcile_all(self: &Arc<Self>) {
        let targets: Vec<Arc<TrackSubscription>> = self
            .subscriptions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        for sub in targets {
            self.reconcile_subscription(&sub).await;
        }
    }

    async fn reconcile_subscription(self: &Arc<Self>, sub: &Arc<TrackSubscription>) {
        if !self.can_reconcile() {
            return;
        }

        if sub.needs_subscribe() {
            if sub.attempt_count() == 0 {
                self.params
                    .telemetry
                    .track_subscribe_requested(&self.params.participant.id(), &sub.track_id);
            }

            match self.subscribe(sub).await {
                Ok(()) => sub.record_attempt(true),
                Err(err) => {
                    sub.record_attempt(false);
                    self.handle_subscribe_error(sub, &err);
                }
            }
            return;
        }

        if sub.needs_unsubscribe() {
            self.unsubscribe(sub).await;
            if !sub.is_desired() {
                self.subscriptions.remove(&sub.track_id);
            }
            return;
        }

        if sub.needs_bind() {
            // binding may still arrive; report, but do not flip desired
            if sub.duration_since_start() > self.params.subscription_timeout {
                error!(track_id = %sub.track_id, "track not bound after timeout");
                sub.maybe_record_error(
                    self.params.telemetry.as_ref(),
                    &self.params.participant.id(),
                    &RtcError::TrackNotBound,
                    false,
                );
                (self.params.on_subscription_error)(sub.track_id.clone());
            }
            return;
        }

        // fully idle with nothing to restore later: drop the record
        if sub.is_idle() && !sub.has_settings() {
            self.subscriptions.remove(&sub.track_id);
        }
    }

    fn handle_subscribe_error(self: &Arc<Self>, sub: &Arc<TrackSubscription>, err: &RtcError) {
        let participant_id = self.params.participant.id();

        if err.is_persistent_retriable() {
            // outside of our control and may change any moment; keep
            // trying, but reflect the stall in telemetry once it has been
            // too long
            if sub.duration_since_start() > self.params.subscription_timeout {
                sub.maybe_record_error(self.params.telemetry.as_ref(), &participant_id, err, true);
            }
            return;
        }

        if *err == RtcError::TrackNotFound {
            // source track was never published or has closed; this is the
            // only case that changes desired state
            if sub.duration_since_start() > self.params.not_found_timeout {
                sub.maybe_record_error(self.params.telemetry.as_ref(), &participant_id, err, true);
                info!(track_id = %sub.track_id, "unsubscribing track since track isn't available");
                sub.set_desired(false);
                self.queue_reconcile(sub.track_id.clone());
            }
            return;
        }

        if sub.duration_since_start() > self.params.subscription_timeout {
            error!(
                track_id = %sub.track_id,
                error = %err,
                attempt = sub.attempt_count(),
                "failed to subscribe, triggering error handler"
            );
            sub.maybe_record_error(self.params.telemetry.as_ref(), &participant_id, err, false);
            (self.params.on_subscription_error)(sub.track_id.clone());
        } else {
            debug!(
                track_id = %sub.track_id,
                error = %err,
                attempt = sub.attempt_count(),
                "failed to subscribe, retrying"
            );
        }
    }

    async fn subscribe(self: &Arc<Self>, sub: &Arc<TrackSubscription>) -> Result<()> {
        debug!(track_id = %sub.track_id, "executing subscribe");

        if !self.params.participant.can_subscribe() {
            return Err(RtcError::NoSubscribePermission);
        }

        let res =
            (self.params.track_resolver)(&self.params.participant.identity(), &sub.track_id);

        // observers are installed before checking for the track, so its
        // later appearance queues a reconcile
        if let Some(notifier) = res.changed_notifier.clone() {
            if sub.set_changed_notifier(Some(notifier.clone())) {
                let manager = Arc::downgrade(self);
                let track_id = sub.track_id.clone();
                notifier.add_observer(
                    self.params.participant.id().as_str(),
                    Box::new(move || {
                        if let Some(manager) = manager.upgrade() {
                            manager.queue_reconcile(track_id.clone());
                        }
                    }),
                );
            }
        }
        if let Some(notifier) = res.removed_notifier.clone() {
            if sub.set_removed_notifier(Some(notifier.clone())) {
                let sub_ref = Arc::downgrade(sub);
                notifier.add_observer(
                    self.params.participant.id().as_str(),
                    Box::new(move || {
                        if let Some(sub) = sub_ref.upgrade() {
                            debug!(track_id = %sub.track_id, "unsubscribing since source track was removed");
                            sub.set_desired(false);
                        }
                    }),
                );
            }
        }

        let Some(track) = res.track else {
            return Err(RtcError::TrackNotFound);
        };

        // has_permission defaults to true, so the first denial is the
        // transition that tells the client
        if sub.set_has_permission(res.has_permission) {
            self.params.participant.subscription_permission_update(
                &sub.publisher_id(),
                &sub.track_id,
                res.has_permission,
            );
        }
        if !res.has_permission {
            return Err(RtcError::NoTrackPermission);
        }

        sub.set_publisher(res.publisher_identity.clone(), res.publisher_id.clone());

        let sub_track = match track.add_subscriber(self.params.participant.clone()).await {
            Ok(sub_track) => Some(sub_track),
            // already attached is success; the existing attachment stands
            Err(RtcError::AlreadySubscribed) => None,
            Err(err) => return Err(err),
        };

        if let Some(sub_track) = sub_track {
            let manager = Arc::downgrade(self);
            let close_sub = sub.clone();
            sub_track.on_close(Some(Box::new(move |will_be_resumed| {
                if let Some(manager) = manager.upgrade() {
                    manager.handle_subscribed_track_close(&close_sub, will_be_resumed);
                }
            })));

            let bind_sub = Arc::downgrade(sub);
            let telemetry = self.params.telemetry.clone();
            let participant_id = self.params.participant.id();
            sub_track.add_on_bind(Box::new(move || {
                if let Some(sub) = bind_sub.upgrade() {
                    sub.set_bound();
                    sub.maybe_record_success(telemetry.as_ref(), &participant_id);
                }
            }));
            sub.set_subscribed_track(Some(sub_track.clone()));

            if sub_track.needs_negotiation() {
                self.params.participant.negotiate(false);
            }

            let manager = self.clone();
            let subscribed = sub_track.clone();
            tokio::spawn(async move {
                (manager.params.on_track_subscribed)(subscribed);
            });
        }

        // mark the publisher as someone we are subscribed to
        let publisher_id = sub.publisher_id();
        let first_subscribe = {
            let mut subscribed_to = self.subscribed_to.lock();
            let tracks = subscribed_to.entry(publisher_id.clone()).or_default();
            let first = tracks.is_empty();
            tracks.insert(sub.track_id.clone());
            first
        };

        if first_subscribe {
            if let Some(cb) = self.on_subscribe_status_changed.lock().clone() {
                tokio::spawn(async move {
                    cb(publisher_id, true);
                });
            }
        }

        Ok(())
    }

    async fn unsubscribe(&self, sub: &Arc<TrackSubscription>) {
        debug!(track_id = %sub.track_id, "executing unsubscribe");

        let Some(sub_track) = sub.subscribed_track() else {
            return;
        };

        let track = sub_track.media_track();
        track
            .remove_subscriber(&self.params.participant.id(), false)
            .await;
    }

    /// The publisher closing our downtrack is how it signals the
    /// subscription is no longer fulfilled: unsubscribe, uptrack close, or
    /// permission revocation. `desired` is untouched, so the reconciler
    /// drives a still-wanted track straight back to a subscribe attempt.
    fn handle_subscribed_track_close(
        self: &Arc<Self>,
        sub: &Arc<TrackSubscription>,
        will_be_resumed: bool,
    ) {
        debug!(track_id = %sub.track_id, will_be_resumed, "subscribed track closed");

        let was_bound = sub.is_bound();
        let Some(sub_track) = sub.subscribed_track() else {
            return;
        };
        sub.set_subscribed_track(None);

        let publisher_id = sub.publisher_id();
        let last_subscription = {
            let mut subscribed_to = self.subscribed_to.lock();
            match subscribed_to.get_mut(&publisher_id) {
                Some(tracks) => {
                    tracks.remove(&sub.track_id);
                    if tracks.is_empty() {
                        subscribed_to.remove(&publisher_id);
                        true
                    } else {
                        false
                    }
                }
                None => false,
            }
        };

        if last_subscription {
            if let Some(cb) = self.on_subscribe_status_changed.lock().clone() {
                let publisher_id = publisher_id.clone();
                tokio::spawn(async move {
                    cb(publisher_id, false);
                });
            }
        }

        {
            let manager = self.clone();
            let unsubscribed = sub_track.clone();
            tokio::spawn(async move {
                (manager.params.on_track_unsubscribed)(unsubscribed);
            });
        }

        // count the unsubscribe as long as the track had been bound; it is
        // user-initiated unless this is a migration or the participant is
        // going away
        if was_bound {
            self.params.telemetry.track_unsubscribed(
                &self.params.participant.id(),
                &sub.track_id,
                sub_track.media_track().kind(),
                !will_be_resumed && !self.params.participant.is_closed(),
            );
        }

        if !will_be_resumed {
            if let Some(sender) = sub_track.rtp_sender() {
                debug!(track_id = %sub.track_id, "removing peer connection track");
                if let Err(err) = self.params.participant.remove_track_from_subscriber(sender) {
                    if err != RtcError::InvalidSenderState {
                        // the sender state might have already gone inactive
                        debug!(
                            track_id = %sub.track_id,
                            error = %err,
                            "could not remove track from subscriber"
                        );
                    }
                }
            }

            self.params.participant.negotiate(false);
        }

        self.queue_reconcile(sub.track_id.clone());
    }
}

struct SubscriptionState {
    desired: bool,
    publisher_id: ParticipantId,
    publisher_identity: ParticipantIdentity,
    settings: Option<UpdateTrackSettings>,
    changed_notifier: Option<Arc<dyn ChangeNotifier>>,
    removed_notifier: Option<Arc<dyn ChangeNotifier>>,
    has_permission: bool,
    subscribed_track: Option<Arc<dyn SubscribedTrack>>,
    bound: bool,
}

/// One (subscriber, track) record of the reconciler's state machine.
pub(crate) struct TrackSubscription {
    subscriber_id: ParticipantId,
    pub(crate) track_id: TrackId,
    state: Mutex<SubscriptionState>,
    event_sent: AtomicBool,
    num_attempts: AtomicI32,
    /// The later of the subscribe request and the first failure; failures
    /// are escalated relative to this
    sub_started_at: Mutex<Option<Instant>>,
}

impl TrackSubscription {
    fn new(subscriber_id: ParticipantId, track_id: TrackId) -> Self {
        Self {
            subscriber_id,
            track_id,
            state: Mutex::new(SubscriptionState {
                desired: false,
                publisher_id: ParticipantId::default(),
                publisher_identity: ParticipantIdentity::default(),
                settings: None,
                changed_notifier: None,
                removed_notifier: None,
                // default allow
                has_permission: true,
                subscribed_track: None,
                bound: false,
            }),
            event_sent: AtomicBool::new(false),
            num_attempts: AtomicI32::new(0),
            sub_started_at: Mutex::new(None),
        }
    }

    fn set_desired(&self, desired: bool) -> bool {
        {
            let mut state = self.state.lock();
            if desired {
                // an explicit subscribe always resets the timer so the
                // reconciler has the full window again
                *self.sub_started_at.lock() = Some(Instant::now());
            }

            if state.desired == desired {
                return false;
            }
            state.desired = desired;
        }

        if desired {
            self.num_attempts.store(0, Ordering::SeqCst);
        } else {
            // no longer interested in change notifications
            self.set_changed_notifier(None);
            self.set_removed_notifier(None);
        }
        true
    }

    fn is_desired(&self) -> bool {
        self.state.lock().desired
    }

    fn set_publisher(&self, identity: ParticipantIdentity, id: ParticipantId) {
        let mut state = self.state.lock();
        state.publisher_id = id;
        state.publisher_identity = identity;
    }

    fn publisher_id(&self) -> ParticipantId {
        self.state.lock().publisher_id.clone()
    }

    /// Returns true when the permission flag actually changed.
    fn set_has_permission(&self, has_permission: bool) -> bool {
        let mut state = self.state.lock();
        if state.has_permission == has_permission {
            return false;
        }
        state.has_permission = has_permission;
        true
    }

    fn set_subscribed_track(&self, track: Option<Arc<dyn SubscribedTrack>>) {
        let (old_track, settings) = {
            let mut state = self.state.lock();
            let old = std::mem::replace(&mut state.subscribed_track, track.clone());
            state.bound = false;
            (old, state.settings)
        };

        if let (Some(settings), Some(track)) = (settings, track.as_ref()) {
            debug!(track_id = %self.track_id, "restoring subscriber settings");
            track.update_subscriber_settings(settings);
        }
        if let Some(old_track) = old_track {
            old_track.on_close(None);
        }
    }

    fn subscribed_track(&self) -> Option<Arc<dyn SubscribedTrack>> {
        self.state.lock().subscribed_track.clone()
    }

    fn set_changed_notifier(&self, notifier: Option<Arc<dyn ChangeNotifier>>) -> bool {
        let existing = {
            let mut state = self.state.lock();
            if Self::same_notifier(&state.changed_notifier, &notifier) {
                return false;
            }
            std::mem::replace(&mut state.changed_notifier, notifier)
        };

        if let Some(existing) = existing {
            existing.remove_observer(self.subscriber_id.as_str());
        }
        true
    }

    fn set_removed_notifier(&self, notifier: Option<Arc<dyn ChangeNotifier>>) -> bool {
        let existing = {
            let mut state = self.state.lock();
            if Self::same_notifier(&state.removed_notifier, &notifier) {
                return false;
            }
            std::mem::replace(&mut state.removed_notifier, notifier)
        };

        if let Some(existing) = existing {
            existing.remove_observer(self.subscriber_id.as_str());
        }
        true
    }

    fn same_notifier(
        current: &Option<Arc<dyn ChangeNotifier>>,
        incoming: &Option<Arc<dyn ChangeNotifier>>,
    ) -> bool {
        match (current, incoming) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }

    fn set_settings(&self, settings: UpdateTrackSettings) {
        let sub_track = {
            let mut state = self.state.lock();
            state.settings = Some(settings);
            state.subscribed_track.clone()
        };

        if let Some(sub_track) = sub_track {
            sub_track.update_subscriber_settings(settings);
        }
    }

    fn has_settings(&self) -> bool {
        self.state.lock().settings.is_some()
    }

    /// Bound once the client's answer covering this track arrived.
    fn set_bound(&self) {
        self.state.lock().bound = true;
    }

    fn is_bound(&self) -> bool {
        self.state.lock().bound
    }

    fn attempt_count(&self) -> i32 {
        self.num_attempts.load(Ordering::SeqCst)
    }

    fn record_attempt(&self, success: bool) {
        if success {
            self.num_attempts.store(0, Ordering::SeqCst);
            return;
        }

        if self.num_attempts.load(Ordering::SeqCst) == 0 {
            // first failure starts the escalation timer
            *self.sub_started_at.lock() = Some(Instant::now());
        }
        self.num_attempts.fetch_add(1, Ordering::SeqCst);
    }

    fn duration_since_start(&self) -> Duration {
        self.sub_started_at
            .lock()
            .map_or(Duration::ZERO, |at| at.elapsed())
    }

    /// At most one failure event per subscription episode.
    fn maybe_record_error(
        &self,
        telemetry: &dyn Telemetry,
        participant_id: &ParticipantId,
        err: &RtcError,
        is_user_error: bool,
    ) {
        if self.event_sent.swap(true, Ordering::SeqCst) {
            return;
        }

        telemetry.track_subscribe_failed(participant_id, &self.track_id, err, is_user_error);
    }

    fn maybe_record_success(&self, telemetry: &dyn Telemetry, participant_id: &ParticipantId) {
        let Some(sub_track) = self.subscribed_track() else {
            return;
        };
        let media_track = sub_track.media_track();

        let event_sent = self.event_sent.swap(true, Ordering::SeqCst);
        telemetry.track_subscribed(
            participant_id,
            &media_track.to_proto(),
            &sub_track.publisher_id(),
            &sub_track.publisher_identity(),
            !event_sent,
        );
    }

    fn needs_subscribe(&self) -> bool {
        let state = self.state.lock();
        state.desired && state.subscribed_track.is_none()
    }

    fn needs_unsubscribe(&self) -> bool {
        let state = self.state.lock();
        !state.desired && state.subscribed_track.is_some()
    }

    fn needs_bind(&self) -> bool {
        let state = self.state.lock();
        state.desired && state.subscribed_track.is_some() && !state.bound
    }

    fn is_idle(&self) -> bool {
        let state = self.state.lock();
        !state.desired && state.subscribed_track.is_none()
    }
}
