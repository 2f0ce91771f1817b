//! Per-publisher registry of published tracks and the subscription
//! permission matrix.
//!
//! Permission updates are ordered by [`TimedVersion`]; an update that is
//! not strictly newer than the held version is ignored, so replayed or
//! cross-node-stale updates cannot roll permissions back. Applying a
//! restrictive update revokes existing disallowed subscribers out-of-band.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use roomcast_sfu::types::{ParticipantId, ParticipantIdentity, TrackId, TrackInfo, VideoLayer};

use crate::error::{Result, RtcError};
use crate::timed_version::{TimedVersion, TimedVersionGenerator};
use crate::types::{LocalParticipant, MediaTrack, SubscriptionPermission, TrackPermission};

pub type SidResolver<'a> = &'a (dyn Fn(&ParticipantId) -> Option<Arc<dyn LocalParticipant>> + Sync);

pub struct UpTrackManagerParams {
    pub sid: ParticipantId,
    pub version_generator: Arc<TimedVersionGenerator>,
}

#[derive(Default)]
struct State {
    closed: bool,
    published_tracks: HashMap<TrackId, Arc<dyn MediaTrack>>,
    subscription_permission: Option<SubscriptionPermission>,
    version: Option<TimedVersion>,
    /// None means everyone is allowed
    subscriber_permissions: Option<HashMap<ParticipantIdentity, TrackPermission>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PublishedTrackDebugInfo {
    pub track_id: TrackId,
    pub muted: bool,
}

/// Manages all uptracks published by one participant.
pub struct UpTrackManager {
    params: UpTrackManagerParams,
    state: RwLock<State>,
    /// Serializes permission updates so parsing can run without the state
    /// lock (the resolver must never be called while it is held).
    update_lock: Mutex<()>,
    on_close: Mutex<Option<Box<dyn Fn() + Send + Sync>>>,
    on_track_updated: Mutex<Option<Box<dyn Fn(Arc<dyn MediaTrack>) + Send + Sync>>>,
}

impl UpTrackManager {
    #[must_use]
    pub fn new(params: UpTrackManagerParams) -> Arc<Self> {
        Arc::new(Self {
            params,
            state: RwLock::new(State::default()),
            update_lock: Mutex::new(()),
            on_close: Mutex::new(None),
            on_track_updated: Mutex::new(None),
        })
    }

    pub fn on_up_track_manager_close(&self, cb: Box<dyn Fn() + Send + Sync>) {
        *self.on_close.lock() = Some(cb);
    }

    pub fn on_published_track_updated(&self, cb: Box<dyn Fn(Arc<dyn MediaTrack>) + Send + Sync>) {
        *self.on_track_updated.lock() = Some(cb);
    }

    pub async fn close(&self, will_be_resumed: bool) {
        let (tracks, notify) = {
            let mut state = self.state.write();
            state.closed = true;
            let tracks: Vec<Arc<dyn MediaTrack>> =
                state.published_tracks.values().cloned().collect();
            (tracks, state.published_tracks.is_empty())
        };

        for track in tracks {
            track.clear_all_receivers(will_be_resumed).await;
        }

        if notify {
            if let Some(cb) = self.on_close.lock().as_ref() {
                cb();
            }
        }
    }

    pub fn add_published_track(self: &Arc<Self>, track: Arc<dyn MediaTrack>) {
        let track_id = track.id();
        {
            let mut state = self.state.write();
            state
                .published_tracks
                .entry(track_id.clone())
                .or_insert_with(|| track.clone());
        }
        debug!(participant = %self.params.sid, track_id = %track_id, "added published track");

        let weak = Arc::downgrade(self);
        track.add_on_close(Box::new(move || {
            Self::handle_published_track_close(&weak, &track_id);
        }));
    }

    fn handle_published_track_close(weak: &Weak<Self>, track_id: &TrackId) {
        let Some(manager) = weak.upgrade() else {
            return;
        };

        let notify = {
            let mut state = manager.state.write();
            state.published_tracks.remove(track_id);
            // subscription permissions are left alone, the next update
            // from the participant resets them
            state.closed && state.published_tracks.is_empty()
        };

        if notify {
            if let Some(cb) = manager.on_close.lock().as_ref() {
                cb();
            }
        }
    }

    pub async fn remove_published_track(
        &self,
        track: Arc<dyn MediaTrack>,
        will_be_resumed: bool,
        should_close: bool,
    ) {
        if should_close {
            track.close(will_be_resumed).await;
        } else {
            track.clear_all_receivers(will_be_resumed).await;
        }

        self.state.write().published_tracks.remove(&track.id());
    }

    #[must_use]
    pub fn get_published_track(&self, track_id: &TrackId) -> Option<Arc<dyn MediaTrack>> {
        self.state.read().published_tracks.get(track_id).cloned()
    }

    #[must_use]
    pub fn get_published_tracks(&self) -> Vec<Arc<dyn MediaTrack>> {
        self.state.read().published_tracks.values().cloned().collect()
    }

    #[must_use]
    pub fn to_proto(&self) -> Vec<TrackInfo> {
        self.state
            .read()
            .published_tracks
            .values()
            .map(|t| t.to_proto())
            .collect()
    }

    /// Flip a published track's mute state, notifying on actual change.
    /// The track is read back after the write so a debouncing track decides
    /// whether an update is reported.
    pub fn set_published_track_muted(
        &self,
        track_id: &TrackId,
        muted: bool,
    ) -> Option<Arc<dyn MediaTrack>> {
        let track = self.get_published_track(track_id);

        if let Some(track) = &track {
            let current = track.is_muted();
            track.set_muted(muted);

            if current != track.is_muted() {
                info!(
                    participant = %self.params.sid,
                    track_id = %track_id,
                    muted = track.is_muted(),
                    "publisher mute status changed"
                );
                if let Some(cb) = self.on_track_updated.lock().as_ref() {
                    cb(track.clone());
                }
            }
        }

        track
    }

    pub fn update_video_layers(&self, track_id: &TrackId, layers: Vec<VideoLayer>) -> Result<()> {
        let Some(track) = self.get_published_track(track_id) else {
            warn!(participant = %self.params.sid, track_id = %track_id, "could not find track");
            return Err(RtcError::TrackNotPublished);
        };

        track.update_video_layers(layers);
        if let Some(cb) = self.on_track_updated.lock().as_ref() {
            cb(track);
        }

        Ok(())
    }

    /// Apply a permission update if its version is strictly newer than the
    /// held one, then revoke subscribers the new matrix disallows.
    ///
    /// `timed_version` is `None` for local-origin updates, which mint a
    /// fresh version; updates relayed from another node carry the version
    /// minted there. A parse failure leaves the previous matrix in place.
    pub async fn update_subscription_permission(
        &self,
        subscription_permission: Option<SubscriptionPermission>,
        timed_version: Option<TimedVersion>,
        resolver_by_sid: SidResolver<'_>,
    ) -> Result<()> {
        let guard = self.update_lock.lock();

        {
            let mut state = self.state.write();
            match timed_version {
                Some(incoming) => {
                    // another node may own this participant's permissions;
                    // prefer its version, but never move backwards
                    if let Some(current) = state.version {
                        if !incoming.after(&current) {
                            info!(
                                participant = %self.params.sid,
                                existing_version = %current,
                                requesting_version = %incoming,
                                "skipping older subscription permission version"
                            );
                            return Ok(());
                        }
                        state.version = Some(incoming);
                    } else {
                        state.version = Some(incoming);
                    }
                }
                None => {
                    let minted = self.params.version_generator.next();
                    match state.version.as_mut() {
                        Some(version) => version.update(&minted),
                        None => state.version = Some(minted),
                    }
                }
            }

            // store as received for use when migrating
            state.subscription_permission = subscription_permission.clone();
        }

        let Some(permission) = subscription_permission else {
            // possible to get an empty update when migrating
            debug!(participant = %self.params.sid, "subscription permission cleared");
            return Ok(());
        };

        debug!(participant = %self.params.sid, permission = ?permission, "updating subscription permission");

        // parsed without the state lock, the resolver may block
        match self.parse_subscription_permissions(&permission, resolver_by_sid) {
            Ok(parsed) => {
                self.state.write().subscriber_permissions = parsed;
            }
            Err(err) => {
                // keep the previous matrix on failure
                error!(participant = %self.params.sid, error = %err, "failed updating subscription permission");
                return Err(err);
            }
        }

        drop(guard);
        self.maybe_revoke_subscriptions().await;
        Ok(())
    }

    #[must_use]
    pub fn subscription_permission(&self) -> (Option<SubscriptionPermission>, Option<TimedVersion>) {
        let state = self.state.read();
        if state.version.is_none() {
            return (None, None);
        }
        (state.subscription_permission.clone(), state.version)
    }

    #[must_use]
    pub fn has_permission(&self, track_id: &TrackId, subscriber_identity: &ParticipantIdentity) -> bool {
        let state = self.state.read();
        Self::has_permission_locked(&state, track_id, subscriber_identity)
    }

    fn has_permission_locked(
        state: &State,
        track_id: &TrackId,
        subscriber_identity: &ParticipantIdentity,
    ) -> bool {
        let Some(permissions) = state.subscriber_permissions.as_ref() else {
            return true;
        };

        let Some(perms) = permissions.get(subscriber_identity) else {
            return false;
        };

        if perms.all_tracks {
            return true;
        }

        perms.track_sids.iter().any(|sid| sid == track_id.as_str())
    }

    /// Identities allowed to subscribe to a track; `None` means everyone.
    #[must_use]
    pub fn get_allowed_subscribers(&self, track_id: &TrackId) -> Option<Vec<ParticipantIdentity>> {
        let state = self.state.read();
        Self::allowed_subscribers_locked(&state, track_id)
    }

    fn allowed_subscribers_locked(
        state: &State,
        track_id: &TrackId,
    ) -> Option<Vec<ParticipantIdentity>> {
        let permissions = state.subscriber_permissions.as_ref()?;

        let mut allowed = Vec::new();
        for (identity, perms) in permissions {
            if perms.all_tracks || perms.track_sids.iter().any(|sid| sid == track_id.as_str()) {
                allowed.push(identity.clone());
            }
        }
        Some(allowed)
    }

    fn parse_subscription_permissions(
        &self,
        permission: &SubscriptionPermission,
        resolver_by_sid: SidResolver<'_>,
    ) -> Result<Option<HashMap<ParticipantIdentity, TrackPermission>>> {
        // all_participants takes precedence, nothing else to parse
        if permission.all_participants {
            return Ok(None);
        }

        let mut permissions = HashMap::new();
        for track_perms in &permission.track_permissions {
            let mut identity = ParticipantIdentity::from(track_perms.participant_identity.clone());
            if identity.as_str().is_empty() {
                if track_perms.participant_sid.is_empty() {
                    return Err(RtcError::SubscriptionPermissionNeedsId);
                }

                let sid = ParticipantId::from(track_perms.participant_sid.clone());
                match resolver_by_sid(&sid) {
                    Some(subscriber) => identity = subscriber.identity(),
                    None => {
                        warn!(subscriber_id = %sid, "could not find subscriber for permissions update");
                        continue;
                    }
                }
            } else if !track_perms.participant_sid.is_empty() {
                let sid = ParticipantId::from(track_perms.participant_sid.clone());
                match resolver_by_sid(&sid) {
                    Some(subscriber) if subscriber.identity() != identity => {
                        error!(
                            expected = %identity,
                            got = %subscriber.identity(),
                            "participant identity mismatch"
                        );
                    }
                    None => {
                        warn!(subscriber_id = %sid, "could not find subscriber for permissions update");
                    }
                    _ => {}
                }
            }

            permissions.insert(identity, track_perms.clone());
        }

        Ok(Some(permissions))
    }

    async fn maybe_revoke_subscriptions(&self) {
        let revocations: Vec<(Arc<dyn MediaTrack>, Vec<ParticipantIdentity>)> = {
            let state = self.state.read();
            state
                .published_tracks
                .iter()
                .filter_map(|(track_id, track)| {
                    Self::allowed_subscribers_locked(&state, track_id)
                        .map(|allowed| (track.clone(), allowed))
                })
                .collect()
        };

        for (track, allowed) in revocations {
            track.revoke_disallowed_subscribers(&allowed).await;
        }
    }

    #[must_use]
    pub fn debug_info(&self) -> Vec<PublishedTrackDebugInfo> {
        self.state
            .read()
            .published_tracks
            .values()
            .map(|track| PublishedTrackDebugInfo {
                track_id: track.id(),
                muted: track.is_muted(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{FakeMediaTrack, FakeParticipant};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn manager() -> Arc<UpTrackManager> {
        UpTrackManager::new(UpTrackManagerParams {
            sid: ParticipantId::from("publisher"),
            version_generator: Arc::new(TimedVersionGenerator::new()),
        })
    }

    fn no_resolver(_: &ParticipantId) -> Option<Arc<dyn LocalParticipant>> {
        None
    }

    fn perms_for(identity: &str, all_tracks: bool, track_sids: &[&str]) -> TrackPermission {
        TrackPermission {
            participant_identity: identity.to_string(),
            participant_sid: String::new(),
            all_tracks,
            track_sids: track_sids.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn updates_subscription_permission() {
        let um = manager();
        um.add_published_track(FakeMediaTrack::audio("audio"));
        um.add_published_track(FakeMediaTrack::video("video"));

        // no restrictive subscription permission
        um.update_subscription_permission(
            Some(SubscriptionPermission {
                all_participants: true,
                track_permissions: vec![],
            }),
            None,
            &no_resolver,
        )
        .await
        .expect("update");
        assert!(um.state.read().subscriber_permissions.is_none());

        // nobody is allowed to subscribe
        um.update_subscription_permission(
            Some(SubscriptionPermission::default()),
            None,
            &no_resolver,
        )
        .await
        .expect("update");
        {
            let state = um.state.read();
            let perms = state.subscriber_permissions.as_ref().expect("matrix");
            assert!(perms.is_empty());
        }

        // sid-only entries are resolved to identities
        let p1 = FakeParticipant::new("p1");
        let p2 = FakeParticipant::new("p2");
        let sid_resolver = move |sid: &ParticipantId| -> Option<Arc<dyn LocalParticipant>> {
            match sid.as_str() {
                "p1" => Some(p1.clone()),
                "p2" => Some(p2.clone()),
                _ => None,
            }
        };
        um.update_subscription_permission(
            Some(SubscriptionPermission {
                all_participants: false,
                track_permissions: vec![
                    TrackPermission {
                        participant_sid: "p1".to_string(),
                        all_tracks: true,
                        ..Default::default()
                    },
                    TrackPermission {
                        participant_sid: "p2".to_string(),
                        all_tracks: true,
                        ..Default::default()
                    },
                ],
            }),
            None,
            &sid_resolver,
        )
        .await
        .expect("update");
        {
            let state = um.state.read();
            let perms = state.subscriber_permissions.as_ref().expect("matrix");
            assert_eq!(perms.len(), 2);
            assert!(perms[&ParticipantIdentity::from("p1")].all_tracks);
            assert!(perms[&ParticipantIdentity::from("p2")].all_tracks);
        }

        // mixed all-tracks and per-track permissions, by identity
        um.update_subscription_permission(
            Some(SubscriptionPermission {
                all_participants: false,
                track_permissions: vec![
                    perms_for("p1", true, &[]),
                    perms_for("p2", false, &["audio"]),
                    perms_for("p3", false, &["video"]),
                ],
            }),
            None,
            &no_resolver,
        )
        .await
        .expect("update");
        let state = um.state.read();
        let perms = state.subscriber_permissions.as_ref().expect("matrix");
        assert_eq!(perms.len(), 3);
        assert_eq!(
            perms[&ParticipantIdentity::from("p2")].track_sids,
            vec!["audio".to_string()]
        );
    }

    #[tokio::test]
    async fn identity_mismatch_keeps_stated_identity() {
        let um = manager();

        let p1 = FakeParticipant::new("p1");
        let p2 = FakeParticipant::new("p2");
        // resolver answers with the wrong participant on purpose
        let bad_resolver = move |sid: &ParticipantId| -> Option<Arc<dyn LocalParticipant>> {
            match sid.as_str() {
                "p1" => Some(p2.clone()),
                "p2" => Some(p1.clone()),
                _ => None,
            }
        };

        um.update_subscription_permission(
            Some(SubscriptionPermission {
                all_participants: false,
                track_permissions: vec![
                    TrackPermission {
                        participant_identity: "p1".to_string(),
                        participant_sid: "p1".to_string(),
                        all_tracks: true,
                        ..Default::default()
                    },
                    TrackPermission {
                        participant_identity: "p2".to_string(),
                        participant_sid: "p2".to_string(),
                        all_tracks: true,
                        ..Default::default()
                    },
                ],
            }),
            None,
            &bad_resolver,
        )
        .await
        .expect("update");

        let state = um.state.read();
        let perms = state.subscriber_permissions.as_ref().expect("matrix");
        assert_eq!(perms.len(), 2);
        assert!(perms.contains_key(&ParticipantIdentity::from("p1")));
        assert!(perms.contains_key(&ParticipantIdentity::from("p2")));
    }

    #[tokio::test]
    async fn checks_subscription_permission() {
        let um = manager();
        um.add_published_track(FakeMediaTrack::audio("audio"));
        um.add_published_track(FakeMediaTrack::video("video"));

        let audio = TrackId::from("audio");
        let video = TrackId::from("video");
        let screen = TrackId::from("screen");
        let p1 = ParticipantIdentity::from("p1");
        let p2 = ParticipantIdentity::from("p2");
        let p3 = ParticipantIdentity::from("p3");

        // no restrictive permission
        um.update_subscription_permission(
            Some(SubscriptionPermission {
                all_participants: true,
                track_permissions: vec![],
            }),
            None,
            &no_resolver,
        )
        .await
        .expect("update");
        assert!(um.has_permission(&audio, &p1));
        assert!(um.has_permission(&audio, &p2));

        // nobody is allowed to subscribe
        um.update_subscription_permission(
            Some(SubscriptionPermission::default()),
            None,
            &no_resolver,
        )
        .await
        .expect("update");
        assert!(!um.has_permission(&audio, &p1));
        assert!(!um.has_permission(&audio, &p2));

        // all tracks allowed for both participants
        um.update_subscription_permission(
            Some(SubscriptionPermission {
                all_participants: false,
                track_permissions: vec![perms_for("p1", true, &[]), perms_for("p2", true, &[])],
            }),
            None,
            &no_resolver,
        )
        .await
        .expect("update");
        for track in [&audio, &video] {
            assert!(um.has_permission(track, &p1));
            assert!(um.has_permission(track, &p2));
        }

        // a track published after the permissions were set follows them
        um.add_published_track(FakeMediaTrack::video("screen"));
        assert!(um.has_permission(&screen, &p1));
        assert!(um.has_permission(&screen, &p2));

        // all tracks for some, restrictive for others
        um.update_subscription_permission(
            Some(SubscriptionPermission {
                all_participants: false,
                track_permissions: vec![
                    perms_for("p1", true, &[]),
                    perms_for("p2", false, &["audio"]),
                    perms_for("p3", false, &["video"]),
                ],
            }),
            None,
            &no_resolver,
        )
        .await
        .expect("update");

        assert!(um.has_permission(&audio, &p1));
        assert!(um.has_permission(&video, &p1));
        assert!(um.has_permission(&screen, &p1));

        assert!(um.has_permission(&audio, &p2));
        assert!(!um.has_permission(&video, &p2));
        assert!(!um.has_permission(&screen, &p2));

        assert!(!um.has_permission(&audio, &p3));
        assert!(um.has_permission(&video, &p3));
        assert!(!um.has_permission(&screen, &p3));
    }

    #[tokio::test]
    async fn restrictive_update_revokes_disallowed_subscribers() {
        let um = manager();
        let audio_track = FakeMediaTrack::audio("audio");
        let video_track = FakeMediaTrack::video("video");
        um.add_published_track(audio_track.clone());
        um.add_published_track(video_track.clone());

        // v1: p1 may receive everything
        um.update_subscription_permission(
            Some(SubscriptionPermission {
                all_participants: false,
                track_permissions: vec![perms_for("p1", true, &[])],
            }),
            Some(TimedVersion::new(100, 0)),
            &no_resolver,
        )
        .await
        .expect("update");
        assert_eq!(
            audio_track.revocations.lock().last().expect("revoked"),
            &vec![ParticipantIdentity::from("p1")]
        );

        // v2: p1 narrowed down to the audio track only
        um.update_subscription_permission(
            Some(SubscriptionPermission {
                all_participants: false,
                track_permissions: vec![perms_for("p1", false, &["audio"])],
            }),
            Some(TimedVersion::new(200, 0)),
            &no_resolver,
        )
        .await
        .expect("update");

        assert!(um.has_permission(&TrackId::from("audio"), &ParticipantIdentity::from("p1")));
        assert!(!um.has_permission(&TrackId::from("video"), &ParticipantIdentity::from("p1")));
        assert_eq!(
            audio_track.revocations.lock().last().expect("revoked"),
            &vec![ParticipantIdentity::from("p1")]
        );
        assert_eq!(
            video_track.revocations.lock().last().expect("revoked"),
            &Vec::<ParticipantIdentity>::new()
        );
    }

    #[tokio::test]
    async fn stale_version_is_ignored_without_revocation() {
        let um = manager();
        let track = FakeMediaTrack::audio("audio");
        um.add_published_track(track.clone());

        um.update_subscription_permission(
            Some(SubscriptionPermission {
                all_participants: false,
                track_permissions: vec![perms_for("p1", true, &[])],
            }),
            Some(TimedVersion::new(100, 0)),
            &no_resolver,
        )
        .await
        .expect("update");
        let revocations_before = track.revocation_count();

        // older version: observationally a no-op
        um.update_subscription_permission(
            Some(SubscriptionPermission {
                all_participants: true,
                track_permissions: vec![],
            }),
            Some(TimedVersion::new(50, 0)),
            &no_resolver,
        )
        .await
        .expect("update");

        assert!(!um.has_permission(&TrackId::from("audio"), &ParticipantIdentity::from("p2")));
        assert_eq!(track.revocation_count(), revocations_before);

        // same version is also not strictly after
        um.update_subscription_permission(
            Some(SubscriptionPermission {
                all_participants: true,
                track_permissions: vec![],
            }),
            Some(TimedVersion::new(100, 0)),
            &no_resolver,
        )
        .await
        .expect("update");
        assert!(!um.has_permission(&TrackId::from("audio"), &ParticipantIdentity::from("p2")));

        let (_, version) = um.subscription_permission();
        assert_eq!(version, Some(TimedVersion::new(100, 0)));
    }

    #[tokio::test]
    async fn parse_failure_retains_previous_matrix() {
        let um = manager();

        um.update_subscription_permission(
            Some(SubscriptionPermission {
                all_participants: false,
                track_permissions: vec![perms_for("p1", true, &[])],
            }),
            None,
            &no_resolver,
        )
        .await
        .expect("update");

        // entry with neither identity nor sid is rejected
        let err = um
            .update_subscription_permission(
                Some(SubscriptionPermission {
                    all_participants: false,
                    track_permissions: vec![TrackPermission::default()],
                }),
                None,
                &no_resolver,
            )
            .await
            .expect_err("needs id");
        assert_eq!(err, RtcError::SubscriptionPermissionNeedsId);

        assert!(um.has_permission(&TrackId::from("anything"), &ParticipantIdentity::from("p1")));
        assert!(!um.has_permission(&TrackId::from("anything"), &ParticipantIdentity::from("p2")));
    }

    #[tokio::test]
    async fn unresolvable_sid_entry_is_skipped() {
        let um = manager();

        um.update_subscription_permission(
            Some(SubscriptionPermission {
                all_participants: false,
                track_permissions: vec![
                    TrackPermission {
                        participant_sid: "ghost".to_string(),
                        all_tracks: true,
                        ..Default::default()
                    },
                    perms_for("p1", true, &[]),
                ],
            }),
            None,
            &no_resolver,
        )
        .await
        .expect("update");

        let state = um.state.read();
        let perms = state.subscriber_permissions.as_ref().expect("matrix");
        assert_eq!(perms.len(), 1);
        assert!(perms.contains_key(&ParticipantIdentity::from("p1")));
    }

    #[test]
    fn mute_change_is_detected_by_reading_back() {
        let um = manager();
        let track = FakeMediaTrack::audio("audio");
        um.add_published_track(track.clone());

        let updates = Arc::new(AtomicUsize::new(0));
        let counter = updates.clone();
        um.on_published_track_updated(Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        um.set_published_track_muted(&TrackId::from("audio"), true);
        assert_eq!(updates.load(Ordering::SeqCst), 1);

        // same value again: the read-back detects no change
        um.set_published_track_muted(&TrackId::from("audio"), true);
        assert_eq!(updates.load(Ordering::SeqCst), 1);

        um.set_published_track_muted(&TrackId::from("audio"), false);
        assert_eq!(updates.load(Ordering::SeqCst), 2);

        assert!(um
            .set_published_track_muted(&TrackId::from("nope"), true)
            .is_none());
    }

    #[tokio::test]
    async fn close_notifies_after_last_track_is_gone() {
        let um = manager();
        let track = FakeMediaTrack::audio("audio");
        um.add_published_track(track.clone());

        let closed = Arc::new(AtomicUsize::new(0));
        let counter = closed.clone();
        um.on_up_track_manager_close(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        um.close(false).await;
        assert_eq!(*track.cleared_receivers.lock(), vec![false]);
        assert_eq!(closed.load(Ordering::SeqCst), 0, "a track is still published");

        track.trigger_close();
        assert_eq!(closed.load(Ordering::SeqCst), 1);
        assert!(um.get_published_track(&TrackId::from("audio")).is_none());
    }

    #[tokio::test]
    async fn close_with_no_tracks_notifies_synchronously() {
        let um = manager();
        let closed = Arc::new(AtomicUsize::new(0));
        let counter = closed.clone();
        um.on_up_track_manager_close(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        um.close(true).await;
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn remove_published_track_clears_or_closes() {
        let um = manager();
        let track = FakeMediaTrack::audio("audio");
        um.add_published_track(track.clone());

        um.remove_published_track(track.clone(), true, false).await;
        assert_eq!(*track.cleared_receivers.lock(), vec![true]);
        assert!(um.get_published_track(&TrackId::from("audio")).is_none());

        let closing = FakeMediaTrack::audio("closing");
        um.add_published_track(closing.clone());
        um.remove_published_track(closing.clone(), false, true).await;
        assert_eq!(*closing.cleared_receivers.lock(), vec![false]);
    }

    #[test]
    fn update_video_layers_requires_published_track() {
        let um = manager();
        let track = FakeMediaTrack::video("video");
        um.add_published_track(track.clone());

        let updates = Arc::new(AtomicUsize::new(0));
        let counter = updates.clone();
        um.on_published_track_updated(Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        um.update_video_layers(&TrackId::from("video"), vec![])
            .expect("update");
        assert_eq!(track.update_layer_calls.load(Ordering::SeqCst), 1);
        assert_eq!(updates.load(Ordering::SeqCst), 1);

        assert_eq!(
            um.update_video_layers(&TrackId::from("missing"), vec![]),
            Err(RtcError::TrackNotPublished)
        );
    }

    #[test]
    fn subscription_permission_empty_until_first_update() {
        let um = manager();
        let (permission, version) = um.subscription_permission();
        assert!(permission.is_none());
        assert!(version.is_none());
    }
}
