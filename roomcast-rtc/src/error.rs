use thiserror::Error;

/// Errors surfaced by the registry and the subscription reconciler.
///
/// The reconciler classifies these into persistent-retriable, auto-
/// unsubscribe and escalating kinds; see `subscription`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RtcError {
    #[error("track not found")]
    TrackNotFound,

    #[error("remote track not attached")]
    TrackNotAttached,

    #[error("publisher has not granted track permission")]
    NoTrackPermission,

    #[error("participant is not allowed to subscribe")]
    NoSubscribePermission,

    #[error("track has no receiver")]
    NoReceiver,

    #[error("track is not open")]
    NotOpen,

    #[error("track not bound within timeout")]
    TrackNotBound,

    #[error("already subscribed")]
    AlreadySubscribed,

    #[error("either participant identity or SID needed")]
    SubscriptionPermissionNeedsId,

    #[error("could not find published track")]
    TrackNotPublished,

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("rtp sender in invalid state")]
    InvalidSenderState,

    #[error("{0}")]
    Internal(String),
}

impl RtcError {
    /// Errors outside our control that may resolve at any moment; the
    /// reconciler keeps retrying these on every tick.
    #[must_use]
    pub fn is_persistent_retriable(&self) -> bool {
        matches!(
            self,
            Self::NoTrackPermission
                | Self::NoSubscribePermission
                | Self::NoReceiver
                | Self::NotOpen
                | Self::TrackNotAttached
        )
    }
}

pub type Result<T> = std::result::Result<T, RtcError>;
