//! Publisher-side track registry and subscriber-side reconciliation.
//!
//! - **[`UpTrackManager`]**: the tracks one participant publishes, plus the
//!   subscription permission matrix with timed-version ordering and
//!   revocation on update
//! - **[`SubscriptionManager`]**: one subscriber's desired-vs-actual
//!   subscription state, driven to convergence by a reconciler task with
//!   retries, timeouts and permission enforcement

pub mod error;
pub mod subscription;
pub mod timed_version;
pub mod types;
pub mod uptrack_manager;

#[cfg(test)]
mod test_helpers;

pub use error::RtcError;
pub use subscription::{
    SubscriptionManager, SubscriptionManagerParams, DEFAULT_NOT_FOUND_TIMEOUT,
    DEFAULT_RECONCILE_INTERVAL, DEFAULT_SUBSCRIPTION_TIMEOUT,
};
pub use timed_version::{TimedVersion, TimedVersionGenerator};
pub use types::{
    ChangeNotifier, LocalParticipant, MediaTrack, RtpSenderId, SubscribedTrack,
    SubscriptionPermission, Telemetry, TrackPermission, TrackResolveResult, TrackResolver,
    UpdateTrackSettings,
};
pub use uptrack_manager::{UpTrackManager, UpTrackManagerParams};
