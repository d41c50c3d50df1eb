//! Error types for the onboarding service

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::state::OnboardingState;

/// Result type for synchronous service entry points
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Errors returned synchronously by `start`, `abort` and `run_offboarding`
///
/// Asynchronous phase failures never surface here; they are reported through
/// [`crate::core::machine::Notification::Error`] instead.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(&'static str),

    #[error("onboarding already running (state {0})")]
    AlreadyRunning(OnboardingState),

    #[error("cannot abort in state {0}")]
    CannotAbort(OnboardingState),

    #[error("state machine worker is gone")]
    WorkerGone,

    #[error("a scan is already in progress")]
    ScanInProgress,

    #[error("no scan results available")]
    NoScanResults,
}

/// Error kinds reported through the notification channel
///
/// Phase-scoped, so a caller can tell an onboardee-side failure from a
/// target-side one without tracking state itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Wi-Fi connection to the onboardee AP timed out
    OnboardeeWifiTimeout,
    /// Wi-Fi authentication against the onboardee AP failed
    OnboardeeWifiAuth,
    /// Wi-Fi connection to the target AP timed out
    TargetWifiTimeout,
    /// Wi-Fi authentication against the target AP failed
    TargetWifiAuth,
    /// No announcement from the onboardee arrived in time
    FindOnboardeeTimeout,
    /// No announcement from the onboardee arrived on the target network in time
    VerificationTimeout,
    /// The peer was unreachable while joining the session
    SessionUnreachable,
    /// Session establishment failed
    SessionError,
    /// The peer refused the pushed target credentials
    ConfigurationRejected,
    /// The deferred-ack signal did not arrive in time
    ConfigureSignalTimeout,
    /// The peer's announcement lacks the onboarding capability
    UnsupportedCapability,
    /// An announcement carried malformed metadata
    InvalidAnnouncementData,
    /// Rollback to the original network timed out
    OriginalWifiTimeout,
    /// Rollback to the original network hit an authentication failure
    OriginalWifiAuth,
    /// Offboarding the peer failed
    OffboardingFailed,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}
