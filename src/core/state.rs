//! Onboarding state machine states

use serde::{Deserialize, Serialize};

/// States of the onboarding state machine
///
/// `Idle` is both the initial state and the terminal success state. Each
/// workflow phase has a matching `Error*` mirror state reached on timeout or
/// failure; all of them are resumable by calling `start` again with the same
/// configuration, except [`OnboardingState::ErrorOnboardeeAnnouncementReceived`]
/// (the peer does not support the onboarding capability).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnboardingState {
    /// Start and terminal-success state
    Idle,
    /// Connecting to the onboardee device's access point
    ConnectingToOnboardee,
    /// Waiting for an announcement on the onboardee network
    WaitingForOnboardeeAnnouncement,
    /// Announcement received on the onboardee network
    OnboardeeAnnouncementReceived,
    /// Establishing a session with the onboardee
    JoiningSession,
    /// Pushing target credentials to the onboardee
    ConfiguringOnboardee,
    /// Waiting for the deferred-ack signal from the onboardee
    ConfiguringOnboardeeWithSignal,
    /// Connecting to the target access point
    ConnectingToTargetWifiAp,
    /// Waiting for the onboardee's announcement on the target network
    WaitingForTargetAnnounce,
    /// Announcement received from the onboardee on the target network
    TargetAnnouncementReceived,
    /// Abort in progress, rolling back to the original network
    Aborting,
    /// Wi-Fi connection to the onboardee AP failed
    ErrorConnectingToOnboardee,
    /// No announcement arrived on the onboardee network in time
    ErrorWaitingForOnboardeeAnnouncement,
    /// A valid announcement arrived after the onboardee wait timed out
    ErrorOnboardeeAnnouncementReceivedAfterTimeout,
    /// The onboardee's announcement lacks the onboarding capability
    ErrorOnboardeeAnnouncementReceived,
    /// Session establishment with the onboardee failed
    ErrorJoiningSession,
    /// The onboardee rejected the pushed credentials
    ErrorConfiguringOnboardee,
    /// The deferred-ack signal did not arrive in time
    ErrorWaitingForConfigureSignal,
    /// Wi-Fi connection to the target AP failed
    ErrorConnectingToTargetWifiAp,
    /// No announcement arrived on the target network in time
    ErrorWaitingForTargetAnnounce,
    /// A matching announcement arrived after the target wait timed out
    ErrorTargetAnnouncementReceivedAfterTimeout,
}

impl OnboardingState {
    /// Whether this is one of the error mirror states
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            Self::ErrorConnectingToOnboardee
                | Self::ErrorWaitingForOnboardeeAnnouncement
                | Self::ErrorOnboardeeAnnouncementReceivedAfterTimeout
                | Self::ErrorOnboardeeAnnouncementReceived
                | Self::ErrorJoiningSession
                | Self::ErrorConfiguringOnboardee
                | Self::ErrorWaitingForConfigureSignal
                | Self::ErrorConnectingToTargetWifiAp
                | Self::ErrorWaitingForTargetAnnounce
                | Self::ErrorTargetAnnouncementReceivedAfterTimeout
        )
    }

    /// Whether `start` may be called again to resume from this state
    ///
    /// All error states are resumable except the unsupported-capability one,
    /// which requires aborting and starting over against a different peer.
    pub fn is_resumable(&self) -> bool {
        self.is_error() && *self != Self::ErrorOnboardeeAnnouncementReceived
    }

    /// Whether `abort` is permitted in this state
    ///
    /// Aborting is rejected when there is nothing to abort (`Idle`,
    /// `Aborting`) and during the late phases where rollback would corrupt
    /// the peer's in-flight configuration.
    pub fn is_abortable(&self) -> bool {
        !matches!(
            self,
            Self::Idle
                | Self::Aborting
                | Self::ConnectingToTargetWifiAp
                | Self::TargetAnnouncementReceived
                | Self::ConfiguringOnboardee
                | Self::ConfiguringOnboardeeWithSignal
        )
    }
}

impl std::fmt::Display for OnboardingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_state_classification() {
        assert!(!OnboardingState::Idle.is_error());
        assert!(!OnboardingState::JoiningSession.is_error());
        assert!(OnboardingState::ErrorJoiningSession.is_error());
        assert!(OnboardingState::ErrorWaitingForTargetAnnounce.is_error());
    }

    #[test]
    fn test_resumable_states() {
        assert!(OnboardingState::ErrorConnectingToOnboardee.is_resumable());
        assert!(OnboardingState::ErrorOnboardeeAnnouncementReceivedAfterTimeout.is_resumable());
        assert!(OnboardingState::ErrorTargetAnnouncementReceivedAfterTimeout.is_resumable());
        // unsupported capability is terminal for the attempt
        assert!(!OnboardingState::ErrorOnboardeeAnnouncementReceived.is_resumable());
        // non-error states are not resume targets
        assert!(!OnboardingState::Idle.is_resumable());
        assert!(!OnboardingState::WaitingForTargetAnnounce.is_resumable());
    }

    #[test]
    fn test_abortable_states() {
        for state in [
            OnboardingState::Idle,
            OnboardingState::Aborting,
            OnboardingState::ConnectingToTargetWifiAp,
            OnboardingState::TargetAnnouncementReceived,
            OnboardingState::ConfiguringOnboardee,
            OnboardingState::ConfiguringOnboardeeWithSignal,
        ] {
            assert!(!state.is_abortable(), "{state} must not be abortable");
        }
        for state in [
            OnboardingState::ConnectingToOnboardee,
            OnboardingState::WaitingForOnboardeeAnnouncement,
            OnboardingState::JoiningSession,
            OnboardingState::ErrorConnectingToOnboardee,
            OnboardingState::ErrorWaitingForTargetAnnounce,
        ] {
            assert!(state.is_abortable(), "{state} must be abortable");
        }
    }
}
