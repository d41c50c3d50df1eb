//! Runtime settings

use std::time::Duration;

use crate::config::CliArgs;
use crate::core::types::{AuthType, NetworkDescriptor, OnboardingConfiguration};

/// Runtime configuration derived from the command line
#[derive(Debug, Clone)]
pub struct Settings {
    pub onboarding: OnboardingConfiguration,
    pub current_network: Option<String>,
    pub two_phase: bool,
    pub offboard_after: bool,
}

impl From<CliArgs> for Settings {
    fn from(args: CliArgs) -> Self {
        let onboardee = descriptor(
            &args.onboardee_ssid,
            &args.onboardee_auth,
            args.onboardee_password.as_deref(),
        );
        let target = descriptor(
            &args.target_ssid,
            &args.target_auth,
            args.target_password.as_deref(),
        );

        let mut onboarding = OnboardingConfiguration::new(onboardee, target);
        onboarding.onboardee_connection_timeout = Duration::from_secs(args.wifi_timeout_secs);
        onboarding.target_connection_timeout = Duration::from_secs(args.wifi_timeout_secs);
        onboarding.onboardee_announcement_timeout =
            Duration::from_secs(args.announcement_timeout_secs);
        onboarding.target_announcement_timeout =
            Duration::from_secs(args.announcement_timeout_secs);

        Settings {
            onboarding,
            current_network: args.current_network,
            two_phase: args.two_phase,
            offboard_after: args.offboard_after,
        }
    }
}

fn descriptor(ssid: &str, auth: &str, password: Option<&str>) -> NetworkDescriptor {
    let auth_type = parse_auth(auth);
    match (auth_type, password) {
        (AuthType::Open, _) => NetworkDescriptor::open(ssid),
        (auth_type, Some(password)) => NetworkDescriptor::protected(ssid, auth_type, password),
        // validation rejects this later with a proper message
        (auth_type, None) => NetworkDescriptor {
            ssid: ssid.to_string(),
            auth_type,
            password: None,
            hidden: false,
        },
    }
}

fn parse_auth(value: &str) -> AuthType {
    match value.to_ascii_lowercase().as_str() {
        "wep" => AuthType::Wep,
        "wpa" => AuthType::Wpa,
        "wpa2" => AuthType::Wpa2,
        _ => AuthType::Open,
    }
}
