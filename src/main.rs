//! Wi-Fi Onboarding Service - dry-run simulator
//!
//! Runs the onboarding state machine against mock adapters and plays the
//! onboardee's part itself: it answers announcement waits and, in two-phase
//! mode, the deferred configure signal. Useful for watching the workflow
//! without radio hardware.

use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;
use wifi_onboarding_service::{
    adapter::{
        session::{ConfigureAck, ConnectionResult},
        MockNetworkAdapter, MockSessionAdapter,
    },
    config::{CliArgs, Settings},
    core::announcement::{
        AnnouncementEvent, CapabilityDescriptor, METADATA_APP_ID, METADATA_DEVICE_ID,
        ONBOARDING_INTERFACE,
    },
    core::machine::OnboardingMachine,
    Notification, OffboardingConfiguration, OnboardingState,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,wifi_onboarding_service=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = CliArgs::parse();
    info!(?args, "Starting Wi-Fi onboarding dry run");
    let settings = Settings::from(args);

    // Simulated radio environment: both access points are visible
    let wifi = Arc::new(MockNetworkAdapter::new());
    wifi.set_network(
        &settings.onboarding.onboardee.ssid,
        settings.onboarding.onboardee.password.as_deref(),
    )
    .await;
    wifi.set_network(
        &settings.onboarding.target.ssid,
        settings.onboarding.target.password.as_deref(),
    )
    .await;
    if let Some(ssid) = &settings.current_network {
        wifi.set_current(ssid).await;
        info!("host starts connected to '{ssid}'");
    }

    let session = Arc::new(MockSessionAdapter::new());
    if settings.two_phase {
        session.set_ack(ConfigureAck::AppliedAfterSignal).await;
        info!("simulated peer validates credentials via a deferred signal");
    }

    let (handle, mut notifications) = OnboardingMachine::spawn(wifi.clone(), session.clone());
    wifi.bind(handle.clone()).await;

    // Identity of the simulated onboardee
    let app_id = Uuid::new_v4();
    let device_id = "simulated-device-1";

    handle.start(settings.onboarding.clone()).await?;

    let driver = async {
        while let Some(notification) = notifications.recv().await {
            match notification {
                Notification::StateChanged(state) => {
                    info!("state: {state}");
                    match state {
                        OnboardingState::WaitingForOnboardeeAnnouncement
                        | OnboardingState::WaitingForTargetAnnounce => {
                            handle.announcement(announcement(app_id, device_id));
                        }
                        OnboardingState::ConfiguringOnboardeeWithSignal => {
                            handle.connection_result(ConnectionResult::Validated);
                        }
                        OnboardingState::Idle => return Ok(()),
                        _ => {}
                    }
                }
                Notification::Error(kind) => {
                    warn!("onboarding error: {kind}");
                }
            }
        }
        Err("notification channel closed unexpectedly")
    };

    tokio::select! {
        result = driver => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received SIGINT (Ctrl+C), shutting down");
            return Ok(());
        }
    }

    info!(
        "onboarding finished; host network: {:?}",
        handle.current_network().await?
    );

    if settings.offboard_after {
        info!("offboarding the device again");
        let config = OffboardingConfiguration {
            service_address: ":device.1".into(),
            port: 1080,
        };
        if let Err(e) = handle.run_offboarding(config).await {
            error!("offboarding rejected: {e}");
        }
    }

    Ok(())
}

/// Announcement the simulated onboardee would broadcast
fn announcement(app_id: Uuid, device_id: &str) -> AnnouncementEvent {
    let mut metadata = serde_json::Map::new();
    metadata.insert(
        METADATA_APP_ID.into(),
        serde_json::Value::String(app_id.to_string()),
    );
    metadata.insert(
        METADATA_DEVICE_ID.into(),
        serde_json::Value::String(device_id.to_string()),
    );
    AnnouncementEvent {
        service_address: ":device.1".into(),
        port: 1080,
        capabilities: vec![CapabilityDescriptor {
            path: "/Onboarding".into(),
            interfaces: vec![ONBOARDING_INTERFACE.into()],
        }],
        metadata,
    }
}
