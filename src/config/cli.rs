//! Command-line argument parsing

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[clap(name = "wifi-onboarding", version, author)]
#[clap(about = "Wi-Fi onboarding state machine dry-run simulator")]
pub struct CliArgs {
    /// SSID of the onboardee device's own access point
    #[clap(long, default_value = "AJ_SmartLamp")]
    pub onboardee_ssid: String,

    /// Password of the onboardee access point
    #[clap(long)]
    pub onboardee_password: Option<String>,

    /// Authentication type of the onboardee access point (open, wep, wpa, wpa2)
    #[clap(long, default_value = "open")]
    pub onboardee_auth: String,

    /// SSID of the target network the device should join
    #[clap(long, default_value = "HomeNet")]
    pub target_ssid: String,

    /// Password of the target network
    #[clap(long, default_value = "home-pass")]
    pub target_password: Option<String>,

    /// Authentication type of the target network (open, wep, wpa, wpa2)
    #[clap(long, default_value = "wpa2")]
    pub target_auth: String,

    /// Network the host is connected to before onboarding starts
    #[clap(long)]
    pub current_network: Option<String>,

    /// Wi-Fi connection timeout in seconds (both phases)
    #[clap(long, default_value = "20")]
    pub wifi_timeout_secs: u64,

    /// Announcement wait timeout in seconds (both phases)
    #[clap(long, default_value = "25")]
    pub announcement_timeout_secs: u64,

    /// Simulate a peer that validates credentials via a deferred signal
    #[clap(long)]
    pub two_phase: bool,

    /// Offboard the device again once onboarding has completed
    #[clap(long)]
    pub offboard_after: bool,
}
