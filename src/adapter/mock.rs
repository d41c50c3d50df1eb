//! Mock adapters for testing and dry runs

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::debug;

use crate::adapter::network::{
    ConnectRequest, NetworkAdapter, NetworkEvent, WifiError, WifiResult,
};
use crate::adapter::session::{ConfigureAck, SessionAdapter, SessionError, SessionResult};
use crate::core::machine::OnboardingHandle;
use crate::core::types::{AuthType, WifiNetwork};

/// How a mock access point answers a connection attempt
#[derive(Debug, Clone)]
enum ApBehavior {
    /// Accept any request; a required password of `Some(p)` rejects other
    /// passwords with an auth failure
    Accept { password: Option<String> },
    /// Never answer; the attempt stays pending forever
    Hold,
}

/// Internal state for the mock network adapter
struct NetworkState {
    networks: HashMap<String, ApBehavior>,
    current: Option<String>,
    scan_results: Vec<WifiNetwork>,
    should_fail_scan: bool,
    handle: Option<OnboardingHandle>,
    event_delay: Duration,
    connect_log: Vec<String>,
    enabled_all: bool,
}

/// Mock Wi-Fi adapter
///
/// Simulates a set of access points and delivers connection outcomes back to
/// the state machine through the bound [`OnboardingHandle`], after a short
/// configurable delay.
#[derive(Clone)]
pub struct MockNetworkAdapter {
    inner: Arc<Mutex<NetworkState>>,
}

impl MockNetworkAdapter {
    /// Create a mock with no visible access points
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(NetworkState {
                networks: HashMap::new(),
                current: None,
                scan_results: vec![],
                should_fail_scan: false,
                handle: None,
                event_delay: Duration::from_millis(5),
                connect_log: vec![],
                enabled_all: false,
            })),
        }
    }

    /// Bind the handle that receives outcome events
    pub async fn bind(&self, handle: OnboardingHandle) {
        self.inner.lock().await.handle = Some(handle);
    }

    /// Add an access point; a `Some` password is required for connecting
    pub async fn set_network(&self, ssid: &str, password: Option<&str>) {
        self.inner.lock().await.networks.insert(
            ssid.to_string(),
            ApBehavior::Accept {
                password: password.map(str::to_string),
            },
        );
    }

    /// Add an access point that never answers connection attempts
    pub async fn set_hold(&self, ssid: &str) {
        self.inner
            .lock()
            .await
            .networks
            .insert(ssid.to_string(), ApBehavior::Hold);
    }

    /// Pretend the host is already connected to this network
    pub async fn set_current(&self, ssid: &str) {
        let mut state = self.inner.lock().await;
        state.current = Some(ssid.to_string());
        state
            .networks
            .entry(ssid.to_string())
            .or_insert(ApBehavior::Accept { password: None });
    }

    /// How long outcome delivery takes after a connection attempt
    pub async fn set_event_delay(&self, delay: Duration) {
        self.inner.lock().await.event_delay = delay;
    }

    /// Configure networks returned by [`NetworkAdapter::scan`]
    pub async fn set_scan_results(&self, networks: Vec<WifiNetwork>) {
        self.inner.lock().await.scan_results = networks;
    }

    /// Configure scan operations to fail
    pub async fn set_scan_failure(&self, should_fail: bool) {
        self.inner.lock().await.should_fail_scan = should_fail;
    }

    /// SSIDs of every connection attempt seen so far, in order
    pub async fn connect_log(&self) -> Vec<String> {
        self.inner.lock().await.connect_log.clone()
    }

    /// Whether known networks were re-enabled after the flow finished
    pub async fn all_networks_enabled(&self) -> bool {
        self.inner.lock().await.enabled_all
    }

    /// Decide the outcome of an attempt and deliver it after the delay
    async fn attempt(&self, ssid: String, password: Option<String>) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let (event, delay, handle) = {
                let state = inner.lock().await;
                let event = match state.networks.get(&ssid) {
                    Some(ApBehavior::Hold) => return,
                    Some(ApBehavior::Accept { password: required }) => match required {
                        Some(required) if password.as_deref() != Some(required.as_str()) => {
                            Some(NetworkEvent::AuthFailure { ssid: ssid.clone() })
                        }
                        _ => Some(NetworkEvent::Connected { ssid: ssid.clone() }),
                    },
                    None => Some(NetworkEvent::Timeout { ssid: ssid.clone() }),
                };
                (event, state.event_delay, state.handle.clone())
            };
            let Some(event) = event else { return };
            tokio::time::sleep(delay).await;
            if matches!(event, NetworkEvent::Connected { .. }) {
                inner.lock().await.current = Some(ssid);
            }
            if let Some(handle) = handle {
                handle.network_event(event);
            }
        });
    }
}

impl Default for MockNetworkAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkAdapter for MockNetworkAdapter {
    async fn connect(&self, request: ConnectRequest) {
        debug!("mock: connect to '{}'", request.ssid);
        self.inner
            .lock()
            .await
            .connect_log
            .push(request.ssid.clone());
        self.attempt(request.ssid, request.password).await;
    }

    async fn reconnect(&self, ssid: &str, _timeout: Duration) {
        debug!("mock: reconnect to '{ssid}'");
        let (known, password) = {
            let mut state = self.inner.lock().await;
            state.connect_log.push(ssid.to_string());
            match state.networks.get(ssid) {
                Some(ApBehavior::Accept { password }) => (true, password.clone()),
                _ => (false, None),
            }
        };
        // a known network reconnects with its stored credentials
        let password = if known { password } else { None };
        self.attempt(ssid.to_string(), password).await;
    }

    async fn disconnect(&self) {
        self.inner.lock().await.current = None;
    }

    async fn forget(&self, ssid: &str) {
        debug!("mock: forget '{ssid}'");
        let mut state = self.inner.lock().await;
        state.networks.remove(ssid);
        if state.current.as_deref() == Some(ssid) {
            state.current = None;
        }
    }

    async fn enable_all_known_networks(&self) {
        self.inner.lock().await.enabled_all = true;
    }

    async fn current_network(&self) -> Option<String> {
        self.inner.lock().await.current.clone()
    }

    async fn scan(&self) -> WifiResult<Vec<WifiNetwork>> {
        let state = self.inner.lock().await;
        if state.should_fail_scan {
            Err(WifiError::ScanFailed("mock scan failure".into()))
        } else {
            Ok(state.scan_results.clone())
        }
    }
}

/// Internal state for the mock session adapter
struct SessionState {
    connect_result: SessionResult<()>,
    connect_delay: Duration,
    ack: ConfigureAck,
    push_result: SessionResult<()>,
    apply_result: SessionResult<()>,
    offboard_result: SessionResult<()>,
    pushed: Option<(String, String, AuthType)>,
    connected: bool,
    apply_count: usize,
    offboard_count: usize,
}

/// Mock peer session
///
/// Scripts the peer's side of the onboarding protocol: session establishment,
/// credential acknowledgement mode and failure injection.
#[derive(Clone)]
pub struct MockSessionAdapter {
    inner: Arc<Mutex<SessionState>>,
}

impl MockSessionAdapter {
    /// Create a cooperative peer that acks credentials immediately
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(SessionState {
                connect_result: Ok(()),
                connect_delay: Duration::from_millis(5),
                ack: ConfigureAck::AppliedImmediately,
                push_result: Ok(()),
                apply_result: Ok(()),
                offboard_result: Ok(()),
                pushed: None,
                connected: false,
                apply_count: 0,
                offboard_count: 0,
            })),
        }
    }

    /// Script the outcome of session establishment
    pub async fn set_connect_result(&self, result: SessionResult<()>) {
        self.inner.lock().await.connect_result = result;
    }

    /// How long session establishment takes
    pub async fn set_connect_delay(&self, delay: Duration) {
        self.inner.lock().await.connect_delay = delay;
    }

    /// How the peer acknowledges a credential push
    pub async fn set_ack(&self, ack: ConfigureAck) {
        self.inner.lock().await.ack = ack;
    }

    /// Make credential pushes fail
    pub async fn set_push_result(&self, result: SessionResult<()>) {
        self.inner.lock().await.push_result = result;
    }

    /// Make offboarding fail
    pub async fn set_offboard_result(&self, result: SessionResult<()>) {
        self.inner.lock().await.offboard_result = result;
    }

    /// The last credentials the machine pushed, if any
    pub async fn pushed_credentials(&self) -> Option<(String, String, AuthType)> {
        self.inner.lock().await.pushed.clone()
    }

    /// How often `apply_credentials` ran
    pub async fn apply_count(&self) -> usize {
        self.inner.lock().await.apply_count
    }

    /// How often `offboard` ran
    pub async fn offboard_count(&self) -> usize {
        self.inner.lock().await.offboard_count
    }

    /// Whether a session is currently established
    pub async fn is_connected(&self) -> bool {
        self.inner.lock().await.connected
    }
}

impl Default for MockSessionAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionAdapter for MockSessionAdapter {
    async fn connect_session(&self, service_address: &str, port: u16) -> SessionResult<()> {
        debug!("mock: session to {service_address}:{port}");
        let (delay, result) = {
            let state = self.inner.lock().await;
            (state.connect_delay, state.connect_result.clone())
        };
        tokio::time::sleep(delay).await;
        if result.is_ok() {
            self.inner.lock().await.connected = true;
        }
        result
    }

    async fn push_target_credentials(
        &self,
        ssid: &str,
        password: &str,
        auth_type: AuthType,
    ) -> SessionResult<ConfigureAck> {
        let mut state = self.inner.lock().await;
        if !state.connected {
            return Err(SessionError::Failed("no session established".into()));
        }
        state.pushed = Some((ssid.to_string(), password.to_string(), auth_type));
        state.push_result.clone().map(|()| state.ack)
    }

    async fn apply_credentials(&self) -> SessionResult<()> {
        let mut state = self.inner.lock().await;
        state.apply_count += 1;
        state.apply_result.clone()
    }

    async fn disconnect_session(&self) {
        self.inner.lock().await.connected = false;
    }

    async fn offboard(&self) -> SessionResult<()> {
        let mut state = self.inner.lock().await;
        if !state.connected {
            return Err(SessionError::Failed("no session established".into()));
        }
        state.offboard_count += 1;
        state.offboard_result.clone()
    }
}
