//! Onboarding state machine
//!
//! Drives a peer device through the two-network handoff: connect to the
//! onboardee's own access point, discover it via an announcement, push the
//! target network credentials over a session, reconnect the host to the
//! target network and verify the onboardee shows up there.
//!
//! All transitions are funneled through one mailbox consumed by a single
//! worker task, so no two transitions ever execute concurrently. External
//! callbacks (announcements, Wi-Fi outcomes, timer firings) are producers
//! that post into the mailbox; they never touch state directly. Queued
//! transitions and timer firings carry the epoch current when they were
//! posted and are dropped if the machine has moved on since.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::{
    adapter::{
        network::{ConnectRequest, NetworkAdapter, NetworkEvent},
        session::{ConfigureAck, ConnectionResult, SessionAdapter, SessionError},
    },
    core::{
        announcement::{AnnouncementEvent, DeviceIdentity, ONBOARDING_INTERFACE},
        error::{ErrorKind, ServiceError, ServiceResult},
        state::OnboardingState,
        types::{
            check_wep_password, AuthType, NetworkDescriptor, OffboardingConfiguration,
            OnboardingConfiguration, DEFAULT_WIFI_CONNECTION_TIMEOUT,
        },
    },
};

/// Default timeout for the deferred-ack configure signal (30 s).
pub const DEFAULT_CONFIGURE_SIGNAL_TIMEOUT: Duration = Duration::from_secs(30);

/// Outward notifications emitted by the state machine
///
/// The only caller-visible channel for asynchronous progress and failures;
/// any further dispatch (UI, persistence, ...) is the caller's business.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// The machine entered a new state
    StateChanged(OnboardingState),
    /// A phase failed; the matching error state follows
    Error(ErrorKind),
}

/// Messages consumed by the state machine worker
enum Msg {
    Start {
        config: Box<OnboardingConfiguration>,
        reply: oneshot::Sender<ServiceResult<()>>,
    },
    Abort {
        reply: oneshot::Sender<ServiceResult<()>>,
    },
    Offboard {
        config: OffboardingConfiguration,
        reply: oneshot::Sender<ServiceResult<()>>,
    },
    Announcement(AnnouncementEvent),
    Network(NetworkEvent),
    ConnectionResult(ConnectionResult),
    Transition {
        state: OnboardingState,
        announcement: Option<AnnouncementEvent>,
        epoch: u64,
    },
    AnnouncementTimeout {
        epoch: u64,
    },
    SignalTimeout {
        epoch: u64,
    },
    GetState {
        reply: oneshot::Sender<OnboardingState>,
    },
    CurrentNetwork {
        reply: oneshot::Sender<Option<String>>,
    },
}

/// Cloneable handle to a spawned [`OnboardingMachine`]
///
/// `start`, `abort` and `run_offboarding` round-trip through the worker and
/// report caller misuse synchronously; the event methods are fire-and-forget
/// producers for the worker's mailbox.
#[derive(Clone)]
pub struct OnboardingHandle {
    tx: mpsc::UnboundedSender<Msg>,
}

impl OnboardingHandle {
    /// Start or resume the onboarding workflow
    pub async fn start(&self, config: OnboardingConfiguration) -> ServiceResult<()> {
        self.request(|reply| Msg::Start {
            config: Box::new(config),
            reply,
        })
        .await?
    }

    /// Abort the workflow and roll back to the original network (best effort)
    pub async fn abort(&self) -> ServiceResult<()> {
        self.request(|reply| Msg::Abort { reply }).await?
    }

    /// Offboard a peer on the current network; only valid while idle
    pub async fn run_offboarding(&self, config: OffboardingConfiguration) -> ServiceResult<()> {
        self.request(|reply| Msg::Offboard { config, reply }).await?
    }

    /// Deliver a discovery announcement
    pub fn announcement(&self, event: AnnouncementEvent) {
        let _ = self.tx.send(Msg::Announcement(event));
    }

    /// Deliver the outcome of a Wi-Fi connect request
    pub fn network_event(&self, event: NetworkEvent) {
        let _ = self.tx.send(Msg::Network(event));
    }

    /// Deliver the peer's deferred-ack configure signal
    pub fn connection_result(&self, result: ConnectionResult) {
        let _ = self.tx.send(Msg::ConnectionResult(result));
    }

    /// Current state of the machine
    pub async fn state(&self) -> ServiceResult<OnboardingState> {
        self.request(|reply| Msg::GetState { reply }).await
    }

    /// SSID the host is currently connected to, if any
    pub async fn current_network(&self) -> ServiceResult<Option<String>> {
        self.request(|reply| Msg::CurrentNetwork { reply }).await
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Msg,
    ) -> ServiceResult<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .map_err(|_| ServiceError::WorkerGone)?;
        reply_rx.await.map_err(|_| ServiceError::WorkerGone)
    }
}

/// Identity and announcement of the device being onboarded
struct DeviceRecord {
    identity: DeviceIdentity,
    announcement: AnnouncementEvent,
}

/// The onboarding state machine worker
///
/// Owned by the task spawned in [`OnboardingMachine::spawn`]; callers interact
/// exclusively through the returned [`OnboardingHandle`] and notification
/// receiver.
pub struct OnboardingMachine<W, S> {
    wifi: Arc<W>,
    session: Arc<S>,
    /// Weak so the worker's own posts do not keep the mailbox open; the
    /// worker exits once every [`OnboardingHandle`] is gone.
    tx: mpsc::WeakUnboundedSender<Msg>,
    rx: mpsc::UnboundedReceiver<Msg>,
    notify: mpsc::UnboundedSender<Notification>,
    signal_timeout: Duration,

    state: OnboardingState,
    config: Option<OnboardingConfiguration>,
    original_network: Option<String>,
    device: Option<DeviceRecord>,
    /// Bumped on every state change; stale queued transitions and timer
    /// firings are dropped by comparing against it.
    epoch: u64,
    /// Announcements are only consumed while this is set.
    listening: bool,
    /// At-most-once consumption of Wi-Fi outcomes per connect phase.
    wifi_armed: bool,
    /// At-most-once consumption of the deferred-ack configure signal.
    signal_armed: bool,
    announce_timer: Option<JoinHandle<()>>,
    signal_timer: Option<JoinHandle<()>>,
}

impl<W: NetworkAdapter, S: SessionAdapter> OnboardingMachine<W, S> {
    /// Spawn the state machine worker
    ///
    /// Returns the handle and the notification receiver. The worker exits
    /// when every handle has been dropped.
    pub fn spawn(
        wifi: Arc<W>,
        session: Arc<S>,
    ) -> (OnboardingHandle, mpsc::UnboundedReceiver<Notification>) {
        Self::spawn_with_signal_timeout(wifi, session, DEFAULT_CONFIGURE_SIGNAL_TIMEOUT)
    }

    /// Spawn with a non-default deferred-ack signal timeout
    pub fn spawn_with_signal_timeout(
        wifi: Arc<W>,
        session: Arc<S>,
        signal_timeout: Duration,
    ) -> (OnboardingHandle, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        let machine = Self {
            wifi,
            session,
            tx: tx.downgrade(),
            rx,
            notify: notify_tx,
            signal_timeout,
            state: OnboardingState::Idle,
            config: None,
            original_network: None,
            device: None,
            epoch: 0,
            listening: false,
            wifi_armed: false,
            signal_armed: false,
            announce_timer: None,
            signal_timer: None,
        };
        tokio::spawn(machine.run());
        (OnboardingHandle { tx }, notify_rx)
    }

    async fn run(mut self) {
        debug!("onboarding state machine worker started");
        while let Some(msg) = self.rx.recv().await {
            self.handle(msg).await;
        }
        self.cancel_announce_timer();
        self.cancel_signal_timer();
        debug!("onboarding state machine worker stopped");
    }

    async fn handle(&mut self, msg: Msg) {
        match msg {
            Msg::Start { config, reply } => {
                let _ = reply.send(self.handle_start(*config).await);
            }
            Msg::Abort { reply } => {
                let result = self.begin_abort();
                let accepted = result.is_ok();
                let _ = reply.send(result);
                if accepted {
                    self.perform_abort_cleanup().await;
                }
            }
            Msg::Offboard { config, reply } => self.handle_offboard(config, reply).await,
            Msg::Announcement(event) => self.handle_announcement(event),
            Msg::Network(event) => self.handle_network_event(event).await,
            Msg::ConnectionResult(result) => self.handle_connection_result(result).await,
            Msg::Transition {
                state,
                announcement,
                epoch,
            } => {
                if epoch != self.epoch {
                    debug!("dropping stale transition to {state} (epoch {epoch})");
                    return;
                }
                self.enter(state, announcement).await;
            }
            Msg::AnnouncementTimeout { epoch } => self.handle_announcement_timeout(epoch),
            Msg::SignalTimeout { epoch } => self.handle_signal_timeout(epoch),
            Msg::GetState { reply } => {
                let _ = reply.send(self.state);
            }
            Msg::CurrentNetwork { reply } => {
                let _ = reply.send(self.wifi.current_network().await);
            }
        }
    }

    async fn handle_start(&mut self, config: OnboardingConfiguration) -> ServiceResult<()> {
        config
            .validate()
            .map_err(ServiceError::InvalidConfiguration)?;

        match self.state {
            OnboardingState::Idle => {
                info!(
                    "starting onboarding: onboardee '{}' -> target '{}'",
                    config.onboardee.ssid, config.target.ssid
                );
                self.config = Some(config);
                self.device = None;
                self.listening = true;
                self.original_network = self.wifi.current_network().await;
                if let Some(ssid) = &self.original_network {
                    debug!("captured original network '{ssid}' for rollback");
                }
                self.enter(OnboardingState::ConnectingToOnboardee, None).await;
                Ok(())
            }
            state if state.is_resumable() => {
                info!("resuming onboarding from {state}");
                self.config = Some(config);
                self.listening = true;
                let (resume, announcement) = self.resume_target(state);
                self.enter(resume, announcement).await;
                Ok(())
            }
            state => Err(ServiceError::AlreadyRunning(state)),
        }
    }

    /// Map a resumable error state to the phase that re-runs it
    fn resume_target(
        &self,
        state: OnboardingState,
    ) -> (OnboardingState, Option<AnnouncementEvent>) {
        match state {
            OnboardingState::ErrorConnectingToOnboardee => {
                (OnboardingState::ConnectingToOnboardee, None)
            }
            OnboardingState::ErrorWaitingForOnboardeeAnnouncement => {
                (OnboardingState::WaitingForOnboardeeAnnouncement, None)
            }
            OnboardingState::ErrorOnboardeeAnnouncementReceivedAfterTimeout
            | OnboardingState::ErrorJoiningSession => match &self.device {
                Some(record) => (
                    OnboardingState::JoiningSession,
                    Some(record.announcement.clone()),
                ),
                // the announcement never made it into the record; start over
                None => (OnboardingState::ConnectingToOnboardee, None),
            },
            OnboardingState::ErrorConfiguringOnboardee => {
                (OnboardingState::ConfiguringOnboardee, None)
            }
            OnboardingState::ErrorWaitingForConfigureSignal => {
                (OnboardingState::ConfiguringOnboardeeWithSignal, None)
            }
            OnboardingState::ErrorConnectingToTargetWifiAp => {
                (OnboardingState::ConnectingToTargetWifiAp, None)
            }
            OnboardingState::ErrorWaitingForTargetAnnounce => {
                (OnboardingState::WaitingForTargetAnnounce, None)
            }
            OnboardingState::ErrorTargetAnnouncementReceivedAfterTimeout => (
                OnboardingState::TargetAnnouncementReceived,
                self.device.as_ref().map(|record| record.announcement.clone()),
            ),
            // is_resumable() rules everything else out
            _ => (OnboardingState::ConnectingToOnboardee, None),
        }
    }

    /// Synchronous part of abort: reject or commit the `Aborting` transition
    fn begin_abort(&mut self) -> ServiceResult<()> {
        if !self.state.is_abortable() {
            return Err(ServiceError::CannotAbort(self.state));
        }
        info!("aborting onboarding from {}", self.state);
        self.set_state(OnboardingState::Aborting);
        self.cancel_announce_timer();
        self.cancel_signal_timer();
        self.wifi_armed = false;
        self.signal_armed = false;
        self.listening = false;
        Ok(())
    }

    /// Asynchronous part of abort: local cleanup and best-effort rollback
    ///
    /// The peer is not restored; only the host attempts to return to the
    /// network captured when the workflow started.
    async fn perform_abort_cleanup(&mut self) {
        self.session.disconnect_session().await;
        if let Some(config) = &self.config {
            self.wifi.forget(&config.onboardee.ssid).await;
        }
        match self.original_network.clone() {
            Some(ssid) => {
                debug!("rolling back to original network '{ssid}'");
                self.wifi_armed = true;
                self.wifi
                    .reconnect(&ssid, DEFAULT_WIFI_CONNECTION_TIMEOUT)
                    .await;
                // completion arrives as a NetworkEvent in the Aborting state
            }
            None => {
                // nothing to restore; onboarding started without a connection
                self.finish_abort().await;
            }
        }
    }

    async fn finish_abort(&mut self) {
        self.wifi.enable_all_known_networks().await;
        self.set_state(OnboardingState::Idle);
        info!("abort completed");
    }

    async fn handle_offboard(
        &mut self,
        config: OffboardingConfiguration,
        reply: oneshot::Sender<ServiceResult<()>>,
    ) {
        if let Err(reason) = config.validate() {
            let _ = reply.send(Err(ServiceError::InvalidConfiguration(reason)));
            return;
        }
        if self.state != OnboardingState::Idle {
            let _ = reply.send(Err(ServiceError::AlreadyRunning(self.state)));
            return;
        }
        let _ = reply.send(Ok(()));

        info!(
            "offboarding peer at {}:{}",
            config.service_address, config.port
        );
        match self
            .session
            .connect_session(&config.service_address, config.port)
            .await
        {
            Ok(()) => {}
            Err(SessionError::Unreachable) => {
                warn!("offboarding: peer unreachable");
                self.notify_error(ErrorKind::SessionUnreachable);
                return;
            }
            Err(err) => {
                error!("offboarding: session establishment failed: {err}");
                self.notify_error(ErrorKind::SessionError);
                return;
            }
        }
        if let Err(err) = self.session.offboard().await {
            error!("offboarding failed: {err}");
            self.notify_error(ErrorKind::OffboardingFailed);
        } else {
            info!("offboarding completed");
        }
        self.session.disconnect_session().await;
    }

    fn handle_announcement(&mut self, event: AnnouncementEvent) {
        if !self.listening {
            debug!("announcement dropped: not listening");
            return;
        }
        if !announcement_sensitive(self.state) {
            debug!("announcement dropped in state {}", self.state);
            return;
        }

        let identity = match DeviceIdentity::try_from(&event) {
            Ok(identity) => identity,
            Err(reason) => {
                // treated as if it never arrived; the timeout covers it
                warn!("ignoring announcement with invalid metadata: {reason}");
                self.notify_error(ErrorKind::InvalidAnnouncementData);
                return;
            }
        };
        debug!(
            "announcement from {} (app {}) in state {}",
            event.service_address, identity.app_id, self.state
        );

        match self.state {
            OnboardingState::ConnectingToOnboardee
            | OnboardingState::WaitingForOnboardeeAnnouncement => {
                // an early announcement supersedes the pending connect wait
                if self.state == OnboardingState::ConnectingToOnboardee {
                    self.wifi_armed = false;
                }
                if event.supports(ONBOARDING_INTERFACE) {
                    self.post_transition(
                        OnboardingState::OnboardeeAnnouncementReceived,
                        Some(event),
                    );
                } else {
                    warn!(
                        "peer {} does not support the onboarding capability",
                        identity.app_id
                    );
                    self.notify_error(ErrorKind::UnsupportedCapability);
                    self.post_transition(OnboardingState::ErrorOnboardeeAnnouncementReceived, None);
                }
            }
            OnboardingState::ErrorWaitingForOnboardeeAnnouncement => {
                if event.supports(ONBOARDING_INTERFACE) {
                    self.post_transition(
                        OnboardingState::ErrorOnboardeeAnnouncementReceivedAfterTimeout,
                        Some(event),
                    );
                } else {
                    warn!(
                        "peer {} does not support the onboarding capability",
                        identity.app_id
                    );
                    self.notify_error(ErrorKind::UnsupportedCapability);
                    self.post_transition(OnboardingState::ErrorOnboardeeAnnouncementReceived, None);
                }
            }
            OnboardingState::ConnectingToTargetWifiAp
            | OnboardingState::WaitingForTargetAnnounce => {
                if self.state == OnboardingState::ConnectingToTargetWifiAp {
                    self.wifi_armed = false;
                }
                match &self.device {
                    Some(record) if record.identity.app_id == identity.app_id => {
                        self.post_transition(
                            OnboardingState::TargetAnnouncementReceived,
                            Some(event),
                        );
                    }
                    Some(record) => debug!(
                        "announcement from foreign device {} (expected {})",
                        identity.app_id, record.identity.app_id
                    ),
                    None => debug!("announcement dropped: no expected device identity"),
                }
            }
            OnboardingState::ErrorWaitingForTargetAnnounce => {
                if event.supports(ONBOARDING_INTERFACE) {
                    self.post_transition(
                        OnboardingState::ErrorTargetAnnouncementReceivedAfterTimeout,
                        Some(event),
                    );
                }
            }
            state => debug!("announcement dropped in state {state}"),
        }
    }

    async fn handle_network_event(&mut self, event: NetworkEvent) {
        if !self.wifi_armed {
            debug!("network event {event:?} dropped: no connect pending");
            return;
        }
        // Outcomes of an attempt this phase did not issue (e.g. queued before
        // an abort pre-empted the connect) must not be mistaken for the
        // pending one. Leave the listener armed for the real outcome.
        if let Some(expected) = self.pending_connect_ssid() {
            if event.ssid() != expected {
                debug!(
                    "network event {event:?} dropped: waiting for outcome of '{expected}'"
                );
                return;
            }
        }
        // at-most-once per phase: retire the listener before acting
        self.wifi_armed = false;

        match self.state {
            OnboardingState::ConnectingToOnboardee => match event {
                NetworkEvent::Connected { ssid } => {
                    debug!("connected to onboardee AP '{ssid}'");
                    self.post_transition(OnboardingState::WaitingForOnboardeeAnnouncement, None);
                }
                NetworkEvent::Timeout { .. } => {
                    self.notify_error(ErrorKind::OnboardeeWifiTimeout);
                    self.post_transition(OnboardingState::ErrorConnectingToOnboardee, None);
                }
                NetworkEvent::AuthFailure { .. } => {
                    self.notify_error(ErrorKind::OnboardeeWifiAuth);
                    self.post_transition(OnboardingState::ErrorConnectingToOnboardee, None);
                }
            },
            OnboardingState::ConnectingToTargetWifiAp => match event {
                NetworkEvent::Connected { ssid } => {
                    debug!("connected to target AP '{ssid}'");
                    self.post_transition(OnboardingState::WaitingForTargetAnnounce, None);
                }
                NetworkEvent::Timeout { .. } => {
                    self.notify_error(ErrorKind::TargetWifiTimeout);
                    self.post_transition(OnboardingState::ErrorConnectingToTargetWifiAp, None);
                }
                NetworkEvent::AuthFailure { .. } => {
                    self.notify_error(ErrorKind::TargetWifiAuth);
                    self.post_transition(OnboardingState::ErrorConnectingToTargetWifiAp, None);
                }
            },
            OnboardingState::Aborting => {
                match event {
                    NetworkEvent::Connected { ssid } => {
                        debug!("rollback: reconnected to '{ssid}'");
                    }
                    NetworkEvent::Timeout { .. } => {
                        self.notify_error(ErrorKind::OriginalWifiTimeout);
                    }
                    NetworkEvent::AuthFailure { .. } => {
                        self.notify_error(ErrorKind::OriginalWifiAuth);
                    }
                }
                self.finish_abort().await;
            }
            state => debug!("network event {event:?} dropped in state {state}"),
        }
    }

    /// SSID of the connection attempt the current state is waiting on
    fn pending_connect_ssid(&self) -> Option<&str> {
        match self.state {
            OnboardingState::ConnectingToOnboardee => {
                self.config.as_ref().map(|config| config.onboardee.ssid.as_str())
            }
            OnboardingState::ConnectingToTargetWifiAp => {
                self.config.as_ref().map(|config| config.target.ssid.as_str())
            }
            OnboardingState::Aborting => self.original_network.as_deref(),
            _ => None,
        }
    }

    async fn handle_connection_result(&mut self, result: ConnectionResult) {
        if !self.signal_armed {
            debug!("connection result dropped: no configure signal pending");
            return;
        }
        self.signal_armed = false;
        self.cancel_signal_timer();

        if self.state != OnboardingState::ConfiguringOnboardeeWithSignal {
            debug!("connection result dropped in state {}", self.state);
            return;
        }
        match result {
            ConnectionResult::Validated => match self.session.apply_credentials().await {
                Ok(()) => {
                    self.post_transition(OnboardingState::ConnectingToTargetWifiAp, None);
                }
                Err(err) => {
                    error!("applying validated credentials failed: {err}");
                    self.notify_error(ErrorKind::ConfigurationRejected);
                    self.post_transition(OnboardingState::ErrorConfiguringOnboardee, None);
                }
            },
            ConnectionResult::Failed(reason) => {
                warn!("peer failed to validate credentials: {reason}");
                self.notify_error(ErrorKind::ConfigurationRejected);
                self.post_transition(OnboardingState::ErrorConfiguringOnboardee, None);
            }
        }
    }

    fn handle_announcement_timeout(&mut self, epoch: u64) {
        if epoch != self.epoch {
            debug!("dropping stale announcement timeout (epoch {epoch})");
            return;
        }
        self.announce_timer = None;
        match self.state {
            OnboardingState::WaitingForOnboardeeAnnouncement => {
                warn!("no announcement from onboardee before timeout");
                self.notify_error(ErrorKind::FindOnboardeeTimeout);
                self.set_state(OnboardingState::ErrorWaitingForOnboardeeAnnouncement);
            }
            OnboardingState::WaitingForTargetAnnounce => {
                warn!("no announcement from onboardee on target network before timeout");
                self.notify_error(ErrorKind::VerificationTimeout);
                self.set_state(OnboardingState::ErrorWaitingForTargetAnnounce);
            }
            state => debug!("announcement timeout dropped in state {state}"),
        }
    }

    fn handle_signal_timeout(&mut self, epoch: u64) {
        if epoch != self.epoch {
            debug!("dropping stale configure signal timeout (epoch {epoch})");
            return;
        }
        self.signal_timer = None;
        if self.state == OnboardingState::ConfiguringOnboardeeWithSignal && self.signal_armed {
            warn!("deferred-ack configure signal did not arrive before timeout");
            self.signal_armed = false;
            self.notify_error(ErrorKind::ConfigureSignalTimeout);
            self.set_state(OnboardingState::ErrorWaitingForConfigureSignal);
        }
    }

    /// Enter a state and run its entry actions
    async fn enter(&mut self, state: OnboardingState, data: Option<AnnouncementEvent>) {
        self.set_state(state);
        match state {
            OnboardingState::ConnectingToOnboardee => self.enter_connect_phase(true).await,
            OnboardingState::WaitingForOnboardeeAnnouncement => {
                let timeout = self
                    .config
                    .as_ref()
                    .map(|config| config.onboardee_announcement_timeout)
                    .unwrap_or(crate::core::types::DEFAULT_ANNOUNCEMENT_TIMEOUT);
                self.start_announcement_timer(timeout);
            }
            OnboardingState::OnboardeeAnnouncementReceived => {
                self.cancel_announce_timer();
                self.record_device(data, OnboardingState::ErrorWaitingForOnboardeeAnnouncement);
                if self.device.is_some() {
                    self.post_transition(OnboardingState::JoiningSession, None);
                }
            }
            OnboardingState::JoiningSession => self.enter_joining_session().await,
            OnboardingState::ConfiguringOnboardee => self.enter_configuring().await,
            OnboardingState::ConfiguringOnboardeeWithSignal => {
                self.signal_armed = true;
                self.start_signal_timer();
            }
            OnboardingState::ConnectingToTargetWifiAp => self.enter_connect_phase(false).await,
            OnboardingState::WaitingForTargetAnnounce => {
                let timeout = self
                    .config
                    .as_ref()
                    .map(|config| config.target_announcement_timeout)
                    .unwrap_or(crate::core::types::DEFAULT_ANNOUNCEMENT_TIMEOUT);
                self.start_announcement_timer(timeout);
            }
            OnboardingState::TargetAnnouncementReceived => self.enter_target_received(data).await,
            OnboardingState::ErrorOnboardeeAnnouncementReceivedAfterTimeout => {
                // keep the late announcement so start() can resume with it
                self.record_device(data, OnboardingState::ErrorWaitingForOnboardeeAnnouncement);
            }
            OnboardingState::ErrorTargetAnnouncementReceivedAfterTimeout => {
                self.record_device(data, OnboardingState::ErrorWaitingForTargetAnnounce);
            }
            // remaining states have no entry action
            _ => {}
        }
    }

    /// Issue the Wi-Fi connect request for the onboardee or target phase
    async fn enter_connect_phase(&mut self, onboardee: bool) {
        let Some(config) = &self.config else {
            error!("connect phase entered without a configuration");
            return;
        };
        let (network, timeout): (&NetworkDescriptor, Duration) = if onboardee {
            (&config.onboardee, config.onboardee_connection_timeout)
        } else {
            (&config.target, config.target_connection_timeout)
        };
        let request = ConnectRequest::new(network, timeout);
        debug!("requesting Wi-Fi connection to '{}'", request.ssid);
        self.wifi_armed = true;
        self.wifi.connect(request).await;
    }

    /// The one blocking phase: establish the session with the peer
    ///
    /// A queued abort cannot run until this returns; it is then applied
    /// before the follow-up transition posted here (the epoch bump performed
    /// by the abort drops that transition).
    async fn enter_joining_session(&mut self) {
        let Some(record) = &self.device else {
            error!("joining session without a discovered device");
            self.notify_error(ErrorKind::SessionError);
            self.set_state(OnboardingState::ErrorJoiningSession);
            return;
        };
        let address = record.announcement.service_address.clone();
        let port = record.announcement.port;
        debug!("joining session with {address}:{port}");
        match self.session.connect_session(&address, port).await {
            Ok(()) => {
                self.post_transition(OnboardingState::ConfiguringOnboardee, None);
            }
            Err(SessionError::Unreachable) => {
                warn!("peer unreachable while joining session");
                self.notify_error(ErrorKind::SessionUnreachable);
                self.post_transition(OnboardingState::ErrorJoiningSession, None);
            }
            Err(err) => {
                error!("session establishment failed: {err}");
                self.notify_error(ErrorKind::SessionError);
                self.post_transition(OnboardingState::ErrorJoiningSession, None);
            }
        }
    }

    /// Push the target credentials to the peer over the session
    async fn enter_configuring(&mut self) {
        let Some(config) = &self.config else {
            error!("configuring phase entered without a configuration");
            return;
        };
        let target = config.target.clone();
        let password = credential_password(&target);
        match self
            .session
            .push_target_credentials(&target.ssid, &password, target.auth_type)
            .await
        {
            Ok(ConfigureAck::AppliedImmediately) => match self.session.apply_credentials().await {
                Ok(()) => {
                    debug!("peer accepted target credentials");
                    self.post_transition(OnboardingState::ConnectingToTargetWifiAp, None);
                }
                Err(err) => {
                    error!("peer failed to apply credentials: {err}");
                    self.notify_error(ErrorKind::ConfigurationRejected);
                    self.post_transition(OnboardingState::ErrorConfiguringOnboardee, None);
                }
            },
            Ok(ConfigureAck::AppliedAfterSignal) => {
                debug!("peer defers credential validation to a signal");
                self.post_transition(OnboardingState::ConfiguringOnboardeeWithSignal, None);
            }
            Err(err) => {
                warn!("peer rejected target credentials: {err}");
                self.notify_error(ErrorKind::ConfigurationRejected);
                self.post_transition(OnboardingState::ErrorConfiguringOnboardee, None);
            }
        }
    }

    /// Terminal success: the onboardee announced itself on the target network
    async fn enter_target_received(&mut self, data: Option<AnnouncementEvent>) {
        self.cancel_announce_timer();
        if let Some(event) = data {
            // refresh the record from the verifying announcement
            match DeviceIdentity::try_from(&event) {
                Ok(identity) => {
                    self.device = Some(DeviceRecord {
                        identity,
                        announcement: event,
                    });
                }
                Err(reason) => warn!("could not refresh device identity: {reason}"),
            }
        }
        if let Some(record) = &self.device {
            info!(
                "onboarding verified: device {} ({}) joined the target network",
                record.identity.app_id, record.identity.device_id
            );
        }
        self.listening = false;
        self.session.disconnect_session().await;
        self.wifi.enable_all_known_networks().await;
        self.set_state(OnboardingState::Idle);
    }

    /// Extract and store the device record from an announcement payload
    ///
    /// On malformed metadata the machine falls back to the given waiting
    /// error state, as if the announcement had never arrived.
    fn record_device(&mut self, data: Option<AnnouncementEvent>, fallback: OnboardingState) {
        let Some(event) = data else {
            error!("announcement payload missing for {}", self.state);
            self.set_state(fallback);
            return;
        };
        match DeviceIdentity::try_from(&event) {
            Ok(identity) => {
                debug!(
                    "expecting device {} ({})",
                    identity.app_id, identity.device_id
                );
                self.device = Some(DeviceRecord {
                    identity,
                    announcement: event,
                });
            }
            Err(reason) => {
                warn!("announcement metadata invalid: {reason}");
                self.notify_error(ErrorKind::InvalidAnnouncementData);
                self.set_state(fallback);
            }
        }
    }

    fn set_state(&mut self, state: OnboardingState) {
        debug!("state {} -> {state}", self.state);
        self.state = state;
        self.epoch += 1;
        self.notify(Notification::StateChanged(state));
    }

    fn post_transition(&self, state: OnboardingState, announcement: Option<AnnouncementEvent>) {
        if let Some(tx) = self.tx.upgrade() {
            let _ = tx.send(Msg::Transition {
                state,
                announcement,
                epoch: self.epoch,
            });
        }
    }

    fn start_announcement_timer(&mut self, timeout: Duration) {
        self.cancel_announce_timer();
        let tx = self.tx.clone();
        let epoch = self.epoch;
        self.announce_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(tx) = tx.upgrade() {
                let _ = tx.send(Msg::AnnouncementTimeout { epoch });
            }
        }));
    }

    fn start_signal_timer(&mut self) {
        self.cancel_signal_timer();
        let tx = self.tx.clone();
        let epoch = self.epoch;
        let timeout = self.signal_timeout;
        self.signal_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(tx) = tx.upgrade() {
                let _ = tx.send(Msg::SignalTimeout { epoch });
            }
        }));
    }

    fn cancel_announce_timer(&mut self) {
        if let Some(timer) = self.announce_timer.take() {
            timer.abort();
        }
    }

    fn cancel_signal_timer(&mut self) {
        if let Some(timer) = self.signal_timer.take() {
            timer.abort();
        }
    }

    fn notify_error(&self, kind: ErrorKind) {
        self.notify(Notification::Error(kind));
    }

    fn notify(&self, notification: Notification) {
        let _ = self.notify.send(notification);
    }
}

/// States in which an incoming announcement is routed rather than dropped
const fn announcement_sensitive(state: OnboardingState) -> bool {
    matches!(
        state,
        OnboardingState::ConnectingToOnboardee
            | OnboardingState::WaitingForOnboardeeAnnouncement
            | OnboardingState::ErrorWaitingForOnboardeeAnnouncement
            | OnboardingState::ConnectingToTargetWifiAp
            | OnboardingState::WaitingForTargetAnnounce
            | OnboardingState::ErrorWaitingForTargetAnnounce
    )
}

/// Password form pushed to the peer
///
/// Hex-encoded, unless the network is WEP and the password already is a
/// valid hex WEP key.
fn credential_password(network: &NetworkDescriptor) -> String {
    let raw = network.password.as_deref().unwrap_or_default();
    if network.auth_type == AuthType::Wep && check_wep_password(raw).1 {
        raw.to_string()
    } else {
        hex::encode_upper(raw.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{MockNetworkAdapter, MockSessionAdapter};
    use crate::core::announcement::{CapabilityDescriptor, METADATA_APP_ID, METADATA_DEVICE_ID};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tokio_test::assert_ok;
    use uuid::Uuid;

    const ONBOARDEE_SSID: &str = "AJ_DEV";
    const ONBOARDEE_PASSWORD: &str = "device-pass";
    const TARGET_SSID: &str = "HomeNet";
    const TARGET_PASSWORD: &str = "home-pass";

    struct TestRig {
        wifi: Arc<MockNetworkAdapter>,
        session: Arc<MockSessionAdapter>,
        handle: OnboardingHandle,
        notifications: mpsc::UnboundedReceiver<Notification>,
        app_id: Uuid,
    }

    async fn rig() -> TestRig {
        rig_with_signal_timeout(DEFAULT_CONFIGURE_SIGNAL_TIMEOUT).await
    }

    async fn rig_with_signal_timeout(signal_timeout: Duration) -> TestRig {
        let wifi = Arc::new(MockNetworkAdapter::new());
        let session = Arc::new(MockSessionAdapter::new());
        wifi.set_network(ONBOARDEE_SSID, Some(ONBOARDEE_PASSWORD)).await;
        wifi.set_network(TARGET_SSID, Some(TARGET_PASSWORD)).await;
        let (handle, notifications) = OnboardingMachine::spawn_with_signal_timeout(
            wifi.clone(),
            session.clone(),
            signal_timeout,
        );
        wifi.bind(handle.clone()).await;
        TestRig {
            wifi,
            session,
            handle,
            notifications,
            app_id: Uuid::new_v4(),
        }
    }

    fn config() -> OnboardingConfiguration {
        OnboardingConfiguration::new(
            NetworkDescriptor::protected(ONBOARDEE_SSID, AuthType::Wpa2, ONBOARDEE_PASSWORD),
            NetworkDescriptor::protected(TARGET_SSID, AuthType::Wpa2, TARGET_PASSWORD),
        )
    }

    fn announcement(app_id: Uuid, device_id: &str) -> AnnouncementEvent {
        let mut metadata = serde_json::Map::new();
        metadata.insert(METADATA_APP_ID.into(), json!(app_id.to_string()));
        metadata.insert(METADATA_DEVICE_ID.into(), json!(device_id));
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

    async fn next_notification(rig: &mut TestRig) -> Notification {
        tokio::time::timeout(Duration::from_secs(2), rig.notifications.recv())
            .await
            .expect("timed out waiting for a notification")
            .expect("notification channel closed")
    }

    /// Consume notifications, answering announcement waits like a real
    /// onboardee would, until the machine reaches `target`.
    async fn run_until_state(rig: &mut TestRig, target: OnboardingState) -> Vec<Notification> {
        let mut seen = Vec::new();
        loop {
            let notification = next_notification(rig).await;
            if let Notification::StateChanged(state) = &notification {
                match state {
                    OnboardingState::WaitingForOnboardeeAnnouncement
                    | OnboardingState::WaitingForTargetAnnounce => {
                        rig.handle.announcement(announcement(rig.app_id, "dev-1"));
                    }
                    _ => {}
                }
            }
            let done = notification == Notification::StateChanged(target);
            seen.push(notification);
            if done {
                return seen;
            }
        }
    }

    fn states(seen: &[Notification]) -> Vec<OnboardingState> {
        seen.iter()
            .filter_map(|n| match n {
                Notification::StateChanged(state) => Some(*state),
                Notification::Error(_) => None,
            })
            .collect()
    }

    fn errors(seen: &[Notification]) -> Vec<ErrorKind> {
        seen.iter()
            .filter_map(|n| match n {
                Notification::Error(kind) => Some(*kind),
                Notification::StateChanged(_) => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_start_rejects_invalid_configuration() {
        let rig = rig().await;
        let mut bad = config();
        bad.onboardee.ssid.clear();
        let err = rig.handle.start(bad).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidConfiguration(_)));
        assert_eq!(rig.handle.state().await.unwrap(), OnboardingState::Idle);
    }

    #[tokio::test]
    async fn test_start_transitions_synchronously() {
        let mut rig = rig().await;
        rig.wifi.set_hold(ONBOARDEE_SSID).await;
        rig.handle.start(config()).await.unwrap();
        assert_eq!(
            rig.handle.state().await.unwrap(),
            OnboardingState::ConnectingToOnboardee
        );
        assert_eq!(
            next_notification(&mut rig).await,
            Notification::StateChanged(OnboardingState::ConnectingToOnboardee)
        );
    }

    #[tokio::test]
    async fn test_start_while_running_rejected() {
        let rig = rig().await;
        rig.wifi.set_hold(ONBOARDEE_SSID).await;
        rig.handle.start(config()).await.unwrap();
        let err = rig.handle.start(config()).await.unwrap_err();
        assert!(matches!(err, ServiceError::AlreadyRunning(_)));
    }

    #[tokio::test]
    async fn test_happy_path() {
        let mut rig = rig().await;
        rig.wifi.set_current("CafeNet").await;
        rig.handle.start(config()).await.unwrap();

        let seen = run_until_state(&mut rig, OnboardingState::Idle).await;
        assert_eq!(errors(&seen), vec![]);
        assert_eq!(
            states(&seen),
            vec![
                OnboardingState::ConnectingToOnboardee,
                OnboardingState::WaitingForOnboardeeAnnouncement,
                OnboardingState::OnboardeeAnnouncementReceived,
                OnboardingState::JoiningSession,
                OnboardingState::ConfiguringOnboardee,
                OnboardingState::ConnectingToTargetWifiAp,
                OnboardingState::WaitingForTargetAnnounce,
                OnboardingState::TargetAnnouncementReceived,
                OnboardingState::Idle,
            ]
        );

        // the host follows the onboardee onto the target network
        assert_eq!(
            rig.handle.current_network().await.unwrap(),
            Some(TARGET_SSID.to_string())
        );
        // credentials go over the session hex-encoded
        assert_eq!(
            rig.session.pushed_credentials().await,
            Some((
                TARGET_SSID.to_string(),
                hex::encode_upper(TARGET_PASSWORD.as_bytes()),
                AuthType::Wpa2,
            ))
        );
        assert!(rig.wifi.all_networks_enabled().await);
        assert!(!rig.session.is_connected().await);
    }

    #[tokio::test]
    async fn test_auth_failure_then_resume() {
        let mut rig = rig().await;
        let mut wrong = config();
        wrong.onboardee.password = Some("wrong-pass".into());
        rig.handle.start(wrong).await.unwrap();

        let seen = run_until_state(&mut rig, OnboardingState::ErrorConnectingToOnboardee).await;
        assert_eq!(errors(&seen), vec![ErrorKind::OnboardeeWifiAuth]);

        // resuming with the corrected password re-runs the failed phase
        rig.handle.start(config()).await.unwrap();
        let seen = run_until_state(&mut rig, OnboardingState::Idle).await;
        assert_eq!(errors(&seen), vec![]);
        assert_eq!(states(&seen)[0], OnboardingState::ConnectingToOnboardee);
    }

    #[tokio::test]
    async fn test_abort_rolls_back_to_original_network() {
        let mut rig = rig().await;
        rig.wifi.set_current("CafeNet").await;
        rig.handle.start(config()).await.unwrap();

        // wait until the announcement wait, then change our mind
        loop {
            let n = next_notification(&mut rig).await;
            if n == Notification::StateChanged(OnboardingState::WaitingForOnboardeeAnnouncement) {
                break;
            }
        }
        rig.handle.abort().await.unwrap();

        let mut seen = vec![];
        loop {
            let n = next_notification(&mut rig).await;
            let done = n == Notification::StateChanged(OnboardingState::Idle);
            seen.push(n);
            if done {
                break;
            }
        }
        assert_eq!(
            states(&seen),
            vec![OnboardingState::Aborting, OnboardingState::Idle]
        );
        assert_eq!(errors(&seen), vec![]);
        assert_eq!(
            rig.handle.current_network().await.unwrap(),
            Some("CafeNet".to_string())
        );
        assert!(rig.wifi.connect_log().await.contains(&"CafeNet".to_string()));
    }

    #[tokio::test]
    async fn test_abort_rejected_in_point_of_no_return() {
        let mut rig = rig().await;
        rig.wifi.set_hold(TARGET_SSID).await;
        rig.handle.start(config()).await.unwrap();

        run_until_state(&mut rig, OnboardingState::ConnectingToTargetWifiAp).await;
        let err = rig.handle.abort().await.unwrap_err();
        assert_eq!(
            err,
            ServiceError::CannotAbort(OnboardingState::ConnectingToTargetWifiAp)
        );
        assert_eq!(
            rig.handle.state().await.unwrap(),
            OnboardingState::ConnectingToTargetWifiAp
        );
    }

    #[tokio::test]
    async fn test_double_abort_rejected() {
        let mut rig = rig().await;
        rig.wifi.set_current("CafeNet").await;
        rig.wifi.set_event_delay(Duration::from_millis(100)).await;
        rig.handle.start(config()).await.unwrap();
        loop {
            let n = next_notification(&mut rig).await;
            if n == Notification::StateChanged(OnboardingState::WaitingForOnboardeeAnnouncement) {
                break;
            }
        }

        rig.handle.abort().await.unwrap();
        // rollback still in flight; a second abort has nothing to do
        let err = rig.handle.abort().await.unwrap_err();
        assert_eq!(err, ServiceError::CannotAbort(OnboardingState::Aborting));

        let mut seen = vec![];
        loop {
            let n = next_notification(&mut rig).await;
            let done = n == Notification::StateChanged(OnboardingState::Idle);
            seen.push(n);
            if done {
                break;
            }
        }
        assert_eq!(
            states(&seen),
            vec![OnboardingState::Aborting, OnboardingState::Idle]
        );

        // and a third after completion finds nothing running
        let err = rig.handle.abort().await.unwrap_err();
        assert_eq!(err, ServiceError::CannotAbort(OnboardingState::Idle));
    }

    #[tokio::test]
    async fn test_connect_outcome_consumed_at_most_once() {
        let mut rig = rig().await;
        rig.wifi.set_hold(ONBOARDEE_SSID).await;
        rig.handle.start(config()).await.unwrap();
        assert_eq!(
            next_notification(&mut rig).await,
            Notification::StateChanged(OnboardingState::ConnectingToOnboardee)
        );

        // success and timeout race in; only the first may act
        rig.handle.network_event(NetworkEvent::Connected {
            ssid: ONBOARDEE_SSID.into(),
        });
        rig.handle.network_event(NetworkEvent::Timeout {
            ssid: ONBOARDEE_SSID.into(),
        });

        assert_eq!(
            next_notification(&mut rig).await,
            Notification::StateChanged(OnboardingState::WaitingForOnboardeeAnnouncement)
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(rig.notifications.try_recv().is_err());
        assert_eq!(
            rig.handle.state().await.unwrap(),
            OnboardingState::WaitingForOnboardeeAnnouncement
        );
    }

    #[tokio::test]
    async fn test_abort_ignores_outcome_of_superseded_connect() {
        let mut rig = rig().await;
        rig.wifi.set_current("CafeNet").await;
        rig.wifi.set_hold(ONBOARDEE_SSID).await;
        // slow rollback delivery so the stale outcome arrives first
        rig.wifi.set_event_delay(Duration::from_millis(100)).await;
        assert_ok!(rig.handle.start(config()).await);
        assert_eq!(
            next_notification(&mut rig).await,
            Notification::StateChanged(OnboardingState::ConnectingToOnboardee)
        );
        assert_ok!(rig.handle.abort().await);

        // the outcome of the connect the abort cut short arrives while the
        // rollback to CafeNet is still pending; it belongs to a different
        // attempt and must not be read as the rollback's outcome
        rig.handle.network_event(NetworkEvent::Timeout {
            ssid: ONBOARDEE_SSID.into(),
        });

        let mut seen = vec![];
        loop {
            let n = next_notification(&mut rig).await;
            let done = n == Notification::StateChanged(OnboardingState::Idle);
            seen.push(n);
            if done {
                break;
            }
        }
        assert_eq!(
            states(&seen),
            vec![OnboardingState::Aborting, OnboardingState::Idle]
        );
        assert_eq!(errors(&seen), vec![]);
        assert_eq!(
            rig.handle.current_network().await.unwrap(),
            Some("CafeNet".to_string())
        );
    }

    #[tokio::test]
    async fn test_worker_exits_when_last_handle_dropped() {
        let wifi = Arc::new(MockNetworkAdapter::new());
        let session = Arc::new(MockSessionAdapter::new());
        let (handle, mut notifications) = OnboardingMachine::spawn(wifi, session);
        drop(handle);

        // the worker loop ends and drops the notification sender
        let closed = tokio::time::timeout(Duration::from_millis(500), notifications.recv())
            .await
            .expect("worker kept running after the last handle was dropped");
        assert_eq!(closed, None);
    }

    #[tokio::test]
    async fn test_announcement_after_timeout_resumes_into_session() {
        let mut rig = rig().await;
        let mut cfg = config();
        cfg.onboardee_announcement_timeout = Duration::from_millis(50);
        rig.handle.start(cfg.clone()).await.unwrap();

        let mut seen = vec![];
        loop {
            let n = next_notification(&mut rig).await;
            let done = n
                == Notification::StateChanged(
                    OnboardingState::ErrorWaitingForOnboardeeAnnouncement,
                );
            seen.push(n);
            if done {
                break;
            }
        }
        assert_eq!(errors(&seen), vec![ErrorKind::FindOnboardeeTimeout]);

        // the device finally shows up; its announcement is kept for resume
        rig.handle.announcement(announcement(rig.app_id, "dev-1"));
        assert_eq!(
            next_notification(&mut rig).await,
            Notification::StateChanged(
                OnboardingState::ErrorOnboardeeAnnouncementReceivedAfterTimeout,
            )
        );

        rig.handle.start(cfg).await.unwrap();
        let seen = run_until_state(&mut rig, OnboardingState::Idle).await;
        assert_eq!(errors(&seen), vec![]);
        assert_eq!(states(&seen)[0], OnboardingState::JoiningSession);
    }

    #[tokio::test]
    async fn test_unsupported_capability_is_terminal() {
        let mut rig = rig().await;
        rig.handle.start(config()).await.unwrap();
        loop {
            let n = next_notification(&mut rig).await;
            if n == Notification::StateChanged(OnboardingState::WaitingForOnboardeeAnnouncement) {
                break;
            }
        }

        let mut event = announcement(rig.app_id, "dev-1");
        event.capabilities.clear();
        rig.handle.announcement(event);

        assert_eq!(
            next_notification(&mut rig).await,
            Notification::Error(ErrorKind::UnsupportedCapability)
        );
        assert_eq!(
            next_notification(&mut rig).await,
            Notification::StateChanged(OnboardingState::ErrorOnboardeeAnnouncementReceived)
        );

        // not resumable; only an abort gets the machine back to idle
        let err = rig.handle.start(config()).await.unwrap_err();
        assert_eq!(
            err,
            ServiceError::AlreadyRunning(OnboardingState::ErrorOnboardeeAnnouncementReceived)
        );
        rig.handle.abort().await.unwrap();
        let mut seen = vec![];
        loop {
            let n = next_notification(&mut rig).await;
            let done = n == Notification::StateChanged(OnboardingState::Idle);
            seen.push(n);
            if done {
                break;
            }
        }
        assert_eq!(
            states(&seen),
            vec![OnboardingState::Aborting, OnboardingState::Idle]
        );
    }

    #[tokio::test]
    async fn test_invalid_announcement_metadata_ignored() {
        let mut rig = rig().await;
        rig.handle.start(config()).await.unwrap();
        loop {
            let n = next_notification(&mut rig).await;
            if n == Notification::StateChanged(OnboardingState::WaitingForOnboardeeAnnouncement) {
                break;
            }
        }

        let mut event = announcement(rig.app_id, "dev-1");
        event.metadata.remove(METADATA_DEVICE_ID);
        rig.handle.announcement(event);
        assert_eq!(
            next_notification(&mut rig).await,
            Notification::Error(ErrorKind::InvalidAnnouncementData)
        );
        assert_eq!(
            rig.handle.state().await.unwrap(),
            OnboardingState::WaitingForOnboardeeAnnouncement
        );

        // a well-formed announcement still goes through
        rig.handle.announcement(announcement(rig.app_id, "dev-1"));
        assert_eq!(
            next_notification(&mut rig).await,
            Notification::StateChanged(OnboardingState::OnboardeeAnnouncementReceived)
        );
    }

    #[tokio::test]
    async fn test_abort_queued_during_session_join_wins() {
        let mut rig = rig().await;
        rig.session.set_connect_delay(Duration::from_millis(150)).await;
        rig.handle.start(config()).await.unwrap();

        loop {
            let n = next_notification(&mut rig).await;
            if let Notification::StateChanged(state) = &n {
                if *state == OnboardingState::WaitingForOnboardeeAnnouncement {
                    rig.handle.announcement(announcement(rig.app_id, "dev-1"));
                }
                if *state == OnboardingState::JoiningSession {
                    break;
                }
            }
        }
        // queued behind the blocking join; applied the moment it returns
        rig.handle.abort().await.unwrap();

        let mut seen = vec![];
        loop {
            let n = next_notification(&mut rig).await;
            let done = n == Notification::StateChanged(OnboardingState::Idle);
            seen.push(n);
            if done {
                break;
            }
        }
        assert!(!states(&seen).contains(&OnboardingState::ConfiguringOnboardee));
        assert_eq!(
            states(&seen),
            vec![OnboardingState::Aborting, OnboardingState::Idle]
        );
    }

    #[tokio::test]
    async fn test_two_phase_configure() {
        let mut rig = rig().await;
        rig.session.set_ack(ConfigureAck::AppliedAfterSignal).await;
        rig.handle.start(config()).await.unwrap();

        run_until_state(&mut rig, OnboardingState::ConfiguringOnboardeeWithSignal).await;

        // the peer's configuration is in flight; backing out now would corrupt it
        let err = rig.handle.abort().await.unwrap_err();
        assert_eq!(
            err,
            ServiceError::CannotAbort(OnboardingState::ConfiguringOnboardeeWithSignal)
        );

        rig.handle.connection_result(ConnectionResult::Validated);

        let seen = run_until_state(&mut rig, OnboardingState::Idle).await;
        assert_eq!(errors(&seen), vec![]);
        assert_eq!(states(&seen)[0], OnboardingState::ConnectingToTargetWifiAp);
        assert_eq!(rig.session.apply_count().await, 1);
    }

    #[tokio::test]
    async fn test_configure_signal_timeout_then_resume() {
        let mut rig = rig_with_signal_timeout(Duration::from_millis(50)).await;
        rig.session.set_ack(ConfigureAck::AppliedAfterSignal).await;
        rig.handle.start(config()).await.unwrap();

        let mut seen =
            run_until_state(&mut rig, OnboardingState::ConfiguringOnboardeeWithSignal).await;
        loop {
            let n = next_notification(&mut rig).await;
            let done =
                n == Notification::StateChanged(OnboardingState::ErrorWaitingForConfigureSignal);
            seen.push(n);
            if done {
                break;
            }
        }
        assert_eq!(errors(&seen), vec![ErrorKind::ConfigureSignalTimeout]);

        // resume re-arms the signal wait; the peer answers this time
        rig.handle.start(config()).await.unwrap();
        assert_eq!(
            next_notification(&mut rig).await,
            Notification::StateChanged(OnboardingState::ConfiguringOnboardeeWithSignal)
        );
        rig.handle.connection_result(ConnectionResult::Validated);
        let seen = run_until_state(&mut rig, OnboardingState::Idle).await;
        assert_eq!(errors(&seen), vec![]);
    }

    #[tokio::test]
    async fn test_session_unreachable_then_resume() {
        let mut rig = rig().await;
        rig.session
            .set_connect_result(Err(SessionError::Unreachable))
            .await;
        rig.handle.start(config()).await.unwrap();

        let seen = run_until_state(&mut rig, OnboardingState::ErrorJoiningSession).await;
        assert_eq!(errors(&seen), vec![ErrorKind::SessionUnreachable]);

        rig.session.set_connect_result(Ok(())).await;
        rig.handle.start(config()).await.unwrap();
        let seen = run_until_state(&mut rig, OnboardingState::Idle).await;
        assert_eq!(errors(&seen), vec![]);
        assert_eq!(states(&seen)[0], OnboardingState::JoiningSession);
    }

    #[tokio::test]
    async fn test_rejected_credentials() {
        let mut rig = rig().await;
        rig.session
            .set_push_result(Err(SessionError::Rejected))
            .await;
        rig.handle.start(config()).await.unwrap();

        let seen = run_until_state(&mut rig, OnboardingState::ErrorConfiguringOnboardee).await;
        assert_eq!(errors(&seen), vec![ErrorKind::ConfigurationRejected]);
    }

    #[tokio::test]
    async fn test_offboarding() {
        let rig = rig().await;
        let cfg = OffboardingConfiguration {
            service_address: ":device.1".into(),
            port: 1080,
        };
        rig.handle.run_offboarding(cfg).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(rig.session.offboard_count().await, 1);
        assert!(!rig.session.is_connected().await);
        assert_eq!(rig.handle.state().await.unwrap(), OnboardingState::Idle);
    }

    #[tokio::test]
    async fn test_offboarding_failure_notified() {
        let mut rig = rig().await;
        rig.session
            .set_offboard_result(Err(SessionError::Failed("busy".into())))
            .await;
        let cfg = OffboardingConfiguration {
            service_address: ":device.1".into(),
            port: 1080,
        };
        rig.handle.run_offboarding(cfg).await.unwrap();
        assert_eq!(
            next_notification(&mut rig).await,
            Notification::Error(ErrorKind::OffboardingFailed)
        );
    }

    #[tokio::test]
    async fn test_offboarding_rejected_while_onboarding() {
        let rig = rig().await;
        rig.wifi.set_hold(ONBOARDEE_SSID).await;
        rig.handle.start(config()).await.unwrap();
        let cfg = OffboardingConfiguration {
            service_address: ":device.1".into(),
            port: 1080,
        };
        let err = rig.handle.run_offboarding(cfg).await.unwrap_err();
        assert!(matches!(err, ServiceError::AlreadyRunning(_)));
    }
}
