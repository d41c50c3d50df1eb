//! Wi-Fi scanning service
//!
//! Discovers access points around the host and classifies them into
//! onboardable devices (SSID marked with the onboardable prefix or suffix)
//! and candidate target networks.

use std::sync::Arc;
use tokio::sync::RwLock;

use crate::{
    adapter::network::NetworkAdapter,
    core::{
        error::{ServiceError, ServiceResult},
        types::{ScanFilter, ScanState, WifiNetwork},
    },
};

/// Scan state machine
///
/// Tracks the lifecycle of a single scan: at most one runs at a time and the
/// last results stay available until the next scan starts.
#[derive(Debug)]
struct ScanStateMachine {
    state: ScanState,
    results: Option<Vec<WifiNetwork>>,
    error: Option<String>,
}

impl ScanStateMachine {
    fn new() -> Self {
        Self {
            state: ScanState::Idle,
            results: None,
            error: None,
        }
    }

    fn start_scan(&mut self) -> ServiceResult<()> {
        match self.state {
            ScanState::Idle | ScanState::Finished | ScanState::Error => {
                self.state = ScanState::Scanning;
                self.results = None;
                self.error = None;
                Ok(())
            }
            _ => Err(ServiceError::ScanInProgress),
        }
    }

    fn complete_scan(&mut self, networks: Vec<WifiNetwork>) {
        self.state = ScanState::Finished;
        self.results = Some(networks);
        self.error = None;
    }

    fn fail_scan(&mut self, error: String) {
        self.state = ScanState::Error;
        self.error = Some(error);
        self.results = None;
    }

    fn reset(&mut self) {
        self.state = ScanState::Idle;
        self.results = None;
        self.error = None;
    }

    fn state(&self) -> ScanState {
        self.state
    }

    fn results(&self) -> Option<&[WifiNetwork]> {
        self.results.as_deref()
    }
}

/// Wi-Fi scanning service
///
/// Runs scans through the network adapter in the background and serves
/// filtered views of the results.
pub struct ScanService<W: NetworkAdapter> {
    wifi: Arc<W>,
    state_machine: Arc<RwLock<ScanStateMachine>>,
}

impl<W: NetworkAdapter> ScanService<W> {
    /// Create a new scan service over the given adapter
    pub fn new(wifi: Arc<W>) -> Self {
        Self {
            wifi,
            state_machine: Arc::new(RwLock::new(ScanStateMachine::new())),
        }
    }

    /// Start a Wi-Fi scan
    ///
    /// Returns an error if a scan is already in progress.
    pub async fn start_scan(&self) -> ServiceResult<()> {
        self.state_machine.write().await.start_scan()?;

        let wifi = self.wifi.clone();
        let state_machine = self.state_machine.clone();
        tokio::spawn(async move {
            match wifi.scan().await {
                Ok(networks) => {
                    state_machine.write().await.complete_scan(networks);
                }
                Err(e) => {
                    state_machine.write().await.fail_scan(e.to_string());
                }
            }
        });

        Ok(())
    }

    /// Get the current scan state
    pub async fn state(&self) -> ScanState {
        self.state_machine.read().await.state()
    }

    /// Get scan results, filtered by device class
    pub async fn results(&self, filter: ScanFilter) -> ServiceResult<Vec<WifiNetwork>> {
        let sm = self.state_machine.read().await;
        let all = sm.results().ok_or(ServiceError::NoScanResults)?;
        Ok(all
            .iter()
            .filter(|network| match filter {
                ScanFilter::All => true,
                ScanFilter::Onboardable => network.is_onboardable(),
                ScanFilter::Target => !network.is_onboardable(),
            })
            .cloned()
            .collect())
    }

    /// Reset the scan state to idle
    pub async fn reset(&self) {
        self.state_machine.write().await.reset();
    }
}
