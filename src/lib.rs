//! Wi-Fi Onboarding Service
//!
//! Walks a headless device ("onboardee") from its own soft access point onto
//! the user's Wi-Fi network ("target") in two phases: connect to the
//! onboardee's AP and push it the target credentials over a session, then
//! follow it to the target network and verify it announces itself there.
//!
//! The workflow is driven by an actor-style state machine in
//! [`core::machine`]; the Wi-Fi control plane and the peer session are
//! abstracted behind the traits in [`adapter`].

pub mod adapter;
pub mod config;
pub mod core;

pub use core::{
    error::{ErrorKind, ServiceError, ServiceResult},
    machine::{Notification, OnboardingHandle, OnboardingMachine},
    state::OnboardingState,
    types::{
        AuthType, NetworkDescriptor, OffboardingConfiguration, OnboardingConfiguration,
        ScanFilter, ScanState, WifiNetwork,
    },
};
