//! Device session adapter trait definition

use thiserror::Error;
use trait_variant::make;

use crate::core::types::AuthType;

/// Result type for session adapter operations
pub type SessionResult<T> = Result<T, SessionError>;

/// Errors related to the session with the peer device
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("peer unreachable")]
    Unreachable,

    #[error("peer rejected the configuration")]
    Rejected,

    #[error("session failed: {0}")]
    Failed(String),
}

/// How the peer acknowledged a credential push
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigureAck {
    /// The peer accepted the credentials and will reconnect right away
    AppliedImmediately,
    /// The peer validates the credentials first and reports the result in a
    /// later [`ConnectionResult`] signal (two-phase configure)
    AppliedAfterSignal,
}

/// Result signal emitted by the peer during a two-phase configure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionResult {
    /// The peer validated the pushed credentials
    Validated,
    /// Validation failed on the peer side
    Failed(String),
}

/// Abstraction over the session with a discovered peer device
///
/// `connect_session` is the one blocking call in the workflow; everything else
/// returns promptly. Implementations wrap whatever bus or transport the peer
/// speaks; mock implementations script the peer's behavior for tests.
#[make(Send)]
pub trait SessionAdapter: Sync + 'static {
    /// Establish a session with the peer at the announced address and port
    ///
    /// Blocks until the session is up or the attempt fails.
    async fn connect_session(&self, service_address: &str, port: u16) -> SessionResult<()>;

    /// Push the target network credentials to the peer
    async fn push_target_credentials(
        &self,
        ssid: &str,
        password: &str,
        auth_type: AuthType,
    ) -> SessionResult<ConfigureAck>;

    /// Tell the peer to apply the pushed credentials and reconnect
    ///
    /// Second phase of a deferred-ack configure; also invoked right after an
    /// immediate ack.
    async fn apply_credentials(&self) -> SessionResult<()>;

    /// Tear down the session, ignoring errors
    async fn disconnect_session(&self);

    /// Tell the peer to leave its configured network and return to AP mode
    async fn offboard(&self) -> SessionResult<()>;
}
