//! Adapter traits and implementations
//!
//! The state machine talks to the outside world through two seams: the
//! host's Wi-Fi control interface and the session with the peer device.
//! Mock implementations of both live here as well; they back the test
//! suite and the dry-run simulator.

pub mod mock;
pub mod network;
pub mod session;

pub use mock::{MockNetworkAdapter, MockSessionAdapter};
pub use network::{ConnectRequest, NetworkAdapter, NetworkEvent, WifiError, WifiResult};
pub use session::{ConfigureAck, ConnectionResult, SessionAdapter, SessionError, SessionResult};
