//! Transports to the managed device

pub mod ssh;
pub mod traits;

pub use ssh::{SshConnector, SshSession};
pub use traits::{ExecOutput, RemoteSession, SessionConnector, SessionError};
