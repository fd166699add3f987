//! Command execution for the bridge
//!
//! This module handles:
//! - Queueing inbound bus messages off the network task
//! - Routing command topics to typed commands
//! - Running handlers one at a time on a dedicated worker thread

mod executor;
pub mod handlers;
mod kind;
mod router;

pub use executor::{CommandExecutor, CommandResult};
pub use kind::CommandKind;
pub use router::{
    CommandRouter, DropReason, EnqueueOutcome, Execute, InboundMessage, RouteEntry, RouteTable,
    RouterError,
};
