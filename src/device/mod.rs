//! The managed doorbell: configuration documents and the remote pipeline

pub mod conf;
mod remote;

pub use conf::ConfError;
pub use remote::{ApplyError, RemotePipeline};
