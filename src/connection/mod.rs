//! Message bus connection
//!
//! This module handles:
//! - The MQTT session with automatic reconnection and a last will
//! - Topic layout and Home Assistant discovery
//! - Outbound publishing with an explicit blocking mode

pub mod discovery;
mod manager;
pub mod publisher;
pub mod topics;

pub use manager::{create_client, Announcer, ConnectionEvent, ConnectionManager, SetupError};
pub use publisher::{BusPublisher, MqttPublisher, PublishError, PublishMode};
pub use topics::Topics;
