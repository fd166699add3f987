//! Outbound publishing to the message bus

use rumqttc::{AsyncClient, ClientError, QoS};
use thiserror::Error;
use tokio::runtime::Handle;

/// How a publish interacts with the client request queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishMode {
    /// Block until the client has accepted the request.
    /// Only valid off the async runtime (the command worker thread).
    Wait,
    /// Enqueue without blocking; fails if the request queue is full.
    /// Used from inside the network task.
    NoWait,
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("publish to {topic} failed: {source}")]
    Client {
        topic: String,
        #[source]
        source: ClientError,
    },

    #[error("publish to {0} rejected: connection closed")]
    Closed(String),
}

/// Sink for status and discovery publications
pub trait BusPublisher: Send + Sync {
    fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        retain: bool,
        mode: PublishMode,
    ) -> Result<(), PublishError>;
}

pub(crate) fn qos_from_level(level: u8) -> QoS {
    match level {
        0 => QoS::AtMostOnce,
        2 => QoS::ExactlyOnce,
        _ => QoS::AtLeastOnce,
    }
}

/// [`BusPublisher`] over a rumqttc client
pub struct MqttPublisher {
    client: AsyncClient,
    qos: QoS,
    runtime: Handle,
}

impl MqttPublisher {
    pub fn new(client: AsyncClient, qos: u8, runtime: Handle) -> Self {
        Self {
            client,
            qos: qos_from_level(qos),
            runtime,
        }
    }
}

impl BusPublisher for MqttPublisher {
    fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        retain: bool,
        mode: PublishMode,
    ) -> Result<(), PublishError> {
        let result = match mode {
            PublishMode::Wait => self.runtime.block_on(self.client.publish(
                topic,
                self.qos,
                retain,
                payload.to_vec(),
            )),
            PublishMode::NoWait => {
                self.client
                    .try_publish(topic, self.qos, retain, payload.to_vec())
            }
        };

        result.map_err(|source| match source {
            ClientError::Request(_) => PublishError::Closed(topic.to_string()),
            source => PublishError::Client {
                topic: topic.to_string(),
                source,
            },
        })
    }
}

#[cfg(test)]
pub(crate) mod recording {
    //! Publisher that records every publication in memory

    use super::*;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct Published {
        pub topic: String,
        pub payload: String,
        pub retain: bool,
        pub mode: PublishMode,
    }

    #[derive(Debug, Default)]
    pub struct RecordingPublisher {
        pub published: Mutex<Vec<Published>>,
    }

    impl RecordingPublisher {
        pub fn take(&self) -> Vec<Published> {
            std::mem::take(&mut *self.published.lock().unwrap())
        }

        /// Payloads published to topics ending in `suffix`, in order
        pub fn payloads(&self, suffix: &str) -> Vec<String> {
            self.published
                .lock()
                .unwrap()
                .iter()
                .filter(|p| p.topic.ends_with(suffix))
                .map(|p| p.payload.clone())
                .collect()
        }
    }

    impl BusPublisher for RecordingPublisher {
        fn publish(
            &self,
            topic: &str,
            payload: &[u8],
            retain: bool,
            mode: PublishMode,
        ) -> Result<(), PublishError> {
            self.published.lock().unwrap().push(Published {
                topic: topic.to_string(),
                payload: String::from_utf8_lossy(payload).into_owned(),
                retain,
                mode,
            });
            Ok(())
        }
    }
}
