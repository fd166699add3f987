//! Connection manager: MQTT session with automatic reconnection
//!
//! The rumqttc event loop is polled on one tokio task, the bridge's network
//! task. Received publishes go straight into the command router; every
//! ConnAck re-announces the bridge. Nothing on this task blocks.

use rumqttc::{
    AsyncClient, ConnectionError, Event, EventLoop, LastWill, MqttOptions, Outgoing, Packet,
    Transport,
};
use secrecy::ExposeSecret;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::discovery;
use super::publisher::{qos_from_level, BusPublisher, PublishMode};
use super::topics::{Topics, AVAILABILITY_OFFLINE};
use crate::command::{CommandRouter, EnqueueOutcome};
use crate::config::MqttConfig;
use crate::profiles::{PresetTable, ProfileRepository, RepoError};
use crate::status::StatusReporter;

/// Client request queue depth. Covers one full re-announce with room to spare.
const REQUEST_CAPACITY: usize = 64;
const SHUTDOWN_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// Events emitted by the connection manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Broker accepted the connection and the bridge was announced
    Connected { broker: String },
    /// Connection lost; a reconnect is scheduled after `retry_in`
    Disconnected { reason: String, retry_in: Duration },
}

#[derive(Debug, Error)]
pub enum SetupError {
    #[error("reading {}: {source}", path.display())]
    TlsFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Everything needed to (re)announce the bridge after a ConnAck
pub struct Announcer {
    pub publisher: Arc<dyn BusPublisher>,
    pub reporter: Arc<StatusReporter>,
    pub repository: Arc<ProfileRepository>,
    pub presets: PresetTable,
    pub topics: Topics,
}

impl Announcer {
    /// Discovery, availability, status and last applied profile. Never blocks.
    pub fn announce(&self) {
        if let Err(e) = discovery::publish_discovery(
            self.publisher.as_ref(),
            &self.topics,
            &self.presets,
            PublishMode::NoWait,
        ) {
            warn!("[MQTT] Discovery publish failed: {}", e);
        }

        self.reporter.announce_online();

        match self.repository.read_last_applied() {
            Ok(record) => {
                debug!("[MQTT] Restoring last applied profile '{}'", record.profile_name);
                self.reporter.last_applied(&record, PublishMode::NoWait);
            }
            Err(RepoError::LastAppliedMissing) => debug!("[MQTT] No last applied profile"),
            Err(e) => warn!("[MQTT] Cannot restore last applied profile: {}", e),
        }
    }
}

/// Reconnect timing, taken from the mqtt config section
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub initial: Duration,
    pub max: Duration,
}

impl ReconnectPolicy {
    fn from_config(config: &MqttConfig) -> Self {
        let initial = Duration::from_secs(config.reconnect_delay_secs.max(1));
        Self {
            initial,
            max: Duration::from_secs(config.max_reconnect_delay_secs).max(initial),
        }
    }

    fn next(&self, current: Duration) -> Duration {
        std::cmp::min(current * 2, self.max)
    }
}

fn read_file(path: &Path) -> Result<Vec<u8>, SetupError> {
    std::fs::read(path).map_err(|source| SetupError::TlsFile {
        path: path.to_path_buf(),
        source,
    })
}

/// Build the client options, last will included
pub fn mqtt_options(config: &MqttConfig, topics: &Topics) -> Result<MqttOptions, SetupError> {
    let mut options = MqttOptions::new(config.client_id(), &config.host, config.port);
    options.set_keep_alive(Duration::from_secs(config.keepalive));
    options.set_clean_session(config.clean_session);

    if let Some(user) = config.username.as_deref().filter(|u| !u.is_empty()) {
        let password = config
            .password
            .as_ref()
            .map(|p| p.expose_secret().to_string())
            .unwrap_or_default();
        options.set_credentials(user, password);
    }

    options.set_last_will(LastWill::new(
        topics.availability(),
        AVAILABILITY_OFFLINE,
        qos_from_level(config.qos),
        config.retained_online,
    ));

    if config.tls_enabled {
        let ca = match &config.cafile {
            Some(path) => read_file(path)?,
            None => Vec::new(),
        };
        let client_auth = match (&config.certfile, &config.keyfile) {
            (Some(cert), Some(key)) => Some((read_file(cert)?, read_file(key)?)),
            _ => None,
        };
        options.set_transport(Transport::tls(ca, client_auth, None));
    }

    Ok(options)
}

/// Owns the bus connection for the life of the daemon
pub struct ConnectionManager {
    client: AsyncClient,
    router: Arc<CommandRouter>,
    availability_topic: String,
    retain_availability: bool,
    qos: u8,
    shutdown_tx: watch::Sender<bool>,
    event_rx: mpsc::Receiver<ConnectionEvent>,
    task: Option<JoinHandle<()>>,
}

/// Create the client; the event loop is handed to [`ConnectionManager::start`]
pub fn create_client(
    config: &MqttConfig,
    topics: &Topics,
) -> Result<(AsyncClient, EventLoop), SetupError> {
    let options = mqtt_options(config, topics)?;
    Ok(AsyncClient::new(options, REQUEST_CAPACITY))
}

impl ConnectionManager {
    /// Spawn the network task
    pub fn start(
        config: &MqttConfig,
        client: AsyncClient,
        eventloop: EventLoop,
        router: Arc<CommandRouter>,
        announcer: Announcer,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::channel::<ConnectionEvent>(100);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let availability_topic = announcer.topics.availability();
        let network = NetworkTask {
            client: client.clone(),
            broker: format!("{}:{}", config.host, config.port),
            qos: config.qos,
            policy: ReconnectPolicy::from_config(config),
            router: router.clone(),
            announcer,
            event_tx,
        };
        let task = tokio::spawn(network.run(eventloop, shutdown_rx));

        Self {
            client,
            router,
            availability_topic,
            retain_availability: config.retained_online,
            qos: config.qos,
            shutdown_tx,
            event_rx,
            task: Some(task),
        }
    }

    /// Receive the next connection event
    pub async fn recv(&mut self) -> Option<ConnectionEvent> {
        self.event_rx.recv().await
    }

    /// Stop the command worker, then publish `offline`, disconnect cleanly and
    /// stop the network task.
    ///
    /// The worker goes first: a command still running publishes its final
    /// status through this connection.
    pub async fn shutdown(&mut self) {
        let router = self.router.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || router.stop()).await {
            error!("[MQTT] Command worker did not stop cleanly: {}", e);
        }

        let qos = qos_from_level(self.qos);
        if let Err(e) = self
            .client
            .publish(
                self.availability_topic.clone(),
                qos,
                self.retain_availability,
                AVAILABILITY_OFFLINE,
            )
            .await
        {
            warn!("[MQTT] Could not queue offline availability: {}", e);
        }
        if let Err(e) = self.client.disconnect().await {
            warn!("[MQTT] Could not queue disconnect: {}", e);
        }

        let _ = self.shutdown_tx.send(true);
        if let Some(task) = self.task.take() {
            if timeout(SHUTDOWN_FLUSH_TIMEOUT * 2, task).await.is_err() {
                warn!("[MQTT] Network task did not stop in time");
            }
        }
        info!("[MQTT] Disconnected");
    }
}

struct NetworkTask {
    client: AsyncClient,
    broker: String,
    qos: u8,
    policy: ReconnectPolicy,
    router: Arc<CommandRouter>,
    announcer: Announcer,
    event_tx: mpsc::Sender<ConnectionEvent>,
}

impl NetworkTask {
    async fn run(self, mut eventloop: EventLoop, mut shutdown_rx: watch::Receiver<bool>) {
        let mut reconnect_delay = self.policy.initial;

        loop {
            let polled = tokio::select! {
                polled = eventloop.poll() => polled,
                _ = shutdown_rx.changed() => break,
            };

            match polled {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    reconnect_delay = self.policy.initial;
                    info!("[MQTT] Connected to {}", self.broker);
                    self.on_connected();
                    let _ = self
                        .event_tx
                        .try_send(ConnectionEvent::Connected {
                            broker: self.broker.clone(),
                        });
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    if let EnqueueOutcome::Dropped(reason) =
                        self.router.enqueue(&publish.topic, &publish.payload)
                    {
                        debug!("[MQTT] {} not queued: {:?}", publish.topic, reason);
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    let reason = describe(&e);
                    warn!(
                        "[MQTT] Connection to {} lost: {}; retrying in {:?}",
                        self.broker, reason, reconnect_delay
                    );
                    let _ = self.event_tx.try_send(ConnectionEvent::Disconnected {
                        reason,
                        retry_in: reconnect_delay,
                    });

                    tokio::select! {
                        _ = tokio::time::sleep(reconnect_delay) => {}
                        _ = shutdown_rx.changed() => break,
                    }
                    reconnect_delay = self.policy.next(reconnect_delay);
                }
            }
        }

        flush(&mut eventloop).await;
        debug!("[MQTT] Network task stopped");
    }

    fn on_connected(&self) {
        self.announcer.announce();

        for topic in self.router.topics() {
            match self.client.try_subscribe(topic.as_str(), qos_from_level(self.qos)) {
                Ok(()) => debug!("[MQTT] Subscribed {}", topic),
                Err(e) => error!("[MQTT] Subscribe to {} failed: {}", topic, e),
            }
        }
    }
}

/// Drive the event loop until the queued offline publish and disconnect are sent
async fn flush(eventloop: &mut EventLoop) {
    let drained = timeout(SHUTDOWN_FLUSH_TIMEOUT, async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    })
    .await;
    if drained.is_err() {
        debug!("[MQTT] Flush timed out");
    }
}

fn describe(err: &ConnectionError) -> String {
    match err {
        ConnectionError::ConnectionRefused(code) => format!("connection refused ({code:?})"),
        other => other.to_string(),
    }
}
