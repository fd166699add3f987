mod command;
mod config;
mod connection;
mod device;
mod profiles;
mod protocol;
mod status;
mod transport;

use anyhow::{Context, Result};
use command::handlers::HandlerContext;
use command::{CommandExecutor, CommandRouter};
use connection::{
    discovery, Announcer, BusPublisher, ConnectionEvent, ConnectionManager, MqttPublisher, Topics,
};
use profiles::{PresetTable, ProfileRepository};
use status::StatusReporter;
use std::sync::Arc;
use transport::{SessionConnector, SshConnector};

use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// `RUST_LOG` wins; otherwise the configured level
fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let loaded = config::load_config();
    init_tracing(loaded.as_ref().map_or("info", |c| c.log_level.as_str()));
    let config = loaded
        .with_context(|| format!("loading {}", config::config_path().display()))?;

    info!("doorbell-bridge {} starting", env!("CARGO_PKG_VERSION"));
    info!("  Broker: {}:{}", config.mqtt.host, config.mqtt.port);
    info!("  Doorbell: {}@{}:{}", config.ssh.user, config.ssh.host, config.ssh.port);

    let presets = PresetTable::from_config(&config.presets);
    let repository = Arc::new(
        ProfileRepository::init(&config.profiles_dir, presets.clone())
            .context("opening profiles directory")?,
    );

    let topics = Topics::new(&config.mqtt.prefix, &config.mqtt.instance);
    let (client, eventloop) =
        connection::create_client(&config.mqtt, &topics).context("building MQTT client")?;
    let publisher: Arc<dyn BusPublisher> = Arc::new(MqttPublisher::new(
        client.clone(),
        config.mqtt.qos,
        tokio::runtime::Handle::current(),
    ));
    let reporter = Arc::new(StatusReporter::new(publisher.clone(), topics.clone()));

    let router = Arc::new(CommandRouter::default());
    for (topic, kind) in discovery::command_routes(&topics, &presets) {
        router
            .register_route(topic, kind)
            .context("registering command routes")?;
    }

    let connector: Arc<dyn SessionConnector> = Arc::new(SshConnector::new(config.ssh.clone()));
    info!("Device transport: {}", connector.name());
    let executor = CommandExecutor::new(HandlerContext {
        reporter: reporter.clone(),
        repository: repository.clone(),
        connector,
        paths: config.paths.clone(),
    });
    router
        .start(Arc::new(executor))
        .context("starting command worker")?;

    let mut conn = ConnectionManager::start(
        &config.mqtt,
        client,
        eventloop,
        router.clone(),
        Announcer {
            publisher,
            reporter,
            repository: repository.clone(),
            presets,
            topics,
        },
    );

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    // Main event loop
    loop {
        tokio::select! {
            event = conn.recv() => match event {
                Some(ConnectionEvent::Connected { broker }) => {
                    info!("Connected to {}", broker);
                }
                Some(ConnectionEvent::Disconnected { reason, retry_in }) => {
                    warn!("Disconnected: {} (retry in {:?})", reason, retry_in);
                }
                None => {
                    error!("Connection manager closed");
                    break;
                }
            },
            _ = &mut shutdown => {
                info!("Shutdown requested");
                break;
            }
        }
    }

    debug!("{} commands pending at shutdown", router.pending());
    // Stops the command worker before the bus goes away
    conn.shutdown().await;
    drop(conn);
    drop(router);

    match Arc::try_unwrap(repository) {
        Ok(repository) => repository.shutdown(),
        Err(_) => debug!("Profiles repository still shared at exit"),
    }

    info!("doorbell-bridge stopped");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                warn!("SIGTERM handler unavailable: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
