//! The sharded client: owns every connection and the module registry.
//!
//! [`Client::start`] partitions the configured channel list into groups of at
//! most `max_connections` channels, opens one [`Connection`] per group and
//! spawns its read loop. Events from every shard flow through one shared
//! [`Dispatcher`] to the host handler and the loaded modules.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use futures::future::join_all;
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::ClientConfig;
use crate::connection::{Connection, ConnectionHandle, ConnectionSettings};
use crate::dispatch::{Dispatcher, EventHandler};
use crate::module::{Module, ModuleError, ModuleRegistry};

/// Pause between shard launches so handshakes do not land at once.
const SHARD_STAGGER: Duration = Duration::from_millis(1);

/// Grace period for shard tasks to wind down on stop.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

struct Shard {
    handle: ConnectionHandle,
    task: JoinHandle<()>,
}

/// The top-level chat client.
pub struct Client {
    config: ClientConfig,
    registry: Arc<ModuleRegistry>,
    dispatcher: Arc<Dispatcher>,
    settings: ConnectionSettings,
    shards: Mutex<Vec<Shard>>,
}

impl Client {
    /// Build a client from its configuration and the host's event handler.
    pub fn new(config: ClientConfig, host: Arc<dyn EventHandler>) -> Self {
        let settings = ConnectionSettings {
            server: config.server.clone(),
            port: config.port,
            ..ConnectionSettings::default()
        };
        Self::with_settings(config, host, settings)
    }

    /// Like [`Client::new`] with explicit transport settings. Tests use this
    /// to point shards at a local listener with short delays.
    pub fn with_settings(
        config: ClientConfig,
        host: Arc<dyn EventHandler>,
        settings: ConnectionSettings,
    ) -> Self {
        let registry = Arc::new(ModuleRegistry::new());
        let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&registry), host));
        Self {
            config,
            registry,
            dispatcher,
            settings,
            shards: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    /// Partition the configured channels and bring one shard up per group.
    ///
    /// A failure to establish any initial connection is returned to the
    /// caller; once a shard is up, later transport failures are handled by
    /// its own reconnection loop instead.
    pub async fn start(&self) -> Result<()> {
        if self.config.channels.is_empty() {
            bail!("no channels configured");
        }
        if self.config.max_connections == 0 {
            bail!("max_connections must be at least 1");
        }

        let groups = segment_channels(&self.config.channels, self.config.max_connections);
        info!(
            "Starting {} connection(s) for {} channel(s)",
            groups.len(),
            self.config.channels.len()
        );

        for group in groups {
            let mut conn = Connection::new(
                self.config.nick.clone(),
                self.config.token.clone(),
                self.config.command_activator.clone(),
                group,
                Arc::clone(&self.dispatcher),
                self.settings.clone(),
            );
            conn.connect()
                .await
                .with_context(|| format!("shard {} failed to connect", conn.id()))?;
            let handle = conn.handle();
            let task = tokio::spawn(async move { conn.run().await });
            self.shards.lock().expect("shards lock poisoned").push(Shard { handle, task });
            tokio::time::sleep(SHARD_STAGGER).await;
        }
        Ok(())
    }

    /// Start every shard, then block until interrupted and shut down cleanly.
    pub async fn run(&self) -> Result<()> {
        self.start().await?;
        signal::ctrl_c().await.context("failed to listen for shutdown signal")?;
        info!("Shutdown signal received");
        self.stop().await;
        Ok(())
    }

    /// Disconnect every shard and wait for its task to finish.
    pub async fn stop(&self) {
        let shards: Vec<Shard> = self
            .shards
            .lock()
            .expect("shards lock poisoned")
            .drain(..)
            .collect();
        for shard in &shards {
            shard.handle.disconnect();
        }
        let tasks = shards.into_iter().map(|shard| shard.task);
        if tokio::time::timeout(STOP_TIMEOUT, join_all(tasks)).await.is_err() {
            warn!("some connections did not shut down in time");
        }
        info!("Client stopped");
    }

    /// Handles for every shard, in launch order.
    pub fn connections(&self) -> Vec<ConnectionHandle> {
        self.shards
            .lock()
            .expect("shards lock poisoned")
            .iter()
            .map(|shard| shard.handle.clone())
            .collect()
    }

    /// The shard currently carrying `channel`, if any.
    pub fn connection_for(&self, channel: &str) -> Option<ConnectionHandle> {
        self.shards
            .lock()
            .expect("shards lock poisoned")
            .iter()
            .find(|shard| shard.handle.has_channel(channel))
            .map(|shard| shard.handle.clone())
    }

    /// Register a module factory under `key` without loading it.
    pub fn register_module<F>(&self, key: impl Into<String>, factory: F)
    where
        F: Fn() -> Result<Arc<dyn Module>> + Send + Sync + 'static,
    {
        self.registry.register(key, factory);
    }

    pub fn load_module(&self, key: &str) -> Result<(), ModuleError> {
        self.registry.load(key, self)
    }

    pub fn unload_module(&self, key: &str) -> Result<(), ModuleError> {
        self.registry.unload(key, self)
    }

    /// Load a batch of modules, retrying each failure once.
    pub fn load_modules<I, S>(&self, keys: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.registry.load_all(keys, self);
    }
}

/// Split `channels` into groups of at most `max_per_shard`, preserving order.
fn segment_channels(channels: &[String], max_per_shard: usize) -> Vec<Vec<String>> {
    channels
        .chunks(max_per_shard)
        .map(|chunk| chunk.to_vec())
        .collect()
}
