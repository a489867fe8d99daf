//! Extension modules and their registry.
//!
//! A [`Module`] is an [`EventHandler`](crate::dispatch::EventHandler) with a
//! name, a capability set (the event kinds it wants delivered) and optional
//! setup/teardown hooks. Candidates are supplied as explicit factories keyed
//! by string; there is no filesystem scanning or dynamic symbol resolution.
//! The host registers everything it may want to load at build time.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::client::Client;
use crate::dispatch::EventHandler;
use crate::protocol::EventKind;

/// Errors surfaced by module lifecycle operations.
#[derive(Debug, Error)]
pub enum ModuleError {
    #[error("module `{0}` is already loaded")]
    AlreadyLoaded(String),

    #[error("no module registered under `{0}`")]
    NotFound(String),

    #[error("module `{key}` failed to load")]
    LoadFailed {
        key: String,
        #[source]
        source: anyhow::Error,
    },
}

/// An extension loaded into the client.
///
/// `capabilities` is the subset of [`EventKind`]s this module handles;
/// include [`EventKind::Raw`] to receive every event through `on_raw`.
/// `setup` failing aborts the load; `teardown` failing is logged and
/// otherwise ignored.
pub trait Module: EventHandler {
    fn name(&self) -> &str;

    fn capabilities(&self) -> &[EventKind];

    fn setup(&self, _client: &Client) -> anyhow::Result<()> {
        Ok(())
    }

    fn teardown(&self, _client: &Client) -> anyhow::Result<()> {
        Ok(())
    }
}

type ModuleFactory = Box<dyn Fn() -> anyhow::Result<Arc<dyn Module>> + Send + Sync>;

/// Holds module factories and the set of currently loaded modules.
///
/// Loads and unloads take the write side of the loaded map; dispatch reads a
/// cloned snapshot, so an in-flight dispatch never observes a mid-update
/// registry.
#[derive(Default)]
pub struct ModuleRegistry {
    factories: Mutex<HashMap<String, ModuleFactory>>,
    loaded: RwLock<HashMap<String, Arc<dyn Module>>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under `key`. A later registration under the same
    /// key replaces the factory (not any already-loaded module).
    pub fn register<F>(&self, key: impl Into<String>, factory: F)
    where
        F: Fn() -> anyhow::Result<Arc<dyn Module>> + Send + Sync + 'static,
    {
        self.factories
            .lock()
            .expect("factories lock poisoned")
            .insert(key.into(), Box::new(factory));
    }

    /// Instantiate and set up the module registered under `key`.
    ///
    /// Fails with [`ModuleError::AlreadyLoaded`] without side effects when
    /// the key is taken, [`ModuleError::NotFound`] when no factory exists,
    /// and [`ModuleError::LoadFailed`] when instantiation or `setup` fails;
    /// in the latter case `teardown` is still attempted and the module is
    /// not registered.
    pub fn load(&self, key: &str, client: &Client) -> Result<(), ModuleError> {
        if self.is_loaded(key) {
            return Err(ModuleError::AlreadyLoaded(key.to_string()));
        }

        let module = {
            let factories = self.factories.lock().expect("factories lock poisoned");
            let factory = factories
                .get(key)
                .ok_or_else(|| ModuleError::NotFound(key.to_string()))?;
            factory().map_err(|source| ModuleError::LoadFailed {
                key: key.to_string(),
                source,
            })?
        };

        if let Err(source) = module.setup(client) {
            if let Err(e) = module.teardown(client) {
                debug!("teardown after failed setup of `{key}` also failed: {e:#}");
            }
            return Err(ModuleError::LoadFailed {
                key: key.to_string(),
                source,
            });
        }

        {
            let mut loaded = self.loaded.write().expect("loaded lock poisoned");
            if !loaded.contains_key(key) {
                loaded.insert(key.to_string(), module);
                info!("loaded module `{key}`");
                return Ok(());
            }
        }
        // Lost a race with a concurrent load for the same key: this instance
        // already ran setup, so undo it before reporting the duplicate.
        if let Err(e) = module.teardown(client) {
            debug!("teardown of duplicate `{key}` failed: {e:#}");
        }
        Err(ModuleError::AlreadyLoaded(key.to_string()))
    }

    /// Remove the module under `key`, running its `teardown` hook. The entry
    /// is removed regardless of the teardown outcome.
    pub fn unload(&self, key: &str, client: &Client) -> Result<(), ModuleError> {
        let module = self
            .loaded
            .write()
            .expect("loaded lock poisoned")
            .remove(key)
            .ok_or_else(|| ModuleError::NotFound(key.to_string()))?;
        if let Err(e) = module.teardown(client) {
            warn!("teardown of `{key}` failed: {e:#}");
        }
        info!("unloaded module `{key}`");
        Ok(())
    }

    /// Attempt to load every key, retrying each failing key once before
    /// abandoning it for the session.
    pub fn load_all<I, S>(&self, keys: I, client: &Client)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for key in keys {
            let key = key.as_ref();
            if let Err(first) = self.load(key, client) {
                warn!("re-attempting to load `{key}` after: {first:#}");
                if let Err(second) = self.load(key, client) {
                    warn!("failed to load module `{key}`: {second:#}");
                }
            }
        }
    }

    pub fn is_loaded(&self, key: &str) -> bool {
        self.loaded
            .read()
            .expect("loaded lock poisoned")
            .contains_key(key)
    }

    pub fn loaded_keys(&self) -> Vec<String> {
        self.loaded
            .read()
            .expect("loaded lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    pub fn loaded_count(&self) -> usize {
        self.loaded.read().expect("loaded lock poisoned").len()
    }

    /// Snapshot of the loaded modules for dispatch.
    pub(crate) fn snapshot(&self) -> Vec<Arc<dyn Module>> {
        self.loaded
            .read()
            .expect("loaded lock poisoned")
            .values()
            .cloned()
            .collect()
    }
}
