//! Per-asset orchestration of providers.
//!
//! A [`Runtime`] serves one asset. It has a primary provider, selected with
//! [`Runtime::use_provider`] or [`Runtime::detect_provider`], and connects
//! further providers lazily when the schema routes a resource or field to
//! them. Every field read goes through the runtime's [`Recording`].

mod callbacks;
mod read;
mod resolve;

use crate::config::AutoUpdateConfig;
use crate::coordinator::{Coordinator, RunningProvider};
use crate::error::{RuntimeError, TransportError};
use crate::recording::{Recording, RecordingStore};
use crate::schema::SchemaRegistry;
use crate::sync::{read, write};
use callbacks::RuntimeCallbacks;
use inquest_types::{Asset, ConnectRequest, ConnectResponse, Schema, UpstreamConfig};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// A running provider paired with the connection it opened for this
/// runtime's asset.
#[derive(Debug, Clone)]
pub struct ConnectedProvider {
    pub instance: Arc<RunningProvider>,
    pub connection: ConnectResponse,
}

impl ConnectedProvider {
    pub fn id(&self) -> &str {
        self.instance.id()
    }

    pub fn connection_id(&self) -> u32 {
        self.connection.id
    }
}

#[derive(Default)]
struct RuntimeState {
    primary: Option<Arc<RunningProvider>>,
    /// Asset as returned by the primary connection; shared by every provider.
    asset: Option<Asset>,
    providers: HashMap<String, Arc<ConnectedProvider>>,
    /// Instances this runtime started and must release on close.
    started: Vec<Arc<RunningProvider>>,
    watchers: HashMap<String, HashSet<String>>,
}

pub(crate) struct RuntimeInner {
    coordinator: Arc<Coordinator>,
    ephemeral: bool,
    shutdown_timeout: Duration,
    auto_update: AutoUpdateConfig,
    upstream: Option<UpstreamConfig>,
    features: Vec<String>,
    schema: SchemaRegistry,
    recording: RwLock<Arc<dyn Recording>>,
    state: RwLock<RuntimeState>,
    closed: AtomicBool,
}

/// Session object for one asset. Cloning yields another handle to the same
/// session.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = read(&self.inner.state);
        f.debug_struct("Runtime")
            .field("ephemeral", &self.inner.ephemeral)
            .field("primary", &state.primary.as_ref().map(|p| p.id().to_string()))
            .field("providers", &state.providers.keys().collect::<Vec<_>>())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Runtime {
    pub(crate) fn new(coordinator: Arc<Coordinator>, ephemeral: bool, shutdown_timeout: Duration, schema: SchemaRegistry) -> Self {
        let defaults = coordinator.defaults().clone();
        Self {
            inner: Arc::new(RuntimeInner {
                coordinator,
                ephemeral,
                shutdown_timeout,
                auto_update: defaults.auto_update,
                upstream: defaults.upstream,
                features: defaults.features,
                schema,
                recording: RwLock::new(Arc::new(RecordingStore::new_in_memory())),
                state: RwLock::new(RuntimeState::default()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<RuntimeInner>) -> Self {
        Self { inner }
    }

    pub fn is_ephemeral(&self) -> bool {
        self.inner.ephemeral
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn schema(&self) -> &SchemaRegistry {
        &self.inner.schema
    }

    pub fn add_schema(&self, provider: &str, schema: &Schema) {
        self.inner.schema.add(provider, schema);
    }

    /// Stops lazy loading of installed provider schemas.
    pub fn deactivate_provider_discovery(&self) {
        self.inner.schema.deactivate_discovery();
    }

    pub fn recording(&self) -> Arc<dyn Recording> {
        read(&self.inner.recording).clone()
    }

    /// Replaces the recording and binds every open connection to it.
    pub fn set_recording(&self, recording: Arc<dyn Recording>) {
        let (asset, providers) = {
            let state = read(&self.inner.state);
            (state.asset.clone(), state.providers.values().cloned().collect::<Vec<_>>())
        };
        if let Some(asset) = &asset {
            let conf = asset.connections.first().cloned().unwrap_or_default();
            for provider in &providers {
                recording.ensure_asset(asset, provider.id(), provider.connection_id(), &conf);
            }
        } else {
            debug!("recording set before connect, connections bind on connect");
        }
        *write(&self.inner.recording) = recording;
    }

    /// The primary provider, once one was selected.
    pub fn provider(&self) -> Option<Arc<RunningProvider>> {
        read(&self.inner.state).primary.clone()
    }

    /// The asset this runtime is connected to.
    pub fn asset(&self) -> Option<Asset> {
        read(&self.inner.state).asset.clone()
    }

    pub fn asset_mrn(&self) -> Option<String> {
        read(&self.inner.state)
            .asset
            .as_ref()
            .map(|asset| asset.mrn.clone())
            .filter(|mrn| !mrn.is_empty())
    }

    /// Providers connected so far, keyed by provider id.
    pub fn connected_providers(&self) -> Vec<Arc<ConnectedProvider>> {
        read(&self.inner.state).providers.values().cloned().collect()
    }

    /// Attaches an already connected provider, e.g. one shared with another
    /// runtime for the same asset.
    pub fn add_connected_provider(&self, provider: Arc<ConnectedProvider>) {
        let asset = {
            let mut state = write(&self.inner.state);
            state.providers.insert(provider.id().to_string(), provider.clone());
            state.asset.clone()
        };
        if let Some(asset) = asset {
            let conf = asset.connections.first().cloned().unwrap_or_default();
            self.recording().ensure_asset(&asset, provider.id(), provider.connection_id(), &conf);
        }
        self.inner.schema.add(provider.id(), provider.instance.schema());
    }

    /// Selects the primary provider, starting it if needed.
    pub async fn use_provider(&self, provider_id: &str) -> Result<(), RuntimeError> {
        self.ensure_open()?;
        if read(&self.inner.state).primary.as_ref().is_some_and(|p| p.id() == provider_id) {
            return Ok(());
        }

        let instance = self
            .inner
            .coordinator
            .start(provider_id, self.inner.ephemeral, &self.inner.auto_update)
            .await
            .map_err(|source| RuntimeError::StartProvider {
                provider: provider_id.to_string(),
                source,
            })?;
        self.inner.schema.add(instance.id(), instance.schema());

        let mut state = write(&self.inner.state);
        state.started.push(instance.clone());
        state.primary = Some(instance);
        debug!(provider = %provider_id, ephemeral = self.inner.ephemeral, "primary provider selected");
        Ok(())
    }

    /// Picks the primary provider from the asset's connections.
    ///
    /// Deprecated connection fields are normalized in place. Every connection
    /// is tried in order; if none works, all failures are reported.
    pub async fn detect_provider(&self, asset: &mut Asset) -> Result<(), RuntimeError> {
        self.ensure_open()?;
        if asset.connections.is_empty() {
            return Err(RuntimeError::NothingToDetect);
        }

        let mut errors = Vec::new();
        for conf in asset.connections.iter_mut() {
            let Some(connection_type) = conf.normalized_type() else {
                errors.push("connection has no type".to_string());
                continue;
            };
            if conf.connection_type.is_empty() {
                conf.connection_type = connection_type.clone();
                conf.backend = None;
            }

            let descriptor = match self
                .inner
                .coordinator
                .ensure_provider(&connection_type, &self.inner.auto_update)
                .await
            {
                Ok(descriptor) => descriptor,
                Err(err) => {
                    errors.push(err.to_string());
                    continue;
                }
            };
            match self.use_provider(&descriptor.id).await {
                Ok(()) => {
                    info!(provider = %descriptor.id, connection_type = %connection_type, "detected provider");
                    return Ok(());
                }
                Err(err) => errors.push(err.to_string()),
            }
        }
        Err(RuntimeError::DetectFailed { errors })
    }

    /// Connects the primary provider to the asset in `req`.
    pub async fn connect(&self, mut req: ConnectRequest) -> Result<(), RuntimeError> {
        self.ensure_open()?;
        let primary = read(&self.inner.state)
            .primary
            .clone()
            .ok_or(RuntimeError::NoProviderSelected)?;
        let asset = req.asset.clone().ok_or(RuntimeError::NoAsset)?;
        if asset.connections.is_empty() {
            return Err(RuntimeError::NoConnections);
        }
        primary.ensure_alive()?;

        if req.upstream.is_none() {
            req.upstream = self.inner.upstream.clone();
        }
        if req.features.is_empty() {
            req.features = self.inner.features.clone();
        }
        let recording = self.recording();
        req.has_recording = recording.is_read_only();

        let callbacks = Arc::new(RuntimeCallbacks::new(Arc::downgrade(&self.inner), primary.id()));
        let connection = primary
            .plugin()
            .connect(req, callbacks.clone())
            .await
            .map_err(|err| transport_failure(&primary, err))?;
        callbacks.bind(connection.id);

        let asset = if connection.asset == Asset::default() {
            asset
        } else {
            connection.asset.clone()
        };
        let conf = asset.connections.first().cloned().unwrap_or_default();
        recording.ensure_asset(&asset, primary.id(), connection.id, &conf);
        info!(provider = %primary.id(), connection = connection.id, asset = %asset.name, "connected to asset");

        let connected = Arc::new(ConnectedProvider {
            instance: primary.clone(),
            connection,
        });
        let mut state = write(&self.inner.state);
        state.asset = Some(asset);
        state.providers.insert(primary.id().to_string(), connected);
        Ok(())
    }

    /// Forgets which fields `watcher_id` asked for.
    pub fn unregister(&self, watcher_id: &str) -> bool {
        write(&self.inner.state).watchers.remove(watcher_id).is_some()
    }

    /// Closes the runtime: saves the recording and releases its providers.
    ///
    /// Repeated calls do nothing. Provider shutdown is bounded by the
    /// runtime's shutdown timeout; running over it is logged, not returned.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Err(err) = self.recording().save() {
            error!(error = %err, "failed to save recording");
        }

        let inner = self.inner.clone();
        let shutdown = tokio::spawn(async move { inner.try_shutdown().await });
        match timeout(self.inner.shutdown_timeout, shutdown).await {
            Ok(Ok(())) => debug!("runtime closed"),
            Ok(Err(err)) => error!(error = %err, "provider shutdown task failed"),
            Err(_) => warn!(
                timeout_secs = self.inner.shutdown_timeout.as_secs_f64(),
                "timed out shutting down providers"
            ),
        }
    }

    /// Connection id of the primary provider once connected.
    fn primary_connection(&self) -> Result<u32, RuntimeError> {
        let state = read(&self.inner.state);
        let primary = state.primary.as_ref().ok_or(RuntimeError::NoProviderSelected)?;
        state
            .providers
            .get(primary.id())
            .map(|provider| provider.connection_id())
            .ok_or_else(|| RuntimeError::NotConnected {
                provider: primary.id().to_string(),
            })
    }

    fn ensure_open(&self) -> Result<(), RuntimeError> {
        if self.is_closed() {
            return Err(RuntimeError::Closed);
        }
        Ok(())
    }

    fn remember_watcher(&self, watcher_id: &str, key: String) {
        if watcher_id.is_empty() {
            return;
        }
        write(&self.inner.state)
            .watchers
            .entry(watcher_id.to_string())
            .or_default()
            .insert(key);
    }
}

impl RuntimeInner {
    async fn try_shutdown(&self) {
        let (connected, started) = {
            let mut state = write(&self.state);
            let connected: Vec<_> = state.providers.drain().map(|(_, provider)| provider).collect();
            (connected, std::mem::take(&mut state.started))
        };
        // Shared instances outlive this runtime; drop its connections there.
        for provider in connected {
            if provider.instance.is_closed() {
                continue;
            }
            if let Err(err) = provider.instance.plugin().disconnect(provider.connection_id()).await {
                warn!(provider = %provider.id(), connection = provider.connection_id(), error = %err, "failed to disconnect");
            }
        }
        for instance in started {
            if let Err(err) = self.coordinator.stop(&instance, instance.is_ephemeral()).await {
                warn!(provider = %instance.id(), error = %err, "failed to stop provider");
            }
        }
    }
}

/// Classifies a failed provider call. An unavailable process closes the
/// instance for every runtime that shares it.
pub(crate) fn transport_failure(instance: &RunningProvider, err: TransportError) -> RuntimeError {
    if err.is_unavailable() {
        instance.mark_crashed(&err);
        return RuntimeError::ProviderCrashed {
            provider: instance.name().to_string(),
        };
    }
    RuntimeError::Transport {
        provider: instance.id().to_string(),
        source: err,
    }
}
