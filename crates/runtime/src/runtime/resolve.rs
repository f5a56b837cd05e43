//! Routing of resources and fields to connected providers.

use super::callbacks::RuntimeCallbacks;
use super::{ConnectedProvider, Runtime, transport_failure};
use crate::coordinator::RunningProvider;
use crate::error::RuntimeError;
use crate::sync::{read, write};
use crate::{CORE_PROVIDER_ID, NETWORK_PROVIDER_ID};
use inquest_types::{Asset, ConnectRequest, ConnectResponse};
use std::sync::Arc;
use tracing::{debug, info, warn};

impl Runtime {
    /// Returns the connection of `provider_id` for this runtime's asset,
    /// starting and connecting the provider on first use.
    pub(crate) async fn connected_provider(&self, provider_id: &str) -> Result<Arc<ConnectedProvider>, RuntimeError> {
        let (primary, asset) = {
            let state = read(&self.inner.state);
            if let Some(provider) = state.providers.get(provider_id) {
                return Ok(provider.clone());
            }
            let primary = state.primary.clone().ok_or(RuntimeError::NoProviderSelected)?;
            let asset = state.asset.clone().ok_or_else(|| RuntimeError::NotConnected {
                provider: primary.id().to_string(),
            })?;
            (primary, asset)
        };
        if primary.id() == provider_id {
            return Err(RuntimeError::NotConnected {
                provider: provider_id.to_string(),
            });
        }
        self.check_provider(provider_id, primary.id())?;

        let instance = self
            .inner
            .coordinator
            .start(provider_id, false, &self.inner.auto_update)
            .await
            .map_err(|source| RuntimeError::StartProvider {
                provider: provider_id.to_string(),
                source,
            })?;
        self.inner.schema.add(instance.id(), instance.schema());

        let connected = match self.connect_secondary(&instance, &asset).await {
            Ok(connection) => Arc::new(ConnectedProvider {
                instance: instance.clone(),
                connection,
            }),
            Err(err) => {
                self.release(&instance).await;
                return Err(err);
            }
        };

        let conf = asset.connections.first().cloned().unwrap_or_default();
        self.recording()
            .ensure_asset(&asset, provider_id, connected.connection_id(), &conf);

        let existing = {
            let mut state = write(&self.inner.state);
            match state.providers.get(provider_id) {
                Some(existing) => Some(existing.clone()),
                None => {
                    state.providers.insert(provider_id.to_string(), connected.clone());
                    state.started.push(instance.clone());
                    None
                }
            }
        };
        if let Some(existing) = existing {
            // Lost a race against another read attaching the same provider.
            if let Err(err) = instance.plugin().disconnect(connected.connection_id()).await {
                warn!(provider = %provider_id, error = %err, "failed to disconnect duplicate connection");
            }
            self.release(&instance).await;
            return Ok(existing);
        }

        info!(provider = %provider_id, connection = connected.connection_id(), "secondary provider connected");
        Ok(connected)
    }

    async fn connect_secondary(&self, instance: &Arc<RunningProvider>, asset: &Asset) -> Result<ConnectResponse, RuntimeError> {
        instance.ensure_alive()?;
        let callbacks = Arc::new(RuntimeCallbacks::new(Arc::downgrade(&self.inner), instance.id()));
        let req = ConnectRequest {
            asset: Some(asset.clone()),
            upstream: self.inner.upstream.clone(),
            features: self.inner.features.clone(),
            has_recording: self.recording().is_read_only(),
        };
        let connection = instance
            .plugin()
            .connect(req, callbacks.clone())
            .await
            .map_err(|err| transport_failure(instance, err))?;
        callbacks.bind(connection.id);
        Ok(connection)
    }

    async fn release(&self, instance: &Arc<RunningProvider>) {
        if let Err(err) = self.inner.coordinator.stop(instance, false).await {
            warn!(provider = %instance.id(), error = %err, "failed to release provider");
        }
    }

    /// Only the primary provider, the base providers and providers declaring
    /// the primary as a cross-provider type may join this runtime.
    fn check_provider(&self, provider_id: &str, primary_id: &str) -> Result<(), RuntimeError> {
        if provider_id == primary_id || provider_id == CORE_PROVIDER_ID || provider_id == NETWORK_PROVIDER_ID {
            return Ok(());
        }
        let crosses = self
            .inner
            .coordinator
            .catalog()
            .get(provider_id)
            .is_some_and(|p| p.descriptor.cross_provider_types.iter().any(|t| t == primary_id));
        if crosses {
            debug!(provider = %provider_id, primary = %primary_id, "accepting cross provider");
            return Ok(());
        }
        Err(RuntimeError::IncorrectProvider {
            provider: provider_id.to_string(),
            primary: primary_id.to_string(),
        })
    }
}
