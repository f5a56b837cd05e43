//! Resource construction and the field read path.

use super::{ConnectedProvider, Runtime, transport_failure};
use crate::error::RuntimeError;
use inquest_types::{DataRequest, Primitive, RawData, ResourceData, ResourceRef, StoreRequest};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

impl Runtime {
    /// Creates (or identifies) a resource through the provider that
    /// constructs it and returns a handle to it.
    ///
    /// Resources without a constructing provider only bridge other resources;
    /// they get a handle with an empty id and no backing data.
    pub async fn create_resource(&self, name: &str, args: BTreeMap<String, Primitive>) -> Result<ResourceRef, RuntimeError> {
        self.ensure_open()?;
        let info = self.inner.schema.lookup(name).ok_or_else(|| RuntimeError::ResourceNotFound {
            resource: name.to_string(),
        })?;
        if info.provider.is_empty() {
            if !info.is_extension {
                warn!(resource = %name, "resource has no provider");
            }
            return Ok(ResourceRef::new(info.id, ""));
        }

        let provider = self.connected_provider(&info.provider).await?;
        provider.instance.ensure_alive()?;

        let req = DataRequest::construct(provider.connection_id(), info.id.as_str(), args);
        let resp = provider
            .instance
            .plugin()
            .get_data(req)
            .await
            .map_err(|err| transport_failure(&provider.instance, err))?;
        if let Some(message) = resp.error {
            return Err(RuntimeError::Construct {
                resource: info.id,
                message,
            });
        }
        let resource = match resp.data {
            Some(Primitive::Resource(resource)) => resource,
            other => {
                return Err(RuntimeError::Construct {
                    resource: info.id,
                    message: format!("provider returned {other:?} instead of a resource"),
                });
            }
        };

        let recording = self.recording();
        if recording
            .get_resource(provider.connection_id(), &resource.name, &resource.id)
            .is_none()
        {
            recording.add_data(provider.connection_id(), &resource.name, &resource.id, "", None);
        }
        debug!(resource = %resource.name, id = %resource.id, provider = %provider.id(), "resource created");
        Ok(resource)
    }

    /// Copies `fields` of `src` into a new resource `id` of the same type,
    /// stored in the provider that constructs it.
    ///
    /// The copied fields come from the regular read path, so cached values
    /// are reused. `args` are stored as additional values.
    pub async fn clone_resource(
        &self,
        src: &ResourceRef,
        id: &str,
        fields: &[&str],
        args: BTreeMap<String, Primitive>,
    ) -> Result<ResourceRef, RuntimeError> {
        self.ensure_open()?;
        let info = self.inner.schema.lookup(&src.name).ok_or_else(|| RuntimeError::ResourceNotFound {
            resource: src.name.clone(),
        })?;
        if info.provider.is_empty() {
            return Err(RuntimeError::NoProviderForResource { resource: src.name.clone() });
        }

        let mut data = BTreeMap::new();
        for field in fields {
            data.insert(field.to_string(), self.read_field(src, field).await?);
        }
        for (key, value) in args {
            data.entry(key).or_insert_with(|| RawData::value(value));
        }
        data.insert("__id".to_string(), RawData::value(Primitive::string(id)));

        let provider = self.connected_provider(&info.provider).await?;
        provider.instance.ensure_alive()?;
        let clone = ResourceRef::new(src.name.clone(), id);
        let resp = provider
            .instance
            .plugin()
            .store_data(StoreRequest {
                connection: provider.connection_id(),
                resources: vec![ResourceData {
                    name: clone.name.clone(),
                    id: clone.id.clone(),
                    fields: data.clone(),
                }],
            })
            .await
            .map_err(|err| transport_failure(&provider.instance, err))?;
        if let Some(message) = resp.errors.into_values().next() {
            return Err(RuntimeError::Store {
                resource: clone.to_string(),
                message,
            });
        }

        let recording = self.recording();
        recording.add_data(provider.connection_id(), &clone.name, &clone.id, "", None);
        for field in fields {
            if let Some(raw) = data.get(*field) {
                recording.add_data(provider.connection_id(), &clone.name, &clone.id, field, Some(raw));
            }
        }
        Ok(clone)
    }

    /// Resolves `field` of `resource` and hands the result to `callback`.
    ///
    /// The callback runs exactly once, before this returns: with the value,
    /// with a field-level error reported by the provider, or with the error
    /// that is also returned.
    pub async fn watch_and_update<F>(&self, resource: &ResourceRef, field: &str, watcher_id: &str, callback: F) -> Result<(), RuntimeError>
    where
        F: FnOnce(RawData) + Send,
    {
        self.remember_watcher(watcher_id, format!("{}\0{}\0{}", resource.name, resource.id, field));
        match self.read_field(resource, field).await {
            Ok(raw) => {
                callback(raw);
                Ok(())
            }
            Err(err) => {
                callback(RawData::error(err.to_string()));
                Err(err)
            }
        }
    }

    /// The read path: recording, optional bridge, fetch, recording write.
    ///
    /// A recorded value is returned before any provider is attached, so a
    /// replay never starts or connects a provider.
    ///
    /// Field errors reported by the provider come back as data and are
    /// recorded like values. Only configuration problems and dead providers
    /// are returned as errors.
    pub async fn read_field(&self, resource: &ResourceRef, field: &str) -> Result<RawData, RuntimeError> {
        self.ensure_open()?;
        let (info, field_info) = self.inner.schema.lookup_field(&resource.name, field);
        let info = info.ok_or_else(|| RuntimeError::ResourceNotFound {
            resource: resource.name.clone(),
        })?;
        let field_info = field_info.ok_or_else(|| RuntimeError::FieldNotFound {
            resource: resource.name.clone(),
            field: field.to_string(),
        })?;
        let field_provider = if field_info.provider.is_empty() {
            info.provider.clone()
        } else {
            field_info.provider.clone()
        };
        if field_provider.is_empty() {
            return Err(RuntimeError::NoProviderForResource {
                resource: resource.name.clone(),
            });
        }

        // Recordings group connections by asset, so the primary connection
        // finds values fetched through any provider of this asset.
        let recording = self.recording();
        let primary_connection = self.primary_connection()?;
        if let Some(cached) = recording.get_data(primary_connection, &resource.name, &resource.id, field) {
            debug!(resource = %resource.name, id = %resource.id, field = %field, "recording hit");
            return Ok(cached);
        }
        if recording.is_read_only() {
            return Err(RuntimeError::ReplayMiss {
                resource: resource.name.clone(),
                id: resource.id.clone(),
                field: field.to_string(),
            });
        }

        let provider = self.connected_provider(&field_provider).await?;
        let connection = provider.connection_id();
        provider.instance.ensure_alive()?;

        if !info.provider.is_empty() && info.provider != field_provider {
            self.bridge(&info.provider, resource).await?;
        }

        debug!(resource = %resource.name, id = %resource.id, field = %field, provider = %provider.id(), "fetching field");
        let raw = match provider
            .instance
            .plugin()
            .get_data(DataRequest::field(connection, resource, field))
            .await
        {
            Ok(resp) => resp.into_raw(),
            Err(err) if err.is_unavailable() => return Err(transport_failure(&provider.instance, err)),
            Err(err) => RawData::error(err.to_string()),
        };

        recording.add_data(connection, &resource.name, &resource.id, field, Some(&raw));
        Ok(raw)
    }

    /// Materializes an empty placeholder of `resource` in its constructing
    /// provider so the identity is shared before another provider serves a
    /// field of it.
    async fn bridge(&self, constructor_id: &str, resource: &ResourceRef) -> Result<(), RuntimeError> {
        let constructor: Arc<ConnectedProvider> = self.connected_provider(constructor_id).await?;
        constructor.instance.ensure_alive()?;
        debug!(resource = %resource.name, id = %resource.id, provider = %constructor_id, "bridging resource");

        let resp = constructor
            .instance
            .plugin()
            .store_data(StoreRequest {
                connection: constructor.connection_id(),
                resources: vec![ResourceData::reference(resource)],
            })
            .await;
        match resp {
            Ok(resp) => match resp.errors.into_values().next() {
                None => Ok(()),
                Some(message) => Err(RuntimeError::Store {
                    resource: resource.to_string(),
                    message,
                }),
            },
            Err(err) if err.is_unavailable() => Err(transport_failure(&constructor.instance, err)),
            Err(source) => Err(RuntimeError::Bridge {
                resource: resource.name.clone(),
                provider: constructor_id.to_string(),
                source,
            }),
        }
    }
}
