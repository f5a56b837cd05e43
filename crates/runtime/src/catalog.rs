//! Installed provider catalog and installation hook.

use crate::config::AutoUpdateConfig;
use crate::error::CoordinatorError;
use crate::schema::SchemaSource;
use crate::sync::{read, write};
use async_trait::async_trait;
use inquest_types::{ProviderDescriptor, Schema};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::{debug, warn};

/// A provider known to the catalog, with its schema when it was shipped
/// alongside the descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct InstalledProvider {
    pub descriptor: ProviderDescriptor,
    pub schema: Option<Schema>,
}

impl InstalledProvider {
    pub fn new(descriptor: ProviderDescriptor) -> Self {
        Self { descriptor, schema: None }
    }

    pub fn with_schema(mut self, schema: Schema) -> Self {
        self.schema = Some(schema);
        self
    }
}

/// What an installer is asked to fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallRequest {
    ById(String),
    ForConnection(String),
}

/// Installs providers that are missing from the catalog.
///
/// Only consulted while auto-update is enabled; `settings` carries the
/// refresh policy for installers that also update stale providers.
#[async_trait]
pub trait ProviderInstaller: Send + Sync {
    async fn install(&self, request: &InstallRequest, settings: &AutoUpdateConfig) -> Result<InstalledProvider, CoordinatorError>;
}

/// Providers available to start, keyed by id.
#[derive(Debug, Default)]
pub struct ProviderCatalog {
    providers: RwLock<BTreeMap<String, InstalledProvider>>,
}

impl ProviderCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scans each directory for `<name>/<name>.json` descriptors.
    ///
    /// The executable is expected at `<name>/<name>` and an optional schema at
    /// `<name>/<name>.resources.json`. Unreadable entries are skipped.
    pub fn load(paths: &[PathBuf]) -> Self {
        let catalog = Self::new();
        for dir in paths {
            let entries = match fs::read_dir(dir) {
                Ok(entries) => entries,
                Err(err) => {
                    debug!(path = %dir.display(), error = %err, "skipping provider directory");
                    continue;
                }
            };
            for entry in entries.flatten() {
                let provider_dir = entry.path();
                if !provider_dir.is_dir() {
                    continue;
                }
                match load_installed(&provider_dir) {
                    Ok(Some(installed)) => catalog.register(installed),
                    Ok(None) => {}
                    Err(reason) => warn!(path = %provider_dir.display(), %reason, "skipping provider"),
                }
            }
        }
        catalog
    }

    pub fn register(&self, provider: InstalledProvider) {
        debug!(provider = %provider.descriptor.id, version = %provider.descriptor.version, "provider registered");
        write(&self.providers).insert(provider.descriptor.id.clone(), provider);
    }

    pub fn get(&self, id: &str) -> Option<InstalledProvider> {
        read(&self.providers).get(id).cloned()
    }

    pub fn list(&self) -> Vec<ProviderDescriptor> {
        read(&self.providers).values().map(|p| p.descriptor.clone()).collect()
    }

    /// First provider, ordered by id, that opens `connection_type`.
    pub fn for_connection_type(&self, connection_type: &str) -> Option<InstalledProvider> {
        read(&self.providers)
            .values()
            .find(|p| p.descriptor.supports_connection(connection_type))
            .cloned()
    }
}

impl SchemaSource for ProviderCatalog {
    fn schemas(&self) -> Vec<(String, Schema)> {
        read(&self.providers)
            .values()
            .filter_map(|p| p.schema.clone().map(|schema| (p.descriptor.id.clone(), schema)))
            .collect()
    }
}

fn load_installed(provider_dir: &Path) -> Result<Option<InstalledProvider>, String> {
    let Some(name) = provider_dir.file_name().and_then(|n| n.to_str()) else {
        return Ok(None);
    };
    let descriptor_path = provider_dir.join(format!("{name}.json"));
    if !descriptor_path.exists() {
        return Ok(None);
    }

    let content = fs::read_to_string(&descriptor_path).map_err(|e| e.to_string())?;
    let mut descriptor: ProviderDescriptor = serde_json::from_str(&content).map_err(|e| e.to_string())?;
    if descriptor.id.is_empty() {
        return Err("descriptor has no id".to_string());
    }
    if descriptor.name.is_empty() {
        descriptor.name = name.to_string();
    }
    descriptor.path = Some(provider_dir.join(name));

    let schema_path = provider_dir.join(format!("{name}.resources.json"));
    let schema = if schema_path.exists() {
        let content = fs::read_to_string(&schema_path).map_err(|e| e.to_string())?;
        Some(serde_json::from_str(&content).map_err(|e| format!("invalid schema: {e}"))?)
    } else {
        None
    };

    Ok(Some(InstalledProvider { descriptor, schema }))
}
