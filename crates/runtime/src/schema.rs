//! Merged resource schema across every provider attached to a runtime.

use crate::sync::{read, write};
use inquest_types::{FieldInfo, ResourceInfo, Schema};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tracing::debug;

/// Supplies schemas of providers that are installed but not yet running.
pub trait SchemaSource: Send + Sync {
    /// `(provider id, schema)` pairs available for lazy loading.
    fn schemas(&self) -> Vec<(String, Schema)>;
}

#[derive(Debug, Default)]
struct SchemaState {
    loaded: HashMap<String, Schema>,
    resources: BTreeMap<String, ResourceInfo>,
}

/// Registry merging provider schemas into one namespace.
///
/// Adding a schema for a resource that already exists only appends fields
/// with new names; the first provider to define a field name keeps it.
pub struct SchemaRegistry {
    state: RwLock<SchemaState>,
    source: Option<Arc<dyn SchemaSource>>,
    all_loaded: AtomicBool,
}

impl fmt::Debug for SchemaRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = read(&self.state);
        f.debug_struct("SchemaRegistry")
            .field("providers", &state.loaded.keys().collect::<Vec<_>>())
            .field("resources", &state.resources.len())
            .field("all_loaded", &self.all_loaded.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaRegistry {
    /// Registry without lazy discovery.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(SchemaState::default()),
            source: None,
            all_loaded: AtomicBool::new(true),
        }
    }

    /// Registry that pulls in installed schemas the first time a lookup misses.
    pub fn with_source(source: Arc<dyn SchemaSource>) -> Self {
        Self {
            state: RwLock::new(SchemaState::default()),
            source: Some(source),
            all_loaded: AtomicBool::new(false),
        }
    }

    /// Merge a provider's schema. Adding the same provider twice is a no-op.
    pub fn add(&self, provider: &str, schema: &Schema) {
        let mut state = write(&self.state);
        if state.loaded.contains_key(provider) {
            return;
        }
        state.loaded.insert(provider.to_string(), schema.clone());

        for (name, incoming) in &schema.resources {
            match state.resources.get_mut(name) {
                None => {
                    let mut info = incoming.clone();
                    for field in info.fields.values_mut() {
                        inherit_provider(field, &incoming.provider);
                    }
                    state.resources.insert(name.clone(), info);
                }
                Some(existing) => merge_resource(existing, incoming),
            }
        }
        debug!(provider = %provider, resources = schema.resources.len(), "schema added");
    }

    pub fn lookup(&self, resource: &str) -> Option<ResourceInfo> {
        if let Some(info) = read(&self.state).resources.get(resource) {
            return Some(info.clone());
        }
        if self.discover() {
            return read(&self.state).resources.get(resource).cloned();
        }
        None
    }

    /// Looks up a resource and one of its fields. The field is `None` when the
    /// resource exists but does not define it.
    ///
    /// A missing field also triggers discovery, since extensions installed by
    /// other providers may add it.
    pub fn lookup_field(&self, resource: &str, field: &str) -> (Option<ResourceInfo>, Option<FieldInfo>) {
        let Some(mut info) = self.lookup(resource) else {
            return (None, None);
        };
        if !info.fields.contains_key(field) && self.discover() {
            if let Some(merged) = read(&self.state).resources.get(resource) {
                info = merged.clone();
            }
        }
        let field = info.fields.get(field).cloned();
        (Some(info), field)
    }

    /// Marks every schema as loaded; lookups will no longer try discovery.
    pub fn deactivate_discovery(&self) {
        self.all_loaded.store(true, Ordering::SeqCst);
    }

    pub fn is_fully_loaded(&self) -> bool {
        self.all_loaded.load(Ordering::SeqCst)
    }

    /// Names of every resource in the merged schema.
    pub fn resource_names(&self) -> Vec<String> {
        read(&self.state).resources.keys().cloned().collect()
    }

    pub fn providers(&self) -> Vec<String> {
        read(&self.state).loaded.keys().cloned().collect()
    }

    fn discover(&self) -> bool {
        let Some(source) = &self.source else {
            return false;
        };
        if self.all_loaded.swap(true, Ordering::SeqCst) {
            return false;
        }
        let schemas = source.schemas();
        debug!(count = schemas.len(), "loading installed provider schemas");
        for (name, schema) in &schemas {
            self.add(name, schema);
        }
        !schemas.is_empty()
    }
}

fn inherit_provider(field: &mut FieldInfo, resource_provider: &str) {
    if field.provider.is_empty() {
        field.provider = resource_provider.to_string();
    }
}

fn merge_resource(existing: &mut ResourceInfo, incoming: &ResourceInfo) {
    // A resource first seen as a pure extension adopts the first real constructor.
    if existing.provider.is_empty() && !incoming.provider.is_empty() && !incoming.is_extension {
        existing.provider = incoming.provider.clone();
        existing.is_extension = false;
        if existing.title.is_empty() {
            existing.title = incoming.title.clone();
        }
    }

    for (name, field) in &incoming.fields {
        if existing.fields.contains_key(name) {
            continue;
        }
        let mut field = field.clone();
        inherit_provider(&mut field, &incoming.provider);
        existing.fields.insert(name.clone(), field);
    }
}
