use super::Recording;
use super::file::{ConnectionEntry, RecordingFile};
use crate::error::RecordingError;
use crate::sync::{read, write};
use chrono::{DateTime, Utc};
use inquest_types::{Asset, ConnectionConfig, RawData, ResourceData};
use std::collections::{BTreeMap, HashMap};
use std::fs::{create_dir_all, write as write_file};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::{debug, warn};

/// Everything recorded for one asset, across all providers connected to it.
#[derive(Debug, Clone, Default)]
pub(crate) struct AssetRecording {
    pub asset: Asset,
    pub connections: Vec<ConnectionEntry>,
    pub resources: BTreeMap<(String, String), ResourceData>,
}

#[derive(Debug)]
pub(crate) struct RecordingState {
    pub created_at: DateTime<Utc>,
    pub assets: Vec<AssetRecording>,
    /// Connection id to index into `assets`.
    pub by_connection: HashMap<u32, usize>,
}

impl Default for RecordingState {
    fn default() -> Self {
        Self {
            created_at: Utc::now(),
            assets: Vec::new(),
            by_connection: HashMap::new(),
        }
    }
}

impl RecordingState {
    pub fn asset_index(&self, asset: &Asset) -> Option<usize> {
        self.assets.iter().position(|entry| entry.asset.same_target(asset))
    }

    fn resource(&self, connection_id: u32, resource: &str, id: &str) -> Option<&ResourceData> {
        let idx = *self.by_connection.get(&connection_id)?;
        self.assets.get(idx)?.resources.get(&(resource.to_string(), id.to_string()))
    }
}

/// Mutable recording held in memory, optionally persisted to a JSON file.
#[derive(Debug, Default)]
pub struct RecordingStore {
    state: RwLock<RecordingState>,
    path: Option<PathBuf>,
}

impl RecordingStore {
    /// A recording that lives only as long as the runtime using it.
    pub fn new_in_memory() -> Self {
        Self::default()
    }

    /// A recording that is written to `path` on [`Recording::save`].
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            state: RwLock::new(RecordingState::default()),
            path: Some(path.into()),
        }
    }

    pub(crate) fn from_state(state: RecordingState, path: Option<PathBuf>) -> Self {
        Self {
            state: RwLock::new(state),
            path,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Assets recorded so far, in insertion order.
    pub fn assets(&self) -> Vec<Asset> {
        read(&self.state).assets.iter().map(|entry| entry.asset.clone()).collect()
    }

    /// Binds a connection id to an already recorded asset without adding a
    /// new asset entry. Returns `false` when nothing suitable is recorded.
    pub(crate) fn bind_connection(&self, asset: &Asset, connection_id: u32) -> bool {
        let mut state = write(&self.state);
        let idx = match state.asset_index(asset) {
            Some(idx) => idx,
            None if state.assets.len() == 1 => 0,
            None => return false,
        };
        state.by_connection.insert(connection_id, idx);
        true
    }

    /// Serializes the current contents in the recording file format.
    pub fn to_json(&self) -> Result<String, RecordingError> {
        let file = RecordingFile::from_state(&read(&self.state));
        Ok(serde_json::to_string_pretty(&file)?)
    }
}

impl Recording for RecordingStore {
    fn ensure_asset(&self, asset: &Asset, provider_id: &str, connection_id: u32, conf: &ConnectionConfig) {
        let mut state = write(&self.state);
        let idx = match state.asset_index(asset) {
            Some(idx) => idx,
            None => {
                state.assets.push(AssetRecording {
                    asset: asset.clone(),
                    ..Default::default()
                });
                state.assets.len() - 1
            }
        };

        let entry = &mut state.assets[idx];
        let known = entry
            .connections
            .iter()
            .any(|conn| conn.id == connection_id && conn.provider == provider_id);
        if !known {
            entry.connections.push(ConnectionEntry {
                provider: provider_id.to_string(),
                connector: conf.connection_type.clone(),
                id: connection_id,
            });
        }
        state.by_connection.insert(connection_id, idx);
        debug!(provider = %provider_id, connection = connection_id, asset = %asset.name, "recording bound to asset");
    }

    fn get_resource(&self, connection_id: u32, resource: &str, id: &str) -> Option<ResourceData> {
        read(&self.state).resource(connection_id, resource, id).cloned()
    }

    fn get_data(&self, connection_id: u32, resource: &str, id: &str, field: &str) -> Option<RawData> {
        read(&self.state)
            .resource(connection_id, resource, id)
            .and_then(|data| data.fields.get(field))
            .cloned()
    }

    fn add_data(&self, connection_id: u32, resource: &str, id: &str, field: &str, data: Option<&RawData>) {
        let mut state = write(&self.state);
        let Some(&idx) = state.by_connection.get(&connection_id) else {
            warn!(connection = connection_id, resource = %resource, "cannot record data for an unknown connection");
            return;
        };
        let entry = state.assets[idx]
            .resources
            .entry((resource.to_string(), id.to_string()))
            .or_insert_with(|| ResourceData {
                name: resource.to_string(),
                id: id.to_string(),
                fields: BTreeMap::new(),
            });
        if field.is_empty() {
            return;
        }
        entry.fields.insert(field.to_string(), data.cloned().unwrap_or_default());
    }

    fn save(&self) -> Result<(), RecordingError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            create_dir_all(parent)?;
        }
        write_file(path, self.to_json()?)?;
        debug!(path = %path.display(), "recording saved");
        Ok(())
    }
}
