//! On-disk recording format.

use super::store::{AssetRecording, RecordingState, RecordingStore};
use crate::error::RecordingError;
use chrono::{DateTime, Utc};
use inquest_types::{Asset, RawData, ResourceData};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RecordingFile {
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub assets: Vec<AssetEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct AssetEntry {
    pub asset: Asset,
    #[serde(default)]
    pub connections: Vec<ConnectionEntry>,
    #[serde(default)]
    pub resources: Vec<ResourceEntry>,
}

/// A provider connection recorded against an asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct ConnectionEntry {
    pub provider: String,
    pub connector: String,
    pub id: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ResourceEntry {
    pub resource: String,
    pub id: String,
    #[serde(default)]
    pub fields: BTreeMap<String, RawData>,
}

impl RecordingFile {
    pub fn from_state(state: &RecordingState) -> Self {
        let assets = state
            .assets
            .iter()
            .map(|entry| AssetEntry {
                asset: entry.asset.clone(),
                connections: entry.connections.clone(),
                resources: entry
                    .resources
                    .values()
                    .map(|data| ResourceEntry {
                        resource: data.name.clone(),
                        id: data.id.clone(),
                        fields: data.fields.clone(),
                    })
                    .collect(),
            })
            .collect();
        Self {
            created_at: state.created_at,
            assets,
        }
    }

    pub fn into_state(self) -> RecordingState {
        let mut by_connection = HashMap::new();
        let mut assets = Vec::with_capacity(self.assets.len());
        for (idx, entry) in self.assets.into_iter().enumerate() {
            for conn in &entry.connections {
                by_connection.insert(conn.id, idx);
            }
            let resources = entry
                .resources
                .into_iter()
                .map(|res| {
                    let key = (res.resource.clone(), res.id.clone());
                    let data = ResourceData {
                        name: res.resource,
                        id: res.id,
                        fields: res.fields,
                    };
                    (key, data)
                })
                .collect();
            assets.push(AssetRecording {
                asset: entry.asset,
                connections: entry.connections,
                resources,
            });
        }
        RecordingState {
            created_at: self.created_at,
            assets,
            by_connection,
        }
    }
}

/// Loads a recording previously written by [`crate::Recording::save`].
///
/// The returned store keeps `path` as its save target. Wrap it in a
/// [`crate::ReadOnlyRecording`] to replay it without reaching providers.
pub fn load_recording_file(path: &Path) -> Result<RecordingStore, RecordingError> {
    let content = fs::read_to_string(path)?;
    let file: RecordingFile = serde_json::from_str(&content)?;
    debug!(path = %path.display(), assets = file.assets.len(), "recording loaded");
    Ok(RecordingStore::from_state(file.into_state(), Some(path.to_path_buf())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Recording;
    use inquest_types::{ConnectionConfig, Primitive};
    use tempfile::tempdir;

    #[test]
    fn save_and_load_preserve_values_and_errors() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("recording.json");

        let asset = Asset {
            mrn: "//assets/web-1".into(),
            connections: vec![ConnectionConfig::new("ssh").with_host("10.0.0.1")],
            ..Default::default()
        };
        let store = RecordingStore::with_path(&path);
        store.ensure_asset(&asset, "inquest.dev/providers/os", 3, &asset.connections[0]);
        store.add_data(3, "os.file", "/etc/hosts", "content", Some(&RawData::value(Primitive::from("127.0.0.1 localhost"))));
        store.add_data(3, "os.file", "/etc/hosts", "owner", Some(&RawData::error("permission denied")));
        store.add_data(3, "os.user", "root", "", None);
        store.save().expect("save");

        let loaded = load_recording_file(&path).expect("load");
        assert_eq!(
            loaded.get_data(3, "os.file", "/etc/hosts", "content"),
            Some(RawData::value(Primitive::from("127.0.0.1 localhost")))
        );
        assert_eq!(
            loaded.get_data(3, "os.file", "/etc/hosts", "owner"),
            Some(RawData::error("permission denied"))
        );
        assert!(loaded.get_resource(3, "os.user", "root").is_some());
        assert_eq!(loaded.assets(), vec![asset]);
    }

    #[test]
    fn file_uses_documented_keys() {
        let store = RecordingStore::new_in_memory();
        let asset = Asset {
            id: "a".into(),
            ..Default::default()
        };
        store.ensure_asset(&asset, "inquest.dev/providers/os", 1, &ConnectionConfig::new("local"));
        store.add_data(1, "os.file", "/tmp", "size", Some(&RawData::value(Primitive::Int(4))));

        let json: serde_json::Value = serde_json::from_str(&store.to_json().unwrap()).unwrap();
        assert!(json["createdAt"].is_string());
        let entry = &json["assets"][0];
        assert_eq!(entry["connections"][0]["connector"], "local");
        assert_eq!(entry["resources"][0]["resource"], "os.file");
        assert_eq!(entry["resources"][0]["fields"]["size"]["data"]["value"], 4);
    }

    #[test]
    fn malformed_file_is_a_json_error() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("broken.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(load_recording_file(&path), Err(RecordingError::Json(_))));
    }
}
