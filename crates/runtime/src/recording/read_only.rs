use super::{Recording, RecordingStore};
use crate::error::RecordingError;
use inquest_types::{Asset, ConnectionConfig, RawData, ResourceData};
use std::sync::Arc;
use tracing::warn;

/// Replay view over a recorded store.
///
/// Lookups behave exactly like the wrapped store; writes and saves are
/// dropped, so a replay never changes the fixture it reads from.
#[derive(Debug, Clone)]
pub struct ReadOnlyRecording {
    inner: Arc<RecordingStore>,
}

impl ReadOnlyRecording {
    pub fn new(inner: Arc<RecordingStore>) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &Arc<RecordingStore> {
        &self.inner
    }
}

impl From<RecordingStore> for ReadOnlyRecording {
    fn from(store: RecordingStore) -> Self {
        Self::new(Arc::new(store))
    }
}

impl Recording for ReadOnlyRecording {
    fn ensure_asset(&self, asset: &Asset, provider_id: &str, connection_id: u32, _conf: &ConnectionConfig) {
        // Connection ids of the replay session rarely match the recorded ones.
        if !self.inner.bind_connection(asset, connection_id) {
            warn!(provider = %provider_id, connection = connection_id, asset = %asset.name, "asset not found in recording");
        }
    }

    fn get_resource(&self, connection_id: u32, resource: &str, id: &str) -> Option<ResourceData> {
        self.inner.get_resource(connection_id, resource, id)
    }

    fn get_data(&self, connection_id: u32, resource: &str, id: &str, field: &str) -> Option<RawData> {
        self.inner.get_data(connection_id, resource, id, field)
    }

    fn add_data(&self, _connection_id: u32, _resource: &str, _id: &str, _field: &str, _data: Option<&RawData>) {}

    fn save(&self) -> Result<(), RecordingError> {
        Ok(())
    }

    fn is_read_only(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use inquest_types::Primitive;

    fn recorded() -> (Asset, RecordingStore) {
        let asset = Asset {
            id: "//assets/web-1".into(),
            ..Default::default()
        };
        let store = RecordingStore::new_in_memory();
        store.ensure_asset(&asset, "inquest.dev/providers/os", 1, &ConnectionConfig::new("ssh"));
        store.add_data(1, "os.file", "/etc/hosts", "content", Some(&RawData::value(Primitive::from("x"))));
        (asset, store)
    }

    #[test]
    fn fresh_connection_ids_bind_to_recorded_asset() {
        let (asset, store) = recorded();
        let replay = ReadOnlyRecording::from(store);
        replay.ensure_asset(&asset, "inquest.dev/providers/os", 42, &ConnectionConfig::new("ssh"));

        assert!(replay.is_read_only());
        assert_eq!(
            replay.get_data(42, "os.file", "/etc/hosts", "content"),
            Some(RawData::value(Primitive::from("x")))
        );
    }

    #[test]
    fn writes_are_ignored() {
        let (asset, store) = recorded();
        let replay = ReadOnlyRecording::from(store);
        replay.ensure_asset(&asset, "inquest.dev/providers/os", 1, &ConnectionConfig::new("ssh"));
        replay.add_data(1, "os.file", "/etc/hosts", "size", Some(&RawData::value(Primitive::Int(1))));

        assert!(replay.get_data(1, "os.file", "/etc/hosts", "size").is_none());
        assert_eq!(replay.inner().assets().len(), 1);
    }
}
