//! Cache and replay store for resource instances and field values.
//!
//! Every read resolved by a runtime goes through a [`Recording`]: a hit is
//! returned without contacting any provider, a miss is fetched and written
//! back. A read-only recording turns every miss into an error instead.

mod file;
mod read_only;
mod store;

pub use file::load_recording_file;
pub use read_only::ReadOnlyRecording;
pub use store::RecordingStore;

use crate::error::RecordingError;
use inquest_types::{Asset, ConnectionConfig, RawData, ResourceData};

/// Storage contract shared by live and replayed recordings.
///
/// Keys are `(connection, resource name, resource id, field)`. Connections
/// are bound to an asset through [`Recording::ensure_asset`] first; lookups on
/// an unbound connection miss.
pub trait Recording: Send + Sync {
    /// Binds `connection_id` of `provider_id` to `asset`. Idempotent.
    fn ensure_asset(&self, asset: &Asset, provider_id: &str, connection_id: u32, conf: &ConnectionConfig);

    /// Returns the resource with every field recorded so far.
    fn get_resource(&self, connection_id: u32, resource: &str, id: &str) -> Option<ResourceData>;

    fn get_data(&self, connection_id: u32, resource: &str, id: &str, field: &str) -> Option<RawData>;

    /// Records a field value. An empty `field` only records that the
    /// resource exists.
    fn add_data(&self, connection_id: u32, resource: &str, id: &str, field: &str, data: Option<&RawData>);

    /// Persists the recording. Recordings without a backing file do nothing.
    fn save(&self) -> Result<(), RecordingError>;

    /// Whether misses must fail instead of reaching a live provider.
    fn is_read_only(&self) -> bool {
        false
    }
}
