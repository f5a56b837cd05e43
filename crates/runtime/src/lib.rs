//! Provider coordination and field resolution runtime.
//!
//! A [`Coordinator`] starts or reuses provider processes; a [`Runtime`] binds
//! one asset to a primary provider plus any secondary providers its schema
//! requires, and resolves resource fields through a [`Recording`] so repeated
//! and replayed reads stay consistent.

pub mod catalog;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod mock;
pub mod plugin;
pub mod recording;
pub mod runtime;
pub mod schema;
mod sync;

pub use catalog::{InstallRequest, InstalledProvider, ProviderCatalog, ProviderInstaller};
pub use config::{AutoUpdateConfig, ConfigError, InquestConfig, RecordingConfig};
pub use coordinator::{Coordinator, ProcessLauncher, ProviderLauncher, RunningProvider, RuntimeDefaults};
pub use error::{CallbackError, CoordinatorError, RecordingError, RuntimeError, TransportError};
pub use plugin::{ProviderCallbacks, ProviderPlugin, StdioPlugin};
pub use recording::{ReadOnlyRecording, Recording, RecordingStore, load_recording_file};
pub use runtime::{ConnectedProvider, Runtime};
pub use schema::{SchemaRegistry, SchemaSource};

/// Provider every asset may use regardless of its primary provider.
pub const CORE_PROVIDER_ID: &str = "inquest.dev/providers/core";

/// Network provider, trusted for every asset like the core provider.
pub const NETWORK_PROVIDER_ID: &str = "inquest.dev/providers/network";
