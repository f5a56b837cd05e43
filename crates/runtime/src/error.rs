//! Error types for provider coordination and field resolution.

use thiserror::Error;

/// Failures talking to a provider.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The provider process is gone. Fatal for the provider instance.
    #[error("the '{provider}' provider is unavailable: {message}")]
    Unavailable { provider: String, message: String },

    /// The provider answered the request with a failure.
    #[error("{message}")]
    Remote { message: String },

    /// A frame could not be encoded, decoded or matched to its request.
    #[error("protocol error: {message}")]
    Protocol { message: String },
}

impl TransportError {
    pub fn unavailable(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Unavailable {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn remote(message: impl Into<String>) -> Self {
        Self::Remote { message: message.into() }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol { message: message.into() }
    }

    /// Whether the provider process must be considered dead.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, TransportError::Unavailable { .. })
    }
}

/// Failures installing, launching or handshaking with providers.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("provider '{provider}' is not installed")]
    NotInstalled { provider: String },

    #[error("failed to install provider '{provider}': {reason}")]
    InstallFailed { provider: String, reason: String },

    #[error("failed to start provider '{provider}': {reason}")]
    SpawnFailed { provider: String, reason: String },

    #[error("handshake with provider '{provider}' failed: {reason}")]
    HandshakeFailed { provider: String, reason: String },

    #[error("failed to load schema of provider '{provider}': {source}")]
    SchemaFailed {
        provider: String,
        #[source]
        source: TransportError,
    },

    #[error("no provider installed for connection type '{connection_type}'")]
    NoProviderForConnection { connection_type: String },
}

impl CoordinatorError {
    pub fn spawn_failed(provider: impl Into<String>, reason: impl ToString) -> Self {
        Self::SpawnFailed {
            provider: provider.into(),
            reason: reason.to_string(),
        }
    }

    pub fn handshake_failed(provider: impl Into<String>, reason: impl ToString) -> Self {
        Self::HandshakeFailed {
            provider: provider.into(),
            reason: reason.to_string(),
        }
    }
}

/// Failures loading or persisting a recording.
#[derive(Debug, Error)]
pub enum RecordingError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors surfaced by [`crate::Runtime`] operations.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("cannot connect, please select a provider first")]
    NoProviderSelected,

    #[error("cannot connect, no asset info provided")]
    NoAsset,

    #[error("cannot connect to asset, no connection info provided")]
    NoConnections,

    #[error("asset has no connections, can't detect provider")]
    NothingToDetect,

    #[error("cannot find provider for this asset: {}", errors.join("; "))]
    DetectFailed { errors: Vec<String> },

    #[error("resource '{resource}' not found in schema")]
    ResourceNotFound { resource: String },

    #[error("field '{field}' of resource '{resource}' not found in schema")]
    FieldNotFound { resource: String, field: String },

    #[error("resource '{resource}' has no provider to serve it")]
    NoProviderForResource { resource: String },

    #[error("incorrect provider for asset, not adding: '{provider}' cannot serve assets of '{primary}'")]
    IncorrectProvider { provider: String, primary: String },

    #[error("no connection to provider '{provider}'")]
    NotConnected { provider: String },

    #[error("failed to start provider '{provider}': {source}")]
    StartProvider {
        provider: String,
        #[source]
        source: CoordinatorError,
    },

    #[error("the '{provider}' provider crashed")]
    ProviderCrashed { provider: String },

    #[error("the '{provider}' provider has been stopped")]
    ProviderStopped { provider: String },

    #[error("provider '{provider}' failed: {source}")]
    Transport {
        provider: String,
        #[source]
        source: TransportError,
    },

    #[error("failed to create reference resource '{resource}' in provider '{provider}': {source}")]
    Bridge {
        resource: String,
        provider: String,
        #[source]
        source: TransportError,
    },

    #[error("cannot create '{resource}': {message}")]
    Construct { resource: String, message: String },

    #[error("failed to store resource '{resource}': {message}")]
    Store { resource: String, message: String },

    #[error("recording has no data for field '{field}' of {resource} (id = {id})")]
    ReplayMiss { resource: String, id: String, field: String },

    #[error("runtime is closed")]
    Closed,

    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),
}

/// Errors returned to a provider calling back into the runtime.
#[derive(Debug, Error)]
pub enum CallbackError {
    #[error("'{operation}' is not implemented by the runtime")]
    NotImplemented { operation: String },

    #[error("the runtime that owns this connection is gone")]
    RuntimeGone,

    #[error("callback failed: {message}")]
    Remote { message: String },

    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}
