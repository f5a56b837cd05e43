//! Provider identity as published in its descriptor file.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Static description of an installed provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderDescriptor {
    /// Stable identity, e.g. `inquest.dev/providers/os`.
    pub id: String,
    /// Short name, also the directory and executable name.
    pub name: String,
    pub version: String,
    /// Connection types this provider can open as primary provider.
    pub connection_types: Vec<String>,
    /// Ids of primary providers whose assets this provider may also serve.
    pub cross_provider_types: Vec<String>,
    /// Executable location, filled in when loaded from disk.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl ProviderDescriptor {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            version: "0.0.0".to_string(),
            ..Default::default()
        }
    }

    pub fn with_connection_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.connection_types = types.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_cross_provider_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cross_provider_types = types.into_iter().map(Into::into).collect();
        self
    }

    pub fn supports_connection(&self, connection_type: &str) -> bool {
        self.connection_types.iter().any(|t| t == connection_type)
    }
}
