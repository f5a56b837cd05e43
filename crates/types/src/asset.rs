//! Asset identity threaded through every provider connection.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A target that providers connect to (a host, a cloud account, a cluster).
///
/// The runtime never interprets the asset beyond its connection list; it is
/// passed unchanged to every provider that attaches to the same target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Asset {
    /// Stable identifier assigned by the inventory.
    pub id: String,
    /// Platform-wide resource name, if one was assigned.
    pub mrn: String,
    /// Human readable name.
    pub name: String,
    /// Identifiers reported by the platform (machine ids, ARNs, ...).
    pub platform_ids: Vec<String>,
    /// Ways to reach this asset, in order of preference.
    pub connections: Vec<ConnectionConfig>,
    /// Free-form labels.
    pub labels: BTreeMap<String, String>,
}

impl Asset {
    /// Whether two assets describe the same logical target.
    ///
    /// Matches on the inventory id, then the mrn, then any shared platform id.
    /// Assets carrying none of those match only when they are equal.
    pub fn same_target(&self, other: &Asset) -> bool {
        if self == other {
            return true;
        }
        if !self.id.is_empty() && self.id == other.id {
            return true;
        }
        if !self.mrn.is_empty() && self.mrn == other.mrn {
            return true;
        }
        self.platform_ids.iter().any(|id| other.platform_ids.contains(id))
    }
}

/// Connection settings for one way of reaching an asset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionConfig {
    /// Connection id assigned by the provider once connected.
    pub id: u32,
    /// Connection type, e.g. `ssh`, `local`, `aws`.
    #[serde(rename = "type")]
    pub connection_type: String,
    /// Deprecated predecessor of `type`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
    pub host: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    pub path: String,
    /// Provider specific options.
    pub options: BTreeMap<String, String>,
}

impl ConnectionConfig {
    /// Create a config for the given connection type.
    pub fn new(connection_type: impl Into<String>) -> Self {
        Self {
            connection_type: connection_type.into(),
            ..Default::default()
        }
    }

    /// Builder-style host setter.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Returns the connection type, falling back to the deprecated `backend`.
    pub fn normalized_type(&self) -> Option<String> {
        if !self.connection_type.is_empty() {
            return Some(self.connection_type.clone());
        }
        self.backend.as_deref().map(connection_type_for_backend)
    }
}

/// Maps a deprecated backend name onto its connection type.
pub fn connection_type_for_backend(backend: &str) -> String {
    match backend {
        "local_os" | "local" => "local",
        "ssh" => "ssh",
        "winrm" => "winrm",
        "docker_image" => "docker-image",
        "docker_container" => "docker-container",
        "docker_registry" | "container_registry" => "container-registry",
        "k8s" | "kubernetes" => "k8s",
        "aws" | "aws_ec2_ebs" => "aws",
        "gcp" => "gcp",
        "azure" => "azure",
        "vsphere" | "vsphere_vm" => "vsphere",
        "terraform_hcl" | "terraform" => "terraform-hcl",
        other => other,
    }
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalized_type_prefers_explicit_type() {
        let mut conf = ConnectionConfig::new("ssh");
        conf.backend = Some("local_os".into());
        assert_eq!(conf.normalized_type().as_deref(), Some("ssh"));
    }

    #[test]
    fn normalized_type_falls_back_to_backend() {
        let conf = ConnectionConfig {
            backend: Some("docker_container".into()),
            ..Default::default()
        };
        assert_eq!(conf.normalized_type().as_deref(), Some("docker-container"));
        assert_eq!(ConnectionConfig::default().normalized_type(), None);
    }

    #[test]
    fn same_target_matches_on_platform_ids() {
        let a = Asset {
            platform_ids: vec!["//platform/host/abc".into()],
            ..Default::default()
        };
        let b = Asset {
            id: "other".into(),
            platform_ids: vec!["//platform/host/abc".into(), "x".into()],
            ..Default::default()
        };
        assert!(a.same_target(&b));
        assert!(!a.same_target(&Asset::default()));
    }

    #[test]
    fn deserializes_inventory_yaml() {
        let yaml = r#"
name: web-1
connections:
  - type: ssh
    host: 10.0.0.1
    port: 22
labels:
  env: prod
"#;
        let asset: Asset = serde_yaml::from_str(yaml).expect("asset yaml");
        assert_eq!(asset.connections[0].connection_type, "ssh");
        assert_eq!(asset.connections[0].port, Some(22));
        assert_eq!(asset.labels.get("env").map(String::as_str), Some("prod"));
    }
}
