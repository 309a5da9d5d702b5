//! Shared context for one cluster operation

use serde::{Deserialize, Serialize};

use crate::kubeconfig::Kubeconfig;
use crate::manifest::Manifests;

/// Default namespace for cluster resources
pub const DEFAULT_NAMESPACE: &str = "default";

/// Default ceiling for embedded payload content in bytes.
///
/// Linode accepts 64 KiB of base64 user data; base64 grows content by a
/// third, which leaves roughly 48 KiB for raw file content.
pub const DEFAULT_PAYLOAD_CEILING: usize = 48 * 1024;

/// Mutable values threaded through every provider call.
///
/// Serialized with PascalCase keys: the same serialization is the template
/// context (`[[[ .ClusterName ]]]`) and the `Values` slot of persisted state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Values {
    /// Cluster name
    pub cluster_name: String,
    /// Token the first control plane node authenticates with
    pub bootstrap_token: String,
    /// Namespace of the cluster resources
    pub namespace: String,
    /// Admin kubeconfig produced by the control plane provider
    #[serde(skip)]
    pub kubeconfig: Option<Kubeconfig>,
    /// Kubernetes version taken from the control plane resource
    pub k8s_version: String,
    /// SSH keys installed on the bootstrap node
    #[serde(rename = "SSHAuthorizedKeys")]
    pub ssh_authorized_keys: Vec<String>,
    /// Kind of the infrastructure cluster resource
    pub cluster_kind: String,
    /// Host (no scheme, no port) of the API server front-end
    pub cluster_endpoint: String,
    /// Path of the user's manifest template
    pub manifest_file: String,
    /// Directory on the node that holds manifests applied after boot
    pub bootstrap_manifest_dir: String,
    /// Rendered manifest documents
    #[serde(skip)]
    pub manifests: Manifests,
    /// Bundle all files into one archive
    pub tar_write_files: bool,
    /// Ceiling for embedded payload content in bytes
    pub payload_ceiling: usize,
}

impl Default for Values {
    fn default() -> Self {
        Self {
            cluster_name: String::new(),
            bootstrap_token: String::new(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            kubeconfig: None,
            k8s_version: String::new(),
            ssh_authorized_keys: Vec::new(),
            cluster_kind: String::new(),
            cluster_endpoint: String::new(),
            manifest_file: String::new(),
            bootstrap_manifest_dir: String::new(),
            manifests: Manifests::default(),
            tar_write_files: false,
            payload_ceiling: DEFAULT_PAYLOAD_CEILING,
        }
    }
}

impl Values {
    /// Values for a new operation on `cluster_name`
    pub fn new(cluster_name: impl Into<String>) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            ..Self::default()
        }
    }
}
