//! Kubeconfig model
//!
//! The kubeconfig is both the credential handed to the user and the
//! container for persisted bootstrap state, which travels as a named entry
//! in the top-level `extensions` list.

use serde::{Deserialize, Serialize};

use crate::Result;

/// Kubeconfig document
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Kubeconfig {
    /// API version
    #[serde(rename = "apiVersion", default = "default_api_version")]
    pub api_version: String,
    /// Kind (always "Config")
    #[serde(default = "default_kind")]
    pub kind: String,
    /// Clusters
    #[serde(default)]
    pub clusters: Vec<KubeconfigCluster>,
    /// Users
    #[serde(default)]
    pub users: Vec<KubeconfigUser>,
    /// Contexts
    #[serde(default)]
    pub contexts: Vec<KubeconfigContext>,
    /// Current context
    #[serde(rename = "current-context", default)]
    pub current_context: String,
    /// Named extensions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extensions: Vec<NamedExtension>,
}

fn default_api_version() -> String {
    "v1".to_string()
}

fn default_kind() -> String {
    "Config".to_string()
}

impl Default for Kubeconfig {
    fn default() -> Self {
        Self {
            api_version: default_api_version(),
            kind: default_kind(),
            clusters: Vec::new(),
            users: Vec::new(),
            contexts: Vec::new(),
            current_context: String::new(),
            extensions: Vec::new(),
        }
    }
}

/// Cluster entry in kubeconfig
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KubeconfigCluster {
    /// Cluster name
    pub name: String,
    /// Cluster config
    pub cluster: ClusterConfig,
}

/// Cluster configuration
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// API server URL
    pub server: String,
    /// CA certificate (base64 encoded PEM)
    #[serde(
        rename = "certificate-authority-data",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub certificate_authority_data: Option<String>,
}

/// User entry in kubeconfig
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KubeconfigUser {
    /// User name
    pub name: String,
    /// User config
    pub user: UserConfig,
}

/// User configuration
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UserConfig {
    /// Client certificate (base64 encoded PEM)
    #[serde(
        rename = "client-certificate-data",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub client_certificate_data: Option<String>,
    /// Client key (base64 encoded PEM)
    #[serde(
        rename = "client-key-data",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub client_key_data: Option<String>,
    /// Bearer token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// Context entry in kubeconfig
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KubeconfigContext {
    /// Context name
    pub name: String,
    /// Context config
    pub context: ContextConfig,
}

/// Context configuration
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Cluster name
    pub cluster: String,
    /// User name
    pub user: String,
    /// Default namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// A named extension carrying arbitrary structured data
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NamedExtension {
    /// Extension name
    pub name: String,
    /// Extension payload
    pub extension: serde_json::Value,
}

impl Kubeconfig {
    /// Parse a kubeconfig from YAML
    pub fn from_yaml(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// Serialize to YAML
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Payload of the named extension, if present
    pub fn extension(&self, name: &str) -> Option<&serde_json::Value> {
        self.extensions
            .iter()
            .find(|e| e.name == name)
            .map(|e| &e.extension)
    }

    /// Store `value` under `name`, replacing any previous entry of that name
    pub fn set_extension(&mut self, name: &str, value: serde_json::Value) {
        self.extensions.retain(|e| e.name != name);
        self.extensions.push(NamedExtension {
            name: name.to_string(),
            extension: value,
        });
    }

    /// Copy without any extensions, for handing to the user
    pub fn without_extensions(&self) -> Self {
        Self {
            extensions: Vec::new(),
            ..self.clone()
        }
    }

    /// Server URL of the current context's cluster, falling back to the first cluster
    pub fn server(&self) -> Option<&str> {
        let cluster_name = self
            .contexts
            .iter()
            .find(|c| c.name == self.current_context)
            .map(|c| c.context.cluster.as_str());
        self.clusters
            .iter()
            .find(|c| Some(c.name.as_str()) == cluster_name)
            .or_else(|| self.clusters.first())
            .map(|c| c.cluster.server.as_str())
    }
}
