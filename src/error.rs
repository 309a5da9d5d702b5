//! Error types for capi-bootstrap

use thiserror::Error;

/// Main error type for bootstrap operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Invalid or incomplete user input (manifest, flags, config file)
    #[error("configuration error: {0}")]
    Config(String),

    /// A required environment variable is unset or empty
    #[error("{0} environment variable is required")]
    MissingEnv(String),

    /// No provider is registered under the requested name
    #[error("unknown {axis} provider '{name}' (known: {known})")]
    UnknownProvider {
        /// Which registry axis was searched
        axis: &'static str,
        /// The name that failed to resolve
        name: String,
        /// Comma separated list of registered names
        known: String,
    },

    /// A resource the pipeline depends on is absent from the manifest
    #[error("{kind} not found in manifest")]
    ResourceNotFound {
        /// Kind of the missing resource
        kind: String,
    },

    /// A template failed to parse or render
    #[error("failed to render template {name}: {message}")]
    Template {
        /// Template name (file path or embedded asset name)
        name: String,
        /// Underlying engine message
        message: String,
    },

    /// A resource that must not pre-exist was found
    #[error("{0} already exists")]
    AlreadyExists(String),

    /// No persisted state exists for the named cluster
    #[error("cluster {0} not found")]
    ClusterNotFound(String),

    /// Control plane certificates were requested before generation
    #[error("missing control plane certs")]
    NoCertificates,

    /// Certificate or key generation failed
    #[error("pki error: {0}")]
    Pki(String),

    /// A remote provider or backend API call failed
    #[error("{operation} failed: {message}")]
    Remote {
        /// Operation that failed, e.g. "create node balancer"
        operation: String,
        /// Response body or transport error
        message: String,
    },

    /// A payload artifact could not be generated
    #[error("failed to generate {artifact}: {source}")]
    Artifact {
        /// Name of the artifact being generated
        artifact: String,
        /// Cause
        #[source]
        source: Box<Error>,
    },

    /// HTTP transport error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// YAML (de)serialization error
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON (de)serialization error
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a configuration error with the given message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a missing environment variable error
    pub fn missing_env(var: impl Into<String>) -> Self {
        Self::MissingEnv(var.into())
    }

    /// Create a resource-not-found error for the given kind
    pub fn resource_not_found(kind: impl Into<String>) -> Self {
        Self::ResourceNotFound { kind: kind.into() }
    }

    /// Create a template error
    pub fn template(name: impl Into<String>, message: impl ToString) -> Self {
        Self::Template {
            name: name.into(),
            message: message.to_string(),
        }
    }

    /// Create an already-exists error
    pub fn already_exists(what: impl Into<String>) -> Self {
        Self::AlreadyExists(what.into())
    }

    /// Create a pki error with the given message
    pub fn pki(msg: impl ToString) -> Self {
        Self::Pki(msg.to_string())
    }

    /// Create a remote API error
    pub fn remote(operation: impl Into<String>, message: impl ToString) -> Self {
        Self::Remote {
            operation: operation.into(),
            message: message.to_string(),
        }
    }

    /// Returns true if this error is, or wraps, [`Error::NoCertificates`]
    pub fn is_no_certificates(&self) -> bool {
        match self {
            Self::NoCertificates => true,
            Self::Artifact { source, .. } => source.is_no_certificates(),
            _ => false,
        }
    }
}

/// Extension trait that tags an error with the artifact being generated
pub trait ArtifactExt<T> {
    /// Wrap the error so the message names the artifact
    fn artifact(self, name: &str) -> Result<T, Error>;
}

impl<T, E: Into<Error>> ArtifactExt<T> for Result<T, E> {
    fn artifact(self, name: &str) -> Result<T, Error> {
        self.map_err(|e| Error::Artifact {
            artifact: name.to_string(),
            source: Box::new(e.into()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Story: a misspelled provider name tells the user what is available
    #[test]
    fn story_unknown_provider_lists_known_names() {
        let err = Error::UnknownProvider {
            axis: "infrastructure",
            name: "LinodeClustr".to_string(),
            known: "LinodeCluster".to_string(),
        };

        let msg = err.to_string();
        assert!(msg.contains("LinodeClustr"));
        assert!(msg.contains("known: LinodeCluster"));
    }

    /// Story: payload assembly failures name the file that could not be built
    #[test]
    fn story_artifact_errors_name_the_artifact() {
        // Scenario: control plane certs were never generated
        let result: Result<(), Error> = Err(Error::NoCertificates);
        let err = result.artifact("cp-secrets.yaml").unwrap_err();

        assert_eq!(
            err.to_string(),
            "failed to generate cp-secrets.yaml: missing control plane certs"
        );
        assert!(err.is_no_certificates());
    }

    #[test]
    fn missing_env_message_names_variable() {
        let err = Error::missing_env("LINODE_TOKEN");
        assert_eq!(err.to_string(), "LINODE_TOKEN environment variable is required");
    }

    #[test]
    fn yaml_errors_convert() {
        let parse: Result<serde_yaml::Value, _> = serde_yaml::from_str("a: [");
        let err: Error = parse.unwrap_err().into();
        assert!(matches!(err, Error::Yaml(_)));
    }
}
