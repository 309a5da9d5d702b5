//! Cluster state persisted inside the admin kubeconfig
//!
//! The kubeconfig handed to the user doubles as the state handle: the values
//! and the three providers ride along as one named extension. Reading the
//! state back dispatches each provider slot through the registry by its
//! `Name` key.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::kubeconfig::Kubeconfig;
use crate::provider::{ProviderRegistry, Providers};
use crate::values::Values;
use crate::{Error, Result};

/// Name of the kubeconfig extension that carries the state
pub const EXTENSION_NAME: &str = "capi-bootstrap";

/// Wire shape of the extension payload
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Persisted {
    values: Values,
    infrastructure: Value,
    backend: Value,
    control_plane: Value,
}

/// Everything needed to operate on an existing cluster
#[derive(Debug)]
pub struct State {
    /// Admin kubeconfig, without the state extension
    pub config: Kubeconfig,
    /// Values as they were when the cluster was created
    pub values: Values,
    /// Restored provider triple
    pub providers: Providers,
}

impl State {
    /// Bundle a fresh operation's outputs
    pub fn new(config: Kubeconfig, values: Values, providers: Providers) -> Self {
        Self {
            config,
            values,
            providers,
        }
    }

    /// The kubeconfig with the state embedded as its [`EXTENSION_NAME`]
    /// extension. Any earlier copy of the extension is replaced.
    pub fn to_config(&self) -> Result<Kubeconfig> {
        let persisted = Persisted {
            values: self.values.clone(),
            infrastructure: self.providers.infrastructure.persist()?,
            backend: self.providers.backend.persist()?,
            control_plane: self.providers.control_plane.persist()?,
        };

        let mut config = self.config.clone();
        config.set_extension(EXTENSION_NAME, serde_json::to_value(persisted)?);
        Ok(config)
    }

    /// Decode the state carried by `config`
    pub fn from_config(config: Kubeconfig, registry: &ProviderRegistry) -> Result<Self> {
        let raw = config.extension(EXTENSION_NAME).cloned().ok_or_else(|| {
            Error::config(format!("kubeconfig has no {EXTENSION_NAME} extension"))
        })?;
        let persisted: Persisted = serde_json::from_value(raw)?;

        let providers = Providers {
            infrastructure: registry.restore_infrastructure(persisted.infrastructure)?,
            control_plane: registry.restore_control_plane(persisted.control_plane)?,
            backend: registry.restore_backend(persisted.backend)?,
        };
        debug!(cluster = %persisted.values.cluster_name, ?providers, "restored state");

        let config = config.without_extensions();
        let mut values = persisted.values;
        values.kubeconfig = Some(config.clone());
        Ok(Self {
            config,
            values,
            providers,
        })
    }

    /// Values and providers as one JSON document, for display
    pub fn describe(&self) -> Result<Value> {
        Ok(self
            .to_config()?
            .extension(EXTENSION_NAME)
            .cloned()
            .unwrap_or(Value::Null))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::backend::file::FileBackend;
    use crate::provider::controlplane::k3s::K3sControlPlane;
    use crate::manifest::Manifests;
    use crate::provider::infrastructure::linode::LinodeInfrastructure;
    use crate::provider::controlplane::ControlPlaneProvider;
    use serde_json::json;

    const ADMIN: &str = r#"apiVersion: v1
kind: Config
clusters:
- name: demo
  cluster:
    server: https://192.0.2.10:6443
    certificate-authority-data: Q0E=
users:
- name: demo-admin
  user:
    client-certificate-data: Q0VSVA==
    client-key-data: S0VZ
contexts:
- name: demo-admin@demo
  context:
    cluster: demo
    user: demo-admin
current-context: demo-admin@demo
"#;

    const CONTROL_PLANE: &str = r#"apiVersion: controlplane.cluster.x-k8s.io/v1beta2
kind: KThreesControlPlane
metadata:
  name: demo-control-plane
spec:
  version: v1.29.4+k3s1
  kthreesConfigSpec:
    serverConfig:
      disableComponents:
        - servicelb
        - traefik
    agentConfig:
      nodeName: '{{ ds.meta_data.label }}'
"#;

    fn state() -> State {
        let mut values = Values::new("demo");
        values.cluster_kind = "LinodeCluster".to_string();
        values.cluster_endpoint = "192.0.2.10".to_string();
        values.manifests = Manifests::split(CONTROL_PLANE);

        let mut control_plane = K3sControlPlane::new();
        control_plane.pre_deploy(&mut values).unwrap();
        values.manifests = Manifests::default();

        let infrastructure = LinodeInfrastructure::restore(json!({
            "Name": "LinodeCluster",
            "NodeBalancer": {"id": 11, "label": "demo", "ipv4": "192.0.2.10", "region": "us-ord"},
            "NodeBalancerConfig": {"id": 22, "port": 6443, "protocol": "tcp"},
            "InstanceId": 33,
        }))
        .unwrap();

        State::new(
            Kubeconfig::from_yaml(ADMIN).unwrap(),
            values,
            Providers {
                infrastructure: Box::new(infrastructure),
                control_plane: Box::new(control_plane),
                backend: Box::new(FileBackend::with_base_path("/var/tmp/capi")),
            },
        )
    }

    /// Story: a created cluster can be picked up again from its kubeconfig
    ///
    /// The extension written at create time restores the same provider
    /// kinds, their configuration and trust material, and the values. The
    /// user-facing kubeconfig is unchanged.
    #[test]
    fn story_state_survives_the_kubeconfig() {
        let original = state();
        let handle = original.to_config().unwrap();
        let yaml = handle.to_yaml().unwrap();

        let restored =
            State::from_config(Kubeconfig::from_yaml(&yaml).unwrap(), &ProviderRegistry::default())
                .unwrap();

        assert_eq!(restored.values.cluster_name, "demo");
        assert_eq!(restored.values.cluster_endpoint, "192.0.2.10");
        assert_eq!(restored.values.k8s_version, "v1.29.4+k3s1");
        assert_eq!(restored.values.bootstrap_token, original.values.bootstrap_token);
        assert_eq!(restored.providers.infrastructure.name(), "LinodeCluster");
        assert_eq!(restored.providers.control_plane.name(), "KThreesControlPlane");

        let infrastructure = restored.providers.infrastructure.persist().unwrap();
        assert_eq!(infrastructure["NodeBalancer"]["id"], 11);
        assert_eq!(infrastructure["NodeBalancerConfig"]["id"], 22);
        assert_eq!(infrastructure["InstanceId"], 33);
        assert_eq!(
            infrastructure,
            original.providers.infrastructure.persist().unwrap()
        );

        let control_plane = restored.providers.control_plane.persist().unwrap();
        assert_eq!(
            control_plane["ServerConfig"]["disableComponents"],
            json!(["servicelb", "traefik"])
        );
        assert_eq!(
            control_plane,
            original.providers.control_plane.persist().unwrap()
        );
        assert_eq!(
            restored.providers.control_plane.cert_files().unwrap(),
            original.providers.control_plane.cert_files().unwrap()
        );

        assert_eq!(restored.providers.backend.name(), "file");
        assert_eq!(
            restored.providers.backend.persist().unwrap()["BasePath"],
            "/var/tmp/capi"
        );
        assert_eq!(restored.config, Kubeconfig::from_yaml(ADMIN).unwrap());
        assert_eq!(restored.values.kubeconfig.as_ref(), Some(&restored.config));
    }

    #[test]
    fn extension_has_one_key_per_slot() {
        let handle = state().to_config().unwrap();
        let ext = handle.extension(EXTENSION_NAME).unwrap();

        let mut keys: Vec<&str> = ext.as_object().unwrap().keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(keys, vec!["Backend", "ControlPlane", "Infrastructure", "Values"]);
        assert_eq!(ext["Infrastructure"]["Name"], "LinodeCluster");
        assert_eq!(ext["Values"]["ClusterName"], "demo");
    }

    #[test]
    fn writing_twice_keeps_one_extension() {
        let mut original = state();
        original.config = original.to_config().unwrap();
        original.values.cluster_endpoint = "192.0.2.99".to_string();

        let handle = original.to_config().unwrap();
        let copies = handle
            .extensions
            .iter()
            .filter(|e| e.name == EXTENSION_NAME)
            .count();
        assert_eq!(copies, 1);
        assert_eq!(
            handle.extension(EXTENSION_NAME).unwrap()["Values"]["ClusterEndpoint"],
            "192.0.2.99"
        );
    }

    #[test]
    fn plain_kubeconfig_is_not_state() {
        let err = State::from_config(
            Kubeconfig::from_yaml(ADMIN).unwrap(),
            &ProviderRegistry::default(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn unknown_provider_in_state_is_fatal() {
        let mut config = Kubeconfig::from_yaml(ADMIN).unwrap();
        config.set_extension(
            EXTENSION_NAME,
            json!({
                "Values": {"ClusterName": "demo"},
                "Infrastructure": {"Name": "AWSCluster"},
                "ControlPlane": {"Name": "KubeadmControlPlane"},
                "Backend": {"Name": "file"},
            }),
        );

        let err = State::from_config(config, &ProviderRegistry::default()).unwrap_err();
        assert!(matches!(err, Error::UnknownProvider { axis: "infrastructure", .. }));
    }

    #[test]
    fn describe_shows_the_extension_payload() {
        let described = state().describe().unwrap();
        assert_eq!(described["ControlPlane"]["Name"], "KThreesControlPlane");
    }
}
