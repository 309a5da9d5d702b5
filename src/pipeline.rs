//! Cluster lifecycle: create and delete a bootstrap cluster
//!
//! Creating a cluster runs, strictly in order:
//!
//! 1. Locate the `Cluster` document and resolve the infrastructure and
//!    control plane providers from its references
//! 2. Backend `pre_cmd`, then refuse if state for the cluster already exists
//! 3. Infrastructure `pre_cmd` and `pre_deploy` (front-end and endpoint)
//! 4. Control plane `pre_deploy` (trust material and admin kubeconfig)
//! 5. Assemble the first-boot payload
//! 6. Infrastructure `deploy` and `post_deploy`
//! 7. Persist the state handle through the backend
//!
//! A failure at any step aborts the operation; resources already created
//! are left for `delete` to clean up.
//!
//! Deleting a cluster loads its state, re-runs the backend and
//! infrastructure `pre_cmd` hooks, removes the infrastructure and, only if
//! the operator approved, the stored state.

use tracing::{debug, info};

use crate::cloudinit::generate_cloud_init;
use crate::manifest::Manifests;
use crate::provider::{ProviderRegistry, Providers};
use crate::state::State;
use crate::values::Values;
use crate::{Error, Result};

const LOCAL_PLACEHOLDER: &str = "[[[";

/// Inputs of one `cluster` invocation
#[derive(Clone, Debug, Default)]
pub struct CreateRequest {
    /// Cluster name
    pub cluster_name: String,
    /// Path of the manifest template, used in error messages
    pub manifest_file: String,
    /// Manifest template text.
    ///
    /// The `Cluster` document is read before the local render, so a
    /// `[[[ ... ]]]` placeholder used as a whole YAML scalar must be quoted
    /// (`name: "[[[ .ClusterName ]]]"`).
    pub manifest: String,
    /// Backend name; empty selects the default backend
    pub backend: String,
}

/// Values for `request` and the providers its manifest selects
pub fn prepare(registry: &ProviderRegistry, request: &CreateRequest) -> Result<(Values, Providers)> {
    if request.cluster_name.is_empty() {
        return Err(Error::config("cluster name is required"));
    }

    let manifests = Manifests::split(&request.manifest);
    let (_, cluster) = manifests.cluster().map_err(|e| match e {
        err @ (Error::Yaml(_) | Error::ResourceNotFound { .. })
            if request.manifest.contains(LOCAL_PLACEHOLDER) =>
        {
            Error::config(format!(
                "could not decode the Cluster in {} ({err}); \
                 quote {LOCAL_PLACEHOLDER} ]]] placeholders used as YAML values",
                request.manifest_file
            ))
        }
        other => other,
    })?;
    let infrastructure_kind = cluster
        .spec
        .infrastructure_ref
        .as_ref()
        .map(|r| r.kind.clone())
        .ok_or_else(|| {
            Error::config(format!("cluster {} has no infrastructureRef", cluster.name()))
        })?;
    let control_plane_kind = cluster
        .spec
        .control_plane_ref
        .as_ref()
        .map(|r| r.kind.clone())
        .ok_or_else(|| {
            Error::config(format!("cluster {} has no controlPlaneRef", cluster.name()))
        })?;

    let providers = Providers {
        infrastructure: registry.infrastructure(&infrastructure_kind)?,
        control_plane: registry.control_plane(&control_plane_kind)?,
        backend: registry.backend(&request.backend)?,
    };

    let mut values = Values::new(&request.cluster_name);
    values.cluster_kind = infrastructure_kind;
    values.manifest_file = request.manifest_file.clone();
    if let Some(namespace) = cluster.metadata.namespace.filter(|n| !n.is_empty()) {
        values.namespace = namespace;
    }
    values.manifests = manifests;
    debug!(?providers, cluster = %values.cluster_name, "resolved providers");
    Ok((values, providers))
}

/// Create the cluster described by `request`
pub async fn create(registry: &ProviderRegistry, request: &CreateRequest) -> Result<State> {
    let (values, providers) = prepare(registry, request)?;
    create_with(values, providers).await
}

/// Run the create steps with providers already chosen
pub async fn create_with(mut values: Values, mut providers: Providers) -> Result<State> {
    let cluster = values.cluster_name.clone();

    providers.backend.pre_cmd(&cluster).await?;
    if providers.backend.read(&cluster).await?.is_some() {
        return Err(Error::already_exists(format!("state for cluster {cluster}")));
    }

    providers.infrastructure.pre_cmd(&mut values).await?;
    providers.infrastructure.pre_deploy(&mut values).await?;
    info!(cluster = %cluster, endpoint = %values.cluster_endpoint, "front-end ready");
    providers.control_plane.pre_deploy(&mut values)?;

    let payload = generate_cloud_init(&mut values, &providers).await?;

    providers.infrastructure.deploy(&values, &payload).await?;
    providers.infrastructure.post_deploy(&values).await?;

    let config = values
        .kubeconfig
        .clone()
        .ok_or_else(|| Error::config("control plane produced no kubeconfig"))?;
    let state = State::new(config, values, providers);
    state
        .providers
        .backend
        .write_config(&cluster, &state.to_config()?)
        .await?;
    info!(cluster = %cluster, backend = state.providers.backend.name(), "cluster state stored");
    Ok(state)
}

/// State of `cluster` as stored in the `backend` backend
pub async fn load_state(registry: &ProviderRegistry, backend: &str, cluster: &str) -> Result<State> {
    let mut store = registry.backend(backend)?;
    store.pre_cmd(cluster).await?;
    let config = store
        .read(cluster)
        .await?
        .ok_or_else(|| Error::ClusterNotFound(cluster.to_string()))?;
    State::from_config(config, registry)
}

/// Delete the cluster `state` describes. Returns false when the operator
/// declined; the stored state is kept in that case.
pub async fn delete(state: &mut State, force: bool) -> Result<bool> {
    let cluster = state.values.cluster_name.clone();
    let providers = &mut state.providers;

    providers.backend.pre_cmd(&cluster).await?;
    providers.infrastructure.pre_cmd(&mut state.values).await?;

    if !providers.infrastructure.delete(&state.values, force).await? {
        info!(cluster = %cluster, "deletion declined");
        return Ok(false);
    }
    providers.backend.delete(&cluster).await?;
    info!(cluster = %cluster, "cluster deleted");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloudinit::types::{CloudConfig, InitFile, ParsedManifest};
    use crate::kubeconfig::Kubeconfig;
    use crate::provider::backend::file::FileBackend;
    use crate::provider::backend::MockBackendProvider;
    use crate::provider::controlplane::MockControlPlaneProvider;
    use crate::provider::infrastructure::MockInfrastructureProvider;
    use crate::provider::Registration;
    use crate::state::EXTENSION_NAME;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    const MANIFEST: &str = r#"apiVersion: cluster.x-k8s.io/v1beta1
kind: Cluster
metadata:
  name: demo
  namespace: capi
spec:
  controlPlaneRef:
    apiVersion: controlplane.cluster.x-k8s.io/v1beta1
    kind: KubeadmControlPlane
    name: demo-control-plane
  infrastructureRef:
    apiVersion: infrastructure.cluster.x-k8s.io/v1alpha2
    kind: LinodeCluster
    name: demo
"#;

    const ADMIN: &str = r#"apiVersion: v1
kind: Config
clusters:
- name: demo
  cluster:
    server: https://192.0.2.10:6443
users: []
contexts: []
current-context: ""
"#;

    fn request() -> CreateRequest {
        CreateRequest {
            cluster_name: "demo".to_string(),
            manifest_file: "cluster.yaml".to_string(),
            manifest: MANIFEST.to_string(),
            backend: String::new(),
        }
    }

    fn values() -> Values {
        let mut values = Values::new("demo");
        values.bootstrap_manifest_dir = "/m/".to_string();
        values.cluster_kind = "LinodeCluster".to_string();
        values.manifests = Manifests::split(MANIFEST);
        values
    }

    fn infrastructure(log: &Arc<Mutex<Vec<&'static str>>>) -> MockInfrastructureProvider {
        let mut infra = MockInfrastructureProvider::new();
        infra.expect_name().return_const("LinodeCluster");
        let l = log.clone();
        infra
            .expect_pre_cmd()
            .times(1)
            .returning(move |_| {
                l.lock().unwrap().push("infra pre_cmd");
                Ok(())
            });
        let l = log.clone();
        infra
            .expect_pre_deploy()
            .times(1)
            .returning(move |values| {
                values.cluster_endpoint = "192.0.2.10".to_string();
                l.lock().unwrap().push("infra pre_deploy");
                Ok(())
            });
        infra
            .expect_update_manifests()
            .returning(|_, _| Ok(ParsedManifest::default()));
        infra
            .expect_generate_capi_file()
            .returning(|_| Ok(InitFile::new("/m/capi-linode.yaml", "infra")));
        infra
            .expect_generate_capi_machine()
            .returning(|_| Ok(InitFile::new("/m/pivot.yaml", "machine")));
        infra
            .expect_generate_additional_files()
            .returning(|_| Ok(Vec::new()));
        let l = log.clone();
        infra
            .expect_deploy()
            .times(1)
            .returning(move |values, payload| {
                assert_eq!(values.cluster_endpoint, "192.0.2.10");
                assert!(payload.starts_with(b"## template: jinja"));
                l.lock().unwrap().push("infra deploy");
                Ok(())
            });
        let l = log.clone();
        infra.expect_post_deploy().times(1).returning(move |_| {
            l.lock().unwrap().push("infra post_deploy");
            Ok(())
        });
        infra
            .expect_persist()
            .returning(|| Ok(json!({"Name": "LinodeCluster"})));
        infra
    }

    fn control_plane(log: &Arc<Mutex<Vec<&'static str>>>) -> MockControlPlaneProvider {
        let mut cp = MockControlPlaneProvider::new();
        cp.expect_name().return_const("KubeadmControlPlane");
        let l = log.clone();
        cp.expect_pre_deploy().times(1).returning(move |values| {
            assert_eq!(values.cluster_endpoint, "192.0.2.10");
            values.kubeconfig = Some(Kubeconfig::from_yaml(ADMIN).unwrap());
            l.lock().unwrap().push("cp pre_deploy");
            Ok(())
        });
        cp.expect_update_manifests()
            .returning(|_, _| Ok(ParsedManifest::default()));
        cp.expect_generate_capi_file()
            .returning(|_| Ok(InitFile::new("/m/capi-kubeadm.yaml", "cp")));
        cp.expect_generate_additional_files()
            .returning(|_| Ok(Vec::new()));
        cp.expect_generate_init_script()
            .returning(|_, path| Ok(InitFile::new(path, "#!/bin/bash\n")));
        cp.expect_generate_run_command()
            .returning(|_| Ok(vec!["kubeadm init".to_string()]));
        cp.expect_cert_files().returning(|| Ok(Vec::new()));
        cp.expect_cert_secret()
            .returning(|_| Ok(InitFile::new("/m/cp-secrets.yaml", "secrets")));
        cp.expect_kubeconfig_secret()
            .returning(|_| Ok(InitFile::new("/m/kubeconfig.yaml", "kubeconfig")));
        cp.expect_persist()
            .returning(|| Ok(json!({"Name": "KubeadmControlPlane"})));
        cp
    }

    #[test]
    fn prepare_resolves_providers_from_references() {
        let (values, providers) = prepare(&ProviderRegistry::default(), &request()).unwrap();

        assert_eq!(providers.infrastructure.name(), "LinodeCluster");
        assert_eq!(providers.control_plane.name(), "KubeadmControlPlane");
        assert_eq!(providers.backend.name(), "file");
        assert_eq!(values.cluster_kind, "LinodeCluster");
        assert_eq!(values.namespace, "capi");
        assert_eq!(values.manifest_file, "cluster.yaml");
        assert_eq!(values.manifests.len(), 1);
    }

    #[test]
    fn prepare_rejects_unknown_kinds_before_side_effects() {
        let mut req = request();
        req.manifest = MANIFEST.replace("kind: LinodeCluster", "kind: AWSCluster");
        let err = prepare(&ProviderRegistry::default(), &req).unwrap_err();
        assert!(matches!(err, Error::UnknownProvider { axis: "infrastructure", .. }));

        let mut req = request();
        req.backend = "consul".to_string();
        assert!(matches!(
            prepare(&ProviderRegistry::default(), &req),
            Err(Error::UnknownProvider { axis: "backend", .. })
        ));
    }

    #[test]
    fn prepare_needs_a_name_and_a_cluster() {
        let mut req = request();
        req.cluster_name.clear();
        assert!(matches!(
            prepare(&ProviderRegistry::default(), &req),
            Err(Error::Config(_))
        ));

        let mut req = request();
        req.manifest = "apiVersion: v1\nkind: ConfigMap\n".to_string();
        assert!(prepare(&ProviderRegistry::default(), &req).is_err());
    }

    #[test]
    fn quoted_placeholders_in_the_cluster_are_accepted() {
        let mut req = request();
        req.manifest = MANIFEST.replace(
            "  name: demo\n  namespace",
            "  name: \"[[[ .ClusterName ]]]\"\n  namespace",
        );
        let (values, _) = prepare(&ProviderRegistry::default(), &req).unwrap();
        assert!(values.manifests.join().contains("\"[[[ .ClusterName ]]]\""));
    }

    #[test]
    fn unquoted_placeholder_in_the_cluster_asks_for_quotes() {
        let mut req = request();
        req.manifest = MANIFEST.replace(
            "  name: demo\n  namespace",
            "  name: [[[ .ClusterName ]]]\n  namespace",
        );

        let err = prepare(&ProviderRegistry::default(), &req).unwrap_err();

        assert!(matches!(err, Error::Config(_)));
        let message = err.to_string();
        assert!(message.contains("cluster.yaml"));
        assert!(message.contains("quote [[[ ]]] placeholders"));
    }

    /// Story: creating a cluster walks every provider hook in order and
    /// stores the state handle last
    #[tokio::test]
    async fn story_create_runs_hooks_in_order_and_persists_state() {
        let log = Arc::new(Mutex::new(Vec::new()));

        let mut backend = MockBackendProvider::new();
        backend.expect_name().return_const("file");
        let l = log.clone();
        backend.expect_pre_cmd().times(1).returning(move |_| {
            l.lock().unwrap().push("backend pre_cmd");
            Ok(())
        });
        backend.expect_read().times(1).returning(|_| Ok(None));
        backend
            .expect_write_files()
            .returning(|_, _: &mut CloudConfig, _| Ok(Vec::new()));
        backend
            .expect_persist()
            .returning(|| Ok(json!({"Name": "file"})));
        let stored = Arc::new(Mutex::new(None));
        let s = stored.clone();
        let l = log.clone();
        backend
            .expect_write_config()
            .times(1)
            .returning(move |cluster, config| {
                assert_eq!(cluster, "demo");
                *s.lock().unwrap() = Some(config.clone());
                l.lock().unwrap().push("backend write_config");
                Ok(())
            });

        let providers = Providers {
            infrastructure: Box::new(infrastructure(&log)),
            control_plane: Box::new(control_plane(&log)),
            backend: Box::new(backend),
        };

        let state = create_with(values(), providers).await.unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "backend pre_cmd",
                "infra pre_cmd",
                "infra pre_deploy",
                "cp pre_deploy",
                "infra deploy",
                "infra post_deploy",
                "backend write_config",
            ]
        );
        let stored = stored.lock().unwrap().clone().unwrap();
        let ext = stored.extension(EXTENSION_NAME).unwrap();
        assert_eq!(ext["Values"]["ClusterEndpoint"], "192.0.2.10");
        assert_eq!(ext["Infrastructure"]["Name"], "LinodeCluster");
        assert_eq!(state.config.server(), Some("https://192.0.2.10:6443"));
    }

    /// Story: an existing cluster is never created twice
    ///
    /// The guard fires right after the backend is ready, before any
    /// infrastructure is touched.
    #[tokio::test]
    async fn story_existing_state_stops_create() {
        let mut backend = MockBackendProvider::new();
        backend.expect_name().return_const("file");
        backend.expect_pre_cmd().returning(|_| Ok(()));
        backend
            .expect_read()
            .returning(|_| Ok(Some(Kubeconfig::default())));

        let mut infra = MockInfrastructureProvider::new();
        infra.expect_name().return_const("LinodeCluster");
        infra.expect_pre_cmd().never();
        infra.expect_pre_deploy().never();
        let mut cp = MockControlPlaneProvider::new();
        cp.expect_name().return_const("KubeadmControlPlane");

        let providers = Providers {
            infrastructure: Box::new(infra),
            control_plane: Box::new(cp),
            backend: Box::new(backend),
        };

        let err = create_with(values(), providers).await.unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(_)));
        assert!(err.to_string().contains("demo"));
    }

    #[tokio::test]
    async fn deploy_failure_skips_state_write() {
        let mut backend = MockBackendProvider::new();
        backend.expect_name().return_const("file");
        backend.expect_pre_cmd().returning(|_| Ok(()));
        backend.expect_read().returning(|_| Ok(None));
        backend
            .expect_write_files()
            .returning(|_, _: &mut CloudConfig, _| Ok(Vec::new()));
        backend.expect_write_config().never();

        let log = Arc::new(Mutex::new(Vec::new()));
        let mut infra = MockInfrastructureProvider::new();
        infra.expect_name().return_const("LinodeCluster");
        infra.expect_pre_cmd().returning(|_| Ok(()));
        infra.expect_pre_deploy().returning(|values| {
            values.cluster_endpoint = "192.0.2.10".to_string();
            Ok(())
        });
        infra
            .expect_update_manifests()
            .returning(|_, _| Ok(ParsedManifest::default()));
        infra
            .expect_generate_capi_file()
            .returning(|_| Ok(InitFile::new("/m/a.yaml", "a")));
        infra
            .expect_generate_capi_machine()
            .returning(|_| Ok(InitFile::new("/m/b.yaml", "b")));
        infra
            .expect_generate_additional_files()
            .returning(|_| Ok(Vec::new()));
        infra
            .expect_deploy()
            .returning(|_, _| Err(Error::remote("create instance", "HTTP 400")));
        infra.expect_post_deploy().never();

        let providers = Providers {
            infrastructure: Box::new(infra),
            control_plane: Box::new(control_plane(&log)),
            backend: Box::new(backend),
        };

        let err = create_with(values(), providers).await.unwrap_err();
        assert!(err.to_string().contains("create instance"));
    }

    fn state_with(infra: MockInfrastructureProvider, backend: MockBackendProvider) -> State {
        let mut cp = MockControlPlaneProvider::new();
        cp.expect_name().return_const("KubeadmControlPlane");
        State::new(
            Kubeconfig::from_yaml(ADMIN).unwrap(),
            values(),
            Providers {
                infrastructure: Box::new(infra),
                control_plane: Box::new(cp),
                backend: Box::new(backend),
            },
        )
    }

    /// Story: the operator answers no and the cluster stays recorded
    #[tokio::test]
    async fn story_declined_delete_keeps_state() {
        let mut infra = MockInfrastructureProvider::new();
        infra.expect_name().return_const("LinodeCluster");
        infra.expect_pre_cmd().times(1).returning(|_| Ok(()));
        infra
            .expect_delete()
            .withf(|_, force| !*force)
            .times(1)
            .returning(|_, _| Ok(false));
        let mut backend = MockBackendProvider::new();
        backend.expect_name().return_const("file");
        backend.expect_pre_cmd().times(1).returning(|_| Ok(()));
        backend.expect_delete().never();

        let mut state = state_with(infra, backend);
        assert!(!delete(&mut state, false).await.unwrap());
    }

    #[tokio::test]
    async fn approved_delete_removes_state() {
        let mut infra = MockInfrastructureProvider::new();
        infra.expect_name().return_const("LinodeCluster");
        infra.expect_pre_cmd().returning(|_| Ok(()));
        infra
            .expect_delete()
            .withf(|_, force| *force)
            .returning(|_, _| Ok(true));
        let mut backend = MockBackendProvider::new();
        backend.expect_name().return_const("file");
        backend.expect_pre_cmd().returning(|_| Ok(()));
        backend
            .expect_delete()
            .withf(|cluster| cluster == "demo")
            .times(1)
            .returning(|_| Ok(()));

        let mut state = state_with(infra, backend);
        assert!(delete(&mut state, true).await.unwrap());
    }

    #[tokio::test]
    async fn missing_state_is_cluster_not_found() {
        let mut registry = ProviderRegistry::empty();
        registry.register_backend(Registration::new(
            FileBackend::NAME,
            || Box::new(FileBackend::with_base_path(empty_base())),
            |raw| Ok(Box::new(FileBackend::restore(raw)?)),
        ));

        let err = load_state(&registry, "", "ghost").await.unwrap_err();
        assert!(matches!(err, Error::ClusterNotFound(name) if name == "ghost"));
    }

    fn empty_base() -> std::path::PathBuf {
        std::env::temp_dir().join("capi-bootstrap-pipeline-empty")
    }
}
