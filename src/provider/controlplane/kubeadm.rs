//! kubeadm control plane

use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use tracing::info;

use super::{
    cert_files, cert_secret_file, kubeconfig_secret_file, manifest_path, render_init_script,
    spec_files, unescape_commands, ControlPlaneProvider,
};
use crate::assets;
use crate::cloudinit::types::{InitFile, ParsedManifest};
use crate::manifest::resources::KubeadmControlPlane as KubeadmControlPlaneResource;
use crate::manifest::{Manifests, TemplateContext};
use crate::pki::{host_port, Certificates, Purpose, API_SERVER_PORT};
use crate::provider::persist_named;
use crate::token::BootstrapToken;
use crate::values::Values;
use crate::{Error, Result};

/// Directory kubeadm nodes keep bootstrap manifests in
pub const MANIFEST_DIR: &str = "/var/lib/kubeadm/manifests/";

/// kubeadm config file consumed by `kubeadm init`
pub const KUBEADM_CONFIG_PATH: &str = "/run/kubeadm/kubeadm.yaml";

const KUBEADM_API_VERSION: &str = "kubeadm.k8s.io/v1beta3";

/// kubeadm provider state
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct KubeadmControlPlane {
    /// Name of the KubeadmControlPlane resource
    #[serde(default)]
    control_plane_name: String,
    #[serde(default, rename = "ClusterConfig")]
    cluster_configuration: Mapping,
    #[serde(default, rename = "InitConfig")]
    init_configuration: Mapping,
    #[serde(default = "Certificates::for_kubeadm")]
    certs: Certificates,
}

impl Default for KubeadmControlPlane {
    fn default() -> Self {
        Self::new()
    }
}

impl KubeadmControlPlane {
    /// Registry discriminator, the control plane kind
    pub const NAME: &'static str = "KubeadmControlPlane";

    /// Provider with no certificates yet
    pub fn new() -> Self {
        Self {
            control_plane_name: String::new(),
            cluster_configuration: Mapping::new(),
            init_configuration: Mapping::new(),
            certs: Certificates::for_kubeadm(),
        }
    }

    /// Decode persisted state
    pub fn restore(raw: serde_json::Value) -> Result<Self> {
        Ok(serde_json::from_value(raw)?)
    }

    fn kubeadm_config(&self, values: &Values) -> Result<String> {
        let version = normalize_version(&values.k8s_version)?;

        let mut cluster = self.cluster_configuration.clone();
        cluster.insert("apiVersion".into(), KUBEADM_API_VERSION.into());
        cluster.insert("kind".into(), "ClusterConfiguration".into());
        cluster.insert(
            "controlPlaneEndpoint".into(),
            host_port(&values.cluster_endpoint, API_SERVER_PORT).into(),
        );
        cluster.insert("clusterName".into(), values.cluster_name.as_str().into());
        cluster.insert("kubernetesVersion".into(), version.into());
        let mut api_server = match cluster.remove("apiServer") {
            Some(Value::Mapping(api_server)) => api_server,
            _ => Mapping::new(),
        };
        api_server.insert(
            "certSANs".into(),
            Value::Sequence(vec!["127.0.0.1".into()]),
        );
        cluster.insert("apiServer".into(), Value::Mapping(api_server));

        let mut token = Mapping::new();
        token.insert("token".into(), values.bootstrap_token.as_str().into());
        let mut init = self.init_configuration.clone();
        init.insert("apiVersion".into(), KUBEADM_API_VERSION.into());
        init.insert("kind".into(), "InitConfiguration".into());
        init.insert(
            "bootstrapTokens".into(),
            Value::Sequence(vec![Value::Mapping(token)]),
        );

        Ok(format!(
            "{}\n---\n{}",
            serde_yaml::to_string(&cluster)?,
            serde_yaml::to_string(&init)?
        ))
    }
}

/// Tolerant version parse: optional `v` prefix, missing minor or patch
/// filled with zero, pre-release and build suffixes kept. Returned without
/// the prefix.
pub fn normalize_version(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    let bare = trimmed
        .strip_prefix('v')
        .or_else(|| trimmed.strip_prefix('V'))
        .unwrap_or(trimmed);
    let split = bare.find(['-', '+']).unwrap_or(bare.len());
    let (core, suffix) = bare.split_at(split);

    let parts: Vec<&str> = core.split('.').collect();
    if parts.is_empty()
        || parts.len() > 3
        || parts
            .iter()
            .any(|p| p.is_empty() || !p.bytes().all(|b| b.is_ascii_digit()))
    {
        return Err(Error::config(format!("invalid kubernetes version '{raw}'")));
    }

    let mut numbers = parts
        .iter()
        .map(|p| p.trim_start_matches('0'))
        .map(|p| if p.is_empty() { "0" } else { p })
        .collect::<Vec<_>>();
    numbers.resize(3, "0");
    Ok(format!("{}{suffix}", numbers.join(".")))
}

impl ControlPlaneProvider for KubeadmControlPlane {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn pre_deploy(&mut self, values: &mut Values) -> Result<()> {
        let (_, control_plane) = values
            .manifests
            .require_kind::<KubeadmControlPlaneResource>(None, Self::NAME)?;
        let config_spec = control_plane.spec.kubeadm_config_spec;

        self.control_plane_name = control_plane.metadata.name.unwrap_or_default();
        self.cluster_configuration = config_spec.cluster_configuration.unwrap_or_default();
        self.init_configuration = config_spec.init_configuration.unwrap_or_default();

        values.k8s_version = control_plane.spec.version;
        values.bootstrap_manifest_dir = MANIFEST_DIR.to_string();
        if values.bootstrap_token.is_empty() {
            values.bootstrap_token = BootstrapToken::generate()?.to_string();
        }
        info!(version = %values.k8s_version, "kubernetes version");

        self.certs.generate()?;
        values.kubeconfig = Some(self.certs.admin_kubeconfig(
            &values.cluster_name,
            &values.cluster_endpoint,
            Purpose::ClusterCa,
            Purpose::ClusterCa,
        )?);
        Ok(())
    }

    fn generate_capi_file(&self, values: &Values) -> Result<InitFile> {
        assets::CAPI_KUBEADM.render(
            manifest_path(values, assets::CAPI_KUBEADM.name),
            &TemplateContext::from_values(values)?,
        )
    }

    fn generate_additional_files(&self, values: &Values) -> Result<Vec<InitFile>> {
        let config =
            InitFile::new(KUBEADM_CONFIG_PATH, self.kubeadm_config(values)?).with_permissions("0640");
        Ok(vec![config])
    }

    fn generate_init_script(&self, values: &Values, path: &str) -> Result<InitFile> {
        render_init_script(
            assets::KUBEADM_INIT_SCRIPT,
            values,
            &self.control_plane_name,
            path,
        )
    }

    fn generate_run_command(&self, _values: &Values) -> Result<Vec<String>> {
        Ok(vec![format!("kubeadm init --config {KUBEADM_CONFIG_PATH}")])
    }

    fn update_manifests(&self, manifests: &Manifests, _values: &Values) -> Result<ParsedManifest> {
        let (_, control_plane) =
            manifests.require_kind::<KubeadmControlPlaneResource>(None, Self::NAME)?;
        let spec = control_plane.spec.kubeadm_config_spec;
        Ok(ParsedManifest {
            manifest_file: None,
            additional_files: spec_files(&spec.files),
            pre_run_cmd: unescape_commands(&spec.pre_kubeadm_commands),
            post_run_cmd: unescape_commands(&spec.post_kubeadm_commands),
        })
    }

    fn cert_secret(&self, values: &Values) -> Result<InitFile> {
        cert_secret_file(&self.certs, values)
    }

    fn cert_files(&self) -> Result<Vec<InitFile>> {
        cert_files(&self.certs)
    }

    fn kubeconfig_secret(&self, values: &Values) -> Result<InitFile> {
        kubeconfig_secret_file(&self.certs, values)
    }

    fn persist(&self) -> Result<serde_json::Value> {
        persist_named(Self::NAME, self)
    }
}
