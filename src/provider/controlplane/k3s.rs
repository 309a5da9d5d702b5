//! k3s control plane

use serde::{Deserialize, Serialize};
use tracing::info;

use super::{
    cert_files, cert_secret_file, kubeconfig_secret_file, manifest_path, render_init_script,
    spec_files, unescape_commands, ControlPlaneProvider,
};
use crate::assets;
use crate::cloudinit::types::{InitFile, ParsedManifest};
use crate::manifest::resources::{K3sAgentConfig, K3sServerConfig, KThreesControlPlane};
use crate::manifest::{Manifests, TemplateContext};
use crate::pki::{Certificates, Purpose};
use crate::provider::persist_named;
use crate::token::BootstrapToken;
use crate::values::Values;
use crate::Result;

/// Directory k3s auto-applies manifests from
pub const MANIFEST_DIR: &str = "/var/lib/rancher/k3s/server/manifests/";

/// k3s server config file
pub const K3S_CONFIG_PATH: &str = "/etc/rancher/k3s/config.yaml";

const TLS_CIPHER_SUITES: &str = "tls-cipher-suites=TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384,\
TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384,TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,\
TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305,\
TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305,TLS_RSA_WITH_AES_128_GCM_SHA256,\
TLS_RSA_WITH_AES_256_GCM_SHA384";

const EXTERNAL_CLOUD_PROVIDER: &str = "cloud-provider=external";

/// `/etc/rancher/k3s/config.yaml` for the first server. Fields are kept in
/// key order so the file reads the same on every run.
#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
struct ServerConfigFile {
    #[serde(skip_serializing_if = "String::is_empty")]
    advertise_address: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    advertise_port: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    bind_address: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    cluster_cidr: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    cluster_dns: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    cluster_domain: String,
    cluster_init: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    disable: Vec<String>,
    disable_cloud_controller: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    https_listen_port: String,
    kube_apiserver_arg: Vec<String>,
    kube_controller_manager_arg: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    kube_proxy_arg: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    kube_scheduler_arg: Vec<String>,
    kubelet_arg: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    node_label: Vec<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    node_name: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    node_taint: Vec<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    private_registry: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    service_cidr: String,
    tls_san: Vec<String>,
    token: String,
}

impl ServerConfigFile {
    fn new(endpoint: &str, token: &str, server: &K3sServerConfig, agent: &K3sAgentConfig) -> Self {
        Self {
            advertise_address: server.advertise_address.clone(),
            advertise_port: server.advertise_port.clone(),
            bind_address: server.bind_address.clone(),
            cluster_cidr: server.cluster_cidr.clone(),
            cluster_dns: server.cluster_dns.clone(),
            cluster_domain: server.cluster_domain.clone(),
            cluster_init: true,
            disable: server.disable_components.clone(),
            disable_cloud_controller: true,
            https_listen_port: server.https_listen_port.clone(),
            kube_apiserver_arg: with(
                &server.kube_api_server_args,
                &["anonymous-auth=true", TLS_CIPHER_SUITES],
            ),
            kube_controller_manager_arg: with(
                &server.kube_controller_manager_args,
                &[EXTERNAL_CLOUD_PROVIDER],
            ),
            kube_proxy_arg: agent.kube_proxy_args.clone(),
            kube_scheduler_arg: server.kube_scheduler_args.clone(),
            kubelet_arg: with(&agent.kubelet_args, &[EXTERNAL_CLOUD_PROVIDER]),
            node_label: agent.node_labels.clone(),
            node_name: agent.node_name.clone(),
            node_taint: agent.node_taints.clone(),
            private_registry: agent.private_registry.clone(),
            service_cidr: server.service_cidr.clone(),
            tls_san: with(&server.tls_san, &[endpoint]),
            token: token.to_string(),
        }
    }
}

fn with(args: &[String], extra: &[&str]) -> Vec<String> {
    let mut out = args.to_vec();
    out.extend(extra.iter().map(|s| s.to_string()));
    out
}

/// k3s provider state
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct K3sControlPlane {
    /// Name of the KThreesControlPlane resource
    #[serde(default)]
    control_plane_name: String,
    #[serde(default)]
    server_config: K3sServerConfig,
    #[serde(default)]
    agent_config: K3sAgentConfig,
    #[serde(default = "Certificates::for_k3s")]
    certs: Certificates,
}

impl Default for K3sControlPlane {
    fn default() -> Self {
        Self::new()
    }
}

impl K3sControlPlane {
    /// Registry discriminator, the control plane kind
    pub const NAME: &'static str = "KThreesControlPlane";

    /// Provider with no certificates yet
    pub fn new() -> Self {
        Self {
            control_plane_name: String::new(),
            server_config: K3sServerConfig::default(),
            agent_config: K3sAgentConfig::default(),
            certs: Certificates::for_k3s(),
        }
    }

    /// Decode persisted state
    pub fn restore(raw: serde_json::Value) -> Result<Self> {
        Ok(serde_json::from_value(raw)?)
    }

    fn server_config_file(&self, values: &Values) -> Result<InitFile> {
        let config = ServerConfigFile::new(
            &values.cluster_endpoint,
            &values.bootstrap_token,
            &self.server_config,
            &self.agent_config,
        );
        Ok(InitFile::new(K3S_CONFIG_PATH, serde_yaml::to_string(&config)?))
    }
}

impl ControlPlaneProvider for K3sControlPlane {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn pre_deploy(&mut self, values: &mut Values) -> Result<()> {
        let (_, control_plane) = values
            .manifests
            .require_kind::<KThreesControlPlane>(None, Self::NAME)?;
        let config_spec = control_plane.spec.config_spec;

        self.control_plane_name = control_plane.metadata.name.unwrap_or_default();
        self.server_config = config_spec.server_config;
        self.agent_config = config_spec.agent_config;

        values.k8s_version = control_plane.spec.version;
        values.bootstrap_manifest_dir = MANIFEST_DIR.to_string();
        if values.bootstrap_token.is_empty() {
            values.bootstrap_token = BootstrapToken::generate()?.to_string();
        }
        info!(version = %values.k8s_version, "k3s version");

        self.certs.generate()?;
        values.kubeconfig = Some(self.certs.admin_kubeconfig(
            &values.cluster_name,
            &values.cluster_endpoint,
            Purpose::ServerCa,
            Purpose::ClientCa,
        )?);
        Ok(())
    }

    fn generate_capi_file(&self, values: &Values) -> Result<InitFile> {
        assets::CAPI_K3S.render(
            manifest_path(values, assets::CAPI_K3S.name),
            &TemplateContext::from_values(values)?,
        )
    }

    fn generate_additional_files(&self, values: &Values) -> Result<Vec<InitFile>> {
        let etcd_proxy = assets::ETCD_PROXY.render(
            format!("{MANIFEST_DIR}{}", assets::ETCD_PROXY.name),
            &TemplateContext::from_values(values)?,
        )?;
        Ok(vec![self.server_config_file(values)?, etcd_proxy])
    }

    fn generate_init_script(&self, values: &Values, path: &str) -> Result<InitFile> {
        render_init_script(
            assets::K3S_INIT_SCRIPT,
            values,
            &self.control_plane_name,
            path,
        )
    }

    fn generate_run_command(&self, values: &Values) -> Result<Vec<String>> {
        Ok(vec![format!(
            "curl -sfL https://get.k3s.io | INSTALL_K3S_VERSION={:?} sh -s - server",
            values.k8s_version
        )])
    }

    fn update_manifests(&self, manifests: &Manifests, _values: &Values) -> Result<ParsedManifest> {
        let (_, control_plane) = manifests.require_kind::<KThreesControlPlane>(None, Self::NAME)?;
        let spec = control_plane.spec.config_spec;
        Ok(ParsedManifest {
            manifest_file: None,
            additional_files: spec_files(&spec.files),
            pre_run_cmd: unescape_commands(&spec.pre_commands),
            post_run_cmd: unescape_commands(&spec.post_commands),
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
