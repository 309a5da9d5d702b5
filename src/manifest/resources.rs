//! Typed views of the Cluster API resources the bootstrap pipeline reads
//!
//! Every spec keeps unknown fields in a flattened map so a decode followed
//! by [`super::Manifests::replace_at`] never drops user configuration.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};

/// API version of the core Cluster resource
pub const CLUSTER_API_VERSION: &str = "cluster.x-k8s.io/v1beta1";

/// Unknown fields preserved across decode/encode
pub type Extra = BTreeMap<String, serde_yaml::Value>;

/// A Kubernetes-style resource with a typed spec
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Resource<S> {
    /// API version
    #[serde(rename = "apiVersion", default)]
    pub api_version: String,
    /// Kind
    #[serde(default)]
    pub kind: String,
    /// Metadata
    #[serde(default)]
    pub metadata: ObjectMeta,
    /// Spec
    #[serde(default)]
    pub spec: S,
    /// Remaining top-level fields (status, data, ...)
    #[serde(flatten)]
    pub extra: Extra,
}

impl<S> Resource<S> {
    /// Resource name, empty when unset
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }
}

/// Reference to another object
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectReference {
    /// API version
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_version: String,
    /// Kind
    #[serde(default)]
    pub kind: String,
    /// Name
    #[serde(default)]
    pub name: String,
    /// Namespace
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    /// Unknown fields
    #[serde(flatten)]
    pub extra: Extra,
}

/// `cluster.x-k8s.io/v1beta1` Cluster spec
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    /// Control plane resource reference; its kind selects the control plane provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_plane_ref: Option<ObjectReference>,
    /// Infrastructure cluster reference; its kind selects the infrastructure provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub infrastructure_ref: Option<ObjectReference>,
    /// Unknown fields
    #[serde(flatten)]
    pub extra: Extra,
}

/// Cluster resource
pub type Cluster = Resource<ClusterSpec>;

/// A file declared inside a bootstrap config spec
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BootstrapFile {
    /// Destination path
    pub path: String,
    /// Inline content
    #[serde(default)]
    pub content: String,
    /// Owner
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub owner: String,
    /// Octal permissions
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub permissions: String,
    /// Content encoding
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub encoding: String,
    /// Unknown fields (contentFrom, append)
    #[serde(flatten)]
    pub extra: Extra,
}

/// KubeadmControlPlane spec
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KubeadmControlPlaneSpec {
    /// Kubernetes version
    #[serde(default)]
    pub version: String,
    /// Bootstrap config applied to control plane machines
    #[serde(default)]
    pub kubeadm_config_spec: KubeadmConfigSpec,
    /// Unknown fields
    #[serde(flatten)]
    pub extra: Extra,
}

/// KubeadmConfigSpec
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KubeadmConfigSpec {
    /// kubeadm ClusterConfiguration fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_configuration: Option<serde_yaml::Mapping>,
    /// kubeadm InitConfiguration fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub init_configuration: Option<serde_yaml::Mapping>,
    /// Extra files
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<BootstrapFile>,
    /// Commands run before `kubeadm init`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pre_kubeadm_commands: Vec<String>,
    /// Commands run after `kubeadm init`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub post_kubeadm_commands: Vec<String>,
    /// Unknown fields
    #[serde(flatten)]
    pub extra: Extra,
}

/// KubeadmControlPlane resource
pub type KubeadmControlPlane = Resource<KubeadmControlPlaneSpec>;

/// KThreesControlPlane spec
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KThreesControlPlaneSpec {
    /// Kubernetes (k3s) version, e.g. `v1.29.4+k3s1`
    #[serde(default)]
    pub version: String,
    /// Bootstrap config applied to control plane machines
    #[serde(default, rename = "kthreesConfigSpec")]
    pub config_spec: KThreesConfigSpec,
    /// Unknown fields
    #[serde(flatten)]
    pub extra: Extra,
}

/// KThreesConfigSpec
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KThreesConfigSpec {
    /// Extra files
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<BootstrapFile>,
    /// Commands run before k3s starts
    #[serde(default, rename = "preK3sCommands", skip_serializing_if = "Vec::is_empty")]
    pub pre_commands: Vec<String>,
    /// Commands run after k3s starts
    #[serde(default, rename = "postK3sCommands", skip_serializing_if = "Vec::is_empty")]
    pub post_commands: Vec<String>,
    /// Server flags
    #[serde(default)]
    pub server_config: K3sServerConfig,
    /// Agent flags
    #[serde(default)]
    pub agent_config: K3sAgentConfig,
    /// Unknown fields
    #[serde(flatten)]
    pub extra: Extra,
}

/// k3s server options as written in a KThreesConfigSpec
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct K3sServerConfig {
    #[serde(rename = "kubeAPIServerArgs", skip_serializing_if = "Vec::is_empty")]
    /// kube-apiserver flags
    pub kube_api_server_args: Vec<String>,
    /// kube-controller-manager flags
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub kube_controller_manager_args: Vec<String>,
    /// kube-scheduler flags
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub kube_scheduler_args: Vec<String>,
    /// Extra TLS SANs
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tls_san: Vec<String>,
    /// Bind address
    #[serde(skip_serializing_if = "String::is_empty")]
    pub bind_address: String,
    /// HTTPS listen port
    #[serde(skip_serializing_if = "String::is_empty")]
    pub https_listen_port: String,
    /// Advertise address
    #[serde(skip_serializing_if = "String::is_empty")]
    pub advertise_address: String,
    /// Advertise port
    #[serde(skip_serializing_if = "String::is_empty")]
    pub advertise_port: String,
    /// Pod CIDR
    #[serde(skip_serializing_if = "String::is_empty")]
    pub cluster_cidr: String,
    /// Service CIDR
    #[serde(skip_serializing_if = "String::is_empty")]
    pub service_cidr: String,
    /// Cluster DNS address
    #[serde(rename = "clusterDNS", skip_serializing_if = "String::is_empty")]
    pub cluster_dns: String,
    /// Cluster domain
    #[serde(skip_serializing_if = "String::is_empty")]
    pub cluster_domain: String,
    /// Packaged components to disable
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub disable_components: Vec<String>,
}

/// k3s agent options as written in a KThreesConfigSpec
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct K3sAgentConfig {
    /// Node labels
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub node_labels: Vec<String>,
    /// Node taints
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub node_taints: Vec<String>,
    /// Private registry config path
    #[serde(skip_serializing_if = "String::is_empty")]
    pub private_registry: String,
    /// kubelet flags
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub kubelet_args: Vec<String>,
    /// kube-proxy flags
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub kube_proxy_args: Vec<String>,
    /// Node name override
    #[serde(skip_serializing_if = "String::is_empty")]
    pub node_name: String,
}

/// KThreesControlPlane resource
pub type KThreesControlPlane = Resource<KThreesControlPlaneSpec>;

/// LinodeMachineTemplate spec
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LinodeMachineTemplateSpec {
    /// Machine template
    #[serde(default)]
    pub template: LinodeMachineTemplateResource,
}

/// `spec.template` of a LinodeMachineTemplate
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LinodeMachineTemplateResource {
    /// LinodeMachine spec
    #[serde(default)]
    pub spec: LinodeMachineSpec,
}

/// LinodeMachine spec fields used to size the bootstrap node
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinodeMachineSpec {
    /// Region, e.g. `us-ord`
    #[serde(default)]
    pub region: String,
    /// Plan type, e.g. `g6-standard-4`
    #[serde(default, rename = "type")]
    pub instance_type: String,
    /// Image, e.g. `linode/ubuntu22.04`
    #[serde(default)]
    pub image: String,
    /// Keys added to the root account
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authorized_keys: Vec<String>,
    /// Unknown fields
    #[serde(flatten)]
    pub extra: Extra,
}

/// LinodeMachineTemplate resource
pub type LinodeMachineTemplate = Resource<LinodeMachineTemplateSpec>;

/// LinodeCluster spec
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinodeClusterSpec {
    /// Region
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub region: String,
    /// API server endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_plane_endpoint: Option<ApiEndpoint>,
    /// Load balancer wiring
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<LinodeNetworkSpec>,
    /// Unknown fields
    #[serde(flatten)]
    pub extra: Extra,
}

/// Host and port of an API server
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiEndpoint {
    /// Host
    #[serde(default)]
    pub host: String,
    /// Port
    #[serde(default)]
    pub port: i32,
}

/// LinodeCluster network spec
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinodeNetworkSpec {
    /// Load balancer type, `NodeBalancer`
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub load_balancer_type: String,
    /// Port the API server is exposed on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apiserver_load_balancer_port: Option<i32>,
    /// Node balancer id
    #[serde(default, rename = "nodeBalancerID", skip_serializing_if = "Option::is_none")]
    pub node_balancer_id: Option<i64>,
    /// Node balancer config id for the API server port
    #[serde(
        default,
        rename = "apiserverNodeBalancerConfigID",
        skip_serializing_if = "Option::is_none"
    )]
    pub apiserver_node_balancer_config_id: Option<i64>,
    /// Unknown fields
    #[serde(flatten)]
    pub extra: Extra,
}

/// LinodeCluster resource
pub type LinodeCluster = Resource<LinodeClusterSpec>;

/// LinodeVPC spec
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinodeVpcSpec {
    /// Region
    #[serde(default)]
    pub region: String,
    /// Description
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Subnets
    #[serde(default)]
    pub subnets: Vec<VpcSubnet>,
    /// Unknown fields
    #[serde(flatten)]
    pub extra: Extra,
}

/// VPC subnet
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct VpcSubnet {
    /// Label
    #[serde(default)]
    pub label: String,
    /// IPv4 CIDR
    #[serde(default)]
    pub ipv4: String,
}

/// LinodeVPC resource
pub type LinodeVpc = Resource<LinodeVpcSpec>;

/// HelmChartProxy spec (`addons.cluster.x-k8s.io`)
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelmChartProxySpec {
    /// Chart name
    #[serde(default)]
    pub chart_name: String,
    /// Repository URL
    #[serde(default, rename = "repoURL")]
    pub repo_url: String,
    /// Release name, defaults to the chart name
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub release_name: String,
    /// Target namespace
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    /// Chart version
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    /// Go-template of the release values
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub values_template: String,
    /// Install options
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<HelmOptions>,
    /// Unknown fields
    #[serde(flatten)]
    pub extra: Extra,
}

/// Subset of HelmChartProxy options mapped to helm flags
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelmOptions {
    /// `--wait`
    #[serde(default)]
    pub wait: bool,
    /// `--timeout`
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub timeout: String,
    /// Install options
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install: Option<HelmInstallOptions>,
    /// Unknown fields
    #[serde(flatten)]
    pub extra: Extra,
}

/// HelmChartProxy install options
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelmInstallOptions {
    /// `--create-namespace`
    #[serde(default)]
    pub create_namespace: bool,
}

/// HelmChartProxy resource
pub type HelmChartProxy = Resource<HelmChartProxySpec>;
