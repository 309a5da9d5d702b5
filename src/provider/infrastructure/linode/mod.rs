//! Linode infrastructure: a node balancer front-end, an optional VPC and the
//! bootstrap instance behind them

pub mod client;

use std::sync::Arc;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::InfrastructureProvider;
use crate::assets;
use crate::cloudinit::types::{join_path, InitFile, ParsedManifest};
use crate::manifest::resources::{
    ApiEndpoint, LinodeCluster, LinodeMachineTemplate, LinodeVpc,
};
use crate::manifest::{Manifests, TemplateContext};
use crate::pki::API_SERVER_PORT;
use crate::provider::{persist_named, Confirm, StdinConfirm};
use crate::token::random_password;
use crate::values::Values;
use crate::{Error, Result};
use client::{
    CreateInstance, CreateNodeBalancer, CreateNodeBalancerConfig, CreateNodeBalancerNode,
    CreateVpc, CreateVpcSubnet, InstanceInterface, InstanceMetadata, InterfaceIpv4, LinodeApi,
    LinodeClient, NodeBalancer, NodeBalancerConfig,
};

/// Environment variable holding the API token
pub const TOKEN_ENV: &str = "LINODE_TOKEN";

/// Environment variable holding an extra SSH key for the bootstrap node
pub const AUTHORIZED_KEYS_ENV: &str = "AUTHORIZED_KEYS";

/// Linode provider state. Only resource identities are persisted; the token
/// is read from the environment on every command.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LinodeInfrastructure {
    #[serde(default)]
    machine: Option<LinodeMachineTemplate>,
    #[serde(default)]
    node_balancer: Option<NodeBalancer>,
    #[serde(default)]
    node_balancer_config: Option<NodeBalancerConfig>,
    #[serde(default, rename = "VPC")]
    vpc: Option<LinodeVpc>,
    #[serde(default)]
    instance_id: Option<i64>,
    #[serde(skip)]
    token: String,
    #[serde(skip)]
    authorized_keys: Vec<String>,
    #[serde(skip)]
    api: Option<Arc<dyn LinodeApi>>,
    #[serde(skip, default = "stdin_confirm")]
    confirm: Arc<dyn Confirm>,
}

fn stdin_confirm() -> Arc<dyn Confirm> {
    Arc::new(StdinConfirm)
}

impl std::fmt::Debug for LinodeInfrastructure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinodeInfrastructure")
            .field("node_balancer", &self.node_balancer)
            .field("node_balancer_config", &self.node_balancer_config)
            .field("instance_id", &self.instance_id)
            .finish_non_exhaustive()
    }
}

/// Values the Linode templates read under `Linode`
#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct TemplateValues<'a> {
    token: &'a str,
    image: &'a str,
    #[serde(rename = "Type")]
    instance_type: &'a str,
    region: &'a str,
    vpc_name: &'a str,
}

impl Default for LinodeInfrastructure {
    fn default() -> Self {
        Self::new()
    }
}

impl LinodeInfrastructure {
    /// Registry discriminator, the infrastructure cluster kind
    pub const NAME: &'static str = "LinodeCluster";

    /// Provider with no client; `pre_cmd` creates one from the environment
    pub fn new() -> Self {
        Self {
            machine: None,
            node_balancer: None,
            node_balancer_config: None,
            vpc: None,
            instance_id: None,
            token: String::new(),
            authorized_keys: Vec::new(),
            api: None,
            confirm: stdin_confirm(),
        }
    }

    /// Provider talking to `api` and asking `confirm` before deletes
    pub fn with_api(api: Arc<dyn LinodeApi>, confirm: Arc<dyn Confirm>) -> Self {
        Self {
            api: Some(api),
            confirm,
            ..Self::new()
        }
    }

    /// Decode persisted state
    pub fn restore(raw: serde_json::Value) -> Result<Self> {
        Ok(serde_json::from_value(raw)?)
    }

    fn api(&self) -> Result<&dyn LinodeApi> {
        self.api
            .as_deref()
            .ok_or_else(|| Error::config("linode client is not initialized"))
    }

    fn machine(&self) -> Result<&LinodeMachineTemplate> {
        self.machine
            .as_ref()
            .ok_or_else(|| Error::resource_not_found("LinodeMachineTemplate"))
    }

    fn front_end(&self) -> Result<(&NodeBalancer, &NodeBalancerConfig)> {
        match (&self.node_balancer, &self.node_balancer_config) {
            (Some(nb), Some(config)) => Ok((nb, config)),
            _ => Err(Error::config("node balancer has not been created")),
        }
    }

    fn template_context(&self, values: &Values) -> Result<TemplateContext> {
        let spec = self.machine.as_ref().map(|m| &m.spec.template.spec);
        let linode = TemplateValues {
            token: &self.token,
            image: spec.map_or("", |s| s.image.as_str()),
            instance_type: spec.map_or("", |s| s.instance_type.as_str()),
            region: spec.map_or("", |s| s.region.as_str()),
            vpc_name: self.vpc.as_ref().map_or("", |v| v.name()),
        };
        TemplateContext::from_values(values)?.with("Linode", linode)
    }

    fn authorized_keys(&self, values: &Values) -> Result<Vec<String>> {
        let mut keys = self.machine()?.spec.template.spec.authorized_keys.clone();
        for key in values.ssh_authorized_keys.iter().chain(&self.authorized_keys) {
            if !keys.contains(key) {
                keys.push(key.clone());
            }
        }
        Ok(keys)
    }

    async fn create_vpc(&self, vpc: &LinodeVpc) -> Result<i64> {
        let created = self
            .api()?
            .create_vpc(&CreateVpc {
                label: vpc.name().to_string(),
                description: vpc.spec.description.clone(),
                region: vpc.spec.region.clone(),
                subnets: vpc
                    .spec
                    .subnets
                    .iter()
                    .map(|s| CreateVpcSubnet {
                        label: s.label.clone(),
                        ipv4: s.ipv4.clone(),
                    })
                    .collect(),
            })
            .await?;
        info!(vpc = %created.label, id = created.id, "created VPC");
        created
            .subnets
            .first()
            .map(|s| s.id)
            .ok_or_else(|| Error::remote("create vpc", format!("VPC {} has no subnets", created.label)))
    }
}

/// Token value, or the error naming the missing variable
fn require_token(value: Option<String>) -> Result<String> {
    match value {
        Some(token) if !token.is_empty() => Ok(token),
        _ => Err(Error::missing_env(TOKEN_ENV)),
    }
}

#[async_trait]
impl InfrastructureProvider for LinodeInfrastructure {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn pre_cmd(&mut self, _values: &mut Values) -> Result<()> {
        self.token = require_token(std::env::var(TOKEN_ENV).ok())?;
        self.authorized_keys = std::env::var(AUTHORIZED_KEYS_ENV)
            .ok()
            .filter(|k| !k.is_empty())
            .into_iter()
            .collect();
        if self.api.is_none() {
            self.api = Some(Arc::new(LinodeClient::new(self.token.clone())));
        }
        Ok(())
    }

    async fn pre_deploy(&mut self, values: &mut Values) -> Result<()> {
        let (_, machine) = values
            .manifests
            .require_kind::<LinodeMachineTemplate>(None, "LinodeMachineTemplate")?;
        let region = machine.spec.template.spec.region.clone();
        self.machine = Some(machine);

        let cluster = values.cluster_name.clone();
        let api = self.api()?;
        if !api.list_node_balancers(&cluster).await?.is_empty() {
            return Err(Error::already_exists(format!(
                "node balancer for cluster {cluster}"
            )));
        }

        let node_balancer = api
            .create_node_balancer(&CreateNodeBalancer {
                label: cluster.clone(),
                region,
                tags: vec![cluster.clone()],
            })
            .await?;
        info!(label = %cluster, id = node_balancer.id, "created node balancer");

        let config = api
            .create_node_balancer_config(
                node_balancer.id,
                &CreateNodeBalancerConfig {
                    port: i32::from(API_SERVER_PORT),
                    protocol: "tcp".to_string(),
                    algorithm: "roundrobin".to_string(),
                    check: "connection".to_string(),
                },
            )
            .await?;
        debug!(id = config.id, port = config.port, "created node balancer config");

        let endpoint = node_balancer.ipv4.clone().ok_or_else(|| {
            Error::remote("create node balancer", "no IPv4 address on node balancer")
        })?;
        values.cluster_endpoint = endpoint;
        self.node_balancer = Some(node_balancer);
        self.node_balancer_config = Some(config);

        self.vpc = values
            .manifests
            .find_by_kind::<LinodeVpc>(None, "LinodeVPC")?
            .map(|(_, vpc)| vpc);
        Ok(())
    }

    async fn deploy(&mut self, values: &Values, payload: &[u8]) -> Result<()> {
        let spec = self.machine()?.spec.template.spec.clone();
        let (node_balancer_id, config_id) = {
            let (nb, config) = self.front_end()?;
            (nb.id, config.id)
        };

        let interfaces = match &self.vpc {
            Some(vpc) => {
                let subnet_id = self.create_vpc(vpc).await?;
                vec![
                    InstanceInterface {
                        purpose: "vpc".to_string(),
                        primary: true,
                        subnet_id: Some(subnet_id),
                        ipv4: Some(InterfaceIpv4 {
                            nat_1_1: "any".to_string(),
                        }),
                    },
                    InstanceInterface {
                        purpose: "public".to_string(),
                        ..Default::default()
                    },
                ]
            }
            None => Vec::new(),
        };

        let label = format!("{}-bootstrap", values.cluster_name);
        let instance = self
            .api()?
            .create_instance(&CreateInstance {
                label: label.clone(),
                image: spec.image,
                region: spec.region,
                instance_type: spec.instance_type,
                root_pass: random_password()?,
                tags: vec![values.cluster_name.clone()],
                private_ip: true,
                metadata: InstanceMetadata {
                    user_data: STANDARD.encode(payload),
                },
                authorized_keys: self.authorized_keys(values)?,
                interfaces,
            })
            .await?;
        info!(label = %instance.label, id = instance.id, "created instance");
        self.instance_id = Some(instance.id);

        let private_ip = instance.private_ipv4().ok_or_else(|| {
            Error::remote("create instance", "instance has no private IPv4 address")
        })?;
        let node = self
            .api()?
            .create_node_balancer_node(
                node_balancer_id,
                config_id,
                &CreateNodeBalancerNode {
                    address: format!("{private_ip}:{API_SERVER_PORT}"),
                    label,
                    weight: 100,
                },
            )
            .await?;
        info!(node = %node.label, address = %node.address, "added bootstrap node to node balancer");
        if let Some(public) = instance.ipv4.first() {
            info!(ip = %public, "bootstrap node address");
        }
        Ok(())
    }

    async fn post_deploy(&mut self, _values: &Values) -> Result<()> {
        Ok(())
    }

    fn update_manifests(
        &self,
        manifests: &mut Manifests,
        values: &Values,
    ) -> Result<ParsedManifest> {
        let (nb, config) = self.front_end()?;
        let (index, mut cluster) =
            manifests.require_kind::<LinodeCluster>(None, LinodeInfrastructure::NAME)?;

        cluster.spec.control_plane_endpoint = Some(ApiEndpoint {
            host: values.cluster_endpoint.clone(),
            port: config.port,
        });
        let mut network = cluster.spec.network.take().unwrap_or_default();
        network.load_balancer_type = "NodeBalancer".to_string();
        network.apiserver_load_balancer_port = Some(i32::from(API_SERVER_PORT));
        network.node_balancer_id = Some(nb.id);
        network.apiserver_node_balancer_config_id = Some(config.id);
        cluster.spec.network = Some(network);

        manifests.replace_at(index, &cluster)?;
        Ok(ParsedManifest::default())
    }

    async fn delete(&mut self, values: &Values, force: bool) -> Result<bool> {
        let cluster = &values.cluster_name;
        let api = self.api()?;

        let instances = api.list_instances(cluster).await?;
        for instance in &instances {
            info!(label = %instance.label, id = instance.id, "will delete instance");
        }
        let vpcs = api.list_vpcs(cluster).await?;
        for vpc in &vpcs {
            info!(label = %vpc.label, id = vpc.id, "will delete VPC");
        }
        let node_balancers = api.list_node_balancers(cluster).await?;
        match node_balancers.as_slice() {
            [] => info!("no node balancers found for deletion"),
            [nb] => info!(
                label = nb.label.as_deref().unwrap_or_default(),
                id = nb.id,
                "will delete node balancer"
            ),
            _ => {
                return Err(Error::config(format!(
                    "found {} node balancers tagged {cluster}, refusing to delete",
                    node_balancers.len()
                )))
            }
        }

        if !force
            && !self
                .confirm
                .confirm("Would you like to delete these resources?")
                .await?
        {
            warn!(cluster = %cluster, "deletion declined");
            return Ok(false);
        }

        for instance in &instances {
            api.delete_instance(instance.id).await?;
            info!(label = %instance.label, "deleted instance");
        }
        for nb in &node_balancers {
            api.delete_node_balancer(nb.id).await?;
            info!(id = nb.id, "deleted node balancer");
        }
        for vpc in &vpcs {
            api.delete_vpc(vpc.id).await?;
            info!(label = %vpc.label, "deleted VPC");
        }
        Ok(true)
    }

    fn generate_capi_file(&self, values: &Values) -> Result<InitFile> {
        assets::CAPI_LINODE.render(
            join_path(&values.bootstrap_manifest_dir, assets::CAPI_LINODE.name),
            &self.template_context(values)?,
        )
    }

    fn generate_capi_machine(&self, values: &Values) -> Result<InitFile> {
        assets::CAPI_PIVOT_MACHINE.render(
            join_path(&values.bootstrap_manifest_dir, assets::CAPI_PIVOT_MACHINE.name),
            &self.template_context(values)?,
        )
    }

    fn generate_additional_files(&self, values: &Values) -> Result<Vec<InitFile>> {
        let asset = if self.vpc.is_some() {
            assets::LINODE_CCM_VPC
        } else {
            assets::LINODE_CCM
        };
        // both variants land at the same path
        let file = asset.render(
            join_path(&values.bootstrap_manifest_dir, assets::LINODE_CCM.name),
            &self.template_context(values)?,
        )?;
        Ok(vec![file])
    }

    fn persist(&self) -> Result<serde_json::Value> {
        persist_named(Self::NAME, self)
    }
}
