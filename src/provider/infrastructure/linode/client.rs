//! Linode API v4 client
//!
//! Only the calls the bootstrap flow makes. List calls filter server side
//! through the `X-Filter` header and walk every page.

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Error, Result};

/// Public API root
pub const LINODE_API_URL: &str = "https://api.linode.com/v4";

const PAGE_SIZE: u32 = 500;

/// A node balancer
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeBalancer {
    /// Id
    pub id: i64,
    /// Label
    #[serde(default)]
    pub label: Option<String>,
    /// Public IPv4 address
    #[serde(default)]
    pub ipv4: Option<String>,
    /// Region
    #[serde(default)]
    pub region: String,
    /// Tags
    #[serde(default)]
    pub tags: Vec<String>,
}

/// A node balancer port configuration
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeBalancerConfig {
    /// Id
    pub id: i64,
    /// Frontend port
    pub port: i32,
    /// Protocol
    #[serde(default)]
    pub protocol: String,
}

/// A backend node of a node balancer config
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct NodeBalancerNode {
    /// Id
    pub id: i64,
    /// Label
    #[serde(default)]
    pub label: String,
    /// `ip:port`
    #[serde(default)]
    pub address: String,
}

/// A compute instance
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct Instance {
    /// Id
    pub id: i64,
    /// Label
    pub label: String,
    /// Every IPv4 address, public and private
    #[serde(default)]
    pub ipv4: Vec<String>,
}

impl Instance {
    /// First RFC 1918 address
    pub fn private_ipv4(&self) -> Option<&str> {
        self.ipv4
            .iter()
            .find(|ip| {
                ip.parse::<std::net::Ipv4Addr>()
                    .map(|addr| addr.is_private())
                    .unwrap_or(false)
            })
            .map(String::as_str)
    }
}

/// A VPC
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct Vpc {
    /// Id
    pub id: i64,
    /// Label
    pub label: String,
    /// Subnets in creation order
    #[serde(default)]
    pub subnets: Vec<VpcSubnet>,
}

/// A VPC subnet
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct VpcSubnet {
    /// Id
    pub id: i64,
    /// Label
    #[serde(default)]
    pub label: String,
}

/// `POST /nodebalancers`
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct CreateNodeBalancer {
    /// Label
    pub label: String,
    /// Region
    pub region: String,
    /// Tags
    pub tags: Vec<String>,
}

/// `POST /nodebalancers/{id}/configs`
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct CreateNodeBalancerConfig {
    /// Frontend port
    pub port: i32,
    /// `tcp`, `http` or `https`
    pub protocol: String,
    /// Balancing algorithm
    pub algorithm: String,
    /// Health check type
    pub check: String,
}

/// `POST /nodebalancers/{id}/configs/{config}/nodes`
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct CreateNodeBalancerNode {
    /// `ip:port`
    pub address: String,
    /// Label
    pub label: String,
    /// Weight
    pub weight: i32,
}

/// `POST /vpcs`
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct CreateVpc {
    /// Label
    pub label: String,
    /// Description
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Region
    pub region: String,
    /// Subnets
    pub subnets: Vec<CreateVpcSubnet>,
}

/// Subnet inside [`CreateVpc`]
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct CreateVpcSubnet {
    /// Label
    pub label: String,
    /// IPv4 CIDR
    pub ipv4: String,
}

/// `POST /linode/instances`
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct CreateInstance {
    /// Label
    pub label: String,
    /// Image
    pub image: String,
    /// Region
    pub region: String,
    /// Plan type
    #[serde(rename = "type")]
    pub instance_type: String,
    /// Root password
    pub root_pass: String,
    /// Tags
    pub tags: Vec<String>,
    /// Allocate a private address
    pub private_ip: bool,
    /// First-boot metadata
    pub metadata: InstanceMetadata,
    /// SSH keys for root
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub authorized_keys: Vec<String>,
    /// Network interfaces; empty means the default public interface
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub interfaces: Vec<InstanceInterface>,
}

/// Instance metadata service payload
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct InstanceMetadata {
    /// Base64 user data
    pub user_data: String,
}

/// One configuration profile interface
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct InstanceInterface {
    /// `public` or `vpc`
    pub purpose: String,
    /// Primary interface
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub primary: bool,
    /// VPC subnet
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subnet_id: Option<i64>,
    /// VPC IPv4 options
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipv4: Option<InterfaceIpv4>,
}

/// VPC interface IPv4 options
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct InterfaceIpv4 {
    /// 1:1 NAT, `any` to assign a public address
    pub nat_1_1: String,
}

/// The Linode API surface the provider depends on
#[cfg_attr(test, automock)]
#[async_trait]
pub trait LinodeApi: Send + Sync {
    /// Node balancers carrying `tag`
    async fn list_node_balancers(&self, tag: &str) -> Result<Vec<NodeBalancer>>;
    /// Create a node balancer
    async fn create_node_balancer(&self, opts: &CreateNodeBalancer) -> Result<NodeBalancer>;
    /// Add a port config to a node balancer
    async fn create_node_balancer_config(
        &self,
        node_balancer_id: i64,
        opts: &CreateNodeBalancerConfig,
    ) -> Result<NodeBalancerConfig>;
    /// Add a backend node to a node balancer config
    async fn create_node_balancer_node(
        &self,
        node_balancer_id: i64,
        config_id: i64,
        opts: &CreateNodeBalancerNode,
    ) -> Result<NodeBalancerNode>;
    /// Delete a node balancer
    async fn delete_node_balancer(&self, id: i64) -> Result<()>;
    /// Instances carrying `tag`
    async fn list_instances(&self, tag: &str) -> Result<Vec<Instance>>;
    /// Create an instance
    async fn create_instance(&self, opts: &CreateInstance) -> Result<Instance>;
    /// Delete an instance
    async fn delete_instance(&self, id: i64) -> Result<()>;
    /// VPCs labelled `label`
    async fn list_vpcs(&self, label: &str) -> Result<Vec<Vpc>>;
    /// Create a VPC
    async fn create_vpc(&self, opts: &CreateVpc) -> Result<Vpc>;
    /// Delete a VPC
    async fn delete_vpc(&self, id: i64) -> Result<()>;
}

#[derive(Deserialize)]
struct Page<T> {
    data: Vec<T>,
    #[serde(default)]
    page: u32,
    #[serde(default)]
    pages: u32,
}

/// Bearer-token client for the public API
#[derive(Clone)]
pub struct LinodeClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl std::fmt::Debug for LinodeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinodeClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl LinodeClient {
    /// Client against the public API
    pub fn new(token: impl Into<String>) -> Self {
        Self::with_base_url(token, LINODE_API_URL)
    }

    /// Client against another API root
    pub fn with_base_url(token: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.base_url, path))
            .bearer_auth(&self.token)
    }

    async fn send<T: DeserializeOwned>(&self, operation: &str, request: RequestBuilder) -> Result<T> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::remote(operation, format!("HTTP {status}: {body}")));
        }
        Ok(response.json().await?)
    }

    async fn send_empty(&self, operation: &str, request: RequestBuilder) -> Result<()> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::remote(operation, format!("HTTP {status}: {body}")));
        }
        Ok(())
    }

    async fn list<T: DeserializeOwned>(
        &self,
        operation: &str,
        path: &str,
        filter: &serde_json::Value,
    ) -> Result<Vec<T>> {
        let filter = filter.to_string();
        let mut items = Vec::new();
        let mut page = 1;
        loop {
            let request = self
                .request(Method::GET, path)
                .query(&[("page", page), ("page_size", PAGE_SIZE)])
                .header("X-Filter", &filter);
            let result: Page<T> = self.send(operation, request).await?;
            items.extend(result.data);
            if result.page >= result.pages {
                break;
            }
            page = result.page + 1;
        }
        debug!(operation, count = items.len(), "listed linode resources");
        Ok(items)
    }
}

#[async_trait]
impl LinodeApi for LinodeClient {
    async fn list_node_balancers(&self, tag: &str) -> Result<Vec<NodeBalancer>> {
        self.list(
            "list node balancers",
            "/nodebalancers",
            &serde_json::json!({ "tags": tag }),
        )
        .await
    }

    async fn create_node_balancer(&self, opts: &CreateNodeBalancer) -> Result<NodeBalancer> {
        let request = self.request(Method::POST, "/nodebalancers").json(opts);
        self.send("create node balancer", request).await
    }

    async fn create_node_balancer_config(
        &self,
        node_balancer_id: i64,
        opts: &CreateNodeBalancerConfig,
    ) -> Result<NodeBalancerConfig> {
        let request = self
            .request(Method::POST, &format!("/nodebalancers/{node_balancer_id}/configs"))
            .json(opts);
        self.send("create node balancer config", request).await
    }

    async fn create_node_balancer_node(
        &self,
        node_balancer_id: i64,
        config_id: i64,
        opts: &CreateNodeBalancerNode,
    ) -> Result<NodeBalancerNode> {
        let request = self
            .request(
                Method::POST,
                &format!("/nodebalancers/{node_balancer_id}/configs/{config_id}/nodes"),
            )
            .json(opts);
        self.send("create node balancer node", request).await
    }

    async fn delete_node_balancer(&self, id: i64) -> Result<()> {
        let request = self.request(Method::DELETE, &format!("/nodebalancers/{id}"));
        self.send_empty("delete node balancer", request).await
    }

    async fn list_instances(&self, tag: &str) -> Result<Vec<Instance>> {
        self.list(
            "list instances",
            "/linode/instances",
            &serde_json::json!({ "tags": tag }),
        )
        .await
    }

    async fn create_instance(&self, opts: &CreateInstance) -> Result<Instance> {
        let request = self.request(Method::POST, "/linode/instances").json(opts);
        self.send("create instance", request).await
    }

    async fn delete_instance(&self, id: i64) -> Result<()> {
        let request = self.request(Method::DELETE, &format!("/linode/instances/{id}"));
        self.send_empty("delete instance", request).await
    }

    async fn list_vpcs(&self, label: &str) -> Result<Vec<Vpc>> {
        self.list("list vpcs", "/vpcs", &serde_json::json!({ "label": label }))
            .await
    }

    async fn create_vpc(&self, opts: &CreateVpc) -> Result<Vpc> {
        let request = self.request(Method::POST, "/vpcs").json(opts);
        self.send("create vpc", request).await
    }

    async fn delete_vpc(&self, id: i64) -> Result<()> {
        let request = self.request(Method::DELETE, &format!("/vpcs/{id}"));
        self.send_empty("delete vpc", request).await
    }
}
