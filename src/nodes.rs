//! Node summaries for clusters found in a backend

use std::net::Ipv4Addr;

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Node;
use kube::api::ListParams;
use kube::config::KubeConfigOptions;
use kube::{Api, Client, Config};
use tracing::debug;

use crate::kubeconfig::Kubeconfig;
use crate::{Error, Result};

const HEADERS: [&str; 5] = ["Name", "Status", "Version", "External IP", "Age"];

/// One row of the node table
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NodeInfo {
    /// Node name
    pub name: String,
    /// `Ready`, `NotReady`, or `Unknown` when the kubelet has not reported
    pub status: String,
    /// Kubelet version
    pub version: String,
    /// First IPv4 external address
    pub external_ip: String,
    /// Time since creation
    pub age: String,
}

/// Nodes of one cluster
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ClusterNodes {
    /// Cluster name
    pub name: String,
    /// Its nodes, in API order
    pub nodes: Vec<NodeInfo>,
}

/// Age as fractional hours under a day, fractional days after
pub fn format_age(created: &DateTime<Utc>, now: &DateTime<Utc>) -> String {
    let hours = now.signed_duration_since(*created).num_seconds().max(0) as f64 / 3600.0;
    if hours < 24.0 {
        format!("{hours:.1}h")
    } else {
        format!("{:.2}d", hours / 24.0)
    }
}

/// Summarize a node as of `now`
pub fn node_info(node: &Node, now: &DateTime<Utc>) -> NodeInfo {
    let status = node.status.as_ref();

    let ready = status
        .and_then(|s| s.conditions.as_ref())
        .and_then(|conds| {
            conds
                .iter()
                .find(|c| c.reason.as_deref() == Some("KubeletReady"))
        })
        .map(|c| if c.status == "True" { "Ready" } else { "NotReady" })
        .unwrap_or("Unknown");

    let external_ip = status
        .and_then(|s| s.addresses.as_ref())
        .and_then(|addrs| {
            addrs
                .iter()
                .filter(|a| a.type_ == "ExternalIP")
                .find(|a| a.address.parse::<Ipv4Addr>().is_ok())
        })
        .map(|a| a.address.clone())
        .unwrap_or_default();

    NodeInfo {
        name: node.metadata.name.clone().unwrap_or_default(),
        status: ready.to_string(),
        version: status
            .and_then(|s| s.node_info.as_ref())
            .map(|i| i.kubelet_version.clone())
            .unwrap_or_default(),
        external_ip,
        age: node
            .metadata
            .creation_timestamp
            .as_ref()
            .map(|t| format_age(&t.0, now))
            .unwrap_or_default(),
    }
}

/// Client for the cluster `config` points at, using its current context
pub async fn client_for(config: &Kubeconfig) -> Result<Client> {
    let kubeconfig = kube::config::Kubeconfig::from_yaml(&config.to_yaml()?)
        .map_err(|e| Error::config(format!("invalid kubeconfig: {e}")))?;
    let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .map_err(|e| Error::config(format!("invalid kubeconfig: {e}")))?;
    Ok(Client::try_from(config)?)
}

/// Every node of the cluster `config` points at
pub async fn list_nodes(config: &Kubeconfig) -> Result<Vec<NodeInfo>> {
    let client = client_for(config).await?;
    let nodes = Api::<Node>::all(client).list(&ListParams::default()).await?;
    debug!(count = nodes.items.len(), "listed nodes");

    let now = Utc::now();
    Ok(nodes.items.iter().map(|n| node_info(n, &now)).collect())
}

/// `Cluster: <name>` followed by an aligned node table, per cluster
pub fn render(clusters: &[ClusterNodes]) -> String {
    let mut out = String::new();
    for cluster in clusters {
        out.push_str(&format!("Cluster: {}\n", cluster.name));

        let rows: Vec<[&str; 5]> = cluster
            .nodes
            .iter()
            .map(|n| {
                [
                    n.name.as_str(),
                    n.status.as_str(),
                    n.version.as_str(),
                    n.external_ip.as_str(),
                    n.age.as_str(),
                ]
            })
            .collect();

        let mut widths = HEADERS.map(str::len);
        for row in &rows {
            for (w, cell) in widths.iter_mut().zip(row) {
                *w = (*w).max(cell.len());
            }
        }

        for row in std::iter::once(HEADERS).chain(rows) {
            let line: Vec<String> = row
                .iter()
                .zip(widths)
                .map(|(cell, w)| format!("{cell:<w$}"))
                .collect();
            out.push_str(line.join("  ").trim_end());
            out.push('\n');
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use k8s_openapi::api::core::v1::{NodeAddress, NodeCondition, NodeStatus, NodeSystemInfo};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};

    fn node(name: &str, ready: &str, created: DateTime<Utc>) -> Node {
        Node {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                creation_timestamp: Some(Time(created)),
                ..Default::default()
            },
            status: Some(NodeStatus {
                conditions: Some(vec![
                    NodeCondition {
                        type_: "MemoryPressure".to_string(),
                        status: "False".to_string(),
                        reason: Some("KubeletHasSufficientMemory".to_string()),
                        ..Default::default()
                    },
                    NodeCondition {
                        type_: "Ready".to_string(),
                        status: ready.to_string(),
                        reason: Some("KubeletReady".to_string()),
                        ..Default::default()
                    },
                ]),
                addresses: Some(vec![
                    NodeAddress {
                        type_: "InternalIP".to_string(),
                        address: "192.168.128.5".to_string(),
                    },
                    NodeAddress {
                        type_: "ExternalIP".to_string(),
                        address: "2600:3c00::1".to_string(),
                    },
                    NodeAddress {
                        type_: "ExternalIP".to_string(),
                        address: "172.105.1.2".to_string(),
                    },
                ]),
                node_info: Some(NodeSystemInfo {
                    kubelet_version: "v1.29.4".to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn ready_node_reports_ipv4_and_version() {
        let now = Utc::now();
        let info = node_info(&node("demo-bootstrap", "True", now - Duration::minutes(90)), &now);

        assert_eq!(
            info,
            NodeInfo {
                name: "demo-bootstrap".to_string(),
                status: "Ready".to_string(),
                version: "v1.29.4".to_string(),
                external_ip: "172.105.1.2".to_string(),
                age: "1.5h".to_string(),
            }
        );
    }

    #[test]
    fn kubelet_not_ready_is_not_ready() {
        let now = Utc::now();
        assert_eq!(node_info(&node("n", "False", now), &now).status, "NotReady");
    }

    #[test]
    fn missing_status_is_unknown() {
        let info = node_info(&Node::default(), &Utc::now());
        assert_eq!(info.status, "Unknown");
        assert!(info.external_ip.is_empty());
        assert!(info.age.is_empty());
    }

    #[test]
    fn age_switches_to_days_after_one_day() {
        let now = Utc::now();
        assert_eq!(format_age(&(now - Duration::minutes(6)), &now), "0.1h");
        assert_eq!(format_age(&(now - Duration::hours(36)), &now), "1.50d");
        assert_eq!(format_age(&(now + Duration::hours(1)), &now), "0.0h");
    }

    /// Story: `list` shows every stored cluster with its nodes
    #[test]
    fn story_clusters_render_as_aligned_tables() {
        let clusters = vec![
            ClusterNodes {
                name: "demo".to_string(),
                nodes: vec![NodeInfo {
                    name: "demo-bootstrap".to_string(),
                    status: "Ready".to_string(),
                    version: "v1.29.4".to_string(),
                    external_ip: "172.105.1.2".to_string(),
                    age: "2.0h".to_string(),
                }],
            },
            ClusterNodes {
                name: "empty".to_string(),
                nodes: Vec::new(),
            },
        ];

        let text = render(&clusters);
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines[0], "Cluster: demo");
        assert_eq!(lines[1], "Name            Status  Version  External IP  Age");
        assert_eq!(lines[2], "demo-bootstrap  Ready   v1.29.4  172.105.1.2  2.0h");
        assert_eq!(lines[3], "Cluster: empty");
        assert_eq!(lines[4], "Name  Status  Version  External IP  Age");
        assert_eq!(lines.len(), 5);
    }
}
