//! `list` - every cluster in the backend with its nodes

use tracing::warn;

use crate::nodes::{self, ClusterNodes};
use crate::provider::ProviderRegistry;
use crate::Result;

/// Run the list command. A cluster whose API server cannot be reached is
/// listed without nodes.
pub async fn run(registry: &ProviderRegistry, backend: &str) -> Result<()> {
    let mut store = registry.backend(backend)?;
    store.pre_cmd("").await?;

    let mut clusters = Vec::new();
    for stored in store.list_clusters().await? {
        let nodes = match nodes::list_nodes(&stored.config.without_extensions()).await {
            Ok(nodes) => nodes,
            Err(e) => {
                warn!(cluster = %stored.name, error = %e, "could not list nodes");
                Vec::new()
            }
        };
        clusters.push(ClusterNodes {
            name: stored.name,
            nodes,
        });
    }

    print!("{}", nodes::render(&clusters));
    Ok(())
}
