//! `cluster` - create a bootstrap cluster from a manifest template

use std::path::PathBuf;

use clap::Args;
use tracing::info;

use crate::pipeline::{self, CreateRequest};
use crate::provider::ProviderRegistry;
use crate::{Error, Result};

/// Create a cluster
#[derive(Args, Debug)]
pub struct ClusterArgs {
    /// Cluster name
    #[arg(env = "CLUSTER_NAME")]
    pub name: String,

    /// Cluster API manifest template describing the target cluster.
    /// Quote `[[[ ... ]]]` placeholders used as YAML values.
    #[arg(short, long)]
    pub manifest: PathBuf,
}

/// Run the cluster command
pub async fn run(args: ClusterArgs, registry: &ProviderRegistry, backend: &str) -> Result<()> {
    let manifest = tokio::fs::read_to_string(&args.manifest).await.map_err(|e| {
        Error::config(format!("failed to read {}: {}", args.manifest.display(), e))
    })?;
    info!(cluster = %args.name, "creating cluster");

    let request = CreateRequest {
        cluster_name: args.name,
        manifest_file: args.manifest.to_string_lossy().into_owned(),
        manifest,
        backend: backend.to_string(),
    };
    let state = pipeline::create(registry, &request).await?;

    info!(
        cluster = %state.values.cluster_name,
        endpoint = %state.values.cluster_endpoint,
        "bootstrap node created; run `capi-bootstrap get kubeconfig {}` for access",
        state.values.cluster_name
    );
    Ok(())
}
