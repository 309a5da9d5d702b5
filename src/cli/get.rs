//! `get` - print stored data for a cluster

use clap::{Args, Subcommand};

use crate::pipeline;
use crate::provider::ProviderRegistry;
use crate::Result;

/// Show stored data for a cluster
#[derive(Args, Debug)]
pub struct GetArgs {
    /// What to show
    #[command(subcommand)]
    pub resource: GetResource,
}

/// Stored data to show
#[derive(Subcommand, Debug)]
pub enum GetResource {
    /// Admin kubeconfig, without the embedded state
    Kubeconfig {
        /// Cluster name
        name: String,
    },
    /// Persisted values and providers as JSON
    State {
        /// Cluster name
        name: String,
    },
}

/// Run the get command
pub async fn run(args: GetArgs, registry: &ProviderRegistry, backend: &str) -> Result<()> {
    match args.resource {
        GetResource::Kubeconfig { name } => {
            let state = pipeline::load_state(registry, backend, &name).await?;
            print!("{}", state.config.to_yaml()?);
        }
        GetResource::State { name } => {
            let state = pipeline::load_state(registry, backend, &name).await?;
            println!("{}", serde_json::to_string_pretty(&state.describe()?)?);
        }
    }
    Ok(())
}
