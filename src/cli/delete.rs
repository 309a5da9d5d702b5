//! `delete` - remove a cluster's infrastructure and stored state

use clap::Args;
use tracing::info;

use crate::pipeline;
use crate::provider::ProviderRegistry;
use crate::Result;

/// Delete a cluster
#[derive(Args, Debug)]
pub struct DeleteArgs {
    /// Cluster name
    pub name: String,

    /// Delete without asking for confirmation
    #[arg(short, long)]
    pub force: bool,
}

/// Run the delete command
pub async fn run(args: DeleteArgs, registry: &ProviderRegistry, backend: &str) -> Result<()> {
    let mut state = pipeline::load_state(registry, backend, &args.name).await?;
    if !pipeline::delete(&mut state, args.force).await? {
        info!(cluster = %args.name, "nothing deleted");
    }
    Ok(())
}
