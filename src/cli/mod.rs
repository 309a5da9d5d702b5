//! Command line interface
//!
//! Global flags pick the profile file, the profile within it and the
//! backend. The profile's environment is exported before any subcommand
//! runs, so providers see the credentials it names.

mod cluster;
mod delete;
mod get;
mod list;

use clap::{Args, Parser, Subcommand};

use crate::config::{self, DEFAULT_CONFIG_PATH};
use crate::provider::ProviderRegistry;
use crate::Result;

pub use cluster::ClusterArgs;
pub use delete::DeleteArgs;
pub use get::{GetArgs, GetResource};

/// capi-bootstrap - bootstrap self-managing Cluster API clusters
#[derive(Parser, Debug)]
#[command(name = "capi-bootstrap")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Flags shared by every command
    #[command(flatten)]
    pub global: GlobalArgs,

    /// Command to run
    #[command(subcommand)]
    pub command: Commands,
}

/// Flags accepted before or after any subcommand
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Profile configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    pub config: String,

    /// Profile to use from the configuration file
    #[arg(long, global = true)]
    pub profile: Option<String>,

    /// Backend that stores cluster state (file, s3, github)
    #[arg(long, global = true, env = "CAPI_BOOTSTRAP_BACKEND")]
    pub backend: Option<String>,
}

/// Top-level commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create a cluster from a manifest template
    Cluster(ClusterArgs),
    /// Delete a cluster and its stored state
    Delete(DeleteArgs),
    /// Show stored data for a cluster
    Get(GetArgs),
    /// List stored clusters and their nodes
    List,
}

impl GlobalArgs {
    /// Resolve the profile file, export its environment and return the
    /// backend name to use
    pub fn apply(&self) -> Result<String> {
        let resolved = config::load(&self.config, self.profile.as_deref(), self.backend.as_deref())?;
        resolved.export();
        Ok(resolved.backend)
    }
}

impl Cli {
    /// Run the CLI command
    pub async fn run(self) -> Result<()> {
        let backend = self.global.apply()?;
        let registry = ProviderRegistry::default();

        match self.command {
            Commands::Cluster(args) => cluster::run(args, &registry, &backend).await,
            Commands::Delete(args) => delete::run(args, &registry, &backend).await,
            Commands::Get(args) => get::run(args, &registry, &backend).await,
            Commands::List => list::run(&registry, &backend).await,
        }
    }
}
