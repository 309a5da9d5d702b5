//! Infrastructure providers: compute, networking and the API server front-end

pub mod linode;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::cloudinit::types::{InitFile, ParsedManifest};
use crate::manifest::Manifests;
use crate::values::Values;
use crate::Result;

/// Provisions the bootstrap node and everything in front of it
#[cfg_attr(test, automock)]
#[async_trait]
pub trait InfrastructureProvider: Send + Sync {
    /// Discriminator, equal to the infrastructure cluster kind
    fn name(&self) -> &'static str;

    /// Validate credentials and prepare clients. Runs before every command.
    async fn pre_cmd(&mut self, values: &mut Values) -> Result<()>;

    /// Create the API server front-end and record its address in
    /// `values.cluster_endpoint`. Fails if a front-end for the cluster
    /// already exists.
    async fn pre_deploy(&mut self, values: &mut Values) -> Result<()>;

    /// Create the bootstrap node with `payload` as its first-boot data and
    /// attach it to the front-end
    async fn deploy(&mut self, values: &Values, payload: &[u8]) -> Result<()>;

    /// Hook after the node exists; may do nothing
    async fn post_deploy(&mut self, values: &Values) -> Result<()>;

    /// Write provider-owned fields (endpoint, network ids) into the manifests
    fn update_manifests(&self, manifests: &mut Manifests, values: &Values)
        -> Result<ParsedManifest>;

    /// Remove every resource of the cluster. Returns false when the operator
    /// declined and nothing was deleted.
    async fn delete(&mut self, values: &Values, force: bool) -> Result<bool>;

    /// Provider controller manifests
    fn generate_capi_file(&self, values: &Values) -> Result<InitFile>;

    /// Machine manifests that adopt the bootstrap node after pivot
    fn generate_capi_machine(&self, values: &Values) -> Result<InitFile>;

    /// Any other files the provider needs on the node
    fn generate_additional_files(&self, values: &Values) -> Result<Vec<InitFile>>;

    /// Serialize for the state store; the object carries a `Name` key
    fn persist(&self) -> Result<serde_json::Value>;
}
