//! State backends: where the bootstrap state lives, and where payload files
//! that do not fit the metadata channel are offloaded to

pub mod file;
pub mod github;
pub mod s3;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::cloudinit::types::{join_path, CloudConfig, InitFile};
use crate::kubeconfig::Kubeconfig;
use crate::Result;

/// File name of the persisted state under a cluster's prefix
pub const STATE_FILE_NAME: &str = "kubeconfig.yaml";

/// One cluster found in a backend
#[derive(Clone, Debug, PartialEq)]
pub struct StoredCluster {
    /// Cluster name
    pub name: String,
    /// Persisted state handle
    pub config: Kubeconfig,
}

/// Persists cluster state and optionally hosts offloaded payload files
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BackendProvider: Send + Sync {
    /// Registry name
    fn name(&self) -> &'static str;

    /// Validate credentials or local paths. Runs before every command.
    async fn pre_cmd(&mut self, cluster: &str) -> Result<()>;

    /// Persisted state for `cluster`, `None` if there is none
    async fn read(&self, cluster: &str) -> Result<Option<Kubeconfig>>;

    /// Persist the state handle for `cluster`
    async fn write_config(&self, cluster: &str, config: &Kubeconfig) -> Result<()>;

    /// Offload files until the embedded content fits `ceiling`. Offloaded
    /// files keep their entry with the content cleared; one retrieval
    /// command per offloaded file is returned.
    async fn write_files(
        &self,
        cluster: &str,
        config: &mut CloudConfig,
        ceiling: usize,
    ) -> Result<Vec<String>>;

    /// Remove all state and offloaded files of `cluster`
    async fn delete(&self, cluster: &str) -> Result<()>;

    /// Every cluster with persisted state
    async fn list_clusters(&self) -> Result<Vec<StoredCluster>>;

    /// Serialize for the state store; the object carries a `Name` key
    fn persist(&self) -> Result<serde_json::Value>;
}

/// Indices of the files to offload, largest first.
///
/// Nothing is offloaded when the total is at or below `ceiling`; otherwise
/// files are taken until the remaining total is below it. Empty files are
/// never chosen.
pub fn plan_offload(files: &[InitFile], ceiling: usize) -> Vec<usize> {
    let mut total: usize = files.iter().map(InitFile::embedded_size).sum();
    if total <= ceiling {
        return Vec::new();
    }

    let mut by_size: Vec<usize> = (0..files.len())
        .filter(|&i| files[i].embedded_size() > 0)
        .collect();
    by_size.sort_by_key(|&i| std::cmp::Reverse(files[i].embedded_size()));

    let mut chosen = Vec::new();
    for index in by_size {
        if total < ceiling {
            break;
        }
        total -= files[index].embedded_size();
        chosen.push(index);
    }
    chosen
}

/// Object key of the persisted state
pub(crate) fn state_key(cluster: &str) -> String {
    format!("clusters/{cluster}/{STATE_FILE_NAME}")
}

/// Object key prefix of everything stored for `cluster`
pub(crate) fn cluster_prefix(cluster: &str) -> String {
    format!("clusters/{cluster}/")
}

/// Object key of an offloaded payload file
pub(crate) fn file_key(cluster: &str, path: &str) -> String {
    join_path(&format!("clusters/{cluster}/files"), path)
}

/// Node-side command that fetches with `fetch` and writes the file.
///
/// Base64 files are decoded; everything else passes through cloud-init's
/// template pass so node placeholders resolve like embedded content does.
pub(crate) fn retrieval_command(fetch: &str, file: &InitFile) -> String {
    if file.is_base64() {
        format!("{fetch} | base64 -d > {}", file.path)
    } else {
        format!("{fetch} | xargs -0 cloud-init query -f > {}", file.path)
    }
}
