//! Local filesystem backend
//!
//! State lives at `$XDG_CONFIG_HOME/cluster-api/bootstrap/<cluster>/kubeconfig.yaml`.
//! Files are never offloaded: there is nowhere the node could fetch them from.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{plan_offload, BackendProvider, StoredCluster, STATE_FILE_NAME};
use crate::cloudinit::types::CloudConfig;
use crate::config::config_home;
use crate::kubeconfig::Kubeconfig;
use crate::provider::persist_named;
use crate::Result;

/// Directory under the config home that holds all cluster state
pub const STATE_DIR: &str = "cluster-api/bootstrap";

/// Base directory used when none is configured
pub fn default_base_path() -> PathBuf {
    config_home().join(STATE_DIR)
}

/// Filesystem backend
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FileBackend {
    #[serde(default = "default_base_path")]
    base_path: PathBuf,
}

impl Default for FileBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl FileBackend {
    /// Registry name
    pub const NAME: &'static str = "file";

    /// Backend rooted at [`default_base_path`]
    pub fn new() -> Self {
        Self::with_base_path(default_base_path())
    }

    /// Backend rooted at `base_path`
    pub fn with_base_path(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    /// Decode persisted state
    pub fn restore(raw: serde_json::Value) -> Result<Self> {
        Ok(serde_json::from_value(raw)?)
    }

    /// Root directory of all cluster state
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn cluster_dir(&self, cluster: &str) -> PathBuf {
        self.base_path.join(cluster)
    }

    fn state_file(&self, cluster: &str) -> PathBuf {
        self.cluster_dir(cluster).join(STATE_FILE_NAME)
    }
}

#[async_trait]
impl BackendProvider for FileBackend {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn pre_cmd(&mut self, cluster: &str) -> Result<()> {
        let dir = self.cluster_dir(cluster);
        debug!(path = %dir.display(), "ensuring state directory");
        tokio::fs::create_dir_all(&dir).await?;
        Ok(())
    }

    async fn read(&self, cluster: &str) -> Result<Option<Kubeconfig>> {
        let path = self.state_file(cluster);
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => Ok(Some(Kubeconfig::from_yaml(&text)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_config(&self, cluster: &str, config: &Kubeconfig) -> Result<()> {
        let path = self.state_file(cluster);
        tokio::fs::create_dir_all(self.cluster_dir(cluster)).await?;
        tokio::fs::write(&path, config.to_yaml()?).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)).await?;
        }
        info!(path = %path.display(), "wrote cluster state");
        Ok(())
    }

    async fn write_files(
        &self,
        cluster: &str,
        config: &mut CloudConfig,
        ceiling: usize,
    ) -> Result<Vec<String>> {
        if !plan_offload(&config.write_files, ceiling).is_empty() {
            warn!(
                cluster,
                size = config.embedded_size(),
                ceiling,
                "payload exceeds the metadata ceiling and the file backend cannot host files"
            );
        }
        Ok(Vec::new())
    }

    async fn delete(&self, cluster: &str) -> Result<()> {
        let dir = self.cluster_dir(cluster);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {
                info!(path = %dir.display(), "deleted cluster state");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_clusters(&self) -> Result<Vec<StoredCluster>> {
        let mut entries = match tokio::fs::read_dir(&self.base_path).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut clusters = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            match self.read(&name).await? {
                Some(config) => clusters.push(StoredCluster { name, config }),
                None => debug!(cluster = %name, "directory has no state file"),
            }
        }
        clusters.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(clusters)
    }

    fn persist(&self) -> Result<serde_json::Value> {
        persist_named(Self::NAME, self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloudinit::types::InitFile;

    fn state() -> Kubeconfig {
        let mut config = Kubeconfig::default();
        config.set_extension("capi-bootstrap", serde_json::json!({"Values": {"ClusterName": "demo"}}));
        config
    }

    #[tokio::test]
    async fn state_round_trips_through_the_filesystem() {
        let dir = tempfile::tempdir().unwrap();
        let mut backend = FileBackend::with_base_path(dir.path());

        backend.pre_cmd("demo").await.unwrap();
        assert!(dir.path().join("demo").is_dir());
        assert!(backend.read("demo").await.unwrap().is_none());

        backend.write_config("demo", &state()).await.unwrap();
        let read = backend.read("demo").await.unwrap().unwrap();
        assert_eq!(read, state());
        assert!(dir.path().join("demo/kubeconfig.yaml").is_file());
    }

    #[tokio::test]
    async fn delete_removes_the_cluster_directory() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::with_base_path(dir.path());
        backend.write_config("demo", &state()).await.unwrap();

        backend.delete("demo").await.unwrap();
        assert!(!dir.path().join("demo").exists());

        // a second delete is a no-op
        backend.delete("demo").await.unwrap();
    }

    #[tokio::test]
    async fn list_returns_only_directories_with_state() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::with_base_path(dir.path());
        backend.write_config("beta", &state()).await.unwrap();
        backend.write_config("alpha", &state()).await.unwrap();
        std::fs::create_dir(dir.path().join("empty")).unwrap();
        std::fs::write(dir.path().join("stray.txt"), "x").unwrap();

        let names: Vec<_> = backend
            .list_clusters()
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["alpha", "beta"]);
    }

    #[tokio::test]
    async fn missing_base_directory_lists_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::with_base_path(dir.path().join("absent"));
        assert!(backend.list_clusters().await.unwrap().is_empty());
        assert!(backend.read("demo").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn oversized_payload_is_left_inline() {
        let backend = FileBackend::with_base_path("/nonexistent");
        let mut config = CloudConfig {
            write_files: vec![
                InitFile::new("/a", "x".repeat(4 * 1024)),
                InitFile::new("/b", "x".repeat(4 * 1024 * 1024)),
            ],
            runcmd: Vec::new(),
        };

        let commands = backend
            .write_files("demo", &mut config, 1024 * 1024)
            .await
            .unwrap();

        assert!(commands.is_empty());
        assert_eq!(config.write_files[1].content.len(), 4 * 1024 * 1024);
    }

    #[test]
    fn persisted_base_path_round_trips() {
        let backend = FileBackend::with_base_path("/srv/state");
        let raw = backend.persist().unwrap();
        assert_eq!(raw["Name"], "file");
        assert_eq!(raw["BasePath"], "/srv/state");
        let restored = FileBackend::restore(raw).unwrap();
        assert_eq!(restored.base_path(), Path::new("/srv/state"));
    }
}
