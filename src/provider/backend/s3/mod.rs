//! S3 compatible object storage backend
//!
//! State lives at `clusters/<cluster>/kubeconfig.yaml` in the bucket. Payload
//! files that do not fit the metadata ceiling are uploaded under
//! `clusters/<cluster>/files/` and fetched by the node through presigned URLs.

pub mod client;
pub mod sigv4;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use self::client::{HttpObjectStore, ObjectStore};
use self::sigv4::{Signer, DEFAULT_REGION};
use super::{
    cluster_prefix, file_key, plan_offload, retrieval_command, state_key, BackendProvider,
    StoredCluster, STATE_FILE_NAME,
};
use crate::cloudinit::types::CloudConfig;
use crate::kubeconfig::Kubeconfig;
use crate::provider::persist_named;
use crate::{Error, Result};

/// Bucket name
pub const BUCKET_ENV: &str = "AWS_BUCKET_NAME";
/// Access key id
pub const ACCESS_KEY_ENV: &str = "AWS_ACCESS_KEY";
/// Secret access key
pub const SECRET_KEY_ENV: &str = "AWS_SECRET_KEY";
/// Endpoint URL for non-AWS stores
pub const ENDPOINT_ENV: &str = "AWS_ENDPOINT";
/// Signing region
pub const REGION_ENV: &str = "AWS_REGION";

/// Lifetime of presigned download URLs
pub const PRESIGN_EXPIRY: Duration = Duration::from_secs(3600);

/// S3 backend
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct S3Backend {
    #[serde(default)]
    endpoint: String,
    #[serde(default)]
    region: String,
    #[serde(default)]
    bucket_name: String,
    #[serde(skip)]
    store: Option<Arc<dyn ObjectStore>>,
}

impl std::fmt::Debug for S3Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Backend")
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("bucket_name", &self.bucket_name)
            .finish_non_exhaustive()
    }
}

impl S3Backend {
    /// Registry name
    pub const NAME: &'static str = "s3";

    /// Unconfigured backend; [`BackendProvider::pre_cmd`] reads the environment
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend over an existing store
    pub fn with_store(bucket_name: impl Into<String>, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            bucket_name: bucket_name.into(),
            store: Some(store),
            ..Self::default()
        }
    }

    /// Decode persisted state
    pub fn restore(raw: serde_json::Value) -> Result<Self> {
        Ok(serde_json::from_value(raw)?)
    }

    /// Configure from `lookup` (the process environment in production)
    fn configure(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let required = |name: &str| {
            lookup(name)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| Error::missing_env(name))
        };
        let bucket_name = required(BUCKET_ENV)?;
        let access_key = required(ACCESS_KEY_ENV)?;
        let secret_key = required(SECRET_KEY_ENV)?;
        let region = lookup(REGION_ENV).unwrap_or_default();
        let endpoint = lookup(ENDPOINT_ENV).unwrap_or_default();

        let url = if endpoint.is_empty() {
            let region = if region.is_empty() { DEFAULT_REGION } else { &region };
            format!("https://s3.{region}.amazonaws.com")
        } else {
            endpoint.clone()
        };
        let store = HttpObjectStore::new(&url, &bucket_name, Signer::new(access_key, secret_key, &region))?;

        self.endpoint = endpoint;
        self.region = region;
        self.bucket_name = bucket_name;
        self.store = Some(Arc::new(store));
        Ok(())
    }

    fn store(&self) -> Result<&dyn ObjectStore> {
        self.store
            .as_deref()
            .ok_or_else(|| Error::config("s3 backend used before it was configured"))
    }
}

#[async_trait]
impl BackendProvider for S3Backend {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn pre_cmd(&mut self, _cluster: &str) -> Result<()> {
        if self.store.is_some() {
            return Ok(());
        }
        self.configure(|name| std::env::var(name).ok())?;
        debug!(bucket = %self.bucket_name, endpoint = %self.endpoint, "configured s3 backend");
        Ok(())
    }

    async fn read(&self, cluster: &str) -> Result<Option<Kubeconfig>> {
        let Some(body) = self.store()?.get(&state_key(cluster)).await? else {
            return Ok(None);
        };
        let text = String::from_utf8(body)
            .map_err(|e| Error::config(format!("state of cluster {cluster} is not utf-8: {e}")))?;
        Ok(Some(Kubeconfig::from_yaml(&text)?))
    }

    async fn write_config(&self, cluster: &str, config: &Kubeconfig) -> Result<()> {
        let key = state_key(cluster);
        self.store()?
            .put(&key, config.to_yaml()?.into_bytes())
            .await?;
        info!(bucket = %self.bucket_name, key = %key, "wrote cluster state");
        Ok(())
    }

    async fn write_files(
        &self,
        cluster: &str,
        config: &mut CloudConfig,
        ceiling: usize,
    ) -> Result<Vec<String>> {
        let store = self.store()?;
        let mut commands = Vec::new();
        for index in plan_offload(&config.write_files, ceiling) {
            let file = &mut config.write_files[index];
            let key = file_key(cluster, &file.path);
            store.put(&key, file.content.as_bytes().to_vec()).await?;
            let url = store.presign_get(&key, PRESIGN_EXPIRY)?;

            commands.push(retrieval_command(&format!("curl -s '{url}'"), file));
            info!(path = %file.path, size = file.content.len(), "offloaded payload file");
            file.content.clear();
        }
        Ok(commands)
    }

    async fn delete(&self, cluster: &str) -> Result<()> {
        let store = self.store()?;
        let keys = store.list(&cluster_prefix(cluster)).await?;
        for key in &keys {
            store.delete(key).await?;
        }
        info!(bucket = %self.bucket_name, cluster, objects = keys.len(), "deleted cluster state");
        Ok(())
    }

    async fn list_clusters(&self) -> Result<Vec<StoredCluster>> {
        let keys = self.store()?.list("clusters/").await?;
        let mut clusters = Vec::new();
        for key in keys {
            let Some(name) = key
                .strip_prefix("clusters/")
                .and_then(|rest| rest.strip_suffix(&format!("/{STATE_FILE_NAME}")))
                .filter(|name| !name.is_empty() && !name.contains('/'))
            else {
                continue;
            };
            if let Some(config) = self.read(name).await? {
                clusters.push(StoredCluster {
                    name: name.to_string(),
                    config,
                });
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
    use super::client::MockObjectStore;
    use super::*;
    use crate::cloudinit::types::InitFile;
    use mockall::predicate::eq;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    fn state() -> Kubeconfig {
        let mut config = Kubeconfig::default();
        config.set_extension("capi-bootstrap", serde_json::json!({"Values": {}}));
        config
    }

    /// Story: a payload with a 4MB manifest is split between the metadata
    /// channel and the bucket
    ///
    /// Only the large file is uploaded; the node gets exactly one download
    /// command and the file entry stays in place with its content cleared.
    #[tokio::test]
    async fn story_oversized_file_moves_to_the_bucket() {
        let mut store = MockObjectStore::new();
        store
            .expect_put()
            .withf(|key, body| key == "clusters/demo/files/var/big.yaml" && body.len() == 4 * 1024 * 1024)
            .times(1)
            .returning(|_, _| Ok(()));
        store
            .expect_presign_get()
            .with(eq("clusters/demo/files/var/big.yaml"), eq(PRESIGN_EXPIRY))
            .times(1)
            .returning(|_, _| Ok("https://s3.example/state/big?sig=1".to_string()));
        let backend = S3Backend::with_store("state", Arc::new(store));

        let mut config = CloudConfig {
            write_files: vec![
                InitFile::new("/var/small.yaml", "x".repeat(4 * 1024)),
                InitFile::new("/var/big.yaml", "x".repeat(4 * 1024 * 1024)),
            ],
            runcmd: Vec::new(),
        };
        let commands = backend
            .write_files("demo", &mut config, 1024 * 1024)
            .await
            .unwrap();

        assert_eq!(
            commands,
            vec!["curl -s 'https://s3.example/state/big?sig=1' | xargs -0 cloud-init query -f > /var/big.yaml"]
        );
        assert_eq!(config.write_files.len(), 2);
        assert_eq!(config.write_files[0].content.len(), 4 * 1024);
        assert!(config.write_files[1].content.is_empty());
    }

    #[tokio::test]
    async fn small_payloads_upload_nothing() {
        let backend = S3Backend::with_store("state", Arc::new(MockObjectStore::new()));
        let mut config = CloudConfig {
            write_files: vec![InitFile::new("/a", "abc")],
            runcmd: Vec::new(),
        };
        let commands = backend.write_files("demo", &mut config, 1024).await.unwrap();
        assert!(commands.is_empty());
        assert_eq!(config.write_files[0].content, "abc");
    }

    #[tokio::test]
    async fn missing_state_reads_as_none() {
        let mut store = MockObjectStore::new();
        store
            .expect_get()
            .with(eq("clusters/demo/kubeconfig.yaml"))
            .returning(|_| Ok(None));
        let backend = S3Backend::with_store("state", Arc::new(store));
        assert!(backend.read("demo").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn written_state_is_yaml_at_the_state_key() {
        let expected = state().to_yaml().unwrap().into_bytes();
        let mut store = MockObjectStore::new();
        store
            .expect_put()
            .with(eq("clusters/demo/kubeconfig.yaml"), eq(expected))
            .times(1)
            .returning(|_, _| Ok(()));
        let backend = S3Backend::with_store("state", Arc::new(store));
        backend.write_config("demo", &state()).await.unwrap();
    }

    #[tokio::test]
    async fn delete_removes_every_object_under_the_cluster() {
        let mut store = MockObjectStore::new();
        store
            .expect_list()
            .with(eq("clusters/demo/"))
            .returning(|_| {
                Ok(vec![
                    "clusters/demo/kubeconfig.yaml".to_string(),
                    "clusters/demo/files/tmp/a".to_string(),
                ])
            });
        store.expect_delete().times(2).returning(|_| Ok(()));
        let backend = S3Backend::with_store("state", Arc::new(store));
        backend.delete("demo").await.unwrap();
    }

    #[tokio::test]
    async fn list_reads_each_state_file() {
        let body = state().to_yaml().unwrap().into_bytes();
        let mut store = MockObjectStore::new();
        store.expect_list().with(eq("clusters/")).returning(|_| {
            Ok(vec![
                "clusters/beta/kubeconfig.yaml".to_string(),
                "clusters/beta/files/tmp/a".to_string(),
                "clusters/alpha/kubeconfig.yaml".to_string(),
            ])
        });
        store
            .expect_get()
            .returning(move |_| Ok(Some(body.clone())));
        let backend = S3Backend::with_store("state", Arc::new(store));

        let names: Vec<_> = backend
            .list_clusters()
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["alpha", "beta"]);
    }

    #[test]
    fn credentials_are_required() {
        let mut backend = S3Backend::new();
        let err = backend.configure(env(&[(BUCKET_ENV, "state")])).unwrap_err();
        assert_eq!(err.to_string(), "AWS_ACCESS_KEY environment variable is required");

        let err = backend.configure(env(&[])).unwrap_err();
        assert_eq!(err.to_string(), "AWS_BUCKET_NAME environment variable is required");
    }

    #[test]
    fn configured_backend_persists_without_secrets() {
        let mut backend = S3Backend::new();
        backend
            .configure(env(&[
                (BUCKET_ENV, "state"),
                (ACCESS_KEY_ENV, "access"),
                (SECRET_KEY_ENV, "secret"),
                (ENDPOINT_ENV, "https://us-east-1.linodeobjects.com"),
                (REGION_ENV, "us-east-1"),
            ]))
            .unwrap();

        let raw = backend.persist().unwrap();
        assert_eq!(raw["Name"], "s3");
        assert_eq!(raw["BucketName"], "state");
        assert_eq!(raw["Endpoint"], "https://us-east-1.linodeobjects.com");
        assert!(!raw.to_string().contains("secret"));

        let restored = S3Backend::restore(raw).unwrap();
        assert_eq!(restored.bucket_name, "state");
        assert!(restored.store.is_none());
    }

    #[tokio::test]
    async fn unconfigured_backend_refuses_to_run() {
        let backend = S3Backend::new();
        assert!(matches!(
            backend.read("demo").await.unwrap_err(),
            Error::Config(_)
        ));
    }
}
