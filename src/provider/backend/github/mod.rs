//! GitHub repository backend
//!
//! State is committed to `clusters/<cluster>/kubeconfig.yaml` on a branch of
//! a private repository. Offloaded payload files go under
//! `clusters/<cluster>/files/` and the node downloads them with the token.

pub mod client;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use self::client::{ContentsApi, GithubClient};
use super::{
    cluster_prefix, file_key, plan_offload, retrieval_command, state_key, BackendProvider,
    StoredCluster,
};
use crate::cloudinit::types::CloudConfig;
use crate::kubeconfig::Kubeconfig;
use crate::provider::persist_named;
use crate::{Error, Result};

/// Personal access token with contents write access
pub const TOKEN_ENV: &str = "GITHUB_TOKEN";
/// Repository owner
pub const ORG_ENV: &str = "GITHUB_ORG";
/// Repository name
pub const REPO_ENV: &str = "GITHUB_REPO";
/// Branch holding the state
pub const BRANCH_ENV: &str = "GITHUB_BRANCH";

const DEFAULT_ORG: &str = "linode";
const DEFAULT_REPO: &str = "capi-bootstrap";
const DEFAULT_BRANCH: &str = "main";

/// GitHub backend
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GithubBackend {
    #[serde(default = "default_org")]
    org: String,
    #[serde(default = "default_repo")]
    repo: String,
    #[serde(default = "default_branch")]
    branch: String,
    #[serde(skip)]
    token: String,
    #[serde(skip)]
    api: Option<Arc<dyn ContentsApi>>,
}

fn default_org() -> String {
    DEFAULT_ORG.to_string()
}

fn default_repo() -> String {
    DEFAULT_REPO.to_string()
}

fn default_branch() -> String {
    DEFAULT_BRANCH.to_string()
}

impl std::fmt::Debug for GithubBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GithubBackend")
            .field("org", &self.org)
            .field("repo", &self.repo)
            .field("branch", &self.branch)
            .finish_non_exhaustive()
    }
}

impl Default for GithubBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl GithubBackend {
    /// Registry name
    pub const NAME: &'static str = "github";

    /// Backend on `linode/capi-bootstrap@main` until the environment says otherwise
    pub fn new() -> Self {
        Self {
            org: default_org(),
            repo: default_repo(),
            branch: default_branch(),
            token: String::new(),
            api: None,
        }
    }

    /// Backend over an existing API client
    pub fn with_api(token: impl Into<String>, api: Arc<dyn ContentsApi>) -> Self {
        Self {
            token: token.into(),
            api: Some(api),
            ..Self::new()
        }
    }

    /// Decode persisted state
    pub fn restore(raw: serde_json::Value) -> Result<Self> {
        Ok(serde_json::from_value(raw)?)
    }

    /// Take the token and any repository overrides from `lookup`
    fn configure(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let set = |name: &str| lookup(name).filter(|v| !v.is_empty());
        self.token = set(TOKEN_ENV).ok_or_else(|| Error::missing_env(TOKEN_ENV))?;
        if let Some(org) = set(ORG_ENV) {
            self.org = org;
        }
        if let Some(repo) = set(REPO_ENV) {
            self.repo = repo;
        }
        if let Some(branch) = set(BRANCH_ENV) {
            self.branch = branch;
        }
        Ok(())
    }

    fn api(&self) -> Result<&dyn ContentsApi> {
        self.api
            .as_deref()
            .ok_or_else(|| Error::config("github backend used before it was configured"))
    }

    /// Create or update `path` with a commit message describing the change
    async fn upsert(&self, path: &str, content: Vec<u8>, what: &str) -> Result<()> {
        let api = self.api()?;
        let (sha, verb) = match api.get_file(path).await? {
            Some(existing) => (Some(existing.sha), "updating"),
            None => (None, "creating"),
        };
        api.put_file(path, content, format!("{verb} {what}"), sha)
            .await
    }
}

#[async_trait]
impl BackendProvider for GithubBackend {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn pre_cmd(&mut self, _cluster: &str) -> Result<()> {
        if self.api.is_none() {
            self.configure(|name| std::env::var(name).ok())?;
            self.api = Some(Arc::new(GithubClient::new(
                &self.token,
                &self.org,
                &self.repo,
                &self.branch,
            )));
        }
        self.api()?.check_branch().await?;
        debug!(org = %self.org, repo = %self.repo, branch = %self.branch, "configured github backend");
        Ok(())
    }

    async fn read(&self, cluster: &str) -> Result<Option<Kubeconfig>> {
        let Some(file) = self.api()?.get_file(&state_key(cluster)).await? else {
            return Ok(None);
        };
        let text = String::from_utf8(file.content)
            .map_err(|e| Error::config(format!("state of cluster {cluster} is not utf-8: {e}")))?;
        Ok(Some(Kubeconfig::from_yaml(&text)?))
    }

    async fn write_config(&self, cluster: &str, config: &Kubeconfig) -> Result<()> {
        let path = state_key(cluster);
        self.upsert(
            &path,
            config.to_yaml()?.into_bytes(),
            &format!("cluster {cluster} state file"),
        )
        .await?;
        info!(repo = %format!("{}/{}", self.org, self.repo), path = %path, "wrote cluster state");
        Ok(())
    }

    async fn write_files(
        &self,
        cluster: &str,
        config: &mut CloudConfig,
        ceiling: usize,
    ) -> Result<Vec<String>> {
        let api = self.api()?;
        let mut commands = Vec::new();
        for index in plan_offload(&config.write_files, ceiling) {
            let file = &mut config.write_files[index];
            let path = file_key(cluster, &file.path);
            self.upsert(
                &path,
                file.content.as_bytes().to_vec(),
                &format!("cluster {cluster} file {}", file.path),
            )
            .await?;

            let fetch = format!(
                "curl -sL -H 'Accept: application/vnd.github.raw+json' -H 'Authorization: Bearer {}' -H 'X-GitHub-Api-Version: {}' '{}'",
                self.token,
                client::API_VERSION,
                api.file_url(&path)
            );
            commands.push(retrieval_command(&fetch, file));
            info!(path = %file.path, size = file.content.len(), "offloaded payload file");
            file.content.clear();
        }
        Ok(commands)
    }

    async fn delete(&self, cluster: &str) -> Result<()> {
        let api = self.api()?;
        let message = format!("deleting state files for cluster {cluster}");
        let mut pending = vec![cluster_prefix(cluster).trim_end_matches('/').to_string()];
        let mut deleted = 0usize;
        while let Some(dir) = pending.pop() {
            for entry in api.list_dir(&dir).await? {
                if entry.is_dir() {
                    pending.push(entry.path);
                } else {
                    api.delete_file(&entry.path, entry.sha, message.clone()).await?;
                    deleted += 1;
                }
            }
        }
        info!(cluster, files = deleted, "deleted cluster state");
        Ok(())
    }

    async fn list_clusters(&self) -> Result<Vec<StoredCluster>> {
        let mut clusters = Vec::new();
        for entry in self.api()?.list_dir("clusters").await? {
            if !entry.is_dir() {
                continue;
            }
            if let Some(config) = self.read(&entry.name).await? {
                clusters.push(StoredCluster {
                    name: entry.name,
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
