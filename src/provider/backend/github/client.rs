//! GitHub repository contents API
//!
//! Files are read and written one at a time on a single branch. Every write
//! is its own commit.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
#[cfg(test)]
use mockall::automock;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Error, Result};

/// Public API root
pub const GITHUB_API_URL: &str = "https://api.github.com";

/// API version pinned on every request
pub const API_VERSION: &str = "2022-11-28";

const USER_AGENT: &str = concat!("capi-bootstrap/", env!("CARGO_PKG_VERSION"));

/// A file read from the repository
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RepoFile {
    /// Decoded content
    pub content: Vec<u8>,
    /// Blob sha, needed to update or delete the file
    pub sha: String,
}

/// One entry of a directory listing
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct DirEntry {
    /// Base name
    pub name: String,
    /// Path from the repository root
    pub path: String,
    /// Blob or tree sha
    #[serde(default)]
    pub sha: String,
    /// `file` or `dir`
    #[serde(rename = "type")]
    pub kind: String,
}

impl DirEntry {
    /// Whether the entry is a directory
    pub fn is_dir(&self) -> bool {
        self.kind == "dir"
    }
}

/// The contents API surface the backend depends on
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ContentsApi: Send + Sync {
    /// Fail unless the configured branch exists
    async fn check_branch(&self) -> Result<()>;
    /// File at `path`, `None` when absent
    async fn get_file(&self, path: &str) -> Result<Option<RepoFile>>;
    /// Create the file, or update it when `sha` names the current blob
    async fn put_file(
        &self,
        path: &str,
        content: Vec<u8>,
        message: String,
        sha: Option<String>,
    ) -> Result<()>;
    /// Delete the file whose current blob is `sha`
    async fn delete_file(&self, path: &str, sha: String, message: String) -> Result<()>;
    /// Entries of the directory at `path`, empty when it does not exist
    async fn list_dir(&self, path: &str) -> Result<Vec<DirEntry>>;
    /// Contents API URL of `path` on the configured branch
    fn file_url(&self, path: &str) -> String;
}

#[derive(Deserialize)]
struct ContentResponse {
    sha: String,
    #[serde(default)]
    content: String,
}

#[derive(Serialize)]
struct PutRequest<'a> {
    message: &'a str,
    content: String,
    branch: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<&'a str>,
}

#[derive(Serialize)]
struct DeleteRequest<'a> {
    message: &'a str,
    sha: &'a str,
    branch: &'a str,
}

/// Token authenticated client bound to one repository branch
#[derive(Clone)]
pub struct GithubClient {
    http: reqwest::Client,
    base_url: String,
    org: String,
    repo: String,
    branch: String,
    token: String,
}

impl std::fmt::Debug for GithubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GithubClient")
            .field("org", &self.org)
            .field("repo", &self.repo)
            .field("branch", &self.branch)
            .finish_non_exhaustive()
    }
}

impl GithubClient {
    /// Client for `org/repo` on `branch`
    pub fn new(
        token: impl Into<String>,
        org: impl Into<String>,
        repo: impl Into<String>,
        branch: impl Into<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: GITHUB_API_URL.to_string(),
            org: org.into(),
            repo: repo.into(),
            branch: branch.into(),
            token: token.into(),
        }
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.http
            .request(method, url)
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION)
            .header("User-Agent", USER_AGENT)
    }

    fn contents_url(&self, path: &str) -> String {
        format!(
            "{}/repos/{}/{}/contents/{}",
            self.base_url,
            self.org,
            self.repo,
            path.trim_start_matches('/')
        )
    }
}

async fn check(operation: &str, response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(Error::remote(operation, format!("HTTP {status}: {body}")))
}

/// Decode the line-wrapped base64 the contents API returns
pub(crate) fn decode_content(content: &str) -> Result<Vec<u8>> {
    let compact: String = content.chars().filter(|c| !c.is_whitespace()).collect();
    STANDARD
        .decode(compact)
        .map_err(|e| Error::remote("decode file content", e))
}

#[async_trait]
impl ContentsApi for GithubClient {
    async fn check_branch(&self) -> Result<()> {
        let url = format!(
            "{}/repos/{}/{}/branches/{}",
            self.base_url, self.org, self.repo, self.branch
        );
        let response = self.request(Method::GET, &url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(Error::config(format!(
                "branch {} may not exist in repo {}/{}",
                self.branch, self.org, self.repo
            )));
        }
        check("get branch", response).await?;
        Ok(())
    }

    async fn get_file(&self, path: &str) -> Result<Option<RepoFile>> {
        let response = self
            .request(Method::GET, &self.contents_url(path))
            .query(&[("ref", &self.branch)])
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body: ContentResponse = check("get file", response).await?.json().await?;
        Ok(Some(RepoFile {
            content: decode_content(&body.content)?,
            sha: body.sha,
        }))
    }

    async fn put_file(
        &self,
        path: &str,
        content: Vec<u8>,
        message: String,
        sha: Option<String>,
    ) -> Result<()> {
        let body = PutRequest {
            message: &message,
            content: STANDARD.encode(&content),
            branch: &self.branch,
            sha: sha.as_deref(),
        };
        let response = self
            .request(Method::PUT, &self.contents_url(path))
            .json(&body)
            .send()
            .await?;
        check("put file", response).await?;
        debug!(path, size = content.len(), "committed file");
        Ok(())
    }

    async fn delete_file(&self, path: &str, sha: String, message: String) -> Result<()> {
        let body = DeleteRequest {
            message: &message,
            sha: &sha,
            branch: &self.branch,
        };
        let response = self
            .request(Method::DELETE, &self.contents_url(path))
            .json(&body)
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        check("delete file", response).await?;
        Ok(())
    }

    async fn list_dir(&self, path: &str) -> Result<Vec<DirEntry>> {
        let response = self
            .request(Method::GET, &self.contents_url(path))
            .query(&[("ref", &self.branch)])
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        Ok(check("list directory", response).await?.json().await?)
    }

    fn file_url(&self, path: &str) -> String {
        format!("{}?ref={}", self.contents_url(path), self.branch)
    }
}
