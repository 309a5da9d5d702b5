//! Minimal S3 object API over reqwest
//!
//! Path-style addressing only (`<endpoint>/<bucket>/<key>`), which every S3
//! compatible store accepts.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
#[cfg(test)]
use mockall::automock;
use reqwest::{Method, StatusCode, Url};
use tracing::debug;

use super::sigv4::{canonical_query, uri_encode, RequestParts, Signer};
use crate::{Error, Result};

/// Object operations the backend needs
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Object body, `None` when the key does not exist
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    /// Create or replace an object
    async fn put(&self, key: &str, body: Vec<u8>) -> Result<()>;
    /// Delete an object; missing keys are not an error
    async fn delete(&self, key: &str) -> Result<()>;
    /// Every key starting with `prefix`
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;
    /// Anonymous GET URL for `key`, valid for `expires`
    fn presign_get(&self, key: &str, expires: Duration) -> Result<String>;
}

/// SigV4 signed client for one bucket
#[derive(Clone, Debug)]
pub struct HttpObjectStore {
    http: reqwest::Client,
    endpoint: Url,
    bucket: String,
    signer: Signer,
}

impl HttpObjectStore {
    /// Client for `bucket` at `endpoint`
    pub fn new(endpoint: &str, bucket: impl Into<String>, signer: Signer) -> Result<Self> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| Error::config(format!("invalid s3 endpoint {endpoint}: {e}")))?;
        if endpoint.host_str().is_none() {
            return Err(Error::config(format!("s3 endpoint {endpoint} has no host")));
        }
        Ok(Self {
            http: reqwest::Client::new(),
            endpoint,
            bucket: bucket.into(),
            signer,
        })
    }

    fn host(&self) -> String {
        let host = self.endpoint.host_str().unwrap_or_default();
        match self.endpoint.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        }
    }

    fn object_path(&self, key: &str) -> String {
        if key.is_empty() {
            format!("/{}", self.bucket)
        } else {
            format!("/{}/{}", self.bucket, key)
        }
    }

    fn url(&self, path: &str, query: &str) -> Result<Url> {
        let mut url = format!(
            "{}://{}{}",
            self.endpoint.scheme(),
            self.host(),
            uri_encode(path, false)
        );
        if !query.is_empty() {
            url.push('?');
            url.push_str(query);
        }
        Url::parse(&url).map_err(|e| Error::config(format!("invalid object url {url}: {e}")))
    }

    async fn send(
        &self,
        method: Method,
        key: &str,
        query: &[(String, String)],
        body: Vec<u8>,
    ) -> Result<reqwest::Response> {
        let path = self.object_path(key);
        let host = self.host();
        let headers = self.signer.sign_headers(
            RequestParts {
                method: method.as_str(),
                host: &host,
                path: &path,
                query,
            },
            &body,
            Utc::now(),
        );

        let mut request = self
            .http
            .request(method, self.url(&path, &canonical_query(query))?)
            .body(body);
        for (name, value) in headers {
            request = request.header(name, value);
        }
        Ok(request.send().await?)
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

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let response = self.send(Method::GET, key, &[], Vec::new()).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = check("get object", response).await?;
        Ok(Some(response.bytes().await?.to_vec()))
    }

    async fn put(&self, key: &str, body: Vec<u8>) -> Result<()> {
        let size = body.len();
        let response = self.send(Method::PUT, key, &[], body).await?;
        check("put object", response).await?;
        debug!(key, size, "uploaded object");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let response = self.send(Method::DELETE, key, &[], Vec::new()).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        check("delete object", response).await?;
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;
        loop {
            let mut query = vec![
                ("list-type".to_string(), "2".to_string()),
                ("prefix".to_string(), prefix.to_string()),
            ];
            if let Some(token) = continuation.take() {
                query.push(("continuation-token".to_string(), token));
            }
            let response = self.send(Method::GET, "", &query, Vec::new()).await?;
            let body = check("list objects", response).await?.text().await?;

            keys.extend(xml_values(&body, "Key"));
            let truncated = xml_values(&body, "IsTruncated")
                .first()
                .is_some_and(|v| v == "true");
            continuation = xml_values(&body, "NextContinuationToken").into_iter().next();
            if !truncated || continuation.is_none() {
                break;
            }
        }
        debug!(prefix, count = keys.len(), "listed objects");
        Ok(keys)
    }

    fn presign_get(&self, key: &str, expires: Duration) -> Result<String> {
        let path = self.object_path(key);
        let host = self.host();
        let query = self.signer.presign_query(
            RequestParts {
                method: "GET",
                host: &host,
                path: &path,
                query: &[],
            },
            expires.as_secs(),
            Utc::now(),
        );
        Ok(self.url(&path, &query)?.to_string())
    }
}

/// Text of every `<tag>` element in `body`, entity-decoded
pub(crate) fn xml_values(body: &str, tag: &str) -> Vec<String> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let mut values = Vec::new();
    let mut rest = body;
    while let Some(start) = rest.find(&open) {
        let after = &rest[start + open.len()..];
        let Some(end) = after.find(&close) else {
            break;
        };
        values.push(xml_unescape(&after[..end]));
        rest = &after[end + close.len()..];
    }
    values
}

fn xml_unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIST_RESPONSE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<ListBucketResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <Name>state</Name>
  <Prefix>clusters/</Prefix>
  <KeyCount>2</KeyCount>
  <IsTruncated>true</IsTruncated>
  <NextContinuationToken>1ueGcxLPRx1Tr/XYExHnhbYLgveDs2J/wm36Hy4vbOwM=</NextContinuationToken>
  <Contents><Key>clusters/demo/kubeconfig.yaml</Key><Size>10</Size></Contents>
  <Contents><Key>clusters/a&amp;b/kubeconfig.yaml</Key><Size>10</Size></Contents>
</ListBucketResult>"#;

    #[test]
    fn list_results_are_scanned_for_keys() {
        assert_eq!(
            xml_values(LIST_RESPONSE, "Key"),
            vec!["clusters/demo/kubeconfig.yaml", "clusters/a&b/kubeconfig.yaml"]
        );
        assert_eq!(xml_values(LIST_RESPONSE, "IsTruncated"), vec!["true"]);
        assert_eq!(
            xml_values(LIST_RESPONSE, "NextContinuationToken"),
            vec!["1ueGcxLPRx1Tr/XYExHnhbYLgveDs2J/wm36Hy4vbOwM="]
        );
        assert!(xml_values("<Key>unterminated", "Key").is_empty());
    }

    #[test]
    fn presigned_urls_are_path_style() {
        let store = HttpObjectStore::new(
            "http://localhost:9000",
            "state",
            Signer::new("access", "secret", ""),
        )
        .unwrap();

        let url = store
            .presign_get("clusters/demo/files/tmp/x.yaml", Duration::from_secs(3600))
            .unwrap();

        assert!(url.starts_with("http://localhost:9000/state/clusters/demo/files/tmp/x.yaml?"));
        assert!(url.contains("X-Amz-Expires=3600"));
        assert!(url.contains("X-Amz-Signature="));
    }

    #[test]
    fn default_ports_are_not_part_of_the_host() {
        let store = HttpObjectStore::new(
            "https://s3.us-east-1.amazonaws.com/",
            "state",
            Signer::new("a", "b", ""),
        )
        .unwrap();
        assert_eq!(store.host(), "s3.us-east-1.amazonaws.com");
        assert_eq!(store.object_path(""), "/state");
    }

    #[test]
    fn endpoints_must_be_urls() {
        let err = HttpObjectStore::new("not a url", "b", Signer::new("a", "b", "")).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
