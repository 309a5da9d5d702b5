//! Manifest engine: render, split and edit multi-document YAML
//!
//! A rendered manifest is kept as its raw documents. Typed lookups decode a
//! single document on demand and [`Manifests::replace_at`] writes one back, so
//! documents no provider understands pass through byte for byte.

pub mod escape;
pub mod resources;
pub mod template;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Error, Result};
use resources::{Cluster, CLUSTER_API_VERSION};

pub use escape::{escape, unescape};
pub use template::{TemplateContext, TemplateEngine};

/// Name the Cluster's control plane reference is pointed at until the
/// bootstrap node's init script restores the real one.
pub const PLACEHOLDER_CONTROL_PLANE: &str = "fake-control-plane";

/// Document separator line
const SEPARATOR: &str = "---";

/// Ordered YAML documents of one manifest
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Manifests {
    documents: Vec<String>,
}

/// Just enough of a document to decide whether to fully decode it
#[derive(Deserialize)]
struct TypeHeader {
    #[serde(rename = "apiVersion", default)]
    api_version: String,
    #[serde(default)]
    kind: String,
}

impl Manifests {
    /// Split on lines consisting of exactly `---`. Empty documents are kept.
    pub fn split(text: &str) -> Self {
        let mut documents = Vec::new();
        let mut current = String::new();
        for line in text.split_inclusive('\n') {
            if line.trim_end_matches(['\n', '\r']) == SEPARATOR {
                documents.push(std::mem::take(&mut current));
            } else {
                current.push_str(line);
            }
        }
        documents.push(current);
        Self { documents }
    }

    /// Re-join the documents with `---` lines
    pub fn join(&self) -> String {
        self.documents.join("---\n")
    }

    /// Raw documents in order
    pub fn documents(&self) -> &[String] {
        &self.documents
    }

    /// Number of documents, empty ones included
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    /// True when there are no documents at all
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// First document of `kind` (and `api_version`, when given), decoded as `T`.
    ///
    /// Documents whose header does not decode are skipped. A matching
    /// document that fails to decode as `T` is an error.
    pub fn find_by_kind<T: DeserializeOwned>(
        &self,
        api_version: Option<&str>,
        kind: &str,
    ) -> Result<Option<(usize, T)>> {
        for (index, doc) in self.documents.iter().enumerate() {
            if matches_kind(doc, api_version, kind) {
                let value = serde_yaml::from_str(doc)?;
                return Ok(Some((index, value)));
            }
        }
        Ok(None)
    }

    /// Like [`Manifests::find_by_kind`] but fails when nothing matches
    pub fn require_kind<T: DeserializeOwned>(
        &self,
        api_version: Option<&str>,
        kind: &str,
    ) -> Result<(usize, T)> {
        self.find_by_kind(api_version, kind)?
            .ok_or_else(|| Error::resource_not_found(kind))
    }

    /// Every document of `kind`, decoded as `T`
    pub fn find_all_by_kind<T: DeserializeOwned>(&self, kind: &str) -> Result<Vec<(usize, T)>> {
        self.documents
            .iter()
            .enumerate()
            .filter(|(_, doc)| matches_kind(doc, None, kind))
            .map(|(index, doc)| Ok((index, serde_yaml::from_str(doc)?)))
            .collect()
    }

    /// Re-serialize `value` into slot `index`; other slots are untouched
    pub fn replace_at<T: Serialize>(&mut self, index: usize, value: &T) -> Result<()> {
        let encoded = serde_yaml::to_string(value)?;
        let slot = self.documents.get_mut(index).ok_or_else(|| {
            Error::config(format!("manifest document index {index} out of range"))
        })?;
        *slot = encoded;
        Ok(())
    }

    /// The core `Cluster` document
    pub fn cluster(&self) -> Result<(usize, Cluster)> {
        self.require_kind(Some(CLUSTER_API_VERSION), "Cluster")
    }

    /// Point the Cluster's control plane reference at the placeholder name.
    ///
    /// Only the Cluster document changes.
    pub fn normalize(&mut self) -> Result<()> {
        let (index, mut cluster) = self.cluster()?;
        let name = cluster.name().to_string();
        let reference = cluster
            .spec
            .control_plane_ref
            .as_mut()
            .ok_or_else(|| Error::config(format!("cluster {name} has no controlPlaneRef")))?;
        if reference.name == PLACEHOLDER_CONTROL_PLANE {
            return Ok(());
        }
        debug!(
            cluster = %name,
            control_plane = %reference.name,
            "normalizing control plane reference"
        );
        reference.name = PLACEHOLDER_CONTROL_PLANE.to_string();
        self.replace_at(index, &cluster)
    }
}

fn matches_kind(doc: &str, api_version: Option<&str>, kind: &str) -> bool {
    match serde_yaml::from_str::<TypeHeader>(doc) {
        Ok(header) => {
            header.kind == kind && api_version.map_or(true, |v| header.api_version == v)
        }
        Err(_) => false,
    }
}
