//! First-boot payload model: files to write and commands to run

use serde::{Deserialize, Serialize};

use crate::Result;

/// Header every payload starts with; the first line enables cloud-init's
/// jinja pass over the document.
pub const CLOUD_CONFIG_HEADER: &str = "## template: jinja\n#cloud-config\n\n";

/// One file to materialize on the bootstrap node
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitFile {
    /// Absolute destination path
    pub path: String,
    /// File content; emptied when a backend offloads the file
    #[serde(default)]
    pub content: String,
    /// `user:group` owner
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub owner: String,
    /// Octal permission string, e.g. `0640`
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub permissions: String,
    /// Content encoding understood by cloud-init (`b64` for the archive)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub encoding: String,
}

impl InitFile {
    /// A file with default ownership and permissions
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
            ..Self::default()
        }
    }

    /// A file named `name` inside directory `dir`
    pub fn in_dir(dir: &str, name: &str, content: impl Into<String>) -> Self {
        Self::new(join_path(dir, name), content)
    }

    /// Set the octal permission string
    pub fn with_permissions(mut self, permissions: impl Into<String>) -> Self {
        self.permissions = permissions.into();
        self
    }

    /// Set the owner
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = owner.into();
        self
    }

    /// Whether the content is base64 and must be decoded rather than re-queried
    pub fn is_base64(&self) -> bool {
        self.encoding == "b64" || self.encoding == "base64"
    }

    /// Size counted against the payload ceiling
    pub fn embedded_size(&self) -> usize {
        self.content.len()
    }
}

/// `dir` and `name` joined by exactly one slash
pub fn join_path(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        return name.to_string();
    }
    format!(
        "{}/{}",
        dir.trim_end_matches('/'),
        name.trim_start_matches('/')
    )
}

/// The cloud-config document handed to the compute instance
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudConfig {
    /// Files written before any command runs
    #[serde(default)]
    pub write_files: Vec<InitFile>,
    /// Commands executed strictly in order
    #[serde(default)]
    pub runcmd: Vec<String>,
}

impl CloudConfig {
    /// Put commands ahead of everything already queued, keeping their order
    pub fn prepend_commands(&mut self, commands: Vec<String>) {
        if commands.is_empty() {
            return;
        }
        let rest = std::mem::take(&mut self.runcmd);
        self.runcmd = commands;
        self.runcmd.extend(rest);
    }

    /// Combined size of all embedded file contents
    pub fn embedded_size(&self) -> usize {
        self.write_files.iter().map(InitFile::embedded_size).sum()
    }

    /// Render the final payload with its jinja header
    pub fn to_payload(&self) -> Result<Vec<u8>> {
        let body = serde_yaml::to_string(self)?;
        let mut payload = String::with_capacity(CLOUD_CONFIG_HEADER.len() + body.len());
        payload.push_str(CLOUD_CONFIG_HEADER);
        payload.push_str(&body);
        Ok(payload.into_bytes())
    }
}

/// Files and hook commands one provider extracted from the manifest set
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParsedManifest {
    /// Primary manifest file, when the provider produces one
    pub manifest_file: Option<InitFile>,
    /// Extra files declared inside the resource spec
    pub additional_files: Vec<InitFile>,
    /// Commands to run before the pipeline defaults
    pub pre_run_cmd: Vec<String>,
    /// Commands to run after the init script
    pub post_run_cmd: Vec<String>,
}
