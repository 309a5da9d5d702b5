//! Profile configuration stored at `$XDG_CONFIG_HOME/cluster-api/bootstrap.yaml`.
//!
//! The file names default providers per axis, optional named profiles that
//! override those defaults, and per-axis tables of environment variables
//! keyed by provider name:
//!
//! ```yaml
//! defaults:
//!   backend: s3
//!   infrastructure: linode-prod
//! profiles:
//!   dev:
//!     backend: github
//! backend:
//!   s3:
//!     AWS_BUCKET_NAME: clusters
//! infrastructure:
//!   linode-prod:
//!     LINODE_TOKEN: ...
//! ```
//!
//! Selection for each axis (highest priority first):
//! 1. Explicit CLI flag
//! 2. The `--profile` entry, when it exists
//! 3. `defaults`
//!
//! The selected tables are exported into the process environment before any
//! provider reads its credentials.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{Error, Result};

/// Placeholder for the config home in user-supplied paths
pub const XDG_CONFIG_HOME: &str = "$XDG_CONFIG_HOME";

/// Default `--config` value, before expansion
pub const DEFAULT_CONFIG_PATH: &str = "$XDG_CONFIG_HOME/cluster-api/bootstrap.yaml";

/// Environment variables to export, by variable name
pub type Env = BTreeMap<String, String>;

/// Provider names chosen per axis
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Defaults {
    /// Backend name
    pub backend: String,
    /// Cluster API operator settings name
    pub capi: String,
    /// Control plane settings name
    pub control_plane: String,
    /// Infrastructure settings name
    pub infrastructure: String,
}

/// Contents of the profile configuration file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConfigFile {
    /// Selection used when no profile applies
    pub defaults: Defaults,
    /// Named selections chosen with `--profile`
    pub profiles: BTreeMap<String, Defaults>,
    /// Backend environments
    pub backend: BTreeMap<String, Env>,
    /// Cluster API environments
    pub capi: BTreeMap<String, Env>,
    /// Control plane environments
    pub control_plane: BTreeMap<String, Env>,
    /// Infrastructure environments
    pub infrastructure: BTreeMap<String, Env>,
}

/// Outcome of resolving flags against the file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resolved {
    /// Backend name to construct; empty means the default backend
    pub backend: String,
    /// Variables to export, in axis order
    pub env: Vec<(String, String)>,
}

/// `$XDG_CONFIG_HOME`, or the platform config directory when unset
pub fn config_home() -> PathBuf {
    std::env::var_os("XDG_CONFIG_HOME")
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .or_else(dirs::config_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Replace the `$XDG_CONFIG_HOME` placeholder in `raw`
pub fn expand_path(raw: &str) -> PathBuf {
    match raw.strip_prefix(XDG_CONFIG_HOME) {
        Some(rest) => config_home().join(rest.trim_start_matches('/')),
        None => PathBuf::from(raw),
    }
}

impl ConfigFile {
    /// Load the file at `path`, returning an empty config if missing
    pub fn load(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "looking for config file");
        if !path.exists() {
            debug!(path = %path.display(), "config file not found");
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::parse(&data)
            .map_err(|e| Error::config(format!("failed to parse {}: {}", path.display(), e)))
    }

    /// Parse YAML text; an empty document is an empty config
    pub fn parse(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(text)?)
    }

    /// The selection that applies for `profile`. An unknown profile falls
    /// back to `defaults`.
    pub fn selection(&self, profile: Option<&str>) -> &Defaults {
        match profile.filter(|p| !p.is_empty()) {
            Some(name) => match self.profiles.get(name) {
                Some(selected) => {
                    debug!(profile = name, "configuration profile found");
                    selected
                }
                None => {
                    warn!(profile = name, "profile not found, using defaults");
                    &self.defaults
                }
            },
            None => &self.defaults,
        }
    }

    /// Resolve the backend name and the environment to export.
    ///
    /// Axes are expanded in order backend, capi, controlPlane,
    /// infrastructure; a later axis overrides a variable set by an earlier
    /// one.
    pub fn resolve(&self, profile: Option<&str>, backend_flag: Option<&str>) -> Resolved {
        let selection = self.selection(profile);
        let backend_flag = backend_flag.filter(|b| !b.is_empty());

        let mut env = Vec::new();
        for (flag, default, table) in [
            (backend_flag, selection.backend.as_str(), &self.backend),
            (None, selection.capi.as_str(), &self.capi),
            (None, selection.control_plane.as_str(), &self.control_plane),
            (None, selection.infrastructure.as_str(), &self.infrastructure),
        ] {
            let name = flag.unwrap_or(default);
            if let Some(vars) = table.get(name) {
                debug!(name, "expanding environment");
                env.extend(vars.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
        }

        Resolved {
            backend: backend_flag.unwrap_or(selection.backend.as_str()).to_string(),
            env,
        }
    }
}

impl Resolved {
    /// Export every variable into the process environment
    pub fn export(&self) {
        self.export_with(|key, value| std::env::set_var(key, value));
    }

    /// Hand every variable to `set`
    pub fn export_with(&self, mut set: impl FnMut(&str, &str)) {
        for (key, value) in &self.env {
            debug!(key = %key, "exporting configured variable");
            set(key, value);
        }
    }
}

/// Load `raw_path` and resolve it against the global flags
pub fn load(raw_path: &str, profile: Option<&str>, backend_flag: Option<&str>) -> Result<Resolved> {
    let file = ConfigFile::load(&expand_path(raw_path))?;
    Ok(file.resolve(profile, backend_flag))
}
