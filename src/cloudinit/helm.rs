//! HelmChartProxy add-ons installed on the bootstrap node
//!
//! Each proxy becomes a values file plus one `helm upgrade --install` line in
//! an install script. The control plane init script runs that script once
//! the API server answers.

use serde_json::Value;
use tracing::debug;

use super::types::{join_path, InitFile};
use crate::manifest::resources::{HelmChartProxy, CLUSTER_API_VERSION};
use crate::manifest::{Manifests, TemplateContext, TemplateEngine};
use crate::values::Values;
use crate::Result;

/// Directory of rendered values files
pub const HELM_VALUES_DIR: &str = "/var/lib/kubeadm/helm";

/// Install script path, run by the init script when present
pub const HELM_INSTALL_SCRIPT: &str = "/tmp/helm-install.sh";

const INSTALL_HELM: &str =
    "curl https://raw.githubusercontent.com/helm/helm/main/scripts/get-helm-3 | bash";

/// Values files and install script for every HelmChartProxy in `manifests`.
/// Empty when there are none.
pub fn helm_files(manifests: &Manifests, values: &Values) -> Result<Vec<InitFile>> {
    let proxies: Vec<(usize, HelmChartProxy)> = manifests.find_all_by_kind("HelmChartProxy")?;
    if proxies.is_empty() {
        return Ok(Vec::new());
    }

    let (_, cluster) = manifests.require_kind::<Value>(Some(CLUSTER_API_VERSION), "Cluster")?;
    let infra_cluster = manifests
        .find_by_kind::<Value>(None, &values.cluster_kind)?
        .map(|(_, doc)| doc)
        .unwrap_or(Value::Null);
    let ctx = TemplateContext::default()
        .with("Cluster", cluster)?
        .with("InfraCluster", infra_cluster)?;
    let engine = TemplateEngine::helm_values()?;

    let mut files = Vec::with_capacity(proxies.len() + 1);
    let mut script = vec![
        "#!/bin/bash".to_string(),
        "set -e".to_string(),
        INSTALL_HELM.to_string(),
    ];
    for (_, proxy) in &proxies {
        let name = proxy.name();
        let values_path = join_path(HELM_VALUES_DIR, &format!("{name}-values.yaml"));
        let rendered = engine.render(name, &proxy.spec.values_template, &ctx, false)?;
        debug!(proxy = %name, chart = %proxy.spec.chart_name, "adding helm chart");

        script.push(install_command(proxy, &values_path));
        files.push(InitFile::new(values_path, rendered));
    }
    script.push(String::new());

    files.push(InitFile::new(HELM_INSTALL_SCRIPT, script.join("\n")).with_permissions("0755"));
    Ok(files)
}

/// `helm upgrade --install` for one proxy
fn install_command(proxy: &HelmChartProxy, values_path: &str) -> String {
    let spec = &proxy.spec;
    let release = if spec.release_name.is_empty() {
        &spec.chart_name
    } else {
        &spec.release_name
    };

    let mut command = format!(
        "helm upgrade --install {release} {} --repo {}",
        spec.chart_name, spec.repo_url
    );
    if !spec.namespace.is_empty() {
        command.push_str(&format!(" -n {}", spec.namespace));
    }
    if !spec.version.is_empty() {
        command.push_str(&format!(" --version {}", spec.version));
    }
    command.push_str(&format!(" -f {values_path}"));

    if let Some(options) = &spec.options {
        if options.wait {
            command.push_str(" --wait");
        }
        if !options.timeout.is_empty() {
            command.push_str(&format!(" --timeout {}", options.timeout));
        }
        if options.install.as_ref().is_some_and(|i| i.create_namespace) {
            command.push_str(" --create-namespace");
        }
    }
    command
}
