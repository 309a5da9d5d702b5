//! Control plane providers: the Kubernetes distribution on the bootstrap node
//! and the trust material it starts with

pub mod k3s;
pub mod kubeadm;

#[cfg(test)]
use mockall::automock;
use serde::Serialize;

use crate::assets::Asset;
use crate::cloudinit::types::{join_path, InitFile, ParsedManifest};
use crate::manifest::resources::BootstrapFile;
use crate::manifest::{unescape, Manifests, TemplateContext};
use crate::pki::{self, Certificates};
use crate::values::Values;
use crate::{Error, Result};

/// Where the init script lands on the node
pub const INIT_SCRIPT_PATH: &str = "/tmp/init-cluster.sh";

/// Installs and initializes one control plane flavor
#[cfg_attr(test, automock)]
pub trait ControlPlaneProvider: Send + Sync {
    /// Discriminator, equal to the control plane kind
    fn name(&self) -> &'static str;

    /// Read the control plane resource, generate trust material and the
    /// admin kubeconfig. Needs `values.cluster_endpoint`.
    fn pre_deploy(&mut self, values: &mut Values) -> Result<()>;

    /// Provider controller manifests
    fn generate_capi_file(&self, values: &Values) -> Result<InitFile>;

    /// Distribution config files
    fn generate_additional_files(&self, values: &Values) -> Result<Vec<InitFile>>;

    /// Script that finishes the pivot once the API server answers
    fn generate_init_script(&self, values: &Values, path: &str) -> Result<InitFile>;

    /// Commands that install and start the distribution
    fn generate_run_command(&self, values: &Values) -> Result<Vec<String>>;

    /// Files and hook commands declared in the control plane resource.
    /// Commands come back unescaped; the manifests are not modified.
    fn update_manifests(&self, manifests: &Manifests, values: &Values) -> Result<ParsedManifest>;

    /// `v1/List` of CA Secrets plus the token Secret
    fn cert_secret(&self, values: &Values) -> Result<InitFile>;

    /// CA cert and key files at the paths the distribution reads them from
    fn cert_files(&self) -> Result<Vec<InitFile>>;

    /// The `<cluster>-kubeconfig` Secret
    fn kubeconfig_secret(&self, values: &Values) -> Result<InitFile>;

    /// Serialize for the state store; the object carries a `Name` key
    fn persist(&self) -> Result<serde_json::Value>;
}

/// Files declared in a bootstrap config spec, as payload files
pub(crate) fn spec_files(files: &[BootstrapFile]) -> Vec<InitFile> {
    files
        .iter()
        .map(|f| InitFile {
            path: f.path.clone(),
            content: f.content.clone(),
            owner: f.owner.clone(),
            permissions: f.permissions.clone(),
            encoding: f.encoding.clone(),
        })
        .collect()
}

/// Hook commands with their placeholders made live again
pub(crate) fn unescape_commands(commands: &[String]) -> Vec<String> {
    commands.iter().map(|c| unescape(c)).collect()
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct ControlPlaneRef<'a> {
    name: &'a str,
}

/// Render an init script with `ControlPlane.Name` in scope
pub(crate) fn render_init_script(
    asset: Asset,
    values: &Values,
    control_plane_name: &str,
    path: &str,
) -> Result<InitFile> {
    let ctx = TemplateContext::from_values(values)?.with(
        "ControlPlane",
        ControlPlaneRef {
            name: control_plane_name,
        },
    )?;
    Ok(asset.render(path, &ctx)?.with_permissions("0755"))
}

/// Secret list file, or [`Error::NoCertificates`] before generation
pub(crate) fn cert_secret_file(certs: &Certificates, values: &Values) -> Result<InitFile> {
    if !certs.is_generated() {
        return Err(Error::NoCertificates);
    }
    let content = pki::cert_secrets(
        certs,
        &values.cluster_name,
        &values.namespace,
        &values.bootstrap_token,
    )?;
    Ok(InitFile::in_dir(
        &values.bootstrap_manifest_dir,
        "cp-secrets.yaml",
        content,
    ))
}

/// Kubeconfig Secret file, or [`Error::NoCertificates`] before generation
pub(crate) fn kubeconfig_secret_file(certs: &Certificates, values: &Values) -> Result<InitFile> {
    let kubeconfig = match &values.kubeconfig {
        Some(kubeconfig) if certs.is_generated() => kubeconfig,
        _ => return Err(Error::NoCertificates),
    };
    let content = pki::kubeconfig_secret(kubeconfig, &values.cluster_name, &values.namespace)?;
    Ok(InitFile::in_dir(
        &values.bootstrap_manifest_dir,
        "kubeconfig-secret.yaml",
        content,
    ))
}

/// Cert files, or [`Error::NoCertificates`] before generation
pub(crate) fn cert_files(certs: &Certificates) -> Result<Vec<InitFile>> {
    if !certs.is_generated() {
        return Err(Error::NoCertificates);
    }
    certs.files()
}

/// The manifest directory path for `name` under `values`
pub(crate) fn manifest_path(values: &Values, name: &str) -> String {
    join_path(&values.bootstrap_manifest_dir, name)
}
