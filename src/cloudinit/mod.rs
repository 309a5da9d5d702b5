//! Payload assembler: everything the bootstrap node needs on first boot
//!
//! Collects files from the embedded assets, the rendered manifest and both
//! providers, orders the commands, optionally bundles the files into one
//! archive and lets the backend offload whatever does not fit the ceiling.

pub mod archive;
pub mod helm;
pub mod types;

use tracing::{debug, info};

use crate::assets::{CAPI_OPERATOR, CERT_MANAGER};
use crate::error::ArtifactExt;
use crate::manifest::{Manifests, TemplateContext, TemplateEngine};
use crate::provider::controlplane::INIT_SCRIPT_PATH;
use crate::provider::Providers;
use crate::values::Values;
use crate::Result;
use types::{join_path, CloudConfig, ParsedManifest};

/// File name of the rendered manifest in the bootstrap manifest directory
pub const CAPI_MANIFESTS_FILE: &str = "capi-manifests.yaml";

/// Operator conveniences installed on every bootstrap node
const DEBUG_COMMANDS: [&str; 2] = [
    "curl -s -L https://github.com/derailed/k9s/releases/download/v0.32.4/k9s_Linux_amd64.tar.gz | tar -xvz -C /usr/local/bin k9s",
    r#"echo "alias k=\"kubectl\"" >> /root/.bashrc"#,
];

/// Assemble the first-boot payload.
///
/// `values` must already hold the endpoint and trust material produced by the
/// providers' `pre_deploy`. `values.manifests` is replaced by the rendered
/// documents.
pub async fn generate_cloud_init(values: &mut Values, providers: &Providers) -> Result<Vec<u8>> {
    let ctx = TemplateContext::from_values(values).artifact("template context")?;
    let dir = values.bootstrap_manifest_dir.clone();
    let cert_manager = CERT_MANAGER
        .render(join_path(&dir, CERT_MANAGER.name), &ctx)
        .artifact(CERT_MANAGER.name)?;
    let capi_operator = CAPI_OPERATOR
        .render(join_path(&dir, CAPI_OPERATOR.name), &ctx)
        .artifact(CAPI_OPERATOR.name)?;
    let manifests = generate_capi_manifests(values, providers).artifact(CAPI_MANIFESTS_FILE)?;

    let values: &Values = values;
    let infra = &providers.infrastructure;
    let infra_additional = infra
        .generate_additional_files(values)
        .artifact("infrastructure files")?;
    let infra_capi = infra
        .generate_capi_file(values)
        .artifact("infrastructure capi manifest")?;
    let pivot_machine = infra
        .generate_capi_machine(values)
        .artifact("pivot machine manifest")?;

    let cp = &providers.control_plane;
    let cp_capi = cp
        .generate_capi_file(values)
        .artifact("control plane capi manifest")?;
    let cp_additional = cp
        .generate_additional_files(values)
        .artifact("control plane files")?;
    let init_script = cp
        .generate_init_script(values, INIT_SCRIPT_PATH)
        .artifact("init script")?;
    let run_commands = cp
        .generate_run_command(values)
        .artifact("control plane run command")?;
    let cert_files = cp.cert_files().artifact("control plane cert files")?;
    let cert_secret = cp
        .cert_secret(values)
        .artifact("control plane cert secret")?;
    let kubeconfig_secret = cp
        .kubeconfig_secret(values)
        .artifact("kubeconfig secret")?;

    let mut runcmd = manifests.pre_run_cmd;
    runcmd.extend(run_commands);
    runcmd.extend(DEBUG_COMMANDS.iter().map(|c| c.to_string()));
    runcmd.push(format!("bash {INIT_SCRIPT_PATH}"));
    runcmd.extend(manifests.post_run_cmd);

    let mut write_files = vec![cert_manager, capi_operator, cp_capi, infra_capi, pivot_machine];
    write_files.extend(manifests.manifest_file);
    write_files.extend([cert_secret, kubeconfig_secret, init_script]);
    write_files.extend(infra_additional);
    write_files.extend(cp_additional);
    write_files.extend(cert_files);
    write_files.extend(manifests.additional_files);

    let mut config = CloudConfig {
        write_files,
        runcmd,
    };
    if values.tar_write_files {
        let bundle = archive::archive_files(&config.write_files).artifact("file archive")?;
        debug!(files = config.write_files.len(), "bundled payload files");
        config.write_files = vec![bundle];
        config.prepend_commands(archive::extraction_commands());
    }

    let retrieval = providers
        .backend
        .write_files(&values.cluster_name, &mut config, values.payload_ceiling)
        .await
        .artifact("offloaded files")?;
    config.prepend_commands(retrieval);

    let payload = config.to_payload().artifact("cloud-config")?;
    info!(
        cluster = %values.cluster_name,
        files = config.write_files.len(),
        commands = config.runcmd.len(),
        size = payload.len(),
        "assembled bootstrap payload"
    );
    Ok(payload)
}

/// Let both providers edit the manifests, add Helm add-ons and render the
/// result (placeholders escaped) into `<manifest dir>/capi-manifests.yaml`.
///
/// The returned [`ParsedManifest`] merges the hook commands and extra files of
/// both providers; `values.manifests` holds the rendered documents afterwards.
pub fn generate_capi_manifests(values: &mut Values, providers: &Providers) -> Result<ParsedManifest> {
    let mut manifests = values.manifests.clone();
    manifests.normalize()?;

    let mut parsed = providers.control_plane.update_manifests(&manifests, values)?;
    let infra = providers
        .infrastructure
        .update_manifests(&mut manifests, values)?;
    parsed.additional_files.extend(infra.additional_files);
    parsed.pre_run_cmd.extend(infra.pre_run_cmd);
    parsed.post_run_cmd.extend(infra.post_run_cmd);
    parsed
        .additional_files
        .extend(helm::helm_files(&manifests, values)?);

    let name = if values.manifest_file.is_empty() {
        CAPI_MANIFESTS_FILE
    } else {
        values.manifest_file.as_str()
    };
    let ctx = TemplateContext::from_values(values)?;
    let rendered = TemplateEngine::local()?.render(name, &manifests.join(), &ctx, true)?;

    values.manifests = Manifests::split(&rendered);
    parsed.manifest_file = Some(types::InitFile::in_dir(
        &values.bootstrap_manifest_dir,
        CAPI_MANIFESTS_FILE,
        rendered,
    ));
    Ok(parsed)
}
