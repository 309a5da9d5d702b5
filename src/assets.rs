//! Templates compiled into the binary
//!
//! Rendered with the local engine only; any `{{ ... }}` they contain is left
//! for cloud-init to resolve on the node.

use crate::cloudinit::types::InitFile;
use crate::manifest::{TemplateContext, TemplateEngine};
use crate::Result;

/// A named embedded template
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Asset {
    /// File name, also used in render errors
    pub name: &'static str,
    source: &'static str,
}

macro_rules! asset {
    ($ident:ident, $file:literal) => {
        #[doc = concat!("`templates/", $file, "`")]
        pub const $ident: Asset = Asset {
            name: $file,
            source: include_str!(concat!("../templates/", $file)),
        };
    };
}

asset!(CERT_MANAGER, "cert-manager.yaml");
asset!(CAPI_OPERATOR, "capi-operator.yaml");
asset!(CAPI_LINODE, "capi-linode.yaml");
asset!(CAPI_PIVOT_MACHINE, "capi-pivot-machine.yaml");
asset!(LINODE_CCM, "linode-ccm.yaml");
asset!(LINODE_CCM_VPC, "linode-ccm-vpc.yaml");
asset!(CAPI_KUBEADM, "capi-kubeadm.yaml");
asset!(CAPI_K3S, "capi-k3s.yaml");
asset!(ETCD_PROXY, "etcd-proxy.yaml");
asset!(KUBEADM_INIT_SCRIPT, "kubeadm-init-cluster.sh");
asset!(K3S_INIT_SCRIPT, "k3s-init-cluster.sh");

impl Asset {
    /// Raw template text
    pub fn source(&self) -> &'static str {
        self.source
    }

    /// Render against `ctx` into a file at `path`
    pub fn render(&self, path: impl Into<String>, ctx: &TemplateContext) -> Result<InitFile> {
        let content = TemplateEngine::local()?.render(self.name, self.source, ctx, false)?;
        Ok(InitFile::new(path, content))
    }
}
