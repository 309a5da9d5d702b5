//! Secret-shaped views of the trust material
//!
//! Cluster API looks the CAs up as `<cluster>-<suffix>` Secrets; writing them
//! before the control plane controller starts makes it adopt the generated
//! CAs instead of creating its own.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use serde::Serialize;

use super::Certificates;
use crate::kubeconfig::Kubeconfig;
use crate::{Error, Result};

/// Label Cluster API uses to associate Secrets with a Cluster
pub const CLUSTER_NAME_LABEL: &str = "cluster.x-k8s.io/cluster-name";

/// Secret type Cluster API creates for its own Secrets
pub const CAPI_SECRET_TYPE: &str = "cluster.x-k8s.io/secret";

fn capi_secret(name: String, cluster: &str, namespace: &str, data: BTreeMap<String, ByteString>) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: Some(namespace.to_string()),
            labels: Some(BTreeMap::from([(
                CLUSTER_NAME_LABEL.to_string(),
                cluster.to_string(),
            )])),
            ..Default::default()
        },
        type_: Some(CAPI_SECRET_TYPE.to_string()),
        data: Some(data),
        ..Default::default()
    }
}

#[derive(Serialize)]
struct SecretList<'a> {
    #[serde(rename = "apiVersion")]
    api_version: &'static str,
    kind: &'static str,
    items: &'a [Secret],
}

/// A `v1/List` of one Secret per CA plus the `<cluster>-token` Secret
pub fn cert_secrets(
    certs: &Certificates,
    cluster: &str,
    namespace: &str,
    token: &str,
) -> Result<String> {
    let mut items = Vec::with_capacity(certs.entries().len() + 1);
    for entry in certs.entries() {
        let material = entry.material().ok_or(Error::NoCertificates)?;
        items.push(capi_secret(
            format!("{cluster}-{}", entry.purpose.secret_suffix()),
            cluster,
            namespace,
            BTreeMap::from([
                ("tls.crt".to_string(), ByteString(material.cert_pem.clone().into_bytes())),
                ("tls.key".to_string(), ByteString(material.key_pem.clone().into_bytes())),
            ]),
        ));
    }
    items.push(capi_secret(
        format!("{cluster}-token"),
        cluster,
        namespace,
        BTreeMap::from([("value".to_string(), ByteString(token.as_bytes().to_vec()))]),
    ));

    let list = SecretList {
        api_version: "v1",
        kind: "List",
        items: &items,
    };
    Ok(serde_yaml::to_string(&list)?)
}

/// The `<cluster>-kubeconfig` Secret Cluster API serves the admin kubeconfig from
pub fn kubeconfig_secret(kubeconfig: &Kubeconfig, cluster: &str, namespace: &str) -> Result<String> {
    let secret = capi_secret(
        format!("{cluster}-kubeconfig"),
        cluster,
        namespace,
        BTreeMap::from([(
            "value".to_string(),
            ByteString(kubeconfig.without_extensions().to_yaml()?.into_bytes()),
        )]),
    );
    Ok(serde_yaml::to_string(&secret)?)
}
