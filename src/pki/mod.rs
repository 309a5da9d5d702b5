//! Trust bootstrap: certificate authorities for a cluster that does not exist yet
//!
//! The CA set is generated on the workstation before the bootstrap node is
//! created, so the admin kubeconfig can be handed out (and persisted) while
//! the node is still booting.
//!
//! # Invariants
//!
//! - Each entry is generated at most once per operation
//! - The admin kubeconfig, the on-disk cert files and the cert Secrets are
//!   all derived from the same entries

mod secrets;

use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::Datelike;
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, DnValue,
    ExtendedKeyUsagePurpose, IsCa, Issuer, KeyPair, KeyUsagePurpose,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cloudinit::types::InitFile;
use crate::kubeconfig::{
    ClusterConfig, ContextConfig, Kubeconfig, KubeconfigCluster, KubeconfigContext,
    KubeconfigUser, UserConfig,
};
use crate::{Error, Result};

pub use secrets::{cert_secrets, kubeconfig_secret, CAPI_SECRET_TYPE, CLUSTER_NAME_LABEL};

/// API server port behind the front-end
pub const API_SERVER_PORT: u16 = 6443;

/// Years a generated CA stays valid
const CA_VALIDITY_YEARS: i32 = 10;

/// Role of one entry in the certificate set
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Purpose {
    /// kubeadm cluster CA
    ClusterCa,
    /// kubeadm etcd CA
    EtcdCa,
    /// kubeadm front-proxy CA
    FrontProxyCa,
    /// kubeadm service account signing key (no certificate)
    ServiceAccount,
    /// k3s server CA
    ServerCa,
    /// k3s client CA
    ClientCa,
}

impl Purpose {
    /// Suffix of the `<cluster>-<suffix>` Secret Cluster API expects
    pub fn secret_suffix(self) -> &'static str {
        match self {
            Self::ClusterCa | Self::ServerCa => "ca",
            Self::EtcdCa => "etcd",
            Self::FrontProxyCa => "proxy",
            Self::ServiceAccount => "sa",
            Self::ClientCa => "cca",
        }
    }

    fn common_name(self) -> &'static str {
        match self {
            Self::ClusterCa => "kubernetes",
            Self::EtcdCa => "etcd-ca",
            Self::FrontProxyCa => "front-proxy-ca",
            Self::ServiceAccount => "service-accounts",
            Self::ServerCa => "k3s-server-ca",
            Self::ClientCa => "k3s-client-ca",
        }
    }

    fn is_key_pair_only(self) -> bool {
        matches!(self, Self::ServiceAccount)
    }

    /// Where the certificate (or public key) lives on the node
    pub fn cert_path(self) -> &'static str {
        match self {
            Self::ClusterCa => "/etc/kubernetes/pki/ca.crt",
            Self::EtcdCa => "/etc/kubernetes/pki/etcd/ca.crt",
            Self::FrontProxyCa => "/etc/kubernetes/pki/front-proxy-ca.crt",
            Self::ServiceAccount => "/etc/kubernetes/pki/sa.pub",
            Self::ServerCa => "/var/lib/rancher/k3s/server/tls/server-ca.crt",
            Self::ClientCa => "/var/lib/rancher/k3s/server/tls/client-ca.crt",
        }
    }

    /// Where the private key lives on the node
    pub fn key_path(self) -> &'static str {
        match self {
            Self::ClusterCa => "/etc/kubernetes/pki/ca.key",
            Self::EtcdCa => "/etc/kubernetes/pki/etcd/ca.key",
            Self::FrontProxyCa => "/etc/kubernetes/pki/front-proxy-ca.key",
            Self::ServiceAccount => "/etc/kubernetes/pki/sa.key",
            Self::ServerCa => "/var/lib/rancher/k3s/server/tls/server-ca.key",
            Self::ClientCa => "/var/lib/rancher/k3s/server/tls/client-ca.key",
        }
    }
}

/// `host:port`, bracketing IPv6 hosts
pub fn host_port(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

/// PEM encoded certificate (or public key) and private key
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct KeyMaterial {
    /// Certificate PEM; public key PEM for key-pair-only entries
    pub cert_pem: String,
    /// PKCS#8 private key PEM
    pub key_pem: String,
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("cert_pem", &self.cert_pem)
            .finish_non_exhaustive()
    }
}

/// One certificate set entry
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CertificateEntry {
    /// Role, which also fixes the on-node paths
    pub purpose: Purpose,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    material: Option<KeyMaterial>,
}

impl CertificateEntry {
    fn new(purpose: Purpose) -> Self {
        Self {
            purpose,
            material: None,
        }
    }

    /// Generated material, if any
    pub fn material(&self) -> Option<&KeyMaterial> {
        self.material.as_ref()
    }
}

/// Ordered certificate set for one control plane flavor.
///
/// Serializes as its entries, so generated material survives a persist and
/// restore of the owning provider.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Certificates {
    entries: Vec<CertificateEntry>,
}

impl Certificates {
    fn with_purposes(purposes: &[Purpose]) -> Self {
        Self {
            entries: purposes.iter().copied().map(CertificateEntry::new).collect(),
        }
    }

    /// CA set kubeadm expects under `/etc/kubernetes/pki`
    pub fn for_kubeadm() -> Self {
        Self::with_purposes(&[
            Purpose::ClusterCa,
            Purpose::EtcdCa,
            Purpose::FrontProxyCa,
            Purpose::ServiceAccount,
        ])
    }

    /// CA set k3s expects under its server tls directory
    pub fn for_k3s() -> Self {
        Self::with_purposes(&[Purpose::ServerCa, Purpose::ClientCa])
    }

    /// Generate every entry that has no material yet. Existing material is kept.
    pub fn generate(&mut self) -> Result<()> {
        for entry in self.entries.iter_mut().filter(|e| e.material.is_none()) {
            debug!(purpose = ?entry.purpose, "generating key material");
            entry.material = Some(if entry.purpose.is_key_pair_only() {
                generate_key_pair()?
            } else {
                generate_ca(entry.purpose.common_name())?
            });
        }
        Ok(())
    }

    /// True once every entry has material
    pub fn is_generated(&self) -> bool {
        self.entries.iter().all(|e| e.material.is_some())
    }

    /// Entries in order
    pub fn entries(&self) -> &[CertificateEntry] {
        &self.entries
    }

    /// Material for `purpose`
    pub fn get(&self, purpose: Purpose) -> Result<&KeyMaterial> {
        self.entries
            .iter()
            .find(|e| e.purpose == purpose)
            .and_then(|e| e.material.as_ref())
            .ok_or(Error::NoCertificates)
    }

    /// Cert and key files for on-disk installation
    pub fn files(&self) -> Result<Vec<InitFile>> {
        let mut files = Vec::with_capacity(self.entries.len() * 2);
        for entry in &self.entries {
            let material = entry.material.as_ref().ok_or(Error::NoCertificates)?;
            files.push(
                InitFile::new(entry.purpose.cert_path(), material.cert_pem.as_str())
                    .with_owner("root:root")
                    .with_permissions("0640"),
            );
            files.push(
                InitFile::new(entry.purpose.key_path(), material.key_pem.as_str())
                    .with_owner("root:root")
                    .with_permissions("0600"),
            );
        }
        Ok(files)
    }

    /// Admin kubeconfig for `https://<endpoint>:6443`, with IPv6 endpoints
    /// bracketed.
    ///
    /// `server_ca` is trusted for the API server; the client certificate is
    /// signed by `signer`.
    pub fn admin_kubeconfig(
        &self,
        cluster_name: &str,
        endpoint: &str,
        server_ca: Purpose,
        signer: Purpose,
    ) -> Result<Kubeconfig> {
        if endpoint.is_empty() {
            return Err(Error::config(
                "cluster endpoint must be known before generating a kubeconfig",
            ));
        }
        let server = self.get(server_ca)?;
        let signing = self.get(signer)?;
        let client = sign_admin_client(signing)?;

        let user_name = format!("{cluster_name}-admin");
        let context_name = format!("{user_name}@{cluster_name}");
        Ok(Kubeconfig {
            clusters: vec![KubeconfigCluster {
                name: cluster_name.to_string(),
                cluster: ClusterConfig {
                    server: format!("https://{}", host_port(endpoint, API_SERVER_PORT)),
                    certificate_authority_data: Some(STANDARD.encode(&server.cert_pem)),
                },
            }],
            users: vec![KubeconfigUser {
                name: user_name.clone(),
                user: UserConfig {
                    client_certificate_data: Some(STANDARD.encode(&client.cert_pem)),
                    client_key_data: Some(STANDARD.encode(&client.key_pem)),
                    token: None,
                },
            }],
            contexts: vec![KubeconfigContext {
                name: context_name.clone(),
                context: ContextConfig {
                    cluster: cluster_name.to_string(),
                    user: user_name,
                    namespace: None,
                },
            }],
            current_context: context_name,
            ..Kubeconfig::default()
        })
    }
}

fn set_validity(params: &mut CertificateParams) {
    let today = chrono::Utc::now().date_naive();
    let month = today.month() as u8;
    params.not_before = rcgen::date_time_ymd(today.year(), month, today.day() as u8);
    // day 28 exists in every month, so the expiry date is always valid
    params.not_after = rcgen::date_time_ymd(
        today.year() + CA_VALIDITY_YEARS,
        month,
        today.day().min(28) as u8,
    );
}

fn distinguished_name(common_name: &str, organization: Option<&str>) -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, DnValue::Utf8String(common_name.to_string()));
    if let Some(org) = organization {
        dn.push(DnType::OrganizationName, DnValue::Utf8String(org.to_string()));
    }
    dn
}

fn generate_ca(common_name: &str) -> Result<KeyMaterial> {
    let mut params = CertificateParams::default();
    params.distinguished_name = distinguished_name(common_name, None);
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];
    set_validity(&mut params);

    let key_pair = KeyPair::generate()
        .map_err(|e| Error::pki(format!("failed to generate {common_name} key: {e}")))?;
    let cert = params
        .self_signed(&key_pair)
        .map_err(|e| Error::pki(format!("failed to create {common_name} cert: {e}")))?;

    Ok(KeyMaterial {
        cert_pem: cert.pem(),
        key_pem: key_pair.serialize_pem(),
    })
}

fn generate_key_pair() -> Result<KeyMaterial> {
    let key_pair = KeyPair::generate()
        .map_err(|e| Error::pki(format!("failed to generate key pair: {e}")))?;
    Ok(KeyMaterial {
        cert_pem: key_pair.public_key_pem(),
        key_pem: key_pair.serialize_pem(),
    })
}

/// Sign a `kubernetes-admin` client certificate in `system:masters`
fn sign_admin_client(ca: &KeyMaterial) -> Result<KeyMaterial> {
    let ca_key = KeyPair::from_pem(&ca.key_pem)
        .map_err(|e| Error::pki(format!("failed to load CA key: {e}")))?;
    let issuer = Issuer::from_ca_cert_pem(&ca.cert_pem, &ca_key)
        .map_err(|e| Error::pki(format!("failed to create issuer: {e}")))?;

    let mut params = CertificateParams::default();
    params.distinguished_name = distinguished_name("kubernetes-admin", Some("system:masters"));
    params.is_ca = IsCa::NoCa;
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];
    params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];
    set_validity(&mut params);

    let client_key = KeyPair::generate()
        .map_err(|e| Error::pki(format!("failed to generate client key: {e}")))?;
    let cert = params
        .signed_by(&client_key, &issuer)
        .map_err(|e| Error::pki(format!("failed to sign client certificate: {e}")))?;

    Ok(KeyMaterial {
        cert_pem: cert.pem(),
        key_pem: client_key.serialize_pem(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use x509_parser::prelude::*;

    fn der(pem_text: &str) -> Vec<u8> {
        ::pem::parse(pem_text.as_bytes()).unwrap().contents().to_vec()
    }

    #[test]
    fn accessors_fail_before_generation() {
        let certs = Certificates::for_k3s();
        assert!(!certs.is_generated());
        assert!(matches!(certs.files(), Err(Error::NoCertificates)));
        assert!(matches!(certs.get(Purpose::ServerCa), Err(Error::NoCertificates)));
        assert!(certs
            .admin_kubeconfig("demo", "10.0.0.1", Purpose::ServerCa, Purpose::ClientCa)
            .unwrap_err()
            .is_no_certificates());
    }

    #[test]
    fn generation_is_idempotent() {
        let mut certs = Certificates::for_k3s();
        certs.generate().unwrap();
        let first = certs.get(Purpose::ServerCa).unwrap().clone();

        certs.generate().unwrap();

        assert_eq!(certs.get(Purpose::ServerCa).unwrap(), &first);
    }

    #[test]
    fn kubeadm_set_has_key_pair_only_service_account() {
        let mut certs = Certificates::for_kubeadm();
        certs.generate().unwrap();

        let sa = certs.get(Purpose::ServiceAccount).unwrap();
        assert!(sa.cert_pem.contains("BEGIN PUBLIC KEY"));
        assert!(sa.key_pem.contains("PRIVATE KEY"));

        let ca = certs.get(Purpose::ClusterCa).unwrap();
        assert!(ca.cert_pem.contains("BEGIN CERTIFICATE"));
    }

    #[test]
    fn files_use_restrictive_permissions() {
        let mut certs = Certificates::for_kubeadm();
        certs.generate().unwrap();
        let files = certs.files().unwrap();

        assert_eq!(files.len(), 8);
        let ca_key = files
            .iter()
            .find(|f| f.path == "/etc/kubernetes/pki/ca.key")
            .unwrap();
        assert_eq!(ca_key.permissions, "0600");
        assert_eq!(ca_key.owner, "root:root");
        let ca_cert = files
            .iter()
            .find(|f| f.path == "/etc/kubernetes/pki/ca.crt")
            .unwrap();
        assert_eq!(ca_cert.permissions, "0640");
    }

    /// Story: the kubeconfig is usable against the cluster the node will become
    ///
    /// It trusts the server CA that is written to the node, and its client
    /// certificate chains to the client CA k3s installs.
    #[test]
    fn story_admin_kubeconfig_chains_to_generated_cas() {
        let mut certs = Certificates::for_k3s();
        certs.generate().unwrap();

        let config = certs
            .admin_kubeconfig("demo", "172.232.0.10", Purpose::ServerCa, Purpose::ClientCa)
            .unwrap();

        assert_eq!(config.server(), Some("https://172.232.0.10:6443"));
        assert_eq!(config.current_context, "demo-admin@demo");

        let ca_data = config.clusters[0].cluster.certificate_authority_data.as_ref().unwrap();
        let trusted = String::from_utf8(STANDARD.decode(ca_data).unwrap()).unwrap();
        assert_eq!(trusted, certs.get(Purpose::ServerCa).unwrap().cert_pem);

        let client_data = config.users[0].user.client_certificate_data.as_ref().unwrap();
        let client_pem = String::from_utf8(STANDARD.decode(client_data).unwrap()).unwrap();
        let client_der = der(&client_pem);
        let (_, client) = X509Certificate::from_der(&client_der).unwrap();

        let ca_der = der(&certs.get(Purpose::ClientCa).unwrap().cert_pem);
        let (_, ca) = X509Certificate::from_der(&ca_der).unwrap();

        assert!(client.verify_signature(Some(ca.public_key())).is_ok());
        assert_eq!(client.issuer(), ca.subject());
        let subject = client.subject().to_string();
        assert!(subject.contains("CN=kubernetes-admin"));
        assert!(subject.contains("O=system:masters"));
    }

    #[test]
    fn ipv6_endpoint_is_bracketed_in_server_url() {
        let mut certs = Certificates::for_k3s();
        certs.generate().unwrap();

        let config = certs
            .admin_kubeconfig("demo", "2001:db8::1", Purpose::ServerCa, Purpose::ClientCa)
            .unwrap();

        assert_eq!(config.server(), Some("https://[2001:db8::1]:6443"));
        assert_eq!(host_port("172.232.0.10", API_SERVER_PORT), "172.232.0.10:6443");
    }

    #[test]
    fn generated_material_survives_serialization() {
        let mut certs = Certificates::for_kubeadm();
        certs.generate().unwrap();

        let raw = serde_json::to_value(&certs).unwrap();
        assert_eq!(raw[0]["Purpose"], "ClusterCa");
        assert!(raw[3]["Material"]["KeyPem"].as_str().unwrap().contains("PRIVATE KEY"));

        let restored: Certificates = serde_json::from_value(raw).unwrap();
        assert_eq!(restored, certs);
        assert_eq!(
            restored.files().unwrap()[0].path,
            "/etc/kubernetes/pki/ca.crt"
        );
    }

    #[test]
    fn ungenerated_set_serializes_without_material() {
        let raw = serde_json::to_value(Certificates::for_k3s()).unwrap();
        assert_eq!(raw, serde_json::json!([{"Purpose": "ServerCa"}, {"Purpose": "ClientCa"}]));
    }

    #[test]
    fn kubeconfig_requires_endpoint() {
        let mut certs = Certificates::for_kubeadm();
        certs.generate().unwrap();
        let err = certs
            .admin_kubeconfig("demo", "", Purpose::ClusterCa, Purpose::ClusterCa)
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn ca_is_valid_for_ten_years() {
        let mut certs = Certificates::for_kubeadm();
        certs.generate().unwrap();
        let ca_der = der(&certs.get(Purpose::ClusterCa).unwrap().cert_pem);
        let (_, ca) = X509Certificate::from_der(&ca_der).unwrap();

        let lifetime = ca.validity().not_after.timestamp() - ca.validity().not_before.timestamp();
        let nine_years = 9 * 365 * 24 * 3600;
        assert!(lifetime > nine_years);
        assert!(ca.is_ca());
    }
}
