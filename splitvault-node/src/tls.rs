//! Certificate bootstrap for the node's HTTPS listener.
//!
//! The node acts as its own CA and the panel pins `ca.pem`. Only the CA
//! certificate is kept; its key is dropped once the leaf is signed, so a new
//! leaf means a new CA and the operator has to re-add the node on the panel.

use crate::error::{NodeError, Result};
use axum_server::tls_rustls::RustlsConfig;
use rcgen::{
    BasicConstraints, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair,
    KeyUsagePurpose,
};
use std::path::Path;

const CA_CERT_FILE: &str = "ca.pem";
const NODE_CERT_FILE: &str = "node.pem";
const NODE_KEY_FILE: &str = "node.key";

#[derive(Debug, Clone)]
pub struct TlsMaterial {
    pub ca_pem: String,
    pub cert_pem: String,
    pub key_pem: String,
    /// True when the files did not exist and were created by this call.
    pub generated: bool,
}

pub fn load_or_generate(keys_dir: &Path, common_name: &str) -> Result<TlsMaterial> {
    let ca_path = keys_dir.join(CA_CERT_FILE);
    let cert_path = keys_dir.join(NODE_CERT_FILE);
    let key_path = keys_dir.join(NODE_KEY_FILE);

    if ca_path.exists() && cert_path.exists() && key_path.exists() {
        return Ok(TlsMaterial {
            ca_pem: std::fs::read_to_string(&ca_path)?,
            cert_pem: std::fs::read_to_string(&cert_path)?,
            key_pem: std::fs::read_to_string(&key_path)?,
            generated: false,
        });
    }

    std::fs::create_dir_all(keys_dir)?;
    let material = generate(common_name)?;
    std::fs::write(&ca_path, &material.ca_pem)?;
    std::fs::write(&cert_path, &material.cert_pem)?;
    std::fs::write(&key_path, &material.key_pem)?;

    tracing::info!(
        "Generated node certificates: common_name={} dir={:?}",
        common_name,
        keys_dir
    );
    Ok(material)
}

/// Listener config for `material`, served with the ring provider.
pub async fn rustls_config(material: &TlsMaterial) -> Result<RustlsConfig> {
    // fails when a provider is already installed, which is fine
    let _ = rustls::crypto::ring::default_provider().install_default();

    RustlsConfig::from_pem(
        material.cert_pem.clone().into_bytes(),
        material.key_pem.clone().into_bytes(),
    )
    .await
    .map_err(|e| NodeError::Certificate(e.to_string()))
}

fn generate(common_name: &str) -> Result<TlsMaterial> {
    let ca_key = KeyPair::generate()?;
    let mut ca_params = CertificateParams::new(Vec::<String>::new())?;
    ca_params
        .distinguished_name
        .push(DnType::CommonName, format!("splitvault node CA {}", common_name));
    ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    ca_params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
        KeyUsagePurpose::DigitalSignature,
    ];
    let ca_cert = ca_params.self_signed(&ca_key)?;

    // a common name that parses as an IP becomes an IP SAN
    let node_key = KeyPair::generate()?;
    let mut node_params = CertificateParams::new(vec![common_name.to_string()])?;
    node_params
        .distinguished_name
        .push(DnType::CommonName, common_name);
    node_params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
    let node_cert = node_params.signed_by(&node_key, &ca_cert, &ca_key)?;

    Ok(TlsMaterial {
        ca_pem: ca_cert.pem(),
        cert_pem: node_cert.pem(),
        key_pem: node_key.serialize_pem(),
        generated: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn certificates_are_generated_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        let keys = dir.path().join("keys");

        let first = load_or_generate(&keys, "127.0.0.1").expect("generate");
        assert!(first.generated);
        assert!(first.ca_pem.contains("-----BEGIN CERTIFICATE-----"));
        assert!(first.key_pem.contains("PRIVATE KEY"));
        assert_ne!(first.ca_pem, first.cert_pem);

        let second = load_or_generate(&keys, "127.0.0.1").expect("load");
        assert!(!second.generated);
        assert_eq!(first.ca_pem, second.ca_pem);
        assert_eq!(first.key_pem, second.key_pem);
    }

    #[tokio::test]
    async fn generated_material_builds_a_listener_config() {
        let dir = tempfile::tempdir().expect("tempdir");
        let material = load_or_generate(dir.path(), "127.0.0.1").expect("generate");

        rustls_config(&material).await.expect("first config");
        rustls_config(&material).await.expect("provider already installed");
    }

    #[tokio::test]
    async fn garbage_key_is_a_certificate_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut material = load_or_generate(dir.path(), "127.0.0.1").expect("generate");
        material.key_pem = "not a key".to_string();

        assert!(matches!(
            rustls_config(&material).await,
            Err(NodeError::Certificate(_))
        ));
    }
}
