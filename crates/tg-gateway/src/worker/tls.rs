//! mTLS client configuration for worker RPC
//!
//! The gateway trusts exactly one CA, the one minted by the certificate
//! bundle, and always presents its api-client certificate. Connections
//! without mutual authentication cannot be built from this module.

use std::path::Path;
use std::sync::Arc;

use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::{ClientConfig, RootCertStore};

use tg_core::error::KeyMaterialError;

use crate::trust::CertificateBundle;

fn read_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, KeyMaterialError> {
    let data = std::fs::read(path).map_err(|e| KeyMaterialError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;

    let certs: Vec<_> = rustls_pemfile::certs(&mut data.as_slice())
        .collect::<Result<_, _>>()
        .map_err(|e| KeyMaterialError::Parse(format!("{}: {e}", path.display())))?;

    if certs.is_empty() {
        return Err(KeyMaterialError::Parse(format!(
            "{}: no certificates found",
            path.display()
        )));
    }
    Ok(certs)
}

fn read_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, KeyMaterialError> {
    let data = std::fs::read(path).map_err(|e| KeyMaterialError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;

    rustls_pemfile::private_key(&mut data.as_slice())
        .map_err(|e| KeyMaterialError::Parse(format!("{}: {e}", path.display())))?
        .ok_or_else(|| {
            KeyMaterialError::Parse(format!("{}: no private key found", path.display()))
        })
}

/// Build the TLS client configuration from a certificate bundle.
pub fn client_tls_config(bundle: &CertificateBundle) -> Result<Arc<ClientConfig>, KeyMaterialError> {
    let mut roots = RootCertStore::empty();
    for cert in read_certs(&bundle.ca_cert_path())? {
        roots
            .add(cert)
            .map_err(|e| KeyMaterialError::Parse(format!("ca cert rejected: {e}")))?;
    }

    let chain = read_certs(&bundle.api_client_cert_path())?;
    let key = read_private_key(&bundle.api_client_key_path())?;

    let config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_client_auth_cert(chain, key)
        .map_err(|e| KeyMaterialError::Parse(format!("client identity rejected: {e}")))?;

    Ok(Arc::new(config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trust::generate_certificate_bundle;

    #[test]
    fn test_config_builds_from_fresh_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = generate_certificate_bundle(dir.path()).unwrap();
        client_tls_config(&bundle).unwrap();
    }

    #[test]
    fn test_missing_bundle_files_fail_closed() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = generate_certificate_bundle(dir.path()).unwrap();
        std::fs::remove_file(bundle.api_client_key_path()).unwrap();

        let err = client_tls_config(&bundle).unwrap_err();
        assert!(matches!(err, KeyMaterialError::Io { .. }));
    }

    #[test]
    fn test_garbage_key_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = generate_certificate_bundle(dir.path()).unwrap();
        std::fs::write(bundle.api_client_key_path(), "not a key").unwrap();

        let err = client_tls_config(&bundle).unwrap_err();
        assert!(matches!(err, KeyMaterialError::Parse(_)));
    }
}
