//! Self-signed certificate bundle for worker RPC
//!
//! First boot mints a CA plus two leaf certificates: one presented by the
//! gateway when it dials workers, one handed to workers for their server
//! side. Everything lands in the configured cert directory as PEM files.
//! An existing complete bundle is left alone, so identities survive
//! restarts.

use std::path::{Path, PathBuf};

use rcgen::{
    date_time_ymd, BasicConstraints, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa,
    KeyPair,
};

use tg_core::error::KeyMaterialError;

const CA_CERT: &str = "ca.pem";
const CA_KEY: &str = "ca-key.pem";
const API_CERT: &str = "api-client.pem";
const API_KEY: &str = "api-client-key.pem";
const WORKER_CERT: &str = "worker.pem";
const WORKER_KEY: &str = "worker-key.pem";

const ALL_FILES: [&str; 6] = [CA_CERT, CA_KEY, API_CERT, API_KEY, WORKER_CERT, WORKER_KEY];

/// Paths into a generated (or preexisting) bundle directory.
#[derive(Debug, Clone)]
pub struct CertificateBundle {
    dir: PathBuf,
}

impl CertificateBundle {
    pub fn ca_cert_path(&self) -> PathBuf {
        self.dir.join(CA_CERT)
    }

    pub fn api_client_cert_path(&self) -> PathBuf {
        self.dir.join(API_CERT)
    }

    pub fn api_client_key_path(&self) -> PathBuf {
        self.dir.join(API_KEY)
    }

    pub fn worker_cert_path(&self) -> PathBuf {
        self.dir.join(WORKER_CERT)
    }

    pub fn worker_key_path(&self) -> PathBuf {
        self.dir.join(WORKER_KEY)
    }
}

fn bundle_error(what: &str, e: impl std::fmt::Display) -> KeyMaterialError {
    KeyMaterialError::Bundle(format!("{what}: {e}"))
}

fn write_bundle_file(path: &Path, contents: &str, secret: bool) -> Result<(), KeyMaterialError> {
    // Stage next to the target so the rename stays on one filesystem.
    let tmp = path.with_extension("pem.tmp");
    std::fs::write(&tmp, contents).map_err(|e| KeyMaterialError::Io {
        path: tmp.clone(),
        source: e,
    })?;

    #[cfg(unix)]
    if secret {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600)).map_err(|e| {
            KeyMaterialError::Io {
                path: tmp.clone(),
                source: e,
            }
        })?;
    }
    #[cfg(not(unix))]
    let _ = secret;

    std::fs::rename(&tmp, path).map_err(|e| KeyMaterialError::Io {
        path: path.to_path_buf(),
        source: e,
    })
}

fn leaf_params(common_name: &str, purpose: ExtendedKeyUsagePurpose) -> Result<CertificateParams, KeyMaterialError> {
    let mut params = CertificateParams::new(vec![common_name.to_string()])
        .map_err(|e| bundle_error("leaf params", e))?;
    params
        .distinguished_name
        .push(DnType::CommonName, common_name);
    params.extended_key_usages.push(purpose);
    params.not_before = date_time_ymd(2024, 1, 1);
    params.not_after = date_time_ymd(2124, 1, 1);
    Ok(params)
}

/// Ensure a complete certificate bundle exists under `dir`, minting one
/// when any file is missing. Generation is all-or-nothing: files are
/// staged with a temporary suffix and renamed into place only after every
/// piece has been produced.
pub fn generate_certificate_bundle(dir: &Path) -> Result<CertificateBundle, KeyMaterialError> {
    let bundle = CertificateBundle {
        dir: dir.to_path_buf(),
    };

    if ALL_FILES.iter().all(|f| dir.join(f).exists()) {
        tracing::debug!(?dir, "certificate bundle already present");
        return Ok(bundle);
    }

    tracing::info!(?dir, "generating certificate bundle");
    std::fs::create_dir_all(dir).map_err(|e| KeyMaterialError::Io {
        path: dir.to_path_buf(),
        source: e,
    })?;

    let ca_key = KeyPair::generate().map_err(|e| bundle_error("ca keypair", e))?;
    let mut ca_params =
        CertificateParams::new(vec![]).map_err(|e| bundle_error("ca params", e))?;
    ca_params
        .distinguished_name
        .push(DnType::CommonName, "termgate-ca");
    ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    ca_params.not_before = date_time_ymd(2024, 1, 1);
    ca_params.not_after = date_time_ymd(2124, 1, 1);
    let ca_cert = ca_params
        .self_signed(&ca_key)
        .map_err(|e| bundle_error("ca cert", e))?;

    let api_key = KeyPair::generate().map_err(|e| bundle_error("api keypair", e))?;
    let api_cert = leaf_params("termgate-api", ExtendedKeyUsagePurpose::ClientAuth)?
        .signed_by(&api_key, &ca_cert, &ca_key)
        .map_err(|e| bundle_error("api cert", e))?;

    let worker_key = KeyPair::generate().map_err(|e| bundle_error("worker keypair", e))?;
    let worker_cert = leaf_params("termgate-worker", ExtendedKeyUsagePurpose::ServerAuth)?
        .signed_by(&worker_key, &ca_cert, &ca_key)
        .map_err(|e| bundle_error("worker cert", e))?;

    write_bundle_file(&dir.join(CA_CERT), &ca_cert.pem(), false)?;
    write_bundle_file(&dir.join(CA_KEY), &ca_key.serialize_pem(), true)?;
    write_bundle_file(&dir.join(API_CERT), &api_cert.pem(), false)?;
    write_bundle_file(&dir.join(API_KEY), &api_key.serialize_pem(), true)?;
    write_bundle_file(&dir.join(WORKER_CERT), &worker_cert.pem(), false)?;
    write_bundle_file(&dir.join(WORKER_KEY), &worker_key.serialize_pem(), true)?;

    Ok(bundle)
}
