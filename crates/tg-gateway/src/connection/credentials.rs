//! Credential reference resolution
//!
//! Connection records never carry secrets, only a reference in the form
//! `env:NAME` or `file:/path`. Resolution happens at dial time.

use tg_core::error::ConnectionError;

/// Resolve a credential reference into the secret it points at.
pub fn resolve_credential(reference: &str) -> Result<String, ConnectionError> {
    if reference.is_empty() {
        return Err(ConnectionError::AuthenticationFailed(
            "connection has no credential reference".to_string(),
        ));
    }

    if let Some(name) = reference.strip_prefix("env:") {
        return std::env::var(name).map_err(|_| {
            ConnectionError::AuthenticationFailed(format!(
                "credential variable {name} is not set"
            ))
        });
    }

    if let Some(path) = reference.strip_prefix("file:") {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ConnectionError::AuthenticationFailed(format!("credential file {path}: {e}"))
        })?;
        return Ok(contents.trim_end_matches(['\r', '\n']).to_string());
    }

    Err(ConnectionError::AuthenticationFailed(format!(
        "unknown credential scheme in reference: {reference}"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_env_reference() {
        std::env::set_var("TG_TEST_CREDENTIAL", "hunter2");
        assert_eq!(resolve_credential("env:TG_TEST_CREDENTIAL").unwrap(), "hunter2");
    }

    #[test]
    fn test_missing_env_reference() {
        let err = resolve_credential("env:TG_TEST_DOES_NOT_EXIST").unwrap_err();
        assert!(matches!(err, ConnectionError::AuthenticationFailed(_)));
    }

    #[test]
    fn test_file_reference_trims_trailing_newline() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "s3cret").unwrap();

        let reference = format!("file:{}", file.path().display());
        assert_eq!(resolve_credential(&reference).unwrap(), "s3cret");
    }

    #[test]
    fn test_empty_and_unknown_schemes_rejected() {
        assert!(resolve_credential("").is_err());
        assert!(resolve_credential("vault:secret/ssh").is_err());
    }
}
