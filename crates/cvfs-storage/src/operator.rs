//! OpenDAL Operator factory for cvfs storage backends

use anyhow::{Context, Result};
use opendal::Operator;

use cvfs_core::config::{StorageBackend, StorageConfig};

/// S3 credentials, read by the caller from the environment
#[derive(Debug, Clone)]
pub struct S3Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

/// Build an OpenDAL Operator for an S3-compatible endpoint.
///
/// Uses path-style addressing (default in opendal 0.55), which is required by
/// SeaweedFS and MinIO.
pub fn build_operator(cfg: &StorageConfig, creds: &S3Credentials) -> Result<Operator> {
    let builder = opendal::services::S3::default()
        .endpoint(&cfg.endpoint)
        .region(&cfg.region)
        .bucket(&cfg.bucket)
        .access_key_id(&creds.access_key_id)
        .secret_access_key(&creds.secret_access_key);

    let op = Operator::new(builder)
        .context("creating OpenDAL S3 operator")?
        .layer(opendal::layers::LoggingLayer::default())
        .finish();

    Ok(op)
}

/// Build an operator rooted in a local directory.
pub fn build_fs_operator(root: &str) -> Result<Operator> {
    let builder = opendal::services::Fs::default().root(root);
    let op = Operator::new(builder)
        .with_context(|| format!("creating OpenDAL fs operator at {root}"))?
        .layer(opendal::layers::LoggingLayer::default())
        .finish();
    Ok(op)
}

/// In-process operator; contents vanish with the process.
pub fn memory_operator() -> Result<Operator> {
    let op = Operator::new(opendal::services::Memory::default())
        .context("creating OpenDAL memory operator")?
        .finish();
    Ok(op)
}

/// Build an operator from cvfs-core config.
///
/// For S3, `creds` is required. If `enforce_tls` is true and the endpoint uses
/// HTTP, this returns an error; otherwise a warning is logged.
///
/// No retry layer is installed: chunk-level retries belong to the transfer
/// engine, which needs to tell transient failures from integrity failures.
pub fn build_from_core_config(
    storage: &StorageConfig,
    creds: Option<&S3Credentials>,
) -> Result<Operator> {
    match storage.backend {
        StorageBackend::Memory => memory_operator(),
        StorageBackend::Fs => {
            let root = expand_tilde(&storage.root.to_string_lossy());
            build_fs_operator(&root)
        }
        StorageBackend::S3 => {
            if storage.endpoint.starts_with("http://") {
                if storage.enforce_tls {
                    anyhow::bail!(
                        "S3 endpoint uses plaintext HTTP ({}), but enforce_tls is enabled. \
                         Use an HTTPS endpoint or set storage.enforce_tls = false for local development.",
                        storage.endpoint
                    );
                }
                tracing::warn!(
                    endpoint = %storage.endpoint,
                    "S3 endpoint uses plaintext HTTP, credentials are transmitted unencrypted"
                );
            }
            let creds = creds.context("S3 backend selected but no credentials were provided")?;
            build_operator(storage, creds)
        }
    }
}

/// Expand a leading `~/` to the user's home directory
fn expand_tilde(path: &str) -> String {
    match path.strip_prefix("~/") {
        Some(rest) => {
            let home = std::env::var("HOME").unwrap_or_default();
            format!("{home}/{rest}")
        }
        None => path.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds() -> S3Credentials {
        S3Credentials {
            access_key_id: "test-key".to_string(),
            secret_access_key: "test-secret".to_string(),
        }
    }

    #[test]
    fn test_build_operator_valid() {
        let cfg = StorageConfig {
            backend: StorageBackend::S3,
            bucket: "test-bucket".to_string(),
            ..Default::default()
        };
        assert!(build_operator(&cfg, &creds()).is_ok());
    }

    #[test]
    fn test_s3_http_enforce_tls() {
        let storage = StorageConfig {
            backend: StorageBackend::S3,
            endpoint: "http://insecure:8333".into(),
            enforce_tls: true,
            ..Default::default()
        };
        let result = build_from_core_config(&storage, Some(&creds()));
        assert!(result.is_err(), "HTTP + enforce_tls must fail");
        assert!(result.unwrap_err().to_string().contains("enforce_tls"));
    }

    #[test]
    fn test_s3_requires_credentials() {
        let storage = StorageConfig {
            backend: StorageBackend::S3,
            endpoint: "https://s3.example.com".into(),
            ..Default::default()
        };
        assert!(build_from_core_config(&storage, None).is_err());
        assert!(build_from_core_config(&storage, Some(&creds())).is_ok());
    }

    #[test]
    fn test_memory_backend() {
        assert!(memory_operator().is_ok());
        let storage = StorageConfig {
            backend: StorageBackend::Memory,
            ..Default::default()
        };
        assert!(build_from_core_config(&storage, None).is_ok());
    }

    #[test]
    fn test_fs_backend() {
        let dir = tempfile::tempdir().unwrap();
        let storage = StorageConfig {
            backend: StorageBackend::Fs,
            root: dir.path().to_path_buf(),
            ..Default::default()
        };
        assert!(build_from_core_config(&storage, None).is_ok());
    }

    #[test]
    fn test_expand_tilde() {
        std::env::set_var("HOME", "/home/tester");
        assert_eq!(expand_tilde("~/store"), "/home/tester/store");
        assert_eq!(expand_tilde("/abs/store"), "/abs/store");
    }
}
