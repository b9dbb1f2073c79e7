use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

/// Top-level configuration (loaded from cvfs.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CvfsConfig {
    pub daemon: DaemonConfig,
    pub storage: StorageConfig,
    pub transfer: TransferConfig,
    pub namespace: NamespaceConfig,
    pub crypto: CryptoConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Log level (default: info)
    pub log_level: String,
    /// Log format: "json" or "text"
    pub log_format: String,
}

/// Which OpenDAL service backs the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Fs,
    S3,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Root directory for the `fs` backend
    pub root: PathBuf,
    /// S3 endpoint
    pub endpoint: String,
    /// S3 region (default: us-east-1); also reported in storage locators
    pub region: String,
    /// Bucket name; also reported in storage locators
    pub bucket: String,
    /// Refuse plaintext HTTP endpoints
    pub enforce_tls: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Concurrent chunk uploads across all files (default: 16)
    pub upload_concurrency: usize,
    /// Concurrent chunk fetches across all files (default: 32)
    pub download_concurrency: usize,
    /// Attempts per chunk operation, first try included (default: 3)
    pub max_attempts: u32,
    /// Fixed delay between attempts in milliseconds (default: 1000)
    pub retry_delay_ms: u64,
    /// Timeout of a single network operation in seconds (default: 60)
    pub operation_timeout_secs: u64,
}

impl TransferConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NamespaceConfig {
    /// Identifier of the root directory (default: the backend's root record)
    pub root_id: Option<Uuid>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// File holding the 32-byte metadata key as 64 hex chars
    pub metadata_key_file: Option<PathBuf>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
            log_format: "text".into(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Fs,
            root: PathBuf::from("~/.local/share/cvfs/store"),
            endpoint: "http://localhost:8333".into(),
            region: "us-east-1".into(),
            bucket: "cvfs".into(),
            enforce_tls: false,
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            upload_concurrency: 16,
            download_concurrency: 32,
            max_attempts: 3,
            retry_delay_ms: 1000,
            operation_timeout_secs: 60,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
[daemon]
log_level = "debug"
log_format = "json"

[storage]
backend = "s3"
endpoint = "https://s3.example.com:8333"
region = "eu-central-1"
bucket = "vault"
enforce_tls = true

[transfer]
upload_concurrency = 4
download_concurrency = 8
max_attempts = 5
retry_delay_ms = 250
operation_timeout_secs = 30

[namespace]
root_id = "6f1c2a8e-3d4b-4c5a-9e7f-0a1b2c3d4e5f"

[crypto]
metadata_key_file = "/etc/cvfs/metadata.key"
"#;
        let config: CvfsConfig = toml::from_str(toml_str).unwrap();

        assert_eq!(config.daemon.log_level, "debug");
        assert_eq!(config.storage.backend, StorageBackend::S3);
        assert_eq!(config.storage.bucket, "vault");
        assert!(config.storage.enforce_tls);
        assert_eq!(config.transfer.upload_concurrency, 4);
        assert_eq!(config.transfer.retry_delay(), Duration::from_millis(250));
        assert_eq!(config.transfer.operation_timeout(), Duration::from_secs(30));
        assert_eq!(
            config.namespace.root_id.unwrap().to_string(),
            "6f1c2a8e-3d4b-4c5a-9e7f-0a1b2c3d4e5f"
        );
        assert_eq!(
            config.crypto.metadata_key_file,
            Some(PathBuf::from("/etc/cvfs/metadata.key"))
        );
    }

    #[test]
    fn test_parse_defaults() {
        let config: CvfsConfig = toml::from_str("").unwrap();

        assert_eq!(config.daemon.log_level, "info");
        assert_eq!(config.daemon.log_format, "text");
        assert_eq!(config.storage.backend, StorageBackend::Fs);
        assert_eq!(config.storage.region, "us-east-1");
        assert_eq!(config.transfer.upload_concurrency, 16);
        assert_eq!(config.transfer.download_concurrency, 32);
        assert_eq!(config.transfer.max_attempts, 3);
        assert!(config.namespace.root_id.is_none());
        assert!(config.crypto.metadata_key_file.is_none());
    }

    #[test]
    fn test_parse_partial_config() {
        let toml_str = r#"
[transfer]
download_concurrency = 2
"#;
        let config: CvfsConfig = toml::from_str(toml_str).unwrap();

        // Overridden
        assert_eq!(config.transfer.download_concurrency, 2);
        // Defaults
        assert_eq!(config.transfer.upload_concurrency, 16);
        assert_eq!(config.storage.bucket, "cvfs");
    }

    #[test]
    fn test_serialize_roundtrip() {
        let config = CvfsConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: CvfsConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.storage.root, parsed.storage.root);
        assert_eq!(config.storage.backend, parsed.storage.backend);
        assert_eq!(
            config.transfer.operation_timeout_secs,
            parsed.transfer.operation_timeout_secs
        );
    }
}
