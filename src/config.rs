//! Configuration for snapshot stores.
//!
//! # Example
//!
//! ```
//! use snapstore::{Provider, SecondaryConfig, StoreConfig};
//!
//! // Minimal config (local store, defaults for everything else)
//! let config = StoreConfig::default();
//! assert_eq!(config.prefix, "v2");
//! assert!(!config.has_secondary_endpoint());
//!
//! // Dual-endpoint config
//! let config = StoreConfig {
//!     provider: Provider::S3,
//!     container: "etcd-backups".into(),
//!     secondary: Some(SecondaryConfig {
//!         provider: Provider::Gcs,
//!         container: "etcd-backups-dr".into(),
//!         ..Default::default()
//!     }),
//!     ..Default::default()
//! };
//! let secondary = config.secondary_config().unwrap();
//! assert!(secondary.is_secondary);
//! assert_eq!(secondary.prefix, "v2");
//! ```

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::storage::traits::StorageError;

/// Container fallback variable for normal stores.
pub const ENV_STORAGE_CONTAINER: &str = "STORAGE_CONTAINER";
/// Container fallback variable for source stores (copy/migration).
pub const ENV_SOURCE_STORAGE_CONTAINER: &str = "SOURCE_STORAGE_CONTAINER";
/// Container fallback variable for the secondary endpoint.
pub const ENV_SECONDARY_STORAGE_CONTAINER: &str = "SECONDARY_STORAGE_CONTAINER";

/// Role prefixes for credential variables.
pub const SOURCE_ENV_PREFIX: &str = "SOURCE_";
pub const SECONDARY_ENV_PREFIX: &str = "SECONDARY_";

/// Default key prefix (backup layout version).
pub const DEFAULT_PREFIX: &str = "v2";
/// Default container for local stores, relative to the home directory.
pub const DEFAULT_LOCAL_CONTAINER: &str = "default.bkp";

/// Closed set of storage providers.
///
/// Deserializes through [`FromStr`], so names are case-insensitive and an
/// empty string means [`Provider::Local`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(try_from = "String")]
pub enum Provider {
    #[default]
    Local,
    S3,
    Abs,
    Gcs,
    Swift,
    Oss,
    /// Dell ECS, S3-compatible
    Ecs,
    /// OpenShift Container Storage, S3-compatible
    Ocs,
    /// In-process store for tests and dry runs
    Memory,
    /// Fault-injection store that fails every operation
    FakeFailed,
}

impl Provider {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "Local",
            Self::S3 => "S3",
            Self::Abs => "ABS",
            Self::Gcs => "GCS",
            Self::Swift => "Swift",
            Self::Oss => "OSS",
            Self::Ecs => "ECS",
            Self::Ocs => "OCS",
            Self::Memory => "Memory",
            Self::FakeFailed => "FAILED",
        }
    }

    /// Providers that live on a remote service and need a container name.
    #[must_use]
    pub fn is_remote(&self) -> bool {
        !matches!(self, Self::Local | Self::Memory | Self::FakeFailed)
    }

    /// Providers whose client errors carry enough detail to be worth
    /// reshaping through the resilient wrapper.
    #[must_use]
    pub fn has_rich_errors(&self) -> bool {
        matches!(self, Self::S3)
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "" | "local" => Ok(Self::Local),
            "s3" => Ok(Self::S3),
            "abs" => Ok(Self::Abs),
            "gcs" => Ok(Self::Gcs),
            "swift" => Ok(Self::Swift),
            "oss" => Ok(Self::Oss),
            "ecs" => Ok(Self::Ecs),
            "ocs" => Ok(Self::Ocs),
            "memory" => Ok(Self::Memory),
            "failed" => Ok(Self::FakeFailed),
            _ => Err(StorageError::UnsupportedProvider(s.to_string())),
        }
    }
}

impl TryFrom<String> for Provider {
    type Error = StorageError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Already-resolved credential material for one endpoint.
///
/// Field meaning per provider:
/// - S3/ECS/OCS/OSS: `access_key_id` + `secret_access_key`
/// - ABS: `access_key_id` is the account name, `secret_access_key` the account key
/// - GCS: `credential_file` points at a service account JSON
/// - Swift: `secret_access_key` is the auth token
#[derive(Clone, Default, Deserialize, PartialEq, Eq)]
pub struct Credentials {
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub access_key_id: Option<String>,
    #[serde(default)]
    pub secret_access_key: Option<String>,
    #[serde(default)]
    pub credential_file: Option<PathBuf>,
}

impl Credentials {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Read credential variables, preferring `<role_prefix><NAME>` and
    /// falling back to the unprefixed `<NAME>`.
    ///
    /// Recognised names: `STORAGE_ENDPOINT`, `STORAGE_REGION`,
    /// `STORAGE_ACCESS_KEY_ID`, `STORAGE_SECRET_ACCESS_KEY`,
    /// `STORAGE_CREDENTIAL_FILE`.
    pub fn from_lookup<F>(role_prefix: &str, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(&format!("{role_prefix}{name}"))
                .filter(|v| !v.is_empty())
                .or_else(|| lookup(name).filter(|v| !v.is_empty()))
        };
        Self {
            endpoint: get("STORAGE_ENDPOINT"),
            region: get("STORAGE_REGION"),
            access_key_id: get("STORAGE_ACCESS_KEY_ID"),
            secret_access_key: get("STORAGE_SECRET_ACCESS_KEY"),
            credential_file: get("STORAGE_CREDENTIAL_FILE").map(PathBuf::from),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &self.secret_access_key.as_ref().map(|_| "<redacted>"))
            .field("credential_file", &self.credential_file)
            .finish()
    }
}

/// Secondary endpoint block. Unset optional fields inherit the primary's values.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SecondaryConfig {
    #[serde(default)]
    pub provider: Provider,
    #[serde(default)]
    pub container: String,
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub max_parallel_chunks: Option<usize>,
    #[serde(default)]
    pub min_chunk_size: Option<u64>,
    #[serde(default)]
    pub credentials: Option<Credentials>,
}

/// Configuration for one snapshot store (and optionally its secondary).
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub provider: Provider,

    /// Bucket/container name (or directory for local stores)
    #[serde(default)]
    pub container: String,

    /// Key prefix inside the container (default: "v2")
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Directory used to stage snapshots before chunked upload
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,

    /// Chunk upload settings
    #[serde(default = "default_max_parallel_chunks")]
    pub max_parallel_chunks: usize,
    #[serde(default = "default_min_chunk_size")]
    pub min_chunk_size: u64,
    #[serde(default = "default_max_chunk_attempts")]
    pub max_chunk_attempts: u32,
    /// Backoff time unit: retry n waits 2^n units
    #[serde(default = "default_chunk_backoff_ms")]
    pub chunk_backoff_ms: u64,

    /// Consecutive transient primary failures before failing over permanently
    #[serde(default = "default_failover_threshold")]
    pub failover_threshold: u32,

    /// Upper bound for the resilient wrapper's health check
    #[serde(default = "default_health_check_timeout_secs")]
    pub health_check_timeout_secs: u64,

    /// Store is the source of a copy operation
    #[serde(default)]
    pub is_source: bool,

    /// Store is the secondary endpoint of a dual store
    #[serde(default)]
    pub is_secondary: bool,

    #[serde(default)]
    pub credentials: Credentials,

    /// Secondary endpoint; present iff dual operation is requested
    #[serde(default)]
    pub secondary: Option<SecondaryConfig>,
}

fn default_prefix() -> String { DEFAULT_PREFIX.to_string() }
fn default_temp_dir() -> PathBuf { std::env::temp_dir() }
fn default_max_parallel_chunks() -> usize { 5 }
fn default_min_chunk_size() -> u64 { 5 * 1024 * 1024 } // 5 MiB
fn default_max_chunk_attempts() -> u32 { 5 }
fn default_chunk_backoff_ms() -> u64 { 1000 }
fn default_failover_threshold() -> u32 { 3 }
fn default_health_check_timeout_secs() -> u64 { 10 }

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            provider: Provider::default(),
            container: String::new(),
            prefix: default_prefix(),
            temp_dir: default_temp_dir(),
            max_parallel_chunks: default_max_parallel_chunks(),
            min_chunk_size: default_min_chunk_size(),
            max_chunk_attempts: default_max_chunk_attempts(),
            chunk_backoff_ms: default_chunk_backoff_ms(),
            failover_threshold: default_failover_threshold(),
            health_check_timeout_secs: default_health_check_timeout_secs(),
            is_source: false,
            is_secondary: false,
            credentials: Credentials::default(),
            secondary: None,
        }
    }
}

impl StoreConfig {
    #[must_use]
    pub fn has_secondary_endpoint(&self) -> bool {
        self.secondary.is_some()
    }

    #[must_use]
    pub fn chunk_backoff_unit(&self) -> Duration {
        Duration::from_millis(self.chunk_backoff_ms)
    }

    #[must_use]
    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_secs(self.health_check_timeout_secs)
    }

    /// Full configuration for the secondary endpoint, if one is declared.
    ///
    /// Prefix, chunk parameters and credentials fall back to the primary's
    /// when the secondary block leaves them unset.
    #[must_use]
    pub fn secondary_config(&self) -> Option<StoreConfig> {
        let secondary = self.secondary.as_ref()?;
        Some(StoreConfig {
            provider: secondary.provider,
            container: secondary.container.clone(),
            prefix: secondary
                .prefix
                .clone()
                .filter(|p| !p.is_empty())
                .unwrap_or_else(|| self.prefix.clone()),
            temp_dir: self.temp_dir.clone(),
            max_parallel_chunks: secondary.max_parallel_chunks.unwrap_or(self.max_parallel_chunks),
            min_chunk_size: secondary.min_chunk_size.unwrap_or(self.min_chunk_size),
            max_chunk_attempts: self.max_chunk_attempts,
            chunk_backoff_ms: self.chunk_backoff_ms,
            failover_threshold: self.failover_threshold,
            health_check_timeout_secs: self.health_check_timeout_secs,
            is_source: false,
            is_secondary: true,
            credentials: secondary
                .credentials
                .clone()
                .filter(|c| !c.is_empty())
                .unwrap_or_else(|| self.credentials.clone()),
            secondary: None,
        })
    }

    /// Name of the variable consulted when no container is configured.
    #[must_use]
    pub fn container_env_var(&self) -> &'static str {
        if self.is_source {
            ENV_SOURCE_STORAGE_CONTAINER
        } else if self.is_secondary {
            ENV_SECONDARY_STORAGE_CONTAINER
        } else {
            ENV_STORAGE_CONTAINER
        }
    }

    /// Prefix selecting this store's credential variables.
    #[must_use]
    pub fn credential_env_prefix(&self) -> &'static str {
        if self.is_source {
            SOURCE_ENV_PREFIX
        } else if self.is_secondary {
            SECONDARY_ENV_PREFIX
        } else {
            ""
        }
    }

    /// Fill an empty container (and empty credentials) from the
    /// role-specific fallback variables.
    pub fn apply_env_fallbacks<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if self.container.is_empty() {
            if let Some(container) = lookup(self.container_env_var()).filter(|c| !c.is_empty()) {
                self.container = container;
            }
        }
        if self.prefix.is_empty() {
            self.prefix = default_prefix();
        }
        if self.credentials.is_empty() {
            self.credentials = Credentials::from_lookup(self.credential_env_prefix(), &lookup);
        }
    }

    /// Reject configurations no backend can work with.
    pub fn validate(&self) -> Result<(), StorageError> {
        if self.max_parallel_chunks == 0 {
            return Err(StorageError::Config(
                "max_parallel_chunks must be at least 1".into(),
            ));
        }
        if self.min_chunk_size == 0 {
            return Err(StorageError::Config("min_chunk_size must be positive".into()));
        }
        if self.max_chunk_attempts == 0 {
            return Err(StorageError::Config(
                "max_chunk_attempts must be at least 1".into(),
            ));
        }
        if self.provider.is_remote() && self.container.is_empty() {
            return Err(StorageError::Config(
                "storage container name not specified".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StoreConfig::default();
        assert_eq!(config.provider, Provider::Local);
        assert_eq!(config.prefix, "v2");
        assert_eq!(config.max_parallel_chunks, 5);
        assert_eq!(config.min_chunk_size, 5 * 1024 * 1024);
        assert_eq!(config.max_chunk_attempts, 5);
        assert_eq!(config.failover_threshold, 3);
        assert_eq!(config.health_check_timeout(), Duration::from_secs(10));
        assert!(config.secondary_config().is_none());
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let config: StoreConfig = serde_json::from_str(
            r#"{
                "provider": "S3",
                "container": "backups",
                "secondary": { "provider": "ABS", "container": "dr" }
            }"#,
        )
        .unwrap();

        assert_eq!(config.provider, Provider::S3);
        assert_eq!(config.prefix, "v2");
        assert!(config.has_secondary_endpoint());
        let secondary = config.secondary.as_ref().unwrap();
        assert_eq!(secondary.provider, Provider::Abs);
    }

    #[test]
    fn test_deserialize_provider_any_case() {
        let parse = |raw: &str| serde_json::from_str::<Provider>(raw);

        assert_eq!(parse(r#""s3""#).unwrap(), Provider::S3);
        assert_eq!(parse(r#""local""#).unwrap(), Provider::Local);
        assert_eq!(parse(r#""""#).unwrap(), Provider::Local);
        assert_eq!(parse(r#""Failed""#).unwrap(), Provider::FakeFailed);
        assert_eq!(parse(r#""OCS""#).unwrap(), Provider::Ocs);

        let err = parse(r#""ftp""#).unwrap_err();
        assert!(err.to_string().contains("unsupported storage provider: ftp"));

        let config: StoreConfig =
            serde_json::from_str(r#"{ "provider": "gcs", "container": "backups" }"#).unwrap();
        assert_eq!(config.provider, Provider::Gcs);
    }

    #[test]
    fn test_provider_from_str() {
        assert_eq!("s3".parse::<Provider>().unwrap(), Provider::S3);
        assert_eq!("GCS".parse::<Provider>().unwrap(), Provider::Gcs);
        assert_eq!("".parse::<Provider>().unwrap(), Provider::Local);
        assert_eq!("FAILED".parse::<Provider>().unwrap(), Provider::FakeFailed);
        assert!(matches!(
            "ftp".parse::<Provider>(),
            Err(StorageError::UnsupportedProvider(_))
        ));
    }

    #[test]
    fn test_secondary_inherits_from_primary() {
        let config = StoreConfig {
            provider: Provider::S3,
            container: "primary".into(),
            prefix: "v2/etcd-main".into(),
            max_parallel_chunks: 8,
            credentials: Credentials {
                access_key_id: Some("AKIA".into()),
                secret_access_key: Some("secret".into()),
                ..Default::default()
            },
            secondary: Some(SecondaryConfig {
                provider: Provider::S3,
                container: "secondary".into(),
                min_chunk_size: Some(1024),
                ..Default::default()
            }),
            ..Default::default()
        };

        let secondary = config.secondary_config().unwrap();
        assert!(secondary.is_secondary);
        assert!(secondary.secondary.is_none());
        assert_eq!(secondary.container, "secondary");
        assert_eq!(secondary.prefix, "v2/etcd-main");
        assert_eq!(secondary.max_parallel_chunks, 8);
        assert_eq!(secondary.min_chunk_size, 1024);
        assert_eq!(secondary.credentials.access_key_id.as_deref(), Some("AKIA"));
    }

    #[test]
    fn test_secondary_own_credentials_win() {
        let config = StoreConfig {
            credentials: Credentials {
                access_key_id: Some("primary-key".into()),
                ..Default::default()
            },
            secondary: Some(SecondaryConfig {
                credentials: Some(Credentials {
                    access_key_id: Some("secondary-key".into()),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        };
        let secondary = config.secondary_config().unwrap();
        assert_eq!(
            secondary.credentials.access_key_id.as_deref(),
            Some("secondary-key")
        );
    }

    #[test]
    fn test_container_env_fallback_by_role() {
        let lookup = |name: &str| Some(format!("from-{name}"));

        let mut normal = StoreConfig::default();
        normal.apply_env_fallbacks(lookup);
        assert_eq!(normal.container, "from-STORAGE_CONTAINER");

        let mut source = StoreConfig { is_source: true, ..Default::default() };
        source.apply_env_fallbacks(lookup);
        assert_eq!(source.container, "from-SOURCE_STORAGE_CONTAINER");

        let mut secondary = StoreConfig { is_secondary: true, ..Default::default() };
        secondary.apply_env_fallbacks(lookup);
        assert_eq!(secondary.container, "from-SECONDARY_STORAGE_CONTAINER");

        let mut explicit = StoreConfig { container: "set".into(), ..Default::default() };
        explicit.apply_env_fallbacks(lookup);
        assert_eq!(explicit.container, "set");
    }

    #[test]
    fn test_secondary_credentials_fall_back_to_unprefixed() {
        let lookup = |name: &str| match name {
            "SECONDARY_STORAGE_ACCESS_KEY_ID" => Some("secondary-key".to_string()),
            "STORAGE_ACCESS_KEY_ID" => Some("shared-key".to_string()),
            "STORAGE_SECRET_ACCESS_KEY" => Some("shared-secret".to_string()),
            _ => None,
        };

        let secondary = Credentials::from_lookup(SECONDARY_ENV_PREFIX, lookup);
        assert_eq!(secondary.access_key_id.as_deref(), Some("secondary-key"));
        assert_eq!(secondary.secret_access_key.as_deref(), Some("shared-secret"));

        let primary = Credentials::from_lookup("", lookup);
        assert_eq!(primary.access_key_id.as_deref(), Some("shared-key"));
        assert!(primary.region.is_none());
    }

    #[test]
    fn test_validate() {
        assert!(StoreConfig::default().validate().is_ok());

        let missing_container = StoreConfig { provider: Provider::Gcs, ..Default::default() };
        let err = missing_container.validate().unwrap_err();
        assert!(err.to_string().contains("storage container name not specified"));

        let zero_parallel = StoreConfig { max_parallel_chunks: 0, ..Default::default() };
        assert!(zero_parallel.validate().is_err());
    }

    #[test]
    fn test_credentials_debug_redacts_secret() {
        let creds = Credentials {
            secret_access_key: Some("hunter2".into()),
            ..Default::default()
        };
        let rendered = format!("{creds:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }
}
