// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Startup-time store construction.
//!
//! The resolver turns a [`StoreConfig`] into one [`SnapStore`]: a single
//! backend, or a [`DualSnapStore`] when a secondary endpoint is declared.
//! The resilient variant tolerates one endpoint failing to construct and
//! starts degraded on the survivor instead.
//!
//! | Primary        | Secondary      | Result                        |
//! |----------------|----------------|-------------------------------|
//! | fatal error    | fatal error    | error, no store               |
//! | error          | error (≥1 transient) | "temporarily unavailable" error |
//! | ok             | error          | primary only (degraded)       |
//! | error          | ok             | secondary only (degraded)     |
//! | ok             | ok             | dual store                    |
//!
//! The shape is fixed for the process lifetime.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::config::{Provider, StoreConfig, DEFAULT_LOCAL_CONTAINER};
use crate::resilience::circuit_breaker::CircuitConfig;
use crate::resilience::classify::{classify_construction, ErrorClass};
use super::dual::DualSnapStore;
use super::failed::FailedSnapStore;
use super::memory::MemorySnapStore;
use super::object::ObjectSnapStore;
use super::resilient::ResilientSnapStore;
use super::traits::{Endpoint, SnapStore, StorageError};

const ACTOR: &str = "snapstore-resolver";

/// Environment lookup injected into the resolver.
pub type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Maps a prepared endpoint configuration to a concrete backend.
#[async_trait]
pub trait BackendFactory: Send + Sync {
    async fn build(&self, config: &StoreConfig, endpoint: Endpoint) -> Result<Arc<dyn SnapStore>, StorageError>;
}

/// Default factory covering every [`Provider`].
#[derive(Debug, Default, Clone, Copy)]
pub struct ProviderFactory;

#[async_trait]
impl BackendFactory for ProviderFactory {
    async fn build(&self, config: &StoreConfig, _endpoint: Endpoint) -> Result<Arc<dyn SnapStore>, StorageError> {
        let store: Arc<dyn SnapStore> = match config.provider {
            Provider::Local => Arc::new(ObjectSnapStore::local(Path::new(&config.container), config)?),
            Provider::Memory => Arc::new(MemorySnapStore::with_prefix(config.prefix.clone())),
            Provider::FakeFailed => Arc::new(FailedSnapStore::new()),
            Provider::S3
            | Provider::Ecs
            | Provider::Ocs
            | Provider::Abs
            | Provider::Gcs
            | Provider::Swift
            | Provider::Oss => Arc::new(ObjectSnapStore::remote(config)?),
        };
        Ok(store)
    }
}

/// Shape the resolver settled on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreShape {
    Single,
    Dual,
    /// A secondary was declared but only this endpoint could be constructed
    Degraded(Endpoint),
}

impl fmt::Display for StoreShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single => write!(f, "single"),
            Self::Dual => write!(f, "dual"),
            Self::Degraded(endpoint) => write!(f, "degraded ({endpoint} only)"),
        }
    }
}

pub struct ResolvedStore {
    pub store: Arc<dyn SnapStore>,
    pub shape: StoreShape,
}

impl fmt::Debug for ResolvedStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedStore").field("shape", &self.shape).finish_non_exhaustive()
    }
}

pub struct StoreResolver {
    factory: Arc<dyn BackendFactory>,
    env: EnvLookup,
}

impl Default for StoreResolver {
    fn default() -> Self {
        Self::new(Arc::new(ProviderFactory))
    }
}

impl StoreResolver {
    /// Resolver reading fallbacks from the process environment.
    pub fn new(factory: Arc<dyn BackendFactory>) -> Self {
        Self {
            factory,
            env: Arc::new(|name| std::env::var(name).ok()),
        }
    }

    /// Replace the environment lookup.
    #[must_use]
    pub fn with_env<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.env = Arc::new(lookup);
        self
    }

    /// Fill defaults and fallbacks for one endpoint and check the result.
    pub async fn prepare(&self, config: &StoreConfig) -> Result<StoreConfig, StorageError> {
        let mut config = config.clone();
        let env = self.env.clone();
        config.apply_env_fallbacks(|name| env(name));

        if config.provider.is_remote() && config.container.is_empty() {
            return Err(StorageError::Config("storage container name not specified".into()));
        }

        if config.temp_dir.as_os_str().is_empty() {
            config.temp_dir = std::env::temp_dir();
        }
        if !tokio::fs::try_exists(&config.temp_dir).await? {
            info!(
                actor = ACTOR,
                "Temporary directory {} does not exist. Creating it...",
                config.temp_dir.display()
            );
            tokio::fs::create_dir_all(&config.temp_dir).await?;
        }

        if config.provider == Provider::Local {
            if config.container.is_empty() {
                config.container = DEFAULT_LOCAL_CONTAINER.to_string();
            }
            if Path::new(&config.container).is_relative() {
                let home = (self.env)("HOME")
                    .filter(|h| !h.is_empty())
                    .ok_or_else(|| StorageError::Config("home directory not found".into()))?;
                config.container = Path::new(&home)
                    .join(&config.container)
                    .to_string_lossy()
                    .into_owned();
            }
        }

        config.validate()?;
        Ok(config)
    }

    async fn build(&self, config: &StoreConfig, endpoint: Endpoint) -> Result<Arc<dyn SnapStore>, StorageError> {
        let prepared = self.prepare(config).await?;
        self.factory
            .build(&prepared, endpoint)
            .await
            .map_err(|e| StorageError::construction(endpoint, e))
    }

    /// Backend for one endpoint, wrapped when its provider has rich errors.
    async fn build_resilient(&self, config: &StoreConfig, endpoint: Endpoint) -> Result<Arc<dyn SnapStore>, StorageError> {
        let store = self.build(config, endpoint).await?;
        if !config.provider.has_rich_errors() {
            return Ok(store);
        }
        Ok(Arc::new(
            ResilientSnapStore::new(store, endpoint.as_str())
                .with_health_check_timeout(config.health_check_timeout()),
        ))
    }

    fn secondary_config(config: &StoreConfig) -> Result<StoreConfig, StorageError> {
        config
            .secondary_config()
            .ok_or_else(|| StorageError::Config("secondary configuration is invalid".into()))
    }

    fn dual(config: &StoreConfig, primary: Arc<dyn SnapStore>, secondary: Arc<dyn SnapStore>) -> ResolvedStore {
        let circuit = CircuitConfig { failure_threshold: config.failover_threshold };
        ResolvedStore {
            store: Arc::new(DualSnapStore::with_circuit_config(primary, secondary, circuit)),
            shape: StoreShape::Dual,
        }
    }

    /// Strict resolution: every declared endpoint must construct.
    pub async fn resolve(&self, config: &StoreConfig) -> Result<ResolvedStore, StorageError> {
        if !config.has_secondary_endpoint() {
            let store = self.build(config, Endpoint::Primary).await?;
            return Ok(ResolvedStore { store, shape: StoreShape::Single });
        }

        let primary = self.build(config, Endpoint::Primary).await?;
        let secondary = self
            .build(&Self::secondary_config(config)?, Endpoint::Secondary)
            .await?;
        Ok(Self::dual(config, primary, secondary))
    }

    /// Failure-tolerant resolution: S3 backends are wrapped in
    /// [`ResilientSnapStore`] and one failing endpoint degrades the store
    /// instead of failing startup.
    pub async fn resolve_resilient(&self, config: &StoreConfig) -> Result<ResolvedStore, StorageError> {
        info!(
            actor = ACTOR,
            provider = %config.provider,
            container = %config.container,
            prefix = %config.prefix,
            "Snapstore configuration - Provider: {}, Container: {}, Prefix: {}",
            config.provider, config.container, config.prefix
        );
        info!(
            actor = ACTOR,
            has_secondary = config.has_secondary_endpoint(),
            "Secondary endpoint configuration - HasSecondary: {}, SecondaryProvider: {}, SecondaryContainer: {}",
            config.has_secondary_endpoint(),
            config.secondary.as_ref().map(|s| s.provider.as_str()).unwrap_or(""),
            config.secondary.as_ref().map(|s| s.container.as_str()).unwrap_or("")
        );

        if !config.has_secondary_endpoint() {
            info!(actor = ACTOR, "Creating single snapstore (no secondary endpoint configured)");
            let store = self.build_resilient(config, Endpoint::Primary).await?;
            return Ok(ResolvedStore { store, shape: StoreShape::Single });
        }

        let secondary_config = Self::secondary_config(config)?;
        info!(
            actor = ACTOR,
            "Creating dual snapstore - Primary: {}/{}, Secondary: {}/{}",
            config.provider, config.container, secondary_config.provider, secondary_config.container
        );

        let primary = self.build_resilient(config, Endpoint::Primary).await;
        log_construction(Endpoint::Primary, &primary);
        let secondary = self.build_resilient(&secondary_config, Endpoint::Secondary).await;
        log_construction(Endpoint::Secondary, &secondary);

        match (primary, secondary) {
            (Ok(p), Ok(s)) => {
                info!(actor = ACTOR, "Created dual snapstore with both primary and secondary endpoints");
                Ok(Self::dual(config, p, s))
            }
            (Ok(p), Err(_)) => {
                warn!(actor = ACTOR, "Only primary snapstore available, using single endpoint");
                Ok(ResolvedStore { store: p, shape: StoreShape::Degraded(Endpoint::Primary) })
            }
            (Err(_), Ok(s)) => {
                warn!(actor = ACTOR, "Only secondary snapstore available, using as primary");
                Ok(ResolvedStore { store: s, shape: StoreShape::Degraded(Endpoint::Secondary) })
            }
            (Err(p), Err(s)) => {
                let transient = classify_construction(&p).is_transient()
                    || classify_construction(&s).is_transient();
                if transient {
                    error!(actor = ACTOR, "No snapstore could be created, endpoints temporarily unavailable");
                    Err(StorageError::BothEndpointsUnavailable {
                        primary: Box::new(p),
                        secondary: Box::new(s),
                    })
                } else {
                    Err(StorageError::both_failed("create snapstore", p, s))
                }
            }
        }
    }
}

fn log_construction(endpoint: Endpoint, result: &Result<Arc<dyn SnapStore>, StorageError>) {
    match result {
        Ok(_) => info!(actor = ACTOR, endpoint = %endpoint, "Successfully created {} snapstore", endpoint),
        Err(e) => match classify_construction(e) {
            ErrorClass::Transient => warn!(
                actor = ACTOR,
                endpoint = %endpoint,
                "Transient error creating {} snapstore: {}", endpoint, e
            ),
            ErrorClass::Fatal => error!(
                actor = ACTOR,
                endpoint = %endpoint,
                "Fatal error creating {} snapstore: {}", endpoint, e
            ),
        },
    }
}

/// Resolve with the default provider factory and the process environment.
pub async fn resolve_store(config: &StoreConfig) -> Result<ResolvedStore, StorageError> {
    StoreResolver::default().resolve(config).await
}

/// Failure-tolerant resolve with the default provider factory and the
/// process environment.
pub async fn resolve_resilient_store(config: &StoreConfig) -> Result<ResolvedStore, StorageError> {
    StoreResolver::default().resolve_resilient(config).await
}
