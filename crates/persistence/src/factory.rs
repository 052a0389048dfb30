//! Provider factory.
//!
//! [`DatabaseFactory`] turns a [`DatabaseConfig`] into a connected provider
//! and owns the active instance for its lifetime. It never initializes
//! implicitly: [`DatabaseFactory::get_database`] fails with `NotInitialized`
//! until [`DatabaseFactory::initialize_database`] has succeeded. Concurrent
//! first use is coordinated by the [`InitializationGuard`](crate::guard::InitializationGuard).
//!
//! # Health
//!
//! | Status | Meaning |
//! |--------|---------|
//! | `healthy` | Ping succeeded within the latency threshold |
//! | `degraded` | Ping succeeded but took longer than the threshold |
//! | `unhealthy` | Ping failed |
//! | `not_initialized` | No active provider |
//! | `error` | The probe itself did not finish within the connect timeout |

use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::config::{DatabaseConfig, ProviderConfig};
use crate::core::{DatabaseProvider, ProviderKind, ProviderStats};
use crate::error::{BackendError, ConfigError, StorageError, StorageResult};

/// A provider shared across the process.
pub type SharedProvider = Arc<dyn DatabaseProvider>;

/// Overall health classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Ping succeeded within the latency threshold.
    Healthy,
    /// Ping succeeded slowly.
    Degraded,
    /// Ping failed.
    Unhealthy,
    /// No active provider.
    NotInitialized,
    /// The probe did not finish.
    Error,
}

impl HealthStatus {
    /// Returns true when the database can serve requests.
    pub fn is_available(&self) -> bool {
        matches!(self, HealthStatus::Healthy | HealthStatus::Degraded)
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
            HealthStatus::NotInitialized => "not_initialized",
            HealthStatus::Error => "error",
        };
        write!(f, "{}", name)
    }
}

/// Result of a health probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    /// Classification.
    pub status: HealthStatus,
    /// Provider name, when one is active.
    pub provider: Option<String>,
    /// Ping round-trip time.
    pub latency_ms: Option<u64>,
    /// Whether the provider holds a live connection.
    pub connected: bool,
    /// Human-readable detail for anything but `healthy`.
    pub message: Option<String>,
}

impl HealthReport {
    fn not_initialized() -> Self {
        Self {
            status: HealthStatus::NotInitialized,
            provider: None,
            latency_ms: None,
            connected: false,
            message: Some("database not initialized".to_string()),
        }
    }
}

struct Active {
    provider: SharedProvider,
    connect_timeout: Duration,
    latency_threshold: Duration,
}

/// Builds, connects and owns the active provider.
#[derive(Default)]
pub struct DatabaseFactory {
    active: RwLock<Option<Active>>,
    // Held across build, connect and ping so concurrent callers make one attempt.
    init: tokio::sync::Mutex<()>,
}

impl fmt::Debug for DatabaseFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let provider = self.active.read().as_ref().map(|a| a.provider.name());
        f.debug_struct("DatabaseFactory")
            .field("active", &provider)
            .finish()
    }
}

impl DatabaseFactory {
    /// Creates a factory with no active provider.
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide factory.
    pub fn global() -> Arc<DatabaseFactory> {
        static GLOBAL: OnceLock<Arc<DatabaseFactory>> = OnceLock::new();
        GLOBAL.get_or_init(|| Arc::new(DatabaseFactory::new())).clone()
    }

    /// Validates `config`, connects the selected provider, verifies it with a
    /// ping and installs it as the active provider.
    ///
    /// Returns the existing provider if one is already active. Concurrent
    /// callers wait for the first attempt and then share its provider.
    ///
    /// # Errors
    ///
    /// * `Configuration` - Invalid settings or a provider not compiled in
    /// * `Connection` - The backend could not be reached in time
    pub async fn initialize_database(
        &self,
        config: &DatabaseConfig,
    ) -> StorageResult<SharedProvider> {
        if let Ok(provider) = self.get_database() {
            return Ok(provider);
        }

        let _init = self.init.lock().await;
        if let Ok(provider) = self.get_database() {
            return Ok(provider);
        }

        config.validate().inspect_err(|err| {
            tracing::error!(
                provider = %config.kind(),
                error = %err,
                "invalid database configuration"
            );
        })?;

        let provider = create_provider(config)?;
        tracing::info!(provider = %config.kind(), "connecting database provider");

        if let Err(err) = provider.connect().await {
            tracing::error!(
                provider = %config.kind(),
                kind = %err.kind(),
                error = %err,
                "database connection failed"
            );
            return Err(err);
        }

        if !provider.ping().await {
            let _ = provider.disconnect().await;
            let err = StorageError::Backend(BackendError::ConnectionFailed {
                backend_name: provider.name().to_string(),
                message: "health check after connect failed".to_string(),
            });
            tracing::error!(
                provider = %config.kind(),
                error = %err,
                "database health check failed"
            );
            return Err(err);
        }

        *self.active.write() = Some(Active {
            provider: provider.clone(),
            connect_timeout: config.connect_timeout(),
            latency_threshold: Duration::from_millis(config.health_latency_threshold_ms),
        });
        tracing::info!(provider = %config.kind(), "database initialized");
        Ok(provider)
    }

    /// Returns the active provider.
    ///
    /// # Errors
    ///
    /// * `NotInitialized` - `initialize_database` has not succeeded
    pub fn get_database(&self) -> StorageResult<SharedProvider> {
        self.active
            .read()
            .as_ref()
            .map(|active| active.provider.clone())
            .ok_or(StorageError::NotInitialized)
    }

    /// Returns true if a provider is active.
    pub fn is_initialized(&self) -> bool {
        self.active.read().is_some()
    }

    /// Provider name, connection flag and pool figures.
    pub async fn get_database_stats(&self) -> StorageResult<ProviderStats> {
        self.get_database()?.stats().await
    }

    /// Probes the active provider. Never fails; problems are reported in the status.
    pub async fn check_database_health(&self) -> HealthReport {
        let (provider, timeout, threshold) = match self.active.read().as_ref() {
            Some(active) => (
                active.provider.clone(),
                active.connect_timeout,
                active.latency_threshold,
            ),
            None => return HealthReport::not_initialized(),
        };

        let started = Instant::now();
        let outcome = tokio::time::timeout(timeout, provider.ping()).await;
        let latency_ms = started.elapsed().as_millis() as u64;
        let name = provider.name().to_string();

        let report = match outcome {
            Err(_) => HealthReport {
                status: HealthStatus::Error,
                provider: Some(name),
                latency_ms: None,
                connected: provider.is_connected(),
                message: Some(format!("health probe timed out after {}ms", timeout.as_millis())),
            },
            Ok(false) => HealthReport {
                status: HealthStatus::Unhealthy,
                provider: Some(name),
                latency_ms: Some(latency_ms),
                connected: provider.is_connected(),
                message: Some("ping failed".to_string()),
            },
            Ok(true) if started.elapsed() > threshold => HealthReport {
                status: HealthStatus::Degraded,
                provider: Some(name),
                latency_ms: Some(latency_ms),
                connected: true,
                message: Some(format!(
                    "ping latency {}ms exceeds threshold {}ms",
                    latency_ms,
                    threshold.as_millis()
                )),
            },
            Ok(true) => HealthReport {
                status: HealthStatus::Healthy,
                provider: Some(name),
                latency_ms: Some(latency_ms),
                connected: true,
                message: None,
            },
        };

        if report.status != HealthStatus::Healthy {
            tracing::warn!(
                status = %report.status,
                provider = ?report.provider,
                message = ?report.message,
                "database health check"
            );
        }
        report
    }

    /// Disconnects and clears the active provider. Safe to call repeatedly.
    pub async fn close_database_connections(&self) -> StorageResult<()> {
        let active = self.active.write().take();
        match active {
            Some(active) => {
                active.provider.disconnect().await?;
                tracing::info!(provider = active.provider.name(), "database connections closed");
            }
            None => tracing::debug!("close requested with no active database"),
        }
        Ok(())
    }
}

/// Builds an unconnected provider for `config`.
///
/// # Errors
///
/// * `Configuration` - The provider's feature was not compiled in
pub fn create_provider(config: &DatabaseConfig) -> StorageResult<SharedProvider> {
    match &config.provider {
        #[cfg(feature = "sqlite")]
        ProviderConfig::Sqlite(_) => Ok(Arc::new(
            crate::backends::sqlite::SqliteProvider::from_config(config)?,
        )),
        #[cfg(feature = "postgres")]
        ProviderConfig::Postgresql(_) => Ok(Arc::new(
            crate::backends::postgres::PostgresProvider::from_config(config)?,
        )),
        #[cfg(feature = "supabase")]
        ProviderConfig::Supabase(_) => Ok(Arc::new(
            crate::backends::supabase::SupabaseProvider::from_config(config)?,
        )),
        #[allow(unreachable_patterns)]
        other => Err(not_compiled(other.kind())),
    }
}

fn not_compiled(kind: ProviderKind) -> StorageError {
    ConfigError::ProviderNotCompiled {
        provider: kind.to_string(),
        feature: kind.feature().to_string(),
    }
    .into()
}

#[cfg(all(test, feature = "sqlite"))]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[tokio::test]
    async fn test_get_database_before_initialize() {
        let factory = DatabaseFactory::new();
        let err = factory.get_database().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotInitialized);

        let report = factory.check_database_health().await;
        assert_eq!(report.status, HealthStatus::NotInitialized);
        assert!(!report.connected);
    }

    #[tokio::test]
    async fn test_initialize_is_reused() {
        let factory = DatabaseFactory::new();
        let config = DatabaseConfig::sqlite(":memory:");

        let first = factory.initialize_database(&config).await.unwrap();
        let second = factory.initialize_database(&config).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        let report = factory.check_database_health().await;
        assert_eq!(report.status, HealthStatus::Healthy);
        assert_eq!(report.provider.as_deref(), Some("sqlite"));
    }

    #[tokio::test]
    async fn test_degraded_when_over_threshold() {
        let factory = DatabaseFactory::new();
        let mut config = DatabaseConfig::sqlite(":memory:");
        config.health_latency_threshold_ms = 0;
        factory.initialize_database(&config).await.unwrap();

        let report = factory.check_database_health().await;
        assert_eq!(report.status, HealthStatus::Degraded);
        assert!(report.connected);
        assert!(report.message.as_deref().is_some_and(|m| m.contains("exceeds threshold")));
    }

    #[tokio::test]
    async fn test_concurrent_initialize_installs_one_provider() {
        let factory = Arc::new(DatabaseFactory::new());
        let config = DatabaseConfig::sqlite(":memory:");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let factory = factory.clone();
                let config = config.clone();
                tokio::spawn(async move { factory.initialize_database(&config).await })
            })
            .collect();

        let mut providers = Vec::new();
        for handle in handles {
            providers.push(handle.await.unwrap().unwrap());
        }
        let active = factory.get_database().unwrap();
        assert!(providers.iter().all(|p| Arc::ptr_eq(p, &active)));
        assert!(active.is_connected());
    }

    #[tokio::test]
    async fn test_unhealthy_after_disconnect() {
        let factory = DatabaseFactory::new();
        let provider = factory
            .initialize_database(&DatabaseConfig::sqlite(":memory:"))
            .await
            .unwrap();

        provider.disconnect().await.unwrap();
        assert!(!provider.ping().await);

        let report = factory.check_database_health().await;
        assert_eq!(report.status, HealthStatus::Unhealthy);
        assert!(!report.connected);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let factory = DatabaseFactory::new();
        factory
            .initialize_database(&DatabaseConfig::sqlite(":memory:"))
            .await
            .unwrap();

        factory.close_database_connections().await.unwrap();
        factory.close_database_connections().await.unwrap();
        assert!(!factory.is_initialized());
        assert!(factory.get_database_stats().await.is_err());
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let factory = DatabaseFactory::new();
        let mut config = DatabaseConfig::sqlite(":memory:");
        config.pool.max = 0;
        let err = factory.initialize_database(&config).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(!factory.is_initialized());
    }

    #[test]
    fn test_health_report_serialization() {
        let report = HealthReport::not_initialized();
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "not_initialized");
        assert_eq!(json["connected"], false);
    }
}
