//! Exactly-once initialization.
//!
//! [`InitializationGuard`] resolves configuration and connects a provider the
//! first time anything asks for it. Concurrent first callers share a single
//! in-flight attempt, so a burst of requests at startup produces one
//! connection attempt.
//!
//! ```text
//! Uninitialized ──ensure_connection──▶ Initializing ──ok──▶ Ready
//!       ▲                                   │
//!       └────────────── failed ◀────────────┘
//! ```
//!
//! A failed attempt delivers the same error to every waiter, is kept as
//! [`InitializationGuard::last_error`], and returns the guard to
//! `Uninitialized` so the next call retries.
//!
//! The attempt runs on a spawned task. A caller that gives up waiting does
//! not cancel it for the others.
//!
//! # Example
//!
//! ```no_run
//! use flock_persistence::guard;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let provider = guard::global().ensure_connection().await?;
//! println!("connected to {}", provider.name());
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;

use crate::config::DatabaseConfig;
use crate::error::{BackendError, ConfigError, StorageError, StorageResult};
use crate::factory::{DatabaseFactory, SharedProvider};

type Attempt = Shared<BoxFuture<'static, Result<SharedProvider, Arc<StorageError>>>>;

/// Where the guard reads its configuration from.
#[derive(Debug, Clone, Default)]
pub enum ConfigSource {
    /// Process environment, read at initialization time.
    #[default]
    Environment,
    /// A fixed configuration.
    Fixed(DatabaseConfig),
}

impl ConfigSource {
    /// Produces the configuration for one attempt.
    pub fn resolve(&self) -> Result<DatabaseConfig, ConfigError> {
        match self {
            ConfigSource::Environment => DatabaseConfig::from_env(),
            ConfigSource::Fixed(config) => Ok(config.clone()),
        }
    }
}

/// Connects providers on behalf of the guard.
#[async_trait]
pub trait ProviderConnector: Send + Sync {
    /// Builds and connects a provider.
    async fn connect(&self, config: &DatabaseConfig) -> StorageResult<SharedProvider>;

    /// Releases a provider the guard no longer holds.
    async fn release(&self, provider: SharedProvider) -> StorageResult<()> {
        provider.disconnect().await
    }
}

#[async_trait]
impl ProviderConnector for DatabaseFactory {
    async fn connect(&self, config: &DatabaseConfig) -> StorageResult<SharedProvider> {
        self.initialize_database(config).await
    }

    async fn release(&self, _provider: SharedProvider) -> StorageResult<()> {
        self.close_database_connections().await
    }
}

/// Guard state.
#[derive(Clone)]
pub enum GuardState {
    /// No provider and no attempt in flight.
    Uninitialized,
    /// An attempt is in flight; every caller awaits this handle.
    Initializing(Attempt),
    /// A connected provider is available.
    Ready(SharedProvider),
}

impl fmt::Debug for GuardState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GuardState::Uninitialized => write!(f, "Uninitialized"),
            GuardState::Initializing(_) => write!(f, "Initializing"),
            GuardState::Ready(provider) => write!(f, "Ready({})", provider.name()),
        }
    }
}

struct Inner {
    state: GuardState,
    generation: u64,
    last_error: Option<Arc<StorageError>>,
}

/// Ensures the provider is configured and connected exactly once.
pub struct InitializationGuard {
    inner: Mutex<Inner>,
    source: ConfigSource,
    connector: Arc<dyn ProviderConnector>,
}

impl fmt::Debug for InitializationGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InitializationGuard")
            .field("state", &self.inner.lock().state)
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

impl InitializationGuard {
    /// Creates a guard over a config source and connector.
    pub fn new(source: ConfigSource, connector: Arc<dyn ProviderConnector>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: GuardState::Uninitialized,
                generation: 0,
                last_error: None,
            }),
            source,
            connector,
        }
    }

    /// A guard that connects `config` through a fresh factory.
    pub fn with_config(config: DatabaseConfig) -> Self {
        Self::new(ConfigSource::Fixed(config), Arc::new(DatabaseFactory::new()))
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> GuardState {
        self.inner.lock().state.clone()
    }

    /// Returns true once a provider is ready.
    pub fn is_ready(&self) -> bool {
        matches!(self.inner.lock().state, GuardState::Ready(_))
    }

    /// The error from the most recent failed attempt.
    pub fn last_error(&self) -> Option<Arc<StorageError>> {
        self.inner.lock().last_error.clone()
    }

    /// Returns the ready provider without initializing.
    ///
    /// # Errors
    ///
    /// * `NotInitialized` - The guard is not `Ready`
    pub fn provider(&self) -> StorageResult<SharedProvider> {
        match &self.inner.lock().state {
            GuardState::Ready(provider) => Ok(provider.clone()),
            _ => Err(StorageError::NotInitialized),
        }
    }

    /// Returns the ready provider, initializing it first if needed.
    ///
    /// # Errors
    ///
    /// A failed attempt yields `StorageError::Initialization` wrapping the
    /// shared cause; its [`kind`](StorageError::kind) is the cause's kind.
    pub async fn ensure_connection(&self) -> StorageResult<SharedProvider> {
        let (generation, attempt) = {
            let mut inner = self.inner.lock();
            match &inner.state {
                GuardState::Ready(provider) => return Ok(provider.clone()),
                GuardState::Initializing(attempt) => (inner.generation, attempt.clone()),
                GuardState::Uninitialized => {
                    inner.generation += 1;
                    let attempt = self.start_attempt(inner.generation);
                    inner.state = GuardState::Initializing(attempt.clone());
                    (inner.generation, attempt)
                }
            }
        };

        let outcome = attempt.await;
        self.settle(generation, &outcome);
        outcome.map_err(StorageError::Initialization)
    }

    /// Releases the provider and returns to `Uninitialized`. Safe to call repeatedly.
    pub async fn shutdown(&self) -> StorageResult<()> {
        let previous = {
            let mut inner = self.inner.lock();
            inner.generation += 1;
            std::mem::replace(&mut inner.state, GuardState::Uninitialized)
        };

        match previous {
            GuardState::Ready(provider) => self.connector.release(provider).await,
            GuardState::Initializing(attempt) => {
                if let Ok(provider) = attempt.await {
                    self.connector.release(provider).await?;
                }
                Ok(())
            }
            GuardState::Uninitialized => Ok(()),
        }
    }

    fn start_attempt(&self, generation: u64) -> Attempt {
        let source = self.source.clone();
        let connector = self.connector.clone();

        let task = tokio::spawn(async move {
            tracing::info!(generation, "initializing database");
            let config = source.resolve().map_err(|err| {
                if let ConfigError::MissingKeys { provider, keys } = &err {
                    tracing::error!(
                        %provider,
                        missing = ?keys,
                        "database configuration incomplete"
                    );
                }
                StorageError::from(err)
            })?;
            connector.connect(&config).await
        });

        async move {
            let result = match task.await {
                Ok(result) => result,
                Err(join_err) => Err(StorageError::Backend(BackendError::Internal {
                    backend_name: "guard".to_string(),
                    message: format!("initialization task failed: {}", join_err),
                    source: None,
                })),
            };
            result.map_err(Arc::new)
        }
        .boxed()
        .shared()
    }

    /// Records the outcome of attempt `generation`, once.
    fn settle(&self, generation: u64, outcome: &Result<SharedProvider, Arc<StorageError>>) {
        let mut inner = self.inner.lock();
        if inner.generation != generation || !matches!(inner.state, GuardState::Initializing(_)) {
            return;
        }

        match outcome {
            Ok(provider) => {
                tracing::info!(provider = provider.name(), "database ready");
                inner.state = GuardState::Ready(provider.clone());
                inner.last_error = None;
            }
            Err(err) => {
                tracing::error!(
                    kind = %err.kind(),
                    error = %err,
                    "database initialization failed; next call will retry"
                );
                inner.state = GuardState::Uninitialized;
                inner.last_error = Some(err.clone());
            }
        }
    }
}

/// The process-wide guard, reading configuration from the environment and
/// connecting through [`DatabaseFactory::global`].
pub fn global() -> &'static InitializationGuard {
    static GLOBAL: OnceLock<InitializationGuard> = OnceLock::new();
    GLOBAL.get_or_init(|| {
        InitializationGuard::new(ConfigSource::Environment, DatabaseFactory::global())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingConnector {
        attempts: AtomicUsize,
        factory: DatabaseFactory,
    }

    #[async_trait]
    impl ProviderConnector for CountingConnector {
        async fn connect(&self, config: &DatabaseConfig) -> StorageResult<SharedProvider> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.factory.initialize_database(config).await
        }
    }

    fn counting() -> Arc<CountingConnector> {
        Arc::new(CountingConnector {
            attempts: AtomicUsize::new(0),
            factory: DatabaseFactory::new(),
        })
    }

    #[cfg(feature = "sqlite")]
    #[tokio::test]
    async fn test_concurrent_callers_share_one_attempt() {
        let connector = counting();
        let guard = Arc::new(InitializationGuard::new(
            ConfigSource::Fixed(DatabaseConfig::sqlite(":memory:")),
            connector.clone(),
        ));

        let callers: Vec<_> = (0..16)
            .map(|_| {
                let guard = guard.clone();
                tokio::spawn(async move { guard.ensure_connection().await })
            })
            .collect();

        let mut providers = Vec::new();
        for caller in callers {
            providers.push(caller.await.unwrap().unwrap());
        }

        assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);
        assert!(providers.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert!(guard.is_ready());

        guard.ensure_connection().await.unwrap();
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_is_shared_and_resets() {
        let connector = counting();
        let mut config = DatabaseConfig::sqlite(":memory:");
        config.pool.max = 0;
        let guard = Arc::new(InitializationGuard::new(
            ConfigSource::Fixed(config),
            connector.clone(),
        ));

        let (a, b) = tokio::join!(guard.ensure_connection(), guard.ensure_connection());
        let (a, b) = (a.unwrap_err(), b.unwrap_err());
        assert_eq!(a.kind(), ErrorKind::Configuration);
        match (&a, &b) {
            (StorageError::Initialization(x), StorageError::Initialization(y)) => {
                assert!(Arc::ptr_eq(x, y))
            }
            _ => panic!("expected shared initialization errors"),
        }
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);

        assert!(matches!(guard.state(), GuardState::Uninitialized));
        assert!(guard.last_error().is_some());

        guard.ensure_connection().await.unwrap_err();
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_provider_before_ready() {
        let guard = InitializationGuard::new(
            ConfigSource::Fixed(DatabaseConfig::sqlite(":memory:")),
            counting(),
        );
        assert_eq!(guard.provider().unwrap_err().kind(), ErrorKind::NotInitialized);
        guard.shutdown().await.unwrap();
    }

    #[cfg(feature = "sqlite")]
    #[tokio::test]
    async fn test_shutdown_releases_provider() {
        let guard = InitializationGuard::with_config(DatabaseConfig::sqlite(":memory:"));
        let provider = guard.ensure_connection().await.unwrap();
        assert!(provider.is_connected());

        guard.shutdown().await.unwrap();
        guard.shutdown().await.unwrap();
        assert!(!guard.is_ready());
        assert!(!provider.is_connected());
    }
}
