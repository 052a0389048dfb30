//! PostgreSQL provider integration tests.
//!
//! Tests that require a running PostgreSQL instance use testcontainers
//! to spin up a real PostgreSQL instance in Docker.
//!
//! Run with: `cargo test -p flock-persistence --features postgres -- postgres`

#![cfg(feature = "postgres")]

use std::time::Duration;

use flock_persistence::backends::postgres::PostgresProvider;
use flock_persistence::config::{
    DatabaseConfig, PoolConfig, PostgresConfig, PostgresSslMode, ProviderConfig,
};
use flock_persistence::core::{DatabaseProvider, ProviderCapability, ProviderKind};

// ============================================================================
// Configuration Tests (no PostgreSQL instance required)
// ============================================================================

#[test]
fn test_provider_from_config() {
    let config = DatabaseConfig::new(ProviderConfig::Postgresql(PostgresConfig::from_url(
        "postgres://flock:secret@db:5432/flock",
    )));
    let provider = PostgresProvider::from_config(&config).unwrap();
    assert_eq!(provider.kind(), ProviderKind::Postgresql);
    assert!(provider.supports(ProviderCapability::Transactions));
    assert!(provider.supports(ProviderCapability::SchemaDdl));
    assert!(!provider.supports(ProviderCapability::Realtime));
    assert!(provider.as_realtime().is_none());
}

#[tokio::test]
async fn test_unreachable_server_fails_to_connect() {
    let config = PostgresConfig {
        host: "127.0.0.1".to_string(),
        port: 1,
        dbname: "flock".to_string(),
        user: "flock".to_string(),
        password: "flock".to_string(),
        ssl_mode: PostgresSslMode::Disable,
        url: None,
    };
    let provider = PostgresProvider::new(config, PoolConfig::default(), Duration::from_millis(500));

    assert!(provider.connect().await.is_err());
    assert!(!provider.is_connected());
    assert!(!provider.ping().await);
}

// ============================================================================
// Integration Tests (requires Docker for testcontainers)
// ============================================================================

/// Integration tests that require a real PostgreSQL instance via testcontainers.
///
/// Run with:
///   cargo test -p flock-persistence --features postgres -- postgres_integration
///
/// Skip if no Docker:
///   cargo test -p flock-persistence --features postgres -- --skip postgres_integration
#[cfg(test)]
mod postgres_integration {
    use std::sync::Arc;

    use futures::FutureExt;
    use serde_json::{Value, json};

    use flock_persistence::backends::postgres::PostgresProvider;
    use flock_persistence::core::{DataAccess, DatabaseProvider, ProviderExt};
    use flock_persistence::error::{ErrorKind, StorageError};
    use flock_persistence::factory::SharedProvider;
    use flock_persistence::models::{NewShow, NewSyncJob, NewUser, SyncProgress, UserType};
    use flock_persistence::repository::Repositories;
    use flock_persistence::schema::ensure_schema;
    use flock_persistence::types::{Comparison, OrderBy, QueryOptions, Record};

    use testcontainers::ImageExt;
    use testcontainers::runners::AsyncRunner;
    use testcontainers_modules::postgres::Postgres;
    use tokio::sync::OnceCell;

    /// Shared PostgreSQL container reused across all tests in this module.
    struct SharedPg {
        url: String,
        /// Kept alive for the duration of the test binary; dropped at process exit.
        _container: testcontainers::ContainerAsync<Postgres>,
    }

    static SHARED_PG: OnceCell<SharedPg> = OnceCell::const_new();

    async fn shared_pg() -> &'static SharedPg {
        SHARED_PG
            .get_or_init(|| async {
                let run_id = std::env::var("GITHUB_RUN_ID").unwrap_or_default();
                let container = Postgres::default()
                    .with_label("github.run_id", &run_id)
                    .start()
                    .await
                    .expect("Failed to start PostgreSQL container");

                let port = container
                    .get_host_port_ipv4(5432)
                    .await
                    .expect("Failed to get host port");
                let host = container.get_host().await.expect("Failed to get host");
                let url = format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

                // Initialize schema once on the shared container.
                let provider = PostgresProvider::from_connection_string(&url)
                    .await
                    .expect("Failed to create PostgresProvider");
                ensure_schema(&provider)
                    .await
                    .expect("Failed to initialize schema");
                provider.disconnect().await.expect("Failed to disconnect");

                SharedPg {
                    url,
                    _container: container,
                }
            })
            .await
    }

    async fn create_provider() -> Arc<PostgresProvider> {
        let pg = shared_pg().await;
        Arc::new(
            PostgresProvider::from_connection_string(&pg.url)
                .await
                .expect("Failed to create PostgresProvider"),
        )
    }

    fn record(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            other => panic!("expected an object, got {}", other),
        }
    }

    /// Email unique to one test, since all tests share one database.
    fn unique_email(prefix: &str) -> String {
        format!("{}-{}@example.com", prefix, uuid::Uuid::new_v4().simple())
    }

    // ========================================================================
    // CRUD Tests
    // ========================================================================

    #[tokio::test]
    async fn postgres_integration_create_and_read() {
        let provider = create_provider().await;
        let created = provider
            .create("users", record(json!({"email": unique_email("create")})))
            .await
            .unwrap();
        let id = created["id"].as_str().unwrap();

        let found = provider.find_by_id("users", id).await.unwrap().unwrap();
        assert_eq!(found["email"], created["email"]);
        assert_eq!(found["is_active"], json!(true));
        assert_eq!(found["preferences"], json!({}));
        assert_eq!(found["created_at"], created["created_at"]);
    }

    #[tokio::test]
    async fn postgres_integration_update_merges() {
        let provider = create_provider().await;
        let created = provider
            .create(
                "formations",
                record(json!({"name": "Spiral", "drone_count": 64, "tags": ["a", "b"]})),
            )
            .await
            .unwrap();
        let id = created["id"].as_str().unwrap();

        let updated = provider
            .update("formations", id, record(json!({"rating": 4.5})))
            .await
            .unwrap();
        assert_eq!(updated["name"], json!("Spiral"));
        assert_eq!(updated["tags"], json!(["a", "b"]));
        assert_eq!(updated["rating"], json!(4.5));

        let err = provider
            .update("formations", "missing", record(json!({"rating": 1.0})))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn postgres_integration_delete_is_idempotent() {
        let provider = create_provider().await;
        let created = provider
            .create("bookings", record(json!({"user_id": "u1"})))
            .await
            .unwrap();
        let id = created["id"].as_str().unwrap();

        assert!(provider.delete("bookings", id).await.unwrap());
        assert!(!provider.delete("bookings", id).await.unwrap());
    }

    #[tokio::test]
    async fn postgres_integration_unique_violation() {
        let provider = create_provider().await;
        let email = unique_email("dup");
        provider
            .create("users", record(json!({"email": email})))
            .await
            .unwrap();

        let err = provider
            .create("users", record(json!({"email": email})))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConstraintViolation);
    }

    #[tokio::test]
    async fn postgres_integration_range_query() {
        let provider = create_provider().await;
        let category = format!("range-{}", uuid::Uuid::new_v4().simple());
        for drones in [10, 50, 100] {
            provider
                .create(
                    "formations",
                    record(json!({"name": "R", "drone_count": drones, "category": category})),
                )
                .await
                .unwrap();
        }

        let options = QueryOptions::new()
            .where_eq("category", json!(category))
            .condition("drone_count", Comparison::Gt, json!(10))
            .order_by(OrderBy::desc("drone_count"));
        let rows = provider.find_all("formations", &options).await.unwrap();
        let counts: Vec<i64> = rows
            .iter()
            .map(|r| r["drone_count"].as_i64().unwrap())
            .collect();
        assert_eq!(counts, vec![100, 50]);

        let criteria = record(json!({"category": category}));
        assert_eq!(provider.count("formations", Some(&criteria)).await.unwrap(), 3);
    }

    // ========================================================================
    // Transaction Tests
    // ========================================================================

    #[tokio::test]
    async fn postgres_integration_transaction_rolls_back() {
        let provider = create_provider().await;
        let email = unique_email("rollback");
        let criteria = record(json!({"email": email}));

        let err = provider
            .transaction(|tx| {
                let email = email.clone();
                async move {
                    tx.create("users", record(json!({"email": email}))).await?;
                    Err::<(), _>(StorageError::not_found("users", "forced"))
                }
                .boxed()
            })
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::TransactionAborted);
        assert_eq!(provider.count("users", Some(&criteria)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn postgres_integration_bulk_create_is_atomic() {
        let provider = create_provider().await;
        let email = unique_email("bulk");
        let rows = vec![
            record(json!({"email": email})),
            record(json!({"email": unique_email("bulk")})),
            record(json!({"email": email})),
        ];

        assert!(provider.bulk_create("users", rows).await.is_err());
        let criteria = record(json!({"email": email}));
        assert_eq!(provider.count("users", Some(&criteria)).await.unwrap(), 0);
    }

    // ========================================================================
    // Repository and Health Tests
    // ========================================================================

    #[tokio::test]
    async fn postgres_integration_repositories() {
        let provider: SharedProvider = create_provider().await;
        let repos = Repositories::new(provider);

        let user = repos
            .users
            .create(&NewUser::new(unique_email("repo"), UserType::Artist))
            .await
            .unwrap();
        assert_eq!(repos.users.find_by_id(&user.id).await.unwrap().unwrap(), user);

        let show = repos
            .shows
            .create(
                &NewShow::new("Pg Show")
                    .scheduled(chrono::Utc::now() + chrono::Duration::hours(1)),
            )
            .await
            .unwrap();
        assert!(
            repos
                .shows
                .get_upcoming(100)
                .await
                .unwrap()
                .iter()
                .any(|s| s.id == show.id)
        );

        let job = repos
            .sync_jobs
            .start(&NewSyncJob::new("pg_import", None, 2))
            .await
            .unwrap();
        let job = repos
            .sync_jobs
            .record_progress(
                &job.id,
                SyncProgress {
                    processed_items: 2,
                    successful_items: 2,
                    failed_items: 0,
                },
            )
            .await
            .unwrap();
        assert_eq!(job.successful_items, 2);
    }

    #[tokio::test]
    async fn postgres_integration_health() {
        let provider = create_provider().await;
        assert!(provider.ping().await);

        let stats = provider.stats().await.unwrap();
        assert!(stats.connected);
        assert!(stats.pool.is_some());

        provider.disconnect().await.unwrap();
        assert!(!provider.ping().await);
        assert!(!provider.is_connected());
    }
}
