//! Supabase provider integration tests.
//!
//! PostgREST is replaced by a wiremock server and Realtime by a local
//! WebSocket listener, so these tests run without network access.

#![cfg(feature = "supabase")]

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use flock_persistence::backends::supabase::SupabaseProvider;
use flock_persistence::config::{DatabaseConfig, PoolConfig, ProviderConfig, SupabaseConfig};
use flock_persistence::core::{
    ChangeCallback, ChangeType, DataAccess, DatabaseProvider, ProviderCapability,
};
use flock_persistence::error::{BackendError, ErrorKind, StorageError};
use flock_persistence::factory::{DatabaseFactory, HealthStatus};
use flock_persistence::types::{OrderBy, QueryOptions, Record};

const ANON_KEY: &str = "anon-key";

fn create_provider(url: &str) -> SupabaseProvider {
    SupabaseProvider::new(
        SupabaseConfig::new(url, ANON_KEY),
        PoolConfig::default(),
        Duration::from_secs(2),
    )
}

async fn mount_root(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/rest/v1/"))
        .and(header("apikey", ANON_KEY))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(server)
        .await;
}

async fn connected_provider(server: &MockServer) -> SupabaseProvider {
    mount_root(server).await;
    let provider = create_provider(&server.uri());
    provider.connect().await.expect("Failed to connect");
    provider
}

fn record(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        other => panic!("expected an object, got {}", other),
    }
}

// ============================================================================
// Lifecycle Tests
// ============================================================================

#[tokio::test]
async fn test_connect_and_ping() {
    let server = MockServer::start().await;
    let provider = connected_provider(&server).await;

    assert!(provider.is_connected());
    assert!(provider.ping().await);
    assert_eq!(provider.name(), "supabase");
    assert!(provider.supports(ProviderCapability::Realtime));
    assert!(!provider.supports(ProviderCapability::Transactions));

    provider.disconnect().await.unwrap();
    assert!(!provider.ping().await);
}

#[tokio::test]
async fn test_connect_rejected_key() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/"))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(json!({"message": "Invalid API key"})),
        )
        .mount(&server)
        .await;

    let provider = create_provider(&server.uri());
    let err = provider.connect().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connection);
    assert!(!provider.is_connected());
}

#[tokio::test]
async fn test_factory_initializes_supabase() {
    let server = MockServer::start().await;
    mount_root(&server).await;

    let config = DatabaseConfig::new(ProviderConfig::Supabase(SupabaseConfig::new(
        server.uri(),
        ANON_KEY,
    )));
    let factory = DatabaseFactory::new();
    let provider = factory.initialize_database(&config).await.unwrap();
    assert!(provider.as_realtime().is_some());

    let report = factory.check_database_health().await;
    assert!(report.status.is_available());

    let stats = factory.get_database_stats().await.unwrap();
    assert!(stats.pool.is_none());
}

async fn mount_slow_root(server: &MockServer, delay: Duration) {
    Mock::given(method("GET"))
        .and(path("/rest/v1/"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({}))
                .set_delay(delay),
        )
        .mount(server)
        .await;
}

fn supabase_config(server: &MockServer) -> DatabaseConfig {
    let mut config = DatabaseConfig::new(ProviderConfig::Supabase(SupabaseConfig::new(
        server.uri(),
        ANON_KEY,
    )));
    config.connect_timeout_ms = 5_000;
    config
}

#[tokio::test]
async fn test_factory_concurrent_initialize_connects_once() {
    let server = MockServer::start().await;
    mount_slow_root(&server, Duration::from_millis(100)).await;

    let config = supabase_config(&server);
    let factory = Arc::new(DatabaseFactory::new());
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
    assert!(providers.iter().all(|p| Arc::ptr_eq(p, &providers[0])));

    // One connect probe plus one verifying ping.
    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
}

#[tokio::test]
async fn test_factory_reports_degraded_on_slow_ping() {
    let server = MockServer::start().await;
    mount_slow_root(&server, Duration::from_millis(300)).await;

    let mut config = supabase_config(&server);
    config.health_latency_threshold_ms = 50;
    let factory = DatabaseFactory::new();
    factory.initialize_database(&config).await.unwrap();

    let report = factory.check_database_health().await;
    assert_eq!(report.status, HealthStatus::Degraded);
    assert!(report.status.is_available());
    assert!(report.latency_ms.unwrap() >= 300);
    assert!(!report.message.unwrap_or_default().is_empty());
}

// ============================================================================
// CRUD Tests
// ============================================================================

#[tokio::test]
async fn test_find_by_id() {
    let server = MockServer::start().await;
    let provider = connected_provider(&server).await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/users"))
        .and(query_param("id", "eq.u1"))
        .and(query_param("limit", "1"))
        .and(header("Accept-Profile", "public"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([{"id": "u1", "email": "a@example.com"}])),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/users"))
        .and(query_param("id", "eq.missing"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let user = provider.find_by_id("users", "u1").await.unwrap().unwrap();
    assert_eq!(user["email"], json!("a@example.com"));
    assert!(provider.find_by_id("users", "missing").await.unwrap().is_none());
}

#[tokio::test]
async fn test_find_all_encodes_options() {
    let server = MockServer::start().await;
    let provider = connected_provider(&server).await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/formations"))
        .and(query_param("select", "id,name"))
        .and(query_param("category", "eq.space"))
        .and(query_param("order", "name.asc,id.asc"))
        .and(query_param("limit", "2"))
        .and(query_param("offset", "4"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([{"id": "f1", "name": "Comet"}])),
        )
        .expect(1)
        .mount(&server)
        .await;

    let options = QueryOptions::new()
        .select(["id", "name"])
        .where_eq("category", json!("space"))
        .order_by(OrderBy::asc("name"))
        .limit(2)
        .offset(4);
    let rows = provider.find_all("formations", &options).await.unwrap();
    assert_eq!(rows.len(), 1);
}

#[tokio::test]
async fn test_create_returns_representation() {
    let server = MockServer::start().await;
    let provider = connected_provider(&server).await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/shows"))
        .and(header("Prefer", "return=representation"))
        .and(header("Content-Profile", "public"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([
            {"id": "s1", "name": "Harbor", "status": "draft"}
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let created = provider
        .create("shows", record(json!({"name": "Harbor"})))
        .await
        .unwrap();
    assert_eq!(created["id"], json!("s1"));

    let requests = server.received_requests().await.unwrap();
    let insert = requests
        .iter()
        .find(|r| r.method.as_str() == "POST")
        .unwrap();
    let body: Value = serde_json::from_slice(&insert.body).unwrap();
    assert!(body["id"].is_string());
    assert_eq!(body["created_at"], body["updated_at"]);
}

#[tokio::test]
async fn test_update_and_delete_missing_rows() {
    let server = MockServer::start().await;
    let provider = connected_provider(&server).await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/bookings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/rest/v1/bookings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let err = provider
        .update("bookings", "b1", record(json!({"status": "quoted"})))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(!provider.delete("bookings", "b1").await.unwrap());
}

#[tokio::test]
async fn test_count_reads_content_range() {
    let server = MockServer::start().await;
    let provider = connected_provider(&server).await;

    Mock::given(method("HEAD"))
        .and(path("/rest/v1/users"))
        .and(query_param("user_type", "eq.artist"))
        .and(header("Prefer", "count=exact"))
        .respond_with(ResponseTemplate::new(200).insert_header("Content-Range", "0-9/42"))
        .mount(&server)
        .await;

    let criteria = record(json!({"user_type": "artist"}));
    assert_eq!(provider.count("users", Some(&criteria)).await.unwrap(), 42);
}

#[tokio::test]
async fn test_bulk_create_is_one_request() {
    let server = MockServer::start().await;
    let provider = connected_provider(&server).await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/formations"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([
            {"id": "f1", "name": "A"},
            {"id": "f2", "name": "B"}
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let rows = vec![record(json!({"name": "A"})), record(json!({"name": "B"}))];
    let created = provider.bulk_create("formations", rows).await.unwrap();
    assert_eq!(created.len(), 2);
}

#[tokio::test]
async fn test_bulk_delete_uses_in_filter() {
    let server = MockServer::start().await;
    let provider = connected_provider(&server).await;

    Mock::given(method("DELETE"))
        .and(path("/rest/v1/formations"))
        .and(query_param("id", "in.(\"f1\",\"f2\")"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": "f1"}])))
        .expect(1)
        .mount(&server)
        .await;

    let ids = vec!["f1".to_string(), "f2".to_string()];
    assert_eq!(provider.bulk_delete("formations", &ids).await.unwrap(), 1);
}

// ============================================================================
// Error Mapping Tests
// ============================================================================

#[tokio::test]
async fn test_unique_violation_is_classified() {
    let server = MockServer::start().await;
    let provider = connected_provider(&server).await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/users"))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({
            "code": "23505",
            "message": "duplicate key value violates unique constraint \"users_email_key\"",
            "details": "Key (email)=(dup@example.com) already exists.",
            "hint": null
        })))
        .mount(&server)
        .await;

    let err = provider
        .create("users", record(json!({"email": "dup@example.com"})))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConstraintViolation);
}

#[tokio::test]
async fn test_server_errors_are_connection_errors() {
    let server = MockServer::start().await;
    let provider = connected_provider(&server).await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/shows"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = provider
        .find_all("shows", &QueryOptions::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connection);
}

#[tokio::test]
async fn test_has_table() {
    let server = MockServer::start().await;
    let provider = connected_provider(&server).await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/users"))
        .and(query_param("limit", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/ghosts"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "code": "42P01",
            "message": "relation \"public.ghosts\" does not exist"
        })))
        .mount(&server)
        .await;

    assert!(provider.has_table("users").await.unwrap());
    assert!(!provider.has_table("ghosts").await.unwrap());
}

#[tokio::test]
async fn test_unsupported_operations() {
    let server = MockServer::start().await;
    let provider = connected_provider(&server).await;

    let err = provider.begin_transaction().await.err().unwrap();
    assert!(matches!(
        err,
        StorageError::Backend(BackendError::UnsupportedCapability { .. })
    ));
    assert!(provider.query("SELECT 1", &[]).await.is_err());
    assert!(provider.drop_table("users").await.is_err());
}

// ============================================================================
// Realtime Tests
// ============================================================================

/// Accepts one socket, acknowledges the join and pushes one insert.
async fn realtime_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

        let join = ws.next().await.unwrap().unwrap();
        let join: Value = serde_json::from_str(join.to_text().unwrap()).unwrap();
        assert_eq!(join["event"], json!("phx_join"));
        let topic = join["topic"].clone();

        let reply = json!({
            "topic": topic,
            "event": "phx_reply",
            "payload": {"status": "ok", "response": {}},
            "ref": join["ref"]
        });
        ws.send(Message::Text(reply.to_string().into())).await.unwrap();

        let change = json!({
            "topic": topic,
            "event": "postgres_changes",
            "payload": {
                "data": {
                    "type": "INSERT",
                    "table": "shows",
                    "schema": "public",
                    "record": {"id": "s1", "name": "Harbor"},
                    "old_record": {},
                    "commit_timestamp": "2026-05-01T20:00:00Z"
                }
            },
            "ref": null
        });
        ws.send(Message::Text(change.to_string().into())).await.unwrap();

        while let Some(Ok(_)) = ws.next().await {}
    });

    format!("http://{}", addr)
}

#[tokio::test]
async fn test_realtime_subscription_delivers_changes() {
    let url = realtime_server().await;
    let provider = create_provider(&url);

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let callback: ChangeCallback = Arc::new(move |event| {
        let _ = tx.send(event);
    });

    let subscription = provider
        .as_realtime()
        .unwrap()
        .subscribe("shows", callback)
        .await
        .unwrap();
    assert_eq!(subscription.table(), "shows");
    assert!(subscription.is_active());

    let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("no change delivered")
        .unwrap();
    assert_eq!(event.change_type, ChangeType::Insert);
    assert_eq!(event.new.unwrap()["name"], json!("Harbor"));

    subscription.unsubscribe();
}

#[tokio::test]
async fn test_realtime_join_timeout() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        while let Some(Ok(_)) = ws.next().await {}
    });

    let provider = SupabaseProvider::new(
        SupabaseConfig::new(format!("http://{}", addr), ANON_KEY),
        PoolConfig::default(),
        Duration::from_millis(200),
    );
    let callback: ChangeCallback = Arc::new(|_| {});
    let err = provider
        .as_realtime()
        .unwrap()
        .subscribe("shows", callback)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connection);
}
