//! Supabase provider implementation.

use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde_json::Value;

use crate::config::{DatabaseConfig, PoolConfig, ProviderConfig, SupabaseConfig};
use crate::core::{
    ChangeCallback, DataAccess, DatabaseProvider, ProviderCapability, ProviderKind, ProviderStats,
    ProviderTransaction, RealtimeProvider, Subscription,
};
use crate::error::{BackendError, ConfigError, StorageError, StorageResult};
use crate::types::{
    ColumnDefinition, ID_COLUMN, QueryOptions, Record, TableDefinition, check_identifier,
    into_record, stamp_new, stamp_update,
};

use super::realtime::{self, Channel};
use super::rest::{
    self, BACKEND, PostgrestError, content_range_total, filter_params, id_list, read_params,
};

const CAPABILITIES: &[ProviderCapability] = &[
    ProviderCapability::Crud,
    ProviderCapability::Bulk,
    ProviderCapability::Ordering,
    ProviderCapability::Pagination,
    ProviderCapability::Projection,
    ProviderCapability::RangeQueries,
    ProviderCapability::Realtime,
];

/// Supabase provider.
///
/// Data goes through the PostgREST API at `<url>/rest/v1`; change feeds use
/// the Realtime WebSocket. HTTP connections are pooled by the reqwest client.
///
/// `bulk_create` and `bulk_delete` are single requests and therefore
/// atomic. `bulk_update` issues one request per row and is **not** atomic:
/// rows updated before a failure stay updated.
pub struct SupabaseProvider {
    config: SupabaseConfig,
    pool_config: PoolConfig,
    connect_timeout: Duration,
    client: RwLock<Option<Client>>,
}

impl Debug for SupabaseProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupabaseProvider")
            .field("config", &self.config)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

impl SupabaseProvider {
    /// Creates an unconnected provider.
    pub fn new(config: SupabaseConfig, pool_config: PoolConfig, connect_timeout: Duration) -> Self {
        Self {
            config,
            pool_config,
            connect_timeout,
            client: RwLock::new(None),
        }
    }

    /// Creates an unconnected provider from a full configuration.
    pub fn from_config(config: &DatabaseConfig) -> StorageResult<Self> {
        match &config.provider {
            ProviderConfig::Supabase(supabase) => Ok(Self::new(
                supabase.clone(),
                config.pool,
                config.connect_timeout(),
            )),
            other => Err(ConfigError::InvalidValue {
                key: "DATABASE_PROVIDER".to_string(),
                value: other.kind().to_string(),
                reason: "expected supabase".to_string(),
            }
            .into()),
        }
    }

    fn timeout_ms(&self) -> u64 {
        self.connect_timeout.as_millis() as u64
    }

    fn client(&self) -> StorageResult<Client> {
        self.client.read().clone().ok_or_else(|| {
            StorageError::Backend(BackendError::Unavailable {
                backend_name: BACKEND.to_string(),
                message: "provider is not connected".to_string(),
            })
        })
    }

    fn build_client(&self) -> StorageResult<Client> {
        Client::builder()
            .pool_max_idle_per_host(self.pool_config.max as usize)
            .pool_idle_timeout(self.pool_config.idle_timeout())
            .connect_timeout(self.connect_timeout)
            .user_agent(concat!("flock-persistence/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| {
                StorageError::Backend(BackendError::ConnectionFailed {
                    backend_name: BACKEND.to_string(),
                    message: format!("failed to build http client: {}", e),
                })
            })
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        let key = self.config.api_key();
        builder.header("apikey", key).bearer_auth(key)
    }

    /// Builds a request against `<url>/rest/v1/<table>`.
    fn request(&self, method: Method, table: &str) -> StorageResult<RequestBuilder> {
        check_identifier(table)?;
        let profile = if method == Method::GET || method == Method::HEAD {
            "Accept-Profile"
        } else {
            "Content-Profile"
        };
        let url = format!("{}/rest/v1/{}", self.config.url, table);
        let builder = self.client()?.request(method, url);
        Ok(self.authorize(builder).header(profile, &self.config.schema))
    }

    /// Sends a request and turns non-success statuses into storage errors.
    async fn send(
        &self,
        table: &str,
        operation: &str,
        builder: RequestBuilder,
    ) -> StorageResult<Response> {
        let response = builder
            .send()
            .await
            .map_err(|e| rest::transport(operation, e, self.timeout_ms()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.json::<PostgrestError>().await.unwrap_or_default();
        let err = rest::classify(table, status, body);
        tracing::debug!(
            table,
            operation,
            status = status.as_u16(),
            error = %err,
            "postgrest request failed"
        );
        Err(err)
    }

    async fn rows(
        &self,
        table: &str,
        operation: &str,
        builder: RequestBuilder,
    ) -> StorageResult<Vec<Record>> {
        let response = self.send(table, operation, builder).await?;
        let values: Vec<Value> = response
            .json()
            .await
            .map_err(|e| rest::transport(operation, e, self.timeout_ms()))?;
        values.into_iter().map(|v| into_record(table, v)).collect()
    }

    /// Probes the REST root, bounded by the connect timeout.
    async fn probe(&self, client: &Client) -> StorageResult<()> {
        let url = format!("{}/rest/v1/", self.config.url);
        let builder = self.authorize(client.get(url)).timeout(self.connect_timeout);
        self.send("<root>", "connect", builder).await.map(|_| ())
    }

    fn unsupported(capability: ProviderCapability) -> StorageError {
        StorageError::unsupported(BACKEND, capability.to_string())
    }
}

#[async_trait]
impl DataAccess for SupabaseProvider {
    async fn find_by_id(&self, table: &str, id: &str) -> StorageResult<Option<Record>> {
        let builder = self.request(Method::GET, table)?.query(&[
            ("select", "*".to_string()),
            (ID_COLUMN, format!("eq.{}", id)),
            ("limit", "1".to_string()),
        ]);
        Ok(self.rows(table, "find_by_id", builder).await?.into_iter().next())
    }

    async fn find_all(&self, table: &str, options: &QueryOptions) -> StorageResult<Vec<Record>> {
        options.validate()?;
        let builder = self.request(Method::GET, table)?.query(&read_params(options));
        self.rows(table, "find_all", builder).await
    }

    async fn create(&self, table: &str, data: Record) -> StorageResult<Record> {
        let builder = self
            .request(Method::POST, table)?
            .header("Prefer", "return=representation")
            .json(&stamp_new(data));
        self.rows(table, "create", builder)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| {
                StorageError::Backend(BackendError::QueryError {
                    backend_name: BACKEND.to_string(),
                    message: format!("insert into '{}' returned no row", table),
                })
            })
    }

    async fn update(&self, table: &str, id: &str, partial: Record) -> StorageResult<Record> {
        let builder = self
            .request(Method::PATCH, table)?
            .query(&[(ID_COLUMN, format!("eq.{}", id))])
            .header("Prefer", "return=representation")
            .json(&stamp_update(partial));
        self.rows(table, "update", builder)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| StorageError::not_found(table, id))
    }

    async fn delete(&self, table: &str, id: &str) -> StorageResult<bool> {
        let builder = self
            .request(Method::DELETE, table)?
            .query(&[(ID_COLUMN, format!("eq.{}", id))])
            .header("Prefer", "return=representation");
        Ok(!self.rows(table, "delete", builder).await?.is_empty())
    }

    async fn count(&self, table: &str, criteria: Option<&Record>) -> StorageResult<u64> {
        let options = QueryOptions::new().with_criteria(criteria.cloned().unwrap_or_default());
        options.validate()?;

        let builder = self
            .request(Method::HEAD, table)?
            .query(&[("select", "id".to_string())])
            .query(&filter_params(&options.filters, &options))
            .header("Prefer", "count=exact");
        let response = self.send(table, "count", builder).await?;

        content_range_total(response.headers()).ok_or_else(|| {
            StorageError::Backend(BackendError::QueryError {
                backend_name: BACKEND.to_string(),
                message: format!("count on '{}' returned no Content-Range total", table),
            })
        })
    }

    async fn query(&self, _sql: &str, _params: &[Value]) -> StorageResult<Vec<Record>> {
        Err(Self::unsupported(ProviderCapability::RawSql))
    }

    async fn execute(&self, _sql: &str, _params: &[Value]) -> StorageResult<u64> {
        Err(Self::unsupported(ProviderCapability::RawSql))
    }
}

#[async_trait]
impl DatabaseProvider for SupabaseProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Supabase
    }

    fn capabilities(&self) -> &'static [ProviderCapability] {
        CAPABILITIES
    }

    async fn connect(&self) -> StorageResult<()> {
        if self.is_connected() {
            return Ok(());
        }

        let client = self.build_client()?;
        self.probe(&client).await?;

        let mut slot = self.client.write();
        if slot.is_none() {
            *slot = Some(client);
            tracing::info!(
                url = %self.config.url,
                schema = %self.config.schema,
                "supabase provider connected"
            );
        }
        Ok(())
    }

    async fn disconnect(&self) -> StorageResult<()> {
        if self.client.write().take().is_some() {
            tracing::info!("supabase provider disconnected");
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.client.read().is_some()
    }

    async fn ping(&self) -> bool {
        let Ok(client) = self.client() else {
            return false;
        };
        match self.probe(&client).await {
            Ok(()) => true,
            Err(err) => {
                tracing::debug!(error = %err, "supabase ping failed");
                false
            }
        }
    }

    async fn begin_transaction(&self) -> StorageResult<Box<dyn ProviderTransaction>> {
        Err(Self::unsupported(ProviderCapability::Transactions))
    }

    /// One POST carrying every row. PostgREST inserts them in one statement.
    async fn bulk_create(&self, table: &str, rows: Vec<Record>) -> StorageResult<Vec<Record>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let stamped: Vec<Record> = rows.into_iter().map(stamp_new).collect();
        let builder = self
            .request(Method::POST, table)?
            .header("Prefer", "return=representation")
            .json(&stamped);
        self.rows(table, "bulk_create", builder).await
    }

    /// One PATCH per row. Not atomic.
    async fn bulk_update(
        &self,
        table: &str,
        updates: Vec<(String, Record)>,
    ) -> StorageResult<Vec<Record>> {
        let mut updated = Vec::with_capacity(updates.len());
        for (id, partial) in updates {
            updated.push(self.update(table, &id, partial).await?);
        }
        Ok(updated)
    }

    /// One DELETE with an `in` filter.
    async fn bulk_delete(&self, table: &str, ids: &[String]) -> StorageResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let builder = self
            .request(Method::DELETE, table)?
            .query(&[(ID_COLUMN, id_list(ids))])
            .header("Prefer", "return=representation");
        Ok(self.rows(table, "bulk_delete", builder).await?.len() as u64)
    }

    fn as_realtime(&self) -> Option<&dyn RealtimeProvider> {
        Some(self)
    }

    async fn has_table(&self, table: &str) -> StorageResult<bool> {
        let builder = self
            .request(Method::GET, table)?
            .query(&[("select", "*"), ("limit", "0")]);
        match self.send(table, "has_table", builder).await {
            Ok(_) => Ok(true),
            Err(StorageError::Backend(BackendError::QueryError { ref message, .. }))
                if message.contains("42P01") || message.contains("PGRST205") =>
            {
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    async fn create_table(&self, _definition: &TableDefinition) -> StorageResult<()> {
        Err(Self::unsupported(ProviderCapability::SchemaDdl))
    }

    async fn drop_table(&self, _table: &str) -> StorageResult<()> {
        Err(Self::unsupported(ProviderCapability::SchemaDdl))
    }

    async fn add_column(&self, _table: &str, _column: &ColumnDefinition) -> StorageResult<()> {
        Err(Self::unsupported(ProviderCapability::SchemaDdl))
    }

    async fn drop_column(&self, _table: &str, _column: &str) -> StorageResult<()> {
        Err(Self::unsupported(ProviderCapability::SchemaDdl))
    }

    async fn stats(&self) -> StorageResult<ProviderStats> {
        Ok(ProviderStats {
            provider: self.name().to_string(),
            connected: self.is_connected(),
            pool: None,
        })
    }
}

#[async_trait]
impl RealtimeProvider for SupabaseProvider {
    /// Joins the table's change feed. The socket is independent of the REST
    /// client and survives `disconnect`; drop the subscription to stop it.
    async fn subscribe(
        &self,
        table: &str,
        callback: ChangeCallback,
    ) -> StorageResult<Subscription> {
        check_identifier(table)?;
        let channel = Channel::new(
            &self.config.url,
            self.config.api_key(),
            &self.config.schema,
            table,
            self.connect_timeout,
        )?;
        let socket = channel.open().await?;
        tracing::info!(table, "realtime subscription joined");

        let task = tokio::spawn(realtime::run(channel, socket, callback));
        Ok(Subscription::new(table, task))
    }
}
