//! Table definitions for every entity and an idempotent bootstrap.
//!
//! Used by setup tooling (`flock-db migrate`) and tests, never by request
//! handling. Columns that entities read as plain numbers, flags, lists or
//! enums are `NOT NULL` with a default, so partially written rows still
//! deserialize.

use serde::Serialize;

use crate::core::{DatabaseProvider, ProviderCapability};
use crate::error::StorageResult;
use crate::models::{
    AnalyticsEvent, Booking, Entity, Formation, Organization, Show, SyncJob, User,
};
use crate::types::{ColumnDefinition, ColumnType, TableDefinition};

fn text(name: &str) -> ColumnDefinition {
    ColumnDefinition::new(name, ColumnType::Text)
}

fn required_text(name: &str) -> ColumnDefinition {
    text(name).not_null()
}

fn counter(name: &str) -> ColumnDefinition {
    ColumnDefinition::new(name, ColumnType::Integer)
        .not_null()
        .default_value("0")
}

fn measure(name: &str) -> ColumnDefinition {
    ColumnDefinition::new(name, ColumnType::Real)
        .not_null()
        .default_value("0")
}

fn flag(name: &str, default: bool) -> ColumnDefinition {
    ColumnDefinition::new(name, ColumnType::Boolean)
        .not_null()
        .default_value(if default { "TRUE" } else { "FALSE" })
}

fn json_object(name: &str) -> ColumnDefinition {
    ColumnDefinition::new(name, ColumnType::Json)
        .not_null()
        .default_value("'{}'")
}

fn json_list(name: &str) -> ColumnDefinition {
    ColumnDefinition::new(name, ColumnType::Json)
        .not_null()
        .default_value("'[]'")
}

fn status(default: &str) -> ColumnDefinition {
    required_text("status").default_value(format!("'{}'", default))
}

fn timestamp(name: &str) -> ColumnDefinition {
    ColumnDefinition::new(name, ColumnType::Timestamp)
}

/// `users`
pub fn users() -> TableDefinition {
    TableDefinition::new(User::TABLE)
        .column(required_text("email").unique())
        .column(text("password_hash"))
        .column(text("full_name"))
        .column(required_text("user_type").default_value("'customer'"))
        .column(flag("is_verified", false))
        .column(flag("is_active", true))
        .column(json_object("preferences"))
        .column(timestamp("last_login_at"))
}

/// `formations`
pub fn formations() -> TableDefinition {
    TableDefinition::new(Formation::TABLE)
        .column(required_text("name"))
        .column(text("description"))
        .column(text("category"))
        .column(counter("drone_count"))
        .column(measure("duration"))
        .column(ColumnDefinition::new("price", ColumnType::Real))
        .column(flag("is_public", false))
        .column(json_list("tags"))
        .column(text("source"))
        .column(text("source_id"))
        .column(json_object("data"))
        .column(text("created_by"))
        .column(counter("downloads"))
        .column(measure("rating"))
}

/// `organizations`
pub fn organizations() -> TableDefinition {
    TableDefinition::new(Organization::TABLE)
        .column(required_text("name"))
        .column(required_text("slug").unique())
        .column(required_text("owner_id"))
        .column(text("subscription_plan"))
        .column(text("subscription_status"))
        .column(json_object("settings"))
}

/// `shows`
pub fn shows() -> TableDefinition {
    TableDefinition::new(Show::TABLE)
        .column(required_text("name"))
        .column(text("description"))
        .column(text("organization_id"))
        .column(text("created_by"))
        .column(status("draft"))
        .column(timestamp("scheduled_at"))
        .column(text("location"))
        .column(json_list("formations"))
        .column(counter("drone_count"))
        .column(measure("duration"))
        .column(ColumnDefinition::new("total_cost", ColumnType::Real))
        .column(json_list("crew"))
}

/// `bookings`
pub fn bookings() -> TableDefinition {
    TableDefinition::new(Booking::TABLE)
        .column(required_text("user_id"))
        .column(text("show_id"))
        .column(timestamp("event_date"))
        .column(text("location"))
        .column(status("pending"))
        .column(ColumnDefinition::new("quoted_price", ColumnType::Real))
        .column(text("notes"))
}

/// `sync_jobs`
pub fn sync_jobs() -> TableDefinition {
    TableDefinition::new(SyncJob::TABLE)
        .column(required_text("job_type"))
        .column(text("source"))
        .column(status("pending"))
        .column(counter("total_items"))
        .column(counter("processed_items"))
        .column(counter("successful_items"))
        .column(counter("failed_items"))
        .column(text("error_message"))
        .column(timestamp("started_at"))
        .column(timestamp("completed_at"))
}

/// `analytics_events`
pub fn analytics_events() -> TableDefinition {
    TableDefinition::new(AnalyticsEvent::TABLE)
        .column(required_text("event_type"))
        .column(text("entity_type"))
        .column(text("entity_id"))
        .column(text("user_id"))
        .column(json_object("metadata"))
}

/// Every entity table, in creation order.
pub fn all_tables() -> Vec<TableDefinition> {
    vec![
        users(),
        organizations(),
        formations(),
        shows(),
        bookings(),
        sync_jobs(),
        analytics_events(),
    ]
}

/// Outcome of [`ensure_schema`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchemaReport {
    /// Tables created by this run.
    pub created: Vec<String>,
    /// Tables that already existed.
    pub existing: Vec<String>,
    /// Tables that are absent and cannot be created through this provider.
    pub missing: Vec<String>,
}

impl SchemaReport {
    /// Returns true when every table is present.
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

/// Creates any entity table that does not exist yet.
///
/// Providers without DDL support are only checked; their absent tables are
/// reported in [`SchemaReport::missing`].
pub async fn ensure_schema(provider: &dyn DatabaseProvider) -> StorageResult<SchemaReport> {
    let can_create = provider.supports(ProviderCapability::SchemaDdl);
    let mut report = SchemaReport::default();

    for table in all_tables() {
        if provider.has_table(&table.name).await? {
            report.existing.push(table.name);
        } else if can_create {
            provider.create_table(&table).await?;
            tracing::info!(table = %table.name, "created table");
            report.created.push(table.name);
        } else {
            tracing::warn!(
                table = %table.name,
                provider = provider.name(),
                "table missing and provider cannot create it"
            );
            report.missing.push(table.name);
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_tables_are_valid() {
        for table in all_tables() {
            table.validate().unwrap();
            assert!(table.find_column("id").is_some());
            assert!(table.find_column("created_at").is_some());
        }
    }

    #[test]
    fn test_users_email_is_unique() {
        let sql = users().create_sql(|t| t.postgres_type());
        assert!(sql.contains("\"email\" TEXT NOT NULL UNIQUE"));
        assert!(sql.contains("\"is_active\" BOOLEAN NOT NULL DEFAULT TRUE"));
        assert!(sql.contains("\"preferences\" JSONB NOT NULL DEFAULT '{}'"));
    }

    #[cfg(feature = "sqlite")]
    #[tokio::test]
    async fn test_ensure_schema_is_idempotent() {
        use crate::backends::sqlite::SqliteProvider;

        let provider = SqliteProvider::in_memory().await.unwrap();
        let first = ensure_schema(&provider).await.unwrap();
        assert_eq!(first.created.len(), 7);
        assert!(first.is_complete());

        let second = ensure_schema(&provider).await.unwrap();
        assert!(second.created.is_empty());
        assert_eq!(second.existing.len(), 7);
    }
}
