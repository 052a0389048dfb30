//! Generic table-bound repository.

use std::fmt;
use std::marker::PhantomData;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{ConstraintError, StorageError, StorageResult};
use crate::factory::SharedProvider;
use crate::models::Entity;
use crate::types::{QueryOptions, Record, into_record};

/// Serializes `value` into a record for `table`.
pub fn to_record<T: Serialize + ?Sized>(table: &str, value: &T) -> StorageResult<Record> {
    into_record(table, serde_json::to_value(value)?)
}

/// Deserializes a stored record.
pub fn from_record<E: DeserializeOwned>(record: Record) -> StorageResult<E> {
    Ok(serde_json::from_value(Value::Object(record))?)
}

/// Builds an equality criteria record.
pub fn criteria<'a, I>(pairs: I) -> Record
where
    I: IntoIterator<Item = (&'a str, Value)>,
{
    pairs
        .into_iter()
        .map(|(column, value)| (column.to_string(), value))
        .collect()
}

pub(crate) fn invariant(table: &str, message: impl Into<String>) -> StorageError {
    StorageError::Constraint(ConstraintError::InvariantViolation {
        table: table.to_string(),
        message: message.into(),
    })
}

/// Typed CRUD over one entity table.
///
/// All persistence goes through the provider contract; the repository only
/// maps between records and `E`.
pub struct Repository<E> {
    provider: SharedProvider,
    entity: PhantomData<fn() -> E>,
}

impl<E> Clone for Repository<E> {
    fn clone(&self) -> Self {
        Self {
            provider: self.provider.clone(),
            entity: PhantomData,
        }
    }
}

impl<E: Entity> fmt::Debug for Repository<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Repository")
            .field("table", &E::TABLE)
            .field("provider", &self.provider.name())
            .finish()
    }
}

impl<E: Entity> Repository<E> {
    /// Binds `E`'s table on `provider`.
    pub fn new(provider: SharedProvider) -> Self {
        Self {
            provider,
            entity: PhantomData,
        }
    }

    /// The bound table.
    pub fn table(&self) -> &'static str {
        E::TABLE
    }

    /// The underlying provider.
    pub fn provider(&self) -> &SharedProvider {
        &self.provider
    }

    /// Looks up a entity by id.
    pub async fn find_by_id(&self, id: &str) -> StorageResult<Option<E>> {
        self.provider
            .find_by_id(E::TABLE, id)
            .await?
            .map(from_record)
            .transpose()
    }

    /// Entities shaped by `options`.
    pub async fn find_all(&self, options: &QueryOptions) -> StorageResult<Vec<E>> {
        let records = self.provider.find_all(E::TABLE, options).await?;
        records.into_iter().map(from_record).collect()
    }

    /// Rows matching every criterion, shaped by `options`.
    pub async fn find_by(&self, criteria: Record, options: &QueryOptions) -> StorageResult<Vec<E>> {
        let records = self.provider.find_by(E::TABLE, &criteria, options).await?;
        records.into_iter().map(from_record).collect()
    }

    /// First row matching `criteria`.
    pub async fn find_one(&self, criteria: Record) -> StorageResult<Option<E>> {
        self.provider
            .find_one(E::TABLE, &criteria)
            .await?
            .map(from_record)
            .transpose()
    }

    /// Rows as plain records, for aggregations that only need a few columns.
    pub async fn find_records(&self, options: &QueryOptions) -> StorageResult<Vec<Record>> {
        self.provider.find_all(E::TABLE, options).await
    }

    /// Inserts `input`; the layer assigns `id` and timestamps.
    pub async fn create<N: Serialize + Sync>(&self, input: &N) -> StorageResult<E> {
        let record = to_record(E::TABLE, input)?;
        from_record(self.provider.create(E::TABLE, record).await?)
    }

    /// Applies the fields set in `patch`.
    pub async fn update<P: Serialize + Sync>(&self, id: &str, patch: &P) -> StorageResult<E> {
        let record = to_record(E::TABLE, patch)?;
        self.update_fields(id, record).await
    }

    /// Applies raw column values.
    pub async fn update_fields(&self, id: &str, fields: Record) -> StorageResult<E> {
        from_record(self.provider.update(E::TABLE, id, fields).await?)
    }

    /// Deletes a entity. Returns false if it was already gone.
    pub async fn delete(&self, id: &str) -> StorageResult<bool> {
        self.provider.delete(E::TABLE, id).await
    }

    /// Counts entities, optionally filtered by `criteria`.
    pub async fn count(&self, criteria: Option<&Record>) -> StorageResult<u64> {
        self.provider.count(E::TABLE, criteria).await
    }

    /// Inserts every input or none.
    pub async fn bulk_create<N: Serialize + Sync>(&self, inputs: &[N]) -> StorageResult<Vec<E>> {
        let records = inputs
            .iter()
            .map(|input| to_record(E::TABLE, input))
            .collect::<StorageResult<Vec<_>>>()?;
        let created = self.provider.bulk_create(E::TABLE, records).await?;
        created.into_iter().map(from_record).collect()
    }
}
