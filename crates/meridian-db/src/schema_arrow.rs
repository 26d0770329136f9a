//! Arrow schema and conversion utilities for the LanceDB store.

use std::sync::Arc;

use arrow_array::{Array, RecordBatch, StringArray};
use arrow_schema::{DataType, Field, Schema};
use chrono::{DateTime, Utc};

use crate::error::{DbError, Result};
use crate::schema::StoredRecord;

pub fn records_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("collection", DataType::Utf8, false),
        Field::new("natural_key", DataType::Utf8, false),
        Field::new("attributes", DataType::Utf8, false),
        Field::new("created_at", DataType::Utf8, false),
        Field::new("updated_at", DataType::Utf8, false),
    ]))
}

pub fn records_to_batch(records: &[StoredRecord]) -> Result<RecordBatch> {
    let collection = StringArray::from_iter_values(records.iter().map(|r| r.collection.as_str()));
    let natural_key = StringArray::from_iter_values(records.iter().map(|r| r.natural_key.as_str()));
    let attributes = records
        .iter()
        .map(|r| serde_json::to_string(&r.attributes))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    let attributes = StringArray::from(attributes);
    let created_at = StringArray::from_iter_values(records.iter().map(|r| r.created_at.to_rfc3339()));
    let updated_at = StringArray::from_iter_values(records.iter().map(|r| r.updated_at.to_rfc3339()));

    RecordBatch::try_new(
        records_schema(),
        vec![
            Arc::new(collection) as Arc<dyn Array>,
            Arc::new(natural_key),
            Arc::new(attributes),
            Arc::new(created_at),
            Arc::new(updated_at),
        ],
    )
    .map_err(|e| DbError::Arrow(e.to_string()))
}

pub fn batch_to_records(batch: &RecordBatch) -> Result<Vec<StoredRecord>> {
    let column = |name: &str| -> Result<&StringArray> {
        batch
            .column_by_name(name)
            .and_then(|c| c.as_any().downcast_ref::<StringArray>())
            .ok_or_else(|| DbError::Arrow(format!("missing or mistyped column: {name}")))
    };
    let collection = column("collection")?;
    let natural_key = column("natural_key")?;
    let attributes = column("attributes")?;
    let created_at = column("created_at")?;
    let updated_at = column("updated_at")?;

    (0..batch.num_rows())
        .map(|row| {
            Ok(StoredRecord {
                collection: collection
                    .value(row)
                    .parse()
                    .map_err(|e: meridian_common::MeridianError| DbError::Malformed(e.to_string()))?,
                natural_key: natural_key.value(row).to_string(),
                attributes: serde_json::from_str(attributes.value(row))?,
                created_at: parse_ts(created_at.value(row))?,
                updated_at: parse_ts(updated_at.value(row))?,
            })
        })
        .collect()
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DbError::Malformed(format!("bad timestamp {s}: {e}")))
}
