//! Database schema and metric row definitions
//!
//! One row per `(type, name)` pair. Counters keep their running total in
//! `delta`, gauges their last value in `value`; the other column is NULL.

use crate::metric::{MetricKind, MetricRecord};
use crate::storage::error::StorageResult;

/// Idempotent table creation, run on every connect
pub const CREATE_METRICS_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS metrics (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        "type" TEXT NOT NULL,
        "name" TEXT NOT NULL,
        value DOUBLE PRECISION NULL,
        delta BIGINT NULL,
        CONSTRAINT metrics_unique UNIQUE ("type", "name")
    )
"#;

/// Atomic insert-or-aggregate for one record
///
/// Gauges overwrite `value`; counters add the incoming delta to the stored
/// one. Used by both single and batch saves so concurrent increments of the
/// same counter never read a stale total.
///
/// The sum saturates at the `i64` bounds like `metric::accumulate`; a plain
/// `+` would overflow into a REAL that no longer decodes as a counter.
pub const UPSERT_METRIC: &str = r#"
    INSERT INTO metrics ("type", "name", value, delta)
    VALUES (?, ?, ?, ?)
    ON CONFLICT ("type", "name") DO UPDATE SET
        value = excluded.value,
        delta = CASE
            WHEN excluded.delta > 0
                AND metrics.delta > 9223372036854775807 - excluded.delta
                THEN 9223372036854775807
            WHEN excluded.delta < 0
                AND metrics.delta < (-9223372036854775807 - 1) - excluded.delta
                THEN (-9223372036854775807 - 1)
            ELSE metrics.delta + excluded.delta
        END
"#;

pub const SELECT_METRIC: &str = r#"
    SELECT "type", "name", value, delta
    FROM metrics
    WHERE "type" = ? AND "name" = ?
"#;

pub const SELECT_ALL_METRICS: &str = r#"
    SELECT "type", "name", value, delta
    FROM metrics
    ORDER BY "type", "name" ASC
"#;

/// A single row of the `metrics` table
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "storage-sqlite", derive(sqlx::FromRow))]
pub struct MetricRow {
    #[cfg_attr(feature = "storage-sqlite", sqlx(rename = "type"))]
    pub metric_type: String,

    pub name: String,

    pub value: Option<f64>,

    pub delta: Option<i64>,
}

impl MetricRow {
    /// Convert back into a wire record, rejecting unknown types
    pub fn into_record(self) -> StorageResult<MetricRecord> {
        let kind: MetricKind = self.metric_type.parse()?;

        Ok(MetricRecord {
            id: self.name,
            kind,
            delta: self.delta,
            value: self.value,
        })
    }
}

impl From<&MetricRecord> for MetricRow {
    fn from(record: &MetricRecord) -> Self {
        Self {
            metric_type: record.kind.to_string(),
            name: record.id.clone(),
            value: record.value,
            delta: record.delta,
        }
    }
}
