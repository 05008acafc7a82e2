//! Bulk loading into the staging relation.
//!
//! The loader drains a lazy record sequence with parameterized inserts and
//! commits every `batch_size` rows, so peak transaction size does not grow
//! with the input. Each commit boundary leaves the table in a consistent,
//! queryable state.

use rusqlite::{params_from_iter, Connection};
use serde::Serialize;

use super::{checked_table, quote_ident, DEFAULT_TABLE};
use crate::error::{EtlResult, SchemaError, SchemaResult};
use crate::logs::{log_info_indent, log_warning_indent};
use crate::models::{Record, SchemaSpec};
use crate::validation::{validate_field_names, validate_row, ValidationSkip};

/// Rows per committed transaction.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// How many skipped rows are kept in a [`LoadReport`].
const MAX_SKIP_SAMPLES: usize = 10;

/// Outcome of [`BulkLoader::write`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    /// Records pulled from the source sequence.
    pub rows_read: usize,
    /// Records inserted.
    pub inserted: usize,
    /// Records dropped by row validation.
    pub skipped: usize,
    /// Transactions committed, including the final one.
    pub commits: usize,
    /// The first few skips, for reporting.
    pub skip_samples: Vec<ValidationSkip>,
}

impl LoadReport {
    /// Get summary statistics
    pub fn summary(&self) -> String {
        format!(
            "Loaded: {} rows read, {} inserted, {} skipped, {} commits",
            self.rows_read, self.inserted, self.skipped, self.commits
        )
    }
}

/// Writes records into the staging relation.
pub struct BulkLoader<'c> {
    conn: &'c Connection,
    table: String,
    batch_size: usize,
}

impl<'c> BulkLoader<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self {
            conn,
            table: DEFAULT_TABLE.to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Use another relation name; rejected if it hits the blocklist.
    pub fn with_table(mut self, table: impl Into<String>) -> SchemaResult<Self> {
        let table = table.into();
        checked_table(&table)?;
        self.table = table;
        Ok(self)
    }

    /// Commit every `batch_size` rows (at least 1).
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Drop and recreate the staging relation for `schema`.
    ///
    /// Dimension columns are `TEXT`, measure columns `INTEGER`.
    pub fn create_table(&self, schema: &SchemaSpec) -> EtlResult<()> {
        validate_field_names(schema)?;
        let table = checked_table(&self.table)?;

        let columns: Vec<String> = schema
            .all_names()
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let ty = if schema.is_measure_index(i) { "INTEGER" } else { "TEXT" };
                format!("{} {}", quote_ident(name), ty)
            })
            .collect();

        self.conn.execute_batch(&format!(
            "DROP TABLE IF EXISTS {table};\nCREATE TABLE {table} ({});",
            columns.join(", ")
        ))?;
        log_info_indent(format!("Created table {} ({} columns)", self.table, columns.len()), 1);
        Ok(())
    }

    /// Insert every valid record, committing in batches.
    ///
    /// Rows whose values hit the blocklist are skipped and counted. Any error
    /// from the sequence or the store stops the load: the open batch is
    /// rolled back, earlier batches stay committed.
    pub fn write<I>(&self, schema: &SchemaSpec, records: I) -> EtlResult<LoadReport>
    where
        I: IntoIterator<Item = EtlResult<Record>>,
    {
        validate_field_names(schema)?;
        let sql = self.insert_sql(schema)?;
        let width = schema.width();
        let mut report = LoadReport::default();

        let mut tx = self.conn.unchecked_transaction()?;
        let mut pending = 0usize;

        for record in records {
            let record = record?;
            let row = report.rows_read;
            report.rows_read += 1;

            if record.len() != width {
                return Err(SchemaError::WidthMismatch {
                    expected: width,
                    found: record.len(),
                }
                .into());
            }

            if let Err(skip) = validate_row(row, &record) {
                log_warning_indent(skip.to_string(), 2);
                report.skipped += 1;
                if report.skip_samples.len() < MAX_SKIP_SAMPLES {
                    report.skip_samples.push(skip);
                }
                continue;
            }

            {
                let mut stmt = tx.prepare_cached(&sql)?;
                stmt.execute(params_from_iter(bind_values(schema, &record)))?;
            }
            report.inserted += 1;
            pending += 1;

            if pending == self.batch_size {
                tx.commit()?;
                report.commits += 1;
                pending = 0;
                log_info_indent(format!("Committed {} rows", report.inserted), 2);
                tx = self.conn.unchecked_transaction()?;
            }
        }

        tx.commit()?;
        report.commits += 1;
        log_info_indent(report.summary(), 1);
        Ok(report)
    }

    fn insert_sql(&self, schema: &SchemaSpec) -> SchemaResult<String> {
        let table = checked_table(&self.table)?;
        let columns: Vec<String> = schema.all_names().iter().map(|n| quote_ident(n)).collect();
        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
        Ok(format!(
            "INSERT INTO {table} ({}) VALUES ({})",
            columns.join(", "),
            placeholders.join(", ")
        ))
    }
}

/// Blank measure values are stored as NULL so they do not disturb sums.
fn bind_values<'r>(schema: &SchemaSpec, record: &'r Record) -> Vec<Option<&'r str>> {
    record
        .values()
        .iter()
        .enumerate()
        .map(|(i, v)| {
            if schema.is_measure_index(i) && v.trim().is_empty() {
                None
            } else {
                Some(v.as_str())
            }
        })
        .collect()
}
