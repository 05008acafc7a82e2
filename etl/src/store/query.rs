//! The two fixed read shapes over the staging relation.
//!
//! Results are streamed: a [`PreparedQuery`] owns the compiled statement and
//! [`PreparedQuery::records`] steps it one row at a time, so the exporter
//! never holds a full result set.

use rusqlite::types::ValueRef;
use rusqlite::{Connection, Rows, Statement};
use serde::{Deserialize, Serialize};

use super::{checked_table, quote_ident, DEFAULT_TABLE};
use crate::error::{EtlResult, SchemaResult};
use crate::models::{Record, SchemaSpec};
use crate::validation::validate_field_names;

/// Which aggregation to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryShape {
    /// Every row, all columns, ordered by the first dimension.
    Basic,
    /// One row per dimension tuple with summed measures.
    Advanced,
}

impl QueryShape {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::Advanced => "advanced",
        }
    }

    /// SQL text for this shape.
    ///
    /// Names are checked against the blocklist before they are spliced in.
    pub fn sql(&self, schema: &SchemaSpec, table: &str) -> SchemaResult<String> {
        validate_field_names(schema)?;
        let table = checked_table(table)?;
        let dims: Vec<String> = schema.dimension_names().iter().map(|n| quote_ident(n)).collect();
        // from_explicit guarantees at least one dimension
        let first = dims.first().cloned().unwrap_or_else(|| "rowid".to_string());

        Ok(match self {
            Self::Basic => {
                let columns: Vec<String> =
                    schema.all_names().iter().map(|n| quote_ident(n)).collect();
                format!(
                    "SELECT {} FROM {table} ORDER BY {first}, rowid",
                    columns.join(", ")
                )
            }
            Self::Advanced => {
                let sums = schema.measure_names().iter().map(|n| {
                    let col = quote_ident(n);
                    format!("SUM({col}) AS {col}")
                });
                let columns: Vec<String> = dims.iter().cloned().chain(sums).collect();
                let dims = dims.join(", ");
                format!(
                    "SELECT {} FROM {table} GROUP BY {dims} ORDER BY {dims}",
                    columns.join(", ")
                )
            }
        })
    }
}

/// Read-only access to the staging relation.
pub struct Aggregator<'c> {
    conn: &'c Connection,
    table: String,
}

impl<'c> Aggregator<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self {
            conn,
            table: DEFAULT_TABLE.to_string(),
        }
    }

    pub fn with_table(mut self, table: impl Into<String>) -> SchemaResult<Self> {
        let table = table.into();
        checked_table(&table)?;
        self.table = table;
        Ok(self)
    }

    /// All rows in full column order, sorted by the first dimension with
    /// ties kept in insertion order.
    pub fn basic_query(&self, schema: &SchemaSpec) -> EtlResult<PreparedQuery<'c>> {
        self.query(QueryShape::Basic, schema)
    }

    /// Grouped by every dimension, each measure summed, sorted by the
    /// dimension tuple.
    pub fn advanced_query(&self, schema: &SchemaSpec) -> EtlResult<PreparedQuery<'c>> {
        self.query(QueryShape::Advanced, schema)
    }

    pub fn query(&self, shape: QueryShape, schema: &SchemaSpec) -> EtlResult<PreparedQuery<'c>> {
        let sql = shape.sql(schema, &self.table)?;
        let stmt = self.conn.prepare(&sql)?;
        Ok(PreparedQuery {
            stmt,
            width: schema.width(),
            shape,
        })
    }
}

/// A compiled aggregation, ready to be stepped.
pub struct PreparedQuery<'c> {
    stmt: Statement<'c>,
    width: usize,
    shape: QueryShape,
}

impl<'c> PreparedQuery<'c> {
    pub fn shape(&self) -> QueryShape {
        self.shape
    }

    /// Start stepping the statement.
    pub fn records(&mut self) -> EtlResult<QueryRecords<'_>> {
        let rows = self.stmt.query([])?;
        Ok(QueryRecords {
            rows,
            width: self.width,
            done: false,
        })
    }
}

/// Lazy result rows, rendered to text.
pub struct QueryRecords<'s> {
    rows: Rows<'s>,
    width: usize,
    done: bool,
}

impl QueryRecords<'_> {
    fn render(row: &rusqlite::Row<'_>, width: usize) -> rusqlite::Result<Record> {
        let mut values = Vec::with_capacity(width);
        for i in 0..width {
            values.push(value_text(row.get_ref(i)?));
        }
        Ok(Record::new(values))
    }
}

impl Iterator for QueryRecords<'_> {
    type Item = EtlResult<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let width = self.width;
        let result = match self.rows.next() {
            Ok(Some(row)) => Self::render(row, width),
            Ok(None) => {
                self.done = true;
                return None;
            }
            Err(e) => Err(e),
        };
        if result.is_err() {
            self.done = true;
        }
        Some(result.map_err(Into::into))
    }
}

/// Text form of a stored value.
fn value_text(value: ValueRef<'_>) -> String {
    match value {
        ValueRef::Null => String::new(),
        ValueRef::Integer(i) => i.to_string(),
        ValueRef::Real(f) => f.to_string(),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => String::from_utf8_lossy(bytes).into_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::BulkLoader;

    fn schema() -> SchemaSpec {
        SchemaSpec::from_rule("D", 3, "M", 3).unwrap()
    }

    fn load(conn: &Connection, rows: &[[&str; 6]]) {
        let loader = BulkLoader::new(conn);
        loader.create_table(&schema()).unwrap();
        loader
            .write(&schema(), rows.iter().map(|r| Ok(Record::from(*r))))
            .unwrap();
    }

    fn collect(mut query: PreparedQuery<'_>) -> Vec<Vec<String>> {
        query
            .records()
            .unwrap()
            .map(|r| r.unwrap().into_values())
            .collect()
    }

    #[test]
    fn test_basic_sql() {
        let sql = QueryShape::Basic.sql(&schema(), "important_data").unwrap();
        assert_eq!(
            sql,
            r#"SELECT "D1", "D2", "D3", "M1", "M2", "M3" FROM "important_data" ORDER BY "D1", rowid"#
        );
    }

    #[test]
    fn test_advanced_sql() {
        let schema = SchemaSpec::from_rule("D", 2, "M", 1).unwrap();
        let sql = QueryShape::Advanced.sql(&schema, "important_data").unwrap();
        assert_eq!(
            sql,
            r#"SELECT "D1", "D2", SUM("M1") AS "M1" FROM "important_data" GROUP BY "D1", "D2" ORDER BY "D1", "D2""#
        );
    }

    #[test]
    fn test_basic_orders_by_first_dimension_stably() {
        let conn = Connection::open_in_memory().unwrap();
        load(
            &conn,
            &[
                ["b", "1", "x", "1", "1", "1"],
                ["a", "2", "x", "2", "2", "2"],
                ["b", "0", "x", "3", "3", "3"],
                ["a", "1", "x", "4", "4", "4"],
            ],
        );

        let rows = collect(Aggregator::new(&conn).basic_query(&schema()).unwrap());
        let keys: Vec<(&str, &str)> = rows.iter().map(|r| (r[0].as_str(), r[3].as_str())).collect();
        assert_eq!(keys, vec![("a", "2"), ("a", "4"), ("b", "1"), ("b", "3")]);
    }

    #[test]
    fn test_advanced_sums_per_dimension_tuple() {
        let conn = Connection::open_in_memory().unwrap();
        load(
            &conn,
            &[
                ["a", "b", "c", "1", "2", "3"],
                ["z", "y", "x", "10", "10", "10"],
                ["a", "b", "c", "4", "5", "6"],
            ],
        );

        let rows = collect(Aggregator::new(&conn).advanced_query(&schema()).unwrap());
        assert_eq!(
            rows,
            vec![
                vec!["a", "b", "c", "5", "7", "9"],
                vec!["z", "y", "x", "10", "10", "10"],
            ]
        );
    }

    #[test]
    fn test_skipped_rows_are_absent() {
        let conn = Connection::open_in_memory().unwrap();
        load(
            &conn,
            &[
                ["a", "b", "c", "1", "2", "3"],
                ["a", "b", "c;", "4", "5", "6"],
            ],
        );

        let rows = collect(Aggregator::new(&conn).basic_query(&schema()).unwrap());
        assert_eq!(rows, vec![vec!["a", "b", "c", "1", "2", "3"]]);
    }

    #[test]
    fn test_null_and_real_rendering() {
        let conn = Connection::open_in_memory().unwrap();
        let schema = SchemaSpec::from_rule("D", 1, "M", 2).unwrap();
        conn.execute_batch(
            r#"CREATE TABLE important_data ("D1" TEXT, "M1" INTEGER, "M2" INTEGER);
               INSERT INTO important_data VALUES ('k', NULL, 1.5);"#,
        )
        .unwrap();

        let rows = collect(Aggregator::new(&conn).basic_query(&schema).unwrap());
        assert_eq!(rows, vec![vec!["k", "", "1.5"]]);
    }

    #[test]
    fn test_query_can_be_restarted() {
        let conn = Connection::open_in_memory().unwrap();
        load(&conn, &[["a", "b", "c", "1", "2", "3"]]);

        let mut query = Aggregator::new(&conn).basic_query(&schema()).unwrap();
        assert_eq!(query.records().unwrap().count(), 1);
        assert_eq!(query.records().unwrap().count(), 1);
    }

    #[test]
    fn test_query_rejects_unsafe_names() {
        let conn = Connection::open_in_memory().unwrap();
        let bad = SchemaSpec::from_explicit(["D1/**/"], ["M1"]).unwrap();
        assert!(Aggregator::new(&conn).basic_query(&bad).is_err());
        assert!(Aggregator::new(&conn).with_table("t--").is_err());
    }
}
