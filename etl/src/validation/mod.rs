//! Blocklist checks guarding dynamically built SQL.
//!
//! Two independent checks share one blocklist:
//!
//! - [`validate_field_names`] runs once when a schema is accepted. Field
//!   names end up verbatim in `CREATE TABLE`, `INSERT` and `SELECT` text, so
//!   a rejected name is a fatal [`SchemaError`].
//! - [`validate_row`] runs on every record before it is inserted. Values are
//!   always bound as parameters; a row that matches the blocklist is dropped
//!   and reported as a [`ValidationSkip`], and the load keeps going.
//!
//! # Example
//!
//! ```
//! use batchload::{validate_row, Record};
//!
//! assert!(validate_row(0, &Record::from(["a", "1"])).is_ok());
//!
//! let skip = validate_row(4, &Record::from(["a", "1; DROP TABLE x"])).unwrap_err();
//! assert_eq!(skip.row, 4);
//! assert_eq!(skip.pattern, ";");
//! ```

use serde::Serialize;

use crate::error::{SchemaError, SchemaResult};
use crate::models::{Record, SchemaSpec};

/// SQL metacharacter sequences that may not appear in names or values.
pub const SQL_BLOCKLIST: [&str; 3] = ["--", "/**/", ";"];

/// A record dropped by [`validate_row`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationSkip {
    /// 0-based position of the record in the loaded sequence.
    pub row: usize,
    /// Position of the offending value inside the record.
    pub field: usize,
    /// The blocklist entry that matched.
    pub pattern: &'static str,
}

impl std::fmt::Display for ValidationSkip {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "row {} skipped: field {} contains '{}'",
            self.row, self.field, self.pattern
        )
    }
}

/// First blocklist entry found in `text`.
pub fn find_blocked(text: &str) -> Option<&'static str> {
    SQL_BLOCKLIST.iter().copied().find(|p| text.contains(p))
}

/// Reject a single identifier (field or table name).
pub fn validate_name(name: &str) -> SchemaResult<()> {
    match find_blocked(name) {
        Some(pattern) => Err(SchemaError::UnsafeName {
            name: name.to_string(),
            pattern,
        }),
        None => Ok(()),
    }
}

/// Reject a schema if any field name contains a blocklisted sequence.
pub fn validate_field_names(schema: &SchemaSpec) -> SchemaResult<()> {
    schema.all_names().iter().try_for_each(|name| validate_name(name))
}

/// Check every value of a record against the blocklist.
pub fn validate_row(row: usize, record: &Record) -> Result<(), ValidationSkip> {
    for (field, value) in record.values().iter().enumerate() {
        if let Some(pattern) = find_blocked(value) {
            return Err(ValidationSkip {
                row,
                field,
                pattern,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_names_pass() {
        let schema = SchemaSpec::from_rule("D", 3, "M", 3).unwrap();
        assert!(validate_field_names(&schema).is_ok());
    }

    #[test]
    fn test_each_blocklist_entry_rejects_name() {
        for bad in ["D1--", "D/**/1", "D1;"] {
            let schema = SchemaSpec::from_explicit([bad], ["M1"]).unwrap();
            let err = validate_field_names(&schema).unwrap_err();
            assert!(matches!(err, SchemaError::UnsafeName { ref name, .. } if name == bad));
        }
    }

    #[test]
    fn test_measure_names_are_checked_too() {
        let schema = SchemaSpec::from_explicit(["D1"], ["M1;DROP"]).unwrap();
        assert_eq!(
            validate_field_names(&schema),
            Err(SchemaError::UnsafeName {
                name: "M1;DROP".into(),
                pattern: ";"
            })
        );
    }

    #[test]
    fn test_single_dash_and_slash_are_allowed() {
        let record = Record::from(["a-b", "1/2", "*"]);
        assert!(validate_row(0, &record).is_ok());
    }

    #[test]
    fn test_row_skip_reports_field() {
        let record = Record::from(["a", "b", "x -- y"]);
        let skip = validate_row(12, &record).unwrap_err();
        assert_eq!(
            skip,
            ValidationSkip {
                row: 12,
                field: 2,
                pattern: "--"
            }
        );
        assert!(skip.to_string().contains("row 12"));
    }
}
