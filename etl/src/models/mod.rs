//! Domain models for the batchload pipeline.
//!
//! - [`SchemaSpec`] - Ordered dimension and measure field names
//! - [`Record`] - One normalized row, aligned to [`SchemaSpec::all_names`]

pub mod schema;

pub use schema::SchemaSpec;

use serde::{Deserialize, Serialize};

// =============================================================================
// Record
// =============================================================================

/// One normalized row: dimension values first, then measure values.
///
/// Values are positionally aligned to the schema's `all_names()`. The
/// aggregated "advanced" rows use the same type, with summed measures.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Vec<String>);

impl Record {
    pub fn new(values: Vec<String>) -> Self {
        Self(values)
    }

    pub fn values(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.0.get(index).map(String::as_str)
    }

    pub fn into_values(self) -> Vec<String> {
        self.0
    }
}

impl From<Vec<String>> for Record {
    fn from(values: Vec<String>) -> Self {
        Self(values)
    }
}

impl<const N: usize> From<[&str; N]> for Record {
    fn from(values: [&str; N]) -> Self {
        Self(values.iter().map(|v| v.to_string()).collect())
    }
}
