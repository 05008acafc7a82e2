//! Record shape: ordered dimension names followed by ordered measure names.
//!
//! A [`SchemaSpec`] is built once when the pipeline is configured and is
//! shared, read-only, by every source, the loader, the aggregator and the
//! sinks. There is no way to change one in place; relabeling the measures
//! for an output header goes through [`SchemaSpec::with_aliased_measures`],
//! which returns a new value.

use std::collections::HashSet;
use std::path::Path;

use crate::error::{EtlResult, FormatError, SchemaError, SchemaResult};

/// Ordered dimension and measure field names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaSpec {
    dimensions: Vec<String>,
    measures: Vec<String>,
    all: Vec<String>,
}

impl SchemaSpec {
    /// Use the given names as-is.
    ///
    /// Fails on duplicates inside either group, on a name present in both
    /// groups, or when there are no dimensions.
    pub fn from_explicit<D, M>(dimensions: D, measures: M) -> SchemaResult<Self>
    where
        D: IntoIterator,
        D::Item: Into<String>,
        M: IntoIterator,
        M::Item: Into<String>,
    {
        let dimensions: Vec<String> = dimensions.into_iter().map(Into::into).collect();
        let measures: Vec<String> = measures.into_iter().map(Into::into).collect();

        if dimensions.is_empty() {
            return Err(SchemaError::NoDimensions);
        }
        ensure_unique(&dimensions)?;
        ensure_unique(&measures)?;

        let dims: HashSet<&str> = dimensions.iter().map(String::as_str).collect();
        if let Some(shared) = measures.iter().find(|m| dims.contains(m.as_str())) {
            return Err(SchemaError::OverlappingField(shared.clone()));
        }

        let all = dimensions.iter().chain(measures.iter()).cloned().collect();
        Ok(Self {
            dimensions,
            measures,
            all,
        })
    }

    /// Generate `D1..Dn` / `M1..Mm` style names.
    ///
    /// ```
    /// use batchload::SchemaSpec;
    ///
    /// let schema = SchemaSpec::from_rule("D", 3, "M", 3).unwrap();
    /// assert_eq!(schema.all_names(), ["D1", "D2", "D3", "M1", "M2", "M3"]);
    /// ```
    pub fn from_rule(
        dimension_prefix: &str,
        dimension_count: i64,
        measure_prefix: &str,
        measure_count: i64,
    ) -> SchemaResult<Self> {
        let dimensions = numbered(dimension_prefix, dimension_count)?;
        let measures = numbered(measure_prefix, measure_count)?;
        Self::from_explicit(dimensions, measures)
    }

    /// Infer the schema from a CSV header line.
    ///
    /// Header names starting with `dimension_prefix` become dimensions and
    /// names starting with `measure_prefix` become measures, in header order.
    /// When both prefixes match (e.g. `M` and `MS`), the longer one wins.
    /// Any other column is ignored.
    pub fn from_csv_heading(
        path: impl AsRef<Path>,
        delimiter: u8,
        dimension_prefix: &str,
        measure_prefix: &str,
    ) -> EtlResult<Self> {
        let path = path.as_ref();
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_path(path)
            .map_err(|e| FormatError::new(path, format!("cannot open: {e}")))?;

        let headers = reader
            .headers()
            .map_err(|e| FormatError::new(path, format!("cannot read header: {e}")))?
            .clone();
        if headers.is_empty() || headers.iter().all(str::is_empty) {
            return Err(FormatError::new(path, "no header line").with_line(1).into());
        }

        let mut dimensions = Vec::new();
        let mut measures = Vec::new();
        for name in headers.iter() {
            let is_dim = name.starts_with(dimension_prefix);
            let is_measure = name.starts_with(measure_prefix);
            match (is_dim, is_measure) {
                (true, true) if measure_prefix.len() > dimension_prefix.len() => {
                    measures.push(name.to_string())
                }
                (true, _) => dimensions.push(name.to_string()),
                (false, true) => measures.push(name.to_string()),
                (false, false) => {}
            }
        }

        Ok(Self::from_explicit(dimensions, measures)?)
    }

    /// A new schema with the same dimensions and the measures renamed
    /// `prefix1..prefixN`.
    ///
    /// Used for output headers only; storage columns always keep the
    /// original names.
    pub fn with_aliased_measures(&self, prefix: &str) -> SchemaResult<Self> {
        let measures: Vec<String> = (1..=self.measures.len())
            .map(|i| format!("{prefix}{i}"))
            .collect();
        Self::from_explicit(self.dimensions.clone(), measures)
    }

    pub fn dimension_names(&self) -> &[String] {
        &self.dimensions
    }

    pub fn measure_names(&self) -> &[String] {
        &self.measures
    }

    /// Dimensions followed by measures.
    pub fn all_names(&self) -> &[String] {
        &self.all
    }

    pub fn width(&self) -> usize {
        self.all.len()
    }

    /// Whether the field at `index` of `all_names()` is a measure.
    pub fn is_measure_index(&self, index: usize) -> bool {
        index >= self.dimensions.len() && index < self.all.len()
    }
}

fn numbered(prefix: &str, count: i64) -> SchemaResult<Vec<String>> {
    if count <= 0 {
        return Err(SchemaError::NonPositiveCount {
            prefix: prefix.to_string(),
            count,
        });
    }
    Ok((1..=count).map(|i| format!("{prefix}{i}")).collect())
}

fn ensure_unique(names: &[String]) -> SchemaResult<()> {
    let mut seen = HashSet::with_capacity(names.len());
    for name in names {
        if !seen.insert(name.as_str()) {
            return Err(SchemaError::DuplicateField(name.clone()));
        }
    }
    Ok(())
}
