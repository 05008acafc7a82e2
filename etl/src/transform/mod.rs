//! Pipeline orchestration.
//!
//! - Pipeline: schema, load, and the two concurrent exports

pub mod pipeline;

pub use pipeline::*;
