//! Test utilities for the streamlog crates.
//!
//! This crate provides:
//! - Typed row fixtures implementing the stream tuple contract
//! - Property-based generators using proptest
//! - Hand-assembled golden wire vectors for format verification
//! - Scripted end-to-end scenario harnesses for both protocols

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod golden;
pub mod scenarios;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::{ColumnValue, FixtureRow};
    pub use crate::generators::{any_row, column_value, partitioned_row, replicated_row};
    pub use crate::scenarios::{DrHarness, ExportHarness};
}
