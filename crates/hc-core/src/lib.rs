//! # hc-core
//!
//! Error taxonomy and option types shared by the hepconv crates.
//!
//! Every fallible operation in the workspace returns [`Result`]. The
//! [`Error`] variants follow the engine's failure categories: option
//! conflicts, missing inputs, unsupported column layouts, schema
//! mismatches and destination-state violations.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{
    ColumnSpec, Compression, CompressionAlgorithm, MappingResolution, MismatchPolicy, NameSetMode,
    NameSpec, StepBudget,
};
