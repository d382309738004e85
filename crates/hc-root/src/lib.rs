//! # hc-root
//!
//! Table-container model for hepconv.
//!
//! A container file holds named tables (columnar rows, read and written as
//! Arrow [`RecordBatch`](arrow::record_batch::RecordBatch)es) and named
//! histograms. Two backends are provided:
//!
//! - [`MemoryBackend`]: an in-process map of paths to files, used by tests
//!   and by callers that build inputs programmatically.
//! - [`StoreBackend`]: an on-disk directory of compressed Arrow IPC baskets
//!   with a JSON manifest. Supports zlib, LZ4, ZSTD and XZ compression.
//!
//! Nested columns (`List<Struct>`) are stored flattened into a counter
//! column plus one variable-length column per member; see [`layout`].
//!
//! ## Example
//!
//! ```no_run
//! use hc_root::{Backend, StoreBackend, read_table};
//!
//! let backend = StoreBackend::new();
//! let f = backend.open("events.hcs".as_ref()).unwrap();
//! for name in f.table_names() {
//!     let batch = read_table(f.as_ref(), &name).unwrap();
//!     println!("{name}: {} rows", batch.num_rows());
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod compress;
pub mod container;
pub mod expr;
pub mod histogram;
pub mod layout;
pub mod memory;
pub mod naming;
pub mod store;
pub mod tree;

pub use container::{
    Backend, BatchIter, Destination, DestinationOptions, Rechunk, TableOptions, TableSource,
    check_structure, conform, read_table,
};
pub use expr::{CutExpr, FnPredicate, RowPredicate};
pub use histogram::{Axis, Histogram};
pub use memory::{MemoryBackend, MemoryFile, MemoryTable};
pub use naming::{NamingStrategy, SeparatorNaming};
pub use store::StoreBackend;
pub use tree::{COUNTER_KEY, ColumnInfo, LEAVES_KEY, TableInfo};
