//! # hc-translate
//!
//! Table merge and aggregation engine for hepconv.
//!
//! A run copies one source, or merges several, into a destination container:
//!
//! - [`TableSetResolver`] picks the tables to process.
//! - [`ColumnCatalog`] groups each table's flat columns by counter and prefix.
//! - [`ColumnSelector`] applies keep/drop column patterns.
//! - [`ChunkStream`] reads bounded chunks, filtered by an optional predicate.
//! - [`Regrouper`] turns column groups back into nested `List<Struct>` columns.
//! - [`TableWriter`] creates the output table from the first chunk and appends.
//! - [`HistogramAccumulator`] adds histograms cell by cell across sources.
//!
//! [`Merger`] ties these together; [`Merger::table_to_parquet`],
//! [`Merger::parquet_to_table`] and [`merge_parquet`] move tables in and out
//! of Parquet.
//!
//! ## Example
//!
//! ```no_run
//! use std::path::{Path, PathBuf};
//! use hc_root::StoreBackend;
//! use hc_translate::{MergeOptions, Merger};
//!
//! let options = MergeOptions::default().with_keep_columns("Jet_*").with_cut("nJet >= 2");
//! let merger = Merger::new(options).unwrap();
//! let sources: Vec<PathBuf> = vec!["a.hcs".into(), "b.hcs".into()];
//! let summary = merger.merge(&StoreBackend::new(), &sources, Path::new("out.hcs")).unwrap();
//! println!("{} tables", summary.tables.len());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod catalog;
pub mod hadd;
pub mod merge;
pub mod parquet;
pub mod regroup;
pub mod selector;
pub mod stream;
pub mod tables;
pub mod writer;

pub use catalog::{ColumnCatalog, ColumnGroup, GroupMember};
pub use hadd::{HaddOptions, HaddReport, HistogramAccumulator, HistogramSlot, accumulate_files};
pub use merge::{
    DestinationMode, MergeOptions, MergeSummary, Merger, NoProgress, ProgressSink, TableSummary,
    resolve_destination,
};
pub use self::parquet::{ParquetCompression, ParquetInput, ParquetOptions, merge_parquet};
pub use regroup::Regrouper;
pub use selector::ColumnSelector;
pub use stream::ChunkStream;
pub use tables::TableSetResolver;
pub use writer::TableWriter;
