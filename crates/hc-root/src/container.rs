//! Container traits: what the engine needs from a table file.
//!
//! A [`Backend`] opens sources and creates/updates destinations. A
//! [`TableSource`] lists tables and histograms and streams a table's rows as
//! Arrow batches. A [`Destination`] creates tables, appends rows and stores
//! histograms.

use std::path::Path;
use std::sync::Arc;

use arrow::array::Array;
use arrow::compute::{cast, concat_batches};
use arrow::datatypes::SchemaRef;
use arrow::record_batch::{RecordBatch, RecordBatchOptions};
use hc_core::{Compression, Error, Result, StepBudget};
use serde::{Deserialize, Serialize};

use crate::histogram::Histogram;
use crate::naming::{NamingStrategy, SeparatorNaming};
use crate::tree::TableInfo;

/// Lazy sequence of row batches.
pub type BatchIter<'a> = Box<dyn Iterator<Item = Result<RecordBatch>> + 'a>;

/// A readable table file.
pub trait TableSource {
    /// Path the source was opened from.
    fn path(&self) -> &Path;

    /// Table names in discovery order.
    fn table_names(&self) -> Vec<String>;

    /// Histogram names in discovery order.
    fn histogram_names(&self) -> Vec<String>;

    /// Stored schema of `table`.
    fn schema(&self, table: &str) -> Result<SchemaRef>;

    /// Number of rows in `table`.
    fn num_rows(&self, table: &str) -> Result<u64>;

    /// Stream `columns` of `table` in row order, chunked to `budget`.
    ///
    /// Every yielded batch has at least one row.
    fn rows<'a>(&'a self, table: &str, columns: &[String], budget: StepBudget)
    -> Result<BatchIter<'a>>;

    /// Read the histogram `name`.
    fn histogram(&self, name: &str) -> Result<Histogram>;

    /// Column metadata of `table`.
    fn table_info(&self, table: &str) -> Result<TableInfo> {
        Ok(TableInfo::from_schema(table, self.schema(table)?.as_ref()))
    }
}

/// Per-table write hints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableOptions {
    /// Table title.
    pub title: String,
    /// Initial capacity of the basket index.
    pub initial_basket_capacity: usize,
    /// Growth factor of the basket index once full.
    pub resize_factor: f64,
}

impl Default for TableOptions {
    fn default() -> Self {
        Self { title: String::new(), initial_basket_capacity: 10, resize_factor: 10.0 }
    }
}

/// Options fixed when a destination is opened.
#[derive(Debug, Clone)]
pub struct DestinationOptions {
    /// Compression applied to appended rows.
    pub compression: Compression,
    /// Naming used to flatten nested columns.
    pub naming: Arc<dyn NamingStrategy>,
}

impl Default for DestinationOptions {
    fn default() -> Self {
        Self { compression: Compression::default(), naming: Arc::new(SeparatorNaming::default()) }
    }
}

/// A writable table file.
pub trait Destination {
    /// Path of the destination.
    fn path(&self) -> &Path;

    /// `true` if a table `name` already exists.
    fn has_table(&self, name: &str) -> bool;

    /// Table names in creation order.
    fn table_names(&self) -> Vec<String>;

    /// Create table `name` with the logical `schema`.
    fn create_table(&mut self, name: &str, schema: &SchemaRef, options: &TableOptions)
    -> Result<()>;

    /// Append a logical chunk to table `name`.
    ///
    /// Fails with [`Error::SchemaMismatch`] if the chunk does not match the
    /// stored structure.
    fn append_rows(&mut self, name: &str, chunk: &RecordBatch) -> Result<()>;

    /// Histogram names already stored.
    fn histogram_names(&self) -> Vec<String>;

    /// Read back a stored histogram.
    fn histogram(&self, name: &str) -> Result<Option<Histogram>>;

    /// Store (or replace) a histogram.
    fn write_histogram(&mut self, histogram: &Histogram) -> Result<()>;

    /// Flush everything. The destination must not be used afterwards.
    fn finish(&mut self) -> Result<()>;
}

/// Opens sources and destinations of one container format.
pub trait Backend {
    /// `true` if something exists at `path`.
    fn exists(&self, path: &Path) -> bool;

    /// Open `path` for reading.
    fn open<'a>(&'a self, path: &Path) -> Result<Box<dyn TableSource + 'a>>;

    /// Create a fresh destination at `path`, replacing whatever is there.
    fn create<'a>(
        &'a self,
        path: &Path,
        options: DestinationOptions,
    ) -> Result<Box<dyn Destination + 'a>>;

    /// Open the existing destination at `path` for appending.
    fn update<'a>(
        &'a self,
        path: &Path,
        options: DestinationOptions,
    ) -> Result<Box<dyn Destination + 'a>>;
}

// ── Structure check ─────────────────────────────────────────────

/// Check that `chunk` (already in stored layout) matches `stored`.
///
/// Names and order must agree; types are compared ignoring nested field
/// names and metadata.
pub fn check_structure(table: &str, stored: &SchemaRef, chunk: &SchemaRef) -> Result<()> {
    let same = stored.fields().len() == chunk.fields().len()
        && stored.fields().iter().zip(chunk.fields()).all(|(a, b)| {
            a.name() == b.name() && a.data_type().equals_datatype(b.data_type())
        });
    if same {
        return Ok(());
    }
    let describe = |s: &SchemaRef| {
        s.fields().iter().map(|f| format!("{}: {}", f.name(), f.data_type())).collect::<Vec<_>>()
    };
    Err(Error::SchemaMismatch(format!(
        "tables must have the same structure: table '{table}' has [{}], chunk has [{}]",
        describe(stored).join(", "),
        describe(chunk).join(", ")
    )))
}

/// Rebuild `batch` (already in stored layout) against the stored schema.
///
/// Columns whose types differ only in nested field names or nullability are
/// cast to the stored type.
pub fn conform(table: &str, stored: &SchemaRef, batch: &RecordBatch) -> Result<RecordBatch> {
    check_structure(table, stored, &batch.schema())?;
    let columns = batch
        .columns()
        .iter()
        .zip(stored.fields())
        .map(|(col, field)| {
            if col.data_type() == field.data_type() {
                Ok(col.clone())
            } else {
                Ok(cast(col, field.data_type())?)
            }
        })
        .collect::<Result<Vec<_>>>()?;
    let options = RecordBatchOptions::new().with_row_count(Some(batch.num_rows()));
    Ok(RecordBatch::try_new_with_options(stored.clone(), columns, &options)?)
}

/// Column indices of `columns` in `schema`, in the requested order.
pub fn projection(
    schema: &SchemaRef,
    columns: &[String],
    table: &str,
    path: &Path,
) -> Result<Vec<usize>> {
    columns
        .iter()
        .map(|c| {
            schema.index_of(c).map_err(|_| {
                Error::NotFound(format!(
                    "column '{c}' not in table '{table}' of {}",
                    path.display()
                ))
            })
        })
        .collect()
}

/// Read every row and column of `table` into one batch.
pub fn read_table(source: &dyn TableSource, table: &str) -> Result<RecordBatch> {
    let schema = source.schema(table)?;
    let columns: Vec<String> = schema.fields().iter().map(|f| f.name().clone()).collect();
    let batches =
        source.rows(table, &columns, StepBudget::Rows(usize::MAX))?.collect::<Result<Vec<_>>>()?;
    if batches.is_empty() {
        return Ok(RecordBatch::new_empty(schema));
    }
    Ok(concat_batches(&schema, &batches)?)
}

// ── Re-chunking ─────────────────────────────────────────────────

/// Re-slices a batch sequence into chunks sized by a [`StepBudget`].
///
/// Byte budgets are converted to rows using the memory footprint of the
/// batch that starts each chunk, measured when that batch was pulled from
/// the inner iterator. A chunk always holds at least one row.
pub struct Rechunk<I> {
    inner: I,
    schema: SchemaRef,
    budget: StepBudget,
    /// Unconsumed tail of the last pulled batch and its bytes per row.
    carry: Option<(RecordBatch, usize)>,
    done: bool,
}

impl<I> Rechunk<I>
where
    I: Iterator<Item = Result<RecordBatch>>,
{
    /// Wrap `inner`, whose batches all have `schema`.
    pub fn new(inner: I, schema: SchemaRef, budget: StepBudget) -> Self {
        Self { inner, schema, budget, carry: None, done: false }
    }

    /// Next batch with its bytes per row.
    ///
    /// A slice shares its parent's buffers, so the width of a carried tail
    /// is the one measured on the whole batch.
    fn pull(&mut self) -> Option<Result<(RecordBatch, usize)>> {
        if let Some(carried) = self.carry.take() {
            return Some(Ok(carried));
        }
        self.inner.next().map(|r| {
            r.map(|b| {
                let width = b.get_array_memory_size() / b.num_rows().max(1);
                (b, width)
            })
        })
    }
}

impl<I> Iterator for Rechunk<I>
where
    I: Iterator<Item = Result<RecordBatch>>,
{
    type Item = Result<RecordBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut pieces: Vec<RecordBatch> = Vec::new();
        let mut have = 0usize;
        let mut target = None;

        loop {
            let (batch, width) = match self.pull() {
                Some(Ok(pulled)) => pulled,
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(e));
                }
                None => {
                    self.done = true;
                    break;
                }
            };
            let n = batch.num_rows();
            if n == 0 {
                continue;
            }
            let want = *target.get_or_insert_with(|| self.budget.rows_for(width));
            let need = want - have;
            if n > need {
                pieces.push(batch.slice(0, need));
                self.carry = Some((batch.slice(need, n - need), width));
                have += need;
            } else {
                pieces.push(batch);
                have += n;
            }
            if have >= want {
                break;
            }
        }

        match pieces.len() {
            0 => None,
            1 => pieces.pop().map(Ok),
            _ => Some(concat_batches(&self.schema, &pieces).map_err(Error::from)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{ArrayRef, AsArray, Int64Array};
    use arrow::datatypes::{DataType, Field, Int64Type, Schema};

    fn batches(sizes: &[usize]) -> (SchemaRef, Vec<Result<RecordBatch>>) {
        let schema = Arc::new(Schema::new(vec![Field::new("x", DataType::Int64, false)]));
        let mut next = 0i64;
        let out = sizes
            .iter()
            .map(|&n| {
                let v: Vec<i64> = (next..next + n as i64).collect();
                next += n as i64;
                Ok(RecordBatch::try_new(schema.clone(), vec![Arc::new(Int64Array::from(v)) as ArrayRef])
                    .unwrap())
            })
            .collect();
        (schema, out)
    }

    fn collect(chunks: Rechunk<std::vec::IntoIter<Result<RecordBatch>>>) -> Vec<Vec<i64>> {
        chunks
            .map(|b| b.unwrap().column(0).as_primitive::<Int64Type>().values().to_vec())
            .collect()
    }

    #[test]
    fn rows_budget_merges_and_splits() {
        let (schema, input) = batches(&[2, 0, 5, 1]);
        let out = collect(Rechunk::new(input.into_iter(), schema, StepBudget::Rows(3)));
        assert_eq!(out, vec![vec![0, 1, 2], vec![3, 4, 5], vec![6, 7]]);
    }

    #[test]
    fn tiny_byte_budget_still_reads_one_row() {
        let (schema, input) = batches(&[4]);
        let out = collect(Rechunk::new(input.into_iter(), schema, StepBudget::Bytes(1)));
        assert_eq!(out.len(), 4);
        assert!(out.iter().all(|c| c.len() == 1));
    }

    #[test]
    fn byte_budget_holds_across_carried_tail() {
        let (schema, input) = batches(&[100_000]);
        let out = collect(Rechunk::new(input.into_iter(), schema, StepBudget::Bytes(8 * 10_000)));
        assert_eq!(out.len(), 10);
        assert!(out.iter().all(|c| c.len() == 10_000), "{:?}", out.iter().map(Vec::len).collect::<Vec<_>>());
        assert_eq!(out[9][9_999], 99_999);
    }

    #[test]
    fn large_byte_budget_reads_everything() {
        let (schema, input) = batches(&[3, 3, 3]);
        let out = collect(Rechunk::new(input.into_iter(), schema, StepBudget::default()));
        assert_eq!(out, vec![(0..9).collect::<Vec<_>>()]);
    }

    #[test]
    fn error_ends_stream() {
        let (schema, mut input) = batches(&[2]);
        input.push(Err(Error::Codec("broken basket".into())));
        input.extend(batches(&[2]).1);
        let mut it = Rechunk::new(input.into_iter(), schema, StepBudget::Rows(10));
        assert!(it.next().unwrap().is_err());
        assert!(it.next().is_none());
    }

    #[test]
    fn structure_check_reports_both_sides() {
        let a = Arc::new(Schema::new(vec![Field::new("x", DataType::Int64, false)]));
        let b = Arc::new(Schema::new(vec![Field::new("x", DataType::Float64, false)]));
        check_structure("t", &a, &a.clone()).unwrap();
        let err = check_structure("t", &a, &b).unwrap_err().to_string();
        assert!(err.contains("tables must have the same structure"));
        assert!(err.contains("x: Int64") && err.contains("x: Float64"));
    }
}
