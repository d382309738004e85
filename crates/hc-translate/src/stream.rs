//! Bounded streaming reads with an optional row predicate.

use std::sync::Arc;

use arrow::compute::filter_record_batch;
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use hc_core::{Result, StepBudget};
use hc_root::container::projection;
use hc_root::{BatchIter, RowPredicate, TableSource};

/// Lazy, forward-only chunk sequence over one table.
///
/// The predicate is evaluated on each fetched batch before it is projected
/// onto the retained columns, so it may read columns that are not retained.
/// Chunks left empty by the predicate are skipped, except that a table that
/// yields no rows at all still produces one empty chunk carrying the schema.
/// After the first error the stream ends.
pub struct ChunkStream<'a> {
    table: String,
    inner: BatchIter<'a>,
    predicate: Option<&'a dyn RowPredicate>,
    output: Vec<usize>,
    schema: SchemaRef,
    yielded: bool,
    done: bool,
}

impl<'a> ChunkStream<'a> {
    /// Start streaming `columns` of `table`.
    pub fn open(
        source: &'a dyn TableSource,
        table: &str,
        columns: &[String],
        predicate: Option<&'a dyn RowPredicate>,
        budget: StepBudget,
    ) -> Result<Self> {
        let mut fetch = columns.to_vec();
        if let Some(p) = predicate {
            for c in p.columns() {
                if !fetch.contains(&c) {
                    fetch.push(c);
                }
            }
        }
        let stored = source.schema(table)?;
        let indices = projection(&stored, columns, table, source.path())?;
        let schema = Arc::new(stored.project(&indices)?);
        let inner = source.rows(table, &fetch, budget)?;
        tracing::debug!(table, columns = columns.len(), fetched = fetch.len(), %budget, "opened chunk stream");

        Ok(Self {
            table: table.to_string(),
            inner,
            predicate,
            output: (0..columns.len()).collect(),
            schema,
            yielded: false,
            done: false,
        })
    }

    /// Schema of the yielded chunks.
    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    fn shape(&self, batch: RecordBatch) -> Result<RecordBatch> {
        let batch = match self.predicate {
            Some(p) => {
                let mask = p.evaluate(&batch)?;
                filter_record_batch(&batch, &mask)?
            }
            None => batch,
        };
        Ok(batch.project(&self.output)?)
    }
}

impl Iterator for ChunkStream<'_> {
    type Item = Result<RecordBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            match self.inner.next() {
                Some(Ok(batch)) => match self.shape(batch) {
                    Ok(chunk) if chunk.num_rows() == 0 => continue,
                    Ok(chunk) => {
                        tracing::debug!(table = %self.table, rows = chunk.num_rows(), "chunk");
                        self.yielded = true;
                        return Some(Ok(chunk));
                    }
                    Err(e) => {
                        self.done = true;
                        return Some(Err(e));
                    }
                },
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(e));
                }
                None => {
                    self.done = true;
                    if self.yielded {
                        return None;
                    }
                    self.yielded = true;
                    return Some(Ok(RecordBatch::new_empty(self.schema.clone())));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{AsArray, BooleanArray, Float64Array, Int64Array};
    use arrow::compute::kernels::cmp::gt;
    use arrow::datatypes::{DataType, Field, Int64Type, Schema};
    use hc_core::Error;
    use hc_root::{Backend, CutExpr, FnPredicate, MemoryBackend, MemoryFile};
    use std::path::Path;

    fn backend(rows: i64) -> MemoryBackend {
        let schema = Arc::new(Schema::new(vec![
            Field::new("x", DataType::Int64, false),
            Field::new("w", DataType::Float64, false),
        ]));
        let x: Vec<i64> = (0..rows).collect();
        let w: Vec<f64> = x.iter().map(|&v| v as f64 / 10.0).collect();
        let batch = RecordBatch::try_new(
            schema,
            vec![Arc::new(Int64Array::from(x)), Arc::new(Float64Array::from(w))],
        )
        .unwrap();
        let b = MemoryBackend::new();
        b.insert("in", MemoryFile::new().with_table("t", vec![batch]).unwrap());
        b
    }

    fn xs(chunks: Vec<RecordBatch>) -> Vec<Vec<i64>> {
        chunks.iter().map(|c| c.column(0).as_primitive::<Int64Type>().values().to_vec()).collect()
    }

    #[test]
    fn predicate_columns_are_fetched_but_not_returned() {
        let b = backend(6);
        let src = b.open(Path::new("in")).unwrap();
        let cut = CutExpr::compile("w > 0.25").unwrap();
        let chunks: Vec<RecordBatch> =
            ChunkStream::open(src.as_ref(), "t", &["x".into()], Some(&cut), StepBudget::Rows(2))
                .unwrap()
                .collect::<Result<_>>()
                .unwrap();
        assert!(chunks.iter().all(|c| c.num_columns() == 1));
        assert_eq!(xs(chunks), vec![vec![3], vec![4, 5]]);
    }

    #[test]
    fn fully_filtered_table_yields_one_empty_chunk() {
        let b = backend(4);
        let src = b.open(Path::new("in")).unwrap();
        let none = FnPredicate::new(vec![], |batch: &RecordBatch| -> Result<BooleanArray> {
            Ok(BooleanArray::from(vec![false; batch.num_rows()]))
        });
        let chunks: Vec<RecordBatch> =
            ChunkStream::open(src.as_ref(), "t", &["x".into(), "w".into()], Some(&none), StepBudget::Rows(1))
                .unwrap()
                .collect::<Result<_>>()
                .unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].num_rows(), 0);
        assert_eq!(chunks[0].num_columns(), 2);
    }

    #[test]
    fn one_row_steps_cover_every_row_in_order() {
        let b = backend(5);
        let src = b.open(Path::new("in")).unwrap();
        let chunks: Vec<RecordBatch> =
            ChunkStream::open(src.as_ref(), "t", &["x".into()], None, StepBudget::Rows(1))
                .unwrap()
                .collect::<Result<_>>()
                .unwrap();
        assert_eq!(xs(chunks), vec![vec![0], vec![1], vec![2], vec![3], vec![4]]);
    }

    #[test]
    fn predicate_error_ends_stream() {
        let b = backend(4);
        let src = b.open(Path::new("in")).unwrap();
        let failing = FnPredicate::new(vec!["x".into()], |batch: &RecordBatch| -> Result<BooleanArray> {
            let x = batch.column(0).as_primitive::<Int64Type>();
            if x.value(0) >= 2 {
                return Err(Error::Expression("boom".into()));
            }
            Ok(gt(x, &Int64Array::new_scalar(-1))?)
        });
        let mut it =
            ChunkStream::open(src.as_ref(), "t", &["x".into()], Some(&failing), StepBudget::Rows(2))
                .unwrap();
        assert!(it.next().unwrap().is_ok());
        assert!(it.next().unwrap().is_err());
        assert!(it.next().is_none());
    }

    #[test]
    fn unknown_column_is_not_found() {
        let b = backend(1);
        let src = b.open(Path::new("in")).unwrap();
        let err = ChunkStream::open(src.as_ref(), "t", &["nope".into()], None, StepBudget::default())
            .err()
            .unwrap();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
