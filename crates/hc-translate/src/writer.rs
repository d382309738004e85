//! Schema-pinning table writer.

use std::sync::Arc;

use arrow::datatypes::{Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use glob::Pattern;
use hc_core::{Error, MismatchPolicy, Result};
use hc_root::{Destination, TableOptions};

#[derive(Debug, Clone)]
enum WriterState {
    Pending,
    Created { schema: SchemaRef },
}

/// Writes the chunks of one output table.
///
/// The first chunk fixes the table's columns: drop-listed names are removed
/// and the table is created (or adopted, if the destination already has it).
/// Every chunk, the first included, is then appended in arrival order.
#[derive(Debug, Clone)]
pub struct TableWriter {
    name: String,
    options: TableOptions,
    excluded: Vec<Pattern>,
    policy: MismatchPolicy,
    state: WriterState,
    rows: u64,
    skipped: usize,
}

impl TableWriter {
    /// Writer for output table `name`.
    pub fn new(name: impl Into<String>, options: TableOptions) -> Self {
        Self {
            name: name.into(),
            options,
            excluded: Vec::new(),
            policy: MismatchPolicy::default(),
            state: WriterState::Pending,
            rows: 0,
            skipped: 0,
        }
    }

    /// Column names to leave out of the created table.
    pub fn with_excluded(mut self, excluded: Vec<Pattern>) -> Self {
        self.excluded = excluded;
        self
    }

    /// What to do with chunks that do not match the pinned structure.
    pub fn with_policy(mut self, policy: MismatchPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Output table name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Pinned schema, once the first chunk has been written.
    pub fn schema(&self) -> Option<&SchemaRef> {
        match &self.state {
            WriterState::Pending => None,
            WriterState::Created { schema } => Some(schema),
        }
    }

    /// Rows appended so far.
    pub fn rows_written(&self) -> u64 {
        self.rows
    }

    /// Chunks skipped under [`MismatchPolicy::Warn`].
    pub fn skipped_chunks(&self) -> usize {
        self.skipped
    }

    fn is_excluded(&self, name: &str) -> bool {
        self.excluded.iter().any(|p| p.matches(name))
    }

    /// Append `chunk`, creating the table first if needed.
    pub fn write(&mut self, dest: &mut dyn Destination, chunk: &RecordBatch) -> Result<()> {
        let kept: Vec<usize> = chunk
            .schema()
            .fields()
            .iter()
            .enumerate()
            .filter(|(_, f)| !self.is_excluded(f.name()))
            .map(|(i, _)| i)
            .collect();

        let schema = match self.schema().cloned() {
            Some(schema) => schema,
            None => {
                let schema = Arc::new(chunk.schema().project(&kept)?);
                if dest.has_table(&self.name) {
                    tracing::info!(table = %self.name, path = %dest.path().display(), "appending to existing table");
                } else {
                    dest.create_table(&self.name, &schema, &self.options)?;
                    tracing::info!(table = %self.name, columns = schema.fields().len(), "created table");
                }
                self.state = WriterState::Created { schema: schema.clone() };
                schema
            }
        };

        let result = match pinned(&self.name, &schema, chunk, &kept) {
            Ok(projected) => dest.append_rows(&self.name, &projected).map(|()| projected.num_rows()),
            Err(e) => Err(e),
        };
        match result {
            Ok(n) => {
                self.rows += n as u64;
                Ok(())
            }
            Err(Error::SchemaMismatch(msg)) if self.policy == MismatchPolicy::Warn => {
                tracing::warn!(table = %self.name, "{msg}; chunk skipped");
                self.skipped += 1;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

/// Project `chunk` onto the pinned columns; names must match exactly.
fn pinned(table: &str, schema: &Schema, chunk: &RecordBatch, kept: &[usize]) -> Result<RecordBatch> {
    let chunk_schema = chunk.schema();
    let names: Vec<&str> = kept.iter().map(|&i| chunk_schema.field(i).name().as_str()).collect();
    let expected: Vec<&str> = schema.fields().iter().map(|f| f.name().as_str()).collect();
    if names != expected {
        return Err(Error::SchemaMismatch(format!(
            "tables must have the same structure: table '{table}' has [{}], chunk has [{}]",
            expected.join(", "),
            names.join(", ")
        )));
    }
    Ok(chunk.project(kept)?)
}
