//! In-process backend keyed by path.
//!
//! Sources are snapshots taken at open time; destinations write through to
//! the shared map.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use hc_core::{Error, Result, StepBudget};

use crate::container::{
    Backend, BatchIter, Destination, DestinationOptions, Rechunk, TableOptions, TableSource, conform,
    projection,
};
use crate::histogram::Histogram;
use crate::layout::{flatten_batch, flatten_schema};

/// One table held in memory, in stored layout.
#[derive(Debug, Clone)]
pub struct MemoryTable {
    /// Table name.
    pub name: String,
    /// Write hints the table was created with.
    pub options: TableOptions,
    /// Stored schema.
    pub schema: SchemaRef,
    /// Appended batches, in order.
    pub batches: Vec<RecordBatch>,
}

impl MemoryTable {
    /// Total row count.
    pub fn num_rows(&self) -> usize {
        self.batches.iter().map(RecordBatch::num_rows).sum()
    }
}

/// Tables and histograms of one in-memory file.
#[derive(Debug, Clone, Default)]
pub struct MemoryFile {
    /// Tables in creation order.
    pub tables: Vec<MemoryTable>,
    /// Histograms in write order.
    pub histograms: Vec<Histogram>,
}

impl MemoryFile {
    /// Empty file.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a table holding `batches` as-is (builder style).
    ///
    /// The batches must already be in stored layout and share one schema.
    pub fn with_table(mut self, name: &str, batches: Vec<RecordBatch>) -> Result<Self> {
        let schema = batches
            .first()
            .map(RecordBatch::schema)
            .ok_or_else(|| Error::Configuration(format!("table '{name}' needs at least one batch")))?;
        let batches = batches.iter().map(|b| conform(name, &schema, b)).collect::<Result<_>>()?;
        self.tables.push(MemoryTable {
            name: name.to_string(),
            options: TableOptions::default(),
            schema,
            batches,
        });
        Ok(self)
    }

    /// Add a histogram (builder style).
    pub fn with_histogram(mut self, histogram: Histogram) -> Self {
        self.put_histogram(histogram);
        self
    }

    /// Find a table by name.
    pub fn table(&self, name: &str) -> Option<&MemoryTable> {
        self.tables.iter().find(|t| t.name == name)
    }

    /// Find a histogram by name.
    pub fn histogram(&self, name: &str) -> Option<&Histogram> {
        self.histograms.iter().find(|h| h.name == name)
    }

    fn table_mut(&mut self, name: &str) -> Option<&mut MemoryTable> {
        self.tables.iter_mut().find(|t| t.name == name)
    }

    fn put_histogram(&mut self, histogram: Histogram) {
        match self.histograms.iter_mut().find(|h| h.name == histogram.name) {
            Some(slot) => *slot = histogram,
            None => self.histograms.push(histogram),
        }
    }
}

/// Backend holding files in a path-keyed map.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    files: RefCell<BTreeMap<PathBuf, MemoryFile>>,
}

impl MemoryBackend {
    /// Empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Place `file` at `path`, replacing any existing one.
    pub fn insert(&self, path: impl Into<PathBuf>, file: MemoryFile) {
        self.files.borrow_mut().insert(path.into(), file);
    }

    /// Snapshot of the file at `path`.
    pub fn file(&self, path: impl AsRef<Path>) -> Option<MemoryFile> {
        self.files.borrow().get(path.as_ref()).cloned()
    }
}

impl Backend for MemoryBackend {
    fn exists(&self, path: &Path) -> bool {
        self.files.borrow().contains_key(path)
    }

    fn open<'a>(&'a self, path: &Path) -> Result<Box<dyn TableSource + 'a>> {
        let file = self
            .file(path)
            .ok_or_else(|| Error::NotFound(format!("no such file: {}", path.display())))?;
        Ok(Box::new(MemorySource { path: path.to_path_buf(), file }))
    }

    fn create<'a>(
        &'a self,
        path: &Path,
        options: DestinationOptions,
    ) -> Result<Box<dyn Destination + 'a>> {
        self.insert(path, MemoryFile::new());
        Ok(Box::new(MemoryDestination { backend: self, path: path.to_path_buf(), options }))
    }

    fn update<'a>(
        &'a self,
        path: &Path,
        options: DestinationOptions,
    ) -> Result<Box<dyn Destination + 'a>> {
        if !self.exists(path) {
            return Err(Error::NotFound(format!("no such file: {}", path.display())));
        }
        Ok(Box::new(MemoryDestination { backend: self, path: path.to_path_buf(), options }))
    }
}

// ── Source ──────────────────────────────────────────────────────

struct MemorySource {
    path: PathBuf,
    file: MemoryFile,
}

impl MemorySource {
    fn table(&self, name: &str) -> Result<&MemoryTable> {
        self.file.table(name).ok_or_else(|| {
            Error::NotFound(format!("table '{name}' not in {}", self.path.display()))
        })
    }
}

impl TableSource for MemorySource {
    fn path(&self) -> &Path {
        &self.path
    }

    fn table_names(&self) -> Vec<String> {
        self.file.tables.iter().map(|t| t.name.clone()).collect()
    }

    fn histogram_names(&self) -> Vec<String> {
        self.file.histograms.iter().map(|h| h.name.clone()).collect()
    }

    fn schema(&self, table: &str) -> Result<SchemaRef> {
        Ok(self.table(table)?.schema.clone())
    }

    fn num_rows(&self, table: &str) -> Result<u64> {
        Ok(self.table(table)?.num_rows() as u64)
    }

    fn rows<'a>(
        &'a self,
        table: &str,
        columns: &[String],
        budget: StepBudget,
    ) -> Result<BatchIter<'a>> {
        let t = self.table(table)?;
        let indices = projection(&t.schema, columns, table, &self.path)?;
        let projected = std::sync::Arc::new(t.schema.project(&indices)?);
        let batches = t.batches.iter().map(move |b| b.project(&indices).map_err(Error::from));
        Ok(Box::new(Rechunk::new(batches, projected, budget)))
    }

    fn histogram(&self, name: &str) -> Result<Histogram> {
        self.file.histogram(name).cloned().ok_or_else(|| {
            Error::NotFound(format!("histogram '{name}' not in {}", self.path.display()))
        })
    }
}

// ── Destination ─────────────────────────────────────────────────

struct MemoryDestination<'a> {
    backend: &'a MemoryBackend,
    path: PathBuf,
    options: DestinationOptions,
}

impl MemoryDestination<'_> {
    fn with_file<T>(&self, f: impl FnOnce(&mut MemoryFile) -> Result<T>) -> Result<T> {
        let mut files = self.backend.files.borrow_mut();
        let file = files.get_mut(&self.path).ok_or_else(|| {
            Error::DestinationState(format!("{} was removed while open", self.path.display()))
        })?;
        f(file)
    }

    fn snapshot(&self) -> MemoryFile {
        self.backend.file(&self.path).unwrap_or_default()
    }
}

impl Destination for MemoryDestination<'_> {
    fn path(&self) -> &Path {
        &self.path
    }

    fn has_table(&self, name: &str) -> bool {
        self.backend.files.borrow().get(&self.path).is_some_and(|f| f.table(name).is_some())
    }

    fn table_names(&self) -> Vec<String> {
        self.snapshot().tables.iter().map(|t| t.name.clone()).collect()
    }

    fn create_table(
        &mut self,
        name: &str,
        schema: &SchemaRef,
        options: &TableOptions,
    ) -> Result<()> {
        let stored = flatten_schema(schema, self.options.naming.as_ref())?;
        let path = self.path.clone();
        self.with_file(|file| {
            if file.table(name).is_some() {
                return Err(Error::DestinationState(format!(
                    "table '{name}' already exists in {}",
                    path.display()
                )));
            }
            file.tables.push(MemoryTable {
                name: name.to_string(),
                options: options.clone(),
                schema: stored,
                batches: Vec::new(),
            });
            Ok(())
        })
    }

    fn append_rows(&mut self, name: &str, chunk: &RecordBatch) -> Result<()> {
        let flat = flatten_batch(chunk, self.options.naming.as_ref())?;
        let path = self.path.clone();
        self.with_file(|file| {
            let table = file.table_mut(name).ok_or_else(|| {
                Error::NotFound(format!("table '{name}' not in {}", path.display()))
            })?;
            let batch = conform(name, &table.schema, &flat)?;
            if batch.num_rows() > 0 {
                table.batches.push(batch);
            }
            Ok(())
        })
    }

    fn histogram_names(&self) -> Vec<String> {
        self.snapshot().histograms.iter().map(|h| h.name.clone()).collect()
    }

    fn histogram(&self, name: &str) -> Result<Option<Histogram>> {
        Ok(self.snapshot().histogram(name).cloned())
    }

    fn write_histogram(&mut self, histogram: &Histogram) -> Result<()> {
        histogram.validate()?;
        self.with_file(|file| {
            file.put_histogram(histogram.clone());
            Ok(())
        })
    }

    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::histogram::Axis;
    use arrow::array::{ArrayRef, AsArray, Float64Array, Int64Array};
    use arrow::datatypes::{DataType, Field, Int64Type, Schema};
    use std::sync::Arc;

    fn xy(x: Vec<i64>, y: Vec<f64>) -> RecordBatch {
        let schema = Schema::new(vec![
            Field::new("x", DataType::Int64, false),
            Field::new("y", DataType::Float64, false),
        ]);
        RecordBatch::try_new(
            Arc::new(schema),
            vec![Arc::new(Int64Array::from(x)) as ArrayRef, Arc::new(Float64Array::from(y))],
        )
        .unwrap()
    }

    #[test]
    fn source_streams_projected_columns() {
        let backend = MemoryBackend::new();
        let file = MemoryFile::new()
            .with_table("t", vec![xy(vec![1, 2], vec![4.0, 5.0]), xy(vec![3], vec![6.0])])
            .unwrap();
        backend.insert("in", file);

        let src = backend.open(Path::new("in")).unwrap();
        assert_eq!(src.table_names(), vec!["t".to_string()]);
        assert_eq!(src.num_rows("t").unwrap(), 3);
        let chunks: Vec<_> =
            src.rows("t", &["x".to_string()], StepBudget::Rows(2)).unwrap().collect();
        assert_eq!(chunks.len(), 2);
        let first = chunks[0].as_ref().unwrap();
        assert_eq!(first.num_columns(), 1);
        assert_eq!(first.column(0).as_primitive::<Int64Type>().values().to_vec(), vec![1, 2]);

        assert!(src.rows("t", &["nope".to_string()], StepBudget::Rows(2)).is_err());
        assert!(matches!(backend.open(Path::new("missing")), Err(Error::NotFound(_))));
    }

    #[test]
    fn destination_writes_through() {
        let backend = MemoryBackend::new();
        let batch = xy(vec![1, 2, 3], vec![4.0, 5.0, 6.0]);
        {
            let mut dst =
                backend.create(Path::new("out"), DestinationOptions::default()).unwrap();
            dst.create_table("t", &batch.schema(), &TableOptions::default()).unwrap();
            dst.append_rows("t", &batch).unwrap();
            assert!(dst.create_table("t", &batch.schema(), &TableOptions::default()).is_err());

            let h = Histogram::new("h", vec![Axis::regular("x", 2, 0.0, 1.0).unwrap()]).unwrap();
            dst.write_histogram(&h).unwrap();
            dst.finish().unwrap();
        }
        let out = backend.file("out").unwrap();
        assert_eq!(out.table("t").unwrap().num_rows(), 3);
        assert_eq!(out.histograms.len(), 1);
        let src = backend.open(Path::new("out")).unwrap();
        assert_eq!(crate::container::read_table(src.as_ref(), "t").unwrap(), batch);
    }

    #[test]
    fn append_with_wrong_structure_fails() {
        let backend = MemoryBackend::new();
        let mut dst = backend.create(Path::new("out"), DestinationOptions::default()).unwrap();
        let batch = xy(vec![1], vec![2.0]);
        dst.create_table("t", &batch.schema(), &TableOptions::default()).unwrap();
        let other = RecordBatch::try_new(
            Arc::new(Schema::new(vec![Field::new("x", DataType::Int64, false)])),
            vec![Arc::new(Int64Array::from(vec![1])) as ArrayRef],
        )
        .unwrap();
        assert!(matches!(dst.append_rows("t", &other), Err(Error::SchemaMismatch(_))));
    }

    #[test]
    fn update_requires_existing_file() {
        let backend = MemoryBackend::new();
        assert!(backend.update(Path::new("nothing"), DestinationOptions::default()).is_err());
    }
}
