//! Parquet import, export and merge.
//!
//! Parquet moves whole tables: export streams one table's selected chunks
//! into an [`ArrowWriter`], import streams row groups into a destination
//! table. Neither path regroups or filters on import.

use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use arrow::array::{ArrayRef, new_null_array};
use arrow::compute::cast;
use arrow::datatypes::{Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use hc_core::{Error, Result};
use hc_root::Backend;
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::basic::{Compression, GzipLevel};
use parquet::file::properties::WriterProperties;
use parquet::file::reader::ChunkReader;
use serde::{Deserialize, Serialize};

use crate::merge::{DestinationMode, MergeSummary, Merger, TableSummary, resolve_destination};
use crate::writer::TableWriter;

/// Default output table name of a Parquet import.
pub const DEFAULT_TABLE_NAME: &str = "tree";

// ── Options ─────────────────────────────────────────────────────

/// Parquet column-chunk compression.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParquetCompression {
    /// Uncompressed.
    None,
    /// Snappy.
    #[default]
    Snappy,
    /// Gzip, levels 0–10.
    Gzip,
    /// LZ4 (raw block format).
    Lz4,
    /// Zstandard, levels 1–22. Needs the `parquet-zstd` feature.
    Zstd,
}

impl ParquetCompression {
    fn codec(self, level: Option<u32>) -> Result<Compression> {
        Ok(match self {
            ParquetCompression::None => Compression::UNCOMPRESSED,
            ParquetCompression::Snappy => Compression::SNAPPY,
            ParquetCompression::Lz4 => Compression::LZ4_RAW,
            ParquetCompression::Gzip => match level {
                Some(l) => Compression::GZIP(GzipLevel::try_new(l).map_err(|e| {
                    Error::Configuration(format!("invalid gzip level {l}: {e}"))
                })?),
                None => Compression::GZIP(GzipLevel::default()),
            },
            ParquetCompression::Zstd => zstd_codec(level)?,
        })
    }
}

#[cfg(feature = "parquet-zstd")]
fn zstd_codec(level: Option<u32>) -> Result<Compression> {
    use parquet::basic::ZstdLevel;
    let Some(l) = level else {
        return Ok(Compression::ZSTD(ZstdLevel::default()));
    };
    let level = i32::try_from(l)
        .ok()
        .and_then(|l| ZstdLevel::try_new(l).ok())
        .ok_or_else(|| Error::Configuration(format!("invalid zstd level {l}")))?;
    Ok(Compression::ZSTD(level))
}

#[cfg(not(feature = "parquet-zstd"))]
fn zstd_codec(_level: Option<u32>) -> Result<Compression> {
    Err(Error::Configuration(
        "zstd Parquet compression needs the `parquet-zstd` feature".into(),
    ))
}

impl FromStr for ParquetCompression {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "uncompressed" => Ok(Self::None),
            "snappy" => Ok(Self::Snappy),
            "gzip" => Ok(Self::Gzip),
            "lz4" => Ok(Self::Lz4),
            "zstd" => Ok(Self::Zstd),
            other => Err(Error::Configuration(format!(
                "unknown Parquet compression '{other}'; expected one of none, snappy, gzip, lz4, zstd"
            ))),
        }
    }
}

impl fmt::Display for ParquetCompression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "none",
            Self::Snappy => "snappy",
            Self::Gzip => "gzip",
            Self::Lz4 => "lz4",
            Self::Zstd => "zstd",
        })
    }
}

/// Options of Parquet output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParquetOptions {
    /// Column-chunk compression.
    pub compression: ParquetCompression,
    /// Compression level, where the codec takes one.
    pub level: Option<u32>,
    /// Maximum rows per row group.
    pub row_group_size: usize,
    /// Replace an existing output file.
    pub force: bool,
}

impl Default for ParquetOptions {
    fn default() -> Self {
        Self { compression: ParquetCompression::default(), level: None, row_group_size: 1024 * 1024, force: false }
    }
}

impl ParquetOptions {
    /// Column-chunk compression and level.
    pub fn with_compression(mut self, compression: ParquetCompression, level: Option<u32>) -> Self {
        self.compression = compression;
        self.level = level;
        self
    }

    /// Maximum rows per row group.
    pub fn with_row_group_size(mut self, rows: usize) -> Self {
        self.row_group_size = rows;
        self
    }

    /// Replace an existing output file.
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Writer properties for these options.
    pub fn writer_properties(&self) -> Result<WriterProperties> {
        if self.row_group_size == 0 {
            return Err(Error::Configuration("row group size must be positive".into()));
        }
        Ok(WriterProperties::builder()
            .set_compression(self.compression.codec(self.level)?)
            .set_max_row_group_size(self.row_group_size)
            .build())
    }
}

// ── Input ───────────────────────────────────────────────────────

/// A Parquet file on disk or in memory.
#[derive(Debug, Clone)]
pub enum ParquetInput {
    /// File at a path.
    File(PathBuf),
    /// In-memory file contents.
    Bytes(bytes::Bytes),
}

impl ParquetInput {
    fn label(&self) -> PathBuf {
        match self {
            ParquetInput::File(p) => p.clone(),
            ParquetInput::Bytes(_) => PathBuf::from("<memory>"),
        }
    }

    fn for_each_batch(&self, sink: impl FnMut(RecordBatch) -> Result<()>) -> Result<usize> {
        match self {
            ParquetInput::File(p) => for_each_row_group(|| Ok(File::open(p)?), sink),
            ParquetInput::Bytes(b) => for_each_row_group(|| Ok(b.clone()), sink),
        }
    }
}

impl From<&Path> for ParquetInput {
    fn from(p: &Path) -> Self {
        ParquetInput::File(p.to_path_buf())
    }
}

impl From<PathBuf> for ParquetInput {
    fn from(p: PathBuf) -> Self {
        ParquetInput::File(p)
    }
}

impl From<bytes::Bytes> for ParquetInput {
    fn from(b: bytes::Bytes) -> Self {
        ParquetInput::Bytes(b)
    }
}

impl From<&[u8]> for ParquetInput {
    fn from(data: &[u8]) -> Self {
        ParquetInput::Bytes(bytes::Bytes::copy_from_slice(data))
    }
}

/// Read one row group at a time. Returns the number of row groups.
///
/// A file without row groups yields one empty batch with the file schema.
fn for_each_row_group<R, O>(open: O, mut sink: impl FnMut(RecordBatch) -> Result<()>) -> Result<usize>
where
    R: ChunkReader + 'static,
    O: Fn() -> Result<R>,
{
    let builder = ParquetRecordBatchReaderBuilder::try_new(open()?)?;
    let sizes: Vec<usize> =
        builder.metadata().row_groups().iter().map(|g| g.num_rows().max(0) as usize).collect();
    if sizes.is_empty() {
        sink(RecordBatch::new_empty(builder.schema().clone()))?;
        return Ok(0);
    }
    drop(builder);

    for (i, rows) in sizes.iter().enumerate() {
        let reader = ParquetRecordBatchReaderBuilder::try_new(open()?)?
            .with_row_groups(vec![i])
            .with_batch_size((*rows).max(1))
            .build()?;
        for batch in reader {
            sink(batch?)?;
        }
        tracing::debug!(row_group = i, rows, "read row group");
    }
    Ok(sizes.len())
}

fn file_schema(path: &Path) -> Result<SchemaRef> {
    Ok(ParquetRecordBatchReaderBuilder::try_new(File::open(path)?)?.schema().clone())
}

/// Drop field metadata so counter annotations do not leak into Parquet.
fn plain_schema(schema: &Schema) -> SchemaRef {
    let fields: Vec<Field> =
        schema.fields().iter().map(|f| f.as_ref().clone().with_metadata(Default::default())).collect();
    Arc::new(Schema::new(fields))
}

fn check_output(path: &Path, force: bool) -> Result<()> {
    resolve_destination(path.exists(), force, false, path).map(|_| ())
}

// ── Export and import ───────────────────────────────────────────

impl Merger {
    /// Write one table of `source` to a Parquet file.
    ///
    /// `table` may be omitted when the source holds exactly one table.
    /// Column selection, cut and step budget apply as in [`Merger::copy`];
    /// nested groups are written as lists of structs and counters are left out.
    pub fn table_to_parquet(
        &self,
        backend: &dyn Backend,
        source: &Path,
        table: Option<&str>,
        dest: &Path,
        options: &ParquetOptions,
    ) -> Result<MergeSummary> {
        check_output(dest, options.force)?;
        let props = options.writer_properties()?;
        let src = backend.open(source)?;
        let names = src.table_names();
        let table = match table {
            Some(t) if names.iter().any(|n| n == t) => t.to_string(),
            Some(t) => {
                return Err(Error::NotFound(format!(
                    "table '{t}' does not match any table in file '{}'",
                    source.display()
                )));
            }
            None => match names.as_slice() {
                [only] => only.clone(),
                _ => {
                    return Err(Error::Configuration(format!(
                        "{} holds {} tables; name the one to export",
                        source.display(),
                        names.len()
                    )));
                }
            },
        };

        let mut writer: Option<(SchemaRef, ArrowWriter<File>)> = None;
        let mut rows = 0u64;
        self.for_each_chunk(src.as_ref(), &table, |chunk| {
            if writer.is_none() {
                let schema = plain_schema(&chunk.schema());
                let w = ArrowWriter::try_new(File::create(dest)?, schema.clone(), Some(props.clone()))?;
                writer = Some((schema, w));
            }
            let Some((schema, w)) = writer.as_mut() else {
                return Ok(());
            };
            let chunk = RecordBatch::try_new(schema.clone(), chunk.columns().to_vec())?;
            w.write(&chunk)?;
            rows += chunk.num_rows() as u64;
            Ok(())
        })?;

        let mut columns = Vec::new();
        if let Some((schema, w)) = writer {
            w.close()?;
            columns = schema.fields().iter().map(|f| f.name().clone()).collect();
        }
        tracing::info!(table = %table, rows, path = %dest.display(), compression = %options.compression, "wrote parquet");

        Ok(MergeSummary {
            operation: "to-parquet".into(),
            destination: dest.to_path_buf(),
            mode: DestinationMode::Create,
            sources_read: vec![source.to_path_buf()],
            sources_skipped: Vec::new(),
            tables: vec![TableSummary { name: table, rows, columns, skipped_chunks: 0 }],
            histograms: Vec::new(),
        })
    }

    /// Import a Parquet file as table `name` (default [`DEFAULT_TABLE_NAME`]).
    ///
    /// Row groups are streamed in order; the table is created from the first
    /// one. Destination handling follows the run options (force, append).
    pub fn parquet_to_table(
        &self,
        backend: &dyn Backend,
        input: impl Into<ParquetInput>,
        dest: &Path,
        name: Option<&str>,
    ) -> Result<MergeSummary> {
        let input = input.into();
        let name = name.unwrap_or(DEFAULT_TABLE_NAME);
        let mode = self.destination_mode(backend, dest)?;
        let mut out = self.open_destination(backend, dest, mode)?;
        let mut writer = TableWriter::new(name, self.options().table_options())
            .with_policy(self.options().on_structure_mismatch);

        let groups = input.for_each_batch(|batch| writer.write(out.as_mut(), &batch))?;
        out.finish()?;
        tracing::info!(table = name, rows = writer.rows_written(), row_groups = groups, path = %dest.display(), "imported parquet");

        Ok(MergeSummary {
            operation: "from-parquet".into(),
            destination: dest.to_path_buf(),
            mode,
            sources_read: vec![input.label()],
            sources_skipped: Vec::new(),
            tables: vec![TableSummary {
                name: name.to_string(),
                rows: writer.rows_written(),
                columns: writer
                    .schema()
                    .map(|s| s.fields().iter().map(|f| f.name().clone()).collect())
                    .unwrap_or_default(),
                skipped_chunks: writer.skipped_chunks(),
            }],
            histograms: Vec::new(),
        })
    }
}

// ── Merge ───────────────────────────────────────────────────────

/// Merge two or more Parquet files into one.
///
/// The output schema is the union of the inputs by column name, in
/// first-seen order. A column missing from a file is filled with nulls for
/// that file's rows; a name seen with two different types is a
/// [`Error::SchemaMismatch`].
pub fn merge_parquet(
    sources: &[PathBuf],
    dest: &Path,
    options: &ParquetOptions,
    skip_bad_files: bool,
) -> Result<MergeSummary> {
    if sources.len() < 2 {
        return Err(Error::Configuration(format!(
            "merging Parquet files needs at least 2 sources, got {}",
            sources.len()
        )));
    }
    check_output(dest, options.force)?;
    let props = options.writer_properties()?;

    let mut read: Vec<(PathBuf, SchemaRef)> = Vec::new();
    let mut skipped = Vec::new();
    for path in sources {
        match file_schema(path) {
            Ok(schema) => read.push((path.clone(), schema)),
            Err(e) if skip_bad_files => {
                tracing::warn!(path = %path.display(), error = %e, "skipping unreadable file");
                skipped.push(path.clone());
            }
            Err(e) => return Err(e),
        }
    }
    if read.is_empty() {
        return Err(Error::NotFound(format!("none of the {} sources could be opened", sources.len())));
    }
    let schema = union_schema(&read)?;

    let mut writer = ArrowWriter::try_new(File::create(dest)?, schema.clone(), Some(props))?;
    let mut rows = 0u64;
    for (path, _) in &read {
        let before = rows;
        for_each_row_group(
            || Ok(File::open(path)?),
            |batch| {
                let batch = align(&batch, &schema)?;
                rows += batch.num_rows() as u64;
                Ok(writer.write(&batch)?)
            },
        )?;
        tracing::info!(path = %path.display(), rows = rows - before, "merged parquet file");
    }
    writer.close()?;

    let name = dest.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    Ok(MergeSummary {
        operation: "merge-parquet".into(),
        destination: dest.to_path_buf(),
        mode: DestinationMode::Create,
        sources_read: read.into_iter().map(|(p, _)| p).collect(),
        sources_skipped: skipped,
        tables: vec![TableSummary {
            name,
            rows,
            columns: schema.fields().iter().map(|f| f.name().clone()).collect(),
            skipped_chunks: 0,
        }],
        histograms: Vec::new(),
    })
}

fn union_schema(inputs: &[(PathBuf, SchemaRef)]) -> Result<SchemaRef> {
    let mut fields: Vec<(Field, &Path)> = Vec::new();
    for (path, schema) in inputs {
        for f in schema.fields() {
            match fields.iter_mut().find(|(u, _)| u.name() == f.name()) {
                Some((u, first)) => {
                    if !u.data_type().equals_datatype(f.data_type()) {
                        return Err(Error::SchemaMismatch(format!(
                            "column '{}' is {} in {} but {} in {}",
                            f.name(),
                            u.data_type(),
                            first.display(),
                            f.data_type(),
                            path.display()
                        )));
                    }
                    if f.is_nullable() && !u.is_nullable() {
                        *u = u.clone().with_nullable(true);
                    }
                }
                None => fields.push((f.as_ref().clone().with_metadata(Default::default()), path.as_path())),
            }
        }
    }
    let fields = fields
        .into_iter()
        .map(|(f, _)| {
            let everywhere = inputs.iter().all(|(_, s)| s.field_with_name(f.name()).is_ok());
            if everywhere { f } else { f.with_nullable(true) }
        })
        .collect::<Vec<_>>();
    Ok(Arc::new(Schema::new(fields)))
}

fn align(batch: &RecordBatch, schema: &SchemaRef) -> Result<RecordBatch> {
    let columns = schema
        .fields()
        .iter()
        .map(|f| match batch.column_by_name(f.name()) {
            Some(c) if c.data_type() == f.data_type() => Ok(c.clone()),
            Some(c) => Ok(cast(c, f.data_type())?),
            None => Ok(new_null_array(f.data_type(), batch.num_rows())),
        })
        .collect::<Result<Vec<ArrayRef>>>()?;
    Ok(RecordBatch::try_new(schema.clone(), columns)?)
}
