//! COPY, MERGE and histogram-addition runs.
//!
//! A [`Merger`] validates its [`MergeOptions`] once, then drives each table
//! of each source through catalog → selector → chunk stream → regrouper →
//! writer, and folds every source's histograms into one accumulator that is
//! written out when the run ends.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::record_batch::RecordBatch;
use hc_core::{
    ColumnSpec, Compression, CompressionAlgorithm, Error, MappingResolution, MismatchPolicy,
    NameSetMode, NameSpec, Result, StepBudget,
};
use hc_root::{
    Backend, CutExpr, Destination, DestinationOptions, RowPredicate, SeparatorNaming, TableOptions,
    TableSource,
};
use serde::{Deserialize, Serialize};

use crate::catalog::ColumnCatalog;
use crate::hadd::{HaddOptions, HistogramAccumulator, accumulate_files, open_or_skip};
use crate::regroup::Regrouper;
use crate::selector::ColumnSelector;
use crate::stream::ChunkStream;
use crate::tables::TableSetResolver;
use crate::writer::TableWriter;

// ── Options ─────────────────────────────────────────────────────

/// Options of a copy, merge or histogram-addition run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeOptions {
    /// Replace an existing destination.
    pub force: bool,
    /// Add to an existing destination.
    pub append: bool,
    /// Chunk size of streaming reads.
    pub step_budget: StepBudget,
    /// Destination compression algorithm.
    pub compression: CompressionAlgorithm,
    /// Destination compression level.
    pub compression_level: u32,
    /// Every source carries the same ordered histogram list.
    pub same_names: bool,
    /// Union or intersection of histogram names across sources.
    pub name_set: NameSetMode,
    /// Skip sources that cannot be opened.
    pub skip_bad_files: bool,
    /// Columns to keep.
    pub keep_columns: Option<ColumnSpec>,
    /// Columns to drop.
    pub drop_columns: Option<ColumnSpec>,
    /// Tables to keep.
    pub keep_tables: Option<NameSpec>,
    /// Tables to drop.
    pub drop_tables: Option<NameSpec>,
    /// Row selection as a cut expression.
    pub cut: Option<String>,
    /// Title of created tables.
    pub title: String,
    /// Initial basket-index capacity of created tables.
    pub initial_basket_capacity: usize,
    /// Basket-index growth factor.
    pub resize_factor: f64,
    /// Flat naming of nested columns and counters.
    pub naming: SeparatorNaming,
    /// Handling of chunks that do not match the destination table.
    pub on_structure_mismatch: MismatchPolicy,
    /// How per-table column mappings apply to other tables.
    pub mapping_resolution: MappingResolution,
}

impl Default for MergeOptions {
    fn default() -> Self {
        let table = TableOptions::default();
        let compression = Compression::default();
        Self {
            force: false,
            append: false,
            step_budget: StepBudget::default(),
            compression: compression.algorithm,
            compression_level: compression.level,
            same_names: false,
            name_set: NameSetMode::default(),
            skip_bad_files: false,
            keep_columns: None,
            drop_columns: None,
            keep_tables: None,
            drop_tables: None,
            cut: None,
            title: table.title,
            initial_basket_capacity: table.initial_basket_capacity,
            resize_factor: table.resize_factor,
            naming: SeparatorNaming::default(),
            on_structure_mismatch: MismatchPolicy::default(),
            mapping_resolution: MappingResolution::default(),
        }
    }
}

impl MergeOptions {
    /// Replace an existing destination.
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Add to an existing destination.
    pub fn with_append(mut self, append: bool) -> Self {
        self.append = append;
        self
    }

    /// Chunk size of streaming reads.
    pub fn with_step_budget(mut self, budget: StepBudget) -> Self {
        self.step_budget = budget;
        self
    }

    /// Destination compression.
    pub fn with_compression(mut self, algorithm: CompressionAlgorithm, level: u32) -> Self {
        self.compression = algorithm;
        self.compression_level = level;
        self
    }

    /// Columns to keep.
    pub fn with_keep_columns(mut self, spec: impl Into<ColumnSpec>) -> Self {
        self.keep_columns = Some(spec.into());
        self
    }

    /// Columns to drop.
    pub fn with_drop_columns(mut self, spec: impl Into<ColumnSpec>) -> Self {
        self.drop_columns = Some(spec.into());
        self
    }

    /// Tables to keep.
    pub fn with_keep_tables(mut self, spec: impl Into<NameSpec>) -> Self {
        self.keep_tables = Some(spec.into());
        self
    }

    /// Tables to drop.
    pub fn with_drop_tables(mut self, spec: impl Into<NameSpec>) -> Self {
        self.drop_tables = Some(spec.into());
        self
    }

    /// Row selection.
    pub fn with_cut(mut self, cut: impl Into<String>) -> Self {
        self.cut = Some(cut.into());
        self
    }

    /// Title of created tables.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Histogram name-set handling.
    pub fn with_name_set(mut self, mode: NameSetMode) -> Self {
        self.name_set = mode;
        self
    }

    /// Require identical ordered histogram lists.
    pub fn with_same_names(mut self, same: bool) -> Self {
        self.same_names = same;
        self
    }

    /// Skip unreadable sources.
    pub fn with_skip_bad_files(mut self, skip: bool) -> Self {
        self.skip_bad_files = skip;
        self
    }

    /// Flat naming of nested columns.
    pub fn with_naming(mut self, naming: SeparatorNaming) -> Self {
        self.naming = naming;
        self
    }

    /// Structure-mismatch handling.
    pub fn with_mismatch_policy(mut self, policy: MismatchPolicy) -> Self {
        self.on_structure_mismatch = policy;
        self
    }

    /// Per-table mapping resolution.
    pub fn with_mapping_resolution(mut self, resolution: MappingResolution) -> Self {
        self.mapping_resolution = resolution;
        self
    }

    /// Validated compression setting.
    pub fn compression(&self) -> Result<Compression> {
        Compression::new(self.compression, self.compression_level)
    }

    /// Check option conflicts. Performs no I/O.
    pub fn validate(&self) -> Result<()> {
        if self.force && self.append {
            return Err(Error::Configuration(
                "force and append are mutually exclusive; give only one".into(),
            ));
        }
        if self.initial_basket_capacity == 0 {
            return Err(Error::Configuration("initial basket capacity must be positive".into()));
        }
        if self.resize_factor.is_nan() || self.resize_factor <= 1.0 {
            return Err(Error::Configuration(format!(
                "resize factor must be greater than 1, got {}",
                self.resize_factor
            )));
        }
        self.compression()?;
        ColumnSelector::new(
            self.keep_columns.as_ref(),
            self.drop_columns.as_ref(),
            self.mapping_resolution,
        )?;
        TableSetResolver::new(self.keep_tables.as_ref(), self.drop_tables.as_ref())?;
        Ok(())
    }

    /// Write hints for created tables.
    pub fn table_options(&self) -> TableOptions {
        TableOptions {
            title: self.title.clone(),
            initial_basket_capacity: self.initial_basket_capacity,
            resize_factor: self.resize_factor,
        }
    }

    /// Options for opening the destination.
    pub fn destination_options(&self) -> Result<DestinationOptions> {
        Ok(DestinationOptions { compression: self.compression()?, naming: Arc::new(self.naming.clone()) })
    }

    /// Histogram name-set options.
    pub fn hadd_options(&self) -> HaddOptions {
        HaddOptions {
            name_set: self.name_set,
            same_names: self.same_names,
            skip_bad_files: self.skip_bad_files,
        }
    }
}

// ── Destination handling ────────────────────────────────────────

/// How the destination is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DestinationMode {
    /// Created fresh (replacing an existing one under `force`).
    Create,
    /// Opened for appending.
    Append,
}

/// Decide how to open a destination.
///
/// `force` and `append` together are a configuration error whether or not
/// the destination exists.
pub fn resolve_destination(
    exists: bool,
    force: bool,
    append: bool,
    path: &Path,
) -> Result<DestinationMode> {
    if force && append {
        return Err(Error::Configuration(
            "force and append are mutually exclusive; give only one".into(),
        ));
    }
    match (exists, append) {
        (true, true) => Ok(DestinationMode::Append),
        (false, true) => Err(Error::DestinationState(format!(
            "cannot append to {}: it does not exist",
            path.display()
        ))),
        (true, false) if !force => Err(Error::DestinationState(format!(
            "{} already exists; use force to replace it or append to add to it",
            path.display()
        ))),
        _ => Ok(DestinationMode::Create),
    }
}

// ── Progress ────────────────────────────────────────────────────

/// Receives progress events. Every method defaults to doing nothing.
pub trait ProgressSink {
    /// Source `index` of `total` is about to be read.
    fn source_started(&self, _index: usize, _total: usize, _path: &Path) {}

    /// A chunk of `rows` rows was written to `table`.
    fn chunk_written(&self, _table: &str, _rows: usize) {}
}

/// Progress sink that ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {}

// ── Summary ─────────────────────────────────────────────────────

/// One output table of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableSummary {
    /// Table name.
    pub name: String,
    /// Rows appended in this run.
    pub rows: u64,
    /// Output columns (logical, before flattening).
    pub columns: Vec<String>,
    /// Chunks skipped under the lenient mismatch policy.
    pub skipped_chunks: usize,
}

/// Outcome of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergeSummary {
    /// `copy`, `merge` or `add`.
    pub operation: String,
    /// Destination path.
    pub destination: PathBuf,
    /// How the destination was opened.
    pub mode: DestinationMode,
    /// Sources read, in order.
    pub sources_read: Vec<PathBuf>,
    /// Sources skipped as unreadable.
    pub sources_skipped: Vec<PathBuf>,
    /// Output tables.
    pub tables: Vec<TableSummary>,
    /// Histograms written.
    pub histograms: Vec<String>,
}

// ── Merger ──────────────────────────────────────────────────────

/// Runs copies, merges and histogram additions with fixed options.
pub struct Merger {
    options: MergeOptions,
    selector: ColumnSelector,
    tables: TableSetResolver,
    predicate: Option<Box<dyn RowPredicate>>,
    progress: Box<dyn ProgressSink>,
}

impl std::fmt::Debug for Merger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Merger")
            .field("options", &self.options)
            .field("predicate", &self.predicate)
            .finish_non_exhaustive()
    }
}

impl Merger {
    /// Validate `options` and compile the cut, if any.
    pub fn new(options: MergeOptions) -> Result<Self> {
        options.validate()?;
        let selector = ColumnSelector::new(
            options.keep_columns.as_ref(),
            options.drop_columns.as_ref(),
            options.mapping_resolution,
        )?;
        let tables = TableSetResolver::new(options.keep_tables.as_ref(), options.drop_tables.as_ref())?;
        let predicate: Option<Box<dyn RowPredicate>> =
            match options.cut.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
                Some(cut) => Some(Box::new(CutExpr::compile(cut)?)),
                None => None,
            };
        Ok(Self { options, selector, tables, predicate, progress: Box::new(NoProgress) })
    }

    /// Replace the row predicate (and any cut) with `predicate`.
    pub fn with_predicate(mut self, predicate: impl RowPredicate + 'static) -> Self {
        self.predicate = Some(Box::new(predicate));
        self
    }

    /// Report progress to `progress`.
    pub fn with_progress(mut self, progress: impl ProgressSink + 'static) -> Self {
        self.progress = Box::new(progress);
        self
    }

    /// The run options.
    pub fn options(&self) -> &MergeOptions {
        &self.options
    }

    pub(crate) fn predicate(&self) -> Option<&dyn RowPredicate> {
        self.predicate.as_deref()
    }

    /// Copy one source into `dest`.
    pub fn copy(&self, backend: &dyn Backend, source: &Path, dest: &Path) -> Result<MergeSummary> {
        self.run("copy", backend, &[source.to_path_buf()], dest)
    }

    /// Merge two or more sources into `dest`, in order.
    pub fn merge(
        &self,
        backend: &dyn Backend,
        sources: &[PathBuf],
        dest: &Path,
    ) -> Result<MergeSummary> {
        if sources.len() < 2 {
            return Err(Error::Configuration(format!(
                "merge needs at least 2 sources, got {}; use copy for a single file",
                sources.len()
            )));
        }
        self.run("merge", backend, sources, dest)
    }

    /// Add the histograms of two or more sources into `dest`. Tables are ignored.
    pub fn add_histograms(
        &self,
        backend: &dyn Backend,
        sources: &[PathBuf],
        dest: &Path,
    ) -> Result<MergeSummary> {
        if sources.len() < 2 {
            return Err(Error::Configuration(format!(
                "adding histograms needs at least 2 sources, got {}",
                sources.len()
            )));
        }
        let mode = self.destination_mode(backend, dest)?;
        let mut out = self.open_destination(backend, dest, mode)?;
        let mut acc = HistogramAccumulator::new();
        if mode == DestinationMode::Append {
            seed_from_destination(out.as_ref(), &mut acc)?;
        }
        let report = accumulate_files(backend, sources, &self.options.hadd_options(), &mut acc)?;
        if report.read.is_empty() {
            return Err(Error::NotFound(format!(
                "none of the {} sources could be opened",
                sources.len()
            )));
        }
        let histograms = write_histograms(out.as_mut(), acc)?;
        out.finish()?;
        tracing::info!(path = %dest.display(), histograms = histograms.len(), "histograms added");

        Ok(MergeSummary {
            operation: "add".into(),
            destination: dest.to_path_buf(),
            mode,
            sources_read: report.read,
            sources_skipped: report.skipped,
            tables: Vec::new(),
            histograms,
        })
    }

    pub(crate) fn destination_mode(&self, backend: &dyn Backend, dest: &Path) -> Result<DestinationMode> {
        self.options.validate()?;
        resolve_destination(backend.exists(dest), self.options.force, self.options.append, dest)
    }

    pub(crate) fn open_destination<'b>(
        &self,
        backend: &'b dyn Backend,
        path: &Path,
        mode: DestinationMode,
    ) -> Result<Box<dyn Destination + 'b>> {
        let options = self.options.destination_options()?;
        tracing::info!(path = %path.display(), ?mode, compression = %options.compression.algorithm, "opening destination");
        match mode {
            DestinationMode::Create => backend.create(path, options),
            DestinationMode::Append => backend.update(path, options),
        }
    }

    fn run(
        &self,
        operation: &str,
        backend: &dyn Backend,
        sources: &[PathBuf],
        dest_path: &Path,
    ) -> Result<MergeSummary> {
        let mode = self.destination_mode(backend, dest_path)?;
        let skip = self.options.skip_bad_files;
        let total = sources.len();
        let mut skipped = Vec::new();

        let mut pending = sources.iter().enumerate();
        let (first_index, first) = loop {
            let Some((i, path)) = pending.next() else {
                return Err(Error::NotFound(format!("none of the {total} sources could be opened")));
            };
            if let Some(f) = open_or_skip(backend, path, skip, &mut skipped)? {
                break (i, f);
            }
        };

        let mut dest = self.open_destination(backend, dest_path, mode)?;
        let names = self.tables.resolve(&first.table_names(), first.path())?;
        let mut writers = names
            .iter()
            .map(|t| {
                Ok(TableWriter::new(t.as_str(), self.options.table_options())
                    .with_excluded(self.selector.drop_patterns(t)?)
                    .with_policy(self.options.on_structure_mismatch))
            })
            .collect::<Result<Vec<_>>>()?;

        self.progress.source_started(first_index, total, first.path());
        self.transfer_tables(first.as_ref(), &mut writers, dest.as_mut())?;
        let mut read = vec![first.path().to_path_buf()];
        let reference = first.path().to_path_buf();
        drop(first);

        for (i, path) in pending {
            let Some(source) = open_or_skip(backend, path, skip, &mut skipped)? else {
                continue;
            };
            self.progress.source_started(i, total, source.path());
            let available = source.table_names();
            if let Some(missing) = writers.iter().find(|w| !available.iter().any(|t| t == w.name())) {
                return Err(Error::NotFound(format!(
                    "table '{}' of {} is missing from {}",
                    missing.name(),
                    reference.display(),
                    path.display()
                )));
            }
            self.transfer_tables(source.as_ref(), &mut writers, dest.as_mut())?;
            read.push(path.clone());
        }

        let mut acc = HistogramAccumulator::new();
        if mode == DestinationMode::Append {
            seed_from_destination(dest.as_ref(), &mut acc)?;
        }
        let hadd = HaddOptions { skip_bad_files: false, ..self.options.hadd_options() };
        accumulate_files(backend, &read, &hadd, &mut acc)?;
        let histograms = write_histograms(dest.as_mut(), acc)?;
        dest.finish()?;

        let tables = writers
            .iter()
            .map(|w| TableSummary {
                name: w.name().to_string(),
                rows: w.rows_written(),
                columns: w
                    .schema()
                    .map(|s| s.fields().iter().map(|f| f.name().clone()).collect())
                    .unwrap_or_default(),
                skipped_chunks: w.skipped_chunks(),
            })
            .collect();
        tracing::info!(
            operation,
            path = %dest_path.display(),
            sources = read.len(),
            skipped = skipped.len(),
            "run complete"
        );

        Ok(MergeSummary {
            operation: operation.to_string(),
            destination: dest_path.to_path_buf(),
            mode,
            sources_read: read,
            sources_skipped: skipped,
            tables,
            histograms,
        })
    }

    fn transfer_tables(
        &self,
        source: &dyn TableSource,
        writers: &mut [TableWriter],
        dest: &mut dyn Destination,
    ) -> Result<()> {
        for writer in writers.iter_mut() {
            self.copy_table(source, writer, dest)?;
        }
        Ok(())
    }

    fn copy_table(
        &self,
        source: &dyn TableSource,
        writer: &mut TableWriter,
        dest: &mut dyn Destination,
    ) -> Result<()> {
        let table = writer.name().to_string();
        let before = writer.rows_written();
        self.for_each_chunk(source, &table, |chunk| {
            writer.write(&mut *dest, &chunk)?;
            self.progress.chunk_written(&table, chunk.num_rows());
            Ok(())
        })?;
        tracing::info!(
            table = %table,
            rows = writer.rows_written() - before,
            path = %source.path().display(),
            "copied table"
        );
        Ok(())
    }

    /// Stream the selected, filtered and regrouped chunks of `table`.
    pub(crate) fn for_each_chunk(
        &self,
        source: &dyn TableSource,
        table: &str,
        mut sink: impl FnMut(RecordBatch) -> Result<()>,
    ) -> Result<()> {
        let catalog = ColumnCatalog::build(&source.table_info(table)?, &self.options.naming);
        let retained = self.selector.select(&catalog)?;
        catalog.validate_retained(&retained)?;
        let regrouper = Regrouper::new(catalog.groups_for(&retained));

        let stream =
            ChunkStream::open(source, table, &retained, self.predicate(), self.options.step_budget)?;
        for chunk in stream {
            sink(regrouper.apply(&chunk?)?)?;
        }
        Ok(())
    }
}

fn seed_from_destination(dest: &dyn Destination, acc: &mut HistogramAccumulator) -> Result<()> {
    for name in dest.histogram_names() {
        if let Some(h) = dest.histogram(&name)? {
            acc.observe(&h)?;
        }
    }
    Ok(())
}

fn write_histograms(dest: &mut dyn Destination, acc: HistogramAccumulator) -> Result<Vec<String>> {
    let mut names = Vec::with_capacity(acc.len());
    for h in acc.into_histograms() {
        dest.write_histogram(&h)?;
        names.push(h.name);
    }
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn destination_matrix() {
        let p = Path::new("out");
        assert_eq!(resolve_destination(false, false, false, p).unwrap(), DestinationMode::Create);
        assert!(matches!(
            resolve_destination(true, false, false, p),
            Err(Error::DestinationState(_))
        ));
        assert_eq!(resolve_destination(true, false, true, p).unwrap(), DestinationMode::Append);
        assert!(matches!(
            resolve_destination(false, false, true, p),
            Err(Error::DestinationState(_))
        ));
        assert_eq!(resolve_destination(true, true, false, p).unwrap(), DestinationMode::Create);
        for exists in [true, false] {
            assert!(matches!(
                resolve_destination(exists, true, true, p),
                Err(Error::Configuration(_))
            ));
        }
    }

    #[test]
    fn options_validate_conflicts() {
        assert!(MergeOptions::default().validate().is_ok());
        let both = MergeOptions::default().with_force(true).with_append(true);
        assert!(matches!(both.validate(), Err(Error::Configuration(_))));
        let cols = MergeOptions::default().with_keep_columns("a").with_drop_columns("b");
        assert!(matches!(Merger::new(cols), Err(Error::Configuration(_))));
        let tables = MergeOptions::default().with_keep_tables("a").with_drop_tables("b");
        assert!(matches!(tables.validate(), Err(Error::Configuration(_))));
        let level = MergeOptions::default().with_compression(CompressionAlgorithm::Lz4, 12);
        assert!(matches!(level.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn bad_cut_fails_at_construction() {
        let err = Merger::new(MergeOptions::default().with_cut("x >")).unwrap_err();
        assert!(matches!(err, Error::Expression(_)));
    }

    #[test]
    fn options_deserialize_with_defaults() {
        let json = r#"{"force": true, "step_budget": "10 MB", "keep_columns": {"events": ["Jet_*"]}}"#;
        let o: MergeOptions = serde_json::from_str(json).unwrap();
        assert!(o.force);
        assert_eq!(o.step_budget, StepBudget::Bytes(10_000_000));
        assert!(matches!(o.keep_columns, Some(ColumnSpec::PerTable(_))));
        assert_eq!(o.initial_basket_capacity, 10);
        assert_eq!(o.compression, CompressionAlgorithm::Zlib);
    }
}
