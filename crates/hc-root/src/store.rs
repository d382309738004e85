//! On-disk store backend.
//!
//! A store is a directory:
//! ```text
//! manifest.json          tables, basket index, histograms
//! t0000/schema.arrows    stored schema (Arrow IPC stream, no batches)
//! t0000/basket-000000.bin
//! t0000/basket-000001.bin
//! ```
//! Each appended chunk becomes one basket: an Arrow IPC stream wrapped in
//! compression blocks (see [`crate::compress`]). The manifest is rewritten
//! when tables or histograms change, every [`MANIFEST_SAVE_INTERVAL`]
//! baskets, and on finish. A store interrupted mid-run stays readable up to
//! the last saved manifest.

use std::collections::HashMap;
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::datatypes::SchemaRef;
use arrow::ipc::reader::StreamReader;
use arrow::ipc::writer::StreamWriter;
use arrow::record_batch::RecordBatch;
use hc_core::{Compression, Error, Result, StepBudget};
use serde::{Deserialize, Serialize};

use crate::compress::{compress, decompress};
use crate::container::{
    Backend, BatchIter, Destination, DestinationOptions, Rechunk, TableOptions, TableSource, conform,
    projection,
};
use crate::histogram::Histogram;
use crate::layout::{flatten_batch, flatten_schema};

const MANIFEST: &str = "manifest.json";
const SCHEMA_FILE: &str = "schema.arrows";
const FORMAT_VERSION: u32 = 1;

/// Baskets appended between two manifest saves.
pub const MANIFEST_SAVE_INTERVAL: usize = 64;

// ── Manifest ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Manifest {
    format: u32,
    compression: Compression,
    tables: Vec<TableEntry>,
    histograms: Vec<Histogram>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TableEntry {
    name: String,
    dir: String,
    options: TableOptions,
    entries: u64,
    basket_capacity: usize,
    baskets: Vec<BasketEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BasketEntry {
    file: String,
    first_entry: u64,
    entries: u64,
    compressed_bytes: u64,
    uncompressed_bytes: u64,
}

impl Manifest {
    fn new(compression: Compression) -> Self {
        Self { format: FORMAT_VERSION, compression, tables: Vec::new(), histograms: Vec::new() }
    }

    fn load(root: &Path) -> Result<Self> {
        let path = root.join(MANIFEST);
        if !path.is_file() {
            return Err(Error::NotFound(format!("{} is not a hepconv store", root.display())));
        }
        let manifest: Manifest = serde_json::from_slice(&fs::read(&path)?)?;
        if manifest.format != FORMAT_VERSION {
            return Err(Error::UnsupportedStructure(format!(
                "{}: store format {} (supported: {FORMAT_VERSION})",
                root.display(),
                manifest.format
            )));
        }
        Ok(manifest)
    }

    fn save(&self, root: &Path) -> Result<()> {
        let tmp = root.join(format!("{MANIFEST}.tmp"));
        fs::write(&tmp, serde_json::to_vec_pretty(self)?)?;
        fs::rename(&tmp, root.join(MANIFEST))?;
        Ok(())
    }

    fn table(&self, name: &str) -> Option<&TableEntry> {
        self.tables.iter().find(|t| t.name == name)
    }
}

fn read_schema(dir: &Path) -> Result<SchemaRef> {
    let bytes = fs::read(dir.join(SCHEMA_FILE))?;
    Ok(StreamReader::try_new(Cursor::new(bytes), None)?.schema())
}

fn read_basket(dir: &Path, basket: &BasketEntry) -> Result<Vec<RecordBatch>> {
    let bytes = fs::read(dir.join(&basket.file))?;
    let raw = decompress(&bytes, basket.uncompressed_bytes as usize)?;
    let reader = StreamReader::try_new(Cursor::new(raw), None)?;
    Ok(reader.collect::<std::result::Result<Vec<_>, _>>()?)
}

fn ipc_bytes(schema: &SchemaRef, batch: Option<&RecordBatch>) -> Result<Vec<u8>> {
    let mut writer = StreamWriter::try_new(Vec::new(), schema)?;
    if let Some(b) = batch {
        writer.write(b)?;
    }
    writer.finish()?;
    Ok(writer.into_inner()?)
}

// ── Backend ─────────────────────────────────────────────────────

/// Backend reading and writing store directories.
#[derive(Debug, Default, Clone, Copy)]
pub struct StoreBackend;

impl StoreBackend {
    /// New backend.
    pub fn new() -> Self {
        Self
    }
}

impl Backend for StoreBackend {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn open<'a>(&'a self, path: &Path) -> Result<Box<dyn TableSource + 'a>> {
        if !path.exists() {
            return Err(Error::NotFound(format!("no such file: {}", path.display())));
        }
        let manifest = Manifest::load(path)?;
        Ok(Box::new(StoreSource { root: path.to_path_buf(), manifest }))
    }

    fn create<'a>(
        &'a self,
        path: &Path,
        options: DestinationOptions,
    ) -> Result<Box<dyn Destination + 'a>> {
        if path.is_dir() {
            if !path.join(MANIFEST).is_file() {
                return Err(Error::DestinationState(format!(
                    "refusing to replace {}: directory is not a hepconv store",
                    path.display()
                )));
            }
            fs::remove_dir_all(path)?;
        } else if path.exists() {
            fs::remove_file(path)?;
        }
        fs::create_dir_all(path)?;
        let manifest = Manifest::new(options.compression);
        manifest.save(path)?;
        tracing::debug!(path = %path.display(), compression = %options.compression.algorithm, "created store");
        Ok(Box::new(StoreDestination {
            root: path.to_path_buf(),
            manifest,
            options,
            schemas: HashMap::new(),
            unsaved_baskets: 0,
        }))
    }

    fn update<'a>(
        &'a self,
        path: &Path,
        options: DestinationOptions,
    ) -> Result<Box<dyn Destination + 'a>> {
        let manifest = Manifest::load(path)?;
        Ok(Box::new(StoreDestination {
            root: path.to_path_buf(),
            manifest,
            options,
            schemas: HashMap::new(),
            unsaved_baskets: 0,
        }))
    }
}

// ── Source ──────────────────────────────────────────────────────

struct StoreSource {
    root: PathBuf,
    manifest: Manifest,
}

impl StoreSource {
    fn entry(&self, table: &str) -> Result<&TableEntry> {
        self.manifest.table(table).ok_or_else(|| {
            Error::NotFound(format!("table '{table}' not in {}", self.root.display()))
        })
    }
}

impl TableSource for StoreSource {
    fn path(&self) -> &Path {
        &self.root
    }

    fn table_names(&self) -> Vec<String> {
        self.manifest.tables.iter().map(|t| t.name.clone()).collect()
    }

    fn histogram_names(&self) -> Vec<String> {
        self.manifest.histograms.iter().map(|h| h.name.clone()).collect()
    }

    fn schema(&self, table: &str) -> Result<SchemaRef> {
        read_schema(&self.root.join(&self.entry(table)?.dir))
    }

    fn num_rows(&self, table: &str) -> Result<u64> {
        Ok(self.entry(table)?.entries)
    }

    fn rows<'a>(
        &'a self,
        table: &str,
        columns: &[String],
        budget: StepBudget,
    ) -> Result<BatchIter<'a>> {
        let entry = self.entry(table)?;
        let dir = self.root.join(&entry.dir);
        let schema = read_schema(&dir)?;
        let indices = projection(&schema, columns, table, &self.root)?;
        let projected = Arc::new(schema.project(&indices)?);

        let batches = entry.baskets.iter().flat_map(move |basket| {
            match read_basket(&dir, basket) {
                Ok(batches) => batches
                    .into_iter()
                    .map(|b| b.project(&indices).map_err(Error::from))
                    .collect::<Vec<_>>(),
                Err(e) => vec![Err(e)],
            }
        });
        Ok(Box::new(Rechunk::new(batches, projected, budget)))
    }

    fn histogram(&self, name: &str) -> Result<Histogram> {
        self.manifest.histograms.iter().find(|h| h.name == name).cloned().ok_or_else(|| {
            Error::NotFound(format!("histogram '{name}' not in {}", self.root.display()))
        })
    }
}

// ── Destination ─────────────────────────────────────────────────

struct StoreDestination {
    root: PathBuf,
    manifest: Manifest,
    options: DestinationOptions,
    schemas: HashMap<String, SchemaRef>,
    unsaved_baskets: usize,
}

impl StoreDestination {
    fn stored_schema(&mut self, table: &str) -> Result<SchemaRef> {
        if let Some(s) = self.schemas.get(table) {
            return Ok(s.clone());
        }
        let entry = self.manifest.table(table).ok_or_else(|| {
            Error::NotFound(format!("table '{table}' not in {}", self.root.display()))
        })?;
        let schema = read_schema(&self.root.join(&entry.dir))?;
        self.schemas.insert(table.to_string(), schema.clone());
        Ok(schema)
    }

    fn save(&mut self) -> Result<()> {
        self.manifest.save(&self.root)?;
        self.unsaved_baskets = 0;
        Ok(())
    }
}

impl Destination for StoreDestination {
    fn path(&self) -> &Path {
        &self.root
    }

    fn has_table(&self, name: &str) -> bool {
        self.manifest.table(name).is_some()
    }

    fn table_names(&self) -> Vec<String> {
        self.manifest.tables.iter().map(|t| t.name.clone()).collect()
    }

    fn create_table(
        &mut self,
        name: &str,
        schema: &SchemaRef,
        options: &TableOptions,
    ) -> Result<()> {
        if self.has_table(name) {
            return Err(Error::DestinationState(format!(
                "table '{name}' already exists in {}",
                self.root.display()
            )));
        }
        let stored = flatten_schema(schema, self.options.naming.as_ref())?;
        let dir = format!("t{:04}", self.manifest.tables.len());
        fs::create_dir_all(self.root.join(&dir))?;
        fs::write(self.root.join(&dir).join(SCHEMA_FILE), ipc_bytes(&stored, None)?)?;

        let capacity = options.initial_basket_capacity.max(1);
        self.manifest.tables.push(TableEntry {
            name: name.to_string(),
            dir,
            options: options.clone(),
            entries: 0,
            basket_capacity: capacity,
            baskets: Vec::with_capacity(capacity),
        });
        self.schemas.insert(name.to_string(), stored);
        self.save()
    }

    fn append_rows(&mut self, name: &str, chunk: &RecordBatch) -> Result<()> {
        let stored = self.stored_schema(name)?;
        let flat = flatten_batch(chunk, self.options.naming.as_ref())?;
        let batch = conform(name, &stored, &flat)?;
        if batch.num_rows() == 0 {
            return Ok(());
        }

        let raw = ipc_bytes(&stored, Some(&batch))?;
        let packed = compress(&raw, self.options.compression)?;
        let root = self.root.clone();
        let entry = self
            .manifest
            .tables
            .iter_mut()
            .find(|t| t.name == name)
            .ok_or_else(|| Error::NotFound(format!("table '{name}' not in {}", root.display())))?;

        let file = format!("basket-{:06}.bin", entry.baskets.len());
        fs::write(root.join(&entry.dir).join(&file), &packed)?;

        if entry.baskets.len() == entry.basket_capacity {
            let grown = (entry.basket_capacity as f64 * entry.options.resize_factor).ceil() as usize;
            entry.basket_capacity = grown.max(entry.basket_capacity + 1);
            entry.baskets.reserve(entry.basket_capacity - entry.baskets.len());
            tracing::debug!(table = name, capacity = entry.basket_capacity, "resized basket index");
        }
        entry.baskets.push(BasketEntry {
            file,
            first_entry: entry.entries,
            entries: batch.num_rows() as u64,
            compressed_bytes: packed.len() as u64,
            uncompressed_bytes: raw.len() as u64,
        });
        entry.entries += batch.num_rows() as u64;
        self.unsaved_baskets += 1;
        if self.unsaved_baskets >= MANIFEST_SAVE_INTERVAL {
            self.save()?;
        }
        Ok(())
    }

    fn histogram_names(&self) -> Vec<String> {
        self.manifest.histograms.iter().map(|h| h.name.clone()).collect()
    }

    fn histogram(&self, name: &str) -> Result<Option<Histogram>> {
        Ok(self.manifest.histograms.iter().find(|h| h.name == name).cloned())
    }

    fn write_histogram(&mut self, histogram: &Histogram) -> Result<()> {
        histogram.validate()?;
        match self.manifest.histograms.iter_mut().find(|h| h.name == histogram.name) {
            Some(slot) => *slot = histogram.clone(),
            None => self.manifest.histograms.push(histogram.clone()),
        }
        self.save()
    }

    fn finish(&mut self) -> Result<()> {
        self.save()?;
        tracing::info!(
            path = %self.root.display(),
            tables = self.manifest.tables.len(),
            histograms = self.manifest.histograms.len(),
            "store written"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn tmp_path(name: &str) -> PathBuf {
        let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
        std::env::temp_dir().join(format!("hepconv_store_{}_{}_{}", std::process::id(), nanos, name))
    }

    #[test]
    fn manifest_roundtrip() {
        let dir = tmp_path("manifest");
        fs::create_dir_all(&dir).unwrap();
        let m = Manifest::new(Compression::default());
        m.save(&dir).unwrap();
        let back = Manifest::load(&dir).unwrap();
        assert_eq!(back.format, FORMAT_VERSION);
        assert!(back.tables.is_empty());
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn manifest_is_saved_at_intervals_and_on_finish() {
        use arrow::array::Int64Array;
        use arrow::datatypes::{DataType, Field, Schema};

        let dir = tmp_path("interval");
        let schema = Arc::new(Schema::new(vec![Field::new("x", DataType::Int64, false)]));
        let batch =
            RecordBatch::try_new(schema.clone(), vec![Arc::new(Int64Array::from(vec![1i64, 2]))])
                .unwrap();
        let baskets_on_disk = |dir: &Path| Manifest::load(dir).unwrap().tables[0].baskets.len();

        let mut dest = StoreBackend.create(&dir, DestinationOptions::default()).unwrap();
        dest.create_table("t", &schema, &TableOptions::default()).unwrap();
        for _ in 0..MANIFEST_SAVE_INTERVAL - 1 {
            dest.append_rows("t", &batch).unwrap();
        }
        assert_eq!(baskets_on_disk(&dir), 0);
        dest.append_rows("t", &batch).unwrap();
        assert_eq!(baskets_on_disk(&dir), MANIFEST_SAVE_INTERVAL);
        dest.append_rows("t", &batch).unwrap();
        assert_eq!(baskets_on_disk(&dir), MANIFEST_SAVE_INTERVAL);
        dest.finish().unwrap();
        drop(dest);

        assert_eq!(baskets_on_disk(&dir), MANIFEST_SAVE_INTERVAL + 1);
        let src = StoreBackend.open(&dir).unwrap();
        assert_eq!(src.num_rows("t").unwrap(), 2 * (MANIFEST_SAVE_INTERVAL as u64 + 1));
        drop(src);
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn create_refuses_foreign_directory() {
        let dir = tmp_path("foreign");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("notes.txt"), b"keep me").unwrap();
        let err = StoreBackend.create(&dir, DestinationOptions::default()).err().unwrap();
        assert!(matches!(err, Error::DestinationState(_)));
        assert!(dir.join("notes.txt").exists());
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn open_non_store_is_not_found() {
        let dir = tmp_path("empty");
        fs::create_dir_all(&dir).unwrap();
        assert!(matches!(StoreBackend.open(&dir).err().unwrap(), Error::NotFound(_)));
        fs::remove_dir_all(&dir).unwrap();
    }
}
