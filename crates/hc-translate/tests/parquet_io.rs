//! Integration tests: Parquet export, import and merge.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use arrow::array::{Array, ArrayRef, AsArray, Float32Array, Int32Array, Int64Array, ListArray};
use arrow::buffer::OffsetBuffer;
use arrow::datatypes::{DataType, Field, Float64Type, Int32Type, Int64Type, Schema};
use arrow::record_batch::RecordBatch;
use hc_core::Error;
use hc_root::tree::counted_metadata;
use hc_root::{Backend, MemoryBackend, MemoryFile, read_table};
use hc_translate::{MergeOptions, Merger, ParquetCompression, ParquetOptions, merge_parquet};
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::file::properties::WriterProperties;

fn tmp_path(name: &str) -> PathBuf {
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
    let mut p = std::env::temp_dir();
    p.push(format!("hepconv_parquet_{}_{}_{}", std::process::id(), nanos, name));
    p
}

fn write_parquet(path: &Path, batches: &[RecordBatch], row_group_size: usize) {
    let props = WriterProperties::builder().set_max_row_group_size(row_group_size).build();
    let mut w = ArrowWriter::try_new(File::create(path).unwrap(), batches[0].schema(), Some(props)).unwrap();
    for b in batches {
        w.write(b).unwrap();
    }
    w.close().unwrap();
}

fn read_parquet(path: &Path) -> RecordBatch {
    let reader = ParquetRecordBatchReaderBuilder::try_new(File::open(path).unwrap()).unwrap().build().unwrap();
    let batches: Vec<RecordBatch> = reader.map(|b| b.unwrap()).collect();
    arrow::compute::concat_batches(&batches[0].schema(), &batches).unwrap()
}

fn batch(fields: Vec<(&str, ArrayRef)>) -> RecordBatch {
    let schema = Schema::new(
        fields.iter().map(|(n, a)| Field::new(*n, a.data_type().clone(), false)).collect::<Vec<_>>(),
    );
    RecordBatch::try_new(Arc::new(schema), fields.into_iter().map(|(_, a)| a).collect()).unwrap()
}

fn jets_file() -> MemoryFile {
    let item = Arc::new(Field::new_list_field(DataType::Float32, true));
    let pt = ListArray::try_new(
        item.clone(),
        OffsetBuffer::from_lengths([2, 0, 1]),
        Arc::new(Float32Array::from(vec![1.0, 2.0, 3.0])),
        None,
    )
    .unwrap();
    let schema = Schema::new(vec![
        Field::new("run", DataType::Int64, false),
        Field::new("nJet", DataType::Int32, false),
        Field::new("Jet_pt", DataType::List(item), true).with_metadata(counted_metadata("nJet")),
    ]);
    let b = RecordBatch::try_new(
        Arc::new(schema),
        vec![
            Arc::new(Int64Array::from(vec![1, 2, 3])),
            Arc::new(Int32Array::from(vec![2, 0, 1])),
            Arc::new(pt),
        ],
    )
    .unwrap();
    MemoryFile::new().with_table("events", vec![b]).unwrap()
}

#[test]
fn table_exports_without_counters() {
    let b = MemoryBackend::new();
    b.insert("jets", jets_file());
    let out = tmp_path("export.parquet");
    let merger = Merger::new(MergeOptions::default()).unwrap();
    let summary = merger
        .table_to_parquet(&b, Path::new("jets"), None, &out, &ParquetOptions::default())
        .unwrap();
    assert_eq!(summary.tables[0].rows, 3);

    let t = read_parquet(&out);
    let names: Vec<_> = t.schema().fields().iter().map(|f| f.name().clone()).collect();
    assert_eq!(names, vec!["run", "Jet_pt"]);
    assert!(t.schema().field(1).metadata().is_empty());
    assert_eq!(t.column(1).as_list::<i32>().value_length(0), 2);
    let _ = std::fs::remove_file(out);
}

#[test]
fn export_refuses_existing_file_without_force() {
    let b = MemoryBackend::new();
    b.insert("jets", jets_file());
    let out = tmp_path("exists.parquet");
    std::fs::write(&out, b"not parquet").unwrap();
    let merger = Merger::new(MergeOptions::default()).unwrap();
    let err = merger
        .table_to_parquet(&b, Path::new("jets"), Some("events"), &out, &ParquetOptions::default())
        .unwrap_err();
    assert!(matches!(err, Error::DestinationState(_)));

    let forced = ParquetOptions::default().with_force(true).with_compression(ParquetCompression::Gzip, Some(5));
    merger.table_to_parquet(&b, Path::new("jets"), Some("events"), &out, &forced).unwrap();
    assert_eq!(read_parquet(&out).num_rows(), 3);
    let _ = std::fs::remove_file(out);
}

#[test]
fn export_needs_one_table() {
    let b = MemoryBackend::new();
    let two = jets_file()
        .with_table("runs", vec![batch(vec![("r", Arc::new(Int64Array::from(vec![1])) as ArrayRef)])])
        .unwrap();
    b.insert("two", two);
    let merger = Merger::new(MergeOptions::default()).unwrap();
    let out = tmp_path("two.parquet");
    let err = merger.table_to_parquet(&b, Path::new("two"), None, &out, &ParquetOptions::default()).unwrap_err();
    assert!(matches!(err, Error::Configuration(_)));
    let err = merger
        .table_to_parquet(&b, Path::new("two"), Some("lumi"), &out, &ParquetOptions::default())
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
    assert!(!out.exists());
}

#[test]
fn import_streams_row_groups() {
    let input = tmp_path("import.parquet");
    let x: ArrayRef = Arc::new(Int64Array::from((0..10).collect::<Vec<i64>>()));
    write_parquet(&input, &[batch(vec![("x", x)])], 4);

    let b = MemoryBackend::new();
    let merger = Merger::new(MergeOptions::default()).unwrap();
    let summary = merger.parquet_to_table(&b, input.as_path(), Path::new("out"), None).unwrap();
    assert_eq!(summary.tables[0].name, "tree");
    assert_eq!(summary.tables[0].rows, 10);

    let t = read_table(b.open(Path::new("out")).unwrap().as_ref(), "tree").unwrap();
    assert_eq!(t.column(0).as_primitive::<Int64Type>().values().to_vec(), (0..10).collect::<Vec<_>>());
    let _ = std::fs::remove_file(input);
}

#[test]
fn import_from_bytes() {
    let x: ArrayRef = Arc::new(Int64Array::from(vec![5, 6]));
    let mut buf = Vec::new();
    {
        let b = batch(vec![("x", x)]);
        let mut w = ArrowWriter::try_new(&mut buf, b.schema(), None).unwrap();
        w.write(&b).unwrap();
        w.close().unwrap();
    }
    let b = MemoryBackend::new();
    let merger = Merger::new(MergeOptions::default()).unwrap();
    merger.parquet_to_table(&b, buf.as_slice(), Path::new("out"), Some("events")).unwrap();
    assert_eq!(b.open(Path::new("out")).unwrap().num_rows("events").unwrap(), 2);
}

#[test]
fn merge_unites_schemas_and_fills_nulls() {
    let a = tmp_path("a.parquet");
    let c = tmp_path("c.parquet");
    let out = tmp_path("merged.parquet");
    write_parquet(
        &a,
        &[batch(vec![
            ("x", Arc::new(Int64Array::from(vec![1, 2])) as ArrayRef),
            ("w", Arc::new(arrow::array::Float64Array::from(vec![0.5, 1.5])) as ArrayRef),
        ])],
        100,
    );
    write_parquet(
        &c,
        &[batch(vec![
            ("n", Arc::new(Int32Array::from(vec![7])) as ArrayRef),
            ("x", Arc::new(Int64Array::from(vec![3])) as ArrayRef),
        ])],
        100,
    );

    let summary = merge_parquet(&[a.clone(), c.clone()], &out, &ParquetOptions::default(), false).unwrap();
    assert_eq!(summary.tables[0].columns, vec!["x", "w", "n"]);

    let t = read_parquet(&out);
    assert_eq!(t.num_rows(), 3);
    assert_eq!(t.column(0).as_primitive::<Int64Type>().values().to_vec(), vec![1, 2, 3]);
    let w = t.column(1).as_primitive::<Float64Type>();
    assert!(w.is_null(2));
    let n = t.column(2).as_primitive::<Int32Type>();
    assert_eq!((n.null_count(), n.value(2)), (2, 7));
    for p in [a, c, out] {
        let _ = std::fs::remove_file(p);
    }
}

#[test]
fn merge_rejects_type_conflicts_and_skips_bad_files() {
    let a = tmp_path("ta.parquet");
    let c = tmp_path("tc.parquet");
    let out = tmp_path("tout.parquet");
    write_parquet(&a, &[batch(vec![("x", Arc::new(Int64Array::from(vec![1])) as ArrayRef)])], 100);
    write_parquet(&c, &[batch(vec![("x", Arc::new(Float32Array::from(vec![1.0])) as ArrayRef)])], 100);
    let err = merge_parquet(&[a.clone(), c.clone()], &out, &ParquetOptions::default(), false).unwrap_err();
    assert!(matches!(err, Error::SchemaMismatch(_)));

    let missing = tmp_path("missing.parquet");
    let summary =
        merge_parquet(&[a.clone(), missing.clone()], &out, &ParquetOptions::default(), true).unwrap();
    assert_eq!(summary.sources_skipped, vec![missing]);
    assert_eq!(summary.tables[0].rows, 1);
    for p in [a, c, out] {
        let _ = std::fs::remove_file(p);
    }
}
