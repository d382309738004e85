//! Integration tests: run options from YAML configuration.

use hc_core::{ColumnSpec, CompressionAlgorithm, Error, MismatchPolicy, NameSetMode, NameSpec, StepBudget};
use hc_translate::{MergeOptions, Merger, ParquetCompression, ParquetOptions};

#[test]
fn yaml_run_options() {
    let yaml = r#"
force: true
step_budget: 64KiB
compression: lzma
compression_level: 6
name_set: intersection
skip_bad_files: true
keep_columns:
  events: ["Jet_*", "run"]
  runs: lumi
drop_tables: [meta]
cut: "nJet >= 2"
naming:
  separator: "."
on_structure_mismatch: warn
"#;
    let o: MergeOptions = serde_yaml_ng::from_str(yaml).unwrap();
    assert!(o.force && o.skip_bad_files && !o.append);
    assert_eq!(o.step_budget, StepBudget::Bytes(64 * 1024));
    assert_eq!(o.compression, CompressionAlgorithm::Lzma);
    assert_eq!(o.name_set, NameSetMode::Intersection);
    assert_eq!(o.on_structure_mismatch, MismatchPolicy::Warn);
    assert_eq!(o.drop_tables, Some(NameSpec::List(vec!["meta".into()])));
    assert_eq!(o.naming.separator, ".");
    assert_eq!(o.naming.counter_prefix, "n");
    let Some(ColumnSpec::PerTable(map)) = &o.keep_columns else {
        panic!("expected a per-table mapping, got {:?}", o.keep_columns);
    };
    assert_eq!(map["runs"], NameSpec::One("lumi".into()));
    assert!(Merger::new(o).is_ok());
}

#[test]
fn row_count_step_budget() {
    let o: MergeOptions = serde_yaml_ng::from_str("step_budget: 500").unwrap();
    assert_eq!(o.step_budget, StepBudget::Rows(500));
    assert!(serde_yaml_ng::from_str::<MergeOptions>("step_budget: 0").is_err());
}

#[test]
fn conflicting_yaml_is_rejected_by_the_merger() {
    let o: MergeOptions = serde_yaml_ng::from_str("force: true\nappend: true").unwrap();
    assert!(matches!(Merger::new(o), Err(Error::Configuration(_))));
}

#[test]
fn unknown_compression_is_a_parse_error() {
    assert!(serde_yaml_ng::from_str::<MergeOptions>("compression: brotli").is_err());
}

#[test]
fn parquet_options() {
    let o: ParquetOptions = serde_yaml_ng::from_str("compression: gzip\nlevel: 4\nrow_group_size: 1000").unwrap();
    assert_eq!(o.compression, ParquetCompression::Gzip);
    assert_eq!(o.level, Some(4));
    assert!(!o.force);
    assert!(o.writer_properties().is_ok());
}
