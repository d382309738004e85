//! Shared command-line options and their translation into run options.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use hc_core::{ColumnSpec, CompressionAlgorithm, MismatchPolicy, NameSetMode, NameSpec, StepBudget};
use hc_translate::{MergeOptions, Merger, ParquetCompression, ParquetOptions};

/// Options shared by every table and histogram command.
#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// Base options file (YAML or JSON). Flags given on the command line win.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Replace an existing output.
    #[arg(long)]
    pub force: bool,

    /// Add to an existing output.
    #[arg(long)]
    pub append: bool,

    /// Keep only columns matching this pattern (repeatable).
    #[arg(long = "keep-branches", value_name = "PATTERN")]
    pub keep_branches: Vec<String>,

    /// Drop columns matching this pattern (repeatable).
    #[arg(long = "drop-branches", value_name = "PATTERN")]
    pub drop_branches: Vec<String>,

    /// Process only these tables. A single entry may be a glob (repeatable).
    #[arg(long = "keep-trees", value_name = "NAME")]
    pub keep_trees: Vec<String>,

    /// Skip these tables (repeatable).
    #[arg(long = "drop-trees", value_name = "NAME")]
    pub drop_trees: Vec<String>,

    /// Row selection, e.g. "nJet >= 2 && abs(met) < 100".
    #[arg(long)]
    pub cut: Option<String>,

    /// Chunk size: a row count or a size such as "100 MB".
    #[arg(long, value_name = "SIZE")]
    pub step_size: Option<StepBudget>,

    /// Output compression: none, zlib, lzma, lz4, zstd.
    #[arg(long)]
    pub compression: Option<CompressionAlgorithm>,

    /// Output compression level.
    #[arg(long)]
    pub compression_level: Option<u32>,

    /// Skip inputs that cannot be opened.
    #[arg(long)]
    pub skip_bad_files: bool,

    /// Only add histograms present in every input.
    #[arg(long)]
    pub intersection: bool,

    /// Require every input to carry the same ordered histogram list.
    #[arg(long)]
    pub positional: bool,

    /// Title of created tables.
    #[arg(long)]
    pub title: Option<String>,

    /// Separator between a group prefix and member names.
    #[arg(long)]
    pub separator: Option<String>,

    /// Prefix of counter column names.
    #[arg(long)]
    pub counter_prefix: Option<String>,

    /// Skip chunks whose structure differs from the output table instead of failing.
    #[arg(long)]
    pub lenient_structure: bool,
}

impl RunArgs {
    /// Options file (if any) overlaid with command-line flags.
    pub fn options(&self) -> Result<MergeOptions> {
        let mut o = match &self.config {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config {}", path.display()))?;
                serde_yaml_ng::from_str::<MergeOptions>(&text)
                    .with_context(|| format!("parsing config {}", path.display()))?
            }
            None => MergeOptions::default(),
        };

        o.force |= self.force;
        o.append |= self.append;
        o.skip_bad_files |= self.skip_bad_files;
        o.same_names |= self.positional;
        if self.intersection {
            o.name_set = NameSetMode::Intersection;
        }
        if self.lenient_structure {
            o.on_structure_mismatch = MismatchPolicy::Warn;
        }
        if !self.keep_branches.is_empty() {
            o.keep_columns = Some(ColumnSpec::from(NameSpec::from(self.keep_branches.clone())));
        }
        if !self.drop_branches.is_empty() {
            o.drop_columns = Some(ColumnSpec::from(NameSpec::from(self.drop_branches.clone())));
        }
        if !self.keep_trees.is_empty() {
            o.keep_tables = Some(NameSpec::from(self.keep_trees.clone()));
        }
        if !self.drop_trees.is_empty() {
            o.drop_tables = Some(NameSpec::from(self.drop_trees.clone()));
        }
        if let Some(cut) = &self.cut {
            o.cut = Some(cut.clone());
        }
        if let Some(budget) = self.step_size {
            o.step_budget = budget;
        }
        if let Some(algorithm) = self.compression {
            o.compression = algorithm;
        }
        if let Some(level) = self.compression_level {
            o.compression_level = level;
        }
        if let Some(title) = &self.title {
            o.title = title.clone();
        }
        if let Some(sep) = &self.separator {
            o.naming.separator = sep.clone();
        }
        if let Some(prefix) = &self.counter_prefix {
            o.naming.counter_prefix = prefix.clone();
        }
        Ok(o)
    }

    /// A merger for these options.
    pub fn merger(&self) -> Result<Merger> {
        Ok(Merger::new(self.options()?)?)
    }
}

/// Parquet output options.
#[derive(Debug, Clone, Args)]
pub struct ParquetArgs {
    /// Parquet compression: none, snappy, gzip, lz4, zstd.
    #[arg(long, default_value = "snappy")]
    pub parquet_compression: ParquetCompression,

    /// Parquet compression level.
    #[arg(long)]
    pub parquet_level: Option<u32>,

    /// Maximum rows per Parquet row group.
    #[arg(long, default_value_t = 1024 * 1024)]
    pub row_group_size: usize,
}

impl ParquetArgs {
    /// Parquet options; `force` comes from the run flags.
    pub fn options(&self, force: bool) -> ParquetOptions {
        ParquetOptions::default()
            .with_compression(self.parquet_compression, self.parquet_level)
            .with_row_group_size(self.row_group_size)
            .with_force(force)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        run: RunArgs,
    }

    fn parse(args: &[&str]) -> MergeOptions {
        let mut argv = vec!["hepconv"];
        argv.extend_from_slice(args);
        Harness::parse_from(argv).run.options().unwrap()
    }

    #[test]
    fn flags_map_onto_options() {
        let o = parse(&[
            "--force",
            "--keep-branches",
            "Jet_*",
            "--keep-branches",
            "run",
            "--step-size",
            "10 MB",
            "--compression",
            "lz4",
            "--compression-level",
            "4",
            "--intersection",
            "--lenient-structure",
        ]);
        assert!(o.force);
        assert_eq!(o.keep_columns, Some(ColumnSpec::from(vec!["Jet_*", "run"])));
        assert_eq!(o.step_budget, StepBudget::Bytes(10_000_000));
        assert_eq!((o.compression, o.compression_level), (CompressionAlgorithm::Lz4, 4));
        assert_eq!(o.name_set, NameSetMode::Intersection);
        assert_eq!(o.on_structure_mismatch, MismatchPolicy::Warn);
    }

    #[test]
    fn no_flags_keep_defaults() {
        assert_eq!(parse(&[]), MergeOptions::default());
    }
}
