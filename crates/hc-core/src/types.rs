//! Option types shared by the engine, the backends and the CLI.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

// ── Step budget ─────────────────────────────────────────────────

/// Admission-control knob bounding how many rows one chunk materializes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "StepBudgetRepr", into = "StepBudgetRepr")]
pub enum StepBudget {
    /// Fixed number of rows per chunk.
    Rows(usize),
    /// Approximate in-memory bytes per chunk. At least one row is always read.
    Bytes(usize),
}

impl StepBudget {
    /// Default budget: 100 MB per chunk.
    pub const DEFAULT_BYTES: usize = 100_000_000;

    /// Rows to read next, given an estimate of bytes per row.
    ///
    /// Never returns zero.
    pub fn rows_for(&self, bytes_per_row: usize) -> usize {
        match *self {
            StepBudget::Rows(n) => n.max(1),
            StepBudget::Bytes(b) => (b / bytes_per_row.max(1)).max(1),
        }
    }
}

impl Default for StepBudget {
    fn default() -> Self {
        StepBudget::Bytes(Self::DEFAULT_BYTES)
    }
}

impl fmt::Display for StepBudget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepBudget::Rows(n) => write!(f, "{n}"),
            StepBudget::Bytes(b) => write!(f, "{b} B"),
        }
    }
}

impl FromStr for StepBudget {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Ok(rows) = s.parse::<usize>() {
            if rows == 0 {
                return Err(Error::Configuration("step size must be positive".into()));
            }
            return Ok(StepBudget::Rows(rows));
        }
        let split = s.find(|c: char| c.is_ascii_alphabetic()).ok_or_else(|| {
            Error::Configuration(format!("invalid step size '{s}': expected rows or e.g. '100 MB'"))
        })?;
        let (number, unit) = s.split_at(split);
        let number: f64 = number.trim().parse().map_err(|_| {
            Error::Configuration(format!("invalid step size '{s}': bad number '{}'", number.trim()))
        })?;
        let scale: f64 = match unit.trim().to_ascii_lowercase().as_str() {
            "b" => 1.0,
            "kb" => 1e3,
            "mb" => 1e6,
            "gb" => 1e9,
            "tb" => 1e12,
            "kib" => 1024.0,
            "mib" => 1024.0 * 1024.0,
            "gib" => 1024.0 * 1024.0 * 1024.0,
            "tib" => 1024.0 * 1024.0 * 1024.0 * 1024.0,
            other => {
                return Err(Error::Configuration(format!(
                    "invalid step size '{s}': unknown unit '{other}'"
                )));
            }
        };
        let bytes = number * scale;
        if !bytes.is_finite() || bytes < 1.0 {
            return Err(Error::Configuration(format!("invalid step size '{s}': must be >= 1 byte")));
        }
        Ok(StepBudget::Bytes(bytes as usize))
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum StepBudgetRepr {
    Rows(usize),
    Text(String),
}

impl TryFrom<StepBudgetRepr> for StepBudget {
    type Error = Error;

    fn try_from(r: StepBudgetRepr) -> Result<Self> {
        match r {
            StepBudgetRepr::Rows(0) => Err(Error::Configuration("step size must be positive".into())),
            StepBudgetRepr::Rows(n) => Ok(StepBudget::Rows(n)),
            StepBudgetRepr::Text(s) => s.parse(),
        }
    }
}

impl From<StepBudget> for StepBudgetRepr {
    fn from(b: StepBudget) -> Self {
        match b {
            StepBudget::Rows(n) => StepBudgetRepr::Rows(n),
            StepBudget::Bytes(n) => StepBudgetRepr::Text(format!("{n} B")),
        }
    }
}

// ── Name specs ──────────────────────────────────────────────────

/// A single name/pattern or an ordered list of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NameSpec {
    /// One name or shell-glob pattern.
    One(String),
    /// Ordered list of names or patterns.
    List(Vec<String>),
}

impl NameSpec {
    /// `true` when it selects nothing (empty string or empty list).
    pub fn is_empty(&self) -> bool {
        match self {
            NameSpec::One(s) => s.is_empty(),
            NameSpec::List(v) => v.is_empty(),
        }
    }

    /// The entries as a slice-like iterator.
    pub fn entries(&self) -> impl Iterator<Item = &str> {
        let v: Vec<&str> = match self {
            NameSpec::One(s) => vec![s.as_str()],
            NameSpec::List(v) => v.iter().map(String::as_str).collect(),
        };
        v.into_iter()
    }
}

impl From<&str> for NameSpec {
    fn from(s: &str) -> Self {
        NameSpec::One(s.to_string())
    }
}

impl From<Vec<String>> for NameSpec {
    fn from(v: Vec<String>) -> Self {
        NameSpec::List(v)
    }
}

impl From<Vec<&str>> for NameSpec {
    fn from(v: Vec<&str>) -> Self {
        NameSpec::List(v.into_iter().map(str::to_string).collect())
    }
}

/// Column keep/drop spec: names/patterns, or a per-table mapping of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ColumnSpec {
    /// Applied to every table.
    Names(NameSpec),
    /// Table name → spec.
    PerTable(BTreeMap<String, NameSpec>),
}

impl ColumnSpec {
    /// `true` when it selects nothing.
    pub fn is_empty(&self) -> bool {
        match self {
            ColumnSpec::Names(n) => n.is_empty(),
            ColumnSpec::PerTable(m) => m.is_empty(),
        }
    }
}

impl From<NameSpec> for ColumnSpec {
    fn from(v: NameSpec) -> Self {
        ColumnSpec::Names(v)
    }
}

impl From<&str> for ColumnSpec {
    fn from(s: &str) -> Self {
        ColumnSpec::Names(s.into())
    }
}

impl From<Vec<&str>> for ColumnSpec {
    fn from(v: Vec<&str>) -> Self {
        ColumnSpec::Names(v.into())
    }
}

/// How a per-table [`ColumnSpec`] mapping is applied to a table it has no key for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingResolution {
    /// A single-entry mapping applies to every table (compatible behaviour).
    #[default]
    SingleEntryFallback,
    /// Apply only on exact table-name match, otherwise leave the table unfiltered.
    ExactOnly,
}

// ── Histogram name sets ─────────────────────────────────────────

/// How histogram names are driven across files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NameSetMode {
    /// Every name seen in any file; absent-in-file names are skipped for that file.
    #[default]
    Union,
    /// Only names present in every file.
    Intersection,
}

/// What to do when an appended chunk does not match the pinned table structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MismatchPolicy {
    /// Fail the run.
    #[default]
    Abort,
    /// Log a warning and skip the chunk.
    Warn,
}

// ── Compression ─────────────────────────────────────────────────

/// Compression algorithm of the destination container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionAlgorithm {
    /// Stored uncompressed.
    None,
    /// zlib (deflate).
    #[default]
    Zlib,
    /// LZMA (xz).
    Lzma,
    /// LZ4 with xxhash64 block checksum.
    Lz4,
    /// Zstandard.
    Zstd,
}

impl FromStr for CompressionAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "NONE" => Ok(Self::None),
            "ZLIB" => Ok(Self::Zlib),
            "LZMA" => Ok(Self::Lzma),
            "LZ4" => Ok(Self::Lz4),
            "ZSTD" => Ok(Self::Zstd),
            _ => Err(Error::Configuration(format!(
                "unrecognized compression algorithm: {s}. Only ZLIB, LZMA, LZ4, and ZSTD are accepted."
            ))),
        }
    }
}

impl fmt::Display for CompressionAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "none",
            Self::Zlib => "zlib",
            Self::Lzma => "lzma",
            Self::Lz4 => "lz4",
            Self::Zstd => "zstd",
        })
    }
}

/// Algorithm plus level, passed through to the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Compression {
    /// Algorithm.
    pub algorithm: CompressionAlgorithm,
    /// Level (0 disables compression).
    pub level: u32,
}

impl Compression {
    /// Build a compression setting, validating the level range.
    pub fn new(algorithm: CompressionAlgorithm, level: u32) -> Result<Self> {
        if level > 9 && algorithm != CompressionAlgorithm::Zstd {
            return Err(Error::Configuration(format!(
                "compression level {level} out of range 0..=9 for {algorithm}"
            )));
        }
        if level > 22 {
            return Err(Error::Configuration(format!(
                "compression level {level} out of range 0..=22 for zstd"
            )));
        }
        Ok(Self { algorithm, level })
    }

    /// No compression.
    pub fn none() -> Self {
        Self { algorithm: CompressionAlgorithm::None, level: 0 }
    }

    /// `true` if data is stored raw.
    pub fn is_none(&self) -> bool {
        self.algorithm == CompressionAlgorithm::None || self.level == 0
    }
}

impl Default for Compression {
    fn default() -> Self {
        Self { algorithm: CompressionAlgorithm::Zlib, level: 1 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_budget_parses_rows_and_bytes() {
        assert_eq!("1000".parse::<StepBudget>().unwrap(), StepBudget::Rows(1000));
        assert_eq!("100 MB".parse::<StepBudget>().unwrap(), StepBudget::Bytes(100_000_000));
        assert_eq!("1.5kB".parse::<StepBudget>().unwrap(), StepBudget::Bytes(1500));
        assert_eq!("64 KiB".parse::<StepBudget>().unwrap(), StepBudget::Bytes(65536));
        assert_eq!(StepBudget::default(), StepBudget::Bytes(100_000_000));
    }

    #[test]
    fn step_budget_rejects_garbage() {
        assert!("0".parse::<StepBudget>().is_err());
        assert!("ten MB".parse::<StepBudget>().is_err());
        assert!("10 parsecs".parse::<StepBudget>().is_err());
        assert!("0.1 B".parse::<StepBudget>().is_err());
    }

    #[test]
    fn step_budget_rows_never_zero() {
        assert_eq!(StepBudget::Bytes(10).rows_for(1_000), 1);
        assert_eq!(StepBudget::Bytes(10_000).rows_for(100), 100);
        assert_eq!(StepBudget::Rows(7).rows_for(1_000_000), 7);
    }

    #[test]
    fn step_budget_deserializes_from_number_or_text() {
        let b: StepBudget = serde_json::from_str("25").unwrap();
        assert_eq!(b, StepBudget::Rows(25));
        let b: StepBudget = serde_json::from_str("\"2 MB\"").unwrap();
        assert_eq!(b, StepBudget::Bytes(2_000_000));
        assert!(serde_json::from_str::<StepBudget>("0").is_err());
    }

    #[test]
    fn compression_names() {
        assert_eq!("zstd".parse::<CompressionAlgorithm>().unwrap(), CompressionAlgorithm::Zstd);
        assert_eq!("LZ4".parse::<CompressionAlgorithm>().unwrap(), CompressionAlgorithm::Lz4);
        let err = "brotli".parse::<CompressionAlgorithm>().unwrap_err();
        assert!(err.to_string().contains("unrecognized compression algorithm: brotli"));
        assert!(Compression::new(CompressionAlgorithm::Zlib, 12).is_err());
        assert!(Compression::new(CompressionAlgorithm::Zstd, 12).is_ok());
    }

    #[test]
    fn column_spec_shapes_deserialize() {
        let s: ColumnSpec = serde_json::from_str("\"Jet_*\"").unwrap();
        assert_eq!(s, ColumnSpec::Names(NameSpec::One("Jet_*".into())));
        let s: ColumnSpec = serde_json::from_str("[\"a\", \"b\"]").unwrap();
        assert_eq!(s, ColumnSpec::Names(NameSpec::from(vec!["a", "b"])));
        let s: ColumnSpec = serde_json::from_str("{\"events\": \"x\"}").unwrap();
        match s {
            ColumnSpec::PerTable(m) => assert_eq!(m["events"], NameSpec::One("x".into())),
            other => panic!("expected mapping, got {other:?}"),
        }
    }

    #[test]
    fn empty_specs() {
        assert!(NameSpec::List(vec![]).is_empty());
        assert!(NameSpec::One(String::new()).is_empty());
        assert!(ColumnSpec::PerTable(BTreeMap::new()).is_empty());
        assert!(!ColumnSpec::from("x").is_empty());
    }
}
