//! Cross-file histogram accumulation.
//!
//! Each histogram name moves through two states: [`HistogramSlot::Seed`]
//! until its first observation, then [`HistogramSlot::Accumulate`] holding
//! the running total. Later observations are added cell by cell (values,
//! variances, moments); bin counts must match or the add fails and the
//! running total is left as it was.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use hc_core::{Error, NameSetMode, Result};
use hc_root::{Backend, Histogram, TableSource};
use serde::{Deserialize, Serialize};

/// Accumulation state of one histogram name.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum HistogramSlot {
    /// Nothing observed yet.
    #[default]
    Seed,
    /// Running total.
    Accumulate(Histogram),
}

/// Running totals of every histogram name seen so far, in first-seen order.
#[derive(Debug, Clone, Default)]
pub struct HistogramAccumulator {
    order: Vec<String>,
    slots: HashMap<String, HistogramSlot>,
}

impl HistogramAccumulator {
    /// Empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `name` without observing it.
    pub fn expect(&mut self, name: &str) {
        if !self.slots.contains_key(name) {
            self.order.push(name.to_string());
            self.slots.insert(name.to_string(), HistogramSlot::Seed);
        }
    }

    /// Fold `histogram` into the running total of its name.
    pub fn observe(&mut self, histogram: &Histogram) -> Result<()> {
        self.expect(&histogram.name);
        let slot = self.slots.entry(histogram.name.clone()).or_default();
        match slot {
            HistogramSlot::Seed => {
                histogram.validate()?;
                *slot = HistogramSlot::Accumulate(histogram.clone());
            }
            HistogramSlot::Accumulate(total) => total.add(histogram)?,
        }
        Ok(())
    }

    /// State of `name`.
    pub fn slot(&self, name: &str) -> Option<&HistogramSlot> {
        self.slots.get(name)
    }

    /// Running total of `name`, if observed.
    pub fn get(&self, name: &str) -> Option<&Histogram> {
        match self.slots.get(name)? {
            HistogramSlot::Accumulate(h) => Some(h),
            HistogramSlot::Seed => None,
        }
    }

    /// Registered names in first-seen order.
    pub fn names(&self) -> &[String] {
        &self.order
    }

    /// Number of registered names.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// `true` if nothing was registered.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Observed totals in first-seen order; names never observed are left out.
    pub fn into_histograms(mut self) -> Vec<Histogram> {
        self.order
            .iter()
            .filter_map(|n| match self.slots.remove(n) {
                Some(HistogramSlot::Accumulate(h)) => Some(h),
                _ => None,
            })
            .collect()
    }
}

// ── File-level driver ───────────────────────────────────────────

/// How histogram names are chosen across files.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HaddOptions {
    /// Union or intersection of the per-file name sets.
    pub name_set: NameSetMode,
    /// Every file carries the same ordered list of names.
    pub same_names: bool,
    /// Skip sources that cannot be opened instead of failing.
    pub skip_bad_files: bool,
}

/// What [`accumulate_files`] read.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HaddReport {
    /// Sources that were read, in order.
    pub read: Vec<PathBuf>,
    /// Sources skipped because they could not be opened.
    pub skipped: Vec<PathBuf>,
}

/// Open `path`, or record it as skipped when `skip` is set.
pub(crate) fn open_or_skip<'a>(
    backend: &'a dyn Backend,
    path: &Path,
    skip: bool,
    skipped: &mut Vec<PathBuf>,
) -> Result<Option<Box<dyn TableSource + 'a>>> {
    match backend.open(path) {
        Ok(f) => Ok(Some(f)),
        Err(e) if skip => {
            tracing::warn!(path = %path.display(), error = %e, "skipping unreadable file");
            skipped.push(path.to_path_buf());
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Fold the histograms of every source into `acc`.
///
/// Names are scanned first (one open per file), then each file is opened
/// again and its selected histograms are observed in order.
pub fn accumulate_files(
    backend: &dyn Backend,
    sources: &[PathBuf],
    options: &HaddOptions,
    acc: &mut HistogramAccumulator,
) -> Result<HaddReport> {
    let mut report = HaddReport::default();
    let mut scanned: Vec<(PathBuf, Vec<String>)> = Vec::new();
    for path in sources {
        if let Some(f) = open_or_skip(backend, path, options.skip_bad_files, &mut report.skipped)? {
            scanned.push((path.clone(), f.histogram_names()));
        }
    }
    let Some((first_path, first_names)) = scanned.first() else {
        return Ok(report);
    };

    if options.same_names {
        for (path, names) in &scanned[1..] {
            if names != first_names {
                return Err(Error::SchemaMismatch(format!(
                    "histogram names of {} [{}] differ from {} [{}]",
                    path.display(),
                    names.join(", "),
                    first_path.display(),
                    first_names.join(", ")
                )));
            }
        }
    }

    let common: Option<BTreeSet<&str>> = (options.name_set == NameSetMode::Intersection
        && !options.same_names)
        .then(|| {
            first_names
                .iter()
                .map(String::as_str)
                .filter(|n| scanned.iter().all(|(_, names)| names.iter().any(|m| m == n)))
                .collect()
        });

    for (path, names) in &scanned {
        let f = backend.open(path)?;
        let mut observed = 0usize;
        for name in names {
            if common.as_ref().is_some_and(|c| !c.contains(name.as_str())) {
                continue;
            }
            acc.observe(&f.histogram(name)?)?;
            observed += 1;
        }
        tracing::info!(path = %path.display(), histograms = observed, "accumulated histograms");
        report.read.push(path.clone());
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use hc_root::{Axis, MemoryBackend, MemoryFile};

    fn h(name: &str, contents: &[f64]) -> Histogram {
        let n = contents.len();
        let mut h = Histogram::new(name, vec![Axis::regular("x", n, 0.0, n as f64).unwrap()]).unwrap();
        for (i, v) in contents.iter().enumerate() {
            h.fill(&[i as f64 + 0.5], *v).unwrap();
        }
        h
    }

    #[test]
    fn seed_then_accumulate() {
        let mut acc = HistogramAccumulator::new();
        acc.expect("h");
        assert_eq!(acc.slot("h"), Some(&HistogramSlot::Seed));
        assert!(acc.get("h").is_none());

        acc.observe(&h("h", &[1.0, 2.0, 3.0, 4.0, 5.0])).unwrap();
        assert!(matches!(acc.slot("h"), Some(HistogramSlot::Accumulate(_))));
        acc.observe(&h("h", &[5.0, 4.0, 3.0, 2.0, 1.0])).unwrap();
        assert_eq!(acc.get("h").unwrap().values_without_flow(), vec![6.0; 5]);
        assert_relative_eq!(acc.get("h").unwrap().moment("sumw").unwrap(), 30.0);
    }

    #[test]
    fn merge_order_does_not_matter() {
        let inputs = [h("h", &[1.0, 2.0, 3.0, 4.0, 5.0]), h("h", &[5.0, 4.0, 3.0, 2.0, 1.0]), h("h", &[0.5; 5])];
        let mut forward = HistogramAccumulator::new();
        let mut backward = HistogramAccumulator::new();
        for x in &inputs {
            forward.observe(x).unwrap();
        }
        for x in inputs.iter().rev() {
            backward.observe(x).unwrap();
        }
        let (a, b) = (forward.get("h").unwrap(), backward.get("h").unwrap());
        for (x, y) in a.values.iter().zip(&b.values) {
            assert_relative_eq!(x, y);
        }
    }

    #[test]
    fn bin_mismatch_keeps_running_total() {
        let mut acc = HistogramAccumulator::new();
        acc.observe(&h("h", &[1.0; 10])).unwrap();
        let err = acc.observe(&h("h", &[1.0; 8])).unwrap_err();
        assert!(matches!(err, Error::SchemaMismatch(_)));
        assert!(err.to_string().contains("10") && err.to_string().contains('8'));
        assert_eq!(acc.get("h").unwrap().values_without_flow(), vec![1.0; 10]);
    }

    #[test]
    fn never_observed_names_are_not_emitted() {
        let mut acc = HistogramAccumulator::new();
        acc.expect("ghost");
        acc.observe(&h("a", &[1.0])).unwrap();
        let names: Vec<String> = acc.into_histograms().into_iter().map(|h| h.name).collect();
        assert_eq!(names, vec!["a"]);
    }

    fn files() -> (MemoryBackend, Vec<PathBuf>) {
        let b = MemoryBackend::new();
        b.insert("f1", MemoryFile::new().with_histogram(h("a", &[1.0])).with_histogram(h("b", &[1.0])));
        b.insert("f2", MemoryFile::new().with_histogram(h("b", &[2.0])).with_histogram(h("c", &[2.0])));
        b.insert("f3", MemoryFile::new());
        (b, vec!["f1".into(), "f2".into(), "f3".into()])
    }

    #[test]
    fn union_and_intersection() {
        let (b, paths) = files();
        let mut union = HistogramAccumulator::new();
        accumulate_files(&b, &paths[..2], &HaddOptions::default(), &mut union).unwrap();
        assert_eq!(union.names(), ["a", "b", "c"]);
        assert_eq!(union.get("b").unwrap().values_without_flow(), vec![3.0]);

        let mut common = HistogramAccumulator::new();
        let opts = HaddOptions { name_set: NameSetMode::Intersection, ..HaddOptions::default() };
        accumulate_files(&b, &paths[..2], &opts, &mut common).unwrap();
        assert_eq!(common.names(), ["b"]);
    }

    #[test]
    fn empty_file_contributes_nothing() {
        let (b, paths) = files();
        let mut acc = HistogramAccumulator::new();
        let report = accumulate_files(&b, &paths, &HaddOptions::default(), &mut acc).unwrap();
        assert_eq!(report.read.len(), 3);
        assert_eq!(acc.len(), 3);
    }

    #[test]
    fn positional_mode_requires_identical_lists() {
        let (b, paths) = files();
        let opts = HaddOptions { same_names: true, ..HaddOptions::default() };
        let err = accumulate_files(&b, &paths[..2], &opts, &mut HistogramAccumulator::new()).unwrap_err();
        assert!(matches!(err, Error::SchemaMismatch(_)));

        b.insert("g", MemoryFile::new().with_histogram(h("a", &[3.0])).with_histogram(h("b", &[3.0])));
        let mut acc = HistogramAccumulator::new();
        accumulate_files(&b, &["f1".into(), "g".into()], &opts, &mut acc).unwrap();
        assert_eq!(acc.get("a").unwrap().values_without_flow(), vec![4.0]);
    }

    #[test]
    fn missing_file_skipped_or_fatal() {
        let (b, _) = files();
        let paths: Vec<PathBuf> = vec!["f1".into(), "missing".into()];
        let err = accumulate_files(&b, &paths, &HaddOptions::default(), &mut HistogramAccumulator::new())
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));

        let opts = HaddOptions { skip_bad_files: true, ..HaddOptions::default() };
        let report = accumulate_files(&b, &paths, &opts, &mut HistogramAccumulator::new()).unwrap();
        assert_eq!(report.skipped, vec![PathBuf::from("missing")]);
        assert_eq!(report.read, vec![PathBuf::from("f1")]);
    }
}
