//! Histogram model shared by all backends.
//!
//! A [`Histogram`] has 1–3 axes. Values and variances are stored for every
//! cell including under/overflow, in global-bin order
//! `ix + (nx+2) * (iy + (ny+2) * iz)`. The moment vector holds the fixed
//! statistics scalars (see [`moment_names`]).

use hc_core::{Error, Result};
use serde::{Deserialize, Serialize};

// ── Axis ────────────────────────────────────────────────────────

/// One histogram axis: regular (`low`, `high`, `n_bins`) or variable edges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Axis {
    /// Axis name (e.g. `"xaxis"`).
    pub name: String,
    /// Number of bins (excluding under/overflow).
    pub n_bins: usize,
    /// Lower edge of first bin.
    pub low: f64,
    /// Upper edge of last bin.
    pub high: f64,
    /// Variable bin edges (length = n_bins + 1), if not regular.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edges: Option<Vec<f64>>,
}

impl Axis {
    /// Regular axis with `n_bins` equal-width bins over `[low, high)`.
    pub fn regular(name: impl Into<String>, n_bins: usize, low: f64, high: f64) -> Result<Self> {
        if n_bins == 0 {
            return Err(Error::Configuration("axis must have at least one bin".into()));
        }
        if !(low.is_finite() && high.is_finite() && low < high) {
            return Err(Error::Configuration(format!("invalid axis range [{low}, {high})")));
        }
        Ok(Self { name: name.into(), n_bins, low, high, edges: None })
    }

    /// Axis with explicit, strictly increasing edges.
    pub fn variable(name: impl Into<String>, edges: Vec<f64>) -> Result<Self> {
        if edges.len() < 2 {
            return Err(Error::Configuration("variable axis needs at least two edges".into()));
        }
        if edges.windows(2).any(|w| !(w[0] < w[1])) {
            return Err(Error::Configuration("axis edges must be strictly increasing".into()));
        }
        let n_bins = edges.len() - 1;
        Ok(Self { name: name.into(), n_bins, low: edges[0], high: edges[n_bins], edges: Some(edges) })
    }

    /// Bin edges (length = n_bins + 1).
    pub fn bin_edges(&self) -> Vec<f64> {
        match &self.edges {
            Some(e) => e.clone(),
            None => {
                let width = (self.high - self.low) / self.n_bins as f64;
                (0..=self.n_bins).map(|i| self.low + width * i as f64).collect()
            }
        }
    }

    /// Cell index along this axis: 0 is underflow, `n_bins + 1` is overflow.
    ///
    /// NaN lands in overflow.
    pub fn find_cell(&self, v: f64) -> usize {
        if v < self.low {
            return 0;
        }
        if !(v < self.high) {
            return self.n_bins + 1;
        }
        match &self.edges {
            Some(edges) => edges.partition_point(|e| *e <= v).clamp(1, self.n_bins),
            None => {
                let frac = (v - self.low) / (self.high - self.low);
                1 + ((frac * self.n_bins as f64) as usize).min(self.n_bins - 1)
            }
        }
    }

    /// Number of cells including under/overflow.
    pub fn n_cells(&self) -> usize {
        self.n_bins + 2
    }
}

// ── Moments ─────────────────────────────────────────────────────

const MOMENTS_3D: [&str; 12] = [
    "entries", "sumw", "sumw2", "sumwx", "sumwx2", "sumwy", "sumwy2", "sumwxy", "sumwz", "sumwz2",
    "sumwxz", "sumwyz",
];

/// Names of the moment scalars for a histogram of dimension `dim`.
pub fn moment_names(dim: usize) -> &'static [&'static str] {
    match dim {
        1 => &MOMENTS_3D[..5],
        2 => &MOMENTS_3D[..8],
        _ => &MOMENTS_3D[..],
    }
}

// ── Histogram ───────────────────────────────────────────────────

/// A 1–3 dimensional histogram with flow cells, variances and moments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Histogram {
    /// Histogram name.
    pub name: String,
    /// Histogram title.
    #[serde(default)]
    pub title: String,
    /// Axes (1–3).
    pub axes: Vec<Axis>,
    /// Cell contents including flow, global-bin order.
    pub values: Vec<f64>,
    /// Sum of squared weights per cell, same layout as `values`.
    pub variances: Vec<f64>,
    /// Moment scalars, see [`moment_names`].
    pub moments: Vec<f64>,
}

impl Histogram {
    /// Empty histogram over `axes`.
    pub fn new(name: impl Into<String>, axes: Vec<Axis>) -> Result<Self> {
        if axes.is_empty() || axes.len() > 3 {
            return Err(Error::Configuration(format!(
                "histograms have 1 to 3 axes, got {}",
                axes.len()
            )));
        }
        let n: usize = axes.iter().map(Axis::n_cells).product();
        let n_moments = moment_names(axes.len()).len();
        Ok(Self {
            name: name.into(),
            title: String::new(),
            axes,
            values: vec![0.0; n],
            variances: vec![0.0; n],
            moments: vec![0.0; n_moments],
        })
    }

    /// Set the title (builder style).
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Check that array lengths agree with the axes.
    pub fn validate(&self) -> Result<()> {
        if self.axes.is_empty() || self.axes.len() > 3 {
            return Err(Error::UnsupportedStructure(format!(
                "histogram '{}' has {} axes",
                self.name,
                self.axes.len()
            )));
        }
        let n: usize = self.axes.iter().map(Axis::n_cells).product();
        if self.values.len() != n || self.variances.len() != n {
            return Err(Error::SchemaMismatch(format!(
                "histogram '{}': expected {} cells, got {} values and {} variances",
                self.name,
                n,
                self.values.len(),
                self.variances.len()
            )));
        }
        let m = moment_names(self.dim()).len();
        if self.moments.len() != m {
            return Err(Error::SchemaMismatch(format!(
                "histogram '{}': expected {} moments, got {}",
                self.name,
                m,
                self.moments.len()
            )));
        }
        Ok(())
    }

    /// Number of axes.
    pub fn dim(&self) -> usize {
        self.axes.len()
    }

    /// Per-axis bin counts (excluding flow).
    pub fn shape(&self) -> Vec<usize> {
        self.axes.iter().map(|a| a.n_bins).collect()
    }

    /// Global cell index of per-axis cell indices.
    pub fn global_bin(&self, cells: &[usize]) -> usize {
        let mut idx = 0usize;
        for (axis, &c) in self.axes.iter().zip(cells).rev() {
            idx = idx * axis.n_cells() + c;
        }
        idx
    }

    /// Value of a named moment scalar, if defined for this dimension.
    pub fn moment(&self, name: &str) -> Option<f64> {
        let i = moment_names(self.dim()).iter().position(|n| *n == name)?;
        self.moments.get(i).copied()
    }

    /// Number of entries.
    pub fn entries(&self) -> f64 {
        self.moments.first().copied().unwrap_or(0.0)
    }

    /// In-range cell values (flow excluded), global-bin order.
    pub fn values_without_flow(&self) -> Vec<f64> {
        let mut out = Vec::new();
        let n: Vec<usize> = self.axes.iter().map(|a| a.n_bins).collect();
        let (nx, ny, nz) = (n[0], n.get(1).copied().unwrap_or(1), n.get(2).copied().unwrap_or(1));
        let dim = self.dim();
        for iz in 0..nz {
            for iy in 0..ny {
                for ix in 0..nx {
                    let cells = [ix + 1, iy + 1, iz + 1];
                    out.push(self.values[self.global_bin(&cells[..dim])]);
                }
            }
        }
        out
    }

    /// Fill one entry at `coords` with weight `w`.
    ///
    /// Moments accumulate only for in-range coordinates; entries always count.
    pub fn fill(&mut self, coords: &[f64], w: f64) -> Result<()> {
        if coords.len() != self.dim() {
            return Err(Error::Configuration(format!(
                "histogram '{}' is {}D, got {} coordinates",
                self.name,
                self.dim(),
                coords.len()
            )));
        }
        let cells: Vec<usize> = self.axes.iter().zip(coords).map(|(a, &v)| a.find_cell(v)).collect();
        let bin = self.global_bin(&cells);
        self.values[bin] += w;
        self.variances[bin] += w * w;
        self.moments[0] += 1.0;

        let in_range = self.axes.iter().zip(&cells).all(|(a, &c)| c >= 1 && c <= a.n_bins);
        if !in_range {
            return Ok(());
        }
        let m = &mut self.moments;
        let x = coords[0];
        m[1] += w;
        m[2] += w * w;
        m[3] += w * x;
        m[4] += w * x * x;
        if coords.len() >= 2 {
            let y = coords[1];
            m[5] += w * y;
            m[6] += w * y * y;
            m[7] += w * x * y;
        }
        if coords.len() == 3 {
            let (y, z) = (coords[1], coords[2]);
            m[8] += w * z;
            m[9] += w * z * z;
            m[10] += w * x * z;
            m[11] += w * y * z;
        }
        Ok(())
    }

    /// Add `other` into `self` cell by cell.
    ///
    /// Per-axis bin counts must match exactly; axis ranges and edges of `self`
    /// are kept. On error `self` is left untouched.
    pub fn add(&mut self, other: &Histogram) -> Result<()> {
        if self.shape() != other.shape() {
            return Err(Error::SchemaMismatch(format!(
                "bins must be the same for histograms to be added, not {} and {} (histogram '{}')",
                fmt_shape(&self.shape()),
                fmt_shape(&other.shape()),
                self.name
            )));
        }
        other.validate()?;
        for (a, b) in self.values.iter_mut().zip(&other.values) {
            *a += b;
        }
        for (a, b) in self.variances.iter_mut().zip(&other.variances) {
            *a += b;
        }
        for (a, b) in self.moments.iter_mut().zip(&other.moments) {
            *a += b;
        }
        Ok(())
    }
}

fn fmt_shape(shape: &[usize]) -> String {
    shape.iter().map(|n| n.to_string()).collect::<Vec<_>>().join("x")
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn h1(name: &str, contents: &[f64]) -> Histogram {
        let mut h = Histogram::new(name, vec![Axis::regular("x", contents.len(), 0.0, 1.0).unwrap()])
            .unwrap();
        for (i, v) in contents.iter().enumerate() {
            h.values[i + 1] = *v;
            h.variances[i + 1] = *v;
        }
        h.moments[0] = contents.iter().sum();
        h
    }

    #[test]
    fn find_cell_edge_cases() {
        let a = Axis::variable("x", vec![0.0, 1.0, 2.0, 3.0]).unwrap();
        assert_eq!(a.find_cell(-0.5), 0);
        assert_eq!(a.find_cell(3.0), 4);
        assert_eq!(a.find_cell(0.0), 1);
        assert_eq!(a.find_cell(1.0), 2);
        assert_eq!(a.find_cell(2.99), 3);
        assert_eq!(a.find_cell(f64::NAN), 4);

        let r = Axis::regular("x", 4, 0.0, 2.0).unwrap();
        assert_eq!(r.find_cell(0.49), 1);
        assert_eq!(r.find_cell(0.5), 2);
        assert_eq!(r.find_cell(1.999), 4);
        assert_eq!(r.bin_edges(), vec![0.0, 0.5, 1.0, 1.5, 2.0]);
    }

    #[test]
    fn fill_1d_moments_and_flow() {
        let mut h = Histogram::new("h", vec![Axis::regular("x", 2, 0.0, 2.0).unwrap()]).unwrap();
        h.fill(&[0.5], 2.0).unwrap();
        h.fill(&[1.5], 1.0).unwrap();
        h.fill(&[5.0], 1.0).unwrap();
        assert_eq!(h.values, vec![0.0, 2.0, 1.0, 1.0]);
        assert_eq!(h.variances, vec![0.0, 4.0, 1.0, 1.0]);
        assert_relative_eq!(h.entries(), 3.0);
        assert_relative_eq!(h.moment("sumw").unwrap(), 3.0);
        assert_relative_eq!(h.moment("sumw2").unwrap(), 5.0);
        assert_relative_eq!(h.moment("sumwx").unwrap(), 2.5);
        assert_relative_eq!(h.moment("sumwx2").unwrap(), 2.75);
        assert!(h.moment("sumwy").is_none());
    }

    #[test]
    fn fill_2d_global_bin_layout() {
        let mut h = Histogram::new(
            "h2",
            vec![Axis::regular("x", 2, 0.0, 2.0).unwrap(), Axis::regular("y", 3, 0.0, 3.0).unwrap()],
        )
        .unwrap();
        assert_eq!(h.values.len(), 4 * 5);
        assert_eq!(h.moments.len(), 8);
        h.fill(&[1.5, 2.5], 1.0).unwrap();
        assert_eq!(h.values[2 + 4 * 3], 1.0);
        assert_relative_eq!(h.moment("sumwxy").unwrap(), 3.75);
        assert_eq!(h.values_without_flow().iter().sum::<f64>(), 1.0);
        assert!(h.fill(&[1.0], 1.0).is_err());
    }

    #[test]
    fn add_is_commutative() {
        let a = h1("h", &[1.0, 2.0, 3.0, 4.0, 5.0]);
        let b = h1("h", &[5.0, 4.0, 3.0, 2.0, 1.0]);

        let mut ab = a.clone();
        ab.add(&b).unwrap();
        let mut ba = b.clone();
        ba.add(&a).unwrap();

        assert_eq!(ab.values_without_flow(), vec![6.0; 5]);
        assert_eq!(ab.values, ba.values);
        assert_eq!(ab.variances, ba.variances);
        assert_eq!(ab.moments, ba.moments);
    }

    #[test]
    fn add_rejects_bin_mismatch_and_leaves_target_intact() {
        let mut a = h1("h", &[1.0; 10]);
        let before = a.clone();
        let b = h1("h", &[1.0; 8]);
        let err = a.add(&b).unwrap_err();
        assert!(matches!(err, Error::SchemaMismatch(_)));
        assert!(err.to_string().contains("not 10 and 8"));
        assert_eq!(a, before);
    }

    #[test]
    fn add_keeps_first_seen_range() {
        let mut a = h1("h", &[1.0, 1.0]);
        let mut b = h1("h", &[1.0, 1.0]);
        b.axes[0].high = 42.0;
        a.add(&b).unwrap();
        assert_eq!(a.axes[0].high, 1.0);
    }

    #[test]
    fn constructor_limits() {
        assert!(Histogram::new("h", vec![]).is_err());
        let ax = Axis::regular("x", 1, 0.0, 1.0).unwrap();
        assert!(Histogram::new("h", vec![ax.clone(), ax.clone(), ax.clone(), ax]).is_err());
        assert!(Axis::regular("x", 0, 0.0, 1.0).is_err());
        assert!(Axis::variable("x", vec![0.0, 0.0]).is_err());
    }
}
