//! Keep/drop column selection.

use glob::Pattern;
use hc_core::{ColumnSpec, Error, MappingResolution, NameSpec, Result};

use crate::catalog::ColumnCatalog;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Keep,
    Drop,
}

/// Resolves a keep-list or a drop-list into concrete column names.
///
/// Counter columns are never part of the result.
#[derive(Debug, Clone)]
pub struct ColumnSelector {
    spec: Option<(Mode, ColumnSpec)>,
    resolution: MappingResolution,
}

impl Default for ColumnSelector {
    fn default() -> Self {
        Self::all()
    }
}

impl ColumnSelector {
    /// Build a selector. Empty specs count as absent.
    ///
    /// Fails with [`Error::Configuration`] if both are given.
    pub fn new(
        keep: Option<&ColumnSpec>,
        drop: Option<&ColumnSpec>,
        resolution: MappingResolution,
    ) -> Result<Self> {
        let keep = keep.filter(|s| !s.is_empty());
        let drop = drop.filter(|s| !s.is_empty());
        let spec = match (keep, drop) {
            (Some(_), Some(_)) => {
                return Err(Error::Configuration(
                    "keep and drop column lists are mutually exclusive; give only one".into(),
                ));
            }
            (Some(k), None) => Some((Mode::Keep, k.clone())),
            (None, Some(d)) => Some((Mode::Drop, d.clone())),
            (None, None) => None,
        };
        Ok(Self { spec, resolution })
    }

    /// Selector retaining every data column.
    pub fn all() -> Self {
        Self { spec: None, resolution: MappingResolution::default() }
    }

    fn spec_for(&self, table: &str) -> Option<(Mode, &NameSpec)> {
        let (mode, spec) = self.spec.as_ref()?;
        let names = match spec {
            ColumnSpec::Names(n) => n,
            ColumnSpec::PerTable(map) => match map.get(table) {
                Some(n) => n,
                None if map.len() == 1
                    && self.resolution == MappingResolution::SingleEntryFallback =>
                {
                    map.values().next()?
                }
                None => return None,
            },
        };
        Some((*mode, names))
    }

    /// Retained columns of `catalog`'s table, in table order.
    pub fn select(&self, catalog: &ColumnCatalog) -> Result<Vec<String>> {
        let columns = catalog.data_columns();
        let Some((mode, spec)) = self.spec_for(catalog.table()) else {
            return Ok(columns.map(str::to_string).collect());
        };
        let patterns = compile(spec)?;
        let hit = |c: &str| patterns.iter().any(|p| p.matches(c));
        Ok(columns
            .filter(|c| match mode {
                Mode::Keep => hit(*c),
                Mode::Drop => !hit(*c),
            })
            .map(str::to_string)
            .collect())
    }

    /// Drop patterns applying to `table` (empty for keep-lists).
    pub fn drop_patterns(&self, table: &str) -> Result<Vec<Pattern>> {
        match self.spec_for(table) {
            Some((Mode::Drop, spec)) => compile(spec),
            _ => Ok(Vec::new()),
        }
    }
}

fn compile(spec: &NameSpec) -> Result<Vec<Pattern>> {
    spec.entries()
        .map(|p| {
            Pattern::new(p)
                .map_err(|e| Error::Configuration(format!("invalid column pattern '{p}': {e}")))
        })
        .collect()
}
