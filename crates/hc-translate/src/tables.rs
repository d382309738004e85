//! Table-name keep/drop resolution.

use std::path::Path;

use glob::Pattern;
use hc_core::{Error, NameSpec, Result};

/// Which tables of a source take part in a run.
///
/// A single keep entry is a shell glob; a wildcard-free single entry must
/// name an existing table. A keep-list of several entries is exact and is
/// turned into the equivalent drop-list. Drop entries are exact and must
/// exist.
#[derive(Debug, Clone, Default)]
pub struct TableSetResolver {
    keep: Option<NameSpec>,
    drop: Option<NameSpec>,
}

impl TableSetResolver {
    /// Build a resolver. Empty specs count as absent.
    pub fn new(keep: Option<&NameSpec>, drop: Option<&NameSpec>) -> Result<Self> {
        let keep = keep.filter(|s| !s.is_empty()).cloned();
        let drop = drop.filter(|s| !s.is_empty()).cloned();
        if keep.is_some() && drop.is_some() {
            return Err(Error::Configuration(
                "keep and drop table lists are mutually exclusive; give only one".into(),
            ));
        }
        Ok(Self { keep, drop })
    }

    /// Tables of `available` to process, in discovery order.
    pub fn resolve(&self, available: &[String], path: &Path) -> Result<Vec<String>> {
        if let Some(keep) = &self.keep {
            let entries: Vec<&str> = keep.entries().collect();
            if let [single] = entries.as_slice() {
                return keep_single(single, available, path);
            }
        }
        let dropped = self.drop_list(available, path)?;
        Ok(available.iter().filter(|t| !dropped.contains(*t)).cloned().collect())
    }

    /// The selection expressed as the tables to remove.
    pub fn drop_list(&self, available: &[String], path: &Path) -> Result<Vec<String>> {
        if let Some(keep) = &self.keep {
            let entries: Vec<&str> = keep.entries().collect();
            if let [single] = entries.as_slice() {
                let kept = keep_single(single, available, path)?;
                return Ok(available.iter().filter(|t| !kept.contains(*t)).cloned().collect());
            }
            for name in &entries {
                require(name, available, path)?;
            }
            return Ok(available.iter().filter(|t| !entries.contains(&t.as_str())).cloned().collect());
        }
        match &self.drop {
            Some(drop) => drop
                .entries()
                .map(|name| require(name, available, path).map(|()| name.to_string()))
                .collect(),
            None => Ok(Vec::new()),
        }
    }
}

fn keep_single(entry: &str, available: &[String], path: &Path) -> Result<Vec<String>> {
    let pattern = Pattern::new(entry)
        .map_err(|e| Error::Configuration(format!("invalid table pattern '{entry}': {e}")))?;
    if Pattern::escape(entry) == entry {
        require(entry, available, path)?;
    }
    Ok(available.iter().filter(|t| pattern.matches(t)).cloned().collect())
}

fn require(name: &str, available: &[String], path: &Path) -> Result<()> {
    if available.iter().any(|t| t == name) {
        return Ok(());
    }
    Err(Error::NotFound(format!(
        "table '{name}' does not match any table in file '{}'",
        path.display()
    )))
}
