//! Naming strategies for nested fields and their counters.

use std::fmt::Debug;

use serde::{Deserialize, Serialize};

/// Maps nested names to flat column names and counted columns to counters.
///
/// Implementations must be pure: the same input always yields the same name.
pub trait NamingStrategy: Debug + Send + Sync {
    /// Flat column name for member `inner` of nested column `outer`.
    fn field_name(&self, outer: &str, inner: &str) -> String;

    /// Counter column name for the counted column (or nested column) `counted`.
    fn counter_name(&self, counted: &str) -> String;

    /// Split a flat name into `(prefix, member)` at the first separator.
    fn split_prefix<'a>(&self, name: &'a str) -> Option<(&'a str, &'a str)>;
}

/// `outer{sep}inner` field names and `{prefix}counted` counter names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeparatorNaming {
    /// Separator between prefix and member name.
    pub separator: String,
    /// Prefix prepended to form counter names.
    pub counter_prefix: String,
}

impl Default for SeparatorNaming {
    fn default() -> Self {
        Self { separator: "_".into(), counter_prefix: "n".into() }
    }
}

impl SeparatorNaming {
    /// Naming with a custom separator and the default counter prefix.
    pub fn with_separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = separator.into();
        self
    }

    /// Naming with a custom counter prefix.
    pub fn with_counter_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.counter_prefix = prefix.into();
        self
    }
}

impl NamingStrategy for SeparatorNaming {
    fn field_name(&self, outer: &str, inner: &str) -> String {
        format!("{outer}{}{inner}", self.separator)
    }

    fn counter_name(&self, counted: &str) -> String {
        format!("{}{counted}", self.counter_prefix)
    }

    fn split_prefix<'a>(&self, name: &'a str) -> Option<(&'a str, &'a str)> {
        if self.separator.is_empty() {
            return None;
        }
        let (prefix, member) = name.split_once(self.separator.as_str())?;
        if prefix.is_empty() || member.is_empty() {
            return None;
        }
        Some((prefix, member))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_naming() {
        let n = SeparatorNaming::default();
        assert_eq!(n.field_name("Jet", "pt"), "Jet_pt");
        assert_eq!(n.counter_name("Jet"), "nJet");
        assert_eq!(n.split_prefix("Jet_pt_raw"), Some(("Jet", "pt_raw")));
        assert_eq!(n.split_prefix("met"), None);
        assert_eq!(n.split_prefix("_hidden"), None);
    }

    #[test]
    fn custom_naming() {
        let n = SeparatorNaming::default().with_separator(".").with_counter_prefix("N_");
        assert_eq!(n.field_name("Muon", "eta"), "Muon.eta");
        assert_eq!(n.counter_name("Muon"), "N_Muon");
        assert_eq!(n.split_prefix("Muon.eta"), Some(("Muon", "eta")));
    }
}
