//! Variable-length column groups inferred from counter relationships.
//!
//! Counted columns that share one counter and one name prefix form a
//! [`ColumnGroup`]. Groups with more than one member are rebuilt into a
//! single nested column by [`crate::regroup::Regrouper`]; their counter is
//! hidden from the output.

use std::collections::{BTreeSet, HashMap};

use hc_core::{Error, Result};
use hc_root::{NamingStrategy, TableInfo};

/// One member of a [`ColumnGroup`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupMember {
    /// Flat column name, e.g. `Jet_pt`.
    pub column: String,
    /// Field name inside the nested column, e.g. `pt`.
    pub field: String,
}

/// Counted columns sharing one counter and name prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnGroup {
    /// Name of the nested output column (the shared prefix).
    pub name: String,
    /// Counter column all members are tied to.
    pub counter: String,
    /// Members in table order.
    pub members: Vec<GroupMember>,
}

impl ColumnGroup {
    /// `true` if the group regroups into a nested column.
    pub fn is_nested(&self) -> bool {
        self.members.len() > 1
    }
}

/// Column structure of one table.
#[derive(Debug, Clone)]
pub struct ColumnCatalog {
    table: String,
    columns: Vec<String>,
    groups: Vec<ColumnGroup>,
    counters: BTreeSet<String>,
    split: Vec<String>,
}

impl ColumnCatalog {
    /// Partition the counted columns of `info` into groups.
    ///
    /// Each column is visited once: the first column of a `(counter, prefix)`
    /// pair seeds a group, later ones join it. A counted column without a
    /// prefix forms its own group.
    pub fn build(info: &TableInfo, naming: &dyn NamingStrategy) -> Self {
        let mut groups: Vec<ColumnGroup> = Vec::new();
        let mut index: HashMap<(String, String), usize> = HashMap::new();
        let mut counters = BTreeSet::new();
        let mut split = Vec::new();

        for col in &info.columns {
            if col.is_split() {
                split.push(col.name.clone());
            }
            let Some(counter) = col.counter.as_ref().filter(|_| col.is_variable()) else {
                continue;
            };
            counters.insert(counter.clone());

            match naming.split_prefix(&col.name) {
                Some((prefix, field)) => {
                    let member =
                        GroupMember { column: col.name.clone(), field: field.to_string() };
                    let key = (counter.clone(), prefix.to_string());
                    match index.get(&key) {
                        Some(&i) => groups[i].members.push(member),
                        None => {
                            index.insert(key, groups.len());
                            groups.push(ColumnGroup {
                                name: prefix.to_string(),
                                counter: counter.clone(),
                                members: vec![member],
                            });
                        }
                    }
                }
                None => groups.push(ColumnGroup {
                    name: col.name.clone(),
                    counter: counter.clone(),
                    members: vec![GroupMember { column: col.name.clone(), field: col.name.clone() }],
                }),
            }
        }

        Self {
            table: info.name.clone(),
            columns: info.columns.iter().map(|c| c.name.clone()).collect(),
            groups,
            counters,
            split,
        }
    }

    /// Table name.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// All column names in table order, counters included.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Column names that are not counters, in table order.
    pub fn data_columns(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(String::as_str).filter(|c| !self.counters.contains(*c))
    }

    /// All groups, singletons included, ordered by first member.
    pub fn groups(&self) -> &[ColumnGroup] {
        &self.groups
    }

    /// Counter columns referenced by any counted column.
    pub fn counters(&self) -> &BTreeSet<String> {
        &self.counters
    }

    /// `true` if `name` is a counter column.
    pub fn is_counter(&self, name: &str) -> bool {
        self.counters.contains(name)
    }

    /// Columns backed by more than one leaf descriptor.
    pub fn split_columns(&self) -> &[String] {
        &self.split
    }

    /// Fail if any retained column uses split encoding.
    pub fn validate_retained(&self, retained: &[String]) -> Result<()> {
        match retained.iter().find(|c| self.split.contains(c)) {
            Some(c) => Err(Error::UnsupportedStructure(format!(
                "column '{c}' of table '{}' is split into several leaves, which cannot be read",
                self.table
            ))),
            None => Ok(()),
        }
    }

    /// Groups restricted to `retained`; groups left without members are dropped.
    pub fn groups_for(&self, retained: &[String]) -> Vec<ColumnGroup> {
        self.groups
            .iter()
            .filter_map(|g| {
                let members: Vec<GroupMember> =
                    g.members.iter().filter(|m| retained.contains(&m.column)).cloned().collect();
                (!members.is_empty()).then(|| ColumnGroup { members, ..g.clone() })
            })
            .collect()
    }
}
