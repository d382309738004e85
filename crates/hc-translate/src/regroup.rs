//! Rebuild nested columns from flat column groups.

use std::sync::Arc;

use arrow::array::{Array, ArrayRef, AsArray, ListArray, StructArray};
use arrow::buffer::OffsetBuffer;
use arrow::datatypes::{DataType, Field, Fields, Schema};
use arrow::record_batch::{RecordBatch, RecordBatchOptions};
use hc_core::{Error, Result};
use hc_root::layout::lengths;

use crate::catalog::ColumnGroup;

/// Turns every nested [`ColumnGroup`] of a chunk into one `List<Struct>` column.
///
/// The nested column takes the position of the group's first member and
/// its struct fields are the members with the prefix stripped. Applying the
/// regrouper to its own output changes nothing.
///
/// A singleton group keeps its flat list column in place; it is never removed.
#[derive(Debug, Clone, Default)]
pub struct Regrouper {
    groups: Vec<ColumnGroup>,
}

impl Regrouper {
    /// Regrouper for `groups` (typically [`crate::ColumnCatalog::groups_for`]).
    pub fn new(groups: Vec<ColumnGroup>) -> Self {
        Self { groups }
    }

    /// Groups that will be nested.
    pub fn nested(&self) -> impl Iterator<Item = &ColumnGroup> {
        self.groups.iter().filter(|g| g.is_nested())
    }

    /// Build the regrouped chunk. `chunk` is left untouched.
    pub fn apply(&self, chunk: &RecordBatch) -> Result<RecordBatch> {
        let schema = chunk.schema();
        let mut replace: Vec<Option<(Field, ArrayRef)>> = vec![None; schema.fields().len()];
        let mut remove = vec![false; schema.fields().len()];

        for group in self.nested() {
            let present: Vec<(usize, &str)> = group
                .members
                .iter()
                .filter_map(|m| schema.index_of(&m.column).ok().map(|i| (i, m.field.as_str())))
                .collect();
            if present.len() < 2 {
                continue;
            }
            if let Ok(i) = schema.index_of(&group.name) {
                if !present.iter().any(|(p, _)| *p == i) {
                    return Err(Error::UnsupportedStructure(format!(
                        "nested column '{}' would replace existing column '{}'",
                        group.name,
                        schema.field(i).name()
                    )));
                }
            }

            let (field, array) = nest(group, chunk, &present)?;
            let first = present.iter().map(|(i, _)| *i).min().unwrap_or(0);
            for (i, _) in &present {
                remove[*i] = true;
            }
            replace[first] = Some((field, array));
        }

        if replace.iter().all(Option::is_none) {
            return Ok(chunk.clone());
        }

        let mut fields = Vec::with_capacity(schema.fields().len());
        let mut columns = Vec::with_capacity(schema.fields().len());
        for (i, slot) in replace.into_iter().enumerate() {
            match slot {
                Some((f, a)) => {
                    fields.push(f);
                    columns.push(a);
                }
                None if !remove[i] => {
                    fields.push(schema.field(i).clone());
                    columns.push(chunk.column(i).clone());
                }
                None => {}
            }
        }
        let out = Arc::new(Schema::new_with_metadata(fields, schema.metadata().clone()));
        let options = RecordBatchOptions::new().with_row_count(Some(chunk.num_rows()));
        Ok(RecordBatch::try_new_with_options(out, columns, &options)?)
    }
}

fn nest(group: &ColumnGroup, chunk: &RecordBatch, present: &[(usize, &str)]) -> Result<(Field, ArrayRef)> {
    let mut lens: Option<Vec<i32>> = None;
    let mut children = Vec::with_capacity(present.len());
    let mut values = Vec::with_capacity(present.len());
    let mut nulls = None;

    for (i, field) in present {
        let column = chunk.column(*i);
        let list = column.as_list_opt::<i32>().ok_or_else(|| {
            Error::SchemaMismatch(format!(
                "column '{}' of group '{}' is {}, expected a list",
                chunk.schema().field(*i).name(),
                group.name,
                column.data_type()
            ))
        })?;
        let l = lengths(list);
        match &lens {
            Some(expected) if *expected != l => {
                return Err(Error::SchemaMismatch(format!(
                    "members of group '{}' disagree on per-row lengths (counter '{}')",
                    group.name, group.counter
                )));
            }
            Some(_) => {}
            None => {
                lens = Some(l);
                nulls = list.nulls().cloned();
            }
        }
        let offsets = list.value_offsets();
        let (start, end) = (offsets[0] as usize, offsets[offsets.len() - 1] as usize);
        let item = match list.data_type() {
            DataType::List(item) => item.is_nullable(),
            _ => true,
        };
        children.push(Field::new(*field, list.value_type(), item));
        values.push(list.values().slice(start, end - start));
    }

    let lens = lens.unwrap_or_default();
    let fields = Fields::from(children);
    let records = StructArray::try_new(fields.clone(), values, None)?;
    let item = Arc::new(Field::new_list_field(DataType::Struct(fields), false));
    let nested = ListArray::try_new(
        item.clone(),
        OffsetBuffer::from_lengths(lens.iter().map(|&n| n as usize)),
        Arc::new(records),
        nulls,
    )?;
    Ok((Field::new(group.name.clone(), DataType::List(item), true), Arc::new(nested)))
}
