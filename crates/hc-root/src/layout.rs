//! Flat counted-leaf layout used by destinations.
//!
//! Destinations store tables flat: a nested `List<Struct<..>>` column `J`
//! becomes an `Int32` counter `counter_name(J)` followed by one `List`
//! column per struct member, named `field_name(J, member)` and carrying
//! [`COUNTER_KEY`](crate::tree::COUNTER_KEY) metadata. A plain `List`
//! column keeps its existing counter reference or gains `counter_name(x)`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, AsArray, Int32Array, ListArray};
use arrow::buffer::OffsetBuffer;
use arrow::datatypes::{DataType, Field, FieldRef, Int32Type, Schema, SchemaRef};
use arrow::record_batch::{RecordBatch, RecordBatchOptions};
use hc_core::{Error, Result};

use crate::naming::NamingStrategy;
use crate::tree::{COUNTER_KEY, counted_metadata};

/// Flatten a logical schema into the stored layout.
pub fn flatten_schema(schema: &SchemaRef, naming: &dyn NamingStrategy) -> Result<SchemaRef> {
    let empty = RecordBatch::new_empty(schema.clone());
    Ok(flatten_batch(&empty, naming)?.schema())
}

/// Flatten a logical chunk into the stored layout.
pub fn flatten_batch(batch: &RecordBatch, naming: &dyn NamingStrategy) -> Result<RecordBatch> {
    let mut out = FlatColumns::default();
    let schema = batch.schema();

    for (field, array) in schema.fields().iter().zip(batch.columns()) {
        match field.data_type() {
            DataType::List(inner) => match inner.data_type() {
                DataType::Struct(_) => flatten_nested(batch, field, array, naming, &mut out)?,
                _ => {
                    let list = array.as_list::<i32>();
                    let counter = field
                        .metadata()
                        .get(COUNTER_KEY)
                        .cloned()
                        .unwrap_or_else(|| naming.counter_name(field.name()));
                    out.push_counter(&counter, lengths(list), provided_counter(batch, &counter))?;
                    let mut md = field.metadata().clone();
                    md.extend(counted_metadata(&counter));
                    out.push(field.as_ref().clone().with_metadata(md), array.clone())?;
                }
            },
            DataType::Struct(children) => {
                let s = array.as_struct();
                for (child, column) in children.iter().zip(s.columns()) {
                    if is_nested(child.data_type()) {
                        return Err(unsupported(field.name(), child.name()));
                    }
                    let name = naming.field_name(field.name(), child.name());
                    out.push(Field::new(name, child.data_type().clone(), true), column.clone())?;
                }
            }
            DataType::LargeList(_) | DataType::FixedSizeList(..) | DataType::Map(..) => {
                return Err(Error::UnsupportedStructure(format!(
                    "column '{}' has type {} which cannot be stored flat",
                    field.name(),
                    field.data_type()
                )));
            }
            _ => out.push(field.as_ref().clone(), array.clone())?,
        }
    }

    let schema = Arc::new(Schema::new_with_metadata(out.fields, schema.metadata().clone()));
    let options = RecordBatchOptions::new().with_row_count(Some(batch.num_rows()));
    Ok(RecordBatch::try_new_with_options(schema, out.columns, &options)?)
}

fn flatten_nested(
    batch: &RecordBatch,
    field: &FieldRef,
    array: &ArrayRef,
    naming: &dyn NamingStrategy,
    out: &mut FlatColumns,
) -> Result<()> {
    let list = array.as_list::<i32>();
    let lens = lengths(list);
    let counter = naming.counter_name(field.name());
    out.push_counter(&counter, lens.clone(), provided_counter(batch, &counter))?;

    let offsets = list.value_offsets();
    let (start, end) = (offsets[0] as usize, offsets[offsets.len() - 1] as usize);
    let members = list.values().slice(start, end - start);
    let members = members.as_struct();

    for (child, values) in members.fields().iter().zip(members.columns()) {
        if is_nested(child.data_type()) {
            return Err(unsupported(field.name(), child.name()));
        }
        let item = Arc::new(Field::new_list_field(child.data_type().clone(), child.is_nullable()));
        let column = ListArray::try_new(
            item.clone(),
            OffsetBuffer::from_lengths(lens.iter().map(|&n| n as usize)),
            values.clone(),
            list.nulls().cloned(),
        )?;
        let name = naming.field_name(field.name(), child.name());
        let flat = Field::new(name, DataType::List(item), field.is_nullable())
            .with_metadata(counted_metadata(&counter));
        out.push(flat, Arc::new(column))?;
    }
    Ok(())
}

/// An `Int32` column of the input already named like the counter.
fn provided_counter<'a>(batch: &'a RecordBatch, counter: &str) -> Option<&'a Int32Array> {
    let idx = batch.schema().index_of(counter).ok()?;
    batch.column(idx).as_primitive_opt::<Int32Type>()
}

/// Per-row element counts of a list column.
pub fn lengths(list: &ListArray) -> Vec<i32> {
    list.value_offsets().windows(2).map(|w| w[1] - w[0]).collect()
}

fn is_nested(dt: &DataType) -> bool {
    matches!(
        dt,
        DataType::List(_)
            | DataType::LargeList(_)
            | DataType::FixedSizeList(..)
            | DataType::Struct(_)
            | DataType::Map(..)
    )
}

fn unsupported(outer: &str, inner: &str) -> Error {
    Error::UnsupportedStructure(format!(
        "member '{inner}' of '{outer}' is itself nested; only one level of nesting is stored"
    ))
}

#[derive(Default)]
struct FlatColumns {
    fields: Vec<Field>,
    columns: Vec<ArrayRef>,
    names: HashSet<String>,
    counters: HashMap<String, Vec<i32>>,
}

impl FlatColumns {
    fn push(&mut self, field: Field, column: ArrayRef) -> Result<()> {
        if !self.names.insert(field.name().clone()) {
            return Err(Error::UnsupportedStructure(format!(
                "column name '{}' produced twice while flattening",
                field.name()
            )));
        }
        self.fields.push(field);
        self.columns.push(column);
        Ok(())
    }

    /// Emit a counter once; later lists sharing it must agree row by row.
    ///
    /// A counter already present in the input is kept where it is and only
    /// checked against the list lengths.
    fn push_counter(
        &mut self,
        name: &str,
        lens: Vec<i32>,
        provided: Option<&Int32Array>,
    ) -> Result<()> {
        let known = match self.counters.get(name) {
            Some(existing) => Some(existing.as_slice()),
            None => provided.map(|c| &c.values()[..]),
        };
        if let Some(existing) = known {
            if existing != lens.as_slice() {
                return Err(Error::SchemaMismatch(format!(
                    "columns sharing counter '{name}' disagree on row lengths"
                )));
            }
            self.counters.insert(name.to_string(), lens);
            return Ok(());
        }
        let column: ArrayRef = Arc::new(Int32Array::from(lens.clone()));
        self.push(Field::new(name, DataType::Int32, false), column)?;
        self.counters.insert(name.to_string(), lens);
        Ok(())
    }
}
