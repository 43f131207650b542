//! Table slices: immutable, reference-counted batches of rows that share a
//! schema.
//!
//! Data is stored column-wise. A slice never changes after construction; all
//! operations return a new slice and cloning a slice only bumps a reference
//! count.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::schema::Schema;
use crate::types::{Field, Value};

#[derive(Clone, Serialize, Deserialize)]
#[serde(into = "SliceData", try_from = "SliceData")]
pub struct TableSlice {
    inner: Arc<Inner>,
}

struct Inner {
    schema: Arc<Schema>,
    columns: Vec<Vec<Value>>,
    rows: usize,
    offset: Option<u64>,
    import_time_ms: Option<u64>,
}

/// Owned wire form used for checkpoint payloads.
#[derive(Serialize, Deserialize)]
struct SliceData {
    schema: Schema,
    columns: Vec<Vec<Value>>,
    offset: Option<u64>,
    import_time_ms: Option<u64>,
}

impl From<TableSlice> for SliceData {
    fn from(s: TableSlice) -> Self {
        SliceData {
            schema: s.inner.schema.as_ref().clone(),
            columns: s.inner.columns.clone(),
            offset: s.inner.offset,
            import_time_ms: s.inner.import_time_ms,
        }
    }
}

impl TryFrom<SliceData> for TableSlice {
    type Error = Error;

    fn try_from(d: SliceData) -> Result<Self> {
        let slice = TableSlice::new(d.schema, d.columns)?;
        Ok(slice.with_metadata(d.offset, d.import_time_ms))
    }
}

impl TableSlice {
    /// Build a slice from columns, validating shape and types.
    pub fn new(schema: Schema, columns: Vec<Vec<Value>>) -> Result<Self> {
        Self::with_shared_schema(Arc::new(schema), columns)
    }

    pub fn with_shared_schema(schema: Arc<Schema>, columns: Vec<Vec<Value>>) -> Result<Self> {
        if columns.len() != schema.len() {
            return Err(Error::Schema(format!(
                "schema '{}' has {} fields but {} columns were supplied",
                schema.name,
                schema.len(),
                columns.len()
            )));
        }
        let rows = columns.first().map(Vec::len).unwrap_or(0);
        for (field, column) in schema.fields.iter().zip(&columns) {
            if column.len() != rows {
                return Err(Error::Schema(format!(
                    "column '{}' has {} values, expected {}",
                    field.name,
                    column.len(),
                    rows
                )));
            }
            if let Some(bad) = column.iter().find(|v| !v.conforms_to(&field.data_type)) {
                return Err(Error::Type(format!(
                    "value {} does not conform to {} in field '{}'",
                    bad, field.data_type, field.name
                )));
            }
        }
        Ok(Self::from_parts(schema, columns, rows))
    }

    fn from_parts(schema: Arc<Schema>, columns: Vec<Vec<Value>>, rows: usize) -> Self {
        TableSlice {
            inner: Arc::new(Inner {
                schema,
                columns,
                rows,
                offset: None,
                import_time_ms: None,
            }),
        }
    }

    /// Build a slice from row-major values.
    pub fn from_rows(schema: Schema, rows: Vec<Vec<Value>>) -> Result<Self> {
        let mut columns: Vec<Vec<Value>> = (0..schema.len())
            .map(|_| Vec::with_capacity(rows.len()))
            .collect();
        for (i, row) in rows.into_iter().enumerate() {
            if row.len() != columns.len() {
                return Err(Error::Schema(format!(
                    "row {} has {} values, schema '{}' has {} fields",
                    i,
                    row.len(),
                    schema.name,
                    columns.len()
                )));
            }
            for (col, v) in columns.iter_mut().zip(row) {
                col.push(v);
            }
        }
        Self::new(schema, columns)
    }

    pub fn empty(schema: Schema) -> Self {
        let columns = vec![Vec::new(); schema.len()];
        Self::from_parts(Arc::new(schema), columns, 0)
    }

    /// Infer schemas from self-describing records. Consecutive records with a
    /// compatible shape share one slice; a shape change starts a new slice.
    pub fn from_records<I>(schema_name: &str, records: I) -> Result<Vec<TableSlice>>
    where
        I: IntoIterator<Item = Vec<(String, Value)>>,
    {
        let mut out = Vec::new();
        let mut current: Option<(Schema, Vec<Vec<Value>>)> = None;
        for record in records {
            let fits = match &current {
                Some((schema, _)) => {
                    schema.len() == record.len()
                        && schema
                            .fields
                            .iter()
                            .zip(&record)
                            .all(|(f, (name, v))| f.name == *name && v.conforms_to(&f.data_type))
                }
                None => false,
            };
            if !fits {
                if let Some((schema, rows)) = current.take() {
                    out.push(Self::from_rows(schema, rows)?);
                }
                let fields = record
                    .iter()
                    .map(|(name, v)| Field::new(name.clone(), v.data_type()))
                    .collect();
                current = Some((Schema::new(schema_name, fields), Vec::new()));
            }
            if let Some((_, rows)) = current.as_mut() {
                rows.push(record.into_iter().map(|(_, v)| v).collect());
            }
        }
        if let Some((schema, rows)) = current {
            out.push(Self::from_rows(schema, rows)?);
        }
        Ok(out)
    }

    /// Convenience wrapper over [`TableSlice::from_records`] for JSON objects.
    pub fn from_json_rows(schema_name: &str, rows: &[serde_json::Value]) -> Result<Vec<TableSlice>> {
        let mut records = Vec::with_capacity(rows.len());
        for (i, row) in rows.iter().enumerate() {
            let obj = row.as_object().ok_or_else(|| {
                Error::Schema(format!("record {i} is not a JSON object: {row}"))
            })?;
            records.push(
                obj.iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect::<Vec<_>>(),
            );
        }
        Self::from_records(schema_name, records)
    }

    pub fn schema(&self) -> &Schema {
        &self.inner.schema
    }

    pub fn shared_schema(&self) -> Arc<Schema> {
        Arc::clone(&self.inner.schema)
    }

    pub fn rows(&self) -> usize {
        self.inner.rows
    }

    pub fn columns(&self) -> usize {
        self.inner.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.rows == 0
    }

    /// Global row-sequence position of the first row, once assigned.
    pub fn offset(&self) -> Option<u64> {
        self.inner.offset
    }

    pub fn import_time_ms(&self) -> Option<u64> {
        self.inner.import_time_ms
    }

    pub fn column(&self, idx: usize) -> Option<&[Value]> {
        self.inner.columns.get(idx).map(Vec::as_slice)
    }

    pub fn column_by_name(&self, name: &str) -> Option<&[Value]> {
        self.schema().index_of(name).and_then(|i| self.column(i))
    }

    pub fn value(&self, row: usize, col: usize) -> Option<&Value> {
        self.inner.columns.get(col).and_then(|c| c.get(row))
    }

    pub fn row(&self, row: usize) -> Vec<Value> {
        self.inner
            .columns
            .iter()
            .filter_map(|c| c.get(row).cloned())
            .collect()
    }

    pub fn with_offset(&self, offset: u64) -> Self {
        self.with_metadata(Some(offset), self.inner.import_time_ms)
    }

    pub fn with_import_time(&self, import_time_ms: u64) -> Self {
        self.with_metadata(self.inner.offset, Some(import_time_ms))
    }

    fn with_metadata(&self, offset: Option<u64>, import_time_ms: Option<u64>) -> Self {
        TableSlice {
            inner: Arc::new(Inner {
                schema: Arc::clone(&self.inner.schema),
                columns: self.inner.columns.clone(),
                rows: self.inner.rows,
                offset,
                import_time_ms,
            }),
        }
    }

    /// Keep the columns at `indices`, in that order.
    pub fn select(&self, indices: &[usize]) -> Self {
        let schema = Arc::new(self.schema().project(indices));
        let columns = indices
            .iter()
            .filter_map(|&i| self.inner.columns.get(i).cloned())
            .collect();
        self.derive(schema, columns, self.inner.rows, self.inner.offset)
    }

    /// Keep the named fields in the requested order. Returns `None` when none
    /// of them exist in this slice.
    pub fn select_fields(&self, names: &[String]) -> Option<Self> {
        let indices: Vec<usize> = names
            .iter()
            .filter_map(|n| self.schema().index_of(n))
            .collect();
        if indices.is_empty() {
            return None;
        }
        Some(self.select(&indices))
    }

    /// Remove the named fields. Returns `None` when nothing would remain.
    pub fn drop_fields(&self, names: &[String]) -> Option<Self> {
        let indices: Vec<usize> = self
            .schema()
            .fields
            .iter()
            .enumerate()
            .filter(|(_, f)| !names.contains(&f.name))
            .map(|(i, _)| i)
            .collect();
        if indices.is_empty() {
            return None;
        }
        Some(self.select(&indices))
    }

    /// Keep rows whose mask entry is `true`.
    pub fn filter(&self, mask: &[bool]) -> Self {
        let indices: Vec<usize> = mask
            .iter()
            .enumerate()
            .filter(|(_, keep)| **keep)
            .map(|(i, _)| i)
            .collect();
        if indices.len() == self.rows() {
            return self.clone();
        }
        self.take(&indices)
    }

    /// Gather rows by index. Indices may repeat or appear in any order.
    pub fn take(&self, indices: &[usize]) -> Self {
        let columns = self
            .inner
            .columns
            .iter()
            .map(|c| indices.iter().filter_map(|&i| c.get(i).cloned()).collect())
            .collect();
        self.derive(self.shared_schema(), columns, indices.len(), None)
    }

    /// Rows in `[begin, end)`, clamped to the slice.
    pub fn slice_rows(&self, begin: usize, end: usize) -> Self {
        let end = end.min(self.rows());
        let begin = begin.min(end);
        if begin == 0 && end == self.rows() {
            return self.clone();
        }
        let columns = self
            .inner
            .columns
            .iter()
            .map(|c| c[begin..end].to_vec())
            .collect();
        let offset = self.inner.offset.map(|o| o + begin as u64);
        self.derive(self.shared_schema(), columns, end - begin, offset)
    }

    /// Split into slices of at most `rows` rows.
    pub fn split(&self, rows: usize) -> Vec<Self> {
        let rows = rows.max(1);
        if self.rows() <= rows {
            return vec![self.clone()];
        }
        (0..self.rows())
            .step_by(rows)
            .map(|begin| self.slice_rows(begin, begin + rows))
            .collect()
    }

    /// Concatenate slices of one schema.
    pub fn concat(slices: &[TableSlice]) -> Result<TableSlice> {
        let first = slices
            .first()
            .ok_or_else(|| Error::Invariant("cannot concatenate zero slices".into()))?;
        if slices.len() == 1 {
            return Ok(first.clone());
        }
        let mut columns: Vec<Vec<Value>> = vec![Vec::new(); first.columns()];
        let mut rows = 0;
        for s in slices {
            if s.schema() != first.schema() {
                return Err(Error::Schema(format!(
                    "cannot concatenate '{}' with '{}'",
                    first.schema(),
                    s.schema()
                )));
            }
            for (dst, src) in columns.iter_mut().zip(&s.inner.columns) {
                dst.extend(src.iter().cloned());
            }
            rows += s.rows();
        }
        Ok(first.derive(first.shared_schema(), columns, rows, first.offset()))
    }

    fn derive(
        &self,
        schema: Arc<Schema>,
        columns: Vec<Vec<Value>>,
        rows: usize,
        offset: Option<u64>,
    ) -> Self {
        TableSlice {
            inner: Arc::new(Inner {
                schema,
                columns,
                rows,
                offset,
                import_time_ms: self.inner.import_time_ms,
            }),
        }
    }

    /// Render every row as a JSON object.
    pub fn to_json_rows(&self) -> Vec<serde_json::Value> {
        (0..self.rows())
            .map(|row| {
                let mut obj = serde_json::Map::with_capacity(self.columns());
                for (field, column) in self.schema().fields.iter().zip(&self.inner.columns) {
                    obj.insert(field.name.clone(), column[row].to_json(Some(&field.data_type)));
                }
                serde_json::Value::Object(obj)
            })
            .collect()
    }
}

impl PartialEq for TableSlice {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
            || (self.schema() == other.schema() && self.inner.columns == other.inner.columns)
    }
}

impl fmt::Debug for TableSlice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableSlice")
            .field("schema", &self.schema().name)
            .field("rows", &self.rows())
            .field("columns", &self.columns())
            .field("offset", &self.offset())
            .finish()
    }
}
