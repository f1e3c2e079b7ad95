//! Core data model for tabular resources.
//!
//! Tabular payloads travel as an in-memory [`DataSet`]: an ordered [`Schema`] of typed
//! [`Field`]s plus row-major [`Value`] storage. A dataset may also carry per-column
//! [`ColumnAnnotation`]s, the metadata side-channel that is written next to the tabular text.

use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

use crate::metadata::{ColumnAnnotation, ColumnMetadata};

/// Textual format used for date/time cells in tabular resources.
pub const DATE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

const DATE_TIME_PARSE_FORMATS: &[&str] =
    &[DATE_TIME_FORMAT, "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.fZ"];

/// Native storage kind of a column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataType {
    /// 64-bit signed integer.
    Int64,
    /// 64-bit floating point number.
    Float64,
    /// Boolean.
    Bool,
    /// Timestamp without timezone.
    DateTime,
    /// UTF-8 string. Also the storage kind of arbitrary categorical data.
    Utf8,
}

/// A single named, typed field in a [`Schema`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    /// Field/column name.
    pub name: String,
    /// Field data type.
    pub data_type: DataType,
}

impl Field {
    /// Create a new field.
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

/// Ordered list of fields describing the columns of a [`DataSet`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    /// Ordered list of fields.
    pub fields: Vec<Field>,
}

impl Schema {
    /// Create a new schema from fields.
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    /// Iterate field names in order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    /// Returns the index of a field by name, if present.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }
}

/// A single typed value in a [`DataSet`].
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Missing/empty value.
    Null,
    /// 64-bit signed integer.
    Int64(i64),
    /// 64-bit float.
    Float64(f64),
    /// Boolean.
    Bool(bool),
    /// Timestamp without timezone.
    DateTime(NaiveDateTime),
    /// UTF-8 string.
    Utf8(String),
}

impl Value {
    /// Render the value the way it is written into tabular text. `Null` and NaN render empty.
    pub fn to_text(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Int64(v) => v.to_string(),
            Value::Float64(v) if v.is_nan() => String::new(),
            // Debug keeps a trailing `.0` so reals stay recognizable without metadata.
            Value::Float64(v) => format!("{v:?}"),
            Value::Bool(v) => v.to_string(),
            Value::DateTime(v) => format_date_time(v),
            Value::Utf8(v) => v.clone(),
        }
    }
}

/// Format a timestamp with [`DATE_TIME_FORMAT`].
pub fn format_date_time(value: &NaiveDateTime) -> String {
    value.format(DATE_TIME_FORMAT).to_string()
}

/// Parse a timestamp written by [`format_date_time`] or by the backend.
///
/// Accepts full timestamps (space or `T` separated), bare dates (midnight) and bare times
/// (on 1970-01-01).
pub fn parse_date_time(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    DATE_TIME_PARSE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .map(|d| d.and_time(NaiveTime::MIN))
        })
        .or_else(|| {
            NaiveTime::parse_from_str(raw, "%H:%M:%S%.f")
                .ok()
                .map(|t| NaiveDate::default().and_time(t))
        })
}

static NULL: Value = Value::Null;

/// Per-column metadata attached to a [`DataSet`], keyed by column name.
pub type Annotations = BTreeMap<String, ColumnAnnotation>;

/// In-memory tabular dataset.
///
/// Rows are stored as `Vec<Vec<Value>>` in the same order as the [`Schema`] fields.
#[derive(Debug, Clone, PartialEq)]
pub struct DataSet {
    /// Schema describing row shape.
    pub schema: Schema,
    /// Row-major value storage.
    pub rows: Vec<Vec<Value>>,
    /// Optional per-column type/role annotations.
    pub metadata: Option<Annotations>,
}

impl DataSet {
    /// Create a dataset from schema and rows, without metadata.
    pub fn new(schema: Schema, rows: Vec<Vec<Value>>) -> Self {
        Self {
            schema,
            rows,
            metadata: None,
        }
    }

    /// Attach (or replace) the metadata side-channel.
    pub fn with_metadata(mut self, metadata: Annotations) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Annotate a single column, creating the side-channel if needed.
    pub fn annotate(&mut self, column: impl Into<String>, annotation: impl Into<ColumnAnnotation>) {
        self.metadata
            .get_or_insert_with(BTreeMap::new)
            .insert(column.into(), annotation.into());
    }

    /// Typed metadata for a column, if a well-formed annotation is attached.
    pub fn column_metadata(&self, column: &str) -> Option<&ColumnMetadata> {
        match self.metadata.as_ref()?.get(column)? {
            ColumnAnnotation::Typed(meta) => Some(meta),
            ColumnAnnotation::Loose(_) => None,
        }
    }

    /// Number of rows in the dataset.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Number of columns in the dataset.
    pub fn column_count(&self) -> usize {
        self.schema.fields.len()
    }

    /// Iterate the values of one column, top to bottom.
    pub fn column_values(&self, idx: usize) -> impl Iterator<Item = &Value> {
        self.rows.iter().map(move |row| row.get(idx).unwrap_or(&NULL))
    }
}
