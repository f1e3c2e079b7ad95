//! Per-column type/role metadata.
//!
//! Tabular text carries no column semantics, so every tabular resource is paired with a small JSON
//! document (`<base>.pmd`) mapping each column name to a `[type, role]` pair:
//!
//! ```json
//! {"id": ["integer", "id"], "score": ["real", "attribute"], "churn": ["binominal", "label"]}
//! ```
//!
//! Metadata is an enrichment, never a requirement. Malformed caller annotations degrade to type
//! inference and unreadable documents are reported as errors that the serializer recovers from;
//! both are logged at warning level.

use std::fmt;
use std::io::{Read, Write};

use crate::error::{ConnectorError, ConnectorResult};
use crate::types::{Annotations, DataType, Schema};

/// Role meaning "no special role": a plain feature column.
pub const DEFAULT_ROLE: &str = "attribute";

/// Semantic column type understood by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SemanticType {
    Integer,
    Real,
    Date,
    Time,
    DateTime,
    /// Two-valued categorical.
    Binominal,
    /// Multi-valued categorical or free text. The fallback category.
    Polynomial,
    /// Any other type name the backend or the caller uses, kept verbatim.
    Other(String),
}

impl SemanticType {
    /// Parse a type name. Unknown names are preserved as [`SemanticType::Other`].
    pub fn parse(name: &str) -> Self {
        match name {
            "integer" => Self::Integer,
            "real" => Self::Real,
            "date" => Self::Date,
            "time" => Self::Time,
            "date_time" => Self::DateTime,
            "binominal" => Self::Binominal,
            "polynomial" => Self::Polynomial,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Integer => "integer",
            Self::Real => "real",
            Self::Date => "date",
            Self::Time => "time",
            Self::DateTime => "date_time",
            Self::Binominal => "binominal",
            Self::Polynomial => "polynomial",
            Self::Other(name) => name,
        }
    }

    /// Whether cells of this type are parsed as timestamps on read.
    pub fn is_date(&self) -> bool {
        matches!(self, Self::Date | Self::Time | Self::DateTime)
    }

    /// Infer the semantic type from a column's storage kind.
    pub fn infer(data_type: &DataType) -> Self {
        match data_type {
            DataType::Int64 => Self::Integer,
            DataType::Float64 => Self::Real,
            DataType::DateTime => Self::DateTime,
            DataType::Bool => Self::Binominal,
            DataType::Utf8 => Self::Polynomial,
        }
    }
}

impl fmt::Display for SemanticType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The `(type, role)` pair of one column.
///
/// `role` is `None` for plain attributes; it is written as [`DEFAULT_ROLE`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMetadata {
    pub semantic_type: SemanticType,
    pub role: Option<String>,
}

impl ColumnMetadata {
    /// Create metadata, normalizing the `"attribute"` role to `None`.
    pub fn new(semantic_type: SemanticType, role: Option<&str>) -> Self {
        Self {
            semantic_type,
            role: role.filter(|r| *r != DEFAULT_ROLE).map(str::to_string),
        }
    }

    /// Metadata for a plain attribute column.
    pub fn attribute(semantic_type: SemanticType) -> Self {
        Self::new(semantic_type, None)
    }

    /// The role as written into metadata documents.
    pub fn role_or_default(&self) -> &str {
        self.role.as_deref().unwrap_or(DEFAULT_ROLE)
    }
}

/// A caller-supplied (or decoded) annotation for one column.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnAnnotation {
    /// A well-formed `(type, role)` pair.
    Typed(ColumnMetadata),
    /// A free-form annotation, interpreted best-effort. A two-element array of strings is
    /// treated as `[type, role]`; anything else is malformed and degrades with a warning.
    Loose(serde_json::Value),
}

impl From<ColumnMetadata> for ColumnAnnotation {
    fn from(meta: ColumnMetadata) -> Self {
        Self::Typed(meta)
    }
}

impl From<serde_json::Value> for ColumnAnnotation {
    fn from(value: serde_json::Value) -> Self {
        Self::Loose(value)
    }
}

/// Derive one [`ColumnMetadata`] per column of a dataset's `schema`, in column order.
///
/// Priority per column: a well-formed annotation is used verbatim; a malformed one is logged and
/// whatever type/role can be extracted from it is kept; a missing type is inferred from the
/// column's storage kind and a missing role defaults to [`DEFAULT_ROLE`].
pub fn derive_metadata(
    schema: &Schema,
    annotations: Option<&Annotations>,
) -> Vec<(String, ColumnMetadata)> {
    schema
        .fields
        .iter()
        .map(|field| {
            let (semantic_type, role) = match annotations.and_then(|a| a.get(&field.name)) {
                Some(ColumnAnnotation::Typed(meta)) => {
                    (Some(meta.semantic_type.clone()), meta.role.clone())
                }
                Some(ColumnAnnotation::Loose(value)) => extract_loose(&field.name, value),
                None => (None, None),
            };
            let semantic_type =
                semantic_type.unwrap_or_else(|| SemanticType::infer(&field.data_type));
            (field.name.clone(), ColumnMetadata::new(semantic_type, role.as_deref()))
        })
        .collect()
}

fn extract_loose(
    column: &str,
    value: &serde_json::Value,
) -> (Option<SemanticType>, Option<String>) {
    use serde_json::Value as J;

    match value {
        J::Null => (None, None),
        J::Array(items) if items.len() == 2 && items.iter().all(J::is_string) => (
            items[0].as_str().map(SemanticType::parse),
            items[1].as_str().map(str::to_string),
        ),
        J::Array(items) => {
            warn_malformed(column);
            (
                items.first().and_then(present).map(|v| SemanticType::parse(&json_text(v))),
                items.get(1).and_then(present).map(json_text),
            )
        }
        other => {
            warn_malformed(column);
            (Some(SemanticType::parse(&json_text(other))), None)
        }
    }
}

fn warn_malformed(column: &str) {
    tracing::warn!(
        column,
        "metadata for column '{column}' must be a [type, role] pair, e.g. [\"binominal\", \"label\"]"
    );
}

/// `null` elements count as absent.
fn present(value: &serde_json::Value) -> Option<&serde_json::Value> {
    (!value.is_null()).then_some(value)
}

fn json_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Encode derived metadata as a `{column: [type, role]}` document, preserving column order.
pub fn encode_metadata(columns: &[(String, ColumnMetadata)]) -> serde_json::Value {
    let map = columns
        .iter()
        .map(|(name, meta)| {
            (
                name.clone(),
                serde_json::json!([meta.semantic_type.as_str(), meta.role_or_default()]),
            )
        })
        .collect::<serde_json::Map<_, _>>();
    serde_json::Value::Object(map)
}

/// Write the metadata document. Failures are logged and swallowed.
pub fn write_metadata<W: Write>(columns: &[(String, ColumnMetadata)], writer: W) {
    if let Err(e) = serde_json::to_writer(writer, &encode_metadata(columns)) {
        tracing::warn!(error = %e, "failed to write column metadata (reason: {e})");
    }
}

/// Decoded metadata document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedMetadata {
    /// Column metadata in document order.
    pub columns: Vec<(String, ColumnMetadata)>,
    /// Columns whose type is `date`, `time` or `date_time`, in document order.
    pub date_columns: Vec<String>,
}

impl DecodedMetadata {
    pub fn get(&self, column: &str) -> Option<&ColumnMetadata> {
        self.columns.iter().find(|(name, _)| name == column).map(|(_, meta)| meta)
    }

    pub fn is_date_column(&self, column: &str) -> bool {
        self.date_columns.iter().any(|c| c == column)
    }

    /// Convert into the side-channel representation attached to a [`DataSet`].
    pub fn into_annotations(self) -> Annotations {
        self.columns
            .into_iter()
            .map(|(name, meta)| (name, ColumnAnnotation::Typed(meta)))
            .collect()
    }
}

/// Decode a `{column: [type, role]}` document.
pub fn decode_metadata(document: &serde_json::Value) -> ConnectorResult<DecodedMetadata> {
    let entries = document
        .as_object()
        .ok_or_else(|| ConnectorError::deserialization("metadata document must be a JSON object"))?;

    let mut decoded = DecodedMetadata::default();
    for (name, entry) in entries {
        let pair = entry.as_array().filter(|items| items.len() >= 2).ok_or_else(|| {
            ConnectorError::deserialization(format!(
                "metadata for column '{name}' is not a [type, role] pair"
            ))
        })?;
        let semantic_type = pair[0]
            .as_str()
            .map(SemanticType::parse)
            .ok_or_else(|| {
                ConnectorError::deserialization(format!(
                    "metadata type for column '{name}' is not a string"
                ))
            })?;
        let role = pair[1].as_str();

        if semantic_type.is_date() {
            decoded.date_columns.push(name.clone());
        }
        decoded.columns.push((name.clone(), ColumnMetadata::new(semantic_type, role)));
    }
    Ok(decoded)
}

/// Read and decode a metadata document.
pub fn read_metadata<R: Read>(reader: R) -> ConnectorResult<DecodedMetadata> {
    let document: serde_json::Value = serde_json::from_reader(reader)
        .map_err(|e| ConnectorError::deserialization(format!("invalid metadata document: {e}")))?;
    decode_metadata(&document)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DataSet, Field, Value};
    use serde_json::json;

    fn all_kinds() -> DataSet {
        DataSet::new(
            Schema::new(vec![
                Field::new("i", DataType::Int64),
                Field::new("f", DataType::Float64),
                Field::new("d", DataType::DateTime),
                Field::new("b", DataType::Bool),
                Field::new("s", DataType::Utf8),
            ]),
            vec![vec![Value::Null; 5]],
        )
    }

    fn types_of(derived: &[(String, ColumnMetadata)]) -> Vec<&str> {
        derived.iter().map(|(_, m)| m.semantic_type.as_str()).collect()
    }

    #[test]
    fn infers_types_from_storage_kind() {
        let derived = derive_metadata(&all_kinds().schema, None);
        assert_eq!(
            types_of(&derived),
            vec!["integer", "real", "date_time", "binominal", "polynomial"]
        );
        assert!(derived.iter().all(|(_, m)| m.role_or_default() == DEFAULT_ROLE));
    }

    #[test]
    fn typed_annotation_is_used_verbatim() {
        let mut ds = all_kinds();
        ds.annotate("s", ColumnMetadata::new(SemanticType::Binominal, Some("label")));

        let derived = derive_metadata(&ds.schema, ds.metadata.as_ref());
        assert_eq!(derived[4].1.semantic_type, SemanticType::Binominal);
        assert_eq!(derived[4].1.role.as_deref(), Some("label"));
    }

    #[test]
    fn loose_pair_is_well_formed() {
        let mut ds = all_kinds();
        ds.annotate("i", json!(["integer", "id"]));

        let derived = derive_metadata(&ds.schema, ds.metadata.as_ref());
        assert_eq!(derived[0].1, ColumnMetadata::new(SemanticType::Integer, Some("id")));
    }

    #[test]
    fn malformed_annotations_degrade_to_partial_extraction() {
        let mut ds = all_kinds();
        ds.annotate("i", json!(["real"]));
        ds.annotate("f", json!("polynomial"));
        ds.annotate("d", json!([]));
        ds.annotate("b", json!(["binominal", "label", "extra"]));
        ds.annotate("s", serde_json::Value::Null);

        let derived = derive_metadata(&ds.schema, ds.metadata.as_ref());
        assert_eq!(
            types_of(&derived),
            vec!["real", "polynomial", "date_time", "binominal", "polynomial"]
        );
        assert_eq!(derived[0].1.role, None);
        assert_eq!(derived[3].1.role.as_deref(), Some("label"));
    }

    #[test]
    fn null_elements_count_as_absent() {
        let mut ds = all_kinds();
        ds.annotate("i", json!(["integer", null]));
        ds.annotate("f", json!([null]));
        ds.annotate("s", json!([null, "label"]));

        let derived = derive_metadata(&ds.schema, ds.metadata.as_ref());
        assert_eq!(derived[0].1, ColumnMetadata::attribute(SemanticType::Integer));
        assert_eq!(derived[1].1, ColumnMetadata::attribute(SemanticType::Real));
        assert_eq!(
            derived[4].1,
            ColumnMetadata::new(SemanticType::Polynomial, Some("label"))
        );
        assert_eq!(
            encode_metadata(&derived[..2]),
            json!({"i": ["integer", "attribute"], "f": ["real", "attribute"]})
        );
    }

    #[test]
    fn encode_preserves_column_order_and_default_role() {
        let derived = derive_metadata(&all_kinds().schema, None);
        let text = encode_metadata(&derived).to_string();
        assert!(text.starts_with(r#"{"i":["integer","attribute"],"f":["real","attribute"]"#));
    }

    #[test]
    fn decode_maps_attribute_role_to_none_and_collects_date_columns() {
        let doc = json!({
            "when": ["date_time", "attribute"],
            "day": ["date", "id"],
            "label": ["binominal", "label"],
        });
        let decoded = decode_metadata(&doc).unwrap();

        assert_eq!(decoded.date_columns, vec!["when".to_string(), "day".to_string()]);
        assert_eq!(decoded.get("when").unwrap().role, None);
        assert_eq!(decoded.get("label").unwrap().role.as_deref(), Some("label"));
        assert!(decoded.is_date_column("day"));
    }

    #[test]
    fn decode_rejects_malformed_documents() {
        assert!(decode_metadata(&json!(["integer", "attribute"])).is_err());
        assert!(decode_metadata(&json!({"a": ["integer"]})).is_err());
        assert!(read_metadata(r#"{"a": ["integer", "attr"#.as_bytes()).is_err());
    }

    #[test]
    fn unknown_types_survive_a_round_trip() {
        let doc = json!({"t": ["text", "attribute"]});
        let decoded = decode_metadata(&doc).unwrap();
        assert_eq!(
            decoded.get("t").unwrap().semantic_type,
            SemanticType::Other("text".to_string())
        );
        assert_eq!(encode_metadata(&decoded.columns), doc);
    }
}
