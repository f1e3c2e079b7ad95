//! Tabular text codec.
//!
//! A dataset is written as a headed CSV file plus a `.pmd` metadata document. Reading uses the
//! metadata to restore column types; when the document is missing or does not fit the data,
//! the CSV is read alone and every column type is inferred from its cells.

use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;

use crate::error::{ConnectorError, ConnectorResult};
use crate::metadata::{self, DecodedMetadata, SemanticType};
use crate::types::{DataSet, DataType, Field, Schema, Value, parse_date_time};

use super::sanitized_header;

/// Write `dataset` as tabular text to `csv_out` and its column metadata to `metadata_out`.
///
/// Column names are sanitized on the way out (see [`super::sanitize_column_name`]); the dataset
/// itself is not modified. Metadata write failures are logged, never returned.
pub fn write_dataset<W: Write, M: Write>(
    dataset: &DataSet,
    csv_out: W,
    metadata_out: M,
) -> ConnectorResult<()> {
    let (schema, annotations) = sanitized_header(dataset);

    let mut wtr = ::csv::WriterBuilder::new().has_headers(false).from_writer(csv_out);
    wtr.write_record(schema.field_names())?;
    for row in &dataset.rows {
        wtr.write_record(row.iter().map(Value::to_text))?;
    }
    wtr.flush()?;

    let derived = metadata::derive_metadata(&schema, annotations.as_deref());
    metadata::write_metadata(&derived, metadata_out);
    Ok(())
}

/// Write `dataset` to `csv_path` and its metadata to `metadata_path`.
pub fn write_dataset_to_path(
    dataset: &DataSet,
    csv_path: &Path,
    metadata_path: &Path,
) -> ConnectorResult<()> {
    let csv_out = BufWriter::new(File::create(csv_path)?);
    match File::create(metadata_path) {
        Ok(md) => write_dataset(dataset, csv_out, BufWriter::new(md)),
        Err(e) => {
            tracing::warn!(
                path = %metadata_path.display(),
                "could not create metadata file, column types will be inferred on read (reason: {e})"
            );
            write_dataset(dataset, csv_out, std::io::sink())
        }
    }
}

/// Read a tabular file, restoring column types from the metadata at `metadata_path`.
///
/// Any problem with the metadata (missing, truncated, or inconsistent with the cells) is logged
/// and the file is read again with inferred types and no metadata attached.
pub fn read_dataset_from_path(csv_path: &Path, metadata_path: &Path) -> ConnectorResult<DataSet> {
    let with_metadata = File::open(metadata_path)
        .map_err(ConnectorError::from)
        .and_then(metadata::read_metadata)
        .and_then(|decoded| {
            let mut rdr = reader_from_path(csv_path)?;
            read_dataset_with_metadata(&mut rdr, decoded)
        });

    match with_metadata {
        Ok(ds) => Ok(ds),
        Err(e) => {
            tracing::warn!(
                path = %csv_path.display(),
                "failed to use the metadata, reading the data without it (reason: {e})"
            );
            let mut rdr = reader_from_path(csv_path)?;
            read_dataset_inferred(&mut rdr)
        }
    }
}

fn reader_from_path(path: &Path) -> ConnectorResult<::csv::Reader<File>> {
    Ok(::csv::ReaderBuilder::new().has_headers(true).from_path(path)?)
}

/// Read tabular text, typing columns from decoded metadata.
///
/// Columns without metadata are inferred. A declared date column that is absent from the header,
/// or a cell that does not parse as its declared type, is an error.
pub fn read_dataset_with_metadata<R: Read>(
    rdr: &mut ::csv::Reader<R>,
    decoded: DecodedMetadata,
) -> ConnectorResult<DataSet> {
    let (headers, cells) = read_raw(rdr)?;

    if let Some(missing) = decoded.date_columns.iter().find(|c| !headers.contains(c)) {
        return Err(ConnectorError::deserialization(format!(
            "date column '{missing}' from the metadata is not in the data"
        )));
    }

    let fields = headers
        .iter()
        .enumerate()
        .map(|(idx, name)| {
            let data_type = match decoded.get(name) {
                Some(meta) => declared_type(&meta.semantic_type, column_cells(&cells, idx)),
                None => infer_type(column_cells(&cells, idx)),
            };
            Field::new(name.clone(), data_type)
        })
        .collect();
    let schema = Schema::new(fields);
    let rows = typed_rows(&schema, &cells)?;

    // Metadata for columns the data does not have is dropped.
    let mut annotations = decoded.into_annotations();
    annotations.retain(|name, _| headers.contains(name));
    Ok(DataSet::new(schema, rows).with_metadata(annotations))
}

/// Read tabular text without metadata. Types are inferred and dates are left as text.
pub fn read_dataset_inferred<R: Read>(rdr: &mut ::csv::Reader<R>) -> ConnectorResult<DataSet> {
    let (headers, cells) = read_raw(rdr)?;
    let fields = headers
        .iter()
        .enumerate()
        .map(|(idx, name)| Field::new(name.clone(), infer_type(column_cells(&cells, idx))))
        .collect();
    let schema = Schema::new(fields);
    let rows = typed_rows(&schema, &cells)?;
    Ok(DataSet::new(schema, rows))
}

fn read_raw<R: Read>(
    rdr: &mut ::csv::Reader<R>,
) -> ConnectorResult<(Vec<String>, Vec<Vec<String>>)> {
    let headers = rdr.headers()?.iter().map(str::to_owned).collect();
    let mut cells = Vec::new();
    for result in rdr.records() {
        let record = result?;
        cells.push(record.iter().map(str::to_owned).collect());
    }
    Ok((headers, cells))
}

fn column_cells(cells: &[Vec<String>], idx: usize) -> impl Iterator<Item = &str> + Clone {
    cells
        .iter()
        .map(move |row| row.get(idx).map(String::as_str).unwrap_or(""))
        .filter(|raw| !raw.trim().is_empty())
}

fn declared_type<'a>(
    semantic_type: &SemanticType,
    mut cells: impl Iterator<Item = &'a str>,
) -> DataType {
    match semantic_type {
        SemanticType::Integer => DataType::Int64,
        SemanticType::Real => DataType::Float64,
        t if t.is_date() => DataType::DateTime,
        SemanticType::Binominal if cells.all(|raw| parse_bool(raw).is_some()) => DataType::Bool,
        _ => DataType::Utf8,
    }
}

/// Narrowest storage kind every non-empty cell parses as.
fn infer_type<'a>(cells: impl Iterator<Item = &'a str> + Clone) -> DataType {
    if cells.clone().next().is_none() {
        DataType::Utf8
    } else if cells.clone().all(|raw| raw.trim().parse::<i64>().is_ok()) {
        DataType::Int64
    } else if cells.clone().all(|raw| raw.trim().parse::<f64>().is_ok()) {
        DataType::Float64
    } else if cells.clone().all(|raw| parse_bool(raw).is_some()) {
        DataType::Bool
    } else {
        DataType::Utf8
    }
}

fn typed_rows(schema: &Schema, cells: &[Vec<String>]) -> ConnectorResult<Vec<Vec<Value>>> {
    let mut rows: Vec<Vec<Value>> = Vec::with_capacity(cells.len());
    for (row_idx0, record) in cells.iter().enumerate() {
        // Report 1-based row number for users; +1 again because header is row 1.
        let user_row = row_idx0 + 2;
        let mut row: Vec<Value> = Vec::with_capacity(schema.fields.len());
        for (idx, field) in schema.fields.iter().enumerate() {
            let raw = record.get(idx).map(String::as_str).unwrap_or("");
            row.push(parse_typed_value(user_row, &field.name, &field.data_type, raw)?);
        }
        rows.push(row);
    }
    Ok(rows)
}

fn parse_typed_value(
    row: usize,
    column: &str,
    data_type: &DataType,
    raw: &str,
) -> ConnectorResult<Value> {
    // Blank text is a value; only an empty cell is missing.
    let trimmed = raw.trim();
    let missing = match data_type {
        DataType::Utf8 => raw.is_empty(),
        _ => trimmed.is_empty(),
    };
    if missing {
        return Ok(Value::Null);
    }

    let parse_error = |message: String| ConnectorError::ParseError {
        row,
        column: column.to_owned(),
        raw: raw.to_owned(),
        message,
    };

    match data_type {
        DataType::Utf8 => Ok(Value::Utf8(raw.to_owned())),
        DataType::Int64 => trimmed
            .parse::<i64>()
            .map(Value::Int64)
            .map_err(|e| parse_error(e.to_string())),
        DataType::Float64 => trimmed
            .parse::<f64>()
            .map(Value::Float64)
            .map_err(|e| parse_error(e.to_string())),
        DataType::Bool => parse_bool(trimmed)
            .map(Value::Bool)
            .ok_or_else(|| parse_error("expected bool (true/false)".to_string())),
        DataType::DateTime => parse_date_time(trimmed)
            .map(Value::DateTime)
            .ok_or_else(|| parse_error("expected date/time".to_string())),
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::ColumnMetadata;

    fn reader(text: &str) -> ::csv::Reader<&[u8]> {
        ::csv::ReaderBuilder::new().has_headers(true).from_reader(text.as_bytes())
    }

    #[test]
    fn inference_picks_narrowest_kind() {
        let mut rdr = reader("i,f,b,s,e\n1,1.5,true,x,\n2,2,False,y,\n");
        let ds = read_dataset_inferred(&mut rdr).unwrap();
        let kinds: Vec<_> = ds.schema.fields.iter().map(|f| f.data_type.clone()).collect();
        assert_eq!(
            kinds,
            vec![DataType::Int64, DataType::Float64, DataType::Bool, DataType::Utf8, DataType::Utf8]
        );
        assert_eq!(ds.rows[1][1], Value::Float64(2.0));
        assert_eq!(ds.rows[0][4], Value::Null);
    }

    #[test]
    fn inference_leaves_dates_as_text() {
        let ds = read_dataset_inferred(&mut reader("d\n2024-01-02 03:04:05\n")).unwrap();
        assert_eq!(ds.rows[0][0], Value::Utf8("2024-01-02 03:04:05".to_string()));
    }

    #[test]
    fn binominal_without_bool_cells_stays_text() {
        let decoded = DecodedMetadata {
            columns: vec![
                ("churn".to_string(), ColumnMetadata::new(SemanticType::Binominal, Some("label"))),
                ("flag".to_string(), ColumnMetadata::attribute(SemanticType::Binominal)),
            ],
            date_columns: Vec::new(),
        };
        let mut rdr = reader("churn,flag\nyes,true\nno,false\n");
        let ds = read_dataset_with_metadata(&mut rdr, decoded).unwrap();
        assert_eq!(ds.schema.fields[0].data_type, DataType::Utf8);
        assert_eq!(ds.schema.fields[1].data_type, DataType::Bool);
        assert_eq!(ds.column_metadata("churn").and_then(|m| m.role.as_deref()), Some("label"));
    }

    #[test]
    fn declared_integer_that_does_not_parse_is_an_error() {
        let decoded = DecodedMetadata {
            columns: vec![("n".to_string(), ColumnMetadata::attribute(SemanticType::Integer))],
            date_columns: Vec::new(),
        };
        let err = read_dataset_with_metadata(&mut reader("n\n1\nabc\n"), decoded).unwrap_err();
        match err {
            ConnectorError::ParseError { row, column, .. } => {
                assert_eq!(row, 3);
                assert_eq!(column, "n");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn missing_date_column_is_inconsistent() {
        let decoded = DecodedMetadata {
            columns: vec![("when".to_string(), ColumnMetadata::attribute(SemanticType::DateTime))],
            date_columns: vec!["when".to_string()],
        };
        assert!(read_dataset_with_metadata(&mut reader("n\n1\n"), decoded).is_err());
    }

    #[test]
    fn writes_sanitized_header_and_keeps_caller_names() {
        let ds = DataSet::new(
            Schema::new(vec![Field::new("", DataType::Int64), Field::new("7", DataType::Utf8)]),
            vec![vec![Value::Int64(1), Value::Utf8("a,b".to_string())]],
        );
        let mut csv_out = Vec::new();
        let mut md_out = Vec::new();
        write_dataset(&ds, &mut csv_out, &mut md_out).unwrap();

        assert_eq!(String::from_utf8(csv_out).unwrap(), "att,att7\n1,\"a,b\"\n");
        let md: serde_json::Value = serde_json::from_slice(&md_out).unwrap();
        assert_eq!(md["att7"], serde_json::json!(["polynomial", "attribute"]));
        assert_eq!(ds.schema.fields[1].name, "7");
    }
}
