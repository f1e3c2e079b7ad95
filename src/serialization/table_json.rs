//! Table-oriented JSON, the wire format for datasets sent to or received from a Server.
//!
//! Encoded documents look like
//!
//! ```json
//! {"schema": {"fields": [{"name": "id", "type": "integer"}]}, "data": [{"id": 1}]}
//! ```
//!
//! Decoding also accepts a bare array of records (`[{"id": 1}]`) and a column-oriented object
//! (`{"id": {"0": 1, "1": 2}}`).

use serde_json::{Map, Number, Value as Json, json};

use crate::error::{ConnectorError, ConnectorResult};
use crate::types::{DataSet, DataType, Field, Schema, Value, format_date_time, parse_date_time};

/// Encode a dataset as a table document. Column names are sent as they are.
pub fn encode_table(dataset: &DataSet) -> Json {
    let fields: Vec<Json> = dataset
        .schema
        .fields
        .iter()
        .map(|f| json!({"name": f.name, "type": table_type_name(&f.data_type)}))
        .collect();

    let data: Vec<Json> = dataset
        .rows
        .iter()
        .map(|row| {
            let record: Map<String, Json> = dataset
                .schema
                .fields
                .iter()
                .zip(row.iter())
                .map(|(field, value)| (field.name.clone(), to_json(value)))
                .collect();
            Json::Object(record)
        })
        .collect();

    json!({"schema": {"fields": fields}, "data": data})
}

fn table_type_name(data_type: &DataType) -> &'static str {
    match data_type {
        DataType::Int64 => "integer",
        DataType::Float64 => "number",
        DataType::Bool => "boolean",
        DataType::DateTime => "datetime",
        DataType::Utf8 => "string",
    }
}

fn to_json(value: &Value) -> Json {
    match value {
        Value::Null => Json::Null,
        Value::Int64(v) => Json::from(*v),
        Value::Float64(v) => Number::from_f64(*v).map(Json::Number).unwrap_or(Json::Null),
        Value::Bool(v) => Json::Bool(*v),
        Value::DateTime(v) => Json::String(format_date_time(v)),
        Value::Utf8(v) => Json::String(v.clone()),
    }
}

/// Decode a table document (or a bare record array, or a column-oriented object) into a dataset.
pub fn decode_table(document: &Json) -> ConnectorResult<DataSet> {
    match document {
        Json::Object(obj) if obj.contains_key("data") => {
            let records = obj.get("data").and_then(Json::as_array).ok_or_else(|| {
                ConnectorError::deserialization("table 'data' must be an array of records")
            })?;
            let declared = obj.get("schema").map(declared_fields).unwrap_or_default();
            decode_records(records, declared)
        }
        Json::Array(records) => decode_records(records, Vec::new()),
        Json::Object(columns) => decode_columns(columns),
        _ => Err(ConnectorError::deserialization(
            "table must be an object with 'data', an array of records, or a column-oriented object",
        )),
    }
}

/// `(name, declared type)` pairs from a table schema, without the index column.
fn declared_fields(schema: &Json) -> Vec<(String, Option<DataType>)> {
    let index_keys: Vec<&str> = match schema.get("primaryKey") {
        Some(Json::Array(keys)) => keys.iter().filter_map(Json::as_str).collect(),
        Some(Json::String(key)) => vec![key.as_str()],
        _ => Vec::new(),
    };
    schema
        .get("fields")
        .and_then(Json::as_array)
        .map(|fields| {
            fields
                .iter()
                .filter_map(|f| {
                    let name = f.get("name")?.as_str()?;
                    if index_keys.contains(&name) {
                        return None;
                    }
                    let data_type = f.get("type").and_then(Json::as_str).and_then(parse_table_type);
                    Some((name.to_string(), data_type))
                })
                .collect()
        })
        .unwrap_or_default()
}

fn parse_table_type(name: &str) -> Option<DataType> {
    match name {
        "integer" => Some(DataType::Int64),
        "number" => Some(DataType::Float64),
        "boolean" => Some(DataType::Bool),
        "datetime" | "date" => Some(DataType::DateTime),
        "string" => Some(DataType::Utf8),
        _ => None,
    }
}

fn decode_records(
    records: &[Json],
    declared: Vec<(String, Option<DataType>)>,
) -> ConnectorResult<DataSet> {
    let mut objects: Vec<&Map<String, Json>> = Vec::with_capacity(records.len());
    for (idx0, record) in records.iter().enumerate() {
        let obj = record.as_object().ok_or_else(|| {
            ConnectorError::deserialization(format!("row {} is not a json object", idx0 + 1))
        })?;
        objects.push(obj);
    }

    // Without a schema, columns appear in first-seen order.
    let columns: Vec<(String, Option<DataType>)> = if declared.is_empty() {
        let mut names: Vec<String> = Vec::new();
        for obj in &objects {
            for key in obj.keys() {
                if !names.contains(key) {
                    names.push(key.clone());
                }
            }
        }
        names.into_iter().map(|n| (n, None)).collect()
    } else {
        declared
    };

    let fields: Vec<Field> = columns
        .into_iter()
        .map(|(name, declared_type)| {
            let data_type = declared_type
                .unwrap_or_else(|| infer_json_type(objects.iter().filter_map(|o| o.get(&name))));
            Field::new(name, data_type)
        })
        .collect();

    let mut rows: Vec<Vec<Value>> = Vec::with_capacity(objects.len());
    for (idx0, obj) in objects.iter().enumerate() {
        let row_num = idx0 + 1;
        let mut row: Vec<Value> = Vec::with_capacity(fields.len());
        for field in &fields {
            let value = match obj.get(&field.name) {
                Some(v) => convert_json_value(row_num, &field.name, &field.data_type, v)?,
                None => Value::Null,
            };
            row.push(value);
        }
        rows.push(row);
    }

    Ok(DataSet::new(Schema::new(fields), rows))
}

fn decode_columns(columns: &Map<String, Json>) -> ConnectorResult<DataSet> {
    let mut row_keys: Vec<&str> = Vec::new();
    for (name, cells) in columns {
        let cells = cells.as_object().ok_or_else(|| {
            ConnectorError::deserialization(format!(
                "column '{name}' is not an object of row values"
            ))
        })?;
        for key in cells.keys() {
            if !row_keys.contains(&key.as_str()) {
                row_keys.push(key.as_str());
            }
        }
    }

    let records: Vec<Json> = row_keys
        .iter()
        .map(|row_key| {
            let record: Map<String, Json> = columns
                .iter()
                .map(|(name, cells)| {
                    let cell = cells.get(*row_key).cloned().unwrap_or(Json::Null);
                    (name.clone(), cell)
                })
                .collect();
            Json::Object(record)
        })
        .collect();

    let declared = columns.keys().map(|name| (name.clone(), None)).collect();
    decode_records(&records, declared)
}

fn infer_json_type<'a>(values: impl Iterator<Item = &'a Json> + Clone) -> DataType {
    let mut present = values.filter(|v| !v.is_null());
    if present.clone().next().is_none() {
        DataType::Utf8
    } else if present.clone().all(|v| v.is_i64() || v.is_u64()) {
        DataType::Int64
    } else if present.clone().all(Json::is_number) {
        DataType::Float64
    } else if present.all(|v| v.is_boolean()) {
        DataType::Bool
    } else {
        DataType::Utf8
    }
}

fn convert_json_value(
    row: usize,
    column: &str,
    data_type: &DataType,
    v: &Json,
) -> ConnectorResult<Value> {
    if v.is_null() {
        return Ok(Value::Null);
    }

    let parse_error = |message: &str| ConnectorError::ParseError {
        row,
        column: column.to_string(),
        raw: v.to_string(),
        message: message.to_string(),
    };

    match data_type {
        DataType::Utf8 => Ok(Value::Utf8(match v {
            Json::String(s) => s.clone(),
            other => other.to_string(),
        })),
        DataType::Bool => v.as_bool().map(Value::Bool).ok_or_else(|| parse_error("expected bool")),
        DataType::Int64 => {
            if let Some(n) = v.as_i64() {
                Ok(Value::Int64(n))
            } else if let Some(n) = v.as_u64() {
                i64::try_from(n)
                    .map(Value::Int64)
                    .map_err(|_| parse_error("u64 out of range for i64"))
            } else {
                Err(parse_error("expected integer number"))
            }
        }
        DataType::Float64 => v
            .as_f64()
            .map(Value::Float64)
            .ok_or_else(|| parse_error("expected number")),
        DataType::DateTime => match v {
            Json::String(s) => parse_date_time(s)
                .map(Value::DateTime)
                .ok_or_else(|| parse_error("expected date/time")),
            // Epoch milliseconds.
            Json::Number(n) => n
                .as_i64()
                .and_then(chrono::DateTime::<chrono::Utc>::from_timestamp_millis)
                .map(|dt| Value::DateTime(dt.naive_utc()))
                .ok_or_else(|| parse_error("expected epoch milliseconds")),
            _ => Err(parse_error("expected date/time")),
        },
    }
}
