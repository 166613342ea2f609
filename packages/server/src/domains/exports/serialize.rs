//! Deterministic dataset serialization.
//!
//! Output bytes are a pure function of the ordered row set and the
//! `include_fields` list: jsonl keys follow `include_fields` order, csv is
//! RFC 4180 with an `include_fields` header, parquet pins a stable
//! name/type map and fixed page sizing. Media is referenced by logical URI
//! only.

use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{ArrayRef, Int64Array, RecordBatch, StringArray};
use arrow_schema::{DataType, Field, Schema};
use parquet::arrow::ArrowWriter;
use parquet::file::properties::WriterProperties;

use super::models::{ExportFormat, ExportRow};
use crate::domains::exports::models::row::json_at_path;

/// Root (non-metadata) fields a dataset may include.
pub const ROOT_FIELDS: &[&str] = &[
    "item_id",
    "external_id",
    "media_type",
    "logical_uri",
    "sort_key",
    "user_id",
    "event_id",
    "decision_id",
    "note",
    "ts_client",
    "ts_client_effective",
    "ts_server",
];

const INT64_FIELDS: &[&str] = &["ts_client", "ts_client_effective", "ts_server"];

/// Is `field` covered by `allowlist`? Entries match exactly; the special
/// entry `metadata.*` covers every dotted metadata path.
pub fn field_allowed(field: &str, allowlist: &[String]) -> bool {
    allowlist.iter().any(|entry| {
        entry == field || (entry == "metadata.*" && field.starts_with("metadata."))
    })
}

/// The fields in `include_fields` that the allowlist does not cover.
pub fn allowlist_violations(include_fields: &[String], allowlist: &[String]) -> Vec<String> {
    include_fields
        .iter()
        .filter(|f| !field_allowed(f, allowlist))
        .cloned()
        .collect()
}

/// Project one field of a row. Missing metadata paths and absent decision
/// columns produce JSON null, which each format maps to its own null.
pub fn field_value(row: &ExportRow, field: &str) -> serde_json::Value {
    use serde_json::Value;
    if let Some(path) = field.strip_prefix("metadata.") {
        return json_at_path(&row.item_metadata, path)
            .cloned()
            .unwrap_or(Value::Null);
    }
    match field {
        "item_id" => Value::String(row.item_id.to_string()),
        "external_id" => Value::String(row.external_id.clone()),
        "media_type" => Value::String(row.media_type.clone()),
        "logical_uri" => Value::String(row.logical_uri.clone()),
        "sort_key" => Value::String(row.sort_key.clone()),
        "user_id" => row
            .user_id
            .map(|u| Value::String(u.to_string()))
            .unwrap_or(Value::Null),
        "event_id" => row
            .event_id
            .map(|u| Value::String(u.to_string()))
            .unwrap_or(Value::Null),
        "decision_id" => row
            .decision_id
            .clone()
            .map(Value::String)
            .unwrap_or(Value::Null),
        "note" => row.note.clone().map(Value::String).unwrap_or(Value::Null),
        "ts_client" => row.ts_client.map(Value::from).unwrap_or(Value::Null),
        "ts_client_effective" => row
            .ts_client_effective
            .map(Value::from)
            .unwrap_or(Value::Null),
        "ts_server" => row.ts_server.map(Value::from).unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

/// Incremental dataset writer; the worker feeds it bounded chunks so
/// cancellation can be observed between them.
pub enum DatasetWriter {
    Jsonl {
        fields: Vec<String>,
        buf: Vec<u8>,
    },
    Csv {
        fields: Vec<String>,
        writer: csv::Writer<Vec<u8>>,
    },
    Parquet {
        fields: Vec<String>,
        writer: ArrowWriter<Vec<u8>>,
        schema: Arc<Schema>,
    },
}

impl DatasetWriter {
    pub fn new(format: ExportFormat, fields: &[String]) -> Result<Self> {
        match format {
            ExportFormat::Jsonl => Ok(DatasetWriter::Jsonl {
                fields: fields.to_vec(),
                buf: Vec::new(),
            }),
            ExportFormat::Csv => {
                let mut writer = csv::WriterBuilder::new()
                    .terminator(csv::Terminator::Any(b'\n'))
                    .from_writer(Vec::new());
                writer.write_record(fields)?;
                Ok(DatasetWriter::Csv {
                    fields: fields.to_vec(),
                    writer,
                })
            }
            ExportFormat::Parquet => {
                let schema = Arc::new(parquet_schema(fields));
                let props = WriterProperties::builder()
                    .set_data_page_size_limit(1 << 20)
                    .set_write_batch_size(1024)
                    .set_max_row_group_size(100_000)
                    .build();
                let writer = ArrowWriter::try_new(Vec::new(), schema.clone(), Some(props))
                    .context("opening parquet writer")?;
                Ok(DatasetWriter::Parquet {
                    fields: fields.to_vec(),
                    writer,
                    schema,
                })
            }
        }
    }

    pub fn write_chunk(&mut self, rows: &[ExportRow]) -> Result<()> {
        match self {
            DatasetWriter::Jsonl { fields, buf } => {
                for row in rows {
                    if !buf.is_empty() {
                        buf.push(b'\n');
                    }
                    buf.push(b'{');
                    for (i, field) in fields.iter().enumerate() {
                        if i > 0 {
                            buf.push(b',');
                        }
                        buf.extend_from_slice(serde_json::to_string(field)?.as_bytes());
                        buf.push(b':');
                        buf.extend_from_slice(
                            serde_json::to_string(&field_value(row, field))?.as_bytes(),
                        );
                    }
                    buf.push(b'}');
                }
                Ok(())
            }
            DatasetWriter::Csv { fields, writer } => {
                for row in rows {
                    let record: Vec<String> = fields
                        .iter()
                        .map(|field| csv_cell(&field_value(row, field)))
                        .collect();
                    writer.write_record(&record)?;
                }
                Ok(())
            }
            DatasetWriter::Parquet {
                fields,
                writer,
                schema,
            } => {
                if rows.is_empty() {
                    return Ok(());
                }
                let batch = record_batch(schema.clone(), fields, rows)?;
                writer.write(&batch).context("writing parquet batch")?;
                Ok(())
            }
        }
    }

    /// Bytes produced so far, for the size ceiling. Parquet adds its
    /// buffered-but-unflushed rows to the estimate.
    pub fn bytes_estimate(&self) -> u64 {
        match self {
            DatasetWriter::Jsonl { buf, .. } => buf.len() as u64,
            DatasetWriter::Csv { writer, .. } => writer.get_ref().len() as u64,
            DatasetWriter::Parquet { writer, .. } => {
                (writer.bytes_written() + writer.in_progress_size()) as u64
            }
        }
    }

    pub fn finish(self) -> Result<Vec<u8>> {
        match self {
            DatasetWriter::Jsonl { buf, .. } => Ok(buf),
            DatasetWriter::Csv { writer, .. } => {
                writer.into_inner().context("flushing csv writer")
            }
            DatasetWriter::Parquet { writer, .. } => {
                writer.into_inner().context("closing parquet writer")
            }
        }
    }
}

fn parquet_schema(fields: &[String]) -> Schema {
    let fields: Vec<Field> = fields
        .iter()
        .map(|name| {
            let data_type = if INT64_FIELDS.contains(&name.as_str()) {
                DataType::Int64
            } else {
                DataType::Utf8
            };
            Field::new(name, data_type, true)
        })
        .collect();
    Schema::new(fields)
}

fn record_batch(schema: Arc<Schema>, fields: &[String], rows: &[ExportRow]) -> Result<RecordBatch> {
    let mut columns: Vec<ArrayRef> = Vec::with_capacity(fields.len());
    for field in fields {
        if INT64_FIELDS.contains(&field.as_str()) {
            let values: Vec<Option<i64>> = rows
                .iter()
                .map(|row| field_value(row, field).as_i64())
                .collect();
            columns.push(Arc::new(Int64Array::from(values)));
        } else {
            let values: Vec<Option<String>> = rows
                .iter()
                .map(|row| match field_value(row, field) {
                    serde_json::Value::Null => None,
                    serde_json::Value::String(s) => Some(s),
                    other => Some(other.to_string()),
                })
                .collect();
            columns.push(Arc::new(StringArray::from(values)));
        }
    }
    RecordBatch::try_new(schema, columns).context("assembling parquet record batch")
}

fn csv_cell(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn row(external_id: &str, decision: Option<&str>, ts: Option<i64>) -> ExportRow {
        ExportRow {
            item_id: Uuid::parse_str("11111111-1111-4111-8111-111111111111").unwrap(),
            external_id: external_id.into(),
            media_type: "image".into(),
            logical_uri: format!("storage://media/{}.png", external_id),
            sort_key: "0001".into(),
            item_metadata: json!({"session_id": "s1", "nested": {"depth": 2}}),
            user_id: decision.map(|_| Uuid::nil()),
            event_id: None,
            decision_id: decision.map(String::from),
            note: None,
            ts_client: ts,
            ts_client_effective: ts,
            ts_server: ts,
        }
    }

    fn fields(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn allowlist_matches_exact_and_metadata_glob() {
        let allow = fields(&["item_id", "metadata.session_id"]);
        assert!(field_allowed("item_id", &allow));
        assert!(field_allowed("metadata.session_id", &allow));
        assert!(!field_allowed("metadata.other", &allow));
        assert!(!field_allowed("ssn", &allow));

        let glob = fields(&["metadata.*"]);
        assert!(field_allowed("metadata.anything.nested", &glob));
        assert!(!field_allowed("item_id", &glob));
    }

    #[test]
    fn violations_report_each_blocked_field() {
        let allow = fields(&["metadata.subject_id"]);
        let wanted = fields(&["metadata.subject_id", "ssn"]);
        assert_eq!(allowlist_violations(&wanted, &allow), vec!["ssn".to_string()]);
    }

    #[test]
    fn jsonl_keys_follow_include_fields_order_no_trailing_newline() {
        let mut writer = DatasetWriter::new(
            ExportFormat::Jsonl,
            &fields(&["decision_id", "external_id", "metadata.session_id", "metadata.missing"]),
        )
        .unwrap();
        writer
            .write_chunk(&[row("a", Some("keep"), Some(5)), row("b", None, None)])
            .unwrap();
        let bytes = writer.finish().unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(
            text,
            "{\"decision_id\":\"keep\",\"external_id\":\"a\",\"metadata.session_id\":\"s1\",\"metadata.missing\":null}\n\
             {\"decision_id\":null,\"external_id\":\"b\",\"metadata.session_id\":\"s1\",\"metadata.missing\":null}"
        );
        assert!(!text.ends_with('\n'));
    }

    #[test]
    fn csv_has_header_and_quotes_when_needed() {
        let mut writer =
            DatasetWriter::new(ExportFormat::Csv, &fields(&["external_id", "note", "ts_server"]))
                .unwrap();
        let mut tricky = row("a,b", None, Some(7));
        tricky.note = Some("line one\nwith \"quotes\"".into());
        writer.write_chunk(&[tricky]).unwrap();
        let text = String::from_utf8(writer.finish().unwrap()).unwrap();
        assert_eq!(
            text,
            "external_id,note,ts_server\n\"a,b\",\"line one\nwith \"\"quotes\"\"\",7\n"
        );
    }

    #[test]
    fn parquet_output_is_deterministic() {
        let rows = vec![row("a", Some("keep"), Some(1)), row("b", None, None)];
        let make = || {
            let mut writer = DatasetWriter::new(
                ExportFormat::Parquet,
                &fields(&["item_id", "decision_id", "ts_server"]),
            )
            .unwrap();
            writer.write_chunk(&rows).unwrap();
            writer.finish().unwrap()
        };
        let first = make();
        let second = make();
        assert_eq!(first, second);
        assert_eq!(&first[..4], b"PAR1");
    }

    #[test]
    fn two_chunks_equal_one_chunk() {
        let rows = vec![row("a", Some("keep"), Some(1)), row("b", Some("drop"), Some(2))];
        let field_list = fields(&["external_id", "decision_id"]);

        let mut once = DatasetWriter::new(ExportFormat::Jsonl, &field_list).unwrap();
        once.write_chunk(&rows).unwrap();

        let mut twice = DatasetWriter::new(ExportFormat::Jsonl, &field_list).unwrap();
        twice.write_chunk(&rows[..1]).unwrap();
        twice.write_chunk(&rows[1..]).unwrap();

        assert_eq!(once.finish().unwrap(), twice.finish().unwrap());
    }
}
