//! Arrow decoding and row output.
//!
//! The Storage API ships the session schema and each record batch as
//! separate base64 Arrow IPC messages. Prepending the schema message to a
//! batch message yields a well-formed IPC stream, which is what
//! [`arrow::ipc::reader::StreamReader`] wants to see.

use crate::error::BqStreamError;
use arrow::datatypes::SchemaRef;
use arrow::ipc::reader::StreamReader;
use arrow::json::LineDelimitedWriter;
use arrow::record_batch::RecordBatch;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use std::io::{Cursor, Write};

/// Decodes per-response Arrow record batches against a session schema.
pub struct RowDecoder {
    schema_ipc: Vec<u8>,
    schema: SchemaRef,
}

impl RowDecoder {
    /// Build a decoder from the session's base64 IPC schema message,
    /// validating it eagerly.
    pub fn new(serialized_schema: &str) -> Result<Self, BqStreamError> {
        let schema_ipc = STANDARD.decode(serialized_schema)?;
        let reader = StreamReader::try_new(Cursor::new(schema_ipc.as_slice()), None)?;
        let schema = reader.schema();
        Ok(Self { schema_ipc, schema })
    }

    pub fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    /// Decode one `serializedRecordBatch` payload into record batches.
    pub fn decode(&self, serialized_record_batch: &str) -> Result<Vec<RecordBatch>, BqStreamError> {
        let batch_ipc = STANDARD.decode(serialized_record_batch)?;
        let mut stream = Vec::with_capacity(self.schema_ipc.len() + batch_ipc.len());
        stream.extend_from_slice(&self.schema_ipc);
        stream.extend_from_slice(&batch_ipc);

        let reader = StreamReader::try_new(Cursor::new(stream), None)?;
        let batches = reader.collect::<Result<Vec<_>, _>>()?;
        Ok(batches)
    }
}

/// Prints record batches as one JSON object per row.
pub struct RowPrinter<W: Write> {
    writer: LineDelimitedWriter<W>,
    rows: u64,
}

impl<W: Write> RowPrinter<W> {
    pub fn new(out: W) -> Self {
        Self {
            writer: LineDelimitedWriter::new(out),
            rows: 0,
        }
    }

    pub fn write_batch(&mut self, batch: &RecordBatch) -> Result<(), BqStreamError> {
        self.writer.write_batches(&[batch])?;
        self.rows += batch.num_rows() as u64;
        Ok(())
    }

    pub fn rows_written(&self) -> u64 {
        self.rows
    }

    /// Flush and return the total row count.
    pub fn finish(mut self) -> Result<u64, BqStreamError> {
        self.writer.finish()?;
        Ok(self.rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Int64Array, StringArray};
    use arrow::datatypes::{DataType, Field, Schema};
    use arrow::ipc::writer::StreamWriter;
    use std::sync::Arc;

    fn orders_schema() -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("item", DataType::Utf8, true),
        ]))
    }

    fn orders_batch(ids: &[i64], items: &[Option<&str>]) -> RecordBatch {
        RecordBatch::try_new(
            orders_schema(),
            vec![
                Arc::new(Int64Array::from(ids.to_vec())),
                Arc::new(StringArray::from(items.to_vec())),
            ],
        )
        .expect("build batch")
    }

    /// Encode a schema and a batch the way the wire delivers them: the
    /// schema message alone, and the batch message without the schema.
    fn wire_encode(batch: &RecordBatch) -> (String, String) {
        let schema = batch.schema();

        let mut schema_only = Vec::new();
        {
            // StreamWriter emits the schema message at construction.
            let _writer =
                StreamWriter::try_new(&mut schema_only, &schema).expect("schema writer");
        }

        let mut full = Vec::new();
        {
            let mut writer = StreamWriter::try_new(&mut full, &schema).expect("stream writer");
            writer.write(batch).expect("write batch");
            writer.finish().expect("finish stream");
        }
        assert!(
            full.starts_with(&schema_only),
            "stream must begin with the bare schema message"
        );
        let batch_only = full[schema_only.len()..].to_vec();

        (STANDARD.encode(&schema_only), STANDARD.encode(&batch_only))
    }

    #[test]
    fn decodes_wire_format_batches() {
        let batch = orders_batch(&[1, 2, 3], &[Some("apples"), None, Some("pears")]);
        let (schema_b64, batch_b64) = wire_encode(&batch);

        let decoder = RowDecoder::new(&schema_b64).expect("decoder");
        assert_eq!(decoder.schema().fields().len(), 2);

        let decoded = decoder.decode(&batch_b64).expect("decode");
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].num_rows(), 3);
        assert_eq!(decoded[0], batch);
    }

    #[test]
    fn decoder_is_reusable_across_batches() {
        let first = orders_batch(&[1], &[Some("apples")]);
        let second = orders_batch(&[2, 3], &[Some("pears"), Some("plums")]);
        let (schema_b64, first_b64) = wire_encode(&first);
        let (_, second_b64) = wire_encode(&second);

        let decoder = RowDecoder::new(&schema_b64).expect("decoder");
        let a = decoder.decode(&first_b64).expect("first");
        let b = decoder.decode(&second_b64).expect("second");
        assert_eq!(a[0].num_rows(), 1);
        assert_eq!(b[0].num_rows(), 2);
    }

    #[test]
    fn rejects_garbage_schema() {
        assert!(RowDecoder::new("not base64!").is_err());
        let garbage = STANDARD.encode(b"definitely not ipc");
        assert!(RowDecoder::new(&garbage).is_err());
    }

    #[test]
    fn printer_emits_one_json_object_per_row() {
        let batch = orders_batch(&[7, 8], &[Some("apples"), None]);

        let mut out = Vec::new();
        let mut printer = RowPrinter::new(&mut out);
        printer.write_batch(&batch).expect("print batch");
        assert_eq!(printer.rows_written(), 2);
        let rows = printer.finish().expect("finish");
        assert_eq!(rows, 2);

        let text = String::from_utf8(out).expect("utf8 output");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], r#"{"id":7,"item":"apples"}"#);
        // Null columns are omitted rather than printed as null.
        assert_eq!(lines[1], r#"{"id":8}"#);
    }
}
