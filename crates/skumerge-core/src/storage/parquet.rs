//! Parquet source and sink.
//!
//! Every column is mapped to one [`FieldKind`] and read through a canonical
//! Arrow type (Utf8, Int64, Float64, Boolean, `List<Utf8>`). Output arrays are
//! built in the canonical type and cast back to the input column's type, so
//! the output schema is the input schema.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, AsArray, BooleanBuilder, Float64Builder, Int64Builder, ListBuilder,
    RecordBatch, StringBuilder,
};
use arrow::compute::{can_cast_types, cast};
use arrow::datatypes::{DataType, Field, Float64Type, Int64Type, SchemaRef};
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::{ParquetRecordBatchReader, ParquetRecordBatchReaderBuilder};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::error::{DedupError, Result};
use crate::models::{FieldKind, ProductRecord, Value};
use crate::pipeline::{RecordSink, RecordSource};

use super::temp_beside;

/// Kind of an Arrow column, or `UnsupportedColumn`.
pub fn field_kind(field: &Field) -> Result<FieldKind> {
    let kind = match field.data_type() {
        DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View => FieldKind::Text,
        DataType::Dictionary(_, value)
            if matches!(value.as_ref(), DataType::Utf8 | DataType::LargeUtf8) =>
        {
            FieldKind::Text
        }
        DataType::Int8
        | DataType::Int16
        | DataType::Int32
        | DataType::Int64
        | DataType::UInt8
        | DataType::UInt16
        | DataType::UInt32
        | DataType::UInt64 => FieldKind::Integer,
        DataType::Float16 | DataType::Float32 | DataType::Float64 => FieldKind::Float,
        // Merged as floats and cast back to the column's precision and scale.
        DataType::Decimal128(_, _) | DataType::Decimal256(_, _) => FieldKind::Float,
        DataType::Boolean => FieldKind::Flag,
        DataType::Timestamp(_, _) | DataType::Date32 | DataType::Date64 => FieldKind::Temporal,
        DataType::List(item) | DataType::LargeList(item)
            if can_cast_types(item.data_type(), &DataType::Utf8) =>
        {
            FieldKind::List
        }
        other => {
            return Err(DedupError::UnsupportedColumn {
                column: field.name().clone(),
                data_type: other.to_string(),
            });
        }
    };
    Ok(kind)
}

fn canonical_type(kind: FieldKind) -> DataType {
    match kind {
        FieldKind::Text => DataType::Utf8,
        FieldKind::Integer | FieldKind::Temporal => DataType::Int64,
        FieldKind::Float => DataType::Float64,
        FieldKind::Flag => DataType::Boolean,
        FieldKind::List => DataType::List(Arc::new(Field::new("item", DataType::Utf8, true))),
    }
}

fn to_canonical(array: &ArrayRef, kind: FieldKind) -> std::result::Result<ArrayRef, arrow::error::ArrowError> {
    let target = canonical_type(kind);
    match array.data_type() {
        t if *t == target => Ok(Arc::clone(array)),
        DataType::Date32 => cast(&cast(array, &DataType::Int32)?, &target),
        _ => cast(array, &target),
    }
}

fn from_canonical(array: ArrayRef, target: &DataType) -> std::result::Result<ArrayRef, arrow::error::ArrowError> {
    match target {
        t if t == array.data_type() => Ok(array),
        DataType::Date32 => cast(&cast(&array, &DataType::Int32)?, target),
        _ => cast(&array, target),
    }
}

fn decode_column(array: &ArrayRef, kind: FieldKind) -> std::result::Result<Vec<Value>, arrow::error::ArrowError> {
    let array = to_canonical(array, kind)?;
    let len = array.len();
    let values = match kind {
        FieldKind::Text => {
            let arr = array.as_string::<i32>();
            (0..len)
                .map(|i| if arr.is_null(i) { Value::Null } else { Value::text(arr.value(i)) })
                .collect()
        }
        FieldKind::Integer | FieldKind::Temporal => {
            let arr = array.as_primitive::<Int64Type>();
            (0..len)
                .map(|i| match (arr.is_null(i), kind) {
                    (true, _) => Value::Null,
                    (false, FieldKind::Temporal) => Value::Timestamp(arr.value(i)),
                    (false, _) => Value::Integer(arr.value(i)),
                })
                .collect()
        }
        FieldKind::Float => {
            let arr = array.as_primitive::<Float64Type>();
            (0..len)
                .map(|i| if arr.is_null(i) { Value::Null } else { Value::Float(arr.value(i)) })
                .collect()
        }
        FieldKind::Flag => {
            let arr = array.as_boolean();
            (0..len)
                .map(|i| if arr.is_null(i) { Value::Null } else { Value::Flag(arr.value(i)) })
                .collect()
        }
        FieldKind::List => {
            let arr = array.as_list::<i32>();
            (0..len)
                .map(|i| {
                    if arr.is_null(i) {
                        return Value::Null;
                    }
                    let inner = arr.value(i);
                    let items = inner.as_string::<i32>();
                    Value::List(items.iter().flatten().map(str::to_string).collect())
                })
                .collect()
        }
    };
    Ok(values)
}

fn encode_column(records: &[ProductRecord], pos: usize, kind: FieldKind) -> ArrayRef {
    match kind {
        FieldKind::Text => {
            let mut b = StringBuilder::with_capacity(records.len(), records.len() * 16);
            for record in records {
                match record.get(pos) {
                    Value::Text(s) => b.append_value(s),
                    _ => b.append_null(),
                }
            }
            Arc::new(b.finish())
        }
        FieldKind::Integer | FieldKind::Temporal => {
            let mut b = Int64Builder::with_capacity(records.len());
            for record in records {
                match record.get(pos) {
                    Value::Integer(v) | Value::Timestamp(v) => b.append_value(*v),
                    _ => b.append_null(),
                }
            }
            Arc::new(b.finish())
        }
        FieldKind::Float => {
            let mut b = Float64Builder::with_capacity(records.len());
            for record in records {
                match record.get(pos) {
                    Value::Float(v) => b.append_value(*v),
                    _ => b.append_null(),
                }
            }
            Arc::new(b.finish())
        }
        FieldKind::Flag => {
            let mut b = BooleanBuilder::with_capacity(records.len());
            for record in records {
                match record.get(pos) {
                    Value::Flag(v) => b.append_value(*v),
                    _ => b.append_null(),
                }
            }
            Arc::new(b.finish())
        }
        FieldKind::List => {
            let mut b = ListBuilder::new(StringBuilder::new());
            for record in records {
                match record.get(pos) {
                    Value::List(items) => {
                        for item in items {
                            b.values().append_value(item);
                        }
                        b.append(true);
                    }
                    _ => b.append_null(),
                }
            }
            Arc::new(b.finish())
        }
    }
}

// ─── Source ────────────────────────────────────────────────

/// Reads a Parquet file in record batches of a fixed size.
pub struct ParquetSource {
    schema: SchemaRef,
    columns: Vec<(String, FieldKind)>,
    reader: ParquetRecordBatchReader,
    chunk: usize,
}

impl ParquetSource {
    pub fn open(path: &Path, batch_size: usize) -> Result<Self> {
        let file = File::open(path)?;
        let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
        let schema = Arc::clone(builder.schema());
        let rows = builder.metadata().file_metadata().num_rows();

        let columns = schema
            .fields()
            .iter()
            .map(|field| Ok((field.name().clone(), field_kind(field)?)))
            .collect::<Result<Vec<_>>>()?;

        let reader = builder.with_batch_size(batch_size.max(1)).build()?;
        info!(path = %path.display(), rows, columns = columns.len(), "opened parquet input");

        Ok(Self {
            schema,
            columns,
            reader,
            chunk: 0,
        })
    }

    /// Arrow schema of the input, to be reused for the output.
    pub fn arrow_schema(&self) -> SchemaRef {
        Arc::clone(&self.schema)
    }
}

impl RecordSource for ParquetSource {
    fn columns(&self) -> &[(String, FieldKind)] {
        &self.columns
    }

    fn next_chunk(&mut self) -> Result<Option<Vec<ProductRecord>>> {
        loop {
            let chunk = self.chunk;
            let batch = match self.reader.next() {
                None => return Ok(None),
                Some(batch) => batch.map_err(|source| DedupError::Read { chunk, source })?,
            };
            if batch.num_rows() == 0 {
                continue;
            }
            self.chunk += 1;

            let mut rows: Vec<Vec<Value>> = (0..batch.num_rows())
                .map(|_| Vec::with_capacity(self.columns.len()))
                .collect();
            for (array, (_, kind)) in batch.columns().iter().zip(&self.columns) {
                let values =
                    decode_column(array, *kind).map_err(|source| DedupError::Read { chunk, source })?;
                for (row, value) in rows.iter_mut().zip(values) {
                    row.push(value);
                }
            }
            debug!(chunk, rows = rows.len(), "decoded parquet batch");
            return Ok(Some(rows.into_iter().map(ProductRecord::new).collect()));
        }
    }
}

// ─── Sink ──────────────────────────────────────────────────

/// Writes canonical records with the input's Arrow schema.
///
/// Rows go to a temporary file next to the destination, which only replaces
/// the destination in [`RecordSink::finish`]. Dropping an unfinished sink
/// removes the temporary file.
pub struct ParquetSink {
    dest: PathBuf,
    schema: SchemaRef,
    kinds: Vec<FieldKind>,
    writer: Option<ArrowWriter<File>>,
    temp: Option<NamedTempFile>,
    rows: usize,
}

impl ParquetSink {
    pub fn create(dest: &Path, schema: SchemaRef) -> Result<Self> {
        let kinds = schema
            .fields()
            .iter()
            .map(|field| field_kind(field.as_ref()))
            .collect::<Result<Vec<_>>>()?;

        let temp = temp_beside(dest)?;
        let writer = ArrowWriter::try_new(temp.as_file().try_clone()?, Arc::clone(&schema), None)?;

        Ok(Self {
            dest: dest.to_path_buf(),
            schema,
            kinds,
            writer: Some(writer),
            temp: Some(temp),
            rows: 0,
        })
    }

    pub fn rows_written(&self) -> usize {
        self.rows
    }
}

impl RecordSink for ParquetSink {
    fn write_batch(&mut self, batch: Vec<ProductRecord>) -> Result<()> {
        let Some(writer) = self.writer.as_mut() else {
            return Err(DedupError::Io(std::io::Error::other("parquet sink already finished")));
        };

        let columns = self
            .schema
            .fields()
            .iter()
            .zip(&self.kinds)
            .enumerate()
            .map(|(pos, (field, kind))| from_canonical(encode_column(&batch, pos, *kind), field.data_type()))
            .collect::<std::result::Result<Vec<ArrayRef>, _>>()?;

        let record_batch = RecordBatch::try_new(Arc::clone(&self.schema), columns)?;
        writer.write(&record_batch)?;
        self.rows += batch.len();
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        let (Some(writer), Some(temp)) = (self.writer.take(), self.temp.take()) else {
            return Ok(());
        };
        writer.close()?;
        temp.persist(&self.dest)?;
        info!(path = %self.dest.display(), rows = self.rows, "wrote parquet output");
        Ok(())
    }
}
