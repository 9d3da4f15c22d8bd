use std::fs::File;
use std::path::Path;

use arrow::array::RecordBatch;
use arrow::error::ArrowError;
use arrow::util::display::{ArrayFormatter, FormatOptions};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use tracing::{debug, info};

use crate::error::{DedupError, Result};

use super::temp_beside;

/// Convert a Parquet file to CSV: a header row with the column names, then
/// one row per Parquet row. Nulls become empty cells; lists are rendered as
/// `[a, b]`. The destination only appears once every batch is written.
///
/// Returns the number of data rows written.
pub fn export_csv(parquet: &Path, csv_path: &Path, batch_size: usize) -> Result<u64> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(File::open(parquet)?)?;
    let header: Vec<String> = builder
        .schema()
        .fields()
        .iter()
        .map(|field| field.name().clone())
        .collect();
    let reader = builder.with_batch_size(batch_size.max(1)).build()?;

    let temp = temp_beside(csv_path)?;
    let mut writer = csv::Writer::from_writer(temp.as_file().try_clone()?);
    writer.write_record(&header)?;

    let options = FormatOptions::default().with_null("");
    let mut rows = 0u64;
    for (chunk, batch) in reader.enumerate() {
        let batch = batch.map_err(|source| DedupError::Read { chunk, source })?;
        write_batch(&mut writer, &batch, &options)?;
        rows += batch.num_rows() as u64;
        debug!(chunk, rows = batch.num_rows(), "wrote csv batch");
    }

    writer.flush()?;
    drop(writer);
    temp.persist(csv_path)?;
    info!(from = %parquet.display(), to = %csv_path.display(), rows, "exported csv");
    Ok(rows)
}

fn write_batch(
    writer: &mut csv::Writer<File>,
    batch: &RecordBatch,
    options: &FormatOptions<'_>,
) -> Result<()> {
    let formatters = batch
        .columns()
        .iter()
        .map(|column| ArrayFormatter::try_new(column.as_ref(), options))
        .collect::<std::result::Result<Vec<_>, ArrowError>>()?;

    let mut row = Vec::with_capacity(formatters.len());
    for idx in 0..batch.num_rows() {
        row.clear();
        row.extend(formatters.iter().map(|f| f.value(idx).to_string()));
        writer.write_record(&row)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use arrow::datatypes::{DataType, Field, Schema};

    use crate::models::{ProductRecord, Value};
    use crate::pipeline::RecordSink;
    use crate::storage::ParquetSink;
    use tempfile::TempDir;

    #[test]
    fn test_export_writes_header_and_rows() {
        let dir = TempDir::new().unwrap();
        let parquet = dir.path().join("in.parquet");
        let schema = Arc::new(Schema::new(vec![
            Field::new("name", DataType::Utf8, true),
            Field::new("price", DataType::Float64, true),
        ]));
        let mut sink = ParquetSink::create(&parquet, schema).unwrap();
        sink.write_batch(vec![
            ProductRecord::new(vec![Value::text("Red, Shoe"), Value::Float(9.5)]),
            ProductRecord::new(vec![Value::text("Sock"), Value::Null]),
            ProductRecord::new(vec![Value::text("Hat"), Value::Float(2.0)]),
        ])
        .unwrap();
        sink.finish().unwrap();

        let csv_path = dir.path().join("out").join("in.csv");
        let rows = export_csv(&parquet, &csv_path, 2).unwrap();
        assert_eq!(rows, 3);

        let mut reader = csv::Reader::from_path(&csv_path).unwrap();
        let header: Vec<String> = reader.headers().unwrap().iter().map(str::to_string).collect();
        assert_eq!(header, vec!["name", "price"]);
        let records: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(records.len(), 3);
        assert_eq!(&records[0][0], "Red, Shoe");
        assert_eq!(&records[0][1], "9.5");
        assert_eq!(&records[1][1], "");
    }

    #[test]
    fn test_missing_input_is_an_error() {
        let dir = TempDir::new().unwrap();
        let csv_path = dir.path().join("out.csv");
        assert!(export_csv(&dir.path().join("nope.parquet"), &csv_path, 10).is_err());
        assert!(!csv_path.exists());
    }
}
