//! Columnar Codec
//!
//! Converts [`Table`] to and from Arrow record batches and serializes them
//! as Arrow IPC: the stream format for remote-cache payloads, the file
//! format (with block compression) for durable payload files.

use std::io::Cursor;
use std::sync::Arc;

use arrow_array::cast::AsArray;
use arrow_array::types::{Date32Type, Float64Type, Int64Type};
use arrow_array::{
    ArrayRef, BooleanArray, Date32Array, Float64Array, Int64Array, RecordBatch,
    RecordBatchOptions, StringArray,
};
use arrow_ipc::reader::{FileReader, StreamReader};
use arrow_ipc::writer::{FileWriter, IpcWriteOptions, StreamWriter};
use arrow_schema::{DataType as ArrowType, Field, Schema, SchemaRef};
use chrono::NaiveDate;

use super::compression::CompressionAlgorithm;
use crate::error::{Error, Result};
use crate::table::{Column, ColumnData, DataType, Table};

fn epoch() -> NaiveDate {
    chrono::DateTime::UNIX_EPOCH.date_naive()
}

fn date_to_days(date: NaiveDate) -> i32 {
    (date - epoch()).num_days() as i32
}

fn days_to_date(days: i32) -> Option<NaiveDate> {
    epoch().checked_add_signed(chrono::Duration::days(days as i64))
}

fn arrow_type(data_type: DataType) -> ArrowType {
    match data_type {
        DataType::Boolean => ArrowType::Boolean,
        DataType::Int64 => ArrowType::Int64,
        DataType::Float64 => ArrowType::Float64,
        DataType::Utf8 => ArrowType::Utf8,
        DataType::Date => ArrowType::Date32,
    }
}

/// Arrow schema for a table
pub fn schema_of(table: &Table) -> SchemaRef {
    let fields: Vec<Field> = table
        .columns()
        .iter()
        .map(|c| Field::new(c.name(), arrow_type(c.data_type()), true))
        .collect();
    Arc::new(Schema::new(fields))
}

fn to_array(data: &ColumnData) -> ArrayRef {
    match data {
        ColumnData::Boolean(v) => Arc::new(BooleanArray::from(v.clone())),
        ColumnData::Int64(v) => Arc::new(Int64Array::from(v.clone())),
        ColumnData::Float64(v) => Arc::new(Float64Array::from(v.clone())),
        ColumnData::Utf8(v) => Arc::new(StringArray::from(v.clone())),
        ColumnData::Date(v) => Arc::new(Date32Array::from(
            v.iter().map(|d| d.map(date_to_days)).collect::<Vec<_>>(),
        )),
    }
}

/// Convert a table into one record batch
pub fn to_record_batch(table: &Table) -> Result<RecordBatch> {
    let columns: Vec<ArrayRef> = table.columns().iter().map(|c| to_array(c.data())).collect();
    let options = RecordBatchOptions::new().with_row_count(Some(table.num_rows()));
    Ok(RecordBatch::try_new_with_options(
        schema_of(table),
        columns,
        &options,
    )?)
}

fn from_array(field: &Field, array: &ArrayRef) -> Result<ColumnData> {
    let data = match field.data_type() {
        ArrowType::Boolean => ColumnData::Boolean(array.as_boolean().iter().collect()),
        ArrowType::Int64 => ColumnData::Int64(array.as_primitive::<Int64Type>().iter().collect()),
        ArrowType::Float64 => {
            ColumnData::Float64(array.as_primitive::<Float64Type>().iter().collect())
        }
        ArrowType::Utf8 => ColumnData::Utf8(
            array
                .as_string::<i32>()
                .iter()
                .map(|s| s.map(str::to_string))
                .collect(),
        ),
        ArrowType::Date32 => ColumnData::Date(
            array
                .as_primitive::<Date32Type>()
                .iter()
                .map(|d| d.and_then(days_to_date))
                .collect(),
        ),
        other => {
            return Err(Error::Serialization(format!(
                "unsupported column type {other} for '{}'",
                field.name()
            )))
        }
    };
    Ok(data)
}

/// Convert a record batch into a table
pub fn from_record_batch(batch: &RecordBatch) -> Result<Table> {
    let schema = batch.schema();
    if schema.fields().is_empty() {
        return Ok(Table::with_row_count(batch.num_rows()));
    }
    let columns = schema
        .fields()
        .iter()
        .zip(batch.columns())
        .map(|(field, array)| Ok(Column::new(field.name().clone(), from_array(field, array)?)))
        .collect::<Result<Vec<_>>>()?;
    Table::from_columns(columns)
}

fn concat_batches(
    schema: SchemaRef,
    batches: impl Iterator<Item = std::result::Result<RecordBatch, arrow_schema::ArrowError>>,
) -> Result<Table> {
    let mut table: Option<Table> = None;
    for batch in batches {
        let part = from_record_batch(&batch?)?;
        match table.as_mut() {
            Some(t) => t.append(part)?,
            None => table = Some(part),
        }
    }
    match table {
        Some(t) => Ok(t),
        // No batches: rebuild the empty schema
        None => from_record_batch(&RecordBatch::new_empty(schema)),
    }
}

/// Serialize to Arrow IPC stream bytes
pub fn encode_stream(table: &Table) -> Result<Vec<u8>> {
    let batch = to_record_batch(table)?;
    let mut buf = Vec::new();
    {
        let mut writer = StreamWriter::try_new(&mut buf, &batch.schema())?;
        writer.write(&batch)?;
        writer.finish()?;
    }
    Ok(buf)
}

/// Deserialize Arrow IPC stream bytes
pub fn decode_stream(bytes: &[u8]) -> Result<Table> {
    let reader = StreamReader::try_new(Cursor::new(bytes), None)?;
    let schema = reader.schema();
    concat_batches(schema, reader)
}

/// Serialize to an Arrow IPC file with block compression
pub fn encode_file(table: &Table, compression: CompressionAlgorithm) -> Result<Vec<u8>> {
    let batch = to_record_batch(table)?;
    let options = IpcWriteOptions::default().try_with_compression(compression.ipc_codec())?;
    let mut buf = Vec::new();
    {
        let mut writer = FileWriter::try_new_with_options(&mut buf, &batch.schema(), options)?;
        writer.write(&batch)?;
        writer.finish()?;
    }
    Ok(buf)
}

/// Deserialize an Arrow IPC file
pub fn decode_file(bytes: Vec<u8>) -> Result<Table> {
    let reader = FileReader::try_new(Cursor::new(bytes), None)?;
    let schema = reader.schema();
    concat_batches(schema, reader)
}

// =============================================================================
// Tests
// =============================================================================
