//! Length-prefixed Arrow IPC file (Feather v2) messages.
//!
//! Each message is an 8-byte little-endian payload length followed by the
//! payload, which holds exactly one record batch. A zero length with no
//! payload is the end-of-data sentinel.

use std::io::Cursor;
use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, BinaryArray, BooleanArray, Float32Array, Float64Array, Int32Array,
    Int64Array, Int8Array, StringArray, UInt16Array, UInt8Array,
};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::ipc::reader::FileReader;
use arrow::ipc::writer::FileWriter;
use arrow::record_batch::RecordBatch;
use pipestream_process::ChildIo;
use tracing::trace;

use crate::batch::{Batch, InputSchema};
use crate::error::{CodecError, Result};
use crate::value::{ColumnData, ColumnType};
use crate::MAX_RESPONSE_SIZE;

/// Arrow type used on the wire for each column type.
pub fn arrow_type(ty: ColumnType) -> DataType {
    match ty {
        ColumnType::Int32 => DataType::Int32,
        ColumnType::Int64 => DataType::Int64,
        ColumnType::UInt16 => DataType::UInt16,
        ColumnType::Double => DataType::Float64,
        ColumnType::String => DataType::Utf8,
        ColumnType::Binary => DataType::Binary,
        ColumnType::Bool => DataType::Boolean,
        ColumnType::Float => DataType::Float32,
        ColumnType::UInt8 => DataType::UInt8,
        ColumnType::Int8 => DataType::Int8,
    }
}

/// Nothing to check today: every column type has an Arrow representation.
pub fn check_schema(_schema: &InputSchema) -> Result<()> {
    Ok(())
}

fn to_array(data: &ColumnData) -> ArrayRef {
    match data {
        ColumnData::Int32(v) => Arc::new(Int32Array::from(v.clone())),
        ColumnData::Int64(v) => Arc::new(Int64Array::from(v.clone())),
        ColumnData::UInt16(v) => Arc::new(UInt16Array::from(v.clone())),
        ColumnData::Double(v) => Arc::new(Float64Array::from(v.clone())),
        ColumnData::String(v) => Arc::new(StringArray::from_iter(v.iter().map(Option::as_deref))),
        ColumnData::Binary(v) => Arc::new(BinaryArray::from_iter(v.iter().map(Option::as_deref))),
        ColumnData::Bool(v) => Arc::new(BooleanArray::from(v.clone())),
        ColumnData::Float(v) => Arc::new(Float32Array::from(v.clone())),
        ColumnData::UInt8(v) => Arc::new(UInt8Array::from(v.clone())),
        ColumnData::Int8(v) => Arc::new(Int8Array::from(v.clone())),
    }
}

/// Convert a batch to an Arrow record batch with nullable fields.
pub fn to_record_batch(batch: &Batch) -> Result<RecordBatch> {
    if batch.num_rows() > i32::MAX as usize {
        return Err(CodecError::TooManyRows {
            rows: batch.num_rows(),
            max: i32::MAX as usize,
        });
    }
    let fields: Vec<Field> = batch
        .columns()
        .iter()
        .map(|c| Field::new(&c.name, arrow_type(c.data.column_type()), true))
        .collect();
    let arrays = batch.columns().iter().map(|c| to_array(&c.data)).collect();
    Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays)?)
}

/// Serialize `batch` as a single-batch Arrow IPC file.
pub fn encode_batch(batch: &Batch) -> Result<Vec<u8>> {
    let record = to_record_batch(batch)?;
    let mut payload = Vec::new();
    {
        let mut writer = FileWriter::try_new(&mut payload, &record.schema())?;
        writer.write(&record)?;
        writer.finish()?;
    }
    Ok(payload)
}

/// Send one length-prefixed payload.
pub fn write_message<I: ChildIo + ?Sized>(io: &mut I, payload: &[u8]) -> Result<()> {
    io.hard_write(&(payload.len() as u64).to_le_bytes())?;
    if !payload.is_empty() {
        io.hard_write(payload)?;
    }
    trace!(bytes = payload.len(), "sent feather message");
    Ok(())
}

pub fn write_batch<I: ChildIo + ?Sized>(io: &mut I, batch: &Batch) -> Result<()> {
    write_message(io, &encode_batch(batch)?)
}

/// Send the sentinel: eight zero bytes.
pub fn write_sentinel<I: ChildIo + ?Sized>(io: &mut I) -> Result<()> {
    write_message(io, &[])
}

/// Read one payload. `None` is the sentinel.
pub fn read_message<I: ChildIo + ?Sized>(io: &mut I, check_liveness: bool) -> Result<Option<Vec<u8>>> {
    read_message_capped(io, check_liveness, MAX_RESPONSE_SIZE)
}

pub fn read_message_capped<I: ChildIo + ?Sized>(
    io: &mut I,
    check_liveness: bool,
    max_response_size: usize,
) -> Result<Option<Vec<u8>>> {
    let mut prefix = [0u8; 8];
    io.hard_read(&mut prefix, check_liveness)?;
    let len = u64::from_le_bytes(prefix);
    if len == 0 {
        trace!("received feather sentinel");
        return Ok(None);
    }
    let len = usize::try_from(len)
        .ok()
        .filter(|&n| n <= max_response_size)
        .ok_or(CodecError::ResponseTooLarge {
            size: usize::try_from(len).unwrap_or(usize::MAX),
            max: max_response_size,
        })?;

    let mut payload = vec![0u8; len];
    io.hard_read(&mut payload, check_liveness)?;
    trace!(bytes = len, "received feather message");
    Ok(Some(payload))
}

/// Decode a payload into columns of the expected types.
pub fn decode_batch(payload: &[u8], expected: &[ColumnType]) -> Result<Vec<ColumnData>> {
    let mut reader = FileReader::try_new(Cursor::new(payload), None)?;
    let batches = reader.num_batches();
    if batches != 1 {
        return Err(CodecError::BatchCount(batches));
    }
    let record = reader.next().ok_or(CodecError::BatchCount(0))??;

    if record.num_columns() != expected.len() {
        return Err(CodecError::ColumnCount {
            expected: expected.len(),
            actual: record.num_columns(),
        });
    }

    record
        .columns()
        .iter()
        .zip(expected)
        .enumerate()
        .map(|(index, (array, &ty))| from_array(index, ty, array.as_ref()))
        .collect()
}

fn from_array(column: usize, ty: ColumnType, array: &dyn Array) -> Result<ColumnData> {
    let mismatch = || CodecError::TypeMismatch {
        column,
        expected: ty,
        found: array.data_type().to_string(),
    };
    if array.data_type() != &arrow_type(ty) {
        return Err(mismatch());
    }

    macro_rules! collect {
        ($array_ty:ty, $variant:ident) => {
            ColumnData::$variant(
                array
                    .as_any()
                    .downcast_ref::<$array_ty>()
                    .ok_or_else(mismatch)?
                    .iter()
                    .collect(),
            )
        };
    }

    let data = match ty {
        ColumnType::Int32 => collect!(Int32Array, Int32),
        ColumnType::Int64 => collect!(Int64Array, Int64),
        ColumnType::UInt16 => collect!(UInt16Array, UInt16),
        ColumnType::Double => collect!(Float64Array, Double),
        ColumnType::Bool => collect!(BooleanArray, Bool),
        ColumnType::Float => collect!(Float32Array, Float),
        ColumnType::UInt8 => collect!(UInt8Array, UInt8),
        ColumnType::Int8 => collect!(Int8Array, Int8),
        ColumnType::String => ColumnData::String(
            array
                .as_any()
                .downcast_ref::<StringArray>()
                .ok_or_else(mismatch)?
                .iter()
                .map(|v| v.map(str::to_owned))
                .collect(),
        ),
        ColumnType::Binary => ColumnData::Binary(
            array
                .as_any()
                .downcast_ref::<BinaryArray>()
                .ok_or_else(mismatch)?
                .iter()
                .map(|v| v.map(<[u8]>::to_vec))
                .collect(),
        ),
    };
    Ok(data)
}
