//! R native serialization of a named list of column vectors ("DF" format).
//!
//! A message is the binary serialization header, a `VECSXP` with one vector
//! per column, and a `names` attribute. An attribute-less list of length zero
//! is the end-of-data sentinel. Integers and doubles travel in native byte
//! order.

use bytes::{BufMut, BytesMut};
use pipestream_process::ChildIo;
use tracing::trace;

use crate::batch::{Batch, InputSchema};
use crate::error::{CodecError, Result};
use crate::value::{ColumnData, ColumnType};
use crate::MAX_RESPONSE_SIZE;

/// `B\n`, format version 2, written by R 3.2.0, readable by R 2.3.0.
pub const R_HEADER: [u8; 14] = [
    0x42, 0x0a, 0x02, 0x00, 0x00, 0x00, 0x00, 0x02, 0x03, 0x00, 0x00, 0x03, 0x02, 0x00,
];
/// List without attributes (only used by the sentinel).
pub const EVECSXP: [u8; 4] = [0x13, 0x00, 0x00, 0x00];
/// List carrying an attribute pairlist.
pub const VECSXP: [u8; 4] = [0x13, 0x02, 0x00, 0x00];
pub const LGLSXP: [u8; 4] = [0x0a, 0x00, 0x00, 0x00];
pub const INTSXP: [u8; 4] = [0x0d, 0x00, 0x00, 0x00];
pub const REALSXP: [u8; 4] = [0x0e, 0x00, 0x00, 0x00];
pub const STRSXP: [u8; 4] = [0x10, 0x00, 0x00, 0x00];
/// Generic list without attributes, used for binary columns.
pub const LISTVEC: [u8; 4] = [0x13, 0x00, 0x00, 0x00];
pub const RAWSXP: [u8; 4] = [0x18, 0x00, 0x00, 0x00];
/// Element of a character vector, ASCII flag set.
pub const CHARSXP: [u8; 4] = [0x09, 0x00, 0x04, 0x00];
/// R `NULL`.
pub const NILVALUE: [u8; 4] = [0xfe, 0x00, 0x00, 0x00];
/// Attribute pairlist tagged with the `names` symbol.
pub const TAIL_HDR: [u8; 21] = [
    0x02, 0x04, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x09, 0x00, 0x04, 0x00, 0x05, 0x00, 0x00,
    0x00, b'n', b'a', b'm', b'e', b's',
];
/// End of the attribute pairlist.
pub const TAIL: [u8; 4] = NILVALUE;

/// Bit pattern of R's `NA_real_`.
pub const NA_REAL_BITS: u64 = 0x7FF0_0000_0000_07A2;
/// R's `NA_integer_` (also the logical NA).
pub const NA_INTEGER: i32 = i32::MIN;

/// Largest magnitude an int64 may have to travel through a double exactly.
pub const MAX_EXACT_INT: i64 = 1 << 53;

/// True for any NaN whose low word is 1954, which is how R recognises NA.
///
/// The high word is not compared, so an NA whose quiet bit was set in
/// transit still reads as NA rather than NaN.
pub fn is_na_real(bits: u64) -> bool {
    f64::from_bits(bits).is_nan() && (bits & 0xffff_ffff) == 1954
}

fn vector_tag(ty: ColumnType) -> [u8; 4] {
    match ty {
        ColumnType::Int32 | ColumnType::UInt16 | ColumnType::UInt8 | ColumnType::Int8 => INTSXP,
        ColumnType::Bool => LGLSXP,
        ColumnType::Double | ColumnType::Float | ColumnType::Int64 => REALSXP,
        ColumnType::String => STRSXP,
        ColumnType::Binary => LISTVEC,
    }
}

fn sexp_name(tag: u8) -> String {
    match tag {
        0x00 => "NILSXP".to_string(),
        0x0a => "LGLSXP".to_string(),
        0x0d => "INTSXP".to_string(),
        0x0e => "REALSXP".to_string(),
        0x10 => "STRSXP".to_string(),
        0x13 => "VECSXP".to_string(),
        0x18 => "RAWSXP".to_string(),
        other => format!("SEXP type {other}"),
    }
}

/// Nothing to check today: every column type has an R representation.
pub fn check_schema(_schema: &InputSchema) -> Result<()> {
    Ok(())
}

fn wire_len(len: usize) -> Result<i32> {
    i32::try_from(len).map_err(|_| CodecError::TooManyRows {
        rows: len,
        max: i32::MAX as usize,
    })
}

/// Serialize `batch` as a named list.
pub fn encode_batch(batch: &Batch, out: &mut BytesMut) -> Result<()> {
    let rows = wire_len(batch.num_rows())?;
    out.put_slice(&R_HEADER);
    out.put_slice(&VECSXP);
    out.put_i32_ne(wire_len(batch.num_columns())?);

    for (index, column) in batch.columns().iter().enumerate() {
        out.put_slice(&vector_tag(column.data.column_type()));
        out.put_i32_ne(rows);
        encode_values(index, &column.data, out)?;
    }

    out.put_slice(&TAIL_HDR);
    out.put_slice(&STRSXP);
    out.put_i32_ne(wire_len(batch.num_columns())?);
    for column in batch.columns() {
        put_charsxp(out, Some(column.name.as_bytes()))?;
    }
    out.put_slice(&TAIL);
    Ok(())
}

fn put_int(out: &mut BytesMut, value: Option<i32>) {
    out.put_i32_ne(value.unwrap_or(NA_INTEGER));
}

fn put_real(out: &mut BytesMut, value: Option<f64>) {
    out.put_u64_ne(value.map_or(NA_REAL_BITS, f64::to_bits));
}

fn put_charsxp(out: &mut BytesMut, value: Option<&[u8]>) -> Result<()> {
    out.put_slice(&CHARSXP);
    match value {
        Some(bytes) => {
            out.put_i32_ne(wire_len(bytes.len())?);
            out.put_slice(bytes);
        }
        None => out.put_i32_ne(-1),
    }
    Ok(())
}

fn encode_values(column: usize, data: &ColumnData, out: &mut BytesMut) -> Result<()> {
    match data {
        ColumnData::Int32(v) => v.iter().for_each(|x| put_int(out, *x)),
        ColumnData::UInt16(v) => v.iter().for_each(|x| put_int(out, x.map(i32::from))),
        ColumnData::UInt8(v) => v.iter().for_each(|x| put_int(out, x.map(i32::from))),
        ColumnData::Int8(v) => v.iter().for_each(|x| put_int(out, x.map(i32::from))),
        ColumnData::Bool(v) => v.iter().for_each(|x| put_int(out, x.map(i32::from))),
        ColumnData::Double(v) => v.iter().for_each(|x| put_real(out, *x)),
        ColumnData::Float(v) => v.iter().for_each(|x| put_real(out, x.map(f64::from))),
        ColumnData::Int64(v) => {
            for x in v {
                if let Some(value) = x {
                    if value.unsigned_abs() > MAX_EXACT_INT as u64 {
                        return Err(CodecError::LossyValue {
                            column,
                            value: *value,
                        });
                    }
                }
                put_real(out, x.map(|value| value as f64));
            }
        }
        ColumnData::String(v) => {
            for x in v {
                put_charsxp(out, x.as_deref().map(str::as_bytes))?;
            }
        }
        ColumnData::Binary(v) => {
            for x in v {
                match x {
                    Some(bytes) => {
                        out.put_slice(&RAWSXP);
                        out.put_i32_ne(wire_len(bytes.len())?);
                        out.put_slice(bytes);
                    }
                    None => out.put_slice(&NILVALUE),
                }
            }
        }
    }
    Ok(())
}

/// Serialize the zero-column sentinel list.
pub fn encode_sentinel(out: &mut BytesMut) {
    out.put_slice(&R_HEADER);
    out.put_slice(&EVECSXP);
    out.put_i32_ne(0);
}

/// Encode and send `batch` in one write.
pub fn write_batch<I: ChildIo + ?Sized>(io: &mut I, batch: &Batch) -> Result<()> {
    let mut out = BytesMut::new();
    encode_batch(batch, &mut out)?;
    io.hard_write(&out)?;
    trace!(rows = batch.num_rows(), bytes = out.len(), "sent R list");
    Ok(())
}

pub fn write_sentinel<I: ChildIo + ?Sized>(io: &mut I) -> Result<()> {
    let mut out = BytesMut::with_capacity(R_HEADER.len() + 8);
    encode_sentinel(&mut out);
    io.hard_write(&out)?;
    Ok(())
}

/// A decoded list: equally long columns in the expected types.
#[derive(Debug, Clone, PartialEq)]
pub struct RList {
    pub rows: usize,
    pub columns: Vec<ColumnData>,
}

/// Pulls fixed-size fields off the child, keeping a running byte total.
struct WireReader<'a, I: ?Sized> {
    io: &'a mut I,
    check_liveness: bool,
    consumed: usize,
    max: usize,
}

impl<I: ChildIo + ?Sized> WireReader<'_, I> {
    fn charge(&mut self, n: usize) -> Result<()> {
        self.consumed = self.consumed.saturating_add(n);
        if self.consumed > self.max {
            return Err(CodecError::ResponseTooLarge {
                size: self.consumed,
                max: self.max,
            });
        }
        Ok(())
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        self.charge(N)?;
        let mut buf = [0u8; N];
        self.io.hard_read(&mut buf, self.check_liveness)?;
        Ok(buf)
    }

    fn bytes(&mut self, n: usize) -> Result<Vec<u8>> {
        self.charge(n)?;
        let mut buf = vec![0u8; n];
        self.io.hard_read(&mut buf, self.check_liveness)?;
        Ok(buf)
    }

    fn int(&mut self) -> Result<i32> {
        self.array::<4>().map(i32::from_ne_bytes)
    }

    fn count(&mut self, what: &'static str) -> Result<usize> {
        let value = self.int()?;
        usize::try_from(value).map_err(|_| CodecError::NegativeCount {
            what,
            value: i64::from(value),
        })
    }

    fn expect<const N: usize>(&mut self, expected: &[u8; N], what: &'static str) -> Result<()> {
        if &self.array::<N>()? != expected {
            return Err(CodecError::UnexpectedBytes(what));
        }
        Ok(())
    }

    /// Checks `B\n` and format version 2. The writer and minimum reader
    /// versions differ between R builds and are skipped.
    fn header(&mut self) -> Result<()> {
        let header = self.array::<{ R_HEADER.len() }>()?;
        if header[..2] != R_HEADER[..2] {
            return Err(CodecError::UnexpectedBytes("serialization header"));
        }
        if header[2..6] != R_HEADER[2..6] {
            return Err(CodecError::UnexpectedBytes("serialization format version"));
        }
        Ok(())
    }

    fn ints(&mut self, rows: usize) -> Result<Vec<i32>> {
        let raw = self.bytes(rows.saturating_mul(4))?;
        Ok(raw
            .chunks_exact(4)
            .map(|c| i32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }

    fn reals(&mut self, rows: usize) -> Result<Vec<u64>> {
        let raw = self.bytes(rows.saturating_mul(8))?;
        Ok(raw
            .chunks_exact(8)
            .map(|c| u64::from_ne_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
            .collect())
    }

    /// One CHARSXP record; `None` is NA.
    fn charsxp(&mut self) -> Result<Option<Vec<u8>>> {
        let tag = self.array::<4>()?;
        if tag[0] != CHARSXP[0] {
            return Err(CodecError::UnexpectedBytes("string element tag"));
        }
        match self.int()? {
            -1 => Ok(None),
            len if len < -1 => Err(CodecError::InvalidStringLength(len)),
            len => self.bytes(len as usize).map(Some),
        }
    }

    fn raw_element(&mut self) -> Result<Option<Vec<u8>>> {
        let tag = self.array::<4>()?;
        match tag[0] {
            t if t == NILVALUE[0] => Ok(None),
            t if t == RAWSXP[0] => {
                let len = self.count("raw vector length")?;
                self.bytes(len).map(Some)
            }
            _ => Err(CodecError::UnexpectedBytes("binary element tag")),
        }
    }
}

/// Read one list from the child.
///
/// Returns `None` for the zero-column sentinel. Otherwise the column count
/// must match `expected` and every column must carry the same row count; the
/// trailing `names` attribute is consumed and ignored.
pub fn read_list<I: ChildIo + ?Sized>(
    io: &mut I,
    expected: &[ColumnType],
    check_liveness: bool,
) -> Result<Option<RList>> {
    read_list_capped(io, expected, check_liveness, MAX_RESPONSE_SIZE)
}

pub fn read_list_capped<I: ChildIo + ?Sized>(
    io: &mut I,
    expected: &[ColumnType],
    check_liveness: bool,
    max_response_size: usize,
) -> Result<Option<RList>> {
    let mut wire = WireReader {
        io,
        check_liveness,
        consumed: 0,
        max: max_response_size,
    };

    wire.header()?;
    let list_tag = wire.array::<4>()?;
    if list_tag[0] != VECSXP[0] {
        return Err(CodecError::UnexpectedBytes("list tag"));
    }
    let ncols = wire.count("column count")?;
    if ncols == 0 {
        trace!("received R list sentinel");
        return Ok(None);
    }
    if ncols != expected.len() {
        return Err(CodecError::ColumnCount {
            expected: expected.len(),
            actual: ncols,
        });
    }

    let mut rows = None;
    let mut columns = Vec::with_capacity(ncols);
    for (index, &ty) in expected.iter().enumerate() {
        let tag = wire.array::<4>()?;
        let nrows = wire.count("row count")?;
        match rows {
            None => rows = Some(nrows),
            Some(first) if first != nrows => {
                return Err(CodecError::RowCountMismatch {
                    column: index,
                    expected: first,
                    actual: nrows,
                })
            }
            Some(_) => {}
        }
        if tag[0] != vector_tag(ty)[0] {
            return Err(CodecError::TypeMismatch {
                column: index,
                expected: ty,
                found: sexp_name(tag[0]),
            });
        }
        columns.push(read_column(&mut wire, index, ty, nrows)?);
    }

    wire.expect(&TAIL_HDR, "names attribute")?;
    wire.expect(&STRSXP, "names vector tag")?;
    let names = wire.count("name count")?;
    for _ in 0..names {
        wire.charsxp()?;
    }
    wire.expect(&TAIL, "end of attributes")?;

    let rows = rows.unwrap_or(0);
    trace!(rows, columns = ncols, bytes = wire.consumed, "received R list");
    Ok(Some(RList { rows, columns }))
}

fn read_column<I: ChildIo + ?Sized>(
    wire: &mut WireReader<'_, I>,
    column: usize,
    ty: ColumnType,
    rows: usize,
) -> Result<ColumnData> {
    if rows == 0 {
        return Ok(ColumnData::empty(ty));
    }
    let out_of_range = |value: String| CodecError::ValueOutOfRange { column, ty, value };
    let ints = |v: i32| (v != NA_INTEGER).then_some(v);
    let reals = |bits: u64| (!is_na_real(bits)).then(|| f64::from_bits(bits));

    let data = match ty {
        ColumnType::Int32 => ColumnData::Int32(wire.ints(rows)?.into_iter().map(ints).collect()),
        ColumnType::UInt16 => ColumnData::UInt16(
            wire.ints(rows)?
                .into_iter()
                .map(|v| ints(v).map(u16::try_from).transpose())
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| out_of_range(e.to_string()))?,
        ),
        ColumnType::UInt8 => ColumnData::UInt8(
            wire.ints(rows)?
                .into_iter()
                .map(|v| ints(v).map(u8::try_from).transpose())
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| out_of_range(e.to_string()))?,
        ),
        ColumnType::Int8 => ColumnData::Int8(
            wire.ints(rows)?
                .into_iter()
                .map(|v| ints(v).map(i8::try_from).transpose())
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| out_of_range(e.to_string()))?,
        ),
        ColumnType::Bool => {
            ColumnData::Bool(wire.ints(rows)?.into_iter().map(|v| ints(v).map(|v| v != 0)).collect())
        }
        ColumnType::Double => ColumnData::Double(wire.reals(rows)?.into_iter().map(reals).collect()),
        ColumnType::Float => ColumnData::Float(
            wire.reals(rows)?
                .into_iter()
                .map(|bits| reals(bits).map(|v| v as f32))
                .collect(),
        ),
        ColumnType::Int64 => {
            let mut values = Vec::with_capacity(rows);
            for bits in wire.reals(rows)? {
                values.push(match reals(bits) {
                    None => None,
                    Some(v) if v.fract() == 0.0 && v.abs() <= MAX_EXACT_INT as f64 => {
                        Some(v as i64)
                    }
                    Some(v) => return Err(out_of_range(v.to_string())),
                });
            }
            ColumnData::Int64(values)
        }
        ColumnType::String => {
            let mut values = Vec::with_capacity(rows.min(1 << 16));
            for _ in 0..rows {
                let value = match wire.charsxp()? {
                    Some(bytes) => Some(
                        String::from_utf8(bytes)
                            .map_err(|_| CodecError::InvalidUtf8 { column })?,
                    ),
                    None => None,
                };
                values.push(value);
            }
            ColumnData::String(values)
        }
        ColumnType::Binary => {
            let mut values = Vec::with_capacity(rows.min(1 << 16));
            for _ in 0..rows {
                values.push(wire.raw_element()?);
            }
            ColumnData::Binary(values)
        }
    };
    Ok(data)
}
