//! Where decoded responses go.

use std::collections::BTreeMap;

use crate::error::{CodecError, Result};
use crate::value::{Cell, ColumnData, Value};

/// Output coordinate: which instance, which response chunk, which row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Position {
    pub instance_id: i64,
    pub chunk_no: i64,
    pub value_no: i64,
}

/// Forward-only output position for one streaming session.
///
/// The instance is fixed; `chunk_no` advances once per response and
/// `value_no` once per row inside a response.
#[derive(Debug, Clone)]
pub struct OutputCursor {
    position: Position,
}

impl OutputCursor {
    pub fn new(instance_id: i64) -> Self {
        Self {
            position: Position {
                instance_id,
                chunk_no: 0,
                value_no: 0,
            },
        }
    }

    pub fn position(&self) -> Position {
        self.position
    }

    pub fn next_value(&mut self) {
        self.position.value_no += 1;
    }

    pub fn next_chunk(&mut self) {
        self.position.chunk_no += 1;
        self.position.value_no = 0;
    }
}

/// Consumer of decoded cells.
pub trait OutputSink {
    /// Store `cell` for output attribute `attribute` at `position`.
    fn write_cell(&mut self, attribute: usize, position: &Position, cell: Cell<'_>) -> Result<()>;

    /// Record that a row exists at `position`, whatever its values.
    fn mark_present(&mut self, position: &Position) -> Result<()>;

    /// A response chunk ending at `position` is complete.
    fn flush_chunk(&mut self, _position: &Position) -> Result<()> {
        Ok(())
    }

    /// No more writes will follow.
    fn finalize(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Write decoded columns row by row at the cursor, then close the chunk.
///
/// Returns the number of rows written. An empty response leaves the cursor
/// where it was, so chunk numbers stay contiguous.
pub fn write_columns(
    sink: &mut dyn OutputSink,
    cursor: &mut OutputCursor,
    columns: &[ColumnData],
) -> Result<usize> {
    let rows = columns.first().map_or(0, ColumnData::len);
    for row in 0..rows {
        let position = cursor.position();
        for (attribute, column) in columns.iter().enumerate() {
            sink.write_cell(attribute, &position, column.cell(row))?;
        }
        sink.mark_present(&position)?;
        cursor.next_value();
    }
    if rows > 0 {
        sink.flush_chunk(&cursor.position())?;
        cursor.next_chunk();
    }
    Ok(rows)
}

/// Sink that keeps every row in memory, ordered by position.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    attributes: usize,
    rows: BTreeMap<Position, Vec<Value>>,
    chunks: usize,
    finalized: bool,
}

impl MemorySink {
    pub fn new(attributes: usize) -> Self {
        Self {
            attributes,
            ..Self::default()
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, position: &Position) -> Option<&[Value]> {
        self.rows.get(position).map(Vec::as_slice)
    }

    pub fn rows(&self) -> impl Iterator<Item = (&Position, &[Value])> {
        self.rows.iter().map(|(p, v)| (p, v.as_slice()))
    }

    /// All values of one attribute, in position order.
    pub fn attribute(&self, attribute: usize) -> Vec<Value> {
        self.rows
            .values()
            .map(|row| row.get(attribute).cloned().unwrap_or(Value::Null))
            .collect()
    }

    pub fn chunks_flushed(&self) -> usize {
        self.chunks
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    fn check_open(&self) -> Result<()> {
        if self.finalized {
            return Err(CodecError::Sink("write after finalize".to_string()));
        }
        Ok(())
    }

    fn row_mut(&mut self, position: &Position) -> &mut Vec<Value> {
        let attributes = self.attributes;
        self.rows
            .entry(*position)
            .or_insert_with(|| vec![Value::Null; attributes])
    }
}

impl OutputSink for MemorySink {
    fn write_cell(&mut self, attribute: usize, position: &Position, cell: Cell<'_>) -> Result<()> {
        self.check_open()?;
        if attribute >= self.attributes {
            return Err(CodecError::Sink(format!(
                "attribute {attribute} out of range ({} attributes)",
                self.attributes
            )));
        }
        self.row_mut(position)[attribute] = cell.to_value();
        Ok(())
    }

    fn mark_present(&mut self, position: &Position) -> Result<()> {
        self.check_open()?;
        self.row_mut(position);
        Ok(())
    }

    fn flush_chunk(&mut self, _position: &Position) -> Result<()> {
        self.check_open()?;
        self.chunks += 1;
        Ok(())
    }

    fn finalize(&mut self) -> Result<()> {
        self.check_open()?;
        self.finalized = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_only_moves_forward() {
        let mut cursor = OutputCursor::new(3);
        let start = cursor.position();
        cursor.next_value();
        let second = cursor.position();
        cursor.next_chunk();
        let third = cursor.position();
        assert!(start < second && second < third);
        assert_eq!(
            third,
            Position {
                instance_id: 3,
                chunk_no: 1,
                value_no: 0
            }
        );
    }

    #[test]
    fn write_columns_places_rows() {
        let mut sink = MemorySink::new(2);
        let mut cursor = OutputCursor::new(0);
        let columns = vec![
            ColumnData::Int32(vec![Some(1), None]),
            ColumnData::String(vec![Some("a".into()), Some("b".into())]),
        ];
        assert_eq!(write_columns(&mut sink, &mut cursor, &columns).unwrap(), 2);
        assert_eq!(write_columns(&mut sink, &mut cursor, &columns[..1]).unwrap(), 2);

        assert_eq!(sink.len(), 4);
        assert_eq!(sink.chunks_flushed(), 2);
        let second_chunk = Position {
            instance_id: 0,
            chunk_no: 1,
            value_no: 1,
        };
        assert_eq!(sink.get(&second_chunk).unwrap(), &[Value::Null, Value::Null]);
        assert_eq!(
            sink.attribute(1),
            vec![
                Value::String("a".into()),
                Value::String("b".into()),
                Value::Null,
                Value::Null
            ]
        );
        assert_eq!(cursor.position().chunk_no, 2);
    }

    #[test]
    fn empty_columns_do_not_use_up_a_chunk() {
        let mut sink = MemorySink::new(1);
        let mut cursor = OutputCursor::new(0);
        let empty = vec![ColumnData::Int32(vec![])];
        let one = vec![ColumnData::Int32(vec![Some(4)])];

        assert_eq!(write_columns(&mut sink, &mut cursor, &empty).unwrap(), 0);
        assert_eq!(write_columns(&mut sink, &mut cursor, &[]).unwrap(), 0);
        assert_eq!(cursor.position().chunk_no, 0);
        assert_eq!(sink.chunks_flushed(), 0);

        write_columns(&mut sink, &mut cursor, &one).unwrap();
        write_columns(&mut sink, &mut cursor, &empty).unwrap();
        write_columns(&mut sink, &mut cursor, &one).unwrap();
        let chunks: Vec<_> = sink.rows().map(|(p, _)| p.chunk_no).collect();
        assert_eq!(chunks, [0, 1]);
        assert_eq!(cursor.position().chunk_no, 2);
    }

    #[test]
    fn finalized_sink_rejects_writes() {
        let mut sink = MemorySink::new(1);
        sink.finalize().unwrap();
        assert!(sink.is_finalized());
        let pos = OutputCursor::new(0).position();
        assert!(matches!(
            sink.write_cell(0, &pos, Cell::Bool(true)),
            Err(CodecError::Sink(_))
        ));
        assert!(sink.finalize().is_err());
    }

    #[test]
    fn attribute_out_of_range() {
        let mut sink = MemorySink::new(1);
        let pos = OutputCursor::new(0).position();
        assert!(sink.write_cell(1, &pos, Cell::Int8(1)).is_err());
    }
}
