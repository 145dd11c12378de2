//! Per-format drivers: encode a batch, exchange it with the child, and place
//! the response in the output sink.

use pipestream_codec::sink::write_columns;
use pipestream_codec::tsv::{self, TsvFormat, TsvReader};
use pipestream_codec::{
    feather, rlist, Batch, Cell, CodecError, ColumnData, ColumnType, InputSchema, OutputCursor,
    OutputSink,
};
use pipestream_process::{ChildIo, ProcessError};
use tracing::debug;

use crate::error::{Result, SessionError};
use crate::settings::{StreamSettings, TransferFormat};

/// Drives one wire format for the lifetime of a stream.
pub trait StreamInterface {
    fn format(&self) -> TransferFormat;

    /// Record the input columns. Types the format cannot carry are rejected
    /// here, before any data moves.
    fn set_input_schema(&mut self, schema: &InputSchema) -> Result<()>;

    /// Send one batch and store the child's response. Zero-row batches are
    /// skipped.
    fn stream_batch(
        &mut self,
        batch: &Batch,
        io: &mut dyn ChildIo,
        sink: &mut dyn OutputSink,
    ) -> Result<()>;

    /// Send the end-of-data sentinel, store the last response and finalize
    /// the sink. The last read does not check child liveness.
    fn finalize(&mut self, io: &mut dyn ChildIo, sink: &mut dyn OutputSink) -> Result<()>;
}

/// Build the interface for `settings`, writing at `instance_id`.
pub fn interface_for(
    settings: &StreamSettings,
    instance_id: i64,
    tsv_format: TsvFormat,
) -> Box<dyn StreamInterface> {
    match settings.format() {
        TransferFormat::Tsv => Box::new(TsvInterface::new(instance_id, tsv_format)),
        TransferFormat::Df => Box::new(DfInterface::new(
            instance_id,
            settings.types().to_vec(),
            settings.chunk_size(),
        )),
        TransferFormat::Feather => Box::new(FeatherInterface::new(
            instance_id,
            settings.types().to_vec(),
            settings.chunk_size(),
        )),
    }
}

/// Common checks before a batch goes out. `Ok(false)` means skip it.
fn prepare(schema: Option<&InputSchema>, batch: &Batch, io: &dyn ChildIo) -> Result<bool> {
    let schema =
        schema.ok_or_else(|| SessionError::settings("input schema has not been set"))?;
    batch.check_schema(schema)?;
    if batch.num_rows() == 0 {
        return Ok(false);
    }
    if !io.is_alive() {
        return Err(ProcessError::NotAlive("write to").into());
    }
    Ok(true)
}

fn check_chunk_size(rows: usize, chunk_size: u64) -> Result<()> {
    if rows as u64 > chunk_size {
        return Err(CodecError::TooManyRows {
            rows,
            max: usize::try_from(chunk_size).unwrap_or(usize::MAX),
        }
        .into());
    }
    Ok(())
}

/// Line protocol. Each response becomes one string cell.
pub struct TsvInterface {
    format: TsvFormat,
    reader: TsvReader,
    cursor: OutputCursor,
    schema: Option<InputSchema>,
    body: String,
}

impl TsvInterface {
    pub fn new(instance_id: i64, format: TsvFormat) -> Self {
        Self {
            format,
            reader: TsvReader::new(),
            cursor: OutputCursor::new(instance_id),
            schema: None,
            body: String::new(),
        }
    }

    fn store(&mut self, message: &tsv::TsvMessage, sink: &mut dyn OutputSink) -> Result<()> {
        if message.lines == 0 {
            return Ok(());
        }
        let text = std::str::from_utf8(message.text())
            .map_err(|_| CodecError::InvalidUtf8 { column: 0 })?;
        let position = self.cursor.position();
        sink.write_cell(0, &position, Cell::String(text))?;
        sink.mark_present(&position)?;
        sink.flush_chunk(&position)?;
        self.cursor.next_chunk();
        Ok(())
    }
}

impl StreamInterface for TsvInterface {
    fn format(&self) -> TransferFormat {
        TransferFormat::Tsv
    }

    fn set_input_schema(&mut self, schema: &InputSchema) -> Result<()> {
        tsv::check_schema(schema)?;
        self.schema = Some(schema.clone());
        Ok(())
    }

    fn stream_batch(
        &mut self,
        batch: &Batch,
        io: &mut dyn ChildIo,
        sink: &mut dyn OutputSink,
    ) -> Result<()> {
        if !prepare(self.schema.as_ref(), batch, io)? {
            return Ok(());
        }
        self.body.clear();
        tsv::encode_rows(batch, &self.format, &mut self.body)?;
        tsv::write_message(io, batch.num_rows(), self.body.as_bytes())?;
        let message = self.reader.read_message(io, true)?;
        self.store(&message, sink)
    }

    fn finalize(&mut self, io: &mut dyn ChildIo, sink: &mut dyn OutputSink) -> Result<()> {
        tsv::write_sentinel(io)?;
        let message = self.reader.read_message(io, false)?;
        self.store(&message, sink)?;
        debug!(chunks = self.cursor.position().chunk_no, "tsv stream finalized");
        sink.finalize()?;
        Ok(())
    }
}

/// R named-list ("data frame") protocol.
pub struct DfInterface {
    types: Vec<ColumnType>,
    chunk_size: u64,
    cursor: OutputCursor,
    schema: Option<InputSchema>,
}

impl DfInterface {
    pub fn new(instance_id: i64, types: Vec<ColumnType>, chunk_size: u64) -> Self {
        Self {
            types,
            chunk_size,
            cursor: OutputCursor::new(instance_id),
            schema: None,
        }
    }

    fn receive(
        &mut self,
        io: &mut dyn ChildIo,
        sink: &mut dyn OutputSink,
        check_liveness: bool,
    ) -> Result<()> {
        if let Some(list) = rlist::read_list(io, &self.types, check_liveness)? {
            check_chunk_size(list.rows, self.chunk_size)?;
            write_columns(sink, &mut self.cursor, &list.columns)?;
        }
        Ok(())
    }
}

impl StreamInterface for DfInterface {
    fn format(&self) -> TransferFormat {
        TransferFormat::Df
    }

    fn set_input_schema(&mut self, schema: &InputSchema) -> Result<()> {
        rlist::check_schema(schema)?;
        self.schema = Some(schema.clone());
        Ok(())
    }

    fn stream_batch(
        &mut self,
        batch: &Batch,
        io: &mut dyn ChildIo,
        sink: &mut dyn OutputSink,
    ) -> Result<()> {
        if !prepare(self.schema.as_ref(), batch, io)? {
            return Ok(());
        }
        rlist::write_batch(io, batch)?;
        self.receive(io, sink, true)
    }

    fn finalize(&mut self, io: &mut dyn ChildIo, sink: &mut dyn OutputSink) -> Result<()> {
        rlist::write_sentinel(io)?;
        self.receive(io, sink, false)?;
        debug!(chunks = self.cursor.position().chunk_no, "df stream finalized");
        sink.finalize()?;
        Ok(())
    }
}

/// Length-prefixed Arrow file protocol.
pub struct FeatherInterface {
    types: Vec<ColumnType>,
    chunk_size: u64,
    cursor: OutputCursor,
    schema: Option<InputSchema>,
}

impl FeatherInterface {
    pub fn new(instance_id: i64, types: Vec<ColumnType>, chunk_size: u64) -> Self {
        Self {
            types,
            chunk_size,
            cursor: OutputCursor::new(instance_id),
            schema: None,
        }
    }

    fn receive(
        &mut self,
        io: &mut dyn ChildIo,
        sink: &mut dyn OutputSink,
        check_liveness: bool,
    ) -> Result<()> {
        if let Some(payload) = feather::read_message(io, check_liveness)? {
            let columns: Vec<ColumnData> = feather::decode_batch(&payload, &self.types)?;
            let rows = columns.first().map_or(0, ColumnData::len);
            check_chunk_size(rows, self.chunk_size)?;
            write_columns(sink, &mut self.cursor, &columns)?;
        }
        Ok(())
    }
}

impl StreamInterface for FeatherInterface {
    fn format(&self) -> TransferFormat {
        TransferFormat::Feather
    }

    fn set_input_schema(&mut self, schema: &InputSchema) -> Result<()> {
        feather::check_schema(schema)?;
        self.schema = Some(schema.clone());
        Ok(())
    }

    fn stream_batch(
        &mut self,
        batch: &Batch,
        io: &mut dyn ChildIo,
        sink: &mut dyn OutputSink,
    ) -> Result<()> {
        if !prepare(self.schema.as_ref(), batch, io)? {
            return Ok(());
        }
        feather::write_batch(io, batch)?;
        self.receive(io, sink, true)
    }

    fn finalize(&mut self, io: &mut dyn ChildIo, sink: &mut dyn OutputSink) -> Result<()> {
        feather::write_sentinel(io)?;
        self.receive(io, sink, false)?;
        debug!(chunks = self.cursor.position().chunk_no, "feather stream finalized");
        sink.finalize()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipestream_codec::{Column, Field, MemorySink, Position, Value};

    /// Replays a canned reply, records what was written.
    struct Canned {
        reply: Vec<u8>,
        pos: usize,
        written: Vec<u8>,
        alive: bool,
    }

    impl Canned {
        fn new(reply: &[u8]) -> Self {
            Self {
                reply: reply.to_vec(),
                pos: 0,
                written: Vec::new(),
                alive: true,
            }
        }
    }

    impl ChildIo for Canned {
        fn soft_read(
            &mut self,
            buf: &mut [u8],
            _check_liveness: bool,
        ) -> pipestream_process::Result<usize> {
            if self.pos == self.reply.len() {
                return Err(ProcessError::Read(std::io::Error::other("no more reply")));
            }
            let n = buf.len().min(self.reply.len() - self.pos);
            buf[..n].copy_from_slice(&self.reply[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }

        fn hard_write(&mut self, buf: &[u8]) -> pipestream_process::Result<()> {
            self.written.extend_from_slice(buf);
            Ok(())
        }

        fn is_alive(&self) -> bool {
            self.alive
        }
    }

    fn strings(a: &[&str], b: &[&str]) -> Batch {
        let col = |v: &[&str]| ColumnData::String(v.iter().map(|s| Some(s.to_string())).collect());
        Batch::new(vec![Column::new("x", col(a)), Column::new("y", col(b))]).unwrap()
    }

    fn pos(chunk_no: i64, value_no: i64) -> Position {
        Position {
            instance_id: 0,
            chunk_no,
            value_no,
        }
    }

    #[test]
    fn tsv_exchange_stores_response_without_trailing_newline() {
        let batch = strings(&["a", "1"], &["b", "2"]);
        let mut iface = TsvInterface::new(0, TsvFormat::default());
        iface.set_input_schema(&batch.schema()).unwrap();

        let mut io = Canned::new(b"2\nHello\ta\tb\nHello\t1\t2\n");
        let mut sink = MemorySink::new(1);
        iface.stream_batch(&batch, &mut io, &mut sink).unwrap();

        assert_eq!(io.written, b"2\na\tb\n1\t2\n");
        assert_eq!(
            sink.get(&pos(0, 0)).unwrap(),
            &[Value::String("Hello\ta\tb\nHello\t1\t2".into())]
        );
    }

    #[test]
    fn tsv_reply_with_invalid_utf8_is_a_protocol_error() {
        let batch = strings(&["a"], &["b"]);
        let mut iface = TsvInterface::new(0, TsvFormat::default());
        iface.set_input_schema(&batch.schema()).unwrap();

        let mut io = Canned::new(b"1\n\xff\xfeab\n");
        let mut sink = MemorySink::new(1);
        let err = iface.stream_batch(&batch, &mut io, &mut sink).unwrap_err();

        assert!(matches!(
            err,
            SessionError::Codec(CodecError::InvalidUtf8 { column: 0 })
        ));
        assert_eq!(err.phase(), "protocol");
        assert!(sink.is_empty());
    }

    #[test]
    fn zero_row_batches_are_not_sent() {
        let batch = strings(&[], &[]);
        let mut iface = TsvInterface::new(0, TsvFormat::default());
        iface.set_input_schema(&batch.schema()).unwrap();
        let mut io = Canned::new(b"");
        let mut sink = MemorySink::new(1);
        iface.stream_batch(&batch, &mut io, &mut sink).unwrap();
        assert!(io.written.is_empty());
        assert!(sink.is_empty());
    }

    #[test]
    fn tsv_finalize_sends_sentinel_and_keeps_last_reply() {
        let mut iface = TsvInterface::new(2, TsvFormat::default());
        iface
            .set_input_schema(&InputSchema::new(vec![Field::new("x", ColumnType::Int32)]))
            .unwrap();
        let mut io = Canned::new(b"1\ntotal\t7\n");
        let mut sink = MemorySink::new(1);
        iface.finalize(&mut io, &mut sink).unwrap();

        assert_eq!(io.written, b"0\n");
        assert!(sink.is_finalized());
        let (position, row) = sink.rows().next().unwrap();
        assert_eq!(position.instance_id, 2);
        assert_eq!(row, &[Value::String("total\t7".into())]);
    }

    #[test]
    fn schema_must_be_set_and_match() {
        let batch = strings(&["a"], &["b"]);
        let mut iface = TsvInterface::new(0, TsvFormat::default());
        let mut io = Canned::new(b"");
        let mut sink = MemorySink::new(1);
        assert_eq!(
            iface
                .stream_batch(&batch, &mut io, &mut sink)
                .unwrap_err()
                .phase(),
            "settings"
        );

        iface
            .set_input_schema(&InputSchema::new(vec![Field::new("x", ColumnType::String)]))
            .unwrap();
        assert!(iface.stream_batch(&batch, &mut io, &mut sink).is_err());
    }

    #[test]
    fn tsv_rejects_binary_input() {
        let mut iface = TsvInterface::new(0, TsvFormat::default());
        let err = iface
            .set_input_schema(&InputSchema::new(vec![Field::new("b", ColumnType::Binary)]))
            .unwrap_err();
        assert_eq!(err.phase(), "settings");
    }

    #[test]
    fn dead_child_is_not_written_to() {
        let batch = strings(&["a"], &["b"]);
        let mut iface = TsvInterface::new(0, TsvFormat::default());
        iface.set_input_schema(&batch.schema()).unwrap();
        let mut io = Canned::new(b"");
        io.alive = false;
        let err = iface
            .stream_batch(&batch, &mut io, &mut MemorySink::new(1))
            .unwrap_err();
        assert!(matches!(
            err,
            SessionError::Process(ProcessError::NotAlive(_))
        ));
        assert!(io.written.is_empty());
    }

    #[test]
    fn df_response_over_chunk_size_rejected() {
        let batch = Batch::new(vec![Column::new(
            "a",
            ColumnData::Int32(vec![Some(1), Some(2), Some(3)]),
        )])
        .unwrap();
        let mut reply = bytes::BytesMut::new();
        rlist::encode_batch(&batch, &mut reply).unwrap();

        let mut iface = DfInterface::new(0, vec![ColumnType::Int32], 2);
        iface.set_input_schema(&batch.schema()).unwrap();
        let err = iface
            .stream_batch(&batch, &mut Canned::new(&reply), &mut MemorySink::new(1))
            .unwrap_err();
        assert!(matches!(
            err,
            SessionError::Codec(CodecError::TooManyRows { rows: 3, max: 2 })
        ));
        assert_eq!(err.phase(), "protocol");
    }

    #[test]
    fn df_rows_land_at_successive_positions() {
        let batch = Batch::new(vec![Column::new(
            "a",
            ColumnData::Double(vec![Some(0.5), None]),
        )])
        .unwrap();
        let mut reply = bytes::BytesMut::new();
        rlist::encode_batch(&batch, &mut reply).unwrap();
        rlist::encode_batch(&batch, &mut reply).unwrap();
        rlist::encode_sentinel(&mut reply);

        let mut iface = DfInterface::new(0, vec![ColumnType::Double], 10);
        iface.set_input_schema(&batch.schema()).unwrap();
        let mut io = Canned::new(&reply);
        let mut sink = MemorySink::new(1);
        iface.stream_batch(&batch, &mut io, &mut sink).unwrap();
        iface.stream_batch(&batch, &mut io, &mut sink).unwrap();
        iface.finalize(&mut io, &mut sink).unwrap();

        let positions: Vec<_> = sink.rows().map(|(p, _)| (p.chunk_no, p.value_no)).collect();
        assert_eq!(positions, [(0, 0), (0, 1), (1, 0), (1, 1)]);
        assert_eq!(sink.get(&pos(1, 1)).unwrap(), &[Value::Null]);
        assert!(sink.is_finalized());
    }

    #[test]
    fn df_empty_reply_leaves_no_chunk_gap() {
        let batch = Batch::new(vec![Column::new("a", ColumnData::Int32(vec![Some(1)]))]).unwrap();
        let empty = Batch::new(vec![Column::new("a", ColumnData::Int32(vec![]))]).unwrap();
        let mut reply = bytes::BytesMut::new();
        rlist::encode_batch(&batch, &mut reply).unwrap();
        rlist::encode_batch(&empty, &mut reply).unwrap();
        rlist::encode_batch(&batch, &mut reply).unwrap();

        let mut iface = DfInterface::new(0, vec![ColumnType::Int32], 10);
        iface.set_input_schema(&batch.schema()).unwrap();
        let mut io = Canned::new(&reply);
        let mut sink = MemorySink::new(1);
        for _ in 0..3 {
            iface.stream_batch(&batch, &mut io, &mut sink).unwrap();
        }

        let chunks: Vec<_> = sink.rows().map(|(p, _)| p.chunk_no).collect();
        assert_eq!(chunks, [0, 1]);
    }

    #[test]
    fn feather_exchange_round_trips() {
        let batch = Batch::new(vec![
            Column::new("id", ColumnData::Int64(vec![Some(7), None])),
            Column::new("blob", ColumnData::Binary(vec![None, Some(b"xy".to_vec())])),
        ])
        .unwrap();
        let payload = feather::encode_batch(&batch).unwrap();
        let mut reply = (payload.len() as u64).to_le_bytes().to_vec();
        reply.extend_from_slice(&payload);
        reply.extend_from_slice(&[0u8; 8]);

        let mut iface = FeatherInterface::new(0, vec![ColumnType::Int64, ColumnType::Binary], 100);
        iface.set_input_schema(&batch.schema()).unwrap();
        let mut io = Canned::new(&reply);
        let mut sink = MemorySink::new(2);
        iface.stream_batch(&batch, &mut io, &mut sink).unwrap();
        iface.finalize(&mut io, &mut sink).unwrap();

        assert_eq!(
            sink.get(&pos(0, 1)).unwrap(),
            &[Value::Null, Value::Binary(b"xy".to_vec())]
        );
        assert_eq!(io.written.len(), reply.len());
    }
}
