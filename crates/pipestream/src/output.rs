use std::io::{self, IsTerminal, Write};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use pipestream_codec::{MemorySink, Position, Value};
use pipestream_session::OutputSchema;
use serde_json::{Map, Value as Json};

use crate::exit::{io_error, CliResult};

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

/// Print every stored row, in position order.
pub fn print_rows(
    sink: &MemorySink,
    schema: &OutputSchema,
    format: OutputFormat,
) -> CliResult<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    write_rows(&mut out, sink, schema, format)
        .and_then(|()| out.flush())
        .map_err(|err| io_error("failed to write output", err))
}

pub fn write_rows<W: Write>(
    out: &mut W,
    sink: &MemorySink,
    schema: &OutputSchema,
    format: OutputFormat,
) -> io::Result<()> {
    match format {
        OutputFormat::Json => {
            for (position, row) in sink.rows() {
                let mut object = Map::new();
                for (name, coord) in dimension_values(schema, position) {
                    object.insert(name.to_string(), Json::from(coord));
                }
                for (attr, value) in schema.attributes.iter().zip(row) {
                    object.insert(attr.name.clone(), json_value(value));
                }
                serde_json::to_writer(&mut *out, &Json::Object(object))?;
                writeln!(out)?;
            }
        }
        OutputFormat::Table => {
            let header: Vec<String> = schema
                .dimensions
                .iter()
                .map(|d| d.name.to_uppercase())
                .chain(schema.attributes.iter().map(|a| a.name.to_uppercase()))
                .collect();
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(header);
            for (position, row) in sink.rows() {
                let cells: Vec<String> = dimension_values(schema, position)
                    .map(|(_, coord)| coord.to_string())
                    .chain(row.iter().map(|v| text_value(v, "NULL")))
                    .collect();
                table.add_row(cells);
            }
            writeln!(out, "{table}")?;
        }
        OutputFormat::Raw => {
            for (_, row) in sink.rows() {
                let line: Vec<String> = row.iter().map(|v| text_value(v, "\\N")).collect();
                writeln!(out, "{}", line.join("\t"))?;
            }
        }
    }
    Ok(())
}

fn dimension_values<'a>(
    schema: &'a OutputSchema,
    position: &'a Position,
) -> impl Iterator<Item = (&'a str, i64)> + 'a {
    schema.dimensions.iter().map(move |dim| {
        let coord = match dim.name.as_str() {
            "instance_id" => position.instance_id,
            "chunk_no" => position.chunk_no,
            _ => position.value_no,
        };
        (dim.name.as_str(), coord)
    })
}

fn json_value(value: &Value) -> Json {
    match value {
        Value::Null => Json::Null,
        Value::Int32(v) => Json::from(*v),
        Value::Int64(v) => Json::from(*v),
        Value::UInt16(v) => Json::from(*v),
        Value::Double(v) => Json::from(*v),
        Value::String(v) => Json::from(v.as_str()),
        Value::Binary(v) => Json::from(hex(v)),
        Value::Bool(v) => Json::from(*v),
        Value::Float(v) => Json::from(*v),
        Value::UInt8(v) => Json::from(*v),
        Value::Int8(v) => Json::from(*v),
    }
}

fn text_value(value: &Value, null: &str) -> String {
    match value {
        Value::Null => null.to_string(),
        Value::Int32(v) => v.to_string(),
        Value::Int64(v) => v.to_string(),
        Value::UInt16(v) => v.to_string(),
        Value::Double(v) => v.to_string(),
        Value::String(v) => v.clone(),
        Value::Binary(v) => hex(v),
        Value::Bool(v) => v.to_string(),
        Value::Float(v) => v.to_string(),
        Value::UInt8(v) => v.to_string(),
        Value::Int8(v) => v.to_string(),
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use pipestream_codec::{Cell, OutputSink};
    use pipestream_session::StreamSettings;

    use super::*;

    fn df_sink() -> (MemorySink, OutputSchema) {
        let settings = StreamSettings::parse(
            "cat",
            ["format=df", "types=(double,binary)", "names=(x,raw)"],
        )
        .expect("settings should parse");
        let schema = OutputSchema::infer(&settings, 1).expect("schema should infer");
        let mut sink = MemorySink::new(2);
        let first = Position {
            instance_id: 0,
            chunk_no: 0,
            value_no: 0,
        };
        let second = Position {
            value_no: 1,
            ..first
        };
        sink.write_cell(0, &first, Cell::Double(1.5)).expect("write");
        sink.write_cell(1, &first, Cell::Binary(&[0xde, 0xad])).expect("write");
        sink.write_cell(0, &second, Cell::Double(f64::NAN)).expect("write");
        sink.write_cell(1, &second, Cell::Null).expect("write");
        (sink, schema)
    }

    fn render(format: OutputFormat) -> String {
        let (sink, schema) = df_sink();
        let mut out = Vec::new();
        write_rows(&mut out, &sink, &schema, format).expect("render");
        String::from_utf8(out).expect("utf-8 output")
    }

    #[test]
    fn json_lines_carry_dimensions_and_attributes() {
        let text = render(OutputFormat::Json);
        let rows: Vec<Json> = text
            .lines()
            .map(|l| serde_json::from_str(l).expect("valid json"))
            .collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["value_no"], 0);
        assert_eq!(rows[0]["x"], 1.5);
        assert_eq!(rows[0]["raw"], "dead");
        assert_eq!(rows[1]["value_no"], 1);
        assert!(rows[1]["x"].is_null());
        assert!(rows[1]["raw"].is_null());
    }

    #[test]
    fn raw_output_is_tab_separated() {
        assert_eq!(render(OutputFormat::Raw), "1.5\tdead\nNaN\t\\N\n");
    }

    #[test]
    fn table_has_header() {
        let text = render(OutputFormat::Table);
        assert!(text.contains("VALUE_NO"));
        assert!(text.contains("RAW"));
    }
}
