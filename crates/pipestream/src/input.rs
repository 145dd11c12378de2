//! Tab-separated input files turned into batches.
//!
//! One row per line, fields separated by tabs. `\N` is a missing value;
//! `\t`, `\n`, `\r` and `\\` are unescaped. Binary fields are hex.

use std::io::BufRead;

use pipestream_codec::{Batch, Column, ColumnData, ColumnType, Field, InputSchema, Value};

use crate::exit::{io_error, CliError, CliResult, DATA_INVALID, INTERNAL};

const NULL_MARKER: &str = "\\N";

#[derive(Debug, Clone)]
pub struct InputOptions {
    pub types: Option<Vec<ColumnType>>,
    pub header: bool,
    pub batch_rows: usize,
}

#[derive(Debug)]
pub struct ParsedInput {
    pub schema: InputSchema,
    pub batches: Vec<Batch>,
}

impl ParsedInput {
    pub fn rows(&self) -> usize {
        self.batches.iter().map(Batch::num_rows).sum()
    }
}

struct Builder {
    fields: Vec<Field>,
    columns: Vec<ColumnData>,
    rows: usize,
}

impl Builder {
    fn new(fields: Vec<Field>) -> Self {
        let columns = fields.iter().map(|f| ColumnData::empty(f.ty)).collect();
        Self {
            fields,
            columns,
            rows: 0,
        }
    }

    fn push_line(&mut self, line: &str, line_no: usize) -> CliResult<()> {
        let values: Vec<&str> = line.split('\t').collect();
        if values.len() != self.fields.len() {
            return Err(invalid(
                line_no,
                format!(
                    "expected {} field(s), found {}",
                    self.fields.len(),
                    values.len()
                ),
            ));
        }
        for (column, raw) in self.columns.iter_mut().zip(values) {
            let value = if raw == NULL_MARKER {
                Value::Null
            } else {
                parse_value(column.column_type(), unescape(raw))
                    .map_err(|msg| invalid(line_no, msg))?
            };
            if !column.push(value.as_cell()) {
                return Err(CliError::new(
                    INTERNAL,
                    format!("line {line_no}: value does not match its column"),
                ));
            }
        }
        self.rows += 1;
        Ok(())
    }

    fn take(&mut self) -> CliResult<Batch> {
        let columns = self
            .fields
            .iter()
            .zip(self.columns.iter_mut())
            .map(|(field, data)| {
                let data = std::mem::replace(data, ColumnData::empty(field.ty));
                Column::new(field.name.clone(), data)
            })
            .collect();
        self.rows = 0;
        Batch::new(columns).map_err(|err| CliError::new(INTERNAL, format!("input batch: {err}")))
    }
}

/// Read every line of `reader` into batches of at most `batch_rows` rows.
pub fn parse<R: BufRead>(reader: R, options: &InputOptions) -> CliResult<ParsedInput> {
    let mut builder: Option<Builder> = None;
    let mut batches = Vec::new();

    for (index, line) in reader.lines().enumerate() {
        let line_no = index + 1;
        let line = line.map_err(|err| io_error("failed to read input", err))?;
        let line = line.strip_suffix('\r').unwrap_or(&line);

        if builder.is_none() {
            let (fields, is_header) = fields_for(line, options, line_no)?;
            builder = Some(Builder::new(fields));
            if is_header {
                continue;
            }
        }
        let Some(current) = builder.as_mut() else {
            continue;
        };

        current.push_line(line, line_no)?;
        if current.rows >= options.batch_rows {
            batches.push(current.take()?);
        }
    }

    let builder = match builder {
        Some(mut builder) => {
            if builder.rows > 0 {
                batches.push(builder.take()?);
            }
            builder
        }
        None => {
            let types = options.types.as_deref().unwrap_or(&[ColumnType::String]);
            Builder::new(default_fields(types))
        }
    };

    Ok(ParsedInput {
        schema: InputSchema::new(builder.fields),
        batches,
    })
}

fn fields_for(
    first: &str,
    options: &InputOptions,
    line_no: usize,
) -> CliResult<(Vec<Field>, bool)> {
    let count = first.split('\t').count();
    if options.header {
        let names: Vec<String> = first.split('\t').map(unescape).collect();
        let types = match &options.types {
            Some(types) if types.len() != count => {
                return Err(invalid(
                    line_no,
                    format!(
                        "header has {count} column(s) but {} input type(s) were given",
                        types.len()
                    ),
                ))
            }
            Some(types) => types.clone(),
            None => vec![ColumnType::String; count],
        };
        let fields = names
            .into_iter()
            .zip(types)
            .map(|(name, ty)| Field::new(name, ty))
            .collect();
        return Ok((fields, true));
    }

    let types = options
        .types
        .clone()
        .unwrap_or_else(|| vec![ColumnType::String; count]);
    Ok((default_fields(&types), false))
}

fn default_fields(types: &[ColumnType]) -> Vec<Field> {
    types
        .iter()
        .enumerate()
        .map(|(i, &ty)| Field::new(format!("a{i}"), ty))
        .collect()
}

fn invalid(line_no: usize, msg: impl std::fmt::Display) -> CliError {
    CliError::new(DATA_INVALID, format!("input line {line_no}: {msg}"))
}

fn parse_value(ty: ColumnType, text: String) -> Result<Value, String> {
    let parsed = match ty {
        ColumnType::String => return Ok(Value::String(text)),
        ColumnType::Binary => decode_hex(&text).map(Value::Binary),
        ColumnType::Int32 => text.parse().ok().map(Value::Int32),
        ColumnType::Int64 => text.parse().ok().map(Value::Int64),
        ColumnType::UInt16 => text.parse().ok().map(Value::UInt16),
        ColumnType::UInt8 => text.parse().ok().map(Value::UInt8),
        ColumnType::Int8 => text.parse().ok().map(Value::Int8),
        ColumnType::Double => text.parse().ok().map(Value::Double),
        ColumnType::Float => text.parse().ok().map(Value::Float),
        ColumnType::Bool => parse_bool(&text).map(Value::Bool),
    };
    parsed.ok_or_else(|| format!("invalid {ty} value {text:?}"))
}

fn parse_bool(text: &str) -> Option<bool> {
    match text.to_ascii_lowercase().as_str() {
        "true" | "t" | "1" => Some(true),
        "false" | "f" | "0" => Some(false),
        _ => None,
    }
}

fn decode_hex(text: &str) -> Option<Vec<u8>> {
    let text = text.strip_prefix("0x").unwrap_or(text);
    if text.len() % 2 != 0 {
        return None;
    }
    (0..text.len())
        .step_by(2)
        .map(|i| text.get(i..i + 2).and_then(|b| u8::from_str_radix(b, 16).ok()))
        .collect()
}

fn unescape(raw: &str) -> String {
    if !raw.contains('\\') {
        return raw.to_string();
    }
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('t') => out.push('\t'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(types: Option<Vec<ColumnType>>, header: bool, batch_rows: usize) -> InputOptions {
        InputOptions {
            types,
            header,
            batch_rows,
        }
    }

    #[test]
    fn strings_by_default() {
        let parsed = parse("a\tb\n1\t2\n".as_bytes(), &options(None, false, 1000))
            .expect("input should parse");
        assert_eq!(parsed.batches.len(), 1);
        assert_eq!(parsed.rows(), 2);
        assert_eq!(parsed.schema.len(), 2);
        let batch = &parsed.batches[0];
        assert_eq!(
            batch.column(1).map(|c| c.data.clone()),
            Some(ColumnData::String(vec![Some("b".into()), Some("2".into())]))
        );
    }

    #[test]
    fn splits_into_batches() {
        let text = "1\n2\n3\n4\n5\n";
        let parsed = parse(
            text.as_bytes(),
            &options(Some(vec![ColumnType::Int32]), false, 2),
        )
        .expect("input should parse");
        let sizes: Vec<usize> = parsed.batches.iter().map(Batch::num_rows).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
    }

    #[test]
    fn header_names_columns() {
        let parsed = parse(
            "n\tflag\n7\ttrue\n\\N\tf\n".as_bytes(),
            &options(Some(vec![ColumnType::Int64, ColumnType::Bool]), true, 10),
        )
        .expect("input should parse");
        let names: Vec<&str> = parsed
            .schema
            .fields
            .iter()
            .map(|f| f.name.as_str())
            .collect();
        assert_eq!(names, vec!["n", "flag"]);
        let batch = &parsed.batches[0];
        assert_eq!(
            batch.column(0).map(|c| c.data.clone()),
            Some(ColumnData::Int64(vec![Some(7), None]))
        );
        assert_eq!(
            batch.column(1).map(|c| c.data.clone()),
            Some(ColumnData::Bool(vec![Some(true), Some(false)]))
        );
    }

    #[test]
    fn unescapes_strings_and_decodes_hex() {
        let parsed = parse(
            "a\\tb\\\\c\t0aff\n".as_bytes(),
            &options(Some(vec![ColumnType::String, ColumnType::Binary]), false, 10),
        )
        .expect("input should parse");
        let batch = &parsed.batches[0];
        assert_eq!(
            batch.column(0).map(|c| c.data.clone()),
            Some(ColumnData::String(vec![Some("a\tb\\c".into())]))
        );
        assert_eq!(
            batch.column(1).map(|c| c.data.clone()),
            Some(ColumnData::Binary(vec![Some(vec![0x0a, 0xff])]))
        );
    }

    #[test]
    fn bad_value_reports_line() {
        let err = parse(
            "1\nx\n".as_bytes(),
            &options(Some(vec![ColumnType::Int32]), false, 10),
        )
        .expect_err("non-numeric value should fail");
        assert_eq!(err.code, DATA_INVALID);
        assert!(err.message.contains("line 2"), "{}", err.message);
    }

    #[test]
    fn ragged_line_is_rejected() {
        let err = parse("a\tb\nc\n".as_bytes(), &options(None, false, 10))
            .expect_err("ragged input should fail");
        assert_eq!(err.code, DATA_INVALID);
    }

    #[test]
    fn empty_input_has_schema_and_no_batches() {
        let parsed = parse(
            "".as_bytes(),
            &options(Some(vec![ColumnType::Double, ColumnType::String]), false, 10),
        )
        .expect("empty input should parse");
        assert!(parsed.batches.is_empty());
        assert_eq!(parsed.schema.len(), 2);
    }
}
