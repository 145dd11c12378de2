//! Operator parameters: `format=`, `types=`, `names=`, `chunk_size=`.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use pipestream_codec::ColumnType;
use serde::Deserialize;

use crate::error::{Result, SessionError};

/// Default number of output rows per chunk for `df` and `feather`.
pub const DEFAULT_CHUNK_SIZE: u64 = 10_000_000;

/// Attribute name of the single TSV output column.
pub const DEFAULT_TSV_NAME: &str = "response";

/// How batches are encoded for the child.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferFormat {
    #[default]
    Tsv,
    Df,
    Feather,
}

impl TransferFormat {
    pub fn name(self) -> &'static str {
        match self {
            TransferFormat::Tsv => "tsv",
            TransferFormat::Df => "df",
            TransferFormat::Feather => "feather",
        }
    }
}

impl fmt::Display for TransferFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TransferFormat {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "tsv" => Ok(TransferFormat::Tsv),
            "df" => Ok(TransferFormat::Df),
            "feather" => Ok(TransferFormat::Feather),
            other => Err(SessionError::settings(format!(
                "could not parse format `{other}`"
            ))),
        }
    }
}

/// Validated settings for one stream.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawSettings")]
pub struct StreamSettings {
    command: String,
    format: TransferFormat,
    types: Vec<ColumnType>,
    names: Vec<String>,
    chunk_size: u64,
}

/// Unvalidated settings, as parsed or deserialized.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSettings {
    command: String,
    #[serde(default)]
    format: Option<TransferFormat>,
    #[serde(default)]
    types: Option<Vec<String>>,
    #[serde(default)]
    names: Option<Vec<String>>,
    #[serde(default)]
    chunk_size: Option<i64>,
}

impl TryFrom<RawSettings> for StreamSettings {
    type Error = SessionError;

    fn try_from(raw: RawSettings) -> Result<Self> {
        let command = raw.command.trim().to_string();
        if command.is_empty() {
            return Err(SessionError::settings("command must not be empty"));
        }
        let format = raw.format.unwrap_or_default();

        let types = raw
            .types
            .as_deref()
            .map(|tokens| {
                tokens
                    .iter()
                    .map(|t| {
                        t.trim()
                            .parse::<ColumnType>()
                            .map_err(|e| SessionError::settings(e.to_string()))
                    })
                    .collect::<Result<Vec<_>>>()
            })
            .transpose()?;

        let chunk_size = match raw.chunk_size {
            None => None,
            Some(n) if n > 0 => Some(n as u64),
            Some(_) => return Err(SessionError::settings("chunk_size must be positive")),
        };

        if let Some(names) = &raw.names {
            check_names(names)?;
        }

        match format {
            TransferFormat::Tsv => {
                if types.is_some() {
                    return Err(SessionError::settings(
                        "types= cannot be used with the tsv format",
                    ));
                }
                if chunk_size.is_some() {
                    return Err(SessionError::settings(
                        "chunk_size= cannot be used with the tsv format",
                    ));
                }
                let names = raw
                    .names
                    .unwrap_or_else(|| vec![DEFAULT_TSV_NAME.to_string()]);
                if names.len() != 1 {
                    return Err(SessionError::settings(
                        "the tsv format produces exactly one attribute; names= must have one entry",
                    ));
                }
                Ok(Self {
                    command,
                    format,
                    types: vec![ColumnType::String],
                    names,
                    chunk_size: DEFAULT_CHUNK_SIZE,
                })
            }
            TransferFormat::Df | TransferFormat::Feather => {
                let types = types.filter(|t| !t.is_empty()).ok_or_else(|| {
                    SessionError::settings(format!(
                        "when using the {format} format, types= must be specified"
                    ))
                })?;
                let names = match raw.names {
                    Some(names) if names.len() != types.len() => {
                        return Err(SessionError::settings(format!(
                            "names= has {} entries but types= has {}",
                            names.len(),
                            types.len()
                        )))
                    }
                    Some(names) => names,
                    None => (0..types.len()).map(|i| format!("a{i}")).collect(),
                };
                Ok(Self {
                    command,
                    format,
                    types,
                    names,
                    chunk_size: chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE),
                })
            }
        }
    }
}

fn check_names(names: &[String]) -> Result<()> {
    let mut seen = HashSet::new();
    for name in names {
        if name.is_empty() {
            return Err(SessionError::settings("names= contains an empty name"));
        }
        if !seen.insert(name.as_str()) {
            return Err(SessionError::settings(format!(
                "names= contains `{name}` more than once"
            )));
        }
    }
    Ok(())
}

/// Split `(a, b, c)` or `a,b,c` into trimmed tokens.
fn parse_list(content: &str, key: &str) -> Result<Vec<String>> {
    let inner = content
        .trim()
        .trim_start_matches('(')
        .trim_end_matches(')');
    let tokens: Vec<String> = inner.split(',').map(|t| t.trim().to_string()).collect();
    if tokens.iter().any(String::is_empty) {
        return Err(SessionError::settings(format!("could not parse {key}")));
    }
    Ok(tokens)
}

impl StreamSettings {
    /// Parse `key=value` parameters; each key may appear at most once.
    pub fn parse<I, S>(command: impl Into<String>, params: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut raw = RawSettings {
            command: command.into(),
            ..RawSettings::default()
        };

        for param in params {
            let param = param.as_ref().trim();
            let Some((key, value)) = param.split_once('=') else {
                return Err(SessionError::settings(format!(
                    "unrecognized token '{param}'"
                )));
            };
            let value = value.trim();
            let duplicate = || {
                SessionError::settings(format!("illegal attempt to set {key} multiple times"))
            };
            match key.trim() {
                "format" => {
                    if raw.format.replace(value.parse()?).is_some() {
                        return Err(duplicate());
                    }
                }
                "types" => {
                    if raw.types.replace(parse_list(value, "types")?).is_some() {
                        return Err(duplicate());
                    }
                }
                "names" => {
                    if raw.names.replace(parse_list(value, "names")?).is_some() {
                        return Err(duplicate());
                    }
                }
                "chunk_size" => {
                    let size = value
                        .parse::<i64>()
                        .map_err(|_| SessionError::settings("could not parse chunk_size"))?;
                    if raw.chunk_size.replace(size).is_some() {
                        return Err(duplicate());
                    }
                }
                _ => {
                    return Err(SessionError::settings(format!(
                        "unrecognized token '{param}'"
                    )))
                }
            }
        }

        Self::try_from(raw)
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn format(&self) -> TransferFormat {
        self.format
    }

    /// Output column types (a single string column for TSV).
    pub fn types(&self) -> &[ColumnType] {
        &self.types
    }

    /// Output column names.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Maximum rows per output chunk.
    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(params: &[&str]) -> Result<StreamSettings> {
        StreamSettings::parse("cat", params.iter().copied())
    }

    #[test]
    fn defaults_to_tsv() {
        let s = parse(&[]).unwrap();
        assert_eq!(s.format(), TransferFormat::Tsv);
        assert_eq!(s.names(), &["response".to_string()]);
        assert_eq!(s.types(), &[ColumnType::String]);
        assert_eq!(s.command(), "cat");
    }

    #[test]
    fn df_with_types_and_default_names() {
        let s = parse(&["format=df", "types=(int32, double,string)", "chunk_size=100"]).unwrap();
        assert_eq!(s.format(), TransferFormat::Df);
        assert_eq!(
            s.types(),
            &[ColumnType::Int32, ColumnType::Double, ColumnType::String]
        );
        assert_eq!(s.names(), &["a0", "a1", "a2"]);
        assert_eq!(s.chunk_size(), 100);
    }

    #[test]
    fn feather_with_names() {
        let s = parse(&["format=feather", "types=int64,binary", "names=(id,blob)"]).unwrap();
        assert_eq!(s.names(), &["id", "blob"]);
        assert_eq!(s.chunk_size(), DEFAULT_CHUNK_SIZE);
    }

    #[test]
    fn rejects_bad_parameters() {
        let cases: &[(&[&str], &str)] = &[
            (&["format=df"], "types= must be specified"),
            (&["format=csv"], "could not parse format"),
            (&["format=df", "format=df", "types=int32"], "multiple times"),
            (&["types=int32"], "cannot be used with the tsv format"),
            (&["chunk_size=10"], "cannot be used with the tsv format"),
            (&["format=df", "types=int32", "chunk_size=0"], "must be positive"),
            (&["format=df", "types=int32", "chunk_size=many"], "could not parse chunk_size"),
            (&["format=df", "types=int128"], "unsupported type"),
            (&["format=df", "types=int32,"], "could not parse types"),
            (&["format=df", "types=int32", "names=(a,b)"], "names= has 2 entries"),
            (&["names=(a,b)"], "exactly one attribute"),
            (&["format=df", "types=int32,int32", "names=a,a"], "more than once"),
            (&["verbose"], "unrecognized token 'verbose'"),
            (&["colour=red"], "unrecognized token 'colour=red'"),
        ];
        for (params, expected) in cases {
            let err = parse(params).unwrap_err();
            assert_eq!(err.phase(), "settings");
            assert!(
                err.to_string().contains(expected),
                "{params:?}: {err} does not mention {expected}"
            );
        }
    }

    #[test]
    fn empty_command_rejected() {
        assert!(StreamSettings::parse("  ", Vec::<String>::new()).is_err());
    }

    #[test]
    fn deserializes_from_json() {
        let s: StreamSettings = serde_json::from_str(
            r#"{"command": "python3 map.py", "format": "df", "types": ["int32", "string"]}"#,
        )
        .unwrap();
        assert_eq!(s.names(), &["a0", "a1"]);

        let err = serde_json::from_str::<StreamSettings>(r#"{"command": "cat", "format": "df"}"#)
            .unwrap_err();
        assert!(err.to_string().contains("types= must be specified"));
    }
}
