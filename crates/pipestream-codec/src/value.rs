//! Closed set of column types and their typed storage.

use std::fmt;
use std::str::FromStr;

/// Element type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Int32,
    Int64,
    UInt16,
    Double,
    String,
    Binary,
    Bool,
    Float,
    UInt8,
    Int8,
}

impl ColumnType {
    pub const ALL: [ColumnType; 10] = [
        ColumnType::Int32,
        ColumnType::Int64,
        ColumnType::UInt16,
        ColumnType::Double,
        ColumnType::String,
        ColumnType::Binary,
        ColumnType::Bool,
        ColumnType::Float,
        ColumnType::UInt8,
        ColumnType::Int8,
    ];

    /// The lowercase name used in settings and on the command line.
    pub fn name(self) -> &'static str {
        match self {
            ColumnType::Int32 => "int32",
            ColumnType::Int64 => "int64",
            ColumnType::UInt16 => "uint16",
            ColumnType::Double => "double",
            ColumnType::String => "string",
            ColumnType::Binary => "binary",
            ColumnType::Bool => "bool",
            ColumnType::Float => "float",
            ColumnType::UInt8 => "uint8",
            ColumnType::Int8 => "int8",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error returned when parsing an unknown type name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownType(pub String);

impl fmt::Display for UnknownType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unsupported type `{}`", self.0)
    }
}

impl std::error::Error for UnknownType {}

impl FromStr for ColumnType {
    type Err = UnknownType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ColumnType::ALL
            .into_iter()
            .find(|ty| ty.name() == s)
            .ok_or_else(|| UnknownType(s.to_string()))
    }
}

/// A borrowed cell value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Cell<'a> {
    Null,
    Int32(i32),
    Int64(i64),
    UInt16(u16),
    Double(f64),
    String(&'a str),
    Binary(&'a [u8]),
    Bool(bool),
    Float(f32),
    UInt8(u8),
    Int8(i8),
}

impl Cell<'_> {
    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }

    pub fn to_value(&self) -> Value {
        match *self {
            Cell::Null => Value::Null,
            Cell::Int32(v) => Value::Int32(v),
            Cell::Int64(v) => Value::Int64(v),
            Cell::UInt16(v) => Value::UInt16(v),
            Cell::Double(v) => Value::Double(v),
            Cell::String(v) => Value::String(v.to_string()),
            Cell::Binary(v) => Value::Binary(v.to_vec()),
            Cell::Bool(v) => Value::Bool(v),
            Cell::Float(v) => Value::Float(v),
            Cell::UInt8(v) => Value::UInt8(v),
            Cell::Int8(v) => Value::Int8(v),
        }
    }
}

/// An owned cell value, as stored by [`MemorySink`](crate::MemorySink).
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int32(i32),
    Int64(i64),
    UInt16(u16),
    Double(f64),
    String(String),
    Binary(Vec<u8>),
    Bool(bool),
    Float(f32),
    UInt8(u8),
    Int8(i8),
}

impl Value {
    pub fn as_cell(&self) -> Cell<'_> {
        match self {
            Value::Null => Cell::Null,
            Value::Int32(v) => Cell::Int32(*v),
            Value::Int64(v) => Cell::Int64(*v),
            Value::UInt16(v) => Cell::UInt16(*v),
            Value::Double(v) => Cell::Double(*v),
            Value::String(v) => Cell::String(v),
            Value::Binary(v) => Cell::Binary(v),
            Value::Bool(v) => Cell::Bool(*v),
            Value::Float(v) => Cell::Float(*v),
            Value::UInt8(v) => Cell::UInt8(*v),
            Value::Int8(v) => Cell::Int8(*v),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}

/// Values of one column; `None` is a missing value.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    Int32(Vec<Option<i32>>),
    Int64(Vec<Option<i64>>),
    UInt16(Vec<Option<u16>>),
    Double(Vec<Option<f64>>),
    String(Vec<Option<String>>),
    Binary(Vec<Option<Vec<u8>>>),
    Bool(Vec<Option<bool>>),
    Float(Vec<Option<f32>>),
    UInt8(Vec<Option<u8>>),
    Int8(Vec<Option<i8>>),
}

macro_rules! for_each_column {
    ($data:expr, $values:ident => $body:expr) => {
        match $data {
            ColumnData::Int32($values) => $body,
            ColumnData::Int64($values) => $body,
            ColumnData::UInt16($values) => $body,
            ColumnData::Double($values) => $body,
            ColumnData::String($values) => $body,
            ColumnData::Binary($values) => $body,
            ColumnData::Bool($values) => $body,
            ColumnData::Float($values) => $body,
            ColumnData::UInt8($values) => $body,
            ColumnData::Int8($values) => $body,
        }
    };
}

impl ColumnData {
    /// An empty column of the given type.
    pub fn empty(ty: ColumnType) -> Self {
        Self::with_capacity(ty, 0)
    }

    pub fn with_capacity(ty: ColumnType, capacity: usize) -> Self {
        match ty {
            ColumnType::Int32 => ColumnData::Int32(Vec::with_capacity(capacity)),
            ColumnType::Int64 => ColumnData::Int64(Vec::with_capacity(capacity)),
            ColumnType::UInt16 => ColumnData::UInt16(Vec::with_capacity(capacity)),
            ColumnType::Double => ColumnData::Double(Vec::with_capacity(capacity)),
            ColumnType::String => ColumnData::String(Vec::with_capacity(capacity)),
            ColumnType::Binary => ColumnData::Binary(Vec::with_capacity(capacity)),
            ColumnType::Bool => ColumnData::Bool(Vec::with_capacity(capacity)),
            ColumnType::Float => ColumnData::Float(Vec::with_capacity(capacity)),
            ColumnType::UInt8 => ColumnData::UInt8(Vec::with_capacity(capacity)),
            ColumnType::Int8 => ColumnData::Int8(Vec::with_capacity(capacity)),
        }
    }

    pub fn column_type(&self) -> ColumnType {
        match self {
            ColumnData::Int32(_) => ColumnType::Int32,
            ColumnData::Int64(_) => ColumnType::Int64,
            ColumnData::UInt16(_) => ColumnType::UInt16,
            ColumnData::Double(_) => ColumnType::Double,
            ColumnData::String(_) => ColumnType::String,
            ColumnData::Binary(_) => ColumnType::Binary,
            ColumnData::Bool(_) => ColumnType::Bool,
            ColumnData::Float(_) => ColumnType::Float,
            ColumnData::UInt8(_) => ColumnType::UInt8,
            ColumnData::Int8(_) => ColumnType::Int8,
        }
    }

    pub fn len(&self) -> usize {
        for_each_column!(self, values => values.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn null_count(&self) -> usize {
        for_each_column!(self, values => values.iter().filter(|v| v.is_none()).count())
    }

    /// The cell at `row`. Panics if out of range.
    pub fn cell(&self, row: usize) -> Cell<'_> {
        match self {
            ColumnData::Int32(v) => v[row].map_or(Cell::Null, Cell::Int32),
            ColumnData::Int64(v) => v[row].map_or(Cell::Null, Cell::Int64),
            ColumnData::UInt16(v) => v[row].map_or(Cell::Null, Cell::UInt16),
            ColumnData::Double(v) => v[row].map_or(Cell::Null, Cell::Double),
            ColumnData::String(v) => v[row].as_deref().map_or(Cell::Null, Cell::String),
            ColumnData::Binary(v) => v[row].as_deref().map_or(Cell::Null, Cell::Binary),
            ColumnData::Bool(v) => v[row].map_or(Cell::Null, Cell::Bool),
            ColumnData::Float(v) => v[row].map_or(Cell::Null, Cell::Float),
            ColumnData::UInt8(v) => v[row].map_or(Cell::Null, Cell::UInt8),
            ColumnData::Int8(v) => v[row].map_or(Cell::Null, Cell::Int8),
        }
    }

    /// Append a cell. Returns `false` if the cell's type does not match.
    pub fn push(&mut self, cell: Cell<'_>) -> bool {
        match (self, cell) {
            (data, Cell::Null) => {
                for_each_column!(data, values => values.push(None));
            }
            (ColumnData::Int32(v), Cell::Int32(x)) => v.push(Some(x)),
            (ColumnData::Int64(v), Cell::Int64(x)) => v.push(Some(x)),
            (ColumnData::UInt16(v), Cell::UInt16(x)) => v.push(Some(x)),
            (ColumnData::Double(v), Cell::Double(x)) => v.push(Some(x)),
            (ColumnData::String(v), Cell::String(x)) => v.push(Some(x.to_string())),
            (ColumnData::Binary(v), Cell::Binary(x)) => v.push(Some(x.to_vec())),
            (ColumnData::Bool(v), Cell::Bool(x)) => v.push(Some(x)),
            (ColumnData::Float(v), Cell::Float(x)) => v.push(Some(x)),
            (ColumnData::UInt8(v), Cell::UInt8(x)) => v.push(Some(x)),
            (ColumnData::Int8(v), Cell::Int8(x)) => v.push(Some(x)),
            _ => return false,
        }
        true
    }
}
