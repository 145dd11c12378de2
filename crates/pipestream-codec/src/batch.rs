use crate::error::{CodecError, Result};
use crate::value::{Cell, ColumnData, ColumnType};

/// A named, typed column.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub data: ColumnData,
}

impl Column {
    pub fn new(name: impl Into<String>, data: ColumnData) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }

    pub fn field(&self) -> Field {
        Field::new(self.name.clone(), self.data.column_type())
    }
}

/// Name and type of one column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub ty: ColumnType,
}

impl Field {
    pub fn new(name: impl Into<String>, ty: ColumnType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// Ordered input columns handed to the child.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InputSchema {
    pub fields: Vec<Field>,
}

impl InputSchema {
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn types(&self) -> impl Iterator<Item = ColumnType> + '_ {
        self.fields.iter().map(|f| f.ty)
    }
}

/// One chunk of tabular data: equally long columns.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    columns: Vec<Column>,
    rows: usize,
}

impl Batch {
    /// Build a batch, checking that every column has the same length.
    pub fn new(columns: Vec<Column>) -> Result<Self> {
        let rows = columns.first().map_or(0, |c| c.data.len());
        if let Some(bad) = columns.iter().find(|c| c.data.len() != rows) {
            return Err(CodecError::InvalidBatch(format!(
                "column `{}` has {} rows, expected {rows}",
                bad.name,
                bad.data.len()
            )));
        }
        Ok(Self { columns, rows })
    }

    /// A batch with no columns and no rows.
    pub fn empty() -> Self {
        Self {
            columns: Vec::new(),
            rows: 0,
        }
    }

    pub fn num_rows(&self) -> usize {
        self.rows
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, index: usize) -> Option<&Column> {
        self.columns.get(index)
    }

    pub fn schema(&self) -> InputSchema {
        InputSchema::new(self.columns.iter().map(Column::field).collect())
    }

    /// Cells of one row in column order.
    pub fn row(&self, row: usize) -> impl Iterator<Item = Cell<'_>> + '_ {
        self.columns.iter().map(move |c| c.data.cell(row))
    }

    /// Check the batch against an expected schema (types and arity).
    pub fn check_schema(&self, schema: &InputSchema) -> Result<()> {
        if self.columns.len() != schema.len() {
            return Err(CodecError::InvalidBatch(format!(
                "batch has {} columns, schema has {}",
                self.columns.len(),
                schema.len()
            )));
        }
        for (i, (column, field)) in self.columns.iter().zip(&schema.fields).enumerate() {
            let ty = column.data.column_type();
            if ty != field.ty {
                return Err(CodecError::InvalidBatch(format!(
                    "column {i} (`{}`) is {ty}, schema says {}",
                    column.name, field.ty
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Batch {
        Batch::new(vec![
            Column::new("a", ColumnData::Int32(vec![Some(1), None])),
            Column::new(
                "b",
                ColumnData::String(vec![Some("x".into()), Some("y".into())]),
            ),
        ])
        .unwrap()
    }

    #[test]
    fn rows_and_cells() {
        let batch = sample();
        assert_eq!(batch.num_rows(), 2);
        assert_eq!(batch.num_columns(), 2);
        let row: Vec<_> = batch.row(1).collect();
        assert_eq!(row, vec![Cell::Null, Cell::String("y")]);
    }

    #[test]
    fn unequal_columns_rejected() {
        let err = Batch::new(vec![
            Column::new("a", ColumnData::Int32(vec![Some(1)])),
            Column::new("b", ColumnData::Bool(vec![])),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("column `b` has 0 rows"));
    }

    #[test]
    fn schema_check() {
        let batch = sample();
        assert!(batch.check_schema(&batch.schema()).is_ok());

        let wrong = InputSchema::new(vec![
            Field::new("a", ColumnType::Int64),
            Field::new("b", ColumnType::String),
        ]);
        assert!(batch.check_schema(&wrong).is_err());
        assert!(batch.check_schema(&InputSchema::default()).is_err());
    }
}
