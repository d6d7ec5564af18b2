//! Column-oriented, date-indexed table shared by every pipeline stage.
//!
//! A `Table` is an immutable snapshot once built: stages read one table and
//! return a new one. Nulls are `None`.

use chrono::NaiveDate;
use thiserror::Error;

/// One named numeric column. `values.len()` always equals the table height.
#[derive(Debug, Clone, PartialEq)]
pub struct TableColumn {
    pub name: String,
    pub values: Vec<Option<f64>>,
}

impl TableColumn {
    pub fn new(name: impl Into<String>, values: Vec<Option<f64>>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }

    /// Number of non-null cells.
    pub fn count(&self) -> usize {
        self.values.iter().filter(|v| v.is_some()).count()
    }

    /// Index of the first non-null cell.
    pub fn first_valid(&self) -> Option<usize> {
        self.values.iter().position(|v| v.is_some())
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum TableError {
    #[error("column '{name}' has {actual} rows, table has {expected}")]
    LengthMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("duplicate column '{0}'")]
    DuplicateColumn(String),

    #[error("dates are not strictly ascending at row {0}")]
    UnsortedDates(usize),

    #[error("column '{0}' not found")]
    MissingColumn(String),
}

/// Date-indexed table: strictly ascending dates, equal-length columns.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Table {
    dates: Vec<NaiveDate>,
    columns: Vec<TableColumn>,
}

impl Table {
    /// Create an empty-column table over `dates`, which must be strictly ascending.
    pub fn new(dates: Vec<NaiveDate>) -> Result<Self, TableError> {
        if let Some(i) = dates.windows(2).position(|w| w[0] >= w[1]) {
            return Err(TableError::UnsortedDates(i + 1));
        }
        Ok(Self {
            dates,
            columns: Vec::new(),
        })
    }

    /// Return a copy of this table with `column` appended.
    pub fn with_column(mut self, column: TableColumn) -> Result<Self, TableError> {
        self.push_column(column)?;
        Ok(self)
    }

    pub(crate) fn push_column(&mut self, column: TableColumn) -> Result<(), TableError> {
        if column.values.len() != self.dates.len() {
            return Err(TableError::LengthMismatch {
                name: column.name,
                expected: self.dates.len(),
                actual: column.values.len(),
            });
        }
        if self.column(&column.name).is_some() {
            return Err(TableError::DuplicateColumn(column.name));
        }
        self.columns.push(column);
        Ok(())
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn columns(&self) -> &[TableColumn] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn column(&self, name: &str) -> Option<&TableColumn> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Like [`Table::column`], but a missing column is an error.
    pub fn require(&self, name: &str) -> Result<&TableColumn, TableError> {
        self.column(name)
            .ok_or_else(|| TableError::MissingColumn(name.to_string()))
    }

    pub fn height(&self) -> usize {
        self.dates.len()
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    /// Row index of `date`, if present.
    pub fn row_of(&self, date: NaiveDate) -> Option<usize> {
        self.dates.binary_search(&date).ok()
    }

    /// Cell lookup by column name and date.
    pub fn value_at(&self, name: &str, date: NaiveDate) -> Option<f64> {
        let row = self.row_of(date)?;
        self.column(name)?.values[row]
    }

    /// New table with only the named columns, in the given order.
    pub fn select(&self, names: &[&str]) -> Result<Table, TableError> {
        let mut out = Table::new(self.dates.clone())?;
        for name in names {
            out.push_column(self.require(name)?.clone())?;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn rejects_unsorted_dates() {
        let err = Table::new(vec![d("2021-01-02"), d("2021-01-01")]).unwrap_err();
        assert_eq!(err, TableError::UnsortedDates(1));
    }

    #[test]
    fn rejects_duplicate_dates() {
        assert!(Table::new(vec![d("2021-01-01"), d("2021-01-01")]).is_err());
    }

    #[test]
    fn column_length_must_match() {
        let table = Table::new(vec![d("2021-01-01"), d("2021-01-02")]).unwrap();
        let err = table
            .with_column(TableColumn::new("x", vec![Some(1.0)]))
            .unwrap_err();
        assert!(matches!(err, TableError::LengthMismatch { expected: 2, actual: 1, .. }));
    }

    #[test]
    fn duplicate_column_rejected() {
        let table = Table::new(vec![d("2021-01-01")])
            .unwrap()
            .with_column(TableColumn::new("x", vec![Some(1.0)]))
            .unwrap();
        let err = table
            .with_column(TableColumn::new("x", vec![None]))
            .unwrap_err();
        assert_eq!(err, TableError::DuplicateColumn("x".into()));
    }

    #[test]
    fn lookup_and_select() {
        let table = Table::new(vec![d("2021-01-01"), d("2021-01-05")])
            .unwrap()
            .with_column(TableColumn::new("a", vec![Some(1.0), None]))
            .unwrap()
            .with_column(TableColumn::new("b", vec![Some(2.0), Some(3.0)]))
            .unwrap();

        assert_eq!(table.value_at("b", d("2021-01-05")), Some(3.0));
        assert_eq!(table.value_at("a", d("2021-01-05")), None);
        assert_eq!(table.value_at("a", d("2021-01-03")), None);

        let sel = table.select(&["b"]).unwrap();
        assert_eq!(sel.column_names(), vec!["b"]);
        assert_eq!(
            table.select(&["zzz"]).unwrap_err(),
            TableError::MissingColumn("zzz".into())
        );
    }
}
