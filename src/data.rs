//! Tabular data as seen by schema building and column generation.
//!
//! Data must be complete: missing values are the adapter's problem and
//! have to be dropped or imputed before a table reaches this crate.

use std::collections::HashMap;

use crate::error::ColumnError;

#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    Float(Vec<f64>),
    Int(Vec<i64>),
    Str(Vec<String>),
}

/// A single cell, for row-at-a-time evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Num(f64),
    Str(String),
}

impl Value {
    /// Categorical level of the cell.
    pub fn level(&self) -> String {
        match self {
            Value::Num(x) => x.to_string(),
            Value::Str(s) => s.clone(),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Num(x) => Some(*x),
            Value::Str(_) => None,
        }
    }
}

impl Column {
    pub fn len(&self) -> usize {
        match self {
            Column::Float(v) => v.len(),
            Column::Int(v) => v.len(),
            Column::Str(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Column::Float(_) | Column::Int(_))
    }

    /// The column as floating point, `None` for non-numeric columns.
    pub fn to_f64(&self) -> Option<Vec<f64>> {
        match self {
            Column::Float(v) => Some(v.clone()),
            Column::Int(v) => Some(v.iter().map(|x| *x as f64).collect()),
            Column::Str(_) => None,
        }
    }

    pub fn value(&self, i: usize) -> Option<Value> {
        match self {
            Column::Float(v) => v.get(i).map(|x| Value::Num(*x)),
            Column::Int(v) => v.get(i).map(|x| Value::Num(*x as f64)),
            Column::Str(v) => v.get(i).map(|s| Value::Str(s.clone())),
        }
    }

    /// Every cell rendered as a categorical level.
    pub fn levels_per_row(&self) -> Vec<String> {
        match self {
            Column::Float(v) => v.iter().map(|x| x.to_string()).collect(),
            Column::Int(v) => v.iter().map(|x| (*x as f64).to_string()).collect(),
            Column::Str(v) => v.clone(),
        }
    }

    /// Distinct levels, sorted numerically for numeric columns and
    /// lexicographically otherwise.
    pub fn unique_levels(&self) -> Vec<String> {
        match self {
            Column::Str(v) => {
                let mut levels = v.clone();
                levels.sort();
                levels.dedup();
                levels
            }
            _ => {
                let mut values = self.to_f64().unwrap_or_default();
                values.sort_by(|a, b| a.total_cmp(b));
                values.dedup_by(|a, b| a.to_bits() == b.to_bits());
                values.iter().map(|x| x.to_string()).collect()
            }
        }
    }
}

impl From<Vec<f64>> for Column {
    fn from(v: Vec<f64>) -> Column {
        Column::Float(v)
    }
}

impl From<Vec<i64>> for Column {
    fn from(v: Vec<i64>) -> Column {
        Column::Int(v)
    }
}

impl From<Vec<String>> for Column {
    fn from(v: Vec<String>) -> Column {
        Column::Str(v)
    }
}

impl From<Vec<&str>> for Column {
    fn from(v: Vec<&str>) -> Column {
        Column::Str(v.into_iter().map(String::from).collect())
    }
}

/// Named, equally long columns.
pub trait Table {
    fn column(&self, name: &str) -> Option<&Column>;
    fn column_names(&self) -> Vec<&str>;
    fn nrows(&self) -> usize;

    fn row(&self, i: usize) -> Option<Row> {
        if i >= self.nrows() {
            return None;
        }
        let mut values = HashMap::new();
        for name in self.column_names() {
            let value = self.column(name)?.value(i)?;
            values.insert(name.to_string(), value);
        }
        Some(Row { values })
    }
}

/// In-memory columnar table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnTable {
    columns: Vec<(String, Column)>,
    nrows: usize,
}

impl ColumnTable {
    pub fn from_columns<S, C, I>(columns: I) -> Result<ColumnTable, ColumnError>
    where
        S: Into<String>,
        C: Into<Column>,
        I: IntoIterator<Item = (S, C)>,
    {
        let mut table = ColumnTable::default();
        for (name, column) in columns {
            table.insert(name, column)?;
        }
        Ok(table)
    }

    /// Adds or replaces a column; its length must match the table's.
    pub fn insert<S: Into<String>, C: Into<Column>>(
        &mut self,
        name: S,
        column: C,
    ) -> Result<(), ColumnError> {
        let name = name.into();
        let column = column.into();
        let others = self.columns.iter().filter(|(n, _)| *n != name).count();
        if others > 0 && column.len() != self.nrows {
            return Err(ColumnError::RowCount {
                name,
                expected: self.nrows,
                found: column.len(),
            });
        }
        self.nrows = column.len();
        match self.columns.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = column,
            None => self.columns.push((name, column)),
        }
        Ok(())
    }
}

impl Table for ColumnTable {
    fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|(n, _)| n == name).map(|(_, c)| c)
    }

    fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|(n, _)| n.as_str()).collect()
    }

    fn nrows(&self) -> usize {
        self.nrows
    }
}

/// One observation, keyed by column name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    values: HashMap<String, Value>,
}

impl Row {
    pub fn new<S: Into<String>, I: IntoIterator<Item = (S, Value)>>(values: I) -> Row {
        Row {
            values: values.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_count_checked() {
        let err = ColumnTable::from_columns(vec![
            ("a", Column::from(vec![1.0, 2.0])),
            ("b", Column::from(vec![1.0])),
        ])
        .unwrap_err();
        assert_eq!(
            err,
            ColumnError::RowCount {
                name: "b".to_string(),
                expected: 2,
                found: 1
            }
        );
    }

    #[test]
    fn test_unique_levels() {
        let c = Column::from(vec!["q", "p", "q"]);
        assert_eq!(c.unique_levels(), vec!["p", "q"]);
        let c = Column::from(vec![10i64, 2, 10]);
        assert_eq!(c.unique_levels(), vec!["2", "10"]);
        assert_eq!(c.levels_per_row(), vec!["10", "2", "10"]);
    }

    #[test]
    fn test_rows() {
        let t = ColumnTable::from_columns(vec![
            ("x", Column::from(vec![1.5, 2.5])),
            ("g", Column::from(vec!["p", "q"])),
        ])
        .unwrap();
        let row = t.row(1).unwrap();
        assert_eq!(row.get("x"), Some(&Value::Num(2.5)));
        assert_eq!(row.get("g").map(Value::level), Some("q".to_string()));
        assert!(t.row(2).is_none());
    }
}
