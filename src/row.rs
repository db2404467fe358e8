//! Rows and typed row decoding.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::value::{FromValue, Value};

/// One row of a result set.
///
/// Column names are shared between all rows of the same result set.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl Row {
    /// Create a row from shared column names and its values.
    pub fn new(columns: Arc<[String]>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    /// Column names, in result order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Raw values, in result order.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if the row has no columns.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value at a column index.
    pub fn value(&self, idx: usize) -> Option<&Value> {
        self.values.get(idx)
    }

    /// Value for a column name. The first matching column wins.
    pub fn value_by_name(&self, name: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == name)
            .and_then(|idx| self.values.get(idx))
    }

    /// Decode the column at `idx`.
    pub fn get<'a, T: FromValue<'a>>(&'a self, idx: usize) -> Result<T> {
        let value = self
            .values
            .get(idx)
            .ok_or_else(|| Error::Decode(format!("column index out of range: {}", idx)))?;
        T::decode(value)
    }

    /// Decode the column named `name`.
    pub fn get_by_name<'a, T: FromValue<'a>>(&'a self, name: &str) -> Result<T> {
        let value = self
            .value_by_name(name)
            .ok_or_else(|| Error::Decode(format!("no such column: {}", name)))?;
        T::decode(value)
    }

    /// Consume the row into `(column, value)` pairs.
    pub fn into_pairs(self) -> Vec<(String, Value)> {
        self.columns.iter().cloned().zip(self.values).collect()
    }
}

/// Trait for decoding a [`Row`] into a Rust type.
pub trait FromRow<'a>: Sized {
    /// Decode a row.
    fn from_row(row: &'a Row) -> Result<Self>;
}

impl<'a> FromRow<'a> for &'a Row {
    fn from_row(row: &'a Row) -> Result<Self> {
        Ok(row)
    }
}

macro_rules! impl_from_row_tuple {
    ($len:expr; $($t:ident => $idx:tt),+) => {
        impl<'a, $($t: FromValue<'a>),+> FromRow<'a> for ($($t,)+) {
            fn from_row(row: &'a Row) -> Result<Self> {
                if row.len() < $len {
                    return Err(Error::Decode("not enough columns for tuple".into()));
                }
                Ok(($($t::decode(&row.values[$idx])?,)+))
            }
        }
    };
}

impl_from_row_tuple!(1; T1 => 0);
impl_from_row_tuple!(2; T1 => 0, T2 => 1);
impl_from_row_tuple!(3; T1 => 0, T2 => 1, T3 => 2);
impl_from_row_tuple!(4; T1 => 0, T2 => 1, T3 => 2, T4 => 3);
impl_from_row_tuple!(5; T1 => 0, T2 => 1, T3 => 2, T4 => 3, T5 => 4);
