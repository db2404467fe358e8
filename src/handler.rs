//! Result-set handlers for multi-result queries.

use crate::error::{Error, Result};
use crate::row::{FromRow, Row};

/// One delivery of the multi-result-set loop.
///
/// A query producing N result sets yields N deliveries; `has_more` is false
/// only on the last. `error` and `rows` are independent: a failing check for
/// the next result set never discards rows already fetched.
#[derive(Debug)]
pub struct ResultSet {
    /// Error seen while producing this delivery
    pub error: Option<Error>,
    /// Rows of this result set (empty for error-only deliveries)
    pub rows: Vec<Row>,
    /// Whether another delivery follows
    pub has_more: bool,
}

impl ResultSet {
    pub(crate) fn failed(error: Error) -> Self {
        Self {
            error: Some(error),
            rows: Vec::new(),
            has_more: false,
        }
    }

    /// Rows if no error was reported.
    pub fn into_result(self) -> Result<Vec<Row>> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.rows),
        }
    }

    /// Decode every row.
    pub fn decode<T: for<'a> FromRow<'a>>(&self) -> Result<Vec<T>> {
        self.rows.iter().map(T::from_row).collect()
    }
}

/// Receiver for result-set deliveries.
///
/// Called once per result set, in order, from the thread that ran the query.
pub trait ResultSetHandler: Send + 'static {
    /// Called for each delivery.
    fn result_set(&mut self, set: ResultSet);

    /// Called once after the final delivery.
    fn finish(&mut self) {}
}

impl<F> ResultSetHandler for F
where
    F: FnMut(ResultSet) + Send + 'static,
{
    fn result_set(&mut self, set: ResultSet) {
        self(set)
    }
}

/// Handler that collects every delivery and hands them over when the query finishes.
pub(crate) struct CollectSets<C: FnOnce(Vec<ResultSet>) + Send + 'static> {
    sets: Vec<ResultSet>,
    on_finish: Option<C>,
}

impl<C: FnOnce(Vec<ResultSet>) + Send + 'static> CollectSets<C> {
    pub(crate) fn new(on_finish: C) -> Self {
        Self {
            sets: Vec::new(),
            on_finish: Some(on_finish),
        }
    }
}

impl<C: FnOnce(Vec<ResultSet>) + Send + 'static> ResultSetHandler for CollectSets<C> {
    fn result_set(&mut self, set: ResultSet) {
        self.sets.push(set);
    }

    fn finish(&mut self) {
        if let Some(cb) = self.on_finish.take() {
            cb(std::mem::take(&mut self.sets));
        }
    }
}
