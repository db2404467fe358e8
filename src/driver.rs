//! Raw-handle traits implemented by a driver binding.
//!
//! Every method is blocking and may only be called by one caller at a time.
//! The wrappers in this crate guarantee that: each raw handle sits behind a
//! [`SerialQueue`](crate::queue::SerialQueue) and blocking calls are moved off
//! the async scheduler.

use std::time::Duration;

use crate::error::Result;
use crate::opts::FetchMode;
use crate::row::Row;
use crate::value::Value;

/// Factory for raw connections.
pub trait Driver: Send + Sync + 'static {
    /// Allocate a new, unopened raw connection.
    fn create_connection(&self) -> Result<Box<dyn RawConnection>>;
}

/// A raw connection handle.
pub trait RawConnection: Send {
    /// Set the connect timeout. Called before [`RawConnection::open`].
    fn set_connect_timeout(&mut self, timeout: Duration);

    /// Set the login timeout. Called before [`RawConnection::open`].
    fn set_login_timeout(&mut self, timeout: Duration);

    /// Open the connection using a flat descriptor.
    fn open(&mut self, descriptor: &str) -> Result<()>;

    /// Close the connection, discarding session-local state.
    fn close(&mut self) -> Result<()>;

    /// Whether the handle still has a live session.
    ///
    /// A handle that returns false is discarded and reopened before the next query.
    fn is_connected(&self) -> bool {
        true
    }

    /// Execute a query. `params` is empty when none were supplied.
    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Box<dyn RawResult>>;

    /// Allocate a statement handle on this connection.
    fn create_statement(&mut self) -> Result<Box<dyn RawStatement>>;

    /// Turn off autocommit and start a transaction.
    fn begin_transaction(&mut self) -> Result<()>;

    /// Commit (`rollback == false`) or roll back the current transaction.
    fn end_transaction(&mut self, rollback: bool) -> Result<()>;

    /// Enumerate columns matching the filters.
    fn columns(
        &mut self,
        catalog: Option<&str>,
        schema: Option<&str>,
        table: Option<&str>,
        column: Option<&str>,
    ) -> Result<Box<dyn RawResult>>;

    /// Enumerate tables matching the filters.
    fn tables(
        &mut self,
        catalog: Option<&str>,
        schema: Option<&str>,
        table: Option<&str>,
        table_type: Option<&str>,
    ) -> Result<Box<dyn RawResult>>;
}

/// A raw prepared-statement handle.
pub trait RawStatement: Send {
    /// Prepare SQL text for later execution.
    fn prepare(&mut self, sql: &str) -> Result<()>;

    /// Bind parameters for the next execution.
    fn bind(&mut self, params: &[Value]) -> Result<()>;

    /// Execute the prepared statement.
    fn execute(&mut self) -> Result<Box<dyn RawResult>>;

    /// Execute SQL text without a separate prepare step.
    fn execute_direct(&mut self, sql: &str) -> Result<Box<dyn RawResult>>;

    /// Execute the prepared statement and return the affected row count.
    fn execute_non_query(&mut self) -> Result<u64>;
}

/// A raw result handle positioned on one result set.
pub trait RawResult: Send {
    /// Select how rows are materialized.
    fn set_fetch_mode(&mut self, mode: FetchMode) {
        let _ = mode;
    }

    /// Fetch the next row of the current result set.
    fn fetch(&mut self) -> Result<Option<Row>>;

    /// Fetch every remaining row of the current result set.
    fn fetch_all(&mut self) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        while let Some(row) = self.fetch()? {
            rows.push(row);
        }
        Ok(rows)
    }

    /// Advance to the next result set, returning false when none remains.
    fn more_results(&mut self) -> Result<bool>;

    /// Release the result.
    fn close(&mut self) -> Result<()>;
}
