//! Serialized, pooled async access to blocking ODBC-style database handles.
//!
//! # Features
//!
//! - **Serial queues**: every raw handle has a FIFO queue so calls never overlap
//! - **Off-scheduler blocking**: raw calls run on Tokio's blocking pool
//! - **Coupled bind/execute**: each execution observes the bind issued for it
//! - **Multi-result queries**: one delivery per result set
//! - **Recycling pool**: closing a pooled connection resets its session and reuses it
//!
//! Every operation comes in three forms: `*_with` takes a completion callback,
//! the bare name is an `async fn`, and `*_sync` blocks the calling thread.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use serial_odbc::{Conn, Driver, Opts};
//!
//! async fn run(driver: Arc<dyn Driver>) -> serial_odbc::Result<()> {
//!     let conn = Conn::connect(driver, "DSN=warehouse;", Opts::default()).await?;
//!
//!     for set in conn.query("SELECT 1 AS num; SELECT 2 AS num", None).await {
//!         let rows: Vec<(i64,)> = set.decode()?;
//!         println!("{rows:?} (more: {})", set.has_more);
//!     }
//!
//!     conn.close().await
//! }
//! ```

pub mod conn;
pub mod cursor;
mod dispatch;
pub mod driver;
pub mod error;
pub mod handler;
pub mod metadata;
pub mod opts;
pub mod pool;
pub mod queue;
pub mod row;
pub mod statement;
pub mod value;

pub use conn::{Conn, ConnState};
pub use cursor::Cursor;
pub use driver::{Driver, RawConnection, RawResult, RawStatement};
pub use error::{DriverError, Error, Result};
pub use handler::{ResultSet, ResultSetHandler};
pub use metadata::DescribeRequest;
pub use opts::{FetchMode, Opts, Target};
pub use pool::{Pool, PoolStatus, PooledConn};
pub use queue::{Done, SerialQueue};
pub use row::{FromRow, Row};
pub use statement::Statement;
pub use value::{FromValue, Value};
