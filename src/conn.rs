//! Serialized connection handle.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::cursor::Cursor;
use crate::dispatch::{Dispatcher, Slot, completion, empty_slot, wait};
use crate::driver::{Driver, RawConnection, RawResult};
use crate::error::{Error, Result};
use crate::handler::{CollectSets, ResultSet, ResultSetHandler};
use crate::opts::{FetchMode, Opts, Target};
use crate::queue::SerialQueue;
use crate::row::Row;
use crate::statement::Statement;
use crate::value::Value;

/// Lifecycle state of a [`Conn`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// No raw session
    Closed,
    /// Raw open in progress
    Opening,
    /// Ready for queries
    Open,
    /// Raw close in progress
    Closing,
}

pub(crate) struct ConnInner {
    driver: Arc<dyn Driver>,
    opts: Opts,
    pub(crate) dispatcher: Dispatcher,
    queue: SerialQueue,
    raw: Slot<Box<dyn RawConnection>>,
    state: Mutex<ConnState>,
    target: Mutex<Option<Target>>,
}

/// A connection whose operations run one at a time, in submission order.
///
/// Cloning yields another reference to the same connection and queue.
#[derive(Clone)]
pub struct Conn {
    pub(crate) inner: Arc<ConnInner>,
}

impl Conn {
    /// Create a closed connection. Must be called inside a Tokio runtime.
    pub fn new(driver: Arc<dyn Driver>, opts: Opts) -> Result<Self> {
        let dispatcher = Dispatcher::current()?;
        Ok(Self::with_dispatcher(driver, opts, dispatcher))
    }

    pub(crate) fn with_dispatcher(
        driver: Arc<dyn Driver>,
        opts: Opts,
        dispatcher: Dispatcher,
    ) -> Self {
        let target = opts.connection.clone();
        Self {
            inner: Arc::new(ConnInner {
                driver,
                opts,
                dispatcher,
                queue: SerialQueue::new(),
                raw: empty_slot(),
                state: Mutex::new(ConnState::Closed),
                target: Mutex::new(target),
            }),
        }
    }

    /// Create a connection and open it.
    pub async fn connect(
        driver: Arc<dyn Driver>,
        target: impl Into<Target>,
        opts: Opts,
    ) -> Result<Self> {
        let conn = Self::new(driver, opts)?;
        conn.open(target).await?;
        Ok(conn)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnState {
        *self.inner.state.lock()
    }

    /// Check if the connection is open.
    pub fn is_open(&self) -> bool {
        self.state() == ConnState::Open
    }

    /// The last target this connection was opened against.
    pub fn target(&self) -> Option<Target> {
        self.inner.target.lock().clone()
    }

    /// Check if two values refer to the same underlying connection.
    pub fn same_handle(&self, other: &Conn) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Number of operations waiting behind the running one.
    pub fn pending(&self) -> usize {
        self.inner.queue.len()
    }

    // === Open / close ===

    /// Open the connection.
    ///
    /// Attribute targets are flattened to `key=value;` before reaching the driver.
    /// On failure the connection stays closed.
    pub fn open_with<F>(&self, target: impl Into<Target>, cb: F)
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        let target = target.into();
        if let Err(e) = self.inner.begin_open(&target) {
            return cb(Err(e));
        }
        let inner = Arc::clone(&self.inner);
        self.inner.dispatcher.blocking(move || {
            let result = inner.establish(&target);
            cb(result);
        });
    }

    /// Open the connection.
    pub async fn open(&self, target: impl Into<Target>) -> Result<()> {
        let (cb, rx) = completion();
        self.open_with(target, cb);
        wait(rx).await
    }

    /// Open the connection on the calling thread.
    pub fn open_sync(&self, target: impl Into<Target>) -> Result<()> {
        let target = target.into();
        self.inner.begin_open(&target)?;
        self.inner.establish(&target)
    }

    /// Queue a close. Closing a connection whose raw handle is already gone succeeds.
    pub fn close_with<F>(&self, cb: F)
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        self.inner.queue.push(move |done| {
            let dispatcher = inner.dispatcher.clone();
            dispatcher.blocking(move || {
                let result = inner.close_raw();
                cb(result);
                done.complete();
            });
        });
    }

    /// Close the connection.
    pub async fn close(&self) -> Result<()> {
        let (cb, rx) = completion();
        self.close_with(cb);
        wait(rx).await
    }

    /// Close the connection on the calling thread.
    pub fn close_sync(&self) -> Result<()> {
        self.inner.close_raw()
    }

    // === Queries ===

    /// Queue a query and deliver every result set it produces.
    ///
    /// The handler is called once per result set. On a connection that is not
    /// open it is called immediately with [`Error::NotOpen`], without queueing.
    /// If the raw handle has dropped by the time the query runs, the connection
    /// is reopened with its last target and the query is issued once more.
    pub fn query_with<H: ResultSetHandler>(
        &self,
        sql: &str,
        params: Option<&[Value]>,
        mut handler: H,
    ) {
        if !self.is_open() {
            handler.result_set(ResultSet::failed(Error::NotOpen));
            handler.finish();
            return;
        }

        let inner = Arc::clone(&self.inner);
        let sql = sql.to_string();
        let params = params.map(<[Value]>::to_vec).unwrap_or_default();
        self.inner.queue.push(move |done| {
            let live = Arc::clone(&inner);
            inner.ensure_live(move |reopened| {
                let dispatcher = live.dispatcher.clone();
                dispatcher.blocking(move || {
                    let mut handler = handler;
                    match reopened {
                        Ok(()) => live.run_query(&sql, &params, &mut handler),
                        Err(e) => handler.result_set(ResultSet::failed(e)),
                    }
                    handler.finish();
                    done.complete();
                });
            });
        });
    }

    /// Run a query and collect every result set.
    pub async fn query(&self, sql: &str, params: Option<&[Value]>) -> Vec<ResultSet> {
        let (cb, rx) = completion();
        self.query_with(sql, params, CollectSets::new(cb));
        rx.await
            .unwrap_or_else(|_| vec![ResultSet::failed(Error::Abandoned)])
    }

    /// Run a query and return the rows of every result set, failing on the first error.
    pub async fn query_collect(&self, sql: &str, params: Option<&[Value]>) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        for set in self.query(sql, params).await {
            rows.extend(set.into_result()?);
        }
        Ok(rows)
    }

    /// Queue a query and hand back its first result set as a [`Cursor`].
    pub fn query_result_with<F>(&self, sql: &str, params: Option<&[Value]>, cb: F)
    where
        F: FnOnce(Result<Cursor>) + Send + 'static,
    {
        if !self.is_open() {
            return cb(Err(Error::NotOpen));
        }
        let sql = sql.to_string();
        let params = params.map(<[Value]>::to_vec).unwrap_or_default();
        let fetch_mode = self.inner.opts.fetch_mode;
        let dispatcher = self.inner.dispatcher.clone();
        self.submit(
            move |raw| raw.query(&sql, &params),
            move |result| cb(result.map(|raw| Cursor::new(raw, fetch_mode, dispatcher))),
        );
    }

    /// Run a query and return a cursor over its first result set.
    pub async fn query_result(&self, sql: &str, params: Option<&[Value]>) -> Result<Cursor> {
        let (cb, rx) = completion();
        self.query_result_with(sql, params, cb);
        wait(rx).await
    }

    /// Run a query on the calling thread and return the rows of its first result set.
    pub fn query_sync(&self, sql: &str, params: Option<&[Value]>) -> Result<Vec<Row>> {
        if !self.is_open() {
            return Err(Error::NotOpen);
        }
        let fetch_mode = self.inner.opts.fetch_mode;
        self.with_raw_sync(|raw| {
            let result = raw.query(sql, params.unwrap_or_default())?;
            collect_rows(result, fetch_mode)
        })
    }

    /// Run a query on the calling thread and return a cursor.
    pub fn query_result_sync(&self, sql: &str, params: Option<&[Value]>) -> Result<Cursor> {
        if !self.is_open() {
            return Err(Error::NotOpen);
        }
        let raw = self.with_raw_sync(|raw| raw.query(sql, params.unwrap_or_default()))?;
        Ok(Cursor::new(
            raw,
            self.inner.opts.fetch_mode,
            self.inner.dispatcher.clone(),
        ))
    }

    // === Transactions ===

    /// Queue the start of a transaction.
    pub fn begin_transaction_with<F>(&self, cb: F)
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        self.submit(|raw| raw.begin_transaction(), cb);
    }

    /// Queue the end of a transaction, rolling back when `rollback` is true.
    pub fn end_transaction_with<F>(&self, rollback: bool, cb: F)
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        self.submit(move |raw| raw.end_transaction(rollback), cb);
    }

    /// Queue a commit.
    pub fn commit_transaction_with<F>(&self, cb: F)
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        self.end_transaction_with(false, cb);
    }

    /// Queue a rollback.
    pub fn rollback_transaction_with<F>(&self, cb: F)
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        self.end_transaction_with(true, cb);
    }

    /// Start a transaction.
    pub async fn begin_transaction(&self) -> Result<()> {
        let (cb, rx) = completion();
        self.begin_transaction_with(cb);
        wait(rx).await
    }

    /// End a transaction, rolling back when `rollback` is true.
    pub async fn end_transaction(&self, rollback: bool) -> Result<()> {
        let (cb, rx) = completion();
        self.end_transaction_with(rollback, cb);
        wait(rx).await
    }

    /// Commit the current transaction.
    pub async fn commit_transaction(&self) -> Result<()> {
        self.end_transaction(false).await
    }

    /// Roll back the current transaction.
    pub async fn rollback_transaction(&self) -> Result<()> {
        self.end_transaction(true).await
    }

    /// Start a transaction on the calling thread.
    pub fn begin_transaction_sync(&self) -> Result<()> {
        self.with_raw_sync(|raw| raw.begin_transaction())
    }

    /// End a transaction on the calling thread.
    pub fn end_transaction_sync(&self, rollback: bool) -> Result<()> {
        self.with_raw_sync(|raw| raw.end_transaction(rollback))
    }

    /// Commit on the calling thread.
    pub fn commit_transaction_sync(&self) -> Result<()> {
        self.end_transaction_sync(false)
    }

    /// Roll back on the calling thread.
    pub fn rollback_transaction_sync(&self) -> Result<()> {
        self.end_transaction_sync(true)
    }

    // === Prepared statements ===

    /// Allocate a statement on this connection's queue, then prepare `sql` on the
    /// statement's own queue.
    pub fn prepare_with<F>(&self, sql: &str, cb: F)
    where
        F: FnOnce(Result<Statement>) + Send + 'static,
    {
        let sql = sql.to_string();
        let fetch_mode = self.inner.opts.fetch_mode;
        let dispatcher = self.inner.dispatcher.clone();
        self.submit(
            |raw| raw.create_statement(),
            move |created| match created {
                Ok(raw) => {
                    let stmt = Statement::new(raw, fetch_mode, dispatcher);
                    let ready = stmt.clone();
                    stmt.prepare_with(&sql, move |result| cb(result.map(|()| ready)));
                }
                Err(e) => cb(Err(e)),
            },
        );
    }

    /// Create and prepare a statement.
    pub async fn prepare(&self, sql: &str) -> Result<Statement> {
        let (cb, rx) = completion();
        self.prepare_with(sql, cb);
        wait(rx).await
    }

    /// Create and prepare a statement on the calling thread.
    pub fn prepare_sync(&self, sql: &str) -> Result<Statement> {
        let raw = self.with_raw_sync(|raw| raw.create_statement())?;
        let stmt = Statement::new(
            raw,
            self.inner.opts.fetch_mode,
            self.inner.dispatcher.clone(),
        );
        stmt.prepare_sync(sql)?;
        Ok(stmt)
    }

    // === Internals ===

    /// Queue `op` against the raw handle and report its result through `cb`.
    pub(crate) fn submit<T, Op, F>(&self, op: Op, cb: F)
    where
        T: Send + 'static,
        Op: FnOnce(&mut dyn RawConnection) -> Result<T> + Send + 'static,
        F: FnOnce(Result<T>) + Send + 'static,
    {
        let raw = Arc::clone(&self.inner.raw);
        let dispatcher = self.inner.dispatcher.clone();
        self.inner.queue.push(move |done| {
            dispatcher.blocking(move || {
                let result = match raw.lock().as_mut() {
                    Some(raw) => op(raw.as_mut()),
                    None => Err(Error::NotOpen),
                };
                cb(result);
                done.complete();
            });
        });
    }

    fn with_raw_sync<T>(&self, op: impl FnOnce(&mut dyn RawConnection) -> Result<T>) -> Result<T> {
        match self.inner.raw.lock().as_mut() {
            Some(raw) => op(raw.as_mut()),
            None => Err(Error::NotOpen),
        }
    }

    pub(crate) fn fetch_mode(&self) -> Option<FetchMode> {
        self.inner.opts.fetch_mode
    }
}

impl ConnInner {
    fn begin_open(&self, target: &Target) -> Result<()> {
        {
            let mut state = self.state.lock();
            if *state != ConnState::Closed {
                return Err(Error::InvalidUsage(format!(
                    "cannot open a connection in state {:?}",
                    *state
                )));
            }
            *state = ConnState::Opening;
        }
        *self.target.lock() = Some(target.clone());
        Ok(())
    }

    /// Allocate, configure and open a raw handle, then install it.
    fn establish(&self, target: &Target) -> Result<()> {
        let descriptor = target.descriptor();
        match open_raw(self.driver.as_ref(), &self.opts, &descriptor) {
            Ok(raw) => {
                *self.raw.lock() = Some(raw);
                *self.state.lock() = ConnState::Open;
                tracing::debug!("connection opened");
                Ok(())
            }
            Err(e) => {
                *self.state.lock() = ConnState::Closed;
                tracing::debug!(error = %e, "connection open failed");
                Err(e)
            }
        }
    }

    fn close_raw(&self) -> Result<()> {
        let Some(mut raw) = self.raw.lock().take() else {
            *self.state.lock() = ConnState::Closed;
            return Ok(());
        };
        *self.state.lock() = ConnState::Closing;
        let result = raw.close();
        *self.state.lock() = ConnState::Closed;
        tracing::debug!(ok = result.is_ok(), "connection closed");
        result
    }

    /// Call `then` once a live raw handle is installed, reopening a dropped one first.
    ///
    /// Runs inside a queued task, so the reopen holds the queue until it settles.
    /// A failed reopen leaves the connection `Closed`.
    fn ensure_live<F>(self: &Arc<Self>, then: F)
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        let alive = self.raw.lock().as_ref().is_some_and(|raw| raw.is_connected());
        if alive {
            return then(Ok(()));
        }

        tracing::warn!("cannot query closed connection, re-opening");
        drop(self.raw.lock().take());
        let Some(target) = self.target.lock().clone() else {
            *self.state.lock() = ConnState::Closed;
            return then(Err(Error::ReconnectFailure(Box::new(Error::NotOpen))));
        };
        // State stays `Open` so queries submitted meanwhile queue behind the reopen.

        let inner = Arc::clone(self);
        self.dispatcher.blocking(move || {
            let result = inner
                .establish(&target)
                .map_err(|e| Error::ReconnectFailure(Box::new(e)));
            then(result);
        });
    }

    fn run_query<H: ResultSetHandler>(&self, sql: &str, params: &[Value], handler: &mut H) {
        // The guard must be gone before any handler call.
        let issued = match self.raw.lock().as_mut() {
            Some(raw) => raw.query(sql, params),
            None => Err(Error::NotOpen),
        };
        match issued {
            Ok(result) => drain_result_sets(result, self.opts.fetch_mode, handler),
            Err(e) => handler.result_set(ResultSet::failed(e)),
        }
    }
}

fn open_raw(driver: &dyn Driver, opts: &Opts, descriptor: &str) -> Result<Box<dyn RawConnection>> {
    let mut raw = driver.create_connection()?;
    if let Some(timeout) = opts.connect_timeout {
        raw.set_connect_timeout(timeout);
    }
    if let Some(timeout) = opts.login_timeout {
        raw.set_login_timeout(timeout);
    }
    raw.open(descriptor)?;
    Ok(raw)
}

/// Fetch all rows of the current result set and release the result.
pub(crate) fn collect_rows(
    mut result: Box<dyn RawResult>,
    fetch_mode: Option<FetchMode>,
) -> Result<Vec<Row>> {
    if let Some(mode) = fetch_mode {
        result.set_fetch_mode(mode);
    }
    let rows = result.fetch_all();
    close_result(result.as_mut());
    rows
}

fn close_result(result: &mut dyn RawResult) {
    if let Err(e) = result.close() {
        tracing::warn!(error = %e, "failed to close result");
    }
}

/// Deliver every result set of `result` to `handler`.
///
/// A failing check for the next set is treated as "more results" and its
/// error is delivered, with empty rows, on the following check; checking
/// continues until one succeeds. The result is closed once a check reports
/// that nothing remains.
fn drain_result_sets<H: ResultSetHandler>(
    mut result: Box<dyn RawResult>,
    fetch_mode: Option<FetchMode>,
    handler: &mut H,
) {
    loop {
        if let Some(mode) = fetch_mode {
            result.set_fetch_mode(mode);
        }
        let (rows, fetch_error) = match result.fetch_all() {
            Ok(rows) => (rows, None),
            Err(e) => (Vec::new(), Some(e)),
        };

        let (mut more, mut next_set_error) = match result.more_results() {
            Ok(more) => (more, None),
            Err(e) => (true, Some(e)),
        };
        if !more {
            close_result(result.as_mut());
        }
        handler.result_set(ResultSet {
            error: fetch_error,
            rows,
            has_more: more,
        });

        while let Some(pending) = next_set_error.take() {
            match result.more_results() {
                Ok(next) => {
                    more = next;
                    if !more {
                        close_result(result.as_mut());
                    }
                    handler.result_set(ResultSet {
                        error: Some(pending),
                        rows: Vec::new(),
                        has_more: more,
                    });
                }
                Err(e) => {
                    handler.result_set(ResultSet {
                        error: Some(pending),
                        rows: Vec::new(),
                        has_more: more,
                    });
                    next_set_error = Some(e);
                }
            }
        }

        if !more {
            break;
        }
    }
}

impl std::fmt::Debug for Conn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conn")
            .field("state", &self.state())
            .field("target", &self.target())
            .field("queue", &self.inner.queue)
            .finish()
    }
}
