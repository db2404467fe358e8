//! Prepared statements with coupled bind and execute queues.
//!
//! Every raw call on a statement runs on its execute-queue. Standalone binds are
//! additionally ordered on a bind-queue: a bind parks after its raw bind completes
//! and the bind-queue only advances when the next execution completes. A bind
//! released that way is placed ahead of the executions still pending, so
//! alternating `bind, execute, bind, execute` calls run in lockstep. Executions
//! queued back to back without a bind between them observe whichever bind ran
//! last. An execution carrying its own parameters binds them on the execute-queue,
//! immediately before it runs, and never waits on the bind-queue.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::cursor::Cursor;
use crate::dispatch::{Dispatcher, completion, wait};
use crate::driver::{RawResult, RawStatement};
use crate::error::Result;
use crate::opts::FetchMode;
use crate::queue::{Done, SerialQueue};
use crate::value::Value;

struct StatementInner {
    raw: Arc<Mutex<Box<dyn RawStatement>>>,
    execute_queue: SerialQueue,
    bind_queue: SerialQueue,
    parked_bind: Mutex<Option<Done>>,
    fetch_mode: Option<FetchMode>,
    dispatcher: Dispatcher,
}

/// A statement handle owned by one connection.
///
/// Cloning yields another reference to the same statement and queues.
#[derive(Clone)]
pub struct Statement {
    inner: Arc<StatementInner>,
}

impl Statement {
    pub(crate) fn new(
        raw: Box<dyn RawStatement>,
        fetch_mode: Option<FetchMode>,
        dispatcher: Dispatcher,
    ) -> Self {
        Self {
            inner: Arc::new(StatementInner {
                raw: Arc::new(Mutex::new(raw)),
                execute_queue: SerialQueue::new(),
                bind_queue: SerialQueue::new(),
                parked_bind: Mutex::new(None),
                fetch_mode,
                dispatcher,
            }),
        }
    }

    fn cursor(&self, raw: Box<dyn RawResult>) -> Cursor {
        Cursor::new(raw, self.inner.fetch_mode, self.inner.dispatcher.clone())
    }

    // === Prepare ===

    /// Queue a prepare.
    pub fn prepare_with<F>(&self, sql: &str, cb: F)
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        let sql = sql.to_string();
        self.run(false, move |raw| raw.prepare(&sql), cb);
    }

    /// Prepare SQL text.
    pub async fn prepare(&self, sql: &str) -> Result<()> {
        let (cb, rx) = completion();
        self.prepare_with(sql, cb);
        wait(rx).await
    }

    /// Prepare SQL text on the calling thread.
    pub fn prepare_sync(&self, sql: &str) -> Result<()> {
        self.inner.raw.lock().prepare(sql)
    }

    // === Bind ===

    /// Queue a bind that stays parked until the next execution completes.
    pub fn bind_with<F>(&self, params: &[Value], cb: F)
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        let params = params.to_vec();
        let stmt = self.clone();
        self.inner.bind_queue.push(move |bind_done| {
            let front = bind_done.deferred();
            let owner = stmt.clone();
            stmt.run(front, move |raw| raw.bind(&params), move |result| {
                owner.park(bind_done);
                cb(result);
            });
        });
    }

    /// Bind parameters for the next execution.
    pub async fn bind(&self, params: &[Value]) -> Result<()> {
        let (cb, rx) = completion();
        self.bind_with(params, cb);
        wait(rx).await
    }

    /// Bind parameters on the calling thread.
    pub fn bind_sync(&self, params: &[Value]) -> Result<()> {
        self.inner.raw.lock().bind(params)
    }

    // === Execute ===

    /// Queue an execution, binding `params` first when given.
    pub fn execute_with<F>(&self, params: Option<&[Value]>, cb: F)
    where
        F: FnOnce(Result<Cursor>) + Send + 'static,
    {
        let stmt = self.clone();
        self.execution(
            params,
            |raw| raw.execute(),
            move |result| cb(result.map(|raw| stmt.cursor(raw))),
        );
    }

    /// Execute, binding `params` first when given.
    pub async fn execute(&self, params: Option<&[Value]>) -> Result<Cursor> {
        let (cb, rx) = completion();
        self.execute_with(params, cb);
        wait(rx).await
    }

    /// Execute on the calling thread.
    pub fn execute_sync(&self, params: Option<&[Value]>) -> Result<Cursor> {
        let raw = {
            let mut raw = self.inner.raw.lock();
            if let Some(params) = params {
                raw.bind(params)?;
            }
            raw.execute()?
        };
        Ok(self.cursor(raw))
    }

    /// Queue an execution that produces no result set, binding `params` first when given.
    ///
    /// Reports the affected row count.
    pub fn execute_non_query_with<F>(&self, params: Option<&[Value]>, cb: F)
    where
        F: FnOnce(Result<u64>) + Send + 'static,
    {
        self.execution(params, |raw| raw.execute_non_query(), cb);
    }

    /// Execute without a result set and return the affected row count.
    pub async fn execute_non_query(&self, params: Option<&[Value]>) -> Result<u64> {
        let (cb, rx) = completion();
        self.execute_non_query_with(params, cb);
        wait(rx).await
    }

    /// Execute without a result set on the calling thread.
    pub fn execute_non_query_sync(&self, params: Option<&[Value]>) -> Result<u64> {
        let mut raw = self.inner.raw.lock();
        if let Some(params) = params {
            raw.bind(params)?;
        }
        raw.execute_non_query()
    }

    /// Queue execution of SQL text, bypassing prepare and bind.
    pub fn execute_direct_with<F>(&self, sql: &str, cb: F)
    where
        F: FnOnce(Result<Cursor>) + Send + 'static,
    {
        let sql = sql.to_string();
        let stmt = self.clone();
        self.run(
            false,
            move |raw| raw.execute_direct(&sql),
            move |result| cb(result.map(|raw| stmt.cursor(raw))),
        );
    }

    /// Execute SQL text, bypassing prepare and bind.
    pub async fn execute_direct(&self, sql: &str) -> Result<Cursor> {
        let (cb, rx) = completion();
        self.execute_direct_with(sql, cb);
        wait(rx).await
    }

    /// Execute SQL text on the calling thread.
    pub fn execute_direct_sync(&self, sql: &str) -> Result<Cursor> {
        let raw = self.inner.raw.lock().execute_direct(sql)?;
        Ok(self.cursor(raw))
    }

    // === Internals ===

    /// Bind-then-execute pairing shared by `execute` and `execute_non_query`.
    fn execution<T, Op, F>(&self, params: Option<&[Value]>, op: Op, cb: F)
    where
        T: Send + 'static,
        Op: FnOnce(&mut dyn RawStatement) -> Result<T> + Send + 'static,
        F: FnOnce(Result<T>) + Send + 'static,
    {
        match params.map(<[Value]>::to_vec) {
            Some(params) => self.run_execution(
                move |raw| {
                    raw.bind(&params)?;
                    op(raw)
                },
                cb,
            ),
            None => self.run_execution(op, cb),
        }
    }

    /// Queue an execution whose completion releases the parked bind.
    fn run_execution<T, Op, F>(&self, op: Op, cb: F)
    where
        T: Send + 'static,
        Op: FnOnce(&mut dyn RawStatement) -> Result<T> + Send + 'static,
        F: FnOnce(Result<T>) + Send + 'static,
    {
        let stmt = self.clone();
        self.run(false, op, move |result| {
            cb(result);
            stmt.release_parked_bind();
        });
    }

    /// Queue a raw call on the execute-queue. `cb` runs before the queue advances.
    fn run<T, Op, F>(&self, front: bool, op: Op, cb: F)
    where
        T: Send + 'static,
        Op: FnOnce(&mut dyn RawStatement) -> Result<T> + Send + 'static,
        F: FnOnce(Result<T>) + Send + 'static,
    {
        let raw = Arc::clone(&self.inner.raw);
        let dispatcher = self.inner.dispatcher.clone();
        let task = move |done: Done| {
            dispatcher.blocking(move || {
                let result = {
                    let mut guard = raw.lock();
                    op(&mut **guard)
                };
                cb(result);
                done.complete();
            });
        };
        if front {
            self.inner.execute_queue.push_front(task);
        } else {
            self.inner.execute_queue.push(task);
        }
    }

    fn park(&self, bind_done: Done) {
        *self.inner.parked_bind.lock() = Some(bind_done);
    }

    fn release_parked_bind(&self) {
        let parked = self.inner.parked_bind.lock().take();
        if let Some(bind_done) = parked {
            bind_done.complete();
        }
    }
}

impl std::fmt::Debug for Statement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Statement")
            .field("execute_queue", &self.inner.execute_queue)
            .field("bind_queue", &self.inner.bind_queue)
            .finish()
    }
}
