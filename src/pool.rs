//! Target-keyed connection pool with recycle-on-close.
//!
//! Closing a [`PooledConn`] reports success to the caller right away, then
//! really closes the raw session (dropping temp tables and other session
//! state), reopens it against the same target and files it under `available`
//! for the next [`Pool::open`]. The pool does not cap how many connections a
//! target may have.
//!
//! Draining the pool closes every handle in `available` and `in_use`; a handle
//! being recycled counts as in use until its reopen settles.

use std::collections::{HashMap, VecDeque};
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::conn::Conn;
use crate::dispatch::{Dispatcher, completion, wait};
use crate::driver::Driver;
use crate::error::{Error, Result};
use crate::opts::{Opts, Target};

#[derive(Default)]
struct PoolState {
    available: HashMap<String, VecDeque<Conn>>,
    in_use: HashMap<String, Vec<Conn>>,
    drained: bool,
}

struct PoolInner {
    driver: Arc<dyn Driver>,
    opts: Opts,
    dispatcher: Dispatcher,
    state: Mutex<PoolState>,
}

/// Counts for one target, or for the whole pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStatus {
    /// Open connections waiting for a checkout.
    pub available: usize,
    /// Connections handed out and not yet closed.
    pub in_use: usize,
}

impl PoolStatus {
    /// Total tracked connections.
    pub fn total(&self) -> usize {
        self.available + self.in_use
    }
}

/// A pool of connections keyed by target descriptor.
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

impl Pool {
    /// Create an empty pool. Must be called inside a Tokio runtime.
    pub fn new(driver: Arc<dyn Driver>, opts: Opts) -> Result<Self> {
        Ok(Self {
            inner: Arc::new(PoolInner {
                driver,
                opts,
                dispatcher: Dispatcher::current()?,
                state: Mutex::new(PoolState::default()),
            }),
        })
    }

    /// Check out a connection for `target`.
    ///
    /// An available connection is handed out immediately without connecting;
    /// otherwise a new connection is opened.
    pub fn open_with<F>(&self, target: impl Into<Target>, cb: F)
    where
        F: FnOnce(Result<PooledConn>) + Send + 'static,
    {
        let target = target.into();
        let key = target.descriptor();

        let checkout = {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            if state.drained {
                Err(Error::PoolClosed)
            } else {
                let reused = state.available.get_mut(&key).and_then(VecDeque::pop_front);
                if let Some(conn) = &reused {
                    state.in_use.entry(key.clone()).or_default().push(conn.clone());
                }
                Ok(reused)
            }
        };
        let reused = match checkout {
            Ok(reused) => reused,
            Err(e) => return cb(Err(e)),
        };

        if let Some(conn) = reused {
            tracing::debug!(target = %key, "reusing pooled connection");
            return cb(Ok(PooledConn::new(conn, target, &self.inner)));
        }

        tracing::debug!(target = %key, "opening new pooled connection");
        let conn = Conn::with_dispatcher(
            Arc::clone(&self.inner.driver),
            self.inner.opts.clone(),
            self.inner.dispatcher.clone(),
        );
        let inner = Arc::clone(&self.inner);
        let opening = conn.clone();
        opening.open_with(target.clone(), move |opened| {
            if let Err(e) = opened {
                return cb(Err(e));
            }
            {
                let mut state = inner.state.lock();
                if !state.drained {
                    state.in_use.entry(key).or_default().push(conn.clone());
                    drop(state);
                    return cb(Ok(PooledConn::new(conn, target, &inner)));
                }
            }
            conn.close_with(|_| {});
            cb(Err(Error::PoolClosed));
        });
    }

    /// Check out a connection for `target`.
    pub async fn open(&self, target: impl Into<Target>) -> Result<PooledConn> {
        let (cb, rx) = completion();
        self.open_with(target, cb);
        wait(rx).await
    }

    /// Close every connection after the grace delay.
    ///
    /// `cb` fires once each close has settled, with the first failure if any.
    /// A failing close does not stop the others.
    pub fn close_with<F>(&self, cb: F)
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tracing::debug!(grace = ?self.inner.opts.pool_close_grace, "pool close requested");
        self.inner
            .dispatcher
            .after(self.inner.opts.pool_close_grace, move || inner.drain(cb));
    }

    /// Close every connection after the grace delay.
    pub async fn close(&self) -> Result<()> {
        let (cb, rx) = completion();
        self.close_with(cb);
        wait(rx).await
    }

    /// Counts for one target.
    pub fn status(&self, target: impl Into<Target>) -> PoolStatus {
        let key = target.into().descriptor();
        let state = self.inner.state.lock();
        PoolStatus {
            available: state.available.get(&key).map_or(0, VecDeque::len),
            in_use: state.in_use.get(&key).map_or(0, Vec::len),
        }
    }

    /// Counts across every target.
    pub fn totals(&self) -> PoolStatus {
        let state = self.inner.state.lock();
        PoolStatus {
            available: state.available.values().map(VecDeque::len).sum(),
            in_use: state.in_use.values().map(Vec::len).sum(),
        }
    }

    /// Check if the pool has been drained.
    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().drained
    }
}

impl PoolInner {
    fn drain<F>(&self, cb: F)
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        let conns: Vec<(String, Conn)> = {
            let mut state = self.state.lock();
            state.drained = true;
            let mut merged: HashMap<String, Vec<Conn>> = HashMap::new();
            for (key, conns) in state.available.drain() {
                merged.entry(key).or_default().extend(conns);
            }
            for (key, conns) in state.in_use.drain() {
                merged.entry(key).or_default().extend(conns);
            }
            merged
                .into_iter()
                .flat_map(|(key, conns)| conns.into_iter().map(move |c| (key.clone(), c)))
                .collect()
        };

        tracing::debug!(connections = conns.len(), "draining pool");
        if conns.is_empty() {
            return cb(Ok(()));
        }

        let remaining = Arc::new(AtomicUsize::new(conns.len()));
        let first_error: Arc<Mutex<Option<Error>>> = Arc::new(Mutex::new(None));
        let cb = Arc::new(Mutex::new(Some(cb)));
        for (key, conn) in conns {
            let remaining = Arc::clone(&remaining);
            let first_error = Arc::clone(&first_error);
            let cb = Arc::clone(&cb);
            conn.close_with(move |closed| {
                if let Err(e) = closed {
                    tracing::warn!(target = %key, error = %e, "failed to close pooled connection");
                    first_error.lock().get_or_insert(e);
                }
                if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                    let outcome = first_error.lock().take().map_or(Ok(()), Err);
                    if let Some(cb) = cb.lock().take() {
                        cb(outcome);
                    }
                }
            });
        }
    }

    /// Real close, reopen, then return to `available`.
    ///
    /// The reopen runs inside the close's completion, before the connection's
    /// queue advances, and the handle stays in `in_use` until it settles. A
    /// drain that starts meanwhile takes the handle from `in_use` and its queued
    /// close runs only after the reopen, so it closes the fresh session.
    fn recycle(self: &Arc<Self>, conn: Conn, target: Target) {
        let inner = Arc::clone(self);
        let closing = conn.clone();
        closing.close_with(move |closed| {
            let key = target.descriptor();
            if let Err(e) = closed {
                tracing::warn!(target = %key, error = %e, "error closing pooled connection");
            }
            if inner.state.lock().drained {
                return;
            }

            let reopened = conn.open_sync(target);
            let mut state = inner.state.lock();
            if let Some(list) = state.in_use.get_mut(&key) {
                list.retain(|c| !c.same_handle(&conn));
            }
            match reopened {
                Ok(()) if !state.drained => {
                    state.available.entry(key).or_default().push_back(conn);
                }
                Ok(()) => {}
                Err(e) => {
                    drop(state);
                    tracing::error!(target = %key, error = %e, "failed to reopen pooled connection");
                }
            }
        });
    }

    fn detach(&self, conn: &Conn, key: &str) {
        if let Some(list) = self.state.lock().in_use.get_mut(key) {
            list.retain(|c| !c.same_handle(conn));
        }
    }
}

/// A connection checked out of a [`Pool`].
///
/// Closing it, or dropping it, recycles the connection into the pool.
pub struct PooledConn {
    conn: Conn,
    target: Target,
    pool: Arc<PoolInner>,
    returned: bool,
}

impl PooledConn {
    fn new(conn: Conn, target: Target, pool: &Arc<PoolInner>) -> Self {
        Self {
            conn,
            target,
            pool: Arc::clone(pool),
            returned: false,
        }
    }

    /// Report the connection closed, then recycle it in the background.
    pub fn close_with<F>(mut self, cb: F)
    where
        F: FnOnce(Result<()>),
    {
        cb(Ok(()));
        self.give_back();
    }

    /// Report the connection closed, then recycle it in the background.
    pub async fn close(mut self) -> Result<()> {
        self.give_back();
        Ok(())
    }

    /// Take the connection out of the pool for good.
    pub fn detach(mut self) -> Conn {
        self.returned = true;
        self.pool.detach(&self.conn, &self.target.descriptor());
        self.conn.clone()
    }

    fn give_back(&mut self) {
        if self.returned {
            return;
        }
        self.returned = true;
        self.pool.recycle(self.conn.clone(), self.target.clone());
    }
}

impl Deref for PooledConn {
    type Target = Conn;
    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

impl Drop for PooledConn {
    fn drop(&mut self) {
        self.give_back();
    }
}

impl std::fmt::Debug for PooledConn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConn")
            .field("conn", &self.conn)
            .field("returned", &self.returned)
            .finish()
    }
}
