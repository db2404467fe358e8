//! Result cursors with serialized fetching.

use std::sync::Arc;

use crate::dispatch::{Dispatcher, Slot, completion, wait};
use crate::driver::RawResult;
use crate::error::{Error, Result};
use crate::opts::FetchMode;
use crate::queue::SerialQueue;
use crate::row::Row;

struct CursorInner {
    raw: Slot<Box<dyn RawResult>>,
    queue: SerialQueue,
    dispatcher: Dispatcher,
}

/// One result set, fetched one row at a time through its own queue.
///
/// Cloning yields another reference to the same cursor.
#[derive(Clone)]
pub struct Cursor {
    inner: Arc<CursorInner>,
}

fn closed() -> Error {
    Error::InvalidUsage("result is closed".into())
}

impl Cursor {
    pub(crate) fn new(
        mut raw: Box<dyn RawResult>,
        fetch_mode: Option<FetchMode>,
        dispatcher: Dispatcher,
    ) -> Self {
        if let Some(mode) = fetch_mode {
            raw.set_fetch_mode(mode);
        }
        Self {
            inner: Arc::new(CursorInner {
                raw: Arc::new(parking_lot::Mutex::new(Some(raw))),
                queue: SerialQueue::new(),
                dispatcher,
            }),
        }
    }

    /// Queue a fetch of the next row. `Ok(None)` means the result set is exhausted.
    pub fn fetch_with<F>(&self, cb: F)
    where
        F: FnOnce(Result<Option<Row>>) + Send + 'static,
    {
        let raw = Arc::clone(&self.inner.raw);
        let dispatcher = self.inner.dispatcher.clone();
        self.inner.queue.push(move |done| {
            dispatcher.blocking(move || {
                let result = match raw.lock().as_mut() {
                    Some(raw) => raw.fetch(),
                    None => Err(closed()),
                };
                cb(result);
                done.complete();
            });
        });
    }

    /// Fetch the next row.
    pub async fn fetch(&self) -> Result<Option<Row>> {
        let (cb, rx) = completion();
        self.fetch_with(cb);
        wait(rx).await
    }

    /// Fetch every remaining row by repeating [`Cursor::fetch_with`].
    pub fn fetch_all_with<F>(&self, cb: F)
    where
        F: FnOnce(Result<Vec<Row>>) + Send + 'static,
    {
        self.fetch_rest(Vec::new(), cb);
    }

    fn fetch_rest<F>(&self, mut rows: Vec<Row>, cb: F)
    where
        F: FnOnce(Result<Vec<Row>>) + Send + 'static,
    {
        let cursor = self.clone();
        self.fetch_with(move |result| match result {
            Ok(Some(row)) => {
                rows.push(row);
                cursor.fetch_rest(rows, cb);
            }
            Ok(None) => cb(Ok(rows)),
            Err(e) => cb(Err(e)),
        });
    }

    /// Fetch every remaining row.
    pub async fn fetch_all(&self) -> Result<Vec<Row>> {
        let (cb, rx) = completion();
        self.fetch_all_with(cb);
        wait(rx).await
    }

    /// Fetch every remaining row on the calling thread.
    pub fn fetch_all_sync(&self) -> Result<Vec<Row>> {
        match self.inner.raw.lock().as_mut() {
            Some(raw) => raw.fetch_all(),
            None => Err(closed()),
        }
    }

    /// Advance to the next result set. Returns false when none remains.
    pub fn more_results_sync(&self) -> Result<bool> {
        match self.inner.raw.lock().as_mut() {
            Some(raw) => raw.more_results(),
            None => Ok(false),
        }
    }

    /// Release the result. Closing twice is a no-op.
    pub fn close_sync(&self) -> Result<()> {
        match self.inner.raw.lock().take() {
            Some(mut raw) => raw.close(),
            None => Ok(()),
        }
    }

    /// Change how subsequent rows are materialized.
    pub fn set_fetch_mode(&self, mode: FetchMode) {
        if let Some(raw) = self.inner.raw.lock().as_mut() {
            raw.set_fetch_mode(mode);
        }
    }

    /// Check if the cursor has been closed.
    pub fn is_closed(&self) -> bool {
        self.inner.raw.lock().is_none()
    }
}

impl std::fmt::Debug for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor")
            .field("closed", &self.is_closed())
            .field("queue", &self.inner.queue)
            .finish()
    }
}
