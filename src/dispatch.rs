//! Moving blocking raw-handle calls off the async scheduler.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::oneshot;

use crate::error::{Error, Result};

/// Shared, swappable storage for a raw handle.
///
/// `None` means the handle is gone (closed, or never opened). The mutex is
/// never contended by queued work: the owning queue already serializes access.
pub(crate) type Slot<T> = Arc<Mutex<Option<T>>>;

pub(crate) fn empty_slot<T>() -> Slot<T> {
    Arc::new(Mutex::new(None))
}

/// Runs blocking work on the runtime's blocking pool.
#[derive(Clone, Debug)]
pub(crate) struct Dispatcher {
    handle: Handle,
}

impl Dispatcher {
    /// Capture the runtime of the calling context.
    pub(crate) fn current() -> Result<Self> {
        Ok(Self {
            handle: Handle::try_current()?,
        })
    }

    /// Run `work` on a blocking thread. Completion callbacks invoked by `work`
    /// fire on that thread.
    pub(crate) fn blocking<F>(&self, work: F)
    where
        F: FnOnce() + Send + 'static,
    {
        drop(self.handle.spawn_blocking(work));
    }

    /// Run `work` after `delay`.
    pub(crate) fn after<F>(&self, delay: Duration, work: F)
    where
        F: FnOnce() + Send + 'static,
    {
        drop(self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            work();
        }));
    }
}

/// Bridge a completion callback into a future.
pub(crate) fn completion<T: Send + 'static>()
-> (impl FnOnce(T) + Send + 'static, oneshot::Receiver<T>) {
    let (tx, rx) = oneshot::channel();
    let cb = move |value: T| {
        let _ = tx.send(value);
    };
    (cb, rx)
}

/// Await a bridged completion, mapping a dropped callback to [`Error::Abandoned`].
pub(crate) async fn wait<T>(rx: oneshot::Receiver<Result<T>>) -> Result<T> {
    rx.await.unwrap_or(Err(Error::Abandoned))
}
