use std::sync::Weak;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;
use crossbeam::channel::{unbounded, RecvTimeoutError, Sender};
use crate::cache::database::DatabaseCache;
use crate::core::error::Result;

enum Signal {
    RunNow,
    Stop,
}

/// Background thread that runs `DatabaseCache::run_cleanup` on an interval.
///
/// Holds the cache weakly and exits once it is gone. Dropping the worker
/// stops the thread and waits for it.
pub(crate) struct CleanupWorker {
    sender: Sender<Signal>,
    handle: Option<JoinHandle<()>>,
    thread_id: ThreadId,
}

impl CleanupWorker {
    pub(crate) fn start(cache: Weak<DatabaseCache>, name: &str, interval: Duration) -> Result<Self> {
        let (sender, receiver) = unbounded();
        let handle = thread::Builder::new()
            .name(format!("cache-cleanup-{}", name))
            .spawn(move || {
                loop {
                    match receiver.recv_timeout(interval) {
                        Ok(Signal::RunNow) | Err(RecvTimeoutError::Timeout) => {}
                        Ok(Signal::Stop) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                    let Some(cache) = cache.upgrade() else {
                        break;
                    };
                    cache.run_cleanup();
                }
                log::debug!("cache cleanup worker exiting");
            })?;
        let thread_id = handle.thread().id();
        Ok(CleanupWorker { sender, handle: Some(handle), thread_id })
    }

    /// Ask for a cleanup pass without waiting for the interval
    pub(crate) fn run_now(&self) -> bool {
        self.sender.send(Signal::RunNow).is_ok()
    }
}

impl Drop for CleanupWorker {
    fn drop(&mut self) {
        let _ = self.sender.send(Signal::Stop);
        // the last strong reference to the cache can be released on the worker itself
        if thread::current().id() == self.thread_id {
            return;
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("cache cleanup worker panicked");
            }
        }
    }
}
