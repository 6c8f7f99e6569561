//! Stopping an extraction run early.
//!
//! The binary installs one [`ShutdownCoordinator`] per process and wires
//! Ctrl+C to it. The extraction coordinator races every device fetch against
//! it: devices that already finished stay in the dataset and the ones still
//! in flight are reported as cancelled.

use once_cell::sync::OnceCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::warn;

/// Handle passed to the extraction coordinator
pub type SharedShutdown = Arc<ShutdownCoordinator>;

static PROCESS_SHUTDOWN: OnceCell<SharedShutdown> = OnceCell::new();

/// Make `handle` the default for coordinators built without one
///
/// Only the first call wins.
pub fn set_global_shutdown(handle: SharedShutdown) {
    let _ = PROCESS_SHUTDOWN.set(handle);
}

/// The process handle, when the binary installed one
pub fn get_global_shutdown() -> Option<SharedShutdown> {
    PROCESS_SHUTDOWN.get().cloned()
}

/// Request a stop on `handle` when the user presses Ctrl+C
pub fn listen_for_ctrl_c(handle: SharedShutdown) -> JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Ctrl+C received, keeping devices fetched so far");
            handle.request_shutdown();
        }
    })
}

/// Stop flag for an extraction run
#[derive(Debug, Default)]
pub struct ShutdownCoordinator {
    stop_requested: AtomicBool,
    stopped: Notify,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh handle for one run or one test
    pub fn shared() -> SharedShutdown {
        Arc::new(Self::new())
    }

    /// Stop the run; repeated calls are ignored
    pub fn request_shutdown(&self) {
        if self.stop_requested.swap(true, Ordering::SeqCst) {
            return;
        }
        self.stopped.notify_waiters();
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    /// Resolve once a stop is requested
    pub async fn wait_for_shutdown(&self) {
        // register before checking the flag so a stop in between still wakes us
        let stopped = self.stopped.notified();
        if self.is_shutdown_requested() {
            return;
        }
        stopped.await;
    }
}
