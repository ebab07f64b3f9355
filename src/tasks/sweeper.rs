//! Expiration Sweep Task
//!
//! One-shot timer tasks that drive a table's expiration check.

use std::io;
use std::sync::{Arc, Weak};
use std::time::Duration;

use once_cell::sync::OnceCell;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Worker threads for the process-wide sweeper runtime.
const SWEEPER_THREADS: usize = 2;

static BACKGROUND: OnceCell<Runtime> = OnceCell::new();

/// Returns a handle to the process-wide sweeper runtime, starting it on first use.
///
/// The runtime is never shut down, so tables bound to it keep expiring items
/// no matter which runtimes the caller creates and drops.
///
/// # Errors
/// Returns the I/O error if the runtime's worker threads cannot be started.
pub fn background_handle() -> io::Result<Handle> {
    let runtime = BACKGROUND.get_or_try_init(|| {
        debug!("Starting background sweeper runtime");
        Builder::new_multi_thread()
            .worker_threads(SWEEPER_THREADS)
            .thread_name("cachetable-sweeper")
            .enable_time()
            .build()
    })?;
    Ok(runtime.handle().clone())
}

/// Spawns a one-shot task that runs `sweep` against `target` after `delay`.
///
/// The task only holds a weak reference, so a dropped table is never kept
/// alive by its pending sweep. Aborting the returned handle cancels the sweep
/// while it is still waiting; once `sweep` has started it has no await points
/// left and always runs to completion.
///
/// If `runtime` has already shut down the task is cancelled on the spot and
/// the returned handle reports `is_finished()` straight away.
///
/// # Arguments
/// * `runtime` - Runtime the timer runs on
/// * `delay` - How long to wait before sweeping
/// * `target` - The table to sweep
/// * `sweep` - The expiration check to run once the delay elapses
pub fn spawn_sweep<T, F>(
    runtime: &Handle,
    delay: Duration,
    target: Weak<T>,
    sweep: F,
) -> JoinHandle<()>
where
    T: Send + Sync + 'static,
    F: FnOnce(Arc<T>) + Send + 'static,
{
    runtime.spawn(async move {
        tokio::time::sleep(delay).await;

        match target.upgrade() {
            Some(table) => sweep(table),
            None => trace!("Sweep fired for a dropped table"),
        }
    })
}
