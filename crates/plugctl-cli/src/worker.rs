//! Runs a lifecycle operation on a blocking worker while the main thread
//! watches for Ctrl-C.

use anyhow::Context;
use plugctl_core::process::CancelToken;

/// Run `op` to completion. Ctrl-C cancels the token handed to `op`; the
/// operation then stops its subprocess and returns `Cancelled`.
pub fn run_cancellable<T, F>(op: F) -> anyhow::Result<T>
where
    T: Send + 'static,
    F: FnOnce(CancelToken) -> plugctl_core::Result<T> + Send + 'static,
{
    let rt = tokio::runtime::Runtime::new().context("failed to start runtime")?;
    let cancel = CancelToken::new();

    rt.block_on(async move {
        let worker_cancel = cancel.clone();
        let mut task = tokio::task::spawn_blocking(move || op(worker_cancel));

        let result = tokio::select! {
            joined = &mut task => joined,
            Ok(()) = tokio::signal::ctrl_c() => {
                tracing::warn!("interrupted; cancelling");
                cancel.cancel();
                task.await
            }
        };
        Ok::<T, anyhow::Error>(result.context("worker thread panicked")??)
    })
}
