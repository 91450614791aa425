//! Shutdown signalling shared by the worker and in-flight passes.

use tokio::sync::watch;

/// Resolve once shutdown has been signalled.
///
/// A dropped sender means nobody can signal shutdown any more, so this then
/// never resolves.
pub async fn signalled(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// A receiver that is never signalled.
pub fn never() -> watch::Receiver<bool> {
    watch::channel(false).1
}
