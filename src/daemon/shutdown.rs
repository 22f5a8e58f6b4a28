use tokio_util::sync::CancellationToken;
use tracing::info;

/// Turns an interrupt signal into the shared stop signal every agent polls
/// between iterations.
///
/// Detached processes on Windows don't receive console signals, so stopping
/// the daemon there currently requires killing the process.
pub async fn detect_shutdown(cancelation: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Received interrupt, stopping agents");
    }
    cancelation.cancel();
}
