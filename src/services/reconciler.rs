use {
    crate::services::order_lifecycle::OrderLifecycle,
    std::{sync::Arc, time::Duration},
    tokio::sync::watch,
};

const SWEEP_BATCH: i64 = 25;

/// Periodically reconcile attempts that are still pending after `grace`,
/// so abandoned payment sessions reach a terminal state.
pub async fn run_reconciler(
    lifecycle: Arc<OrderLifecycle>,
    every: Duration,
    grace: chrono::Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::info!(every_secs = every.as_secs(), "pending payment sweeper started");

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                tracing::info!("pending payment sweeper shutting down");
                return;
            }
            _ = tokio::time::sleep(every) => {}
        }

        match lifecycle
            .sweep_pending(chrono::Utc::now() - grace, SWEEP_BATCH)
            .await
        {
            Ok(0) => {}
            Ok(n) => tracing::info!(count = n, "settled pending payments"),
            Err(e) => tracing::error!(error = %e, "sweeper error"),
        }
    }
}
