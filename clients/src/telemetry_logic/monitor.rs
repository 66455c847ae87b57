use lib_telemetry::ClientHandle;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};

/// Periodically logs connection status, cache counters and a performance
/// report (which is also sent upstream).
pub async fn run(handle: ClientHandle, period: Duration, mut shutdown: broadcast::Receiver<()>) {
    let mut summary = interval(period);
    summary.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick fires immediately; nothing worth reporting yet.
    summary.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                log::info!("Monitor received shutdown signal.");
                break;
            }
            _ = summary.tick() => {
                if let Err(e) = report(&handle).await {
                    log::info!("Monitor stopping: {}", e);
                    break;
                }
            }
        }
    }
}

async fn report(handle: &ClientHandle) -> lib_telemetry::Result<()> {
    let status = handle.status().await?;
    let cache = handle.cache_metrics().await?;
    log::info!(
        "Status: {} | {} subscription(s) | {} queued | {} awaiting ack | cache {}/{} (hit rate {:.0}%)",
        status.state,
        status.subscriptions.len(),
        status.queued_operations,
        status.pending_acks,
        cache.current_size,
        cache.capacity,
        cache.hit_rate * 100.0
    );

    let report = handle.performance_report().await?;
    if !report.thresholds.violated.is_empty() {
        log::warn!("Thresholds violated: {}", report.thresholds.violated.join(", "));
    }
    for recommendation in &report.recommendations {
        log::info!("Recommendation: {}", recommendation);
    }
    Ok(())
}
