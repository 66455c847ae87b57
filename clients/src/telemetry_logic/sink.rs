use lib_telemetry::{Alert, AlertType, ClientError, ConnectionState, PerformanceMetrics, TelemetrySink};
use lib_telemetry::core::window::SmoothedMetrics;
use serde_json::Value;

/// Writes everything the client reports to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingSink;

impl TelemetrySink for LoggingSink {
    fn on_smoothed_metrics(&self, entity_id: &str, metrics: &SmoothedMetrics) {
        let summary = metrics
            .iter()
            .map(|(name, value)| format!("{}={:.2}", name, value))
            .collect::<Vec<_>>()
            .join(" ");
        log::debug!("[{}] {}", entity_id, summary);
    }

    fn on_alert(&self, alert: &Alert) {
        let scope = alert.entity_id.as_deref().unwrap_or("client");
        match alert.alert_type {
            AlertType::Reactive => log::warn!(
                "[{}] {} is {:.2}, above {:.2}",
                scope,
                alert.metric,
                alert.value,
                alert.threshold
            ),
            AlertType::Predictive => log::warn!(
                "[{}] {} is trending towards {:.2}, above {:.2}",
                scope,
                alert.metric,
                alert.value,
                alert.threshold
            ),
        }
    }

    fn on_connection_state_change(&self, state: ConnectionState) {
        match state {
            ConnectionState::AuthFailed | ConnectionState::Error => {
                log::error!("Connection state: {}", state)
            }
            ConnectionState::RateLimited => log::warn!("Connection state: {}", state),
            _ => log::info!("Connection state: {}", state),
        }
    }

    fn on_subscription_result(&self, entity_id: &str, success: bool) {
        if success {
            log::info!("Subscribed to {}", entity_id);
        } else {
            log::warn!("Subscription to {} failed", entity_id);
        }
    }

    fn on_entity_state_change(&self, entity_id: &str, payload: &Value) {
        log::info!("[{}] state change: {}", entity_id, payload);
    }

    fn on_entity_alert(&self, entity_id: &str, payload: &Value) {
        log::warn!("[{}] upstream alert: {}", entity_id, payload);
    }

    fn on_warnings(&self, entity_id: &str, warnings: &[Value]) {
        for warning in warnings {
            log::warn!("[{}] {}", entity_id, warning);
        }
    }

    fn on_performance_metrics(&self, metrics: &PerformanceMetrics) {
        log::debug!(
            "Performance: {:.1} msg/s, processing {:.2}ms, latency {:.2}ms, score {:.0}",
            metrics.message_rate,
            metrics.average_processing_time,
            metrics.average_latency,
            metrics.performance_score.overall
        );
    }

    fn on_error(&self, error: &ClientError) {
        log::error!("{}", error);
    }
}
