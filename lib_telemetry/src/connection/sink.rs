//! The narrow interface through which the client hands results to its
//! consumers (dashboards, loggers, forwarders).
//!
//! All callbacks are invoked from the manager's event loop, one at a time.
//! Implementations should return quickly.

use serde_json::Value;
use tokio::sync::mpsc;

use crate::connection::state::ConnectionState;
use crate::core::alerts::Alert;
use crate::core::performance::PerformanceMetrics;
use crate::core::window::SmoothedMetrics;
use crate::error::ClientError;

/// Receiver of smoothed metrics, alerts and lifecycle notifications.
///
/// Every method has an empty default so a sink only implements what it needs.
#[allow(unused_variables)]
pub trait TelemetrySink: Send + Sync {
    fn on_smoothed_metrics(&self, entity_id: &str, metrics: &SmoothedMetrics) {}

    fn on_alert(&self, alert: &Alert) {}

    fn on_connection_state_change(&self, state: ConnectionState) {}

    fn on_subscription_result(&self, entity_id: &str, success: bool) {}

    /// `<entity>_state_change`, forwarded verbatim.
    fn on_entity_state_change(&self, entity_id: &str, payload: &Value) {}

    /// `<entity>_alert`, forwarded verbatim.
    fn on_entity_alert(&self, entity_id: &str, payload: &Value) {}

    fn on_warnings(&self, entity_id: &str, warnings: &[Value]) {}

    fn on_performance_metrics(&self, metrics: &PerformanceMetrics) {}

    /// Failed acks, failed resubscribes, terminal reconnect failures.
    fn on_error(&self, error: &ClientError) {}
}

/// A sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl TelemetrySink for NullSink {}

/// One sink callback as a value.
#[derive(Debug, Clone)]
pub enum SinkEvent {
    SmoothedMetrics {
        entity_id: String,
        metrics: SmoothedMetrics,
    },
    Alert(Alert),
    ConnectionState(ConnectionState),
    SubscriptionResult {
        entity_id: String,
        success: bool,
    },
    EntityStateChange {
        entity_id: String,
        payload: Value,
    },
    EntityAlert {
        entity_id: String,
        payload: Value,
    },
    Warnings {
        entity_id: String,
        warnings: Vec<Value>,
    },
    PerformanceMetrics(PerformanceMetrics),
    Error(ClientError),
}

/// Forwards every callback onto an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<SinkEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SinkEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn forward(&self, event: SinkEvent) {
        // Receiver gone means nobody is listening any more.
        let _ = self.tx.send(event);
    }
}

impl TelemetrySink for ChannelSink {
    fn on_smoothed_metrics(&self, entity_id: &str, metrics: &SmoothedMetrics) {
        self.forward(SinkEvent::SmoothedMetrics {
            entity_id: entity_id.to_string(),
            metrics: metrics.clone(),
        });
    }

    fn on_alert(&self, alert: &Alert) {
        self.forward(SinkEvent::Alert(alert.clone()));
    }

    fn on_connection_state_change(&self, state: ConnectionState) {
        self.forward(SinkEvent::ConnectionState(state));
    }

    fn on_subscription_result(&self, entity_id: &str, success: bool) {
        self.forward(SinkEvent::SubscriptionResult {
            entity_id: entity_id.to_string(),
            success,
        });
    }

    fn on_entity_state_change(&self, entity_id: &str, payload: &Value) {
        self.forward(SinkEvent::EntityStateChange {
            entity_id: entity_id.to_string(),
            payload: payload.clone(),
        });
    }

    fn on_entity_alert(&self, entity_id: &str, payload: &Value) {
        self.forward(SinkEvent::EntityAlert {
            entity_id: entity_id.to_string(),
            payload: payload.clone(),
        });
    }

    fn on_warnings(&self, entity_id: &str, warnings: &[Value]) {
        self.forward(SinkEvent::Warnings {
            entity_id: entity_id.to_string(),
            warnings: warnings.to_vec(),
        });
    }

    fn on_performance_metrics(&self, metrics: &PerformanceMetrics) {
        self.forward(SinkEvent::PerformanceMetrics(*metrics));
    }

    fn on_error(&self, error: &ClientError) {
        self.forward(SinkEvent::Error(error.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_sink_forwards_in_order() {
        let (sink, mut rx) = ChannelSink::new();
        sink.on_connection_state_change(ConnectionState::Connecting);
        sink.on_subscription_result("enc-1", true);
        sink.on_error(&ClientError::ShutDown);

        assert!(matches!(rx.try_recv(), Ok(SinkEvent::ConnectionState(ConnectionState::Connecting))));
        assert!(matches!(
            rx.try_recv(),
            Ok(SinkEvent::SubscriptionResult { ref entity_id, success: true }) if entity_id == "enc-1"
        ));
        assert!(matches!(rx.try_recv(), Ok(SinkEvent::Error(ClientError::ShutDown))));
    }

    #[test]
    fn closed_channel_is_ignored() {
        let (sink, rx) = ChannelSink::new();
        drop(rx);
        sink.on_alert(&Alert {
            alert_type: crate::core::alerts::AlertType::Reactive,
            metric: "latency".into(),
            value: 1.0,
            threshold: 0.0,
            entity_id: None,
            timestamp: chrono::Utc::now(),
        });
    }
}
