use crate::engine::AnomalyResult;
use tokio::sync::mpsc;

/// Receives every anomalous result for delivery to whoever cares about the patient.
pub trait AlertSink: Send + Sync {
    fn dispatch(&self, result: &AnomalyResult);
}

/// Emits each anomaly as a structured log line.
#[derive(Debug, Clone, Default)]
pub struct TracingAlertSink;

impl AlertSink for TracingAlertSink {
    fn dispatch(&self, result: &AnomalyResult) {
        let payload = match serde_json::to_string(result) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::warn!(patient_id = result.patient_id, error = %err, "failed to encode anomaly alert");
                return;
            }
        };
        tracing::warn!(
            patient_id = result.patient_id,
            anomaly_type = result.anomaly_type.map(|kind| kind.as_str()),
            alert = %result.alert_message,
            payload = %payload,
            "adherence alert"
        );
    }
}

/// Forwards anomalies into a channel owned by a delivery task.
#[derive(Debug, Clone)]
pub struct ChannelAlertSink {
    tx: mpsc::UnboundedSender<AnomalyResult>,
}

impl ChannelAlertSink {
    pub fn new(tx: mpsc::UnboundedSender<AnomalyResult>) -> Self {
        Self { tx }
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<AnomalyResult>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }
}

impl AlertSink for ChannelAlertSink {
    fn dispatch(&self, result: &AnomalyResult) {
        if self.tx.send(result.clone()).is_err() {
            tracing::warn!(patient_id = result.patient_id, "alert receiver dropped; anomaly not delivered");
        }
    }
}
