//! Completion events for plan subscribers
//!
//! Publishing is fire-and-forget from the pipeline's point of view: a plan
//! that was reconciled stays reconciled even when nobody hears about it.

use crate::config::NotifyConfig;
use crate::error::NotifyError;
use crate::model::{Plan, PlanId, PlanStatus};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::sync::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Event published once a plan run finishes
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CompletionEvent {
    pub topic: String,
    pub plan_id: PlanId,
    pub status: PlanStatus,
    pub total_cost: f64,
    pub total_revenue: f64,
    pub total_profit: f64,
    pub allocation_count: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl CompletionEvent {
    pub fn topic_for(plan_id: PlanId) -> String {
        format!("cultivation_plan:{}", plan_id)
    }

    pub fn completed(plan: &Plan, message: impl Into<String>) -> Self {
        Self {
            topic: Self::topic_for(plan.id),
            plan_id: plan.id,
            status: plan.status,
            total_cost: plan.rollup.total_cost,
            total_revenue: plan.rollup.total_revenue,
            total_profit: plan.rollup.total_profit,
            allocation_count: plan.allocations.len(),
            message: Some(message.into()),
        }
    }

    pub fn failed(plan: &Plan, message: impl Into<String>) -> Self {
        Self {
            status: PlanStatus::Failed,
            ..Self::completed(plan, message)
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn publish(&self, event: CompletionEvent) -> Result<(), NotifyError>;
}

/// Publish and log any failure; never fails the caller.
pub async fn publish_best_effort(notifier: &dyn Notifier, event: CompletionEvent) {
    let topic = event.topic.clone();
    match notifier.publish(event).await {
        Ok(()) => debug!("Published completion event on {}", topic),
        Err(e) => warn!("Failed to publish completion event on {}: {}", topic, e),
    }
}

/// In-process fan-out over a tokio broadcast channel
pub struct BroadcastNotifier {
    tx: broadcast::Sender<CompletionEvent>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn from_config(config: &NotifyConfig) -> Self {
        Self::new(config.channel_capacity)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CompletionEvent> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl Notifier for BroadcastNotifier {
    async fn publish(&self, event: CompletionEvent) -> Result<(), NotifyError> {
        // no subscribers is not a failure
        match self.tx.send(event) {
            Ok(_) => Ok(()),
            Err(broadcast::error::SendError(_)) => Ok(()),
        }
    }
}

/// Writes each event as one JSON line
pub struct JsonLinesNotifier<W: Write + Send> {
    writer: Mutex<W>,
}

impl<W: Write + Send> JsonLinesNotifier<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl JsonLinesNotifier<std::io::Stderr> {
    pub fn stderr() -> Self {
        Self::new(std::io::stderr())
    }
}

#[async_trait]
impl<W: Write + Send> Notifier for JsonLinesNotifier<W> {
    async fn publish(&self, event: CompletionEvent) -> Result<(), NotifyError> {
        let line = serde_json::to_string(&event)?;
        let mut writer = self
            .writer
            .lock()
            .map_err(|e| NotifyError::Delivery(e.to_string()))?;
        writeln!(writer, "{}", line).map_err(|e| NotifyError::Delivery(e.to_string()))?;
        writer
            .flush()
            .map_err(|e| NotifyError::Delivery(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::fixtures::two_parcel_plan;

    struct Unreachable;

    #[async_trait]
    impl Notifier for Unreachable {
        async fn publish(&self, _event: CompletionEvent) -> Result<(), NotifyError> {
            Err(NotifyError::Delivery("connection reset".to_string()))
        }
    }

    #[tokio::test]
    async fn test_broadcast_delivers_event() {
        let notifier = BroadcastNotifier::new(4);
        let mut rx = notifier.subscribe();

        let mut plan = two_parcel_plan();
        plan.status = PlanStatus::Completed;
        plan.rollup.total_profit = 500.0;
        notifier
            .publish(CompletionEvent::completed(&plan, "adjusted"))
            .await
            .unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.topic, "cultivation_plan:1");
        assert_eq!(event.status, PlanStatus::Completed);
        assert_eq!(event.allocation_count, 1);
        assert_eq!(event.total_profit, 500.0);
    }

    #[tokio::test]
    async fn test_broadcast_without_subscribers_is_ok() {
        let notifier = BroadcastNotifier::from_config(&NotifyConfig::default());
        let event = CompletionEvent::failed(&two_parcel_plan(), "engine timed out");
        notifier.publish(event).await.unwrap();
    }

    #[tokio::test]
    async fn test_json_lines_output() {
        let notifier = JsonLinesNotifier::new(Vec::new());
        let event = CompletionEvent::failed(&two_parcel_plan(), "engine timed out");
        notifier.publish(event).await.unwrap();

        let out = String::from_utf8(notifier.into_inner()).unwrap();
        let value: serde_json::Value = serde_json::from_str(out.trim()).unwrap();
        assert_eq!(value["status"], "failed");
        assert_eq!(value["message"], "engine timed out");
    }

    #[tokio::test]
    async fn test_best_effort_swallows_failures() {
        let event = CompletionEvent::completed(&two_parcel_plan(), "done");
        publish_best_effort(&Unreachable, event).await;
    }
}
