//! Bindings to the subsystems a container reports into. The container owns
//! none of them; it borrows them through [`LifecycleHandles`] passed at
//! construction, and addresses applications and containers by id.

use std::sync::Arc;

use anyhow::Result;

use crate::{
    container::events::LifecycleEvent,
    data_model::{ApplicationId, ContainerId, ContainerReport, Resource},
};

/// Accepts outbound lifecycle events for dispatch. Implementations must not
/// block; failures are logged by the caller and never roll back a
/// transition.
pub trait EventSink: Send + Sync {
    fn handle(&self, event: LifecycleEvent) -> Result<()>;
}

/// Queues events onto an unbounded channel, typically drained by the
/// dispatcher loop of the embedding resource manager.
impl EventSink for tokio::sync::mpsc::UnboundedSender<LifecycleEvent> {
    fn handle(&self, event: LifecycleEvent) -> Result<()> {
        self.send(event)
            .map_err(|err| anyhow::anyhow!("event sink channel closed: {err}"))
    }
}

/// Timer service that fires EXPIRE for containers that are allocated but
/// never acquired in time.
pub trait AllocationExpirer: Send + Sync {
    fn register(&self, container_id: &ContainerId);
    fn unregister(&self, container_id: &ContainerId);
}

/// Persists container lifecycle milestones.
pub trait HistoryWriter: Send + Sync {
    fn container_started(&self, container: &ContainerReport) -> Result<()>;
    fn container_finished(&self, container: &ContainerReport) -> Result<()>;
}

/// Publishes container lifecycle milestones to the metrics system, stamped
/// with the event time.
pub trait MetricsPublisher: Send + Sync {
    fn container_created(&self, container: &ContainerReport, created_at: u64) -> Result<()>;
    fn container_finished(&self, container: &ContainerReport, finished_at: u64) -> Result<()>;
}

/// Per-attempt accounting updated when containers are preempted or finish.
pub trait AttemptMetrics: Send + Sync {
    fn update_preemption_info(&self, resource: &Resource, container_id: &ContainerId);
    fn update_aggregate_app_resource_usage(&self, memory_seconds: u64, vcore_seconds: u64);
}

/// Looks up the metrics of an application's current attempt. Returns `None`
/// for applications this resource manager no longer tracks.
pub trait AppRegistry: Send + Sync {
    fn current_attempt_metrics(&self, app_id: &ApplicationId) -> Option<Arc<dyn AttemptMetrics>>;
}

/// The interface bundle a container borrows its collaborators through.
#[derive(Clone)]
pub struct LifecycleHandles {
    pub event_sink: Arc<dyn EventSink>,
    pub expirer: Arc<dyn AllocationExpirer>,
    pub history: Arc<dyn HistoryWriter>,
    pub metrics_publisher: Arc<dyn MetricsPublisher>,
    pub apps: Arc<dyn AppRegistry>,
}
