//! Recording collaborator fakes used by the lifecycle tests.

use std::sync::Arc;

use anyhow::Result;
use parking_lot::Mutex;

use crate::{
    collaborators::{
        AllocationExpirer,
        AppRegistry,
        AttemptMetrics,
        EventSink,
        HistoryWriter,
        LifecycleHandles,
        MetricsPublisher,
    },
    container::events::LifecycleEvent,
    data_model::{ApplicationId, ContainerId, ContainerReport, Resource},
};

/// Serializes tests that manipulate the global mock clock.
pub fn lock_clock() -> std::sync::MutexGuard<'static, ()> {
    static CLOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
    CLOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Default)]
pub struct RecordingSink {
    pub events: Mutex<Vec<LifecycleEvent>>,
}

impl EventSink for RecordingSink {
    fn handle(&self, event: LifecycleEvent) -> Result<()> {
        self.events.lock().push(event);
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingExpirer {
    pub registered: Mutex<Vec<ContainerId>>,
    pub unregistered: Mutex<Vec<ContainerId>>,
}

impl AllocationExpirer for RecordingExpirer {
    fn register(&self, container_id: &ContainerId) {
        self.registered.lock().push(container_id.clone());
    }

    fn unregister(&self, container_id: &ContainerId) {
        self.unregistered.lock().push(container_id.clone());
    }
}

#[derive(Default)]
pub struct RecordingHistory {
    pub started: Mutex<Vec<ContainerReport>>,
    pub finished: Mutex<Vec<ContainerReport>>,
}

impl HistoryWriter for RecordingHistory {
    fn container_started(&self, container: &ContainerReport) -> Result<()> {
        self.started.lock().push(container.clone());
        Ok(())
    }

    fn container_finished(&self, container: &ContainerReport) -> Result<()> {
        self.finished.lock().push(container.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingPublisher {
    pub created: Mutex<Vec<(ContainerId, u64)>>,
    pub finished: Mutex<Vec<(ContainerId, u64)>>,
}

impl MetricsPublisher for RecordingPublisher {
    fn container_created(&self, container: &ContainerReport, created_at: u64) -> Result<()> {
        self.created
            .lock()
            .push((container.container_id.clone(), created_at));
        Ok(())
    }

    fn container_finished(&self, container: &ContainerReport, finished_at: u64) -> Result<()> {
        self.finished
            .lock()
            .push((container.container_id.clone(), finished_at));
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingAttemptMetrics {
    pub preemptions: Mutex<Vec<(Resource, ContainerId)>>,
    pub aggregate_usage: Mutex<Vec<(u64, u64)>>,
}

impl AttemptMetrics for RecordingAttemptMetrics {
    fn update_preemption_info(&self, resource: &Resource, container_id: &ContainerId) {
        self.preemptions.lock().push((*resource, container_id.clone()));
    }

    fn update_aggregate_app_resource_usage(&self, memory_seconds: u64, vcore_seconds: u64) {
        self.aggregate_usage.lock().push((memory_seconds, vcore_seconds));
    }
}

/// Registry that knows a single application, the common test shape.
pub struct SingleAppRegistry {
    app_id: ApplicationId,
    metrics: Arc<RecordingAttemptMetrics>,
}

impl AppRegistry for SingleAppRegistry {
    fn current_attempt_metrics(&self, app_id: &ApplicationId) -> Option<Arc<dyn AttemptMetrics>> {
        (*app_id == self.app_id).then(|| self.metrics.clone() as Arc<dyn AttemptMetrics>)
    }
}

/// All recording collaborators wired into one [`LifecycleHandles`] bundle.
pub struct TestHarness {
    pub sink: Arc<RecordingSink>,
    pub expirer: Arc<RecordingExpirer>,
    pub history: Arc<RecordingHistory>,
    pub publisher: Arc<RecordingPublisher>,
    pub attempt_metrics: Arc<RecordingAttemptMetrics>,
}

impl TestHarness {
    pub fn new() -> Self {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .with_test_writer()
            .try_init();

        Self {
            sink: Arc::new(RecordingSink::default()),
            expirer: Arc::new(RecordingExpirer::default()),
            history: Arc::new(RecordingHistory::default()),
            publisher: Arc::new(RecordingPublisher::default()),
            attempt_metrics: Arc::new(RecordingAttemptMetrics::default()),
        }
    }

    pub fn handles_for(&self, app_id: ApplicationId) -> LifecycleHandles {
        LifecycleHandles {
            event_sink: self.sink.clone(),
            expirer: self.expirer.clone(),
            history: self.history.clone(),
            metrics_publisher: self.publisher.clone(),
            apps: Arc::new(SingleAppRegistry {
                app_id,
                metrics: self.attempt_metrics.clone(),
            }),
        }
    }

    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.sink.events.lock().clone()
    }
}
