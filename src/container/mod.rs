pub mod events;
pub mod transitions;

use std::sync::{
    LazyLock,
    atomic::{AtomicU64, Ordering},
};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use strum::Display;
use tracing::{debug, error, info, warn};

use crate::{
    collaborators::{AttemptMetrics, LifecycleHandles},
    config::LifecycleConfig,
    container::{
        events::{ContainerEvent, ContainerEventType, LifecycleEvent},
        transitions::CONTAINER_TRANSITIONS,
    },
    data_model::{
        AppAttemptId,
        ApplicationId,
        ContainerId,
        ContainerReport,
        ContainerRunState,
        ContainerSpec,
        ContainerStatus,
        NodeId,
        PreemptionPriority,
        Priority,
        Resource,
        ResourceRequest,
        exit_status,
    },
    metrics::LifecycleMetrics,
    state_machine::StateMachine,
    utils::epoch_millis,
};

static METRICS: LazyLock<LifecycleMetrics> = LazyLock::new(LifecycleMetrics::new);

/// Lifecycle state of a container as tracked by the resource manager.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display)]
pub enum ContainerState {
    New,
    Reserved,
    Allocated,
    Acquired,
    Running,
    /// Partially preempted but still live on its node.
    Dehydrated,
    Completed,
    Expired,
    Released,
    Killed,
}

impl ContainerState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ContainerState::Completed
                | ContainerState::Expired
                | ContainerState::Released
                | ContainerState::Killed
        )
    }
}

/// Mutable container bookkeeping plus the identity and collaborator handles
/// the transition handlers work against. Only touched under the container's
/// write lock.
pub(crate) struct ContainerRecord {
    pub(crate) container_id: ContainerId,
    pub(crate) app_attempt_id: AppAttemptId,
    pub(crate) node_id: NodeId,
    pub(crate) user: String,
    pub(crate) creation_time: u64,
    pub(crate) handles: LifecycleHandles,
    pub(crate) pr_number: u32,

    pub(crate) node_http_address: String,
    pub(crate) allocated_resource: Resource,
    pub(crate) allocated_priority: Priority,

    pub(crate) preempted: Resource,
    pub(crate) last_preempted: Option<Resource>,
    pub(crate) last_resumed: Option<Resource>,
    pub(crate) reserved_resource: Option<Resource>,
    pub(crate) reserved_node: Option<NodeId>,
    pub(crate) reserved_priority: Option<Priority>,
    pub(crate) suspend_times: Vec<u64>,
    pub(crate) resume_times: Vec<u64>,
    pub(crate) is_suspending: bool,
    pub(crate) resume_opportunity: u32,
    pub(crate) utilization: f64,
    pub(crate) finish_time: Option<u64>,
    pub(crate) finished_status: Option<ContainerStatus>,
    pub(crate) is_am_container: bool,
    pub(crate) resource_requests: Option<Vec<ResourceRequest>>,
    pub(crate) preemption_priority: PreemptionPriority,
    pub(crate) deadline: u64,
    pub(crate) arrival_time: u64,
    pub(crate) num_being_preempted: u32,
}

impl ContainerRecord {
    /// Sends an outbound event; failures are logged and never interrupt the
    /// transition in progress.
    pub(crate) fn emit(&self, event: LifecycleEvent) {
        if let Err(err) = self.handles.event_sink.handle(event) {
            warn!(
                container_id = %self.container_id,
                error = %err,
                "failed to emit lifecycle event"
            );
        }
    }

    pub(crate) fn attempt_metrics(&self) -> Option<std::sync::Arc<dyn AttemptMetrics>> {
        self.handles
            .apps
            .current_attempt_metrics(self.app_attempt_id.app_id())
    }

    pub(crate) fn run_state(&self) -> ContainerRunState {
        self.finished_status
            .as_ref()
            .map(|status| status.run_state)
            .unwrap_or(ContainerRunState::Running)
    }

    pub(crate) fn http_address(&self) -> String {
        format!("http://{}", self.node_http_address)
    }

    pub(crate) fn log_url(&self) -> String {
        format!(
            "http://{}/node/containerlogs/{}/{}",
            self.node_http_address, self.container_id, self.user
        )
    }

    pub(crate) fn report(&self) -> ContainerReport {
        ContainerReport {
            container_id: self.container_id.clone(),
            allocated_resource: self.allocated_resource,
            allocated_node: self.node_id.clone(),
            priority: self.allocated_priority,
            creation_time: self.creation_time,
            finish_time: self.finish_time,
            diagnostics: self
                .finished_status
                .as_ref()
                .map(|status| status.diagnostics.clone())
                .unwrap_or_default(),
            log_url: self.log_url(),
            exit_status: self
                .finished_status
                .as_ref()
                .map(|status| status.exit_status)
                .unwrap_or(exit_status::SUCCESS),
            run_state: self.run_state(),
            node_http_address: self.http_address(),
        }
    }
}

struct ContainerInner {
    machine: StateMachine<ContainerState, ContainerEventType, ContainerRecord, ContainerEvent>,
    record: ContainerRecord,
}

/// A container lease tracked by the resource manager: the per-container
/// state machine, its accounting fields, and the collaborator handles it
/// reports into.
///
/// All operations are thread-safe. `handle` and the mutators serialize
/// through the write lock; queries take consistent read-lock snapshots.
pub struct Container {
    container_id: ContainerId,
    app_attempt_id: AppAttemptId,
    node_id: NodeId,
    user: String,
    creation_time: u64,
    invalid_event_count: AtomicU64,
    inner: RwLock<ContainerInner>,
}

impl Container {
    pub fn new(
        spec: ContainerSpec,
        app_attempt_id: AppAttemptId,
        user: impl Into<String>,
        handles: LifecycleHandles,
        config: &LifecycleConfig,
    ) -> Self {
        Self::new_with_creation_time(
            spec,
            app_attempt_id,
            user,
            handles,
            config,
            epoch_millis(),
        )
    }

    pub fn new_with_creation_time(
        spec: ContainerSpec,
        app_attempt_id: AppAttemptId,
        user: impl Into<String>,
        handles: LifecycleHandles,
        config: &LifecycleConfig,
        creation_time: u64,
    ) -> Self {
        let record = ContainerRecord {
            container_id: spec.container_id.clone(),
            app_attempt_id: app_attempt_id.clone(),
            node_id: spec.node_id.clone(),
            user: user.into(),
            creation_time,
            handles,
            pr_number: config.preemption.pr_number,
            node_http_address: spec.node_http_address,
            allocated_resource: spec.resource,
            allocated_priority: spec.priority,
            preempted: Resource::none(),
            last_preempted: None,
            last_resumed: None,
            reserved_resource: None,
            reserved_node: None,
            reserved_priority: None,
            suspend_times: Vec::new(),
            resume_times: Vec::new(),
            is_suspending: false,
            resume_opportunity: 0,
            utilization: 1.0,
            finish_time: None,
            finished_status: None,
            is_am_container: false,
            resource_requests: None,
            preemption_priority: PreemptionPriority::UNDEFINED,
            deadline: 0,
            arrival_time: 0,
            num_being_preempted: 0,
        };

        let report = record.report();
        if let Err(err) = record.handles.history.container_started(&report) {
            warn!(
                container_id = %record.container_id,
                error = %err,
                "failed to write container start to history"
            );
        }
        if let Err(err) = record
            .handles
            .metrics_publisher
            .container_created(&report, creation_time)
        {
            warn!(
                container_id = %record.container_id,
                error = %err,
                "failed to publish container creation"
            );
        }

        Self {
            container_id: record.container_id.clone(),
            app_attempt_id: record.app_attempt_id.clone(),
            node_id: record.node_id.clone(),
            user: record.user.clone(),
            creation_time,
            invalid_event_count: AtomicU64::new(0),
            inner: RwLock::new(ContainerInner {
                machine: StateMachine::new(&CONTAINER_TRANSITIONS, ContainerState::New),
                record,
            }),
        }
    }

    /// Single event ingress. Serializes through the write lock, resolves
    /// the transition, and absorbs events that are invalid for the current
    /// state.
    pub fn handle(&self, event: ContainerEvent) {
        debug!(
            container_id = %self.container_id,
            event = %event.kind(),
            "processing container event"
        );

        let mut guard = self.inner.write();
        let inner = &mut *guard;
        let old_state = inner.machine.current_state();
        match inner
            .machine
            .do_transition(event.kind(), &mut inner.record, &event)
        {
            Ok(new_state) => {
                METRICS.record_transition(
                    &old_state.to_string(),
                    &new_state.to_string(),
                    &event.kind().to_string(),
                );
                if old_state != new_state {
                    info!(
                        container_id = %self.container_id,
                        from = %old_state,
                        to = %new_state,
                        "container transitioned"
                    );
                }
            }
            Err(err) => {
                self.invalid_event_count.fetch_add(1, Ordering::Relaxed);
                METRICS.record_invalid(&old_state.to_string(), &event.kind().to_string());
                error!(
                    container_id = %self.container_id,
                    error = %err,
                    "can't handle this event at current state"
                );
            }
        }
    }

    pub fn container_id(&self) -> &ContainerId {
        &self.container_id
    }

    pub fn app_attempt_id(&self) -> &AppAttemptId {
        &self.app_attempt_id
    }

    pub fn app_id(&self) -> &ApplicationId {
        self.app_attempt_id.app_id()
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn creation_time(&self) -> u64 {
        self.creation_time
    }

    pub fn state(&self) -> ContainerState {
        self.inner.read().machine.current_state()
    }

    pub fn finish_time(&self) -> Option<u64> {
        self.inner.read().record.finish_time
    }

    pub fn diagnostics(&self) -> Option<String> {
        self.inner
            .read()
            .record
            .finished_status
            .as_ref()
            .map(|status| status.diagnostics.clone())
    }

    pub fn log_url(&self) -> String {
        self.inner.read().record.log_url()
    }

    pub fn exit_status(&self) -> i32 {
        self.inner
            .read()
            .record
            .finished_status
            .as_ref()
            .map(|status| status.exit_status)
            .unwrap_or(exit_status::SUCCESS)
    }

    pub fn run_state(&self) -> ContainerRunState {
        self.inner.read().record.run_state()
    }

    pub fn finished_status(&self) -> Option<ContainerStatus> {
        self.inner.read().record.finished_status.clone()
    }

    pub fn is_am_container(&self) -> bool {
        self.inner.read().record.is_am_container
    }

    pub fn set_am_container(&self, is_am_container: bool) {
        self.inner.write().record.is_am_container = is_am_container;
    }

    pub fn resource_requests(&self) -> Option<Vec<ResourceRequest>> {
        self.inner.read().record.resource_requests.clone()
    }

    pub fn set_resource_requests(&self, requests: Option<Vec<ResourceRequest>>) {
        self.inner.write().record.resource_requests = requests;
    }

    pub fn allocated_resource(&self) -> Resource {
        self.inner.read().record.allocated_resource
    }

    pub fn allocated_priority(&self) -> Priority {
        self.inner.read().record.allocated_priority
    }

    pub fn node_http_address(&self) -> String {
        self.inner.read().record.http_address()
    }

    pub fn reserved_resource(&self) -> Option<Resource> {
        self.inner.read().record.reserved_resource
    }

    pub fn reserved_node(&self) -> Option<NodeId> {
        self.inner.read().record.reserved_node.clone()
    }

    pub fn reserved_priority(&self) -> Option<Priority> {
        self.inner.read().record.reserved_priority
    }

    /// What the container actually holds on the node right now: the
    /// allocation minus whatever preemption has withheld.
    pub fn current_used_resource(&self) -> Resource {
        let inner = self.inner.read();
        if inner.record.is_suspending {
            inner.record.allocated_resource.subtract(&inner.record.preempted)
        } else {
            inner.record.allocated_resource
        }
    }

    pub fn preempted_resource(&self) -> Resource {
        self.inner.read().record.preempted
    }

    pub fn last_preempted_resource(&self) -> Option<Resource> {
        self.inner.read().record.last_preempted
    }

    pub fn last_resumed_resource(&self) -> Option<Resource> {
        self.inner.read().record.last_resumed
    }

    pub fn is_suspending(&self) -> bool {
        self.inner.read().record.is_suspending
    }

    pub fn suspend_times(&self) -> Vec<u64> {
        self.inner.read().record.suspend_times.clone()
    }

    pub fn resume_times(&self) -> Vec<u64> {
        self.inner.read().record.resume_times.clone()
    }

    pub fn utilization(&self) -> f64 {
        self.inner.read().record.utilization
    }

    /// Records a preemption delta decided by the scheduler. Must precede
    /// the SUSPEND event that reports the suspension.
    pub fn add_preempted_resource(&self, resource: Resource) {
        let mut inner = self.inner.write();
        inner.record.last_preempted = Some(resource);
        inner.record.preempted.add_assign(&resource);
    }

    /// Returns a resumed delta to the container. Must precede the RESUME
    /// event; the preempted total floors at zero per component.
    pub fn add_resumed_resource(&self, resource: Resource) {
        let mut inner = self.inner.write();
        inner.record.last_resumed = Some(resource);
        inner.record.preempted.subtract_clamped(&resource);
    }

    /// The granularity a single suspend-resume round operates in: one
    /// vcore's worth of memory, scaled by the configured `pr_number`.
    pub fn sr_resource_unit(&self) -> Resource {
        let inner = self.inner.read();
        let allocated = inner.record.allocated_resource;
        let unit = Resource::new(allocated.memory_mb / allocated.vcores.max(1) as u64, 1);
        unit.multiply(inner.record.pr_number)
    }

    pub fn resume_opportunity(&self) -> u32 {
        self.inner.read().record.resume_opportunity
    }

    pub fn inc_resume_opportunity(&self) {
        self.inner.write().record.resume_opportunity += 1;
    }

    pub fn reset_resume_opportunity(&self) {
        self.inner.write().record.resume_opportunity = 0;
    }

    pub fn preemption_priority_floor(&self) -> i32 {
        self.inner.read().record.preemption_priority.floor()
    }

    pub fn set_preemption_priority(&self, priority: f32) {
        self.inner.write().record.preemption_priority = PreemptionPriority::new(priority);
    }

    pub fn deadline(&self) -> u64 {
        self.inner.read().record.deadline
    }

    pub fn set_deadline(&self, deadline: u64) {
        self.inner.write().record.deadline = deadline;
    }

    pub fn arrival_time(&self) -> u64 {
        self.inner.read().record.arrival_time
    }

    pub fn set_arrival_time(&self, arrival_time: u64) {
        self.inner.write().record.arrival_time = arrival_time;
    }

    pub fn num_being_preempted(&self) -> u32 {
        self.inner.read().record.num_being_preempted
    }

    pub fn set_num_being_preempted(&self, num: u32) {
        self.inner.write().record.num_being_preempted = num;
    }

    /// Events absorbed because they were undefined for the state they
    /// arrived in.
    pub fn invalid_event_count(&self) -> u64 {
        self.invalid_event_count.load(Ordering::Relaxed)
    }

    pub fn create_report(&self) -> ContainerReport {
        self.inner.read().record.report()
    }
}

impl std::fmt::Display for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.container_id)
    }
}
