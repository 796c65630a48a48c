use strum::Display;

use crate::data_model::{
    AppAttemptId,
    ApplicationId,
    ContainerId,
    ContainerStatus,
    NodeContainerStatus,
    NodeId,
    Priority,
    Resource,
};

/// Transition-table key for a [`ContainerEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum ContainerEventType {
    Start,
    Reserved,
    Acquired,
    Launched,
    Finished,
    Suspend,
    Resume,
    Expire,
    Released,
    Kill,
    Recover,
    ChangeResource,
}

/// Inbound lifecycle event posted by the scheduler, the node heartbeat
/// handler, the allocation expirer or the application attempt.
#[derive(Debug, Clone)]
pub enum ContainerEvent {
    Start,
    Reserved {
        resource: Resource,
        node_id: NodeId,
        priority: Priority,
    },
    Acquired,
    Launched,
    Finished(ContainerStatus),
    /// Carries the status describing the suspension cause; stored verbatim
    /// so later diagnostics reflect it.
    Suspend(ContainerStatus),
    Resume,
    Expire,
    Released,
    Kill,
    Recover(NodeContainerStatus),
    ChangeResource(Resource),
}

impl ContainerEvent {
    pub fn kind(&self) -> ContainerEventType {
        match self {
            ContainerEvent::Start => ContainerEventType::Start,
            ContainerEvent::Reserved { .. } => ContainerEventType::Reserved,
            ContainerEvent::Acquired => ContainerEventType::Acquired,
            ContainerEvent::Launched => ContainerEventType::Launched,
            ContainerEvent::Finished(_) => ContainerEventType::Finished,
            ContainerEvent::Suspend(_) => ContainerEventType::Suspend,
            ContainerEvent::Resume => ContainerEventType::Resume,
            ContainerEvent::Expire => ContainerEventType::Expire,
            ContainerEvent::Released => ContainerEventType::Released,
            ContainerEvent::Kill => ContainerEventType::Kill,
            ContainerEvent::Recover(_) => ContainerEventType::Recover,
            ContainerEvent::ChangeResource(_) => ContainerEventType::ChangeResource,
        }
    }
}

/// Outbound event emitted to the [`crate::collaborators::EventSink`] while
/// a transition still holds the container's write lock, so observers that
/// post back events see the new state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    AttemptContainerAllocated {
        app_attempt_id: AppAttemptId,
    },
    AttemptContainerFinished {
        app_attempt_id: AppAttemptId,
        status: ContainerStatus,
        node_id: NodeId,
    },
    AppRunningOnNode {
        app_id: ApplicationId,
        node_id: NodeId,
    },
    NodeCleanContainer {
        node_id: NodeId,
        container_id: ContainerId,
    },
}
