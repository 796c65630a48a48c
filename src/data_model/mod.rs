
use std::fmt::{self, Display};

use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use strum::Display;

/// Exit codes reported in a [`ContainerStatus`]. The values are part of the
/// wire contract with node managers and must not change.
pub mod exit_status {
    pub const SUCCESS: i32 = 0;
    pub const INVALID: i32 = -1000;
    /// The container was aborted by the resource manager (released, expired
    /// or killed without a node-supplied status).
    pub const ABORTED: i32 = -100;
    /// The container was preempted to make room for higher-priority work.
    /// Triggers preemption accounting in the lifecycle core.
    pub const PREEMPTED: i32 = -102;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Default, Hash)]
pub struct ApplicationId {
    pub cluster_timestamp: u64,
    pub id: u32,
}

impl ApplicationId {
    pub fn new(cluster_timestamp: u64, id: u32) -> Self {
        Self {
            cluster_timestamp,
            id,
        }
    }
}

impl Display for ApplicationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "application_{}_{:04}", self.cluster_timestamp, self.id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Default, Hash)]
pub struct AppAttemptId {
    pub app_id: ApplicationId,
    pub attempt_id: u32,
}

impl AppAttemptId {
    pub fn new(app_id: ApplicationId, attempt_id: u32) -> Self {
        Self { app_id, attempt_id }
    }

    pub fn app_id(&self) -> &ApplicationId {
        &self.app_id
    }
}

impl Display for AppAttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "appattempt_{}_{:04}_{:06}",
            self.app_id.cluster_timestamp, self.app_id.id, self.attempt_id
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Default, Hash)]
pub struct ContainerId {
    pub app_attempt_id: AppAttemptId,
    pub id: u64,
}

impl ContainerId {
    pub fn new(app_attempt_id: AppAttemptId, id: u64) -> Self {
        Self { app_attempt_id, id }
    }
}

impl Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let attempt = &self.app_attempt_id;
        write!(
            f,
            "container_{}_{:04}_{:02}_{:06}",
            attempt.app_id.cluster_timestamp, attempt.app_id.id, attempt.attempt_id, self.id
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Default, Hash)]
pub struct NodeId {
    pub host: String,
    pub port: u16,
}

impl NodeId {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// A slice of a worker node's capacity: memory plus virtual cores.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, Hash)]
pub struct Resource {
    pub memory_mb: u64,
    pub vcores: u32,
}

impl Resource {
    pub fn new(memory_mb: u64, vcores: u32) -> Self {
        Self { memory_mb, vcores }
    }

    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_none(&self) -> bool {
        self.memory_mb == 0 && self.vcores == 0
    }

    pub fn add_assign(&mut self, other: &Resource) {
        self.memory_mb += other.memory_mb;
        self.vcores += other.vcores;
    }

    /// Component-wise subtraction floored at zero.
    pub fn subtract_clamped(&mut self, other: &Resource) {
        self.memory_mb = self.memory_mb.saturating_sub(other.memory_mb);
        self.vcores = self.vcores.saturating_sub(other.vcores);
    }

    pub fn subtract(&self, other: &Resource) -> Resource {
        Resource {
            memory_mb: self.memory_mb.saturating_sub(other.memory_mb),
            vcores: self.vcores.saturating_sub(other.vcores),
        }
    }

    pub fn multiply(&self, by: u32) -> Resource {
        Resource {
            memory_mb: self.memory_mb * by as u64,
            vcores: self.vcores * by,
        }
    }

    /// True if every component of `other` fits within this resource.
    pub fn fits(&self, other: &Resource) -> bool {
        self.memory_mb >= other.memory_mb && self.vcores >= other.vcores
    }
}

impl Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<memory:{}, vCores:{}>", self.memory_mb, self.vcores)
    }
}

#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Default, Hash,
)]
pub struct Priority(pub i32);

impl Priority {
    pub fn new(p: i32) -> Self {
        Self(p)
    }

    pub fn get(&self) -> i32 {
        self.0
    }
}

impl Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Ranks containers for preemption; lower values are reclaimed first.
///
/// The value is set as a float by the scheduler but observed as a truncated
/// integer, so the getter is named for the truncation. Equality, ordering
/// and hashing all go through [`PreemptionPriority::floor`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct PreemptionPriority(f32);

impl PreemptionPriority {
    pub const UNDEFINED: PreemptionPriority = PreemptionPriority(-1.0);

    pub fn new(p: f32) -> Self {
        Self(p)
    }

    /// The priority truncated to an integer, as observed by the preemption
    /// policy.
    pub fn floor(&self) -> i32 {
        self.0 as i32
    }
}

impl PartialEq for PreemptionPriority {
    fn eq(&self, other: &Self) -> bool {
        self.floor() == other.floor()
    }
}

impl Eq for PreemptionPriority {}

impl std::hash::Hash for PreemptionPriority {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.floor().hash(state);
    }
}

impl Ord for PreemptionPriority {
    /// Descending: the most preemptable (highest value) sorts first.
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other.floor().cmp(&self.floor())
    }
}

impl PartialOrd for PreemptionPriority {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Display for PreemptionPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{PreemptionPriority: {}}}", self.floor())
    }
}

/// The run state a node manager reports for a container. Distinct from the
/// lifecycle state tracked by the resource manager.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display)]
pub enum ContainerRunState {
    New,
    Running,
    Complete,
}

/// Terminal or suspension status reported for a container.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContainerStatus {
    pub container_id: ContainerId,
    pub run_state: ContainerRunState,
    pub exit_status: i32,
    pub diagnostics: String,
}

impl ContainerStatus {
    pub fn new(
        container_id: ContainerId,
        run_state: ContainerRunState,
        exit_status: i32,
        diagnostics: impl Into<String>,
    ) -> Self {
        Self {
            container_id,
            run_state,
            exit_status,
            diagnostics: diagnostics.into(),
        }
    }
}

/// Container status report supplied by a node manager during resource
/// manager recovery.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeContainerStatus {
    pub container_id: ContainerId,
    pub run_state: ContainerRunState,
    pub exit_status: i32,
    pub diagnostics: String,
    pub allocated_resource: Resource,
    pub priority: Priority,
}

/// A pending allocation request that produced a container. Kept on the
/// container until it is acquired so the scheduler can recover the ask.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceRequest {
    pub priority: Priority,
    pub resource_name: String,
    pub capability: Resource,
    pub num_containers: u32,
}

/// The immutable allocation handed to the lifecycle core when the scheduler
/// places a container on a node.
#[derive(Debug, Clone, Serialize, Deserialize, Builder)]
pub struct ContainerSpec {
    pub container_id: ContainerId,
    pub node_id: NodeId,
    #[builder(setter(into))]
    pub node_http_address: String,
    pub resource: Resource,
    #[builder(default)]
    pub priority: Priority,
}

/// A consistent point-in-time snapshot of a container, produced under the
/// container's read lock.
#[derive(Debug, Clone, Serialize, Deserialize, Builder)]
pub struct ContainerReport {
    pub container_id: ContainerId,
    pub allocated_resource: Resource,
    pub allocated_node: NodeId,
    pub priority: Priority,
    pub creation_time: u64,
    #[builder(default)]
    pub finish_time: Option<u64>,
    #[builder(setter(into), default)]
    pub diagnostics: String,
    #[builder(setter(into))]
    pub log_url: String,
    pub exit_status: i32,
    pub run_state: ContainerRunState,
    #[builder(setter(into))]
    pub node_http_address: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_display() {
        let attempt = AppAttemptId::new(ApplicationId::new(1_700_000_000_000, 7), 2);
        assert_eq!(attempt.to_string(), "appattempt_1700000000000_0007_000002");

        let container = ContainerId::new(attempt, 42);
        assert_eq!(
            container.to_string(),
            "container_1700000000000_0007_02_000042"
        );
    }

    #[test]
    fn test_resource_arithmetic() {
        let mut r = Resource::new(2048, 2);
        r.add_assign(&Resource::new(1024, 1));
        assert_eq!(r, Resource::new(3072, 3));

        r.subtract_clamped(&Resource::new(1024, 1));
        assert_eq!(r, Resource::new(2048, 2));

        // Subtraction floors each component at zero independently.
        r.subtract_clamped(&Resource::new(4096, 1));
        assert_eq!(r, Resource::new(0, 1));

        assert!(!r.is_none());
        r.subtract_clamped(&Resource::new(0, 5));
        assert!(r.is_none());
    }

    #[test]
    fn test_resource_fits() {
        let allocated = Resource::new(4096, 4);
        assert!(allocated.fits(&Resource::new(4096, 4)));
        assert!(allocated.fits(&Resource::new(1024, 1)));
        assert!(!allocated.fits(&Resource::new(8192, 1)));
        assert!(!allocated.fits(&Resource::new(1024, 8)));
    }

    #[test]
    fn test_preemption_priority_floor() {
        let p = PreemptionPriority::new(3.9);
        assert_eq!(p.floor(), 3);

        // Values within the same integer bucket are equal and hash alike.
        assert_eq!(p, PreemptionPriority::new(3.1));
        assert_ne!(p, PreemptionPriority::new(4.0));
    }

    #[test]
    fn test_preemption_priority_order_is_descending() {
        let mut priorities = vec![
            PreemptionPriority::new(1.0),
            PreemptionPriority::new(5.0),
            PreemptionPriority::UNDEFINED,
            PreemptionPriority::new(3.0),
        ];
        priorities.sort();
        let floors: Vec<i32> = priorities.iter().map(|p| p.floor()).collect();
        assert_eq!(floors, vec![5, 3, 1, -1]);
    }
}
