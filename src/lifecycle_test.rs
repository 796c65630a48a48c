use std::time::Duration;

use mock_instant::global::MockClock;

use crate::{
    config::LifecycleConfig,
    container::{
        Container,
        ContainerState,
        events::{ContainerEvent, LifecycleEvent},
    },
    data_model::{
        ContainerRunState,
        NodeId,
        Priority,
        Resource,
        exit_status,
        test_objects::tests::{
            TEST_USER,
            mock_app_attempt_id,
            mock_app_id,
            mock_container_id,
            mock_container_spec,
            mock_finished_status,
            mock_preempted_status,
            mock_recovery_report,
            mock_resource_requests,
        },
    },
    testing::{TestHarness, lock_clock},
};

fn new_container(harness: &TestHarness) -> Container {
    Container::new(
        mock_container_spec(1),
        mock_app_attempt_id(),
        TEST_USER,
        harness.handles_for(mock_app_id()),
        &LifecycleConfig::default(),
    )
}

#[test]
fn test_allocate_acquire_launch_finish() {
    let harness = TestHarness::new();
    let container = new_container(&harness);
    assert_eq!(container.state(), ContainerState::New);

    container.handle(ContainerEvent::Start);
    assert_eq!(container.state(), ContainerState::Allocated);

    container.handle(ContainerEvent::Acquired);
    assert_eq!(container.state(), ContainerState::Acquired);

    container.handle(ContainerEvent::Launched);
    assert_eq!(container.state(), ContainerState::Running);

    container.handle(ContainerEvent::Finished(mock_finished_status(
        1,
        exit_status::SUCCESS,
    )));
    assert_eq!(container.state(), ContainerState::Completed);
    assert!(container.finish_time().is_some());
    assert_eq!(container.exit_status(), exit_status::SUCCESS);
    assert_eq!(container.run_state(), ContainerRunState::Complete);
    assert_eq!(container.utilization(), 1.0);
    assert_eq!(container.invalid_event_count(), 0);

    let events = harness.events();
    assert_eq!(events.len(), 3);
    assert!(matches!(
        events[0],
        LifecycleEvent::AttemptContainerAllocated { .. }
    ));
    assert!(matches!(events[1], LifecycleEvent::AppRunningOnNode { .. }));
    assert!(matches!(
        events[2],
        LifecycleEvent::AttemptContainerFinished { .. }
    ));

    assert_eq!(
        harness.expirer.registered.lock().as_slice(),
        &[mock_container_id(1)]
    );
    assert_eq!(
        harness.expirer.unregistered.lock().as_slice(),
        &[mock_container_id(1)]
    );
    assert_eq!(harness.history.started.lock().len(), 1);
    assert_eq!(harness.history.finished.lock().len(), 1);
    assert_eq!(harness.publisher.created.lock().len(), 1);
    assert_eq!(harness.publisher.finished.lock().len(), 1);
}

#[test]
fn test_suspend_resume_accounting() {
    let _clock = lock_clock();
    MockClock::set_system_time(Duration::from_millis(100_000));

    let harness = TestHarness::new();
    let container = new_container(&harness);

    container.handle(ContainerEvent::Start);
    container.handle(ContainerEvent::Acquired);
    container.handle(ContainerEvent::Launched);
    assert_eq!(container.state(), ContainerState::Running);

    // The scheduler withholds one unit, then the node reports the suspension.
    MockClock::advance_system_time(Duration::from_millis(10_000));
    container.add_preempted_resource(Resource::new(1024, 1));
    container.handle(ContainerEvent::Suspend(mock_preempted_status(1)));

    assert_eq!(container.state(), ContainerState::Dehydrated);
    assert!(container.is_suspending());
    assert_eq!(container.preempted_resource(), Resource::new(1024, 1));
    assert_eq!(container.current_used_resource(), Resource::new(1024, 1));
    assert_eq!(container.suspend_times().len(), 1);
    assert_eq!(container.resume_times().len(), 0);
    assert_eq!(
        harness.attempt_metrics.preemptions.lock().as_slice(),
        &[(Resource::new(1024, 1), mock_container_id(1))]
    );

    // The full delta comes back five seconds later.
    MockClock::advance_system_time(Duration::from_millis(5_000));
    container.add_resumed_resource(Resource::new(1024, 1));
    container.handle(ContainerEvent::Resume);

    assert_eq!(container.state(), ContainerState::Running);
    assert!(!container.is_suspending());
    assert!(container.preempted_resource().is_none());
    assert_eq!(container.current_used_resource(), Resource::new(2048, 2));
    assert_eq!(container.suspend_times().len(), container.resume_times().len());

    MockClock::advance_system_time(Duration::from_millis(5_000));
    container.handle(ContainerEvent::Finished(mock_finished_status(
        1,
        exit_status::SUCCESS,
    )));
    assert_eq!(container.state(), ContainerState::Completed);
    assert_eq!(container.finish_time(), Some(120_000));

    // 5s suspended out of a 20s lifetime.
    assert_eq!(container.utilization(), 0.25);

    // Preemption was recorded exactly once, at suspension time.
    assert_eq!(harness.attempt_metrics.preemptions.lock().len(), 1);

    // memory: (2048 * 0.25) * 20s; vcores: (2 * 0.25) truncates to zero.
    assert_eq!(
        harness.attempt_metrics.aggregate_usage.lock().as_slice(),
        &[(10_240, 0)]
    );
}

#[test]
fn test_kill_at_allocated() {
    let harness = TestHarness::new();
    let container = new_container(&harness);

    container.handle(ContainerEvent::Start);
    container.handle(ContainerEvent::Kill);

    assert_eq!(container.state(), ContainerState::Killed);
    assert_eq!(container.exit_status(), exit_status::ABORTED);
    assert_eq!(
        container.diagnostics().as_deref(),
        Some("container killed by the resource manager")
    );

    // Nothing was acquired yet, so there is no expirer registration to
    // undo and no node-side process to clean up.
    let events = harness.events();
    assert_eq!(events.len(), 2);
    assert!(matches!(
        events[0],
        LifecycleEvent::AttemptContainerAllocated { .. }
    ));
    assert!(matches!(
        events[1],
        LifecycleEvent::AttemptContainerFinished { .. }
    ));
    assert!(harness.expirer.registered.lock().is_empty());
    assert!(harness.expirer.unregistered.lock().is_empty());
    assert_eq!(harness.history.finished.lock().len(), 1);
}

#[test]
fn test_last_reservation_wins() {
    let harness = TestHarness::new();
    let container = new_container(&harness);
    container.set_resource_requests(Some(mock_resource_requests()));

    container.handle(ContainerEvent::Reserved {
        resource: Resource::new(1024, 1),
        node_id: NodeId::new("node-a", 45454),
        priority: Priority::new(1),
    });
    assert_eq!(container.state(), ContainerState::Reserved);

    container.handle(ContainerEvent::Reserved {
        resource: Resource::new(4096, 4),
        node_id: NodeId::new("node-b", 45454),
        priority: Priority::new(2),
    });
    assert_eq!(container.state(), ContainerState::Reserved);

    container.handle(ContainerEvent::Start);
    assert_eq!(container.reserved_resource(), Some(Resource::new(4096, 4)));
    assert_eq!(container.reserved_node(), Some(NodeId::new("node-b", 45454)));
    assert_eq!(container.reserved_priority(), Some(Priority::new(2)));
    assert!(container.resource_requests().is_some());

    container.handle(ContainerEvent::Acquired);
    assert_eq!(container.state(), ContainerState::Acquired);
    assert!(container.resource_requests().is_none());
}

#[test]
fn test_recover_to_running() {
    let harness = TestHarness::new();
    let container = new_container(&harness);

    container.handle(ContainerEvent::Recover(mock_recovery_report(
        1,
        ContainerRunState::Running,
    )));

    assert_eq!(container.state(), ContainerState::Running);
    let events = harness.events();
    assert_eq!(events.len(), 1);
    assert!(matches!(events[0], LifecycleEvent::AppRunningOnNode { .. }));
}

#[test]
fn test_recover_to_completed() {
    let harness = TestHarness::new();
    let container = new_container(&harness);

    container.handle(ContainerEvent::Recover(mock_recovery_report(
        1,
        ContainerRunState::Complete,
    )));

    assert_eq!(container.state(), ContainerState::Completed);
    assert!(container.finish_time().is_some());
    assert_eq!(
        container.diagnostics().as_deref(),
        Some("recovered from node report")
    );
    assert_eq!(harness.history.finished.lock().len(), 1);
    assert!(matches!(
        harness.events()[0],
        LifecycleEvent::AttemptContainerFinished { .. }
    ));
}

#[test]
fn test_recover_with_unexpected_state_defaults_to_running() {
    let harness = TestHarness::new();
    let container = new_container(&harness);

    container.handle(ContainerEvent::Recover(mock_recovery_report(
        1,
        ContainerRunState::New,
    )));

    assert_eq!(container.state(), ContainerState::Running);
    assert!(harness.events().is_empty());
    assert_eq!(container.invalid_event_count(), 0);
}

#[test]
fn test_expire_at_acquired_goes_through_kill() {
    let harness = TestHarness::new();
    let container = new_container(&harness);

    container.handle(ContainerEvent::Start);
    container.handle(ContainerEvent::Acquired);
    container.handle(ContainerEvent::Expire);

    assert_eq!(container.state(), ContainerState::Expired);
    assert_eq!(container.exit_status(), exit_status::ABORTED);

    let events = harness.events();
    assert_eq!(events.len(), 4);
    assert!(matches!(
        events[2],
        LifecycleEvent::NodeCleanContainer { .. }
    ));
    assert!(matches!(
        events[3],
        LifecycleEvent::AttemptContainerFinished { .. }
    ));
    assert_eq!(harness.expirer.registered.lock().len(), 1);
    assert_eq!(harness.expirer.unregistered.lock().len(), 1);
}

#[test]
fn test_expire_is_absorbed_after_launch() {
    let harness = TestHarness::new();
    let container = new_container(&harness);

    container.handle(ContainerEvent::Start);
    container.handle(ContainerEvent::Acquired);
    container.handle(ContainerEvent::Launched);
    let emitted_before = harness.events().len();

    container.handle(ContainerEvent::Expire);
    assert_eq!(container.state(), ContainerState::Running);

    container.add_preempted_resource(Resource::new(1024, 1));
    container.handle(ContainerEvent::Suspend(mock_preempted_status(1)));
    container.handle(ContainerEvent::Expire);
    assert_eq!(container.state(), ContainerState::Dehydrated);

    // Both late EXPIREs are defined self-loops, not invalid events.
    assert_eq!(container.invalid_event_count(), 0);
    assert_eq!(harness.events().len(), emitted_before);
}

#[test]
fn test_terminal_states_absorb_duplicate_events() {
    let harness = TestHarness::new();
    let container = new_container(&harness);

    container.handle(ContainerEvent::Start);
    container.handle(ContainerEvent::Acquired);
    container.handle(ContainerEvent::Launched);
    container.handle(ContainerEvent::Finished(mock_finished_status(
        1,
        exit_status::SUCCESS,
    )));
    assert_eq!(container.state(), ContainerState::Completed);
    assert!(container.state().is_terminal());

    let finish_time = container.finish_time();
    let emitted = harness.events().len();

    for _ in 0..2 {
        container.handle(ContainerEvent::Expire);
        container.handle(ContainerEvent::Released);
        container.handle(ContainerEvent::Kill);
    }

    assert_eq!(container.state(), ContainerState::Completed);
    assert_eq!(container.finish_time(), finish_time);
    assert_eq!(container.invalid_event_count(), 0);
    assert_eq!(harness.events().len(), emitted);
    assert_eq!(harness.history.finished.lock().len(), 1);
}

#[test]
fn test_undefined_events_are_counted_and_ignored() {
    let harness = TestHarness::new();
    let container = new_container(&harness);

    container.handle(ContainerEvent::Launched);
    assert_eq!(container.state(), ContainerState::New);
    assert_eq!(container.invalid_event_count(), 1);

    container.handle(ContainerEvent::Resume);
    assert_eq!(container.state(), ContainerState::New);
    assert_eq!(container.invalid_event_count(), 2);

    container.handle(ContainerEvent::ChangeResource(Resource::new(4096, 4)));
    assert_eq!(container.invalid_event_count(), 3);
    assert_eq!(container.allocated_resource(), Resource::new(2048, 2));

    // The container is still usable afterwards.
    container.handle(ContainerEvent::Start);
    assert_eq!(container.state(), ContainerState::Allocated);
}

#[test]
fn test_resource_update_overwrites_allocation() {
    let harness = TestHarness::new();
    let container = new_container(&harness);

    container.handle(ContainerEvent::Start);
    container.handle(ContainerEvent::ChangeResource(Resource::new(4096, 4)));

    assert_eq!(container.state(), ContainerState::Allocated);
    assert_eq!(container.allocated_resource(), Resource::new(4096, 4));
    assert_eq!(container.invalid_event_count(), 0);
}

#[test]
fn test_preemption_accounting_conservation() {
    let harness = TestHarness::new();
    let container = new_container(&harness);

    container.add_preempted_resource(Resource::new(1024, 1));
    container.add_preempted_resource(Resource::new(512, 1));
    assert_eq!(container.preempted_resource(), Resource::new(1536, 2));
    assert_eq!(container.last_preempted_resource(), Some(Resource::new(512, 1)));

    container.add_resumed_resource(Resource::new(512, 1));
    assert_eq!(container.preempted_resource(), Resource::new(1024, 1));
    assert_eq!(container.last_resumed_resource(), Some(Resource::new(512, 1)));

    // Over-resuming floors each component at zero.
    container.add_resumed_resource(Resource::new(4096, 0));
    assert_eq!(container.preempted_resource(), Resource::new(0, 1));
    container.add_resumed_resource(Resource::new(0, 4));
    assert!(container.preempted_resource().is_none());
}

#[test]
fn test_partial_resume_stays_dehydrated() {
    let harness = TestHarness::new();
    let container = new_container(&harness);

    container.handle(ContainerEvent::Start);
    container.handle(ContainerEvent::Acquired);
    container.handle(ContainerEvent::Launched);

    container.add_preempted_resource(Resource::new(1024, 2));
    container.handle(ContainerEvent::Suspend(mock_preempted_status(1)));
    assert_eq!(container.state(), ContainerState::Dehydrated);

    // Only half the delta comes back; the container stays dehydrated.
    container.add_resumed_resource(Resource::new(512, 1));
    container.handle(ContainerEvent::Resume);
    assert_eq!(container.state(), ContainerState::Dehydrated);
    assert!(container.is_suspending());
    assert_eq!(container.preempted_resource(), Resource::new(512, 1));

    container.add_resumed_resource(Resource::new(512, 1));
    container.handle(ContainerEvent::Resume);
    assert_eq!(container.state(), ContainerState::Running);
    assert!(!container.is_suspending());

    // Every RESUME appends a timestamp, including the partial one.
    assert_eq!(container.suspend_times().len(), 1);
    assert_eq!(container.resume_times().len(), 2);
}

#[test]
fn test_suspension_balance_invariant() {
    let harness = TestHarness::new();
    let container = new_container(&harness);

    container.handle(ContainerEvent::Start);
    container.handle(ContainerEvent::Acquired);
    container.handle(ContainerEvent::Launched);

    for round in 1..=3u64 {
        container.add_preempted_resource(Resource::new(256, 0));
        container.handle(ContainerEvent::Suspend(mock_preempted_status(1)));
        assert_eq!(
            container.suspend_times().len() - container.resume_times().len(),
            1
        );
        assert!(container.is_suspending());

        container.add_resumed_resource(Resource::new(256, 0));
        container.handle(ContainerEvent::Resume);
        assert_eq!(container.suspend_times().len(), round as usize);
        assert_eq!(container.suspend_times().len(), container.resume_times().len());
        assert!(!container.is_suspending());
    }
}

#[test]
fn test_sr_resource_unit_scales_with_granularity() {
    let harness = TestHarness::new();
    let container = new_container(&harness);

    // (2048 / 2 vcores, 1) scaled by the default pr_number of 2.
    assert_eq!(container.sr_resource_unit(), Resource::new(2048, 2));
}

#[test]
fn test_external_mutators() {
    let harness = TestHarness::new();
    let container = new_container(&harness);

    assert!(!container.is_am_container());
    container.set_am_container(true);
    assert!(container.is_am_container());

    container.set_preemption_priority(3.9);
    assert_eq!(container.preemption_priority_floor(), 3);

    assert_eq!(container.resume_opportunity(), 0);
    container.inc_resume_opportunity();
    container.inc_resume_opportunity();
    assert_eq!(container.resume_opportunity(), 2);
    container.reset_resume_opportunity();
    assert_eq!(container.resume_opportunity(), 0);

    container.set_deadline(42_000);
    container.set_arrival_time(1_000);
    container.set_num_being_preempted(3);
    assert_eq!(container.deadline(), 42_000);
    assert_eq!(container.arrival_time(), 1_000);
    assert_eq!(container.num_being_preempted(), 3);
}

#[test]
fn test_container_report_snapshot() {
    let harness = TestHarness::new();
    let container = new_container(&harness);

    container.handle(ContainerEvent::Start);
    let report = container.create_report();
    assert_eq!(report.container_id, mock_container_id(1));
    assert_eq!(report.allocated_resource, Resource::new(2048, 2));
    assert_eq!(report.finish_time, None);
    assert_eq!(report.run_state, ContainerRunState::Running);
    assert!(report.log_url.contains(&mock_container_id(1).to_string()));
    assert!(report.log_url.contains(TEST_USER));

    container.handle(ContainerEvent::Acquired);
    container.handle(ContainerEvent::Launched);
    container.handle(ContainerEvent::Finished(mock_finished_status(
        1,
        exit_status::SUCCESS,
    )));

    let report = container.create_report();
    assert_eq!(report.finish_time, container.finish_time());
    assert_eq!(report.run_state, ContainerRunState::Complete);
    assert_eq!(report.exit_status, exit_status::SUCCESS);
}

#[test]
fn test_release_from_reserved() {
    let harness = TestHarness::new();
    let container = new_container(&harness);

    container.handle(ContainerEvent::Reserved {
        resource: Resource::new(1024, 1),
        node_id: NodeId::new("node-a", 45454),
        priority: Priority::new(1),
    });
    container.handle(ContainerEvent::Released);

    // Releasing a reservation is bookkeeping only; nothing ran, nothing to
    // finish or clean.
    assert_eq!(container.state(), ContainerState::Released);
    assert!(container.finish_time().is_none());
    assert!(harness.events().is_empty());
}

#[test]
fn test_finished_while_dehydrated_records_preempted_exit() {
    let _clock = lock_clock();
    MockClock::set_system_time(Duration::from_millis(500_000));

    let harness = TestHarness::new();
    let container = new_container(&harness);

    container.handle(ContainerEvent::Start);
    container.handle(ContainerEvent::Acquired);
    container.handle(ContainerEvent::Launched);

    MockClock::advance_system_time(Duration::from_millis(4_000));
    container.add_preempted_resource(Resource::new(2048, 2));
    container.handle(ContainerEvent::Suspend(mock_preempted_status(1)));
    assert_eq!(container.current_used_resource(), Resource::none());

    // The node gives up on the suspended container entirely.
    MockClock::advance_system_time(Duration::from_millis(4_000));
    container.handle(ContainerEvent::Finished(mock_preempted_status(1)));

    assert_eq!(container.state(), ContainerState::Completed);
    assert_eq!(container.exit_status(), exit_status::PREEMPTED);

    // Once at suspension with the delta, once at finish with the full
    // allocation.
    assert_eq!(
        harness.attempt_metrics.preemptions.lock().as_slice(),
        &[
            (Resource::new(2048, 2), mock_container_id(1)),
            (Resource::new(2048, 2), mock_container_id(1)),
        ]
    );

    // Unbalanced histories (one suspend, no resume) leave utilization at
    // its default.
    assert_eq!(container.utilization(), 1.0);
}
