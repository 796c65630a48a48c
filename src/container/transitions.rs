//! The container transition table and the per-arc handlers. Handlers run
//! under the container's write lock; everything they emit is observed by
//! collaborators before the lock is released.

use std::sync::LazyLock;

use tracing::warn;

use crate::{
    container::{
        ContainerRecord,
        ContainerState as State,
        events::{ContainerEvent, ContainerEventType as Event, LifecycleEvent},
    },
    data_model::{ContainerRunState, ContainerStatus, exit_status},
    state_machine::{TransitionTable, TransitionTableBuilder},
    utils::epoch_millis,
};

pub(crate) type ContainerTransitionTable =
    TransitionTable<State, Event, ContainerRecord, ContainerEvent>;

pub(crate) static CONTAINER_TRANSITIONS: LazyLock<ContainerTransitionTable> =
    LazyLock::new(|| {
        TransitionTableBuilder::new()
            // Transitions from New
            .transition_with(State::New, State::Allocated, Event::Start, on_started)
            .transition_with(State::New, State::Reserved, Event::Reserved, on_reserved)
            .transition(State::New, State::Killed, Event::Kill)
            .multi_transition(
                State::New,
                &[State::Running, State::Completed],
                Event::Recover,
                choose_recovered,
            )
            // Transitions from Reserved
            .transition_with(State::Reserved, State::Reserved, Event::Reserved, on_reserved)
            .transition_with(State::Reserved, State::Allocated, Event::Start, on_started)
            .transition(State::Reserved, State::Killed, Event::Kill)
            .transition(State::Reserved, State::Released, Event::Released)
            // Transitions from Allocated
            .transition_with(State::Allocated, State::Acquired, Event::Acquired, on_acquired)
            .transition_with(State::Allocated, State::Expired, Event::Expire, on_finished)
            .transition_with(State::Allocated, State::Killed, Event::Kill, on_finished)
            .transition_with(
                State::Allocated,
                State::Allocated,
                Event::ChangeResource,
                on_resource_changed,
            )
            // Transitions from Acquired
            .transition_with(State::Acquired, State::Running, Event::Launched, on_launched)
            .transition_with(
                State::Acquired,
                State::Completed,
                Event::Finished,
                on_finished_at_acquired,
            )
            .transition_with(State::Acquired, State::Released, Event::Released, on_kill)
            .transition_with(State::Acquired, State::Expired, Event::Expire, on_kill)
            .transition_with(State::Acquired, State::Killed, Event::Kill, on_kill)
            .transition_with(
                State::Acquired,
                State::Acquired,
                Event::ChangeResource,
                on_resource_changed,
            )
            // Transitions from Running
            .transition_with(State::Running, State::Completed, Event::Finished, on_finished)
            .transition_with(State::Running, State::Dehydrated, Event::Suspend, on_suspend)
            .transition_with(State::Running, State::Killed, Event::Kill, on_kill)
            .transition_with(State::Running, State::Released, Event::Released, on_kill)
            // An expired container that already launched must be killed, not
            // expired; the late EXPIRE is swallowed.
            .absorb(State::Running, &[Event::Expire])
            .transition_with(
                State::Running,
                State::Running,
                Event::ChangeResource,
                on_resource_changed,
            )
            // Transitions from Dehydrated
            .multi_transition(
                State::Dehydrated,
                &[State::Running, State::Dehydrated],
                Event::Resume,
                choose_resumed,
            )
            .transition_with(State::Dehydrated, State::Dehydrated, Event::Suspend, on_suspend)
            .transition_with(State::Dehydrated, State::Completed, Event::Finished, on_finished)
            .transition_with(State::Dehydrated, State::Killed, Event::Kill, on_kill)
            .transition_with(State::Dehydrated, State::Released, Event::Released, on_kill)
            .absorb(State::Dehydrated, &[Event::Expire])
            .transition_with(
                State::Dehydrated,
                State::Dehydrated,
                Event::ChangeResource,
                on_resource_changed,
            )
            // Terminal self-loops absorb duplicate and late events
            .absorb(State::Completed, &[Event::Expire, Event::Released, Event::Kill])
            .absorb(State::Expired, &[Event::Released, Event::Kill])
            .absorb(
                State::Released,
                &[Event::Expire, Event::Released, Event::Kill, Event::Finished],
            )
            .absorb(
                State::Killed,
                &[Event::Expire, Event::Released, Event::Kill, Event::Finished],
            )
            .build()
    });

fn on_started(record: &mut ContainerRecord, _event: &ContainerEvent) {
    record.emit(LifecycleEvent::AttemptContainerAllocated {
        app_attempt_id: record.app_attempt_id.clone(),
    });
}

fn on_reserved(record: &mut ContainerRecord, event: &ContainerEvent) {
    let ContainerEvent::Reserved {
        resource,
        node_id,
        priority,
    } = event
    else {
        return;
    };
    record.reserved_resource = Some(*resource);
    record.reserved_node = Some(node_id.clone());
    record.reserved_priority = Some(*priority);
}

fn on_acquired(record: &mut ContainerRecord, _event: &ContainerEvent) {
    // The pending ask is satisfied once the app pulls the container.
    record.resource_requests = None;

    record.handles.expirer.register(&record.container_id);

    record.emit(LifecycleEvent::AppRunningOnNode {
        app_id: record.app_attempt_id.app_id().clone(),
        node_id: record.node_id.clone(),
    });
}

fn on_launched(record: &mut ContainerRecord, _event: &ContainerEvent) {
    record.handles.expirer.unregister(&record.container_id);
}

fn on_resource_changed(record: &mut ContainerRecord, event: &ContainerEvent) {
    let ContainerEvent::ChangeResource(resource) = event else {
        return;
    };
    record.allocated_resource = *resource;
}

fn on_suspend(record: &mut ContainerRecord, event: &ContainerEvent) {
    record.suspend_times.push(epoch_millis());

    let ContainerEvent::Suspend(status) = event else {
        return;
    };
    record.finished_status = Some(status.clone());
    record.is_suspending = true;

    if status.exit_status == exit_status::PREEMPTED {
        let delta = record.last_preempted.unwrap_or_default();
        match record.attempt_metrics() {
            Some(metrics) => metrics.update_preemption_info(&delta, &record.container_id),
            None => warn!(
                container_id = %record.container_id,
                "application not found while recording preemption"
            ),
        }
    }
}

fn choose_resumed(record: &mut ContainerRecord, _event: &ContainerEvent) -> State {
    record.resume_times.push(epoch_millis());

    // The resumed delta was already subtracted by add_resumed_resource.
    if record.preempted.is_none() {
        record.is_suspending = false;
        State::Running
    } else {
        State::Dehydrated
    }
}

fn choose_recovered(record: &mut ContainerRecord, event: &ContainerEvent) -> State {
    let ContainerEvent::Recover(report) = event else {
        return State::Running;
    };
    match report.run_state {
        ContainerRunState::Complete => {
            let status = ContainerStatus::new(
                report.container_id.clone(),
                report.run_state,
                report.exit_status,
                report.diagnostics.clone(),
            );
            finish(record, status);
            State::Completed
        }
        ContainerRunState::Running => {
            record.emit(LifecycleEvent::AppRunningOnNode {
                app_id: record.app_attempt_id.app_id().clone(),
                node_id: record.node_id.clone(),
            });
            State::Running
        }
        other => {
            warn!(
                container_id = %record.container_id,
                run_state = %other,
                "unexpected container run state in recovery report"
            );
            State::Running
        }
    }
}

fn on_finished(record: &mut ContainerRecord, event: &ContainerEvent) {
    let status = finished_status_of(record, event);
    finish(record, status);
}

fn on_finished_at_acquired(record: &mut ContainerRecord, event: &ContainerEvent) {
    record.handles.expirer.unregister(&record.container_id);
    on_finished(record, event);
}

fn on_kill(record: &mut ContainerRecord, event: &ContainerEvent) {
    record.handles.expirer.unregister(&record.container_id);

    record.emit(LifecycleEvent::NodeCleanContainer {
        node_id: record.node_id.clone(),
        container_id: record.container_id.clone(),
    });

    on_finished(record, event);
}

/// The status stored with a terminal transition: the remote status when the
/// event carries one, otherwise a synthesized abnormal status naming the
/// system-side cause.
fn finished_status_of(record: &ContainerRecord, event: &ContainerEvent) -> ContainerStatus {
    match event {
        ContainerEvent::Finished(status) => status.clone(),
        ContainerEvent::Expire => abnormal_status(record, "container expired since it was unused"),
        ContainerEvent::Released => {
            abnormal_status(record, "container released by the application")
        }
        _ => abnormal_status(record, "container killed by the resource manager"),
    }
}

fn abnormal_status(record: &ContainerRecord, diagnostics: &str) -> ContainerStatus {
    ContainerStatus::new(
        record.container_id.clone(),
        ContainerRunState::Complete,
        exit_status::ABORTED,
        diagnostics,
    )
}

fn finish(record: &mut ContainerRecord, status: ContainerStatus) {
    let finish_time = epoch_millis();
    record.finish_time = Some(finish_time);
    record.finished_status = Some(status.clone());

    update_attempt_metrics(record, finish_time);

    record.emit(LifecycleEvent::AttemptContainerFinished {
        app_attempt_id: record.app_attempt_id.clone(),
        status,
        node_id: record.node_id.clone(),
    });

    let report = record.report();
    if let Err(err) = record.handles.history.container_finished(&report) {
        warn!(
            container_id = %record.container_id,
            error = %err,
            "failed to write container finish to history"
        );
    }
    if let Err(err) = record
        .handles
        .metrics_publisher
        .container_finished(&report, finish_time)
    {
        warn!(
            container_id = %record.container_id,
            error = %err,
            "failed to publish container finish"
        );
    }
}

fn update_attempt_metrics(record: &mut ContainerRecord, finish_time: u64) {
    let lifetime_ms = finish_time.saturating_sub(record.creation_time);

    // Recorded as "utilization" for continuity with the metrics consumers,
    // this ratio is the fraction of the lifetime spent suspended: each
    // balanced (suspend, resume) pair contributes its suspended interval.
    if !record.suspend_times.is_empty()
        && record.suspend_times.len() == record.resume_times.len()
        && lifetime_ms > 0
    {
        let suspended_ms: u64 = record
            .suspend_times
            .iter()
            .zip(record.resume_times.iter())
            .map(|(suspend, resume)| resume.saturating_sub(*suspend))
            .sum();
        record.utilization = suspended_ms as f64 / lifetime_ms as f64;
    }

    let Some(metrics) = record.attempt_metrics() else {
        warn!(
            container_id = %record.container_id,
            "application not found while finishing container"
        );
        return;
    };

    let preempted_exit = record
        .finished_status
        .as_ref()
        .is_some_and(|status| status.exit_status == exit_status::PREEMPTED);
    if preempted_exit {
        metrics.update_preemption_info(&record.allocated_resource, &record.container_id);
    }

    let memory_seconds = (record.allocated_resource.memory_mb as f64 * record.utilization) as u64
        * lifetime_ms
        / 1000;
    let vcore_seconds = (record.allocated_resource.vcores as f64 * record.utilization) as u64
        * lifetime_ms
        / 1000;
    metrics.update_aggregate_app_resource_usage(memory_seconds, vcore_seconds);
}
