//! Simulate command implementation
//!
//! Drives a synthetic pipeline: every call receives a number of message
//! events through a [`ContextualListener`], and each message fans out tasks to
//! a context-tracking executor. Tasks verify on their worker thread that they
//! observe the call and event they were dispatched from, and count themselves
//! in a call-scoped object.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use ambit::context::{CallContext, InjectionContext, Metadata, ScopedKey, Status, StatusCode};
use ambit::executor::{
    ContextTrackingExecutor, ExecutorOptions, ExecutorStats, named_task, sleep_interruptibly,
};
use ambit::{Ambient, CallEvent, ContextualListener, JoinPolicy};
use anyhow::{Context, Result};
use serde::Serialize;

const TERMINATION_TIMEOUT: Duration = Duration::from_secs(60);

/// Shape of a simulation run.
#[derive(Debug, Clone)]
pub struct Scenario {
    pub calls: usize,
    pub messages: usize,
    pub fanout: usize,
    pub work_ms: u64,
    pub join: bool,
}

#[derive(Debug, Serialize)]
pub struct SimulationReport {
    pub calls: usize,
    pub events: usize,
    pub tasks_dispatched: usize,
    pub tasks_rejected: usize,
    pub context_mismatches: usize,
    pub nested_calls_joined: usize,
    pub scoped_task_count: usize,
    pub calls_completed_ok: usize,
    pub forced_termination: bool,
    pub elapsed_ms: u128,
    pub executor: ExecutorStats,
}

/// Call-scoped counters of a simulated call.
#[derive(Clone, Copy)]
struct CallKeys {
    tasks: ScopedKey<AtomicUsize>,
    rejected: ScopedKey<AtomicUsize>,
}

impl CallKeys {
    fn new() -> Self {
        CallKeys {
            tasks: ScopedKey::new("task-count"),
            rejected: ScopedKey::new("rejected-count"),
        }
    }
}

#[derive(Default)]
struct Tally {
    dispatched: AtomicUsize,
    rejected: AtomicUsize,
    mismatches: AtomicUsize,
    joined: AtomicUsize,
}

pub fn run(scenario: Scenario, options: ExecutorOptions) -> Result<()> {
    let report = simulate(&scenario, options)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

pub fn simulate(scenario: &Scenario, options: ExecutorOptions) -> Result<SimulationReport> {
    let started = Instant::now();
    let ambient = Ambient::new();
    let executor = Arc::new(ambient.executor(options).context("Failed to create executor")?);
    let tally = Arc::new(Tally::default());
    let keys = CallKeys::new();

    let mut calls = Vec::with_capacity(scenario.calls);
    for index in 0..scenario.calls {
        let handler = CallHandler {
            ambient: ambient.clone(),
            executor: executor.clone(),
            tally: tally.clone(),
            keys,
            scenario: scenario.clone(),
        };
        calls.push(run_call(handler, index)?);
    }
    let events = calls.len() * (scenario.messages + 2);

    executor.shutdown();
    let forced_termination = !executor.await_termination(TERMINATION_TIMEOUT);
    if forced_termination {
        let forced = executor.force_terminate();
        log::warn!("simulation did not finish in {TERMINATION_TIMEOUT:?}: {forced:?}");
    }

    let scoped_task_count = calls
        .iter()
        .filter_map(|call| call.scoped_object(&keys.tasks))
        .map(|count| count.load(Ordering::SeqCst))
        .sum();
    let calls_completed_ok = calls
        .iter()
        .filter(|call| call.terminal_outcome().is_some_and(|o| o.status.is_ok()))
        .count();

    Ok(SimulationReport {
        calls: calls.len(),
        events,
        tasks_dispatched: tally.dispatched.load(Ordering::SeqCst),
        tasks_rejected: tally.rejected.load(Ordering::SeqCst),
        context_mismatches: tally.mismatches.load(Ordering::SeqCst),
        nested_calls_joined: tally.joined.load(Ordering::SeqCst),
        scoped_task_count,
        calls_completed_ok,
        forced_termination,
        elapsed_ms: started.elapsed().as_millis(),
        executor: executor.stats(),
    })
}

/// Delivers the events of one call: its messages, a half-close and the completion.
fn run_call(handler: CallHandler, index: usize) -> Result<CallContext> {
    let ambient = handler.ambient.clone();
    let messages = handler.scenario.messages;
    let call = ambient.start_call(
        Metadata::new().with("x-call-index", index.to_string()),
        JoinPolicy::Isolate,
    );
    let mut listener = ContextualListener::new(ambient, call.clone(), handler);
    for message in 0..messages {
        listener.deliver(CallEvent::Message(message))?;
    }
    listener.deliver(CallEvent::HalfClose)?;
    listener.deliver(CallEvent::Complete)?;
    Ok(call)
}

struct CallHandler {
    ambient: Ambient,
    executor: Arc<ContextTrackingExecutor>,
    tally: Arc<Tally>,
    keys: CallKeys,
    scenario: Scenario,
}

impl CallHandler {
    fn dispatch(&self, message: usize) {
        let (Some(call), Some(event)) =
            (self.ambient.current_call(), self.ambient.current_event())
        else {
            self.tally.mismatches.fetch_add(1, Ordering::SeqCst);
            return;
        };

        for fanout in 0..self.scenario.fanout {
            let ambient = self.ambient.clone();
            let tally = self.tally.clone();
            let task_count = self.keys.tasks;
            let expected = (call.clone(), event.clone());
            let work_ms = fastrand::u64(0..=self.scenario.work_ms);
            let work = Duration::from_millis(work_ms);
            let join = self.scenario.join;

            let task = named_task(format!("{}/{message}/{fanout}", call.id()), move || {
                let (call, event) = expected;
                let observed_call = ambient.current_call();
                let observed_event = ambient.current_event();
                if observed_call.as_ref() != Some(&call) || observed_event.as_ref() != Some(&event) {
                    tally.mismatches.fetch_add(1, Ordering::SeqCst);
                    return;
                }
                if join {
                    join_nested(&ambient, &call, &tally, task_count);
                }
                sleep_interruptibly(work);
                call.produce_if_absent(&task_count, || AtomicUsize::new(0))
                    .fetch_add(1, Ordering::SeqCst);
            });

            self.tally.dispatched.fetch_add(1, Ordering::SeqCst);
            let tally = self.tally.clone();
            let rejected = self.keys.rejected;
            let owner = call.clone();
            self.executor.execute_or_else(task, move |task, reason| {
                log::warn!("task {} rejected: {reason}", task.name());
                tally.rejected.fetch_add(1, Ordering::SeqCst);
                owner.produce_if_absent(&rejected, || AtomicUsize::new(0))
                    .fetch_add(1, Ordering::SeqCst);
            });
        }
    }

    fn complete(&self) {
        let Some(call) = self.ambient.current_call() else {
            return;
        };
        let rejected = call
            .scoped_object(&self.keys.rejected)
            .map_or(0, |count| count.load(Ordering::SeqCst));
        let status = if rejected == 0 {
            Status::ok()
        } else {
            Status::new(StatusCode::Unavailable, "some tasks were rejected")
        };
        if let Err(e) = call.set_terminal_outcome(status, Metadata::new()) {
            log::error!("{e}");
        }
    }
}

impl ambit::CallListener<usize> for CallHandler {
    fn on_event(&mut self, event: CallEvent<usize>) {
        match event {
            CallEvent::Message(message) => self.dispatch(message),
            CallEvent::Complete => self.complete(),
            CallEvent::HalfClose | CallEvent::Ready | CallEvent::Cancel => {}
        }
    }
}

/// Starts a call nested in `call` and checks that it shares the call-scoped objects.
fn join_nested(
    ambient: &Ambient,
    call: &CallContext,
    tally: &Tally,
    task_count: ScopedKey<AtomicUsize>,
) {
    let nested = ambient.start_call(Metadata::new(), JoinPolicy::Join);
    let shared = nested.scoped_cache().shares_store_with(call.scoped_cache());
    if nested.parent() == Some(call) && shared {
        tally.joined.fetch_add(1, Ordering::SeqCst);
        // Production through the nested call lands in the parent's cache.
        nested.produce_if_absent(&task_count, || AtomicUsize::new(0));
    } else {
        tally.mismatches.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scenario(join: bool) -> Scenario {
        Scenario {
            calls: 4,
            messages: 3,
            fanout: 2,
            work_ms: 2,
            join,
        }
    }

    #[test]
    fn test_every_task_sees_its_contexts() {
        let report = simulate(&scenario(true), ExecutorOptions::fixed(3)).unwrap();
        assert_eq!(report.calls, 4);
        assert_eq!(report.events, 4 * (3 + 2));
        assert_eq!(report.tasks_dispatched, 24);
        assert_eq!(report.tasks_rejected, 0);
        assert_eq!(report.context_mismatches, 0);
        assert_eq!(report.nested_calls_joined, 24);
        assert_eq!(report.scoped_task_count, 24);
        assert_eq!(report.calls_completed_ok, 4);
        assert!(!report.forced_termination);
        assert_eq!(report.executor.completed, 24);
    }

    #[test]
    fn test_rejections_are_counted() {
        let options = ExecutorOptions::fixed(1).queue_capacity(Some(1));
        let scenario = Scenario {
            calls: 1,
            messages: 1,
            fanout: 20,
            work_ms: 20,
            join: false,
        };
        let report = simulate(&scenario, options).unwrap();
        assert!(report.tasks_rejected > 0);
        assert_eq!(
            report.tasks_rejected + report.scoped_task_count,
            report.tasks_dispatched
        );
        assert_eq!(report.calls_completed_ok, 0);
    }

    #[test]
    fn test_rejections_settle_only_their_own_call() {
        let ambient = Ambient::new();
        let tally = Arc::new(Tally::default());
        let keys = CallKeys::new();
        let scenario = Scenario {
            calls: 3,
            messages: 2,
            fanout: 2,
            work_ms: 0,
            join: false,
        };
        let handler = |executor: &Arc<ContextTrackingExecutor>| CallHandler {
            ambient: ambient.clone(),
            executor: executor.clone(),
            tally: tally.clone(),
            keys,
            scenario: scenario.clone(),
        };

        // The first call overflows a stopped executor; the others run normally.
        let stopped = Arc::new(ambient.executor(ExecutorOptions::fixed(1)).unwrap());
        stopped.shutdown();
        let live = Arc::new(ambient.executor(ExecutorOptions::fixed(2)).unwrap());
        let overflowing = run_call(handler(&stopped), 0).unwrap();
        let healthy: Vec<_> = (1..scenario.calls)
            .map(|index| run_call(handler(&live), index).unwrap())
            .collect();
        live.shutdown();
        assert!(live.await_termination(Duration::from_secs(5)));

        assert_eq!(tally.rejected.load(Ordering::SeqCst), 4);
        let outcome = overflowing.terminal_outcome().unwrap();
        assert_eq!(outcome.status.code, StatusCode::Unavailable);
        assert_eq!(
            overflowing
                .scoped_object(&keys.rejected)
                .unwrap()
                .load(Ordering::SeqCst),
            4
        );
        for call in &healthy {
            assert!(call.terminal_outcome().unwrap().status.is_ok());
            assert!(call.scoped_object(&keys.rejected).is_none());
            assert_eq!(
                call.scoped_object(&keys.tasks)
                    .unwrap()
                    .load(Ordering::SeqCst),
                4
            );
        }
    }
}
