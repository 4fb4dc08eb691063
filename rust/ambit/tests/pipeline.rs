use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ambit::context::{InjectionContext, Metadata, ScopedKey, Status, StatusCode};
use ambit::executor::{ExecutorOptions, RejectionReason, named_task};
use ambit::{Ambient, CallEvent, ContextualListener, JoinPolicy};

#[test]
fn test_events_fan_out_with_their_contexts() {
    let ambient = Ambient::new();
    let executor = Arc::new(ambient.executor(ExecutorOptions::fixed(3)).unwrap());
    let handled = ScopedKey::<AtomicUsize>::new("handled");
    let seen = Arc::new(Mutex::new(Vec::new()));

    let call = ambient.start_call(
        Metadata::new().with("X-Tenant", "acme"),
        JoinPolicy::Isolate,
    );
    let handler = {
        let ambient = ambient.clone();
        let executor = executor.clone();
        let seen = seen.clone();
        move |event: CallEvent<u32>| {
            let CallEvent::Message(n) = event else {
                return;
            };
            let dispatched_from = ambient.current_event().unwrap().id();
            let ambient = ambient.clone();
            let seen = seen.clone();
            executor
                .execute(named_task(format!("message-{n}"), move || {
                    let call = ambient.current_call().unwrap();
                    let event = ambient.current_event().unwrap();
                    call.produce_if_absent(&handled, || AtomicUsize::new(0))
                        .fetch_add(1, Ordering::SeqCst);
                    let tenant = call.metadata().get("x-tenant").map(str::to_string);
                    seen.lock()
                        .unwrap()
                        .push((n, event.id() == dispatched_from, tenant));
                }))
                .unwrap();
        }
    };

    let mut listener = ContextualListener::new(ambient.clone(), call.clone(), handler);
    for n in 0..5 {
        listener.deliver(CallEvent::Message(n)).unwrap();
    }
    listener.deliver(CallEvent::HalfClose).unwrap();
    call.set_terminal_outcome(Status::ok(), Metadata::new()).unwrap();
    listener.deliver(CallEvent::Complete).unwrap();

    executor.shutdown();
    assert!(executor.await_termination(Duration::from_secs(5)));

    let mut seen = seen.lock().unwrap().clone();
    seen.sort();
    assert_eq!(
        seen,
        (0..5)
            .map(|n| (n, true, Some("acme".to_string())))
            .collect::<Vec<_>>()
    );
    assert_eq!(
        call.scoped_object(&handled).unwrap().load(Ordering::SeqCst),
        5
    );
    assert!(call.terminal_outcome().unwrap().status.is_ok());
    assert!(ambient.current_call().is_none());
}

#[test]
fn test_rejection_becomes_unavailable_status() {
    let ambient = Ambient::new();
    let executor = ambient.executor(ExecutorOptions::fixed(1)).unwrap();
    executor.shutdown();

    let call = ambient.start_call(Metadata::new(), JoinPolicy::Isolate);
    let outcome = ambient
        .dispatch(&call, || executor.execute(named_task("late", || ())))
        .unwrap();
    let rejected = outcome.unwrap_err();
    assert_eq!(rejected.reason(), RejectionReason::Shutdown);

    call.set_terminal_outcome(rejected.status(), Metadata::new().with("retry-after", "1"))
        .unwrap();
    let terminal = call.terminal_outcome().unwrap();
    assert_eq!(terminal.status.code, StatusCode::Unavailable);
    assert_eq!(terminal.trailers.get("retry-after"), Some("1"));

    let err = call
        .set_terminal_outcome(Status::ok(), Metadata::new())
        .unwrap_err();
    assert!(err.is_usage());
}

#[test]
fn test_join_policy_serialization() {
    assert_eq!(serde_json::to_string(&JoinPolicy::Join).unwrap(), r#""join""#);
    let policy: JoinPolicy = serde_json::from_str(r#""isolate""#).unwrap();
    assert_eq!(policy, JoinPolicy::default());
}
