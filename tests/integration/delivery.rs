use std::sync::{Arc, Mutex};

use courier_core::config::CourierConfig;
use courier_core::{ConnectRequest, Credentials, DisconnectOptions, QueueEntry};
use courier_services::dispatch::QueueDispatchFactory;
use courier_services::error_handler::{ErrorHandler, ErrorInfo};
use courier_services::queue::MemoryQueueFactory;
use courier_services::security::PluginRegistry;
use courier_services::{Authenticate, Collaborators, Routed};

use crate::*;

#[derive(Default)]
struct RecordingErrors {
    errors: Mutex<Vec<ErrorInfo>>,
}

impl ErrorHandler for RecordingErrors {
    fn handle_error(&self, info: ErrorInfo) {
        self.errors.lock().unwrap().push(info);
    }
}

struct Setup {
    registry: Arc<Authenticate>,
    dispatch: Arc<QueueDispatchFactory>,
    errors: Arc<RecordingErrors>,
}

fn setup(config: CourierConfig) -> Setup {
    let dispatch = Arc::new(QueueDispatchFactory::new());
    let errors = Arc::new(RecordingErrors::default());
    let collab = Collaborators {
        security: Arc::new(PluginRegistry::from_config(&config.security)),
        queues: Arc::new(MemoryQueueFactory),
        dispatch: dispatch.clone(),
        errors: errors.clone(),
        subscriptions: None,
    };
    Setup {
        registry: registry_with(config, collab),
        dispatch,
        errors,
    }
}

fn payloads(entries: Vec<QueueEntry>) -> Vec<String> {
    entries
        .into_iter()
        .map(|e| String::from_utf8_lossy(&e.payload).into_owned())
        .collect()
}

/// Entries for an absent subject are held and delivered, in order, to the
/// first session that logs in with a callback.
#[tokio::test]
async fn test_store_and_forward() {
    let s = setup(test_config());

    assert_eq!(s.registry.route_ptp("alice", entry("one")).unwrap(), Routed::Held);
    assert_eq!(s.registry.route_ptp("alice", entry("two")).unwrap(), Routed::Held);
    let subject = s.registry.subject_by_name("alice").unwrap();
    assert_eq!(subject.holding_queue().num_entries(), 2);

    // A session without callback does not drain the holding queue.
    s.registry
        .connect(ConnectRequest::new(Credentials::new("alice", "secret")))
        .unwrap();
    assert_eq!(subject.holding_queue().num_entries(), 2);

    let ret = login(&s.registry, "alice");
    assert_eq!(subject.holding_queue().num_entries(), 0);

    let dispatcher = s.dispatch.dispatcher(&ret.session_name).unwrap();
    assert_eq!(payloads(dispatcher.take_batch(10)), vec!["one", "two"]);

    // With a live session, entries go straight through.
    assert_eq!(
        s.registry.route_ptp("alice", entry("three")).unwrap(),
        Routed::Forwarded(1)
    );
    assert_eq!(payloads(dispatcher.take_batch(10)), vec!["three"]);
    let session = s.registry.check(&ret.secret_session_id).unwrap();
    assert_eq!(session.num_updates(), 3);
}

/// Every live session of a subject gets its own copy.
#[tokio::test]
async fn test_entries_fan_out_to_all_sessions() {
    let s = setup(test_config());
    let a = login(&s.registry, "bob");
    let b = login(&s.registry, "bob");

    assert_eq!(
        s.registry.route_ptp("bob", entry("hello")).unwrap(),
        Routed::Forwarded(2)
    );
    for ret in [&a, &b] {
        let dispatcher = s.dispatch.dispatcher(&ret.session_name).unwrap();
        assert_eq!(payloads(dispatcher.take_batch(10)), vec!["hello"]);
    }
}

/// A full session queue is reported to the error handler and does not stop
/// delivery to the other sessions.
#[tokio::test]
async fn test_partial_delivery_failure() {
    let mut config = test_config();
    config.session.callback_queue_max_entries = 2;
    let s = setup(config);
    let slow = login(&s.registry, "carol");
    let fast = login(&s.registry, "carol");
    let fast_pipe = s.dispatch.dispatcher(&fast.session_name).unwrap();

    for i in 0..2 {
        s.registry.route_ptp("carol", entry(&format!("m{i}"))).unwrap();
    }
    assert_eq!(fast_pipe.take_batch(10).len(), 2);

    assert_eq!(
        s.registry.route_ptp("carol", entry("m2")).unwrap(),
        Routed::Forwarded(1)
    );
    assert_eq!(payloads(fast_pipe.take_batch(10)), vec!["m2"]);

    let errors = s.errors.errors.lock().unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].session, slow.session_name);
    assert_eq!(errors[0].entry_id.len(), 64);
}

/// When every session queue is full the entry is parked for later.
#[tokio::test]
async fn test_entry_held_when_all_queues_full() {
    let mut config = test_config();
    config.session.callback_queue_max_entries = 1;
    let s = setup(config);
    let ret = login(&s.registry, "dave");

    s.registry.route_ptp("dave", entry("first")).unwrap();
    assert_eq!(s.registry.route_ptp("dave", entry("second")).unwrap(), Routed::Held);
    // Once on the direct put, once on the drain retry after parking.
    assert_eq!(s.errors.errors.lock().unwrap().len(), 2);
    let subject = s.registry.subject_by_name("dave").unwrap();
    assert_eq!(subject.holding_queue().num_entries(), 1);

    let pipe = s.dispatch.dispatcher(&ret.session_name).unwrap();
    assert_eq!(payloads(pipe.take_batch(10)), vec!["first"]);
}

/// A client logging in again under its public session id replaces the
/// stale session and keeps the entries queued for it.
#[tokio::test]
async fn test_relogin_by_public_id_adopts_queue() {
    let s = setup(test_config());
    let first = s
        .registry
        .connect(request("erin").with_public_session_id(7))
        .unwrap();
    s.registry.route_ptp("erin", entry("a")).unwrap();
    s.registry.route_ptp("erin", entry("b")).unwrap();

    let second = s
        .registry
        .connect(request("erin").with_public_session_id(7))
        .unwrap();
    assert!(!second.reconnected);
    assert_eq!(second.session_name, first.session_name);
    assert_ne!(second.secret_session_id, first.secret_session_id);
    assert!(s.registry.check(&first.secret_session_id).is_err());
    assert_eq!(s.registry.num_sessions(), 1);

    let session = s.registry.check(&second.secret_session_id).unwrap();
    assert_eq!(session.queue_entries(), 2);
    let pipe = s.dispatch.dispatcher(&second.session_name).unwrap();
    assert_eq!(payloads(pipe.take_batch(10)), vec!["a", "b"]);
}

/// Re-login without a callback hands the stale session's entries to the
/// subject's holding queue.
#[tokio::test]
async fn test_relogin_without_callback_holds_entries() {
    let s = setup(test_config());
    s.registry
        .connect(request("fay").with_public_session_id(3))
        .unwrap();
    s.registry.route_ptp("fay", entry("kept")).unwrap();

    s.registry
        .connect(ConnectRequest::new(Credentials::new("fay", "secret")).with_public_session_id(3))
        .unwrap();
    let subject = s.registry.subject_by_name("fay").unwrap();
    assert_eq!(subject.num_sessions(), 1);
    assert_eq!(subject.holding_queue().num_entries(), 1);
}

/// A logout clearing the queue drops held entries of the last session;
/// keeping it leaves them for the next login.
#[tokio::test]
async fn test_logout_queue_clearing() {
    let s = setup(test_config());
    let ret = s
        .registry
        .connect(ConnectRequest::new(Credentials::new("gus", "secret")))
        .unwrap();
    s.registry.route_ptp("gus", entry("parked")).unwrap();

    s.registry
        .disconnect(&ret.secret_session_id, DisconnectOptions::keep_queue())
        .unwrap();
    let subject = s.registry.subject_by_name("gus").unwrap();
    assert_eq!(subject.holding_queue().num_entries(), 1);

    let ret = s
        .registry
        .connect(ConnectRequest::new(Credentials::new("gus", "secret")))
        .unwrap();
    s.registry
        .disconnect(&ret.secret_session_id, DisconnectOptions::default())
        .unwrap();
    assert!(s.registry.subject_by_name("gus").is_none());
}
