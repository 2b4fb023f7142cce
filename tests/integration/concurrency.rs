use std::collections::HashSet;
use std::sync::Mutex;

use courier_core::DisconnectOptions;
use courier_services::RegistryError;

use crate::*;

/// Concurrent connects of distinct logins never share a token or a name.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_tokens_unique_under_concurrent_connects() {
    let registry = registry(test_config());
    let results = Mutex::new(Vec::new());

    std::thread::scope(|scope| {
        for t in 0..8 {
            let registry = &registry;
            let results = &results;
            scope.spawn(move || {
                for i in 0..125 {
                    let ret = login(registry, &format!("user-{t}-{i}"));
                    results.lock().unwrap().push(ret);
                }
            });
        }
    });

    let results = results.into_inner().unwrap();
    assert_eq!(results.len(), 1000);
    let tokens: HashSet<String> = results
        .iter()
        .map(|r| r.secret_session_id.expose().to_string())
        .collect();
    assert_eq!(tokens.len(), 1000, "duplicate secret session id");
    let names: HashSet<String> = results.iter().map(|r| r.session_name.to_string()).collect();
    assert_eq!(names.len(), 1000, "duplicate session name");

    assert_eq!(registry.num_sessions(), 1000);
    assert_eq!(registry.num_subjects(), 1000);
    assert!(registry.index_anomalies().is_empty());
}

/// A subject never holds more sessions than its limit, however many
/// connects race for it.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_capacity_limit_under_concurrent_connects() {
    let registry = registry(test_config());
    let accepted = Mutex::new(0usize);
    let refused = Mutex::new(0usize);

    std::thread::scope(|scope| {
        for _ in 0..10 {
            let registry = &registry;
            let accepted = &accepted;
            let refused = &refused;
            scope.spawn(move || {
                for _ in 0..5 {
                    match registry.connect(request("crowd").with_max_sessions(5)) {
                        Ok(_) => *accepted.lock().unwrap() += 1,
                        Err(RegistryError::Capacity { max, .. }) => {
                            assert_eq!(max, 5);
                            *refused.lock().unwrap() += 1;
                        }
                        Err(e) => panic!("unexpected error: {e}"),
                    }
                }
            });
        }
    });

    assert_eq!(accepted.into_inner().unwrap(), 5);
    assert_eq!(refused.into_inner().unwrap(), 45);
    let subject = registry.subject_by_name("crowd").unwrap();
    assert_eq!(subject.num_sessions(), 5);
    assert_eq!(registry.num_sessions(), 5);
}

/// After a mix of connects, disconnects and routed messages the two
/// indexes agree.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_indexes_consistent_after_mixed_operations() {
    let registry = registry(test_config());

    std::thread::scope(|scope| {
        for t in 0..6 {
            let registry = &registry;
            scope.spawn(move || {
                let login_name = format!("mixed-{}", t % 3);
                for i in 0..40 {
                    let ret = match registry.connect(request(&login_name)) {
                        Ok(ret) => ret,
                        Err(RegistryError::Capacity { .. }) => continue,
                        Err(e) => panic!("unexpected error: {e}"),
                    };
                    registry
                        .route_ptp(&login_name, entry(&format!("{t}-{i}")))
                        .unwrap();
                    if i % 3 != 0 {
                        let options = if i % 2 == 0 {
                            DisconnectOptions::default()
                        } else {
                            DisconnectOptions::keep_queue()
                        };
                        registry.disconnect(&ret.secret_session_id, options).unwrap();
                    }
                }
            });
        }
    });

    assert!(
        registry.index_anomalies().is_empty(),
        "anomalies: {:?}",
        registry.index_anomalies()
    );
    let by_subject: usize = registry.subjects().iter().map(|s| s.num_sessions()).sum();
    assert_eq!(registry.num_sessions(), by_subject);
    assert!(registry.verify_consistency());
}
