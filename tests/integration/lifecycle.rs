use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;

use courier_core::{CallbackAddress, ConnectRequest, Credentials, DisconnectOptions};
use courier_services::dispatch::{DeliveryPipe, QueueDispatchFactory};
use courier_services::{ClientEvent, ClientEventKind, ClientListener, Collaborators, RegistryError};

use crate::*;

#[derive(Default)]
struct EventLog {
    events: Mutex<Vec<(ClientEventKind, String)>>,
}

impl EventLog {
    fn kinds(&self) -> Vec<ClientEventKind> {
        self.events.lock().unwrap().iter().map(|(k, _)| *k).collect()
    }
}

impl ClientListener for EventLog {
    fn on_event(&self, event: &ClientEvent<'_>) -> anyhow::Result<()> {
        self.events
            .lock()
            .unwrap()
            .push((event.kind, event.session.name().to_string()));
        Ok(())
    }
}

/// An idle session is removed once its timeout elapses, through the
/// ordinary logout path.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_idle_session_expires() -> Result<()> {
    let config = test_config();
    let dispatch = Arc::new(QueueDispatchFactory::new());
    let mut collab = Collaborators::in_memory(&config);
    collab.dispatch = dispatch.clone();
    let registry = registry_with(config, collab);
    let log = Arc::new(EventLog::default());
    registry.add_listener(log.clone());

    let ret = registry.connect(request("idle").with_session_timeout_ms(50))?;
    let session = registry.check(&ret.secret_session_id)?;
    assert!(session.time_to_expiry().is_some());
    let dispatcher = dispatch.dispatcher(&ret.session_name).expect("live dispatcher");

    wait_until(Duration::from_secs(5), || registry.num_sessions() == 0).await?;
    assert!(session.is_shutdown());
    assert!(!session.has_callback());
    assert!(dispatcher.is_shutdown());
    assert!(dispatcher.take_batch(10).is_empty());
    assert!(dispatch.dispatcher(&ret.session_name).is_none());
    assert!(matches!(
        registry.check(&ret.secret_session_id),
        Err(RegistryError::AccessDenied(_))
    ));
    assert_eq!(log.kinds(), vec![ClientEventKind::Login, ClientEventKind::Logout]);
    assert!(registry.subject_by_name("idle").is_none());
    Ok(())
}

/// Activity pushes the expiry back.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_keep_alive_defers_expiry() -> Result<()> {
    let registry = registry(test_config());
    let ret = registry.connect(request("busy").with_session_timeout_ms(400))?;

    for _ in 0..10 {
        tokio::time::sleep(Duration::from_millis(80)).await;
        registry.keep_alive(&ret.secret_session_id)?;
    }
    assert_eq!(registry.num_sessions(), 1);

    wait_until(Duration::from_secs(5), || registry.num_sessions() == 0).await?;
    Ok(())
}

/// A timeout of zero never expires.
#[tokio::test]
async fn test_zero_timeout_never_expires() -> Result<()> {
    let registry = registry(test_config());
    let ret = registry.connect(request("forever").with_session_timeout_ms(0))?;
    let session = registry.check(&ret.secret_session_id)?;
    assert_eq!(session.time_to_expiry(), None);
    assert_eq!(session.snapshot().expires_in_ms, None);
    Ok(())
}

/// Shutdown resets every session, keeps held entries, refuses new
/// connects, and can be called again.
#[tokio::test]
async fn test_shutdown_is_idempotent() -> Result<()> {
    let registry = registry(test_config());
    let log = Arc::new(EventLog::default());
    registry.add_listener(log.clone());
    let a = login(&registry, "alpha");
    login(&registry, "beta");
    registry.route_ptp("gamma", entry("parked"))?;

    registry.shutdown();
    assert!(registry.is_shutdown());
    assert_eq!(registry.num_sessions(), 0);
    assert!(registry.check(&a.secret_session_id).is_err());
    let logouts = log
        .kinds()
        .into_iter()
        .filter(|k| *k == ClientEventKind::Logout)
        .count();
    assert_eq!(logouts, 2);

    registry.shutdown();
    assert_eq!(log.kinds().len(), 4);
    assert!(matches!(
        registry.connect(request("alpha")),
        Err(RegistryError::Shutdown(_))
    ));
    let gamma = registry.subject_by_name("gamma").unwrap();
    assert_eq!(gamma.holding_queue().num_entries(), 1);
    assert!(registry.index_anomalies().is_empty());
    Ok(())
}

/// An administrator kill removes the session asynchronously.
#[tokio::test]
async fn test_kill_session() -> Result<()> {
    let registry = registry(test_config());
    let victim = login(&registry, "victim");
    let other = login(&registry, "victim");

    registry.kill_session(&victim.session_name)?;
    wait_until(Duration::from_secs(5), || {
        registry.check(&victim.secret_session_id).is_err()
    })
    .await?;
    assert!(registry.check(&other.secret_session_id).is_ok());
    assert_eq!(registry.subject_by_name("victim").unwrap().num_sessions(), 1);

    assert!(matches!(
        registry.kill_session(&victim.session_name),
        Err(RegistryError::UnknownSession)
    ));
    Ok(())
}

/// A lost connection is counted; the session stays registered.
#[tokio::test]
async fn test_connection_lost_keeps_session() -> Result<()> {
    let registry = registry(test_config());
    let ret = login(&registry, "flaky");

    registry.connection_lost(&ret.secret_session_id)?;
    registry.connection_lost(&ret.secret_session_id)?;

    let session = registry.check(&ret.secret_session_id)?;
    assert_eq!(session.delivery_statistic().num_connection_lost, 2);
    assert_eq!(registry.num_sessions(), 1);
    Ok(())
}

/// Reconnecting with the secret token resumes the same session and may
/// replace its callback addresses.
#[tokio::test]
async fn test_reconnect_with_token() -> Result<()> {
    let registry = registry(test_config());
    let log = Arc::new(EventLog::default());
    registry.add_listener(log.clone());
    let first = login(&registry, "roamer");
    let instance = registry.check(&first.secret_session_id)?.instance_id();

    let moved = CallbackAddress::new("SOCKET", "10.9.9.9:7607");
    let again = registry.connect(
        ConnectRequest::new(Credentials::new("roamer", "secret"))
            .with_secret_session_id(first.secret_session_id.clone())
            .with_callback(moved.clone()),
    )?;
    assert!(again.reconnected);
    assert_eq!(again.secret_session_id, first.secret_session_id);
    assert_eq!(again.session_name, first.session_name);

    let session = registry.check(&again.secret_session_id)?;
    assert_eq!(session.instance_id(), instance);
    assert!(session.has_address(&moved));
    assert!(!session.has_address(&callback()));
    assert_eq!(registry.num_sessions(), 1);
    assert_eq!(
        log.kinds(),
        vec![ClientEventKind::Login, ClientEventKind::Reconnected]
    );

    registry.disconnect(&again.secret_session_id, DisconnectOptions::default())?;
    assert_eq!(registry.num_sessions(), 0);
    Ok(())
}
