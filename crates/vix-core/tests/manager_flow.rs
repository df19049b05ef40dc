//! Connection manager behavior against a scripted provider.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use common::{engine_with, fake_endpoint, FakeAdapter};
use vix_core::{
    AppConfig, ConnectionSource, ConnectionState, ConnectionsConfig, Credential, Event,
    NewProfile, ProviderKind, Topic, VixError,
};
use vix_db::ConnectError;

fn ad_hoc(name: &str, namespace: &str) -> ConnectionSource {
    ConnectionSource::ad_hoc(name, ProviderKind::Memory, fake_endpoint(namespace))
}

fn state_trace(events: &[Event]) -> Vec<(ConnectionState, ConnectionState)> {
    events
        .iter()
        .filter_map(|e| match e {
            Event::ConnectionStateChanged { from, to, .. } => Some((*from, *to)),
            _ => None,
        })
        .collect()
}

#[test]
fn connect_always_passes_through_connecting() {
    let fake = Arc::new(FakeAdapter::new());
    let engine = engine_with(fake.clone(), AppConfig::default());
    let manager = engine.manager();
    let (_, rx) = manager.events().subscribe_channel(&[Topic::ConnectionStateChanged]);

    let id = manager.create_connection(ad_hoc("A", "trace")).unwrap();
    manager.connect(&id).unwrap().wait().unwrap();
    manager.disconnect(&id).unwrap().wait().unwrap();

    fake.store("trace")
        .connect_error
        .lock()
        .unwrap()
        .replace(ConnectError::auth("bad key"));
    assert!(manager.connect(&id).unwrap().wait().is_err());

    *fake.store("trace").connect_error.lock().unwrap() = None;
    manager.connect(&id).unwrap().wait().unwrap();

    let trace = state_trace(&rx.try_iter().collect::<Vec<_>>());
    use ConnectionState::*;
    assert_eq!(
        trace,
        vec![
            (Disconnected, Connecting),
            (Connecting, Connected),
            (Connected, Disconnected),
            (Disconnected, Connecting),
            (Connecting, Error),
            (Error, Connecting),
            (Connecting, Connected),
        ]
    );
    assert!(!trace.contains(&(Disconnected, Connected)));
}

#[test]
fn connect_error_is_recorded_with_category() {
    let fake = Arc::new(FakeAdapter::new());
    fake.store("auth")
        .connect_error
        .lock()
        .unwrap()
        .replace(ConnectError::auth("invalid api key"));
    let engine = engine_with(fake, AppConfig::default());

    let id = engine.manager().create_connection(ad_hoc("A", "auth")).unwrap();
    let err = engine.manager().connect(&id).unwrap().wait().unwrap_err();
    assert_eq!(err.category(), "auth");

    let instance = engine.manager().get(&id).unwrap();
    assert_eq!(instance.state, ConnectionState::Error);
    let last = instance.last_error.unwrap();
    assert_eq!(last.category, "auth");
    assert!(last.message.contains("invalid api key"));
}

#[test]
fn eleventh_connection_is_refused() {
    let engine = engine_with(Arc::new(FakeAdapter::new()), AppConfig::default());
    let manager = engine.manager();
    for i in 0..10 {
        manager
            .create_connection(ad_hoc(&format!("c{}", i), "cap"))
            .unwrap();
    }

    let err = manager.create_connection(ad_hoc("c10", "cap")).unwrap_err();
    assert!(matches!(err, VixError::ResourceExhausted { limit: 10 }));
    assert_eq!(manager.connection_count(), 10);
}

#[test]
fn cap_frees_up_after_close() {
    let config = AppConfig {
        connections: ConnectionsConfig {
            max_connections: 1,
            ..ConnectionsConfig::default()
        },
        ..AppConfig::default()
    };
    let engine = engine_with(Arc::new(FakeAdapter::new()), config);
    let manager = engine.manager();

    let first = manager.create_connection(ad_hoc("A", "free")).unwrap();
    assert!(manager.create_connection(ad_hoc("B", "free")).is_err());
    manager.close_connection(&first).unwrap().wait().unwrap();
    assert!(manager.create_connection(ad_hoc("B", "free")).is_ok());
}

#[test]
fn failed_refresh_moves_instance_to_error() {
    let fake = Arc::new(FakeAdapter::new());
    let store = fake.store("refresh");
    store.seed("docs", 3);
    let engine = engine_with(fake, AppConfig::default());
    let manager = engine.manager();

    let id = manager.create_connection(ad_hoc("A", "refresh")).unwrap();
    manager.connect(&id).unwrap().wait().unwrap();
    manager.set_active_collection(&id, Some("docs")).unwrap();
    assert_eq!(manager.get(&id).unwrap().collection_names(), vec!["docs"]);

    store.fail_listing.store(true, Ordering::SeqCst);
    assert!(manager.refresh_collections(&id).unwrap().wait().is_err());

    let instance = manager.get(&id).unwrap();
    assert_eq!(instance.state, ConnectionState::Error);
    // Selection and last good listing survive the failure.
    assert_eq!(instance.active_collection.as_deref(), Some("docs"));
    assert_eq!(instance.collection_names(), vec!["docs"]);
}

#[test]
fn refresh_replaces_listing_and_keeps_selection() {
    let fake = Arc::new(FakeAdapter::new());
    let store = fake.store("replace");
    store.seed("a", 1);
    store.seed("b", 1);
    let engine = engine_with(fake, AppConfig::default());
    let manager = engine.manager();

    let id = manager.create_connection(ad_hoc("A", "replace")).unwrap();
    manager.connect(&id).unwrap().wait().unwrap();
    manager.set_active_collection(&id, Some("b")).unwrap();

    store.seed("c", 1);
    let (_, rx) = manager.events().subscribe_channel(&[Topic::CollectionsUpdated]);
    let listed = manager.refresh_collections(&id).unwrap().wait().unwrap();
    assert_eq!(listed.len(), 3);

    let instance = manager.get(&id).unwrap();
    assert_eq!(instance.collection_names(), vec!["a", "b", "c"]);
    assert_eq!(instance.active_collection.as_deref(), Some("b"));
    assert!(!instance.stale_selection);
    assert!(matches!(
        rx.try_recv(),
        Ok(Event::CollectionsUpdated { collections, .. }) if collections.len() == 3
    ));
}

#[test]
fn lost_connection_through_session_marks_error() {
    let fake = Arc::new(FakeAdapter::new());
    let store = fake.store("lost");
    store.seed("docs", 10);
    *store.lose_connection_on_read.lock().unwrap() = Some(1);
    let engine = engine_with(fake, AppConfig::default());
    let manager = engine.manager();

    let id = manager.create_connection(ad_hoc("A", "lost")).unwrap();
    manager.connect(&id).unwrap().wait().unwrap();

    let session = manager.session(&id).unwrap();
    let err = session.read_page("docs", None, 5, true).unwrap_err();
    assert!(err.is_connection_lost());
    assert_eq!(manager.state_of(&id).unwrap(), ConnectionState::Error);
    assert_eq!(session.state(), ConnectionState::Error);
    assert!(matches!(
        manager.session(&id),
        Err(VixError::NotConnected { .. })
    ));
}

#[test]
fn loss_on_a_replaced_session_leaves_reconnected_instance_alone() {
    let fake = Arc::new(FakeAdapter::new());
    let store = fake.store("replaced");
    store.seed("docs", 10);
    let engine = engine_with(fake, AppConfig::default());
    let manager = engine.manager();

    let id = manager.create_connection(ad_hoc("A", "replaced")).unwrap();
    manager.connect(&id).unwrap().wait().unwrap();
    let old = manager.session(&id).unwrap();

    manager.disconnect(&id).unwrap().wait().unwrap();
    manager.connect(&id).unwrap().wait().unwrap();

    *store.lose_connection_on_read.lock().unwrap() = Some(1);
    assert!(old.read_page("docs", None, 5, true).is_err());
    assert_eq!(manager.state_of(&id).unwrap(), ConnectionState::Connected);
    assert!(manager.session(&id).is_ok());
}

#[test]
fn second_connect_keeps_the_live_session() {
    let fake = Arc::new(FakeAdapter::new());
    let store = fake.store("twice");
    store.seed("docs", 4);
    let engine = engine_with(fake, AppConfig::default());
    let manager = engine.manager();

    let id = manager.create_connection(ad_hoc("A", "twice")).unwrap();
    manager.connect(&id).unwrap().wait().unwrap();
    let session = manager.session(&id).unwrap();

    let err = manager.connect(&id).unwrap().wait().unwrap_err();
    assert!(matches!(err, VixError::InvalidTransition { .. }));
    assert_eq!(store.connects.load(Ordering::SeqCst), 1);
    assert_eq!(store.closes.load(Ordering::SeqCst), 0);
    assert_eq!(session.read_page("docs", None, 10, true).unwrap().items.len(), 4);
    assert_eq!(manager.state_of(&id).unwrap(), ConnectionState::Connected);
}

#[test]
fn profile_credential_reaches_the_adapter() {
    let fake = Arc::new(FakeAdapter::new());
    let engine = engine_with(fake.clone(), AppConfig::default());

    let profile = engine
        .profiles()
        .create(
            NewProfile::new("Cloud", ProviderKind::Memory, fake_endpoint("cred"))
                .with_credential(Credential::api_key("pc-123")),
        )
        .unwrap();

    engine.open_profile("Cloud").unwrap();
    assert_eq!(
        fake.store("cred").last_api_key.lock().unwrap().as_deref(),
        Some("pc-123")
    );

    // Deleting the profile removes its secret.
    let key = profile.credential_ref.clone().unwrap();
    engine.profiles().delete(&profile.id).unwrap();
    assert_eq!(engine.vault().retrieve(&key).unwrap(), None);
}

#[test]
fn close_releases_session_and_active_pointer() {
    let fake = Arc::new(FakeAdapter::new());
    let engine = engine_with(fake.clone(), AppConfig::default());
    let manager = engine.manager();

    let id = manager.create_connection(ad_hoc("A", "close")).unwrap();
    manager.connect(&id).unwrap().wait().unwrap();
    manager.set_active_connection(&id).unwrap();

    let (_, rx) = manager.events().subscribe_channel(&[
        Topic::ActiveConnectionChanged,
        Topic::ConnectionClosed,
    ]);
    manager.close_connection(&id).unwrap().wait().unwrap();

    assert_eq!(fake.store("close").closes.load(Ordering::SeqCst), 1);
    assert!(manager.active_connection_id().unwrap().is_none());
    let events: Vec<Event> = rx.try_iter().collect();
    assert_eq!(events.len(), 2);
    assert!(matches!(
        &events[0],
        Event::ActiveConnectionChanged { current: None, .. }
    ));
    assert!(matches!(&events[1], Event::ConnectionClosed { .. }));
}

#[test]
fn instances_connect_independently_in_parallel() {
    let fake = Arc::new(FakeAdapter::new());
    let engine = engine_with(fake.clone(), AppConfig::default());
    let manager = engine.manager();

    let ids: Vec<_> = (0..8)
        .map(|i| {
            manager
                .create_connection(ad_hoc(&format!("c{}", i), &format!("ns{}", i)))
                .unwrap()
        })
        .collect();
    let handles: Vec<_> = ids.iter().map(|id| manager.connect(id).unwrap()).collect();
    for handle in handles {
        handle.wait().unwrap();
    }

    for (i, id) in ids.iter().enumerate() {
        assert_eq!(manager.state_of(id).unwrap(), ConnectionState::Connected);
        assert_eq!(
            fake.store(&format!("ns{}", i)).connects.load(Ordering::SeqCst),
            1
        );
    }
    assert_eq!(engine.shutdown(), 8);
}

#[test]
fn unknown_ids_are_not_found() {
    let engine = engine_with(Arc::new(FakeAdapter::new()), AppConfig::default());
    let manager = engine.manager();
    let missing = vix_core::ConnectionId::from("missing");

    assert!(matches!(
        manager.connect(&missing),
        Err(VixError::ConnectionNotFound { .. })
    ));
    assert!(matches!(
        manager.set_active_connection(&missing),
        Err(VixError::ConnectionNotFound { .. })
    ));
    assert!(matches!(
        manager.set_active_collection(&missing, Some("x")),
        Err(VixError::ConnectionNotFound { .. })
    ));
}
