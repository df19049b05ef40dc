//! Migration engine behavior against a scripted provider.

mod common;

use std::sync::atomic::Ordering;
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

use common::{engine_with, fake_endpoint, FakeAdapter};
use vix_core::{
    AppConfig, ConnectionId, ConnectionSource, ConnectionState, Event, MigrationRequest,
    MigrationState, MigrationSummary, ProviderKind, Topic, VixEngine, VixError, WorkersConfig,
    WriteMode,
};
use vix_db::ProviderCapabilities;

struct Fixture {
    engine: VixEngine,
    fake: Arc<FakeAdapter>,
    source: ConnectionId,
    target: ConnectionId,
}

fn fixture_with(fake: FakeAdapter, config: AppConfig, items: usize) -> Fixture {
    let fake = Arc::new(fake);
    fake.store("src").seed("docs", items);
    let engine = engine_with(fake.clone(), config);
    let manager = engine.manager();

    let source = manager
        .create_connection(ConnectionSource::ad_hoc(
            "Source",
            ProviderKind::Memory,
            fake_endpoint("src"),
        ))
        .unwrap();
    let target = manager
        .create_connection(ConnectionSource::ad_hoc(
            "Target",
            ProviderKind::Memory,
            fake_endpoint("dst"),
        ))
        .unwrap();
    manager.connect(&source).unwrap().wait().unwrap();
    manager.connect(&target).unwrap().wait().unwrap();

    Fixture {
        engine,
        fake,
        source,
        target,
    }
}

fn fixture(items: usize) -> Fixture {
    fixture_with(FakeAdapter::new(), AppConfig::default(), items)
}

impl Fixture {
    fn request(&self, batch: usize) -> MigrationRequest {
        MigrationRequest::new(self.source.clone(), "docs", self.target.clone(), "copy")
            .with_batch_size(batch)
    }

    fn run(&self, request: MigrationRequest) -> MigrationSummary {
        self.engine
            .migrations()
            .start_migration(request)
            .unwrap()
            .wait()
            .unwrap()
    }
}

fn assert_counts_consistent(summary: &MigrationSummary) {
    assert!(summary.items_copied + summary.items_failed <= summary.items_read);
}

#[test]
fn copies_in_batches_until_end_of_data() {
    let f = fixture(250);
    let summary = f.run(f.request(100));

    assert_eq!(summary.state, MigrationState::Completed);
    assert_eq!(summary.items_read, 250);
    assert_eq!(summary.items_copied, 250);
    assert_eq!(summary.items_failed, 0);
    assert_eq!(summary.batches, 3);
    assert!(summary.first_error.is_none());
    assert_counts_consistent(&summary);

    assert_eq!(f.fake.store("src").reads(), vec![100, 100, 50]);
    assert_eq!(f.fake.store("dst").count("copy"), 250);
    assert_eq!(f.fake.store("dst").ids("copy"), f.fake.store("src").ids("docs"));
}

#[test]
fn per_item_failures_do_not_stop_the_job() {
    let f = fixture(250);
    f.fake.store("dst").reject(&["item-0010", "item-0042"]);
    let summary = f.run(f.request(100));

    assert_eq!(summary.state, MigrationState::Completed);
    assert_eq!(summary.items_failed, 2);
    assert_eq!(summary.items_copied, 248);
    assert_eq!(summary.failures.len(), 2);
    assert_eq!(summary.failures[0].id, "item-0010");
    assert_counts_consistent(&summary);
}

#[test]
fn cancel_after_batch_keeps_written_batches() {
    let f = fixture(500);
    let migrations = f.engine.migrations().clone();
    f.engine.events().subscribe(Topic::MigrationProgress, move |event| {
        if let Event::MigrationProgress { job, batch: 2, .. } = event {
            migrations.cancel_migration(job)?;
        }
        Ok(())
    });

    let summary = f.run(f.request(100));
    assert_eq!(summary.state, MigrationState::Cancelled);
    assert_eq!(summary.batches, 2);
    assert_eq!(summary.items_copied, 200);
    assert_counts_consistent(&summary);
    assert_eq!(f.fake.store("src").reads(), vec![100, 100]);
    assert_eq!(f.fake.store("dst").count("copy"), 200);
}

#[test]
fn cancel_before_first_batch_writes_nothing() {
    let f = fixture(300);
    let migrations = f.engine.migrations().clone();
    f.engine.events().subscribe(Topic::MigrationStarted, move |event| {
        if let Event::MigrationStarted { job } = event {
            assert!(migrations.cancel_migration(job)?);
        }
        Ok(())
    });

    let summary = f.run(f.request(100));
    assert_eq!(summary.state, MigrationState::Cancelled);
    assert_eq!(summary.batches, 0);
    assert_eq!(summary.items_read, 0);
    assert!(f.fake.store("src").reads().is_empty());
    assert_eq!(f.fake.store("dst").count("copy"), 0);
}

#[test]
fn source_lost_mid_migration_fails_the_job() {
    let f = fixture(300);
    *f.fake.store("src").lose_connection_on_read.lock().unwrap() = Some(2);

    let summary = f.run(f.request(100));
    assert_eq!(summary.state, MigrationState::Failed);
    assert_eq!(summary.items_copied, 100);
    assert_eq!(
        summary.first_error.as_ref().map(|e| e.category.as_str()),
        Some("connection-lost")
    );
    assert_counts_consistent(&summary);
    assert_eq!(
        f.engine.manager().state_of(&f.source).unwrap(),
        ConnectionState::Error
    );
}

#[test]
fn target_disconnected_between_batches_fails_the_job() {
    let f = fixture(300);
    let manager = f.engine.manager().clone();
    let target = f.target.clone();
    f.engine.events().subscribe(Topic::MigrationProgress, move |event| {
        if let Event::MigrationProgress { batch: 1, .. } = event {
            manager.disconnect(&target)?.wait()?;
        }
        Ok(())
    });

    let summary = f.run(f.request(100));
    assert_eq!(summary.state, MigrationState::Failed);
    assert_eq!(summary.batches, 1);
    assert_ne!(summary.state, MigrationState::Completed);
    assert_eq!(
        summary.first_error.as_ref().map(|e| e.category.as_str()),
        Some("not-connected")
    );
}

#[test]
fn progress_batches_strictly_increase() {
    let f = fixture(450);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    f.engine.events().subscribe(Topic::MigrationProgress, move |event| {
        if let Event::MigrationProgress {
            batch,
            items_read,
            items_copied,
            items_failed,
            ..
        } = event
        {
            assert!(items_copied + items_failed <= *items_read);
            sink.lock().unwrap().push(*batch);
        }
        Ok(())
    });

    f.run(f.request(100));
    assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3, 4, 5]);
}

#[test]
fn missing_target_is_created_from_source_schema() {
    let f = fixture(5);
    f.run(f.request(10));

    let target = f.engine.manager().session(&f.target).unwrap();
    let created = target.describe_collection("copy").unwrap();
    assert_eq!(created.dimension, Some(3));
    assert_eq!(created.item_count, Some(5));
}

#[test]
fn missing_target_without_auto_create_fails() {
    let f = fixture(5);
    let summary = f.run(f.request(10).with_create_missing_target(false));
    assert_eq!(summary.state, MigrationState::Failed);
    assert_eq!(
        summary.first_error.as_ref().map(|e| e.category.as_str()),
        Some("not-found")
    );
    assert_eq!(summary.batches, 0);
}

#[test]
fn dimension_mismatch_is_rejected_before_copying() {
    let f = fixture(5);
    f.fake.store("dst").add_empty("copy", Some(8));

    let summary = f.run(f.request(10));
    assert_eq!(summary.state, MigrationState::Failed);
    assert_eq!(summary.items_read, 0);
    assert!(summary
        .first_error
        .as_ref()
        .is_some_and(|e| e.message.contains("Dimension mismatch")));

    // Without vectors the copy goes ahead.
    let summary = f.run(f.request(10).with_vectors(false));
    assert_eq!(summary.state, MigrationState::Completed);
}

#[test]
fn insert_only_reports_existing_ids_as_failures() {
    let f = fixture(10);
    f.run(f.request(4));

    let summary = f.run(f.request(4).with_write_mode(WriteMode::InsertOnly));
    assert_eq!(summary.state, MigrationState::Completed);
    assert_eq!(summary.items_failed, 10);
    assert_eq!(summary.items_copied, 0);
    assert_eq!(f.fake.store("dst").count("copy"), 10);
}

#[test]
fn insert_only_needs_target_support() {
    let fake = FakeAdapter::new().with_capabilities(ProviderCapabilities {
        insert_only_writes: false,
        create_collection: true,
        ..ProviderCapabilities::default()
    });
    let f = fixture_with(fake, AppConfig::default(), 10);

    let summary = f.run(f.request(4).with_write_mode(WriteMode::InsertOnly));
    assert_eq!(summary.state, MigrationState::Failed);
    assert_eq!(f.fake.store("dst").write_calls.load(Ordering::SeqCst), 0);
}

#[test]
fn start_requires_connected_instances() {
    let f = fixture(10);
    f.engine
        .manager()
        .disconnect(&f.target)
        .unwrap()
        .wait()
        .unwrap();

    let err = f.engine.migrations().start_migration(f.request(5)).unwrap_err();
    assert!(matches!(err, VixError::NotConnected { .. }));
    assert!(f.engine.migrations().jobs().unwrap().is_empty());
}

#[test]
fn invalid_requests_are_rejected() {
    let f = fixture(10);
    let migrations = f.engine.migrations();

    assert!(matches!(
        migrations.start_migration(f.request(0)),
        Err(VixError::InvalidArgument(_))
    ));
    let same = MigrationRequest::new(f.source.clone(), "docs", f.source.clone(), "docs");
    assert!(matches!(
        migrations.start_migration(same),
        Err(VixError::InvalidArgument(_))
    ));
}

#[test]
fn cancel_while_pending_never_runs() {
    let config = AppConfig {
        workers: WorkersConfig { threads: 1 },
        ..AppConfig::default()
    };
    let f = fixture_with(FakeAdapter::new(), config, 50);

    // Occupy the only worker.
    let (release, blocked) = mpsc::channel::<()>();
    let blocker = f.engine.workers().submit("blocker", move || {
        let _ = blocked.recv_timeout(Duration::from_secs(10));
        Ok(())
    });

    let handle = f.engine.migrations().start_migration(f.request(10)).unwrap();
    assert_eq!(handle.job().unwrap().state, MigrationState::Pending);
    assert!(handle.cancel().unwrap());
    assert_eq!(handle.job().unwrap().state, MigrationState::Cancelled);

    release.send(()).unwrap();
    blocker.wait().unwrap();

    let summary = handle.wait().unwrap();
    assert_eq!(summary.state, MigrationState::Cancelled);
    assert_eq!(summary.batches, 0);
    assert!(f.fake.store("src").reads().is_empty());
}

#[test]
fn finished_jobs_are_dropped_once_acknowledged() {
    let f = fixture(10);
    let handle = f.engine.migrations().start_migration(f.request(5)).unwrap();
    let id = handle.id().clone();
    handle.wait().unwrap();

    let migrations = f.engine.migrations();
    assert_eq!(migrations.job(&id).unwrap().state, MigrationState::Completed);
    assert!(!migrations.cancel_migration(&id).unwrap());

    migrations.acknowledge(&id).unwrap();
    assert!(matches!(
        migrations.job(&id),
        Err(VixError::MigrationNotFound(_))
    ));
}
