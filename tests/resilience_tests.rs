use anyhow::Result;
use fleetbox::domain::{ContainerEngine, Labels, Provider, ProviderListener, ProviderSpec};
use fleetbox::test_support::{MockEngine, RecordingListener};
use fleetbox::{
    Container, ContainerStatus, EngineProvider, FleetError, LaunchConfig, ProviderCore,
    ProviderRegistry,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier, Weak};
use std::thread;
use std::time::Duration;

/// Engine that can slow launches down and hold a `list` call after it took its view.
#[derive(Debug)]
struct PausingEngine {
    inner: MockEngine,
    launch_delay: Duration,
    pause_next_list: AtomicBool,
    listed: Barrier,
    resume: Barrier,
}

impl PausingEngine {
    fn new(launch_delay: Duration) -> Self {
        Self {
            inner: MockEngine::new(),
            launch_delay,
            pause_next_list: AtomicBool::new(false),
            listed: Barrier::new(2),
            resume: Barrier::new(2),
        }
    }
}

impl ContainerEngine for PausingEngine {
    fn launch(&self, config: &LaunchConfig, labels: &Labels) -> Result<Container> {
        thread::sleep(self.launch_delay);
        self.inner.launch(config, labels)
    }

    fn remove(&self, id: &str) -> Result<()> {
        self.inner.remove(id)
    }

    fn restart(&self, id: &str) -> Result<Container> {
        self.inner.restart(id)
    }

    fn list(&self, labels: &Labels) -> Result<Vec<Container>> {
        let view = self.inner.list(labels)?;
        if self.pause_next_list.swap(false, Ordering::SeqCst) {
            self.listed.wait();
            self.resume.wait();
        }
        Ok(view)
    }

    fn is_available(&self) -> bool {
        self.inner.is_available()
    }
}

fn core(pool_size: usize) -> Arc<ProviderCore> {
    Arc::new(ProviderCore::new(
        ProviderSpec::new("local", "webapp").pool_size(pool_size),
    ))
}

fn config(name: &str) -> LaunchConfig {
    LaunchConfig::builder()
        .name(name)
        .image("img")
        .to_command_container()
        .unwrap()
        .build()
}

#[test]
fn test_concurrent_adds_lose_no_updates() {
    let core = core(1_000);
    let listener = Arc::new(RecordingListener::default());
    let weak: Weak<dyn ProviderListener> = Arc::<RecordingListener>::downgrade(&listener);
    core.set_listener(weak);

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let core = core.clone();
            thread::spawn(move || {
                for i in 0..25 {
                    let id = format!("t{t}-{i}");
                    core.add_container(Arc::new(Container::new(&id, &id)));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(core.active_count(), 200);
    assert_eq!(listener.calls(), 200);
}

#[test]
fn test_snapshots_survive_concurrent_removal() {
    let core = core(100);
    core.add_containers((0..50).map(|i| Arc::new(Container::new(format!("c{i}"), "c"))));

    let snapshot = core.containers();
    let remover = {
        let core = core.clone();
        thread::spawn(move || {
            for i in 0..50 {
                core.remove_container(&format!("c{i}"));
            }
        })
    };
    let readers: Vec<_> = (0..4)
        .map(|_| {
            let core = core.clone();
            thread::spawn(move || {
                for _ in 0..50 {
                    let seen = core.containers();
                    assert!(seen.len() <= 50);
                    let _ = core.container("c49");
                }
            })
        })
        .collect();

    remover.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }

    assert_eq!(snapshot.len(), 50);
    assert_eq!(core.active_count(), 0);
}

#[test]
fn test_concurrent_reconcile_and_add_keep_ids_unique() {
    let core = core(1_000);
    core.add_containers((0..20).map(|i| Arc::new(Container::new(format!("c{i}"), "c"))));
    let remote: Vec<Container> = (0..20)
        .map(|i| Container::new(format!("c{i}"), "c").with_status(ContainerStatus::Running))
        .collect();

    let reconciler = {
        let core = core.clone();
        thread::spawn(move || {
            for _ in 0..20 {
                core.update_containers(&remote);
            }
        })
    };
    let adder = {
        let core = core.clone();
        thread::spawn(move || {
            for i in 0..20 {
                // Same ids as the existing records: always skipped.
                core.add_container(Arc::new(Container::new(format!("c{i}"), "dup")));
            }
        })
    };
    reconciler.join().unwrap();
    adder.join().unwrap();

    let containers = core.containers();
    assert_eq!(containers.len(), 20);
    assert!(containers.iter().all(|c| c.name() == "c"));
    assert!(
        containers
            .iter()
            .all(|c| c.status() == ContainerStatus::Running)
    );
}

#[test]
fn test_reconcile_never_adds_remote_only_containers() {
    let core = core(10);
    core.add_container(Arc::new(Container::new("known", "known")));

    let report = core.update_containers(&[
        Container::new("known", "known"),
        Container::new("stranger", "stranger"),
    ]);

    assert_eq!(core.active_count(), 1);
    assert!(core.container("stranger").is_none());
    assert_eq!(report.unknown, ["stranger"]);
}

#[test]
fn test_failed_refresh_keeps_snapshot_and_recovers() -> Result<()> {
    let mock = Arc::new(MockEngine::new());
    let provider = EngineProvider::new(
        ProviderSpec::new("local", "webapp").pool_size(5),
        mock.clone(),
        "localhost",
    );
    let a = provider.start(config("a"))?;
    let b = provider.start(config("b"))?;

    mock.forget(b.id());
    mock.set_fail_on("list");
    assert!(provider.refresh_containers_state().is_err());
    assert_eq!(provider.core().active_count(), 2);

    mock.clear_failure();
    provider.refresh_containers_state()?;
    assert_eq!(provider.core().active_count(), 1);
    assert!(provider.core().container(a.id()).is_some());
    Ok(())
}

#[test]
fn test_flaky_backend_never_registers_unconfirmed_containers() -> Result<()> {
    let mock = Arc::new(MockEngine::new());
    let provider = EngineProvider::new(
        ProviderSpec::new("local", "webapp").pool_size(5),
        mock.clone(),
        "localhost",
    );

    mock.set_fail_on("launch");
    for i in 0..3 {
        assert!(provider.start(config(&format!("svc{i}"))).is_err());
    }
    assert_eq!(provider.core().active_count(), 0);

    mock.clear_failure();
    provider.start(config("svc"))?;
    assert_eq!(provider.core().active_count(), 1);
    Ok(())
}

#[test]
fn test_foreign_containers_are_not_adopted() -> Result<()> {
    let mock = Arc::new(MockEngine::new());
    mock.inject("foreign", Labels::new());
    let provider = EngineProvider::new(
        ProviderSpec::new("local", "webapp").pool_size(5),
        mock.clone(),
        "localhost",
    );

    provider.refresh_containers_state()?;
    assert_eq!(provider.adopt_existing()?, 0);
    assert_eq!(provider.core().active_count(), 0);
    Ok(())
}

#[test]
fn test_start_during_refresh_keeps_new_container() -> Result<()> {
    let engine = Arc::new(PausingEngine::new(Duration::ZERO));
    let provider = Arc::new(EngineProvider::new(
        ProviderSpec::new("local", "webapp").pool_size(5),
        engine.clone(),
        "localhost",
    ));
    engine.pause_next_list.store(true, Ordering::SeqCst);

    let refresher = {
        let provider = provider.clone();
        thread::spawn(move || provider.refresh_containers_state())
    };
    engine.listed.wait();

    let starter = {
        let provider = provider.clone();
        thread::spawn(move || provider.start(config("web")))
    };
    thread::sleep(Duration::from_millis(50));
    engine.resume.wait();

    refresher.join().unwrap()?;
    let started = starter.join().unwrap()?;

    assert_eq!(engine.inner.running_count(), 1);
    assert!(provider.core().container(started.id()).is_some());
    assert_eq!(provider.core().active_count(), 1);
    Ok(())
}

#[test]
fn test_concurrent_starts_respect_pool_size() -> Result<()> {
    let engine = Arc::new(PausingEngine::new(Duration::from_millis(100)));
    let registry = Arc::new(ProviderRegistry::default());
    registry.register(Arc::new(EngineProvider::new(
        ProviderSpec::new("local", "webapp").pool_size(1),
        engine.clone(),
        "localhost",
    )))?;

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let registry = registry.clone();
            thread::spawn(move || registry.start(config(&format!("svc{i}"))))
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(
        results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| e.downcast_ref::<FleetError>() == Some(&FleetError::NoCapacity { demand: 1 }))
    );
    assert_eq!(engine.inner.running_count(), 1);
    let local = registry.provider("local").expect("local registered");
    assert_eq!(local.core().active_count(), 1);
    Ok(())
}
