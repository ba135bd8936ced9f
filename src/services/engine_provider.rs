use crate::domain::{
    Container, ContainerEngine, LaunchConfig, Labels, PROVIDER_LABEL, Provider, ProviderCore,
    ProviderSpec, ProviderStatus, TEMPLATE_LABEL,
};
use crate::error::FleetError;
use anyhow::{Context, Result};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

/// Provider backed by a [`ContainerEngine`].
///
/// Engine calls and the registry update that follows them happen under `ops`.
/// Admission is re-checked there before launching.
#[derive(Debug)]
pub struct EngineProvider {
    core: ProviderCore,
    engine: Arc<dyn ContainerEngine>,
    hostname: String,
    ops: Mutex<()>,
}

impl EngineProvider {
    pub fn new(spec: ProviderSpec, engine: Arc<dyn ContainerEngine>, hostname: impl Into<String>) -> Self {
        Self {
            core: ProviderCore::new(spec),
            engine,
            hostname: hostname.into(),
            ops: Mutex::new(()),
        }
    }

    fn lock_ops(&self) -> MutexGuard<'_, ()> {
        self.ops.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn labels(&self) -> Labels {
        Labels::from([
            (PROVIDER_LABEL.to_string(), self.core.name().to_string()),
            (TEMPLATE_LABEL.to_string(), self.core.template_tag().to_string()),
        ])
    }

    /// Registers the containers the backend already runs under this provider's labels,
    /// e.g. ones started by an earlier process. Returns how many were new.
    pub fn adopt_existing(&self) -> Result<usize> {
        let _ops = self.lock_ops();
        let remote = self
            .engine
            .list(&self.labels())
            .with_context(|| format!("consultando containers de {}", self.name()))?;

        let new: Vec<Arc<Container>> = remote
            .into_iter()
            .filter(|c| self.core.container(c.id()).is_none())
            .map(Arc::new)
            .collect();
        if new.is_empty() {
            return Ok(0);
        }

        let adopted = new.len();
        self.core.add_containers(new);
        info!("{}: {} container(s) existente(s) adotado(s)", self.name(), adopted);
        Ok(adopted)
    }

    fn require(&self, container_id: &str) -> Result<Arc<Container>> {
        self.core
            .container(container_id)
            .ok_or_else(|| FleetError::ContainerNotFound(container_id.to_string()).into())
    }
}

impl Provider for EngineProvider {
    fn core(&self) -> &ProviderCore {
        &self.core
    }

    fn start(&self, config: LaunchConfig) -> Result<Arc<Container>> {
        let _ops = self.lock_ops();
        if !self.core.can_create_container() {
            return Err(FleetError::NoCapacity { demand: 1 }.into());
        }
        info!("Iniciando {} ({}) em {}...", config.name(), config.kind(), self.name());

        let container = self
            .engine
            .launch(&config, &self.labels())
            .with_context(|| format!("iniciando {} em {}", config.name(), self.name()))?;

        let container = Arc::new(container);
        self.core.add_container(container.clone());
        Ok(container)
    }

    fn start_all(&self, configs: Vec<LaunchConfig>) -> Result<Vec<Arc<Container>>> {
        let _ops = self.lock_ops();
        let demand = configs.len();
        let has_room = match demand {
            0 => true,
            1 => self.core.can_create_container(),
            n => self.core.can_create_containers(n),
        };
        if !has_room {
            return Err(FleetError::NoCapacity { demand }.into());
        }

        let labels = self.labels();
        let mut launched: Vec<Arc<Container>> = Vec::with_capacity(configs.len());

        for config in &configs {
            match self.engine.launch(config, &labels) {
                Ok(container) => launched.push(Arc::new(container)),
                Err(e) => {
                    // Nothing is registered until every launch succeeded.
                    for container in &launched {
                        if let Err(err) = self.engine.remove(container.id()) {
                            warn!("Falha ao desfazer {}: {}", container.id(), err);
                        }
                    }
                    return Err(e).with_context(|| {
                        format!("iniciando {} em {}", config.name(), self.name())
                    });
                }
            }
        }

        self.core.add_containers(launched.iter().cloned());
        Ok(launched)
    }

    /// Removes the container from the backend, then from the registry. Ids unknown
    /// locally still reach the backend, so remote-only containers can be cleaned up.
    fn stop(&self, container_id: &str) -> Result<()> {
        let _ops = self.lock_ops();
        info!("Parando {container_id} em {}...", self.name());

        self.engine
            .remove(container_id)
            .with_context(|| format!("parando {container_id} em {}", self.name()))?;
        self.core.remove_container(container_id);
        Ok(())
    }

    fn restart(&self, container_id: &str) -> Result<Arc<Container>> {
        let _ops = self.lock_ops();
        self.require(container_id)?;
        info!("Reiniciando {container_id} em {}...", self.name());

        let observed = self
            .engine
            .restart(container_id)
            .with_context(|| format!("reiniciando {container_id} em {}", self.name()))?;

        // The container may have been reconciled away while the engine restarted it.
        self.core
            .merge_container(&observed)
            .ok_or_else(|| FleetError::ContainerNotFound(container_id.to_string()).into())
    }

    fn refresh_containers_state(&self) -> Result<()> {
        let _ops = self.lock_ops();
        let remote = self
            .engine
            .list(&self.labels())
            .with_context(|| format!("consultando containers de {}", self.name()))?;
        debug!("{}: backend reporta {} container(s)", self.name(), remote.len());

        self.core.update_containers(&remote);
        Ok(())
    }

    fn hostname(&self) -> String {
        self.hostname.clone()
    }

    fn status(&self) -> ProviderStatus {
        if self.engine.is_available() {
            ProviderStatus::Online
        } else {
            ProviderStatus::Offline
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ContainerStatus;
    use crate::test_support::{MockEngine, RecordingListener};
    use std::sync::Weak;

    fn web() -> LaunchConfig {
        LaunchConfig::builder()
            .name("web")
            .image("nginx")
            .to_command_container()
            .unwrap()
            .build()
    }

    fn named(name: &str) -> LaunchConfig {
        LaunchConfig::builder()
            .name(name)
            .image("img")
            .to_command_container()
            .unwrap()
            .build()
    }

    fn provider(mock: &Arc<MockEngine>, pool_size: usize) -> EngineProvider {
        EngineProvider::new(
            ProviderSpec::new("local", "webapp").pool_size(pool_size),
            mock.clone(),
            "localhost",
        )
    }

    #[test]
    fn start_registers_confirmed_container() {
        let mock = Arc::new(MockEngine::new());
        let provider = provider(&mock, 2);

        let container = provider.start(web()).unwrap();

        assert_eq!(provider.core().active_count(), 1);
        assert_eq!(container.name(), "web");
        assert!(mock.get_commands().contains(&"launch:web".to_string()));
    }

    #[test]
    fn start_on_full_provider_fails_before_backend() {
        let mock = Arc::new(MockEngine::new());
        let provider = provider(&mock, 1);
        provider.start(named("a")).unwrap();

        let err = provider.start(named("b")).unwrap_err();
        assert_eq!(
            err.downcast_ref::<FleetError>(),
            Some(&FleetError::NoCapacity { demand: 1 })
        );
        let err = provider.start_all(vec![named("c"), named("d")]).unwrap_err();
        assert_eq!(
            err.downcast_ref::<FleetError>(),
            Some(&FleetError::NoCapacity { demand: 2 })
        );
        assert!(!mock.get_commands().contains(&"launch:b".to_string()));
        assert_eq!(mock.running_count(), 1);
        assert_eq!(provider.core().active_count(), 1);
    }

    #[test]
    fn failed_start_leaves_registry_unchanged() {
        let mock = Arc::new(MockEngine::new());
        let provider = provider(&mock, 2);
        mock.set_fail_on("launch");

        assert!(provider.start(web()).is_err());
        assert_eq!(provider.core().active_count(), 0);
    }

    #[test]
    fn start_all_notifies_once_and_rolls_back_on_failure() {
        let mock = Arc::new(MockEngine::new());
        let provider = provider(&mock, 5);
        let listener = Arc::new(RecordingListener::default());
        let weak: Weak<dyn crate::domain::ProviderListener> = Arc::<RecordingListener>::downgrade(&listener);
        provider.core().set_listener(weak);

        let started = provider.start_all(vec![named("a"), named("b")]).unwrap();
        assert_eq!(started.len(), 2);
        assert_eq!(listener.calls(), 1);

        mock.fail_launch_of("d");
        assert!(provider.start_all(vec![named("c"), named("d")]).is_err());
        assert_eq!(provider.core().active_count(), 2);
        assert_eq!(listener.calls(), 1);
        assert!(mock.get_commands().iter().any(|c| c.starts_with("remove:")));
        assert_eq!(mock.running_count(), 2);
    }

    #[test]
    fn stop_removes_from_backend_and_registry() {
        let mock = Arc::new(MockEngine::new());
        let provider = provider(&mock, 2);
        let container = provider.start(web()).unwrap();

        provider.stop(container.id()).unwrap();

        assert_eq!(provider.core().active_count(), 0);
        assert!(
            mock.get_commands()
                .contains(&format!("remove:{}", container.id()))
        );
    }

    #[test]
    fn stop_reaches_backend_for_remote_only_container() {
        let mock = Arc::new(MockEngine::new());
        let provider = provider(&mock, 2);
        mock.inject("stray", Labels::new());

        provider.stop("stray").unwrap();

        assert!(mock.get_commands().contains(&"remove:stray".to_string()));
        assert_eq!(mock.running_count(), 0);
    }

    #[test]
    fn restart_unknown_container_fails_before_backend() {
        let mock = Arc::new(MockEngine::new());
        let provider = provider(&mock, 2);

        let err = provider.restart("nope").unwrap_err();
        assert_eq!(
            err.downcast_ref::<FleetError>(),
            Some(&FleetError::ContainerNotFound("nope".into()))
        );
        assert!(mock.get_commands().is_empty());
    }

    #[test]
    fn failed_stop_keeps_container() {
        let mock = Arc::new(MockEngine::new());
        let provider = provider(&mock, 2);
        let container = provider.start(web()).unwrap();
        mock.set_fail_on("remove");

        assert!(provider.stop(container.id()).is_err());
        assert_eq!(provider.core().active_count(), 1);
    }

    #[test]
    fn refresh_reconciles_with_backend() {
        let mock = Arc::new(MockEngine::new());
        let provider = provider(&mock, 5);
        let a = provider.start(named("a")).unwrap();
        let b = provider.start(named("b")).unwrap();

        mock.set_status(a.id(), ContainerStatus::Running);
        mock.forget(b.id());
        provider.refresh_containers_state().unwrap();

        let containers = provider.core().containers();
        assert_eq!(containers.len(), 1);
        assert!(Arc::ptr_eq(&containers[0], &a));
        assert_eq!(a.status(), ContainerStatus::Running);
    }

    #[test]
    fn failed_refresh_keeps_previous_snapshot() {
        let mock = Arc::new(MockEngine::new());
        let provider = provider(&mock, 5);
        let a = provider.start(named("a")).unwrap();
        mock.forget(a.id());
        mock.set_fail_on("list");

        assert!(provider.refresh_containers_state().is_err());
        assert_eq!(provider.core().active_count(), 1);
    }

    #[test]
    fn restart_merges_new_state_into_same_handle() {
        let mock = Arc::new(MockEngine::new());
        let provider = provider(&mock, 2);
        let container = provider.start(web()).unwrap();

        let restarted = provider.restart(container.id()).unwrap();

        assert!(Arc::ptr_eq(&container, &restarted));
        assert_eq!(container.status(), ContainerStatus::Running);
    }

    #[test]
    fn adopt_existing_registers_labelled_containers_once() {
        let mock = Arc::new(MockEngine::new());
        let provider = provider(&mock, 5);
        let labels = provider.labels();
        mock.inject("earlier", labels.clone());
        mock.inject("foreign", Labels::new());

        assert_eq!(provider.adopt_existing().unwrap(), 1);
        assert!(provider.core().container("earlier").is_some());
        assert!(provider.core().container("foreign").is_none());

        assert_eq!(provider.adopt_existing().unwrap(), 0);
        assert_eq!(provider.core().active_count(), 1);
    }

    #[test]
    fn status_reflects_engine_availability() {
        let mock = Arc::new(MockEngine::new());
        let provider = provider(&mock, 1);
        assert_eq!(provider.status(), ProviderStatus::Online);
        mock.set_available(false);
        assert_eq!(provider.status(), ProviderStatus::Offline);
        assert_eq!(provider.hostname(), "localhost");
    }
}
