use super::selection::{PriorityStrategy, SelectionStrategy};
use crate::domain::{Container, LaunchConfig, Provider, ProviderCore, ProviderListener, provider_order};
use crate::error::FleetError;
use anyhow::Result;
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock, Weak};
use std::time::SystemTime;
use tracing::{debug, error, info, warn};

/// Keeps the last known active count of every provider it listens to.
#[derive(Debug, Default)]
pub struct FleetMonitor {
    active: RwLock<BTreeMap<String, usize>>,
}

impl FleetMonitor {
    pub fn active_counts(&self) -> BTreeMap<String, usize> {
        self.active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ProviderListener for FleetMonitor {
    fn on_provider_changed(&self, provider: &ProviderCore) {
        let active = provider.active_count();
        debug!(
            "{}: {}/{} container(s) ativos",
            provider.name(),
            active,
            provider.pool_size()
        );
        self.active
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(provider.name().to_string(), active);
    }
}

#[derive(Debug, Default)]
pub struct RefreshReport {
    pub refreshed: Vec<String>,
    pub failed: Vec<(String, anyhow::Error)>,
}

impl RefreshReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// The set of providers a fleet can place containers on.
///
/// Providers are kept in provider order (priority, then name) and names are unique, so
/// the order is total. The registry owns the [`FleetMonitor`]; providers only hold a weak
/// reference to it.
#[derive(Debug)]
pub struct ProviderRegistry {
    providers: RwLock<Vec<Arc<dyn Provider>>>,
    strategy: RwLock<Arc<dyn SelectionStrategy>>,
    monitor: Arc<FleetMonitor>,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new(Arc::new(PriorityStrategy))
    }
}

impl ProviderRegistry {
    pub fn new(strategy: Arc<dyn SelectionStrategy>) -> Self {
        Self {
            providers: RwLock::new(Vec::new()),
            strategy: RwLock::new(strategy),
            monitor: Arc::new(FleetMonitor::default()),
        }
    }

    pub fn register(&self, provider: Arc<dyn Provider>) -> Result<(), FleetError> {
        let mut providers = self.providers.write().unwrap_or_else(PoisonError::into_inner);

        if providers.iter().any(|p| p.name() == provider.name()) {
            return Err(FleetError::DuplicateProvider(provider.name().to_string()));
        }

        let monitor: Arc<dyn ProviderListener> = self.monitor.clone();
        let listener: Weak<dyn ProviderListener> = Arc::downgrade(&monitor);
        provider.core().set_listener(listener);

        let index = providers
            .binary_search_by(|p| provider_order(p.as_ref(), provider.as_ref()))
            .unwrap_or_else(|i| i);
        info!(
            "Provider {} registrado (prioridade {}, pool {})",
            provider.name(),
            provider.priority(),
            provider.core().pool_size()
        );
        providers.insert(index, provider);
        Ok(())
    }

    /// Providers in provider order.
    pub fn providers(&self) -> Vec<Arc<dyn Provider>> {
        self.providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn provider(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.providers().into_iter().find(|p| p.name() == name)
    }

    pub fn monitor(&self) -> &FleetMonitor {
        &self.monitor
    }

    pub fn set_strategy(&self, strategy: Arc<dyn SelectionStrategy>) {
        *self.strategy.write().unwrap_or_else(PoisonError::into_inner) = strategy;
    }

    pub fn select(&self, demand: usize) -> Option<Arc<dyn Provider>> {
        let strategy = self
            .strategy
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        strategy.select(&self.providers(), demand)
    }

    pub fn start(&self, config: LaunchConfig) -> Result<Arc<Container>> {
        let provider = self.select(1).ok_or(FleetError::NoCapacity { demand: 1 })?;
        debug!("{} selecionado para {}", provider.name(), config.name());
        provider.start(config)
    }

    /// Starts every config on one provider able to host all of them.
    pub fn start_all(&self, configs: Vec<LaunchConfig>) -> Result<Vec<Arc<Container>>> {
        if configs.is_empty() {
            return Ok(Vec::new());
        }
        let demand = configs.len();
        let provider = self.select(demand).ok_or(FleetError::NoCapacity { demand })?;
        debug!("{} selecionado para {} container(s)", provider.name(), demand);
        provider.start_all(configs)
    }

    /// Finds the provider currently holding `container_id`.
    pub fn locate(&self, container_id: &str) -> Option<(Arc<dyn Provider>, Arc<Container>)> {
        self.providers().into_iter().find_map(|p| {
            let container = p.core().container(container_id)?;
            Some((p, container))
        })
    }

    pub fn container(&self, container_id: &str) -> Option<Arc<Container>> {
        self.locate(container_id).map(|(_, c)| c)
    }

    pub fn stop(&self, container_id: &str) -> Result<()> {
        let (provider, _) = self
            .locate(container_id)
            .ok_or_else(|| FleetError::ContainerNotFound(container_id.to_string()))?;
        provider.stop(container_id)
    }

    pub fn restart(&self, container_id: &str) -> Result<Arc<Container>> {
        let (provider, _) = self
            .locate(container_id)
            .ok_or_else(|| FleetError::ContainerNotFound(container_id.to_string()))?;
        provider.restart(container_id)
    }

    /// Refreshes every provider, continuing past individual failures.
    pub fn refresh_all(&self) -> RefreshReport {
        let mut report = RefreshReport::default();

        for provider in self.providers() {
            match provider.refresh_containers_state() {
                Ok(()) => report.refreshed.push(provider.name().to_string()),
                Err(e) => {
                    error!("Falha ao atualizar {}: {:#}", provider.name(), e);
                    report.failed.push((provider.name().to_string(), e));
                }
            }
        }

        report
    }

    /// Stops the oldest container of `provider_name` to free a slot.
    ///
    /// When the backend refuses, the container is registered again (at the end of the
    /// queue) and the error is returned.
    pub fn evict_oldest(&self, provider_name: &str) -> Result<Option<Arc<Container>>> {
        let provider = self
            .provider(provider_name)
            .ok_or_else(|| FleetError::ProviderNotFound(provider_name.to_string()))?;

        let Some(oldest) = provider.core().poll_oldest_container() else {
            return Ok(None);
        };

        info!("Removendo container mais antigo de {}: {}", provider_name, oldest.id());
        if let Err(e) = provider.stop(oldest.id()) {
            provider.core().add_container(oldest);
            return Err(e);
        }
        Ok(Some(oldest))
    }

    /// Stops every container that outlived its provider's ttl. Failures are logged and
    /// skipped; the ids actually stopped are returned.
    pub fn reap_expired(&self, now: SystemTime) -> Vec<String> {
        let mut stopped = Vec::new();

        for provider in self.providers() {
            for container in provider.core().expired_containers(now) {
                match provider.stop(container.id()) {
                    Ok(()) => stopped.push(container.id().to_string()),
                    Err(e) => warn!("Falha ao expirar {}: {:#}", container.id(), e),
                }
            }
        }

        if !stopped.is_empty() {
            info!("{} container(s) expirado(s) encerrado(s)", stopped.len());
        }
        stopped
    }
}
