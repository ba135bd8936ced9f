use super::registry::{ContainerRegistry, Reconciliation};
use super::{Container, LaunchConfig};
use anyhow::Result;
use std::cmp::Ordering;
use std::fmt;
use std::fmt::Debug;
use std::sync::{Arc, PoisonError, RwLock, Weak};
use std::time::{Duration, SystemTime};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderStatus {
    Online,
    Offline,
}

impl fmt::Display for ProviderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Online => f.pad("online"),
            Self::Offline => f.pad("offline"),
        }
    }
}

/// Called synchronously, after the registry lock is released, whenever a provider's
/// containers change.
pub trait ProviderListener: Send + Sync {
    fn on_provider_changed(&self, provider: &ProviderCore);
}

/// Static metadata of a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSpec {
    pub name: String,
    pub template_tag: String,
    pub pool_size: usize,
    pub ttl: Duration,
    /// Lower is more important. 0 is preferred over 1.
    pub priority: u32,
}

impl ProviderSpec {
    pub fn new(name: impl Into<String>, template_tag: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            template_tag: template_tag.into(),
            pool_size: 1,
            ttl: Duration::from_secs(30 * 60),
            priority: 0,
        }
    }

    pub fn pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }
}

/// Registry, admission control and change notification shared by every backend.
///
/// Backends embed one and expose it through [`Provider::core`]. The mutating methods are
/// meant for the owning backend; nothing else should add or remove containers.
pub struct ProviderCore {
    spec: ProviderSpec,
    registry: ContainerRegistry,
    listener: RwLock<Option<Weak<dyn ProviderListener>>>,
}

impl Debug for ProviderCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderCore")
            .field("spec", &self.spec)
            .field("active", &self.registry.len())
            .finish()
    }
}

impl ProviderCore {
    pub fn new(spec: ProviderSpec) -> Self {
        Self {
            spec,
            registry: ContainerRegistry::new(),
            listener: RwLock::new(None),
        }
    }

    pub fn spec(&self) -> &ProviderSpec {
        &self.spec
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn template_tag(&self) -> &str {
        &self.spec.template_tag
    }

    pub fn pool_size(&self) -> usize {
        self.spec.pool_size
    }

    pub fn ttl(&self) -> Duration {
        self.spec.ttl
    }

    pub fn priority(&self) -> u32 {
        self.spec.priority
    }

    /// The listener is held weakly; once it is dropped notifications stop.
    pub fn set_listener(&self, listener: Weak<dyn ProviderListener>) {
        *self.listener.write().unwrap_or_else(PoisonError::into_inner) = Some(listener);
    }

    pub fn containers(&self) -> Vec<Arc<Container>> {
        self.registry.snapshot()
    }

    pub fn container(&self, id: &str) -> Option<Arc<Container>> {
        self.registry.get(id)
    }

    /// Containers present, whatever their status.
    pub fn active_count(&self) -> usize {
        self.registry.len()
    }

    pub fn can_create_container(&self) -> bool {
        self.active_count() < self.spec.pool_size
    }

    /// Stricter than [`Self::can_create_container`]: `active + size` must stay below the
    /// pool size, so `can_create_containers(1)` needs two free slots.
    pub fn can_create_containers(&self, size: usize) -> bool {
        self.active_count().saturating_add(size) < self.spec.pool_size
    }

    pub fn free_slots(&self) -> usize {
        self.spec.pool_size.saturating_sub(self.active_count())
    }

    pub fn poll_oldest_container(&self) -> Option<Arc<Container>> {
        let oldest = self.registry.poll_oldest();
        if oldest.is_some() {
            self.notify();
        }
        oldest
    }

    pub fn expired_containers(&self, now: SystemTime) -> Vec<Arc<Container>> {
        self.containers()
            .into_iter()
            .filter(|c| c.is_expired(self.spec.ttl, now))
            .collect()
    }

    pub fn add_container(&self, container: Arc<Container>) {
        self.add_containers([container]);
    }

    pub fn add_containers(&self, containers: impl IntoIterator<Item = Arc<Container>>) {
        let added = self.registry.extend(containers);
        debug!("{}: {} container(s) registrado(s)", self.spec.name, added);
        self.notify();
    }

    pub fn remove_container(&self, id: &str) -> Option<Arc<Container>> {
        let removed = self.registry.remove(id);
        self.notify();
        removed
    }

    /// Reconciles the registry with the backend's authoritative view.
    ///
    /// Containers absent from `remote` are dropped, the others are updated in place.
    /// Containers only present in `remote` are not registered here; starting a container
    /// registers it explicitly through [`Self::add_container`].
    pub fn update_containers(&self, remote: &[Container]) -> Reconciliation {
        let report = self.registry.reconcile(remote);
        if !report.removed.is_empty() || !report.unknown.is_empty() {
            info!(
                "{}: {} atualizado(s), {} removido(s), {} desconhecido(s) no backend",
                self.spec.name,
                report.updated.len(),
                report.removed.len(),
                report.unknown.len()
            );
        }
        self.notify();
        report
    }

    /// Merges one observed record into the registered container with the same id.
    pub fn merge_container(&self, remote: &Container) -> Option<Arc<Container>> {
        let local = self.registry.get(remote.id())?;
        local.merge_from(remote);
        self.notify();
        Some(local)
    }

    fn notify(&self) {
        let listener = self
            .listener
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(Weak::upgrade);

        if let Some(listener) = listener {
            listener.on_provider_changed(self);
        }
    }
}

/// A backend able to host containers.
///
/// Implementations own a [`ProviderCore`] and must only register a container once the
/// backend confirmed it exists, and only reconcile once the remote view was fetched in
/// full, so a failing call never leaves a partial update behind.
pub trait Provider: Send + Sync + Debug {
    fn core(&self) -> &ProviderCore;

    fn start(&self, config: LaunchConfig) -> Result<Arc<Container>>;

    fn start_all(&self, configs: Vec<LaunchConfig>) -> Result<Vec<Arc<Container>>>;

    fn stop(&self, container_id: &str) -> Result<()>;

    fn restart(&self, container_id: &str) -> Result<Arc<Container>>;

    fn refresh_containers_state(&self) -> Result<()>;

    fn hostname(&self) -> String;

    fn status(&self) -> ProviderStatus;

    fn name(&self) -> &str {
        self.core().name()
    }

    fn priority(&self) -> u32 {
        self.core().priority()
    }

    fn can_create_container(&self) -> bool {
        self.core().can_create_container()
    }

    fn can_create_containers(&self, size: usize) -> bool {
        self.core().can_create_containers(size)
    }
}

/// Priority ascending, then name ascending.
pub fn provider_order(a: &dyn Provider, b: &dyn Provider) -> Ordering {
    a.priority()
        .cmp(&b.priority())
        .then_with(|| a.name().cmp(b.name()))
}
