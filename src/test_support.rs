use crate::domain::{
    Container, ContainerEngine, ContainerStatus, LaunchConfig, Labels, PortMapping, ProviderCore,
    ProviderListener,
};
use anyhow::{Result, bail};
use std::collections::{BTreeMap, HashSet};
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

#[derive(Debug, Clone)]
pub struct MockContainer {
    pub id: String,
    pub name: String,
    pub image: String,
    pub status: ContainerStatus,
    pub labels: Labels,
    pub ports: BTreeMap<u16, u16>,
}

/// In-memory engine recording every call, e.g. `launch:web` or `remove:mock-1`.
#[derive(Debug)]
pub struct MockEngine {
    containers: RwLock<Vec<MockContainer>>,
    commands: RwLock<Vec<String>>,
    fail_on: RwLock<Option<String>>,
    fail_names: RwLock<HashSet<String>>,
    available: AtomicBool,
    next_id: AtomicUsize,
}

impl MockEngine {
    pub fn new() -> Self {
        Self {
            containers: RwLock::new(Vec::new()),
            commands: RwLock::new(Vec::new()),
            fail_on: RwLock::new(None),
            fail_names: RwLock::new(HashSet::new()),
            available: AtomicBool::new(true),
            next_id: AtomicUsize::new(1),
        }
    }

    /// Makes every call to `operation` (`launch`, `remove`, `restart`, `list`) fail.
    pub fn set_fail_on(&self, operation: &str) {
        *self.fail_on.write().unwrap() = Some(operation.to_string());
    }

    pub fn clear_failure(&self) {
        *self.fail_on.write().unwrap() = None;
    }

    /// Makes launching a container with this name fail.
    pub fn fail_launch_of(&self, name: &str) {
        self.fail_names.write().unwrap().insert(name.to_string());
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn get_commands(&self) -> Vec<String> {
        self.commands.read().unwrap().clone()
    }

    pub fn running_count(&self) -> usize {
        self.containers.read().unwrap().len()
    }

    pub fn set_status(&self, id: &str, status: ContainerStatus) {
        if let Some(c) = self.containers.write().unwrap().iter_mut().find(|c| c.id == id) {
            c.status = status;
        }
    }

    /// Drops a container behind the provider's back, as if it exited with `--rm`.
    pub fn forget(&self, id: &str) {
        self.containers.write().unwrap().retain(|c| c.id != id);
    }

    /// Registers a container the provider never launched.
    pub fn inject(&self, id: &str, labels: Labels) {
        self.containers.write().unwrap().push(MockContainer {
            id: id.to_string(),
            name: id.to_string(),
            image: "external".to_string(),
            status: ContainerStatus::Running,
            labels,
            ports: BTreeMap::new(),
        });
    }

    fn record_command(&self, cmd: &str) {
        self.commands.write().unwrap().push(cmd.to_string());
    }

    fn check_fail(&self, operation: &str) -> Result<()> {
        if let Some(ref fail_on) = *self.fail_on.read().unwrap() {
            if fail_on == operation {
                bail!("Mock failure on: {}", operation);
            }
        }
        Ok(())
    }

    fn to_container(mock: &MockContainer) -> Container {
        mock.ports.iter().fold(
            Container::new(&mock.id, &mock.name).with_status(mock.status),
            |c, (container_port, host_port)| c.with_port(*container_port, *host_port),
        )
    }
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ContainerEngine for MockEngine {
    fn launch(&self, config: &LaunchConfig, labels: &Labels) -> Result<Container> {
        self.record_command(&format!("launch:{}", config.name()));
        self.check_fail("launch")?;
        if self.fail_names.read().unwrap().contains(config.name()) {
            bail!("Mock failure launching: {}", config.name());
        }

        let id = format!("mock-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let mut ports = BTreeMap::new();
        if let Some(opts) = config.command_options() {
            for mapping in opts.port_map() {
                if let PortMapping::Single { host, container } = mapping {
                    ports.insert(*container, *host);
                }
            }
        }

        let mock = MockContainer {
            id,
            name: config.name().to_string(),
            image: config.image().to_string(),
            status: ContainerStatus::Pending,
            labels: labels.clone(),
            ports,
        };
        let container = Self::to_container(&mock);
        self.containers.write().unwrap().push(mock);
        Ok(container)
    }

    fn remove(&self, id: &str) -> Result<()> {
        self.record_command(&format!("remove:{}", id));
        self.check_fail("remove")?;
        self.forget(id);
        Ok(())
    }

    fn restart(&self, id: &str) -> Result<Container> {
        self.record_command(&format!("restart:{}", id));
        self.check_fail("restart")?;

        let mut containers = self.containers.write().unwrap();
        match containers.iter_mut().find(|c| c.id == id) {
            Some(c) => {
                c.status = ContainerStatus::Running;
                Ok(Self::to_container(c))
            }
            None => bail!("Mock container {} does not exist", id),
        }
    }

    fn list(&self, labels: &Labels) -> Result<Vec<Container>> {
        self.record_command("list");
        self.check_fail("list")?;

        Ok(self
            .containers
            .read()
            .unwrap()
            .iter()
            .filter(|c| labels.iter().all(|(k, v)| c.labels.get(k) == Some(v)))
            .map(Self::to_container)
            .collect())
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }
}

/// Listener counting notifications and remembering the active count seen each time.
#[derive(Debug, Default)]
pub struct RecordingListener {
    seen: RwLock<Vec<(String, usize)>>,
}

impl RecordingListener {
    pub fn calls(&self) -> usize {
        self.seen.read().unwrap().len()
    }

    pub fn seen(&self) -> Vec<(String, usize)> {
        self.seen.read().unwrap().clone()
    }
}

impl ProviderListener for RecordingListener {
    fn on_provider_changed(&self, provider: &ProviderCore) {
        self.seen
            .write()
            .unwrap()
            .push((provider.name().to_string(), provider.active_count()));
    }
}
