use std::collections::BTreeMap;
use std::fmt;
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, SystemTime};

/// Lifecycle of a container as reported by its backend.
///
/// `Pending -> Running -> {Stopped, Failed}`. The backend enforces the transitions, the
/// fleet layer only surfaces them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ContainerStatus {
    #[default]
    Pending,
    Running,
    Stopped,
    Failed,
}

impl ContainerStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped | Self::Failed)
    }

    pub fn can_transition_to(&self, next: ContainerStatus) -> bool {
        match (self, next) {
            (a, b) if *a == b => true,
            (Self::Pending, _) => true,
            (Self::Running, Self::Stopped | Self::Failed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => f.pad("pending"),
            Self::Running => f.pad("running"),
            Self::Stopped => f.pad("stopped"),
            Self::Failed => f.pad("failed"),
        }
    }
}

/// Start-up progress, 0 to 100, with an optional message log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Progress {
    percentage: u8,
    messages: Vec<String>,
}

impl Progress {
    /// Values above 100 are clamped.
    pub fn new(percentage: u8) -> Self {
        Self {
            percentage: percentage.min(100),
            messages: Vec::new(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.messages.push(message.into());
        self
    }

    pub fn percentage(&self) -> u8 {
        self.percentage
    }

    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    pub fn add_message(&mut self, message: impl Into<String>) {
        self.messages.push(message.into());
    }
}

/// The part of a container that reconciliation is allowed to change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerState {
    /// Container port to the host port the runtime assigned.
    pub ports: BTreeMap<u16, u16>,
    pub progress: Progress,
    pub status: ContainerStatus,
}

/// A container known to a provider.
///
/// Registries hand out `Arc<Container>`; reconciliation rewrites [`ContainerState`] in
/// place so every holder of the handle observes the merged values. Two containers are
/// equal when their ids are.
#[derive(Debug)]
pub struct Container {
    id: String,
    name: String,
    created_at: SystemTime,
    state: RwLock<ContainerState>,
}

impl Container {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            created_at: SystemTime::now(),
            state: RwLock::new(ContainerState::default()),
        }
    }

    pub fn with_status(self, status: ContainerStatus) -> Self {
        self.write_state(|s| s.status = status);
        self
    }

    pub fn with_progress(self, progress: Progress) -> Self {
        self.write_state(|s| s.progress = progress);
        self
    }

    pub fn with_port(self, container_port: u16, host_port: u16) -> Self {
        self.write_state(|s| {
            s.ports.insert(container_port, host_port);
        });
        self
    }

    pub fn with_created_at(mut self, created_at: SystemTime) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    /// Copy of the mutable state at this instant.
    pub fn state(&self) -> ContainerState {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn status(&self) -> ContainerStatus {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .status
    }

    pub fn progress(&self) -> Progress {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .progress
            .clone()
    }

    pub fn ports(&self) -> BTreeMap<u16, u16> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .ports
            .clone()
    }

    /// Whether the container outlived `ttl` at `now`. Clock skew counts as not expired.
    pub fn is_expired(&self, ttl: Duration, now: SystemTime) -> bool {
        now.duration_since(self.created_at)
            .map(|age| age >= ttl)
            .unwrap_or(false)
    }

    /// Overwrites ports, progress and status with the values observed on `remote`.
    pub(crate) fn merge_from(&self, remote: &Container) {
        if std::ptr::eq(self, remote) {
            return;
        }
        let observed = remote.state();
        self.write_state(|s| *s = observed);
    }

    fn write_state(&self, f: impl FnOnce(&mut ContainerState)) {
        let mut guard = self.state.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard);
    }
}

impl PartialEq for Container {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Container {}

impl Clone for Container {
    /// Detached copy: same id, independent state.
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            name: self.name.clone(),
            created_at: self.created_at,
            state: RwLock::new(self.state()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_is_by_id() {
        let a = Container::new("abc", "web").with_status(ContainerStatus::Running);
        let b = Container::new("abc", "other").with_progress(Progress::new(90));
        let c = Container::new("def", "web");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn progress_is_clamped() {
        assert_eq!(Progress::new(250).percentage(), 100);
        let p = Progress::new(40).with_message("pulling image");
        assert_eq!(p.messages(), ["pulling image"]);
    }

    #[test]
    fn merge_copies_remote_state() {
        let local = Container::new("abc", "web").with_progress(Progress::new(10));
        let remote = Container::new("abc", "web")
            .with_status(ContainerStatus::Running)
            .with_progress(Progress::new(40))
            .with_port(80, 32768);

        local.merge_from(&remote);

        assert_eq!(local.status(), ContainerStatus::Running);
        assert_eq!(local.progress().percentage(), 40);
        assert_eq!(local.ports().get(&80), Some(&32768));
    }

    #[test]
    fn status_transitions() {
        use ContainerStatus::*;
        assert!(Pending.can_transition_to(Running));
        assert!(Running.can_transition_to(Failed));
        assert!(!Stopped.can_transition_to(Running));
        assert!(!Running.can_transition_to(Pending));
        assert!(Failed.is_terminal());
        assert!(!Running.is_terminal());
    }

    #[test]
    fn expiry_uses_creation_time() {
        let created = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000);
        let c = Container::new("abc", "web").with_created_at(created);
        let ttl = Duration::from_secs(60);
        assert!(!c.is_expired(ttl, created + Duration::from_secs(59)));
        assert!(c.is_expired(ttl, created + Duration::from_secs(60)));
        assert!(!c.is_expired(ttl, created - Duration::from_secs(5)));
    }
}
