use super::Container;
use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, warn};

/// Insertion-ordered set of containers, unique by id.
///
/// Reads clone the `Arc` handles under a short read lock; every mutation runs under the
/// write lock. Callers never see the live collection.
#[derive(Debug, Default)]
pub struct ContainerRegistry {
    containers: RwLock<Vec<Arc<Container>>>,
}

/// What a reconciliation pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    pub updated: Vec<String>,
    pub removed: Vec<String>,
    /// Present remotely but unknown locally. Reported, never added.
    pub unknown: Vec<String>,
}

impl ContainerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<Arc<Container>> {
        self.read().clone()
    }

    pub fn get(&self, id: &str) -> Option<Arc<Container>> {
        self.snapshot().into_iter().find(|c| c.id() == id)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends the containers whose id is not registered yet, returning how many were
    /// added.
    pub fn extend(&self, incoming: impl IntoIterator<Item = Arc<Container>>) -> usize {
        let mut containers = self.write();
        let mut known: HashSet<String> = containers.iter().map(|c| c.id().to_string()).collect();
        let mut added = 0;

        for container in incoming {
            if !known.insert(container.id().to_string()) {
                warn!("Container {} já registrado, ignorando", container.id());
                continue;
            }
            containers.push(container);
            added += 1;
        }

        added
    }

    pub fn remove(&self, id: &str) -> Option<Arc<Container>> {
        let mut containers = self.write();
        let index = containers.iter().position(|c| c.id() == id)?;
        Some(containers.remove(index))
    }

    /// Removes the earliest registered container.
    pub fn poll_oldest(&self) -> Option<Arc<Container>> {
        let mut containers = self.write();
        if containers.is_empty() {
            None
        } else {
            Some(containers.remove(0))
        }
    }

    /// Merges `remote` into the registered containers.
    ///
    /// Known containers take the remote ports, progress and status in place; containers
    /// missing from `remote` are dropped. Remote-only containers are left to the caller.
    pub fn reconcile(&self, remote: &[Container]) -> Reconciliation {
        let mut report = Reconciliation::default();
        let mut containers = self.write();

        containers.retain(|local| match remote.iter().find(|r| *r == local.as_ref()) {
            Some(observed) => {
                let before = local.status();
                if !before.can_transition_to(observed.status()) {
                    warn!(
                        "Container {} passou de {} para {}",
                        local.id(),
                        before,
                        observed.status()
                    );
                }
                local.merge_from(observed);
                report.updated.push(local.id().to_string());
                true
            }
            None => {
                debug!("Container {} ausente no backend, removendo", local.id());
                report.removed.push(local.id().to_string());
                false
            }
        });

        report.unknown = remote
            .iter()
            .filter(|r| !containers.iter().any(|c| c.as_ref() == *r))
            .map(|r| r.id().to_string())
            .collect();

        report
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Arc<Container>>> {
        self.containers.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Arc<Container>>> {
        self.containers.write().unwrap_or_else(PoisonError::into_inner)
    }
}
