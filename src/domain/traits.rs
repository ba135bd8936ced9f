use super::{Container, LaunchConfig};
use anyhow::Result;
use std::collections::BTreeMap;
use std::fmt::Debug;

/// Labels attached to every container a provider launches, used to find them again.
pub type Labels = BTreeMap<String, String>;

/// Label key carrying the name of the provider that owns a container.
pub const PROVIDER_LABEL: &str = "fleetbox.provider";

pub const TEMPLATE_LABEL: &str = "fleetbox.template";

/// Driver for a container engine.
///
/// Every returned [`Container`] is a fresh record reflecting the engine's view at call time.
pub trait ContainerEngine: Send + Sync + Debug {
    /// Create (and for command containers, start) a container from `config`.
    fn launch(&self, config: &LaunchConfig, labels: &Labels) -> Result<Container>;

    /// Stop and remove a container
    fn remove(&self, id: &str) -> Result<()>;

    /// Restart a container and return its new state
    fn restart(&self, id: &str) -> Result<Container>;

    /// All containers carrying every label in `labels`, whatever their state
    fn list(&self, labels: &Labels) -> Result<Vec<Container>>;

    /// Check if the engine can be reached
    fn is_available(&self) -> bool;
}
