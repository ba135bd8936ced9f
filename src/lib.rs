pub mod cli;
pub mod domain;
pub mod error;
pub mod infra;
pub mod services;

// Shared by unit and integration tests.
pub mod test_support;

pub use domain::{
    Container, ContainerEngine, ContainerStatus, LaunchConfig, Provider, ProviderCore,
    ProviderListener, ProviderSpec,
};
pub use error::{ConfigError, FleetError};
pub use infra::PodmanAdapter;
pub use services::{EngineProvider, LeastLoadedStrategy, PriorityStrategy, ProviderRegistry};
