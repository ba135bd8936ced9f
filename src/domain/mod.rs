mod builder;
mod container;
mod launch;
pub mod provider;
pub mod registry;
pub mod traits;

pub use builder::{CommandBuilder, ConfigBuilder, DataVolumeBuilder};
pub use container::{Container, ContainerState, ContainerStatus, Progress};
pub use launch::{
    Command, CommandOptions, ContainerKind, DataVolumeOptions, HostVolume, LaunchConfig,
    LaunchOptions, Link, Mode, PortMapping, PortRange,
};
pub use provider::{
    Provider, ProviderCore, ProviderListener, ProviderSpec, ProviderStatus, provider_order,
};
pub use registry::{ContainerRegistry, Reconciliation};
pub use traits::{ContainerEngine, Labels, PROVIDER_LABEL, TEMPLATE_LABEL};
