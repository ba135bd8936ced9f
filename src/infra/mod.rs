pub mod config;
pub mod podman_adapter;

pub use config::{BackendKind, FleetConfig, LaunchDefinition, ProviderSettings};
pub use podman_adapter::PodmanAdapter;
