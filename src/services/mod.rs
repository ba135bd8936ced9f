mod engine_provider;
mod fleet;
mod selection;

pub use engine_provider::EngineProvider;
pub use fleet::{FleetMonitor, ProviderRegistry, RefreshReport};
pub use selection::{LeastLoadedStrategy, PriorityStrategy, SelectionStrategy};
