pub mod runtime;

pub use runtime::{FleetAction, Runtime};
