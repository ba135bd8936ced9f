use crate::domain::Provider;
use std::fmt::Debug;
use std::sync::Arc;

/// Chooses which providers may host new containers.
///
/// `providers` is always given in provider order (priority, then name).
pub trait SelectionStrategy: Send + Sync + Debug {
    /// Providers able to host `demand` more containers, most preferred first.
    fn eligible(&self, providers: &[Arc<dyn Provider>], demand: usize) -> Vec<Arc<dyn Provider>>;

    fn select(&self, providers: &[Arc<dyn Provider>], demand: usize) -> Option<Arc<dyn Provider>> {
        self.eligible(providers, demand).into_iter().next()
    }
}

fn has_room(provider: &dyn Provider, demand: usize) -> bool {
    if demand <= 1 {
        provider.can_create_container()
    } else {
        provider.can_create_containers(demand)
    }
}

/// First provider in priority order with room wins.
#[derive(Debug, Clone, Copy, Default)]
pub struct PriorityStrategy;

impl SelectionStrategy for PriorityStrategy {
    fn eligible(&self, providers: &[Arc<dyn Provider>], demand: usize) -> Vec<Arc<dyn Provider>> {
        providers
            .iter()
            .filter(|p| has_room(p.as_ref(), demand))
            .cloned()
            .collect()
    }
}

/// Spreads load: the provider with the most free slots wins, ties keep priority order.
#[derive(Debug, Clone, Copy, Default)]
pub struct LeastLoadedStrategy;

impl SelectionStrategy for LeastLoadedStrategy {
    fn eligible(&self, providers: &[Arc<dyn Provider>], demand: usize) -> Vec<Arc<dyn Provider>> {
        let mut eligible = PriorityStrategy.eligible(providers, demand);
        // Stable sort, so equal loads stay in provider order.
        eligible.sort_by_key(|p| std::cmp::Reverse(p.core().free_slots()));
        eligible
    }
}
