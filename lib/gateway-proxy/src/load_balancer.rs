//! Selection among registrations that share a service name

use gateway_core::{SelectionPolicy, ServiceRegistration};
use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Picks one registration out of the candidates for a service
pub struct Selector {
    policy: SelectionPolicy,
    round_robin_counter: AtomicUsize,
}

impl Selector {
    pub fn new(policy: SelectionPolicy) -> Self {
        Self {
            policy,
            round_robin_counter: AtomicUsize::new(0),
        }
    }

    pub fn policy(&self) -> SelectionPolicy {
        self.policy
    }

    /// Select a registration according to the configured policy.
    ///
    /// `First` is a pure function of the candidate order.
    pub fn select<'a>(
        &self,
        candidates: &'a [ServiceRegistration],
    ) -> Option<&'a ServiceRegistration> {
        if candidates.is_empty() {
            return None;
        }

        match self.policy {
            SelectionPolicy::First => candidates.first(),
            SelectionPolicy::RoundRobin => {
                let current = self.round_robin_counter.fetch_add(1, Ordering::Relaxed);
                candidates.get(current % candidates.len())
            }
            SelectionPolicy::Random => {
                let index = rand::thread_rng().gen_range(0..candidates.len());
                candidates.get(index)
            }
        }
    }
}

impl Default for Selector {
    fn default() -> Self {
        Self::new(SelectionPolicy::First)
    }
}
