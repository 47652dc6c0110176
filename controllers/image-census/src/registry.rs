//! Cross-cluster service registry.
//!
//! Counts, per service name, how many cluster controllers currently hold a
//! deployment of that name. The aggregator uses the key set as the row
//! labels of the snapshot. All access goes through the locked operations
//! below; the backing map is never handed out.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

/// Refcounted set of service names shared by all controllers.
#[derive(Debug, Default)]
pub struct ServiceRegistry {
    services: Mutex<HashMap<String, u32>>,
}

impl ServiceRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn services(&self) -> MutexGuard<'_, HashMap<String, u32>> {
        self.services.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records one more holder of `name` and returns the new count.
    pub fn increment(&self, name: &str) -> u32 {
        let mut services = self.services();
        let count = services.entry(name.to_string()).or_insert(0);
        *count = count.saturating_add(1);
        let count = *count;
        drop(services);

        if count == 1 {
            info!(service = name, "Service registered");
        } else {
            debug!(service = name, count, "Service refcount incremented");
        }
        count
    }

    /// Records one fewer holder of `name` and returns the remaining count.
    ///
    /// The entry is removed when the count reaches zero; decrementing an
    /// absent name is a no-op.
    pub fn decrement(&self, name: &str) -> u32 {
        let mut services = self.services();
        let remaining = match services.get_mut(name) {
            Some(count) if *count > 1 => {
                *count -= 1;
                *count
            }
            Some(_) => {
                services.remove(name);
                0
            }
            None => return 0,
        };
        drop(services);

        if remaining == 0 {
            info!(service = name, "Service unregistered");
        } else {
            debug!(service = name, count = remaining, "Service refcount decremented");
        }
        remaining
    }

    /// Names with a refcount above zero.
    pub fn snapshot(&self) -> BTreeSet<String> {
        self.services().keys().cloned().collect()
    }

    /// Current refcount of `name` (zero when absent).
    #[cfg(test)]
    pub fn count(&self, name: &str) -> u32 {
        self.services().get(name).copied().unwrap_or(0)
    }

    /// Number of registered names.
    pub fn len(&self) -> usize {
        self.services().len()
    }

    /// Whether no names are registered.
    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_increment_and_decrement() {
        let registry = ServiceRegistry::new();
        assert_eq!(registry.increment("web"), 1);
        assert_eq!(registry.increment("web"), 2);
        assert_eq!(registry.decrement("web"), 1);
        assert!(registry.snapshot().contains("web"));
        assert_eq!(registry.decrement("web"), 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_decrement_absent_name_floors_at_zero() {
        let registry = ServiceRegistry::new();
        assert_eq!(registry.decrement("ghost"), 0);
        assert_eq!(registry.count("ghost"), 0);
        assert!(registry.snapshot().is_empty());

        // Underflow does not leave a debt behind
        assert_eq!(registry.increment("ghost"), 1);
    }

    #[test]
    fn test_entry_exists_iff_count_positive_for_any_sequence() {
        let registry = ServiceRegistry::new();
        let mut expected: u32 = 0;

        // Deterministic pseudo-random walk of increments and decrements
        let mut seed: u64 = 0x2545_f491_4f6c_dd1d;
        for _ in 0..2_000 {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            if seed % 3 == 0 {
                registry.increment("svc");
                expected += 1;
            } else {
                registry.decrement("svc");
                expected = expected.saturating_sub(1);
            }
            assert_eq!(registry.count("svc"), expected);
            assert_eq!(registry.snapshot().contains("svc"), expected > 0);
        }
    }

    #[test]
    fn test_concurrent_increments_from_many_controllers() {
        let registry = Arc::new(ServiceRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        registry.increment("web");
                    }
                    for _ in 0..50 {
                        registry.decrement("web");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(registry.count("web"), 8 * 50);
    }

    #[test]
    fn test_snapshot_is_sorted_copy() {
        let registry = ServiceRegistry::new();
        registry.increment("web");
        registry.increment("api");
        let snapshot = registry.snapshot();
        registry.decrement("web");
        assert_eq!(snapshot.into_iter().collect::<Vec<_>>(), vec!["api", "web"]);
        assert_eq!(registry.len(), 1);
    }
}
