//! Host selection strategies

use crate::config::HostAddr;
use rand::seq::SliceRandom;
use std::collections::HashSet;

/// Picks the next candidate of a failover attempt
pub trait HostSelector: Send + Sync + 'static {
    /// Choose one of `candidates` not in `excluded`, or `None` when none remain
    fn select<'a>(
        &self,
        candidates: &'a [HostAddr],
        excluded: &HashSet<HostAddr>,
    ) -> Option<&'a HostAddr>;
}

/// Uniformly random choice among the remaining candidates
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomSelector;

impl HostSelector for RandomSelector {
    fn select<'a>(
        &self,
        candidates: &'a [HostAddr],
        excluded: &HashSet<HostAddr>,
    ) -> Option<&'a HostAddr> {
        let remaining: Vec<&HostAddr> = candidates
            .iter()
            .filter(|h| !excluded.contains(*h))
            .collect();
        remaining.choose(&mut rand::thread_rng()).copied()
    }
}

/// First remaining candidate in configured order
#[derive(Debug, Clone, Copy, Default)]
pub struct OrderedSelector;

impl HostSelector for OrderedSelector {
    fn select<'a>(
        &self,
        candidates: &'a [HostAddr],
        excluded: &HashSet<HostAddr>,
    ) -> Option<&'a HostAddr> {
        candidates.iter().find(|h| !excluded.contains(*h))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hosts() -> Vec<HostAddr> {
        vec![
            HostAddr::new("a", 5432),
            HostAddr::new("b", 5432),
            HostAddr::new("c", 5432),
        ]
    }

    #[test]
    fn test_ordered_selector_skips_excluded() {
        let hosts = hosts();
        let mut excluded = HashSet::new();
        assert_eq!(OrderedSelector.select(&hosts, &excluded), Some(&hosts[0]));

        excluded.insert(hosts[0].clone());
        assert_eq!(OrderedSelector.select(&hosts, &excluded), Some(&hosts[1]));

        excluded.extend(hosts.iter().cloned());
        assert_eq!(OrderedSelector.select(&hosts, &excluded), None);
    }

    #[test]
    fn test_random_selector_never_returns_excluded() {
        let hosts = hosts();
        let excluded: HashSet<_> = [hosts[0].clone(), hosts[2].clone()].into_iter().collect();
        for _ in 0..50 {
            assert_eq!(RandomSelector.select(&hosts, &excluded), Some(&hosts[1]));
        }
        assert_eq!(RandomSelector.select(&[], &HashSet::new()), None);
    }

    #[test]
    fn test_random_selector_covers_candidates() {
        let hosts = hosts();
        let excluded = HashSet::new();
        let seen: HashSet<_> = (0..200)
            .filter_map(|_| RandomSelector.select(&hosts, &excluded).cloned())
            .collect();
        assert_eq!(seen.len(), 3);
    }
}
