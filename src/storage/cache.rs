use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use super::AnalysisRecord;

/// Bounded analysis cache keyed by asset reference.
///
/// Holds at most `capacity` entries, evicting the oldest insertion first;
/// entries older than `ttl` are treated as absent and pruned lazily.
#[derive(Debug)]
pub struct AnalysisCache {
    capacity: usize,
    ttl: Duration,
    entries: HashMap<String, (Instant, AnalysisRecord)>,
    order: VecDeque<String>,
}

impl AnalysisCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            ttl,
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn insert(&mut self, record: AnalysisRecord) {
        self.insert_at(record, Instant::now());
    }

    pub fn get(&mut self, asset_ref: &str) -> Option<AnalysisRecord> {
        self.get_at(asset_ref, Instant::now())
    }

    pub fn remove(&mut self, asset_ref: &str) -> Option<AnalysisRecord> {
        self.order.retain(|k| k != asset_ref);
        self.entries.remove(asset_ref).map(|(_, r)| r)
    }

    fn insert_at(&mut self, record: AnalysisRecord, now: Instant) {
        let key = record.asset_ref.clone();
        if self.entries.insert(key.clone(), (now, record)).is_some() {
            self.order.retain(|k| k != &key);
        }
        self.order.push_back(key);

        while self.entries.len() > self.capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.entries.remove(&oldest);
                }
                None => break,
            }
        }
    }

    fn get_at(&mut self, asset_ref: &str, now: Instant) -> Option<AnalysisRecord> {
        let expired = match self.entries.get(asset_ref) {
            Some((inserted, _)) => now.duration_since(*inserted) >= self.ttl,
            None => return None,
        };
        if expired {
            self.remove(asset_ref);
            return None;
        }
        self.entries.get(asset_ref).map(|(_, r)| r.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::fallback;

    fn record(asset_ref: &str) -> AnalysisRecord {
        AnalysisRecord::new(asset_ref, &fallback::synthesize(10, 20), 0.5)
    }

    #[test]
    fn evicts_oldest_when_full() {
        let mut cache = AnalysisCache::new(2, Duration::from_secs(60));
        let now = Instant::now();
        cache.insert_at(record("a"), now);
        cache.insert_at(record("b"), now);
        cache.insert_at(record("c"), now);
        assert_eq!(cache.len(), 2);
        assert!(cache.get_at("a", now).is_none());
        assert!(cache.get_at("c", now).is_some());
    }

    #[test]
    fn reinsert_refreshes_position() {
        let mut cache = AnalysisCache::new(2, Duration::from_secs(60));
        let now = Instant::now();
        cache.insert_at(record("a"), now);
        cache.insert_at(record("b"), now);
        cache.insert_at(record("a"), now);
        cache.insert_at(record("c"), now);
        assert!(cache.get_at("a", now).is_some());
        assert!(cache.get_at("b", now).is_none());
    }

    #[test]
    fn entries_expire() {
        let mut cache = AnalysisCache::new(4, Duration::from_secs(60));
        let now = Instant::now();
        cache.insert_at(record("a"), now);
        assert!(cache.get_at("a", now + Duration::from_secs(59)).is_some());
        assert!(cache.get_at("a", now + Duration::from_secs(60)).is_none());
        assert!(cache.is_empty());
    }
}
