//! In-process solution store with a chronological expiry index.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, PoisonError, RwLock, RwLockWriteGuard};
use std::time::Instant;

use captcha_common::{CaptchaId, DigitSequence, Result};
use chrono::TimeDelta;

use super::SolutionStore;

/// Creation record in the expiry index. Stamped with the monotonic clock so
/// index order stays chronological if the wall clock steps.
#[derive(Debug, Clone)]
struct ExpiryEntry {
    created_at: Instant,
    id: CaptchaId,
}

/// Map and index live under one lock and are always updated together.
///
/// The index is append-only in creation order and may still hold ids that
/// were already consumed; those are skipped when collected.
#[derive(Debug, Default)]
struct State {
    ids: HashMap<CaptchaId, DigitSequence>,
    index: VecDeque<ExpiryEntry>,
    /// Insertions since the last collection
    num_stored: usize,
}

#[derive(Debug)]
struct Inner {
    state: RwLock<State>,
    collect_num: usize,
    expiration: TimeDelta,
}

/// Memory store handle. Clones share the same storage.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    /// Create a store that collects after `collect_num` insertions and
    /// expires entries older than `expiration`. A negative expiration makes
    /// every entry immediately collectable.
    pub fn new(collect_num: usize, expiration: TimeDelta) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: RwLock::new(State::default()),
                collect_num,
                expiration,
            }),
        }
    }

    pub fn expiration(&self) -> TimeDelta {
        self.inner.expiration
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.read_state(|s| s.ids.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of index records, including stale ones awaiting collection
    pub fn index_len(&self) -> usize {
        self.read_state(|s| s.index.len())
    }

    fn read_state<T>(&self, f: impl FnOnce(&State) -> T) -> T {
        let state = self.inner.state.read().unwrap_or_else(PoisonError::into_inner);
        f(&state)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, State> {
        self.inner
            .state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn is_expired(&self, created_at: Instant, now: Instant) -> bool {
        let age = TimeDelta::from_std(now.saturating_duration_since(created_at))
            .unwrap_or(TimeDelta::MAX);
        age > self.inner.expiration
    }

    fn collect_at(&self, now: Instant) -> usize {
        let mut state = self.write_state();
        state.num_stored = 0;

        let mut removed = 0;
        while let Some(front) = state.index.front() {
            if !self.is_expired(front.created_at, now) {
                break;
            }
            if let Some(entry) = state.index.pop_front() {
                if state.ids.remove(&entry.id).is_some() {
                    removed += 1;
                }
            }
        }
        removed
    }
}

impl SolutionStore for MemoryStore {
    fn set(&self, id: &CaptchaId, digits: DigitSequence) -> Result<()> {
        let trigger = {
            let mut state = self.write_state();
            state.ids.insert(id.clone(), digits);
            state.index.push_back(ExpiryEntry {
                created_at: Instant::now(),
                id: id.clone(),
            });
            state.num_stored += 1;
            if state.num_stored > self.inner.collect_num {
                state.num_stored = 0;
                true
            } else {
                false
            }
        };

        if trigger {
            let store = self.clone();
            std::thread::spawn(move || store.collect());
        }
        Ok(())
    }

    fn get(&self, id: &CaptchaId, clear: bool) -> Result<Option<DigitSequence>> {
        if !clear {
            return Ok(self.read_state(|s| s.ids.get(id).cloned()));
        }
        Ok(self.write_state().ids.remove(id))
    }

    fn replace(&self, id: &CaptchaId, digits: DigitSequence) -> Result<bool> {
        let mut state = self.write_state();
        match state.ids.get_mut(id) {
            Some(slot) => {
                *slot = digits;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn collect(&self) {
        let removed = self.collect_at(Instant::now());
        tracing::debug!(removed, remaining = self.len(), "Collected expired captchas");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random::{random_digits, random_id};
    use std::time::Duration;

    fn store() -> MemoryStore {
        MemoryStore::new(100, TimeDelta::minutes(10))
    }

    #[test]
    fn test_set_get() {
        let s = store();
        let id = random_id();
        let d = random_digits(10);
        s.set(&id, d.clone()).unwrap();
        for _ in 0..3 {
            assert_eq!(s.get(&id, false).unwrap(), Some(d.clone()));
        }
    }

    #[test]
    fn test_get_clear() {
        let s = store();
        let id = random_id();
        let d = random_digits(10);
        s.set(&id, d.clone()).unwrap();
        assert_eq!(s.get(&id, true).unwrap(), Some(d));
        assert_eq!(s.get(&id, false).unwrap(), None);
        assert_eq!(s.get(&id, true).unwrap(), None);
    }

    #[test]
    fn test_collect_expired() {
        let s = MemoryStore::new(10, TimeDelta::seconds(-1));
        let ids: Vec<_> = (0..10).map(|_| random_id()).collect();
        let d = random_digits(10);
        for id in &ids {
            s.set(id, d.clone()).unwrap();
        }
        s.collect();
        for (i, id) in ids.iter().enumerate() {
            assert_eq!(s.get(id, false).unwrap(), None, "{}: not collected", i);
        }
        assert_eq!(s.index_len(), 0);
    }

    #[test]
    fn test_collect_keeps_fresh_entries() {
        let s = store();
        let id = random_id();
        s.set(&id, random_digits(6)).unwrap();
        s.collect();
        assert!(s.get(&id, false).unwrap().is_some());
        assert_eq!(s.index_len(), 1);
    }

    #[test]
    fn test_collect_stops_at_first_live_entry() {
        let s = MemoryStore::new(100, TimeDelta::seconds(60));
        let old = random_id();
        let fresh = random_id();
        s.set(&old, random_digits(6)).unwrap();
        s.set(&fresh, random_digits(6)).unwrap();

        // Only the first entry is past the window 90 seconds from now
        {
            let mut state = s.inner.state.write().unwrap();
            state.index[1].created_at += Duration::from_secs(120);
        }
        assert_eq!(s.collect_at(Instant::now() + Duration::from_secs(90)), 1);
        assert_eq!(s.get(&old, false).unwrap(), None);
        assert!(s.get(&fresh, false).unwrap().is_some());
        assert_eq!(s.index_len(), 1);
    }

    #[test]
    fn test_collect_skips_consumed_ids() {
        let s = MemoryStore::new(100, TimeDelta::seconds(-1));
        let id = random_id();
        s.set(&id, random_digits(6)).unwrap();
        assert!(s.get(&id, true).unwrap().is_some());
        assert_eq!(s.index_len(), 1);
        assert_eq!(s.collect_at(Instant::now()), 0);
        assert_eq!(s.index_len(), 0);
    }

    #[test]
    fn test_replace_keeps_original_expiry() {
        let s = MemoryStore::new(100, TimeDelta::seconds(60));
        let id = random_id();
        s.set(&id, random_digits(6)).unwrap();

        let replacement = random_digits(6);
        assert!(s.replace(&id, replacement.clone()).unwrap());
        assert_eq!(s.get(&id, false).unwrap(), Some(replacement));
        assert_eq!(s.index_len(), 1);

        // The original index record still expires the id
        assert_eq!(s.collect_at(Instant::now() + Duration::from_secs(90)), 1);
        assert_eq!(s.get(&id, false).unwrap(), None);
    }

    #[test]
    fn test_replace_absent_id_is_noop() {
        let s = store();
        let id = random_id();
        assert!(!s.replace(&id, random_digits(6)).unwrap());
        assert_eq!(s.get(&id, false).unwrap(), None);
        assert_eq!(s.index_len(), 0);

        // A consumed id stays gone
        s.set(&id, random_digits(6)).unwrap();
        assert!(s.get(&id, true).unwrap().is_some());
        assert!(!s.replace(&id, random_digits(6)).unwrap());
        assert_eq!(s.get(&id, false).unwrap(), None);
    }

    #[test]
    fn test_replace_after_collect_is_noop() {
        let s = MemoryStore::new(100, TimeDelta::seconds(-1));
        let id = random_id();
        s.set(&id, random_digits(6)).unwrap();
        s.collect();
        assert!(!s.replace(&id, random_digits(6)).unwrap());
        assert!(s.is_empty());
        assert_eq!(s.index_len(), 0);
    }

    #[test]
    fn test_expiry_uses_monotonic_age() {
        let s = MemoryStore::new(100, TimeDelta::seconds(60));
        let created = Instant::now();
        assert!(!s.is_expired(created, created));
        assert!(!s.is_expired(created, created + Duration::from_secs(60)));
        assert!(s.is_expired(created, created + Duration::from_secs(61)));
        // A "now" before creation counts as age zero
        assert!(!s.is_expired(created + Duration::from_secs(5), created));

        let negative = MemoryStore::new(100, TimeDelta::seconds(-1));
        assert!(negative.is_expired(created, created));
    }

    #[test]
    fn test_automatic_collection() {
        let s = MemoryStore::new(5, TimeDelta::seconds(-1));
        for _ in 0..6 {
            s.set(&random_id(), random_digits(4)).unwrap();
        }
        // Collection runs on a detached thread
        for _ in 0..100 {
            if s.is_empty() {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(s.is_empty());
    }

    #[test]
    fn test_concurrent_readers_and_writers() {
        let s = store();
        let id = random_id();
        let d = random_digits(6);
        s.set(&id, d.clone()).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let s = s.clone();
                let id = id.clone();
                let d = d.clone();
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        assert_eq!(s.get(&id, false).unwrap(), Some(d.clone()));
                        s.set(&random_id(), random_digits(i % 5 + 1)).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(s.len(), 1 + 8 * 200);
    }

    #[test]
    fn test_single_winner_for_clearing_get() {
        let s = store();
        let id = random_id();
        s.set(&id, random_digits(6)).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let s = s.clone();
                let id = id.clone();
                std::thread::spawn(move || s.get(&id, true).unwrap().is_some())
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|&won| won)
            .count();
        assert_eq!(winners, 1);
    }
}
