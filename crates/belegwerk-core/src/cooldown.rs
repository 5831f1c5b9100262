// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Time-windowed de-duplication of repeated events.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Remembers when each key last fired and rejects repeats inside `window`.
///
/// Owned by whoever needs it and passed in explicitly; there is no global
/// instance.
#[derive(Debug)]
pub struct CooldownCache<K> {
    window: Duration,
    last_fired: Mutex<HashMap<K, Instant>>,
}

impl<K: Eq + Hash> CooldownCache<K> {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_fired: Mutex::new(HashMap::new()),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Returns `true` and records `now` when `key` has not fired within the
    /// window, `false` otherwise.
    pub fn try_acquire(&self, key: K, now: Instant) -> bool {
        // A poisoned lock only means another caller panicked mid-insert; the
        // map itself is still usable.
        let mut map = match self.last_fired.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        map.retain(|_, fired| now.saturating_duration_since(*fired) < self.window);
        if map.contains_key(&key) {
            return false;
        }
        map.insert(key, now);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeats_inside_window_are_rejected() {
        let cache = CooldownCache::new(Duration::from_secs(5));
        let t0 = Instant::now();
        assert!(cache.try_acquire("r1", t0));
        assert!(!cache.try_acquire("r1", t0 + Duration::from_secs(2)));
        assert!(cache.try_acquire("r2", t0 + Duration::from_secs(2)));
    }

    #[test]
    fn key_fires_again_after_window() {
        let cache = CooldownCache::new(Duration::from_secs(5));
        let t0 = Instant::now();
        assert!(cache.try_acquire(7u32, t0));
        assert!(cache.try_acquire(7u32, t0 + Duration::from_secs(5)));
    }
}
