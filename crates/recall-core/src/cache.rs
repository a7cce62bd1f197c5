//! Bounded TTL cache for query results.
//!
//! Entries expire `ttl` after they were set. Reads use `peek`, so they never
//! refresh an entry's age or position; when the cache is full the entry that
//! was set longest ago is evicted. All operations take one internal mutex, so
//! a cache can be shared freely across threads.

use std::{
  hash::Hash,
  num::NonZeroUsize,
  sync::{Mutex, MutexGuard, PoisonError},
  time::{Duration, Instant},
};

use lru::LruCache;

pub struct TtlCache<K, V> {
  /// `None` when the capacity is zero.
  inner: Option<Mutex<LruCache<K, (Instant, V)>>>,
  ttl:   Duration,
}

impl<K, V> TtlCache<K, V>
where
  K: Eq + Hash,
  V: Clone,
{
  /// A cache holding at most `capacity` entries. A capacity of zero disables
  /// caching: every `set` is dropped.
  pub fn new(capacity: usize, ttl: Duration) -> Self {
    Self {
      inner: NonZeroUsize::new(capacity).map(|cap| Mutex::new(LruCache::new(cap))),
      ttl,
    }
  }

  fn lock(&self) -> Option<MutexGuard<'_, LruCache<K, (Instant, V)>>> {
    self
      .inner
      .as_ref()
      .map(|m| m.lock().unwrap_or_else(PoisonError::into_inner))
  }

  /// The live value for `key`, or `None` on a miss or an expired entry.
  pub fn get(&self, key: &K) -> Option<V> {
    let mut cache = self.lock()?;
    let expired = match cache.peek(key) {
      None => return None,
      Some((set_at, _)) => set_at.elapsed() >= self.ttl,
    };
    if expired {
      cache.pop(key);
      return None;
    }
    cache.peek(key).map(|(_, value)| value.clone())
  }

  /// Store `value`; re-setting a key makes it the newest entry.
  pub fn set(&self, key: K, value: V) {
    if let Some(mut cache) = self.lock() {
      cache.push(key, (Instant::now(), value));
    }
  }

  pub fn clear(&self) {
    if let Some(mut cache) = self.lock() {
      cache.clear();
    }
  }

  /// Number of stored entries, expired ones included until they are read.
  pub fn len(&self) -> usize { self.lock().map_or(0, |cache| cache.len()) }

  pub fn is_empty(&self) -> bool { self.len() == 0 }
}

#[cfg(test)]
mod tests {
  use std::{sync::Arc, thread};

  use super::*;

  fn cache(capacity: usize) -> TtlCache<String, u32> {
    TtlCache::new(capacity, Duration::from_secs(60))
  }

  #[test]
  fn get_returns_set_value() {
    let c = cache(4);
    c.set("a".into(), 1);
    assert_eq!(c.get(&"a".into()), Some(1));
    assert_eq!(c.get(&"b".into()), None);
  }

  #[test]
  fn overflow_evicts_oldest_set_not_least_read() {
    let c = cache(2);
    c.set("a".into(), 1);
    c.set("b".into(), 2);
    // Reading `a` must not protect it.
    assert_eq!(c.get(&"a".into()), Some(1));
    c.set("c".into(), 3);
    assert_eq!(c.get(&"a".into()), None);
    assert_eq!(c.get(&"b".into()), Some(2));
    assert_eq!(c.get(&"c".into()), Some(3));
  }

  #[test]
  fn reset_key_counts_as_newest() {
    let c = cache(2);
    c.set("a".into(), 1);
    c.set("b".into(), 2);
    c.set("a".into(), 10);
    c.set("c".into(), 3);
    assert_eq!(c.get(&"a".into()), Some(10));
    assert_eq!(c.get(&"b".into()), None);
  }

  #[test]
  fn entries_expire_after_ttl() {
    let c: TtlCache<&str, u32> = TtlCache::new(4, Duration::from_millis(20));
    c.set("a", 1);
    thread::sleep(Duration::from_millis(40));
    assert_eq!(c.get(&"a"), None);
    assert!(c.is_empty());
  }

  #[test]
  fn zero_capacity_disables_caching() {
    let c = cache(0);
    c.set("a".into(), 1);
    assert_eq!(c.get(&"a".into()), None);
  }

  #[test]
  fn clear_empties_the_cache() {
    let c = cache(4);
    c.set("a".into(), 1);
    c.set("b".into(), 2);
    c.clear();
    assert_eq!(c.len(), 0);
  }

  #[test]
  fn repeated_sets_keep_one_entry() {
    let c = cache(2);
    for i in 0..100 {
      c.set("a".into(), i);
    }
    assert_eq!(c.len(), 1);
    assert_eq!(c.get(&"a".into()), Some(99));
  }

  #[test]
  fn concurrent_access_is_safe() {
    let c = Arc::new(cache(64));
    let handles: Vec<_> = (0..8)
      .map(|t| {
        let c = Arc::clone(&c);
        thread::spawn(move || {
          for i in 0..200 {
            c.set(format!("{t}-{i}"), i);
            let _ = c.get(&format!("{t}-{}", i / 2));
          }
        })
      })
      .collect();
    for h in handles {
      h.join().unwrap();
    }
    assert!(c.len() <= 64);
  }
}
