//! MAC learning table
//!
//! Bounded map from `(vlan, mac)` to the port the address was last
//! seen on. Learning refreshes existing entries; at capacity the
//! oldest dynamic entry is evicted (insertion order breaks last-seen
//! ties). Static entries never age and are never evicted.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use stella_protocol::Mac;
use tracing::trace;

/// Default capacity
pub const DEFAULT_MAX_SIZE: usize = 1024;

/// Default aging timeout
pub const DEFAULT_AGING_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
struct MacEntry {
    port_id: String,
    last_seen: Instant,
    is_static: bool,
    /// Monotonic insertion counter, the eviction tie-breaker
    order: u64,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<(u16, Mac), MacEntry>,
    next_order: u64,
}

impl Inner {
    /// The dynamic entry with the smallest last-seen (ties broken by
    /// insertion order)
    fn oldest_dynamic(&self) -> Option<(u16, Mac)> {
        self.entries
            .iter()
            .filter(|(_, e)| !e.is_static)
            .min_by_key(|(_, e)| (e.last_seen, e.order))
            .map(|(key, _)| *key)
    }
}

/// The MAC learning table
#[derive(Debug)]
pub struct MacTable {
    inner: RwLock<Inner>,
    max_size: usize,
    aging_timeout: Duration,
}

impl Default for MacTable {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SIZE, DEFAULT_AGING_TIMEOUT)
    }
}

impl MacTable {
    /// Create a table; non-positive sizes and timeouts fall back to
    /// the defaults
    pub fn new(max_size: usize, aging_timeout: Duration) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            max_size: if max_size == 0 {
                DEFAULT_MAX_SIZE
            } else {
                max_size
            },
            aging_timeout: if aging_timeout.is_zero() {
                DEFAULT_AGING_TIMEOUT
            } else {
                aging_timeout
            },
        }
    }

    /// Learn a source MAC on a port
    ///
    /// Returns `false` only when the table is full of static entries.
    pub fn learn(&self, vlan: u16, mac: Mac, port_id: &str) -> bool {
        self.insert(vlan, mac, port_id, false)
    }

    /// Insert a static entry: never aged, never evicted
    pub fn add_static(&self, vlan: u16, mac: Mac, port_id: &str) -> bool {
        self.insert(vlan, mac, port_id, true)
    }

    fn insert(&self, vlan: u16, mac: Mac, port_id: &str, is_static: bool) -> bool {
        let mut inner = self.inner.write().unwrap();

        if let Some(entry) = inner.entries.get_mut(&(vlan, mac)) {
            entry.last_seen = Instant::now();
            entry.port_id = port_id.to_string();
            entry.is_static |= is_static;
            return true;
        }

        if inner.entries.len() >= self.max_size {
            match inner.oldest_dynamic() {
                Some(victim) => {
                    inner.entries.remove(&victim);
                    trace!(vlan = victim.0, mac = %victim.1, "evicted oldest dynamic entry");
                }
                None => return false,
            }
        }

        let order = inner.next_order;
        inner.next_order += 1;
        inner.entries.insert(
            (vlan, mac),
            MacEntry {
                port_id: port_id.to_string(),
                last_seen: Instant::now(),
                is_static,
                order,
            },
        );
        true
    }

    /// Look up the port a MAC was learned on
    pub fn lookup(&self, vlan: u16, mac: Mac) -> Option<String> {
        self.inner
            .read()
            .unwrap()
            .entries
            .get(&(vlan, mac))
            .map(|e| e.port_id.clone())
    }

    /// Remove dynamic entries idle longer than the aging timeout;
    /// returns how many were removed
    pub fn age(&self) -> usize {
        let mut inner = self.inner.write().unwrap();
        let now = Instant::now();
        let timeout = self.aging_timeout;
        let before = inner.entries.len();
        inner
            .entries
            .retain(|_, e| e.is_static || now.duration_since(e.last_seen) <= timeout);
        before - inner.entries.len()
    }

    /// Drop every entry learned on a port (used when a port goes away)
    pub fn forget_port(&self, port_id: &str) {
        self.inner
            .write()
            .unwrap()
            .entries
            .retain(|_, e| e.port_id != port_id);
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.inner.read().unwrap().entries.len()
    }

    /// True when the table has no entries
    pub fn is_empty(&self) -> bool {
        self.inner.read().unwrap().entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mac(n: u8) -> Mac {
        Mac::from_bytes(&[0xaa, 0xaa, 0xaa, 0xaa, 0xaa, n]).unwrap()
    }

    #[test]
    fn test_learn_then_lookup() {
        let table = MacTable::default();
        assert!(table.learn(1, mac(1), "p1"));
        assert_eq!(table.lookup(1, mac(1)), Some("p1".to_string()));
        assert_eq!(table.lookup(2, mac(1)), None, "keying includes the VLAN");
    }

    #[test]
    fn test_learn_is_idempotent_except_last_seen() {
        let table = MacTable::default();
        table.learn(1, mac(1), "p1");
        table.learn(1, mac(1), "p1");
        assert_eq!(table.len(), 1);
        assert_eq!(table.lookup(1, mac(1)), Some("p1".to_string()));
    }

    #[test]
    fn test_relearn_moves_port() {
        let table = MacTable::default();
        table.learn(1, mac(1), "p1");
        table.learn(1, mac(1), "p2");
        assert_eq!(table.lookup(1, mac(1)), Some("p2".to_string()));
    }

    #[test]
    fn test_capacity_never_exceeded_and_oldest_evicted() {
        let table = MacTable::new(3, DEFAULT_AGING_TIMEOUT);

        table.learn(1, mac(1), "p1");
        table.learn(1, mac(2), "p1");
        table.learn(1, mac(3), "p1");
        assert_eq!(table.len(), 3);

        // mac(1) is the oldest dynamic entry
        assert!(table.learn(1, mac(4), "p2"));
        assert_eq!(table.len(), 3);
        assert_eq!(table.lookup(1, mac(1)), None);
        assert_eq!(table.lookup(1, mac(4)), Some("p2".to_string()));
    }

    #[test]
    fn test_refresh_protects_from_eviction() {
        let table = MacTable::new(2, DEFAULT_AGING_TIMEOUT);
        table.learn(1, mac(1), "p1");
        table.learn(1, mac(2), "p1");

        // Refresh mac(1) so mac(2) becomes the oldest
        table.learn(1, mac(1), "p1");
        table.learn(1, mac(3), "p1");
        assert_eq!(table.lookup(1, mac(1)), Some("p1".to_string()));
        assert_eq!(table.lookup(1, mac(2)), None);
    }

    #[test]
    fn test_full_of_statics_rejects_learning() {
        let table = MacTable::new(2, DEFAULT_AGING_TIMEOUT);
        assert!(table.add_static(1, mac(1), "p1"));
        assert!(table.add_static(1, mac(2), "p1"));

        assert!(!table.learn(1, mac(3), "p2"));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_aging_removes_only_stale_dynamics() {
        let table = MacTable::new(16, Duration::from_millis(10));
        table.learn(1, mac(1), "p1");
        table.add_static(1, mac(2), "p1");

        std::thread::sleep(Duration::from_millis(30));
        let removed = table.age();
        assert_eq!(removed, 1);
        assert_eq!(table.lookup(1, mac(1)), None);
        assert_eq!(table.lookup(1, mac(2)), Some("p1".to_string()));
    }

    #[test]
    fn test_age_keeps_fresh_entries() {
        let table = MacTable::new(16, Duration::from_secs(300));
        table.learn(1, mac(1), "p1");
        assert_eq!(table.age(), 0);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_forget_port() {
        let table = MacTable::default();
        table.learn(1, mac(1), "p1");
        table.learn(1, mac(2), "p2");

        table.forget_port("p1");
        assert_eq!(table.lookup(1, mac(1)), None);
        assert_eq!(table.lookup(1, mac(2)), Some("p2".to_string()));
    }
}
