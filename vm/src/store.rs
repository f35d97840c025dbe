//! The backing key-value store, seen synchronously from inside a vat.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Bound;

use vatslots_common::lock::VatMutex;
use vatslots_common::rc::VatRc;

/// String-keyed storage the vat persists into. Durability and transactions
/// are the host's business; from here every call completes immediately.
pub trait VatStore {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
    fn delete(&self, key: &str);
    /// The smallest key strictly greater than `prior`, if any.
    fn get_next_key(&self, prior: &str) -> Option<String>;
}

/// All keys that start with `prefix`, in sorted order.
pub fn keys_with_prefix(store: &dyn VatStore, prefix: &str) -> Vec<String> {
    let mut keys = Vec::new();
    let mut prior = prefix.to_owned();
    while let Some(key) = store.get_next_key(&prior) {
        if !key.starts_with(prefix) {
            break;
        }
        prior.clone_from(&key);
        keys.push(key);
    }
    keys
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    Get { key: String, value: Option<String> },
    Set { key: String, value: String },
    Delete { key: String },
}

impl fmt::Display for StoreOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreOp::Get { key, value: Some(v) } => write!(f, "get {key} => {v}"),
            StoreOp::Get { key, value: None } => write!(f, "get {key} => undefined"),
            StoreOp::Set { key, value } => write!(f, "set {key} {value}"),
            StoreOp::Delete { key } => write!(f, "delete {key}"),
        }
    }
}

#[derive(Default)]
struct MemoryStoreInner {
    map: BTreeMap<String, String>,
    log: Option<Vec<StoreOp>>,
}

/// An in-memory store. Clones share the same contents, which is how a test
/// hands one vat's storage to the next incarnation.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: VatRc<VatMutex<MemoryStoreInner>>,
}

impl fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("MemoryStore")
            .field("keys", &inner.map.len())
            .field("logging", &inner.log.is_some())
            .finish()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_log() -> Self {
        let store = Self::new();
        store.set_logging(true);
        store
    }

    pub fn set_logging(&self, enabled: bool) {
        let mut inner = self.inner.lock();
        match (enabled, inner.log.is_some()) {
            (true, false) => inner.log = Some(Vec::new()),
            (false, true) => inner.log = None,
            _ => {}
        }
    }

    pub fn take_log(&self) -> Vec<StoreOp> {
        self.inner
            .lock()
            .log
            .as_mut()
            .map(std::mem::take)
            .unwrap_or_default()
    }

    pub fn dump(&self) -> Vec<(String, String)> {
        self.inner
            .lock()
            .map
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.lock().map.contains_key(key)
    }

    /// Read without going through the op log.
    pub fn peek(&self, key: &str) -> Option<String> {
        self.inner.lock().map.get(key).cloned()
    }

    fn record(inner: &mut MemoryStoreInner, op: StoreOp) {
        if let Some(log) = inner.log.as_mut() {
            log.push(op);
        }
    }
}

impl VatStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        let mut inner = self.inner.lock();
        let value = inner.map.get(key).cloned();
        trace!("store get {key} => {value:?}");
        Self::record(
            &mut inner,
            StoreOp::Get {
                key: key.to_owned(),
                value: value.clone(),
            },
        );
        value
    }

    fn set(&self, key: &str, value: &str) {
        let mut inner = self.inner.lock();
        trace!("store set {key} {value}");
        inner.map.insert(key.to_owned(), value.to_owned());
        Self::record(
            &mut inner,
            StoreOp::Set {
                key: key.to_owned(),
                value: value.to_owned(),
            },
        );
    }

    fn delete(&self, key: &str) {
        let mut inner = self.inner.lock();
        trace!("store delete {key}");
        inner.map.remove(key);
        Self::record(
            &mut inner,
            StoreOp::Delete {
                key: key.to_owned(),
            },
        );
    }

    fn get_next_key(&self, prior: &str) -> Option<String> {
        let inner = self.inner.lock();
        inner
            .map
            .range::<str, _>((Bound::Excluded(prior), Bound::Unbounded))
            .next()
            .map(|(k, _)| k.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_scan_is_sorted_and_bounded() {
        let store = MemoryStore::new();
        store.set("durableKind.12", "{}");
        store.set("durableKind.11", "{}");
        store.set("ephemeralKind.10", "{}");
        store.set("state.o+v10/1", "{}");
        assert_eq!(
            keys_with_prefix(&store, "durableKind."),
            vec!["durableKind.11".to_owned(), "durableKind.12".to_owned()]
        );
        assert!(keys_with_prefix(&store, "rc.").is_empty());
    }

    #[test]
    fn clones_share_contents_and_log() {
        let store = MemoryStore::with_log();
        let other = store.clone();
        other.set("a", "1");
        assert_eq!(store.get("a").as_deref(), Some("1"));
        store.delete("a");
        let log: Vec<String> = store.take_log().iter().map(ToString::to_string).collect();
        assert_eq!(log, vec!["set a 1", "get a => 1", "delete a"]);
        assert!(!other.contains("a"));
    }
}
