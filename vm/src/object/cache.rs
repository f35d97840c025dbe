//! Per-crank caches in front of the backing store.
//!
//! The data cache holds each touched state record, both as persisted
//! (`CapData` per property) and as deserialized on first read. Dirty
//! records are written back in the order they were first touched, then
//! everything is dropped. The context cache holds what methods see as
//! `this` and is simply forgotten at the end of a crank.

use std::collections::hash_map::Entry;

use ahash::AHashMap;
use indexmap::{IndexMap, IndexSet};
use vatslots_common::rc::VatRc;

use super::kind::KindDef;
use super::representative::This;
use super::value::{ObjectRef, Value};
use crate::error::{VatError, VatResult};
use crate::marshal::{self, CapData};
use crate::store::VatStore;
use crate::vat::Vat;

fn state_key(base_ref: &str) -> String {
    format!("state.{base_ref}")
}

/// One instance's state. Property order is declaration order and survives
/// a round trip through the store.
#[derive(Debug, Default)]
pub(crate) struct StateRecord {
    props: IndexMap<String, CapData>,
    values: AHashMap<String, Value>,
}

impl StateRecord {
    fn from_json(raw: &str) -> VatResult<Self> {
        Ok(StateRecord {
            props: serde_json::from_str(raw)?,
            values: AHashMap::new(),
        })
    }

    fn to_json(&self) -> VatResult<String> {
        Ok(serde_json::to_string(&self.props)?)
    }

    pub fn insert(&mut self, prop: String, capdata: CapData, value: Value) {
        self.values.insert(prop.clone(), value);
        self.props.insert(prop, capdata);
    }

    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.props.keys()
    }

    /// Every reference held, once per property that holds it.
    pub fn slots(&self) -> impl Iterator<Item = &String> {
        self.props.values().flat_map(|c| c.slots.iter())
    }
}

#[derive(Default)]
pub(crate) struct DataCache {
    stash: AHashMap<String, StateRecord>,
    dirty: IndexSet<String>,
}

impl DataCache {
    /// The record for `base_ref`, read from the store on first use this crank.
    pub fn get_mut(&mut self, store: &dyn VatStore, base_ref: &str) -> VatResult<&mut StateRecord> {
        match self.stash.entry(base_ref.to_owned()) {
            Entry::Occupied(e) => {
                trace!("data cache hit {base_ref}");
                Ok(e.into_mut())
            }
            Entry::Vacant(e) => {
                trace!("data cache miss {base_ref}");
                let raw = store.get(&state_key(base_ref)).ok_or_else(|| {
                    VatError::integrity(format!("no persisted state for live object {base_ref}"))
                })?;
                Ok(e.insert(StateRecord::from_json(&raw)?))
            }
        }
    }

    pub fn set(&mut self, base_ref: &str, record: StateRecord) {
        self.stash.insert(base_ref.to_owned(), record);
        self.mark_dirty(base_ref);
    }

    pub fn mark_dirty(&mut self, base_ref: &str) {
        if !self.dirty.contains(base_ref) {
            self.dirty.insert(base_ref.to_owned());
        }
    }

    /// Forget the record and delete it from the store right away.
    pub fn delete(&mut self, store: &dyn VatStore, base_ref: &str) {
        self.stash.remove(base_ref);
        self.dirty.shift_remove(base_ref);
        store.delete(&state_key(base_ref));
    }

    pub fn flush(&mut self, store: &dyn VatStore) -> VatResult<()> {
        for base_ref in self.dirty.drain(..) {
            if let Some(record) = self.stash.get(&base_ref) {
                store.set(&state_key(&base_ref), &record.to_json()?);
            }
        }
        self.stash.clear();
        Ok(())
    }

    /// Drop everything unwritten, for a crank that failed.
    pub fn discard(&mut self) {
        self.stash.clear();
        self.dirty.clear();
    }
}

/// What a method needs besides its arguments.
pub(crate) struct ContextEntry {
    pub base_ref: String,
    pub kind: VatRc<KindDef>,
    /// declared property names
    pub props: Vec<String>,
    pub this: This,
}

impl ContextEntry {
    fn check_declared(&self, prop: &str) -> VatResult<()> {
        if self.props.iter().any(|p| p == prop) {
            Ok(())
        } else {
            Err(VatError::integrity(format!(
                "{} state has no property {prop:?}",
                self.kind.tag
            )))
        }
    }
}

#[derive(Default)]
pub(crate) struct ContextCache {
    entries: AHashMap<String, VatRc<ContextEntry>>,
}

impl ContextCache {
    pub fn get(&self, base_ref: &str) -> Option<VatRc<ContextEntry>> {
        self.entries.get(base_ref).cloned()
    }

    pub fn insert(&mut self, entry: VatRc<ContextEntry>) {
        self.entries.insert(entry.base_ref.clone(), entry);
    }

    pub fn remove(&mut self, base_ref: &str) {
        self.entries.remove(base_ref);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

// state accessors
impl Vat {
    /// The context for `base_ref`, whose facade must already be resident.
    pub(crate) fn context_entry(&self, base_ref: &str) -> VatResult<VatRc<ContextEntry>> {
        let cached = self.context_cache.lock().get(base_ref);
        if let Some(entry) = cached {
            return Ok(entry);
        }

        let this = match self.slots.lock().get(base_ref) {
            Some(ObjectRef::Representative(r)) => This::Representative(r),
            Some(ObjectRef::Cohort(c)) => This::Facets(c),
            _ => {
                return Err(VatError::integrity(format!(
                    "no representative registered for {base_ref}"
                )))
            }
        };
        let kind = this.kind().clone();
        let props: Vec<String> = {
            let mut cache = self.data_cache.lock();
            let record = cache.get_mut(self.store(), base_ref)?;
            match kind.state_shape() {
                Some(shape) => shape.to_vec(),
                None => record.names().cloned().collect(),
            }
        };
        let entry = VatRc::new(ContextEntry {
            base_ref: base_ref.to_owned(),
            kind,
            props,
            this,
        });
        self.context_cache.lock().insert(entry.clone());
        Ok(entry)
    }

    pub(crate) fn read_state_property(&self, entry: &ContextEntry, prop: &str) -> VatResult<Value> {
        entry.check_declared(prop)?;
        let capdata = {
            let mut cache = self.data_cache.lock();
            let record = cache.get_mut(self.store(), &entry.base_ref)?;
            if let Some(value) = record.values.get(prop) {
                return Ok(value.clone());
            }
            match record.props.get(prop) {
                Some(capdata) => capdata.clone(),
                None => return Ok(Value::Null),
            }
        };
        // deserializing may reanimate, which must not run under the cache lock
        let value = marshal::deserialize(&capdata, self)?;
        let mut cache = self.data_cache.lock();
        cache
            .get_mut(self.store(), &entry.base_ref)?
            .values
            .insert(prop.to_owned(), value.clone());
        Ok(value)
    }

    pub(crate) fn write_state_property(
        &self,
        entry: &ContextEntry,
        prop: &str,
        value: Value,
    ) -> VatResult<()> {
        entry.check_declared(prop)?;
        let capdata = marshal::serialize(&value, self)?;
        self.check_payload_size(&capdata)?;
        if entry.kind.durable {
            self.insist_durable(&entry.kind.tag, prop, &capdata)?;
        }
        let before = {
            let mut cache = self.data_cache.lock();
            let record = cache.get_mut(self.store(), &entry.base_ref)?;
            record
                .props
                .get(prop)
                .map(|c| c.slots.clone())
                .unwrap_or_default()
        };
        self.update_reference_counts(&before, &capdata.slots)?;

        let mut cache = self.data_cache.lock();
        cache
            .get_mut(self.store(), &entry.base_ref)?
            .insert(prop.to_owned(), capdata, value);
        cache.mark_dirty(&entry.base_ref);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::testing::{counter_kind, holder_kind, vat_with_log};
    use crate::store::StoreOp;
    use crate::{Value, VatError};

    fn reads_of(ops: &[StoreOp], key: &str) -> usize {
        ops.iter()
            .filter(|op| matches!(op, StoreOp::Get { key: k, .. } if k == key))
            .count()
    }

    #[test]
    fn one_backing_read_per_crank() {
        let (vat, store) = vat_with_log();
        let counter = counter_kind(&vat);
        let c = vat.deliver(|vat| counter.make(vat, vec![])).unwrap();
        store.take_log();

        let key = format!("state.{}", c.base_ref());
        vat.deliver(|vat| {
            for _ in 0..3 {
                c.invoke(vat, "increment", vec![])?;
            }
            let read = c.invoke(vat, "read", vec![])?;
            assert_eq!(read, Value::Int(3));
            Ok(())
        })
        .unwrap();
        let ops = store.take_log();
        assert_eq!(reads_of(&ops, &key), 1);
        let writes: Vec<_> = ops
            .iter()
            .filter(|op| matches!(op, StoreOp::Set { key: k, .. } if *k == key))
            .collect();
        assert_eq!(writes.len(), 1);
        assert_eq!(
            writes[0].to_string(),
            format!(r##"set {key} {{"count":{{"body":"#3","slots":[]}}}}"##)
        );
    }

    #[test]
    fn flush_follows_first_touch_order() {
        let (vat, store) = vat_with_log();
        let counter = counter_kind(&vat);
        let (a, b) = vat
            .deliver(|vat| Ok((counter.make(vat, vec![])?, counter.make(vat, vec![])?)))
            .unwrap();
        store.take_log();
        vat.deliver(|vat| {
            b.invoke(vat, "increment", vec![])?;
            a.invoke(vat, "increment", vec![])?;
            b.invoke(vat, "increment", vec![])?;
            Ok(())
        })
        .unwrap();
        let sets: Vec<String> = store
            .take_log()
            .into_iter()
            .filter_map(|op| match op {
                StoreOp::Set { key, .. } => Some(key),
                _ => None,
            })
            .collect();
        assert_eq!(
            sets,
            vec![format!("state.{}", b.base_ref()), format!("state.{}", a.base_ref())]
        );
    }

    #[test]
    fn written_values_read_back_unchanged() {
        let (vat, _store) = vat_with_log();
        let holder = holder_kind(&vat);
        let h = holder.make(&vat, vec![Value::Null]).unwrap();
        let written = Value::record([
            ("name", Value::from("$weird")),
            ("list", Value::List(vec![Value::Int(1), Value::Bool(true)])),
        ]);
        h.invoke(&vat, "set", vec![written.clone()]).unwrap();
        assert_eq!(h.invoke(&vat, "get", vec![]).unwrap(), written);
        vat.flush_state_cache().unwrap();
        assert_eq!(h.invoke(&vat, "get", vec![]).unwrap(), written);
    }

    #[test]
    fn oversized_writes_are_refused() {
        let (vat, _store) = vat_with_log();
        let holder = holder_kind(&vat);
        let h = holder.make(&vat, vec![Value::Null]).unwrap();
        let big = Value::from("x".repeat(20 * 1024));
        let err = h.invoke(&vat, "set", vec![big]).unwrap_err();
        assert!(matches!(err, VatError::PayloadTooLarge { .. }));
        assert_eq!(h.invoke(&vat, "get", vec![]).unwrap(), Value::Null);
    }

    #[test]
    fn missing_state_is_an_integrity_failure() {
        let (vat, store) = vat_with_log();
        let counter = counter_kind(&vat);
        let c = vat.deliver(|vat| counter.make(vat, vec![])).unwrap();
        crate::store::VatStore::delete(&store, &format!("state.{}", c.base_ref()));
        let err = c.invoke(&vat, "read", vec![]).unwrap_err();
        assert!(matches!(err, VatError::Integrity(_)));
    }
}
