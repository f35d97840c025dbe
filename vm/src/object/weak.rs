//! Weak maps and sets that cannot be used to watch memory reclamation.
//!
//! Keys with a vref (virtual objects, facets, kind handles, imports) are
//! stored by vref and stay until the identity is retired, however often
//! their Representative is dropped and rebuilt. Other keys are held weakly,
//! except cohorts, which are held strongly so nobody can watch them go.

use indexmap::{IndexMap, IndexSet};
use vatslots_common::lock::VatMutex;
use vatslots_common::rc::{VatRc, VatWeak};

use super::value::{ObjectRef, RemotableInner, Value};
use crate::vat::Vat;

pub type CollectionId = u64;

enum HeldKey {
    Weak(VatWeak<RemotableInner>),
    Strong(ObjectRef),
}

impl HeldKey {
    fn new(key: &ObjectRef) -> Self {
        match key {
            ObjectRef::Remotable(r) => HeldKey::Weak(r.downgrade()),
            other => HeldKey::Strong(other.clone()),
        }
    }

    fn is(&self, key: &ObjectRef) -> bool {
        match (self, key) {
            (HeldKey::Weak(w), ObjectRef::Remotable(r)) => std::ptr::eq(w.as_ptr(), VatRc::as_ptr(&r.0)),
            (HeldKey::Strong(held), key) => held == key,
            _ => false,
        }
    }

    fn is_live(&self) -> bool {
        match self {
            HeldKey::Weak(w) => w.strong_count() > 0,
            HeldKey::Strong(_) => true,
        }
    }
}

pub(crate) struct WeakTable {
    id: CollectionId,
    by_vref: IndexMap<String, Value>,
    by_object: Vec<(HeldKey, Value)>,
}

impl WeakTable {
    fn purge(&mut self) {
        self.by_object.retain(|(k, _)| k.is_live());
    }

    fn position(&self, key: &ObjectRef) -> Option<usize> {
        self.by_object.iter().position(|(k, _)| k.is(key))
    }

    fn has(&mut self, key: &ObjectRef) -> bool {
        match key.vref_key() {
            Some(vref) => self.by_vref.contains_key(&vref),
            None => {
                self.purge();
                self.position(key).is_some()
            }
        }
    }

    fn get(&mut self, key: &ObjectRef) -> Option<Value> {
        match key.vref_key() {
            Some(vref) => self.by_vref.get(&vref).cloned(),
            None => {
                self.purge();
                self.position(key).map(|i| self.by_object[i].1.clone())
            }
        }
    }

    /// Returns the vref newly recognized, if any.
    fn set(&mut self, key: &ObjectRef, value: Value) -> Option<String> {
        match key.vref_key() {
            Some(vref) => {
                let fresh = !self.by_vref.contains_key(&vref);
                self.by_vref.insert(vref.clone(), value);
                fresh.then_some(vref)
            }
            None => {
                self.purge();
                match self.position(key) {
                    Some(i) => self.by_object[i].1 = value,
                    None => self.by_object.push((HeldKey::new(key), value)),
                }
                None
            }
        }
    }

    /// Returns whether something was removed, and the vref no longer
    /// recognized, if any.
    fn delete(&mut self, key: &ObjectRef) -> (bool, Option<String>) {
        match key.vref_key() {
            Some(vref) => match self.by_vref.shift_remove(&vref) {
                Some(_) => (true, Some(vref)),
                None => (false, None),
            },
            None => {
                self.purge();
                match self.position(key) {
                    Some(i) => {
                        self.by_object.remove(i);
                        (true, None)
                    }
                    None => (false, None),
                }
            }
        }
    }

    /// Drop an entry for a retired identity.
    pub fn forget(&mut self, vref: &str) {
        if self.by_vref.shift_remove(vref).is_some() {
            trace!("collection {} forgot {vref}", self.id);
        }
    }
}

/// Every weak collection made in this vat, so the sweep can notice the ones
/// that were dropped and release what they recognized.
#[derive(Default)]
pub(crate) struct CollectionRegistry {
    next_id: CollectionId,
    tables: IndexMap<CollectionId, VatWeak<VatMutex<WeakTable>>>,
}

impl CollectionRegistry {
    fn create(&mut self) -> (CollectionId, VatRc<VatMutex<WeakTable>>) {
        self.next_id += 1;
        let id = self.next_id;
        let table = VatRc::new(VatMutex::new(WeakTable {
            id,
            by_vref: IndexMap::new(),
            by_object: Vec::new(),
        }));
        self.tables.insert(id, VatRc::downgrade(&table));
        (id, table)
    }

    pub fn live_tables(&self, ids: &IndexSet<CollectionId>) -> Vec<VatRc<VatMutex<WeakTable>>> {
        ids.iter()
            .filter_map(|id| self.tables.get(id).and_then(VatWeak::upgrade))
            .collect()
    }

    /// Ids of collections that no longer exist, removed from the registry.
    pub fn take_dropped(&mut self) -> Vec<CollectionId> {
        let dropped: Vec<_> = self
            .tables
            .iter()
            .filter(|(_, t)| t.strong_count() == 0)
            .map(|(id, _)| *id)
            .collect();
        for id in &dropped {
            self.tables.shift_remove(id);
        }
        dropped
    }
}

#[derive(Clone)]
pub struct VirtualAwareWeakMap {
    id: CollectionId,
    table: VatRc<VatMutex<WeakTable>>,
}

impl VirtualAwareWeakMap {
    pub fn new(vat: &Vat) -> Self {
        let (id, table) = vat.collections.lock().create();
        VirtualAwareWeakMap { id, table }
    }

    pub fn has(&self, key: &ObjectRef) -> bool {
        self.table.lock().has(key)
    }

    pub fn get(&self, key: &ObjectRef) -> Option<Value> {
        self.table.lock().get(key)
    }

    pub fn set(&self, vat: &Vat, key: &ObjectRef, value: Value) {
        let recognized = self.table.lock().set(key, value);
        if let Some(vref) = recognized {
            vat.tracker.lock().add_recognizer(&vref, self.id);
        }
    }

    pub fn delete(&self, vat: &Vat, key: &ObjectRef) -> bool {
        let (removed, released) = self.table.lock().delete(key);
        if let Some(vref) = released {
            vat.tracker.lock().remove_recognizer(&vref, self.id);
        }
        removed
    }

    /// How many identity-keyed entries this collection holds.
    pub fn identity_key_count(&self) -> usize {
        self.table.lock().by_vref.len()
    }
}

#[derive(Clone)]
pub struct VirtualAwareWeakSet {
    map: VirtualAwareWeakMap,
}

impl VirtualAwareWeakSet {
    pub fn new(vat: &Vat) -> Self {
        VirtualAwareWeakSet {
            map: VirtualAwareWeakMap::new(vat),
        }
    }

    pub fn has(&self, key: &ObjectRef) -> bool {
        self.map.has(key)
    }

    pub fn add(&self, vat: &Vat, key: &ObjectRef) {
        self.map.set(vat, key, Value::Null)
    }

    pub fn delete(&self, vat: &Vat, key: &ObjectRef) -> bool {
        self.map.delete(vat, key)
    }

    pub fn identity_key_count(&self) -> usize {
        self.map.identity_key_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::Remotable;
    use crate::testing::{counter_kind, import_payload, pair_kind, vat_with_log};

    #[test]
    fn rebuilt_representatives_find_their_entries() {
        let (vat, _store) = vat_with_log();
        let counter = counter_kind(&vat);
        let map = VirtualAwareWeakMap::new(&vat);
        let (base_ref, keeper) = vat
            .deliver(|vat| {
                let c = counter.make(vat, vec![])?;
                map.set(vat, &c.clone().into(), Value::from("hello"));
                let keeper = crate::testing::holder_kind(vat).make(vat, vec![c.clone().into()])?;
                Ok((c.base_ref().to_owned(), keeper))
            })
            .unwrap();
        // the first Representative is gone; the holder's state still names it
        assert!(!vat.reachability(&base_ref).unwrap().local);
        let again = keeper.invoke(&vat, "get", vec![]).unwrap();
        let again = again.as_object().unwrap();
        assert_eq!(map.get(again), Some(Value::from("hello")));
        assert_eq!(map.identity_key_count(), 1);
    }

    #[test]
    fn cohorts_are_held_strongly() {
        let (vat, _store) = vat_with_log();
        let pair = pair_kind(&vat);
        let set = VirtualAwareWeakSet::new(&vat);
        let base_ref = vat
            .deliver(|vat| {
                let cohort = pair.make(vat, vec![])?;
                set.add(vat, &cohort.clone().into());
                Ok(cohort.base_ref().to_owned())
            })
            .unwrap();
        assert!(vat.reachability(&base_ref).unwrap().local);
        assert!(!vat.is_collected(&base_ref));
        assert_eq!(set.identity_key_count(), 0);
    }

    #[test]
    fn remotable_keys_are_weak() {
        let (vat, _store) = vat_with_log();
        let map = VirtualAwareWeakMap::new(&vat);
        let r = Remotable::new("thing");
        map.set(&vat, &r.clone().into(), Value::Int(1));
        assert_eq!(map.get(&r.clone().into()), Some(Value::Int(1)));
        let other = Remotable::new("thing");
        assert!(!map.has(&other.clone().into()));
        drop(r);
        map.set(&vat, &other.into(), Value::Int(2));
        assert_eq!(map.table.lock().by_object.len(), 1);
    }

    #[test]
    fn deleting_the_last_recognizer_of_an_import_retires_it() {
        let (vat, _store) = vat_with_log();
        let set = VirtualAwareWeakSet::new(&vat);
        let presence = vat.receive(&import_payload("o-5")).unwrap();
        let key = presence.as_object().unwrap().clone();
        set.add(&vat, &key);
        drop((presence, key));
        let report = vat.bring_out_your_dead().unwrap();
        assert_eq!(report.dropped_imports, vec!["o-5".to_owned()]);
        assert!(report.retired_imports.is_empty());

        // the peer sends it again
        let again = vat.receive(&import_payload("o-5")).unwrap();
        assert!(set.delete(&vat, again.as_object().unwrap()));
        drop(again);
        let report = vat.bring_out_your_dead().unwrap();
        assert_eq!(report.retired_imports, vec!["o-5".to_owned()]);
    }

    #[test]
    fn dropped_collections_release_their_keys() {
        let (vat, _store) = vat_with_log();
        let set = VirtualAwareWeakSet::new(&vat);
        let presence = vat.receive(&import_payload("o-6")).unwrap();
        set.add(&vat, presence.as_object().unwrap());
        drop(presence);
        vat.bring_out_your_dead().unwrap();
        drop(set);
        let report = vat.bring_out_your_dead().unwrap();
        assert_eq!(report.retired_imports, vec!["o-6".to_owned()]);
        assert_eq!(
            vat.take_syscalls(),
            vec![
                crate::GcSyscall::DropImports(vec!["o-6".to_owned()]),
                crate::GcSyscall::RetireImports(vec!["o-6".to_owned()]),
            ]
        );
    }
}
