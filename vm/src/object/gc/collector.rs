use std::fmt;

use ahash::{AHashMap, AHashSet};
use indexmap::{IndexMap, IndexSet};
use itertools::Itertools;

use super::header::{ExportStatus, ExportStatuses, Reachability};
use super::utils::{GcSyscall, RetireCause, Retirement, SweepReport};
use crate::error::{VatError, VatResult};
use crate::object::vref::{make_facet_ref, SlotKind, VatSlot};
use crate::object::weak::CollectionId;
use crate::slots::Dropped;
use crate::store::VatStore;
use crate::vat::Vat;

fn rc_key(base_ref: &str) -> String {
    format!("rc.{base_ref}")
}

fn es_key(base_ref: &str) -> String {
    format!("es.{base_ref}")
}

/// Bookkeeping for the GC protocol that lives in memory between sweeps.
/// Refcounts and export statuses are persisted and only read through here.
/// Their writes are held per crank and reach the store with the state cache,
/// so a failed delivery drops them together with its dirty state.
#[derive(Default)]
pub(crate) struct ReachabilityTracker {
    /// `rc.` and `es.` writes of this crank in first-touched order; `None`
    /// deletes the key
    pending: IndexMap<String, Option<String>>,
    /// baseRefs (and imports) that lost a leg since the last sweep
    possibly_dead: AHashSet<String>,
    /// imports that may have lost their last recognizer
    possibly_retired: AHashSet<String>,
    /// baseRefs whose state has been deleted
    collected: AHashSet<String>,
    /// imports we told the kernel we dropped, not yet retired
    dropped_imports: AHashSet<String>,
    recognizers: AHashMap<String, IndexSet<CollectionId>>,
    recognized_by: AHashMap<CollectionId, IndexSet<String>>,
    retirements: Vec<Retirement>,
    syscalls: Vec<GcSyscall>,
}

impl fmt::Debug for ReachabilityTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReachabilityTracker")
            .field("possibly_dead", &self.possibly_dead.len())
            .field("possibly_retired", &self.possibly_retired.len())
            .field("collected", &self.collected.len())
            .field("recognized", &self.recognizers.len())
            .field("pending", &self.pending.len())
            .finish()
    }
}

// persisted legs
impl ReachabilityTracker {
    fn read(&self, store: &dyn VatStore, key: &str) -> Option<String> {
        match self.pending.get(key) {
            Some(value) => value.clone(),
            None => store.get(key),
        }
    }

    fn write(&mut self, key: String, value: Option<String>) {
        self.pending.insert(key, value);
    }

    /// Write this crank's refcounts and export statuses to the store.
    pub fn commit(&mut self, store: &dyn VatStore) {
        for (key, value) in self.pending.drain(..) {
            match value {
                Some(value) => store.set(&key, &value),
                None => store.delete(&key),
            }
        }
    }

    /// Drop this crank's refcount and export status writes unwritten.
    pub fn discard(&mut self) -> usize {
        let count = self.pending.len();
        self.pending.clear();
        count
    }

    pub fn ref_count(&self, store: &dyn VatStore, base_ref: &str) -> VatResult<u64> {
        match self.read(store, &rc_key(base_ref)) {
            None => Ok(0),
            Some(raw) => raw.parse().map_err(|_| {
                VatError::integrity(format!("corrupt refcount {raw:?} for {base_ref}"))
            }),
        }
    }

    pub fn incref(&mut self, store: &dyn VatStore, base_ref: &str) -> VatResult<u64> {
        let count = self.ref_count(store, base_ref)? + 1;
        self.write(rc_key(base_ref), Some(count.to_string()));
        debug!("refcount {base_ref} -> {count}");
        Ok(count)
    }

    pub fn decref(&mut self, store: &dyn VatStore, base_ref: &str) -> VatResult<u64> {
        let count = match self.ref_count(store, base_ref)? {
            0 => {
                return Err(VatError::integrity(format!(
                    "refcount underflow for {base_ref}"
                )))
            }
            n => n - 1,
        };
        if count == 0 {
            self.write(rc_key(base_ref), None);
            self.possibly_dead.insert(base_ref.to_owned());
        } else {
            self.write(rc_key(base_ref), Some(count.to_string()));
        }
        debug!("refcount {base_ref} -> {count}");
        Ok(count)
    }

    pub fn export_statuses(
        &self,
        store: &dyn VatStore,
        base_ref: &str,
        facets: usize,
    ) -> ExportStatuses {
        ExportStatuses::parse(self.read(store, &es_key(base_ref)).as_deref(), facets)
    }

    fn save_export_statuses(
        &mut self,
        base_ref: &str,
        before: &ExportStatuses,
        after: &ExportStatuses,
    ) {
        if before == after {
            return;
        }
        match after.encode() {
            Some(encoded) => self.write(es_key(base_ref), Some(encoded)),
            None if before.any_recognizable() => self.write(es_key(base_ref), None),
            None => {}
        }
    }

    pub fn forget_export_statuses(&mut self, base_ref: &str) {
        self.write(es_key(base_ref), None);
    }

    pub fn set_export_status(
        &mut self,
        store: &dyn VatStore,
        slot: &VatSlot,
        facets: usize,
        status: ExportStatus,
    ) {
        let before = self.export_statuses(store, &slot.base_ref, facets);
        let mut after = before.clone();
        after.set(slot.facet.unwrap_or(0), status);
        self.save_export_statuses(&slot.base_ref, &before, &after);
        debug!("export status {slot} -> {status:?}");
        if status == ExportStatus::Recognizable {
            self.possibly_dead.insert(slot.base_ref.clone());
        }
    }
}

// in-memory state
impl ReachabilityTracker {
    pub fn is_collected(&self, base_ref: &str) -> bool {
        self.collected.contains(base_ref)
    }

    pub fn mark_collected(&mut self, base_ref: &str) -> VatResult<()> {
        if !self.collected.insert(base_ref.to_owned()) {
            return Err(VatError::integrity(format!(
                "{base_ref} collected twice"
            )));
        }
        Ok(())
    }

    pub fn add_possibly_dead(&mut self, vref: &str) {
        self.possibly_dead.insert(vref.to_owned());
    }

    pub fn add_recognizer(&mut self, vref: &str, collection: CollectionId) {
        self.recognizers
            .entry(vref.to_owned())
            .or_default()
            .insert(collection);
        self.recognized_by
            .entry(collection)
            .or_default()
            .insert(vref.to_owned());
    }

    pub fn remove_recognizer(&mut self, vref: &str, collection: CollectionId) {
        if let Some(set) = self.recognized_by.get_mut(&collection) {
            set.shift_remove(vref);
        }
        if let Some(set) = self.recognizers.get_mut(vref) {
            set.shift_remove(&collection);
            if set.is_empty() {
                self.recognizers.remove(vref);
                self.possibly_retired.insert(vref.to_owned());
            }
        }
    }

    /// Forget every key of a collection that no longer exists.
    pub fn forget_collection(&mut self, collection: CollectionId) {
        for vref in self.recognized_by.remove(&collection).unwrap_or_default() {
            self.remove_recognizer(&vref, collection);
        }
    }

    /// Stop tracking who recognizes `vref`, returning the collections that
    /// still hold entries for it.
    pub fn cease_recognition(&mut self, vref: &str) -> IndexSet<CollectionId> {
        let ids = self.recognizers.remove(vref).unwrap_or_default();
        for id in &ids {
            if let Some(set) = self.recognized_by.get_mut(id) {
                set.shift_remove(vref);
            }
        }
        ids
    }

    pub fn is_recognized(&self, vref: &str) -> bool {
        self.recognizers.contains_key(vref)
    }

    /// Work queued since the last call, sorted so the sweep's store traffic
    /// does not depend on hash order.
    fn take_work(&mut self) -> (Vec<String>, Vec<String>) {
        let dead = self.possibly_dead.drain().sorted().collect();
        let retired = self.possibly_retired.drain().sorted().collect();
        (dead, retired)
    }
}

// protocol driven by the vat and its peers
impl Vat {
    pub fn ref_count(&self, base_ref: &str) -> VatResult<u64> {
        self.tracker.lock().ref_count(self.store(), base_ref)
    }

    pub fn is_collected(&self, base_ref: &str) -> bool {
        self.tracker.lock().is_collected(base_ref)
    }

    /// All four legs of a baseRef, as persisted plus what is resident.
    pub fn reachability(&self, base_ref: &str) -> VatResult<Reachability> {
        let slot = VatSlot::parse(base_ref)?;
        let facets = self.facet_count(&slot)?;
        let local = self.slots.lock().is_live(&slot.base_ref);
        let tracker = self.tracker.lock();
        let statuses = tracker.export_statuses(self.store(), &slot.base_ref, facets);
        let reachability = Reachability {
            local,
            exported: statuses.any_reachable(),
            recognizable: statuses.any_recognizable(),
            ref_count: tracker.ref_count(self.store(), &slot.base_ref)?,
        };
        debug_assert!(!reachability.exported || reachability.recognizable);
        Ok(reachability)
    }

    pub fn take_retirements(&self) -> Vec<Retirement> {
        std::mem::take(&mut self.tracker.lock().retirements)
    }

    pub fn take_syscalls(&self) -> Vec<GcSyscall> {
        std::mem::take(&mut self.tracker.lock().syscalls)
    }

    /// Another piece of persisted state now names `vref`.
    pub(crate) fn add_reachable_vref(&self, vref: &str) -> VatResult<()> {
        let slot = VatSlot::parse(vref)?;
        match slot.kind {
            SlotKind::Export => self.slots.lock().add_remotable_ref(vref),
            _ => {
                let mut tracker = self.tracker.lock();
                if tracker.is_collected(&slot.base_ref) {
                    return Err(VatError::integrity(format!(
                        "reference to collected {vref}"
                    )));
                }
                tracker.incref(self.store(), &slot.base_ref).map(drop)
            }
        }
    }

    pub(crate) fn remove_reachable_vref(&self, vref: &str) -> VatResult<()> {
        let slot = VatSlot::parse(vref)?;
        match slot.kind {
            SlotKind::Export => self.slots.lock().remove_remotable_ref(vref),
            _ => self
                .tracker
                .lock()
                .decref(self.store(), &slot.base_ref)
                .map(drop),
        }
    }

    /// Apply the difference between two reference lists of one property.
    pub(crate) fn update_reference_counts(
        &self,
        before: &[String],
        after: &[String],
    ) -> VatResult<()> {
        let before: IndexSet<&String> = before.iter().collect();
        let after: IndexSet<&String> = after.iter().collect();
        for vref in after.difference(&before).sorted() {
            self.add_reachable_vref(vref)?;
        }
        for vref in before.difference(&after).sorted() {
            self.remove_reachable_vref(vref)?;
        }
        Ok(())
    }

    /// `vref` is leaving the vat in a message: the peer can now reach it.
    pub(crate) fn mark_exported(&self, vref: &str) -> VatResult<()> {
        let slot = VatSlot::parse(vref)?;
        match slot.kind {
            SlotKind::Import => Ok(()),
            SlotKind::Export => self
                .slots
                .lock()
                .set_remotable_export_status(vref, ExportStatus::Reachable),
            SlotKind::Virtual | SlotKind::Durable => {
                let facets = self.facet_count(&slot)?;
                self.tracker.lock().set_export_status(
                    self.store(),
                    &slot,
                    facets,
                    ExportStatus::Reachable,
                );
                Ok(())
            }
        }
    }

    /// The peer dropped its references; it may still recognize them.
    pub fn dispatch_drop_exports<S: AsRef<str>>(&self, vrefs: &[S]) -> VatResult<()> {
        for vref in vrefs {
            let vref = vref.as_ref();
            let slot = VatSlot::parse(vref)?;
            match slot.kind {
                SlotKind::Import => {
                    return Err(VatError::protocol(format!("dropExports of import {vref}")))
                }
                SlotKind::Export => {
                    let mut slots = self.slots.lock();
                    if slots.remotable_export_status(vref) != ExportStatus::Reachable {
                        return Err(VatError::protocol(format!(
                            "dropExports of unreachable {vref}"
                        )));
                    }
                    slots.set_remotable_export_status(vref, ExportStatus::Recognizable)?;
                }
                SlotKind::Virtual | SlotKind::Durable => {
                    let facets = self.facet_count(&slot)?;
                    let mut tracker = self.tracker.lock();
                    if tracker.is_collected(&slot.base_ref) {
                        return Err(VatError::integrity(format!(
                            "dropExports of collected {vref}"
                        )));
                    }
                    let status = tracker
                        .export_statuses(self.store(), &slot.base_ref, facets)
                        .get(slot.facet.unwrap_or(0));
                    if status != ExportStatus::Reachable {
                        return Err(VatError::protocol(format!(
                            "dropExports of unreachable {vref}"
                        )));
                    }
                    tracker.set_export_status(
                        self.store(),
                        &slot,
                        facets,
                        ExportStatus::Recognizable,
                    );
                }
            }
        }
        Ok(())
    }

    /// The peer promises never to name these exports again.
    pub fn dispatch_retire_exports<S: AsRef<str>>(&self, vrefs: &[S]) -> VatResult<()> {
        for vref in vrefs {
            let vref = vref.as_ref();
            let slot = VatSlot::parse(vref)?;
            let status = match slot.kind {
                SlotKind::Import => {
                    return Err(VatError::protocol(format!("retireExports of import {vref}")))
                }
                SlotKind::Export => self.slots.lock().remotable_export_status(vref),
                SlotKind::Virtual | SlotKind::Durable => {
                    let facets = self.facet_count(&slot)?;
                    self.tracker
                        .lock()
                        .export_statuses(self.store(), &slot.base_ref, facets)
                        .get(slot.facet.unwrap_or(0))
                }
            };
            match status {
                ExportStatus::Reachable => {
                    return Err(VatError::protocol(format!(
                        "retireExports of {vref} which is still reachable"
                    )))
                }
                ExportStatus::None => {
                    warn!("retireExports of {vref} which is already retired");
                    continue;
                }
                ExportStatus::Recognizable => {}
            }
            if slot.kind == SlotKind::Export {
                let mut slots = self.slots.lock();
                slots.set_remotable_export_status(vref, ExportStatus::None)?;
                slots.forget_remotable_if_idle(vref);
            } else {
                let facets = self.facet_count(&slot)?;
                self.tracker.lock().set_export_status(
                    self.store(),
                    &slot,
                    facets,
                    ExportStatus::None,
                );
            }
            self.retire(vref, RetireCause::Peer);
        }
        Ok(())
    }

    /// The peer retired objects we imported from it.
    pub fn dispatch_retire_imports<S: AsRef<str>>(&self, vrefs: &[S]) -> VatResult<()> {
        for vref in vrefs {
            let vref = vref.as_ref();
            if !VatSlot::parse(vref)?.is_import() {
                return Err(VatError::protocol(format!("retireImports of non-import {vref}")));
            }
            self.tracker.lock().dropped_imports.remove(vref);
            self.retire(vref, RetireCause::Peer);
        }
        Ok(())
    }

    /// `vref` can never be named again: scrub it from weak collections and
    /// record the notification.
    fn retire(&self, vref: &str, cause: RetireCause) {
        self.forget_identity(vref);
        debug!("retired {vref} ({cause:?})");
        self.tracker.lock().retirements.push(Retirement {
            vref: vref.to_owned(),
            cause,
        });
    }

    /// Drop every weak collection entry keyed by `vref`.
    fn forget_identity(&self, vref: &str) {
        let ids = self.tracker.lock().cease_recognition(vref);
        let tables = self.collections.lock().live_tables(&ids);
        for table in tables {
            table.lock().forget(vref);
        }
    }

    /// The end-of-delivery sweep. Repeats until a pass finds nothing new,
    /// since each collection may release more references.
    pub fn bring_out_your_dead(&self) -> VatResult<SweepReport> {
        let mut report = SweepReport::default();
        loop {
            let dropped = self.slots.lock().take_dropped();
            for entry in dropped {
                match entry {
                    Dropped::Identity(vref) => self.tracker.lock().add_possibly_dead(&vref),
                    Dropped::Remotable(vref, ExportStatus::Recognizable) => {
                        self.retire(&vref, RetireCause::Collected);
                        report.retired_exports.push(vref);
                    }
                    Dropped::Remotable(..) => {}
                }
            }
            let dropped = self.collections.lock().take_dropped();
            for collection in dropped {
                self.tracker.lock().forget_collection(collection);
            }

            let (dead, retired) = self.tracker.lock().take_work();
            if dead.is_empty() && retired.is_empty() {
                break;
            }
            for vref in &dead {
                self.possible_death(vref, &mut report)?;
            }
            for vref in &retired {
                self.possible_retirement(vref, &mut report)?;
            }
        }

        let syscalls = report.syscalls();
        if !report.is_empty() {
            let (collected, retired) = <(usize, usize)>::from(&report);
            info!(
                "sweep collected {collected} objects, retired {retired} exports, \
                 dropped {} imports, retired {} imports",
                report.dropped_imports.len(),
                report.retired_imports.len()
            );
        }
        self.tracker.lock().syscalls.extend(syscalls);
        Ok(report)
    }

    fn possible_death(&self, vref: &str, report: &mut SweepReport) -> VatResult<()> {
        let slot = VatSlot::parse(vref)?;
        if self.slots.lock().is_live(&slot.base_ref) {
            return Ok(());
        }
        match slot.kind {
            SlotKind::Export => Ok(()),
            SlotKind::Import => {
                let mut tracker = self.tracker.lock();
                if tracker.ref_count(self.store(), vref)? > 0 {
                    return Ok(());
                }
                if tracker.dropped_imports.insert(vref.to_owned()) {
                    report.dropped_imports.push(vref.to_owned());
                    tracker.possibly_retired.insert(vref.to_owned());
                }
                Ok(())
            }
            SlotKind::Virtual | SlotKind::Durable => {
                let base_ref = &slot.base_ref;
                let (facets, faceted) = self.kind_shape(slot.id)?;
                let statuses = {
                    let tracker = self.tracker.lock();
                    if tracker.is_collected(base_ref) {
                        return Ok(());
                    }
                    if tracker.ref_count(self.store(), base_ref)? > 0 {
                        return Ok(());
                    }
                    tracker.export_statuses(self.store(), base_ref, facets)
                };
                if statuses.any_reachable() {
                    return Ok(());
                }

                self.delete_stored_vo(base_ref)?;
                report.collected.push(base_ref.clone());

                // weak entries go whether or not a peer ever saw the object
                for (facet, status) in statuses.iter() {
                    let vref = if faceted {
                        make_facet_ref(base_ref, facet)
                    } else {
                        base_ref.clone()
                    };
                    if status == ExportStatus::Recognizable {
                        self.retire(&vref, RetireCause::Collected);
                        report.retired_exports.push(vref);
                    } else {
                        self.forget_identity(&vref);
                    }
                }
                if statuses.any_recognizable() {
                    self.tracker.lock().forget_export_statuses(base_ref);
                }
                Ok(())
            }
        }
    }

    fn possible_retirement(&self, vref: &str, report: &mut SweepReport) -> VatResult<()> {
        if !VatSlot::parse(vref)?.is_import() || self.slots.lock().is_live(vref) {
            return Ok(());
        }
        let mut tracker = self.tracker.lock();
        if !tracker.dropped_imports.contains(vref)
            || tracker.is_recognized(vref)
            || tracker.ref_count(self.store(), vref)? > 0
        {
            return Ok(());
        }
        tracker.dropped_imports.remove(vref);
        report.retired_imports.push(vref.to_owned());
        Ok(())
    }

    /// An import came back into memory.
    pub(crate) fn note_reimported(&self, vref: &str) {
        self.tracker.lock().dropped_imports.remove(vref);
    }
}

#[cfg(test)]
mod tests {
    use crate::testing::{counter_kind, pair_kind, vat_with_log};
    use crate::{ErrorClass, Value, VirtualAwareWeakMap};

    #[test]
    fn collection_clears_weak_entries_of_unexported_objects() {
        let (vat, _store) = vat_with_log();
        let counter = counter_kind(&vat);
        let pair = pair_kind(&vat);
        let map = VirtualAwareWeakMap::new(&vat);
        let (c, cohort) = vat
            .deliver(|vat| {
                let c = counter.make(vat, vec![])?;
                let cohort = pair.make(vat, vec![])?;
                map.set(vat, &c.clone().into(), Value::from("v"));
                map.set(vat, &cohort.facet("right")?.into(), Value::from("r"));
                Ok((c, cohort))
            })
            .unwrap();
        let base_ref = c.base_ref().to_owned();
        let right = cohort.facet("right").unwrap().vref();
        assert_eq!(map.identity_key_count(), 2);

        drop((c, cohort));
        vat.deliver(|_| Ok(())).unwrap();
        assert!(vat.is_collected(&base_ref));
        assert_eq!(map.identity_key_count(), 0);
        let tracker = vat.tracker.lock();
        assert!(!tracker.is_recognized(&base_ref));
        assert!(!tracker.is_recognized(&right));
        drop(tracker);
        assert!(vat.take_retirements().is_empty());
        assert!(vat.take_syscalls().is_empty());
    }

    #[test]
    fn facet_suffixes_must_name_a_real_facet() {
        let (vat, _store) = vat_with_log();
        let counter = counter_kind(&vat);
        let pair = pair_kind(&vat);
        let c = counter.make(&vat, vec![]).unwrap();
        vat.send_out(&c.clone().into()).unwrap();
        let cohort = pair.make(&vat, vec![]).unwrap();
        vat.send_out(&cohort.facet("left").unwrap().into()).unwrap();

        let bad = [
            format!("{}:{}", c.base_ref(), usize::MAX),
            format!("{}:0", c.base_ref()),
            format!("{}:2", cohort.base_ref()),
            format!("{}:{}", cohort.base_ref(), usize::MAX),
        ];
        for vref in &bad {
            let err = vat.dispatch_drop_exports(&[vref]).unwrap_err();
            assert_eq!(err.class(), ErrorClass::Protocol, "{vref}");
            let err = vat.dispatch_retire_exports(&[vref]).unwrap_err();
            assert_eq!(err.class(), ErrorClass::Protocol, "{vref}");
        }
        assert!(vat.reachability(c.base_ref()).unwrap().exported);
        assert!(vat.reachability(cohort.base_ref()).unwrap().exported);
    }
}
