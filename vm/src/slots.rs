//! The vat's identity table: vref to resident object, and back.
//!
//! Virtual objects and imports are held weakly, so dropping the last
//! userspace reference is noticed by the next sweep and never earlier.
//! Remotables are pinned while a peer can reach them or persisted state
//! names them. Kind handles stay for the whole incarnation.

use ahash::AHashMap;
use vatslots_common::rc::VatWeak;

use crate::error::{VatError, VatResult};
use crate::marshal::SlotConverter;
use crate::object::gc::ExportStatus;
use crate::object::representative::{self, CohortInner, RepInner};
use crate::object::value::{PresenceInner, RemotableInner};
use crate::object::vref::{SlotKind, VatSlot};
use crate::object::{Cohort, KindHandle, ObjectRef, Presence, Remotable, Representative};
use crate::vat::Vat;

struct RemotableEntry {
    weak: VatWeak<RemotableInner>,
    pinned: Option<Remotable>,
    /// references from persisted state
    refs: usize,
    export: ExportStatus,
}

impl RemotableEntry {
    fn repin(&mut self) {
        let needed = self.refs > 0 || self.export == ExportStatus::Reachable;
        if !needed {
            self.pinned = None;
        } else if self.pinned.is_none() {
            self.pinned = Remotable::upgrade(&self.weak);
        }
    }
}

enum Entry {
    Representative(VatWeak<RepInner>),
    Cohort(VatWeak<CohortInner>),
    Presence(VatWeak<PresenceInner>),
    KindHandle(KindHandle),
    Remotable(RemotableEntry),
}

impl Entry {
    fn upgrade(&self) -> Option<ObjectRef> {
        match self {
            Entry::Representative(w) => w.upgrade().map(|r| Representative(r).into()),
            Entry::Cohort(w) => w.upgrade().map(|c| Cohort(c).into()),
            Entry::Presence(w) => Presence::upgrade(w).map(Into::into),
            Entry::KindHandle(h) => Some(h.clone().into()),
            Entry::Remotable(e) => Remotable::upgrade(&e.weak).map(Into::into),
        }
    }

    fn is_live(&self) -> bool {
        match self {
            Entry::Representative(w) => w.strong_count() > 0,
            Entry::Cohort(w) => w.strong_count() > 0,
            Entry::Presence(w) => w.strong_count() > 0,
            Entry::KindHandle(_) => true,
            Entry::Remotable(e) => e.weak.strong_count() > 0,
        }
    }
}

/// An identity whose last resident reference went away.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Dropped {
    /// a virtual object or import, which may now be collectable
    Identity(String),
    /// a remotable, with its export status at the time
    Remotable(String, ExportStatus),
}

#[derive(Default)]
pub(crate) struct SlotTable {
    entries: AHashMap<String, Entry>,
    /// remotable refcount changes of this crank, `true` for an increment
    ref_log: Vec<(String, bool)>,
}

impl SlotTable {
    pub fn get(&self, base_ref: &str) -> Option<ObjectRef> {
        self.entries.get(base_ref).and_then(Entry::upgrade)
    }

    pub fn is_live(&self, base_ref: &str) -> bool {
        self.entries.get(base_ref).map_or(false, Entry::is_live)
    }

    pub fn register(&mut self, base_ref: &str, obj: &ObjectRef) {
        let entry = match obj {
            ObjectRef::Representative(r) => Entry::Representative(r.downgrade()),
            ObjectRef::Cohort(c) => Entry::Cohort(c.downgrade()),
            ObjectRef::Facet(f) => Entry::Cohort(f.cohort().downgrade()),
            ObjectRef::Presence(p) => Entry::Presence(p.downgrade()),
            ObjectRef::KindHandle(h) => Entry::KindHandle(h.clone()),
            ObjectRef::Remotable(r) => Entry::Remotable(RemotableEntry {
                weak: r.downgrade(),
                pinned: None,
                refs: 0,
                export: ExportStatus::None,
            }),
        };
        trace!("registered {base_ref}");
        self.entries.insert(base_ref.to_owned(), entry);
    }

    fn remotable_mut(&mut self, vref: &str) -> VatResult<&mut RemotableEntry> {
        match self.entries.get_mut(vref) {
            Some(Entry::Remotable(e)) => Ok(e),
            _ => Err(VatError::integrity(format!("no remotable registered as {vref}"))),
        }
    }

    pub fn add_remotable_ref(&mut self, vref: &str) -> VatResult<()> {
        let entry = self.remotable_mut(vref)?;
        entry.refs += 1;
        entry.repin();
        self.ref_log.push((vref.to_owned(), true));
        Ok(())
    }

    pub fn remove_remotable_ref(&mut self, vref: &str) -> VatResult<()> {
        let entry = self.remotable_mut(vref)?;
        entry.refs = entry
            .refs
            .checked_sub(1)
            .ok_or_else(|| VatError::integrity(format!("refcount underflow for {vref}")))?;
        // stays pinned until the crank commits
        self.ref_log.push((vref.to_owned(), false));
        Ok(())
    }

    pub fn commit_refs(&mut self) {
        for (vref, _) in std::mem::take(&mut self.ref_log) {
            if let Some(Entry::Remotable(entry)) = self.entries.get_mut(&vref) {
                entry.repin();
            }
        }
    }

    /// Put remotable refcounts back where the crank found them.
    pub fn undo_refs(&mut self) {
        while let Some((vref, added)) = self.ref_log.pop() {
            if let Some(Entry::Remotable(entry)) = self.entries.get_mut(&vref) {
                entry.refs = if added {
                    entry.refs.saturating_sub(1)
                } else {
                    entry.refs + 1
                };
                entry.repin();
            }
        }
    }

    pub fn remotable_export_status(&self, vref: &str) -> ExportStatus {
        match self.entries.get(vref) {
            Some(Entry::Remotable(e)) => e.export,
            _ => ExportStatus::None,
        }
    }

    pub fn set_remotable_export_status(
        &mut self,
        vref: &str,
        status: ExportStatus,
    ) -> VatResult<()> {
        let entry = self.remotable_mut(vref)?;
        entry.export = status;
        entry.repin();
        debug!("export status {vref} -> {status:?}");
        Ok(())
    }

    /// Once nothing can name a remotable by its vref, let it go back to being
    /// plain memory. A later export allocates a fresh vref.
    pub fn forget_remotable_if_idle(&mut self, vref: &str) {
        let idle = matches!(
            self.entries.get(vref),
            Some(Entry::Remotable(e)) if e.refs == 0 && e.export == ExportStatus::None
        );
        if idle {
            if let Some(Entry::Remotable(e)) = self.entries.remove(vref) {
                if let Some(r) = Remotable::upgrade(&e.weak) {
                    r.assign_vref(None);
                }
            }
        }
    }

    /// Remove every entry whose object is gone, sorted by vref.
    pub fn take_dropped(&mut self) -> Vec<Dropped> {
        let mut dead: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| !e.is_live())
            .map(|(k, _)| k.clone())
            .collect();
        dead.sort();
        dead.into_iter()
            .filter_map(|vref| {
                let dropped = match self.entries.remove(&vref)? {
                    Entry::Remotable(e) => Dropped::Remotable(vref, e.export),
                    _ => Dropped::Identity(vref),
                };
                trace!("dropped {dropped:?}");
                Some(dropped)
            })
            .collect()
    }
}

impl Vat {
    fn remotable_vref(&self, r: &Remotable) -> VatResult<String> {
        if let Some(vref) = r.vref() {
            return Ok(vref);
        }
        let vref = format!("o+{}", self.allocate_export_id()?);
        r.assign_vref(Some(vref.clone()));
        self.slots
            .lock()
            .register(&vref, &ObjectRef::Remotable(r.clone()));
        debug!("allocated {vref} for {}", r.iface());
        Ok(vref)
    }

    /// Find or rebuild the object for `vref`.
    pub(crate) fn convert_slot_to_val(&self, vref: &str) -> VatResult<ObjectRef> {
        let slot = VatSlot::parse(vref)?;
        let resident = self.slots.lock().get(&slot.base_ref);
        let base = match resident {
            Some(obj) => obj,
            None => self.reanimate(&slot)?,
        };
        match (slot.facet, base) {
            (None, obj) => Ok(obj),
            (Some(index), ObjectRef::Cohort(cohort)) => Ok(cohort.facet_at(index)?.into()),
            (Some(_), other) => Err(VatError::integrity(format!(
                "{vref} names a facet of {other:?}"
            ))),
        }
    }

    fn reanimate(&self, slot: &VatSlot) -> VatResult<ObjectRef> {
        let obj = match slot.kind {
            SlotKind::Export => {
                return Err(VatError::integrity(format!(
                    "no remotable registered as {}",
                    slot.base_ref
                )))
            }
            SlotKind::Import => {
                self.note_reimported(&slot.base_ref);
                Presence::new(&slot.base_ref).into()
            }
            SlotKind::Virtual | SlotKind::Durable => {
                if self.is_kind_handle_kind(slot.id) {
                    let kind_id = slot.instance.unwrap_or_default();
                    self.reanimate_kind_handle(kind_id)?.into()
                } else {
                    if self.is_collected(&slot.base_ref) {
                        return Err(VatError::integrity(format!(
                            "{} was already collected",
                            slot.base_ref
                        )));
                    }
                    let kind = self.kind_def(slot.id).ok_or_else(|| {
                        VatError::integrity(format!("no behavior defined for {}", slot.base_ref))
                    })?;
                    representative::build(&kind, &slot.base_ref).into()
                }
            }
        };
        self.slots.lock().register(&slot.base_ref, &obj);
        debug!("reanimated {}", slot.base_ref);
        Ok(obj)
    }
}

impl SlotConverter for Vat {
    fn val_to_slot(&self, obj: &ObjectRef) -> VatResult<String> {
        match obj {
            ObjectRef::Representative(r) => Ok(r.base_ref().to_owned()),
            ObjectRef::Facet(f) => Ok(f.vref()),
            ObjectRef::KindHandle(h) => Ok(h.vref().to_owned()),
            ObjectRef::Presence(p) => Ok(p.vref().to_owned()),
            ObjectRef::Remotable(r) => self.remotable_vref(r),
            ObjectRef::Cohort(c) => Err(VatError::Marshal(format!(
                "the facet record of {} is not passable, pass one of its facets",
                c.base_ref()
            ))),
        }
    }

    fn slot_to_val(&self, vref: &str) -> VatResult<ObjectRef> {
        self.convert_slot_to_val(vref)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{counter_kind, pair_kind, vat_with_log};

    #[test]
    fn remotable_vrefs_are_allocated_once() {
        let (vat, _store) = vat_with_log();
        let r = Remotable::new("thing");
        let a = vat.val_to_slot(&r.clone().into()).unwrap();
        let b = vat.val_to_slot(&r.clone().into()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a, "o+10");
        assert_eq!(vat.slot_to_val(&a).unwrap(), ObjectRef::Remotable(r));
    }

    #[test]
    fn undone_ref_changes_keep_a_remotable_pinned() {
        let mut table = SlotTable::default();
        let r = Remotable::new("thing");
        table.register("o+10", &ObjectRef::Remotable(r.clone()));
        table.add_remotable_ref("o+10").unwrap();
        table.commit_refs();
        drop(r);

        table.remove_remotable_ref("o+10").unwrap();
        table.undo_refs();
        table.commit_refs();
        assert!(table.is_live("o+10"));

        table.remove_remotable_ref("o+10").unwrap();
        assert!(table.is_live("o+10"));
        table.commit_refs();
        assert!(!table.is_live("o+10"));
    }

    #[test]
    fn cohorts_are_not_passable() {
        let (vat, _store) = vat_with_log();
        let pair = pair_kind(&vat);
        let cohort = pair.make(&vat, vec![]).unwrap();
        let err = vat.val_to_slot(&cohort.clone().into()).unwrap_err();
        assert!(matches!(err, VatError::Marshal(_)));
        let facet = cohort.facet("left").unwrap();
        assert!(vat.val_to_slot(&facet.into()).unwrap().ends_with(":0"));
    }

    #[test]
    fn dropped_representatives_are_reported_sorted() {
        let (vat, _store) = vat_with_log();
        let counter = counter_kind(&vat);
        let a = counter.make(&vat, vec![]).unwrap();
        let b = counter.make(&vat, vec![]).unwrap();
        let keep = counter.make(&vat, vec![]).unwrap();
        let expected = vec![
            Dropped::Identity(a.base_ref().to_owned()),
            Dropped::Identity(b.base_ref().to_owned()),
        ];
        vat.flush_state_cache().unwrap();
        drop((a, b));
        assert_eq!(vat.slots.lock().take_dropped(), expected);
        assert!(vat.slots.lock().is_live(keep.base_ref()));
    }

    #[test]
    fn unknown_kinds_cannot_be_reanimated() {
        let (vat, _store) = vat_with_log();
        let err = vat.slot_to_val("o+v99/1").unwrap_err();
        assert!(matches!(err, VatError::Integrity(_)));
        let err = vat.slot_to_val("o+77").unwrap_err();
        assert!(matches!(err, VatError::Integrity(_)));
    }
}
