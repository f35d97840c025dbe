//! The objects userspace holds for a virtual object.
//!
//! An unfaceted instance gets one `Representative`. A multi-facet instance
//! gets a `Cohort`, and every `Facet` keeps its cohort alive, so the
//! identity table sees the instance as resident until the last facet goes.
//! None of these carry state; methods find it through the context cache.

use vatslots_common::rc::{VatRc, VatWeak};

use super::behavior::MethodHandle;
use super::kind::{KindDef, KindId};
use super::value::{ObjectRef, Value};
use super::vref::make_facet_ref;
use crate::error::{VatError, VatResult};
use crate::vat::Vat;

pub(crate) struct RepInner {
    base_ref: String,
    kind: VatRc<KindDef>,
}

#[derive(Clone)]
pub struct Representative(pub(crate) VatRc<RepInner>);

impl Representative {
    pub fn base_ref(&self) -> &str {
        &self.0.base_ref
    }

    pub fn tag(&self) -> &str {
        &self.0.kind.tag
    }

    pub fn kind_id(&self) -> KindId {
        self.0.kind.kind_id
    }

    pub fn method(&self, name: &str) -> VatResult<MethodHandle> {
        MethodHandle::lookup(&self.0.kind, None, name)
    }

    pub fn invoke(&self, vat: &Vat, method: &str, args: Vec<Value>) -> VatResult<Value> {
        self.method(method)?
            .call(vat, &ObjectRef::Representative(self.clone()), args)
    }

    pub(crate) fn downgrade(&self) -> VatWeak<RepInner> {
        VatRc::downgrade(&self.0)
    }
}

pub(crate) struct CohortInner {
    base_ref: String,
    kind: VatRc<KindDef>,
}

#[derive(Clone)]
pub struct Cohort(pub(crate) VatRc<CohortInner>);

impl Cohort {
    pub fn base_ref(&self) -> &str {
        &self.0.base_ref
    }

    pub fn facet_names(&self) -> &[String] {
        self.0.kind.facet_names()
    }

    pub fn facet(&self, name: &str) -> VatResult<Facet> {
        let index = self
            .0
            .kind
            .facet_index(name)
            .ok_or_else(|| VatError::protocol(format!("{} has no facet {name:?}", self.0.kind.tag)))?;
        Ok(Facet {
            cohort: self.clone(),
            index,
        })
    }

    /// Every facet, in the kind's (sorted) facet order.
    pub fn facets(&self) -> Vec<Facet> {
        (0..self.facet_names().len())
            .map(|index| Facet {
                cohort: self.clone(),
                index,
            })
            .collect()
    }

    pub(crate) fn facet_at(&self, index: usize) -> VatResult<Facet> {
        if index >= self.facet_names().len() {
            return Err(VatError::integrity(format!(
                "{} has no facet {index}",
                self.base_ref()
            )));
        }
        Ok(Facet {
            cohort: self.clone(),
            index,
        })
    }

    pub(crate) fn kind(&self) -> &VatRc<KindDef> {
        &self.0.kind
    }

    pub(crate) fn downgrade(&self) -> VatWeak<CohortInner> {
        VatRc::downgrade(&self.0)
    }
}

#[derive(Clone)]
pub struct Facet {
    cohort: Cohort,
    index: usize,
}

impl Facet {
    pub fn vref(&self) -> String {
        make_facet_ref(self.cohort.base_ref(), self.index)
    }

    pub fn name(&self) -> &str {
        &self.cohort.facet_names()[self.index]
    }

    pub fn method(&self, name: &str) -> VatResult<MethodHandle> {
        MethodHandle::lookup(self.cohort.kind(), Some(self.index), name)
    }

    pub fn invoke(&self, vat: &Vat, method: &str, args: Vec<Value>) -> VatResult<Value> {
        self.method(method)?
            .call(vat, &ObjectRef::Facet(self.clone()), args)
    }

    pub(crate) fn index(&self) -> usize {
        self.index
    }

    pub(crate) fn cohort(&self) -> &Cohort {
        &self.cohort
    }
}

/// What a method sees as itself.
#[derive(Clone)]
pub enum This {
    Representative(Representative),
    Facets(Cohort),
}

impl This {
    pub fn base_ref(&self) -> &str {
        match self {
            This::Representative(r) => r.base_ref(),
            This::Facets(c) => c.base_ref(),
        }
    }

    pub fn representative(&self) -> Option<&Representative> {
        match self {
            This::Representative(r) => Some(r),
            This::Facets(_) => None,
        }
    }

    pub fn facet(&self, name: &str) -> VatResult<Facet> {
        match self {
            This::Facets(c) => c.facet(name),
            This::Representative(r) => Err(VatError::protocol(format!("{} has no facets", r.tag()))),
        }
    }

    pub(crate) fn kind(&self) -> &VatRc<KindDef> {
        match self {
            This::Representative(r) => &r.0.kind,
            This::Facets(c) => c.kind(),
        }
    }
}

impl From<This> for ObjectRef {
    fn from(this: This) -> Self {
        match this {
            This::Representative(r) => ObjectRef::Representative(r),
            This::Facets(c) => ObjectRef::Cohort(c),
        }
    }
}

/// A fresh facade for `base_ref`. The caller registers it.
pub(crate) fn build(kind: &VatRc<KindDef>, base_ref: &str) -> This {
    let base_ref = base_ref.to_owned();
    let kind = kind.clone();
    if kind.is_faceted() {
        This::Facets(Cohort(VatRc::new(CohortInner { base_ref, kind })))
    } else {
        This::Representative(Representative(VatRc::new(RepInner { base_ref, kind })))
    }
}

impl ObjectRef {
    pub fn invoke(&self, vat: &Vat, method: &str, args: Vec<Value>) -> VatResult<Value> {
        match self {
            ObjectRef::Representative(r) => r.invoke(vat, method, args),
            ObjectRef::Facet(f) => f.invoke(vat, method, args),
            other => Err(VatError::behavior(format!("{other:?} has no methods"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::testing::{counter_kind, pair_kind, vat_with_log};
    use crate::{ObjectRef, Value, VatError};

    #[test]
    fn facets_are_sorted_and_share_state() {
        let (vat, _store) = vat_with_log();
        let pair = pair_kind(&vat);
        let cohort = pair.make(&vat, vec![]).unwrap();
        assert_eq!(cohort.facet_names(), ["left", "right"]);
        let left = cohort.facet("left").unwrap();
        let right = cohort.facet("right").unwrap();
        left.invoke(&vat, "bump", vec![]).unwrap();
        left.invoke(&vat, "bump", vec![]).unwrap();
        assert_eq!(right.invoke(&vat, "read", vec![]).unwrap(), Value::Int(2));
        assert_eq!(left.vref(), format!("{}:0", cohort.base_ref()));
    }

    #[test]
    fn cross_facet_invocation_is_rejected() {
        let (vat, _store) = vat_with_log();
        let pair = pair_kind(&vat);
        let cohort = pair.make(&vat, vec![]).unwrap();
        let bump = cohort.facet("left").unwrap().method("bump").unwrap();
        let right = ObjectRef::Facet(cohort.facet("right").unwrap());
        let err = bump.call(&vat, &right, vec![]).unwrap_err();
        assert!(matches!(err, VatError::Protocol(msg) if msg.contains("illegal cross-facet access")));

        let counter = counter_kind(&vat);
        let other = counter.make(&vat, vec![]).unwrap();
        let err = bump.call(&vat, &other.into(), vec![]).unwrap_err();
        assert!(matches!(err, VatError::Protocol(_)));
    }

    #[test]
    fn unknown_methods_fail() {
        let (vat, _store) = vat_with_log();
        let counter = counter_kind(&vat);
        let c = counter.make(&vat, vec![]).unwrap();
        let err = c.invoke(&vat, "frobnicate", vec![]).unwrap_err();
        assert!(matches!(err, VatError::NoSuchMethod { .. }));
    }

    #[test]
    fn rebuilt_representatives_compare_equal() {
        let (vat, _store) = vat_with_log();
        let counter = counter_kind(&vat);
        let holder = crate::testing::holder_kind(&vat);
        let (h, base_ref) = vat
            .deliver(|vat| {
                let c = counter.make(vat, vec![])?;
                let h = holder.make(vat, vec![c.clone().into()])?;
                Ok((h, c.base_ref().to_owned()))
            })
            .unwrap();
        let back = h.invoke(&vat, "get", vec![]).unwrap();
        assert_eq!(back.as_object().and_then(ObjectRef::vref_key), Some(base_ref));
    }
}
