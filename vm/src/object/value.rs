use std::fmt;

use indexmap::IndexMap;
use vatslots_common::lock::VatMutex;
use vatslots_common::rc::{VatRc, VatWeak};

use super::kind::KindHandle;
use super::representative::{Cohort, Facet, Representative};

/// Initial state of a new instance, property name to value, in declaration
/// order.
pub type StateInit = IndexMap<String, Value>;

/// Anything behavior code can pass around, store in state, or send.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
    List(Vec<Value>),
    Record(IndexMap<String, Value>),
    Object(ObjectRef),
}

impl Value {
    pub fn record<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Value::Record(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

impl From<ObjectRef> for Value {
    fn from(obj: ObjectRef) -> Self {
        Value::Object(obj)
    }
}

macro_rules! object_values {
    ($($ty:ident),*) => {$(
        impl From<$ty> for Value {
            fn from(obj: $ty) -> Self {
                Value::Object(ObjectRef::$ty(obj))
            }
        }

        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Debug::fmt(&ObjectRef::$ty(self.clone()), f)
            }
        }
    )*};
}

object_values!(Representative, Facet, Cohort, KindHandle, Remotable, Presence);

/// A reference to an object, as userspace holds it.
#[derive(Clone)]
pub enum ObjectRef {
    Representative(Representative),
    Facet(Facet),
    /// The record of all facets of one multi-facet instance. Not passable.
    Cohort(Cohort),
    KindHandle(KindHandle),
    Remotable(Remotable),
    Presence(Presence),
}

impl ObjectRef {
    /// The identity string for keys whose liveness follows recognizability
    /// rather than memory: virtual objects, kind handles and imports.
    pub fn vref_key(&self) -> Option<String> {
        match self {
            ObjectRef::Representative(r) => Some(r.base_ref().to_owned()),
            ObjectRef::Facet(f) => Some(f.vref()),
            ObjectRef::KindHandle(h) => Some(h.vref().to_owned()),
            ObjectRef::Presence(p) => Some(p.vref().to_owned()),
            ObjectRef::Cohort(_) | ObjectRef::Remotable(_) => None,
        }
    }
}

impl PartialEq for ObjectRef {
    fn eq(&self, other: &Self) -> bool {
        use ObjectRef::*;
        match (self, other) {
            (Representative(a), Representative(b)) => a.base_ref() == b.base_ref(),
            (Facet(a), Facet(b)) => a.vref() == b.vref(),
            (Cohort(a), Cohort(b)) => a.base_ref() == b.base_ref(),
            (KindHandle(a), KindHandle(b)) => a.kind_id() == b.kind_id(),
            (Remotable(a), Remotable(b)) => VatRc::ptr_eq(&a.0, &b.0),
            (Presence(a), Presence(b)) => a.vref() == b.vref(),
            _ => false,
        }
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectRef::Representative(r) => write!(f, "Representative({} {})", r.tag(), r.base_ref()),
            ObjectRef::Facet(x) => write!(f, "Facet({} {})", x.name(), x.vref()),
            ObjectRef::Cohort(c) => write!(f, "Cohort({})", c.base_ref()),
            ObjectRef::KindHandle(h) => write!(f, "KindHandle({})", h.tag()),
            ObjectRef::Remotable(r) => write!(f, "Remotable({})", r.iface()),
            ObjectRef::Presence(p) => write!(f, "Presence({})", p.vref()),
        }
    }
}

impl From<Representative> for ObjectRef {
    fn from(r: Representative) -> Self {
        ObjectRef::Representative(r)
    }
}

impl From<Facet> for ObjectRef {
    fn from(f: Facet) -> Self {
        ObjectRef::Facet(f)
    }
}

impl From<Cohort> for ObjectRef {
    fn from(c: Cohort) -> Self {
        ObjectRef::Cohort(c)
    }
}

impl From<KindHandle> for ObjectRef {
    fn from(h: KindHandle) -> Self {
        ObjectRef::KindHandle(h)
    }
}

impl From<Remotable> for ObjectRef {
    fn from(r: Remotable) -> Self {
        ObjectRef::Remotable(r)
    }
}

impl From<Presence> for ObjectRef {
    fn from(p: Presence) -> Self {
        ObjectRef::Presence(p)
    }
}

/// An ordinary in-memory object. It only gets a vref (`o+N`) the first time
/// it is serialized.
#[derive(Clone)]
pub struct Remotable(pub(crate) VatRc<RemotableInner>);

pub(crate) struct RemotableInner {
    iface: String,
    vref: VatMutex<Option<String>>,
}

impl Remotable {
    pub fn new(iface: impl Into<String>) -> Self {
        Remotable(VatRc::new(RemotableInner {
            iface: iface.into(),
            vref: VatMutex::new(None),
        }))
    }

    pub fn iface(&self) -> &str {
        &self.0.iface
    }

    pub(crate) fn vref(&self) -> Option<String> {
        self.0.vref.lock().clone()
    }

    pub(crate) fn assign_vref(&self, vref: Option<String>) {
        *self.0.vref.lock() = vref;
    }

    pub(crate) fn downgrade(&self) -> VatWeak<RemotableInner> {
        VatRc::downgrade(&self.0)
    }

    pub(crate) fn upgrade(weak: &VatWeak<RemotableInner>) -> Option<Self> {
        weak.upgrade().map(Remotable)
    }
}

/// Stand-in for an object imported from a peer (`o-N`).
#[derive(Clone)]
pub struct Presence(pub(crate) VatRc<PresenceInner>);

pub(crate) struct PresenceInner {
    vref: String,
}

impl Presence {
    pub(crate) fn new(vref: &str) -> Self {
        Presence(VatRc::new(PresenceInner {
            vref: vref.to_owned(),
        }))
    }

    pub fn vref(&self) -> &str {
        &self.0.vref
    }

    pub(crate) fn downgrade(&self) -> VatWeak<PresenceInner> {
        VatRc::downgrade(&self.0)
    }

    pub(crate) fn upgrade(weak: &VatWeak<PresenceInner>) -> Option<Self> {
        weak.upgrade().map(Presence)
    }
}
