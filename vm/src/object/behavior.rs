use indexmap::IndexMap;
use vatslots_common::rc::VatRc;

use super::cache::ContextEntry;
use super::kind::KindDef;
use super::representative::This;
use super::value::{ObjectRef, Value};
use crate::error::{VatError, VatResult};
use crate::vat::Vat;

pub type Method = VatRc<dyn Fn(&Context<'_>, Vec<Value>) -> VatResult<Value>>;
pub type Finish = VatRc<dyn Fn(&Context<'_>) -> VatResult<()>>;

/// Method table of one kind, or of one facet of a multi-facet kind.
#[derive(Clone, Default)]
pub struct Behavior {
    methods: IndexMap<String, Method>,
}

impl Behavior {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn method<F>(mut self, name: &str, f: F) -> Self
    where
        F: Fn(&Context<'_>, Vec<Value>) -> VatResult<Value> + 'static,
    {
        self.methods.insert(name.to_owned(), VatRc::new(f));
        self
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.methods.keys().map(String::as_str)
    }

    pub(crate) fn get(&self, name: &str) -> Option<&Method> {
        self.methods.get(name)
    }
}

/// Facet name to method table, for `define_kind_multi`.
#[derive(Clone, Default)]
pub struct FacetBehaviors {
    facets: IndexMap<String, Behavior>,
}

impl FacetBehaviors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn facet(mut self, name: &str, behavior: Behavior) -> Self {
        self.facets.insert(name.to_owned(), behavior);
        self
    }

    /// Names and tables, sorted by name.
    pub(crate) fn into_sorted(mut self) -> (Vec<String>, Vec<Behavior>) {
        self.facets.sort_keys();
        self.facets.into_iter().unzip()
    }
}

#[derive(Clone, Default)]
pub struct KindOptions {
    /// runs once, right after an instance is made
    pub finish: Option<Finish>,
    /// the only property names instances may have
    pub state_shape: Option<Vec<String>>,
}

impl KindOptions {
    pub fn finish<F>(mut self, f: F) -> Self
    where
        F: Fn(&Context<'_>) -> VatResult<()> + 'static,
    {
        self.finish = Some(VatRc::new(f));
        self
    }

    pub fn state_shape(mut self, names: &[&str]) -> Self {
        self.state_shape = Some(names.iter().map(|s| s.to_string()).collect());
        self
    }
}

/// Handed to every method call: who am I, and where is my state.
pub struct Context<'a> {
    vat: &'a Vat,
    entry: VatRc<ContextEntry>,
}

impl<'a> Context<'a> {
    pub(crate) fn new(vat: &'a Vat, entry: VatRc<ContextEntry>) -> Self {
        Context { vat, entry }
    }

    pub fn vat(&self) -> &'a Vat {
        self.vat
    }

    pub fn this(&self) -> &This {
        &self.entry.this
    }

    pub fn state(&self) -> State<'_> {
        State {
            vat: self.vat,
            entry: &self.entry,
        }
    }
}

/// Accessors for the declared properties of one instance.
pub struct State<'a> {
    vat: &'a Vat,
    entry: &'a ContextEntry,
}

impl State<'_> {
    pub fn get(&self, prop: &str) -> VatResult<Value> {
        self.vat.read_state_property(self.entry, prop)
    }

    pub fn set(&self, prop: &str, value: impl Into<Value>) -> VatResult<()> {
        self.vat.write_state_property(self.entry, prop, value.into())
    }

    pub fn names(&self) -> &[String] {
        &self.entry.props
    }
}

/// A method detached from its object. Applying it to anything but an
/// instance of the same kind and facet is refused.
#[derive(Clone)]
pub struct MethodHandle {
    kind: VatRc<KindDef>,
    facet: Option<usize>,
    name: String,
    method: Method,
}

impl MethodHandle {
    pub(crate) fn lookup(kind: &VatRc<KindDef>, facet: Option<usize>, name: &str) -> VatResult<Self> {
        let method = kind
            .behavior(facet)
            .and_then(|b| b.get(name))
            .ok_or_else(|| VatError::NoSuchMethod {
                tag: kind.tag.clone(),
                method: name.to_owned(),
            })?;
        Ok(MethodHandle {
            kind: kind.clone(),
            facet,
            name: name.to_owned(),
            method: method.clone(),
        })
    }

    pub fn call(&self, vat: &Vat, this: &ObjectRef, args: Vec<Value>) -> VatResult<Value> {
        let (base_ref, kind_id, facet) = match this {
            ObjectRef::Representative(r) => (r.base_ref().to_owned(), r.kind_id(), None),
            ObjectRef::Facet(f) => (
                f.cohort().base_ref().to_owned(),
                f.cohort().kind().kind_id,
                Some(f.index()),
            ),
            _ => (String::new(), 0, None),
        };
        if base_ref.is_empty() || kind_id != self.kind.kind_id || facet != self.facet {
            return Err(VatError::protocol(format!(
                "illegal cross-facet access: {}.{} applied to {this:?}",
                self.kind.tag, self.name
            )));
        }
        trace!("{}.{} on {base_ref}", self.kind.tag, self.name);
        let ctx = Context::new(vat, vat.context_entry(&base_ref)?);
        (self.method)(&ctx, args)
    }
}
