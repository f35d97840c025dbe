//! Kinds: definition, descriptors, and making instances.

use std::fmt;

use ahash::{AHashMap, AHashSet};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use vatslots_common::rc::VatRc;

use super::behavior::{Behavior, Context, FacetBehaviors, Finish, KindOptions};
use super::cache::StateRecord;
use super::representative::{self, Cohort, Representative, This};
use super::value::{StateInit, Value};
pub use super::vref::KindId;
use super::vref::{make_base_ref, VatSlot};
use crate::error::{VatError, VatResult};
use crate::marshal::{self, CapData};
use crate::store::{keys_with_prefix, VatStore};
use crate::vat::Vat;

const KIND_IDID_KEY: &str = "kindIDID";
const DURABLE_KIND_PREFIX: &str = "durableKind.";

fn durable_kind_key(kind_id: KindId) -> String {
    format!("{DURABLE_KIND_PREFIX}{kind_id}")
}

pub type Init = Box<dyn Fn(Vec<Value>) -> VatResult<StateInit>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Facets {
    Unfaceted,
    Faceted(Vec<String>),
}

impl fmt::Display for Facets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Facets::Unfaceted => f.write_str("unfaceted"),
            Facets::Faceted(names) => write!(f, "with facets [{}]", names.iter().join(",")),
        }
    }
}

pub(crate) struct KindDef {
    pub kind_id: KindId,
    pub tag: String,
    pub durable: bool,
    facets: Facets,
    behaviors: Vec<Behavior>,
    init: Init,
    finish: Option<Finish>,
    state_shape: Option<Vec<String>>,
}

impl KindDef {
    pub fn is_faceted(&self) -> bool {
        matches!(self.facets, Facets::Faceted(_))
    }

    pub fn facet_names(&self) -> &[String] {
        match &self.facets {
            Facets::Faceted(names) => names,
            Facets::Unfaceted => &[],
        }
    }

    pub fn facet_index(&self, name: &str) -> Option<usize> {
        self.facet_names().iter().position(|n| n == name)
    }

    pub fn facet_count(&self) -> usize {
        self.facet_names().len().max(1)
    }

    pub fn behavior(&self, facet: Option<usize>) -> Option<&Behavior> {
        match (&self.facets, facet) {
            (Facets::Unfaceted, None) => self.behaviors.first(),
            (Facets::Faceted(_), Some(index)) => self.behaviors.get(index),
            _ => None,
        }
    }

    pub fn state_shape(&self) -> Option<&[String]> {
        self.state_shape.as_deref()
    }
}

/// Persisted as `durableKind.<kindID>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct DurableKindDescriptor {
    #[serde(rename = "kindID")]
    pub kind_id: KindId,
    pub tag: String,
    #[serde(rename = "nextInstanceID")]
    pub next_instance_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unfaceted: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub facets: Option<Vec<String>>,
}

impl DurableKindDescriptor {
    fn recorded_facets(&self) -> Option<Facets> {
        match (&self.facets, self.unfaceted) {
            (Some(names), _) => Some(Facets::Faceted(names.clone())),
            (None, Some(true)) => Some(Facets::Unfaceted),
            _ => None,
        }
    }

    /// The first definition fixes the shape; later ones must agree with it.
    /// Returns whether the descriptor changed.
    fn check_and_update_facets(&mut self, facets: &Facets) -> VatResult<bool> {
        match self.recorded_facets() {
            None => {
                match facets {
                    Facets::Unfaceted => self.unfaceted = Some(true),
                    Facets::Faceted(names) => self.facets = Some(names.clone()),
                }
                Ok(true)
            }
            Some(recorded) if recorded == *facets => Ok(false),
            Some(recorded) => Err(VatError::protocol(format!(
                "durable kind {} was first defined {recorded}, now {facets}",
                self.tag
            ))),
        }
    }
}

/// Debug record of an ephemeral kind, `ephemeralKind.<kindID>`.
#[derive(Serialize)]
struct EphemeralKindDescriptor<'a> {
    #[serde(rename = "kindID")]
    kind_id: KindId,
    tag: &'a str,
}

#[derive(Default)]
pub(crate) struct KindRegistry {
    /// kind ID of kind handles themselves
    kind_idid: Option<KindId>,
    defs: AHashMap<KindId, VatRc<KindDef>>,
    descriptors: AHashMap<KindId, DurableKindDescriptor>,
    next_instance_ids: AHashMap<KindId, u64>,
    /// durable kinds given behavior in this incarnation
    defined_durable: AHashSet<KindId>,
}

impl KindRegistry {
    fn descriptor(
        &mut self,
        store: &dyn VatStore,
        kind_id: KindId,
    ) -> VatResult<Option<&mut DurableKindDescriptor>> {
        if !self.descriptors.contains_key(&kind_id) {
            let Some(raw) = store.get(&durable_kind_key(kind_id)) else {
                return Ok(None);
            };
            let descriptor = serde_json::from_str(&raw)?;
            self.descriptors.insert(kind_id, descriptor);
        }
        Ok(self.descriptors.get_mut(&kind_id))
    }

    fn save_descriptor(
        store: &dyn VatStore,
        descriptor: &DurableKindDescriptor,
    ) -> VatResult<()> {
        store.set(
            &durable_kind_key(descriptor.kind_id),
            &serde_json::to_string(descriptor)?,
        );
        Ok(())
    }
}

/// Durable token for a kind, made once and redeemed with
/// `define_durable_kind` in every incarnation.
#[derive(Clone)]
pub struct KindHandle(VatRc<KindHandleInner>);

struct KindHandleInner {
    kind_id: KindId,
    tag: String,
    vref: String,
}

impl KindHandle {
    fn new(kind_idid: KindId, kind_id: KindId, tag: &str) -> Self {
        KindHandle(VatRc::new(KindHandleInner {
            kind_id,
            tag: tag.to_owned(),
            vref: make_base_ref(kind_idid, kind_id, true),
        }))
    }

    pub fn kind_id(&self) -> KindId {
        self.0.kind_id
    }

    pub fn tag(&self) -> &str {
        &self.0.tag
    }

    pub fn vref(&self) -> &str {
        &self.0.vref
    }
}

/// Makes instances of an unfaceted kind.
#[derive(Clone)]
pub struct Maker {
    def: VatRc<KindDef>,
}

impl Maker {
    pub fn tag(&self) -> &str {
        &self.def.tag
    }

    pub fn make(&self, vat: &Vat, args: Vec<Value>) -> VatResult<Representative> {
        match vat.make_instance(&self.def, args)? {
            This::Representative(r) => Ok(r),
            This::Facets(c) => Err(VatError::integrity(format!(
                "unfaceted kind {} made a cohort {}",
                self.def.tag,
                c.base_ref()
            ))),
        }
    }
}

/// Makes instances of a multi-facet kind.
#[derive(Clone)]
pub struct MultiMaker {
    def: VatRc<KindDef>,
}

impl MultiMaker {
    pub fn tag(&self) -> &str {
        &self.def.tag
    }

    pub fn make(&self, vat: &Vat, args: Vec<Value>) -> VatResult<Cohort> {
        match vat.make_instance(&self.def, args)? {
            This::Facets(c) => Ok(c),
            This::Representative(r) => Err(VatError::integrity(format!(
                "multi-facet kind {} made a representative {}",
                self.def.tag,
                r.base_ref()
            ))),
        }
    }
}

struct KindSpec {
    facets: Facets,
    behaviors: Vec<Behavior>,
}

impl KindSpec {
    fn single(behavior: Behavior) -> Self {
        KindSpec {
            facets: Facets::Unfaceted,
            behaviors: vec![behavior],
        }
    }

    fn multi(tag: &str, facets: FacetBehaviors) -> VatResult<Self> {
        let (names, behaviors) = facets.into_sorted();
        if names.is_empty() {
            return Err(VatError::protocol(format!("kind {tag} has no facets")));
        }
        Ok(KindSpec {
            facets: Facets::Faceted(names),
            behaviors,
        })
    }
}

// definition
impl Vat {
    /// Allocate (first incarnation) or load the kind ID used by kind handles.
    pub fn initialize_kind_handle_kind(&self) -> VatResult<()> {
        if self.kinds.lock().kind_idid.is_some() {
            return Ok(());
        }
        let kind_idid = match self.store().get(KIND_IDID_KEY) {
            Some(raw) => raw
                .parse()
                .map_err(|_| VatError::integrity(format!("corrupt {KIND_IDID_KEY} {raw:?}")))?,
            None => {
                let id = self.allocate_export_id()?;
                self.store().set(KIND_IDID_KEY, &id.to_string());
                id
            }
        };
        self.kinds.lock().kind_idid = Some(kind_idid);
        Ok(())
    }

    pub fn make_kind_handle(&self, tag: &str) -> VatResult<KindHandle> {
        let kind_idid = self.kinds.lock().kind_idid.ok_or_else(|| {
            VatError::protocol("makeKindHandle called before initializeKindHandleKind")
        })?;
        let kind_id = self.allocate_export_id()?;
        let descriptor = DurableKindDescriptor {
            kind_id,
            tag: tag.to_owned(),
            next_instance_id: 1,
            unfaceted: None,
            facets: None,
        };
        KindRegistry::save_descriptor(self.store(), &descriptor)?;
        self.kinds.lock().descriptors.insert(kind_id, descriptor);

        let handle = KindHandle::new(kind_idid, kind_id, tag);
        self.slots
            .lock()
            .register(handle.vref(), &handle.clone().into());
        debug!("made kind handle {tag} as {}", handle.vref());
        Ok(handle)
    }

    pub fn define_kind<I>(
        &self,
        tag: &str,
        init: I,
        behavior: Behavior,
        options: KindOptions,
    ) -> VatResult<Maker>
    where
        I: Fn(Vec<Value>) -> VatResult<StateInit> + 'static,
    {
        let kind_id = self.allocate_export_id()?;
        let def = self.define_kind_internal(
            kind_id,
            tag,
            false,
            Box::new(init),
            KindSpec::single(behavior),
            options,
        )?;
        Ok(Maker { def })
    }

    pub fn define_kind_multi<I>(
        &self,
        tag: &str,
        init: I,
        facets: FacetBehaviors,
        options: KindOptions,
    ) -> VatResult<MultiMaker>
    where
        I: Fn(Vec<Value>) -> VatResult<StateInit> + 'static,
    {
        let spec = KindSpec::multi(tag, facets)?;
        let kind_id = self.allocate_export_id()?;
        let def = self.define_kind_internal(kind_id, tag, false, Box::new(init), spec, options)?;
        Ok(MultiMaker { def })
    }

    pub fn define_durable_kind<I>(
        &self,
        handle: &KindHandle,
        init: I,
        behavior: Behavior,
        options: KindOptions,
    ) -> VatResult<Maker>
    where
        I: Fn(Vec<Value>) -> VatResult<StateInit> + 'static,
    {
        let def = self.define_kind_internal(
            handle.kind_id(),
            handle.tag(),
            true,
            Box::new(init),
            KindSpec::single(behavior),
            options,
        )?;
        Ok(Maker { def })
    }

    pub fn define_durable_kind_multi<I>(
        &self,
        handle: &KindHandle,
        init: I,
        facets: FacetBehaviors,
        options: KindOptions,
    ) -> VatResult<MultiMaker>
    where
        I: Fn(Vec<Value>) -> VatResult<StateInit> + 'static,
    {
        let spec = KindSpec::multi(handle.tag(), facets)?;
        let def = self.define_kind_internal(
            handle.kind_id(),
            handle.tag(),
            true,
            Box::new(init),
            spec,
            options,
        )?;
        Ok(MultiMaker { def })
    }

    fn define_kind_internal(
        &self,
        kind_id: KindId,
        tag: &str,
        durable: bool,
        init: Init,
        spec: KindSpec,
        options: KindOptions,
    ) -> VatResult<VatRc<KindDef>> {
        let mut kinds = self.kinds.lock();
        if durable {
            if kinds.defined_durable.contains(&kind_id) {
                return Err(VatError::protocol(format!(
                    "redefinition of durable kind {tag}"
                )));
            }
            let descriptor = kinds
                .descriptor(self.store(), kind_id)?
                .ok_or_else(|| VatError::integrity(format!("no descriptor for durable kind {tag}")))?;
            if descriptor.check_and_update_facets(&spec.facets)? {
                KindRegistry::save_descriptor(self.store(), descriptor)?;
            }
            kinds.defined_durable.insert(kind_id);
        } else {
            let descriptor = serde_json::to_string(&EphemeralKindDescriptor { kind_id, tag })?;
            self.store()
                .set(&format!("ephemeralKind.{kind_id}"), &descriptor);
            kinds.next_instance_ids.insert(kind_id, 1);
        }

        let def = VatRc::new(KindDef {
            kind_id,
            tag: tag.to_owned(),
            durable,
            facets: spec.facets,
            behaviors: spec.behaviors,
            init,
            finish: options.finish,
            state_shape: options.state_shape,
        });
        kinds.defs.insert(kind_id, def.clone());
        debug!(
            "defined {} kind {tag} as {kind_id}, {}",
            if durable { "durable" } else { "ephemeral" },
            def.facets
        );
        Ok(def)
    }

    /// Every durable kind persisted by an earlier incarnation must have been
    /// given behavior by now.
    pub fn insist_all_durable_kinds_reconnected(&self) -> VatResult<()> {
        let kinds = self.kinds.lock();
        let mut missing = Vec::new();
        for key in keys_with_prefix(self.store(), DURABLE_KIND_PREFIX) {
            let Some(raw) = self.store().get(&key) else {
                continue;
            };
            let descriptor: DurableKindDescriptor = serde_json::from_str(&raw)?;
            if !kinds.defined_durable.contains(&descriptor.kind_id) {
                missing.push(descriptor.tag);
            }
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(VatError::Reconnection { tags: missing })
        }
    }
}

// lookups used by the identity table and the tracker
impl Vat {
    pub(crate) fn is_kind_handle_kind(&self, kind_id: KindId) -> bool {
        self.kinds.lock().kind_idid == Some(kind_id)
    }

    pub(crate) fn kind_def(&self, kind_id: KindId) -> Option<VatRc<KindDef>> {
        self.kinds.lock().defs.get(&kind_id).cloned()
    }

    pub(crate) fn reanimate_kind_handle(&self, kind_id: KindId) -> VatResult<KindHandle> {
        let mut kinds = self.kinds.lock();
        let kind_idid = kinds.kind_idid.ok_or_else(|| {
            VatError::protocol("kind handle seen before initializeKindHandleKind")
        })?;
        let tag = kinds
            .descriptor(self.store(), kind_id)?
            .map(|d| d.tag.clone())
            .ok_or_else(|| VatError::integrity(format!("no durable kind {kind_id}")))?;
        Ok(KindHandle::new(kind_idid, kind_id, &tag))
    }

    /// Facet count and whether vrefs carry a facet suffix, for any kind ID
    /// that may appear in persisted bookkeeping.
    pub(crate) fn kind_shape(&self, kind_id: KindId) -> VatResult<(usize, bool)> {
        let mut kinds = self.kinds.lock();
        if let Some(def) = kinds.defs.get(&kind_id) {
            return Ok((def.facet_count(), def.is_faceted()));
        }
        if kinds.kind_idid == Some(kind_id) {
            return Ok((1, false));
        }
        Ok(match kinds.descriptor(self.store(), kind_id)? {
            Some(DurableKindDescriptor {
                facets: Some(names),
                ..
            }) => (names.len(), true),
            _ => (1, false),
        })
    }

    /// Facet count of the kind behind `slot`, refusing facet suffixes the
    /// kind does not have.
    pub(crate) fn facet_count(&self, slot: &VatSlot) -> VatResult<usize> {
        let (count, faceted) = self.kind_shape(slot.id)?;
        match slot.facet {
            Some(facet) if !faceted => Err(VatError::protocol(format!(
                "{slot} names facet {facet} of an unfaceted kind"
            ))),
            Some(facet) if facet >= count => Err(VatError::protocol(format!(
                "{slot} names facet {facet} of a kind with {count}"
            ))),
            _ => Ok(count),
        }
    }
}

// instances
impl Vat {
    fn next_instance_id(&self, def: &KindDef) -> VatResult<u64> {
        let mut kinds = self.kinds.lock();
        if def.durable {
            let descriptor = kinds
                .descriptor(self.store(), def.kind_id)?
                .ok_or_else(|| VatError::integrity(format!("no descriptor for durable kind {}", def.tag)))?;
            let id = descriptor.next_instance_id;
            descriptor.next_instance_id += 1;
            KindRegistry::save_descriptor(self.store(), descriptor)?;
            Ok(id)
        } else {
            let next = kinds.next_instance_ids.entry(def.kind_id).or_insert(1);
            let id = *next;
            *next += 1;
            Ok(id)
        }
    }

    /// A durable kind may only hold durable identities.
    pub(crate) fn insist_durable(&self, tag: &str, prop: &str, capdata: &CapData) -> VatResult<()> {
        if self.settings.relax_durability_rules {
            return Ok(());
        }
        for vref in &capdata.slots {
            if !VatSlot::parse(vref)?.is_durable() {
                return Err(VatError::integrity(format!(
                    "value for {prop:?} of durable kind {tag} is not durable: {vref}"
                )));
            }
        }
        Ok(())
    }

    pub(crate) fn make_instance(&self, def: &VatRc<KindDef>, args: Vec<Value>) -> VatResult<This> {
        let instance = self.next_instance_id(def)?;
        let base_ref = make_base_ref(def.kind_id, instance, def.durable);

        let mut initial = (def.init)(args)?;
        if let Some(shape) = def.state_shape() {
            if let Some(extra) = initial.keys().find(|k| !shape.contains(k)) {
                return Err(VatError::integrity(format!(
                    "{} has no state property {extra:?}",
                    def.tag
                )));
            }
            for prop in shape {
                initial.entry(prop.clone()).or_insert(Value::Null);
            }
        }

        let mut record = StateRecord::default();
        for (prop, value) in initial {
            let capdata = marshal::serialize(&value, self)?;
            self.check_payload_size(&capdata)?;
            if def.durable {
                self.insist_durable(&def.tag, &prop, &capdata)?;
            }
            record.insert(prop, capdata, value);
        }
        let held: Vec<String> = record.slots().cloned().collect();
        for vref in &held {
            self.add_reachable_vref(vref)?;
        }
        self.data_cache.lock().set(&base_ref, record);

        let this = representative::build(def, &base_ref);
        self.slots.lock().register(&base_ref, &this.clone().into());
        if let Some(finish) = &def.finish {
            let entry = self.context_entry(&base_ref)?;
            finish(&Context::new(self, entry))?;
        }
        debug!("made {} {base_ref}", def.tag);
        Ok(this)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::testing::{counter_kind, vat_with_log};
    use crate::{ErrorClass, Settings};

    fn empty(_: Vec<Value>) -> VatResult<StateInit> {
        Ok(StateInit::new())
    }

    #[test]
    fn kind_ids_are_never_reused() {
        let (vat, store) = vat_with_log();
        let a = counter_kind(&vat);
        let b = counter_kind(&vat);
        assert_ne!(a.def.kind_id, b.def.kind_id);
        assert!(store.contains(&format!("ephemeralKind.{}", a.def.kind_id)));
        vat.flush_state_cache().unwrap();
        assert_eq!(store.peek("idCounters").as_deref(), Some(r#"{"exportID":12}"#));
    }

    #[test]
    fn handles_need_the_handle_kind() {
        let (vat, _store) = vat_with_log();
        let err = vat.make_kind_handle("purse").unwrap_err();
        assert_eq!(err.class(), ErrorClass::Protocol);
        vat.initialize_kind_handle_kind().unwrap();
        let handle = vat.make_kind_handle("purse").unwrap();
        assert_eq!(handle.vref(), format!("o+d10/{}", handle.kind_id()));
    }

    #[test]
    fn durable_shape_is_fixed_by_first_definition() {
        let store = MemoryStore::new();
        let handle_id = {
            let vat = Vat::new(store.clone(), Settings::default());
            vat.initialize_kind_handle_kind().unwrap();
            let handle = vat.make_kind_handle("pair").unwrap();
            let facets = FacetBehaviors::new()
                .facet("b", Behavior::new())
                .facet("a", Behavior::new());
            vat.define_durable_kind_multi(&handle, empty, facets, KindOptions::default())
                .unwrap();
            let err = vat
                .define_durable_kind(&handle, empty, Behavior::new(), KindOptions::default())
                .err()
                .unwrap();
            assert!(err.to_string().contains("redefinition"));
            vat.flush_state_cache().unwrap();
            handle.kind_id()
        };
        let descriptor: DurableKindDescriptor =
            serde_json::from_str(&store.peek(&durable_kind_key(handle_id)).unwrap()).unwrap();
        assert_eq!(descriptor.facets, Some(vec!["a".to_owned(), "b".to_owned()]));

        let vat = Vat::new(store, Settings::default());
        vat.initialize_kind_handle_kind().unwrap();
        let handle = vat.reanimate_kind_handle(handle_id).unwrap();
        let err = vat
            .define_durable_kind(&handle, empty, Behavior::new(), KindOptions::default())
            .err()
            .unwrap();
        assert_eq!(err.class(), ErrorClass::Protocol);
        assert!(err.to_string().contains("with facets [a,b], now unfaceted"));
    }

    #[test]
    fn state_shape_limits_properties() {
        let (vat, _store) = vat_with_log();
        let options = KindOptions::default().state_shape(&["a", "b"]);
        let maker = vat
            .define_kind(
                "shaped",
                |_| Ok(StateInit::from([("a".to_owned(), Value::Int(1))])),
                Behavior::new()
                    .method("b", |ctx, _| ctx.state().get("b"))
                    .method("poke", |ctx, args| {
                        ctx.state().set("c", args.into_iter().next().unwrap_or(Value::Null))?;
                        Ok(Value::Null)
                    }),
                options,
            )
            .unwrap();
        let r = maker.make(&vat, vec![]).unwrap();
        assert_eq!(r.invoke(&vat, "b", vec![]).unwrap(), Value::Null);
        let err = r.invoke(&vat, "poke", vec![Value::Int(3)]).unwrap_err();
        assert_eq!(err.class(), ErrorClass::Integrity);

        let bad = vat
            .define_kind(
                "badly-shaped",
                |_| Ok(StateInit::from([("z".to_owned(), Value::Int(1))])),
                Behavior::new(),
                KindOptions::default().state_shape(&["a"]),
            )
            .unwrap();
        assert!(bad.make(&vat, vec![]).is_err());
    }

    #[test]
    fn durable_state_rejects_ephemeral_references() {
        let (vat, _store) = vat_with_log();
        vat.initialize_kind_handle_kind().unwrap();
        let handle = vat.make_kind_handle("box").unwrap();
        let boxes = vat
            .define_durable_kind(
                &handle,
                |args| Ok(StateInit::from([("v".to_owned(), args.into_iter().next().unwrap_or(Value::Null))])),
                Behavior::new(),
                KindOptions::default(),
            )
            .unwrap();
        let ephemeral = counter_kind(&vat).make(&vat, vec![]).unwrap();
        let err = boxes.make(&vat, vec![ephemeral.into()]).err().unwrap();
        assert_eq!(err.class(), ErrorClass::Integrity);
        assert!(boxes.make(&vat, vec![handle.clone().into()]).is_ok());

        let relaxed = Vat::new(
            MemoryStore::new(),
            Settings {
                relax_durability_rules: true,
                ..Settings::default()
            },
        );
        relaxed.initialize_kind_handle_kind().unwrap();
        let handle = relaxed.make_kind_handle("box").unwrap();
        let boxes = relaxed
            .define_durable_kind(&handle, |args| Ok(StateInit::from([("v".to_owned(), args[0].clone())])), Behavior::new(), KindOptions::default())
            .unwrap();
        let ephemeral = counter_kind(&relaxed).make(&relaxed, vec![]).unwrap();
        assert!(boxes.make(&relaxed, vec![ephemeral.into()]).is_ok());
    }

    #[test]
    fn finish_runs_once_with_context() {
        let (vat, _store) = vat_with_log();
        let maker = vat
            .define_kind(
                "finished",
                |_| Ok(StateInit::from([("n".to_owned(), Value::Int(0))])),
                Behavior::new().method("n", |ctx, _| ctx.state().get("n")),
                KindOptions::default().finish(|ctx| {
                    let n = ctx.state().get("n")?.as_int().unwrap_or_default();
                    ctx.state().set("n", n + 41)
                }),
            )
            .unwrap();
        let r = maker.make(&vat, vec![]).unwrap();
        assert_eq!(r.invoke(&vat, "n", vec![]).unwrap(), Value::Int(41));
    }
}
