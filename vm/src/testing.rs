//! Kinds and fixtures shared by the unit tests.

use crate::marshal::CapData;
use crate::object::{Behavior, FacetBehaviors, KindOptions, Maker, MultiMaker, StateInit, Value};
use crate::store::MemoryStore;
use crate::{Settings, Vat};

pub(crate) fn vat_with_log() -> (Vat, MemoryStore) {
    let _ = env_logger::builder().is_test(true).try_init();
    Vat::in_memory(Settings {
        log_store_ops: true,
        ..Settings::default()
    })
}

fn zero_count(_: Vec<Value>) -> crate::VatResult<StateInit> {
    Ok(StateInit::from([("count".to_owned(), Value::Int(0))]))
}

pub(crate) fn counter_kind(vat: &Vat) -> Maker {
    let behavior = Behavior::new()
        .method("increment", |ctx, _| {
            let count = ctx.state().get("count")?.as_int().unwrap_or_default() + 1;
            ctx.state().set("count", count)?;
            Ok(Value::Int(count))
        })
        .method("read", |ctx, _| ctx.state().get("count"));
    vat.define_kind("counter", zero_count, behavior, KindOptions::default())
        .unwrap()
}

pub(crate) fn holder_kind(vat: &Vat) -> Maker {
    let behavior = Behavior::new()
        .method("get", |ctx, _| ctx.state().get("held"))
        .method("set", |ctx, args| {
            ctx.state()
                .set("held", args.into_iter().next().unwrap_or(Value::Null))?;
            Ok(Value::Null)
        });
    vat.define_kind(
        "holder",
        |args: Vec<Value>| {
            let held = args.into_iter().next().unwrap_or(Value::Null);
            Ok(StateInit::from([("held".to_owned(), held)]))
        },
        behavior,
        KindOptions::default(),
    )
    .unwrap()
}

/// Two facets over one count: `left` bumps it, `right` reads it.
pub(crate) fn pair_kind(vat: &Vat) -> MultiMaker {
    let facets = FacetBehaviors::new()
        .facet(
            "right",
            Behavior::new().method("read", |ctx, _| ctx.state().get("count")),
        )
        .facet(
            "left",
            Behavior::new().method("bump", |ctx, _| {
                let count = ctx.state().get("count")?.as_int().unwrap_or_default() + 1;
                ctx.state().set("count", count)?;
                Ok(Value::Int(count))
            }),
        );
    vat.define_kind_multi("pair", zero_count, facets, KindOptions::default())
        .unwrap()
}

/// A message carrying a single reference.
pub(crate) fn import_payload(vref: &str) -> CapData {
    CapData {
        body: "#\"$0\"".to_owned(),
        slots: vec![vref.to_owned()],
    }
}
