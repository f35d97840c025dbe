use vatslots_vm::{
    Behavior, CapData, FacetBehaviors, KindOptions, MemoryStore, ObjectRef, Settings, StateInit,
    Value, Vat, VatError, VatResult, VirtualAwareWeakSet,
};

pub struct Scenario {
    pub name: &'static str,
    pub about: &'static str,
    script: fn(&mut Session) -> VatResult<()>,
}

pub const ALL: &[Scenario] = &[
    Scenario {
        name: "export-drop",
        about: "export an object, drop the export, drop the last local reference",
        script: export_then_drop,
    },
    Scenario {
        name: "facets",
        about: "export one facet of a cohort, then drop and retire it",
        script: one_facet_retired,
    },
    Scenario {
        name: "overwrite",
        about: "overwrite the only stored reference to an object",
        script: overwrite_reference,
    },
    Scenario {
        name: "imports",
        about: "hold an import in state and in a weak set, then let go",
        script: imports,
    },
    Scenario {
        name: "upgrade",
        about: "reconnect a durable kind in a later incarnation",
        script: upgrade,
    },
];

pub fn find(name: &str) -> Option<&'static Scenario> {
    ALL.iter().find(|s| s.name == name)
}

pub fn run(scenario: &Scenario, settings: Settings) -> VatResult<()> {
    let mut session = Session::new(settings);
    (scenario.script)(&mut session)?;
    session.dump();
    Ok(())
}

/// One vat over one store, with a running transcript.
pub struct Session {
    settings: Settings,
    store: MemoryStore,
    vat: Vat,
    deliveries: usize,
}

impl Session {
    fn new(settings: Settings) -> Self {
        let (vat, store) = Vat::in_memory(settings.clone());
        Session {
            settings,
            store,
            vat,
            deliveries: 0,
        }
    }

    fn deliver<T, F>(&mut self, what: &str, f: F) -> VatResult<T>
    where
        F: FnOnce(&Vat) -> VatResult<T>,
    {
        self.deliveries += 1;
        println!("[{}] {what}", self.deliveries);
        let out = self.vat.deliver(f);
        self.report();
        out
    }

    fn report(&mut self) {
        for op in self.store.take_log() {
            println!("    {op}");
        }
        for syscall in self.vat.take_syscalls() {
            println!("  syscall {syscall:?}");
        }
        for retirement in self.vat.take_retirements() {
            println!("  retired {} ({:?})", retirement.vref, retirement.cause);
        }
    }

    /// Replace the vat with a new incarnation over the same store.
    fn restart(&mut self) {
        println!("-- restart --");
        self.vat = Vat::new(self.store.clone(), self.settings.clone());
    }

    fn show(&self, base_ref: &str) -> VatResult<()> {
        println!("  {base_ref} {}", self.vat.reachability(base_ref)?);
        Ok(())
    }

    fn dump(&self) {
        println!("store:");
        for (key, value) in self.store.dump() {
            println!("  {key} = {value}");
        }
    }
}

fn zero_count(_: Vec<Value>) -> VatResult<StateInit> {
    Ok(StateInit::from([("count".to_owned(), Value::Int(0))]))
}

fn hold_first(args: Vec<Value>) -> VatResult<StateInit> {
    let held = args.into_iter().next().unwrap_or(Value::Null);
    Ok(StateInit::from([("held".to_owned(), held)]))
}

fn bump(ctx: &vatslots_vm::Context<'_>, _: Vec<Value>) -> VatResult<Value> {
    let count = ctx.state().get("count")?.as_int().unwrap_or_default() + 1;
    ctx.state().set("count", count)?;
    Ok(Value::Int(count))
}

fn holder_behavior() -> Behavior {
    Behavior::new()
        .method("get", |ctx, _| ctx.state().get("held"))
        .method("set", |ctx, args| {
            ctx.state()
                .set("held", args.into_iter().next().unwrap_or(Value::Null))?;
            Ok(Value::Null)
        })
}

fn single_ref(vref: &str) -> CapData {
    CapData {
        body: "#\"$0\"".to_owned(),
        slots: vec![vref.to_owned()],
    }
}

fn export_then_drop(s: &mut Session) -> VatResult<()> {
    let counters = s.vat.define_kind(
        "counter",
        zero_count,
        Behavior::new().method("increment", bump),
        KindOptions::default(),
    )?;
    let counter = s.deliver("make and export a counter", |vat| {
        let c = counters.make(vat, vec![])?;
        c.invoke(vat, "increment", vec![])?;
        vat.send_out(&c.clone().into())?;
        Ok(c)
    })?;
    let base_ref = counter.base_ref().to_owned();
    s.show(&base_ref)?;

    s.deliver("peer drops it", |vat| vat.dispatch_drop_exports(&[&base_ref]))?;
    s.show(&base_ref)?;

    drop(counter);
    s.deliver("last local reference gone", |_| Ok(()))?;
    println!("  collected: {}", s.vat.is_collected(&base_ref));
    Ok(())
}

fn one_facet_retired(s: &mut Session) -> VatResult<()> {
    let pairs = s.vat.define_kind_multi(
        "pair",
        zero_count,
        FacetBehaviors::new()
            .facet("left", Behavior::new().method("bump", bump))
            .facet(
                "right",
                Behavior::new().method("read", |ctx, _| ctx.state().get("count")),
            ),
        KindOptions::default(),
    )?;
    let cohort = s.deliver("make a pair and export its left facet", |vat| {
        let cohort = pairs.make(vat, vec![])?;
        vat.send_out(&cohort.facet("left")?.into())?;
        Ok(cohort)
    })?;
    let left = cohort.facet("left")?.vref();
    s.show(cohort.base_ref())?;

    s.deliver("peer drops the left facet", |vat| {
        vat.dispatch_drop_exports(&[&left])
    })?;
    s.deliver("peer retires the left facet", |vat| {
        vat.dispatch_retire_exports(&[&left])
    })?;
    s.show(cohort.base_ref())?;

    let count = s.deliver("right facet still works", |vat| {
        cohort.facet("right")?.invoke(vat, "read", vec![])
    })?;
    println!("  right reads {count:?}");
    Ok(())
}

fn overwrite_reference(s: &mut Session) -> VatResult<()> {
    let counters = s.vat.define_kind(
        "counter",
        zero_count,
        Behavior::new().method("increment", bump),
        KindOptions::default(),
    )?;
    let holders = s
        .vat
        .define_kind("holder", hold_first, holder_behavior(), KindOptions::default())?;
    let (holder, x) = s.deliver("store a counter in a holder", |vat| {
        let x = counters.make(vat, vec![])?;
        let holder = holders.make(vat, vec![x.clone().into()])?;
        Ok((holder, x.base_ref().to_owned()))
    })?;
    s.show(&x)?;
    s.deliver("overwrite the holder's reference", |vat| {
        holder.invoke(vat, "set", vec![Value::from("nothing")])
    })?;
    println!("  collected: {}", s.vat.is_collected(&x));
    Ok(())
}

fn imports(s: &mut Session) -> VatResult<()> {
    let holders = s
        .vat
        .define_kind("holder", hold_first, holder_behavior(), KindOptions::default())?;
    let seen = VirtualAwareWeakSet::new(&s.vat);
    let holder = s.deliver("receive an import, store it and remember it", |vat| {
        let presence = vat.receive(&single_ref("o-5"))?;
        if let Some(key) = presence.as_object() {
            seen.add(vat, key);
        }
        holders.make(vat, vec![presence])
    })?;
    s.deliver("forget the stored reference", |vat| {
        holder.invoke(vat, "set", vec![Value::Null])
    })?;
    drop(seen);
    s.deliver("the weak set is gone too", |_| Ok(()))?;
    Ok(())
}

fn upgrade(s: &mut Session) -> VatResult<()> {
    fn purse_init(args: Vec<Value>) -> VatResult<StateInit> {
        let balance = args.first().and_then(Value::as_int).unwrap_or_default();
        Ok(StateInit::from([("balance".to_owned(), Value::Int(balance))]))
    }
    fn purse_behavior() -> Behavior {
        Behavior::new().method("balance", |ctx, _| ctx.state().get("balance"))
    }

    s.vat.initialize_kind_handle_kind()?;
    let handle = s.vat.make_kind_handle("purse")?;
    let purses =
        s.vat
            .define_durable_kind(&handle, purse_init, purse_behavior(), KindOptions::default())?;
    s.vat.insist_all_durable_kinds_reconnected()?;
    let handle_vref = handle.vref().to_owned();
    let purse_vref = s.deliver("make and export a purse", |vat| {
        let purse = purses.make(vat, vec![Value::Int(30)])?;
        Ok(vat.send_out(&purse.into())?.slots.remove(0))
    })?;
    drop((handle, purses));

    s.restart();
    s.vat.initialize_kind_handle_kind()?;
    let handle = match s.vat.receive(&single_ref(&handle_vref))? {
        Value::Object(ObjectRef::KindHandle(handle)) => handle,
        other => {
            return Err(VatError::integrity(format!(
                "{handle_vref} is not a kind handle: {other:?}"
            )))
        }
    };
    s.vat
        .define_durable_kind(&handle, purse_init, purse_behavior(), KindOptions::default())?;
    s.vat.insist_all_durable_kinds_reconnected()?;
    let balance = s.deliver("ask the old purse for its balance", |vat| {
        match vat.receive(&single_ref(&purse_vref))? {
            Value::Object(purse) => purse.invoke(vat, "balance", vec![]),
            other => Err(VatError::integrity(format!("not a purse: {other:?}"))),
        }
    })?;
    println!("  balance {balance:?}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_scenario_runs() {
        for scenario in ALL {
            run(scenario, Settings::default()).unwrap_or_else(|err| panic!("{}: {err}", scenario.name));
        }
    }

    #[test]
    fn scenarios_are_found_by_name() {
        assert!(find("facets").is_some());
        assert!(find("nope").is_none());
    }

    #[test]
    fn upgrade_needs_reconnection() {
        let mut s = Session::new(Settings::default());
        upgrade(&mut s).unwrap();
        s.restart();
        s.vat.initialize_kind_handle_kind().unwrap();
        let err = s.vat.insist_all_durable_kinds_reconnected().unwrap_err();
        assert!(err.to_string().contains("purse"));
    }
}
