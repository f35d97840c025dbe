use serde::{Deserialize, Serialize};
use vatslots_common::lock::VatMutex;

use crate::error::{VatError, VatResult};
use crate::marshal::{self, CapData};
use crate::object::cache::{ContextCache, DataCache};
use crate::object::gc::ReachabilityTracker;
use crate::object::kind::KindRegistry;
use crate::object::weak::CollectionRegistry;
use crate::object::Value;
use crate::settings::Settings;
use crate::slots::SlotTable;
use crate::store::{MemoryStore, VatStore};

const ID_COUNTERS_KEY: &str = "idCounters";
const FIRST_EXPORT_ID: u64 = 10;

#[derive(Debug, Serialize, Deserialize)]
struct IdCounters {
    #[serde(rename = "exportID")]
    export_id: u64,
    #[serde(skip)]
    dirty: bool,
}

/// One vat's virtual object layer. Built once at vat start and passed by
/// reference to everything that needs it; deliveries run one at a time.
pub struct Vat {
    pub(crate) settings: Settings,
    store: Box<dyn VatStore>,
    ids: VatMutex<Option<IdCounters>>,
    pub(crate) slots: VatMutex<SlotTable>,
    pub(crate) tracker: VatMutex<ReachabilityTracker>,
    pub(crate) kinds: VatMutex<KindRegistry>,
    pub(crate) data_cache: VatMutex<DataCache>,
    pub(crate) context_cache: VatMutex<ContextCache>,
    pub(crate) collections: VatMutex<CollectionRegistry>,
}

impl Vat {
    pub fn new(store: impl VatStore + 'static, settings: Settings) -> Self {
        Vat {
            settings,
            store: Box::new(store),
            ids: VatMutex::new(None),
            slots: VatMutex::default(),
            tracker: VatMutex::default(),
            kinds: VatMutex::default(),
            data_cache: VatMutex::default(),
            context_cache: VatMutex::default(),
            collections: VatMutex::default(),
        }
    }

    /// A vat over a fresh `MemoryStore`, which is returned too so callers can
    /// inspect it or hand it to a later incarnation.
    pub fn in_memory(settings: Settings) -> (Self, MemoryStore) {
        let store = MemoryStore::new();
        store.set_logging(settings.log_store_ops);
        (Vat::new(store.clone(), settings), store)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub(crate) fn store(&self) -> &dyn VatStore {
        &*self.store
    }

    pub(crate) fn allocate_export_id(&self) -> VatResult<u64> {
        let mut ids = self.ids.lock();
        if ids.is_none() {
            let loaded = match self.store().get(ID_COUNTERS_KEY) {
                Some(raw) => serde_json::from_str(&raw)?,
                None => IdCounters {
                    export_id: FIRST_EXPORT_ID,
                    dirty: false,
                },
            };
            *ids = Some(loaded);
        }
        let counters = ids
            .as_mut()
            .ok_or_else(|| VatError::integrity("id counters not loaded"))?;
        let id = counters.export_id;
        counters.export_id += 1;
        counters.dirty = true;
        Ok(id)
    }

    pub(crate) fn check_payload_size(&self, capdata: &CapData) -> VatResult<()> {
        let size = capdata.size();
        let limit = self.settings.max_capdata_size;
        if size > limit {
            return Err(VatError::PayloadTooLarge { size, limit });
        }
        Ok(())
    }

    /// Write back everything dirty, in first-touched order, and forget the
    /// per-crank caches.
    pub fn flush_state_cache(&self) -> VatResult<()> {
        self.data_cache.lock().flush(self.store())?;
        self.tracker.lock().commit(self.store());
        self.slots.lock().commit_refs();
        self.context_cache.lock().clear();
        if let Some(counters) = self.ids.lock().as_mut() {
            if counters.dirty {
                self.store
                    .set(ID_COUNTERS_KEY, &serde_json::to_string(counters)?);
                counters.dirty = false;
            }
        }
        Ok(())
    }

    fn abort_crank(&self) {
        self.data_cache.lock().discard();
        let unwritten = self.tracker.lock().discard();
        self.slots.lock().undo_refs();
        self.context_cache.lock().clear();
        debug!("crank aborted, {unwritten} refcount and export status writes dropped");
    }

    /// Run one delivery: `f`, then write-back, then the sweep, then
    /// write-back again for whatever the sweep touched. A failed delivery
    /// writes nothing from the caches, and its refcount and export status
    /// changes are dropped with them.
    pub fn deliver<T, F>(&self, f: F) -> VatResult<T>
    where
        F: FnOnce(&Vat) -> VatResult<T>,
    {
        match f(self) {
            Ok(value) => {
                self.flush_state_cache()?;
                self.bring_out_your_dead()?;
                self.flush_state_cache()?;
                Ok(value)
            }
            Err(err) => {
                warn!("delivery failed: {err}");
                self.abort_crank();
                Err(err)
            }
        }
    }

    /// Serialize a value that is leaving the vat. Everything it names
    /// becomes reachable by the peer.
    pub fn send_out(&self, value: &Value) -> VatResult<CapData> {
        let data = marshal::serialize(value, self)?;
        self.check_payload_size(&data)?;
        for vref in &data.slots {
            self.mark_exported(vref)?;
        }
        Ok(data)
    }

    /// Deserialize a value arriving from a peer.
    pub fn receive(&self, data: &CapData) -> VatResult<Value> {
        marshal::deserialize(data, self)
    }
}
