//! There are three steps in deleting a stored virtual object:
//! 1. mark its baseRef collected, so a second attempt traps
//! 2. release every reference its state holds, which may queue others
//! 3. delete the state record and any cached context
//!
//! Export status is left to the caller, which has to turn still
//! recognizable facets into retirements.

use crate::error::VatResult;
use crate::vat::Vat;

impl Vat {
    pub(crate) fn delete_stored_vo(&self, base_ref: &str) -> VatResult<()> {
        self.tracker.lock().mark_collected(base_ref)?;

        let held: Vec<String> = {
            let mut cache = self.data_cache.lock();
            let record = cache.get_mut(self.store(), base_ref)?;
            record.slots().cloned().collect()
        };
        for vref in &held {
            self.remove_reachable_vref(vref)?;
        }

        self.data_cache.lock().delete(self.store(), base_ref);
        self.context_cache.lock().remove(base_ref);
        debug!("deleted {base_ref}, released {} references", held.len());
        Ok(())
    }
}
