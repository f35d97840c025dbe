//! Virtual objects for a vat: state kept in a key-value store instead of
//! memory, representatives rebuilt on demand, and the bookkeeping that
//! decides when an object's state can be deleted and when its identity can
//! be retired.
//!
//! Everything is driven through [`Vat`]. Run each delivery with
//! [`Vat::deliver`], which writes back cached state and sweeps for
//! unreachable objects when the delivery ends.

#[macro_use]
extern crate log;

mod error;
pub mod marshal;
pub mod object;
mod settings;
mod slots;
pub mod store;
mod vat;

#[cfg(test)]
pub(crate) mod testing;

pub use self::error::{ErrorClass, VatError, VatResult};
pub use self::marshal::{CapData, SlotConverter};
pub use self::object::gc::{
    ExportStatus, GcSyscall, Reachability, RetireCause, Retirement, SweepReport,
};
pub use self::object::{
    Behavior, Cohort, Context, Facet, FacetBehaviors, KindHandle, KindOptions, Maker,
    MethodHandle, MultiMaker, ObjectRef, Presence, Remotable, Representative, State, StateInit,
    This, Value, VirtualAwareWeakMap, VirtualAwareWeakSet,
};
pub use self::settings::Settings;
pub use self::store::{MemoryStore, StoreOp, VatStore};
pub use self::vat::Vat;
