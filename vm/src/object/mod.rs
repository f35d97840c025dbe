mod behavior;
pub(crate) mod cache;
mod drop_object;
pub mod gc;
pub(crate) mod kind;
pub(crate) mod representative;
pub(crate) mod value;
pub(crate) mod vref;
pub(crate) mod weak;

pub use self::behavior::{Behavior, Context, FacetBehaviors, KindOptions, MethodHandle, State};
pub use self::kind::{KindHandle, KindId, Maker, MultiMaker};
pub use self::representative::{Cohort, Facet, Representative, This};
pub use self::value::{ObjectRef, Presence, Remotable, StateInit, Value};
pub use self::vref::{make_facet_ref, SlotKind, VatSlot};
pub use self::weak::{CollectionId, VirtualAwareWeakMap, VirtualAwareWeakSet};
