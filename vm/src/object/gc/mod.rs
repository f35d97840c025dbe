//! Reachability tracking for virtual objects.
//!
//! A virtual object lives in the backing store, not in memory, so "can this
//! be freed" is not a question the host allocator can answer. Instead every
//! baseRef carries four legs:
//!
//! | leg | meaning | where it lives |
//! | --- | ------- | -------------- |
//! | L   | a Representative (or facet) is resident | identity table, as a weak ref |
//! | E   | some facet is reachable by a peer | `es.<baseRef>`, `r` per facet |
//! | R   | some facet is recognizable by a peer | `es.<baseRef>`, `r` or `s` per facet |
//! | V   | other persisted state names it | `rc.<baseRef>` |
//!
//! E implies R, so of the sixteen combinations twelve are reachable.
//!
//! Transitions:
//! 1. make: nothing -> L.
//! 2. export: a message carries the identity out, its facet becomes `r`.
//! 3. dropExports from the peer: `r` -> `s`. R stays set.
//! 4. retireExports from the peer: `s` -> `n`, legal only once E is clear.
//! 5. state writes add and remove V through explicit refcounts.
//! 6. L is lost when userspace drops the last Representative. We never
//!    react to that when it happens; the end-of-delivery sweep finds dead
//!    weak refs in the identity table instead.
//!
//! Anything that may have lost a leg goes into a "possibly dead" set. The
//! sweep drains that set in sorted order, so the store traffic it causes is
//! a function of what behavior code did and not of when memory was freed.
//! When L, E and V are all clear the object's state is deleted, every
//! refcount it held is decremented (which can queue more work for the next
//! pass), and each facet that was still recognizable is retired. A
//! retirement scrubs weak collection entries keyed on that identity.
//!
//! Imports follow the same shape with fewer legs: when neither resident nor
//! referenced from state they are dropped, and once no weak collection
//! recognizes them either they are retired.

mod collector;
mod header;
mod utils;

pub(crate) use collector::ReachabilityTracker;
pub use header::{ExportStatus, Reachability};
pub use utils::{GcSyscall, RetireCause, Retirement, SweepReport};
