//! Shared primitives for the vatslots crates.
//!
//! Everything in a vat runs on one thread, one delivery at a time, so the
//! default lock is a `Cell`-backed mutex that panics on re-entry instead of
//! blocking. The `threading` feature swaps in `parking_lot` for hosts that
//! want to move a vat between threads.

pub mod lock;
pub mod rc;
