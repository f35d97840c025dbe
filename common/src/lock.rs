use lock_api::{Mutex, MutexGuard, MappedMutexGuard};

cfg_if::cfg_if! {
    if #[cfg(feature = "threading")] {
        pub use parking_lot::RawMutex;
    } else {
        mod cell_lock;
        pub use cell_lock::RawCellMutex as RawMutex;
    }
}

pub type VatMutex<T> = Mutex<RawMutex, T>;
pub type VatMutexGuard<'a, T> = MutexGuard<'a, RawMutex, T>;
pub type VatMappedMutexGuard<'a, T> = MappedMutexGuard<'a, RawMutex, T>;
