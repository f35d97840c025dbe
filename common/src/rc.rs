cfg_if::cfg_if! {
    if #[cfg(feature = "threading")] {
        pub use std::sync::{Arc as VatRc, Weak as VatWeak};
    } else {
        pub use std::rc::{Rc as VatRc, Weak as VatWeak};
    }
}
