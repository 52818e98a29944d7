//! The algebra the engine computes over: field/ring elements and the
//! MAC-authenticated shares built from them

mod field;
pub(crate) mod macros;
mod prime;
mod ring;
mod share;

pub use field::{n_bytes, FieldElement};
pub use prime::Fp;
pub use ring::{Bit, Ring64};
pub use share::{check_macs, combine, reconstruct_checked, Share};
