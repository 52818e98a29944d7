//! The seam between the engine and the wire-level opening protocol
//!
//! Opening a batch of shares is a distributed protocol with its own
//! transcript (broadcast, sum, MAC reconciliation); the engine only drives
//! it through this interface and holds the shares steady between begin and
//! end.

use crate::{
    algebra::{FieldElement, Share},
    error::EngineError,
};

/// A MAC-checked opening subsystem over one domain
///
/// A successful [`MacCheck::open_end`] guarantees the values written into
/// the output vector are the true reconstructions of the input shares; any
/// MAC inconsistency surfaces as [`EngineError::MacVerificationFailed`],
/// which is fatal to the session.
pub trait MacCheck<T: FieldElement>: Send {
    /// This party's share of the global MAC key
    fn alpha_share(&self) -> T;

    /// Start opening a batch; nonblocking. The caller must not mutate
    /// `shares` until the matching [`MacCheck::open_end`] returns.
    fn open_begin(
        &mut self,
        opened: &mut Vec<T>,
        shares: &[Share<T>],
    ) -> Result<(), EngineError>;

    /// Complete the open, filling `opened` with the reconstructed values
    fn open_end(&mut self, opened: &mut Vec<T>, shares: &[Share<T>]) -> Result<(), EngineError>;
}
