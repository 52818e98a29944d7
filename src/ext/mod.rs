//! The protocol-engine boundary
//!
//! The engine delegates every MPC primitive to a backend behind this
//! boundary: input sharing, batched open, batched multiply, the bit/ring
//! skew conversions, and final verification. The production backend is a
//! shared object loaded at startup ([`dylib::DylibBackend`]); the trait keeps
//! the engine testable against in-process implementations.

pub mod dylib;

use std::fmt::{Display, Formatter, Result as FmtResult};

use crate::{error::EngineError, PartyId};

// -------------
// | ExtBuffer |
// -------------

/// An owned byte buffer passed across the extension boundary
///
/// Mirrors the boundary descriptor `{data, size, count, md_ring_size}`:
/// `count` elements of `size` bytes each, `md_ring_size` the per-element bit
/// width metadata. Capacity grows monotonically against a high-water mark
/// and is reused whenever the next required batch fits; it is released only
/// when the owning processor is dropped.
#[derive(Debug, Default)]
pub struct ExtBuffer {
    /// The backing storage; `allocated` bytes live even when the current
    /// batch uses fewer
    data: Vec<u8>,
    /// Bytes per element for the current batch
    size: usize,
    /// Elements in the current batch
    count: usize,
    /// Bits per element, carried as metadata for the backend
    md_ring_size: usize,
    /// The high-water mark in bytes
    allocated: usize,
}

impl ExtBuffer {
    /// An empty buffer; storage is acquired on first use
    pub fn new() -> Self {
        Self::default()
    }

    /// Shape the buffer for a batch of `count` elements of `size` bytes,
    /// growing the backing storage only when the batch exceeds the high-water
    /// mark
    pub fn ensure_capacity(&mut self, count: usize, size: usize) {
        let required = count * size;
        if required > self.allocated {
            self.data.resize(required, 0);
            self.allocated = required;
        }

        self.count = count;
        self.size = size;
    }

    /// Set the per-element bit width metadata
    pub fn set_md_ring_size(&mut self, bits: usize) {
        self.md_ring_size = bits;
    }

    /// Bytes per element
    pub fn size(&self) -> usize {
        self.size
    }

    /// Elements in the current batch
    pub fn count(&self) -> usize {
        self.count
    }

    /// Bits per element
    pub fn md_ring_size(&self) -> usize {
        self.md_ring_size
    }

    /// The live region of the buffer
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.count * self.size]
    }

    /// The live region of the buffer, mutably
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        let len = self.count * self.size;
        &mut self.data[..len]
    }

    /// The bytes of element `i`
    pub fn element(&self, i: usize) -> &[u8] {
        &self.data[i * self.size..(i + 1) * self.size]
    }

    /// The bytes of element `i`, mutably
    pub fn element_mut(&mut self, i: usize) -> &mut [u8] {
        let size = self.size;
        &mut self.data[i * size..(i + 1) * size]
    }

    /// Zero the live region
    pub fn zero(&mut self) {
        self.as_mut_slice().fill(0);
    }
}

// -----------
// | Context |
// -----------

/// An opaque backend context
///
/// The backend stores whatever it needs behind the handle; the engine only
/// threads it through calls. Two contexts are live per processor, one for
/// the arithmetic domain and one for the binary domain.
#[derive(Debug, Default)]
#[repr(C)]
pub struct ExtContext {
    /// The backend's opaque handle
    pub handle: u64,
}

/// The parameters handed to the backend at context initialization
#[derive(Clone, Debug)]
pub struct InitParams<'a> {
    /// This party's identity
    pub party_id: PartyId,
    /// The number of parties in the session
    pub num_parties: usize,
    /// The field selector, e.g. `"p254"` or `"ring64"`
    pub field_tag: &'a str,
    /// Expected open batch size, a sizing hint only
    pub open_hint: usize,
    /// Expected multiply batch size, a sizing hint only
    pub mult_hint: usize,
    /// Expected bit batch size, a sizing hint only
    pub bits_hint: usize,
}

// -----------------------
// | Batch State Machine |
// -----------------------

/// The kind of an in-flight batch
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BatchKind {
    /// A batched open
    Open,
    /// A batched multiply
    Mult,
}

impl Display for BatchKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            BatchKind::Open => write!(f, "open"),
            BatchKind::Mult => write!(f, "mult"),
        }
    }
}

/// Enforces start/stop pairing per context: a start is legal only when no
/// batch is in flight, a stop only for the batch that is
#[derive(Debug, Default)]
pub struct BatchFsm {
    /// The batch currently in flight, if any
    active: Option<BatchKind>,
}

impl BatchFsm {
    /// Record a batch start
    pub fn start(&mut self, kind: BatchKind) -> Result<(), EngineError> {
        match self.active {
            None => {
                self.active = Some(kind);
                Ok(())
            },
            Some(active) => Err(EngineError::BadOpcodeShape(format!(
                "{kind} batch started while a {active} batch is in flight"
            ))),
        }
    }

    /// Record a batch stop
    pub fn stop(&mut self, kind: BatchKind) -> Result<(), EngineError> {
        match self.active {
            Some(active) if active == kind => {
                self.active = None;
                Ok(())
            },
            Some(active) => Err(EngineError::BadOpcodeShape(format!(
                "{kind} batch stopped while a {active} batch is in flight"
            ))),
            None => Err(EngineError::BadOpcodeShape(format!(
                "{kind} batch stopped with no batch in flight"
            ))),
        }
    }
}

// ---------
// | Trait |
// ---------

/// The operations a protocol backend provides to the engine
///
/// Buffer ownership stays with the caller for every method; a backend must
/// not retain references past the call. Any error is fatal to the session.
#[allow(clippy::too_many_arguments)]
pub trait ProtocolBackend: Send + Sync {
    /// Initialize a context for one domain
    fn init(&self, ctx: &mut ExtContext, params: &InitParams<'_>) -> Result<(), EngineError>;

    /// Tear a context down
    fn term(&self, ctx: &mut ExtContext) -> Result<(), EngineError>;

    /// Run the distributed input protocol: the sharing party's clears go in,
    /// every party's shares come out
    fn input_party(
        &self,
        ctx: &mut ExtContext,
        sharing_party: PartyId,
        clears_in: &mut ExtBuffer,
        shares_out: &mut ExtBuffer,
    ) -> Result<(), EngineError>;

    /// Promote clears known to every party into shares
    fn input_share(
        &self,
        ctx: &mut ExtContext,
        clears_in: &mut ExtBuffer,
        shares_out: &mut ExtBuffer,
    ) -> Result<(), EngineError>;

    /// Encode machine integers into clear-value buffer form
    fn make_input_from_integer(
        &self,
        ctx: &mut ExtContext,
        integers: &[u64],
        clears_out: &mut ExtBuffer,
    ) -> Result<(), EngineError>;

    /// Encode fixed-point decimal strings into clear-value buffer form
    fn make_input_from_fixed(
        &self,
        ctx: &mut ExtContext,
        fixed: &[&str],
        clears_out: &mut ExtBuffer,
    ) -> Result<(), EngineError>;

    /// Begin a batched open
    fn start_open(
        &self,
        ctx: &mut ExtContext,
        shares_in: &ExtBuffer,
        clears_out: &mut ExtBuffer,
    ) -> Result<(), EngineError>;

    /// Block until the open round completes
    fn stop_open(&self, ctx: &mut ExtContext) -> Result<(), EngineError>;

    /// Begin a batched multiply of paired factors
    fn start_mult(
        &self,
        ctx: &mut ExtContext,
        factor1: &ExtBuffer,
        factor2: &ExtBuffer,
        product: &mut ExtBuffer,
    ) -> Result<(), EngineError>;

    /// Block until the multiply round completes
    fn stop_mult(&self, ctx: &mut ExtContext) -> Result<(), EngineError>;

    /// Decompose ring shares into bit shares
    fn skew_bit_decomp(
        &self,
        ctx: &mut ExtContext,
        rings_in: &ExtBuffer,
        bits_out: &mut ExtBuffer,
    ) -> Result<(), EngineError>;

    /// Compose bit shares back into ring shares
    fn skew_ring_comp(
        &self,
        ctx: &mut ExtContext,
        bits_in: &ExtBuffer,
        rings_out: &mut ExtBuffer,
    ) -> Result<(), EngineError>;

    /// Reveal shares to this party as machine integers
    fn make_integer_output(
        &self,
        ctx: &mut ExtContext,
        shares_in: &ExtBuffer,
    ) -> Result<Vec<u64>, EngineError>;

    /// Reveal shares to this party as fixed-point decimal strings
    fn make_fixed_output(
        &self,
        ctx: &mut ExtContext,
        shares_in: &ExtBuffer,
    ) -> Result<Vec<String>, EngineError>;

    /// Ask whether the backend recommends an opportunistic verification now
    fn verify_optional_suggest(&self, ctx: &mut ExtContext) -> Result<i32, EngineError>;

    /// Run the final verification; a non-zero error means an opened value
    /// failed its MAC reconciliation somewhere in the session
    fn verify_final(&self, ctx: &mut ExtContext) -> Result<i32, EngineError>;
}

#[cfg(test)]
mod test {
    use super::{BatchFsm, BatchKind, ExtBuffer};

    /// Stop without start, double start, and mismatched stop all error
    #[test]
    fn test_batch_fsm_misuse() {
        let mut fsm = BatchFsm::default();
        assert!(fsm.stop(BatchKind::Open).is_err());

        fsm.start(BatchKind::Open).unwrap();
        assert!(fsm.start(BatchKind::Open).is_err());
        assert!(fsm.start(BatchKind::Mult).is_err());
        assert!(fsm.stop(BatchKind::Mult).is_err());

        fsm.stop(BatchKind::Open).unwrap();
        assert!(fsm.stop(BatchKind::Open).is_err());
    }

    /// The backing storage grows to the high-water mark and is reused below
    /// it
    #[test]
    fn test_buffer_high_water_mark() {
        let mut buf = ExtBuffer::new();
        buf.ensure_capacity(10, 8);
        assert_eq!(buf.as_slice().len(), 80);

        let ptr = buf.as_slice().as_ptr();
        buf.ensure_capacity(4, 8);
        assert_eq!(buf.count(), 4);
        assert_eq!(buf.as_slice().len(), 32);
        assert_eq!(buf.as_slice().as_ptr(), ptr);

        buf.ensure_capacity(20, 8);
        assert_eq!(buf.as_slice().len(), 160);
    }

    /// Element views are disjoint slices of the live region
    #[test]
    fn test_buffer_element_views() {
        let mut buf = ExtBuffer::new();
        buf.ensure_capacity(3, 4);
        buf.element_mut(1).copy_from_slice(&[1, 2, 3, 4]);

        assert_eq!(buf.element(0), &[0, 0, 0, 0]);
        assert_eq!(buf.element(1), &[1, 2, 3, 4]);
        assert_eq!(buf.as_slice()[4..8], [1, 2, 3, 4]);
    }
}
