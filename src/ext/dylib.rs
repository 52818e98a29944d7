//! The production backend: a C function-pointer table loaded from the shared
//! object named by the `SPDZ_EXT_LIB` environment variable
//!
//! This is the one module that touches raw pointers. Every buffer crossing
//! the boundary is owned by the engine; the descriptors built here borrow
//! from [`ExtBuffer`]s for the duration of a single call only.
#![allow(unsafe_code)]

use std::{
    ffi::{c_char, c_int, CStr, CString},
    path::{Path, PathBuf},
};

use libloading::{Library, Symbol};
use tracing::{error, info};

use crate::{
    error::EngineError,
    ext::{ExtBuffer, ExtContext, InitParams, ProtocolBackend},
    PartyId,
};

/// The environment variable naming the backend shared object
pub const SPDZ_EXT_LIB_ENV: &str = "SPDZ_EXT_LIB";

/// The boundary descriptor for a buffer of elements
#[repr(C)]
struct RawBuffer {
    /// The element bytes
    data: *mut u8,
    /// Bytes per element
    size: usize,
    /// Number of elements
    count: usize,
    /// Bits per element
    md_ring_size: usize,
}

impl RawBuffer {
    /// Borrow a descriptor from a buffer the backend only reads
    fn borrow(buf: &ExtBuffer) -> Self {
        Self {
            data: buf.as_slice().as_ptr() as *mut u8,
            size: buf.size(),
            count: buf.count(),
            md_ring_size: buf.md_ring_size(),
        }
    }

    /// Borrow a descriptor from a buffer the backend writes
    fn borrow_mut(buf: &mut ExtBuffer) -> Self {
        Self {
            data: buf.as_mut_slice().as_mut_ptr(),
            size: buf.size(),
            count: buf.count(),
            md_ring_size: buf.md_ring_size(),
        }
    }
}

// The ABI signatures, mirroring the C header the backends build against
type InitFn = unsafe extern "C" fn(
    *mut ExtContext,
    c_int,
    c_int,
    *const c_char,
    c_int,
    c_int,
    c_int,
) -> c_int;
type TermFn = unsafe extern "C" fn(*mut ExtContext) -> c_int;
type SkewFn = unsafe extern "C" fn(*mut ExtContext, *const RawBuffer, *mut RawBuffer) -> c_int;
type InputPartyFn =
    unsafe extern "C" fn(*mut ExtContext, c_int, *mut RawBuffer, *mut RawBuffer) -> c_int;
type InputShareFn = unsafe extern "C" fn(*mut ExtContext, *mut RawBuffer, *mut RawBuffer) -> c_int;
type MakeInputIntFn =
    unsafe extern "C" fn(*mut ExtContext, *const u64, c_int, *mut RawBuffer) -> c_int;
type MakeInputFixFn =
    unsafe extern "C" fn(*mut ExtContext, *const *const c_char, c_int, *mut RawBuffer) -> c_int;
type StartOpenFn =
    unsafe extern "C" fn(*mut ExtContext, *const RawBuffer, *mut RawBuffer) -> c_int;
type StopFn = unsafe extern "C" fn(*mut ExtContext) -> c_int;
type MakeOutputIntFn =
    unsafe extern "C" fn(*mut ExtContext, *const RawBuffer, *mut u64, *mut c_int) -> c_int;
type MakeOutputFixFn =
    unsafe extern "C" fn(*mut ExtContext, *const RawBuffer, *mut *mut c_char, *mut c_int) -> c_int;
type VerifyFn = unsafe extern "C" fn(*mut ExtContext, *mut c_int) -> c_int;
type StartMultFn = unsafe extern "C" fn(
    *mut ExtContext,
    *const RawBuffer,
    *const RawBuffer,
    *mut RawBuffer,
) -> c_int;

/// The resolved function table
struct FnTable {
    init: InitFn,
    term: TermFn,
    skew_bit_decomp: SkewFn,
    skew_ring_comp: SkewFn,
    input_party: InputPartyFn,
    input_share: InputShareFn,
    make_input_from_integer: MakeInputIntFn,
    make_input_from_fixed: MakeInputFixFn,
    start_open: StartOpenFn,
    stop_open: StopFn,
    make_integer_output: MakeOutputIntFn,
    make_fixed_output: MakeOutputFixFn,
    verify_optional_suggest: VerifyFn,
    verify_final: VerifyFn,
    start_mult: StartMultFn,
    stop_mult: StopFn,
}

/// Resolve one symbol from the library into a bare function pointer
macro_rules! load_symbol {
    ($lib:expr, $name:literal, $ty:ty) => {{
        let symbol: Symbol<$ty> = unsafe { $lib.get($name) }.map_err(|e| {
            let method = String::from_utf8_lossy(&$name[..$name.len() - 1]).into_owned();
            error!("failed to resolve backend symbol {method}: {e}");
            EngineError::BackendLoadFailure(format!("failed to resolve {method}: {e}"))
        })?;
        *symbol
    }};
}

/// A protocol backend living in a dynamically loaded shared object
///
/// The library handle and its function table are resolved once at load and
/// are immutable afterwards; the library stays mapped until the backend is
/// dropped.
pub struct DylibBackend {
    /// The loaded shared object; kept alive for the function pointers
    _lib: Library,
    /// Where the library was loaded from, for diagnostics
    path: PathBuf,
    /// The resolved entry points
    table: FnTable,
}

impl DylibBackend {
    /// Load the backend named by `SPDZ_EXT_LIB`
    pub fn load_from_env() -> Result<Self, EngineError> {
        let path = std::env::var_os(SPDZ_EXT_LIB_ENV).ok_or_else(|| {
            error!("{SPDZ_EXT_LIB_ENV} not set, no protocol backend to load");
            EngineError::ConfigMissing(SPDZ_EXT_LIB_ENV)
        })?;
        Self::load(Path::new(&path))
    }

    /// Load the backend from an explicit path
    pub fn load(path: &Path) -> Result<Self, EngineError> {
        if !path.exists() {
            error!("extension library not found at {}", path.display());
            return Err(EngineError::BackendLoadFailure(format!(
                "extension library not found at {}",
                path.display()
            )));
        }

        // SAFETY: loading a library runs its initializers; we require the
        // backend object to be a well-formed implementation of the ABI
        let lib = unsafe { Library::new(path) }.map_err(|e| {
            error!("failed to load extension library {}: {e}", path.display());
            EngineError::BackendLoadFailure(e.to_string())
        })?;

        let table = FnTable {
            init: load_symbol!(lib, b"init\0", InitFn),
            term: load_symbol!(lib, b"term\0", TermFn),
            skew_bit_decomp: load_symbol!(lib, b"skew_bit_decomp\0", SkewFn),
            skew_ring_comp: load_symbol!(lib, b"skew_ring_comp\0", SkewFn),
            input_party: load_symbol!(lib, b"input_party\0", InputPartyFn),
            input_share: load_symbol!(lib, b"input_share\0", InputShareFn),
            make_input_from_integer: load_symbol!(lib, b"make_input_from_integer\0", MakeInputIntFn),
            make_input_from_fixed: load_symbol!(lib, b"make_input_from_fixed\0", MakeInputFixFn),
            start_open: load_symbol!(lib, b"start_open\0", StartOpenFn),
            stop_open: load_symbol!(lib, b"stop_open\0", StopFn),
            make_integer_output: load_symbol!(lib, b"make_integer_output\0", MakeOutputIntFn),
            make_fixed_output: load_symbol!(lib, b"make_fixed_output\0", MakeOutputFixFn),
            verify_optional_suggest: load_symbol!(lib, b"verify_optional_suggest\0", VerifyFn),
            verify_final: load_symbol!(lib, b"verify_final\0", VerifyFn),
            start_mult: load_symbol!(lib, b"start_mult\0", StartMultFn),
            stop_mult: load_symbol!(lib, b"stop_mult\0", StopFn),
        };

        info!("loaded protocol backend from {}", path.display());
        Ok(Self { _lib: lib, path: path.to_path_buf(), table })
    }

    /// Where the backend was loaded from
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Map an ABI status to the engine error policy
    fn check(call: &'static str, status: c_int) -> Result<(), EngineError> {
        if status == 0 {
            Ok(())
        } else {
            error!(call, status, "backend call failed");
            Err(EngineError::BackendCallFailure { call, status })
        }
    }
}

impl ProtocolBackend for DylibBackend {
    fn init(&self, ctx: &mut ExtContext, params: &InitParams<'_>) -> Result<(), EngineError> {
        let field = CString::new(params.field_tag)
            .map_err(|_| EngineError::BackendLoadFailure("field tag contains NUL".to_string()))?;

        // SAFETY: the context outlives the call and the tag string outlives
        // the call; the ABI promises the backend copies what it keeps
        let status = unsafe {
            (self.table.init)(
                ctx,
                params.party_id as c_int,
                params.num_parties as c_int,
                field.as_ptr(),
                params.open_hint as c_int,
                params.mult_hint as c_int,
                params.bits_hint as c_int,
            )
        };
        Self::check("init", status)
    }

    fn term(&self, ctx: &mut ExtContext) -> Result<(), EngineError> {
        // SAFETY: the context was initialized by this table's `init`
        let status = unsafe { (self.table.term)(ctx) };
        Self::check("term", status)
    }

    fn input_party(
        &self,
        ctx: &mut ExtContext,
        sharing_party: PartyId,
        clears_in: &mut ExtBuffer,
        shares_out: &mut ExtBuffer,
    ) -> Result<(), EngineError> {
        let mut clears = RawBuffer::borrow_mut(clears_in);
        let mut shares = RawBuffer::borrow_mut(shares_out);
        // SAFETY: both descriptors borrow live engine-owned buffers
        let status = unsafe {
            (self.table.input_party)(ctx, sharing_party as c_int, &mut clears, &mut shares)
        };
        Self::check("input_party", status)
    }

    fn input_share(
        &self,
        ctx: &mut ExtContext,
        clears_in: &mut ExtBuffer,
        shares_out: &mut ExtBuffer,
    ) -> Result<(), EngineError> {
        let mut clears = RawBuffer::borrow_mut(clears_in);
        let mut shares = RawBuffer::borrow_mut(shares_out);
        // SAFETY: as above
        let status = unsafe { (self.table.input_share)(ctx, &mut clears, &mut shares) };
        Self::check("input_share", status)
    }

    fn make_input_from_integer(
        &self,
        ctx: &mut ExtContext,
        integers: &[u64],
        clears_out: &mut ExtBuffer,
    ) -> Result<(), EngineError> {
        let mut clears = RawBuffer::borrow_mut(clears_out);
        // SAFETY: the integer slice and the descriptor outlive the call
        let status = unsafe {
            (self.table.make_input_from_integer)(
                ctx,
                integers.as_ptr(),
                integers.len() as c_int,
                &mut clears,
            )
        };
        Self::check("make_input_from_integer", status)
    }

    fn make_input_from_fixed(
        &self,
        ctx: &mut ExtContext,
        fixed: &[&str],
        clears_out: &mut ExtBuffer,
    ) -> Result<(), EngineError> {
        let owned: Vec<CString> = fixed
            .iter()
            .map(|s| CString::new(*s))
            .collect::<Result<_, _>>()
            .map_err(|_| EngineError::BadOpcodeShape("fixed input contains NUL".to_string()))?;
        let ptrs: Vec<*const c_char> = owned.iter().map(|s| s.as_ptr()).collect();

        let mut clears = RawBuffer::borrow_mut(clears_out);
        // SAFETY: the string storage and pointer array outlive the call
        let status = unsafe {
            (self.table.make_input_from_fixed)(
                ctx,
                ptrs.as_ptr(),
                ptrs.len() as c_int,
                &mut clears,
            )
        };
        Self::check("make_input_from_fixed", status)
    }

    fn start_open(
        &self,
        ctx: &mut ExtContext,
        shares_in: &ExtBuffer,
        clears_out: &mut ExtBuffer,
    ) -> Result<(), EngineError> {
        let shares = RawBuffer::borrow(shares_in);
        let mut clears = RawBuffer::borrow_mut(clears_out);
        // SAFETY: the engine does not mutate `shares_in` between start and
        // stop, per the batch contract
        let status = unsafe { (self.table.start_open)(ctx, &shares, &mut clears) };
        Self::check("start_open", status)
    }

    fn stop_open(&self, ctx: &mut ExtContext) -> Result<(), EngineError> {
        // SAFETY: context validity as for `term`
        let status = unsafe { (self.table.stop_open)(ctx) };
        Self::check("stop_open", status)
    }

    fn start_mult(
        &self,
        ctx: &mut ExtContext,
        factor1: &ExtBuffer,
        factor2: &ExtBuffer,
        product: &mut ExtBuffer,
    ) -> Result<(), EngineError> {
        let f1 = RawBuffer::borrow(factor1);
        let f2 = RawBuffer::borrow(factor2);
        let mut prod = RawBuffer::borrow_mut(product);
        // SAFETY: the factor buffers are stable until `stop_mult` returns
        let status = unsafe { (self.table.start_mult)(ctx, &f1, &f2, &mut prod) };
        Self::check("start_mult", status)
    }

    fn stop_mult(&self, ctx: &mut ExtContext) -> Result<(), EngineError> {
        // SAFETY: context validity as for `term`
        let status = unsafe { (self.table.stop_mult)(ctx) };
        Self::check("stop_mult", status)
    }

    fn skew_bit_decomp(
        &self,
        ctx: &mut ExtContext,
        rings_in: &ExtBuffer,
        bits_out: &mut ExtBuffer,
    ) -> Result<(), EngineError> {
        let rings = RawBuffer::borrow(rings_in);
        let mut bits = RawBuffer::borrow_mut(bits_out);
        // SAFETY: descriptors borrow live engine-owned buffers
        let status = unsafe { (self.table.skew_bit_decomp)(ctx, &rings, &mut bits) };
        Self::check("skew_bit_decomp", status)
    }

    fn skew_ring_comp(
        &self,
        ctx: &mut ExtContext,
        bits_in: &ExtBuffer,
        rings_out: &mut ExtBuffer,
    ) -> Result<(), EngineError> {
        let bits = RawBuffer::borrow(bits_in);
        let mut rings = RawBuffer::borrow_mut(rings_out);
        // SAFETY: descriptors borrow live engine-owned buffers
        let status = unsafe { (self.table.skew_ring_comp)(ctx, &bits, &mut rings) };
        Self::check("skew_ring_comp", status)
    }

    fn make_integer_output(
        &self,
        ctx: &mut ExtContext,
        shares_in: &ExtBuffer,
    ) -> Result<Vec<u64>, EngineError> {
        let shares = RawBuffer::borrow(shares_in);
        let mut integers = vec![0u64; shares_in.count()];
        let mut n = integers.len() as c_int;
        // SAFETY: the output array holds `count` words as the ABI requires
        let status = unsafe {
            (self.table.make_integer_output)(ctx, &shares, integers.as_mut_ptr(), &mut n)
        };
        Self::check("make_integer_output", status)?;

        integers.truncate(n as usize);
        Ok(integers)
    }

    fn make_fixed_output(
        &self,
        ctx: &mut ExtContext,
        shares_in: &ExtBuffer,
    ) -> Result<Vec<String>, EngineError> {
        // The ABI writes into caller-allocated 128-byte string slots
        const SLOT_BYTES: usize = 128;
        let count = shares_in.count();
        let mut storage: Vec<Vec<u8>> = vec![vec![0u8; SLOT_BYTES]; count];
        let mut ptrs: Vec<*mut c_char> =
            storage.iter_mut().map(|s| s.as_mut_ptr() as *mut c_char).collect();

        let shares = RawBuffer::borrow(shares_in);
        let mut n = count as c_int;
        // SAFETY: each slot pointer addresses SLOT_BYTES of live storage
        let status =
            unsafe { (self.table.make_fixed_output)(ctx, &shares, ptrs.as_mut_ptr(), &mut n) };
        Self::check("make_fixed_output", status)?;

        storage
            .iter()
            .take(n as usize)
            .map(|slot| {
                // SAFETY: the backend NUL-terminates within the slot
                let cstr = unsafe { CStr::from_ptr(slot.as_ptr() as *const c_char) };
                cstr.to_str().map(str::to_owned).map_err(|_| {
                    EngineError::BackendCallFailure { call: "make_fixed_output", status: -1 }
                })
            })
            .collect()
    }

    fn verify_optional_suggest(&self, ctx: &mut ExtContext) -> Result<i32, EngineError> {
        let mut error: c_int = 0;
        // SAFETY: context validity as for `term`
        let status = unsafe { (self.table.verify_optional_suggest)(ctx, &mut error) };
        Self::check("verify_optional_suggest", status)?;
        Ok(error)
    }

    fn verify_final(&self, ctx: &mut ExtContext) -> Result<i32, EngineError> {
        let mut error: c_int = 0;
        // SAFETY: context validity as for `term`
        let status = unsafe { (self.table.verify_final)(ctx, &mut error) };
        Self::check("verify_final", status)?;
        Ok(error)
    }
}
