//! In-process backends and a synchronous three-party harness for unit and
//! integration tests, as well as benchmarks
//!
//! Two backends stand in for a real protocol library: an
//! identity-with-increment stub for smoke-testing the marshaling plumbing,
//! and a trusted dealer that reconstructs and re-shares faithfully so that
//! opened values, products and skew conversions are actually correct across
//! the three parties. Parties run on plain threads and meet at a rendezvous
//! keyed by a per-subsystem round counter; since every party issues the same
//! batch sequence in the same order, the counters stay aligned.

use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Condvar, Mutex,
    },
};

use num_bigint::BigUint;
use num_traits::Zero;

use crate::{
    algebra::{Bit, FieldElement, Fp, Ring64, Share},
    config::RuntimeConfig,
    error::EngineError,
    ext::{ExtBuffer, ExtContext, InitParams, ProtocolBackend},
    marshal::{export_words, import_words, ShareLayout},
    opening::MacCheck,
    processor::Processor,
    program::{ProgramHeader, RegisterCounts},
    PartyId, PARTY0,
};

/// The prime field used throughout the tests
pub type TestField = Fp<ark_bn254::Fr>;

/// A deterministic MAC key share for a test party
pub fn test_alpha<X: FieldElement>(party: usize) -> X {
    X::from_u64(party as u64 + 3)
}

/// The register footprint used by the harness programs
pub fn test_program() -> ProgramHeader {
    ProgramHeader {
        name: "smoke".to_string(),
        registers: RegisterCounts { arithmetic: 16, binary: 16, integer: 16 },
    }
}

// --------------
// | Rendezvous |
// --------------

/// One round's worth of contributions
struct Slot {
    /// What each party posted so far
    posts: Vec<Option<Vec<BigUint>>>,
    /// How many parties have collected the result
    reads: usize,
}

/// A barrier-with-payload connecting the in-process parties
///
/// Each subsystem instance owns a monotonically increasing round counter;
/// matching rounds across parties meet in one slot, and the slot is freed
/// once every party has read it.
pub struct Rendezvous {
    /// The number of parties meeting here
    parties: usize,
    /// In-flight rounds
    state: Mutex<HashMap<u64, Slot>>,
    /// Signals a fully posted round
    cond: Condvar,
}

impl Rendezvous {
    /// A rendezvous for `parties` participants
    pub fn new(parties: usize) -> Arc<Self> {
        Arc::new(Self { parties, state: Mutex::new(HashMap::new()), cond: Condvar::new() })
    }

    /// Post this party's payload for a round and collect everyone's
    pub fn exchange(&self, party: usize, round: u64, payload: Vec<BigUint>) -> Vec<Vec<BigUint>> {
        let mut state = self.state.lock().expect("rendezvous poisoned");

        let slot = state
            .entry(round)
            .or_insert_with(|| Slot { posts: vec![None; self.parties], reads: 0 });
        slot.posts[party] = Some(payload);
        if slot.posts.iter().all(Option::is_some) {
            self.cond.notify_all();
        }

        while !state.get(&round).expect("live round").posts.iter().all(Option::is_some) {
            state = self.cond.wait(state).expect("rendezvous poisoned");
        }

        let result: Vec<Vec<BigUint>> = state
            .get(&round)
            .expect("live round")
            .posts
            .iter()
            .map(|post| post.clone().expect("posted"))
            .collect();

        let slot = state.get_mut(&round).expect("live round");
        slot.reads += 1;
        if slot.reads == self.parties {
            state.remove(&round);
        }

        result
    }
}

// ------------------
// | Local MacCheck |
// ------------------

/// An opening subsystem that reconstructs across the in-process parties and
/// runs the real tau-sum MAC reconciliation
pub struct LocalMacCheck<X: FieldElement> {
    /// This party's index
    party: usize,
    /// This party's MAC key share
    alpha: X,
    /// The rendezvous shared by all parties' instances
    hub: Arc<Rendezvous>,
    /// The next exchange round
    round: u64,
}

impl<X: FieldElement> LocalMacCheck<X> {
    /// A mac-check instance for one party
    pub fn new(party: usize, alpha: X, hub: Arc<Rendezvous>) -> Self {
        Self { party, alpha, hub, round: 0 }
    }

    /// Run one exchange round
    fn exchange(&mut self, payload: Vec<BigUint>) -> Vec<Vec<BigUint>> {
        let round = self.round;
        self.round += 1;
        self.hub.exchange(self.party, round, payload)
    }
}

impl<X: FieldElement> MacCheck<X> for LocalMacCheck<X> {
    fn alpha_share(&self) -> X {
        self.alpha
    }

    fn open_begin(
        &mut self,
        _opened: &mut Vec<X>,
        _shares: &[Share<X>],
    ) -> Result<(), EngineError> {
        Ok(())
    }

    fn open_end(&mut self, opened: &mut Vec<X>, shares: &[Share<X>]) -> Result<(), EngineError> {
        // Broadcast value components and sum per element
        let payload = shares.iter().map(|s| s.share().to_biguint()).collect();
        let rows = self.exchange(payload);
        let values: Vec<X> = (0..shares.len())
            .map(|k| rows.iter().map(|row| X::from_biguint(&row[k])).sum())
            .collect();

        // Broadcast tau shares and require every element's tau to vanish
        let taus = values
            .iter()
            .zip(shares)
            .map(|(value, share)| (self.alpha * *value - share.mac()).to_biguint())
            .collect();
        let tau_rows = self.exchange(taus);
        for k in 0..values.len() {
            let tau: X = tau_rows.iter().map(|row| X::from_biguint(&row[k])).sum();
            if !tau.is_zero() {
                return Err(EngineError::MacVerificationFailed);
            }
        }

        opened.clear();
        opened.extend(values);
        Ok(())
    }
}

// ------------------------
// | Trusted Dealer Stub  |
// ------------------------

/// The context handle value marking the arithmetic domain
const ARITH_HANDLE: u64 = 1;
/// The context handle value marking the binary domain
const BINARY_HANDLE: u64 = 2;

/// A backend that opens everything at a trusted rendezvous and deals fresh
/// trivial sharings back out
///
/// Semantically faithful (opened values, products and skew conversions are
/// correct, MAC invariants hold under the replicated layout) but with none
/// of the cryptography, which is exactly what the engine tests need.
pub struct TrustedDealerBackend<T: FieldElement, B: FieldElement> {
    /// This party's index
    party: usize,
    /// The arithmetic-domain MAC key share
    alpha_t: T,
    /// The binary-domain MAC key share
    alpha_b: B,
    /// How shares map onto buffer words
    layout: ShareLayout,
    /// The rendezvous shared by all parties' instances
    hub: Arc<Rendezvous>,
    /// The next exchange round
    round: AtomicU64,
}

impl<T: FieldElement, B: FieldElement> TrustedDealerBackend<T, B> {
    /// A dealer instance for one party
    pub fn new(party: usize, layout: ShareLayout, hub: Arc<Rendezvous>) -> Self {
        Self {
            party,
            alpha_t: test_alpha(party),
            alpha_b: test_alpha(party),
            layout,
            hub,
            round: AtomicU64::new(0),
        }
    }

    /// Run one exchange round
    fn exchange(&self, payload: Vec<BigUint>) -> Vec<Vec<BigUint>> {
        let round = self.round.fetch_add(1, Ordering::SeqCst);
        self.hub.exchange(self.party, round, payload)
    }

    /// The value-component width of a share buffer
    fn component(&self, buf: &ExtBuffer) -> usize {
        match self.layout {
            ShareLayout::Additive => buf.size(),
            ShareLayout::Replicated => buf.size() / 2,
        }
    }

    /// The value components of every share in a buffer
    fn read_share_values(&self, buf: &ExtBuffer) -> Vec<BigUint> {
        let comp = self.component(buf);
        (0..buf.count()).map(|i| import_words(&buf.element(i)[..comp])).collect()
    }

    /// Open a share buffer across the parties
    fn open_typed<X: FieldElement>(&self, buf: &ExtBuffer) -> Vec<X> {
        let rows = self.exchange(self.read_share_values(buf));
        (0..buf.count())
            .map(|k| rows.iter().map(|row| X::from_biguint(&row[k])).sum())
            .collect()
    }

    /// Deal trivial sharings of clear values into a share buffer
    fn deal_all<X: FieldElement>(&self, values: &[X], alpha: X, buf: &mut ExtBuffer) {
        let comp = self.component(buf);
        let replicated = self.layout == ShareLayout::Replicated;

        for (i, value) in values.iter().enumerate() {
            let a = if self.party as PartyId == PARTY0 { *value } else { X::zero() };
            let mac = alpha * *value;

            let slot = buf.element_mut(i);
            slot.fill(0);
            export_words(&a.to_biguint(), &mut slot[..comp]);
            if replicated {
                export_words(&mac.to_biguint(), &mut slot[comp..]);
            }
        }
    }

    /// Write clear values into a clear buffer
    fn write_clears<X: FieldElement>(values: &[X], buf: &mut ExtBuffer) {
        for (i, value) in values.iter().enumerate() {
            let slot = buf.element_mut(i);
            slot.fill(0);
            export_words(&value.to_biguint(), slot);
        }
    }

    /// Decompose opened inputs into per-bit trivial sharings
    fn decomp<In: FieldElement, Out: FieldElement>(
        &self,
        alpha: Out,
        input: &ExtBuffer,
        output: &mut ExtBuffer,
    ) {
        let xs: Vec<In> = self.open_typed(input);
        let per = if xs.is_empty() { 0 } else { output.count() / xs.len() };

        let mut bits = Vec::with_capacity(output.count());
        for x in &xs {
            let v = x.to_biguint();
            for j in 0..per {
                bits.push(Out::from_u64(v.bit(j as u64) as u64));
            }
        }

        self.deal_all(&bits, alpha, output);
    }

    /// Compose opened bit inputs back into trivial ring sharings
    fn comp<In: FieldElement, Out: FieldElement>(
        &self,
        alpha: Out,
        input: &ExtBuffer,
        output: &mut ExtBuffer,
    ) {
        let bits: Vec<In> = self.open_typed(input);
        let n_out = output.count();
        let per = if n_out == 0 { 0 } else { bits.len() / n_out };

        let mut values = Vec::with_capacity(n_out);
        for i in 0..n_out {
            let mut v = BigUint::zero();
            for j in 0..per {
                if !bits[i * per + j].is_zero() {
                    v |= BigUint::from(1u8) << j;
                }
            }
            values.push(Out::from_biguint(&v));
        }

        self.deal_all(&values, alpha, output);
    }

    /// Whether a context belongs to the binary domain
    fn is_binary(ctx: &ExtContext) -> bool {
        ctx.handle == BINARY_HANDLE
    }
}

impl<T: FieldElement, B: FieldElement> ProtocolBackend for TrustedDealerBackend<T, B> {
    fn init(&self, ctx: &mut ExtContext, params: &InitParams<'_>) -> Result<(), EngineError> {
        ctx.handle = if params.field_tag == "bits" { BINARY_HANDLE } else { ARITH_HANDLE };
        Ok(())
    }

    fn term(&self, ctx: &mut ExtContext) -> Result<(), EngineError> {
        ctx.handle = 0;
        Ok(())
    }

    fn input_party(
        &self,
        ctx: &mut ExtContext,
        sharing_party: PartyId,
        clears_in: &mut ExtBuffer,
        shares_out: &mut ExtBuffer,
    ) -> Result<(), EngineError> {
        // Everyone posts their clear buffer; only the sharing party's row
        // carries the real values
        let payload = (0..clears_in.count()).map(|i| import_words(clears_in.element(i))).collect();
        let rows = self.exchange(payload);
        let xs = &rows[sharing_party as usize];

        if Self::is_binary(ctx) {
            let values: Vec<B> = xs.iter().map(B::from_biguint).collect();
            self.deal_all(&values, self.alpha_b, shares_out);
        } else {
            let values: Vec<T> = xs.iter().map(T::from_biguint).collect();
            self.deal_all(&values, self.alpha_t, shares_out);
        }
        Ok(())
    }

    fn input_share(
        &self,
        ctx: &mut ExtContext,
        clears_in: &mut ExtBuffer,
        shares_out: &mut ExtBuffer,
    ) -> Result<(), EngineError> {
        let xs: Vec<BigUint> =
            (0..clears_in.count()).map(|i| import_words(clears_in.element(i))).collect();

        if Self::is_binary(ctx) {
            let values: Vec<B> = xs.iter().map(B::from_biguint).collect();
            self.deal_all(&values, self.alpha_b, shares_out);
        } else {
            let values: Vec<T> = xs.iter().map(T::from_biguint).collect();
            self.deal_all(&values, self.alpha_t, shares_out);
        }
        Ok(())
    }

    fn make_input_from_integer(
        &self,
        ctx: &mut ExtContext,
        integers: &[u64],
        clears_out: &mut ExtBuffer,
    ) -> Result<(), EngineError> {
        if Self::is_binary(ctx) {
            let values: Vec<B> = integers.iter().map(|&v| B::from_u64(v)).collect();
            Self::write_clears(&values, clears_out);
        } else {
            let values: Vec<T> = integers.iter().map(|&v| T::from_u64(v)).collect();
            Self::write_clears(&values, clears_out);
        }
        Ok(())
    }

    fn make_input_from_fixed(
        &self,
        ctx: &mut ExtContext,
        fixed: &[&str],
        clears_out: &mut ExtBuffer,
    ) -> Result<(), EngineError> {
        let integers = fixed
            .iter()
            .map(|s| s.trim().parse::<f64>().map(|v| v as u64))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| EngineError::BackendCallFailure {
                call: "make_input_from_fixed",
                status: -1,
            })?;
        self.make_input_from_integer(ctx, &integers, clears_out)
    }

    fn start_open(
        &self,
        ctx: &mut ExtContext,
        shares_in: &ExtBuffer,
        clears_out: &mut ExtBuffer,
    ) -> Result<(), EngineError> {
        if Self::is_binary(ctx) {
            let opened: Vec<B> = self.open_typed(shares_in);
            Self::write_clears(&opened, clears_out);
        } else {
            let opened: Vec<T> = self.open_typed(shares_in);
            Self::write_clears(&opened, clears_out);
        }
        Ok(())
    }

    fn stop_open(&self, _ctx: &mut ExtContext) -> Result<(), EngineError> {
        Ok(())
    }

    fn start_mult(
        &self,
        ctx: &mut ExtContext,
        factor1: &ExtBuffer,
        factor2: &ExtBuffer,
        product: &mut ExtBuffer,
    ) -> Result<(), EngineError> {
        // Single combined broadcast keeps one round per multiply batch
        let mut payload = self.read_share_values(factor1);
        payload.extend(self.read_share_values(factor2));
        let rows = self.exchange(payload);

        let n = factor1.count();
        if Self::is_binary(ctx) {
            let products: Vec<B> = (0..n)
                .map(|i| {
                    let x: B = rows.iter().map(|row| B::from_biguint(&row[i])).sum();
                    let y: B = rows.iter().map(|row| B::from_biguint(&row[n + i])).sum();
                    x * y
                })
                .collect();
            self.deal_all(&products, self.alpha_b, product);
        } else {
            let products: Vec<T> = (0..n)
                .map(|i| {
                    let x: T = rows.iter().map(|row| T::from_biguint(&row[i])).sum();
                    let y: T = rows.iter().map(|row| T::from_biguint(&row[n + i])).sum();
                    x * y
                })
                .collect();
            self.deal_all(&products, self.alpha_t, product);
        }
        Ok(())
    }

    fn stop_mult(&self, _ctx: &mut ExtContext) -> Result<(), EngineError> {
        Ok(())
    }

    fn skew_bit_decomp(
        &self,
        _ctx: &mut ExtContext,
        rings_in: &ExtBuffer,
        bits_out: &mut ExtBuffer,
    ) -> Result<(), EngineError> {
        // The domain of each operand rides in its bit-width metadata
        match (rings_in.md_ring_size() == 1, bits_out.md_ring_size() == 1) {
            (false, true) => self.decomp::<T, B>(self.alpha_b, rings_in, bits_out),
            (true, true) => self.decomp::<B, B>(self.alpha_b, rings_in, bits_out),
            (true, false) => self.decomp::<B, T>(self.alpha_t, rings_in, bits_out),
            (false, false) => self.decomp::<T, T>(self.alpha_t, rings_in, bits_out),
        }
        Ok(())
    }

    fn skew_ring_comp(
        &self,
        _ctx: &mut ExtContext,
        bits_in: &ExtBuffer,
        rings_out: &mut ExtBuffer,
    ) -> Result<(), EngineError> {
        match (bits_in.md_ring_size() == 1, rings_out.md_ring_size() == 1) {
            (true, false) => self.comp::<B, T>(self.alpha_t, bits_in, rings_out),
            (false, false) => self.comp::<T, T>(self.alpha_t, bits_in, rings_out),
            (true, true) => self.comp::<B, B>(self.alpha_b, bits_in, rings_out),
            (false, true) => self.comp::<T, B>(self.alpha_b, bits_in, rings_out),
        }
        Ok(())
    }

    fn make_integer_output(
        &self,
        ctx: &mut ExtContext,
        shares_in: &ExtBuffer,
    ) -> Result<Vec<u64>, EngineError> {
        let opened: Vec<BigUint> = if Self::is_binary(ctx) {
            self.open_typed::<B>(shares_in).iter().map(B::to_biguint).collect()
        } else {
            self.open_typed::<T>(shares_in).iter().map(T::to_biguint).collect()
        };

        Ok(opened.iter().map(|v| v.iter_u64_digits().next().unwrap_or(0)).collect())
    }

    fn make_fixed_output(
        &self,
        ctx: &mut ExtContext,
        shares_in: &ExtBuffer,
    ) -> Result<Vec<String>, EngineError> {
        let integers = self.make_integer_output(ctx, shares_in)?;
        Ok(integers.iter().map(u64::to_string).collect())
    }

    fn verify_optional_suggest(&self, _ctx: &mut ExtContext) -> Result<i32, EngineError> {
        Ok(0)
    }

    fn verify_final(&self, _ctx: &mut ExtContext) -> Result<i32, EngineError> {
        Ok(0)
    }
}

// -----------------------
// | Increment Stub      |
// -----------------------

/// The identity-with-increment stub: every produced element is its input
/// plus one, with no communication at all
///
/// Only good for smoke-testing the buffer plumbing; it preserves neither
/// secrecy nor MAC invariants.
#[derive(Default)]
pub struct IncrementBackend;

impl IncrementBackend {
    /// Check the shape precondition shared by the elementwise calls
    fn check_counts(
        call: &'static str,
        input: &ExtBuffer,
        output: &ExtBuffer,
    ) -> Result<(), EngineError> {
        if input.count() != output.count() {
            return Err(EngineError::BackendCallFailure { call, status: -1 });
        }
        Ok(())
    }

    /// Write `input + 1` elementwise into the output buffer
    fn increment_into(input: &ExtBuffer, output: &mut ExtBuffer) {
        for i in 0..input.count() {
            let v = import_words(input.element(i)) + 1u8;
            let slot = output.element_mut(i);
            slot.fill(0);
            export_words(&v, slot);
        }
    }
}

impl ProtocolBackend for IncrementBackend {
    fn init(&self, ctx: &mut ExtContext, _params: &InitParams<'_>) -> Result<(), EngineError> {
        ctx.handle = 0xCAFE_CAFE;
        Ok(())
    }

    fn term(&self, ctx: &mut ExtContext) -> Result<(), EngineError> {
        ctx.handle = 0;
        Ok(())
    }

    fn input_party(
        &self,
        _ctx: &mut ExtContext,
        _sharing_party: PartyId,
        clears_in: &mut ExtBuffer,
        shares_out: &mut ExtBuffer,
    ) -> Result<(), EngineError> {
        Self::check_counts("input_party", clears_in, shares_out)?;
        Self::increment_into(clears_in, shares_out);
        Ok(())
    }

    fn input_share(
        &self,
        _ctx: &mut ExtContext,
        clears_in: &mut ExtBuffer,
        shares_out: &mut ExtBuffer,
    ) -> Result<(), EngineError> {
        Self::check_counts("input_share", clears_in, shares_out)?;
        Self::increment_into(clears_in, shares_out);
        Ok(())
    }

    fn make_input_from_integer(
        &self,
        _ctx: &mut ExtContext,
        integers: &[u64],
        clears_out: &mut ExtBuffer,
    ) -> Result<(), EngineError> {
        if integers.len() > clears_out.count() {
            return Err(EngineError::BackendCallFailure {
                call: "make_input_from_integer",
                status: -1,
            });
        }

        for (i, &value) in integers.iter().enumerate() {
            let slot = clears_out.element_mut(i);
            slot.fill(0);
            export_words(&BigUint::from(value), slot);
        }
        Ok(())
    }

    fn make_input_from_fixed(
        &self,
        ctx: &mut ExtContext,
        fixed: &[&str],
        clears_out: &mut ExtBuffer,
    ) -> Result<(), EngineError> {
        let integers = fixed
            .iter()
            .map(|s| s.trim().parse::<f64>().map(|v| v as u64))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| EngineError::BackendCallFailure {
                call: "make_input_from_fixed",
                status: -1,
            })?;
        self.make_input_from_integer(ctx, &integers, clears_out)
    }

    fn start_open(
        &self,
        _ctx: &mut ExtContext,
        shares_in: &ExtBuffer,
        clears_out: &mut ExtBuffer,
    ) -> Result<(), EngineError> {
        Self::check_counts("start_open", shares_in, clears_out)?;
        Self::increment_into(shares_in, clears_out);
        Ok(())
    }

    fn stop_open(&self, _ctx: &mut ExtContext) -> Result<(), EngineError> {
        Ok(())
    }

    fn start_mult(
        &self,
        _ctx: &mut ExtContext,
        factor1: &ExtBuffer,
        factor2: &ExtBuffer,
        product: &mut ExtBuffer,
    ) -> Result<(), EngineError> {
        Self::check_counts("start_mult", factor1, product)?;
        Self::check_counts("start_mult", factor2, product)?;

        for i in 0..factor1.count() {
            let v = import_words(factor1.element(i)) * import_words(factor2.element(i));
            let slot = product.element_mut(i);
            slot.fill(0);
            export_words(&v, slot);
        }
        Ok(())
    }

    fn stop_mult(&self, _ctx: &mut ExtContext) -> Result<(), EngineError> {
        Ok(())
    }

    fn skew_bit_decomp(
        &self,
        _ctx: &mut ExtContext,
        rings_in: &ExtBuffer,
        bits_out: &mut ExtBuffer,
    ) -> Result<(), EngineError> {
        Self::check_counts("skew_bit_decomp", rings_in, bits_out)?;
        Self::increment_into(rings_in, bits_out);
        Ok(())
    }

    fn skew_ring_comp(
        &self,
        _ctx: &mut ExtContext,
        bits_in: &ExtBuffer,
        rings_out: &mut ExtBuffer,
    ) -> Result<(), EngineError> {
        Self::check_counts("skew_ring_comp", bits_in, rings_out)?;
        Self::increment_into(bits_in, rings_out);
        Ok(())
    }

    fn make_integer_output(
        &self,
        _ctx: &mut ExtContext,
        shares_in: &ExtBuffer,
    ) -> Result<Vec<u64>, EngineError> {
        Ok((0..shares_in.count())
            .map(|i| import_words(shares_in.element(i)).iter_u64_digits().next().unwrap_or(0))
            .collect())
    }

    fn make_fixed_output(
        &self,
        ctx: &mut ExtContext,
        shares_in: &ExtBuffer,
    ) -> Result<Vec<String>, EngineError> {
        let integers = self.make_integer_output(ctx, shares_in)?;
        Ok(integers.iter().map(u64::to_string).collect())
    }

    fn verify_optional_suggest(&self, _ctx: &mut ExtContext) -> Result<i32, EngineError> {
        Ok(1)
    }

    fn verify_final(&self, _ctx: &mut ExtContext) -> Result<i32, EngineError> {
        Ok(0)
    }
}

// -----------
// | Harness |
// -----------

/// Create a scratch working directory for one party, with the four input
/// streams pre-populated and the output/persistence directories in place
pub fn scratch_party_dir(tag: &str, party: usize) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "spdz-runtime-{tag}-{pid}-{party}",
        pid = std::process::id()
    ));
    if dir.exists() {
        std::fs::remove_dir_all(&dir).ok();
    }
    std::fs::create_dir_all(dir.join("Player-Data")).expect("scratch dir");
    std::fs::create_dir_all(dir.join("Persistence")).expect("scratch dir");

    let write = |name: String, contents: &str| {
        std::fs::write(dir.join(name), contents).expect("input file");
    };
    write(format!("integers_input_{party}.txt"), "5\n7\n42\n1\n2\n3\n");
    write(format!("fixes_input_{party}.txt"), "1.5\n2.25\n");
    write(format!("bits_input_{party}.txt"), "1\n0\n1\n1\n");
    write(format!("shares_input_{party}.txt"), "0\n");

    dir
}

/// Build one party of an in-process cluster over `Ring64`/`Bit`
pub fn build_party(
    tag: &str,
    party: usize,
    parties: usize,
    backend_hub: Arc<Rendezvous>,
    mcp_hub: Arc<Rendezvous>,
    mc2_hub: Arc<Rendezvous>,
) -> Processor<Ring64, Bit> {
    let dir = scratch_party_dir(tag, party);
    let config = RuntimeConfig::new(party as PartyId, parties).rooted_at(&dir);

    let backend: Arc<dyn ProtocolBackend> =
        Arc::new(TrustedDealerBackend::<Ring64, Bit>::new(party, config.share_layout, backend_hub));
    let mcp = Box::new(LocalMacCheck::<Ring64>::new(party, test_alpha(party), mcp_hub));
    let mc2 = Box::new(LocalMacCheck::<Bit>::new(party, test_alpha(party), mc2_hub));

    Processor::new(config, &test_program(), backend, mcp, mc2).expect("processor construction")
}

/// Run the same closure on three in-process parties, one thread each, and
/// collect the per-party results in party order
pub fn run_three_party<R, F>(tag: &str, f: F) -> Vec<R>
where
    R: Send,
    F: Fn(usize, &mut Processor<Ring64, Bit>) -> R + Send + Sync,
{
    let backend_hub = Rendezvous::new(3);
    let mcp_hub = Rendezvous::new(3);
    let mc2_hub = Rendezvous::new(3);

    std::thread::scope(|scope| {
        let handles: Vec<_> = (0..3)
            .map(|party| {
                let f = &f;
                let backend_hub = backend_hub.clone();
                let mcp_hub = mcp_hub.clone();
                let mc2_hub = mc2_hub.clone();
                scope.spawn(move || {
                    let mut processor =
                        build_party(tag, party, 3, backend_hub, mcp_hub, mc2_hub);
                    f(party, &mut processor)
                })
            })
            .collect();

        handles.into_iter().map(|handle| handle.join().expect("party thread")).collect()
    })
}

/// Run a closure on a single-party cluster, for opcode tests with no
/// cross-party semantics
pub fn run_solo<R, F>(tag: &str, f: F) -> R
where
    R: Send,
    F: Fn(&mut Processor<Ring64, Bit>) -> R + Send + Sync,
{
    let mut processor =
        build_party(tag, 0, 1, Rendezvous::new(1), Rendezvous::new(1), Rendezvous::new(1));
    f(&mut processor)
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use num_bigint::BigUint;

    use super::Rendezvous;

    /// Three threads meet, each sees everyone's payload in party order
    #[test]
    fn test_rendezvous_exchange() {
        let hub = Rendezvous::new(3);

        let results: Vec<Vec<Vec<BigUint>>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..3)
                .map(|party| {
                    let hub = Arc::clone(&hub);
                    scope.spawn(move || {
                        hub.exchange(party, 0, vec![BigUint::from(party as u64 * 10)])
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        for rows in results {
            assert_eq!(
                rows,
                vec![
                    vec![BigUint::from(0u64)],
                    vec![BigUint::from(10u64)],
                    vec![BigUint::from(20u64)]
                ]
            );
        }
    }
}
