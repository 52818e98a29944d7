//! The per-party execution engine
//!
//! A processor owns one register file, the two extension contexts, the
//! reusable marshaling scratch, and the I/O surface (per-party input
//! streams, output streams, external client sockets, persistence). The host
//! machine constructs one per worker thread and drives it in program order;
//! nothing here is shared across threads.

mod registers;

pub use registers::RegisterFile;
use registers::{gather_shares, scatter_clears, scatter_shares};

use std::{
    fs::{File, OpenOptions},
    io::{BufRead, BufReader, BufWriter, Write},
    sync::Arc,
};

use num_traits::Zero;
use tracing::{error, info, warn};

use crate::{
    algebra::{FieldElement, Share},
    clients::{client_public_bytes, ExternalClients},
    config::{InputStream, RuntimeConfig},
    error::EngineError,
    ext::{BatchFsm, BatchKind, ExtBuffer, ExtContext, InitParams, ProtocolBackend},
    marshal::{
        element_words, export_shares, import_clears, import_shares, word64_size, WORD_BYTES,
    },
    opening::MacCheck,
    persistence,
    program::{ProgramHeader, RegType, SecrecyType},
    stream::OctetStream,
    sts::{Sts, StsMsg1, StsMsg2, StsMsg3, STS_MSG1_BYTES, STS_MSG2_BYTES, STS_MSG3_BYTES},
    PartyId,
};

/// The field tag handed to the binary extension context
const BINARY_FIELD_TAG: &str = "bits";

/// Which conversion a skew decomposition performs
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SkewMode {
    /// Arithmetic ring shares in, bit shares out
    RingToBits,
    /// Binary shares in, bit shares out
    BitsToBits,
    /// Bit shares in, arithmetic ring shares out
    BitsToRing,
}

/// One extension context and the batch discipline over it
#[derive(Debug, Default)]
struct DomainSession {
    /// The backend context for this domain
    ctx: ExtContext,
    /// The start/stop pairing state for this domain
    fsm: BatchFsm,
}

/// The four per-party input streams, opened once at construction
struct InputFiles {
    /// Whole-integer inputs
    integers: BufReader<File>,
    /// Fixed-point inputs
    fixes: BufReader<File>,
    /// Bit inputs
    bits: BufReader<File>,
    /// Pre-shared inputs
    shares: BufReader<File>,
}

impl InputFiles {
    /// Open all four streams; any missing file is fatal at startup
    fn open(config: &RuntimeConfig) -> Result<Self, EngineError> {
        let open = |stream: InputStream| -> Result<BufReader<File>, EngineError> {
            let path = config.input_file(stream);
            File::open(&path).map(BufReader::new).map_err(|_| {
                error!("failed to open input stream {}", path.display());
                EngineError::InputFileMissing(path)
            })
        };

        Ok(Self {
            integers: open(InputStream::Integers)?,
            fixes: open(InputStream::Fixes)?,
            bits: open(InputStream::Bits)?,
            shares: open(InputStream::Shares)?,
        })
    }

    /// The next line of one stream; running dry is fatal
    fn read_line(&mut self, stream: InputStream) -> Result<String, EngineError> {
        let reader = match stream {
            InputStream::Integers => &mut self.integers,
            InputStream::Fixes => &mut self.fixes,
            InputStream::Bits => &mut self.bits,
            InputStream::Shares => &mut self.shares,
        };

        let mut line = String::new();
        let read = reader
            .read_line(&mut line)
            .map_err(|e| EngineError::FileIoFailed(format!("{}: {e}", stream.tag())))?;
        if read == 0 {
            error!("input stream {} exhausted", stream.tag());
            return Err(EngineError::InputFileExhausted { stream: stream.tag() });
        }

        Ok(line.trim().to_string())
    }
}

/// The register execution engine for one party on one worker thread
///
/// `T` is the arithmetic element flavor and `B` the binary one; both banks
/// run through the same generic machinery, and the flavor pair is chosen by
/// the host at startup.
pub struct Processor<T: FieldElement, B: FieldElement> {
    /// The startup configuration
    config: RuntimeConfig,
    /// The register banks
    regs: RegisterFile<T, B>,
    /// The per-run argument installed at reset
    arg: i64,
    /// The arithmetic opening subsystem
    mcp: Box<dyn MacCheck<T>>,
    /// The binary opening subsystem
    mc2: Box<dyn MacCheck<B>>,
    /// The protocol backend behind the extension boundary
    backend: Arc<dyn ProtocolBackend>,
    /// The arithmetic extension context
    arith: DomainSession,
    /// The binary extension context
    binary: DomainSession,
    /// 64-bit words per arithmetic element in extension buffers
    word64_size: usize,

    /// Gathered arithmetic shares held steady across a begin/end pair
    sh_po: Vec<Share<T>>,
    /// Opened arithmetic values for the in-flight batch
    po: Vec<T>,
    /// Gathered binary shares held steady across a begin/end pair
    sh_po2: Vec<Share<B>>,
    /// Opened binary values for the in-flight batch
    po2: Vec<B>,

    /// Left factors of the in-flight arithmetic multiply
    mult_factor1: ExtBuffer,
    /// Right factors of the in-flight arithmetic multiply
    mult_factor2: ExtBuffer,
    /// Products of the in-flight arithmetic multiply
    mult_product: ExtBuffer,
    /// Shares of the in-flight extension open
    open_shares: ExtBuffer,
    /// Clears of the in-flight extension open
    open_clears: ExtBuffer,
    /// Left factors of the in-flight binary multiply
    bmult_factor1: ExtBuffer,
    /// Right factors of the in-flight binary multiply
    bmult_factor2: ExtBuffer,
    /// Products of the in-flight binary multiply
    bmult_product: ExtBuffer,

    /// The per-party input streams
    inputs: InputFiles,
    /// The public output stream
    public_output: BufWriter<File>,
    /// The private output stream
    private_output: BufWriter<File>,
    /// External client sockets and their key material
    clients: ExternalClients,
    /// The reusable socket packing scratch
    socket_stream: OctetStream,

    /// Elements exchanged in completed batches
    sent: u64,
    /// Completed communication batches
    rounds: u64,
}

impl<T: FieldElement, B: FieldElement> Processor<T, B> {
    /// Bind a processor to its party, opening subsystems and backend
    ///
    /// Opens the four input streams and the output streams, then brings up
    /// both extension contexts. Failure anywhere here is fatal.
    pub fn new(
        config: RuntimeConfig,
        program: &ProgramHeader,
        backend: Arc<dyn ProtocolBackend>,
        mcp: Box<dyn MacCheck<T>>,
        mc2: Box<dyn MacCheck<B>>,
    ) -> Result<Self, EngineError> {
        let inputs = InputFiles::open(&config)?;
        let open_output = |public: bool| -> Result<BufWriter<File>, EngineError> {
            let path = config.output_file(public);
            OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&path)
                .map(BufWriter::new)
                .map_err(|e| EngineError::FileIoFailed(format!("{}: {e}", path.display())))
        };
        let public_output = open_output(true)?;
        let private_output = open_output(false)?;

        let clients = ExternalClients::new(config.party_id);

        let mut processor = Self {
            regs: RegisterFile::new(),
            arg: 0,
            mcp,
            mc2,
            backend,
            arith: DomainSession::default(),
            binary: DomainSession::default(),
            word64_size: word64_size(T::bit_size()),
            sh_po: Vec::new(),
            po: Vec::new(),
            sh_po2: Vec::new(),
            po2: Vec::new(),
            mult_factor1: ExtBuffer::new(),
            mult_factor2: ExtBuffer::new(),
            mult_product: ExtBuffer::new(),
            open_shares: ExtBuffer::new(),
            open_clears: ExtBuffer::new(),
            bmult_factor1: ExtBuffer::new(),
            bmult_factor2: ExtBuffer::new(),
            bmult_product: ExtBuffer::new(),
            inputs,
            public_output,
            private_output,
            clients,
            socket_stream: OctetStream::new(),
            sent: 0,
            rounds: 0,
            config,
        };
        processor.reset(program, 0);

        info!(
            party = processor.config.party_id,
            thread = processor.config.thread_num,
            "initializing extension contexts"
        );
        let arith_params = InitParams {
            party_id: processor.config.party_id,
            num_parties: processor.config.num_parties,
            field_tag: processor.config.field_tag.as_str(),
            open_hint: processor.config.open_batch_hint,
            mult_hint: processor.config.mult_batch_hint,
            bits_hint: processor.config.bits_batch_hint,
        };
        processor.backend.init(&mut processor.arith.ctx, &arith_params)?;

        let binary_params = InitParams { field_tag: BINARY_FIELD_TAG, ..arith_params };
        processor.backend.init(&mut processor.binary.ctx, &binary_params)?;

        Ok(processor)
    }

    /// Resize the register banks for a program and install its argument
    pub fn reset(&mut self, program: &ProgramHeader, arg: i64) {
        self.regs.reset(&program.registers);
        self.arg = arg;
    }

    /// The startup configuration
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// The register banks
    pub fn registers(&self) -> &RegisterFile<T, B> {
        &self.regs
    }

    /// The register banks, mutably
    pub fn registers_mut(&mut self) -> &mut RegisterFile<T, B> {
        &mut self.regs
    }

    /// The per-run argument
    pub fn arg(&self) -> i64 {
        self.arg
    }

    /// The external client table, for socket registration by the host
    pub fn clients_mut(&mut self) -> &mut ExternalClients {
        &mut self.clients
    }

    /// Elements exchanged in completed batches
    pub fn sent(&self) -> u64 {
        self.sent
    }

    /// Completed communication batches
    pub fn rounds(&self) -> u64 {
        self.rounds
    }

    /// This party's arithmetic MAC key share
    pub fn alpha_share(&self) -> T {
        self.mcp.alpha_share()
    }

    // ------------------------
    // | Batched Open (MC)   |
    // ------------------------

    /// Gather an arithmetic batch and begin opening it through the opening
    /// subsystem
    pub fn popen_start(&mut self, regs: &[usize], size: usize) -> Result<(), EngineError> {
        self.arith.fsm.start(BatchKind::Open)?;

        self.sh_po = gather_shares(self.regs.sp(), regs, size)?;
        self.po.clear();
        self.po.resize(regs.len() * size, T::zero());

        self.mcp.open_begin(&mut self.po, &self.sh_po)
    }

    /// Complete the arithmetic open and scatter the clears
    pub fn popen_stop(&mut self, regs: &[usize], size: usize) -> Result<(), EngineError> {
        self.arith.fsm.stop(BatchKind::Open)?;
        self.mcp.open_end(&mut self.po, &self.sh_po)?;

        scatter_clears(self.regs.cp_mut(), regs, &self.po, size)?;
        self.sent += (regs.len() * size) as u64;
        self.rounds += 1;
        Ok(())
    }

    /// Gather a binary batch and begin opening it
    pub fn bpopen_start(&mut self, regs: &[usize], size: usize) -> Result<(), EngineError> {
        self.binary.fsm.start(BatchKind::Open)?;

        self.sh_po2 = gather_shares(self.regs.s2(), regs, size)?;
        self.po2.clear();
        self.po2.resize(regs.len() * size, B::zero());

        self.mc2.open_begin(&mut self.po2, &self.sh_po2)
    }

    /// Complete the binary open and scatter the clears
    pub fn bpopen_stop(&mut self, regs: &[usize], size: usize) -> Result<(), EngineError> {
        self.binary.fsm.stop(BatchKind::Open)?;
        self.mc2.open_end(&mut self.po2, &self.sh_po2)?;

        scatter_clears(self.regs.c2_mut(), regs, &self.po2, size)?;
        self.sent += (regs.len() * size) as u64;
        self.rounds += 1;
        Ok(())
    }

    // ---------------------------
    // | Batched Open (backend)  |
    // ---------------------------

    /// Gather an arithmetic batch and hand it to the backend for opening
    pub fn ext_open_start(&mut self, regs: &[usize], size: usize) -> Result<(), EngineError> {
        self.arith.fsm.start(BatchKind::Open)?;

        self.sh_po = gather_shares(self.regs.sp(), regs, size)?;
        let n = self.sh_po.len();
        let share_bytes = self.config.share_layout.share_bytes(self.word64_size);

        self.open_shares.ensure_capacity(n, share_bytes);
        self.open_shares.set_md_ring_size(T::bit_size());
        export_shares(&self.sh_po, &mut self.open_shares, self.config.share_layout)?;

        self.open_clears.ensure_capacity(n, self.word64_size * WORD_BYTES);
        self.open_clears.set_md_ring_size(T::bit_size());
        self.open_clears.zero();

        self.backend.start_open(&mut self.arith.ctx, &self.open_shares, &mut self.open_clears)
    }

    /// Wait for the backend open and scatter the clears
    pub fn ext_open_stop(&mut self, regs: &[usize], size: usize) -> Result<(), EngineError> {
        self.arith.fsm.stop(BatchKind::Open)?;
        self.backend.stop_open(&mut self.arith.ctx)?;

        let opened: Vec<T> = import_clears(&self.open_clears)?;
        scatter_clears(self.regs.cp_mut(), regs, &opened, size)?;

        self.sent += (regs.len() * size) as u64;
        self.rounds += 1;
        Ok(())
    }

    // ----------------------
    // | Batched Multiply   |
    // ----------------------

    /// Gather an even-count arithmetic batch, split it into factor pairs and
    /// start the backend multiply
    pub fn ext_mult_start(&mut self, regs: &[usize], size: usize) -> Result<(), EngineError> {
        self.arith.fsm.start(BatchKind::Mult)?;

        self.sh_po = gather_shares(self.regs.sp(), regs, size)?;
        if self.sh_po.len() % 2 != 0 {
            error!("multiply batch gathered {} operands", self.sh_po.len());
            return Err(EngineError::OddOperandCount { count: self.sh_po.len() });
        }

        let lhs: Vec<Share<T>> = self.sh_po.iter().step_by(2).copied().collect();
        let rhs: Vec<Share<T>> = self.sh_po.iter().skip(1).step_by(2).copied().collect();

        let half = lhs.len();
        let share_bytes = self.config.share_layout.share_bytes(self.word64_size);
        let md = T::bit_size();
        for buf in [&mut self.mult_factor1, &mut self.mult_factor2, &mut self.mult_product] {
            buf.ensure_capacity(half, share_bytes);
            buf.set_md_ring_size(md);
        }

        export_shares(&lhs, &mut self.mult_factor1, self.config.share_layout)?;
        export_shares(&rhs, &mut self.mult_factor2, self.config.share_layout)?;
        self.mult_product.zero();

        self.backend.start_mult(
            &mut self.arith.ctx,
            &self.mult_factor1,
            &self.mult_factor2,
            &mut self.mult_product,
        )
    }

    /// Wait for the backend multiply and install the products
    pub fn ext_mult_stop(&mut self, regs: &[usize], size: usize) -> Result<(), EngineError> {
        self.arith.fsm.stop(BatchKind::Mult)?;
        self.backend.stop_mult(&mut self.arith.ctx)?;

        let products =
            import_shares(&self.mult_product, self.mcp.alpha_share(), self.config.share_layout)?;
        scatter_shares(self.regs.sp_mut(), regs, &products, size)?;

        self.sent += (regs.len() * size) as u64;
        self.rounds += 1;
        Ok(())
    }

    /// The binary analog of [`Processor::ext_mult_start`]
    pub fn bext_mult_start(&mut self, regs: &[usize], size: usize) -> Result<(), EngineError> {
        self.binary.fsm.start(BatchKind::Mult)?;

        self.sh_po2 = gather_shares(self.regs.s2(), regs, size)?;
        if self.sh_po2.len() % 2 != 0 {
            error!("binary multiply batch gathered {} operands", self.sh_po2.len());
            return Err(EngineError::OddOperandCount { count: self.sh_po2.len() });
        }

        let lhs: Vec<Share<B>> = self.sh_po2.iter().step_by(2).copied().collect();
        let rhs: Vec<Share<B>> = self.sh_po2.iter().skip(1).step_by(2).copied().collect();

        let half = lhs.len();
        let share_bytes = self.config.share_layout.share_bytes(element_words::<B>());
        for buf in [&mut self.bmult_factor1, &mut self.bmult_factor2, &mut self.bmult_product] {
            buf.ensure_capacity(half, share_bytes);
            buf.set_md_ring_size(B::bit_size());
        }

        export_shares(&lhs, &mut self.bmult_factor1, self.config.share_layout)?;
        export_shares(&rhs, &mut self.bmult_factor2, self.config.share_layout)?;
        self.bmult_product.zero();

        self.backend.start_mult(
            &mut self.binary.ctx,
            &self.bmult_factor1,
            &self.bmult_factor2,
            &mut self.bmult_product,
        )
    }

    /// The binary analog of [`Processor::ext_mult_stop`]
    pub fn bext_mult_stop(&mut self, regs: &[usize], size: usize) -> Result<(), EngineError> {
        self.binary.fsm.stop(BatchKind::Mult)?;
        self.backend.stop_mult(&mut self.binary.ctx)?;

        let products =
            import_shares(&self.bmult_product, self.mc2.alpha_share(), self.config.share_layout)?;
        scatter_shares(self.regs.s2_mut(), regs, &products, size)?;

        self.sent += (regs.len() * size) as u64;
        self.rounds += 1;
        Ok(())
    }

    // ---------------------
    // | Skew Conversions  |
    // ---------------------

    /// Decompose shares into bit shares through the backend
    ///
    /// Ring operands carry their full bit width as buffer metadata, bit
    /// operands carry a width of one; the backend keys its wire format off
    /// that field.
    pub fn skew_bit_decomp(
        &mut self,
        mode: SkewMode,
        dest_regs: &[usize],
        src_regs: &[usize],
        size: usize,
    ) -> Result<(), EngineError> {
        let layout = self.config.share_layout;

        let mut src_buf = ExtBuffer::new();
        match mode {
            SkewMode::RingToBits => {
                let sources = gather_shares(self.regs.sp(), src_regs, size)?;
                src_buf.ensure_capacity(sources.len(), layout.share_bytes(self.word64_size));
                src_buf.set_md_ring_size(T::bit_size());
                export_shares(&sources, &mut src_buf, layout)?;
            },
            SkewMode::BitsToBits | SkewMode::BitsToRing => {
                let sources = gather_shares(self.regs.s2(), src_regs, size)?;
                src_buf.ensure_capacity(sources.len(), layout.share_bytes(element_words::<B>()));
                src_buf.set_md_ring_size(B::bit_size());
                export_shares(&sources, &mut src_buf, layout)?;
            },
        }

        let mut dst_buf = ExtBuffer::new();
        match mode {
            SkewMode::RingToBits | SkewMode::BitsToBits => {
                dst_buf.ensure_capacity(
                    dest_regs.len() * size,
                    layout.share_bytes(element_words::<B>()),
                );
                dst_buf.set_md_ring_size(B::bit_size());

                let ctx = match mode {
                    SkewMode::RingToBits => &mut self.arith.ctx,
                    _ => &mut self.binary.ctx,
                };
                self.backend.skew_bit_decomp(ctx, &src_buf, &mut dst_buf)?;

                let bits = import_shares(&dst_buf, self.mc2.alpha_share(), layout)?;
                scatter_shares(self.regs.s2_mut(), dest_regs, &bits, size)
            },
            SkewMode::BitsToRing => {
                dst_buf.ensure_capacity(
                    dest_regs.len() * size,
                    layout.share_bytes(self.word64_size),
                );
                dst_buf.set_md_ring_size(T::bit_size());

                self.backend.skew_bit_decomp(&mut self.arith.ctx, &src_buf, &mut dst_buf)?;

                let rings = import_shares(&dst_buf, self.mcp.alpha_share(), layout)?;
                scatter_shares(self.regs.sp_mut(), dest_regs, &rings, size)
            },
        }
    }

    /// Compose bit shares back into arithmetic ring shares through the
    /// backend
    pub fn skew_ring_comp(
        &mut self,
        dest_regs: &[usize],
        src_regs: &[usize],
        size: usize,
    ) -> Result<(), EngineError> {
        let layout = self.config.share_layout;

        let sources = gather_shares(self.regs.s2(), src_regs, size)?;
        let mut bits_in = ExtBuffer::new();
        bits_in.ensure_capacity(sources.len(), layout.share_bytes(element_words::<B>()));
        bits_in.set_md_ring_size(B::bit_size());
        export_shares(&sources, &mut bits_in, layout)?;

        let mut rings_out = ExtBuffer::new();
        rings_out.ensure_capacity(dest_regs.len() * size, layout.share_bytes(self.word64_size));
        rings_out.set_md_ring_size(T::bit_size());

        self.backend.skew_ring_comp(&mut self.arith.ctx, &bits_in, &mut rings_out)?;

        let rings = import_shares(&rings_out, self.mcp.alpha_share(), layout)?;
        scatter_shares(self.regs.sp_mut(), dest_regs, &rings, size)
    }

    // ----------------
    // | Input Shares |
    // ----------------

    /// Share a batch of integers read from the input party's integer stream
    ///
    /// Only the input party touches its file; every other party presents a
    /// zeroed clear buffer and the distributed sharing happens behind the
    /// backend.
    pub fn ext_input_share_int(
        &mut self,
        dest_regs: &[usize],
        size: usize,
        input_party: PartyId,
    ) -> Result<(), EngineError> {
        let count = dest_regs.len() * size;
        let mut clears = self.make_clear_buffer::<T>(count);

        if self.config.party_id == input_party {
            let mut ints = Vec::with_capacity(count);
            for _ in 0..count {
                ints.push(self.read_integer_input()?);
            }
            self.backend.make_input_from_integer(&mut self.arith.ctx, &ints, &mut clears)?;
        }

        let shares = self.run_input_party::<T>(input_party, &mut clears, count, true)?;
        scatter_shares(self.regs.sp_mut(), dest_regs, &shares, size)
    }

    /// Share one fixed-point value read from the input party's fixes stream
    pub fn ext_input_share_fix(
        &mut self,
        dest_reg: usize,
        input_party: PartyId,
    ) -> Result<(), EngineError> {
        let mut clears = self.make_clear_buffer::<T>(1);

        if self.config.party_id == input_party {
            let line = self.inputs.read_line(InputStream::Fixes)?;
            self.backend.make_input_from_fixed(&mut self.arith.ctx, &[line.as_str()], &mut clears)?;
        }

        let shares = self.run_input_party::<T>(input_party, &mut clears, 1, true)?;
        self.regs.write_sp(dest_reg, shares[0])
    }

    /// The binary analog of [`Processor::ext_input_share_int`], fed from the
    /// bits stream
    pub fn binput_share_int(
        &mut self,
        dest_regs: &[usize],
        size: usize,
        input_party: PartyId,
    ) -> Result<(), EngineError> {
        let count = dest_regs.len() * size;
        let mut clears = self.make_clear_buffer::<B>(count);

        if self.config.party_id == input_party {
            let mut bits = Vec::with_capacity(count);
            for _ in 0..count {
                let line = self.inputs.read_line(InputStream::Bits)?;
                bits.push(parse_integer(&line)?);
            }
            self.backend.make_input_from_integer(&mut self.binary.ctx, &bits, &mut clears)?;
        }

        let shares = self.run_input_party::<B>(input_party, &mut clears, count, false)?;
        scatter_shares(self.regs.s2_mut(), dest_regs, &shares, size)
    }

    /// Read one integer from the input party's stream into a clear register
    ///
    /// No sharing round runs here: parties other than the input party leave
    /// the register at the zero embedding.
    pub fn ext_input_clear_int(
        &mut self,
        dest_reg: usize,
        input_party: PartyId,
    ) -> Result<(), EngineError> {
        let mut clears = self.make_clear_buffer::<T>(1);

        if self.config.party_id == input_party {
            let value = self.read_integer_input()?;
            self.backend.make_input_from_integer(&mut self.arith.ctx, &[value], &mut clears)?;
        }

        let values: Vec<T> = import_clears(&clears)?;
        self.regs.write_cp(dest_reg, values[0])
    }

    /// Read one fixed-point value from the fixes stream into a clear
    /// register
    pub fn ext_input_clear_fix(
        &mut self,
        dest_reg: usize,
        input_party: PartyId,
    ) -> Result<(), EngineError> {
        let mut clears = self.make_clear_buffer::<T>(1);

        if self.config.party_id == input_party {
            let line = self.inputs.read_line(InputStream::Fixes)?;
            self.backend.make_input_from_fixed(&mut self.arith.ctx, &[line.as_str()], &mut clears)?;
        }

        let values: Vec<T> = import_clears(&clears)?;
        self.regs.write_cp(dest_reg, values[0])
    }

    /// An empty, zeroed clear buffer for `count` elements of `X`
    fn make_clear_buffer<X: FieldElement>(&self, count: usize) -> ExtBuffer {
        let mut buf = ExtBuffer::new();
        buf.ensure_capacity(count, element_words::<X>() * WORD_BYTES);
        buf.set_md_ring_size(X::bit_size());
        buf.zero();
        buf
    }

    /// Drive the backend's distributed sharing and import the results
    fn run_input_party<X: FieldElement>(
        &mut self,
        input_party: PartyId,
        clears: &mut ExtBuffer,
        count: usize,
        arithmetic: bool,
    ) -> Result<Vec<Share<X>>, EngineError> {
        let layout = self.config.share_layout;
        let mut shares_buf = ExtBuffer::new();
        shares_buf.ensure_capacity(count, layout.share_bytes(element_words::<X>()));
        shares_buf.set_md_ring_size(X::bit_size());
        shares_buf.zero();

        let (ctx, alpha) = if arithmetic {
            (&mut self.arith.ctx, T::to_biguint(&self.mcp.alpha_share()))
        } else {
            (&mut self.binary.ctx, B::to_biguint(&self.mc2.alpha_share()))
        };
        self.backend.input_party(ctx, input_party, clears, &mut shares_buf)?;

        import_shares(&shares_buf, X::from_biguint(&alpha), layout)
    }

    /// The next integer input line as a word
    fn read_integer_input(&mut self) -> Result<u64, EngineError> {
        let line = self.inputs.read_line(InputStream::Integers)?;
        parse_integer(&line)
    }

    // -----------
    // | Outputs |
    // -----------

    /// Reveal gathered shares as integers, appending them to the public
    /// output stream
    pub fn ext_make_integer_output(
        &mut self,
        src_regs: &[usize],
        size: usize,
    ) -> Result<Vec<u64>, EngineError> {
        let shares = gather_shares(self.regs.sp(), src_regs, size)?;
        let layout = self.config.share_layout;

        let mut buf = ExtBuffer::new();
        buf.ensure_capacity(shares.len(), layout.share_bytes(self.word64_size));
        buf.set_md_ring_size(T::bit_size());
        export_shares(&shares, &mut buf, layout)?;

        let values = self.backend.make_integer_output(&mut self.arith.ctx, &buf)?;
        for value in &values {
            writeln!(self.public_output, "{value}")
                .map_err(|e| EngineError::FileIoFailed(e.to_string()))?;
        }
        self.public_output.flush().map_err(|e| EngineError::FileIoFailed(e.to_string()))?;

        Ok(values)
    }

    /// Reveal gathered shares as fixed-point strings, appending them to the
    /// public output stream
    pub fn ext_make_fixed_output(
        &mut self,
        src_regs: &[usize],
        size: usize,
    ) -> Result<Vec<String>, EngineError> {
        let shares = gather_shares(self.regs.sp(), src_regs, size)?;
        let layout = self.config.share_layout;

        let mut buf = ExtBuffer::new();
        buf.ensure_capacity(shares.len(), layout.share_bytes(self.word64_size));
        buf.set_md_ring_size(T::bit_size());
        export_shares(&shares, &mut buf, layout)?;

        let values = self.backend.make_fixed_output(&mut self.arith.ctx, &buf)?;
        for value in &values {
            writeln!(self.public_output, "{value}")
                .map_err(|e| EngineError::FileIoFailed(e.to_string()))?;
        }
        self.public_output.flush().map_err(|e| EngineError::FileIoFailed(e.to_string()))?;

        Ok(values)
    }

    /// Record a private value for this party only
    pub fn write_private_output(&mut self, value: &T) -> Result<(), EngineError> {
        writeln!(self.private_output, "{value}")
            .map_err(|e| EngineError::FileIoFailed(e.to_string()))?;
        self.private_output.flush().map_err(|e| EngineError::FileIoFailed(e.to_string()))
    }

    // ----------------
    // | Verification |
    // ----------------

    /// Ask the backend whether an opportunistic verification is worthwhile
    pub fn ext_verify_optional_suggest(&mut self) -> Result<i32, EngineError> {
        let hint = self.backend.verify_optional_suggest(&mut self.arith.ctx)?;
        info!(hint, "optional verification suggestion");
        Ok(hint)
    }

    /// Run the backend's final verification; must pass before program exit
    pub fn ext_verify_final(&mut self) -> Result<(), EngineError> {
        let error = self.backend.verify_final(&mut self.arith.ctx)?;
        if error != 0 {
            error!(error, "final verification failed");
            return Err(EngineError::MacVerificationFailed);
        }

        Ok(())
    }

    // -------------
    // | Socket IO |
    // -------------

    /// Pack registers onto a client socket
    ///
    /// A nonzero message type is written as a 4-byte tag prefix. Secret
    /// arithmetic registers carry the value share and, when requested, the
    /// MAC share; clear arithmetic registers their packed element; integer
    /// registers a 32-bit word. The payload is encrypted under whatever key
    /// material the session has accumulated.
    pub fn write_socket(
        &mut self,
        reg_type: RegType,
        secrecy: SecrecyType,
        send_macs: bool,
        client_id: i64,
        message_type: u32,
        regs: &[usize],
    ) -> Result<(), EngineError> {
        if self.clients.session(client_id).is_err() {
            warn!(client_id, "write_socket on unconfigured client");
            return Ok(());
        }

        self.socket_stream.reset_write_head();
        if message_type != 0 {
            self.socket_stream.store_u32(message_type);
        }

        for &reg in regs {
            match (reg_type, secrecy) {
                (RegType::Arithmetic, SecrecyType::Secret) => {
                    let share = self.regs.read_sp(reg)?;
                    self.socket_stream.pack(&share.share());
                    if send_macs {
                        self.socket_stream.pack(&share.mac());
                    }
                },
                (RegType::Arithmetic, SecrecyType::Clear) => {
                    let value = self.regs.read_cp(reg)?;
                    self.socket_stream.pack(&value);
                },
                (RegType::Integer, SecrecyType::Clear) => {
                    let value = self.regs.read_ci(reg)?;
                    self.socket_stream.store_u32(value as u32);
                },
                _ => {
                    return Err(EngineError::BadOpcodeShape(format!(
                        "write_socket with register type {reg_type:?} and secrecy {secrecy:?}"
                    )))
                },
            }
        }

        if let Some(key) = self.clients.session(client_id)?.session_key {
            if let Err(e) = self.socket_stream.encrypt(&key) {
                warn!(client_id, %e, "payload encryption failed, dropping write");
                return Ok(());
            }
        }

        if let Err(e) = self.maybe_encrypt_sequence(client_id) {
            warn!(client_id, %e, "sequence encryption failed, dropping write");
            return Ok(());
        }

        let session = self.clients.session_mut(client_id)?;
        if let Err(e) = self.socket_stream.send(&mut session.stream) {
            warn!(client_id, %e, "send failed writing {} registers", regs.len());
        }

        Ok(())
    }

    /// Receive 32-bit integers into integer registers
    ///
    /// On any socket failure the destination registers keep their prior
    /// values.
    pub fn read_socket_ints(
        &mut self,
        client_id: i64,
        regs: &[usize],
    ) -> Result<(), EngineError> {
        if self.receive_into_stream(client_id)?.is_none() {
            return Ok(());
        }

        for &reg in regs {
            let value = self.socket_stream.get_u32()? as i32;
            self.regs.write_ci(reg, value as i64)?;
        }

        Ok(())
    }

    /// Receive public field elements into clear registers
    pub fn read_socket_vector(
        &mut self,
        client_id: i64,
        regs: &[usize],
    ) -> Result<(), EngineError> {
        if self.receive_into_stream(client_id)?.is_none() {
            return Ok(());
        }

        for &reg in regs {
            let value: T = self.socket_stream.unpack()?;
            self.regs.write_cp(reg, value)?;
        }

        Ok(())
    }

    /// Receive secret shares over the private channel into secret registers
    pub fn read_socket_private(
        &mut self,
        client_id: i64,
        regs: &[usize],
        read_macs: bool,
    ) -> Result<(), EngineError> {
        if self.receive_into_stream(client_id)?.is_none() {
            return Ok(());
        }

        if let Some(key) = self.clients.session(client_id)?.session_key {
            if let Err(e) = self.socket_stream.decrypt(&key) {
                warn!(client_id, %e, "payload decryption failed, registers unchanged");
                return Ok(());
            }
        }

        for &reg in regs {
            let a: T = self.socket_stream.unpack()?;
            let mut share = self.regs.read_sp(reg)?;
            share.set_share(a);
            if read_macs {
                share.set_mac(self.socket_stream.unpack()?);
            }
            self.regs.write_sp(reg, share)?;
        }

        Ok(())
    }

    /// Receive a client's public key words and negotiate a session key
    pub fn read_client_public_key(
        &mut self,
        client_id: i64,
        regs: &[usize],
    ) -> Result<(), EngineError> {
        self.read_socket_ints(client_id, regs)?;

        let words = regs
            .iter()
            .map(|&reg| self.regs.read_ci(reg))
            .collect::<Result<Vec<_>, _>>()?;
        self.clients.generate_session_key_for_client(client_id, &words)
    }

    /// Receive one frame and apply commsec decryption; `None` means the
    /// socket was unusable and the opcode should leave registers untouched
    fn receive_into_stream(&mut self, client_id: i64) -> Result<Option<()>, EngineError> {
        let session = match self.clients.session_mut(client_id) {
            Ok(session) => session,
            Err(e) => {
                warn!(client_id, %e, "socket read on unconfigured client");
                return Ok(None);
            },
        };

        self.socket_stream.reset_write_head();
        if let Err(e) = self.socket_stream.receive(&mut session.stream) {
            warn!(client_id, %e, "socket receive failed");
            return Ok(None);
        }

        if let Some(commsec) = session.recv.as_mut() {
            if let Err(e) = self.socket_stream.decrypt_sequence(&commsec.key, commsec.sequence) {
                warn!(client_id, %e, "sequence decryption failed, registers unchanged");
                return Ok(None);
            }
            commsec.sequence += 1;
        }

        Ok(Some(()))
    }

    /// Encrypt the pending payload under the send commsec key, if installed
    fn maybe_encrypt_sequence(&mut self, client_id: i64) -> Result<(), EngineError> {
        let session = self.clients.session_mut(client_id)?;
        if let Some(commsec) = session.send.as_mut() {
            self.socket_stream.encrypt_sequence(&commsec.key, commsec.sequence)?;
            commsec.sequence += 1;
        }

        Ok(())
    }

    // -------
    // | STS |
    // -------

    /// Run the initiator role of the Station-to-Station exchange with a
    /// client whose long-term public key sits in eight integer registers
    pub fn init_secure_socket(
        &mut self,
        client_id: i64,
        regs: &[usize],
    ) -> Result<(), EngineError> {
        self.init_secure_socket_internal(client_id, regs).map_err(|e| {
            warn!(client_id, %e, "STS initiator role failed");
            as_handshake_failure(e)
        })
    }

    /// Run the responder role of the Station-to-Station exchange
    pub fn resp_secure_socket(
        &mut self,
        client_id: i64,
        regs: &[usize],
    ) -> Result<(), EngineError> {
        self.resp_secure_socket_internal(client_id, regs).map_err(|e| {
            warn!(client_id, %e, "STS responder role failed");
            as_handshake_failure(e)
        })
    }

    /// Initiator: msg1 out, msg2 in, msg3 out, then derive send/recv keys
    fn init_secure_socket_internal(
        &mut self,
        client_id: i64,
        regs: &[usize],
    ) -> Result<(), EngineError> {
        let mut ke = self.start_sts(client_id, regs)?;

        let m1 = ke.send_msg1();
        {
            let session = self.clients.session_mut(client_id)?;
            self.socket_stream.reset_write_head();
            self.socket_stream.append(&m1.bytes);
            self.socket_stream.send(&mut session.stream)?;

            self.socket_stream.receive_expected(&mut session.stream, STS_MSG2_BYTES)?;
        }

        let mut m2 = StsMsg2 { pubkey: [0u8; 32], sig: [0u8; 64] };
        m2.pubkey.copy_from_slice(self.socket_stream.consume(32)?);
        m2.sig.copy_from_slice(self.socket_stream.consume(64)?);

        let m3 = ke.recv_msg2(m2)?;
        {
            let session = self.clients.session_mut(client_id)?;
            self.socket_stream.reset_write_head();
            self.socket_stream.append(&m3.bytes);
            self.socket_stream.send(&mut session.stream)?;
        }

        let send_key = derived_key(&mut ke)?;
        let recv_key = derived_key(&mut ke)?;
        self.clients.install_commsec_keys(client_id, send_key, recv_key)
    }

    /// Responder: msg1 in, msg2 out, msg3 in, then derive recv/send keys
    fn resp_secure_socket_internal(
        &mut self,
        client_id: i64,
        regs: &[usize],
    ) -> Result<(), EngineError> {
        let mut ke = self.start_sts(client_id, regs)?;

        {
            let session = self.clients.session_mut(client_id)?;
            self.socket_stream.reset_write_head();
            self.socket_stream.receive_expected(&mut session.stream, STS_MSG1_BYTES)?;
        }
        let mut m1 = StsMsg1 { bytes: [0u8; 32] };
        m1.bytes.copy_from_slice(self.socket_stream.consume(32)?);

        let m2 = ke.recv_msg1(m1)?;
        {
            let session = self.clients.session_mut(client_id)?;
            self.socket_stream.reset_write_head();
            self.socket_stream.append(&m2.pubkey);
            self.socket_stream.append(&m2.sig);
            self.socket_stream.send(&mut session.stream)?;

            self.socket_stream.receive_expected(&mut session.stream, STS_MSG3_BYTES)?;
        }
        let mut m3 = StsMsg3 { bytes: [0u8; 64] };
        m3.bytes.copy_from_slice(self.socket_stream.consume(64)?);
        ke.recv_msg3(m3)?;

        let recv_key = derived_key(&mut ke)?;
        let send_key = derived_key(&mut ke)?;
        self.clients.install_commsec_keys(client_id, send_key, recv_key)
    }

    /// Common STS preamble: drop stale keys, load identities, read the
    /// client's long-term key out of the registers
    fn start_sts(&mut self, client_id: i64, regs: &[usize]) -> Result<Sts, EngineError> {
        self.clients.clear_commsec_keys(client_id)?;
        let identity = self.clients.identity()?.clone();

        if regs.len() != 8 {
            return Err(EngineError::StsHandshakeFailed(format!(
                "client public key needs 8 registers, got {}",
                regs.len()
            )));
        }
        let words = regs
            .iter()
            .map(|&reg| self.regs.read_ci(reg))
            .collect::<Result<Vec<_>, _>>()?;
        let client_key = client_public_bytes(&words)
            .map_err(|e| EngineError::StsHandshakeFailed(e.to_string()))?;

        Sts::new(&client_key, identity)
    }

    // ---------------
    // | Persistence |
    // ---------------

    /// Read shares from the transactions file into secret registers
    ///
    /// The end-position register receives the next byte offset, the
    /// end-of-file sentinel, or the missing-file sentinel.
    pub fn read_shares_from_file(
        &mut self,
        start_posn: i64,
        pos_reg: usize,
        dest_regs: &[usize],
    ) -> Result<(), EngineError> {
        let path = self.config.transactions_file();

        match persistence::read_shares::<T>(&path, start_posn, dest_regs.len()) {
            Ok((shares, end_posn)) => {
                for (&reg, share) in dest_regs.iter().zip(shares) {
                    self.regs.write_sp(reg, share)?;
                }
                self.regs.write_ci(pos_reg, end_posn)
            },
            Err(EngineError::PersistenceFileMissing(path)) => {
                warn!("transactions file {} missing, returning sentinel", path.display());
                self.regs.write_ci(pos_reg, persistence::MISSING_FILE_POSITION)
            },
            Err(e) => Err(e),
        }
    }

    /// Append secret registers to the transactions file
    pub fn write_shares_to_file(&mut self, src_regs: &[usize]) -> Result<(), EngineError> {
        let shares = gather_shares(self.regs.sp(), src_regs, 1)?;
        persistence::append_shares(&self.config.transactions_file(), &shares)
    }
}

impl<T: FieldElement, B: FieldElement> Drop for Processor<T, B> {
    fn drop(&mut self) {
        if let Err(e) = self.backend.term(&mut self.arith.ctx) {
            error!(%e, "arithmetic context teardown failed");
        }
        if let Err(e) = self.backend.term(&mut self.binary.ctx) {
            error!(%e, "binary context teardown failed");
        }

        eprintln!("Sent {} elements in {} rounds", self.sent, self.rounds);
    }
}

/// Parse one decimal input line as a machine word
fn parse_integer(line: &str) -> Result<u64, EngineError> {
    line.trim()
        .parse::<i64>()
        .map(|v| v as u64)
        .map_err(|e| EngineError::BadOpcodeShape(format!("bad integer input {line:?}: {e}")))
}

/// Wrap any failure inside the handshake as the recoverable STS error
fn as_handshake_failure(e: EngineError) -> EngineError {
    match e {
        EngineError::StsHandshakeFailed(_) => e,
        other => EngineError::StsHandshakeFailed(other.to_string()),
    }
}

/// Fix the length of freshly derived key material
fn derived_key(ke: &mut Sts) -> Result<[u8; 32], EngineError> {
    ke.derive_secret(32)?
        .try_into()
        .map_err(|_| EngineError::StsHandshakeFailed("short derived key".to_string()))
}
