//! The typed register banks behind a processor
//!
//! Five banks sized by the program header: clear and secret registers in the
//! arithmetic domain, clear and secret registers in the binary domain, and
//! 64-bit integers for counters, positions and client ids. Accessors are
//! typed per bank, so an opcode cannot read an operand as the wrong kind.

use num_traits::Zero;

use crate::{
    algebra::{FieldElement, Share},
    error::EngineError,
    program::RegisterCounts,
};

/// The register file for one processor
#[derive(Debug, Default)]
pub struct RegisterFile<T: FieldElement, B: FieldElement> {
    /// Clear arithmetic registers
    cp: Vec<T>,
    /// Secret-shared arithmetic registers
    sp: Vec<Share<T>>,
    /// Clear binary registers
    c2: Vec<B>,
    /// Secret-shared binary registers
    s2: Vec<Share<B>>,
    /// Integer registers
    ci: Vec<i64>,
}

/// A bounds failure on a named bank
fn out_of_range(bank: &'static str, index: usize, len: usize) -> EngineError {
    EngineError::BadOpcodeShape(format!("register {bank}[{index}] out of range (bank size {len})"))
}

impl<T: FieldElement, B: FieldElement> RegisterFile<T, B> {
    /// An empty register file; banks are sized at reset
    pub fn new() -> Self {
        Self { cp: Vec::new(), sp: Vec::new(), c2: Vec::new(), s2: Vec::new(), ci: Vec::new() }
    }

    /// Resize every bank to the program's declared footprint, zeroing all
    /// contents
    pub fn reset(&mut self, counts: &RegisterCounts) {
        self.cp.clear();
        self.cp.resize(counts.arithmetic, T::zero());
        self.sp.clear();
        self.sp.resize(counts.arithmetic, Share::default());
        self.c2.clear();
        self.c2.resize(counts.binary, B::zero());
        self.s2.clear();
        self.s2.resize(counts.binary, Share::default());
        self.ci.clear();
        self.ci.resize(counts.integer, 0);
    }

    /// Read a clear arithmetic register
    pub fn read_cp(&self, i: usize) -> Result<T, EngineError> {
        self.cp.get(i).copied().ok_or_else(|| out_of_range("Cp", i, self.cp.len()))
    }

    /// Write a clear arithmetic register
    pub fn write_cp(&mut self, i: usize, value: T) -> Result<(), EngineError> {
        let len = self.cp.len();
        *self.cp.get_mut(i).ok_or_else(|| out_of_range("Cp", i, len))? = value;
        Ok(())
    }

    /// Read a secret arithmetic register
    pub fn read_sp(&self, i: usize) -> Result<Share<T>, EngineError> {
        self.sp.get(i).copied().ok_or_else(|| out_of_range("Sp", i, self.sp.len()))
    }

    /// Write a secret arithmetic register
    pub fn write_sp(&mut self, i: usize, value: Share<T>) -> Result<(), EngineError> {
        let len = self.sp.len();
        *self.sp.get_mut(i).ok_or_else(|| out_of_range("Sp", i, len))? = value;
        Ok(())
    }

    /// Read a clear binary register
    pub fn read_c2(&self, i: usize) -> Result<B, EngineError> {
        self.c2.get(i).copied().ok_or_else(|| out_of_range("C2", i, self.c2.len()))
    }

    /// Write a clear binary register
    pub fn write_c2(&mut self, i: usize, value: B) -> Result<(), EngineError> {
        let len = self.c2.len();
        *self.c2.get_mut(i).ok_or_else(|| out_of_range("C2", i, len))? = value;
        Ok(())
    }

    /// Read a secret binary register
    pub fn read_s2(&self, i: usize) -> Result<Share<B>, EngineError> {
        self.s2.get(i).copied().ok_or_else(|| out_of_range("S2", i, self.s2.len()))
    }

    /// Write a secret binary register
    pub fn write_s2(&mut self, i: usize, value: Share<B>) -> Result<(), EngineError> {
        let len = self.s2.len();
        *self.s2.get_mut(i).ok_or_else(|| out_of_range("S2", i, len))? = value;
        Ok(())
    }

    /// Read an integer register
    pub fn read_ci(&self, i: usize) -> Result<i64, EngineError> {
        self.ci.get(i).copied().ok_or_else(|| out_of_range("Ci", i, self.ci.len()))
    }

    /// Write an integer register
    pub fn write_ci(&mut self, i: usize, value: i64) -> Result<(), EngineError> {
        let len = self.ci.len();
        *self.ci.get_mut(i).ok_or_else(|| out_of_range("Ci", i, len))? = value;
        Ok(())
    }

    /// The secret arithmetic bank as a slice
    pub fn sp(&self) -> &[Share<T>] {
        &self.sp
    }

    /// The secret arithmetic bank, mutably
    pub fn sp_mut(&mut self) -> &mut [Share<T>] {
        &mut self.sp
    }

    /// The clear arithmetic bank, mutably
    pub fn cp_mut(&mut self) -> &mut [T] {
        &mut self.cp
    }

    /// The secret binary bank as a slice
    pub fn s2(&self) -> &[Share<B>] {
        &self.s2
    }

    /// The secret binary bank, mutably
    pub fn s2_mut(&mut self) -> &mut [Share<B>] {
        &mut self.s2
    }

    /// The clear binary bank, mutably
    pub fn c2_mut(&mut self) -> &mut [B] {
        &mut self.c2
    }
}

// ---------------------
// | Gather & Scatter |
// ---------------------
//
// A register list addresses the banks with vectorized semantics: with a
// batch width of `size`, each listed register is the base of a run of `size`
// consecutive registers.

/// Gather shares from a bank by register list
pub(crate) fn gather_shares<X: FieldElement>(
    bank: &[Share<X>],
    regs: &[usize],
    size: usize,
) -> Result<Vec<Share<X>>, EngineError> {
    let mut out = Vec::with_capacity(regs.len() * size);
    for &reg in regs {
        let run = bank
            .get(reg..reg + size)
            .ok_or_else(|| out_of_range("secret", reg + size - 1, bank.len()))?;
        out.extend_from_slice(run);
    }

    Ok(out)
}

/// Scatter shares back into a bank by the same indexing as the gather
pub(crate) fn scatter_shares<X: FieldElement>(
    bank: &mut [Share<X>],
    regs: &[usize],
    shares: &[Share<X>],
    size: usize,
) -> Result<(), EngineError> {
    if shares.len() != regs.len() * size {
        return Err(EngineError::BadOpcodeShape(format!(
            "scatter of {} shares into {} registers of width {size}",
            shares.len(),
            regs.len()
        )));
    }

    let len = bank.len();
    for (chunk, &reg) in shares.chunks_exact(size).zip(regs) {
        bank.get_mut(reg..reg + size)
            .ok_or_else(|| out_of_range("secret", reg + size - 1, len))?
            .copy_from_slice(chunk);
    }

    Ok(())
}

/// Scatter clear values into a bank by the same indexing as the gather
pub(crate) fn scatter_clears<X: FieldElement>(
    bank: &mut [X],
    regs: &[usize],
    values: &[X],
    size: usize,
) -> Result<(), EngineError> {
    if values.len() != regs.len() * size {
        return Err(EngineError::BadOpcodeShape(format!(
            "scatter of {} clears into {} registers of width {size}",
            values.len(),
            regs.len()
        )));
    }

    let len = bank.len();
    for (chunk, &reg) in values.chunks_exact(size).zip(regs) {
        bank.get_mut(reg..reg + size)
            .ok_or_else(|| out_of_range("clear", reg + size - 1, len))?
            .copy_from_slice(chunk);
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use super::{gather_shares, scatter_clears, RegisterFile};
    use crate::{
        algebra::{Bit, Ring64, Share},
        program::RegisterCounts,
    };

    /// Banks take their sizes from the program header and zero on reset
    #[test]
    fn test_reset_sizes_banks() {
        let mut regs: RegisterFile<Ring64, Bit> = RegisterFile::new();
        regs.reset(&RegisterCounts { arithmetic: 4, binary: 2, integer: 3 });

        regs.write_cp(3, Ring64(9)).unwrap();
        assert_eq!(regs.read_cp(3).unwrap(), Ring64(9));
        assert!(regs.read_cp(4).is_err());
        assert!(regs.write_s2(2, Share::default()).is_err());
        assert_eq!(regs.read_ci(2).unwrap(), 0);

        // A further reset rezeroes everything
        regs.reset(&RegisterCounts { arithmetic: 4, binary: 2, integer: 3 });
        assert_eq!(regs.read_cp(3).unwrap(), Ring64(0));
    }

    /// Vectorized gather reads a run of `size` registers per list entry
    #[test]
    fn test_vectorized_gather() {
        let bank: Vec<Share<Ring64>> =
            (0..6).map(|i| Share::new(Ring64(i), Ring64(i * 10))).collect();

        let gathered = gather_shares(&bank, &[0, 4], 2).unwrap();
        assert_eq!(gathered, vec![bank[0], bank[1], bank[4], bank[5]]);

        assert!(gather_shares(&bank, &[5], 2).is_err());
    }

    /// Scatter mirrors the gather indexing and checks its operand shape
    #[test]
    fn test_vectorized_scatter() {
        let mut bank = vec![Ring64(0); 6];
        scatter_clears(&mut bank, &[1, 3], &[Ring64(7), Ring64(8), Ring64(9), Ring64(10)], 2)
            .unwrap();
        assert_eq!(bank, vec![Ring64(0), Ring64(7), Ring64(8), Ring64(9), Ring64(10), Ring64(0)]);

        assert!(scatter_clears(&mut bank, &[1], &[Ring64(1)], 2).is_err());
    }
}
