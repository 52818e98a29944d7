//! The program header the engine sizes its register file from, and the
//! operand tags shared by the socket opcodes

use serde::{Deserialize, Serialize};

/// Register bank sizes declared by a compiled program
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterCounts {
    /// Clear and secret registers in the arithmetic domain
    pub arithmetic: usize,
    /// Clear and secret registers in the binary domain
    pub binary: usize,
    /// Integer registers
    pub integer: usize,
}

/// The header of a compiled program
///
/// Bytecode loading itself lives outside the engine; the processor only
/// needs the register footprint to reset against.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramHeader {
    /// The program name, used in output file naming and diagnostics
    pub name: String,
    /// The declared register footprint
    pub registers: RegisterCounts,
}

/// The register bank an operand addresses
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RegType {
    /// The arithmetic field/ring banks
    Arithmetic,
    /// The binary banks
    Binary,
    /// The 64-bit integer bank
    Integer,
}

/// Whether an operand is secret shared or public
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SecrecyType {
    /// A secret-shared register
    Secret,
    /// A clear register
    Clear,
}
