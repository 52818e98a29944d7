//! The element interface shared by the modular and ring flavors of the
//! arithmetic and binary register banks

use std::{
    fmt::{Debug, Display},
    iter::Sum,
    ops::{Add, AddAssign, Mul, MulAssign, Neg, Sub, SubAssign},
};

use num_bigint::BigUint;
use num_traits::{One, Zero};
use rand::{CryptoRng, RngCore};

use crate::error::EngineError;

/// An element of the algebraic structure the engine computes over
///
/// Two flavors satisfy this interface: a modular element of a prime field
/// held in Montgomery form, and a wrapping element of the ring `Z/2^n` (with
/// its single-bit specialization for the binary bank). Which flavor backs a
/// register bank is a startup-time choice; the engine itself is written
/// against this interface only.
pub trait FieldElement:
    'static
    + Copy
    + Clone
    + Debug
    + Display
    + Default
    + Eq
    + PartialEq
    + Send
    + Sync
    + Zero
    + One
    + Sum
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Neg<Output = Self>
    + AddAssign
    + SubAssign
    + MulAssign
{
    /// The number of bytes in the packed encoding of one element
    fn byte_size() -> usize;

    /// The bit length of the element set: `bitlen(p)` for the modular flavor,
    /// `n` for `Z/2^n`
    fn bit_size() -> usize;

    /// Embed a machine word
    fn from_u64(val: u64) -> Self;

    /// Sample uniformly from the element set
    fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self;

    /// A faster, possibly biased sampling used only for blinding values,
    /// never for protocol-critical randomness
    fn almost_random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Self::random(rng)
    }

    /// The square of the element
    fn square(&self) -> Self {
        *self * *self
    }

    /// The multiplicative inverse, where one exists
    fn inverse(&self) -> Option<Self>;

    /// Raise to a machine-word power
    fn pow(&self, exp: u64) -> Self;

    /// The canonical residue as an unsigned big integer
    ///
    /// Independent of any internal (e.g. Montgomery) representation
    fn to_biguint(&self) -> BigUint;

    /// Embed a big integer, reducing into the element set
    fn from_biguint(val: &BigUint) -> Self;

    /// The packed encoding: fixed-width, round-trip stable, independent of
    /// the internal representation
    fn to_bytes(&self) -> Vec<u8>;

    /// Invert [`FieldElement::to_bytes`]
    fn from_bytes(bytes: &[u8]) -> Result<Self, EngineError>;

    /// Parse a decimal string, as found in the per-party input files
    fn from_decimal_string(s: &str) -> Result<Self, EngineError> {
        let parsed = s
            .trim()
            .parse::<BigUint>()
            .map_err(|e| EngineError::BadOpcodeShape(format!("bad decimal input {s:?}: {e}")))?;
        Ok(Self::from_biguint(&parsed))
    }

    /// Bitwise AND through the big-integer domain
    fn and(&self, rhs: &Self) -> Self {
        Self::from_biguint(&(self.to_biguint() & rhs.to_biguint()))
    }

    /// Bitwise OR through the big-integer domain
    fn or(&self, rhs: &Self) -> Self {
        Self::from_biguint(&(self.to_biguint() | rhs.to_biguint()))
    }

    /// Bitwise XOR through the big-integer domain
    fn xor(&self, rhs: &Self) -> Self {
        Self::from_biguint(&(self.to_biguint() ^ rhs.to_biguint()))
    }

    /// Left shift through the big-integer domain
    fn shl(&self, n: usize) -> Self {
        Self::from_biguint(&(self.to_biguint() << n))
    }

    /// Right shift through the big-integer domain
    fn shr(&self, n: usize) -> Self {
        Self::from_biguint(&(self.to_biguint() >> n))
    }
}

/// The number of bytes needed to hold `bits` bits
#[inline]
pub const fn n_bytes(bits: usize) -> usize {
    (bits + 7) / 8
}
