//! The ring flavors: `Z/2^64` over a native machine word, and its single-bit
//! specialization used by the binary register bank

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    iter::Sum,
    ops::{Add, AddAssign, Mul, MulAssign, Neg, Sub, SubAssign},
};

use num_bigint::BigUint;
use num_traits::{One, Zero};
use rand::{CryptoRng, Rng, RngCore};
use serde::{Deserialize, Serialize};

use crate::{algebra::field::FieldElement, error::EngineError};

// ----------
// | Ring64 |
// ----------

/// An element of `Z/2^64` with wraparound arithmetic
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Ring64(
    /// The wrapped machine word
    pub u64,
);

impl Ring64 {
    /// The wrapped machine word
    pub fn word(&self) -> u64 {
        self.0
    }
}

impl FieldElement for Ring64 {
    fn byte_size() -> usize {
        std::mem::size_of::<u64>()
    }

    fn bit_size() -> usize {
        u64::BITS as usize
    }

    fn from_u64(val: u64) -> Self {
        Ring64(val)
    }

    fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Ring64(rng.next_u64())
    }

    /// Odd elements are units; their inverse is found by Newton iteration,
    /// which doubles the number of correct low bits each round
    fn inverse(&self) -> Option<Self> {
        if self.0 % 2 == 0 {
            return None;
        }

        let mut inv = self.0;
        for _ in 0..6 {
            inv = inv.wrapping_mul(2u64.wrapping_sub(self.0.wrapping_mul(inv)));
        }
        Some(Ring64(inv))
    }

    fn pow(&self, exp: u64) -> Self {
        let mut res = 1u64;
        let mut base = self.0;
        let mut exp = exp;
        while exp > 0 {
            if exp & 1 == 1 {
                res = res.wrapping_mul(base);
            }
            base = base.wrapping_mul(base);
            exp >>= 1;
        }
        Ring64(res)
    }

    fn to_biguint(&self) -> BigUint {
        BigUint::from(self.0)
    }

    fn from_biguint(val: &BigUint) -> Self {
        Ring64(val.iter_u64_digits().next().unwrap_or(0))
    }

    fn to_bytes(&self) -> Vec<u8> {
        self.0.to_be_bytes().to_vec()
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, EngineError> {
        let words: [u8; 8] = bytes.try_into().map_err(|_| {
            EngineError::BadOpcodeShape(format!(
                "packed ring element must be 8 bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Ring64(u64::from_be_bytes(words)))
    }
}

impl Add for Ring64 {
    type Output = Ring64;

    fn add(self, rhs: Ring64) -> Self::Output {
        Ring64(self.0.wrapping_add(rhs.0))
    }
}

impl Sub for Ring64 {
    type Output = Ring64;

    fn sub(self, rhs: Ring64) -> Self::Output {
        Ring64(self.0.wrapping_sub(rhs.0))
    }
}

impl Mul for Ring64 {
    type Output = Ring64;

    fn mul(self, rhs: Ring64) -> Self::Output {
        Ring64(self.0.wrapping_mul(rhs.0))
    }
}

impl Neg for Ring64 {
    type Output = Ring64;

    fn neg(self) -> Self::Output {
        Ring64(self.0.wrapping_neg())
    }
}

impl AddAssign for Ring64 {
    fn add_assign(&mut self, rhs: Ring64) {
        *self = *self + rhs;
    }
}

impl SubAssign for Ring64 {
    fn sub_assign(&mut self, rhs: Ring64) {
        *self = *self - rhs;
    }
}

impl MulAssign for Ring64 {
    fn mul_assign(&mut self, rhs: Ring64) {
        *self = *self * rhs;
    }
}

impl Zero for Ring64 {
    fn zero() -> Self {
        Ring64(0)
    }

    fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl One for Ring64 {
    fn one() -> Self {
        Ring64(1)
    }
}

impl Sum for Ring64 {
    fn sum<I: Iterator<Item = Ring64>>(iter: I) -> Self {
        iter.fold(Ring64(0), |acc, x| acc + x)
    }
}

impl From<u64> for Ring64 {
    fn from(value: u64) -> Self {
        Ring64(value)
    }
}

impl Display for Ring64 {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.0)
    }
}

// -------
// | Bit |
// -------

/// An element of `Z/2`: addition is xor, multiplication is and
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Bit(
    /// The wrapped bit
    pub bool,
);

impl FieldElement for Bit {
    fn byte_size() -> usize {
        1
    }

    fn bit_size() -> usize {
        1
    }

    fn from_u64(val: u64) -> Self {
        Bit(val & 1 == 1)
    }

    fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Bit(rng.gen())
    }

    fn inverse(&self) -> Option<Self> {
        self.0.then_some(Bit(true))
    }

    fn pow(&self, exp: u64) -> Self {
        if exp == 0 {
            Bit(true)
        } else {
            *self
        }
    }

    fn to_biguint(&self) -> BigUint {
        BigUint::from(self.0 as u64)
    }

    fn from_biguint(val: &BigUint) -> Self {
        Bit(val.bit(0))
    }

    fn to_bytes(&self) -> Vec<u8> {
        vec![self.0 as u8]
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, EngineError> {
        match bytes {
            [b] => Ok(Bit(b & 1 == 1)),
            _ => Err(EngineError::BadOpcodeShape(format!(
                "packed bit must be 1 byte, got {}",
                bytes.len()
            ))),
        }
    }
}

impl Add for Bit {
    type Output = Bit;

    fn add(self, rhs: Bit) -> Self::Output {
        Bit(self.0 ^ rhs.0)
    }
}

impl Sub for Bit {
    type Output = Bit;

    fn sub(self, rhs: Bit) -> Self::Output {
        self + rhs
    }
}

impl Mul for Bit {
    type Output = Bit;

    fn mul(self, rhs: Bit) -> Self::Output {
        Bit(self.0 & rhs.0)
    }
}

impl Neg for Bit {
    type Output = Bit;

    fn neg(self) -> Self::Output {
        self
    }
}

impl AddAssign for Bit {
    fn add_assign(&mut self, rhs: Bit) {
        *self = *self + rhs;
    }
}

impl SubAssign for Bit {
    fn sub_assign(&mut self, rhs: Bit) {
        *self = *self - rhs;
    }
}

impl MulAssign for Bit {
    fn mul_assign(&mut self, rhs: Bit) {
        *self = *self * rhs;
    }
}

impl Zero for Bit {
    fn zero() -> Self {
        Bit(false)
    }

    fn is_zero(&self) -> bool {
        !self.0
    }
}

impl One for Bit {
    fn one() -> Self {
        Bit(true)
    }
}

impl Sum for Bit {
    fn sum<I: Iterator<Item = Bit>>(iter: I) -> Self {
        iter.fold(Bit(false), |acc, x| acc + x)
    }
}

impl Display for Bit {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.0 as u8)
    }
}

#[cfg(test)]
mod test {
    use num_traits::{One, Zero};
    use rand::thread_rng;

    use super::{Bit, Ring64};
    use crate::algebra::FieldElement;

    /// Arithmetic wraps modulo 2^64
    #[test]
    fn test_ring_wraparound() {
        let x = Ring64(u64::MAX);
        assert_eq!(x + Ring64::one(), Ring64::zero());
        assert_eq!(Ring64::zero() - Ring64::one(), x);
        assert_eq!(Ring64(1 << 63) * Ring64(2), Ring64::zero());
    }

    /// Odd elements invert, even elements do not
    #[test]
    fn test_ring_inverse() {
        let mut rng = thread_rng();
        for _ in 0..100 {
            let x = Ring64::random(&mut rng);
            match x.inverse() {
                Some(inv) => assert_eq!(x * inv, Ring64::one()),
                None => assert_eq!(x.0 % 2, 0),
            }
        }
    }

    /// The packed encoding inverts itself
    #[test]
    fn test_ring_pack_round_trip() {
        let mut rng = thread_rng();
        let x = Ring64::random(&mut rng);
        assert_eq!(Ring64::from_bytes(&x.to_bytes()).unwrap(), x);

        let b = Bit::random(&mut rng);
        assert_eq!(Bit::from_bytes(&b.to_bytes()).unwrap(), b);
    }

    /// Bit arithmetic is xor/and
    #[test]
    fn test_bit_ops() {
        assert_eq!(Bit(true) + Bit(true), Bit::zero());
        assert_eq!(Bit(true) + Bit(false), Bit::one());
        assert_eq!(Bit(true) * Bit(true), Bit::one());
        assert_eq!(Bit(true) * Bit(false), Bit::zero());
        assert_eq!(-Bit(true), Bit(true));
    }
}
