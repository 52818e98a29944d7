//! The modular flavor: elements of a prime field `F_p`, held in Montgomery
//! form by the underlying arkworks backend

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    iter::Sum,
    ops::{Add, AddAssign, Mul, MulAssign, Neg, Sub, SubAssign},
};

use ark_ff::{Field, PrimeField};
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use ark_std::UniformRand;
use num_bigint::BigUint;
use num_traits::{One, Zero};
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};

use crate::{
    algebra::{
        field::{n_bytes, FieldElement},
        macros::impl_borrow_variants,
    },
    error::EngineError,
};

// --------------
// | Definition |
// --------------

/// A prime field element
///
/// A thin wrapper over the arkworks representation that pins down the
/// engine's packed encoding and lets us implement foreign traits
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Fp<F: PrimeField>(pub(crate) F);

impl<F: PrimeField> Fp<F> {
    /// Construct from the inner representation
    pub fn new(inner: F) -> Self {
        Fp(inner)
    }

    /// The inner representation
    pub fn inner(&self) -> F {
        self.0
    }
}

impl<F: PrimeField> FieldElement for Fp<F> {
    fn byte_size() -> usize {
        n_bytes(Self::bit_size())
    }

    fn bit_size() -> usize {
        F::MODULUS_BIT_SIZE as usize
    }

    fn from_u64(val: u64) -> Self {
        Fp(F::from(val))
    }

    fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Fp(F::rand(rng))
    }

    // Uniform over byte strings rather than residues; the reduction bias is
    // acceptable for blinding only
    fn almost_random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut bytes = vec![0u8; Self::byte_size()];
        rng.fill_bytes(&mut bytes);
        Fp(F::from_be_bytes_mod_order(&bytes))
    }

    fn square(&self) -> Self {
        Fp(self.0.square())
    }

    fn inverse(&self) -> Option<Self> {
        self.0.inverse().map(Fp)
    }

    fn pow(&self, exp: u64) -> Self {
        Fp(self.0.pow([exp]))
    }

    fn to_biguint(&self) -> BigUint {
        self.0.into()
    }

    fn from_biguint(val: &BigUint) -> Self {
        Fp(F::from_le_bytes_mod_order(&val.to_bytes_le()))
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = self.to_biguint().to_bytes_be();
        let mut padded = vec![0u8; Self::byte_size() - bytes.len()];
        padded.append(&mut bytes);

        padded
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, EngineError> {
        if bytes.len() != Self::byte_size() {
            return Err(EngineError::BadOpcodeShape(format!(
                "packed field element must be {} bytes, got {}",
                Self::byte_size(),
                bytes.len()
            )));
        }

        Ok(Fp(F::from_be_bytes_mod_order(bytes)))
    }
}

// --------------
// | Arithmetic |
// --------------

impl<F: PrimeField> Add<&Fp<F>> for &Fp<F> {
    type Output = Fp<F>;

    fn add(self, rhs: &Fp<F>) -> Self::Output {
        Fp(self.0 + rhs.0)
    }
}
impl_borrow_variants!(Fp<F>, Add, add, +, Fp<F>, F: PrimeField);

impl<F: PrimeField> Sub<&Fp<F>> for &Fp<F> {
    type Output = Fp<F>;

    fn sub(self, rhs: &Fp<F>) -> Self::Output {
        Fp(self.0 - rhs.0)
    }
}
impl_borrow_variants!(Fp<F>, Sub, sub, -, Fp<F>, F: PrimeField);

impl<F: PrimeField> Mul<&Fp<F>> for &Fp<F> {
    type Output = Fp<F>;

    fn mul(self, rhs: &Fp<F>) -> Self::Output {
        Fp(self.0 * rhs.0)
    }
}
impl_borrow_variants!(Fp<F>, Mul, mul, *, Fp<F>, F: PrimeField);

impl<F: PrimeField> Neg for &Fp<F> {
    type Output = Fp<F>;

    fn neg(self) -> Self::Output {
        Fp(-self.0)
    }
}
impl_borrow_variants!(Fp<F>, Neg, neg, -, F: PrimeField);

impl<F: PrimeField> AddAssign for Fp<F> {
    fn add_assign(&mut self, rhs: Fp<F>) {
        *self = *self + rhs;
    }
}

impl<F: PrimeField> SubAssign for Fp<F> {
    fn sub_assign(&mut self, rhs: Fp<F>) {
        *self = *self - rhs;
    }
}

impl<F: PrimeField> MulAssign for Fp<F> {
    fn mul_assign(&mut self, rhs: Fp<F>) {
        *self = *self * rhs;
    }
}

impl<F: PrimeField> Zero for Fp<F> {
    fn zero() -> Self {
        Fp(F::zero())
    }

    fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
}

impl<F: PrimeField> One for Fp<F> {
    fn one() -> Self {
        Fp(F::one())
    }
}

impl<F: PrimeField> Sum for Fp<F> {
    fn sum<I: Iterator<Item = Fp<F>>>(iter: I) -> Self {
        iter.fold(Fp(F::zero()), |acc, x| acc + x)
    }
}

// ---------------
// | Conversions |
// ---------------

impl<F: PrimeField> From<u64> for Fp<F> {
    fn from(value: u64) -> Self {
        Self::from_u64(value)
    }
}

impl<F: PrimeField> From<bool> for Fp<F> {
    fn from(value: bool) -> Self {
        Fp(F::from(value))
    }
}

impl<F: PrimeField> Display for Fp<F> {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.to_biguint())
    }
}

impl<F: PrimeField> Serialize for Fp<F> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut bytes = Vec::with_capacity(Self::byte_size());
        self.0.serialize_uncompressed(&mut bytes).map_err(serde::ser::Error::custom)?;
        serializer.serialize_bytes(&bytes)
    }
}

impl<'de, F: PrimeField> Deserialize<'de> for Fp<F> {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bytes = <Vec<u8>>::deserialize(deserializer)?;
        let inner =
            F::deserialize_uncompressed(bytes.as_slice()).map_err(serde::de::Error::custom)?;
        Ok(Fp(inner))
    }
}

#[cfg(test)]
mod test {
    use num_traits::Zero;
    use rand::thread_rng;

    use super::Fp;
    use crate::algebra::FieldElement;

    /// The field used throughout the unit tests
    type TestFp = Fp<ark_bn254::Fr>;

    /// The packed encoding inverts itself for random elements
    #[test]
    fn test_pack_round_trip() {
        let mut rng = thread_rng();
        for _ in 0..100 {
            let x = TestFp::random(&mut rng);
            let bytes = x.to_bytes();

            assert_eq!(bytes.len(), TestFp::byte_size());
            assert_eq!(TestFp::from_bytes(&bytes).unwrap(), x);
        }
    }

    /// Semantic equality: the same residue built two ways compares equal
    #[test]
    fn test_semantic_equality() {
        let mut rng = thread_rng();
        let x = TestFp::random(&mut rng);
        let rebuilt = TestFp::from_biguint(&x.to_biguint());

        assert_eq!(x, rebuilt);
    }

    /// Field laws on a random sample
    #[test]
    fn test_field_ops() {
        let mut rng = thread_rng();
        let x = TestFp::random(&mut rng);
        let y = TestFp::random(&mut rng);

        assert_eq!(x + y - y, x);
        assert_eq!(x * y.inverse().unwrap() * y, x);
        assert_eq!(x + (-x), TestFp::zero());
        assert_eq!(x.square(), x * x);
        assert_eq!(x.pow(3), x * x * x);
    }

    /// Bitwise operations agree with the big-integer domain
    #[test]
    fn test_bitwise_via_bigints() {
        let x = TestFp::from_u64(0b1100);
        let y = TestFp::from_u64(0b1010);

        assert_eq!(x.and(&y), TestFp::from_u64(0b1000));
        assert_eq!(x.or(&y), TestFp::from_u64(0b1110));
        assert_eq!(x.xor(&y), TestFp::from_u64(0b0110));
        assert_eq!(x.shl(2), TestFp::from_u64(0b110000));
        assert_eq!(x.shr(2), TestFp::from_u64(0b11));
    }

    /// Serde round trip mirrors the wire encoding
    #[test]
    fn test_serde_round_trip() {
        let mut rng = thread_rng();
        let x = TestFp::random(&mut rng);

        let bytes = serde_json::to_vec(&x).unwrap();
        let deserialized: TestFp = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(x, deserialized);
    }
}
