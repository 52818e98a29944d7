//! Portable marshaling of elements and shares into the flat byte buffers
//! that cross the extension boundary
//!
//! An element occupies `word64_size * 8` bytes: 64-bit words ordered most
//! significant first, each word encoded little-endian, no spare bits. The
//! convention is fixed so that any backend, in any language, can reassemble
//! values with plain shifts and adds.

use num_bigint::BigUint;
use serde::{Deserialize, Serialize};

use crate::{
    algebra::{FieldElement, Share},
    error::EngineError,
    ext::ExtBuffer,
};

/// Bytes per marshaled word
pub const WORD_BYTES: usize = 8;

/// The number of 64-bit words needed for an element of `bits` bits
#[inline]
pub const fn word64_size(bits: usize) -> usize {
    ((bits + 7) / 8 + 7) / 8
}

/// The number of 64-bit words per element of `T`
#[inline]
pub fn element_words<T: FieldElement>() -> usize {
    word64_size(T::bit_size())
}

/// How a share maps onto buffer words
///
/// The additive layout carries only the value component; the engine attaches
/// MAC shares on import using its own key share. The replicated layout
/// carries both components back to back, value at offset zero.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShareLayout {
    /// One component per share crosses the boundary
    Additive,
    /// Both components cross the boundary
    Replicated,
}

impl ShareLayout {
    /// Bytes per marshaled share for an element of `words` words
    pub fn share_bytes(&self, words: usize) -> usize {
        match self {
            ShareLayout::Additive => words * WORD_BYTES,
            ShareLayout::Replicated => 2 * words * WORD_BYTES,
        }
    }
}

/// Write an unsigned value into `out`, whose length fixes the word count
pub fn export_words(value: &BigUint, out: &mut [u8]) {
    let words = out.len() / WORD_BYTES;
    let mut digits: Vec<u64> = value.iter_u64_digits().collect();
    digits.resize(words, 0);

    for (chunk, digit) in out.chunks_exact_mut(WORD_BYTES).zip(digits.iter().rev()) {
        chunk.copy_from_slice(&digit.to_le_bytes());
    }
}

/// Reassemble an unsigned value from its marshaled words
pub fn import_words(bytes: &[u8]) -> BigUint {
    let mut le_bytes = Vec::with_capacity(bytes.len());
    for chunk in bytes.chunks_exact(WORD_BYTES).rev() {
        le_bytes.extend_from_slice(chunk);
    }

    BigUint::from_bytes_le(&le_bytes)
}

/// Write one element into `out`, whose length fixes the word count
pub fn export_element<T: FieldElement>(value: &T, out: &mut [u8]) {
    export_words(&value.to_biguint(), out);
}

/// Reassemble one element from its marshaled words
pub fn import_element<T: FieldElement>(bytes: &[u8]) -> T {
    T::from_biguint(&import_words(bytes))
}

/// Check that a buffer's descriptor fields match what the caller is about to
/// marshal; a mismatch is a programming error surfaced as a malformed opcode
fn check_shape(buf: &ExtBuffer, count: usize, size: usize) -> Result<(), EngineError> {
    if buf.count() != count || buf.size() != size {
        return Err(EngineError::BadOpcodeShape(format!(
            "buffer descriptor ({}, {}) does not match marshaled shape ({count}, {size})",
            buf.count(),
            buf.size(),
        )));
    }

    Ok(())
}

/// Marshal a share vector into an extension buffer
pub fn export_shares<T: FieldElement>(
    shares: &[Share<T>],
    buf: &mut ExtBuffer,
    layout: ShareLayout,
) -> Result<(), EngineError> {
    let words = element_words::<T>();
    let component = words * WORD_BYTES;
    check_shape(buf, shares.len(), layout.share_bytes(words))?;

    for (i, share) in shares.iter().enumerate() {
        let slot = buf.element_mut(i);
        slot.fill(0);
        export_element(&share.share(), &mut slot[..component]);
        if layout == ShareLayout::Replicated {
            export_element(&share.mac(), &mut slot[component..]);
        }
    }

    Ok(())
}

/// Unmarshal a share vector from an extension buffer
///
/// Under the additive layout the MAC component does not cross the boundary;
/// it is reattached here from the caller's key share. This is the single
/// import path for every producer of shares (inputs, products, skews).
pub fn import_shares<T: FieldElement>(
    buf: &ExtBuffer,
    alpha_share: T,
    layout: ShareLayout,
) -> Result<Vec<Share<T>>, EngineError> {
    let words = element_words::<T>();
    let component = words * WORD_BYTES;
    check_shape(buf, buf.count(), layout.share_bytes(words))?;

    let mut shares = Vec::with_capacity(buf.count());
    for i in 0..buf.count() {
        let slot = buf.element(i);
        let value: T = import_element(&slot[..component]);
        let mac = match layout {
            ShareLayout::Additive => alpha_share * value,
            ShareLayout::Replicated => import_element(&slot[component..]),
        };

        shares.push(Share::new(value, mac));
    }

    Ok(shares)
}

/// Marshal a clear vector into an extension buffer
pub fn export_clears<T: FieldElement>(
    clears: &[T],
    buf: &mut ExtBuffer,
) -> Result<(), EngineError> {
    let component = element_words::<T>() * WORD_BYTES;
    check_shape(buf, clears.len(), component)?;

    for (i, value) in clears.iter().enumerate() {
        export_element(value, buf.element_mut(i));
    }

    Ok(())
}

/// Unmarshal a clear vector from an extension buffer
pub fn import_clears<T: FieldElement>(buf: &ExtBuffer) -> Result<Vec<T>, EngineError> {
    let component = element_words::<T>() * WORD_BYTES;
    check_shape(buf, buf.count(), component)?;

    Ok((0..buf.count()).map(|i| import_element(buf.element(i))).collect())
}

#[cfg(test)]
mod test {
    use rand::thread_rng;

    use super::{
        element_words, export_element, export_shares, import_element, import_shares, word64_size,
        ShareLayout, WORD_BYTES,
    };
    use crate::{
        algebra::{FieldElement, Fp, Ring64, Share},
        ext::ExtBuffer,
    };

    type TestFp = Fp<ark_bn254::Fr>;

    /// Word counts follow the double ceiling of the bit length
    #[test]
    fn test_word64_size() {
        assert_eq!(word64_size(1), 1);
        assert_eq!(word64_size(64), 1);
        assert_eq!(word64_size(65), 2);
        assert_eq!(word64_size(254), 4);
    }

    /// Known two-word value: the most significant word is stored first, each
    /// word little-endian
    #[test]
    fn test_word_order() {
        let value =
            TestFp::from_biguint(&((num_bigint::BigUint::from(0xAABBu64) << 64usize) + 0x1122u64));
        let mut out = vec![0u8; element_words::<TestFp>() * WORD_BYTES];
        export_element(&value, &mut out);

        let words = element_words::<TestFp>();
        assert_eq!(&out[(words - 2) * 8..(words - 1) * 8], &0xAABBu64.to_le_bytes()[..]);
        assert_eq!(&out[(words - 1) * 8..], &0x1122u64.to_le_bytes()[..]);
        assert_eq!(import_element::<TestFp>(&out), value);
    }

    /// Element round trip for both flavors
    #[test]
    fn test_element_round_trip() {
        let mut rng = thread_rng();

        let x = TestFp::random(&mut rng);
        let mut out = vec![0u8; element_words::<TestFp>() * WORD_BYTES];
        export_element(&x, &mut out);
        assert_eq!(import_element::<TestFp>(&out), x);

        let r = Ring64::random(&mut rng);
        let mut out = vec![0u8; WORD_BYTES];
        export_element(&r, &mut out);
        assert_eq!(import_element::<Ring64>(&out), r);
    }

    /// Share vector round trip under the replicated layout, where both
    /// components cross
    #[test]
    fn test_share_round_trip_replicated() {
        let mut rng = thread_rng();
        let shares: Vec<Share<Ring64>> = (0..10)
            .map(|_| Share::new(Ring64::random(&mut rng), Ring64::random(&mut rng)))
            .collect();

        let layout = ShareLayout::Replicated;
        let mut buf = ExtBuffer::new();
        buf.ensure_capacity(shares.len(), layout.share_bytes(1));
        export_shares(&shares, &mut buf, layout).unwrap();

        let back = import_shares::<Ring64>(&buf, Ring64(0), layout).unwrap();
        assert_eq!(back, shares);
    }

    /// Under the additive layout only the value crosses; the MAC is
    /// reattached from the key share
    #[test]
    fn test_share_round_trip_additive() {
        let mut rng = thread_rng();
        let alpha = TestFp::from_u64(9);
        let values: Vec<TestFp> = (0..10).map(|_| TestFp::random(&mut rng)).collect();
        let shares: Vec<Share<TestFp>> =
            values.iter().map(|v| Share::new(*v, alpha * v)).collect();

        let layout = ShareLayout::Additive;
        let words = element_words::<TestFp>();
        let mut buf = ExtBuffer::new();
        buf.ensure_capacity(shares.len(), layout.share_bytes(words));
        export_shares(&shares, &mut buf, layout).unwrap();

        let back = import_shares::<TestFp>(&buf, alpha, layout).unwrap();
        assert_eq!(back, shares);
    }
}
