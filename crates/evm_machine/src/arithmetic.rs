//! 256-bit helpers behind the arithmetic opcodes.
//!
//! Every result is reduced modulo 2^256 by construction: the `wrapping_*`
//! operations of [`Word`] already implement the modular wrap, so no helper
//! needs a separate reduction step. Signed opcodes read a word as two's
//! complement through [`normalize`] and convert back before returning.

use ethnum::I256;

use crate::Word;

const WORD_BITS: u32 = 256;
const WORD_BYTES: usize = 32;
const SIGN_EXTEND_LIMIT: u32 = 31;

/// Two's-complement reading of `word`.
pub fn normalize(word: Word) -> I256 {
    word.as_i256()
}

pub fn from_bool(value: bool) -> Word {
    if value { Word::ONE } else { Word::ZERO }
}

/// Big-endian bytes zero-extended to a word. Only the last 32 bytes count.
pub fn from_be_slice(bytes: &[u8]) -> Word {
    let bytes = bytes
        .get(bytes.len().saturating_sub(WORD_BYTES)..)
        .unwrap_or(bytes);
    let mut buffer = [0u8; WORD_BYTES];
    if let Some(tail) = buffer.get_mut(WORD_BYTES.saturating_sub(bytes.len())..) {
        tail.copy_from_slice(bytes);
    }
    Word::from_be_bytes(buffer)
}

/// Unsigned division, zero when `b` is zero.
pub fn div(a: Word, b: Word) -> Word {
    a.checked_div(b).unwrap_or(Word::ZERO)
}

/// Unsigned remainder, zero when `b` is zero.
pub fn rem(a: Word, b: Word) -> Word {
    a.checked_rem(b).unwrap_or(Word::ZERO)
}

/// Signed division truncating toward zero. `MIN / -1` wraps back to `MIN`.
pub fn sdiv(a: Word, b: Word) -> Word {
    if b == Word::ZERO {
        return Word::ZERO;
    }
    normalize(a).wrapping_div(normalize(b)).as_u256()
}

/// Signed remainder taking the sign of the dividend.
pub fn smod(a: Word, b: Word) -> Word {
    if b == Word::ZERO {
        return Word::ZERO;
    }
    normalize(a).wrapping_rem(normalize(b)).as_u256()
}

/// `(a + b) mod c` where the sum is wrapped to 256 bits first.
pub fn addmod(a: Word, b: Word, c: Word) -> Word {
    rem(a.wrapping_add(b), c)
}

/// `(a * b) mod c` over the exact 512-bit product.
///
/// The product is never materialised: the multiplier is walked from its
/// highest set bit down, doubling and adding modulo `c`, which keeps every
/// intermediate below `c`.
pub fn mulmod(a: Word, b: Word, c: Word) -> Word {
    if c == Word::ZERO {
        return Word::ZERO;
    }
    let multiplicand = rem(a, c);
    let mut result = Word::ZERO;
    for bit in (0..significant_bits(b)).rev() {
        result = add_reduced(result, result, c);
        if is_bit_set(b, bit) {
            result = add_reduced(result, multiplicand, c);
        }
    }
    result
}

/// `base ^ exponent` modulo 2^256 by square and multiply.
pub fn exp(base: Word, exponent: Word) -> Word {
    let mut result = Word::ONE;
    for bit in (0..significant_bits(exponent)).rev() {
        result = result.wrapping_mul(result);
        if is_bit_set(exponent, bit) {
            result = result.wrapping_mul(base);
        }
    }
    result
}

/// Sign-extends `value` from byte `byte_index` (counted from the least
/// significant byte). Indices of 31 and above leave `value` unchanged.
pub fn signextend(byte_index: Word, value: Word) -> Word {
    if byte_index >= Word::from(SIGN_EXTEND_LIMIT) {
        return value;
    }
    let (_, low) = byte_index.into_words();
    // byte_index < 31, so the narrowing cannot lose bits.
    let sign_bit = (low as u32).wrapping_mul(8).wrapping_add(7);
    let mask = Word::ONE
        .wrapping_shl(sign_bit.wrapping_add(1))
        .wrapping_sub(Word::ONE);
    if is_bit_set(value, sign_bit) {
        value | !mask
    } else {
        value & mask
    }
}

// Both operands must already be below `modulus`.
fn add_reduced(x: Word, y: Word, modulus: Word) -> Word {
    let (sum, overflowed) = x.overflowing_add(y);
    if overflowed || sum >= modulus {
        sum.wrapping_sub(modulus)
    } else {
        sum
    }
}

fn significant_bits(word: Word) -> u32 {
    WORD_BITS.saturating_sub(word.leading_zeros())
}

fn is_bit_set(word: Word, bit: u32) -> bool {
    word.wrapping_shr(bit) & Word::ONE != Word::ZERO
}
