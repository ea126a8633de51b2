//! Byte-to-character alphabet for byte-level BPE.
//!
//! Byte-level models (GPT-2, RoBERTa, Llama 3, DeepSeek) segment the UTF-8
//! bytes of the input rather than its characters. To keep vocabulary entries
//! printable strings, every byte value is represented by one visible Unicode
//! character:
//!
//! - `!`..=`~`, `¡`..=`¬` and `®`..=`ÿ` stand for their own code point;
//! - the remaining 68 bytes (controls, space, DEL, NBSP, soft hyphen) take
//!   the code points U+0100, U+0101, ... in byte order.
//!
//! So a space is `Ġ` (U+0120) and a newline is `Ċ` (U+010A). The mapping is a
//! bijection, which is what lets [`byte_level_decode`] recover raw bytes from
//! decoded tokens.

use rustc_hash::FxHashMap;
use std::sync::LazyLock;

/// Code points that represent themselves in the alphabet.
#[inline]
const fn is_self_mapped(b: u8) -> bool {
    matches!(b, b'!'..=b'~' | 0xA1..=0xAC | 0xAE..=0xFF)
}

static BYTE_TO_CHAR: LazyLock<[char; 256]> = LazyLock::new(|| {
    let mut table = ['\0'; 256];
    let mut shifted = 0u32;
    for b in 0..=255u8 {
        table[b as usize] = if is_self_mapped(b) {
            char::from(b)
        } else {
            shifted += 1;
            // 0x100 + n never lands in the surrogate range
            char::from_u32(0xFF + shifted).unwrap_or(char::REPLACEMENT_CHARACTER)
        };
    }
    table
});

static CHAR_TO_BYTE: LazyLock<FxHashMap<char, u8>> = LazyLock::new(|| {
    (0..=255u8)
        .map(|b| (BYTE_TO_CHAR[b as usize], b))
        .collect()
});

/// Alphabet character standing for `byte`.
#[inline]
pub fn byte_to_char(byte: u8) -> char {
    BYTE_TO_CHAR[byte as usize]
}

/// Byte represented by an alphabet character, if `ch` belongs to the alphabet.
#[inline]
pub fn char_to_byte(ch: char) -> Option<u8> {
    CHAR_TO_BYTE.get(&ch).copied()
}

/// All 256 alphabet characters, in byte order.
pub fn alphabet() -> impl Iterator<Item = char> {
    BYTE_TO_CHAR.iter().copied()
}

/// Spell raw bytes in the byte-level alphabet.
///
/// ```
/// use subtok::core::byte_level::byte_level_encode;
///
/// assert_eq!(byte_level_encode(b" hello"), "\u{120}hello");
/// ```
#[inline]
pub fn byte_level_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| byte_to_char(b)).collect()
}

/// Recover raw bytes from alphabet text.
///
/// Returns `None` when `text` contains a character outside the alphabet.
#[inline]
pub fn byte_level_decode(text: &str) -> Option<Vec<u8>> {
    text.chars().map(char_to_byte).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustc_hash::FxHashSet;

    #[test]
    fn test_alphabet_is_a_bijection() {
        let distinct: FxHashSet<char> = alphabet().collect();
        assert_eq!(distinct.len(), 256);
        for b in 0..=255u8 {
            assert_eq!(char_to_byte(byte_to_char(b)), Some(b));
        }
    }

    #[test]
    fn test_well_known_characters() {
        assert_eq!(byte_to_char(b' '), '\u{120}');
        assert_eq!(byte_to_char(b'\n'), '\u{10A}');
        assert_eq!(byte_to_char(0), '\u{100}');
        assert_eq!(byte_to_char(b'A'), 'A');
        assert_eq!(byte_to_char(0xE9), 'é');
    }

    #[test]
    fn test_multibyte_text_roundtrip() {
        let original = "Grüße, 世界 🦀";
        let spelled = byte_level_encode(original.as_bytes());
        assert!(spelled.chars().all(|c| char_to_byte(c).is_some()));
        let bytes = byte_level_decode(&spelled).unwrap();
        assert_eq!(String::from_utf8(bytes).unwrap(), original);
    }

    #[test]
    fn test_decode_rejects_foreign_characters() {
        assert_eq!(byte_level_decode("a b"), None);
        assert_eq!(byte_level_decode("\u{120}b"), Some(b" b".to_vec()));
    }
}
