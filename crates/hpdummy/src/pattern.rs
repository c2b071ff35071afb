//! Deterministic filler content.

/// Alphabet cycled through every pooled buffer.
pub const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Produces exactly `len` bytes by repeating `alphabet`.
///
/// An empty alphabet yields an empty vector regardless of `len`.
///
/// # Example
///
/// ```
/// use hpdummy::pattern::generate;
///
/// assert_eq!(generate(5, b"AB"), b"ABABA");
/// ```
pub fn generate(len: usize, alphabet: &[u8]) -> Vec<u8> {
    if alphabet.is_empty() {
        return Vec::new();
    }

    let mut out = Vec::with_capacity(len);
    while out.len() < len {
        let take = alphabet.len().min(len - out.len());
        out.extend_from_slice(&alphabet[..take]);
    }
    out
}

/// The byte found at `offset` of a buffer filled with [`ALPHABET`].
pub const fn byte_at(offset: usize) -> u8 {
    ALPHABET[offset % ALPHABET.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_exact_length() {
        for len in [0, 1, 35, 36, 37, 1000, 65_536] {
            assert_eq!(generate(len, ALPHABET).len(), len);
        }
    }

    #[test]
    fn repeats_alphabet() {
        let out = generate(80, ALPHABET);
        assert_eq!(&out[..36], ALPHABET);
        assert_eq!(&out[36..72], ALPHABET);
        assert_eq!(&out[72..], b"ABCDEFGH");
        for (i, b) in out.iter().enumerate() {
            assert_eq!(*b, byte_at(i));
        }
    }

    #[test]
    fn empty_alphabet_yields_nothing() {
        assert!(generate(16, b"").is_empty());
    }

    #[test]
    fn is_deterministic() {
        assert_eq!(generate(4097, ALPHABET), generate(4097, ALPHABET));
    }
}
