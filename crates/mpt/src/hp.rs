//! Hex-prefix (HP) helpers and nibble utilities for trie paths.
use core::{cmp, iter};
use smallvec::SmallVec;

use crate::Error;

/// Compact vector for nibble sequences used in key traversal.
/// Keys up to 32 bytes (64 nibbles) stay off the heap.
pub(crate) type Nibbles = SmallVec<[u8; 64]>;

// Hex-prefix (HP) encoding flags for trie paths
pub(crate) const HP_FLAG_ODD: u8 = 0x10; // path has odd number of nibbles; low nibble of first byte is data
pub(crate) const HP_FLAG_LEAF: u8 = 0x20; // node is a leaf (vs extension)

/// Returns the length of the common prefix (in nibbles) between two nibble slices.
#[inline]
pub(crate) fn lcp(a: &[u8], b: &[u8]) -> usize {
    for (i, (a, b)) in iter::zip(a, b).enumerate() {
        if a != b {
            return i;
        }
    }
    cmp::min(a.len(), b.len())
}

/// Converts a byte slice into a vector of nibbles, high nibble first.
#[inline]
pub(crate) fn to_nibs(slice: &[u8]) -> Nibbles {
    let mut result = SmallVec::with_capacity(2 * slice.len());
    for byte in slice {
        result.push(byte >> 4);
        result.push(byte & 0x0f);
    }
    result
}

/// Packs an even-length nibble sequence back into bytes.
///
/// Full keys are always an even number of nibbles because they come from
/// byte strings; an odd count here means the tree is malformed.
#[inline]
pub(crate) fn nibs_to_bytes(nibs: &[u8]) -> Result<Vec<u8>, Error> {
    if nibs.len() % 2 != 0 {
        return Err(Error::Corrupted("key path has odd nibble count"));
    }
    let mut out = Vec::with_capacity(nibs.len() / 2);
    for pair in nibs.chunks_exact(2) {
        out.push((pair[0] << 4) | pair[1]);
    }
    Ok(out)
}

/// Encodes nibbles into the standard hex-prefix format.
#[inline]
pub(crate) fn to_encoded_path(nibs: &[u8], is_leaf: bool) -> SmallVec<[u8; 36]> {
    let is_odd = nibs.len() % 2 != 0;
    // Max path is 64 nibs (32 bytes) + 1 prefix byte = 33; 36 is the
    // nearest inline capacity.
    let mut encoded = SmallVec::with_capacity(1 + nibs.len() / 2);

    let prefix = if is_leaf { HP_FLAG_LEAF } else { 0x00 };
    if is_odd {
        encoded.push(prefix | HP_FLAG_ODD | nibs[0]);
        for i in (1..nibs.len()).step_by(2) {
            encoded.push((nibs[i] << 4) | nibs[i + 1]);
        }
    } else {
        encoded.push(prefix);
        for i in (0..nibs.len()).step_by(2) {
            encoded.push((nibs[i] << 4) | nibs[i + 1]);
        }
    }
    encoded
}

/// Decodes a compact hex-prefix path into `(is_leaf, nibbles)`.
#[inline]
pub(crate) fn decode_path(encoded_path: &[u8]) -> Result<(bool, Nibbles), Error> {
    let Some((&first, rest)) = encoded_path.split_first() else {
        return Err(Error::Corrupted("empty hex-prefix path"));
    };
    if first & !(HP_FLAG_LEAF | HP_FLAG_ODD | 0x0f) != 0 {
        return Err(Error::Corrupted("unknown hex-prefix flag"));
    }
    let is_leaf = first & HP_FLAG_LEAF != 0;
    let is_odd = first & HP_FLAG_ODD != 0;
    if !is_odd && first & 0x0f != 0 {
        return Err(Error::Corrupted("stray nibble in even hex-prefix tag"));
    }

    let mut nibs = SmallVec::with_capacity(2 * rest.len() + 1);
    if is_odd {
        nibs.push(first & 0x0f);
    }
    for &byte in rest {
        nibs.push(byte >> 4);
        nibs.push(byte & 0x0f);
    }
    Ok((is_leaf, nibs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_encoded_path() {
        // extension node with an even path length
        assert_eq!(to_encoded_path(&[0x0a, 0x0b, 0x0c, 0x0d], false).as_slice(), [0x00, 0xab, 0xcd]);
        // extension node with an odd path length
        assert_eq!(to_encoded_path(&[0x0a, 0x0b, 0x0c], false).as_slice(), [0x1a, 0xbc]);
        // leaf node with an even path length
        assert_eq!(to_encoded_path(&[0x0a, 0x0b, 0x0c, 0x0d], true).as_slice(), [0x20, 0xab, 0xcd]);
        // leaf node with an odd path length
        assert_eq!(to_encoded_path(&[0x0a, 0x0b, 0x0c], true).as_slice(), [0x3a, 0xbc]);
    }

    #[test]
    fn test_to_encoded_path_max_key() {
        // a full 32-byte key expands to 64 nibbles and 33 encoded bytes
        let nibs = to_nibs(&[0xab; 32]);
        let encoded = to_encoded_path(&nibs, true);
        assert_eq!(encoded.len(), 33);
        assert_eq!(encoded[0], 0x20);
        let (leaf, decoded) = decode_path(&encoded).unwrap();
        assert!(leaf);
        assert_eq!(decoded.as_slice(), nibs.as_slice());
    }

    #[test]
    fn test_decode_path_roundtrip() {
        for nibs in [&[][..], &[0x1][..], &[0x1, 0x2][..], &[0xf, 0x0, 0xa][..]] {
            for is_leaf in [false, true] {
                let encoded = to_encoded_path(nibs, is_leaf);
                let (leaf, decoded) = decode_path(&encoded).unwrap();
                assert_eq!(leaf, is_leaf);
                assert_eq!(decoded.as_slice(), nibs);
            }
        }
    }

    #[test]
    fn test_decode_path_rejects_garbage() {
        assert!(decode_path(&[]).is_err());
        // high bits outside the flag space
        assert!(decode_path(&[0x40]).is_err());
        // even tag carrying a data nibble
        assert!(decode_path(&[0x21, 0xab]).is_err());
    }

    #[test]
    fn test_nibs_to_bytes() {
        assert_eq!(nibs_to_bytes(&[]).unwrap(), Vec::<u8>::new());
        assert_eq!(nibs_to_bytes(&[0x6, 0x4, 0x6, 0xf]).unwrap(), b"do".to_vec());
        assert!(nibs_to_bytes(&[0x6]).is_err());
    }

    #[test]
    fn test_to_nibs() {
        assert_eq!(to_nibs(b"do").as_slice(), [0x6, 0x4, 0x6, 0xf]);
        assert_eq!(to_nibs(&[]).as_slice(), [] as [u8; 0]);
    }

    #[test]
    fn test_lcp() {
        let cases = [
            (vec![], vec![], 0),
            (vec![0xa], vec![0xa], 1),
            (vec![0xa, 0xb], vec![0xa, 0xc], 1),
            (vec![0xa, 0xb], vec![0xa, 0xb], 2),
            (vec![0xa, 0xb], vec![0xa, 0xb, 0xc], 2),
            (vec![0xa, 0xb, 0xc], vec![0xa, 0xb, 0xc, 0xd], 3),
        ];
        for (a, b, cpl) in cases {
            assert_eq!(lcp(&a, &b), cpl)
        }
    }
}
