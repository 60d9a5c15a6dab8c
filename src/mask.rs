//! WebSocket frame masking utilities
//!
//! Client-to-server payloads arrive XORed with a repeating 4-byte key. The
//! same operation masks and unmasks.

/// XOR `data` in place with the repeating 4-byte `mask`.
#[inline]
pub fn apply_mask(data: &mut [u8], mask: [u8; 4]) {
    if data.is_empty() {
        return;
    }

    // 8 bytes at a time
    let mask_u64 = u64::from_ne_bytes([
        mask[0], mask[1], mask[2], mask[3], mask[0], mask[1], mask[2], mask[3],
    ]);
    let mut chunks = data.chunks_exact_mut(8);
    for chunk in &mut chunks {
        let mut word = [0u8; 8];
        word.copy_from_slice(chunk);
        let word = u64::from_ne_bytes(word) ^ mask_u64;
        chunk.copy_from_slice(&word.to_ne_bytes());
    }

    for (i, byte) in chunks.into_remainder().iter_mut().enumerate() {
        *byte ^= mask[i & 3];
    }
}

/// Apply the mask to a slice that starts `offset` bytes into the payload.
#[inline]
pub fn apply_mask_offset(data: &mut [u8], mask: [u8; 4], offset: usize) {
    let offset = offset & 3;
    if offset == 0 {
        apply_mask(data, mask);
        return;
    }

    let rotated_mask = [
        mask[offset],
        mask[(offset + 1) & 3],
        mask[(offset + 2) & 3],
        mask[(offset + 3) & 3],
    ];
    apply_mask(data, rotated_mask);
}

/// Unmask a payload that is split in two at a ring buffer's wrap point.
#[inline]
pub fn apply_mask_split(first: &mut [u8], second: &mut [u8], mask: [u8; 4]) {
    apply_mask(first, mask);
    apply_mask_offset(second, mask, first.len());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn naive(data: &mut [u8], mask: [u8; 4]) {
        for (i, b) in data.iter_mut().enumerate() {
            *b ^= mask[i % 4];
        }
    }

    #[test]
    fn test_matches_bytewise_xor() {
        let mask = [0x37, 0xfa, 0x21, 0x3d];
        for len in [0, 1, 3, 7, 8, 9, 31, 64, 100] {
            let mut fast: Vec<u8> = (0..len as u8).collect();
            let mut slow = fast.clone();
            apply_mask(&mut fast, mask);
            naive(&mut slow, mask);
            assert_eq!(fast, slow, "len {len}");
        }
    }

    #[test]
    fn test_split_matches_contiguous() {
        let mask = [1, 2, 3, 4];
        let original: Vec<u8> = (0..23).collect();

        let mut whole = original.clone();
        apply_mask(&mut whole, mask);

        for cut in 0..original.len() {
            let (mut a, mut b) = (original[..cut].to_vec(), original[cut..].to_vec());
            apply_mask_split(&mut a, &mut b, mask);
            a.extend(b);
            assert_eq!(a, whole, "cut {cut}");
        }
    }

    #[test]
    fn test_masking_twice_restores() {
        let mask = [0xde, 0xad, 0xbe, 0xef];
        let mut data = b"Hello, world".to_vec();
        apply_mask(&mut data, mask);
        assert_ne!(&data, b"Hello, world");
        apply_mask(&mut data, mask);
        assert_eq!(&data, b"Hello, world");
    }
}
