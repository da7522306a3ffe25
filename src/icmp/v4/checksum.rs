/// RFC 1071 one's-complement checksum over `buffer`, read as big-endian
/// 16-bit words with a trailing odd byte zero-padded.
///
/// The buffer must contain the frame with its checksum field zeroed; an
/// empty buffer sums to zero and therefore yields `0xFFFF`. Verifying a
/// completed frame needs no zeroing: summing it with the stored checksum in
/// place folds to zero, so `checksum(frame) == 0` is the validity test.
#[must_use]
pub fn checksum(buffer: &[u8]) -> u16 {
    let mut sum = 0u16;
    let mut words = buffer.chunks_exact(2);
    for word in words.by_ref() {
        sum = ones_sum(sum, u16::from_be_bytes([word[0], word[1]]));
    }
    if let Some(&odd) = words.remainder().first() {
        sum = ones_sum(sum, u16::from_be_bytes([odd, 0]));
    }
    !sum
}

fn ones_sum(a: u16, b: u16) -> u16 {
    let sum = u32::from(a) + u32::from(b);
    // The end-around carry of two u16 summands fits back into a u16.
    #[allow(clippy::cast_possible_truncation)]
    let folded = ((sum & 0xFFFF) + (sum >> 16)) as u16;
    folded
}
