use serde::Serialize;
use std::path::Path;
use tracing::warn;

/// Bit-level distance between a sent and a recovered buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct HammingDistance {
    pub bit_errors: u64,
    /// Bits actually compared: `8 * min(len_a, len_b)`.
    pub total_bits: u64,
}

impl HammingDistance {
    pub fn is_clean(&self) -> bool {
        self.bit_errors == 0
    }
}

/// Counts differing bits over the common prefix of `a` and `b`.
///
/// Buffers of different lengths are normal after a lossy round trip, so a
/// mismatch only produces a warning and the comparison is truncated to the
/// shorter buffer.
pub fn compare(a: &[u8], b: &[u8]) -> HammingDistance {
    if a.len() != b.len() {
        warn!(
            len_a = a.len(),
            len_b = b.len(),
            "compared buffers differ in length, truncating"
        );
    }
    let common = a.len().min(b.len());
    let bit_errors = a[..common]
        .iter()
        .zip(&b[..common])
        .map(|(x, y)| u64::from((x ^ y).count_ones()))
        .sum();
    HammingDistance {
        bit_errors,
        total_bits: common as u64 * 8,
    }
}

/// Secondary check: byte-for-byte equality including length.
///
/// Reported next to the Hamming distance, never used in its place: a
/// truncated recovery can be Hamming-clean yet still unequal.
pub fn exact_match(a: &[u8], b: &[u8]) -> bool {
    a == b
}

pub fn compare_files(a: &Path, b: &Path) -> std::io::Result<HammingDistance> {
    let bytes_a = std::fs::read(a)?;
    let bytes_b = std::fs::read(b)?;
    Ok(compare(&bytes_a, &bytes_b))
}
