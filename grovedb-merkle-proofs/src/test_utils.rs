//! Deterministic element generation for tests and benchmarks.

/// `count` elements where the first is `seed` and each following one is
/// `blake3(seed || previous)`.
pub fn generate_elements(count: usize, seed: &[u8]) -> Vec<Vec<u8>> {
    let mut elements: Vec<Vec<u8>> = Vec::with_capacity(count);
    for _ in 0..count {
        let next = match elements.last() {
            None => seed.to_vec(),
            Some(previous) => {
                let mut hasher = blake3::Hasher::new();
                hasher.update(seed);
                hasher.update(previous);
                hasher.finalize().as_bytes().to_vec()
            }
        };
        elements.push(next);
    }
    elements
}

/// Element `i` as big-endian bytes, for tests that care about positions
/// rather than content.
pub fn numbered_elements(range: std::ops::Range<u32>) -> Vec<Vec<u8>> {
    range.map(|i| i.to_be_bytes().to_vec()).collect()
}
