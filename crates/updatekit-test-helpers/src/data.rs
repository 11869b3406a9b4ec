//! Deterministic test payloads.

/// `len` bytes of a repeating, seed-dependent pattern.
///
/// Distinct seeds give distinct data, so misplaced reads show up as content
/// mismatches rather than silently matching.
pub fn pattern_bytes(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}

/// Split `data` into consecutive chunks of the given sizes, cycling through
/// `sizes`. Zero sizes are skipped.
pub fn chunked<'a>(data: &'a [u8], sizes: &[usize]) -> Vec<&'a [u8]> {
    let mut out = Vec::new();
    let mut rest = data;
    let mut sizes = sizes.iter().copied().filter(|s| *s > 0).cycle();
    while !rest.is_empty() {
        let Some(size) = sizes.next() else {
            out.push(rest);
            break;
        };
        let (head, tail) = rest.split_at(size.min(rest.len()));
        out.push(head);
        rest = tail;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunked_covers_input() {
        let data = pattern_bytes(10, 1);
        let chunks = chunked(&data, &[3, 0, 4]);
        assert_eq!(chunks.iter().map(|c| c.len()).collect::<Vec<_>>(), vec![3, 4, 3]);
        assert_eq!(chunks.concat(), data);
    }

    #[test]
    fn test_chunked_without_sizes() {
        let data = pattern_bytes(5, 0);
        assert_eq!(chunked(&data, &[]), vec![&data[..]]);
    }

    #[test]
    fn test_pattern_seed_changes_data() {
        assert_ne!(pattern_bytes(16, 0), pattern_bytes(16, 1));
    }
}
