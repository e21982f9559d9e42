//! Fixed-width bitsets over byte arrays, used to hold character state sets.
//!
//! # Overview
//! Each character owns a short run of bytes inside a node's state vector; a
//! set bit marks an admissible state. Bit numbering is 1-based and starts at
//! the most significant bit of byte 0, so bit 1 is `0b1000_0000` of the first
//! byte and bit 9 is the MSB of the second byte.
//!
//! All operations require equal-length operands. A length mismatch or an
//! out-of-range bit index is a programmer error and panics with a diagnostic
//! rather than returning an error.

use rand::Rng;

/// Sets the (1-based) bit `k`, counting from the MSB of byte 0.
///
/// # Example
/// ```
/// # use ancstate::bitset::set_bit;
/// let mut buf = vec![0u8; 2];
/// set_bit(&mut buf, 1);
/// set_bit(&mut buf, 9);
/// assert_eq!(buf, vec![0b1000_0000, 0b1000_0000]);
/// ```
#[inline]
pub fn set_bit(buf: &mut [u8], k: usize) {
    assert!(
        k >= 1 && k <= buf.len() * 8,
        "bit index {k} out of range for a {}-byte bitset",
        buf.len()
    );
    buf[(k - 1) / 8] |= 1 << (7 - (k - 1) % 8);
}

/// Tests the (1-based) bit `k`.
#[inline]
pub fn test_bit(buf: &[u8], k: usize) -> bool {
    assert!(
        k >= 1 && k <= buf.len() * 8,
        "bit index {k} out of range for a {}-byte bitset",
        buf.len()
    );
    buf[(k - 1) / 8] & (1 << (7 - (k - 1) % 8)) != 0
}

/// True iff at least one bit is set.
#[inline]
pub fn is_any_bit_set(buf: &[u8]) -> bool {
    buf.iter().any(|&b| b != 0)
}

/// The 1-based indices of all set bits, ascending.
pub fn get_set_bits(buf: &[u8]) -> Vec<usize> {
    let mut bits = Vec::new();
    for (i, &b) in buf.iter().enumerate() {
        for j in 0..8 {
            if b & (1 << (7 - j)) != 0 {
                bits.push(i * 8 + j + 1);
            }
        }
    }
    bits
}

#[inline]
fn check_len(a: &[u8], b: &[u8]) {
    assert_eq!(
        a.len(),
        b.len(),
        "bitset length mismatch ({} vs {} bytes)",
        a.len(),
        b.len()
    );
}

/// Byte-wise inequality.
#[inline]
pub fn different(a: &[u8], b: &[u8]) -> bool {
    check_len(a, b);
    a != b
}

/// Byte-wise equality.
#[inline]
pub fn equal(a: &[u8], b: &[u8]) -> bool {
    !different(a, b)
}

/// `a ∩ b`, allocating.
pub fn intersection(a: &[u8], b: &[u8]) -> Vec<u8> {
    check_len(a, b);
    a.iter().zip(b).map(|(x, y)| x & y).collect()
}

/// `dst ∩= other`.
pub fn intersect_assign(dst: &mut [u8], other: &[u8]) {
    check_len(dst, other);
    for (d, o) in dst.iter_mut().zip(other) {
        *d &= o;
    }
}

/// `a ∪ b`, allocating.
pub fn union(a: &[u8], b: &[u8]) -> Vec<u8> {
    check_len(a, b);
    a.iter().zip(b).map(|(x, y)| x | y).collect()
}

/// `dst ∪= other`.
pub fn union_assign(dst: &mut [u8], other: &[u8]) {
    check_len(dst, other);
    for (d, o) in dst.iter_mut().zip(other) {
        *d |= o;
    }
}

/// Set difference `a \ b` (equivalently `a AND NOT b`), allocating.
pub fn set_diff(a: &[u8], b: &[u8]) -> Vec<u8> {
    check_len(a, b);
    a.iter().zip(b).map(|(x, y)| x & !y).collect()
}

/// `dst \= other`.
pub fn diff_assign(dst: &mut [u8], other: &[u8]) {
    check_len(dst, other);
    for (d, o) in dst.iter_mut().zip(other) {
        *d &= !o;
    }
}

/// Symmetric difference `a XOR b`, allocating.
pub fn sym_diff(a: &[u8], b: &[u8]) -> Vec<u8> {
    check_len(a, b);
    a.iter().zip(b).map(|(x, y)| x ^ y).collect()
}

/// `dst ^= other`.
pub fn sym_diff_assign(dst: &mut [u8], other: &[u8]) {
    check_len(dst, other);
    for (d, o) in dst.iter_mut().zip(other) {
        *d ^= o;
    }
}

/// Is `a` a subset of `b`? Holds exactly when `a \ b` is empty.
pub fn is_subset(a: &[u8], b: &[u8]) -> bool {
    !is_any_bit_set(&set_diff(a, b))
}

/// Union over an arbitrary family of equal-length bitsets.
pub fn var_union(sets: &[&[u8]]) -> Vec<u8> {
    let mut out = vec![0u8; sets[0].len()];
    for s in sets {
        union_assign(&mut out, s);
    }
    out
}

/// Intersection over an arbitrary family of equal-length bitsets.
pub fn var_intersection(sets: &[&[u8]]) -> Vec<u8> {
    let mut out = sets[0].to_vec();
    for s in &sets[1..] {
        intersect_assign(&mut out, s);
    }
    out
}

/// Picks one set bit uniformly at random and returns it as a single-bit
/// bitset of the same width. An empty input yields an all-zero result.
///
/// The RNG is injected so callers can seed it deterministically.
pub fn random_choose_set_bit<R: Rng>(buf: &[u8], rng: &mut R) -> Vec<u8> {
    let mut out = vec![0u8; buf.len()];
    let bits = get_set_bits(buf);
    if bits.is_empty() {
        return out;
    }
    set_bit(&mut out, bits[rng.random_range(0..bits.len())]);
    out
}

/// Fitch's rule: the intersection if it is non-empty, else the union.
fn fitch(a: &[u8], b: &[u8]) -> Vec<u8> {
    let i = intersection(a, b);
    if is_any_bit_set(&i) { i } else { union(a, b) }
}

/// The Swofford & Maddison three-set most-parsimonious-reconstruction rule:
///
/// `[(a ⊗ b) ⊗ c] ∩ [(a ⊗ c) ⊗ b] ∩ [(b ⊗ c) ⊗ a]`
///
/// where `⊗` is Fitch's intersection-else-union operator. Symmetric under
/// every permutation of its arguments.
pub fn three_set_mpr(a: &[u8], b: &[u8], c: &[u8]) -> Vec<u8> {
    let d = fitch(&fitch(a, b), c);
    let e = fitch(&fitch(a, c), b);
    let f = fitch(&fitch(b, c), a);
    var_intersection(&[&d, &e, &f])
}

/// The majority set: every bit position whose occurrence count across the
/// family equals the maximum count. Ties are all included. A family with no
/// set bits at all yields the empty set.
///
/// Used to resolve hard polytomies.
pub fn var_max(sets: &[&[u8]]) -> Vec<u8> {
    for s in &sets[1..] {
        check_len(sets[0], s);
    }
    let mut counts = vec![0usize; sets[0].len() * 8];
    for s in sets {
        for b in get_set_bits(s) {
            counts[b - 1] += 1;
        }
    }
    let mut out = vec![0u8; sets[0].len()];
    let max = counts.iter().copied().max().unwrap_or(0);
    if max == 0 {
        return out;
    }
    for (i, &c) in counts.iter().enumerate() {
        if c == max {
            set_bit(&mut out, i + 1);
        }
    }
    out
}

/// Does every set in `sets` contain at least one of `states`?
fn covers(states: &[usize], sets: &[&[u8]]) -> bool {
    sets.iter().all(|s| states.iter().any(|&k| test_bit(s, k)))
}

/// The union of all minimum-cardinality state sets that intersect every
/// input set (Maddison 1989), used to resolve soft polytomies.
///
/// Singleton inputs make their sole state mandatory; inputs already covered
/// by a mandatory state impose no further constraint. Over the remaining
/// states, the smallest `n` is found such that some n-subset intersects every
/// remaining input, and ALL covering n-subsets are unioned together with the
/// mandatory states. Empty inputs are unconstrained and are skipped.
pub fn var_cover(sets: &[&[u8]]) -> Vec<u8> {
    use itertools::Itertools;

    for s in &sets[1..] {
        check_len(sets[0], s);
    }
    let mut out = vec![0u8; sets[0].len()];

    let inputs: Vec<&[u8]> = sets.iter().copied().filter(|s| is_any_bit_set(s)).collect();
    if inputs.is_empty() {
        return out;
    }

    // mandatory states from singleton inputs
    let mut singletons: Vec<usize> = Vec::new();
    for s in &inputs {
        let bits = get_set_bits(s);
        if bits.len() == 1 && !singletons.contains(&bits[0]) {
            singletons.push(bits[0]);
        }
    }

    // inputs containing a mandatory state are already covered
    let remaining: Vec<&[u8]> = inputs
        .iter()
        .copied()
        .filter(|s| !singletons.iter().any(|&k| test_bit(s, k)))
        .collect();

    // candidate states are everything left in play
    let mut candidates: Vec<usize> = Vec::new();
    for s in &remaining {
        for b in get_set_bits(s) {
            if !candidates.contains(&b) {
                candidates.push(b);
            }
        }
    }

    // smallest n first; once some n-subset covers, union in every covering
    // n-subset and stop
    for n in 1..=candidates.len() {
        let mut found = false;
        for comb in candidates.iter().copied().combinations(n) {
            if covers(&comb, &remaining) {
                found = true;
                for &k in &comb {
                    set_bit(&mut out, k);
                }
            }
        }
        if found {
            break;
        }
    }

    for &k in &singletons {
        set_bit(&mut out, k);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn bits(width: usize, ks: &[usize]) -> Vec<u8> {
        let mut b = vec![0u8; width];
        for &k in ks {
            set_bit(&mut b, k);
        }
        b
    }

    #[test]
    fn test_set_and_get_bits() {
        let mut ba = vec![0u8];
        set_bit(&mut ba, 1);
        assert_eq!(ba[0], 128);

        let mut ba = vec![0u8, 0u8];
        set_bit(&mut ba, 8);
        set_bit(&mut ba, 9);
        assert_eq!(ba, vec![1, 128]);
        assert_eq!(get_set_bits(&ba), vec![8, 9]);

        assert!(is_any_bit_set(&ba));
        assert!(!is_any_bit_set(&[0u8, 0u8]));
        assert!(test_bit(&ba, 8));
        assert!(!test_bit(&ba, 7));
    }

    #[test]
    #[should_panic]
    fn test_out_of_range_bit_panics() {
        let mut ba = vec![0u8];
        set_bit(&mut ba, 9);
    }

    #[test]
    #[should_panic]
    fn test_length_mismatch_panics() {
        let _ = intersection(&[0u8], &[0u8, 0u8]);
    }

    #[test]
    fn test_different() {
        assert!(different(&[8], &[0]));
        assert!(!different(&[8], &[8]));
        assert!(equal(&[8], &[8]));
    }

    #[test]
    fn test_set_diff() {
        assert_eq!(set_diff(&[128], &[0]), vec![128]);
        assert_eq!(set_diff(&[0b1100], &[0b0100]), vec![0b1000]);
        let mut d = vec![0b1100u8];
        diff_assign(&mut d, &[0b0100]);
        assert_eq!(d, vec![0b1000]);
    }

    #[test]
    fn test_union_and_intersection() {
        assert_eq!(union(&[128], &[16]), vec![144]);
        assert_eq!(intersection(&[128], &[16]), vec![0]);
        assert_eq!(intersection(&[16], &[144]), vec![16]);

        let mut u = vec![128u8];
        union_assign(&mut u, &[16]);
        assert_eq!(u, vec![144]);

        let mut i = vec![144u8];
        intersect_assign(&mut i, &[16]);
        assert_eq!(i, vec![16]);
    }

    #[test]
    fn test_union_is_commutative() {
        let a = bits(1, &[1, 3]);
        let b = bits(1, &[2, 3]);
        assert_eq!(union(&a, &b), union(&b, &a));
        assert!(is_subset(&intersection(&a, &b), &a));
    }

    #[test]
    fn test_var_union() {
        let sets = [bits(1, &[8]), bits(1, &[7]), bits(1, &[6]), bits(1, &[1])];
        let refs: Vec<&[u8]> = sets.iter().map(|s| s.as_slice()).collect();
        assert_eq!(var_union(&refs), vec![0b1000_0111]);
    }

    #[test]
    fn test_var_intersection() {
        let sets = [bits(1, &[1, 2, 3]), bits(1, &[2, 3]), bits(1, &[3, 4])];
        let refs: Vec<&[u8]> = sets.iter().map(|s| s.as_slice()).collect();
        assert_eq!(get_set_bits(&var_intersection(&refs)), vec![3]);
    }

    #[test]
    fn test_sym_diff() {
        assert_eq!(sym_diff(&[64], &[128]), vec![192]);
        let mut d = vec![64u8];
        sym_diff_assign(&mut d, &[192]);
        assert_eq!(d, vec![128]);
    }

    #[test]
    fn test_subset() {
        assert!(is_subset(&bits(1, &[2]), &bits(1, &[1, 2])));
        assert!(!is_subset(&bits(1, &[3]), &bits(1, &[1, 2])));
        // subset(a, b) <=> a \ b empty
        assert!(!is_any_bit_set(&set_diff(&bits(1, &[2]), &bits(1, &[1, 2]))));
    }

    #[test]
    fn test_random_choose_set_bit_is_seedable() {
        let mut rng = StdRng::seed_from_u64(7);
        let src = bits(1, &[6, 7, 8]);
        let chosen = random_choose_set_bit(&src, &mut rng);
        let set = get_set_bits(&chosen);
        assert_eq!(set.len(), 1);
        assert!(src.iter().zip(&chosen).all(|(s, c)| c & !s == 0));

        // identical seeds make identical choices
        let mut rng2 = StdRng::seed_from_u64(7);
        assert_eq!(random_choose_set_bit(&src, &mut rng2), chosen);

        // no set bits -> all zeros
        assert_eq!(random_choose_set_bit(&[0u8], &mut rng), vec![0u8]);
    }

    #[test]
    fn test_three_set_mpr_is_symmetric() {
        let a = bits(1, &[1]);
        let b = bits(1, &[1, 2]);
        let c = bits(1, &[2, 3]);
        let expected = three_set_mpr(&a, &b, &c);
        assert_eq!(three_set_mpr(&a, &c, &b), expected);
        assert_eq!(three_set_mpr(&b, &a, &c), expected);
        assert_eq!(three_set_mpr(&b, &c, &a), expected);
        assert_eq!(three_set_mpr(&c, &a, &b), expected);
        assert_eq!(three_set_mpr(&c, &b, &a), expected);
    }

    #[test]
    fn test_var_max() {
        let sets = [
            bits(1, &[8]),
            bits(1, &[7]),
            bits(1, &[6]),
            bits(1, &[7]),
            bits(1, &[6]),
        ];
        let refs: Vec<&[u8]> = sets.iter().map(|s| s.as_slice()).collect();
        assert_eq!(get_set_bits(&var_max(&refs)), vec![6, 7]);

        // empty sets contribute nothing
        let sets = [
            bits(1, &[8]),
            bits(1, &[7]),
            bits(1, &[]),
            bits(1, &[7]),
            bits(1, &[6]),
        ];
        let refs: Vec<&[u8]> = sets.iter().map(|s| s.as_slice()).collect();
        assert_eq!(get_set_bits(&var_max(&refs)), vec![7]);

        // a family with no set bits at all yields the empty set
        let sets = [bits(1, &[]), bits(1, &[])];
        let refs: Vec<&[u8]> = sets.iter().map(|s| s.as_slice()).collect();
        assert!(!is_any_bit_set(&var_max(&refs)));
    }

    /// The worked example from Maddison (1989): inputs {1,2}, {4}, {2,3,4},
    /// {6}, {1,2,3}, {5,6,7,8} cover with {1,2,4,6}.
    #[test]
    fn test_var_cover_maddison() {
        let sets = [
            bits(1, &[1, 2]),
            bits(1, &[4]),
            bits(1, &[2, 3, 4]),
            bits(1, &[6]),
            bits(1, &[1, 2, 3]),
            bits(1, &[5, 6, 7, 8]),
        ];
        let refs: Vec<&[u8]> = sets.iter().map(|s| s.as_slice()).collect();
        assert_eq!(get_set_bits(&var_cover(&refs)), vec![1, 2, 4, 6]);
    }

    #[test]
    fn test_var_cover_intersects_every_input() {
        let sets = [bits(1, &[1, 2]), bits(1, &[3, 4])];
        let refs: Vec<&[u8]> = sets.iter().map(|s| s.as_slice()).collect();
        let cover = var_cover(&refs);
        // a two-state coverer is required; all minimal covers are unioned
        assert_eq!(get_set_bits(&cover), vec![1, 2, 3, 4]);
        for s in &refs {
            assert!(is_any_bit_set(&intersection(&cover, s)));
        }
    }

    #[test]
    fn test_var_cover_skips_empty_inputs() {
        let sets = [bits(1, &[1]), bits(1, &[]), bits(1, &[1, 2])];
        let refs: Vec<&[u8]> = sets.iter().map(|s| s.as_slice()).collect();
        assert_eq!(get_set_bits(&var_cover(&refs)), vec![1]);

        let sets = [bits(1, &[]), bits(1, &[])];
        let refs: Vec<&[u8]> = sets.iter().map(|s| s.as_slice()).collect();
        assert!(!is_any_bit_set(&var_cover(&refs)));
    }

    /// Polytomy of {A}, {G}, {A|G}: both policies settle on {A, G}.
    #[test]
    fn test_hard_and_soft_polytomy_agree_on_ties() {
        let sets = [bits(1, &[1]), bits(1, &[2]), bits(1, &[1, 2])];
        let refs: Vec<&[u8]> = sets.iter().map(|s| s.as_slice()).collect();
        assert_eq!(get_set_bits(&var_max(&refs)), vec![1, 2]);
        assert_eq!(get_set_bits(&var_cover(&refs)), vec![1, 2]);
    }
}
