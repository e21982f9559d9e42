//! Genome annotation regions and the nucleotide/amino-acid alphabets.
//!
//! A parsed GenBank file is reduced to an ordered run of [`Region`]s covering
//! the genome: CDS regions carrying their gene name and 1-based codon start
//! positions, with intergenic regions filling every gap between and around
//! them. The annotated labeller walks this run to classify nucleotide changes
//! as synonymous or amino-acid-changing.

use crate::error::{Error, Result};
use crate::io::Genbank;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionKind {
    Intergenic,
    Cds,
}

/// A contiguous stretch of the genome, either intergenic or coding.
/// Positions are 1-based and inclusive.
#[derive(Debug, Clone)]
pub struct Region {
    pub kind: RegionKind,
    /// Gene name, for CDS regions.
    pub name: String,
    pub start: usize,
    pub stop: usize,
    /// 1-based start positions of every codon, for CDS regions.
    pub codon_starts: Vec<usize>,
}

impl Region {
    fn intergenic(start: usize, stop: usize) -> Self {
        Region {
            kind: RegionKind::Intergenic,
            name: String::new(),
            start,
            stop,
            codon_starts: Vec::new(),
        }
    }
}

/// The set of canonical bases an IUPAC nucleotide byte stands for. `N`, gaps
/// and unrecognised bytes expand to the empty set (missing data).
pub fn expand_nucleotide(b: u8) -> &'static [u8] {
    match b.to_ascii_uppercase() {
        b'A' => b"A",
        b'C' => b"C",
        b'G' => b"G",
        b'T' => b"T",
        b'R' => b"AG",
        b'Y' => b"CT",
        b'S' => b"GC",
        b'W' => b"AT",
        b'K' => b"GT",
        b'M' => b"AC",
        b'B' => b"CGT",
        b'D' => b"AGT",
        b'H' => b"ACT",
        b'V' => b"ACG",
        _ => b"",
    }
}

/// IUPAC code for a set of bases given as a concatenation of their letters
/// sorted in increasing order (e.g. `"AG"` -> `'R'`). Unknown combinations
/// yield `None`.
pub fn iupac_code(sorted_bases: &str) -> Option<char> {
    match sorted_bases {
        "A" => Some('A'),
        "C" => Some('C'),
        "G" => Some('G'),
        "T" => Some('T'),
        "AC" => Some('M'),
        "AG" => Some('R'),
        "AT" => Some('W'),
        "CG" => Some('S'),
        "CT" => Some('Y'),
        "GT" => Some('K'),
        "ACG" => Some('V'),
        "ACT" => Some('H'),
        "AGT" => Some('D'),
        "CGT" => Some('B'),
        "ACGT" => Some('N'),
        _ => None,
    }
}

fn translate_exact(codon: [u8; 3]) -> char {
    match &codon {
        b"TTT" | b"TTC" => 'F',
        b"TTA" | b"TTG" | b"CTT" | b"CTC" | b"CTA" | b"CTG" => 'L',
        b"ATT" | b"ATC" | b"ATA" => 'I',
        b"ATG" => 'M',
        b"GTT" | b"GTC" | b"GTA" | b"GTG" => 'V',
        b"TCT" | b"TCC" | b"TCA" | b"TCG" | b"AGT" | b"AGC" => 'S',
        b"CCT" | b"CCC" | b"CCA" | b"CCG" => 'P',
        b"ACT" | b"ACC" | b"ACA" | b"ACG" => 'T',
        b"GCT" | b"GCC" | b"GCA" | b"GCG" => 'A',
        b"TAT" | b"TAC" => 'Y',
        b"TAA" | b"TAG" | b"TGA" => '*',
        b"CAT" | b"CAC" => 'H',
        b"CAA" | b"CAG" => 'Q',
        b"AAT" | b"AAC" => 'N',
        b"AAA" | b"AAG" => 'K',
        b"GAT" | b"GAC" => 'D',
        b"GAA" | b"GAG" => 'E',
        b"TGT" | b"TGC" => 'C',
        b"TGG" => 'W',
        b"CGT" | b"CGC" | b"CGA" | b"CGG" | b"AGA" | b"AGG" => 'R',
        b"GGT" | b"GGC" | b"GGA" | b"GGG" => 'G',
        _ => unreachable!("codon built from canonical bases"),
    }
}

/// Translates a codon that may contain IUPAC ambiguity codes. Returns the
/// amino acid when every expansion agrees on it, `None` when the codon
/// contains missing data or the expansions disagree.
pub fn translate_codon(codon: &str) -> Option<char> {
    if codon.len() != 3 {
        return None;
    }
    let sets: Vec<&[u8]> = codon.bytes().map(expand_nucleotide).collect();
    if sets.iter().any(|s| s.is_empty()) {
        return None;
    }
    let mut aa = None;
    for &x in sets[0] {
        for &y in sets[1] {
            for &z in sets[2] {
                let t = translate_exact([x, y, z]);
                match aa {
                    None => aa = Some(t),
                    Some(prev) if prev != t => return None,
                    _ => {}
                }
            }
        }
    }
    aa
}

/// 1-based positions from a GenBank location, flattened to
/// `[start1, stop1, start2, stop2, ...]`. Handles `join(...)` and plain
/// ranges; partial-end markers (`<`, `>`) are tolerated.
pub fn parse_positions(location: &str) -> Result<Vec<usize>> {
    let inner = location
        .trim()
        .trim_start_matches("join(")
        .trim_end_matches(')');
    let mut out = Vec::new();
    for range in inner.split(',') {
        for part in range.split("..") {
            let cleaned: String = part.chars().filter(|c| c.is_ascii_digit()).collect();
            let pos: usize = cleaned
                .parse()
                .map_err(|_| Error::Input(format!("could not parse CDS position: {location}")))?;
            out.push(pos);
        }
    }
    if out.is_empty() || out.len() % 2 != 0 {
        return Err(Error::Input(format!(
            "could not parse CDS position ranges: {location}"
        )));
    }
    Ok(out)
}

/// Builds the ordered run of regions for a genome. With `whole_genome` set,
/// the entire sequence is treated as one intergenic region (every change is
/// then labelled as a plain nucleotide substitution); otherwise each CDS
/// becomes a coding region with its codon starts and the gaps between them
/// become intergenic regions.
pub fn get_regions(gb: &Genbank, whole_genome: bool) -> Result<Vec<Region>> {
    if whole_genome {
        return Ok(vec![Region::intergenic(1, gb.origin_len)]);
    }

    let mut cds_regions = Vec::new();
    for feat in gb.features.iter().filter(|f| f.key == "CDS") {
        let gene = feat.qualifiers.get("gene").ok_or_else(|| {
            Error::Schema(format!(
                "CDS feature at {} is missing a gene qualifier",
                feat.location
            ))
        })?;
        let positions = parse_positions(&feat.location)?;
        let mut codon_starts = Vec::new();
        for pair in positions.chunks(2) {
            let (start, stop) = (pair[0], pair[1]);
            let length = stop - (start - 1);
            if length % 3 != 0 {
                return Err(Error::Schema(format!(
                    "CDS position range is not a multiple of 3 for gene {gene}"
                )));
            }
            for j in (0..length).step_by(3) {
                codon_starts.push(start + j);
            }
        }
        cds_regions.push(Region {
            kind: RegionKind::Cds,
            name: gene.clone(),
            start: positions[0],
            stop: positions[positions.len() - 1],
            codon_starts,
        });
    }

    // interleave the intergenic gaps, including the tail after the last CDS
    let mut regions = Vec::new();
    let mut next = 1usize;
    for cds in cds_regions {
        if cds.start > next {
            regions.push(Region::intergenic(next, cds.start - 1));
        }
        next = next.max(cds.stop + 1);
        regions.push(cds);
    }
    if gb.origin_len >= next {
        regions.push(Region::intergenic(next, gb.origin_len));
    }
    Ok(regions)
}
