//! Character model: what is being typed at each tip and how its states are
//! packed into per-node state vectors.
//!
//! Every character keeps a `state_key`, the ordered list of state labels in
//! first-observed order; the (1-based) position of a label in the key is the
//! bit that encodes it. Characters are laid out one after another in a packed
//! byte vector, one vector per tree node.

use std::path::Path;

use crate::annotation::parse_positions;
use crate::bitset;
use crate::error::{Error, Result};
use crate::io::Genbank;

/// What kind of observation a character encodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CharacterKind {
    /// A single alignment column, 1-based.
    Nucleotide { pos: usize },
    /// An amino-acid residue; `nuc_start` is the 1-based alignment position
    /// of the first base of its codon.
    AminoAcid {
        gene: String,
        residue: usize,
        nuc_start: usize,
    },
    /// A deletion of `length` bases starting at `pos`, 1-based.
    Deletion { pos: usize, length: usize },
    /// A free-form column from a tabular tip file.
    Generic,
}

#[derive(Debug, Clone)]
pub struct Character {
    pub name: String,
    pub kind: CharacterKind,
    /// Observed state labels in first-seen order; frozen after ingest.
    pub state_key: Vec<String>,
}

impl Character {
    pub fn nucleotide(pos: usize) -> Self {
        Character {
            name: format!("nuc:{pos}"),
            kind: CharacterKind::Nucleotide { pos },
            state_key: Vec::new(),
        }
    }

    /// Bytes needed for this character's states.
    pub fn width(&self) -> usize {
        self.state_key.len() / 8 + 1
    }

    /// 1-based bit for a state label, if it was observed during discovery.
    pub fn state_index(&self, label: &str) -> Option<usize> {
        self.state_key.iter().position(|s| s == label).map(|i| i + 1)
    }

    /// Appends a label to the state key unless already present.
    pub fn observe(&mut self, label: &str) {
        if !self.state_key.iter().any(|s| s == label) {
            self.state_key.push(label.to_string());
        }
    }
}

/// Byte range of one character inside a node state vector.
#[derive(Debug, Clone, Copy)]
pub struct StartStop {
    pub start: usize,
    pub stop: usize,
}

/// The packed layout of all characters; immutable after ingest.
#[derive(Debug, Clone)]
pub struct Layout {
    pub index: Vec<StartStop>,
    pub total_len: usize,
}

impl Layout {
    pub fn of(characters: &[Character]) -> Self {
        let mut index = Vec::with_capacity(characters.len());
        let mut start = 0;
        for c in characters {
            let stop = start + c.width();
            index.push(StartStop { start, stop });
            start = stop;
        }
        Layout {
            index,
            total_len: start,
        }
    }
}

/// Per-node packed state vectors, indexed by node id.
pub type StateMatrix = Vec<Vec<u8>>;

/// Allocates an all-zero matrix for a tree of `nodes` nodes.
pub fn zero_matrix(nodes: usize, layout: &Layout) -> StateMatrix {
    vec![vec![0u8; layout.total_len]; nodes]
}

/// The labels of the states set in `buf`, in state-key order.
pub fn state_labels<'a>(character: &'a Character, buf: &[u8]) -> Vec<&'a str> {
    bitset::get_set_bits(buf)
        .into_iter()
        .map(|b| character.state_key[b - 1].as_str())
        .collect()
}

/// 1-based alignment position of the first base of a residue's codon, given
/// the flattened CDS ranges from the annotation.
fn aa_start_pos(residue: usize, positions: &[usize]) -> Result<usize> {
    let mut residue = residue;
    let mut p = 0usize;
    if positions.len() > 2 {
        for pair in positions.chunks(2) {
            if pair[0] + (residue - 1) * 3 > pair[1] {
                residue -= (pair[1] - pair[0] + 1) / 3;
            } else {
                p = pair[0] + (residue - 1) * 3;
                break;
            }
        }
    } else {
        p = positions[0] + (residue - 1) * 3;
    }
    if p == 0 || p > positions[positions.len() - 1] - 2 {
        return Err(Error::Schema(
            "residue index falls outside its CDS".to_string(),
        ));
    }
    Ok(p)
}

/// Reads a variant config file into characters with empty state keys.
///
/// Recognised directives, colon-delimited:
/// - `nuc:<1-based-pos>`
/// - `aa:<gene>:<1-based-residue>` (needs the annotation)
/// - `del:<1-based-pos>:<length>`
pub fn read_config(path: &Path, genbank: Option<&Genbank>) -> Result<Vec<Character>> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| Error::Input(format!("could not read config {}: {e}", path.display())))?;

    let mut characters = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split(':').collect();
        if fields.len() < 2 {
            return Err(Error::Input(format!(
                "could not parse config line (too few fields): {line}"
            )));
        }
        match fields[0] {
            "nuc" => {
                let pos: usize = fields[1].parse().map_err(|_| {
                    Error::Input(format!("could not parse config line: {line}"))
                })?;
                if pos == 0 {
                    return Err(Error::Input(format!("positions are 1-based: {line}")));
                }
                characters.push(Character::nucleotide(pos));
            }
            "aa" => {
                if fields.len() < 3 {
                    return Err(Error::Input(format!(
                        "could not parse config line (too few fields): {line}"
                    )));
                }
                let gb = genbank.ok_or_else(|| {
                    Error::Schema(
                        "you must provide an annotation if your config contains amino-acid characters"
                            .to_string(),
                    )
                })?;
                let gene = fields[1].to_lowercase();
                let residue: usize = fields[2].parse().map_err(|_| {
                    Error::Input(format!("could not parse config line: {line}"))
                })?;
                if residue == 0 {
                    return Err(Error::Input(format!("residues are 1-based: {line}")));
                }
                let feat = gb
                    .features
                    .iter()
                    .filter(|f| f.key == "CDS")
                    .find(|f| {
                        f.qualifiers
                            .get("gene")
                            .is_some_and(|g| g.to_lowercase() == gene)
                    })
                    .ok_or_else(|| {
                        Error::Input(format!(
                            "could not resolve the gene named in config line: {line}"
                        ))
                    })?;
                let positions = parse_positions(&feat.location)?;
                let nuc_start = aa_start_pos(residue, &positions)?;
                characters.push(Character {
                    name: format!("aa:{gene}:{residue}"),
                    kind: CharacterKind::AminoAcid {
                        gene,
                        residue,
                        nuc_start,
                    },
                    state_key: Vec::new(),
                });
            }
            "del" => {
                if fields.len() < 3 {
                    return Err(Error::Input(format!(
                        "could not parse config line (too few fields): {line}"
                    )));
                }
                let pos: usize = fields[1].parse().map_err(|_| {
                    Error::Input(format!("could not parse config line: {line}"))
                })?;
                let length: usize = fields[2].parse().map_err(|_| {
                    Error::Input(format!("could not parse config line: {line}"))
                })?;
                if pos == 0 || length == 0 {
                    return Err(Error::Input(format!(
                        "deletion positions and lengths must be positive: {line}"
                    )));
                }
                characters.push(Character {
                    name: format!("del:{pos}:{length}"),
                    kind: CharacterKind::Deletion { pos, length },
                    state_key: Vec::new(),
                });
            }
            other => {
                return Err(Error::Input(format!(
                    "unknown directive '{other}' in config line: {line}"
                )));
            }
        }
    }
    Ok(characters)
}

/// Does the config file mention any amino-acid characters?
pub fn config_wants_amino_acids(path: &Path) -> Result<bool> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| Error::Input(format!("could not read config {}: {e}", path.display())))?;
    Ok(text.lines().any(|l| l.trim().starts_with("aa:")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_width_and_layout() {
        let mut c1 = Character::nucleotide(1);
        for s in ["A", "C", "G", "T"] {
            c1.observe(s);
        }
        assert_eq!(c1.width(), 1);

        let mut c2 = Character {
            name: "wide".to_string(),
            kind: CharacterKind::Generic,
            state_key: Vec::new(),
        };
        for i in 0..8 {
            c2.observe(&format!("s{i}"));
        }
        assert_eq!(c2.width(), 2);

        let layout = Layout::of(&[c1, c2]);
        assert_eq!(layout.total_len, 3);
        assert_eq!(layout.index[0].start, 0);
        assert_eq!(layout.index[0].stop, 1);
        assert_eq!(layout.index[1].start, 1);
        assert_eq!(layout.index[1].stop, 3);
    }

    #[test]
    fn test_observe_is_first_seen_append_only() {
        let mut c = Character::nucleotide(3);
        c.observe("G");
        c.observe("A");
        c.observe("G");
        assert_eq!(c.state_key, vec!["G", "A"]);
        assert_eq!(c.state_index("G"), Some(1));
        assert_eq!(c.state_index("A"), Some(2));
        assert_eq!(c.state_index("T"), None);
    }

    #[test]
    fn test_state_labels() {
        let mut c = Character::nucleotide(1);
        c.observe("A");
        c.observe("G");
        let mut buf = vec![0u8];
        bitset::set_bit(&mut buf, 1);
        bitset::set_bit(&mut buf, 2);
        assert_eq!(state_labels(&c, &buf), vec!["A", "G"]);
    }

    #[test]
    fn test_aa_start_pos_simple_range() {
        // CDS 11..16: residue 1 starts at 11, residue 2 at 14
        assert_eq!(aa_start_pos(1, &[11, 16]).unwrap(), 11);
        assert_eq!(aa_start_pos(2, &[11, 16]).unwrap(), 14);
        assert!(aa_start_pos(3, &[11, 16]).is_err());
    }

    #[test]
    fn test_aa_start_pos_joined_ranges() {
        // join(1..6,10..15): residues 1,2 in the first range, 3,4 in the second
        assert_eq!(aa_start_pos(1, &[1, 6, 10, 15]).unwrap(), 1);
        assert_eq!(aa_start_pos(2, &[1, 6, 10, 15]).unwrap(), 4);
        assert_eq!(aa_start_pos(3, &[1, 6, 10, 15]).unwrap(), 10);
        assert_eq!(aa_start_pos(4, &[1, 6, 10, 15]).unwrap(), 13);
        assert!(aa_start_pos(5, &[1, 6, 10, 15]).is_err());
    }
}
