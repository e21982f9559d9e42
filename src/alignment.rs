//! Typing characters from a FASTA alignment.
//!
//! Ingestion is a two-pass protocol. The discovery pass streams the
//! alignment once, decoding every target character at every tip and
//! appending unseen state labels to each character's `state_key` in
//! first-seen order. The encoding pass streams the alignment again and sets
//! the corresponding bits in each tip's packed state vector; it is
//! parallelised over tip records with rayon, and a single sequential reducer
//! writes each finished vector into its node's row of the matrix.

use std::path::Path;

use log::{debug, info};
use rayon::prelude::*;

use crate::annotation::{expand_nucleotide, translate_codon};
use crate::bitset::set_bit;
use crate::characters::{
    Character, CharacterKind, Layout, StateMatrix, read_config, zero_matrix,
};
use crate::error::{Error, Result};
use crate::io::{Genbank, open_fasta};
use crate::tree::Tree;

/// The state labels a sequence exhibits for one character. Ambiguity codes
/// expand to several labels; missing data expands to none.
fn decode(character: &Character, seq: &[u8]) -> Result<Vec<String>> {
    let out_of_range = |pos: usize| {
        Error::Input(format!(
            "character {} needs position {pos} but the alignment is only {} wide",
            character.name,
            seq.len()
        ))
    };
    match &character.kind {
        CharacterKind::Nucleotide { pos } => {
            if *pos > seq.len() {
                return Err(out_of_range(*pos));
            }
            Ok(expand_nucleotide(seq[pos - 1])
                .iter()
                .map(|&b| (b as char).to_string())
                .collect())
        }
        CharacterKind::AminoAcid { nuc_start, .. } => {
            if nuc_start + 2 > seq.len() {
                return Err(out_of_range(nuc_start + 2));
            }
            let codon = std::str::from_utf8(&seq[nuc_start - 1..nuc_start + 2])
                .map_err(|_| Error::Input("alignment contains non-ASCII bytes".to_string()))?;
            Ok(translate_codon(codon)
                .map(|aa| vec![aa.to_string()])
                .unwrap_or_default())
        }
        CharacterKind::Deletion { pos, length } => {
            if pos + length - 1 > seq.len() {
                return Err(out_of_range(pos + length - 1));
            }
            let span = &seq[pos - 1..pos - 1 + length];
            if span.iter().all(|&b| b == b'-') {
                Ok(vec!["del".to_string()])
            } else {
                Ok(vec!["oth".to_string()])
            }
        }
        CharacterKind::Generic => Ok(Vec::new()),
    }
}

/// Discovery pass: stream the alignment once, appending unseen state labels
/// and enforcing a single record length.
fn discover_states(path: &Path, characters: &mut [Character]) -> Result<usize> {
    let mut expected: Option<usize> = None;
    let mut records = 0usize;
    for record in open_fasta(path)? {
        let record = record?;
        match expected {
            None => expected = Some(record.seq.len()),
            Some(len) if len != record.seq.len() => {
                return Err(Error::Input(format!(
                    "alignment records differ in length ({} is {} wide, expected {len})",
                    record.id,
                    record.seq.len()
                )));
            }
            _ => {}
        }
        for character in characters.iter_mut() {
            for label in decode(character, &record.seq)? {
                character.observe(&label);
            }
        }
        records += 1;
    }
    if records == 0 {
        return Err(Error::Input("the alignment has no records".to_string()));
    }
    Ok(records)
}

/// Encoding pass: stream the alignment again and fill the matrix rows of
/// the tips. Decoding is parallel across records; the final writes are done
/// by this (single) thread, keyed by node id.
fn encode_states(
    path: &Path,
    tree: &Tree,
    characters: &[Character],
    layout: &Layout,
) -> Result<StateMatrix> {
    let rows: Vec<(usize, Vec<u8>)> = open_fasta(path)?
        .par_bridge()
        .map(|record| -> Result<(usize, Vec<u8>)> {
            let record = record?;
            let node_id = tree.tip_id(&record.id)?;
            let mut row = vec![0u8; layout.total_len];
            for (character, span) in characters.iter().zip(&layout.index) {
                for label in decode(character, &record.seq)? {
                    let bit = character.state_index(&label).ok_or_else(|| {
                        Error::Input(format!(
                            "state {label} of character {} was not seen during discovery",
                            character.name
                        ))
                    })?;
                    set_bit(&mut row[span.start..span.stop], bit);
                }
            }
            Ok((node_id, row))
        })
        .collect::<Result<_>>()?;

    let mut states = zero_matrix(tree.nodes.len(), layout);
    for (node_id, row) in rows {
        states[node_id] = row;
    }
    Ok(states)
}

/// Types an alignment at the characters named by a variant config file.
pub fn type_alignment(
    tree: &Tree,
    alignment: &Path,
    config: &Path,
    genbank: Option<&Genbank>,
) -> Result<(Vec<Character>, Layout, StateMatrix)> {
    let mut characters = read_config(config, genbank)?;
    if characters.is_empty() {
        return Err(Error::Input("the config file names no characters".to_string()));
    }
    let records = discover_states(alignment, &mut characters)?;
    info!(
        "typed {} character(s) across {records} alignment record(s)",
        characters.len()
    );
    let layout = Layout::of(&characters);
    debug!("packed state vectors are {} byte(s) wide", layout.total_len);
    let states = encode_states(alignment, tree, &characters, &layout)?;
    Ok((characters, layout, states))
}

/// Types every alignment column as a nucleotide character. Used by the
/// annotation-driven presets, which need the full genome.
pub fn type_alignment_all_nucleotides(
    tree: &Tree,
    alignment: &Path,
) -> Result<(Vec<Character>, Layout, StateMatrix)> {
    let first = open_fasta(alignment)?
        .next()
        .ok_or_else(|| Error::Input("the alignment has no records".to_string()))??;
    let mut characters: Vec<Character> = (1..=first.seq.len())
        .map(Character::nucleotide)
        .collect();

    let records = discover_states(alignment, &mut characters)?;
    info!(
        "typed {} nucleotide position(s) across {records} alignment record(s)",
        characters.len()
    );
    let layout = Layout::of(&characters);
    let states = encode_states(alignment, tree, &characters, &layout)?;
    Ok((characters, layout, states))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &tempfile::TempDir, name: &str, contents: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_type_alignment_nucleotide_character() {
        let dir = tempfile::tempdir().unwrap();
        let aln = write_file(
            &dir,
            "aln.fasta",
            ">t1\nACGT\n>t2\nACGA\n>t3\nRCGT\n>t4\nNCGT\n",
        );
        let cfg = write_file(&dir, "config", "nuc:1\nnuc:4\n");
        let tree = Tree::from_newick("((t1:1,t2:1):1,(t3:1,t4:1):1);").unwrap();

        let (characters, layout, states) =
            type_alignment(&tree, &aln, &cfg, None).unwrap();
        assert_eq!(characters.len(), 2);
        assert_eq!(characters[0].name, "nuc:1");
        // A seen first, then the R at t3 contributes G
        assert_eq!(characters[0].state_key, vec!["A", "G"]);
        assert_eq!(characters[1].state_key, vec!["T", "A"]);
        assert_eq!(layout.total_len, 2);

        let (t1, t3, t4) = (
            tree.tip_id("t1").unwrap(),
            tree.tip_id("t3").unwrap(),
            tree.tip_id("t4").unwrap(),
        );
        // t1: A at pos 1 -> bit 1
        assert_eq!(states[t1][0], 0b1000_0000);
        // t3: R = A|G -> bits 1 and 2
        assert_eq!(states[t3][0], 0b1100_0000);
        // t4: N -> nothing
        assert_eq!(states[t4][0], 0);
        // internal nodes start all-zero
        assert_eq!(states[tree.root], vec![0, 0]);
    }

    #[test]
    fn test_type_alignment_deletion_character() {
        let dir = tempfile::tempdir().unwrap();
        let aln = write_file(&dir, "aln.fasta", ">t1\nA--T\n>t2\nACGT\n>t3\nA--T\n");
        let cfg = write_file(&dir, "config", "del:2:2\n");
        let tree = Tree::from_newick("((t1:1,t2:1):1,t3:1);").unwrap();

        let (characters, _, states) = type_alignment(&tree, &aln, &cfg, None).unwrap();
        assert_eq!(characters[0].state_key, vec!["del", "oth"]);
        assert_eq!(states[tree.tip_id("t1").unwrap()][0], 0b1000_0000);
        assert_eq!(states[tree.tip_id("t2").unwrap()][0], 0b0100_0000);
    }

    #[test]
    fn test_type_alignment_rejects_width_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let aln = write_file(&dir, "aln.fasta", ">t1\nACGT\n>t2\nACG\n");
        let cfg = write_file(&dir, "config", "nuc:1\n");
        let tree = Tree::from_newick("(t1:1,t2:1);").unwrap();
        assert!(type_alignment(&tree, &aln, &cfg, None).is_err());
    }

    #[test]
    fn test_type_alignment_rejects_unknown_tip() {
        let dir = tempfile::tempdir().unwrap();
        let aln = write_file(&dir, "aln.fasta", ">t1\nACGT\n>stranger\nACGT\n");
        let cfg = write_file(&dir, "config", "nuc:1\n");
        let tree = Tree::from_newick("(t1:1,t2:1);").unwrap();
        assert!(type_alignment(&tree, &aln, &cfg, None).is_err());
    }

    #[test]
    fn test_type_alignment_all_nucleotides() {
        let dir = tempfile::tempdir().unwrap();
        let aln = write_file(&dir, "aln.fasta", ">t1\nACG\n>t2\nATG\n");
        let tree = Tree::from_newick("(t1:1,t2:1);").unwrap();
        let (characters, layout, states) =
            type_alignment_all_nucleotides(&tree, &aln).unwrap();
        assert_eq!(characters.len(), 3);
        assert_eq!(layout.total_len, 3);
        assert_eq!(characters[1].state_key, vec!["C", "T"]);
        assert_eq!(states[tree.tip_id("t2").unwrap()][1], 0b0100_0000);
    }
}
