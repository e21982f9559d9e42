//! Typing characters from a CSV tip table.
//!
//! The first column is the tip name and the header row names the
//! characters. Cells are taken verbatim as state labels; empty cells are
//! missing data. The same two-pass protocol as the alignment path applies:
//! discover states in first-seen order, then encode bits.

use std::path::Path;

use log::info;

use crate::bitset::set_bit;
use crate::characters::{Character, CharacterKind, Layout, StateMatrix, zero_matrix};
use crate::error::{Error, Result};
use crate::tree::Tree;

/// Parses tip table text against a tree. Returns the characters, their
/// packed layout and the node-state matrix with the tips filled in.
pub fn parse_tipfile(tree: &Tree, text: &str) -> Result<(Vec<Character>, Layout, StateMatrix)> {
    let mut lines = text.lines().filter(|l| !l.trim().is_empty());

    let header = lines
        .next()
        .ok_or_else(|| Error::Input("the tipfile is empty".to_string()))?;
    let columns: Vec<&str> = header.split(',').collect();
    if columns.len() < 2 {
        return Err(Error::Input(
            "badly formatted tipfile: fewer than two columns in the csv".to_string(),
        ));
    }
    let mut characters: Vec<Character> = columns[1..]
        .iter()
        .map(|name| Character {
            name: name.to_string(),
            kind: CharacterKind::Generic,
            state_key: Vec::new(),
        })
        .collect();

    // pass 1: discover states
    let rows: Vec<Vec<&str>> = lines.map(|l| l.split(',').collect()).collect();
    for row in &rows {
        if row.len() != columns.len() {
            return Err(Error::Input(
                "badly formatted tipfile: number of character columns doesn't match the length of the header"
                    .to_string(),
            ));
        }
        for (character, &cell) in characters.iter_mut().zip(&row[1..]) {
            if !cell.is_empty() {
                character.observe(cell);
            }
        }
    }

    let layout = Layout::of(&characters);

    // pass 2: encode bits into the tips' rows
    let mut states = zero_matrix(tree.nodes.len(), &layout);
    for row in &rows {
        let node_id = tree.tip_id(row[0])?;
        let node_states = &mut states[node_id];
        for ((character, span), &cell) in characters.iter().zip(&layout.index).zip(&row[1..]) {
            if cell.is_empty() {
                continue;
            }
            let bit = character
                .state_index(cell)
                .expect("state observed during discovery");
            set_bit(&mut node_states[span.start..span.stop], bit);
        }
    }

    info!(
        "typed {} character(s) across {} tipfile row(s)",
        characters.len(),
        rows.len()
    );
    Ok((characters, layout, states))
}

/// Reads and parses a CSV tip table file.
pub fn type_tipfile(tree: &Tree, path: &Path) -> Result<(Vec<Character>, Layout, StateMatrix)> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| Error::Input(format!("could not read tipfile {}: {e}", path.display())))?;
    parse_tipfile(tree, &text)
}
