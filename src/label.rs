//! Branch labelling: turning per-site state differences across edges into
//! edge comments, plain or annotated against a genome.
//!
//! Both modes walk the edges in pre-order and apply the same two filters:
//! a transition into missing data is never labelled, and a transition into a
//! tip whose (ambiguous) state set contains everything the parent has is
//! not a real change.

use log::debug;

use crate::annotation::{Region, RegionKind, iupac_code, translate_codon};
use crate::bitset::{different, is_any_bit_set, is_subset};
use crate::characters::{Character, Layout, StateMatrix, state_labels};
use crate::tree::Tree;

/// One inferred change on one edge. Node and edge references are plain
/// indices into the tree arena.
#[derive(Debug, Clone)]
pub struct Transition {
    pub up_node: usize,
    pub down_node: usize,
    pub edge: usize,
    pub up_state: String,
    pub down_state: String,
    /// Per-transition-string occurrence number, in pre-order discovery
    /// order, starting at 0.
    pub number: usize,
    /// `"anc->der"`.
    pub transition: String,
    /// The full edge comment this transition produced.
    pub label: String,
}

/// Plain labelling: one `NAME=anc->der,anc->der#k` comment per changed
/// character per edge. Returns the transitions grouped per character, in
/// discovery order.
pub fn label_changes(
    tree: &mut Tree,
    characters: &[Character],
    states: &StateMatrix,
    layout: &Layout,
) -> Vec<Vec<Transition>> {
    let mut transitions: Vec<Vec<Transition>> = vec![Vec::new(); characters.len()];
    for eid in tree.preorder_edges() {
        let up = tree.edges[eid].parent;
        let down = tree.edges[eid].child;
        let down_is_tip = tree.is_tip(down);
        for (i, character) in characters.iter().enumerate() {
            let span = layout.index[i];
            let up_states = &states[up][span.start..span.stop];
            let down_states = &states[down][span.start..span.stop];
            if !different(up_states, down_states) {
                continue;
            }
            // transitions to missing data are not changes
            if !is_any_bit_set(down_states) {
                continue;
            }
            // nor are transitions into a tip that is merely ambiguous
            if down_is_tip && is_subset(up_states, down_states) {
                continue;
            }

            let anc = state_labels(character, up_states).join("|");
            let der = state_labels(character, down_states).join("|");
            let transition = format!("{anc}->{der}");
            let number = transitions[i]
                .iter()
                .filter(|t| t.transition == transition)
                .count();
            let label = format!("{}={transition},{transition}#{number}", character.name);
            tree.add_edge_comment(eid, label.clone());
            transitions[i].push(Transition {
                up_node: up,
                down_node: down,
                edge: eid,
                up_state: anc,
                down_state: der,
                number,
                transition,
                label,
            });
        }
    }
    debug!(
        "labelled {} transition(s) across {} character(s)",
        transitions.iter().map(|t| t.len()).sum::<usize>(),
        characters.len()
    );
    transitions
}

/// One nucleotide substitution inferred in annotated mode, kept in
/// structured form so the spectrum reports never have to re-parse rendered
/// comments. `anc`/`der` are pipe-joined state labels; `synonymous` mirrors
/// the kind of label the substitution was emitted under (`syn=` comments,
/// or folded into an `AA=` comment).
#[derive(Debug, Clone)]
pub struct NucChange {
    pub edge: usize,
    /// 1-based genome position.
    pub pos: usize,
    pub anc: String,
    pub der: String,
    pub synonymous: bool,
}

/// Annotated labelling over genome regions. Characters must be the
/// all-nucleotides typing, one single-byte character per alignment column.
///
/// Intergenic changes and synonymous codon changes become
/// `syn=<anc><pos><der>` comments and add to the edge's synonymous length;
/// amino-acid changes become one `AA=<gene>:<residue>:<from><to>` comment
/// for the whole codon. Codons that cannot be resolved to amino acids on
/// both sides keep their per-nucleotide comments but contribute no
/// synonymous length.
///
/// Returns every nucleotide substitution that was labelled, in the order
/// the labels were appended.
pub fn label_changes_annotated(
    tree: &mut Tree,
    regions: &[Region],
    characters: &[Character],
    states: &StateMatrix,
) -> Vec<NucChange> {
    let mut changes = Vec::new();
    for eid in tree.preorder_edges() {
        let up = tree.edges[eid].parent;
        let down = tree.edges[eid].child;
        let down_is_tip = tree.is_tip(down);
        for region in regions {
            match region.kind {
                RegionKind::Intergenic => {
                    for pos in region.start - 1..region.stop {
                        let up_states = &states[up][pos..pos + 1];
                        let down_states = &states[down][pos..pos + 1];
                        if !different(up_states, down_states) {
                            continue;
                        }
                        if !is_any_bit_set(down_states) {
                            continue;
                        }
                        if down_is_tip && is_subset(up_states, down_states) {
                            continue;
                        }
                        let anc = state_labels(&characters[pos], up_states).join("|");
                        let der = state_labels(&characters[pos], down_states).join("|");
                        tree.add_edge_comment(eid, format!("syn={anc}{}{der}", pos + 1));
                        tree.edges[eid].syn_len += 1.0;
                        changes.push(NucChange {
                            edge: eid,
                            pos: pos + 1,
                            anc,
                            der,
                            synonymous: true,
                        });
                    }
                }
                RegionKind::Cds => {
                    for (res, &codon_start) in region.codon_starts.iter().enumerate() {
                        let cs = codon_start - 1;
                        if !different(&states[up][cs..cs + 3], &states[down][cs..cs + 3]) {
                            continue;
                        }

                        // build both codons and collect the changed positions
                        let mut up_codon = String::new();
                        let mut down_codon = String::new();
                        let mut candidates: Vec<NucChange> = Vec::new();
                        for pos in cs..cs + 3 {
                            let up_states = &states[up][pos..pos + 1];
                            let down_states = &states[down][pos..pos + 1];

                            let mut up_labels = state_labels(&characters[pos], up_states);
                            up_labels.sort_unstable();
                            let mut down_labels = state_labels(&characters[pos], down_states);
                            down_labels.sort_unstable();

                            push_codon_base(&mut up_codon, &up_labels);
                            push_codon_base(&mut down_codon, &down_labels);

                            let anc = up_labels.join("|");
                            let der = down_labels.join("|");
                            if anc == der {
                                continue;
                            }
                            if !is_any_bit_set(down_states) {
                                continue;
                            }
                            if down_is_tip && is_subset(up_states, down_states) {
                                continue;
                            }
                            candidates.push(NucChange {
                                edge: eid,
                                pos: pos + 1,
                                anc,
                                der,
                                synonymous: true,
                            });
                        }

                        let up_aa = translate_codon(&up_codon).unwrap_or('X');
                        let down_aa = translate_codon(&down_codon).unwrap_or('X');

                        if up_aa != 'X' && down_aa != 'X' {
                            if up_aa != down_aa {
                                // a real amino-acid change: one comment for
                                // the codon, no per-nucleotide labels; the
                                // underlying substitutions are recorded as
                                // non-synonymous
                                tree.add_edge_comment(
                                    eid,
                                    format!("AA={}:{}:{up_aa}{down_aa}", region.name, res + 1),
                                );
                                for mut change in candidates {
                                    change.synonymous = false;
                                    changes.push(change);
                                }
                            } else {
                                // synonymous: label each nucleotide and
                                // count it into the synonymous length
                                for change in candidates {
                                    tree.add_edge_comment(
                                        eid,
                                        format!("syn={}{}{}", change.anc, change.pos, change.der),
                                    );
                                    tree.edges[eid].syn_len += 1.0;
                                    changes.push(change);
                                }
                            }
                        } else {
                            // unresolved on at least one side: keep the
                            // labels but leave the synonymous length alone
                            for change in candidates {
                                tree.add_edge_comment(
                                    eid,
                                    format!("syn={}{}{}", change.anc, change.pos, change.der),
                                );
                                changes.push(change);
                            }
                        }
                    }
                }
            }
        }
    }
    changes
}

/// One IUPAC letter for a sorted set of base labels; multi-base sets map
/// through the ambiguity codes, anything unknown becomes `N`.
fn push_codon_base(codon: &mut String, sorted_labels: &[&str]) {
    match sorted_labels.len() {
        1 => codon.push_str(sorted_labels[0]),
        n if n > 1 => codon.push(iupac_code(&sorted_labels.concat()).unwrap_or('N')),
        _ => codon.push('N'),
    }
}

/// Annotates every node with its id and its inferred states, one comment
/// per character.
pub fn label_nodes(
    tree: &mut Tree,
    characters: &[Character],
    states: &StateMatrix,
    layout: &Layout,
) {
    for id in 0..tree.nodes.len() {
        tree.add_node_comment(id, format!("nodenumber={id}"));
        for (i, character) in characters.iter().enumerate() {
            let span = layout.index[i];
            let labels = state_labels(character, &states[id][span.start..span.stop]);
            tree.add_node_comment(id, format!("{}node={}", character.name, labels.join("|")));
        }
    }
}
