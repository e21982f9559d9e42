//! Textual reporting over a labelled tree: per-transition child summaries,
//! mutation spectra, the per-branch substitution table and the common
//! ancestor sequence.

use crate::annotation::iupac_code;
use crate::characters::{Character, Layout, StartStop, StateMatrix, state_labels};
use crate::error::{Error, Result};
use crate::label::{NucChange, Transition};
use crate::tree::Tree;

/// Summarises one character's transitions. Transitions are grouped by their
/// `"anc->der"` string in first-seen order; for each occurrence the tips
/// below the derived node are counted by state, and the occurrence is
/// reported when its descendant tip count is strictly greater than
/// `threshold`.
pub fn summarize_transitions(
    threshold: usize,
    transitions: &[Transition],
    tree: &Tree,
    states: &StateMatrix,
    span: StartStop,
    character: &Character,
) -> Vec<String> {
    let mut output = Vec::new();
    output.push(character.name.clone());
    output.push("-".repeat(character.name.len()));

    // aggregate by transition string, first-seen order
    let mut groups: Vec<(&str, Vec<&Transition>)> = Vec::new();
    for t in transitions {
        match groups.iter_mut().find(|(k, _)| *k == t.transition) {
            Some((_, g)) => g.push(t),
            None => groups.push((t.transition.as_str(), vec![t])),
        }
    }

    output.push(format!("{} type(s) of transition:", groups.len()));

    for (transition, occurrences) in &groups {
        output.push(format!("\t{transition}"));
        output.push(format!(
            "\t{} occurrence(s) on the tree:",
            occurrences.len()
        ));
        for occurrence in occurrences {
            let counts = child_state_counts(tree, states, span, character, occurrence.down_node);
            let total: usize = counts.iter().map(|(_, n)| n).sum();
            if total <= threshold {
                continue;
            }
            let histogram: Vec<String> = counts
                .iter()
                .map(|(state, n)| format!("{state}: {n}"))
                .collect();
            let occurrence_name = occurrence
                .label
                .split(',')
                .nth(1)
                .unwrap_or(&occurrence.label);
            output.push(format!(
                "\t\t{occurrence_name} has {total} child tip(s), with character counts at {} of: ({})",
                character.name,
                histogram.join(", ")
            ));
        }
    }

    output
}

/// Counts the states of the tips below `node` (inclusive when it is a tip),
/// keyed by pipe-joined state label, `"missing"` for all-zero tips.
/// First-seen order keeps the histogram deterministic.
fn child_state_counts(
    tree: &Tree,
    states: &StateMatrix,
    span: StartStop,
    character: &Character,
    node: usize,
) -> Vec<(String, usize)> {
    let mut counts: Vec<(String, usize)> = Vec::new();
    for tip in tree.subtree_tips(node) {
        let labels = state_labels(character, &states[tip][span.start..span.stop]);
        let state = if labels.is_empty() {
            "missing".to_string()
        } else {
            labels.join("|")
        };
        match counts.iter_mut().find(|(k, _)| *k == state) {
            Some((_, n)) => *n += 1,
            None => counts.push((state, 1)),
        }
    }
    counts
}

const BASES: [&str; 4] = ["A", "C", "G", "T"];

/// The raw 4x4 mutation spectrum over plain labels: for every edge comment,
/// the substring after `=` up to the first `,` is matched against the 12
/// ordered nucleotide pairs. Rows come back in fixed A,C,G,T order.
pub fn mutation_spectrum(tree: &Tree) -> Vec<(String, usize)> {
    let mut spectrum: Vec<(String, usize)> = Vec::new();
    for a in BASES {
        for b in BASES {
            if a != b {
                spectrum.push((format!("{a}->{b}"), 0));
            }
        }
    }
    for edge in &tree.edges {
        for comment in &edge.comments {
            let Some((_, body)) = comment.split_once('=') else {
                continue;
            };
            let key = body.split(',').next().unwrap_or(body);
            if let Some((_, n)) = spectrum.iter_mut().find(|(k, _)| k == key) {
                *n += 1;
            }
        }
    }
    spectrum
}

/// The synonymous / non-synonymous mutation spectrum over the structured
/// substitutions from annotated labelling: the same fixed 12 ordered base
/// pairs as the raw spectrum, each split into a synonymous and a
/// non-synonymous sub-count. An `AA=` comment contributes one
/// non-synonymous count per underlying nucleotide substitution in its
/// codon. Substitutions with ambiguous (multi-state) ends match none of
/// the pairs and are skipped, as in the raw spectrum.
pub fn syn_nonsyn_spectrum(changes: &[NucChange]) -> Vec<(String, usize, usize)> {
    let mut spectrum: Vec<(String, usize, usize)> = Vec::new();
    for a in BASES {
        for b in BASES {
            if a != b {
                spectrum.push((format!("{a}->{b}"), 0, 0));
            }
        }
    }
    for change in changes {
        let key = format!("{}->{}", change.anc, change.der);
        if let Some(row) = spectrum.iter_mut().find(|(k, _, _)| *k == key) {
            if change.synonymous {
                row.1 += 1;
            } else {
                row.2 += 1;
            }
        }
    }
    spectrum
}

/// The most recent common ancestor of everything except the outgroup: the
/// unique non-tip child of the root. The other root child must be a tip
/// named `outgroup`.
pub fn mrca(tree: &Tree, outgroup: &str) -> Result<usize> {
    let root_children: Vec<usize> = tree.neighbours(tree.root);
    if root_children.len() != 2 {
        return Err(Error::Schema(
            "the root must have exactly two children to take a common ancestor".to_string(),
        ));
    }
    let mut ancestor = None;
    for &child in &root_children {
        if tree.is_tip(child) {
            if tree.nodes[child].name.as_deref() != Some(outgroup) {
                return Err(Error::Input(
                    "didn't find the outgroup as a child of the root".to_string(),
                ));
            }
        } else {
            ancestor = Some(child);
        }
    }
    ancestor.ok_or_else(|| {
        Error::Input("didn't find a non-tip child of the root to take as the ancestor".to_string())
    })
}

/// Renders a node's state vector as one IUPAC-coded sequence: per
/// character, the set states are projected to labels, sorted, and looked up
/// as an ambiguity code; anything unknown becomes `N`.
pub fn ancestral_sequence(
    characters: &[Character],
    layout: &Layout,
    states: &StateMatrix,
    node: usize,
) -> String {
    let mut seq = String::with_capacity(characters.len());
    for (character, span) in characters.iter().zip(&layout.index) {
        let mut labels = state_labels(character, &states[node][span.start..span.stop]);
        labels.sort_unstable();
        seq.push(iupac_code(&labels.concat()).unwrap_or('N'));
    }
    seq
}

/// The per-branch substitution table written by the all-nucleotides preset:
/// branch index, length, whether it ends in a tip, the number of inferred
/// changes and the labels themselves.
pub fn branch_table(tree: &Tree) -> String {
    let mut out = String::from("branch\tlength\tterminal\tnummuts\ttransitions\n");
    for (i, edge) in tree.edges.iter().enumerate() {
        out.push_str(&format!(
            "{i}\t{:.8}\t{}\t{}\t{}\n",
            edge.length.unwrap_or(0.0),
            tree.is_tip(edge.child),
            edge.comments.len(),
            edge.comments.join(" ")
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsimony::{PolytomyMode, down_pass, up_pass};
    use crate::tipfile::parse_tipfile;

    fn labelled_quartet() -> (Tree, Vec<Character>, Layout, StateMatrix, Vec<Vec<Transition>>) {
        let mut tree = Tree::from_newick("((t1:1,t2:1):1,(t3:1,t4:1):1);").unwrap();
        let (characters, layout, mut states) =
            parse_tipfile(&tree, "name,site\nt1,A\nt2,A\nt3,C\nt4,C\n").unwrap();
        up_pass(&tree, PolytomyMode::Hard, &mut states, &layout);
        down_pass(&tree, &mut states, &layout);
        let transitions = crate::label::label_changes(&mut tree, &characters, &states, &layout);
        (tree, characters, layout, states, transitions)
    }

    #[test]
    fn test_summarize_transitions() {
        let (tree, characters, layout, states, transitions) = labelled_quartet();
        let lines = summarize_transitions(
            0,
            &transitions[0],
            &tree,
            &states,
            layout.index[0],
            &characters[0],
        );
        assert_eq!(lines[0], "site");
        assert_eq!(lines[1], "----");
        assert_eq!(lines[2], "2 type(s) of transition:");
        assert!(lines.iter().any(|l| l.contains("A|C->A")));
        assert!(lines.iter().any(|l| l.contains("A|C->C#0 has 2 child tip(s)")));
        assert!(lines.iter().any(|l| l.contains("(C: 2)")));
    }

    #[test]
    fn test_summarize_threshold_is_strict() {
        let (tree, characters, layout, states, transitions) = labelled_quartet();
        // each occurrence has exactly 2 descendant tips; a threshold of 2
        // filters them all out
        let lines = summarize_transitions(
            2,
            &transitions[0],
            &tree,
            &states,
            layout.index[0],
            &characters[0],
        );
        assert!(lines.iter().all(|l| !l.contains("child tip(s)")));
        let lines = summarize_transitions(
            1,
            &transitions[0],
            &tree,
            &states,
            layout.index[0],
            &characters[0],
        );
        assert!(lines.iter().any(|l| l.contains("child tip(s)")));
    }

    #[test]
    fn test_mutation_spectrum_counts_plain_labels() {
        let (tree, ..) = labelled_quartet();
        let spectrum = mutation_spectrum(&tree);
        assert_eq!(spectrum.len(), 12);
        // the quartet labels are A|C->A and A|C->C, which are not simple
        // base pairs, so every bucket stays 0
        assert!(spectrum.iter().all(|(_, n)| *n == 0));

        let mut tree2 = Tree::from_newick("((t1:1,t2:1):1,t3:1);").unwrap();
        tree2.add_edge_comment(0, "nuc:3=A->G,A->G#0".to_string());
        tree2.add_edge_comment(1, "nuc:9=A->G,A->G#1".to_string());
        tree2.add_edge_comment(2, "nuc:4=C->T,C->T#0".to_string());
        let spectrum = mutation_spectrum(&tree2);
        let get = |k: &str| spectrum.iter().find(|(s, _)| s == k).unwrap().1;
        assert_eq!(get("A->G"), 2);
        assert_eq!(get("C->T"), 1);
        assert_eq!(get("G->A"), 0);
    }

    #[test]
    fn test_syn_nonsyn_spectrum() {
        let change = |anc: &str, der: &str, synonymous: bool| NucChange {
            edge: 0,
            pos: 11,
            anc: anc.to_string(),
            der: der.to_string(),
            synonymous,
        };
        let changes = vec![
            change("A", "G", true),
            change("A", "G", true),
            change("A", "G", false),
            change("C", "T", false),
            // ambiguous ends match none of the 12 pairs and are skipped
            change("A|G", "T", true),
        ];
        let spectrum = syn_nonsyn_spectrum(&changes);
        assert_eq!(spectrum.len(), 12);
        let get = |k: &str| {
            let row = spectrum.iter().find(|(s, _, _)| s == k).unwrap();
            (row.1, row.2)
        };
        assert_eq!(get("A->G"), (2, 1));
        assert_eq!(get("C->T"), (0, 1));
        assert_eq!(get("G->A"), (0, 0));
        // bucket sums cover exactly the unambiguous substitutions
        let total: usize = spectrum.iter().map(|(_, s, n)| s + n).sum();
        assert_eq!(total, 4);
    }

    #[test]
    fn test_mrca() {
        let tree = Tree::from_newick("((t1:1,t2:1):1,out:1);").unwrap();
        let anc = mrca(&tree, "out").unwrap();
        assert!(!tree.is_tip(anc));
        assert!(mrca(&tree, "t1").is_err());

        let star = Tree::from_newick("(t1:1,t2:1,t3:1);").unwrap();
        assert!(mrca(&star, "t3").is_err());
    }

    #[test]
    fn test_ancestral_sequence() {
        let tree = Tree::from_newick("((t1:1,t2:1):1,out:1);").unwrap();
        let (characters, layout, mut states) = parse_tipfile(
            &tree,
            "name,p1,p2,p3\nt1,A,C,G\nt2,A,T,G\nout,A,C,G\n",
        )
        .unwrap();
        up_pass(&tree, PolytomyMode::Hard, &mut states, &layout);
        let anc = mrca(&tree, "out").unwrap();
        // p2 is ambiguous {C,T} at the ancestor -> IUPAC Y
        assert_eq!(ancestral_sequence(&characters, &layout, &states, anc), "AYG");
    }

    #[test]
    fn test_ancestral_sequence_missing_site_is_n() {
        let tree = Tree::from_newick("((t1:1,t2:1):1,out:1);").unwrap();
        let (characters, layout, states) =
            parse_tipfile(&tree, "name,p1\nt1,A\nt2,A\nout,A\n").unwrap();
        // untyped internal node: all-zero states render as N
        let anc = mrca(&tree, "out").unwrap();
        assert_eq!(ancestral_sequence(&characters, &layout, &states, anc), "N");
    }

    #[test]
    fn test_branch_table() {
        let mut tree = Tree::from_newick("((t1:1,t2:1):1,t3:1);").unwrap();
        tree.add_edge_comment(0, "syn=A1G".to_string());
        let table = branch_table(&tree);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines[0], "branch\tlength\tterminal\tnummuts\ttransitions");
        assert_eq!(lines.len(), 1 + tree.edges.len());
        assert!(lines[1].starts_with("0\t1.00000000\tfalse\t1\tsyn=A1G"));
    }
}
