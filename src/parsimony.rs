//! The parsimony engine: Fitch up-pass, MPR down-pass, acctrans and
//! deltrans. All passes mutate the node-state matrix in place and iterate
//! every character inside each node visit, so one node's states stay hot in
//! cache while they are read and written.

use clap::ValueEnum;
use log::debug;

use crate::bitset::{
    intersection, is_any_bit_set, set_diff, three_set_mpr, union, var_cover, var_max,
};
use crate::characters::{Layout, StateMatrix};
use crate::tree::Tree;

/// How the up-pass treats a node with three or more children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PolytomyMode {
    /// An unresolved multifurcation: take the majority state set.
    Hard,
    /// Resolvable per character: take the Maddison minimum cover.
    Soft,
}

/// How ties left by the up-pass are resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Resolution {
    /// Accelerate changes toward the root. Runs directly on the up-pass
    /// states, no down-pass needed.
    Acctrans,
    /// Delay changes toward the tips. Runs after the down-pass.
    Deltrans,
    /// The down-pass alone, leaving the full set of most-parsimonious
    /// reconstructions at each node.
    Downpass,
}

/// The Fitch up-pass. Post-order over the tree; at each interior node the
/// children's state sets are combined per character: intersection-else-union
/// for two children, the polytomy rule for more.
pub fn up_pass(tree: &Tree, mode: PolytomyMode, states: &mut StateMatrix, layout: &Layout) {
    debug!("up-pass over {} nodes ({mode:?} polytomies)", tree.nodes.len());
    for id in tree.postorder() {
        if tree.is_tip(id) {
            continue;
        }
        let children: Vec<usize> = tree.nodes[id]
            .child_edges
            .iter()
            .map(|&e| tree.edges[e].child)
            .collect();
        for span in &layout.index {
            let (s, e) = (span.start, span.stop);
            let result = if children.len() == 2 {
                let inter = intersection(&states[children[0]][s..e], &states[children[1]][s..e]);
                if is_any_bit_set(&inter) {
                    inter
                } else {
                    union(&states[children[0]][s..e], &states[children[1]][s..e])
                }
            } else {
                let sets: Vec<&[u8]> = children.iter().map(|&c| &states[c][s..e]).collect();
                match mode {
                    PolytomyMode::Hard => var_max(&sets),
                    PolytomyMode::Soft => var_cover(&sets),
                }
            };
            states[id][s..e].copy_from_slice(&result);
        }
    }
}

/// The MPR down-pass. Pre-order over the edges, skipping the root and the
/// tips; each interior node is recomputed from all of its neighbours (the
/// already-finalised parent plus the children): the Swofford & Maddison
/// three-set rule at degree three, the majority set otherwise.
pub fn down_pass(tree: &Tree, states: &mut StateMatrix, layout: &Layout) {
    debug!("down-pass over {} edges", tree.edges.len());
    for eid in tree.preorder_edges() {
        let node = tree.edges[eid].child;
        if tree.is_tip(node) {
            continue;
        }
        let neighbours = tree.neighbours(node);
        for span in &layout.index {
            let (s, e) = (span.start, span.stop);
            let result = if neighbours.len() == 3 {
                three_set_mpr(
                    &states[neighbours[0]][s..e],
                    &states[neighbours[1]][s..e],
                    &states[neighbours[2]][s..e],
                )
            } else {
                let sets: Vec<&[u8]> = neighbours.iter().map(|&n| &states[n][s..e]).collect();
                var_max(&sets)
            };
            states[node][s..e].copy_from_slice(&result);
        }
    }
}

/// Acctrans: pre-order from the root, for each edge into an interior child,
/// the child keeps only the states its parent does not have, when that set
/// is non-empty. Changes are thereby pulled rootward.
pub fn acctrans(tree: &Tree, states: &mut StateMatrix, layout: &Layout) {
    debug!("acctrans over {} edges", tree.edges.len());
    for eid in tree.preorder_edges() {
        let (parent, child) = (tree.edges[eid].parent, tree.edges[eid].child);
        if tree.is_tip(child) {
            continue;
        }
        for span in &layout.index {
            let (s, e) = (span.start, span.stop);
            let diff = set_diff(&states[child][s..e], &states[parent][s..e]);
            if is_any_bit_set(&diff) {
                states[child][s..e].copy_from_slice(&diff);
            }
        }
    }
}

/// Deltrans: pre-order from the root after a down-pass, for each edge into
/// an interior child, the child keeps the intersection with its parent, when
/// that set is non-empty. Changes are thereby pushed tipward.
pub fn deltrans(tree: &Tree, states: &mut StateMatrix, layout: &Layout) {
    debug!("deltrans over {} edges", tree.edges.len());
    for eid in tree.preorder_edges() {
        let (parent, child) = (tree.edges[eid].parent, tree.edges[eid].child);
        if tree.is_tip(child) {
            continue;
        }
        for span in &layout.index {
            let (s, e) = (span.start, span.stop);
            let inter = intersection(&states[parent][s..e], &states[child][s..e]);
            if is_any_bit_set(&inter) {
                states[child][s..e].copy_from_slice(&inter);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitset::get_set_bits;
    use crate::characters::state_labels;
    use crate::tipfile::parse_tipfile;

    fn labels(
        characters: &[crate::characters::Character],
        layout: &Layout,
        states: &StateMatrix,
        node: usize,
    ) -> String {
        let span = layout.index[0];
        state_labels(&characters[0], &states[node][span.start..span.stop]).join("|")
    }

    /// Tips A,A,C,C on a balanced quartet: the internals resolve to A and C
    /// and the root keeps the tie {A,C}.
    #[test]
    fn test_up_pass_balanced_quartet() {
        let tree = Tree::from_newick("((t1:1,t2:1):1,(t3:1,t4:1):1);").unwrap();
        let (characters, layout, mut states) =
            parse_tipfile(&tree, "name,site\nt1,A\nt2,A\nt3,C\nt4,C\n").unwrap();

        up_pass(&tree, PolytomyMode::Hard, &mut states, &layout);

        assert_eq!(labels(&characters, &layout, &states, tree.root), "A|C");
        let left = tree.edges[tree.nodes[tree.root].child_edges[0]].child;
        let right = tree.edges[tree.nodes[tree.root].child_edges[1]].child;
        let mut internal: Vec<String> = vec![
            labels(&characters, &layout, &states, left),
            labels(&characters, &layout, &states, right),
        ];
        internal.sort();
        assert_eq!(internal, vec!["A", "C"]);

        // running the passes again changes nothing
        let snapshot = states.clone();
        up_pass(&tree, PolytomyMode::Hard, &mut states, &layout);
        assert_eq!(states, snapshot);
    }

    /// Tips A,G,A,G: both internals and the root hold {A,G} after the
    /// up-pass and the down-pass keeps them; acctrans leaves them ambiguous
    /// too, because neither child set difference is non-empty.
    #[test]
    fn test_up_then_down_pass_keeps_ambiguity() {
        let tree = Tree::from_newick("((t1:1,t2:1):1,(t3:1,t4:1):1);").unwrap();
        let (characters, layout, mut states) =
            parse_tipfile(&tree, "name,site\nt1,A\nt2,G\nt3,A\nt4,G\n").unwrap();

        up_pass(&tree, PolytomyMode::Hard, &mut states, &layout);
        assert_eq!(labels(&characters, &layout, &states, tree.root), "A|G");

        down_pass(&tree, &mut states, &layout);
        for id in 0..tree.nodes.len() {
            if !tree.is_tip(id) {
                assert_eq!(labels(&characters, &layout, &states, id), "A|G");
            }
        }
    }

    /// Star tree with states A,A,G,G: hard majority ties to {A,G} and the
    /// soft minimum cover agrees.
    #[test]
    fn test_star_tree_polytomy_modes_agree() {
        for mode in [PolytomyMode::Hard, PolytomyMode::Soft] {
            let tree = Tree::from_newick("(t1:1,t2:1,t3:1,t4:1);").unwrap();
            let (characters, layout, mut states) =
                parse_tipfile(&tree, "name,site\nt1,A\nt2,A\nt3,G\nt4,G\n").unwrap();
            up_pass(&tree, mode, &mut states, &layout);
            assert_eq!(labels(&characters, &layout, &states, tree.root), "A|G");
        }
    }

    /// A fully missing tip imposes no constraint on the up-pass.
    #[test]
    fn test_missing_tip_does_not_constrain() {
        let tree = Tree::from_newick("((t1:1,t2:1):1,t3:1);").unwrap();
        let (_, layout, mut states) =
            parse_tipfile(&tree, "name,site\nt1,A\nt2,\nt3,A\n").unwrap();
        up_pass(&tree, PolytomyMode::Hard, &mut states, &layout);
        let inner = tree.edges[tree.nodes[tree.root].child_edges[0]].child;
        let span = layout.index[0];
        // {A} ∩ {} = {} so the union {A} is taken
        assert_eq!(get_set_bits(&states[inner][span.start..span.stop]), vec![1]);
    }

    /// After the down-pass every interior state set is within the union of
    /// its neighbours' sets.
    #[test]
    fn test_down_pass_subset_of_neighbour_union() {
        let tree =
            Tree::from_newick("(((t1:1,t2:1):1,(t3:1,t4:1):1):1,(t5:1,t6:1):1);").unwrap();
        let (_, layout, mut states) = parse_tipfile(
            &tree,
            "name,site\nt1,A\nt2,C\nt3,G\nt4,G\nt5,T\nt6,A\n",
        )
        .unwrap();
        up_pass(&tree, PolytomyMode::Hard, &mut states, &layout);
        down_pass(&tree, &mut states, &layout);

        let span = layout.index[0];
        for id in 0..tree.nodes.len() {
            if tree.is_tip(id) || id == tree.root {
                continue;
            }
            let mut neighbour_union = vec![0u8; span.stop - span.start];
            for n in tree.neighbours(id) {
                crate::bitset::union_assign(
                    &mut neighbour_union,
                    &states[n][span.start..span.stop],
                );
            }
            assert!(crate::bitset::is_subset(
                &states[id][span.start..span.stop],
                &neighbour_union
            ));
        }
    }

    /// Acctrans pulls the change rootward: with tips A,A,C,C the root keeps
    /// {A,C} and both internals drop to their tips' state, so no edge has a
    /// non-empty child-minus-parent difference left.
    #[test]
    fn test_acctrans_resolves_toward_root() {
        let tree = Tree::from_newick("((t1:1,t2:1):1,(t3:1,t4:1):1);").unwrap();
        let (_, layout, mut states) =
            parse_tipfile(&tree, "name,site\nt1,A\nt2,A\nt3,C\nt4,C\n").unwrap();
        up_pass(&tree, PolytomyMode::Hard, &mut states, &layout);
        acctrans(&tree, &mut states, &layout);

        let span = layout.index[0];
        for eid in tree.preorder_edges() {
            let (p, c) = (tree.edges[eid].parent, tree.edges[eid].child);
            if tree.is_tip(c) {
                continue;
            }
            let d = set_diff(
                &states[c][span.start..span.stop],
                &states[p][span.start..span.stop],
            );
            assert!(!is_any_bit_set(&d));
        }
    }

    /// Deltrans pushes changes tipward: after down-pass the internals hold
    /// {A,G}; deltrans then keeps each child's overlap with its parent.
    #[test]
    fn test_deltrans_keeps_parent_overlap() {
        let tree = Tree::from_newick("((t1:1,t2:1):1,(t3:1,t4:1):1);").unwrap();
        let (_, layout, mut states) =
            parse_tipfile(&tree, "name,site\nt1,A\nt2,G\nt3,A\nt4,G\n").unwrap();
        up_pass(&tree, PolytomyMode::Hard, &mut states, &layout);
        down_pass(&tree, &mut states, &layout);
        deltrans(&tree, &mut states, &layout);

        let span = layout.index[0];
        for eid in tree.preorder_edges() {
            let (p, c) = (tree.edges[eid].parent, tree.edges[eid].child);
            if tree.is_tip(c) {
                continue;
            }
            let inter = intersection(
                &states[p][span.start..span.stop],
                &states[c][span.start..span.stop],
            );
            assert!(is_any_bit_set(&inter));
            assert_eq!(inter, states[c][span.start..span.stop].to_vec());
        }
    }
}
