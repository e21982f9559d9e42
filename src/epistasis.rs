//! The epistasis statistic of Kryazhimskiy et al. (2011): for every ordered
//! pair of residues, how tightly substitutions at the second site follow
//! substitutions at the first, measured in synonymous distance along the
//! tree and scored against the tree-wide expectation τ.
//!
//! Operates on a tree whose edges already carry `syn=`/`AA=` comments and
//! synonymous lengths from annotated labelling. Edges into tips are skipped
//! throughout; substitutions on external branches are discounted.

use std::cmp::Ordering;

use log::{info, warn};
use rayon::prelude::*;

use crate::tree::Tree;

/// The E_τ score of one ordered residue pair.
#[derive(Debug, Clone)]
pub struct PairScore {
    pub i: String,
    pub j: String,
    pub e_tau: f64,
}

/// Per-edge facts the walks need, precomputed once and shared read-only by
/// the scoring workers.
struct EdgeInfo {
    child: usize,
    internal: bool,
    syn_len: f64,
    /// `"<gene>:<residue>"` for each AA= comment, deduplicated.
    residues: Vec<String>,
}

fn edge_infos(tree: &Tree) -> Vec<EdgeInfo> {
    tree.edges
        .iter()
        .map(|edge| {
            let mut residues: Vec<String> = Vec::new();
            for comment in &edge.comments {
                let Some(rest) = comment.strip_prefix("AA=") else {
                    continue;
                };
                let mut parts = rest.split(':');
                if let (Some(gene), Some(res)) = (parts.next(), parts.next()) {
                    let site = format!("{gene}:{res}");
                    if !residues.contains(&site) {
                        residues.push(site);
                    }
                }
            }
            EdgeInfo {
                child: edge.child,
                internal: !tree.is_tip(edge.child),
                syn_len: edge.syn_len,
                residues,
            }
        })
        .collect()
}

/// τ: the mean synonymous distance between non-synonymous substitutions,
/// weighted by the number of substitution pairs each edge pair contributes.
///
/// For each internal edge carrying m >= 1 substitutions, every descendant
/// internal edge with k substitutions contributes m*k pairs at distance
/// half-edge + between + half-edge; an edge carrying m >= 2 substitutions
/// additionally contributes intra-edge pairs at a third of its own length.
fn tau(tree: &Tree, infos: &[EdgeInfo]) -> f64 {
    let mut dist_sum = 0.0;
    let mut weight_sum = 0.0;

    for eid in tree.preorder_edges() {
        let info = &infos[eid];
        if !info.internal {
            continue;
        }
        let m = info.residues.len();
        if m == 0 {
            continue;
        }

        // every non-synonymous substitution below this edge, paired with
        // everything on this edge
        let mut stack: Vec<(usize, f64)> = vec![(info.child, 0.0)];
        while let Some((node, between)) = stack.pop() {
            for &f in &tree.nodes[node].child_edges {
                let below = &infos[f];
                if !below.internal {
                    continue;
                }
                let k = below.residues.len();
                if k > 0 {
                    let weight = (m * k) as f64;
                    dist_sum += weight * (info.syn_len / 2.0 + between + below.syn_len / 2.0);
                    weight_sum += weight;
                }
                stack.push((below.child, between + below.syn_len));
            }
        }

        // unordered pairs on the edge itself
        if m >= 2 {
            let pairs = (m * (m - 1) / 2) as f64;
            let weight = (m * m) as f64;
            dist_sum += pairs * weight * (info.syn_len / 3.0);
            weight_sum += pairs * weight;
        }
    }

    if weight_sum == 0.0 {
        0.0
    } else {
        dist_sum / weight_sum
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Open {
    Closed,
    I,
    J,
}

/// One walk over the tree for an ordered pair (i, j), with a fixed ordering
/// for the edges that carry both sites. Collects t_π, the synonymous
/// distances from each substitution at i to the next substitution at j.
fn collect_t_pi(
    tree: &Tree,
    infos: &[EdgeInfo],
    site_i: &str,
    site_j: &str,
    unresolved: &[usize],
    ordering: u64,
) -> Vec<f64> {
    let mut t_pi = Vec::new();
    // (node, open, accumulated synonymous distance)
    let mut stack: Vec<(usize, Open, f64)> = vec![(tree.root, Open::Closed, 0.0)];

    while let Some((node, open, acc)) = stack.pop() {
        for &eid in &tree.nodes[node].child_edges {
            let info = &infos[eid];
            if !info.internal {
                continue;
            }
            let length = info.syn_len;
            let i_here = info.residues.iter().any(|r| r == site_i);
            let j_here = info.residues.iter().any(|r| r == site_j);

            let (next_open, next_acc) = match (i_here, j_here) {
                (false, false) => (open, acc + length),
                (true, false) => (Open::I, length / 2.0),
                (false, true) => {
                    if open == Open::I {
                        t_pi.push(acc + length / 2.0);
                    }
                    (Open::J, length / 2.0)
                }
                (true, true) => {
                    // temporally unresolved: the ordering bit decides which
                    // site came first on this edge
                    let slot = unresolved
                        .iter()
                        .position(|&u| u == eid)
                        .expect("unresolved edge is listed");
                    let i_first = ordering >> slot & 1 == 0;
                    let mut cur_open = open;
                    let mut cur_acc = acc;
                    for (idx, event) in if i_first {
                        [Open::I, Open::J]
                    } else {
                        [Open::J, Open::I]
                    }
                    .into_iter()
                    .enumerate()
                    {
                        match event {
                            Open::J if cur_open == Open::I => {
                                // the second event sits one intra-edge gap
                                // after the first; the first sits half an
                                // edge after the entry point
                                let gap = if idx == 0 { cur_acc + length / 2.0 } else { cur_acc };
                                t_pi.push(gap);
                            }
                            _ => {}
                        }
                        cur_open = event;
                        cur_acc = length / 3.0;
                    }
                    (cur_open, length / 2.0)
                }
            };
            stack.push((info.child, next_open, next_acc));
        }
    }
    t_pi
}

/// E_τ for one ordered pair: the mean over t_π of exp(-t/τ), averaged over
/// the 2^m orderings of the edges carrying both sites.
fn score_pair(
    tree: &Tree,
    infos: &[EdgeInfo],
    site_i: &str,
    site_j: &str,
    tau: f64,
) -> PairScore {
    let unresolved: Vec<usize> = (0..infos.len())
        .filter(|&e| {
            infos[e].internal
                && infos[e].residues.iter().any(|r| r == site_i)
                && infos[e].residues.iter().any(|r| r == site_j)
        })
        .collect();
    if unresolved.len() > 20 {
        warn!(
            "pair ({site_i}, {site_j}) shares {} branches; enumerating {} orderings",
            unresolved.len(),
            1u128 << unresolved.len()
        );
    }

    let orderings = 1u64 << unresolved.len();
    let mut total = 0.0;
    for ordering in 0..orderings {
        let t_pi = collect_t_pi(tree, infos, site_i, site_j, &unresolved, ordering);
        if !t_pi.is_empty() {
            total +=
                t_pi.iter().map(|t| (-t / tau).exp()).sum::<f64>() / t_pi.len() as f64;
        }
    }

    PairScore {
        i: site_i.to_string(),
        j: site_j.to_string(),
        e_tau: total / orderings as f64,
    }
}

/// Scores every ordered pair of residues seen on internal edges and ranks
/// them by descending E_τ. Pair scoring runs on the current rayon pool; the
/// tree and τ are shared read-only.
pub fn epistasis(tree: &Tree) -> Vec<PairScore> {
    let infos = edge_infos(tree);
    let tau = tau(tree, &infos);
    info!("tau = {tau}");
    if tau <= 0.0 {
        warn!("no synonymous distance between substitutions on the tree; nothing to score");
        return Vec::new();
    }

    // residues in first-seen pre-order
    let mut residues: Vec<&str> = Vec::new();
    for eid in tree.preorder_edges() {
        if !infos[eid].internal {
            continue;
        }
        for site in &infos[eid].residues {
            let site = site.as_str();
            if !residues.contains(&site) {
                residues.push(site);
            }
        }
    }

    let mut pairs: Vec<(&str, &str)> = Vec::new();
    for &a in &residues {
        for &b in &residues {
            if a != b {
                pairs.push((a, b));
            }
        }
    }
    info!(
        "scoring {} ordered pair(s) over {} residue(s)",
        pairs.len(),
        residues.len()
    );

    let mut scores: Vec<PairScore> = pairs
        .par_iter()
        .map(|&(i, j)| score_pair(tree, &infos, i, j, tau))
        .collect();
    scores.sort_by(|a, b| b.e_tau.partial_cmp(&a.e_tau).unwrap_or(Ordering::Equal));
    scores
}
