//! Indexed, rooted tree model.
//!
//! # Overview
//! Newick text is parsed with `phylotree` and converted once into this
//! crate's own arena: nodes and edges live in flat vectors and refer to each
//! other by index, so the parsimony passes and the labeller can address
//! per-node state vectors by plain `usize` ids. Edges carry free-form string
//! comments (rendered as `[&...]` blocks in Nexus output) and a synonymous
//! length accumulator used by the epistasis statistic.
//!
//! # Traversal order
//! After construction, every node's children are sorted by maximum subtree
//! depth, descending, so all walks visit the deepest subtrees first. Walks
//! use explicit stacks rather than recursion; input trees can be deep enough
//! to overflow the call stack.

use std::collections::HashMap;

use phylotree::tree::Tree as PhyloTree;

use crate::error::{Error, Result};

/// One tree node. Tips carry a unique non-empty name.
#[derive(Debug, Clone)]
pub struct Node {
    pub name: Option<String>,
    /// Edge leading rootward, `None` at the root.
    pub parent_edge: Option<usize>,
    /// Edges leading tipward, sorted by subtree depth (deepest first).
    pub child_edges: Vec<usize>,
    /// Free-form annotations, emitted in order in Nexus output.
    pub comments: Vec<String>,
    /// Longest root-to-leaf path below this node, in edges.
    pub depth: usize,
}

/// One directed edge, parent (rootward) to child (tipward).
#[derive(Debug, Clone)]
pub struct Edge {
    pub parent: usize,
    pub child: usize,
    pub length: Option<f64>,
    /// Free-form annotations, emitted in order in Nexus output.
    pub comments: Vec<String>,
    /// Inferred synonymous substitution count, set by annotated labelling.
    pub syn_len: f64,
}

#[derive(Debug, Clone)]
pub struct Tree {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    pub root: usize,
    tip_index: HashMap<String, usize>,
}

impl Tree {
    /// Parses Newick text and builds the arena, then sorts neighbours by
    /// subtree depth and indexes the tips.
    pub fn from_newick(newick: &str) -> Result<Self> {
        let src = PhyloTree::from_newick(newick)?;
        Self::from_phylo(&src)
    }

    /// Converts a parsed `phylotree` tree into the arena representation.
    /// Child order from the source is preserved before the depth sort.
    pub fn from_phylo(src: &PhyloTree) -> Result<Self> {
        let src_root = src.get_root()?;
        let mut tree = Tree {
            nodes: Vec::new(),
            edges: Vec::new(),
            root: 0,
            tip_index: HashMap::new(),
        };

        let mut stack: Vec<(usize, Option<usize>)> = vec![(src_root, None)];
        while let Some((src_id, parent)) = stack.pop() {
            let src_node = src.get(&src_id)?;
            let id = tree.nodes.len();
            tree.nodes.push(Node {
                name: src_node.name.clone(),
                parent_edge: None,
                child_edges: Vec::new(),
                comments: Vec::new(),
                depth: 0,
            });
            if let Some(parent) = parent {
                let eid = tree.edges.len();
                tree.edges.push(Edge {
                    parent,
                    child: id,
                    length: src_node.parent_edge,
                    comments: Vec::new(),
                    syn_len: 0.0,
                });
                tree.nodes[id].parent_edge = Some(eid);
                tree.nodes[parent].child_edges.push(eid);
            } else {
                tree.root = id;
            }
            for &c in src_node.children.iter().rev() {
                stack.push((c, Some(id)));
            }
        }

        tree.finalize()?;
        Ok(tree)
    }

    /// Computes subtree depths, sorts children deepest-first and builds the
    /// tip-name index. Fails on unnamed or duplicated tips and on nodes with
    /// a single child.
    fn finalize(&mut self) -> Result<()> {
        for id in self.postorder() {
            if self.nodes[id].child_edges.len() == 1 {
                return Err(Error::Schema(
                    "tree contains a node with a single child".to_string(),
                ));
            }
            let depth = self.nodes[id]
                .child_edges
                .iter()
                .map(|&e| self.nodes[self.edges[e].child].depth + 1)
                .max()
                .unwrap_or(0);
            self.nodes[id].depth = depth;
        }

        let depths: Vec<usize> = self.nodes.iter().map(|n| n.depth).collect();
        let edges = &self.edges;
        for node in self.nodes.iter_mut() {
            node.child_edges
                .sort_by(|&a, &b| depths[edges[b].child].cmp(&depths[edges[a].child]));
        }

        for (id, node) in self.nodes.iter().enumerate() {
            if !node.child_edges.is_empty() {
                continue;
            }
            let name = node
                .name
                .clone()
                .filter(|n| !n.is_empty())
                .ok_or_else(|| Error::Input("tree contains an unnamed tip".to_string()))?;
            if self.tip_index.insert(name.clone(), id).is_some() {
                return Err(Error::Input(format!("duplicate tip name in tree: {name}")));
            }
        }
        Ok(())
    }

    #[inline]
    pub fn is_tip(&self, id: usize) -> bool {
        self.nodes[id].child_edges.is_empty()
    }

    /// True when the root bifurcates, the usual shape of a rooted tree.
    pub fn is_rooted(&self) -> bool {
        self.nodes[self.root].child_edges.len() == 2
    }

    pub fn tip_count(&self) -> usize {
        self.tip_index.len()
    }

    /// Node id for a tip name.
    pub fn tip_id(&self, name: &str) -> Result<usize> {
        self.tip_index
            .get(name)
            .copied()
            .ok_or_else(|| Error::Input(format!("tip name not found in the tree: {name}")))
    }

    /// Tip names in node-id order.
    pub fn tip_names(&self) -> Vec<&str> {
        let mut names: Vec<(usize, &str)> =
            self.tip_index.iter().map(|(n, &id)| (id, n.as_str())).collect();
        names.sort_unstable();
        names.into_iter().map(|(_, n)| n).collect()
    }

    /// Node ids of all neighbours of `id`: the parent first, then the
    /// children in depth order.
    pub fn neighbours(&self, id: usize) -> Vec<usize> {
        let node = &self.nodes[id];
        let mut out = Vec::with_capacity(node.child_edges.len() + 1);
        if let Some(pe) = node.parent_edge {
            out.push(self.edges[pe].parent);
        }
        for &e in &node.child_edges {
            out.push(self.edges[e].child);
        }
        out
    }

    /// Node ids, children before parents, deepest subtrees first.
    pub fn postorder(&self) -> Vec<usize> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<(usize, bool)> = vec![(self.root, false)];
        while let Some((id, expanded)) = stack.pop() {
            if expanded {
                order.push(id);
                continue;
            }
            stack.push((id, true));
            for &e in self.nodes[id].child_edges.iter().rev() {
                stack.push((self.edges[e].child, false));
            }
        }
        order
    }

    /// Edge ids in pre-order: every edge appears before all edges below it,
    /// and a node's child edges appear in depth order.
    pub fn preorder_edges(&self) -> Vec<usize> {
        let mut order = Vec::with_capacity(self.edges.len());
        let mut stack: Vec<usize> = self.nodes[self.root]
            .child_edges
            .iter()
            .rev()
            .copied()
            .collect();
        while let Some(eid) = stack.pop() {
            order.push(eid);
            let child = self.edges[eid].child;
            for &e in self.nodes[child].child_edges.iter().rev() {
                stack.push(e);
            }
        }
        order
    }

    /// Tip node ids in the subtree rooted at `id` (including `id` itself if
    /// it is a tip).
    pub fn subtree_tips(&self, id: usize) -> Vec<usize> {
        let mut tips = Vec::new();
        let mut stack = vec![id];
        while let Some(n) = stack.pop() {
            if self.is_tip(n) {
                tips.push(n);
                continue;
            }
            for &e in self.nodes[n].child_edges.iter().rev() {
                stack.push(self.edges[e].child);
            }
        }
        tips
    }

    pub fn add_node_comment(&mut self, id: usize, comment: String) {
        self.nodes[id].comments.push(comment);
    }

    pub fn add_edge_comment(&mut self, eid: usize, comment: String) {
        self.edges[eid].comments.push(comment);
    }

    /// Rewrites every edge length as its comment count, i.e. the number of
    /// inferred substitutions on the branch.
    pub fn rescale_by_comment_count(&mut self) {
        for e in &mut self.edges {
            e.length = Some(e.comments.len() as f64);
        }
    }

    /// Renders the tree as a Nexus file. Edge comments are always included;
    /// node comments are gated separately for interior nodes and tips.
    /// Comments appear in the order they were appended.
    pub fn to_nexus(&self, annotate_nodes: bool, annotate_tips: bool) -> String {
        let mut out = String::from("#NEXUS\n");
        out.push_str("BEGIN TAXA;\n");
        out.push_str(&format!("\tDIMENSIONS NTAX={};\n", self.tip_count()));
        out.push_str("\tTAXLABELS\n");
        for name in self.tip_names() {
            out.push_str("\t\t");
            out.push_str(name);
            out.push('\n');
        }
        out.push_str("\t;\n");
        out.push_str("END;\n");
        out.push_str("BEGIN TREES;\n");
        out.push_str("\tTREE tree1 = [&R] ");
        out.push_str(&self.to_newick(annotate_nodes, annotate_tips));
        out.push('\n');
        out.push_str("END;\n");
        out
    }

    /// Renders the tree as a Newick string with `[&...]` comment blocks:
    /// node comments after the label, edge comments between the colon and
    /// the branch length.
    pub fn to_newick(&self, annotate_nodes: bool, annotate_tips: bool) -> String {
        let mut rendered: Vec<String> = vec![String::new(); self.nodes.len()];
        for id in self.postorder() {
            let node = &self.nodes[id];
            let mut s = String::new();
            if !node.child_edges.is_empty() {
                s.push('(');
                for (i, &e) in node.child_edges.iter().enumerate() {
                    if i > 0 {
                        s.push(',');
                    }
                    s.push_str(&rendered[self.edges[e].child]);
                }
                s.push(')');
            }
            if let Some(name) = &node.name {
                s.push_str(name);
            }
            let annotate = if self.is_tip(id) { annotate_tips } else { annotate_nodes };
            if annotate && !node.comments.is_empty() {
                s.push_str(&format!("[&{}]", node.comments.join(",")));
            }
            if let Some(eid) = node.parent_edge {
                let edge = &self.edges[eid];
                s.push(':');
                if !edge.comments.is_empty() {
                    s.push_str(&format!("[&{}]", edge.comments.join(",")));
                }
                s.push_str(&format!("{}", edge.length.unwrap_or(0.0)));
            }
            rendered[id] = s;
        }
        let mut out = std::mem::take(&mut rendered[self.root]);
        out.push(';');
        out
    }
}
