//! Crate root: lightweight module orchestration and public re-exports.
//!
//! Modules:
//! - `bitset`: fixed-width bitsets over byte arrays for character state sets.
//! - `tree`: indexed rooted tree with edge comments and a Nexus writer.
//! - `characters`: character model, variant config and the packed state layout.
//! - `alignment` / `tipfile`: the two character ingestion paths.
//! - `annotation`: genome regions, IUPAC codes and codon translation.
//! - `parsimony`: Fitch up-pass, MPR down-pass, acctrans and deltrans.
//! - `label`: plain and annotated branch labelling.
//! - `report`: transition summaries, mutation spectra, ancestor sequences.
//! - `epistasis`: ordered residue pair scoring over a labelled tree.
//! - `io`: Newick, FASTA and GenBank readers.

pub mod alignment;
pub mod annotation;
pub mod bitset;
pub mod characters;
pub mod epistasis;
pub mod error;
pub mod io;
pub mod label;
pub mod parsimony;
pub mod report;
pub mod tipfile;
pub mod tree;

// Re-export frequently used types & functions
pub use error::{Error, Result};
pub use tree::Tree;
