//! Error taxonomy for the whole pipeline.
//!
//! Every fallible operation returns `Result<_, Error>`; errors bubble up to
//! the driver, which prints one diagnostic line and exits non-zero. Invariant
//! violations inside the bitset layer (length mismatches, out-of-range bit
//! indices) are programmer errors and panic instead.

use phylotree::tree::{NewickParseError, TreeError};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Malformed file contents, unknown directives, missing tips,
    /// inconsistent record widths.
    #[error("input error: {0}")]
    Input(String),

    /// The data violates a structural requirement: unrooted tree, CDS length
    /// not a multiple of three, residue outside its CDS, missing annotation.
    #[error("schema error: {0}")]
    Schema(String),

    /// Mutually exclusive flags both set, unknown algorithm names, and other
    /// bad option combinations.
    #[error("config error: {0}")]
    Config(String),

    #[error("failed to parse tree: {0}")]
    Newick(#[from] TreeError),

    #[error("failed to parse tree: {0}")]
    NewickParse(#[from] NewickParseError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
