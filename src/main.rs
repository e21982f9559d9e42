use std::path::PathBuf;
use std::time::Instant;

use clap::Parser;
use log::info;

use ancstate::alignment::{type_alignment, type_alignment_all_nucleotides};
use ancstate::annotation::{Region, get_regions};
use ancstate::characters::config_wants_amino_acids;
use ancstate::epistasis::epistasis;
use ancstate::error::{Error, Result};
use ancstate::io::{Genbank, read_tree};
use ancstate::label::{label_changes, label_changes_annotated, label_nodes};
use ancstate::parsimony::{PolytomyMode, Resolution, acctrans, deltrans, down_pass, up_pass};
use ancstate::report::{
    ancestral_sequence, branch_table, mrca, mutation_spectrum, summarize_transitions,
    syn_nonsyn_spectrum,
};
use ancstate::tipfile::type_tipfile;
use ancstate::tree::Tree;

/// Infer ancestral character states on a rooted tree by maximum parsimony,
/// label each branch with the state changes it implies and summarise them.
#[derive(Parser, Debug)]
#[command(
    name = "ancstate",
    version,
    about = "ancestral state reconstruction and branch labelling by maximum parsimony"
)]
struct Args {
    /// Tree file to read - must be in newick format, must be rooted
    #[arg(long)]
    treefile: PathBuf,

    /// Fasta format alignment to read (plain or gzipped)
    #[arg(long)]
    alignment: Option<PathBuf>,

    /// Variants to type in the alignment
    #[arg(long)]
    config: Option<PathBuf>,

    /// Genbank format annotation of a sequence in the same coordinates as
    /// the alignment
    #[arg(long)]
    genbank: Option<PathBuf>,

    /// CSV format table of tip to character relationships (instead of
    /// --alignment, --config and --genbank)
    #[arg(long)]
    tipfile: Option<PathBuf>,

    /// Algorithm for dealing with polytomies in the up-pass
    #[arg(long = "algo-up", value_enum, default_value_t = PolytomyMode::Hard)]
    algo_up: PolytomyMode,

    /// Algorithm for breaking ties after the up-pass
    #[arg(long = "algo-down", value_enum)]
    algo_down: Resolution,

    /// Threshold number of children, above which a transition is included
    /// in the summary
    #[arg(long, default_value_t = 0)]
    threshold: usize,

    /// Tree file to write (optionally) - will be in nexus format
    #[arg(long = "tree-out")]
    tree_out: Option<PathBuf>,

    /// Annotate internal nodes of the output tree with inferred states
    #[arg(long = "annotate-nodes")]
    annotate_nodes: bool,

    /// Annotate tips of the output tree with known states
    #[arg(long = "annotate-tips")]
    annotate_tips: bool,

    /// Summarize the counts of children with different states under each
    /// transition to stdout
    #[arg(long = "summarize-children")]
    summarize_children: bool,

    /// Print the raw nucleotide mutation spectrum over the plain labels
    #[arg(long = "mut-spectrum")]
    mut_spectrum: bool,

    /// Annotate all amino acid changes + neutral nucleotide changes
    #[arg(long)]
    civet: bool,

    /// Annotate all nucleotide changes and write the per-branch table
    #[arg(long)]
    nuc: bool,

    /// Print the synonymous/non-synonymous mutation spectrum
    #[arg(long)]
    paper: bool,

    /// Score ordered residue pairs for epistasis
    #[arg(long)]
    epistasis: bool,

    /// Print the sequence of the common ancestor of everything except the
    /// outgroup
    #[arg(long = "common-anc")]
    common_anc: bool,

    /// The outgroup tip name, for --common-anc
    #[arg(long)]
    outgroup: Option<String>,

    /// Rescale --tree-out so branch lengths are the inferred number of
    /// substitutions
    #[arg(long)]
    rescale: bool,

    /// Number of worker threads for the parallel stages (0 = one per
    /// hardware thread)
    #[arg(short = 't', long, default_value_t = 0)]
    threads: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Preset {
    None,
    Civet,
    Nuc,
    Paper,
    Epistasis,
    CommonAnc,
}

/// Rejects option combinations outside the permitted matrix before any
/// input is read.
fn validate(args: &Args) -> Result<Preset> {
    let chosen = [
        (args.civet, Preset::Civet),
        (args.nuc, Preset::Nuc),
        (args.paper, Preset::Paper),
        (args.epistasis, Preset::Epistasis),
        (args.common_anc, Preset::CommonAnc),
    ];
    if chosen.iter().filter(|(set, _)| *set).count() > 1 {
        return Err(Error::Config(
            "use one preset, not a combination".to_string(),
        ));
    }
    let preset = chosen
        .iter()
        .find(|(set, _)| *set)
        .map(|&(_, p)| p)
        .unwrap_or(Preset::None);

    if args.tipfile.is_some() && (args.alignment.is_some() || args.config.is_some()) {
        return Err(Error::Config(
            "either use a --tipfile OR an --alignment and a --config file, not a mixture"
                .to_string(),
        ));
    }
    if args.tipfile.is_none() && args.alignment.is_none() {
        return Err(Error::Config(
            "provide tip states with either an --alignment or a --tipfile".to_string(),
        ));
    }
    if preset == Preset::None && args.alignment.is_some() && args.config.is_none() {
        return Err(Error::Config(
            "an --alignment needs a --config naming the characters to type".to_string(),
        ));
    }
    if preset != Preset::None && args.alignment.is_none() {
        return Err(Error::Config(
            "this preset types whole alignment columns and needs an --alignment".to_string(),
        ));
    }
    if preset != Preset::None && args.genbank.is_none() {
        return Err(Error::Config(
            "this preset needs a --genbank annotation".to_string(),
        ));
    }
    if preset == Preset::CommonAnc && args.outgroup.is_none() {
        return Err(Error::Config(
            "--common-anc needs an --outgroup".to_string(),
        ));
    }
    if preset == Preset::None {
        if let Some(config) = &args.config {
            if args.genbank.is_none() && config_wants_amino_acids(config)? {
                return Err(Error::Schema(
                    "you must provide a --genbank file if there are amino acids in your --config file"
                        .to_string(),
                ));
            }
        }
    }
    Ok(preset)
}

fn regions_for(genbank: Option<&Genbank>, whole_genome: bool) -> Result<Vec<Region>> {
    let gb = genbank.ok_or_else(|| {
        Error::Config("this preset needs a --genbank annotation".to_string())
    })?;
    get_regions(gb, whole_genome)
}

fn write_tree(args: &Args, tree: &Tree) -> Result<()> {
    if let Some(path) = &args.tree_out {
        std::fs::write(path, tree.to_nexus(args.annotate_nodes, args.annotate_tips))?;
        info!("wrote the labelled tree to {}", path.display());
    }
    Ok(())
}

fn pipeline(args: &Args, preset: Preset) -> Result<()> {
    let t0 = Instant::now();
    let mut tree = read_tree(&args.treefile)?;
    if !tree.is_rooted() {
        return Err(Error::Schema("the input tree is not rooted".to_string()));
    }
    info!(
        "read a tree with {} tips in {:.3}s",
        tree.tip_count(),
        t0.elapsed().as_secs_f64()
    );

    let genbank = match &args.genbank {
        Some(path) => Some(Genbank::read(path)?),
        None => None,
    };

    let t1 = Instant::now();
    let (characters, layout, mut states) = if let Some(tipfile) = &args.tipfile {
        type_tipfile(&tree, tipfile)?
    } else if let Some(alignment) = &args.alignment {
        match preset {
            Preset::None => {
                let config = args.config.as_ref().ok_or_else(|| {
                    Error::Config(
                        "an --alignment needs a --config naming the characters to type"
                            .to_string(),
                    )
                })?;
                type_alignment(&tree, alignment, config, genbank.as_ref())?
            }
            _ => type_alignment_all_nucleotides(&tree, alignment)?,
        }
    } else {
        return Err(Error::Config(
            "provide tip states with either an --alignment or a --tipfile".to_string(),
        ));
    };
    info!("typed the tips in {:.3}s", t1.elapsed().as_secs_f64());

    let t2 = Instant::now();
    up_pass(&tree, args.algo_up, &mut states, &layout);
    match args.algo_down {
        Resolution::Acctrans => acctrans(&tree, &mut states, &layout),
        Resolution::Deltrans => {
            down_pass(&tree, &mut states, &layout);
            deltrans(&tree, &mut states, &layout);
        }
        Resolution::Downpass => down_pass(&tree, &mut states, &layout),
    }
    info!("ran the parsimony passes in {:.3}s", t2.elapsed().as_secs_f64());

    match preset {
        Preset::Civet => {
            let regions = regions_for(genbank.as_ref(), false)?;
            label_changes_annotated(&mut tree, &regions, &characters, &states);
            if args.annotate_nodes || args.annotate_tips {
                label_nodes(&mut tree, &characters, &states, &layout);
            }
            write_tree(args, &tree)?;
        }
        Preset::Nuc => {
            let regions = regions_for(genbank.as_ref(), true)?;
            label_changes_annotated(&mut tree, &regions, &characters, &states);
            print!("{}", branch_table(&tree));
            if args.rescale {
                tree.rescale_by_comment_count();
            }
            if args.annotate_nodes || args.annotate_tips {
                label_nodes(&mut tree, &characters, &states, &layout);
            }
            write_tree(args, &tree)?;
        }
        Preset::CommonAnc => {
            let regions = regions_for(genbank.as_ref(), false)?;
            label_changes_annotated(&mut tree, &regions, &characters, &states);
            let outgroup = args.outgroup.as_ref().ok_or_else(|| {
                Error::Config("--common-anc needs an --outgroup".to_string())
            })?;
            let ancestor = mrca(&tree, outgroup)?;
            println!(">root");
            println!(
                "{}",
                ancestral_sequence(&characters, &layout, &states, ancestor)
            );
        }
        Preset::Paper => {
            let regions = regions_for(genbank.as_ref(), false)?;
            let changes = label_changes_annotated(&mut tree, &regions, &characters, &states);
            println!("change\tsyn\tnonSyn");
            for (change, syn, nonsyn) in syn_nonsyn_spectrum(&changes) {
                println!("{change}\t{syn}\t{nonsyn}");
            }
        }
        Preset::Epistasis => {
            let regions = regions_for(genbank.as_ref(), false)?;
            label_changes_annotated(&mut tree, &regions, &characters, &states);
            let t3 = Instant::now();
            let scores = epistasis(&tree);
            info!("scored the pairs in {:.3}s", t3.elapsed().as_secs_f64());
            println!("i\tj\tE_tau");
            for score in scores {
                println!("{}\t{}\t{}", score.i, score.j, score.e_tau);
            }
        }
        Preset::None => {
            let transitions = label_changes(&mut tree, &characters, &states, &layout);
            if args.annotate_nodes || args.annotate_tips {
                label_nodes(&mut tree, &characters, &states, &layout);
            }
            if args.summarize_children {
                for (i, character) in characters.iter().enumerate() {
                    let lines = summarize_transitions(
                        args.threshold,
                        &transitions[i],
                        &tree,
                        &states,
                        layout.index[i],
                        character,
                    );
                    for line in lines {
                        println!("{line}");
                    }
                }
            }
            if args.mut_spectrum {
                for (change, count) in mutation_spectrum(&tree) {
                    println!("{change}\t{count}");
                }
            }
            write_tree(args, &tree)?;
        }
    }

    Ok(())
}

fn run() -> Result<()> {
    let args = Args::parse();
    let preset = validate(&args)?;
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(args.threads)
        .build()
        .map_err(|e| Error::Config(format!("could not build the thread pool: {e}")))?;
    pool.install(|| pipeline(&args, preset))
}

fn main() {
    env_logger::init();
    if let Err(e) = run() {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
