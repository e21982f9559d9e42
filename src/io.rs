//! File readers: Newick trees, FASTA alignments (plain or gzipped) and
//! GenBank annotations.
//!
//! The readers stay deliberately thin: they turn bytes into records and leave
//! all interpretation to the character and annotation layers.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Lines, Read};
use std::path::Path;

use flate2::read::GzDecoder;

use crate::error::{Error, Result};
use crate::tree::Tree;

/// Reads a rooted Newick tree from a file.
pub fn read_tree(path: &Path) -> Result<Tree> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| Error::Input(format!("could not read tree file {}: {e}", path.display())))?;
    Tree::from_newick(text.trim())
}

/// One FASTA record: identifier (up to the first whitespace) and uppercased
/// sequence bytes.
#[derive(Debug, Clone)]
pub struct FastaRecord {
    pub id: String,
    pub seq: Vec<u8>,
}

/// Streaming FASTA reader over any buffered source.
pub struct FastaReader<R: BufRead> {
    lines: Lines<R>,
    pending_header: Option<String>,
}

impl<R: BufRead> FastaReader<R> {
    pub fn new(reader: R) -> Self {
        FastaReader {
            lines: reader.lines(),
            pending_header: None,
        }
    }
}

impl<R: BufRead> Iterator for FastaReader<R> {
    type Item = Result<FastaRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        let header = match self.pending_header.take() {
            Some(h) => h,
            None => loop {
                match self.lines.next()? {
                    Err(e) => return Some(Err(e.into())),
                    Ok(line) => {
                        let line = line.trim_end().to_string();
                        if line.is_empty() {
                            continue;
                        }
                        if line.starts_with('>') {
                            break line;
                        }
                        return Some(Err(Error::Input(
                            "malformed FASTA: expected a > header line".to_string(),
                        )));
                    }
                }
            },
        };

        let id = header[1..]
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_string();
        if id.is_empty() {
            return Some(Err(Error::Input(
                "malformed FASTA: record with an empty identifier".to_string(),
            )));
        }

        let mut seq = Vec::new();
        for line in self.lines.by_ref() {
            match line {
                Err(e) => return Some(Err(e.into())),
                Ok(line) => {
                    if line.starts_with('>') {
                        self.pending_header = Some(line.trim_end().to_string());
                        break;
                    }
                    seq.extend(line.trim().bytes().map(|b| b.to_ascii_uppercase()));
                }
            }
        }
        Some(Ok(FastaRecord { id, seq }))
    }
}

/// Opens a FASTA file for streaming, transparently decompressing `.gz`.
pub fn open_fasta(path: &Path) -> Result<FastaReader<BufReader<Box<dyn Read + Send>>>> {
    let f = File::open(path)
        .map_err(|e| Error::Input(format!("could not open alignment {}: {e}", path.display())))?;
    let reader: Box<dyn Read + Send> = if path.extension().is_some_and(|e| e == "gz") {
        Box::new(GzDecoder::new(f))
    } else {
        Box::new(f)
    };
    Ok(FastaReader::new(BufReader::new(reader)))
}

/// One feature from the FEATURES table: its key (`CDS`, `gene`, ...), the
/// raw location string and any `/key="value"` qualifiers.
#[derive(Debug, Clone)]
pub struct GenbankFeature {
    pub key: String,
    pub location: String,
    pub qualifiers: HashMap<String, String>,
}

/// The slice of a GenBank file this tool cares about: the feature table and
/// the length of the ORIGIN sequence.
#[derive(Debug, Clone)]
pub struct Genbank {
    pub features: Vec<GenbankFeature>,
    pub origin_len: usize,
}

impl Genbank {
    pub fn read(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::Input(format!("could not read genbank file {}: {e}", path.display()))
        })?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self> {
        #[derive(PartialEq)]
        enum Section {
            Preamble,
            Features,
            Origin,
        }

        let mut section = Section::Preamble;
        let mut features: Vec<GenbankFeature> = Vec::new();
        let mut origin_len = 0usize;
        // location lines precede qualifiers; once a qualifier has been seen,
        // unmarked continuation lines belong to a wrapped qualifier value
        let mut in_qualifiers = false;

        for line in text.lines() {
            if line.starts_with("FEATURES") {
                section = Section::Features;
                continue;
            }
            if line.starts_with("ORIGIN") {
                section = Section::Origin;
                continue;
            }
            match section {
                Section::Preamble => {}
                Section::Features => {
                    if !line.starts_with(' ') {
                        section = Section::Preamble;
                        continue;
                    }
                    let trimmed = line.trim_start();
                    let indent = line.len() - trimmed.len();
                    if indent < 21 {
                        // new feature: key then location
                        let mut parts = trimmed.split_whitespace();
                        let key = parts.next().unwrap_or_default().to_string();
                        let location = parts.next().unwrap_or_default().to_string();
                        features.push(GenbankFeature {
                            key,
                            location,
                            qualifiers: HashMap::new(),
                        });
                        in_qualifiers = false;
                    } else if let Some(feat) = features.last_mut() {
                        if let Some(qualifier) = trimmed.strip_prefix('/') {
                            in_qualifiers = true;
                            let (key, value) = match qualifier.split_once('=') {
                                Some((k, v)) => (k, v.trim_matches('"')),
                                None => (qualifier, ""),
                            };
                            feat.qualifiers.insert(key.to_string(), value.to_string());
                        } else if !in_qualifiers {
                            // wrapped location
                            feat.location.push_str(trimmed);
                        }
                    }
                }
                Section::Origin => {
                    if line.starts_with("//") {
                        break;
                    }
                    origin_len += line.chars().filter(|c| c.is_ascii_alphabetic()).count();
                }
            }
        }

        if features.is_empty() && origin_len == 0 {
            return Err(Error::Input(
                "genbank file has no FEATURES table and no ORIGIN sequence".to_string(),
            ));
        }
        Ok(Genbank {
            features,
            origin_len,
        })
    }
}
