//! Citation extraction
//!
//! Publications cite each other by reference inside square brackets,
//! several references separated by commas: `[ab12]`, `[ab12, cd34]`.
//! A reference is exactly four alphanumeric characters and is matched
//! case-insensitively.
//!
//! [`extract_citations`] is pure: the storage write that applies its
//! result lives in [`CitationGraph`] and always replaces a publication's
//! outgoing edges with the extracted set.
//!
//! ```rust
//! use consensus_lab::citation::extract_citations;
//! use rustc_hash::FxHashSet;
//!
//! let known: FxHashSet<String> = ["ab12", "cd34", "self"].iter().map(|s| s.to_string()).collect();
//! let found = extract_citations("Builds on [AB12, zz99] and [self].", &known, "self");
//!
//! assert_eq!(found.references.iter().collect::<Vec<_>>(), ["ab12"]);
//! assert_eq!(found.unknown_targets.iter().collect::<Vec<_>>(), ["zz99"]);
//! ```

pub(crate) mod graph;

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;
use rustc_hash::FxHashSet;

pub use graph::{CitationEdge, CitationGraph};

/// Bracketed, comma-separated group of 4-character tokens.
const CITATION_GROUP: &str = r"(?i)\[\s*([a-z0-9]{4}(?:\s*,\s*[a-z0-9]{4})*)\s*\]";

fn citation_group() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(CITATION_GROUP).expect("citation pattern is a valid regex"))
}

/// Result of scanning one publication.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extraction {
    /// Known references cited, lower-cased, deduplicated.
    pub references: BTreeSet<String>,
    /// Well-formed tokens that match no known reference (diagnostic only).
    pub unknown_targets: BTreeSet<String>,
}

impl Extraction {
    /// Whether nothing citation-shaped was found.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.references.is_empty() && self.unknown_targets.is_empty()
    }
}

/// Scan `content` for citations of `known` references.
///
/// Tokens are lower-cased; tokens not in `known` are reported in
/// [`Extraction::unknown_targets`] instead of failing; `own_reference` is
/// never included. Same inputs always produce the same output.
#[must_use]
pub fn extract_citations(content: &str, known: &FxHashSet<String>, own_reference: &str) -> Extraction {
    let own_reference = own_reference.to_ascii_lowercase();
    let mut extraction = Extraction::default();

    for group in citation_group().captures_iter(content) {
        let Some(tokens) = group.get(1) else {
            continue;
        };
        for token in tokens.as_str().split(',') {
            let token = token.trim().to_ascii_lowercase();
            if token == own_reference {
                continue;
            }
            if known.contains(&token) {
                extraction.references.insert(token);
            } else {
                extraction.unknown_targets.insert(token);
            }
        }
    }

    extraction
}
