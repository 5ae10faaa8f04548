//! Publication references: short opaque ids used for citations and votes.

use rand::Rng;

/// Characters a reference is drawn from.
const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Reference length; the citation scanner matches exactly this many characters.
pub const REFERENCE_LEN: usize = 4;

/// Maximum attempts at drawing a reference not yet used in the experiment.
pub(crate) const REFERENCE_RETRIES: usize = 8;

/// Draw a random reference.
pub(crate) fn generate_reference<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..REFERENCE_LEN)
        .map(|_| char::from(ALPHABET[rng.gen_range(0..ALPHABET.len())]))
        .collect()
}

/// Canonical form of a reference typed by an agent: `[AB12]` → `ab12`.
#[must_use]
pub fn normalize_reference(raw: &str) -> String {
    raw.trim()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .trim()
        .to_ascii_lowercase()
}
