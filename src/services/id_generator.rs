//! Short, URL-safe image identifiers.
//!
//! Identifiers are minted locally and never checked against the metadata store.
//! With 62^7 (about 3.5e12) possible tokens, the birthday bound puts the chance
//! of any collision at roughly n^2 / 7e12 after n uploads: about 1.4e-3 at
//! 100k uploads and 0.14 at one million.

use rand::Rng;
use std::sync::Arc;

pub const ID_ALPHABET: &[u8; 62] =
    b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
pub const ID_LEN: usize = 7;

/// Source of fresh identifiers. Swappable so tests can pin the id.
pub type IdSource = Arc<dyn Fn() -> String + Send + Sync>;

/// Generate a 7-character token drawn uniformly from [`ID_ALPHABET`].
///
/// `rand::rng()` is a CSPRNG reseeded from the OS; `random_range` samples
/// without modulo bias.
pub fn generate_id() -> String {
    let mut rng = rand::rng();
    (0..ID_LEN)
        .map(|_| ID_ALPHABET[rng.random_range(0..ID_ALPHABET.len())] as char)
        .collect()
}

pub fn default_id_source() -> IdSource {
    Arc::new(generate_id)
}
