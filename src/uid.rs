//! Deterministic DICOM-style identifiers derived from a seed string.
//!
//! The digit layout has to stay byte-for-byte stable: receiving archives
//! match objects by these identifiers across re-runs.
use crate::config::DEFAULT_OID_ROOT;

pub const DEFAULT_UID_MAX_LENGTH: usize = 56;

/// Build an identifier of at most `max_length` characters.
///
/// Each seed character contributes its decimal code point; the seed is walked
/// cyclically until enough digits exist, the root is prepended and the result
/// is truncated. An empty seed is replaced by a random one.
///
/// Truncation can drop the digits that would distinguish two seeds sharing a
/// long common prefix, so distinct seeds may collide.
pub fn generate_uid(root: Option<&str>, seed: &str, max_length: usize) -> String {
    let random_seed;
    let seed = if seed.is_empty() {
        random_seed = uuid::Uuid::new_v4().simple().to_string();
        tracing::debug!("empty uid seed, using random placeholder");
        random_seed.as_str()
    } else {
        seed
    };

    let mut digits = String::with_capacity(max_length + 8);
    let mut chars = seed.chars().cycle();
    while digits.len() < max_length {
        let Some(ch) = chars.next() else {
            break;
        };
        digits.push_str(&u32::from(ch).to_string());
    }

    let root = root.unwrap_or(DEFAULT_OID_ROOT);
    root.chars().chain(digits.chars()).take(max_length).collect()
}
