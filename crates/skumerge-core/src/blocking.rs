//! Blocking keys: records are only fuzzy-compared inside their block.
//!
//! Duplicates whose brands are spelled differently, or whose titles start
//! differently, land in different blocks and are never compared. That is the
//! price of avoiding all-pairs comparison.

use crate::normalize::clean_text;

/// Separator between brand and title prefix. `clean_text` never emits it.
pub const KEY_SEPARATOR: char = '|';

/// Default number of title characters that go into the key.
pub const DEFAULT_PREFIX_LENGTH: usize = 3;

/// `clean_text(brand) | first prefix_len chars of clean_text(title)`.
pub fn blocking_key(brand: &str, title: &str, prefix_len: usize) -> String {
    let brand = clean_text(brand);
    let title = clean_text(title);
    let prefix: String = title.chars().take(prefix_len).collect();
    format!("{brand}{KEY_SEPARATOR}{prefix}")
}

/// A record whose cleaned title is empty can never score above zero, so it
/// is kept out of every block and ends up as its own cluster.
pub fn is_blockable(title: &str) -> bool {
    !clean_text(title).is_empty()
}
