//! Validation of individual path segments.
//!
//! The remote store refuses keys that are empty, contain ASCII control
//! characters, or contain any of `. $ # [ ] /`.

/// Characters that may never appear in a key.
const INVALID_CHARS: [char; 6] = ['.', '$', '#', '[', ']', '/'];

/// Returns whether `segment` is usable as a single key in the remote store.
pub fn is_valid_key(segment: &str) -> bool {
    !segment.is_empty()
        && !segment
            .chars()
            .any(|c| u32::from(c) <= 31 || c == '\u{7f}' || INVALID_CHARS.contains(&c))
}
