//! Id pattern matching for store subscriptions.

/// Tests whether an id matches a subscription pattern.
///
/// A `*` in the pattern matches any run of characters, including the empty
/// run; all other characters match literally. The wildcard subscription
/// `"*"` therefore matches every id.
///
/// # Examples
///
/// ```
/// use adapter_testing::pattern_matches;
///
/// assert!(pattern_matches("*", "system.adapter.sql.0.alive"));
/// assert!(pattern_matches("system.adapter.*.alive", "system.adapter.sql.0.alive"));
/// assert!(!pattern_matches("messagebox.*", "system.adapter.sql.0"));
/// ```
#[must_use]
pub fn pattern_matches(pattern: &str, id: &str) -> bool {
    match pattern.split_once('*') {
        None => pattern == id,
        Some((prefix, rest)) => match id.strip_prefix(prefix) {
            None => false,
            // Greedily consume the remaining id one suffix at a time.
            Some(tail) => (0..=tail.len())
                .filter(|offset| tail.is_char_boundary(*offset))
                .any(|offset| pattern_matches(rest, &tail[offset..])),
        },
    }
}
