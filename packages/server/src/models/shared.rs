/// Escape LIKE wildcard characters in a search string.
///
/// The result is meant for patterns declared with `ESCAPE '\'`.
pub fn escape_like(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}
