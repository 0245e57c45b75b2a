//! Filename sanitization.
//!
//! Every stream-derived string (channel name, formatted timestamp, broadcast
//! title) passes through [`sanitize_filename`] before it becomes part of a path.

/// Characters removed from every path segment.
pub const FORBIDDEN_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '!', '?', '*'];

/// Remove forbidden characters and trim surrounding whitespace.
///
/// Unlike a replacing sanitizer, forbidden characters are dropped outright so
/// `"Cool: Stream!"` becomes `"Cool Stream"`. Unicode text is preserved.
///
/// # Examples
///
/// ```
/// use twitch_archiver::utils::filename::sanitize_filename;
///
/// assert_eq!(sanitize_filename("Cool: Stream!"), "Cool Stream");
/// assert_eq!(sanitize_filename("  观看一只青蛙?  "), "观看一只青蛙");
/// assert_eq!(sanitize_filename("???"), "");
/// ```
pub fn sanitize_filename(input: &str) -> String {
    let kept: String = input
        .chars()
        .filter(|c| !FORBIDDEN_CHARS.contains(c))
        .collect();
    kept.trim().to_string()
}
