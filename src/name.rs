//! Display filenames arrive from form fields and URLs. Before one is used as an on-disk key it
//! is folded into a single safe path segment; the unsanitized text is never joined to a path.
use std::path::{
    Component,
    Path,
};

fn fold_char(c: char) -> char {
    match c {
        ' ' | '/' | '\\' => '_',
        c if c.is_ascii_control() => '_',
        c => c,
    }
}

/// Sanitize a display filename into a single path segment.
///
/// Spaces and both kinds of slashes become underscores, as do control characters. The result
/// is then cleaned as a path; anything that does not clean to exactly one normal component
/// (the empty string, `.` or `..`) has no safe form and yields `None`.
///
/// # Arguments
///
/// * `display` - Filename as supplied by the client.
pub fn sanitize(display: &str) -> Option<String> {
    let folded: String = display.chars().map(fold_char).collect();
    let mut parts = Path::new(&folded).components();
    match (parts.next(), parts.next()) {
        (Some(Component::Normal(v)), None) => {
            let s = v.to_str()?;
            if is_safe_segment(s) {
                return Some(s.to_string());
            }
            None
        },
        _ => None,
    }
}

/// Whether `s` can be joined to a directory without leaving it.
pub fn is_safe_segment(s: &str) -> bool {
    if s.is_empty() || s == "." || s == ".." {
        return false;
    }
    !s.chars().any(|c| c == '/' || c == '\\' || c.is_ascii_control())
}
