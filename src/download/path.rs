/// Placeholder for a component that sanitizes to nothing
const EMPTY_COMPONENT: &str = "unnamed";

/// Makes a thread or file name safe to use as one path component
///
/// Path separators and control characters become `_`; leading dots are
/// dropped so `..` and hidden names cannot escape or hide.
pub fn sanitize_component(raw: &str) -> String {
    let replaced: String = raw
        .chars()
        .map(|c| match c {
            '/' | '\\' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    let cleaned = replaced.trim().trim_start_matches('.').trim();
    if cleaned.is_empty() {
        EMPTY_COMPONENT.to_string()
    } else {
        cleaned.to_string()
    }
}

/// Adds `-{marker}` to a file name, before its extension if it has one
pub(crate) fn with_marker(filename: &str, marker: &str) -> String {
    match filename.rfind('.') {
        Some(dot) if dot > 0 => format!("{}-{}{}", &filename[..dot], marker, &filename[dot..]),
        _ => format!("{}-{}", filename, marker),
    }
}
