//! Pure key mapping between uploaded objects and their derived artifacts.
//!
//! `uploads/a/b.jpg` resizes to `resized/a/b.jpg` and is recorded under the
//! image id `a/b.jpg`. Both mappings depend on nothing but their arguments,
//! which is what makes redelivered notifications converge on the same object
//! and the same record.

/// Destination key for a source key, or `None` when the key is outside the
/// upload prefix or names the prefix itself. Built from the image id, so two
/// source keys that share an id share a destination.
pub fn resized_key(source_key: &str, upload_prefix: &str, resized_prefix: &str) -> Option<String> {
    let id = image_id(source_key, upload_prefix)?;
    Some(format!("{}{}", resized_prefix, id))
}

/// Identifier of the image a source key refers to: the key relative to the
/// upload prefix with separators normalized.
pub fn image_id(source_key: &str, upload_prefix: &str) -> Option<String> {
    let remainder = source_key.strip_prefix(upload_prefix)?;
    let id = normalize_segments(remainder, false);
    (!id.is_empty()).then_some(id)
}

/// Cleans a caller-supplied filename into a relative key suffix. Empty, `.`
/// and `..` segments are dropped so the result can never climb out of the
/// upload prefix.
pub fn sanitize_filename(filename: &str) -> Option<String> {
    let cleaned = normalize_segments(filename.trim(), true);
    (!cleaned.is_empty()).then_some(cleaned)
}

fn normalize_segments(path: &str, drop_dots: bool) -> String {
    path.split(['/', '\\'])
        .filter(|segment| !segment.is_empty())
        .filter(|segment| !drop_dots || (*segment != "." && *segment != ".."))
        .collect::<Vec<_>>()
        .join("/")
}
