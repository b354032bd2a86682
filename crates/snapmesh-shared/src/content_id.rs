//! Content identifier helpers.
//!
//! A base hash identifies one engine transfer. When a transfer bundles more
//! than one original file, every file gets a compound identifier
//! `base + "-" + path`. Base hashes never contain `-`, so the first dash
//! always separates the base from the file path.

use uuid::Uuid;

use crate::constants::{PLACEHOLDER_PREFIX, THUMBNAIL_PREFIX};

const SEPARATOR: char = '-';

/// Build the compound identifier of `path` inside transfer `base`.
pub fn compound(base: &str, path: &str) -> String {
    format!("{base}{SEPARATOR}{path}")
}

/// Extract the transfer identifier from a bare or compound identifier.
///
/// Placeholder identifiers are returned unchanged.
pub fn base_hash(id: &str) -> &str {
    if is_placeholder(id) {
        return id;
    }
    match id.split_once(SEPARATOR) {
        Some((base, _)) => base,
        None => id,
    }
}

/// File path suffix of a compound identifier, if any.
pub fn file_path(id: &str) -> Option<&str> {
    if is_placeholder(id) {
        return None;
    }
    id.split_once(SEPARATOR).map(|(_, path)| path)
}

pub fn is_compound(id: &str) -> bool {
    file_path(id).is_some()
}

pub fn placeholder_id() -> String {
    format!("{PLACEHOLDER_PREFIX}{}", Uuid::new_v4().simple())
}

pub fn is_placeholder(id: &str) -> bool {
    id.starts_with(PLACEHOLDER_PREFIX)
}

/// Whether a bundled file is the preview thumbnail of another file.
pub fn is_thumbnail(name: &str) -> bool {
    let file_name = name.rsplit('/').next().unwrap_or(name);
    file_name.starts_with(THUMBNAIL_PREFIX)
}

pub fn thumbnail_name(original: &str) -> String {
    format!("{THUMBNAIL_PREFIX}{original}")
}

/// Assign item identifiers to the files of transfer `base`.
///
/// Compound identifiers are used only when more than one non-thumbnail file
/// is present; a single original keeps the bare base hash. Thumbnails never
/// become items and are skipped. Returns `(path, id)` pairs in input order.
pub fn assign_ids<'a>(base: &str, paths: &[&'a str]) -> Vec<(&'a str, String)> {
    let originals: Vec<&str> = paths.iter().copied().filter(|p| !is_thumbnail(p)).collect();

    if originals.len() > 1 {
        originals
            .into_iter()
            .map(|path| (path, compound(base, path)))
            .collect()
    } else {
        originals
            .into_iter()
            .map(|path| (path, base.to_string()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compound_ids_map_back_to_base() {
        let ids = assign_ids("abc123", &["one.jpg", "thumbnail-one.jpg", "two.jpg"]);
        assert_eq!(
            ids,
            vec![
                ("one.jpg", "abc123-one.jpg".to_string()),
                ("two.jpg", "abc123-two.jpg".to_string()),
            ]
        );
        for (_, id) in &ids {
            assert_eq!(base_hash(id), "abc123");
        }
        assert_eq!(file_path("abc123-two.jpg"), Some("two.jpg"));
    }

    #[test]
    fn single_original_keeps_bare_hash() {
        let ids = assign_ids("abc123", &["thumbnail-cat.png", "cat.png"]);
        assert_eq!(ids, vec![("cat.png", "abc123".to_string())]);
        assert!(!is_compound("abc123"));
    }

    #[test]
    fn dashes_in_paths_stay_in_the_suffix() {
        let id = compound("ff00", "album/my-holiday.jpg");
        assert_eq!(base_hash(&id), "ff00");
        assert_eq!(file_path(&id), Some("album/my-holiday.jpg"));
    }

    #[test]
    fn placeholders_are_not_split() {
        let id = placeholder_id();
        assert!(is_placeholder(&id));
        assert_eq!(base_hash(&id), id);
        assert_eq!(file_path(&id), None);
    }

    #[test]
    fn thumbnails_detected_inside_directories() {
        assert!(is_thumbnail("thumbnail-a.jpg"));
        assert!(is_thumbnail("album/thumbnail-a.jpg"));
        assert!(!is_thumbnail("album/a.jpg"));
        assert_eq!(thumbnail_name("a.jpg"), "thumbnail-a.jpg");
    }
}
