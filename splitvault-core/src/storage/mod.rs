//! Storage modules for splitvault
//!
//! The panel keeps node, file and part rows in SQLite.

pub mod metadata_store;

pub use metadata_store::{FileRecord, FileState, MetadataStore, PartRecord};

/// Normalizes a logical directory to the `/a/b/` form used as a key.
pub fn clean_path(path: &str) -> String {
    let segments: Vec<&str> = path
        .split('/')
        .map(str::trim)
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect();

    if segments.is_empty() {
        "/".to_string()
    } else {
        format!("/{}/", segments.join("/"))
    }
}

#[cfg(test)]
mod tests {
    use super::clean_path;

    #[test]
    fn clean_path_adds_leading_and_trailing_slash() {
        assert_eq!(clean_path(""), "/");
        assert_eq!(clean_path("/"), "/");
        assert_eq!(clean_path("docs"), "/docs/");
        assert_eq!(clean_path("/docs/2024"), "/docs/2024/");
        assert_eq!(clean_path("docs//2024/"), "/docs/2024/");
    }
}
