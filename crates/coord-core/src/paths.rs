use crate::action::ActionId;
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const COORD_DIR: &str = ".coord";
pub const CONFIG_FILE: &str = ".coord/config.yaml";
pub const DB_FILE: &str = ".coord/coord.db";
pub const SUBMISSIONS_DIR: &str = ".coord/submissions";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn coord_dir(root: &Path) -> PathBuf {
    root.join(COORD_DIR)
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn db_path(root: &Path) -> PathBuf {
    root.join(DB_FILE)
}

pub fn submissions_dir(root: &Path) -> PathBuf {
    root.join(SUBMISSIONS_DIR)
}

/// Where the payload of an admitted action is dropped.
pub fn submission_path(root: &Path, id: &ActionId) -> PathBuf {
    submissions_dir(root).join(format!("{id}.json"))
}

pub fn is_initialized(root: &Path) -> bool {
    db_path(root).exists()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_helpers() {
        let root = Path::new("/tmp/proj");
        assert_eq!(config_path(root), PathBuf::from("/tmp/proj/.coord/config.yaml"));
        assert_eq!(db_path(root), PathBuf::from("/tmp/proj/.coord/coord.db"));
        assert_eq!(
            submission_path(root, &ActionId::new("daily-1a2b", 3)),
            PathBuf::from("/tmp/proj/.coord/submissions/daily-1a2b@3.json")
        );
    }
}
