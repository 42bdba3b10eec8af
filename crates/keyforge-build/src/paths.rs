//! Path helpers shared by the target variants.

use std::path::{Path, PathBuf};

/// Whether `path` lies inside `root` (after resolving both where possible).
pub fn is_under(path: &Path, root: &Path) -> bool {
    resolve(path).starts_with(resolve(root))
}

/// Render a path with forward slashes, as the build engine expects on every host.
pub fn unix_style_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn resolve(path: &Path) -> PathBuf {
    dunce::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_under() {
        let dir = tempfile::tempdir().unwrap();
        let inner = dir.path().join("keyboards/acme");
        std::fs::create_dir_all(&inner).unwrap();

        assert!(is_under(&inner, dir.path()));
        assert!(!is_under(dir.path(), &inner));
        assert!(is_under(Path::new("/a/b/c"), Path::new("/a/b")));
        assert!(!is_under(Path::new("/a/bc"), Path::new("/a/b")));
    }

    #[test]
    fn test_unix_style_path() {
        assert_eq!(unix_style_path(Path::new("a/b")), "a/b");
        assert_eq!(unix_style_path(Path::new(r"C:\qmk\keymaps")), "C:/qmk/keymaps");
    }
}
