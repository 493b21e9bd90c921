//! Filesystem probing for plugin candidates.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

/// The shared-library extension of the current platform.
pub fn library_extension() -> &'static str {
    if cfg!(target_os = "windows") {
        "dll"
    } else if cfg!(target_os = "macos") {
        "dylib"
    } else {
        "so"
    }
}

/// Enumerate the shared libraries under `dir`.
///
/// Returns every regular file carrying the platform library extension, in
/// sorted order, together with the first walk error if one occurred.
/// Partial results survive an error: a directory that fails halfway still
/// yields what was enumerated before and after the failing entry.
pub fn list_libraries(dir: &Path, recursive: bool) -> (Vec<PathBuf>, Option<walkdir::Error>) {
    let mut paths = Vec::new();
    let mut first_error = None;

    let max_depth = if recursive { usize::MAX } else { 1 };
    for entry in WalkDir::new(dir).max_depth(max_depth).follow_links(true) {
        match entry {
            Ok(entry) => {
                if entry.file_type().is_file()
                    && entry.path().extension().and_then(|e| e.to_str())
                        == Some(library_extension())
                {
                    paths.push(entry.into_path());
                }
            }
            Err(err) => {
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
        }
    }

    paths.sort();
    (paths, first_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, b"").unwrap();
        path
    }

    fn lib_name(stem: &str) -> String {
        format!("{stem}.{}", library_extension())
    }

    #[test]
    fn extension_matches_platform() {
        let ext = library_extension();
        assert!(matches!(ext, "so" | "dylib" | "dll"));
    }

    #[test]
    fn filters_by_extension() {
        let dir = TempDir::new().unwrap();
        let lib = touch(dir.path(), &lib_name("liba"));
        touch(dir.path(), "readme.txt");
        touch(dir.path(), "liba"); // no extension

        let (paths, error) = list_libraries(dir.path(), false);
        assert!(error.is_none());
        assert_eq!(paths, vec![lib]);
    }

    #[test]
    fn non_recursive_skips_subdirectories() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), &lib_name("top"));
        let sub = dir.path().join("sub");
        std::fs::create_dir(&sub).unwrap();
        touch(&sub, &lib_name("nested"));

        let (paths, _) = list_libraries(dir.path(), false);
        assert_eq!(paths.len(), 1);
    }

    #[test]
    fn recursive_descends_into_subdirectories() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), &lib_name("top"));
        let sub = dir.path().join("sub");
        std::fs::create_dir(&sub).unwrap();
        touch(&sub, &lib_name("nested"));

        let (paths, _) = list_libraries(dir.path(), true);
        assert_eq!(paths.len(), 2);
    }

    #[test]
    fn missing_directory_reports_an_error_and_no_files() {
        let (paths, error) = list_libraries(Path::new("/nonexistent/plugin/dir"), false);
        assert!(paths.is_empty());
        assert!(error.is_some());
    }

    #[test]
    fn results_are_sorted() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), &lib_name("zeta"));
        touch(dir.path(), &lib_name("alpha"));

        let (paths, _) = list_libraries(dir.path(), false);
        let names: Vec<_> = paths
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec![lib_name("alpha"), lib_name("zeta")]);
    }
}
