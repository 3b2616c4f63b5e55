//! Input file discovery and completion marking.
//!
//! Patterns are globs on the file-name component only (`*`, `?`, `[...]`); the
//! directory part is taken literally. Completed files are marked by renaming
//! them with a leading `.`, which also hides them from later listings.

use std::io;
use std::path::{Path, PathBuf};

use regex::Regex;
use snafu::ResultExt;
use tracing::{debug, warn};

use crate::error::{InvalidPatternSnafu, ListingError, ReadDirSnafu};

/// File-name prefix marking a processed file.
pub const DONE_MARKER: char = '.';

/// List regular files matching `pattern`, sorted by path.
///
/// A missing directory yields an empty list. Hidden files never match.
pub fn list_input_files(pattern: &str) -> Result<Vec<PathBuf>, ListingError> {
    let pattern_path = Path::new(pattern);
    let dir = match pattern_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let name_pattern = pattern_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let matcher = glob_to_regex(&name_pattern)?;
    if has_glob_meta(&dir) {
        warn!(
            dir = %dir.display(),
            "Wildcards in the directory part of the pattern are not expanded"
        );
    }

    let entries = match std::fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(dir = %dir.display(), "Input directory does not exist");
            return Ok(Vec::new());
        }
        Err(e) => return Err(e).context(ReadDirSnafu { dir }),
    };

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.context(ReadDirSnafu { dir: dir.clone() })?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if name.starts_with(DONE_MARKER) || !matcher.is_match(name) {
            continue;
        }
        if entry.file_type().is_ok_and(|t| t.is_file()) {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

/// Path the file at `path` is renamed to once processed.
pub fn done_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!("{DONE_MARKER}{name}"))
}

/// Atomically rename `path` to its done path.
pub async fn mark_done(path: &Path) -> io::Result<PathBuf> {
    let target = done_path(path);
    tokio::fs::rename(path, &target).await?;
    Ok(target)
}

fn has_glob_meta(dir: &Path) -> bool {
    dir.to_string_lossy().contains(['*', '?', '['])
}

fn glob_to_regex(pattern: &str) -> Result<Regex, ListingError> {
    let mut expr = String::with_capacity(pattern.len() + 8);
    expr.push('^');
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => expr.push_str(".*"),
            '?' => expr.push('.'),
            '[' => {
                expr.push('[');
                if chars.peek() == Some(&'!') {
                    chars.next();
                    expr.push('^');
                }
                for class_char in chars.by_ref() {
                    if class_char == ']' {
                        break;
                    }
                    if class_char == '\\' || class_char == '[' {
                        expr.push('\\');
                    }
                    expr.push(class_char);
                }
                expr.push(']');
            }
            other => expr.push_str(&regex::escape(&other.to_string())),
        }
    }
    expr.push('$');
    Regex::new(&expr).context(InvalidPatternSnafu { pattern })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(dir: &Path, name: &str) {
        std::fs::write(dir.join(name), b"").unwrap();
    }

    fn names(files: &[PathBuf]) -> Vec<String> {
        files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_directory_wildcards_are_literal() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("day1")).unwrap();
        touch(&dir.path().join("day1"), "a.tsv.gz");

        let pattern = format!("{}/*/a.tsv.gz", dir.path().display());
        assert!(list_input_files(&pattern).unwrap().is_empty());

        assert!(has_glob_meta(Path::new("/data/*")));
        assert!(has_glob_meta(Path::new("/data/day[12]")));
        assert!(!has_glob_meta(dir.path()));
    }

    #[test]
    fn test_lists_matching_files_sorted() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "20170929000200.tsv.gz");
        touch(dir.path(), "20170929000000.tsv.gz");
        touch(dir.path(), "20170929000100.tsv.gz");
        touch(dir.path(), "notes.txt");
        std::fs::create_dir(dir.path().join("nested.tsv.gz")).unwrap();

        let pattern = format!("{}/*.tsv.gz", dir.path().display());
        let files = list_input_files(&pattern).unwrap();
        assert_eq!(
            names(&files),
            vec![
                "20170929000000.tsv.gz",
                "20170929000100.tsv.gz",
                "20170929000200.tsv.gz"
            ]
        );
    }

    #[test]
    fn test_done_files_are_hidden() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "a.tsv.gz");
        touch(dir.path(), ".b.tsv.gz");

        let files = list_input_files(&format!("{}/*", dir.path().display())).unwrap();
        assert_eq!(names(&files), vec!["a.tsv.gz"]);
    }

    #[test]
    fn test_question_mark_and_class() {
        let dir = TempDir::new().unwrap();
        for name in ["f1.gz", "f2.gz", "f3.gz", "f10.gz"] {
            touch(dir.path(), name);
        }

        let files = list_input_files(&format!("{}/f?.gz", dir.path().display())).unwrap();
        assert_eq!(names(&files), vec!["f1.gz", "f2.gz", "f3.gz"]);

        let files = list_input_files(&format!("{}/f[12].gz", dir.path().display())).unwrap();
        assert_eq!(names(&files), vec!["f1.gz", "f2.gz"]);

        let files = list_input_files(&format!("{}/f[!12].gz", dir.path().display())).unwrap();
        assert_eq!(names(&files), vec!["f3.gz"]);
    }

    #[test]
    fn test_dots_are_literal() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "atsvxgz");
        touch(dir.path(), "a.tsv.gz");
        let files = list_input_files(&format!("{}/a.tsv.gz", dir.path().display())).unwrap();
        assert_eq!(names(&files), vec!["a.tsv.gz"]);
    }

    #[test]
    fn test_missing_directory_is_empty() {
        let dir = TempDir::new().unwrap();
        let pattern = format!("{}/missing/*.tsv.gz", dir.path().display());
        assert!(list_input_files(&pattern).unwrap().is_empty());
    }

    #[test]
    fn test_done_path() {
        assert_eq!(
            done_path(Path::new("/data/appsinstalled/a.tsv.gz")),
            PathBuf::from("/data/appsinstalled/.a.tsv.gz")
        );
    }

    #[tokio::test]
    async fn test_mark_done_renames() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "a.tsv.gz");
        let original = dir.path().join("a.tsv.gz");

        let target = mark_done(&original).await.unwrap();
        assert!(!original.exists());
        assert!(target.exists());
        assert_eq!(target, dir.path().join(".a.tsv.gz"));
    }
}
