#![forbid(unsafe_code)]

//! Resolves the `--files` glob into a sorted list of candidate archives.

use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use globset::GlobBuilder;
use tracing::debug;
use walkdir::WalkDir;

const GLOB_META: &[char] = &['*', '?', '[', '{'];

/// Returns every regular file matching `pattern`, sorted by path.
///
/// `*` and `?` never cross a path separator; `**` matches any number of
/// directories. A base directory that does not exist yields no files.
pub fn discover(pattern: &str) -> Result<Vec<PathBuf>> {
    let normalized = normalize_pattern(pattern);
    let matcher = GlobBuilder::new(&normalized)
        .literal_separator(true)
        .build()
        .with_context(|| format!("invalid --files pattern `{pattern}`"))?
        .compile_matcher();

    let (base, depth) = split_pattern(&normalized);
    let relative = base.as_os_str().is_empty();
    let root = if relative { PathBuf::from(".") } else { base };

    if !root.exists() {
        debug!(base = %root.display(), "input directory does not exist");
        return Ok(Vec::new());
    }

    let mut walker = WalkDir::new(&root).follow_links(true);
    if let Some(depth) = depth {
        walker = walker.max_depth(depth);
    }

    let mut found = Vec::new();
    for entry in walker {
        let entry = entry.with_context(|| format!("failed to walk {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = if relative {
            entry.path().strip_prefix(".").unwrap_or(entry.path()).to_path_buf()
        } else {
            entry.into_path()
        };
        if matcher.is_match(&path) {
            found.push(path);
        }
    }

    found.sort();
    Ok(found)
}

/// Drops `.` components so the matcher sees paths the way the walker yields
/// them.
fn normalize_pattern(pattern: &str) -> String {
    let normalized: PathBuf = Path::new(pattern)
        .components()
        .filter(|component| !matches!(component, Component::CurDir))
        .collect();
    normalized.to_string_lossy().into_owned()
}

/// Splits a normalized pattern into the literal directory prefix that can be walked and
/// the walk depth below it (`None` when `**` allows any depth).
fn split_pattern(pattern: &str) -> (PathBuf, Option<usize>) {
    let mut base = PathBuf::new();
    let mut rest = Vec::new();

    for component in Path::new(pattern).components() {
        let text = component.as_os_str().to_string_lossy();
        if rest.is_empty() && !text.contains(GLOB_META) {
            base.push(component.as_os_str());
        } else {
            rest.push(text.into_owned());
        }
    }

    if rest.iter().any(|part| part.contains("**")) {
        (base, None)
    } else {
        (base, Some(rest.len()))
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::*;

    fn touch(path: &Path) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent");
        }
        fs::write(path, b"x").expect("write file");
    }

    #[test]
    fn split_stops_at_first_wildcard() {
        assert_eq!(
            split_pattern("eng/signing/tosign/*"),
            (PathBuf::from("eng/signing/tosign"), Some(1))
        );
        assert_eq!(split_pattern("dist/**/go*.zip"), (PathBuf::from("dist"), None));
        assert_eq!(split_pattern("go*.zip"), (PathBuf::new(), Some(1)));
        assert_eq!(
            split_pattern(&normalize_pattern("./out/go.zip")),
            (PathBuf::from("out/go.zip"), Some(0))
        );
        assert_eq!(
            split_pattern(&normalize_pattern("./eng/./tosign/*")),
            (PathBuf::from("eng/tosign"), Some(1))
        );
    }

    #[test]
    fn current_directory_components_are_dropped() {
        assert_eq!(normalize_pattern("./eng/signing/tosign/*"), "eng/signing/tosign/*");
        assert_eq!(normalize_pattern("dist/./**/go*.zip"), "dist/**/go*.zip");
        assert_eq!(normalize_pattern("/abs/./go*"), "/abs/go*");
        assert_eq!(normalize_pattern("go*.zip"), "go*.zip");
    }

    #[test]
    fn matches_files_in_one_directory_only() {
        let temp = tempdir().expect("temp dir");
        let root = temp.path();
        touch(&root.join("go1.zip"));
        touch(&root.join("go1.darwin-arm64.tar.gz"));
        touch(&root.join("nested/go2.zip"));
        fs::create_dir_all(root.join("go-dir")).expect("dir");

        let pattern = format!("{}/go*", root.display());
        let found = discover(&pattern).expect("discover");

        assert_eq!(
            found,
            vec![root.join("go1.darwin-arm64.tar.gz"), root.join("go1.zip")]
        );

        let dotted = format!("{}/./go*", root.display());
        assert_eq!(discover(&dotted).expect("discover"), found);
    }

    #[test]
    fn double_star_descends() {
        let temp = tempdir().expect("temp dir");
        let root = temp.path();
        touch(&root.join("a/b/go.zip"));
        touch(&root.join("go.zip"));

        let pattern = format!("{}/**/go.zip", root.display());
        let found = discover(&pattern).expect("discover");
        assert!(found.contains(&root.join("a/b/go.zip")));
    }

    #[test]
    fn missing_directory_yields_nothing() {
        let temp = tempdir().expect("temp dir");
        let pattern = format!("{}/missing/*", temp.path().display());
        assert!(discover(&pattern).expect("discover").is_empty());
    }

    #[test]
    fn malformed_pattern_is_an_error() {
        assert!(discover("dist/go[.zip").is_err());
    }
}
