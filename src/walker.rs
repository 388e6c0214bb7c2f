use serde::Serialize;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Default folder names skipped during the walk.
pub const DEFAULT_EXCLUDES: &[&str] = &[
    "__pycache__",
    ".git",
    ".venv",
    "venv",
    "build",
    "dist",
    ".tox",
    "node_modules",
    "htmlcov",
    "*.egg-info",
];

/// Source language of a candidate file, classified by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
}

impl Language {
    pub fn as_str(self) -> &'static str {
        match self {
            Language::Python => "python",
        }
    }

    fn classify(path: &Path) -> Option<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("py" | "pyi" | "pyw") => Some(Language::Python),
            _ => None,
        }
    }
}

/// A candidate file produced by the walk.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: PathBuf,
    pub language: Language,
}

/// Enumerates candidate source files under a project root.
///
/// Exclusion matches on any ancestor segment of the path relative to the
/// root; include rules override excludes. Output is sorted by path so the
/// merge stage sees files in a reproducible order.
pub struct FileWalker {
    excludes: Vec<String>,
    includes: Vec<String>,
}

impl FileWalker {
    pub fn new(exclude_folders: &[String], include_folders: &[String]) -> Self {
        let mut excludes: Vec<String> = DEFAULT_EXCLUDES.iter().map(|s| (*s).to_string()).collect();
        excludes.extend(exclude_folders.iter().cloned());
        Self {
            excludes,
            includes: include_folders.to_vec(),
        }
    }

    /// Walks `root` and returns the matching files, sorted by path.
    pub fn collect(&self, root: &Path) -> Vec<SourceFile> {
        let mut files = Vec::new();
        let mut it = WalkDir::new(root).into_iter();

        while let Some(entry) = it.next() {
            let Ok(entry) = entry else { continue };
            let name = entry.file_name().to_string_lossy().to_string();

            if entry.file_type().is_dir() {
                // The root itself is never matched against exclude rules.
                if entry.depth() == 0 {
                    continue;
                }
                let included = self.includes.iter().any(|f| f == &name);
                if !included && self.segment_excluded(&name) {
                    it.skip_current_dir();
                    continue;
                }
            } else if let Some(language) = Language::classify(entry.path()) {
                if self.path_excluded(entry.path(), root) {
                    continue;
                }
                files.push(SourceFile {
                    path: entry.path().to_path_buf(),
                    language,
                });
            }
        }

        files.sort_by(|a, b| a.path.cmp(&b.path));
        files
    }

    /// True when a single path segment matches an exclude fragment.
    /// Fragments may carry a `*` wildcard (e.g. `*.egg-info`).
    fn segment_excluded(&self, segment: &str) -> bool {
        self.excludes.iter().any(|pattern| {
            if let Some(suffix) = pattern.strip_prefix('*') {
                segment.ends_with(suffix)
            } else if let Some(prefix) = pattern.strip_suffix('*') {
                segment.starts_with(prefix)
            } else {
                segment == pattern
            }
        })
    }

    /// Checks every ancestor segment of the normalized relative path.
    fn path_excluded(&self, path: &Path, root: &Path) -> bool {
        let relative = path.strip_prefix(root).unwrap_or(path);
        for component in relative.components() {
            let segment = component.as_os_str().to_string_lossy();
            if self.includes.iter().any(|f| f == segment.as_ref()) {
                return false;
            }
            if self.segment_excluded(&segment) {
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "x = 1\n").unwrap();
    }

    #[test]
    fn collects_python_extensions_sorted() {
        let dir = tempdir().unwrap();
        touch(&dir.path().join("b.py"));
        touch(&dir.path().join("a.pyi"));
        touch(&dir.path().join("c.pyw"));
        touch(&dir.path().join("notes.txt"));

        let walker = FileWalker::new(&[], &[]);
        let files = walker.collect(dir.path());
        let names: Vec<_> = files
            .iter()
            .map(|f| f.path.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.pyi", "b.py", "c.pyw"]);
    }

    #[test]
    fn default_excludes_apply_to_ancestors() {
        let dir = tempdir().unwrap();
        touch(&dir.path().join("pkg/mod.py"));
        touch(&dir.path().join(".venv/lib/site.py"));
        touch(&dir.path().join("pkg/__pycache__/mod.py"));
        touch(&dir.path().join("thing.egg-info/meta.py"));

        let walker = FileWalker::new(&[], &[]);
        let files = walker.collect(dir.path());
        assert_eq!(files.len(), 1);
        assert!(files[0].path.ends_with("pkg/mod.py"));
    }

    #[test]
    fn include_overrides_exclude() {
        let dir = tempdir().unwrap();
        touch(&dir.path().join("build/gen.py"));

        let walker = FileWalker::new(&[], &["build".to_string()]);
        let files = walker.collect(dir.path());
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn user_excludes_merge_with_defaults() {
        let dir = tempdir().unwrap();
        touch(&dir.path().join("vendored/dep.py"));
        touch(&dir.path().join("app.py"));

        let walker = FileWalker::new(&["vendored".to_string()], &[]);
        let files = walker.collect(dir.path());
        assert_eq!(files.len(), 1);
        assert!(files[0].path.ends_with("app.py"));
    }
}
