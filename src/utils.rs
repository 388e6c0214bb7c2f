use lazy_static::lazy_static;
use regex::Regex;
use rustpython_ast::TextSize;

/// A utility struct to convert byte offsets to line numbers.
///
/// The AST parser works with byte offsets, but every finding is reported
/// with 1-indexed line numbers.
pub struct LineIndex {
    /// Byte index of the start of each line.
    line_starts: Vec<usize>,
}

impl LineIndex {
    /// Creates a new `LineIndex` by scanning the source code for newlines.
    pub fn new(source: &str) -> Self {
        let mut line_starts = vec![0];
        for (i, ch) in source.char_indices() {
            if ch == '\n' {
                line_starts.push(i + 1);
            }
        }
        Self { line_starts }
    }

    /// Converts a `TextSize` (byte offset) to a 1-indexed line number.
    pub fn line_index(&self, offset: TextSize) -> usize {
        let offset = offset.to_usize();
        match self.line_starts.binary_search(&offset) {
            Ok(line) => line + 1,
            Err(line) => line,
        }
    }

    /// Number of lines in the indexed source.
    pub fn line_count(&self) -> usize {
        self.line_starts.len()
    }
}

lazy_static! {
    // Files under a tests/ directory, or named test_*.py / *_test.py.
    static ref TEST_PATH_RE: Regex =
        Regex::new(r"(?:^|[/\\])tests?[/\\]|(?:^|[/\\])test_[^/\\]*\.py$|_test\.py$").unwrap();
}

/// Returns true when a path looks like a test file (tests/ dir, test_*.py,
/// *_test.py). Definitions in such files are pinned live by the scorer.
pub fn is_test_path(path: &str) -> bool {
    TEST_PATH_RE.is_match(path)
}

/// Counts non-blank source lines for the report summary.
pub fn count_loc(source: &str) -> usize {
    source.lines().filter(|l| !l.trim().is_empty()).count()
}
