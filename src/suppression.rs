use lazy_static::lazy_static;
use regex::Regex;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::warn;

lazy_static! {
    // `# skylos: ignore[SKY-D001]`, the rule-scoped form.
    static ref SCOPED_IGNORE_RE: Regex =
        Regex::new(r"skylos:\s*ignore\[([A-Za-z0-9_-]+)\]").unwrap();
}

/// Blanket suppression tokens recognized on a line.
const BLANKET_TOKENS: &[&str] = &["pragma: no skylos", "pragma: no cover", "noqa"];

/// Per-file suppression state extracted from comments.
///
/// Lines may carry a blanket token (every finding on that line is dropped),
/// a rule-scoped token (only the named rule is dropped), or sit inside a
/// `skylos: ignore-start` / `skylos: ignore-end` block.
#[derive(Debug, Default)]
pub struct Suppressions {
    /// Lines with a blanket suppression, block spans already expanded.
    all: FxHashSet<usize>,
    /// rule id -> lines where only that rule is suppressed.
    by_rule: FxHashMap<String, FxHashSet<usize>>,
}

impl Suppressions {
    /// True when every finding on `line` is suppressed.
    pub fn is_suppressed(&self, line: usize) -> bool {
        self.all.contains(&line)
    }

    /// True when `rule_id` findings on `line` are suppressed.
    pub fn is_rule_suppressed(&self, line: usize, rule_id: &str) -> bool {
        if self.all.contains(&line) {
            return true;
        }
        self.by_rule
            .get(rule_id)
            .is_some_and(|lines| lines.contains(&line))
    }

    /// Number of blanket-suppressed lines, used by tests.
    pub fn blanket_len(&self) -> usize {
        self.all.len()
    }
}

/// Scans a file's source for suppression comments.
pub fn scan(source: &str, file_label: &str) -> Suppressions {
    let mut suppressions = Suppressions::default();
    let mut block_start: Option<usize> = None;
    let mut line_total = 0;

    for (idx, line) in source.lines().enumerate() {
        let lineno = idx + 1;
        line_total = lineno;

        if line.contains("skylos: ignore-start") {
            if block_start.is_none() {
                block_start = Some(lineno);
            }
            continue;
        }
        if line.contains("skylos: ignore-end") {
            if let Some(start) = block_start.take() {
                for covered in start..=lineno {
                    suppressions.all.insert(covered);
                }
            }
            continue;
        }

        if let Some(caps) = SCOPED_IGNORE_RE.captures(line) {
            let rule_id = caps[1].to_string();
            suppressions
                .by_rule
                .entry(rule_id)
                .or_default()
                .insert(lineno);
            continue;
        }

        // `skylos: ignore` without brackets is a blanket token; the scoped
        // form was already consumed above.
        if line.contains("skylos: ignore") || BLANKET_TOKENS.iter().any(|t| line.contains(t)) {
            suppressions.all.insert(lineno);
        }
    }

    // Unterminated block: suppress to end of file.
    if let Some(start) = block_start {
        warn!(
            file = file_label,
            line = start,
            "unterminated 'skylos: ignore-start' block, suppressing to end of file"
        );
        for covered in start..=line_total {
            suppressions.all.insert(covered);
        }
    }

    suppressions
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_line_tokens() {
        let source = "\
def used():  # pragma: no skylos
    pass

def other():  # noqa
    pass

def third():  # skylos: ignore
    pass

def fine():
    pass
";
        let sup = scan(source, "test.py");
        assert!(sup.is_suppressed(1));
        assert!(sup.is_suppressed(4));
        assert!(sup.is_suppressed(7));
        assert!(!sup.is_suppressed(10));
    }

    #[test]
    fn rule_scoped_token_only_hits_that_rule() {
        let source = "eval(code)  # skylos: ignore[SKY-D001]\n";
        let sup = scan(source, "test.py");
        assert!(sup.is_rule_suppressed(1, "SKY-D001"));
        assert!(!sup.is_rule_suppressed(1, "SKY-S101"));
        assert!(!sup.is_suppressed(1));
    }

    #[test]
    fn block_markers_cover_span() {
        let source = "\
a = 1
# skylos: ignore-start
b = 2
c = 3
# skylos: ignore-end
d = 4
";
        let sup = scan(source, "test.py");
        assert!(!sup.is_suppressed(1));
        assert!(sup.is_suppressed(2));
        assert!(sup.is_suppressed(3));
        assert!(sup.is_suppressed(4));
        assert!(sup.is_suppressed(5));
        assert!(!sup.is_suppressed(6));
    }

    #[test]
    fn unterminated_block_suppresses_to_eof() {
        let source = "\
a = 1
# skylos: ignore-start
b = 2
c = 3
";
        let sup = scan(source, "test.py");
        assert!(!sup.is_suppressed(1));
        assert!(sup.is_suppressed(2));
        assert!(sup.is_suppressed(3));
        assert!(sup.is_suppressed(4));
    }
}
