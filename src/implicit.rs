use crate::visitor::{flatten_dotted, RefKind, Reference};
use rustc_hash::FxHashMap;
use rustpython_ast::{self as ast, Expr};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Sidecar to the definition/reference walk that records dynamic
/// reference classes: string-dispatched names (`getattr`, `globals()[...]`,
/// `__import__`) and f-string name construction. Trace hits from the
/// external runtime tracer are handled by `TraceIndex`.
pub struct ImplicitRefTracker {
    /// String-dispatch references, drained into the file report.
    pub references: Vec<Reference>,
    file: PathBuf,
    module: String,
}

impl ImplicitRefTracker {
    pub fn new(file: PathBuf, module: String) -> Self {
        Self {
            references: Vec::new(),
            file,
            module,
        }
    }

    fn push(&mut self, kind: RefKind, name: String, line: usize) {
        self.references.push(Reference {
            kind,
            name,
            qualifier: None,
            file: self.file.clone(),
            line,
            module: self.module.clone(),
            enclosing_class: None,
            enclosing_function: None,
        });
    }

    /// Inspects a call site for string dispatch. Returns true when the
    /// call makes the module dynamic (`getattr`, `globals()`, `eval`, ...).
    pub fn inspect_call(&mut self, call: &ast::ExprCall, line: usize) -> bool {
        let Some(dotted) = flatten_dotted(&call.func) else {
            return false;
        };
        let leaf = dotted.rsplit('.').next().unwrap_or(&dotted);
        match leaf {
            "getattr" | "hasattr" | "setattr" | "delattr" => {
                if let Some(arg) = call.args.get(1) {
                    self.record_dispatch_name(arg, line);
                }
                true
            }
            "__import__" => {
                if let Some(arg) = call.args.first() {
                    self.record_dispatch_name(arg, line);
                }
                true
            }
            "globals" | "locals" | "vars" | "eval" | "exec" => true,
            _ => false,
        }
    }

    /// Inspects `globals()["name"]` / `locals()["name"]` subscripts.
    pub fn inspect_subscript(&mut self, sub: &ast::ExprSubscript, line: usize) -> bool {
        let Expr::Call(call) = sub.value.as_ref() else {
            return false;
        };
        let Expr::Name(func) = call.func.as_ref() else {
            return false;
        };
        if !matches!(func.id.as_str(), "globals" | "locals" | "vars") {
            return false;
        }
        self.record_dispatch_name(&sub.slice, line);
        true
    }

    /// A literal becomes a string-dispatch reference; an f-string with
    /// interpolation becomes a prefix glob (`handle_{x}` -> `handle_*`).
    fn record_dispatch_name(&mut self, arg: &Expr, line: usize) {
        match arg {
            Expr::Constant(constant) => {
                if let ast::Constant::Str(s) = &constant.value {
                    if is_identifier_like(s) {
                        self.push(RefKind::StringDispatch, s.to_string(), line);
                    }
                }
            }
            Expr::JoinedStr(joined) => {
                if let Some(pattern) = fstring_glob(&joined.values) {
                    self.push(RefKind::StringGlob, pattern, line);
                }
            }
            _ => {}
        }
    }
}

/// Builds a glob from f-string parts: literal text is kept, every
/// interpolated expression becomes `*`. Returns None when no literal text
/// remains to anchor the pattern.
fn fstring_glob(values: &[Expr]) -> Option<String> {
    let mut pattern = String::new();
    let mut literal_chars = 0;
    for value in values {
        match value {
            Expr::Constant(constant) => {
                if let ast::Constant::Str(s) = &constant.value {
                    pattern.push_str(s);
                    literal_chars += s.len();
                }
            }
            Expr::FormattedValue(_) => {
                if !pattern.ends_with('*') {
                    pattern.push('*');
                }
            }
            _ => return None,
        }
    }
    if literal_chars == 0 {
        return None;
    }
    Some(pattern)
}

fn is_identifier_like(s: &str) -> bool {
    !s.is_empty()
        && !s.contains(' ')
        && !s.contains('.')
        && s.chars().all(|c| c.is_alphanumeric() || c == '_')
}

/// Runtime trace hits consumed from the external tracer's JSON file:
/// a map of project-relative file paths to `[line, hit_count]` pairs.
/// Hits match definitions whose span overlaps the hit line by ±5 lines.
#[derive(Debug, Default)]
pub struct TraceIndex {
    by_file: FxHashMap<String, Vec<(usize, u64)>>,
    root: PathBuf,
}

/// Fuzzy window applied when matching trace lines against spans.
pub const TRACE_FUZZ_LINES: usize = 5;

impl TraceIndex {
    /// Loads a trace file, resolving the path relative to the project
    /// root. A missing or malformed file degrades to static analysis.
    pub fn load(trace_file: Option<&Path>, root: &Path) -> Self {
        let Some(trace_file) = trace_file else {
            return Self {
                by_file: FxHashMap::default(),
                root: root.to_path_buf(),
            };
        };
        let path = if trace_file.is_absolute() {
            trace_file.to_path_buf()
        } else {
            root.join(trace_file)
        };
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(_) => {
                info!(path = %path.display(), "trace file not found, falling back to static analysis");
                return Self {
                    by_file: FxHashMap::default(),
                    root: root.to_path_buf(),
                };
            }
        };
        let parsed: Result<FxHashMap<String, Vec<(usize, u64)>>, _> =
            serde_json::from_str(&contents);
        match parsed {
            Ok(by_file) => Self {
                by_file: by_file
                    .into_iter()
                    .map(|(k, v)| (normalize_path(&k), v))
                    .collect(),
                root: root.to_path_buf(),
            },
            Err(err) => {
                warn!(path = %path.display(), error = %err, "unreadable trace file, ignoring");
                Self {
                    by_file: FxHashMap::default(),
                    root: root.to_path_buf(),
                }
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.by_file.is_empty()
    }

    /// True when any recorded hit falls within the fuzzy window of the
    /// given definition span.
    pub fn hits_span(&self, file: &Path, line: usize, end_line: usize) -> bool {
        if self.by_file.is_empty() {
            return false;
        }
        let relative = file.strip_prefix(&self.root).unwrap_or(file);
        let key = normalize_path(&relative.to_string_lossy());
        let Some(hits) = self.by_file.get(&key) else {
            return false;
        };
        let low = line.saturating_sub(TRACE_FUZZ_LINES);
        let high = end_line + TRACE_FUZZ_LINES;
        hits.iter().any(|(hit_line, count)| {
            *count > 0 && *hit_line >= low && *hit_line <= high
        })
    }
}

fn normalize_path(path: &str) -> String {
    path.replace('\\', "/")
}
