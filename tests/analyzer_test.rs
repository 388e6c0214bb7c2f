use skylos::analyzer::{AnalysisResult, Skylos};
use skylos::config::Config;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use tempfile::tempdir;

fn write_file(dir: &Path, name: &str, content: &str) {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    let mut file = File::create(path).unwrap();
    write!(file, "{content}").unwrap();
}

fn analyze(dir: &Path, config: Config) -> AnalysisResult {
    Skylos::new(config).unwrap().analyze(dir).unwrap()
}

fn analyze_default(dir: &Path) -> AnalysisResult {
    analyze(dir, Config::default())
}

fn simple_names(findings: &[skylos::analyzer::Finding]) -> Vec<String> {
    findings.iter().map(|f| f.simple_name.clone()).collect()
}

#[test]
fn test_analyze_basic() {
    let dir = tempdir().unwrap();
    write_file(
        dir.path(),
        "main.py",
        r#"def used_function():
    return "used"

def unused_function():
    return "unused"

class UsedClass:
    pass

class UnusedClass:
    pass

result = used_function()
instance = UsedClass()
"#,
    );

    let result = analyze_default(dir.path());
    let funcs = simple_names(&result.unused_functions);
    assert!(funcs.contains(&"unused_function".to_string()));
    assert!(!funcs.contains(&"used_function".to_string()));

    let classes = simple_names(&result.unused_classes);
    assert!(classes.contains(&"UnusedClass".to_string()));
    assert!(!classes.contains(&"UsedClass".to_string()));

    assert_eq!(result.analysis_summary.total_files, 1);
    assert_eq!(
        result.analysis_summary.languages.get("python").copied(),
        Some(1)
    );
}

#[test]
fn test_unused_import_scenario() {
    let dir = tempdir().unwrap();
    write_file(
        dir.path(),
        "main.py",
        "import json\nimport os\n\nprint(os.getcwd())\n",
    );

    let result = analyze_default(dir.path());
    let imports = simple_names(&result.unused_imports);
    assert!(imports.contains(&"json".to_string()));
    assert!(!imports.contains(&"os".to_string()));

    let json_finding = result
        .unused_imports
        .iter()
        .find(|f| f.simple_name == "json")
        .unwrap();
    assert!(json_finding.confidence >= 60);
    assert_eq!(json_finding.kind, "import");
    assert_eq!(json_finding.rule_id, "SKY-U004");
}

#[test]
fn test_flask_route_liveness() {
    let dir = tempdir().unwrap();
    write_file(
        dir.path(),
        "app.py",
        r#"from flask import Flask

app = Flask(__name__)

@app.route('/')
def index():
    return 'hi'
"#,
    );

    let result = analyze_default(dir.path());
    assert_eq!(result.dead_code_count(), 0, "route handler must be live");
}

#[test]
fn test_super_call_crediting() {
    let dir = tempdir().unwrap();
    write_file(
        dir.path(),
        "main.py",
        r#"class A:
    def run(self):
        pass

class B(A):
    def run(self):
        super().run()
"#,
    );

    let result = analyze_default(dir.path());
    let methods: Vec<String> = result
        .unused_methods
        .iter()
        .map(|f| f.name.clone())
        .collect();
    // B.run has no caller; A.run is credited by the super() chain and
    // drops below threshold.
    assert!(methods.contains(&"main.B.run".to_string()));
    assert!(!methods.contains(&"main.A.run".to_string()));
}

#[test]
fn test_instance_attribute_inference() {
    let dir = tempdir().unwrap();
    write_file(
        dir.path(),
        "main.py",
        r#"class Helper:
    def do(self):
        return 1

class Main:
    def __init__(self):
        self.h = Helper()

    def run(self):
        return self.h.do()

Main().run()
"#,
    );

    let result = analyze_default(dir.path());
    assert_eq!(result.dead_code_count(), 0);
}

#[test]
fn test_protocol_member_pinning() {
    let dir = tempdir().unwrap();
    write_file(
        dir.path(),
        "main.py",
        r#"from typing import Protocol

class R(Protocol):
    def read(self):
        ...

class F:
    def read(self):
        ...
"#,
    );

    let result = analyze_default(dir.path());
    let methods: Vec<String> = result
        .unused_methods
        .iter()
        .map(|f| f.name.clone())
        .collect();
    // Protocol members are never reported; a single-method protocol is
    // below the duck-typing floor, so the concrete method still surfaces.
    assert!(!methods.contains(&"main.R.read".to_string()));
    assert!(methods.contains(&"main.F.read".to_string()));
}

#[test]
fn test_duck_typed_protocol_implementer() {
    let dir = tempdir().unwrap();
    write_file(
        dir.path(),
        "main.py",
        r#"from typing import Protocol

class Reader(Protocol):
    def read(self):
        ...

    def write(self):
        ...

    def close(self):
        ...

class FileIO:
    def read(self):
        return 1

    def write(self):
        return 2

    def close(self):
        return 3

    def extra(self):
        return 4

io = FileIO()
"#,
    );

    let result = analyze_default(dir.path());
    let methods: Vec<String> = result
        .unused_methods
        .iter()
        .map(|f| f.name.clone())
        .collect();
    assert!(!methods.contains(&"main.FileIO.read".to_string()));
    assert!(!methods.contains(&"main.FileIO.write".to_string()));
    assert!(!methods.contains(&"main.FileIO.close".to_string()));
    assert!(methods.contains(&"main.FileIO.extra".to_string()));
}

#[test]
fn test_trace_overrides_static_analysis() {
    let dir = tempdir().unwrap();
    let source = "def handle_login():\n    flag = True\n    return flag\n";
    write_file(dir.path(), "app.py", source);

    // Statically dead.
    let without_trace = analyze_default(dir.path());
    assert!(simple_names(&without_trace.unused_functions).contains(&"handle_login".to_string()));

    // The tracer saw line 2 execute.
    write_file(dir.path(), "trace.json", r#"{"app.py": [[2, 1]]}"#);
    let config = Config {
        trace_file: Some("trace.json".into()),
        ..Config::default()
    };
    let with_trace = analyze(dir.path(), config);
    assert!(!simple_names(&with_trace.unused_functions).contains(&"handle_login".to_string()));
}

#[test]
fn test_all_exports_are_live() {
    let dir = tempdir().unwrap();
    write_file(
        dir.path(),
        "main.py",
        r#"__all__ = ["exported"]

def exported():
    pass

def hidden():
    pass
"#,
    );

    let result = analyze_default(dir.path());
    let funcs = simple_names(&result.unused_functions);
    assert!(!funcs.contains(&"exported".to_string()));
    assert!(funcs.contains(&"hidden".to_string()));
}

#[test]
fn test_dunders_never_reported() {
    let dir = tempdir().unwrap();
    write_file(
        dir.path(),
        "main.py",
        r#"class Thing:
    def __init__(self):
        self.x = 1

    def __repr__(self):
        return "t"

    def __eq__(self, other):
        return self.x == other.x

Thing()
"#,
    );

    let result = analyze_default(dir.path());
    assert!(result.unused_methods.is_empty());
}

#[test]
fn test_pragma_suppression() {
    let dir = tempdir().unwrap();
    write_file(
        dir.path(),
        "main.py",
        r#"def kept_on_purpose():  # pragma: no skylos
    pass

def other_unused():
    pass
"#,
    );

    let result = analyze_default(dir.path());
    let funcs = simple_names(&result.unused_functions);
    assert!(!funcs.contains(&"kept_on_purpose".to_string()));
    assert!(funcs.contains(&"other_unused".to_string()));
}

#[test]
fn test_block_suppression() {
    let dir = tempdir().unwrap();
    write_file(
        dir.path(),
        "main.py",
        r#"# skylos: ignore-start
def generated_one():
    pass

def generated_two():
    pass
# skylos: ignore-end

def visible_unused():
    pass
"#,
    );

    let result = analyze_default(dir.path());
    let funcs = simple_names(&result.unused_functions);
    assert!(!funcs.contains(&"generated_one".to_string()));
    assert!(!funcs.contains(&"generated_two".to_string()));
    assert!(funcs.contains(&"visible_unused".to_string()));
}

#[test]
fn test_whitelist_names() {
    let dir = tempdir().unwrap();
    write_file(
        dir.path(),
        "main.py",
        "def legacy_hook():\n    pass\n\ndef modern_dead():\n    pass\n",
    );

    let mut config = Config::default();
    config.whitelist.names.push("legacy_*".to_string());
    let result = analyze(dir.path(), config);
    let funcs = simple_names(&result.unused_functions);
    assert!(!funcs.contains(&"legacy_hook".to_string()));
    assert!(funcs.contains(&"modern_dead".to_string()));
}

#[test]
fn test_confidence_threshold_filtering() {
    let dir = tempdir().unwrap();
    write_file(
        dir.path(),
        "main.py",
        "def regular_unused():\n    pass\n\ndef _private_unused():\n    pass\n",
    );

    // Private names carry a -20 penalty: 100 vs 80.
    let high = analyze(
        dir.path(),
        Config {
            confidence: 90,
            ..Config::default()
        },
    );
    let funcs_high = simple_names(&high.unused_functions);
    assert!(funcs_high.contains(&"regular_unused".to_string()));
    assert!(!funcs_high.contains(&"_private_unused".to_string()));

    let low = analyze(
        dir.path(),
        Config {
            confidence: 60,
            ..Config::default()
        },
    );
    let funcs_low = simple_names(&low.unused_functions);
    assert!(funcs_low.contains(&"regular_unused".to_string()));
    assert!(funcs_low.contains(&"_private_unused".to_string()));
}

#[test]
fn test_unused_parameters() {
    let dir = tempdir().unwrap();
    write_file(
        dir.path(),
        "main.py",
        "def compute(used, unused):\n    return used\n\ncompute(1, 2)\n",
    );

    let result = analyze_default(dir.path());
    let params = simple_names(&result.unused_parameters);
    assert!(params.contains(&"unused".to_string()));
    assert!(!params.contains(&"used".to_string()));
}

#[test]
fn test_dead_class_drags_its_methods() {
    let dir = tempdir().unwrap();
    write_file(
        dir.path(),
        "main.py",
        r#"class Orphan:
    def helper(self):
        return self.other()

    def other(self):
        return 1
"#,
    );

    let result = analyze_default(dir.path());
    assert!(simple_names(&result.unused_classes).contains(&"Orphan".to_string()));
    let methods: Vec<String> = result
        .unused_methods
        .iter()
        .map(|f| f.name.clone())
        .collect();
    // `other` is only called from inside the dead class; the internal
    // reference cannot rescue it.
    assert!(methods.contains(&"main.Orphan.helper".to_string()));
    assert!(methods.contains(&"main.Orphan.other".to_string()));
}

#[test]
fn test_unused_file_detection() {
    let dir = tempdir().unwrap();
    write_file(dir.path(), "main.py", "import util\n\nutil.helper()\n");
    write_file(dir.path(), "util.py", "def helper():\n    return 1\n");
    write_file(dir.path(), "orphan.py", "def dead():\n    pass\n");

    let result = analyze_default(dir.path());
    let files = simple_names(&result.unused_files);
    assert!(files.contains(&"orphan".to_string()));
    assert!(!files.contains(&"util".to_string()));
    assert!(!files.contains(&"main".to_string()));
}

#[test]
fn test_mixin_methods_soft_penalized() {
    let dir = tempdir().unwrap();
    write_file(
        dir.path(),
        "main.py",
        r#"class HelperMixin:
    def assist(self):
        pass

class Plain:
    def standalone(self):
        pass

a = HelperMixin
b = Plain
"#,
    );

    let result = analyze_default(dir.path());
    let methods: Vec<String> = result
        .unused_methods
        .iter()
        .map(|f| f.name.clone())
        .collect();
    // Mixin methods drop to 40 (< 60); plain methods stay at 100.
    assert!(!methods.contains(&"main.HelperMixin.assist".to_string()));
    assert!(methods.contains(&"main.Plain.standalone".to_string()));
}

#[test]
fn test_optional_import_pattern_is_live() {
    let dir = tempdir().unwrap();
    write_file(
        dir.path(),
        "main.py",
        r#"try:
    import ujson
except ImportError:
    ujson = None
"#,
    );

    let result = analyze_default(dir.path());
    assert!(result.unused_imports.is_empty());
    assert!(result.unused_variables.is_empty());
}

#[test]
fn test_main_guard_calls_are_live() {
    let dir = tempdir().unwrap();
    write_file(
        dir.path(),
        "cli.py",
        r#"def run():
    return 0

def never_called():
    return 1

if __name__ == "__main__":
    run()
"#,
    );

    let result = analyze_default(dir.path());
    let funcs = simple_names(&result.unused_functions);
    assert!(!funcs.contains(&"run".to_string()));
    assert!(funcs.contains(&"never_called".to_string()));
}

#[test]
fn test_constants_soft_penalized() {
    let dir = tempdir().unwrap();
    write_file(
        dir.path(),
        "config.py",
        "MAX_SIZE = 10\nunused_var = 2\n",
    );

    let result = analyze_default(dir.path());
    let max_size = result
        .unused_variables
        .iter()
        .find(|f| f.simple_name == "MAX_SIZE")
        .expect("constant should still surface at the default threshold");
    // 100 - 30 for the ALL_CAPS constant penalty.
    assert_eq!(max_size.confidence, 70);
    assert_eq!(max_size.kind, "constant");

    let plain = result
        .unused_variables
        .iter()
        .find(|f| f.simple_name == "unused_var")
        .unwrap();
    assert_eq!(plain.confidence, 100);
}

#[test]
fn test_determinism_byte_identical_json() {
    let dir = tempdir().unwrap();
    write_file(
        dir.path(),
        "pkg/__init__.py",
        "from .core import start\n\n__all__ = [\"start\"]\n",
    );
    write_file(
        dir.path(),
        "pkg/core.py",
        r#"import json

def start():
    return helper()

def helper():
    return 1

def dead_one():
    pass

def dead_two():
    pass
"#,
    );
    write_file(dir.path(), "orphan.py", "def gone():\n    pass\n");

    let first = serde_json::to_string(&analyze_default(dir.path())).unwrap();
    let second = serde_json::to_string(&analyze_default(dir.path())).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_reference_monotonicity() {
    let without_ref = {
        let dir = tempdir().unwrap();
        write_file(dir.path(), "main.py", "def target():\n    pass\n");
        let result = analyze(
            dir.path(),
            Config {
                confidence: 0,
                ..Config::default()
            },
        );
        result
            .unused_functions
            .iter()
            .find(|f| f.simple_name == "target")
            .map(|f| f.confidence)
            .unwrap()
    };
    let with_ref = {
        let dir = tempdir().unwrap();
        write_file(dir.path(), "main.py", "def target():\n    pass\n\ntarget()\n");
        let result = analyze(
            dir.path(),
            Config {
                confidence: 0,
                ..Config::default()
            },
        );
        result
            .unused_functions
            .iter()
            .find(|f| f.simple_name == "target")
            .map(|f| f.confidence)
            .unwrap_or(0)
    };
    assert!(with_ref < without_ref);
}

#[test]
fn test_cross_file_references() {
    let dir = tempdir().unwrap();
    write_file(
        dir.path(),
        "main.py",
        "from util import helper\n\nhelper()\n",
    );
    write_file(
        dir.path(),
        "util.py",
        "def helper():\n    return 1\n\ndef lonely():\n    pass\n",
    );

    let result = analyze_default(dir.path());
    let funcs: Vec<String> = result
        .unused_functions
        .iter()
        .map(|f| f.name.clone())
        .collect();
    assert!(!funcs.contains(&"util.helper".to_string()));
    assert!(funcs.contains(&"util.lonely".to_string()));
}

#[test]
fn test_ignore_rules_filter_categories() {
    let dir = tempdir().unwrap();
    write_file(dir.path(), "main.py", "import json\n\ndef dead():\n    pass\n");

    let config = Config {
        ignore_rules: vec!["SKY-U004".to_string()],
        ..Config::default()
    };
    let result = analyze(dir.path(), config);
    assert!(result.unused_imports.is_empty());
    assert!(!result.unused_functions.is_empty());
}

#[test]
fn test_analyze_empty_directory() {
    let dir = tempdir().unwrap();
    let result = analyze_default(dir.path());
    assert_eq!(result.analysis_summary.total_files, 0);
    assert_eq!(result.dead_code_count(), 0);
}

#[test]
fn test_string_dispatch_rescues_handler() {
    let dir = tempdir().unwrap();
    write_file(
        dir.path(),
        "main.py",
        r#"class Dispatcher:
    def handle_login(self):
        pass

    def run(self, action):
        return getattr(self, "handle_login")()

d = Dispatcher()
d.run("login")
"#,
    );

    let result = analyze_default(dir.path());
    let methods: Vec<String> = result
        .unused_methods
        .iter()
        .map(|f| f.name.clone())
        .collect();
    assert!(!methods.contains(&"main.Dispatcher.handle_login".to_string()));
}

#[test]
fn test_fstring_glob_dispatch() {
    let dir = tempdir().unwrap();
    write_file(
        dir.path(),
        "main.py",
        r#"class Router:
    def handle_login(self):
        pass

    def handle_logout(self):
        pass

    def dispatch(self, action):
        return getattr(self, f"handle_{action}")()

r = Router()
r.dispatch("login")
"#,
    );

    let result = analyze_default(dir.path());
    let methods: Vec<String> = result
        .unused_methods
        .iter()
        .map(|f| f.name.clone())
        .collect();
    assert!(!methods.contains(&"main.Router.handle_login".to_string()));
    assert!(!methods.contains(&"main.Router.handle_logout".to_string()));
}
