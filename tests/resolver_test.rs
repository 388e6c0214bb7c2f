// Merge + resolve stages driven directly from parsed sources.

use rustpython_parser::{parse, Mode};
use skylos::entry_point::main_guard_calls;
use skylos::merge::{self, FileReport};
use skylos::resolve;
use skylos::suppression::scan;
use skylos::utils::{count_loc, LineIndex};
use skylos::visitor::DefRefVisitor;
use std::path::{Path, PathBuf};

fn report_for(file: &str, module: &str, source: &str) -> FileReport {
    let line_index = LineIndex::new(source);
    let tree = parse(source, Mode::Module, file).expect("Failed to parse");
    let rustpython_ast::Mod::Module(module_ast) = tree else {
        panic!("expected module");
    };
    let mut visitor = DefRefVisitor::new(PathBuf::from(file), module.to_string(), &line_index);
    visitor.visit_body(&module_ast.body);

    let mut references = visitor.references;
    references.append(&mut visitor.implicit.references);
    FileReport {
        file: PathBuf::from(file),
        module: module.to_string(),
        definitions: visitor.definitions,
        references,
        aliases: visitor.aliases,
        exports: visitor.exports,
        instance_attr_types: visitor.instance_attr_types,
        suppressions: scan(source, file),
        main_guard_calls: main_guard_calls(&module_ast.body),
        dynamic_dispatch: visitor.uses_dynamic_dispatch,
        loc: count_loc(source),
    }
}

#[test]
fn test_super_call_credits_ancestor_only() {
    let source = r#"
class A:
    def run(self):
        pass

class B(A):
    def run(self):
        super().run()
"#;
    let graph = merge::merge(vec![report_for("m.py", "m", source)], Path::new("."));
    let resolution = resolve::resolve(&graph);

    assert!(resolution.in_degree_of("m.A.run") >= 1);
    assert_eq!(resolution.in_degree_of("m.B.run"), 0);
}

#[test]
fn test_cross_file_inherited_method_lookup() {
    let base = r#"
class Base:
    def greet(self):
        return "hi"
"#;
    let child = r#"
from base import Base

class Child(Base):
    def call(self):
        return self.greet()
"#;
    let graph = merge::merge(
        vec![
            report_for("base.py", "base", base),
            report_for("child.py", "child", child),
        ],
        Path::new("."),
    );
    let resolution = resolve::resolve(&graph);

    // self.greet() resolves through Child's MRO into base.Base.greet.
    assert!(resolution.in_degree_of("base.Base.greet") >= 1);
    assert!(resolution.referenced_modules.contains("base"));
}

#[test]
fn test_alias_credits_import_binding_and_target() {
    let util = "def helper():\n    return 1\n";
    let main = "from util import helper\n\nhelper()\n";
    let graph = merge::merge(
        vec![
            report_for("main.py", "main", main),
            report_for("util.py", "util", util),
        ],
        Path::new("."),
    );
    let resolution = resolve::resolve(&graph);

    assert!(resolution.in_degree_of("util.helper") >= 1);
    assert!(resolution.in_degree_of("main.helper") >= 1);
}

#[test]
fn test_parameter_references_resolve() {
    let source = "def f(x, y):\n    return x\n";
    let graph = merge::merge(vec![report_for("m.py", "m", source)], Path::new("."));
    let resolution = resolve::resolve(&graph);

    assert_eq!(resolution.in_degree_of("m.f.x"), 1);
    assert_eq!(resolution.in_degree_of("m.f.y"), 0);
}

#[test]
fn test_string_dispatch_shotgun() {
    let source = r#"
class Handlers:
    def handle_login(self):
        pass

getattr(h, "handle_login")
"#;
    let graph = merge::merge(vec![report_for("m.py", "m", source)], Path::new("."));
    let resolution = resolve::resolve(&graph);

    assert!(resolution.in_degree_of("m.Handlers.handle_login") >= 1);
}

#[test]
fn test_string_glob_matches_prefix_family() {
    let source = r#"
class Router:
    def handle_login(self):
        pass

    def handle_logout(self):
        pass

    def other(self):
        pass

getattr(r, f"handle_{name}")
"#;
    let graph = merge::merge(vec![report_for("m.py", "m", source)], Path::new("."));
    let resolution = resolve::resolve(&graph);

    assert!(resolution.in_degree_of("m.Router.handle_login") >= 1);
    assert!(resolution.in_degree_of("m.Router.handle_logout") >= 1);
    assert_eq!(resolution.in_degree_of("m.Router.other"), 0);
}

#[test]
fn test_instance_attr_type_resolution() {
    let source = r#"
class Helper:
    def work(self):
        pass

class Owner:
    def __init__(self):
        self.h = Helper()

    def go(self):
        self.h.work()
"#;
    let graph = merge::merge(vec![report_for("m.py", "m", source)], Path::new("."));
    let resolution = resolve::resolve(&graph);

    assert!(resolution.in_degree_of("m.Helper.work") >= 1);
}

#[test]
fn test_duck_typed_protocol_implementers() {
    let source = r#"
from typing import Protocol

class Sink(Protocol):
    def open(self):
        ...

    def push(self):
        ...

    def close(self):
        ...

class KafkaSink:
    def open(self):
        pass

    def push(self):
        pass

    def close(self):
        pass
"#;
    let graph = merge::merge(vec![report_for("m.py", "m", source)], Path::new("."));
    assert!(graph.duck_implementers.contains("m.KafkaSink.open"));
    assert!(graph.duck_implementers.contains("m.KafkaSink.push"));
    assert!(graph.duck_implementers.contains("m.KafkaSink.close"));
}

#[test]
fn test_inheritance_cycle_truncates() {
    let source = r#"
class A(B):
    pass

class B(A):
    pass
"#;
    let graph = merge::merge(vec![report_for("m.py", "m", source)], Path::new("."));
    // The cycle guard must terminate with a bounded MRO for both.
    assert!(graph.mro.get("m.A").is_some_and(|m| m.len() <= 1));
    assert!(graph.mro.get("m.B").is_some_and(|m| m.len() <= 1));
}

#[test]
fn test_exports_reference_same_module_defs() {
    let source = r#"
__all__ = ["visible"]

def visible():
    pass
"#;
    let graph = merge::merge(vec![report_for("m.py", "m", source)], Path::new("."));
    let resolution = resolve::resolve(&graph);

    let def = graph.definitions.get("m.visible").unwrap();
    assert!(def.flags.exported_via_all);
    assert!(resolution.in_degree_of("m.visible") >= 1);
}

#[test]
fn test_abstract_override_flagged_in_merge() {
    let source = r#"
from abc import ABC, abstractmethod

class Worker(ABC):
    @abstractmethod
    def execute(self):
        ...

class LocalWorker(Worker):
    def execute(self):
        return 1
"#;
    let graph = merge::merge(vec![report_for("m.py", "m", source)], Path::new("."));

    let base = graph.definitions.get("m.Worker.execute").unwrap();
    assert!(base.flags.abstract_method);
    let over = graph.definitions.get("m.LocalWorker.execute").unwrap();
    assert!(over.flags.overrides_abstract);
}
