use crate::utils::LineIndex;
use crate::visitor::flatten_dotted;
use lazy_static::lazy_static;
use rustc_hash::FxHashSet;
use rustpython_ast::{Expr, Stmt};

lazy_static! {
    /// Modules whose import marks the file as framework-driven.
    static ref FRAMEWORK_IMPORTS: FxHashSet<&'static str> = {
        let mut s = FxHashSet::default();
        for name in [
            "flask", "fastapi", "django", "rest_framework", "pydantic", "celery",
            "starlette", "uvicorn", "click", "typer", "pytest", "huey",
        ] {
            s.insert(name);
        }
        s
    };

    /// Base classes whose subclasses get lifecycle-method recognition.
    static ref FRAMEWORK_BASES: FxHashSet<&'static str> = {
        let mut s = FxHashSet::default();
        for name in [
            "Model", "View", "ViewSet", "ModelViewSet", "APIView", "Serializer",
            "ModelSerializer", "Form", "ModelForm", "Admin", "ModelAdmin",
            "TestCase", "Resource", "Schema", "BaseModel", "Consumer", "Middleware",
        ] {
            s.insert(name);
        }
        s
    };

    /// Method names invoked by frameworks on recognized base classes.
    static ref LIFECYCLE_METHODS: FxHashSet<&'static str> = {
        let mut s = FxHashSet::default();
        for name in [
            "save", "clean", "delete", "get_queryset", "get_context_data",
            "get_object", "dispatch", "get", "post", "put", "patch", "head",
            "options", "form_valid", "form_invalid", "get_success_url",
            "validate", "to_representation", "to_internal_value", "create",
            "update", "perform_create", "perform_update", "perform_destroy",
            "list", "retrieve", "partial_update", "destroy",
            "setUp", "tearDown", "setUpClass", "tearDownClass",
        ] {
            s.insert(name);
        }
        s
    };
}

const HTTP_VERBS: &[&str] = &[
    "get", "post", "put", "delete", "patch", "head", "options", "websocket",
];

/// Decorator families recognized as implicit roots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoratorFamily {
    /// HTTP route handlers, task-queue callbacks, CLI commands, fixtures.
    /// Definitions in this family are pinned live.
    Root,
    /// Accessor decorators (`@property`, `@x.setter`); softly penalized,
    /// not pinned.
    Accessor,
}

/// Classifies a dotted decorator string, or None for unknown decorators.
pub fn classify_decorator(dotted: &str) -> Option<DecoratorFamily> {
    let lower = dotted.to_lowercase();
    let mut parts = lower.split('.');
    let root = parts.next().unwrap_or("");
    let leaf = lower.rsplit('.').next().unwrap_or(&lower);
    let has_qualifier = lower.contains('.');

    // HTTP routers: @app.route, @router.get|post|..., @blueprint.*, @bp.*, @api.*
    if leaf == "route" && has_qualifier {
        return Some(DecoratorFamily::Root);
    }
    if matches!(root, "app" | "router") && HTTP_VERBS.contains(&leaf) {
        return Some(DecoratorFamily::Root);
    }
    if matches!(root, "blueprint" | "bp" | "api") && has_qualifier {
        return Some(DecoratorFamily::Root);
    }

    // Test framework: @pytest.fixture, @pytest.mark.*, @patch, @mock.*,
    // @responses.activate
    if root == "pytest" && (leaf == "fixture" || lower.starts_with("pytest.mark")) {
        return Some(DecoratorFamily::Root);
    }
    if leaf == "fixture" || root == "mock" || leaf == "patch" || lower == "responses.activate" {
        return Some(DecoratorFamily::Root);
    }

    // Task queues: @celery.task, @shared_task, @huey.task, @*.periodic_task
    if leaf == "shared_task" || leaf == "periodic_task" {
        return Some(DecoratorFamily::Root);
    }
    if leaf == "task" && has_qualifier {
        return Some(DecoratorFamily::Root);
    }

    // CLI frameworks: @*.command, @*.group, @*.callback, @*.default,
    // @*.subcommand
    if has_qualifier && matches!(leaf, "command" | "group" | "callback" | "default" | "subcommand")
    {
        return Some(DecoratorFamily::Root);
    }

    // Django view wrappers: the wrapped function is registered in
    // urls.py, which this analyzer never sees.
    if matches!(
        leaf,
        "login_required" | "permission_required" | "require_http_methods" | "csrf_exempt"
    ) {
        return Some(DecoratorFamily::Root);
    }

    // Accessors: looked up dynamically through the descriptor protocol.
    if matches!(leaf, "property" | "cached_property" | "setter" | "deleter" | "getter") {
        return Some(DecoratorFamily::Accessor);
    }

    None
}

/// Pre-pass over a file's AST that recognizes framework anchor points:
/// route/fixture/task decorators and lifecycle methods inside classes
/// inheriting from a known framework base. Definitions on the recorded
/// lines become implicit roots in the penalty engine.
pub struct FrameworkVisitor<'a> {
    /// Lines whose definitions are pinned live (routes, tasks, fixtures,
    /// lifecycle methods of framework subclasses).
    pub route_lines: FxHashSet<usize>,
    /// Frameworks observed through imports.
    pub detected_frameworks: FxHashSet<String>,
    pub is_framework_file: bool,
    line_index: &'a LineIndex,
    enabled: bool,
}

impl<'a> FrameworkVisitor<'a> {
    pub fn new(line_index: &'a LineIndex, enabled: bool) -> Self {
        Self {
            route_lines: FxHashSet::default(),
            detected_frameworks: FxHashSet::default(),
            is_framework_file: false,
            line_index,
            enabled,
        }
    }

    pub fn visit_body(&mut self, body: &[Stmt]) {
        if !self.enabled {
            return;
        }
        for stmt in body {
            self.visit_stmt(stmt, false);
        }
    }

    fn visit_stmt(&mut self, stmt: &Stmt, in_framework_class: bool) {
        match stmt {
            Stmt::Import(node) => {
                for alias in &node.names {
                    let root = alias.name.split('.').next().unwrap_or("");
                    if FRAMEWORK_IMPORTS.contains(root) {
                        self.is_framework_file = true;
                        self.detected_frameworks.insert(root.to_string());
                    }
                }
            }
            Stmt::ImportFrom(node) => {
                if let Some(module) = &node.module {
                    let root = module.split('.').next().unwrap_or("");
                    if FRAMEWORK_IMPORTS.contains(root) {
                        self.is_framework_file = true;
                        self.detected_frameworks.insert(root.to_string());
                    }
                }
            }
            Stmt::FunctionDef(node) => {
                let line = self.line_index.line_index(node.range.start());
                self.check_decorators(&node.decorator_list, line);
                if in_framework_class && LIFECYCLE_METHODS.contains(node.name.as_str()) {
                    self.route_lines.insert(line);
                }
                for stmt in &node.body {
                    self.visit_stmt(stmt, false);
                }
            }
            Stmt::AsyncFunctionDef(node) => {
                let line = self.line_index.line_index(node.range.start());
                self.check_decorators(&node.decorator_list, line);
                if in_framework_class && LIFECYCLE_METHODS.contains(node.name.as_str()) {
                    self.route_lines.insert(line);
                }
                for stmt in &node.body {
                    self.visit_stmt(stmt, false);
                }
            }
            Stmt::ClassDef(node) => {
                let line = self.line_index.line_index(node.range.start());
                self.check_decorators(&node.decorator_list, line);
                let framework_base = node.bases.iter().any(|base| {
                    flatten_dotted(base).is_some_and(|dotted| {
                        let leaf = dotted.rsplit('.').next().unwrap_or(&dotted).to_string();
                        FRAMEWORK_BASES.contains(leaf.as_str())
                    })
                });
                if framework_base {
                    self.is_framework_file = true;
                }
                for stmt in &node.body {
                    self.visit_stmt(stmt, framework_base);
                }
            }
            _ => {}
        }
    }

    fn check_decorators(&mut self, decorators: &[Expr], line: usize) {
        for decorator in decorators {
            let Some(dotted) = flatten_dotted(decorator) else {
                continue;
            };
            if classify_decorator(&dotted) == Some(DecoratorFamily::Root) {
                self.route_lines.insert(line);
                self.is_framework_file = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_decorators_classify_as_roots() {
        for dotted in [
            "app.route",
            "router.get",
            "router.delete",
            "bp.errorhandler",
            "api.resource",
            "pytest.fixture",
            "pytest.mark.parametrize",
            "celery.task",
            "shared_task",
            "cli.command",
            "app.callback",
        ] {
            assert_eq!(
                classify_decorator(dotted),
                Some(DecoratorFamily::Root),
                "{dotted} should be a root decorator"
            );
        }
    }

    #[test]
    fn accessor_decorators_are_not_roots() {
        assert_eq!(
            classify_decorator("property"),
            Some(DecoratorFamily::Accessor)
        );
        assert_eq!(
            classify_decorator("value.setter"),
            Some(DecoratorFamily::Accessor)
        );
    }

    #[test]
    fn unknown_decorators_confer_nothing() {
        assert_eq!(classify_decorator("functools.wraps"), None);
        assert_eq!(classify_decorator("my_decorator"), None);
        assert_eq!(classify_decorator("staticmethod"), None);
    }
}
