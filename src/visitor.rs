use crate::implicit::ImplicitRefTracker;
use crate::utils::LineIndex;
use rustc_hash::{FxHashMap, FxHashSet};
use rustpython_ast::{self as ast, Expr, Stmt};
use std::path::PathBuf;

/// Kind of a collected definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DefKind {
    Function,
    Method,
    Class,
    Import,
    Variable,
    Parameter,
    Constant,
    DataclassField,
    EnumMember,
}

impl DefKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DefKind::Function => "function",
            DefKind::Method => "method",
            DefKind::Class => "class",
            DefKind::Import => "import",
            DefKind::Variable => "variable",
            DefKind::Parameter => "parameter",
            DefKind::Constant => "constant",
            DefKind::DataclassField => "dataclass-field",
            DefKind::EnumMember => "enum-member",
        }
    }
}

/// Context flags attached to a definition during collection and merging.
#[derive(Debug, Clone, Default)]
pub struct DefFlags {
    pub dataclass_field: bool,
    pub protocol_member: bool,
    pub abstract_method: bool,
    pub overrides_abstract: bool,
    pub optional_import: bool,
    pub exported_via_all: bool,
    pub framework_route: bool,
    pub is_constant_all_caps: bool,
    pub inside_if_typechecking: bool,
    pub duplicate: bool,
}

/// A named, locatable entity the analyzer could report as dead.
#[derive(Debug, Clone)]
pub struct Definition {
    pub kind: DefKind,
    /// The leaf identifier.
    pub simple_name: String,
    /// Fully qualified name, unique across the project.
    pub fqn: String,
    pub file: PathBuf,
    pub line: usize,
    pub end_line: usize,
    /// Dotted module path of the defining file.
    pub module: String,
    /// Fqn of the enclosing class, when syntactically nested in one.
    pub enclosing_class: Option<String>,
    /// Decorator expressions as dotted strings, outermost first.
    pub decorators: Vec<String>,
    /// Base classes as dotted strings, classes only.
    pub base_classes: Vec<String>,
    pub is_private: bool,
    pub is_dunder: bool,
    pub is_test_file: bool,
    pub in_init: bool,
    pub flags: DefFlags,
    /// Assigned by the penalty engine; meaningless before scoring.
    pub confidence: u8,
}

/// Kind of a collected reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefKind {
    Name,
    AttributeChain,
    ImportTarget,
    BaseClass,
    Decorator,
    StringDispatch,
    StringGlob,
}

/// A potential use of a name, resolved against the project graph later.
#[derive(Debug, Clone)]
pub struct Reference {
    pub kind: RefKind,
    /// The leaf symbol looked up. For `ImportTarget` this is the full
    /// dotted target path.
    pub name: String,
    /// Dotted prefix for attribute chains (`self`, `self.h`, `mod.Cls`).
    pub qualifier: Option<String>,
    pub file: PathBuf,
    pub line: usize,
    pub module: String,
    pub enclosing_class: Option<String>,
    pub enclosing_function: Option<String>,
}

/// `import a.b as c` / `from p import q as r`: local binding -> dotted target.
#[derive(Debug, Clone)]
pub struct ImportAlias {
    pub local: String,
    pub target: String,
    pub line: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScopeKind {
    Class,
    Function,
}

struct ClassCtx {
    fqn: String,
    is_dataclass: bool,
    is_enum: bool,
    is_protocol: bool,
}

struct FunctionCtx {
    fqn: String,
    self_alias: Option<String>,
    params: FxHashSet<String>,
    locals: FxHashSet<String>,
    globals_decl: FxHashSet<String>,
}

/// Walks a single AST and emits definitions and references with full
/// scope and class context. One instance per file; the outputs are folded
/// into a `FileReport` by the analyzer.
pub struct DefRefVisitor<'a> {
    pub definitions: Vec<Definition>,
    pub references: Vec<Reference>,
    pub aliases: Vec<ImportAlias>,
    /// Simple names listed in `__all__`.
    pub exports: Vec<String>,
    /// class fqn -> attribute -> raw dotted type name, from
    /// `self.x = Cls(...)` assignments in any method.
    pub instance_attr_types: FxHashMap<String, FxHashMap<String, String>>,
    /// String-dispatch sidecar; drained by the analyzer.
    pub implicit: ImplicitRefTracker,
    /// The module contains `globals()`/`locals()`/`eval` style dispatch.
    pub uses_dynamic_dispatch: bool,

    module: String,
    file: PathBuf,
    is_test_file: bool,
    in_init_file: bool,
    chain: Vec<(ScopeKind, String)>,
    class_stack: Vec<ClassCtx>,
    function_stack: Vec<FunctionCtx>,
    typechecking_depth: usize,
    try_import_depth: usize,
    /// Local names bound by `try: import X` blocks, for HAS_X flag reads.
    optional_imports: FxHashSet<String>,
    line_index: &'a LineIndex,
}

impl<'a> DefRefVisitor<'a> {
    pub fn new(file: PathBuf, module: String, line_index: &'a LineIndex) -> Self {
        let is_test_file = crate::utils::is_test_path(&file.to_string_lossy());
        let in_init_file = file.ends_with("__init__.py");
        let implicit = ImplicitRefTracker::new(file.clone(), module.clone());
        Self {
            definitions: Vec::new(),
            references: Vec::new(),
            aliases: Vec::new(),
            exports: Vec::new(),
            instance_attr_types: FxHashMap::default(),
            implicit,
            uses_dynamic_dispatch: false,
            module,
            file,
            is_test_file,
            in_init_file,
            chain: Vec::new(),
            class_stack: Vec::new(),
            function_stack: Vec::new(),
            typechecking_depth: 0,
            try_import_depth: 0,
            optional_imports: FxHashSet::default(),
            line_index,
        }
    }

    pub fn visit_body(&mut self, body: &[Stmt]) {
        for stmt in body {
            self.visit_stmt(stmt);
        }
    }

    /// Builds `module.<chain>.<name>`.
    fn qualified(&self, name: &str) -> String {
        let mut parts = Vec::with_capacity(self.chain.len() + 2);
        if !self.module.is_empty() {
            parts.push(self.module.as_str());
        }
        for (_, segment) in &self.chain {
            parts.push(segment.as_str());
        }
        parts.push(name);
        parts.join(".")
    }

    fn enclosing_class_fqn(&self) -> Option<String> {
        self.class_stack.last().map(|c| c.fqn.clone())
    }

    fn enclosing_function_fqn(&self) -> Option<String> {
        self.function_stack.last().map(|f| f.fqn.clone())
    }

    fn directly_in_class(&self) -> bool {
        matches!(self.chain.last(), Some((ScopeKind::Class, _)))
    }

    fn at_module_scope(&self) -> bool {
        self.chain.is_empty()
    }

    fn push_def(&mut self, kind: DefKind, name: &str, line: usize, end_line: usize) -> usize {
        self.push_def_full(kind, name, line, end_line, Vec::new(), Vec::new())
    }

    fn push_def_full(
        &mut self,
        kind: DefKind,
        name: &str,
        line: usize,
        end_line: usize,
        decorators: Vec<String>,
        base_classes: Vec<String>,
    ) -> usize {
        let fqn = self.qualified(name);
        let is_dunder = name.starts_with("__") && name.ends_with("__");
        let is_private = name.starts_with('_') && !is_dunder;
        let mut flags = DefFlags::default();
        flags.inside_if_typechecking = self.typechecking_depth > 0;
        // Imports guarded by try/ImportError and their fallback bindings.
        flags.optional_import = self.try_import_depth > 0;
        self.definitions.push(Definition {
            kind,
            simple_name: name.to_string(),
            fqn,
            file: self.file.clone(),
            line,
            end_line,
            module: self.module.clone(),
            enclosing_class: self.enclosing_class_fqn(),
            decorators,
            base_classes,
            is_private,
            is_dunder,
            is_test_file: self.is_test_file,
            in_init: self.in_init_file,
            flags,
            confidence: 100,
        });
        self.definitions.len() - 1
    }

    fn push_ref(&mut self, kind: RefKind, name: String, qualifier: Option<String>, line: usize) {
        self.references.push(Reference {
            kind,
            name,
            qualifier,
            file: self.file.clone(),
            line,
            module: self.module.clone(),
            enclosing_class: self.enclosing_class_fqn(),
            enclosing_function: self.enclosing_function_fqn(),
        });
    }

    /// Resolves how a bare name binds in the current scope chain.
    ///
    /// Returns false when the name is a plain local of an enclosing
    /// function: locals are not candidates and shadow module globals, so
    /// no reference is emitted for them.
    fn name_escapes_locals(&self, name: &str) -> bool {
        for func in self.function_stack.iter().rev() {
            if func.globals_decl.contains(name) {
                return true;
            }
            if func.params.contains(name) {
                // Parameter use; the resolver credits the parameter
                // definition through the enclosing-function walk.
                return true;
            }
            if func.locals.contains(name) {
                return false;
            }
        }
        true
    }

    // ---- statements ----

    pub fn visit_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::FunctionDef(node) => {
                self.visit_function_def(
                    node.name.as_str(),
                    &node.args,
                    &node.body,
                    &node.decorator_list,
                    node.returns.as_deref(),
                    node.range.start(),
                    node.range.end(),
                );
            }
            Stmt::AsyncFunctionDef(node) => {
                self.visit_function_def(
                    node.name.as_str(),
                    &node.args,
                    &node.body,
                    &node.decorator_list,
                    node.returns.as_deref(),
                    node.range.start(),
                    node.range.end(),
                );
            }
            Stmt::ClassDef(node) => self.visit_class_def(node),
            Stmt::Import(node) => {
                let line = self.line_index.line_index(node.range.start());
                for alias in &node.names {
                    let target = alias.name.to_string();
                    let local = match &alias.asname {
                        Some(asname) => asname.to_string(),
                        // `import a.b` binds the root package `a`.
                        None => target.split('.').next().unwrap_or(&target).to_string(),
                    };
                    let alias_target = match &alias.asname {
                        Some(_) => target.clone(),
                        None => local.clone(),
                    };
                    self.push_def(DefKind::Import, &local, line, line);
                    if self.try_import_depth > 0 {
                        self.optional_imports.insert(local.clone());
                    }
                    self.aliases.push(ImportAlias {
                        local,
                        target: alias_target,
                        line,
                    });
                    self.push_ref(RefKind::ImportTarget, target, None, line);
                }
            }
            Stmt::ImportFrom(node) => {
                // `from __future__ import ...` is a compiler directive.
                if let Some(module) = &node.module {
                    if module.as_str() == "__future__" {
                        return;
                    }
                }
                let line = self.line_index.line_index(node.range.start());
                let level = node.level.as_ref().map(|l| l.to_u32() as usize).unwrap_or(0);
                let base = node.module.as_ref().map(|m| m.to_string());
                for alias in &node.names {
                    if alias.name.as_str() == "*" {
                        // Star imports are intentionally left untouched.
                        continue;
                    }
                    let local = alias
                        .asname
                        .as_ref()
                        .map(|a| a.to_string())
                        .unwrap_or_else(|| alias.name.to_string());
                    let target = self.import_target(level, base.as_deref(), alias.name.as_str());
                    self.push_def(DefKind::Import, &local, line, line);
                    if self.try_import_depth > 0 {
                        self.optional_imports.insert(local.clone());
                    }
                    self.aliases.push(ImportAlias {
                        local,
                        target: target.clone(),
                        line,
                    });
                    self.push_ref(RefKind::ImportTarget, target, None, line);
                }
            }
            Stmt::Assign(node) => {
                let line = self.line_index.line_index(node.range.start());
                self.record_export_list(node);
                for target in &node.targets {
                    self.visit_assign_target(target, &node.value, line);
                }
                self.visit_expr(&node.value);
            }
            Stmt::AnnAssign(node) => {
                let line = self.line_index.line_index(node.range.start());
                if let Some(value) = &node.value {
                    self.visit_assign_target(&node.target, value, line);
                    self.visit_expr(value);
                } else if self.directly_in_class() || self.at_module_scope() {
                    // Bare annotation still declares a field on dataclass
                    // and protocol bodies.
                    if let Expr::Name(name) = node.target.as_ref() {
                        self.emit_variable_def(name.id.as_str(), line);
                    }
                }
                self.visit_expr(&node.annotation);
            }
            Stmt::AugAssign(node) => {
                // x += 1 both reads and writes the target.
                self.visit_expr(&node.target);
                self.visit_expr(&node.value);
            }
            Stmt::Global(node) => {
                if let Some(func) = self.function_stack.last_mut() {
                    for name in &node.names {
                        func.globals_decl.insert(name.to_string());
                    }
                }
            }
            Stmt::Expr(node) => self.visit_expr(&node.value),
            Stmt::Return(node) => {
                if let Some(value) = &node.value {
                    self.visit_expr(value);
                }
            }
            Stmt::Delete(node) => {
                for target in &node.targets {
                    self.visit_expr(target);
                }
            }
            Stmt::Raise(node) => {
                if let Some(exc) = &node.exc {
                    self.visit_expr(exc);
                }
                if let Some(cause) = &node.cause {
                    self.visit_expr(cause);
                }
            }
            Stmt::Assert(node) => {
                self.visit_expr(&node.test);
                if let Some(msg) = &node.msg {
                    self.visit_expr(msg);
                }
            }
            Stmt::If(node) => {
                let is_typechecking = is_typechecking_test(&node.test);
                self.visit_expr(&node.test);
                if is_typechecking {
                    self.typechecking_depth += 1;
                }
                self.visit_body(&node.body);
                if is_typechecking {
                    self.typechecking_depth -= 1;
                }
                self.visit_body(&node.orelse);
            }
            Stmt::For(node) => {
                self.visit_expr(&node.iter);
                self.visit_body(&node.body);
                self.visit_body(&node.orelse);
            }
            Stmt::AsyncFor(node) => {
                self.visit_expr(&node.iter);
                self.visit_body(&node.body);
                self.visit_body(&node.orelse);
            }
            Stmt::While(node) => {
                self.visit_expr(&node.test);
                self.visit_body(&node.body);
                self.visit_body(&node.orelse);
            }
            Stmt::With(node) => {
                for item in &node.items {
                    self.visit_expr(&item.context_expr);
                }
                self.visit_body(&node.body);
            }
            Stmt::AsyncWith(node) => {
                for item in &node.items {
                    self.visit_expr(&item.context_expr);
                }
                self.visit_body(&node.body);
            }
            Stmt::Try(node) => {
                // Fallback bindings in the handler are part of the same
                // optional-import pattern, so the guard spans them too.
                let guards_import = handlers_catch_import_error(&node.handlers);
                if guards_import {
                    self.try_import_depth += 1;
                }
                self.visit_body(&node.body);
                for handler in &node.handlers {
                    let ast::ExceptHandler::ExceptHandler(h) = handler;
                    if let Some(exc) = &h.type_ {
                        self.visit_expr(exc);
                    }
                    self.visit_body(&h.body);
                }
                if guards_import {
                    self.try_import_depth -= 1;
                }
                self.visit_body(&node.orelse);
                self.visit_body(&node.finalbody);
            }
            Stmt::TryStar(node) => {
                let guards_import = handlers_catch_import_error(&node.handlers);
                if guards_import {
                    self.try_import_depth += 1;
                }
                self.visit_body(&node.body);
                for handler in &node.handlers {
                    let ast::ExceptHandler::ExceptHandler(h) = handler;
                    if let Some(exc) = &h.type_ {
                        self.visit_expr(exc);
                    }
                    self.visit_body(&h.body);
                }
                if guards_import {
                    self.try_import_depth -= 1;
                }
                self.visit_body(&node.orelse);
                self.visit_body(&node.finalbody);
            }
            Stmt::Match(node) => {
                self.visit_expr(&node.subject);
                for case in &node.cases {
                    if let Some(guard) = &case.guard {
                        self.visit_expr(guard);
                    }
                    self.visit_body(&case.body);
                }
            }
            _ => {}
        }
    }

    /// Absolute dotted target of a `from ... import name`.
    ///
    /// Relative levels resolve against this module's package: one dot is
    /// the current package, each extra dot climbs once more. A package
    /// `__init__` is its own package, so it climbs one level less.
    fn import_target(&self, level: usize, base: Option<&str>, name: &str) -> String {
        if level == 0 {
            return match base {
                Some(base) => format!("{base}.{name}"),
                None => name.to_string(),
            };
        }
        let mut parts: Vec<&str> = self.module.split('.').filter(|p| !p.is_empty()).collect();
        let climbs = if self.in_init_file { level - 1 } else { level };
        for _ in 0..climbs {
            parts.pop();
        }
        if let Some(base) = base {
            parts.extend(base.split('.'));
        }
        parts.push(name);
        parts.join(".")
    }

    /// Captures `__all__ = [...]` list or tuple literals.
    fn record_export_list(&mut self, node: &ast::StmtAssign) {
        if !self.at_module_scope() {
            return;
        }
        let Some(Expr::Name(target)) = node.targets.first() else {
            return;
        };
        if target.id.as_str() != "__all__" {
            return;
        }
        let elts = match node.value.as_ref() {
            Expr::List(list) => &list.elts,
            Expr::Tuple(tuple) => &tuple.elts,
            _ => return,
        };
        for elt in elts {
            if let Expr::Constant(constant) = elt {
                if let ast::Constant::Str(s) = &constant.value {
                    self.exports.push(s.to_string());
                }
            }
        }
    }

    fn emit_variable_def(&mut self, name: &str, line: usize) {
        if name == "__all__" || name.starts_with("__") && name.ends_with("__") {
            return;
        }
        let class_ctx = if self.directly_in_class() {
            self.class_stack.last()
        } else {
            None
        };
        let kind = if let Some(class_ctx) = class_ctx {
            if class_ctx.is_enum {
                DefKind::EnumMember
            } else if class_ctx.is_dataclass {
                DefKind::DataclassField
            } else {
                DefKind::Variable
            }
        } else if is_all_caps(name) {
            DefKind::Constant
        } else {
            DefKind::Variable
        };
        let protocol_member = class_ctx.is_some_and(|c| c.is_protocol);
        let idx = self.push_def(kind, name, line, line);
        let def = &mut self.definitions[idx];
        def.flags.dataclass_field = kind == DefKind::DataclassField;
        def.flags.protocol_member = protocol_member;
        def.flags.is_constant_all_caps = kind == DefKind::Constant;
    }

    /// Handles one assignment target: module/class variables become
    /// definitions, function locals are tracked but never emitted, and
    /// `self.x = Cls(...)` feeds instance-attribute type inference.
    fn visit_assign_target(&mut self, target: &Expr, value: &Expr, line: usize) {
        match target {
            Expr::Name(name_node) => {
                let name = name_node.id.to_string();
                if self.function_stack.is_empty() {
                    self.emit_variable_def(&name, line);
                    // HAS_X / HAVE_X flags count as reads of the optional
                    // import they guard.
                    if let Some(guarded) = optional_flag_target(&name, &self.optional_imports) {
                        self.push_ref(RefKind::Name, guarded, None, line);
                    }
                } else {
                    let is_global = self
                        .function_stack
                        .last()
                        .is_some_and(|f| f.globals_decl.contains(&name));
                    if is_global {
                        // Assignment through `global` rebinds the module
                        // variable; emitted with a module-level fqn.
                        let fqn_name = name.clone();
                        let saved = std::mem::take(&mut self.chain);
                        self.emit_variable_def(&fqn_name, line);
                        self.chain = saved;
                    } else if let Some(func) = self.function_stack.last_mut() {
                        func.locals.insert(name);
                    }
                }
            }
            Expr::Tuple(tuple) => {
                for elt in &tuple.elts {
                    self.visit_assign_target(elt, value, line);
                }
            }
            Expr::List(list) => {
                for elt in &list.elts {
                    self.visit_assign_target(elt, value, line);
                }
            }
            Expr::Starred(starred) => {
                self.visit_assign_target(&starred.value, value, line);
            }
            Expr::Attribute(attr) => {
                // self.x = Cls(...) inside a method records x -> Cls for
                // the enclosing class.
                if let (Expr::Name(root), Some(class_fqn)) =
                    (attr.value.as_ref(), self.enclosing_class_fqn())
                {
                    let is_self = self
                        .function_stack
                        .last()
                        .and_then(|f| f.self_alias.as_deref())
                        .is_some_and(|alias| alias == root.id.as_str());
                    if is_self {
                        if let Some(type_name) = constructed_type_name(value) {
                            self.instance_attr_types
                                .entry(class_fqn)
                                .or_default()
                                .insert(attr.attr.to_string(), type_name);
                        }
                        return;
                    }
                }
                self.visit_expr(&attr.value);
            }
            Expr::Subscript(sub) => {
                self.visit_expr(&sub.value);
                self.visit_expr(&sub.slice);
            }
            _ => {}
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn visit_function_def(
        &mut self,
        name: &str,
        args: &ast::Arguments,
        body: &[Stmt],
        decorator_list: &[Expr],
        returns: Option<&Expr>,
        start: rustpython_ast::TextSize,
        end: rustpython_ast::TextSize,
    ) {
        let line = self.line_index.line_index(start);
        let end_line = self.line_index.line_index(end);
        let is_method = self.directly_in_class();

        let decorators: Vec<String> = decorator_list.iter().filter_map(flatten_dotted).collect();
        for decorator in decorator_list {
            if let Some(dotted) = flatten_dotted(decorator) {
                let (qualifier, leaf) = split_dotted(&dotted);
                self.push_ref(RefKind::Decorator, leaf, qualifier, line);
            }
            self.visit_expr(decorator);
        }

        let is_static = decorators.iter().any(|d| d.ends_with("staticmethod"));
        let is_abstract = decorators.iter().any(|d| d.ends_with("abstractmethod"));

        let kind = if is_method {
            DefKind::Method
        } else {
            DefKind::Function
        };
        let idx = self.push_def_full(kind, name, line, end_line, decorators, Vec::new());
        let protocol_member =
            is_method && self.class_stack.last().is_some_and(|c| c.is_protocol);
        {
            let def = &mut self.definitions[idx];
            def.flags.abstract_method = is_abstract;
            def.flags.protocol_member = protocol_member;
        }

        // Annotations and defaults are evaluated at definition time.
        for arg in args
            .posonlyargs
            .iter()
            .chain(args.args.iter())
            .chain(args.kwonlyargs.iter())
        {
            if let Some(annotation) = &arg.def.annotation {
                self.visit_expr(annotation);
            }
            if let Some(default) = &arg.default {
                self.visit_expr(default);
            }
        }
        for vararg in args.vararg.iter().chain(args.kwarg.iter()) {
            if let Some(annotation) = &vararg.annotation {
                self.visit_expr(annotation);
            }
        }
        if let Some(returns) = returns {
            self.visit_expr(returns);
        }

        // Collect parameter names; the first positional of an instance or
        // class method is the self alias and never a candidate.
        let mut param_names: Vec<String> = Vec::new();
        for arg in args.posonlyargs.iter().chain(args.args.iter()) {
            param_names.push(arg.def.arg.to_string());
        }
        let self_alias = if is_method && !is_static {
            param_names.first().cloned()
        } else {
            None
        };
        let candidate_start = usize::from(self_alias.is_some());
        let mut kwonly: Vec<String> = args
            .kwonlyargs
            .iter()
            .map(|a| a.def.arg.to_string())
            .collect();
        let mut all_params: Vec<String> = param_names.clone();
        all_params.append(&mut kwonly);
        if let Some(vararg) = &args.vararg {
            all_params.push(vararg.arg.to_string());
        }
        if let Some(kwarg) = &args.kwarg {
            all_params.push(kwarg.arg.to_string());
        }

        let func_fqn = self.qualified(name);
        self.chain.push((ScopeKind::Function, name.to_string()));
        for param in all_params.iter().skip(candidate_start) {
            let param_line = line;
            let idx = self.push_def(DefKind::Parameter, param, param_line, param_line);
            self.definitions[idx].enclosing_class = if is_method {
                self.class_stack.last().map(|c| c.fqn.clone())
            } else {
                None
            };
        }

        let locals = collect_assigned_names(body);
        self.function_stack.push(FunctionCtx {
            fqn: func_fqn,
            self_alias,
            params: all_params.into_iter().collect(),
            locals,
            globals_decl: FxHashSet::default(),
        });

        self.visit_body(body);

        self.function_stack.pop();
        self.chain.pop();
    }

    fn visit_class_def(&mut self, node: &ast::StmtClassDef) {
        let name = node.name.to_string();
        let line = self.line_index.line_index(node.range.start());
        let end_line = self.line_index.line_index(node.range.end());

        let decorators: Vec<String> = node.decorator_list.iter().filter_map(flatten_dotted).collect();
        for decorator in &node.decorator_list {
            if let Some(dotted) = flatten_dotted(decorator) {
                let (qualifier, leaf) = split_dotted(&dotted);
                self.push_ref(RefKind::Decorator, leaf, qualifier, line);
            }
            self.visit_expr(decorator);
        }

        let base_classes: Vec<String> = node.bases.iter().filter_map(flatten_dotted).collect();
        for base in &node.bases {
            if let Some(dotted) = flatten_dotted(base) {
                let (qualifier, leaf) = split_dotted(&dotted);
                self.push_ref(RefKind::BaseClass, leaf, qualifier, line);
            }
            self.visit_expr(base);
        }
        for keyword in &node.keywords {
            self.visit_expr(&keyword.value);
        }

        let last_base = |suffixes: &[&str]| {
            base_classes.iter().any(|b| {
                let leaf = b.rsplit('.').next().unwrap_or(b);
                suffixes.contains(&leaf)
            })
        };
        let is_dataclass = decorators.iter().any(|d| {
            let leaf = d.rsplit('.').next().unwrap_or(d);
            matches!(leaf, "dataclass" | "define" | "s" | "attrs")
        }) || last_base(&["NamedTuple", "BaseModel", "TypedDict"]);
        let is_enum = last_base(&["Enum", "IntEnum", "StrEnum", "Flag", "IntFlag"]);
        let is_protocol = last_base(&["Protocol"])
            || decorators.iter().any(|d| d.ends_with("runtime_checkable"));

        self.push_def_full(
            DefKind::Class,
            &name,
            line,
            end_line,
            decorators,
            base_classes,
        );

        self.chain.push((ScopeKind::Class, name.clone()));
        self.class_stack.push(ClassCtx {
            fqn: self.qualified("").trim_end_matches('.').to_string(),
            is_dataclass,
            is_enum,
            is_protocol,
        });

        self.visit_body(&node.body);

        self.class_stack.pop();
        self.chain.pop();
    }

    // ---- expressions ----

    pub fn visit_expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Name(node) => {
                if node.ctx.is_load() {
                    let name = node.id.to_string();
                    if self.name_escapes_locals(&name) {
                        let line = self.line_index.line_index(node.range.start());
                        self.push_ref(RefKind::Name, name, None, line);
                    }
                }
            }
            Expr::Attribute(node) => {
                self.visit_attribute(node);
            }
            Expr::Call(node) => {
                let line = self.line_index.line_index(node.range.start());
                if self.implicit.inspect_call(node, line) {
                    self.uses_dynamic_dispatch = true;
                }
                self.visit_expr(&node.func);
                for arg in &node.args {
                    self.visit_expr(arg);
                }
                for keyword in &node.keywords {
                    self.visit_expr(&keyword.value);
                }
            }
            Expr::Subscript(node) => {
                let line = self.line_index.line_index(node.range.start());
                if self.implicit.inspect_subscript(node, line) {
                    self.uses_dynamic_dispatch = true;
                }
                self.visit_expr(&node.value);
                self.visit_expr(&node.slice);
            }
            Expr::BoolOp(node) => {
                for value in &node.values {
                    self.visit_expr(value);
                }
            }
            Expr::BinOp(node) => {
                self.visit_expr(&node.left);
                self.visit_expr(&node.right);
            }
            Expr::UnaryOp(node) => self.visit_expr(&node.operand),
            Expr::Lambda(node) => self.visit_expr(&node.body),
            Expr::IfExp(node) => {
                self.visit_expr(&node.test);
                self.visit_expr(&node.body);
                self.visit_expr(&node.orelse);
            }
            Expr::Dict(node) => {
                for (key, value) in node.keys.iter().zip(&node.values) {
                    if let Some(k) = key {
                        self.visit_expr(k);
                    }
                    self.visit_expr(value);
                }
            }
            Expr::Set(node) => {
                for elt in &node.elts {
                    self.visit_expr(elt);
                }
            }
            Expr::ListComp(node) => {
                self.visit_expr(&node.elt);
                self.visit_comprehensions(&node.generators);
            }
            Expr::SetComp(node) => {
                self.visit_expr(&node.elt);
                self.visit_comprehensions(&node.generators);
            }
            Expr::DictComp(node) => {
                self.visit_expr(&node.key);
                self.visit_expr(&node.value);
                self.visit_comprehensions(&node.generators);
            }
            Expr::GeneratorExp(node) => {
                self.visit_expr(&node.elt);
                self.visit_comprehensions(&node.generators);
            }
            Expr::Await(node) => self.visit_expr(&node.value),
            Expr::Yield(node) => {
                if let Some(value) = &node.value {
                    self.visit_expr(value);
                }
            }
            Expr::YieldFrom(node) => self.visit_expr(&node.value),
            Expr::Compare(node) => {
                self.visit_expr(&node.left);
                for comparator in &node.comparators {
                    self.visit_expr(comparator);
                }
            }
            Expr::FormattedValue(node) => self.visit_expr(&node.value),
            Expr::JoinedStr(node) => {
                for value in &node.values {
                    self.visit_expr(value);
                }
            }
            Expr::List(node) => {
                for elt in &node.elts {
                    self.visit_expr(elt);
                }
            }
            Expr::Tuple(node) => {
                for elt in &node.elts {
                    self.visit_expr(elt);
                }
            }
            Expr::Starred(node) => self.visit_expr(&node.value),
            Expr::NamedExpr(node) => {
                self.visit_expr(&node.value);
            }
            Expr::Slice(node) => {
                if let Some(lower) = &node.lower {
                    self.visit_expr(lower);
                }
                if let Some(upper) = &node.upper {
                    self.visit_expr(upper);
                }
                if let Some(step) = &node.step {
                    self.visit_expr(step);
                }
            }
            _ => {}
        }
    }

    fn visit_comprehensions(&mut self, generators: &[ast::Comprehension]) {
        for gen in generators {
            self.visit_expr(&gen.iter);
            for if_expr in &gen.ifs {
                self.visit_expr(if_expr);
            }
        }
    }

    /// Emits references for an attribute chain.
    ///
    /// `a.b.c` produces a root reference to `a` plus one chain reference
    /// per attribute segment; `self.h.do` produces `(h, self)` and
    /// `(do, self.h)`; `super().m` produces `(m, super)`; `Cls(...).m`
    /// produces `(m, Cls)`.
    fn visit_attribute(&mut self, node: &ast::ExprAttribute) {
        let line = self.line_index.line_index(node.range.start());

        // super().m
        if let Expr::Call(call) = node.value.as_ref() {
            if let Expr::Name(func) = call.func.as_ref() {
                if func.id.as_str() == "super" {
                    self.push_ref(
                        RefKind::AttributeChain,
                        node.attr.to_string(),
                        Some("super".to_string()),
                        line,
                    );
                    return;
                }
                // Cls(...).m credits the method when Cls resolves to an
                // in-project class.
                self.push_ref(
                    RefKind::AttributeChain,
                    node.attr.to_string(),
                    Some(func.id.to_string()),
                    line,
                );
                self.visit_expr(&node.value);
                return;
            }
        }

        let Some(segments) = flatten_chain(node) else {
            // Complex root (subscript, call chain): fall back to visiting
            // the inner expression for its own references.
            self.visit_expr(&node.value);
            return;
        };

        let root = &segments[0];
        let self_alias = self
            .function_stack
            .last()
            .and_then(|f| f.self_alias.as_deref());
        let is_self_root =
            self_alias.is_some_and(|alias| alias == root) || root == "cls" || root == "self";

        if is_self_root {
            let mut qualifier = "self".to_string();
            for segment in &segments[1..] {
                self.push_ref(
                    RefKind::AttributeChain,
                    segment.clone(),
                    Some(qualifier.clone()),
                    line,
                );
                qualifier.push('.');
                qualifier.push_str(segment);
            }
            return;
        }

        if self.name_escapes_locals(root) {
            self.push_ref(RefKind::Name, root.clone(), None, line);
        }
        let mut qualifier = root.clone();
        for segment in &segments[1..] {
            self.push_ref(
                RefKind::AttributeChain,
                segment.clone(),
                Some(qualifier.clone()),
                line,
            );
            qualifier.push('.');
            qualifier.push_str(segment);
        }
    }
}

/// Flattens a Name-rooted attribute chain into its segments.
fn flatten_chain(node: &ast::ExprAttribute) -> Option<Vec<String>> {
    let mut reversed = vec![node.attr.to_string()];
    let mut current = node.value.as_ref();
    loop {
        match current {
            Expr::Attribute(inner) => {
                reversed.push(inner.attr.to_string());
                current = inner.value.as_ref();
            }
            Expr::Name(name) => {
                reversed.push(name.id.to_string());
                reversed.reverse();
                return Some(reversed);
            }
            _ => return None,
        }
    }
}

/// Flattens `Name`, `Attribute` and `Call` expressions to a dotted string.
pub fn flatten_dotted(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Name(node) => Some(node.id.to_string()),
        Expr::Attribute(node) => {
            let base = flatten_dotted(&node.value)?;
            Some(format!("{}.{}", base, node.attr))
        }
        Expr::Call(node) => flatten_dotted(&node.func),
        _ => None,
    }
}

/// Splits `a.b.c` into (`Some("a.b")`, `"c"`).
fn split_dotted(dotted: &str) -> (Option<String>, String) {
    match dotted.rsplit_once('.') {
        Some((prefix, leaf)) => (Some(prefix.to_string()), leaf.to_string()),
        None => (None, dotted.to_string()),
    }
}

fn is_all_caps(name: &str) -> bool {
    name.chars().any(|c| c.is_ascii_uppercase())
        && name
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

/// `HAS_FOO = ...` counts as a read of the optional import `foo`.
fn optional_flag_target(name: &str, optional_imports: &FxHashSet<String>) -> Option<String> {
    let suffix = name.strip_prefix("HAS_").or_else(|| name.strip_prefix("HAVE_"))?;
    optional_imports
        .iter()
        .find(|local| local.eq_ignore_ascii_case(suffix))
        .cloned()
}

/// `if TYPE_CHECKING:` / `if typing.TYPE_CHECKING:`.
fn is_typechecking_test(test: &Expr) -> bool {
    match test {
        Expr::Name(node) => node.id.as_str() == "TYPE_CHECKING",
        Expr::Attribute(node) => node.attr.as_str() == "TYPE_CHECKING",
        _ => false,
    }
}

/// Extracts the constructed type from `Cls(...)` / `pkg.Cls(...)` values.
fn constructed_type_name(value: &Expr) -> Option<String> {
    if let Expr::Call(call) = value {
        let dotted = flatten_dotted(&call.func)?;
        let leaf = dotted.rsplit('.').next().unwrap_or(&dotted);
        // Constructor calls follow the CapWords convention; anything else
        // is a factory we cannot see through.
        if leaf.chars().next().is_some_and(char::is_uppercase) {
            return Some(dotted);
        }
    }
    None
}

/// True when any handler catches ImportError/ModuleNotFoundError.
fn handlers_catch_import_error(handlers: &[ast::ExceptHandler]) -> bool {
    handlers.iter().any(|handler| {
        let ast::ExceptHandler::ExceptHandler(h) = handler;
        match h.type_.as_deref() {
            Some(Expr::Name(name)) => is_import_error_name(name.id.as_str()),
            Some(Expr::Tuple(tuple)) => tuple.elts.iter().any(|e| {
                matches!(e, Expr::Name(name) if is_import_error_name(name.id.as_str()))
            }),
            _ => false,
        }
    })
}

fn is_import_error_name(name: &str) -> bool {
    name == "ImportError" || name == "ModuleNotFoundError"
}

/// Pre-scan of a function body for names bound by assignment, so that
/// loads of those names are treated as locals regardless of statement
/// order. Nested function and class bodies are separate scopes and are
/// not scanned.
fn collect_assigned_names(body: &[Stmt]) -> FxHashSet<String> {
    let mut names = FxHashSet::default();
    for stmt in body {
        collect_assigned_in_stmt(stmt, &mut names);
    }
    names
}

fn collect_assigned_in_stmt(stmt: &Stmt, names: &mut FxHashSet<String>) {
    match stmt {
        Stmt::Assign(node) => {
            for target in &node.targets {
                collect_target_names(target, names);
            }
        }
        Stmt::AnnAssign(node) => collect_target_names(&node.target, names),
        Stmt::AugAssign(node) => collect_target_names(&node.target, names),
        Stmt::For(node) => {
            collect_target_names(&node.target, names);
            for s in node.body.iter().chain(&node.orelse) {
                collect_assigned_in_stmt(s, names);
            }
        }
        Stmt::AsyncFor(node) => {
            collect_target_names(&node.target, names);
            for s in node.body.iter().chain(&node.orelse) {
                collect_assigned_in_stmt(s, names);
            }
        }
        Stmt::While(node) => {
            for s in node.body.iter().chain(&node.orelse) {
                collect_assigned_in_stmt(s, names);
            }
        }
        Stmt::If(node) => {
            for s in node.body.iter().chain(&node.orelse) {
                collect_assigned_in_stmt(s, names);
            }
        }
        Stmt::With(node) => {
            for item in &node.items {
                if let Some(vars) = &item.optional_vars {
                    collect_target_names(vars, names);
                }
            }
            for s in &node.body {
                collect_assigned_in_stmt(s, names);
            }
        }
        Stmt::AsyncWith(node) => {
            for item in &node.items {
                if let Some(vars) = &item.optional_vars {
                    collect_target_names(vars, names);
                }
            }
            for s in &node.body {
                collect_assigned_in_stmt(s, names);
            }
        }
        Stmt::Try(node) => {
            for s in node
                .body
                .iter()
                .chain(&node.orelse)
                .chain(&node.finalbody)
            {
                collect_assigned_in_stmt(s, names);
            }
            for handler in &node.handlers {
                let ast::ExceptHandler::ExceptHandler(h) = handler;
                if let Some(name) = &h.name {
                    names.insert(name.to_string());
                }
                for s in &h.body {
                    collect_assigned_in_stmt(s, names);
                }
            }
        }
        _ => {}
    }
}

fn collect_target_names(expr: &Expr, names: &mut FxHashSet<String>) {
    match expr {
        Expr::Name(node) => {
            names.insert(node.id.to_string());
        }
        Expr::Tuple(node) => {
            for elt in &node.elts {
                collect_target_names(elt, names);
            }
        }
        Expr::List(node) => {
            for elt in &node.elts {
                collect_target_names(elt, names);
            }
        }
        Expr::Starred(node) => collect_target_names(&node.value, names),
        _ => {}
    }
}
