use crate::config::QualityConfig;
use crate::utils::LineIndex;
use rustpython_ast::{self as ast, ExceptHandler, Stmt};
use serde::Serialize;
use std::path::PathBuf;

/// A code quality finding.
#[derive(Debug, Clone, Serialize)]
pub struct QualityFinding {
    pub message: String,
    /// Rule id ("SKY-Q001" nesting, "SKY-Q002" length, "SKY-Q003" args,
    /// "SKY-Q004" complexity).
    pub rule_id: String,
    pub file: PathBuf,
    pub line: usize,
    pub severity: String,
}

/// Visitor for structural quality rules, driven by the config knobs:
/// nesting depth, function length, argument count, branch complexity.
pub struct QualityVisitor<'a> {
    pub findings: Vec<QualityFinding>,
    file_path: PathBuf,
    line_index: &'a LineIndex,
    limits: &'a QualityConfig,
    depth: usize,
}

impl<'a> QualityVisitor<'a> {
    pub fn new(file_path: PathBuf, line_index: &'a LineIndex, limits: &'a QualityConfig) -> Self {
        Self {
            findings: Vec::new(),
            file_path,
            line_index,
            limits,
            depth: 0,
        }
    }

    pub fn visit_body(&mut self, body: &[Stmt]) {
        for stmt in body {
            self.visit_stmt(stmt);
        }
    }

    fn check_depth(&mut self, start: rustpython_ast::TextSize) {
        if self.depth > self.limits.nesting {
            let line = self.line_index.line_index(start);
            self.add_finding(
                format!("Deeply nested code (depth {})", self.depth),
                "SKY-Q001",
                line,
            );
        }
    }

    fn check_function(
        &mut self,
        name: &str,
        args: &ast::Arguments,
        body: &[Stmt],
        start: rustpython_ast::TextSize,
        end: rustpython_ast::TextSize,
    ) {
        let line = self.line_index.line_index(start);

        let length = self
            .line_index
            .line_index(end)
            .saturating_sub(line)
            + 1;
        if length > self.limits.max_lines {
            self.add_finding(
                format!("Function '{name}' spans {length} lines"),
                "SKY-Q002",
                line,
            );
        }

        let arg_count = args.posonlyargs.len()
            + args.args.len()
            + args.kwonlyargs.len()
            + usize::from(args.vararg.is_some())
            + usize::from(args.kwarg.is_some());
        if arg_count > self.limits.max_args {
            self.add_finding(
                format!("Function '{name}' takes {arg_count} arguments"),
                "SKY-Q003",
                line,
            );
        }

        let complexity = 1 + body.iter().map(branch_count).sum::<usize>();
        if complexity > self.limits.complexity {
            self.add_finding(
                format!("Function '{name}' has branch complexity {complexity}"),
                "SKY-Q004",
                line,
            );
        }
    }

    fn visit_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::FunctionDef(node) => {
                self.check_function(
                    node.name.as_str(),
                    &node.args,
                    &node.body,
                    node.range.start(),
                    node.range.end(),
                );
                self.depth += 1;
                self.check_depth(node.range.start());
                self.visit_body(&node.body);
                self.depth -= 1;
            }
            Stmt::AsyncFunctionDef(node) => {
                self.check_function(
                    node.name.as_str(),
                    &node.args,
                    &node.body,
                    node.range.start(),
                    node.range.end(),
                );
                self.depth += 1;
                self.check_depth(node.range.start());
                self.visit_body(&node.body);
                self.depth -= 1;
            }
            Stmt::ClassDef(node) => {
                self.depth += 1;
                self.check_depth(node.range.start());
                self.visit_body(&node.body);
                self.depth -= 1;
            }
            Stmt::If(node) => {
                self.depth += 1;
                self.check_depth(node.range.start());
                self.visit_body(&node.body);
                self.visit_body(&node.orelse);
                self.depth -= 1;
            }
            Stmt::For(node) => {
                self.depth += 1;
                self.check_depth(node.range.start());
                self.visit_body(&node.body);
                self.visit_body(&node.orelse);
                self.depth -= 1;
            }
            Stmt::AsyncFor(node) => {
                self.depth += 1;
                self.check_depth(node.range.start());
                self.visit_body(&node.body);
                self.visit_body(&node.orelse);
                self.depth -= 1;
            }
            Stmt::While(node) => {
                self.depth += 1;
                self.check_depth(node.range.start());
                self.visit_body(&node.body);
                self.visit_body(&node.orelse);
                self.depth -= 1;
            }
            Stmt::With(node) => {
                self.depth += 1;
                self.check_depth(node.range.start());
                self.visit_body(&node.body);
                self.depth -= 1;
            }
            Stmt::AsyncWith(node) => {
                self.depth += 1;
                self.check_depth(node.range.start());
                self.visit_body(&node.body);
                self.depth -= 1;
            }
            Stmt::Try(node) => {
                self.depth += 1;
                self.check_depth(node.range.start());
                self.visit_body(&node.body);
                for handler in &node.handlers {
                    let ExceptHandler::ExceptHandler(h) = handler;
                    self.visit_body(&h.body);
                }
                self.visit_body(&node.orelse);
                self.visit_body(&node.finalbody);
                self.depth -= 1;
            }
            _ => {}
        }
    }

    fn add_finding(&mut self, message: String, rule_id: &str, line: usize) {
        // One finding per (line, rule).
        if self
            .findings
            .iter()
            .any(|f| f.line == line && f.rule_id == rule_id)
        {
            return;
        }
        self.findings.push(QualityFinding {
            message,
            rule_id: rule_id.to_string(),
            file: self.file_path.clone(),
            line,
            severity: "LOW".to_string(),
        });
    }
}

/// Branch points contributed by one statement, recursively.
fn branch_count(stmt: &Stmt) -> usize {
    match stmt {
        Stmt::If(node) => {
            1 + node.body.iter().map(branch_count).sum::<usize>()
                + node.orelse.iter().map(branch_count).sum::<usize>()
        }
        Stmt::For(node) => {
            1 + node.body.iter().map(branch_count).sum::<usize>()
                + node.orelse.iter().map(branch_count).sum::<usize>()
        }
        Stmt::AsyncFor(node) => {
            1 + node.body.iter().map(branch_count).sum::<usize>()
                + node.orelse.iter().map(branch_count).sum::<usize>()
        }
        Stmt::While(node) => {
            1 + node.body.iter().map(branch_count).sum::<usize>()
                + node.orelse.iter().map(branch_count).sum::<usize>()
        }
        Stmt::Try(node) => {
            let handler_branches: usize = node
                .handlers
                .iter()
                .map(|handler| {
                    let ExceptHandler::ExceptHandler(h) = handler;
                    1 + h.body.iter().map(branch_count).sum::<usize>()
                })
                .sum();
            handler_branches
                + node.body.iter().map(branch_count).sum::<usize>()
                + node.orelse.iter().map(branch_count).sum::<usize>()
                + node.finalbody.iter().map(branch_count).sum::<usize>()
        }
        Stmt::With(node) => node.body.iter().map(branch_count).sum(),
        Stmt::AsyncWith(node) => node.body.iter().map(branch_count).sum(),
        Stmt::Match(node) => node
            .cases
            .iter()
            .map(|case| 1 + case.body.iter().map(branch_count).sum::<usize>())
            .sum(),
        _ => 0,
    }
}
