use crate::utils::LineIndex;
use crate::visitor::flatten_dotted;
use rustpython_ast::{self as ast, Expr, Stmt};
use serde::Serialize;
use std::path::PathBuf;

/// A dangerous-sink finding.
#[derive(Debug, Clone, Serialize)]
pub struct DangerFinding {
    pub message: String,
    pub rule_id: String,
    pub file: PathBuf,
    pub line: usize,
    pub severity: String,
}

/// Visitor for dangerous call sinks: code execution, shell spawning,
/// unsafe deserialization, weak hashing, injectable SQL.
pub struct DangerVisitor<'a> {
    pub findings: Vec<DangerFinding>,
    file_path: PathBuf,
    line_index: &'a LineIndex,
}

impl<'a> DangerVisitor<'a> {
    pub fn new(file_path: PathBuf, line_index: &'a LineIndex) -> Self {
        Self {
            findings: Vec::new(),
            file_path,
            line_index,
        }
    }

    pub fn visit_body(&mut self, body: &[Stmt]) {
        for stmt in body {
            self.visit_stmt(stmt);
        }
    }

    fn visit_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Expr(node) => self.visit_expr(&node.value),
            Stmt::Assign(node) => self.visit_expr(&node.value),
            Stmt::AnnAssign(node) => {
                if let Some(value) = &node.value {
                    self.visit_expr(value);
                }
            }
            Stmt::Return(node) => {
                if let Some(value) = &node.value {
                    self.visit_expr(value);
                }
            }
            Stmt::FunctionDef(node) => self.visit_body(&node.body),
            Stmt::AsyncFunctionDef(node) => self.visit_body(&node.body),
            Stmt::ClassDef(node) => self.visit_body(&node.body),
            Stmt::If(node) => {
                self.visit_expr(&node.test);
                self.visit_body(&node.body);
                self.visit_body(&node.orelse);
            }
            Stmt::For(node) => {
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
            Stmt::Try(node) => {
                self.visit_body(&node.body);
                for handler in &node.handlers {
                    let ast::ExceptHandler::ExceptHandler(h) = handler;
                    self.visit_body(&h.body);
                }
                self.visit_body(&node.orelse);
                self.visit_body(&node.finalbody);
            }
            _ => {}
        }
    }

    fn visit_expr(&mut self, expr: &Expr) {
        if let Expr::Call(node) = expr {
            self.check_call(node);
            self.visit_expr(&node.func);
            for arg in &node.args {
                self.visit_expr(arg);
            }
            for keyword in &node.keywords {
                self.visit_expr(&keyword.value);
            }
        }
    }

    fn check_call(&mut self, call: &ast::ExprCall) {
        let Some(name) = flatten_dotted(&call.func) else {
            return;
        };
        let line = self.line_index.line_index(call.range.start());
        let leaf = name.rsplit('.').next().unwrap_or(&name);

        match name.as_str() {
            "eval" => self.add_finding("Avoid using eval", "SKY-D201", line, "CRITICAL"),
            "exec" => self.add_finding("Avoid using exec", "SKY-D202", line, "CRITICAL"),
            "os.system" => {
                self.add_finding("os.system spawns a shell", "SKY-D203", line, "CRITICAL")
            }
            "os.popen" => {
                self.add_finding("os.popen spawns a shell", "SKY-D204", line, "CRITICAL")
            }
            "pickle.load" | "pickle.loads" => self.add_finding(
                "pickle deserialization of untrusted data",
                "SKY-D205",
                line,
                "HIGH",
            ),
            "yaml.load" => {
                if !has_keyword(call, "Loader") {
                    self.add_finding(
                        "yaml.load without an explicit Loader",
                        "SKY-D206",
                        line,
                        "HIGH",
                    );
                }
            }
            "hashlib.md5" => {
                self.add_finding("Weak hash algorithm md5", "SKY-D207", line, "MEDIUM")
            }
            "hashlib.sha1" => {
                self.add_finding("Weak hash algorithm sha1", "SKY-D208", line, "MEDIUM")
            }
            "subprocess.call" | "subprocess.run" | "subprocess.Popen"
            | "subprocess.check_output" | "subprocess.check_call" => {
                if has_true_keyword(call, "shell") {
                    self.add_finding("subprocess with shell=True", "SKY-D209", line, "CRITICAL");
                }
            }
            "requests.get" | "requests.post" | "requests.put" | "requests.delete"
            | "requests.patch" | "requests.head" | "requests.request" => {
                if has_false_keyword(call, "verify") {
                    self.add_finding(
                        "TLS verification disabled (verify=False)",
                        "SKY-D210",
                        line,
                        "HIGH",
                    );
                }
            }
            _ => {}
        }

        // SQL built by string interpolation instead of bind parameters.
        if matches!(leaf, "execute" | "executemany") {
            if let Some(arg) = call.args.first() {
                if is_interpolated_string(arg) {
                    self.add_finding(
                        "SQL built with string interpolation",
                        "SKY-D211",
                        line,
                        "HIGH",
                    );
                }
            }
        }
    }

    fn add_finding(&mut self, message: &str, rule_id: &str, line: usize, severity: &str) {
        self.findings.push(DangerFinding {
            message: message.to_string(),
            rule_id: rule_id.to_string(),
            file: self.file_path.clone(),
            line,
            severity: severity.to_string(),
        });
    }
}

fn has_keyword(call: &ast::ExprCall, keyword_name: &str) -> bool {
    call.keywords
        .iter()
        .any(|keyword| keyword.arg.as_ref().is_some_and(|arg| arg == keyword_name))
}

fn has_true_keyword(call: &ast::ExprCall, keyword_name: &str) -> bool {
    keyword_bool(call, keyword_name) == Some(true)
}

fn has_false_keyword(call: &ast::ExprCall, keyword_name: &str) -> bool {
    keyword_bool(call, keyword_name) == Some(false)
}

fn keyword_bool(call: &ast::ExprCall, keyword_name: &str) -> Option<bool> {
    call.keywords.iter().find_map(|keyword| {
        if !keyword.arg.as_ref().is_some_and(|arg| arg == keyword_name) {
            return None;
        }
        match &keyword.value {
            Expr::Constant(c) => match c.value {
                ast::Constant::Bool(b) => Some(b),
                _ => None,
            },
            _ => None,
        }
    })
}

/// F-strings with interpolated values, and `%`/`+` composition over a
/// string literal.
fn is_interpolated_string(expr: &Expr) -> bool {
    match expr {
        Expr::JoinedStr(joined) => joined
            .values
            .iter()
            .any(|v| matches!(v, Expr::FormattedValue(_))),
        Expr::BinOp(binop) => {
            matches!(binop.op, ast::Operator::Mod | ast::Operator::Add)
                && matches!(
                    binop.left.as_ref(),
                    Expr::Constant(c) if matches!(&c.value, ast::Constant::Str(_))
                )
        }
        _ => false,
    }
}
