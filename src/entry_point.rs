use rustpython_ast::{Constant, Expr, Stmt};
use rustc_hash::FxHashSet;

/// Names called from `if __name__ == "__main__":` blocks.
///
/// These are execution roots: the guarded block runs when the module is
/// executed as a script, so everything it calls is live.
pub fn main_guard_calls(stmts: &[Stmt]) -> FxHashSet<String> {
    let mut calls = FxHashSet::default();
    for stmt in stmts {
        let Stmt::If(if_stmt) = stmt else { continue };
        if !is_main_guard_test(&if_stmt.test) {
            continue;
        }
        for body_stmt in &if_stmt.body {
            collect_calls_in_stmt(body_stmt, &mut calls);
        }
    }
    calls
}

/// Matches `__name__ == "__main__"` in either operand order.
fn is_main_guard_test(test: &Expr) -> bool {
    let Expr::Compare(compare) = test else {
        return false;
    };
    if compare.ops.len() != 1 || compare.comparators.len() != 1 {
        return false;
    }
    let left = compare.left.as_ref();
    let right = &compare.comparators[0];
    (is_name_dunder(left) && is_main_string(right))
        || (is_name_dunder(right) && is_main_string(left))
}

fn is_name_dunder(expr: &Expr) -> bool {
    matches!(expr, Expr::Name(name) if name.id.as_str() == "__name__")
}

fn is_main_string(expr: &Expr) -> bool {
    matches!(
        expr,
        Expr::Constant(constant)
            if matches!(&constant.value, Constant::Str(s) if s.as_str() == "__main__")
    )
}

fn collect_calls_in_stmt(stmt: &Stmt, calls: &mut FxHashSet<String>) {
    match stmt {
        Stmt::Expr(node) => collect_calls_in_expr(&node.value, calls),
        Stmt::Assign(node) => collect_calls_in_expr(&node.value, calls),
        Stmt::Return(node) => {
            if let Some(value) = &node.value {
                collect_calls_in_expr(value, calls);
            }
        }
        Stmt::If(node) => {
            collect_calls_in_expr(&node.test, calls);
            for s in node.body.iter().chain(&node.orelse) {
                collect_calls_in_stmt(s, calls);
            }
        }
        Stmt::For(node) => {
            collect_calls_in_expr(&node.iter, calls);
            for s in node.body.iter().chain(&node.orelse) {
                collect_calls_in_stmt(s, calls);
            }
        }
        Stmt::While(node) => {
            collect_calls_in_expr(&node.test, calls);
            for s in node.body.iter().chain(&node.orelse) {
                collect_calls_in_stmt(s, calls);
            }
        }
        Stmt::With(node) => {
            for item in &node.items {
                collect_calls_in_expr(&item.context_expr, calls);
            }
            for s in &node.body {
                collect_calls_in_stmt(s, calls);
            }
        }
        Stmt::Try(node) => {
            for s in node
                .body
                .iter()
                .chain(&node.orelse)
                .chain(&node.finalbody)
            {
                collect_calls_in_stmt(s, calls);
            }
            for handler in &node.handlers {
                let rustpython_ast::ExceptHandler::ExceptHandler(h) = handler;
                for s in &h.body {
                    collect_calls_in_stmt(s, calls);
                }
            }
        }
        _ => {}
    }
}

fn collect_calls_in_expr(expr: &Expr, calls: &mut FxHashSet<String>) {
    match expr {
        Expr::Call(call) => {
            match call.func.as_ref() {
                Expr::Name(name) => {
                    calls.insert(name.id.to_string());
                }
                Expr::Attribute(attr) => {
                    calls.insert(attr.attr.to_string());
                    collect_calls_in_expr(&attr.value, calls);
                }
                _ => {}
            }
            for arg in &call.args {
                collect_calls_in_expr(arg, calls);
            }
            for keyword in &call.keywords {
                collect_calls_in_expr(&keyword.value, calls);
            }
        }
        Expr::Attribute(attr) => collect_calls_in_expr(&attr.value, calls),
        Expr::BinOp(binop) => {
            collect_calls_in_expr(&binop.left, calls);
            collect_calls_in_expr(&binop.right, calls);
        }
        Expr::Await(node) => collect_calls_in_expr(&node.value, calls),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustpython_parser::{parse, Mode};

    fn guard_calls(source: &str) -> FxHashSet<String> {
        let tree = parse(source, Mode::Module, "test.py").expect("parse failed");
        let rustpython_ast::Mod::Module(module) = tree else {
            panic!("expected module");
        };
        main_guard_calls(&module.body)
    }

    #[test]
    fn detects_calls_in_main_guard() {
        let calls = guard_calls(
            r#"
def run():
    pass

if __name__ == "__main__":
    run()
    helper(setup())
"#,
        );
        assert!(calls.contains("run"));
        assert!(calls.contains("helper"));
        assert!(calls.contains("setup"));
    }

    #[test]
    fn reversed_guard_is_recognized() {
        let calls = guard_calls(
            r#"
if "__main__" == __name__:
    entry()
"#,
        );
        assert!(calls.contains("entry"));
    }

    #[test]
    fn no_guard_no_calls() {
        let calls = guard_calls("def run():\n    pass\n");
        assert!(calls.is_empty());
    }

    #[test]
    fn nested_statements_are_scanned() {
        let calls = guard_calls(
            r#"
if __name__ == "__main__":
    if flag:
        first()
    for _ in range(3):
        second()
"#,
        );
        assert!(calls.contains("first"));
        assert!(calls.contains("second"));
    }
}
