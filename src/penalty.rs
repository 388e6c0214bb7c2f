use crate::config::WhitelistMatcher;
use crate::implicit::TraceIndex;
use crate::merge::ProjectGraph;
use crate::resolve::Resolution;
use crate::visitor::{DefKind, Definition};
use lazy_static::lazy_static;
use rustc_hash::FxHashSet;

lazy_static! {
    /// Dunder methods the runtime invokes implicitly: constructors,
    /// context managers, iteration, operators, descriptors.
    pub static ref AUTO_CALLED: FxHashSet<&'static str> = {
        let mut s = FxHashSet::default();
        for name in [
            "__init__", "__new__", "__del__", "__enter__", "__exit__", "__call__",
            "__iter__", "__next__", "__repr__", "__str__", "__eq__", "__hash__",
            "__bool__", "__len__", "__contains__", "__getitem__", "__setitem__",
            "__delitem__", "__getattr__", "__setattr__", "__delattr__",
            "__get__", "__set__", "__delete__", "__set_name__",
            "__lt__", "__le__", "__gt__", "__ge__", "__ne__",
            "__add__", "__sub__", "__mul__", "__truediv__", "__floordiv__",
            "__mod__", "__pow__", "__matmul__", "__divmod__",
            "__and__", "__or__", "__xor__", "__lshift__", "__rshift__",
            "__neg__", "__pos__", "__abs__", "__invert__",
            "__radd__", "__rsub__", "__rmul__", "__rtruediv__", "__rfloordiv__",
            "__rmod__", "__rpow__", "__rmatmul__", "__rand__", "__ror__", "__rxor__",
            "__iadd__", "__isub__", "__imul__", "__itruediv__", "__ifloordiv__",
            "__imod__", "__ipow__", "__iand__", "__ior__", "__ixor__",
            "__format__", "__bytes__", "__index__", "__int__", "__float__",
            "__complex__", "__round__", "__length_hint__", "__reversed__",
            "__aiter__", "__anext__", "__aenter__", "__aexit__", "__await__",
            "__init_subclass__", "__class_getitem__", "__instancecheck__",
            "__subclasscheck__", "__subclasshook__", "__fspath__", "__sizeof__",
            "__dir__", "__copy__", "__deepcopy__", "__reduce__", "__reduce_ex__",
            "__getstate__", "__setstate__", "__post_init__", "__missing__",
        ] {
            s.insert(name);
        }
        s
    };
}

/// Base reduction multiplier for resolved references.
///
/// One resolved reference must land below the default threshold of 60:
/// the locked mapping is in-degree 0,1,2,3,>=4 -> 100, 52, 24, 4, 0.
pub const BASE_REF_MULTIPLIER: f64 = 48.0;

/// Confidence remaining after the in-degree base reduction.
pub fn base_confidence(in_degree: usize) -> u8 {
    let penalty = (BASE_REF_MULTIPLIER * ((1 + in_degree) as f64).log2()).min(100.0);
    (100.0 - penalty).max(0.0).round() as u8
}

/// Read-only context threaded through scoring.
pub struct ScoreCtx<'a> {
    pub graph: &'a ProjectGraph,
    pub resolution: &'a Resolution,
    pub trace: &'a TraceIndex,
    pub whitelist: &'a WhitelistMatcher,
}

/// Result of scoring one definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Score {
    pub confidence: u8,
    /// Rule that pinned the definition live, when one did.
    pub pin: Option<&'static str>,
}

/// A graduated penalty: a matcher plus the amount it subtracts.
/// The registry is applied in one pass, after the base reduction; pins
/// win absolutely and skip the registry entirely.
pub struct PenaltyRule {
    pub id: &'static str,
    pub delta: u8,
    pub matches: fn(&Definition, &ScoreCtx) -> bool,
}

fn class_simple_name(def: &Definition) -> Option<&str> {
    let class_fqn = def.enclosing_class.as_deref()?;
    Some(class_fqn.rsplit('.').next().unwrap_or(class_fqn))
}

pub const GRADUATED_RULES: &[PenaltyRule] = &[
    PenaltyRule {
        id: "SKY-P001",
        delta: 20,
        matches: |d, _| d.is_private,
    },
    PenaltyRule {
        id: "SKY-P002",
        delta: 30,
        matches: |d, _| d.kind == DefKind::Constant,
    },
    PenaltyRule {
        id: "SKY-P003",
        delta: 60,
        matches: |d, _| {
            d.kind == DefKind::Method
                && class_simple_name(d).is_some_and(|c| c.ends_with("Mixin"))
        },
    },
    PenaltyRule {
        id: "SKY-P004",
        delta: 40,
        matches: |d, _| {
            d.kind == DefKind::Method
                && class_simple_name(d).is_some_and(|c| {
                    c.starts_with("Base")
                        || c.ends_with("Base")
                        || c.ends_with("ABC")
                        || c.ends_with("Interface")
                        || c.ends_with("Adapter")
                })
        },
    },
    PenaltyRule {
        id: "SKY-P005",
        delta: 25,
        matches: |d, _| {
            d.simple_name.starts_with("visit_") || d.simple_name.starts_with("leave_")
        },
    },
    PenaltyRule {
        id: "SKY-P006",
        delta: 30,
        matches: |d, _| d.simple_name.starts_with("pytest_"),
    },
    PenaltyRule {
        id: "SKY-P007",
        delta: 20,
        matches: |d, _| {
            let name = match d.kind {
                DefKind::Class => Some(d.simple_name.as_str()),
                DefKind::Method => class_simple_name(d),
                _ => None,
            };
            name.is_some_and(|c| {
                c.ends_with("Plugin") || c.ends_with("Handler") || c.ends_with("Command")
            })
        },
    },
    PenaltyRule {
        id: "SKY-P008",
        delta: 10,
        matches: |d, ctx| ctx.graph.dynamic_modules.contains(&d.module),
    },
    PenaltyRule {
        id: "SKY-P009",
        delta: 40,
        matches: |d, _| {
            d.decorators.iter().any(|dec| {
                crate::framework::classify_decorator(dec)
                    == Some(crate::framework::DecoratorFamily::Accessor)
            })
        },
    },
    PenaltyRule {
        id: "SKY-P010",
        delta: 20,
        matches: |d, _| {
            d.in_init && matches!(d.kind, DefKind::Function | DefKind::Class)
        },
    },
];

/// Absolute pins: evidence that a definition is live (or must never be
/// reported) regardless of reference counts.
fn pin_reason(def: &Definition, ctx: &ScoreCtx) -> Option<&'static str> {
    // Source suppressions and whitelist come first.
    if let Some(suppressions) = ctx.graph.suppressions.get(&def.file) {
        if suppressions.is_rule_suppressed(def.line, kind_rule_id(def.kind)) {
            return Some("SKY-PIN-SUPPRESSED");
        }
    }
    if ctx.whitelist.matches(&def.simple_name) {
        return Some("SKY-PIN-WHITELIST");
    }

    // Structural members the language or type system calls for.
    if matches!(def.kind, DefKind::DataclassField | DefKind::EnumMember)
        || def.flags.dataclass_field
        || def.flags.protocol_member
    {
        return Some("SKY-PIN-MEMBER");
    }
    if def.flags.overrides_abstract {
        return Some("SKY-PIN-ABSTRACT");
    }
    if def.flags.abstract_method
        && ctx.graph.class_of(def).is_some_and(|record| record.is_abc)
    {
        return Some("SKY-PIN-ABSTRACT");
    }
    if def.is_dunder || AUTO_CALLED.contains(def.simple_name.as_str()) {
        return Some("SKY-PIN-DUNDER");
    }

    if def.flags.exported_via_all {
        return Some("SKY-PIN-EXPORT");
    }
    if def.flags.framework_route {
        return Some("SKY-PIN-ROUTE");
    }
    if def.flags.optional_import {
        return Some("SKY-PIN-OPTIONAL");
    }

    // Execution evidence.
    if !ctx.trace.is_empty() && ctx.trace.hits_span(&def.file, def.line, def.end_line) {
        return Some("SKY-PIN-TRACE");
    }
    if ctx
        .graph
        .main_guard
        .get(&def.module)
        .is_some_and(|calls| calls.contains(&def.simple_name))
    {
        return Some("SKY-PIN-MAIN");
    }

    // Test trees are exercised by the runner, not by references.
    if def.is_test_file || def.simple_name.starts_with("test_") {
        return Some("SKY-PIN-TEST");
    }

    // Parameters inherit the pin of the function whose signature the
    // runtime or an interface dictates.
    if def.kind == DefKind::Parameter {
        if def.simple_name.starts_with('_')
            || def.simple_name == "args"
            || def.simple_name == "kwargs"
        {
            return Some("SKY-PIN-CONVENTION");
        }
        if let Some((function_fqn, _)) = def.fqn.rsplit_once('.') {
            if let Some(function) = ctx.graph.definitions.get(function_fqn) {
                if function.is_dunder
                    || AUTO_CALLED.contains(function.simple_name.as_str())
                    || function.flags.abstract_method
                    || function.flags.overrides_abstract
                    || function.flags.protocol_member
                    || function.flags.framework_route
                {
                    return Some("SKY-PIN-SIGNATURE");
                }
            }
        }
    }

    None
}

/// Scores one definition: pins first, then the base reduction from the
/// resolved in-degree, then the graduated registry.
pub fn score_definition(def: &Definition, ctx: &ScoreCtx) -> Score {
    if let Some(pin) = pin_reason(def, ctx) {
        return Score {
            confidence: 0,
            pin: Some(pin),
        };
    }

    let mut in_degree = ctx.resolution.in_degree_of(&def.fqn);
    if ctx.graph.duck_implementers.contains(&def.fqn) {
        in_degree += 1;
    }
    let mut confidence = base_confidence(in_degree);
    for rule in GRADUATED_RULES {
        if (rule.matches)(def, ctx) {
            confidence = confidence.saturating_sub(rule.delta);
        }
    }
    Score {
        confidence,
        pin: None,
    }
}

/// Rule id attached to findings of each kind.
pub fn kind_rule_id(kind: DefKind) -> &'static str {
    match kind {
        DefKind::Function => "SKY-U001",
        DefKind::Method => "SKY-U002",
        DefKind::Class => "SKY-U003",
        DefKind::Import => "SKY-U004",
        DefKind::Variable | DefKind::Constant => "SKY-U005",
        DefKind::Parameter => "SKY-U006",
        DefKind::DataclassField | DefKind::EnumMember => "SKY-U005",
    }
}

/// Rule id for an unused module file.
pub const UNUSED_FILE_RULE: &str = "SKY-U007";
