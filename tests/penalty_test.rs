// Scoring: the locked base-reduction table, absolute pins, and the
// graduated penalty registry.

use skylos::config::{Whitelist, WhitelistMatcher};
use skylos::implicit::TraceIndex;
use skylos::merge;
use skylos::penalty::{base_confidence, score_definition, ScoreCtx};
use skylos::resolve::Resolution;
use skylos::visitor::{DefFlags, DefKind, Definition};
use std::path::{Path, PathBuf};

fn make_def(kind: DefKind, simple: &str, fqn: &str) -> Definition {
    let is_dunder = simple.starts_with("__") && simple.ends_with("__");
    Definition {
        kind,
        simple_name: simple.to_string(),
        fqn: fqn.to_string(),
        file: PathBuf::from("m.py"),
        line: 1,
        end_line: 1,
        module: "m".to_string(),
        enclosing_class: None,
        decorators: Vec::new(),
        base_classes: Vec::new(),
        is_private: simple.starts_with('_') && !is_dunder,
        is_dunder,
        is_test_file: false,
        in_init: false,
        flags: DefFlags::default(),
        confidence: 100,
    }
}

struct Fixture {
    graph: merge::ProjectGraph,
    resolution: Resolution,
    trace: TraceIndex,
    whitelist: WhitelistMatcher,
}

impl Fixture {
    fn new() -> Self {
        Self {
            graph: merge::merge(Vec::new(), Path::new(".")),
            resolution: Resolution::default(),
            trace: TraceIndex::load(None, Path::new(".")),
            whitelist: WhitelistMatcher::empty(),
        }
    }

    fn ctx(&self) -> ScoreCtx<'_> {
        ScoreCtx {
            graph: &self.graph,
            resolution: &self.resolution,
            trace: &self.trace,
            whitelist: &self.whitelist,
        }
    }
}

#[test]
fn test_unreferenced_function_scores_full() {
    let fixture = Fixture::new();
    let def = make_def(DefKind::Function, "orphan", "m.orphan");
    let score = score_definition(&def, &fixture.ctx());
    assert_eq!(score.confidence, 100);
    assert!(score.pin.is_none());
}

#[test]
fn test_single_reference_drops_below_default_threshold() {
    let mut fixture = Fixture::new();
    fixture
        .resolution
        .in_degree
        .insert("m.called".to_string(), 1);
    let def = make_def(DefKind::Function, "called", "m.called");
    let score = score_definition(&def, &fixture.ctx());
    assert_eq!(score.confidence, 52);
    assert!(score.confidence < 60);
}

#[test]
fn test_base_reduction_matches_locked_table() {
    let table = [(0, 100), (1, 52), (2, 24), (3, 4), (4, 0), (10, 0)];
    for (in_degree, expected) in table {
        assert_eq!(base_confidence(in_degree), expected, "at {in_degree}");
    }
}

#[test]
fn test_dunder_pin_beats_mixin_penalty() {
    let fixture = Fixture::new();
    let mut def = make_def(DefKind::Method, "__init__", "m.CacheMixin.__init__");
    def.enclosing_class = Some("m.CacheMixin".to_string());
    let score = score_definition(&def, &fixture.ctx());
    assert_eq!(score.confidence, 0);
    assert_eq!(score.pin, Some("SKY-PIN-DUNDER"));
}

#[test]
fn test_graduated_penalties_stack() {
    let fixture = Fixture::new();
    let mut def = make_def(DefKind::Method, "_assist", "m.CacheMixin._assist");
    def.enclosing_class = Some("m.CacheMixin".to_string());
    // 100 - 20 (private) - 60 (mixin) = 20.
    let score = score_definition(&def, &fixture.ctx());
    assert_eq!(score.confidence, 20);
    assert!(score.pin.is_none());
}

#[test]
fn test_base_family_class_penalty() {
    let fixture = Fixture::new();
    let mut def = make_def(DefKind::Method, "render", "m.BaseView.render");
    def.enclosing_class = Some("m.BaseView".to_string());
    let score = score_definition(&def, &fixture.ctx());
    assert_eq!(score.confidence, 60);
}

#[test]
fn test_visitor_pattern_penalty() {
    let fixture = Fixture::new();
    let def = make_def(DefKind::Function, "visit_Call", "m.visit_Call");
    let score = score_definition(&def, &fixture.ctx());
    assert_eq!(score.confidence, 75);
}

#[test]
fn test_constant_penalty() {
    let fixture = Fixture::new();
    let mut def = make_def(DefKind::Constant, "TIMEOUT", "m.TIMEOUT");
    def.flags.is_constant_all_caps = true;
    let score = score_definition(&def, &fixture.ctx());
    assert_eq!(score.confidence, 70);
}

#[test]
fn test_dynamic_module_hedge() {
    let mut fixture = Fixture::new();
    fixture.graph.dynamic_modules.insert("m".to_string());
    let def = make_def(DefKind::Function, "maybe_used", "m.maybe_used");
    let score = score_definition(&def, &fixture.ctx());
    assert_eq!(score.confidence, 90);
}

#[test]
fn test_framework_route_pin() {
    let fixture = Fixture::new();
    let mut def = make_def(DefKind::Function, "index", "m.index");
    def.flags.framework_route = true;
    let score = score_definition(&def, &fixture.ctx());
    assert_eq!(score.pin, Some("SKY-PIN-ROUTE"));
}

#[test]
fn test_export_pin() {
    let fixture = Fixture::new();
    let mut def = make_def(DefKind::Function, "api", "m.api");
    def.flags.exported_via_all = true;
    let score = score_definition(&def, &fixture.ctx());
    assert_eq!(score.pin, Some("SKY-PIN-EXPORT"));
}

#[test]
fn test_abstract_override_pin() {
    let fixture = Fixture::new();
    let mut def = make_def(DefKind::Method, "execute", "m.LocalWorker.execute");
    def.enclosing_class = Some("m.LocalWorker".to_string());
    def.flags.overrides_abstract = true;
    let score = score_definition(&def, &fixture.ctx());
    assert_eq!(score.pin, Some("SKY-PIN-ABSTRACT"));
}

#[test]
fn test_dataclass_field_and_enum_member_pins() {
    let fixture = Fixture::new();
    let field = make_def(DefKind::DataclassField, "x", "m.Point.x");
    assert_eq!(
        score_definition(&field, &fixture.ctx()).pin,
        Some("SKY-PIN-MEMBER")
    );
    let member = make_def(DefKind::EnumMember, "RED", "m.Color.RED");
    assert_eq!(
        score_definition(&member, &fixture.ctx()).pin,
        Some("SKY-PIN-MEMBER")
    );
}

#[test]
fn test_whitelist_pin() {
    let mut fixture = Fixture::new();
    let mut whitelist = Whitelist::default();
    whitelist.names.push("plugin_*".to_string());
    fixture.whitelist = WhitelistMatcher::compile(&whitelist).unwrap();

    let def = make_def(DefKind::Function, "plugin_entry", "m.plugin_entry");
    let score = score_definition(&def, &fixture.ctx());
    assert_eq!(score.pin, Some("SKY-PIN-WHITELIST"));
}

#[test]
fn test_suppressed_line_pin() {
    let mut fixture = Fixture::new();
    fixture.graph.suppressions.insert(
        PathBuf::from("m.py"),
        skylos::suppression::scan("def kept():  # noqa\n    pass\n", "m.py"),
    );
    let def = make_def(DefKind::Function, "kept", "m.kept");
    let score = score_definition(&def, &fixture.ctx());
    assert_eq!(score.pin, Some("SKY-PIN-SUPPRESSED"));
}

#[test]
fn test_test_file_pin() {
    let fixture = Fixture::new();
    let mut def = make_def(DefKind::Function, "fixture_data", "t.fixture_data");
    def.is_test_file = true;
    let score = score_definition(&def, &fixture.ctx());
    assert_eq!(score.pin, Some("SKY-PIN-TEST"));
}

#[test]
fn test_underscore_parameter_convention_pin() {
    let fixture = Fixture::new();
    let def = make_def(DefKind::Parameter, "_unused", "m.f._unused");
    let score = score_definition(&def, &fixture.ctx());
    assert_eq!(score.pin, Some("SKY-PIN-CONVENTION"));

    let kwargs = make_def(DefKind::Parameter, "kwargs", "m.f.kwargs");
    assert_eq!(
        score_definition(&kwargs, &fixture.ctx()).pin,
        Some("SKY-PIN-CONVENTION")
    );
}

#[test]
fn test_duck_implementer_counts_as_reference() {
    let mut fixture = Fixture::new();
    fixture
        .graph
        .duck_implementers
        .insert("m.Sink.close".to_string());
    let mut def = make_def(DefKind::Method, "close", "m.Sink.close");
    def.enclosing_class = Some("m.Sink".to_string());
    let score = score_definition(&def, &fixture.ctx());
    assert_eq!(score.confidence, 52);
}
