use crate::suppression::Suppressions;
use crate::visitor::{DefKind, Definition, ImportAlias, RefKind, Reference};
use rustc_hash::{FxHashMap, FxHashSet};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Immutable per-file output of analysis stage 1.
pub struct FileReport {
    pub file: PathBuf,
    pub module: String,
    pub definitions: Vec<Definition>,
    pub references: Vec<Reference>,
    pub aliases: Vec<ImportAlias>,
    pub exports: Vec<String>,
    pub instance_attr_types: FxHashMap<String, FxHashMap<String, String>>,
    pub suppressions: Suppressions,
    pub main_guard_calls: FxHashSet<String>,
    pub dynamic_dispatch: bool,
    pub loc: usize,
}

/// A resolved base-class edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BaseRef {
    /// Fqn of an in-project class.
    Internal(String),
    /// Name of a class outside the project (stdlib, third party).
    External(String),
}

/// Per-class derived facts: bases, members, the MRO approximation and the
/// instance-attribute type map feeding method resolution.
#[derive(Debug, Default)]
pub struct ClassRecord {
    pub fqn: String,
    pub module: String,
    pub bases: Vec<BaseRef>,
    /// Own member simple names, methods and class attributes alike.
    pub members: FxHashSet<String>,
    /// Own method simple names.
    pub methods: FxHashSet<String>,
    /// attribute -> class fqn inferred from `self.x = Cls(...)`.
    pub instance_attr_types: FxHashMap<String, String>,
    pub abstract_methods: FxHashSet<String>,
    pub is_protocol: bool,
    pub is_abc: bool,
    pub is_enum: bool,
    pub is_dataclass: bool,
}

/// The merged project-wide symbol table and reference index. Built once,
/// then shared read-only across the resolve and scoring stages.
pub struct ProjectGraph {
    /// fqn -> definition (unique; collisions keep the last).
    pub definitions: FxHashMap<String, Definition>,
    /// module -> fqns defined in it, in collection order.
    pub modules: FxHashMap<String, Vec<String>>,
    /// module -> defining file.
    pub module_files: FxHashMap<String, PathBuf>,
    /// module -> local name -> absolute dotted import target.
    pub aliases: FxHashMap<String, FxHashMap<String, String>>,
    pub classes: FxHashMap<String, ClassRecord>,
    /// class fqn -> in-project ancestor fqns, nearest first.
    pub mro: FxHashMap<String, Vec<String>>,
    /// method simple name -> protocol class fqns declaring it.
    pub protocol_methods: FxHashMap<String, FxHashSet<String>>,
    /// `Class.method` keys credited through duck-typed protocol matching.
    pub duck_implementers: FxHashSet<String>,
    /// Every reference collected in stage 1, plus `__all__` references.
    pub references: Vec<Reference>,
    /// module -> names listed in `__all__`.
    pub exports: FxHashMap<String, Vec<String>>,
    pub suppressions: FxHashMap<PathBuf, Suppressions>,
    /// module -> names called under its `__main__` guard.
    pub main_guard: FxHashMap<String, FxHashSet<String>>,
    /// Modules using `globals()`/`getattr`-style dispatch.
    pub dynamic_modules: FxHashSet<String>,
    pub total_loc: usize,
}

impl ProjectGraph {
    /// Looks up an import alias visible in `module`.
    pub fn resolve_alias(&self, module: &str, local: &str) -> Option<&String> {
        self.aliases.get(module)?.get(local)
    }

    /// Fqn of `module.simple` when that definition exists.
    pub fn module_global(&self, module: &str, simple: &str) -> Option<String> {
        if module.is_empty() {
            return None;
        }
        let candidate = format!("{module}.{simple}");
        self.definitions.contains_key(&candidate).then_some(candidate)
    }

    /// The class record for a definition's enclosing class, if any.
    pub fn class_of(&self, def: &Definition) -> Option<&ClassRecord> {
        self.classes.get(def.enclosing_class.as_deref()?)
    }
}

/// Duck-typing threshold: a class implements protocol P when it covers at
/// least `max(3, ceil(0.7 * |P|))` of P's methods.
pub fn duck_typing_threshold(protocol_len: usize) -> usize {
    let ratio = (protocol_len as f64 * 0.7).ceil() as usize;
    ratio.max(3)
}

/// Computes a file's dotted module path.
///
/// Packages are detected by walking `__init__.py` markers upward from the
/// file; when no package marker exists anywhere, the relative path (minus
/// a leading src-layout `src/` segment) is used so flat layouts still get
/// unique module names.
pub fn module_fqn(file: &Path, root: &Path) -> String {
    let relative = file.strip_prefix(root).unwrap_or(file);
    let stem = relative
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();

    // Walk package markers upward.
    let mut package_parts = Vec::new();
    let mut dir = file.parent();
    let mut found_package = false;
    while let Some(current) = dir {
        if current == root || !current.starts_with(root) {
            break;
        }
        if current.join("__init__.py").exists() {
            found_package = true;
            if let Some(name) = current.file_name() {
                package_parts.push(name.to_string_lossy().to_string());
            }
            dir = current.parent();
        } else {
            break;
        }
    }
    package_parts.reverse();

    let mut parts = if found_package {
        package_parts
    } else {
        let mut components: Vec<String> = relative
            .parent()
            .map(|p| {
                p.components()
                    .map(|c| c.as_os_str().to_string_lossy().to_string())
                    .collect()
            })
            .unwrap_or_default();
        if components.first().is_some_and(|c| c == "src") {
            components.remove(0);
        }
        components
    };

    if stem != "__init__" {
        parts.push(stem);
    }
    parts.join(".")
}

/// Builds the project graph from per-file reports. Reports must arrive in
/// deterministic (sorted filename) order so collision tie-breaks are
/// reproducible.
pub fn merge(reports: Vec<FileReport>, _root: &Path) -> ProjectGraph {
    let mut graph = ProjectGraph {
        definitions: FxHashMap::default(),
        modules: FxHashMap::default(),
        module_files: FxHashMap::default(),
        aliases: FxHashMap::default(),
        classes: FxHashMap::default(),
        mro: FxHashMap::default(),
        protocol_methods: FxHashMap::default(),
        duck_implementers: FxHashSet::default(),
        references: Vec::new(),
        exports: FxHashMap::default(),
        suppressions: FxHashMap::default(),
        main_guard: FxHashMap::default(),
        dynamic_modules: FxHashSet::default(),
        total_loc: 0,
    };
    let mut instance_types_raw: FxHashMap<String, FxHashMap<String, String>> =
        FxHashMap::default();

    // Pass 1: insert definitions, aliases and reference streams.
    for report in reports {
        graph.total_loc += report.loc;
        graph
            .module_files
            .insert(report.module.clone(), report.file.clone());
        if report.dynamic_dispatch {
            graph.dynamic_modules.insert(report.module.clone());
        }
        if !report.main_guard_calls.is_empty() {
            graph
                .main_guard
                .insert(report.module.clone(), report.main_guard_calls);
        }
        graph.suppressions.insert(report.file, report.suppressions);

        let module_aliases = graph.aliases.entry(report.module.clone()).or_default();
        for alias in report.aliases {
            module_aliases.insert(alias.local, alias.target);
        }

        for mut def in report.definitions {
            let entry = graph.modules.entry(def.module.clone()).or_default();
            if let Some(previous) = graph.definitions.get(&def.fqn) {
                warn!(
                    fqn = %def.fqn,
                    first_line = previous.line,
                    line = def.line,
                    "duplicate definition, keeping the later one"
                );
                def.flags.duplicate = true;
            } else {
                entry.push(def.fqn.clone());
            }
            graph.definitions.insert(def.fqn.clone(), def);
        }

        graph.references.extend(report.references);
        if !report.exports.is_empty() {
            graph
                .exports
                .insert(report.module.clone(), report.exports);
        }
        for (class_fqn, attrs) in report.instance_attr_types {
            instance_types_raw.entry(class_fqn).or_default().extend(attrs);
        }
    }

    build_class_records(&mut graph, &instance_types_raw);
    build_mro(&mut graph);
    inherit_class_flags(&mut graph);
    mark_abstract_overrides(&mut graph);
    index_protocols(&mut graph);
    compute_duck_implementers(&mut graph);
    apply_exports(&mut graph);

    graph
}

fn class_def_fqns(graph: &ProjectGraph) -> Vec<String> {
    let mut fqns: Vec<String> = graph
        .definitions
        .values()
        .filter(|d| d.kind == DefKind::Class)
        .map(|d| d.fqn.clone())
        .collect();
    fqns.sort();
    fqns
}

fn build_class_records(
    graph: &mut ProjectGraph,
    instance_types_raw: &FxHashMap<String, FxHashMap<String, String>>,
) {
    // Simple name -> class fqns, for last-resort base resolution of
    // instance attribute types.
    let mut by_simple: FxHashMap<String, Vec<String>> = FxHashMap::default();
    for fqn in class_def_fqns(graph) {
        let simple = fqn.rsplit('.').next().unwrap_or(&fqn).to_string();
        by_simple.entry(simple).or_default().push(fqn);
    }

    for fqn in class_def_fqns(graph) {
        let def = graph.definitions[&fqn].clone();
        let mut record = ClassRecord {
            fqn: fqn.clone(),
            module: def.module.clone(),
            ..ClassRecord::default()
        };

        for base in &def.base_classes {
            record.bases.push(resolve_base(graph, &def.module, base));
            let leaf = base.rsplit('.').next().unwrap_or(base);
            match leaf {
                "Protocol" => record.is_protocol = true,
                "ABC" | "ABCMeta" => record.is_abc = true,
                "Enum" | "IntEnum" | "StrEnum" | "Flag" | "IntFlag" => record.is_enum = true,
                "NamedTuple" | "BaseModel" | "TypedDict" => record.is_dataclass = true,
                _ => {}
            }
        }
        if def.decorators.iter().any(|d| d.ends_with("runtime_checkable")) {
            record.is_protocol = true;
        }
        if def
            .decorators
            .iter()
            .any(|d| matches!(d.rsplit('.').next().unwrap_or(d), "dataclass" | "define" | "s"))
        {
            record.is_dataclass = true;
        }

        // Own members from definitions nested directly in this class.
        for (member_fqn, member) in &graph.definitions {
            if member.enclosing_class.as_deref() != Some(fqn.as_str()) {
                continue;
            }
            let simple = member_fqn.rsplit('.').next().unwrap_or(member_fqn);
            record.members.insert(simple.to_string());
            if member.kind == DefKind::Method {
                record.methods.insert(simple.to_string());
                if member.flags.abstract_method {
                    record.abstract_methods.insert(simple.to_string());
                }
            }
        }
        if !record.abstract_methods.is_empty() {
            record.is_abc = true;
        }

        // Resolve raw instance attribute types to class fqns.
        if let Some(attrs) = instance_types_raw.get(&fqn) {
            for (attr, raw) in attrs {
                if let Some(resolved) = resolve_class_name(graph, &def.module, raw, &by_simple) {
                    record.instance_attr_types.insert(attr.clone(), resolved);
                }
            }
        }

        graph.classes.insert(fqn, record);
    }
}

/// Resolves a base-class string against the module's alias map, then the
/// module's own globals; anything else is external.
fn resolve_base(graph: &ProjectGraph, module: &str, base: &str) -> BaseRef {
    if let Some(fqn) = lookup_class(graph, module, base) {
        BaseRef::Internal(fqn)
    } else {
        BaseRef::External(base.to_string())
    }
}

pub(crate) fn lookup_class(graph: &ProjectGraph, module: &str, dotted: &str) -> Option<String> {
    let (root, rest) = match dotted.split_once('.') {
        Some((root, rest)) => (root, Some(rest)),
        None => (dotted, None),
    };
    // Alias-resolve the chain root, then re-attach the remainder.
    let candidates = [
        graph
            .resolve_alias(module, root)
            .map(|target| match rest {
                Some(rest) => format!("{target}.{rest}"),
                None => target.clone(),
            }),
        (!module.is_empty()).then(|| format!("{module}.{dotted}")),
        Some(dotted.to_string()),
    ];
    for candidate in candidates.into_iter().flatten() {
        if graph
            .definitions
            .get(&candidate)
            .is_some_and(|d| d.kind == DefKind::Class)
        {
            return Some(candidate);
        }
    }
    None
}

/// Resolves a constructed-type name, falling back to a unique simple-name
/// match across the project's classes.
fn resolve_class_name(
    graph: &ProjectGraph,
    module: &str,
    dotted: &str,
    by_simple: &FxHashMap<String, Vec<String>>,
) -> Option<String> {
    if let Some(fqn) = lookup_class(graph, module, dotted) {
        return Some(fqn);
    }
    let leaf = dotted.rsplit('.').next().unwrap_or(dotted);
    match by_simple.get(leaf).map(Vec::as_slice) {
        Some([only]) => Some(only.clone()),
        _ => None,
    }
}

/// Depth-first MRO approximation over in-project bases with a cycle guard:
/// the walk truncates at the first revisit.
fn build_mro(graph: &mut ProjectGraph) {
    let fqns = class_def_fqns(graph);
    for fqn in fqns {
        let mut ancestors = Vec::new();
        let mut visited = FxHashSet::default();
        visited.insert(fqn.clone());
        let mut path = vec![fqn.clone()];
        collect_ancestors(graph, &fqn, &mut ancestors, &mut visited, &mut path);
        graph.mro.insert(fqn, ancestors);
    }
}

fn collect_ancestors(
    graph: &ProjectGraph,
    fqn: &str,
    ancestors: &mut Vec<String>,
    visited: &mut FxHashSet<String>,
    path: &mut Vec<String>,
) {
    let Some(record) = graph.classes.get(fqn) else {
        return;
    };
    for base in &record.bases {
        let BaseRef::Internal(base_fqn) = base else {
            continue;
        };
        if path.iter().any(|p| p == base_fqn) {
            warn!(class = fqn, base = %base_fqn, "inheritance cycle, truncating MRO");
            continue;
        }
        if !visited.insert(base_fqn.clone()) {
            // Diamond: already linearized through another branch.
            continue;
        }
        ancestors.push(base_fqn.clone());
        path.push(base_fqn.clone());
        collect_ancestors(graph, base_fqn, ancestors, visited, path);
        path.pop();
    }
}

/// Abstract/protocol flags propagate from ancestors.
fn inherit_class_flags(graph: &mut ProjectGraph) {
    let fqns = class_def_fqns(graph);
    for fqn in fqns {
        let Some(ancestors) = graph.mro.get(&fqn).cloned() else {
            continue;
        };
        let mut is_abc = false;
        let mut is_protocol = false;
        for ancestor in &ancestors {
            if let Some(record) = graph.classes.get(ancestor) {
                is_abc |= record.is_abc;
                is_protocol |= record.is_protocol;
            }
        }
        if let Some(record) = graph.classes.get_mut(&fqn) {
            record.is_abc |= is_abc;
            record.is_protocol |= is_protocol;
        }
    }
}

/// Marks methods that override an abstract method of an ancestor, and
/// flags protocol members on definitions now that inheritance is known.
fn mark_abstract_overrides(graph: &mut ProjectGraph) {
    let mut updates: Vec<(String, bool, bool)> = Vec::new();
    for (fqn, def) in &graph.definitions {
        if def.kind != DefKind::Method {
            continue;
        }
        let Some(class_fqn) = def.enclosing_class.as_deref() else {
            continue;
        };
        let mut overrides_abstract = false;
        if let Some(ancestors) = graph.mro.get(class_fqn) {
            for ancestor in ancestors {
                if graph
                    .classes
                    .get(ancestor)
                    .is_some_and(|r| r.abstract_methods.contains(&def.simple_name))
                {
                    overrides_abstract = true;
                    break;
                }
            }
        }
        let protocol_member = graph
            .classes
            .get(class_fqn)
            .is_some_and(|r| r.is_protocol);
        if overrides_abstract || protocol_member {
            updates.push((fqn.clone(), overrides_abstract, protocol_member));
        }
    }
    for (fqn, overrides_abstract, protocol_member) in updates {
        if let Some(def) = graph.definitions.get_mut(&fqn) {
            def.flags.overrides_abstract |= overrides_abstract;
            def.flags.protocol_member |= protocol_member;
        }
    }
}

fn index_protocols(graph: &mut ProjectGraph) {
    let mut index: FxHashMap<String, FxHashSet<String>> = FxHashMap::default();
    for record in graph.classes.values() {
        if !record.is_protocol {
            continue;
        }
        for method in &record.methods {
            index
                .entry(method.clone())
                .or_default()
                .insert(record.fqn.clone());
        }
    }
    graph.protocol_methods = index;
}

/// A class covering enough of a protocol's surface is an implementer even
/// without inheriting it; its overlapping methods are credited as live.
fn compute_duck_implementers(graph: &mut ProjectGraph) {
    let mut protocol_surfaces: Vec<(String, FxHashSet<String>)> = graph
        .classes
        .values()
        .filter(|r| r.is_protocol)
        .map(|r| (r.fqn.clone(), r.methods.clone()))
        .collect();
    protocol_surfaces.sort_by(|a, b| a.0.cmp(&b.0));
    if protocol_surfaces.is_empty() {
        return;
    }

    let mut credited = FxHashSet::default();
    for record in graph.classes.values() {
        if record.is_protocol {
            continue;
        }
        for (_, surface) in &protocol_surfaces {
            if surface.is_empty() {
                continue;
            }
            let overlap: Vec<&String> = record.methods.intersection(surface).collect();
            if overlap.len() >= duck_typing_threshold(surface.len()) {
                for method in overlap {
                    credited.insert(format!("{}.{}", record.fqn, method));
                }
            }
        }
    }
    graph.duck_implementers = credited;
}

/// `__all__` names reference (and pin) the matching same-module defs.
fn apply_exports(graph: &mut ProjectGraph) {
    let mut new_refs = Vec::new();
    let exports: Vec<(String, Vec<String>)> = graph
        .exports
        .iter()
        .map(|(m, names)| (m.clone(), names.clone()))
        .collect();
    for (module, names) in exports {
        let file = graph.module_files.get(&module).cloned().unwrap_or_default();
        for name in names {
            let fqn = format!("{module}.{name}");
            if let Some(def) = graph.definitions.get_mut(&fqn) {
                def.flags.exported_via_all = true;
                new_refs.push(Reference {
                    kind: RefKind::Name,
                    name,
                    qualifier: None,
                    file: file.clone(),
                    line: def.line,
                    module: module.clone(),
                    enclosing_class: None,
                    enclosing_function: None,
                });
            }
        }
    }
    graph.references.extend(new_refs);
}
