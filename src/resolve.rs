use crate::merge::{lookup_class, ProjectGraph};
use crate::visitor::{DefKind, RefKind, Reference};
use globset::Glob;
use rayon::prelude::*;
use rustc_hash::{FxHashMap, FxHashSet};

/// Outcome of reference resolution: how many resolved references point at
/// each definition, and which in-project modules are imported anywhere.
#[derive(Debug, Default)]
pub struct Resolution {
    pub in_degree: FxHashMap<String, usize>,
    pub referenced_modules: FxHashSet<String>,
}

impl Resolution {
    pub fn in_degree_of(&self, fqn: &str) -> usize {
        self.in_degree.get(fqn).copied().unwrap_or(0)
    }
}

/// Side indexes rebuilt once per run to keep per-reference work cheap.
struct Indexes {
    /// simple name -> every fqn carrying it (string-dispatch shotgun).
    by_simple: FxHashMap<String, Vec<String>>,
    /// simple name -> method fqns (loose receiver-typed fallback).
    methods_by_simple: FxHashMap<String, Vec<String>>,
    /// Every (pattern, simple names it matches) for glob references.
    simple_names: Vec<String>,
}

fn build_indexes(graph: &ProjectGraph) -> Indexes {
    let mut by_simple: FxHashMap<String, Vec<String>> = FxHashMap::default();
    let mut methods_by_simple: FxHashMap<String, Vec<String>> = FxHashMap::default();
    for (fqn, def) in &graph.definitions {
        by_simple
            .entry(def.simple_name.clone())
            .or_default()
            .push(fqn.clone());
        if def.kind == DefKind::Method {
            methods_by_simple
                .entry(def.simple_name.clone())
                .or_default()
                .push(fqn.clone());
        }
    }
    let mut simple_names: Vec<String> = by_simple.keys().cloned().collect();
    simple_names.sort();
    Indexes {
        by_simple,
        methods_by_simple,
        simple_names,
    }
}

/// Resolves every reference against the project graph and accumulates the
/// in-degree map. References shard across the thread pool; the graph is
/// read-only throughout.
pub fn resolve(graph: &ProjectGraph) -> Resolution {
    let indexes = build_indexes(graph);

    graph
        .references
        .par_chunks(512)
        .map(|chunk| {
            let mut shard = Resolution::default();
            for reference in chunk {
                let mut targets = FxHashSet::default();
                resolve_reference(graph, &indexes, reference, &mut targets, &mut shard);
                for target in targets {
                    *shard.in_degree.entry(target).or_insert(0) += 1;
                }
            }
            shard
        })
        .reduce(Resolution::default, |mut acc, shard| {
            for (fqn, count) in shard.in_degree {
                *acc.in_degree.entry(fqn).or_insert(0) += count;
            }
            acc.referenced_modules.extend(shard.referenced_modules);
            acc
        })
}

fn resolve_reference(
    graph: &ProjectGraph,
    indexes: &Indexes,
    reference: &Reference,
    targets: &mut FxHashSet<String>,
    shard: &mut Resolution,
) {
    match reference.kind {
        RefKind::ImportTarget => {
            // The visitor already absolutized relative targets.
            if graph.definitions.contains_key(&reference.name) {
                targets.insert(reference.name.clone());
            }
            mark_module_use(graph, &reference.name, shard);
        }
        RefKind::Name => {
            resolve_bare_name(graph, reference, targets, shard);
        }
        RefKind::Decorator => match &reference.qualifier {
            Some(_) => resolve_chain(graph, indexes, reference, targets, shard),
            None => resolve_bare_name(graph, reference, targets, shard),
        },
        RefKind::BaseClass => {
            let dotted = match &reference.qualifier {
                Some(qualifier) => format!("{qualifier}.{}", reference.name),
                None => reference.name.clone(),
            };
            if let Some(fqn) = lookup_class(graph, &reference.module, &dotted) {
                targets.insert(fqn);
            }
        }
        RefKind::AttributeChain => resolve_chain(graph, indexes, reference, targets, shard),
        RefKind::StringDispatch => {
            // Shotgun match: any definition with this simple name could be
            // the dispatch target. Low selectivity by design; it only
            // rescues definitions, never incriminates them.
            if let Some(fqns) = indexes.by_simple.get(&reference.name) {
                targets.extend(fqns.iter().cloned());
            }
        }
        RefKind::StringGlob => {
            let Ok(glob) = Glob::new(&reference.name) else {
                return;
            };
            let matcher = glob.compile_matcher();
            for simple in &indexes.simple_names {
                if matcher.is_match(simple) {
                    if let Some(fqns) = indexes.by_simple.get(simple) {
                        targets.extend(fqns.iter().cloned());
                    }
                }
            }
        }
    }
}

/// Rule 1/6: parameters of enclosing functions, then import aliases, then
/// module globals.
fn resolve_bare_name(
    graph: &ProjectGraph,
    reference: &Reference,
    targets: &mut FxHashSet<String>,
    shard: &mut Resolution,
) {
    // Innermost-function-outward parameter lookup; class scopes are not
    // closure scopes and fall through naturally (no Parameter def there).
    if let Some(function) = &reference.enclosing_function {
        let mut scope = function.as_str();
        loop {
            let candidate = format!("{scope}.{}", reference.name);
            if graph
                .definitions
                .get(&candidate)
                .is_some_and(|d| d.kind == DefKind::Parameter)
            {
                targets.insert(candidate);
                return;
            }
            match scope.rsplit_once('.') {
                Some((prefix, _)) if prefix.contains('.') || prefix == reference.module => {
                    scope = prefix;
                }
                _ => break,
            }
        }
    }

    // Import alias: credit the aliased target when it is in-project, and
    // always credit the local import binding itself.
    if let Some(target) = graph.resolve_alias(&reference.module, &reference.name) {
        if graph.definitions.contains_key(target) {
            targets.insert(target.clone());
        }
        mark_module_use(graph, target, shard);
    }

    // Module global (the import binding is itself a module global).
    if let Some(fqn) = graph.module_global(&reference.module, &reference.name) {
        targets.insert(fqn);
    }
}

/// Rules 2-6 for qualified references.
fn resolve_chain(
    graph: &ProjectGraph,
    indexes: &Indexes,
    reference: &Reference,
    targets: &mut FxHashSet<String>,
    shard: &mut Resolution,
) {
    let Some(qualifier) = &reference.qualifier else {
        resolve_bare_name(graph, reference, targets, shard);
        return;
    };
    let segments: Vec<&str> = qualifier.split('.').collect();
    let root = segments[0];

    // Rule 2: self/cls/super resolve against the enclosing class and its
    // MRO; abstract ancestors are credited so overrides count for them.
    // A super() call skips the enclosing class itself, so an override
    // whose only mention is its own super-chaining still surfaces.
    if root == "self" || root == "cls" || root == "super" {
        let Some(class_fqn) = reference.enclosing_class.as_deref() else {
            return;
        };
        if root == "super" {
            resolve_ancestors(graph, class_fqn, &reference.name, targets);
            return;
        }
        if segments.len() == 1 {
            resolve_member(graph, class_fqn, &reference.name, targets);
            return;
        }
        // self.attr chains: follow the inferred instance-attribute types.
        let mut current = class_fqn.to_string();
        for attr in &segments[1..] {
            let Some(next) = graph
                .classes
                .get(&current)
                .and_then(|record| record.instance_attr_types.get(*attr))
            else {
                // Unknown receiver type: fall back to a loose method-name
                // match so an unseen receiver cannot incriminate anyone.
                loose_method_match(indexes, &reference.name, targets);
                return;
            };
            current = next.clone();
        }
        resolve_member(graph, &current, &reference.name, targets);
        return;
    }

    // Rule 3: chains rooted at an import alias.
    if let Some(alias_target) = graph.resolve_alias(&reference.module, root) {
        let mut chain = alias_target.clone();
        for segment in &segments[1..] {
            chain.push('.');
            chain.push_str(segment);
        }
        let full = format!("{chain}.{}", reference.name);
        if graph.definitions.contains_key(&full) {
            targets.insert(full);
            mark_module_use(graph, &chain, shard);
            return;
        }
        if graph
            .definitions
            .get(&chain)
            .is_some_and(|d| d.kind == DefKind::Class)
        {
            resolve_member(graph, &chain, &reference.name, targets);
            return;
        }
        mark_module_use(graph, &chain, shard);
    }

    // Rule 4: qualifier root is an in-project class name.
    if segments.len() == 1 {
        if let Some(class_fqn) = lookup_class(graph, &reference.module, root) {
            resolve_member(graph, &class_fqn, &reference.name, targets);
            if !targets.is_empty() {
                return;
            }
        }
    }

    // Rule 6: same-module dotted lookup (`CONST` via `mod.CONST` was rule
    // 3; this covers locals qualified by the module's own name).
    let dotted = format!("{qualifier}.{}", reference.name);
    if let Some(fqn) = graph.module_global(&reference.module, &dotted) {
        targets.insert(fqn);
        return;
    }
    if graph.definitions.contains_key(&dotted) {
        targets.insert(dotted);
        return;
    }

    // Fallback: loose method matching keeps unknown receivers from
    // producing false positives on methods.
    loose_method_match(indexes, &reference.name, targets);
}

/// MRO-aware member lookup: the class's own member plus every ancestor
/// that defines the same name.
fn resolve_member(
    graph: &ProjectGraph,
    class_fqn: &str,
    name: &str,
    targets: &mut FxHashSet<String>,
) {
    let own = format!("{class_fqn}.{name}");
    if graph.definitions.contains_key(&own) {
        targets.insert(own);
    }
    resolve_ancestors(graph, class_fqn, name, targets);
}

/// Credits every MRO ancestor defining `name`, abstract methods included.
fn resolve_ancestors(
    graph: &ProjectGraph,
    class_fqn: &str,
    name: &str,
    targets: &mut FxHashSet<String>,
) {
    if let Some(ancestors) = graph.mro.get(class_fqn) {
        for ancestor in ancestors {
            let inherited = format!("{ancestor}.{name}");
            if graph.definitions.contains_key(&inherited) {
                targets.insert(inherited);
            }
        }
    }
}

fn loose_method_match(indexes: &Indexes, name: &str, targets: &mut FxHashSet<String>) {
    if let Some(fqns) = indexes.methods_by_simple.get(name) {
        targets.extend(fqns.iter().cloned());
    }
}

/// Records that an in-project module (or one of its parents) is used.
fn mark_module_use(graph: &ProjectGraph, dotted: &str, shard: &mut Resolution) {
    if graph.modules.contains_key(dotted) {
        shard.referenced_modules.insert(dotted.to_string());
        return;
    }
    // `import a.b` also uses module a; `from p.q import r` uses p.q.
    if let Some((prefix, _)) = dotted.rsplit_once('.') {
        if graph.modules.contains_key(prefix) {
            shard.referenced_modules.insert(prefix.to_string());
        }
    }
}
