use crate::config::{Config, ConfigError, WhitelistMatcher};
use crate::entry_point;
use crate::framework::FrameworkVisitor;
use crate::implicit::TraceIndex;
use crate::merge::{self, FileReport, ProjectGraph};
use crate::penalty::{self, kind_rule_id, Score, ScoreCtx, UNUSED_FILE_RULE};
use crate::resolve::{self, Resolution};
use crate::rules::danger::{DangerFinding, DangerVisitor};
use crate::rules::quality::{QualityFinding, QualityVisitor};
use crate::rules::secrets::{scan_secrets, SecretFinding};
use crate::suppression;
use crate::utils::{count_loc, LineIndex};
use crate::visitor::{DefKind, DefRefVisitor};
use crate::walker::{FileWalker, SourceFile, DEFAULT_EXCLUDES};
use anyhow::{bail, Result};
use rayon::prelude::*;
use rustc_hash::{FxHashMap, FxHashSet};
use rustpython_parser::{parse, Mode};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::warn;

/// One reported dead definition (or dead file).
#[derive(Debug, Clone, Serialize)]
pub struct Finding {
    /// Fully qualified name.
    pub name: String,
    pub simple_name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub file: PathBuf,
    pub line: usize,
    pub confidence: u8,
    pub module: String,
    pub rule_id: String,
}

/// Summary block of the JSON report.
#[derive(Debug, Serialize)]
pub struct AnalysisSummary {
    pub total_files: usize,
    pub total_loc: usize,
    /// language -> file count; BTreeMap keeps the output deterministic.
    pub languages: BTreeMap<String, usize>,
    pub excluded_folders: Vec<String>,
}

/// Full analysis output. Serialized as-is when `--json` is requested;
/// every array is present even when empty.
#[derive(Debug, Serialize)]
pub struct AnalysisResult {
    pub unused_functions: Vec<Finding>,
    pub unused_methods: Vec<Finding>,
    pub unused_classes: Vec<Finding>,
    pub unused_imports: Vec<Finding>,
    pub unused_variables: Vec<Finding>,
    pub unused_parameters: Vec<Finding>,
    pub unused_files: Vec<Finding>,
    pub secrets: Vec<SecretFinding>,
    pub danger: Vec<DangerFinding>,
    pub quality: Vec<QualityFinding>,
    pub analysis_summary: AnalysisSummary,
}

impl AnalysisResult {
    /// Dead-code finding count, used by the CI gate.
    pub fn dead_code_count(&self) -> usize {
        self.unused_functions.len()
            + self.unused_methods.len()
            + self.unused_classes.len()
            + self.unused_imports.len()
            + self.unused_variables.len()
            + self.unused_parameters.len()
            + self.unused_files.len()
    }
}

/// Per-file output of stage 1: the symbol table plus collaborator
/// scanner findings.
struct ProcessedFile {
    report: FileReport,
    secrets: Vec<SecretFinding>,
    danger: Vec<DangerFinding>,
    quality: Vec<QualityFinding>,
    language: &'static str,
}

/// The analyzer. Holds the validated configuration and a cancel token
/// checked at file and stage boundaries.
pub struct Skylos {
    config: Config,
    whitelist: WhitelistMatcher,
    cancel: Arc<AtomicBool>,
}

impl Skylos {
    /// Validates the configuration; an invalid config is the only error
    /// that prevents the analyzer from producing a report.
    pub fn new(config: Config) -> Result<Self, ConfigError> {
        let whitelist = config.validate()?;
        Ok(Self {
            config,
            whitelist,
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Token a caller may flip to stop the run; partial results are not
    /// emitted after a cancel.
    pub fn cancel_token(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    fn check_cancel(&self) -> Result<()> {
        if self.cancel.load(Ordering::Relaxed) {
            bail!("analysis cancelled");
        }
        Ok(())
    }

    /// Runs the four-stage pipeline: per-file collection (parallel),
    /// merge (single-threaded, deterministic order), reference
    /// resolution (sharded), scoring (parallel).
    pub fn analyze(&self, root: &Path) -> Result<AnalysisResult> {
        let walker = FileWalker::new(&self.config.exclude_folders, &self.config.include_folders);
        let files = walker.collect(root);
        let total_files = files.len();
        let trace = TraceIndex::load(self.config.trace_file.as_deref(), root);

        // Stage 1: independent per-file walks.
        let processed: Vec<ProcessedFile> = files
            .par_iter()
            .map(|file| self.process_file(file, root))
            .collect();
        self.check_cancel()?;

        let mut languages: BTreeMap<String, usize> = BTreeMap::new();
        let mut all_secrets = Vec::new();
        let mut all_danger = Vec::new();
        let mut all_quality = Vec::new();
        let mut reports = Vec::with_capacity(processed.len());
        for p in processed {
            *languages.entry(p.language.to_string()).or_insert(0) += 1;
            all_secrets.extend(p.secrets);
            all_danger.extend(p.danger);
            all_quality.extend(p.quality);
            reports.push(p.report);
        }

        // Stage 2: deterministic merge (reports arrive in sorted file
        // order because the walker sorts and par_iter preserves order).
        let graph = merge::merge(reports, root);
        self.check_cancel()?;

        // Stage 3: reference resolution over the read-only graph.
        let resolution = resolve::resolve(&graph);
        self.check_cancel()?;

        // Stage 4: scoring, embarrassingly parallel per definition.
        let ctx = ScoreCtx {
            graph: &graph,
            resolution: &resolution,
            trace: &trace,
            whitelist: &self.whitelist,
        };
        let mut fqns: Vec<&String> = graph.definitions.keys().collect();
        fqns.sort();
        let scores: FxHashMap<String, Score> = fqns
            .par_iter()
            .map(|fqn| {
                let def = &graph.definitions[*fqn];
                ((*fqn).clone(), penalty::score_definition(def, &ctx))
            })
            .collect();
        self.check_cancel()?;

        let total_loc = graph.total_loc;
        let mut result = self.assemble(&graph, &resolution, &scores, &fqns);
        result.secrets = self.filter_collaborator(all_secrets, &graph, |f| {
            (f.file.clone(), f.line, f.rule_id.clone())
        });
        result.danger = self.filter_collaborator(all_danger, &graph, |f| {
            (f.file.clone(), f.line, f.rule_id.clone())
        });
        result.quality = self.filter_collaborator(all_quality, &graph, |f| {
            (f.file.clone(), f.line, f.rule_id.clone())
        });
        result.analysis_summary = AnalysisSummary {
            total_files,
            total_loc,
            languages,
            excluded_folders: DEFAULT_EXCLUDES
                .iter()
                .map(|s| (*s).to_string())
                .chain(self.config.exclude_folders.iter().cloned())
                .collect(),
        };
        Ok(result)
    }

    /// Stage 1 worker: parse, scan suppressions, run the visitors, and
    /// run the collaborator scanners. Parse failures contribute no
    /// definitions or references.
    fn process_file(&self, source_file: &SourceFile, root: &Path) -> ProcessedFile {
        let path = &source_file.path;
        if self.cancel.load(Ordering::Relaxed) {
            return ProcessedFile {
                report: empty_report(path.clone(), String::new()),
                secrets: Vec::new(),
                danger: Vec::new(),
                quality: Vec::new(),
                language: source_file.language.as_str(),
            };
        }
        let source = fs::read_to_string(path).unwrap_or_default();
        let line_index = LineIndex::new(&source);
        let label = path.to_string_lossy();
        let suppressions = suppression::scan(&source, &label);
        let module = merge::module_fqn(path, root);
        let loc = count_loc(&source);

        let secrets = if self.config.enable_secrets {
            scan_secrets(&source, path)
        } else {
            Vec::new()
        };

        let mut report = empty_report(path.clone(), module.clone());
        report.suppressions = suppressions;
        report.loc = loc;
        let mut danger = Vec::new();
        let mut quality = Vec::new();

        match parse(&source, Mode::Module, &label) {
            Ok(rustpython_ast::Mod::Module(module_ast)) => {
                let mut visitor = DefRefVisitor::new(path.clone(), module.clone(), &line_index);
                visitor.visit_body(&module_ast.body);

                let mut framework = FrameworkVisitor::new(
                    &line_index,
                    self.config.framework_detection,
                );
                framework.visit_body(&module_ast.body);
                for def in &mut visitor.definitions {
                    if framework.route_lines.contains(&def.line) {
                        def.flags.framework_route = true;
                    }
                }

                if self.config.enable_danger {
                    let mut danger_visitor = DangerVisitor::new(path.clone(), &line_index);
                    danger_visitor.visit_body(&module_ast.body);
                    danger = danger_visitor.findings;
                }
                if self.config.enable_quality {
                    let mut quality_visitor =
                        QualityVisitor::new(path.clone(), &line_index, &self.config.quality);
                    quality_visitor.visit_body(&module_ast.body);
                    quality = quality_visitor.findings;
                }

                report.main_guard_calls = entry_point::main_guard_calls(&module_ast.body);
                report.dynamic_dispatch = visitor.uses_dynamic_dispatch;
                report.references = visitor.references;
                report
                    .references
                    .append(&mut visitor.implicit.references);
                report.definitions = visitor.definitions;
                report.aliases = visitor.aliases;
                report.exports = visitor.exports;
                report.instance_attr_types = visitor.instance_attr_types;
            }
            Ok(_) => {}
            Err(err) => {
                warn!(file = %label, error = %err, "parse failure, skipping file");
            }
        }

        ProcessedFile {
            report,
            secrets,
            danger,
            quality,
            language: source_file.language.as_str(),
        }
    }

    /// Builds the categorized finding arrays from the scored graph.
    fn assemble(
        &self,
        graph: &ProjectGraph,
        resolution: &Resolution,
        scores: &FxHashMap<String, Score>,
        sorted_fqns: &[&String],
    ) -> AnalysisResult {
        let threshold = self.config.confidence;
        let mut unused_functions = Vec::new();
        let mut unused_methods = Vec::new();
        let mut unused_classes = Vec::new();
        let mut unused_imports = Vec::new();
        let mut unused_variables = Vec::new();
        let mut unused_parameters = Vec::new();
        let mut reported: FxHashSet<&str> = FxHashSet::default();
        let mut dead_classes: FxHashMap<&str, u8> = FxHashMap::default();

        let push_finding = |def: &crate::visitor::Definition,
                            confidence: u8,
                            bucket: &mut Vec<Finding>| {
            bucket.push(Finding {
                name: def.fqn.clone(),
                simple_name: def.simple_name.clone(),
                kind: def.kind.as_str().to_string(),
                file: def.file.clone(),
                line: def.line,
                confidence,
                module: def.module.clone(),
                rule_id: kind_rule_id(def.kind).to_string(),
            });
        };

        for fqn in sorted_fqns {
            let def = &graph.definitions[*fqn];
            let score = scores[*fqn];
            if score.pin.is_some() || score.confidence < threshold {
                continue;
            }
            if self.rule_ignored(kind_rule_id(def.kind)) {
                continue;
            }
            reported.insert(def.fqn.as_str());
            match def.kind {
                DefKind::Function => push_finding(def, score.confidence, &mut unused_functions),
                DefKind::Method => push_finding(def, score.confidence, &mut unused_methods),
                DefKind::Class => {
                    dead_classes.insert(def.fqn.as_str(), score.confidence);
                    push_finding(def, score.confidence, &mut unused_classes);
                }
                DefKind::Import => push_finding(def, score.confidence, &mut unused_imports),
                DefKind::Variable | DefKind::Constant => {
                    push_finding(def, score.confidence, &mut unused_variables)
                }
                DefKind::Parameter => push_finding(def, score.confidence, &mut unused_parameters),
                // Pinned kinds; unreachable with a pin, but harmless.
                DefKind::DataclassField | DefKind::EnumMember => {}
            }
        }

        // A dead class drags its methods with it: internal references
        // (self calls) cannot rescue a method nobody can ever reach.
        if !dead_classes.is_empty() && !self.rule_ignored("SKY-U002") {
            for fqn in sorted_fqns {
                let def = &graph.definitions[*fqn];
                if def.kind != DefKind::Method || reported.contains(def.fqn.as_str()) {
                    continue;
                }
                let Some(class_confidence) = def
                    .enclosing_class
                    .as_deref()
                    .and_then(|c| dead_classes.get(c).copied())
                else {
                    continue;
                };
                if scores[*fqn].pin.is_some() {
                    continue;
                }
                push_finding(def, class_confidence, &mut unused_methods);
            }
        }

        let unused_files = self.collect_unused_files(graph, resolution, scores);

        for bucket in [
            &mut unused_functions,
            &mut unused_methods,
            &mut unused_classes,
            &mut unused_imports,
            &mut unused_variables,
            &mut unused_parameters,
        ] {
            bucket.sort_by(|a, b| {
                (&a.file, a.line, &a.kind, &a.name).cmp(&(&b.file, b.line, &b.kind, &b.name))
            });
        }

        AnalysisResult {
            unused_functions,
            unused_methods,
            unused_classes,
            unused_imports,
            unused_variables,
            unused_parameters,
            unused_files,
            secrets: Vec::new(),
            danger: Vec::new(),
            quality: Vec::new(),
            analysis_summary: AnalysisSummary {
                total_files: 0,
                total_loc: 0,
                languages: BTreeMap::new(),
                excluded_folders: Vec::new(),
            },
        }
    }

    /// A module nobody imports, all of whose definitions scored dead, is
    /// itself dead.
    fn collect_unused_files(
        &self,
        graph: &ProjectGraph,
        resolution: &Resolution,
        scores: &FxHashMap<String, Score>,
    ) -> Vec<Finding> {
        if self.rule_ignored(UNUSED_FILE_RULE) {
            return Vec::new();
        }
        let threshold = self.config.confidence;
        let mut findings = Vec::new();
        let mut modules: Vec<(&String, &Vec<String>)> = graph.modules.iter().collect();
        modules.sort_by(|a, b| a.0.cmp(b.0));

        for (module, fqns) in modules {
            if fqns.is_empty()
                || resolution.referenced_modules.contains(module)
                || graph.main_guard.contains_key(module)
            {
                continue;
            }
            let Some(file) = graph.module_files.get(module) else {
                continue;
            };
            if file.ends_with("__init__.py") || crate::utils::is_test_path(&file.to_string_lossy())
            {
                continue;
            }
            let mut min_confidence = 100u8;
            let all_dead = fqns.iter().all(|fqn| {
                let score = scores[fqn];
                let dead = score.pin.is_none() && score.confidence >= threshold;
                if dead {
                    min_confidence = min_confidence.min(score.confidence);
                }
                dead
            });
            if !all_dead {
                continue;
            }
            let simple = module.rsplit('.').next().unwrap_or(module).to_string();
            findings.push(Finding {
                name: module.clone(),
                simple_name: simple,
                kind: "file".to_string(),
                file: file.clone(),
                line: 1,
                confidence: min_confidence,
                module: module.clone(),
                rule_id: UNUSED_FILE_RULE.to_string(),
            });
        }
        findings.sort_by(|a, b| (&a.file, a.line).cmp(&(&b.file, b.line)));
        findings
    }

    fn rule_ignored(&self, rule_id: &str) -> bool {
        self.config.ignore_rules.iter().any(|r| r == rule_id)
    }

    /// Applies per-line and rule-scoped suppressions plus the global
    /// ignore list to collaborator scanner findings.
    fn filter_collaborator<T>(
        &self,
        findings: Vec<T>,
        graph: &ProjectGraph,
        key: impl Fn(&T) -> (PathBuf, usize, String),
    ) -> Vec<T> {
        findings
            .into_iter()
            .filter(|finding| {
                let (file, line, rule_id) = key(finding);
                if self.rule_ignored(&rule_id) {
                    return false;
                }
                !graph
                    .suppressions
                    .get(&file)
                    .is_some_and(|s| s.is_rule_suppressed(line, &rule_id))
            })
            .collect()
    }
}

fn empty_report(file: PathBuf, module: String) -> FileReport {
    FileReport {
        file,
        module,
        definitions: Vec::new(),
        references: Vec::new(),
        aliases: Vec::new(),
        exports: Vec::new(),
        instance_attr_types: FxHashMap::default(),
        suppressions: suppression::scan("", ""),
        main_guard_calls: FxHashSet::default(),
        dynamic_dispatch: false,
        loc: 0,
    }
}
