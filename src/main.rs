use anyhow::Result;
use clap::Parser;
use colored::*;
use skylos::analyzer::{AnalysisResult, Finding, Skylos};
use skylos::config::{Config, QualityConfig, Whitelist};
use std::path::PathBuf;
use std::process::ExitCode;

/// Dead-code-first static analyzer for Python source trees.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Root of the Python project to analyze.
    path: PathBuf,

    /// Confidence threshold (0-100); findings below it are dropped.
    #[arg(short, long, default_value_t = 60)]
    confidence: u8,

    /// Folder name fragments to exclude, on top of the default set.
    #[arg(long = "exclude-folder", value_name = "FOLDER")]
    exclude_folders: Vec<String>,

    /// Folder names to walk even when an exclude rule matches them.
    #[arg(long = "include-folder", value_name = "FOLDER")]
    include_folders: Vec<String>,

    /// Runtime trace file (JSON), resolved relative to the project root.
    #[arg(long, value_name = "FILE")]
    trace_file: Option<PathBuf>,

    /// Glob patterns over simple names that are never reported.
    #[arg(long = "whitelist", value_name = "GLOB")]
    whitelist: Vec<String>,

    /// Rule ids suppressed globally (e.g. SKY-D001).
    #[arg(long = "ignore", value_name = "RULE-ID")]
    ignore: Vec<String>,

    /// Scan for hardcoded secrets.
    #[arg(long)]
    secrets: bool,

    /// Scan for dangerous call sinks.
    #[arg(long)]
    danger: bool,

    /// Scan for structural quality issues.
    #[arg(long)]
    quality: bool,

    /// Disable framework decorator recognition.
    #[arg(long)]
    no_frameworks: bool,

    /// Exit 1 when more than this many dead-code findings remain.
    #[arg(long, value_name = "N")]
    gate: Option<usize>,

    /// Emit the raw JSON report on stdout (nothing else).
    #[arg(long)]
    json: bool,
}

fn main() -> ExitCode {
    // Diagnostics always go to stderr so --json output stays parseable.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config {
        confidence: cli.confidence,
        exclude_folders: cli.exclude_folders.clone(),
        include_folders: cli.include_folders.clone(),
        ignore_rules: cli.ignore.clone(),
        whitelist: Whitelist {
            names: cli.whitelist.clone(),
            ..Whitelist::default()
        },
        quality: QualityConfig::default(),
        trace_file: cli.trace_file.clone(),
        enable_secrets: cli.secrets,
        enable_danger: cli.danger,
        enable_quality: cli.quality,
        framework_detection: !cli.no_frameworks,
        gate: cli.gate,
    };

    // Configuration errors fail fast, before any file is read.
    let skylos = match Skylos::new(config) {
        Ok(skylos) => skylos,
        Err(err) => {
            eprintln!("configuration error: {err}");
            return ExitCode::from(2);
        }
    };

    let result = match skylos.analyze(&cli.path) {
        Ok(result) => result,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::from(2);
        }
    };

    if cli.json {
        match serde_json::to_string_pretty(&result) {
            Ok(json) => println!("{json}"),
            Err(err) => {
                eprintln!("error: {err}");
                return ExitCode::from(2);
            }
        }
    } else if let Err(err) = print_report(&cli, &result) {
        eprintln!("error: {err}");
        return ExitCode::from(2);
    }

    // CI gate: too many findings fail the run.
    if let Some(gate) = cli.gate {
        if result.dead_code_count() > gate {
            return ExitCode::from(1);
        }
    }
    ExitCode::SUCCESS
}

fn print_report(cli: &Cli, result: &AnalysisResult) -> Result<()> {
    println!("\n{}", "Python Static Analysis Results".bold());
    println!("===================================\n");

    println!("Summary:");
    println!(
        " * Files scanned: {} ({} lines)",
        result.analysis_summary.total_files, result.analysis_summary.total_loc
    );
    print_count("Unreachable functions", result.unused_functions.len());
    print_count("Unreachable methods", result.unused_methods.len());
    print_count("Unused classes", result.unused_classes.len());
    print_count("Unused imports", result.unused_imports.len());
    print_count("Unused variables", result.unused_variables.len());
    print_count("Unused parameters", result.unused_parameters.len());
    print_count("Unused files", result.unused_files.len());
    if cli.secrets {
        println!(" * Secrets found: {}", result.secrets.len());
    }
    if cli.danger {
        println!(" * Security issues: {}", result.danger.len());
    }
    if cli.quality {
        println!(" * Quality issues: {}", result.quality.len());
    }

    print_findings("Unreachable Functions", &result.unused_functions);
    print_findings("Unreachable Methods", &result.unused_methods);
    print_findings("Unused Classes", &result.unused_classes);
    print_findings("Unused Imports", &result.unused_imports);
    print_findings("Unused Variables", &result.unused_variables);
    print_findings("Unused Parameters", &result.unused_parameters);
    print_findings("Unused Files", &result.unused_files);

    if cli.danger && !result.danger.is_empty() {
        println!("\n - Security Issues");
        println!("==================");
        for (i, f) in result.danger.iter().enumerate() {
            println!(
                " {}. {} [{}] ({}:{}) Severity: {}",
                i + 1,
                f.message,
                f.rule_id,
                f.file.display(),
                f.line,
                f.severity
            );
        }
    }

    if cli.secrets && !result.secrets.is_empty() {
        println!("\n - Secrets");
        println!("==========");
        for (i, s) in result.secrets.iter().enumerate() {
            println!(
                " {}. {} [{}] ({}:{}) Severity: {}",
                i + 1,
                s.message,
                s.rule_id,
                s.file.display(),
                s.line,
                s.severity
            );
        }
    }

    if cli.quality && !result.quality.is_empty() {
        println!("\n - Quality Issues");
        println!("=================");
        for (i, q) in result.quality.iter().enumerate() {
            println!(
                " {}. {} [{}] ({}:{}) Severity: {}",
                i + 1,
                q.message,
                q.rule_id,
                q.file.display(),
                q.line,
                q.severity
            );
        }
    }

    Ok(())
}

fn print_count(label: &str, count: usize) {
    if count > 0 {
        println!(" * {label}: {count}");
    }
}

fn print_findings(title: &str, findings: &[Finding]) {
    if findings.is_empty() {
        return;
    }
    println!("\n - {title}");
    println!("{}", "=".repeat(title.len() + 4));
    for (i, finding) in findings.iter().enumerate() {
        println!(
            " {}. {} ({}%)",
            i + 1,
            finding.name,
            finding.confidence
        );
        println!("    └─ {}:{}", finding.file.display(), finding.line);
    }
}
