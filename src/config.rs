use globset::{Glob, GlobSet, GlobSetBuilder};
use rustc_hash::FxHashMap;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while validating the analyzer configuration.
///
/// These fail fast, before any file is walked, and map to exit code 2.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("confidence threshold must be between 0 and 100, got {0}")]
    InvalidThreshold(u16),
    #[error("invalid whitelist pattern '{pattern}': {source}")]
    InvalidWhitelistPattern {
        pattern: String,
        source: globset::Error,
    },
}

/// Thresholds for the quality collaborator rules.
#[derive(Debug, Clone)]
pub struct QualityConfig {
    /// Maximum branch complexity per function before SKY-Q004 fires.
    pub complexity: usize,
    /// Maximum statement nesting depth before SKY-Q001 fires.
    pub nesting: usize,
    /// Maximum number of formal parameters before SKY-Q003 fires.
    pub max_args: usize,
    /// Maximum function body length in lines before SKY-Q002 fires.
    pub max_lines: usize,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            complexity: 10,
            nesting: 5,
            max_args: 6,
            max_lines: 100,
        }
    }
}

/// Whitelist entries supplied by project configuration.
///
/// The loader (out of scope here) is responsible for flattening per-path
/// overrides and dropping expired `temporary` entries; the core merges the
/// three sources into one glob matcher over simple names.
#[derive(Debug, Clone, Default)]
pub struct Whitelist {
    /// Plain glob patterns over simple names.
    pub names: Vec<String>,
    /// name -> reason; the reason is informational only.
    pub documented: FxHashMap<String, String>,
    /// name -> reason; already filtered to non-expired entries by the loader.
    pub temporary: FxHashMap<String, String>,
}

/// Compiled matcher over whitelisted simple names.
pub struct WhitelistMatcher {
    set: GlobSet,
}

impl WhitelistMatcher {
    /// Compiles the whitelist into a single glob set.
    pub fn compile(whitelist: &Whitelist) -> Result<Self, ConfigError> {
        let mut builder = GlobSetBuilder::new();
        let patterns = whitelist
            .names
            .iter()
            .chain(whitelist.documented.keys())
            .chain(whitelist.temporary.keys());
        for pattern in patterns {
            let glob = Glob::new(pattern).map_err(|source| ConfigError::InvalidWhitelistPattern {
                pattern: pattern.clone(),
                source,
            })?;
            builder.add(glob);
        }
        // GlobSetBuilder::build only fails on malformed globs, which were
        // already rejected above.
        let set = builder.build().map_err(|source| {
            ConfigError::InvalidWhitelistPattern {
                pattern: String::new(),
                source,
            }
        })?;
        Ok(Self { set })
    }

    /// An empty matcher that matches nothing.
    pub fn empty() -> Self {
        Self {
            set: GlobSetBuilder::new().build().expect("empty glob set"),
        }
    }

    pub fn matches(&self, simple_name: &str) -> bool {
        self.set.is_match(simple_name)
    }
}

/// Immutable analyzer configuration.
///
/// The CLI (or an external config loader) builds this value; `validate`
/// must succeed before the analyzer runs.
#[derive(Debug, Clone)]
pub struct Config {
    /// Findings below this confidence are dropped (0-100).
    pub confidence: u8,
    /// Path fragments excluded from the walk, on top of the default set.
    pub exclude_folders: Vec<String>,
    /// Folder names walked even when an exclude rule matches them.
    pub include_folders: Vec<String>,
    /// Rule ids suppressed globally (e.g. "SKY-D001").
    pub ignore_rules: Vec<String>,
    /// Whitelisted simple names, merged into a glob matcher.
    pub whitelist: Whitelist,
    /// Thresholds for the quality rules.
    pub quality: QualityConfig,
    /// Optional runtime trace file, resolved relative to the project root.
    pub trace_file: Option<PathBuf>,
    /// Enable the secrets scanner.
    pub enable_secrets: bool,
    /// Enable the dangerous-sink scanner.
    pub enable_danger: bool,
    /// Enable the quality scanner.
    pub enable_quality: bool,
    /// Recognize framework decorator patterns as implicit roots.
    pub framework_detection: bool,
    /// CI gate: exit 1 when more than this many dead-code findings remain.
    pub gate: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            confidence: 60,
            exclude_folders: Vec::new(),
            include_folders: Vec::new(),
            ignore_rules: Vec::new(),
            whitelist: Whitelist::default(),
            quality: QualityConfig::default(),
            trace_file: None,
            enable_secrets: false,
            enable_danger: false,
            enable_quality: false,
            framework_detection: true,
            gate: None,
        }
    }
}

impl Config {
    /// Validates the configuration and compiles the whitelist matcher.
    ///
    /// Called once before any file is read; a failure here is the only
    /// error that aborts the run.
    pub fn validate(&self) -> Result<WhitelistMatcher, ConfigError> {
        if self.confidence > 100 {
            return Err(ConfigError::InvalidThreshold(u16::from(self.confidence)));
        }
        WhitelistMatcher::compile(&self.whitelist)
    }
}
