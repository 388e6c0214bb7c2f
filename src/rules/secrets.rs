use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// A hardcoded-secret finding.
#[derive(Debug, Clone, Serialize)]
pub struct SecretFinding {
    pub message: String,
    /// Rule id ("SKY-S101").
    pub rule_id: String,
    pub file: PathBuf,
    pub line: usize,
    pub severity: String,
}

lazy_static! {
    /// (description, pattern) pairs applied per line.
    static ref SECRET_PATTERNS: Vec<(&'static str, Regex)> = vec![
        (
            "AWS Access Key",
            Regex::new(r#"(?i)aws_access_key_id\s*=\s*['"][A-Z0-9]{20}['"]"#).unwrap(),
        ),
        (
            "AWS Secret Key",
            Regex::new(r#"(?i)aws_secret_access_key\s*=\s*['"][A-Za-z0-9/+=]{40}['"]"#).unwrap(),
        ),
        (
            "GitHub Token",
            Regex::new(r#"['"]gh[pousr]_[A-Za-z0-9]{36,}['"]"#).unwrap(),
        ),
        (
            "GitLab PAT",
            Regex::new(r#"['"]glpat-[A-Za-z0-9_\-]{20,}['"]"#).unwrap(),
        ),
        (
            "Slack Token",
            Regex::new(r#"['"]xox[baprs]-[A-Za-z0-9-]{10,}['"]"#).unwrap(),
        ),
        (
            "Stripe Key",
            Regex::new(r#"['"][sp]k_live_[A-Za-z0-9]{16,}['"]"#).unwrap(),
        ),
        (
            "Private Key",
            Regex::new(r"-----BEGIN (?:RSA |EC |OPENSSH )?PRIVATE KEY-----").unwrap(),
        ),
        (
            "Generic API Key",
            Regex::new(r#"(?i)(api_key|apikey|secret|token)\s*=\s*['"][A-Za-z0-9_\-]{20,}['"]"#)
                .unwrap(),
        ),
    ];
}

/// Scans file content line by line against the secret pattern bank.
/// Full-line comments and lines carrying a suppression token are skipped.
pub fn scan_secrets(content: &str, file_path: &Path) -> Vec<SecretFinding> {
    let mut findings = Vec::new();
    for (line_idx, line) in content.lines().enumerate() {
        if line.trim_start().starts_with('#') {
            continue;
        }
        if line.contains("pragma: no skylos") || line.contains("skylos: ignore") {
            continue;
        }
        for (name, regex) in SECRET_PATTERNS.iter() {
            if regex.is_match(line) {
                findings.push(SecretFinding {
                    message: format!("Found potential {name}"),
                    rule_id: "SKY-S101".to_string(),
                    file: file_path.to_path_buf(),
                    line: line_idx + 1,
                    severity: "HIGH".to_string(),
                });
            }
        }
    }
    findings
}
