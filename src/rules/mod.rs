// Collaborator scanners layered on the shared AST walk and suppression
// machinery. Their findings pass through the report unchanged.

/// Hardcoded secret detection (regex bank).
pub mod secrets;

/// Dangerous call sinks (code execution, shell, deserialization).
pub mod danger;

/// Structural quality rules (nesting, length, args, complexity).
pub mod quality;
