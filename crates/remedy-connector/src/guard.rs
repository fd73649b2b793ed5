//! Command safety guard
//!
//! Static deny-list applied to every literal command before it reaches a
//! connector. Independent of policy evaluation: a match is final.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Deny-list rule that matched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardRule {
    /// Recursive delete of `/`, `~` or a top-level system directory
    RecursiveRootDelete,
    /// Raw write to a block device
    BlockDeviceWrite,
    /// `DROP TABLE` / `DROP DATABASE` / `DROP SCHEMA`
    SchemaDrop,
    /// Filesystem creation or signature wipe
    FilesystemFormat,
    /// Shell fork bomb
    ForkBomb,
}

impl GuardRule {
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            GuardRule::RecursiveRootDelete => "recursive_root_delete",
            GuardRule::BlockDeviceWrite => "block_device_write",
            GuardRule::SchemaDrop => "schema_drop",
            GuardRule::FilesystemFormat => "filesystem_format",
            GuardRule::ForkBomb => "fork_bomb",
        }
    }
}

impl std::fmt::Display for GuardRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A rejected command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardViolation {
    pub rule: GuardRule,
    pub command: String,
}

impl std::fmt::Display for GuardViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "forbidden_command: {} in '{}'", self.rule, self.command)
    }
}

const RAW_PATTERNS: [(GuardRule, &str); 5] = [
    (
        GuardRule::BlockDeviceWrite,
        r"(?i)\bdd\b.*\bof=/dev/(?:sd|hd|vd|xvd|nvme|mmcblk|disk|md|dm-|mapper/)",
    ),
    (
        GuardRule::BlockDeviceWrite,
        r"(?i)>\s*/dev/(?:sd|hd|vd|xvd|nvme|mmcblk|disk)[a-z0-9]*",
    ),
    (GuardRule::SchemaDrop, r"(?i)\bdrop\s+(?:table|database|schema)\b"),
    (
        GuardRule::FilesystemFormat,
        r"(?i)(?:^|[\s;&|(`/])(?:mkfs(?:\.[a-z0-9]+)?|mke2fs|mkswap|wipefs)\b",
    ),
    (GuardRule::ForkBomb, r":\(\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;\s*:"),
];

/// Compiled deny patterns. A pattern that fails to compile is kept as `None`
/// and matches every command.
static PATTERNS: Lazy<Vec<(GuardRule, Option<Regex>)>> = Lazy::new(|| {
    RAW_PATTERNS
        .into_iter()
        .map(|(rule, pattern)| {
            let compiled = Regex::new(pattern)
                .map_err(|e| tracing::error!(%rule, error = %e, "guard pattern failed to compile"))
                .ok();
            (rule, compiled)
        })
        .collect()
});

/// Paths whose recursive removal is never allowed, trailing `/` and `*` stripped.
/// `${HOME}` is folded to `$HOME` before lookup.
const PROTECTED_PATHS: &[&str] = &[
    "", "~", "$HOME", "/.", "/bin", "/boot", "/dev", "/etc", "/home", "/lib", "/lib64",
    "/opt", "/proc", "/root", "/sbin", "/srv", "/sys", "/usr", "/var",
];

/// Check a command against the deny-list
///
/// # Errors
/// Returns the first [`GuardViolation`] found.
pub fn check_command(command: &str) -> Result<(), GuardViolation> {
    let violation = |rule| GuardViolation {
        rule,
        command: command.to_string(),
    };

    for (rule, pattern) in PATTERNS.iter() {
        if pattern.as_ref().map_or(true, |re| re.is_match(command)) {
            return Err(violation(*rule));
        }
    }

    if command
        .split(|c| matches!(c, ';' | '\n' | '|' | '&'))
        .any(is_recursive_root_delete)
    {
        return Err(violation(GuardRule::RecursiveRootDelete));
    }

    Ok(())
}

/// Whether a command is forbidden
#[inline]
#[must_use]
pub fn is_forbidden(command: &str) -> bool {
    check_command(command).is_err()
}

/// Strip quoting and command-substitution wrappers, keeping `$` on variables
fn clean_token(token: &str) -> String {
    let token = token.strip_prefix("$(").unwrap_or(token);
    token
        .trim_matches(|c| matches!(c, '"' | '\'' | '`' | '(' | ')'))
        .replace("${HOME}", "$HOME")
}

/// `rm` with a recursive flag aimed at a protected path, or `--no-preserve-root`
fn is_recursive_root_delete(segment: &str) -> bool {
    let tokens: Vec<String> = segment.split_whitespace().map(clean_token).collect();
    let Some(rm_at) = tokens
        .iter()
        .position(|t| t == "rm" || t.ends_with("/rm"))
    else {
        return false;
    };

    let mut recursive = false;
    let mut protected_target = false;
    for token in &tokens[rm_at + 1..] {
        if token == "--no-preserve-root" {
            return true;
        }
        if token == "--recursive" {
            recursive = true;
        } else if token.starts_with('-') && !token.starts_with("--") {
            recursive |= token.contains('r') || token.contains('R');
        } else {
            let normalized = token.trim_end_matches('*').trim_end_matches('/');
            protected_target |= PROTECTED_PATHS.contains(&normalized);
        }
    }
    recursive && protected_target
}
