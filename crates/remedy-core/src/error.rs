//! Error types shared across remedy crates

use std::path::PathBuf;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("io error reading {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// TOML could not be parsed
    #[error("invalid config syntax: {0}")]
    Parse(String),

    /// A field failed validation
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
