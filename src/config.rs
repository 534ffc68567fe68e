//! Optimizer configuration
//!
//! Every pass can be switched off individually. Configurations are plain
//! TOML documents; missing keys keep their defaults.
//!
//! ```toml
//! enable_jump_threading = true
//! enable_substring_search = true
//! enable_atomic_rewrite = true
//! single_atomic_rewrite = false
//! extract_starting_ranges = true
//! alternation_strategy = "auto"   # "auto" | "chain" | "trie"
//! ```

use std::path::Path;

use serde::Deserialize;

use crate::bytecode::optimizer::AlternationStrategy;

/// Errors while loading a configuration
#[derive(Debug)]
pub enum ConfigError {
    /// The file could not be read
    Io(std::io::Error),
    /// The content is not a valid configuration
    Parse(toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "Failed to read optimizer config: {}", e),
            Self::Parse(e) => write!(f, "Invalid optimizer config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Parse(e) => Some(e),
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        Self::Parse(e)
    }
}

/// Which passes run and how alternations are laid out
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OptimizerConfig {
    /// Remove zero-offset jumps and forks
    pub enable_jump_threading: bool,
    /// Detect programs that reduce to a literal
    pub enable_substring_search: bool,
    /// Promote provably safe loops to atomic forks
    pub enable_atomic_rewrite: bool,
    /// Stop after the first atomic rewrite of a run
    pub single_atomic_rewrite: bool,
    /// Compute starting ranges and the start-of-line flag
    pub extract_starting_ranges: bool,
    /// Layout used by [`ByteCode::append_alternation`](crate::bytecode::ByteCode::append_alternation)
    pub alternation_strategy: AlternationStrategy,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            enable_jump_threading: true,
            enable_substring_search: true,
            enable_atomic_rewrite: true,
            single_atomic_rewrite: false,
            extract_starting_ranges: true,
            alternation_strategy: AlternationStrategy::Auto,
        }
    }
}

impl OptimizerConfig {
    /// Configuration with every pass disabled
    pub fn disabled() -> Self {
        Self {
            enable_jump_threading: false,
            enable_substring_search: false,
            enable_atomic_rewrite: false,
            single_atomic_rewrite: false,
            extract_starting_ranges: false,
            alternation_strategy: AlternationStrategy::Chain,
        }
    }

    /// Parse a configuration from TOML content.
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Load a configuration from a TOML file path.
    pub fn load_from_toml_path(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }
}
