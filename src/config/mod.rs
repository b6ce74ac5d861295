// Configuration management module
// This module will handle TOML configuration management and settings

pub mod interactive;
pub mod settings;


pub use interactive::{run_interactive_config, show_config};
pub use settings::{
    Config, ConfigError, GenerationConfig, OllamaConfig, RerankerConfig, RetrievalConfig,
};

use std::path::PathBuf;

/// Get the configuration directory path (`~/.tutor-mcp`)
#[inline]
pub fn get_config_dir() -> Result<PathBuf, ConfigError> {
    dirs::home_dir()
        .map(|home| home.join(".tutor-mcp"))
        .or_else(|| {
            // Windows installs without a resolvable home still have a data dir
            dirs::data_dir().map(|data| data.join("tutor-mcp"))
        })
        .ok_or(ConfigError::DirectoryError)
}
