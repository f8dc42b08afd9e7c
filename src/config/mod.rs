// Configuration management
// TOML file in the config directory plus interactive setup

pub mod interactive;
pub mod settings;


use std::path::PathBuf;

pub use interactive::{run_interactive_config, show_config};
pub use settings::{
    AssistantConfig, CompletionConfig, Config, ConfigError, DocumentsConfig, IndexConfig,
    MemoryConfig, OllamaConfig, SupportConfig,
};

/// Resolve the configuration directory: the explicit override, else `~/.shop-rag`
#[inline]
pub fn get_config_dir(override_dir: Option<PathBuf>) -> Result<PathBuf, ConfigError> {
    match override_dir {
        Some(dir) => Ok(dir),
        None => Config::default_dir(),
    }
}
