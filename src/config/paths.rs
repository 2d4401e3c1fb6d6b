use crate::config::ConfigError;
use std::path::PathBuf;

pub const GLOBAL_STATE_DIR: &str = ".stepledger";
pub const GLOBAL_SETTINGS_FILE_NAME: &str = "config.yaml";
pub const CONFIG_PATH_ENV: &str = "STEPLEDGER_CONFIG";

fn home_dir() -> Result<PathBuf, ConfigError> {
    std::env::var_os("HOME")
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
        .ok_or(ConfigError::HomeDirectoryUnavailable)
}

pub fn default_state_root() -> Result<PathBuf, ConfigError> {
    Ok(home_dir()?.join(GLOBAL_STATE_DIR))
}

/// `$STEPLEDGER_CONFIG` when set, otherwise `~/.stepledger/config.yaml`.
pub fn default_global_config_path() -> Result<PathBuf, ConfigError> {
    if let Some(path) = std::env::var_os(CONFIG_PATH_ENV).filter(|value| !value.is_empty()) {
        return Ok(PathBuf::from(path));
    }
    Ok(default_state_root()?.join(GLOBAL_SETTINGS_FILE_NAME))
}
