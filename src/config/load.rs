use super::{ClientConfig, ConfigError, API_BASE_ENV, CONFIG_PATH_ENV};
use std::path::{Path, PathBuf};

/// Resolves the config file (explicit path, then `TESTDECK_CONFIG`, then
/// built-in defaults), applies env overrides and validates the result.
pub fn load_client_config(explicit: Option<&Path>) -> Result<ClientConfig, ConfigError> {
    let path = explicit.map(Path::to_path_buf).or_else(|| {
        std::env::var_os(CONFIG_PATH_ENV)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
    });
    let mut config = match path {
        Some(path) => ClientConfig::from_path(&path)?,
        None => ClientConfig::default(),
    };
    apply_env_overrides(&mut config);
    config.validate()?;
    Ok(config)
}

pub fn apply_env_overrides(config: &mut ClientConfig) {
    if let Some(api_base) = std::env::var(API_BASE_ENV)
        .ok()
        .filter(|v| !v.trim().is_empty())
    {
        config.api_base = api_base.trim().to_string();
    }
}
