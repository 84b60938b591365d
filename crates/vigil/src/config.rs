//! Configuration file handling.
//!
//! Looks for `.config/vigil.styx` in the current directory or any parent directory.

pub use vigil_config::Config;

use std::path::{Path, PathBuf};

const CONFIG_FILE: &str = ".config/vigil.styx";

/// Load configuration from `.config/vigil.styx`, searching up the directory tree.
pub fn load() -> Result<(Config, PathBuf), ConfigError> {
    let cwd = std::env::current_dir().map_err(|e| ConfigError::Io(e.to_string()))?;
    load_from(&cwd)
}

/// Load configuration starting from a specific directory.
pub fn load_from(start: &Path) -> Result<(Config, PathBuf), ConfigError> {
    let config_path = find_config_file(start)?;
    let content =
        std::fs::read_to_string(&config_path).map_err(|e| ConfigError::Io(e.to_string()))?;
    let config = parse(&content)?;
    tracing::debug!(path = %config_path.display(), "configuration loaded");
    Ok((config, config_path))
}

/// Parse the contents of a configuration file.
pub fn parse(content: &str) -> Result<Config, ConfigError> {
    facet_styx::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
}

fn find_config_file(start: &Path) -> Result<PathBuf, ConfigError> {
    let mut current = start.to_path_buf();

    loop {
        let config_path = current.join(CONFIG_FILE);
        if config_path.exists() {
            return Ok(config_path);
        }

        if !current.pop() {
            return Err(ConfigError::NotFound);
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// No `.config/vigil.styx` found in any parent directory
    NotFound,
    /// I/O error reading the file
    Io(String),
    /// Parse error in the Styx file
    Parse(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::NotFound => {
                write!(
                    f,
                    "No .config/vigil.styx found in current directory or any parent"
                )
            }
            ConfigError::Io(e) => write!(f, "Failed to read .config/vigil.styx: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse .config/vigil.styx: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("vigil-config-{}-{name}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_load_searches_parent_directories() {
        let root = scratch_dir("nested");
        std::fs::create_dir_all(root.join(".config")).unwrap();
        std::fs::write(
            root.join(CONFIG_FILE),
            "pool {\n    host db.internal\n    total_max 40\n}\n",
        )
        .unwrap();
        let nested = root.join("services/api");
        std::fs::create_dir_all(&nested).unwrap();

        let (config, path) = load_from(&nested).unwrap();
        assert_eq!(path, root.join(CONFIG_FILE));
        let pool = config.pool_config();
        assert_eq!(pool.host, "db.internal");
        assert_eq!(pool.total_max, 40);

        std::fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = parse("").unwrap();
        assert_eq!(config.view_config().schema, "api");
        assert_eq!(config.cost_config(), Default::default());
    }

    #[test]
    fn test_missing_config() {
        let root = scratch_dir("missing");
        assert_eq!(load_from(&root).unwrap_err(), ConfigError::NotFound);
        std::fs::remove_dir_all(&root).unwrap();
    }
}
