pub mod generate;
pub mod parse;
pub mod types;

use regex::Regex;
use std::path::{Path, PathBuf};

pub use parse::{load_config, parse_config, ConfigError};
pub use types::{CheckpointSettings, Config, ParseErrorStrategy, ReaderSettings, WatermarkSettings};

/// Expands environment variables in a string.
/// Supports $env{VAR_NAME} syntax.
/// If an environment variable is not set, it's left unchanged.
pub fn expand_env_vars(text: &str) -> String {
    // Pattern matches $env{VAR_NAME} where VAR_NAME starts with letter or underscore,
    // followed by alphanumeric characters or underscores
    let re = match Regex::new(r"\$env\{([A-Za-z_][A-Za-z0-9_]*)\}") {
        Ok(re) => re,
        Err(_) => return text.to_string(),
    };

    re.replace_all(text, |caps: &regex::Captures| {
        // If not set, keep the original match so the caller can report it
        std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
    })
    .to_string()
}

/// Expands tilde (~) in paths to the user's home directory.
/// If the path starts with "~/" or is exactly "~", replaces it with the home directory.
/// Returns the path unchanged if it doesn't start with tilde or home directory cannot be determined.
pub fn expand_tilde(path: &Path) -> PathBuf {
    let path_str = path.to_string_lossy();

    if path_str.starts_with("~/") {
        if let Some(home_dir) = dirs::home_dir() {
            return home_dir.join(&path_str[2..]);
        }
    } else if path_str == "~" {
        if let Some(home_dir) = dirs::home_dir() {
            return home_dir;
        }
    }

    path.to_path_buf()
}

/// Resolves the config file path based on explicit argument or default locations.
/// Returns the first existing path from:
/// 1. Explicit path (if provided, with tilde expansion)
/// 2. ~/.config/shardpull/config.yml
/// 3. /etc/shardpull/config.yml
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        // Expand tilde if present
        return Some(expand_tilde(path));
    }

    // Check ~/.config/shardpull/config.yml
    if let Some(home_dir) = dirs::home_dir() {
        let user_config = home_dir.join(".config/shardpull/config.yml");
        if user_config.exists() {
            return Some(user_config);
        }
    }

    // Check /etc/shardpull/config.yml
    let system_config = PathBuf::from("/etc/shardpull/config.yml");
    if system_config.exists() {
        return Some(system_config);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_expand_env_vars_single() {
        std::env::set_var("SHARDPULL_TEST_VAR", "orders");
        let result = expand_env_vars("streams/$env{SHARDPULL_TEST_VAR}/shards");
        assert_eq!(result, "streams/orders/shards");
        std::env::remove_var("SHARDPULL_TEST_VAR");
    }

    #[test]
    fn test_expand_env_vars_partial() {
        std::env::set_var("SHARDPULL_SET_VAR", "exists");
        let result = expand_env_vars("$env{SHARDPULL_SET_VAR}/$env{SHARDPULL_UNSET_VAR}");
        assert_eq!(result, "exists/$env{SHARDPULL_UNSET_VAR}");
        std::env::remove_var("SHARDPULL_SET_VAR");
    }

    #[test]
    fn test_expand_env_vars_ignores_plain_dollar() {
        let result = expand_env_vars("${HOME}/path");
        assert_eq!(result, "${HOME}/path");
    }

    #[test]
    fn test_resolve_config_path_explicit() {
        let path = Path::new("/etc/custom/shardpull.yml");
        assert_eq!(resolve_config_path(Some(path)), Some(path.to_path_buf()));
    }

    #[test]
    fn test_expand_tilde_with_path() {
        let path = Path::new("~/test/path");
        let expanded = expand_tilde(path);

        // Should expand to home directory + test/path
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expanded, home.join("test/path"));
        }
    }

    #[test]
    fn test_expand_tilde_alone() {
        let path = Path::new("~");
        let expanded = expand_tilde(path);

        // Should expand to home directory
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expanded, home);
        }
    }

    #[test]
    fn test_expand_tilde_no_expansion() {
        let path = Path::new("/absolute/path");
        let expanded = expand_tilde(path);

        // Should not change
        assert_eq!(expanded, Path::new("/absolute/path"));
    }

}
