pub mod generate;
pub mod parse;
pub mod types;

use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

pub use parse::{load_config, parse_config, ConfigError};
pub use types::{Config, ProviderConfig, ProviderKind, WebConfig};

/// Expands environment variables in a string.
/// Supports $env{VAR_NAME} syntax.
/// If an environment variable is not set, it's left unchanged.
pub fn expand_env_vars(text: &str) -> String {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"\$env\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("env var pattern is valid")
    });

    re.replace_all(text, |caps: &regex::Captures| {
        // Unset variables stay as written so validation can name them
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
/// 2. ~/.config/segmail/config.yml
/// 3. /etc/segmail/config.yml
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        // Expand tilde if present
        return Some(expand_tilde(path));
    }

    // Check ~/.config/segmail/config.yml
    if let Some(home_dir) = dirs::home_dir() {
        let user_config = home_dir.join(".config/segmail/config.yml");
        if user_config.exists() {
            return Some(user_config);
        }
    }

    // Check /etc/segmail/config.yml
    let system_config = PathBuf::from("/etc/segmail/config.yml");
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
        std::env::set_var("SEGMAIL_TEST_KEY", "key-123");
        let result = expand_env_vars("api_key: $env{SEGMAIL_TEST_KEY}");
        assert_eq!(result, "api_key: key-123");
        std::env::remove_var("SEGMAIL_TEST_KEY");
    }

    #[test]
    fn test_expand_env_vars_multiple() {
        std::env::set_var("SEGMAIL_VAR1", "value1");
        std::env::set_var("SEGMAIL_VAR2", "value2");
        let result = expand_env_vars("$env{SEGMAIL_VAR1}/middle/$env{SEGMAIL_VAR2}");
        assert_eq!(result, "value1/middle/value2");
        std::env::remove_var("SEGMAIL_VAR1");
        std::env::remove_var("SEGMAIL_VAR2");
    }

    #[test]
    fn test_unset_env_vars_are_left_in_place() {
        std::env::set_var("SEGMAIL_SET_VAR", "exists");
        assert_eq!(
            expand_env_vars("$env{SEGMAIL_SET_VAR}/$env{SEGMAIL_UNSET_VAR}"),
            "exists/$env{SEGMAIL_UNSET_VAR}"
        );
        assert_eq!(expand_env_vars("no variables here"), "no variables here");
        std::env::remove_var("SEGMAIL_SET_VAR");
    }

    #[test]
    fn test_expand_env_vars_ignores_shell_syntax() {
        let result = expand_env_vars("${MAILGUN_KEY} %recipient.member_uuid%");
        assert_eq!(result, "${MAILGUN_KEY} %recipient.member_uuid%");
    }

    #[test]
    fn test_expand_tilde() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_tilde(Path::new("~/data/segmail.duckdb")), home.join("data/segmail.duckdb"));
            assert_eq!(expand_tilde(Path::new("~")), home);
        }
        assert_eq!(expand_tilde(Path::new("/var/lib/segmail")), Path::new("/var/lib/segmail"));
        assert_eq!(expand_tilde(Path::new("data/~x")), Path::new("data/~x"));
    }

    #[test]
    fn test_resolve_config_path_prefers_explicit() {
        let explicit = Path::new("/srv/segmail.yml");
        assert_eq!(resolve_config_path(Some(explicit)), Some(explicit.to_path_buf()));
    }
}
