use super::types::*;
use crate::config::{expand_env_vars, expand_tilde};
use crate::provider::mailgun::MAILGUN_MAX_BATCH_SIZE;
use regex::Regex;
use std::fs::File;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("validation failed:\n{}", .0.join("\n"))]
    ValidationList(Vec<String>),

    #[error("validation failed: {0}")]
    Validation(String),
}

pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    use std::io::Read;

    let mut file = File::open(path).map_err(|e| {
        ConfigError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to open config file '{}': {}", path.display(), e),
        ))
    })?;

    let mut yaml_string = String::new();
    file.read_to_string(&mut yaml_string).map_err(|e| {
        ConfigError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to read config file '{}': {}", path.display(), e),
        ))
    })?;

    parse_config(&yaml_string).map_err(|e| match e {
        ConfigError::YamlParse(e) => ConfigError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("in file '{}': {}", path.display(), e),
        )),
        other => other,
    })
}

/// Parses and validates config text after environment expansion.
pub fn parse_config(yaml: &str) -> Result<Config, ConfigError> {
    let yaml_string = expand_env_vars(yaml);
    check_unexpanded_vars(&yaml_string)?;

    let mut config: Config = serde_yaml::from_str(&yaml_string)?;
    config.storage.path = expand_tilde(&config.storage.path);

    validate_config(&config)?;
    Ok(config)
}

/// Checks for unexpanded environment variables and returns a helpful error
fn check_unexpanded_vars(yaml_string: &str) -> Result<(), ConfigError> {
    let re = Regex::new(r"\$env\{([A-Za-z_][A-Za-z0-9_]*)\}").map_err(|e| {
        ConfigError::Validation(format!("internal pattern error: {}", e))
    })?;
    let mut unexpanded_vars: Vec<String> = re
        .captures_iter(yaml_string)
        .filter_map(|cap| cap.get(1).map(|m| m.as_str().to_string()))
        .collect();

    if unexpanded_vars.is_empty() {
        return Ok(());
    }

    unexpanded_vars.sort();
    unexpanded_vars.dedup();

    let error_msg = if unexpanded_vars.len() == 1 {
        format!(
            "Environment variable $env{{{0}}} is not set.\n\
             \n\
             To fix this, either:\n\
             1. Set the environment variable: export {0}=...\n\
             2. Replace $env{{{0}}} in the config file with the actual value",
            unexpanded_vars[0]
        )
    } else {
        format!(
            "Environment variables are not set: {}\n\
             \n\
             Set them or replace them in the config file with actual values",
            unexpanded_vars.join(", ")
        )
    };

    Err(ConfigError::Validation(error_msg))
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let mut errors = Vec::new();

    validate_provider(&config.provider, &mut errors);

    if config.dispatch.concurrency == 0 {
        errors.push("dispatch.concurrency must be at least 1".to_string());
    }

    if config.site.url.trim().is_empty() {
        errors.push("site.url cannot be empty".to_string());
    } else if crate::render::links::host_of(&config.site.url).is_none() {
        errors.push(format!(
            "site.url '{}' must be an absolute http(s) URL",
            config.site.url
        ));
    }

    if config.verification.enabled && config.verification.window.is_zero() {
        errors.push("verification.window must be greater than zero".to_string());
    }

    if config.web.listen.trim().is_empty() {
        errors.push("web.listen cannot be empty".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationList(errors))
    }
}

fn validate_provider(provider: &ProviderConfig, errors: &mut Vec<String>) {
    if provider.batch_size == 0 || provider.batch_size > MAILGUN_MAX_BATCH_SIZE {
        errors.push(format!(
            "provider.batch_size must be between 1 and {}, got {}",
            MAILGUN_MAX_BATCH_SIZE, provider.batch_size
        ));
    }

    if provider.kind == ProviderKind::Mailgun {
        let blank = |v: &Option<String>| v.as_deref().map_or(true, |s| s.trim().is_empty());
        if blank(&provider.domain) {
            errors.push("provider.domain is required for the mailgun provider".to_string());
        }
        if blank(&provider.api_key) {
            errors.push("provider.api_key is required for the mailgun provider".to_string());
        }
        if !provider.base_url.starts_with("http://") && !provider.base_url.starts_with("https://") {
            errors.push(format!(
                "provider.base_url '{}' must start with http:// or https://",
                provider.base_url
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
storage:
  path: /tmp/segmail.duckdb
provider:
  type: log
site:
  url: https://blog.example.com
web:
  listen: 127.0.0.1:7200
"#;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = parse_config(MINIMAL).unwrap();
        assert_eq!(config.provider.kind, ProviderKind::Log);
        assert_eq!(config.provider.batch_size, 1000);
        assert_eq!(config.provider.timeout, std::time::Duration::from_secs(30));
        assert_eq!(config.dispatch.concurrency, 2);
        assert!(!config.site.outbound_ref);
        assert!(!config.verification.enabled);
    }

    #[test]
    fn test_mailgun_requires_credentials() {
        let yaml = MINIMAL.replace("type: log", "type: mailgun");
        let err = parse_config(&yaml).unwrap_err();
        match err {
            ConfigError::ValidationList(errors) => {
                assert_eq!(errors.len(), 2);
                assert!(errors[0].contains("provider.domain"));
                assert!(errors[1].contains("provider.api_key"));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_collects_every_validation_error() {
        let yaml = r#"
storage:
  path: /tmp/x.duckdb
provider:
  type: log
  batch_size: 5000
dispatch:
  concurrency: 0
site:
  url: blog.example.com
web:
  listen: ""
"#;
        match parse_config(yaml).unwrap_err() {
            ConfigError::ValidationList(errors) => assert_eq!(errors.len(), 4),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_durations_use_humantime() {
        let yaml = format!(
            "{}verification:\n  enabled: true\n  window: 7days\n",
            MINIMAL.replace("type: log", "type: log\n  timeout: 1m 30s")
        );
        let config = parse_config(&yaml).unwrap();
        assert_eq!(config.provider.timeout, std::time::Duration::from_secs(90));
        assert_eq!(
            config.verification.window,
            std::time::Duration::from_secs(7 * 24 * 3600)
        );
    }

    #[test]
    fn test_unexpanded_env_var_is_reported() {
        let yaml = MINIMAL.replace("type: log", "type: log\n  api_key: $env{SEGMAIL_TEST_UNSET_KEY}");
        let err = parse_config(&yaml).unwrap_err();
        assert!(err.to_string().contains("SEGMAIL_TEST_UNSET_KEY"));
    }
}
