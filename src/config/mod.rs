/// Configuration consumed by the backend-connection core

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::core::transport::ConnectOptions;
use crate::error::ConfigError;

/// Core configuration: connect behavior, relation-cache sizing, and the
/// optional redirect preference lists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Per-attempt TCP connect timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Extra connect attempts made when a caller requests retry
    pub connect_retry_attempts: u32,
    /// Pause between connect retries in milliseconds
    pub connect_retry_interval_ms: u64,
    /// Number of entries a relation cache holds
    pub relcache_size: u32,
    /// Database-name redirect preferences, first match wins
    pub redirect_dbnames: Option<Vec<RedirectRuleSpec>>,
    /// Application-name redirect preferences, first match wins
    pub redirect_app_names: Option<Vec<RedirectRuleSpec>>,
}

/// One uncompiled redirect preference entry.
///
/// `target` is a node token: "primary", "standby", or a numeric node id.
/// `weight` is the acceptance probability of the matched preference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedirectRuleSpec {
    pub pattern: String,
    pub target: String,
    pub weight: f64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 10_000,
            connect_retry_attempts: 2,
            connect_retry_interval_ms: 1_000,
            relcache_size: 256,
            redirect_dbnames: None,
            redirect_app_names: None,
        }
    }
}

impl PoolConfig {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content =
            fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;

        let config: PoolConfig =
            toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.connect_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "connect_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.relcache_size == 0 {
            return Err(ConfigError::ValidationError(
                "relcache_size must be greater than 0".to_string(),
            ));
        }

        for (name, list) in [
            ("redirect_dbnames", &self.redirect_dbnames),
            ("redirect_app_names", &self.redirect_app_names),
        ] {
            if let Some(rules) = list {
                for rule in rules {
                    rule.validate()
                        .map_err(|e| ConfigError::ValidationError(format!("{name}: {e}")))?;
                }
            }
        }

        Ok(())
    }

    /// Transport knobs derived from this configuration.
    pub fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            timeout: Duration::from_millis(self.connect_timeout_ms),
            retry_attempts: self.connect_retry_attempts,
            retry_interval: Duration::from_millis(self.connect_retry_interval_ms),
        }
    }
}

impl RedirectRuleSpec {
    fn validate(&self) -> Result<(), String> {
        if self.pattern.is_empty() {
            return Err("pattern cannot be empty".to_string());
        }
        regex::Regex::new(&self.pattern).map_err(|e| format!("invalid pattern: {e}"))?;
        if self.target.is_empty() {
            return Err("target cannot be empty".to_string());
        }
        if !(0.0..=1.0).contains(&self.weight) {
            return Err(format!("weight {} is outside [0.0, 1.0]", self.weight));
        }
        Ok(())
    }

    /// Parse the compact preference-list form
    /// `pattern:target(weight)[,pattern:target(weight)...]`, with the
    /// weight defaulting to 1.0 when omitted.
    pub fn parse_list(list: &str) -> Result<Vec<RedirectRuleSpec>, ConfigError> {
        let mut rules = Vec::new();

        for item in list.split(',') {
            let item = item.trim();
            if item.is_empty() {
                continue;
            }

            let (pattern, rhs) = item.split_once(':').ok_or_else(|| {
                ConfigError::ParseError(format!("missing ':' in preference entry \"{item}\""))
            })?;

            let (target, weight) = match rhs.split_once('(') {
                Some((target, rest)) => {
                    let digits = rest.strip_suffix(')').ok_or_else(|| {
                        ConfigError::ParseError(format!(
                            "missing ')' in preference entry \"{item}\""
                        ))
                    })?;
                    let weight: f64 = digits.trim().parse().map_err(|_| {
                        ConfigError::ParseError(format!(
                            "invalid weight \"{digits}\" in preference entry \"{item}\""
                        ))
                    })?;
                    (target, weight)
                }
                None => (rhs, 1.0),
            };

            rules.push(RedirectRuleSpec {
                pattern: pattern.trim().to_string(),
                target: target.trim().to_string(),
                weight,
            });
        }

        Ok(rules)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = PoolConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.connect_options().timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_config_validation() {
        let mut config = PoolConfig::default();

        config.relcache_size = 0;
        assert!(config.validate().is_err());

        config.relcache_size = 256;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rule_weight_validation() {
        let mut config = PoolConfig::default();
        config.redirect_dbnames = Some(vec![RedirectRuleSpec {
            pattern: "^analytics$".to_string(),
            target: "standby".to_string(),
            weight: 1.5,
        }]);

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rule_pattern_validation() {
        let mut config = PoolConfig::default();
        config.redirect_app_names = Some(vec![RedirectRuleSpec {
            pattern: "report(".to_string(),
            target: "standby".to_string(),
            weight: 0.5,
        }]);

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_serialization() {
        let mut config = PoolConfig::default();
        config.redirect_dbnames = Some(vec![RedirectRuleSpec {
            pattern: "^analytics$".to_string(),
            target: "standby".to_string(),
            weight: 0.8,
        }]);

        let toml_str = toml::to_string(&config).unwrap();
        let parsed: PoolConfig = toml::from_str(&toml_str).unwrap();
        assert!(parsed.validate().is_ok());
        assert_eq!(parsed.redirect_dbnames, config.redirect_dbnames);
    }

    #[test]
    fn test_config_file_operations() {
        let config = PoolConfig::default();
        let temp_file = NamedTempFile::new().unwrap();

        config.save_to_file(temp_file.path()).unwrap();
        let loaded = PoolConfig::load_from_file(temp_file.path()).unwrap();
        assert!(loaded.validate().is_ok());
    }

    #[test]
    fn test_parse_preference_list() {
        let rules =
            RedirectRuleSpec::parse_list("postgres:primary(1.0), analytics:standby(0.8)")
                .unwrap();

        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].pattern, "postgres");
        assert_eq!(rules[0].target, "primary");
        assert_eq!(rules[0].weight, 1.0);
        assert_eq!(rules[1].pattern, "analytics");
        assert_eq!(rules[1].target, "standby");
        assert_eq!(rules[1].weight, 0.8);
    }

    #[test]
    fn test_parse_preference_list_default_weight() {
        let rules = RedirectRuleSpec::parse_list("reporting.*:2").unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].target, "2");
        assert_eq!(rules[0].weight, 1.0);
    }

    #[test]
    fn test_parse_preference_list_malformed() {
        assert!(RedirectRuleSpec::parse_list("no-colon-here").is_err());
        assert!(RedirectRuleSpec::parse_list("db:standby(0.5").is_err());
        assert!(RedirectRuleSpec::parse_list("db:standby(abc)").is_err());
    }
}
