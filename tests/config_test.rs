mod common;

use std::env;
use std::fs;
use std::path::PathBuf;
use tempfile::tempdir;

#[cfg(test)]
mod config_tests {
    use super::*;
    use copilot_metrics::config::{Config, DEFAULT_API_BASE_URL};
    use copilot_metrics::MetricsError;

    #[test]
    fn test_default_config_values() {
        let config = Config::default();

        // Logging defaults
        assert_eq!(config.logging.level, "WARN");
        assert_eq!(config.logging.format, "pretty");
        assert_eq!(config.logging.output, "console");

        // GitHub defaults
        assert_eq!(config.github.api_base_url, DEFAULT_API_BASE_URL);
        assert!(config.github.app_id.is_empty());
        assert!(config.github.private_key_path.is_none());

        // Fetch and output defaults
        assert_eq!(config.fetch.request_delay_ms, 1000);
        assert_eq!(config.fetch.timeout_secs, 30);
        assert_eq!(config.output.directory, PathBuf::from("copilot-metrics-output"));
        assert_eq!(config.output.file_prefix, "copilot_metrics");
    }

    #[test]
    fn test_env_variable_override() {
        env::set_var("GITHUB_APP_ID", "999");
        env::set_var("GITHUB_APP_INSTALLATION_ID", "888");
        env::set_var("COPILOT_METRICS_REQUEST_DELAY_MS", "250");
        env::set_var("LOG_LEVEL", "DEBUG");

        let mut config = Config::default();
        config
            .apply_env_overrides()
            .expect("Failed to apply env overrides");

        assert_eq!(config.github.app_id, "999");
        assert_eq!(config.github.installation_id, "888");
        assert_eq!(config.fetch.request_delay_ms, 250);
        assert_eq!(config.logging.level, "DEBUG");

        env::set_var("COPILOT_METRICS_REQUEST_DELAY_MS", "soon");
        assert!(Config::default().apply_env_overrides().is_err());

        // Cleanup
        env::remove_var("GITHUB_APP_ID");
        env::remove_var("GITHUB_APP_INSTALLATION_ID");
        env::remove_var("COPILOT_METRICS_REQUEST_DELAY_MS");
        env::remove_var("LOG_LEVEL");
    }

    #[test]
    fn test_config_validation() {
        let dir = tempdir().unwrap();
        let mut config = common::test_config(dir.path());

        // Complete config
        assert!(config.validate().is_ok());

        config.github.installation_id = "  ".to_string();
        assert!(matches!(config.validate(), Err(MetricsError::Config(_))));

        config = common::test_config(dir.path());
        config.github.private_key_path = None;
        assert!(config.validate().is_err());

        config = common::test_config(dir.path());
        config.github.api_base_url = String::new();
        assert!(config.validate().is_err());

        config = common::test_config(dir.path());
        config.fetch.timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_file_loading() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let config_path = temp_dir.path().join("copilot-metrics.toml");

        let test_config = r#"
[logging]
level = "DEBUG"
format = "json"
output = "file"

[github]
organization = "acme"
enterprise = "globex"
private_key_path = "/etc/copilot-metrics/app.pem"

[fetch]
timeout_secs = 10

[output]
file_prefix = "nightly"
        "#;

        fs::write(&config_path, test_config).expect("Failed to write test config");

        let config = Config::load_from_file(&config_path).expect("Failed to load config");

        assert_eq!(config.logging.level, "DEBUG");
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.github.organization.as_deref(), Some("acme"));
        assert_eq!(config.github.enterprise.as_deref(), Some("globex"));
        assert_eq!(
            config.github.private_key_path,
            Some(PathBuf::from("/etc/copilot-metrics/app.pem"))
        );
        // unspecified keys keep their defaults
        assert_eq!(config.github.api_base_url, DEFAULT_API_BASE_URL);
        assert_eq!(config.fetch.timeout_secs, 10);
        assert_eq!(config.fetch.request_delay_ms, 1000);
        assert_eq!(config.output.file_prefix, "nightly");
    }

    #[test]
    fn test_explicit_config_path_must_exist() {
        let temp_dir = tempdir().unwrap();
        let missing = temp_dir.path().join("absent.toml");
        let err = Config::load(Some(&missing)).unwrap_err();
        assert!(err.to_string().contains("absent.toml"));
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();

        let toml_string = toml::to_string_pretty(&config).expect("Failed to serialize to TOML");
        assert!(toml_string.contains("[logging]"));
        assert!(toml_string.contains("[github]"));
        assert!(toml_string.contains("[fetch]"));
        assert!(toml_string.contains("[output]"));

        // Round-trip
        let deserialized: Config =
            toml::from_str(&toml_string).expect("Failed to deserialize TOML");
        assert_eq!(config.logging.level, deserialized.logging.level);
        assert_eq!(config.github.api_base_url, deserialized.github.api_base_url);
        assert_eq!(
            config.fetch.request_delay_ms,
            deserialized.fetch.request_delay_ms
        );
    }
}
