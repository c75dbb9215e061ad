//! Configuration validation.

use super::error::{ConfigError, ConfigResult};
use super::schema::{DispatchConfig, KeelConfig, LogRotation, LoggingConfig};

/// Validates the entire configuration.
pub fn validate_config(config: &KeelConfig) -> ConfigResult<()> {
    validate_logging(&config.logging)?;
    validate_dispatch(&config.dispatch)?;
    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> ConfigResult<()> {
    if logging.max_files == 0 {
        return Err(ConfigError::validation(
            "logging.max_files must be greater than 0",
        ));
    }

    if logging.rotation != LogRotation::Never && logging.file_path.is_none() {
        return Err(ConfigError::validation(
            "logging.rotation requires logging.file_path",
        ));
    }

    for module in logging.filters.keys() {
        if module.is_empty() || module.contains(char::is_whitespace) {
            return Err(ConfigError::validation(format!(
                "Invalid module in logging.filters: {module:?}"
            )));
        }
    }

    Ok(())
}

fn validate_dispatch(dispatch: &DispatchConfig) -> ConfigResult<()> {
    if dispatch.thread_name.trim().is_empty() {
        return Err(ConfigError::validation(
            "dispatch.thread_name cannot be empty",
        ));
    }

    // Rust thread names may not contain NUL.
    if dispatch.thread_name.contains('\0') {
        return Err(ConfigError::validation(
            "dispatch.thread_name cannot contain NUL",
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::schema::LogLevel;

    #[test]
    fn test_validate_default_config() {
        assert!(validate_config(&KeelConfig::default()).is_ok());
    }

    #[test]
    fn test_validate_max_files() {
        let mut config = KeelConfig::default();
        config.logging.max_files = 0;
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::ValidationError { .. })
        ));
    }

    #[test]
    fn test_validate_thread_name() {
        let mut config = KeelConfig::default();
        config.dispatch.thread_name = "  ".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_rotation_needs_file() {
        let mut config = KeelConfig::default();
        config.logging.rotation = LogRotation::Daily;
        assert!(validate_config(&config).is_err());

        config.logging.file_path = Some("logs/keel.log".into());
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_filters() {
        let mut config = KeelConfig::default();
        config
            .logging
            .filters
            .insert("keel core".to_string(), LogLevel::Debug);
        assert!(validate_config(&config).is_err());
    }
}
