use super::{types::Config, ConfigError};

/// Validate configuration
/// Currently validates:
/// - AWS region is set
/// - Batch size, wait retries and retry attempts are not 0
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.aws.region.trim().is_empty() {
        return Err(ConfigError::ValidationError(
            "aws.region cannot be empty".to_string(),
        ));
    }

    if config.batch_size == 0 {
        return Err(ConfigError::ValidationError(
            "batch_size cannot be 0".to_string(),
        ));
    }

    if config.scheduler.wait_retries == 0 {
        return Err(ConfigError::ValidationError(
            "scheduler.wait_retries cannot be 0".to_string(),
        ));
    }

    if config.retry.max_attempts == 0 {
        return Err(ConfigError::ValidationError(
            "retry.max_attempts cannot be 0".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_config_from_str;

    fn base_config() -> Config {
        load_config_from_str(
            r#"
[aws]
region = "us-east-1"
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_validate_valid_config() {
        assert!(validate_config(&base_config()).is_ok());
    }

    #[test]
    fn test_validate_empty_region_fails() {
        let mut config = base_config();
        config.aws.region = "  ".to_string();
        let result = validate_config(&config);
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_validate_zero_batch_size_fails() {
        let mut config = base_config();
        config.batch_size = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_zero_wait_retries_fails() {
        let mut config = base_config();
        config.scheduler.wait_retries = 0;
        let result = validate_config(&config);
        assert!(matches!(result, Err(ConfigError::ValidationError(msg)) if msg.contains("wait_retries")));
    }

    #[test]
    fn test_validate_zero_retry_attempts_fails() {
        let mut config = base_config();
        config.retry.max_attempts = 0;
        assert!(validate_config(&config).is_err());
    }
}
