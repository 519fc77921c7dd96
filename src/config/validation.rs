use crate::config::types::{Config, CrawlerConfig, UserAgentConfig, WebhookSettings};
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawler_config(&config.crawler)?;
    validate_user_agent_config(&config.user_agent)?;
    validate_webhook_settings(&config.webhook)?;
    Ok(())
}

/// Validates crawler configuration
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if config.workers < 1 || config.workers > 100 {
        return Err(ConfigError::Validation(format!(
            "workers must be between 1 and 100, got {}",
            config.workers
        )));
    }

    if config.navigation_timeout_ms < 100 {
        return Err(ConfigError::Validation(format!(
            "navigation_timeout_ms must be >= 100ms, got {}ms",
            config.navigation_timeout_ms
        )));
    }

    Ok(())
}

/// Validates webhook delivery settings
fn validate_webhook_settings(config: &WebhookSettings) -> Result<(), ConfigError> {
    if config.request_timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "request_timeout_ms must be > 0".to_string(),
        ));
    }

    if config.max_backoff_ms < config.base_backoff_ms {
        return Err(ConfigError::Validation(format!(
            "max_backoff_ms ({}) must be >= base_backoff_ms ({})",
            config.max_backoff_ms, config.base_backoff_ms
        )));
    }

    Ok(())
}

/// Validates user agent configuration
fn validate_user_agent_config(config: &UserAgentConfig) -> Result<(), ConfigError> {
    // Validate crawler name: non-empty, alphanumeric + hyphens only
    if config.crawler_name.is_empty() {
        return Err(ConfigError::Validation(
            "crawler_name cannot be empty".to_string(),
        ));
    }

    if !config
        .crawler_name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-')
    {
        return Err(ConfigError::Validation(format!(
            "crawler_name must contain only alphanumeric characters and hyphens, got '{}'",
            config.crawler_name
        )));
    }

    // Validate contact URL
    Url::parse(&config.contact_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid contact_url: {}", e)))?;

    // Validate contact email (basic validation)
    validate_email(&config.contact_email)?;

    Ok(())
}

/// Validates a domain pattern (supports wildcards)
pub(crate) fn validate_domain_pattern(pattern: &str) -> Result<(), ConfigError> {
    if pattern.is_empty() {
        return Err(ConfigError::InvalidPattern(
            "Domain pattern cannot be empty".to_string(),
        ));
    }

    // Check if it's a wildcard pattern
    if let Some(domain) = pattern.strip_prefix("*.") {
        // Validate the base domain part
        validate_domain_string(domain)?;
    } else {
        // Regular domain
        validate_domain_string(pattern)?;
    }

    Ok(())
}

/// Validates a domain string (without wildcard prefix)
fn validate_domain_string(domain: &str) -> Result<(), ConfigError> {
    if domain.is_empty() {
        return Err(ConfigError::InvalidPattern(
            "Domain cannot be empty".to_string(),
        ));
    }

    // Check for invalid characters
    if !domain
        .chars()
        .all(|c| c.is_alphanumeric() || c == '.' || c == '-')
    {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' contains invalid characters",
            domain
        )));
    }

    // Check that it doesn't start or end with a dot or hyphen
    if domain.starts_with('.')
        || domain.ends_with('.')
        || domain.starts_with('-')
        || domain.ends_with('-')
    {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' cannot start or end with '.' or '-'",
            domain
        )));
    }

    // Check for consecutive dots
    if domain.contains("..") {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' cannot contain consecutive dots",
            domain
        )));
    }

    // Must contain at least one dot (e.g., example.com, not just "example")
    if !domain.contains('.') {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' must contain at least one dot (e.g., 'example.com')",
            domain
        )));
    }

    Ok(())
}

/// Basic email validation
fn validate_email(email: &str) -> Result<(), ConfigError> {
    if email.is_empty() {
        return Err(ConfigError::Validation(
            "contact_email cannot be empty".to_string(),
        ));
    }

    // Basic email format check: must contain @ and have text on both sides
    let parts: Vec<&str> = email.split('@').collect();
    if parts.len() != 2 {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    }

    let local = parts[0];
    let domain = parts[1];

    if local.is_empty() || domain.is_empty() {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    }

    // Domain part should contain at least one dot
    if !domain.contains('.') {
        return Err(ConfigError::Validation(format!(
            "Invalid email domain: '{}'",
            email
        )));
    }

    Ok(())
}
