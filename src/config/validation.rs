use crate::config::types::{
    Config, CrawlerConfig, DaemonConfig, OutputConfig, RetryConfig, UserAgentConfig,
};
use crate::crawler::compile_selector;
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawler_config(&config.crawler)?;
    validate_user_agent_config(&config.user_agent)?;
    validate_retry_config(&config.retry)?;
    validate_daemon_config(&config.daemon)?;
    validate_output_config(&config.output)?;
    Ok(())
}

fn validate_concurrency(name: &str, value: usize) -> Result<(), ConfigError> {
    if !(1..=100).contains(&value) {
        return Err(ConfigError::Validation(format!(
            "{} must be between 1 and 100, got {}",
            name, value
        )));
    }
    Ok(())
}

fn validate_http_url(name: &str, value: &str) -> Result<Url, ConfigError> {
    let url =
        Url::parse(value).map_err(|e| ConfigError::InvalidUrl(format!("{} '{}': {}", name, value, e)))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::InvalidUrl(format!(
            "{} '{}' must use http or https",
            name, value
        )));
    }
    Ok(url)
}

/// Validates crawler configuration
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    validate_http_url("base_url", &config.base_url)?;

    if config.page_param.is_empty() {
        return Err(ConfigError::Validation(
            "page_param cannot be empty".to_string(),
        ));
    }

    if config.start_page < 1 {
        return Err(ConfigError::Validation(
            "start_page must be >= 1".to_string(),
        ));
    }

    if config.start_page > config.end_page {
        return Err(ConfigError::Validation(format!(
            "start_page ({}) must not exceed end_page ({})",
            config.start_page, config.end_page
        )));
    }

    validate_concurrency("concurrency", config.concurrency)?;
    validate_concurrency("fast_concurrency", config.fast_concurrency)?;

    for (mode, min, max) in [
        ("normal", config.min_spacing_ms, config.max_spacing_ms),
        ("fast", config.fast_min_spacing_ms, config.fast_max_spacing_ms),
    ] {
        if min > max {
            return Err(ConfigError::Validation(format!(
                "{} mode spacing minimum ({}ms) exceeds its maximum ({}ms)",
                mode, min, max
            )));
        }
    }

    if config.request_timeout_secs == 0 || config.connect_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "request and connect timeouts must be > 0".to_string(),
        ));
    }

    compile_selector(&config.post_container)?;
    compile_selector(&config.post_link)?;
    compile_selector(&config.title_selector)?;
    compile_selector(&config.description_selector)?;

    if config.hosting_domains.is_empty() {
        return Err(ConfigError::Validation(
            "hosting_domains must list at least one domain".to_string(),
        ));
    }
    for pattern in &config.hosting_domains {
        validate_domain_pattern(pattern)?;
    }

    Ok(())
}

/// Validates user agent configuration
fn validate_user_agent_config(config: &UserAgentConfig) -> Result<(), ConfigError> {
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

    if config.crawler_version.trim().is_empty() {
        return Err(ConfigError::Validation(
            "crawler_version cannot be empty".to_string(),
        ));
    }

    match config.contact.as_deref() {
        Some(contact) if contact.contains(':') => {
            Url::parse(contact)
                .map_err(|e| ConfigError::InvalidUrl(format!("Invalid contact: {}", e)))?;
        }
        Some(contact) => validate_email(contact)?,
        None => {}
    }

    Ok(())
}

fn validate_retry_config(config: &RetryConfig) -> Result<(), ConfigError> {
    if config.max_attempts < 1 {
        return Err(ConfigError::Validation(
            "max_attempts must be >= 1".to_string(),
        ));
    }

    if !config.multiplier.is_finite() || config.multiplier < 1.0 {
        return Err(ConfigError::Validation(format!(
            "multiplier must be a finite number >= 1.0, got {}",
            config.multiplier
        )));
    }

    if config.initial_delay_ms > config.max_delay_ms {
        return Err(ConfigError::Validation(format!(
            "initial_delay_ms ({}) exceeds max_delay_ms ({})",
            config.initial_delay_ms, config.max_delay_ms
        )));
    }

    Ok(())
}

fn validate_daemon_config(config: &DaemonConfig) -> Result<(), ConfigError> {
    validate_http_url("daemon endpoint", &config.endpoint)?;
    validate_concurrency("daemon concurrency", config.concurrency)?;
    validate_concurrency("resolve_concurrency", config.resolve_concurrency)?;

    if config.rpc_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "rpc_timeout_secs must be > 0".to_string(),
        ));
    }

    if config.poll_interval_ms < 10 {
        return Err(ConfigError::Validation(format!(
            "poll_interval_ms must be >= 10ms, got {}ms",
            config.poll_interval_ms
        )));
    }

    if config.download_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "download_timeout_secs must be > 0".to_string(),
        ));
    }

    if config.download_dir.is_empty() {
        return Err(ConfigError::Validation(
            "download_dir cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Validates output configuration
fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }

    if config.report_path.as_deref() == Some("") {
        return Err(ConfigError::Validation(
            "report_path cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Validates a domain pattern (supports wildcards)
fn validate_domain_pattern(pattern: &str) -> Result<(), ConfigError> {
    if pattern.is_empty() {
        return Err(ConfigError::InvalidPattern(
            "Domain pattern cannot be empty".to_string(),
        ));
    }

    validate_domain_string(pattern.strip_prefix("*.").unwrap_or(pattern))
}

/// Validates a domain string (without wildcard prefix)
fn validate_domain_string(domain: &str) -> Result<(), ConfigError> {
    if domain.is_empty() {
        return Err(ConfigError::InvalidPattern(
            "Domain cannot be empty".to_string(),
        ));
    }

    if !domain
        .chars()
        .all(|c| c.is_alphanumeric() || c == '.' || c == '-')
    {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' contains invalid characters",
            domain
        )));
    }

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

    if domain.contains("..") {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' cannot contain consecutive dots",
            domain
        )));
    }

    if !domain.contains('.') {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' must contain at least one dot (e.g., 'odysee.com')",
            domain
        )));
    }

    Ok(())
}

/// Basic email validation
fn validate_email(email: &str) -> Result<(), ConfigError> {
    match email.split_once('@') {
        Some((local, domain))
            if !local.is_empty() && domain.contains('.') && !domain.contains('@') =>
        {
            Ok(())
        }
        _ => Err(ConfigError::Validation(format!(
            "Invalid contact email: '{}'",
            email
        ))),
    }
}
