mod types;

pub use types::*;

use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    validate_config(&config)?;

    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    let default_paths = [
        "./config.toml",
        "./nova-stream.toml",
        "~/.config/nova-stream/config.toml",
        "/etc/nova-stream/config.toml",
    ];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            return load_config(path);
        }
    }

    Ok(Config::default())
}

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    if config.server.port == 0 {
        anyhow::bail!("Server port cannot be 0");
    }

    let cache = &config.cache;
    if cache.max_resolved == 0 || cache.max_failures == 0 || cache.max_metadata == 0 {
        anyhow::bail!("Cache table capacities must be greater than 0");
    }
    if cache.success_ttl_secs == 0 {
        anyhow::bail!("cache.success_ttl_secs must be greater than 0");
    }
    if cache.unavailable_ttl_secs > cache.success_ttl_secs {
        tracing::warn!(
            "cache.unavailable_ttl_secs ({}) exceeds cache.success_ttl_secs ({})",
            cache.unavailable_ttl_secs,
            cache.success_ttl_secs
        );
    }

    if config.locks.acquire_timeout_secs == 0 {
        anyhow::bail!("locks.acquire_timeout_secs must be greater than 0");
    }
    if config.locks.max_handles == 0 {
        anyhow::bail!("locks.max_handles must be greater than 0");
    }

    if config.scheduler.workers == 0 {
        anyhow::bail!("scheduler.workers must be at least 1");
    }
    if config.scheduler.max_queued == 0 {
        anyhow::bail!("scheduler.max_queued must be greater than 0");
    }

    if config.proxy.connect_timeout_secs == 0 || config.proxy.response_timeout_secs == 0 {
        anyhow::bail!("proxy timeouts must be greater than 0");
    }

    if config.resolver.timeout_secs == 0 {
        anyhow::bail!("resolver.timeout_secs must be greater than 0");
    }
    if config.resolver.command.trim().is_empty() {
        anyhow::bail!("resolver.command cannot be empty");
    }
    if !config.resolver.page_url.contains("{id}") {
        anyhow::bail!("resolver.page_url must contain an {{id}} placeholder");
    }

    Ok(())
}
