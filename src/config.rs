//! Configuration loader: merges .env, config.toml, and NBN_* env vars.

use std::path::{Path, PathBuf};

use common::config::{LookupConfig, MAX_CACHE_SECS};
use common::Error;

fn parse_positive<T>(raw: &str, env_name: &str) -> Result<T, Error>
where
    T: std::str::FromStr + PartialOrd + Default,
{
    let parsed = raw
        .trim()
        .parse::<T>()
        .map_err(|_| Error::Config(format!("{env_name} must be an integer > 0")))?;
    if parsed <= T::default() {
        return Err(Error::Config(format!("{env_name} must be an integer > 0")));
    }
    Ok(parsed)
}

fn validate_config(config: &LookupConfig) -> Result<(), Error> {
    let mut issues: Vec<String> = Vec::new();

    let base_url = config.source.base_url.trim();
    if base_url.is_empty() {
        issues.push("source.base_url must not be empty".into());
    } else if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
        issues.push("source.base_url must be an http(s) URL".into());
    }
    if config.source.extension.trim().is_empty() {
        issues.push("source.extension must not be empty".into());
    }
    if config.source.requests_per_second == 0 {
        issues.push("source.requests_per_second must be > 0".into());
    }
    if config.source.timeout_secs == Some(0) {
        issues.push("source.timeout_secs must be > 0 when set".into());
    }

    if config.cache.ttl_secs == 0 {
        issues.push("cache.ttl_secs must be > 0".into());
    }
    if config.cache.ttl_secs > MAX_CACHE_SECS {
        issues.push(format!("cache.ttl_secs must be <= {MAX_CACHE_SECS}"));
    }
    if config.cache.expiry_secs > MAX_CACHE_SECS {
        issues.push(format!("cache.expiry_secs must be <= {MAX_CACHE_SECS}"));
    }
    if config.cache.expiry_secs < config.cache.ttl_secs {
        issues.push("cache.expiry_secs must be >= cache.ttl_secs".into());
    }
    if config.cache.max_entries == 0 {
        issues.push("cache.max_entries must be > 0".into());
    }
    if i64::try_from(config.cache.max_entries).is_err() {
        issues.push(format!("cache.max_entries must be <= {}", i64::MAX));
    }

    if config.scheduler.max_concurrent == 0 {
        issues.push("scheduler.max_concurrent must be > 0".into());
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "Invalid config:\n - {}",
            issues.join("\n - ")
        )))
    }
}

/// Apply NBN_* overrides read through `var`.
fn apply_env_overrides<F>(config: &mut LookupConfig, var: F) -> Result<(), Error>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(url) = var("NBN_SNAPSHOT_BASE_URL") {
        config.source.base_url = url.trim().to_string();
    }
    if let Some(path) = var("NBN_CACHE_PATH") {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            config.cache.path = PathBuf::from(trimmed);
        }
    }
    if let Some(raw) = var("NBN_CACHE_TTL_SECS") {
        config.cache.ttl_secs = parse_positive(&raw, "NBN_CACHE_TTL_SECS")?;
    }
    if let Some(raw) = var("NBN_CACHE_EXPIRY_SECS") {
        config.cache.expiry_secs = parse_positive(&raw, "NBN_CACHE_EXPIRY_SECS")?;
    }
    if let Some(raw) = var("NBN_CACHE_MAX_ENTRIES") {
        config.cache.max_entries = parse_positive(&raw, "NBN_CACHE_MAX_ENTRIES")?;
    }
    if let Some(raw) = var("NBN_MAX_CONCURRENT_FETCHES") {
        config.scheduler.max_concurrent = parse_positive(&raw, "NBN_MAX_CONCURRENT_FETCHES")?;
    }
    if let Some(raw) = var("NBN_REQUESTS_PER_SECOND") {
        config.source.requests_per_second = parse_positive(&raw, "NBN_REQUESTS_PER_SECOND")?;
    }
    if let Some(raw) = var("NBN_FETCH_TIMEOUT_SECS") {
        config.source.timeout_secs = Some(parse_positive(&raw, "NBN_FETCH_TIMEOUT_SECS")?);
    }
    Ok(())
}

fn parse_config_file(contents: &str, path: &Path) -> Result<LookupConfig, Error> {
    toml::from_str(contents)
        .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))
}

/// Load configuration from defaults, an optional TOML file, and the environment.
pub fn load_config(config_path: &Path) -> Result<LookupConfig, Error> {
    // 1. Load .env file from the working directory or its parents.
    if let Err(e) = dotenvy::dotenv() {
        tracing::debug!("No .env file loaded: {}", e);
    }

    // 2. Defaults, replaced wholesale by the file when present.
    let mut config = LookupConfig::default();
    if config_path.exists() {
        let contents = std::fs::read_to_string(config_path).map_err(|e| {
            Error::Config(format!("Failed to read {}: {}", config_path.display(), e))
        })?;
        config = parse_config_file(&contents, config_path)?;
    }

    // 3. Environment variables win.
    apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;

    validate_config(&config)?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        assert!(validate_config(&LookupConfig::default()).is_ok());
    }

    #[test]
    fn test_partial_file_keeps_field_defaults() {
        let config = parse_config_file(
            "[cache]\nttl_secs = 3600\n\n[scheduler]\nmax_concurrent = 2\n",
            Path::new("config.toml"),
        )
        .unwrap();
        assert_eq!(config.cache.ttl_secs, 3600);
        assert_eq!(config.cache.max_entries, 100);
        assert_eq!(config.scheduler.max_concurrent, 2);
        assert_eq!(config.source.extension, "geojson");
    }

    #[test]
    fn test_env_overrides_apply() {
        let mut config = LookupConfig::default();
        apply_env_overrides(
            &mut config,
            env(&[
                ("NBN_SNAPSHOT_BASE_URL", " http://localhost:9000/results "),
                ("NBN_CACHE_PATH", "/tmp/nbn.sqlite3"),
                ("NBN_CACHE_MAX_ENTRIES", "25"),
                ("NBN_FETCH_TIMEOUT_SECS", "15"),
            ]),
        )
        .unwrap();

        assert_eq!(config.source.base_url, "http://localhost:9000/results");
        assert_eq!(config.cache.path, PathBuf::from("/tmp/nbn.sqlite3"));
        assert_eq!(config.cache.max_entries, 25);
        assert_eq!(config.source.timeout_secs, Some(15));
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_env_rejects_zero_and_garbage() {
        let mut config = LookupConfig::default();
        let err = apply_env_overrides(&mut config, env(&[("NBN_MAX_CONCURRENT_FETCHES", "0")]))
            .unwrap_err();
        assert!(err.to_string().contains("NBN_MAX_CONCURRENT_FETCHES"));

        let err = apply_env_overrides(&mut config, env(&[("NBN_CACHE_TTL_SECS", "soon")]))
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_oversized_cache_values_are_rejected() {
        let mut config = LookupConfig::default();
        apply_env_overrides(
            &mut config,
            env(&[
                ("NBN_CACHE_TTL_SECS", "10000000000000000"),
                ("NBN_CACHE_EXPIRY_SECS", "18446744073709551615"),
                ("NBN_CACHE_MAX_ENTRIES", "18446744073709551615"),
            ]),
        )
        .unwrap();

        let message = validate_config(&config).unwrap_err().to_string();
        assert!(message.contains("cache.ttl_secs must be <="));
        assert!(message.contains("cache.expiry_secs must be <="));
        assert!(message.contains("cache.max_entries must be <="));
    }

    #[test]
    fn test_validation_collects_every_issue() {
        let mut config = LookupConfig::default();
        config.source.base_url = "ftp://example.com".into();
        config.cache.max_entries = 0;
        config.scheduler.max_concurrent = 0;
        config.cache.expiry_secs = config.cache.ttl_secs - 1;

        let message = validate_config(&config).unwrap_err().to_string();
        assert!(message.contains("source.base_url must be an http(s) URL"));
        assert!(message.contains("cache.max_entries must be > 0"));
        assert!(message.contains("scheduler.max_concurrent must be > 0"));
        assert!(message.contains("cache.expiry_secs must be >= cache.ttl_secs"));
    }
}
