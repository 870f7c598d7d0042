mod types;

pub use types::*;

use anyhow::{Context, Result};
use postforge_db::queries::settings;
use rusqlite::Connection;
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

    // Try default locations
    let default_paths = [
        "./config.toml",
        "./postforge.toml",
        "~/.config/postforge/config.toml",
        "/etc/postforge/config.toml",
    ];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            return load_config(path);
        }
    }

    // Return default config if no file found
    Ok(Config::default())
}

/// Validate configuration
fn validate_config(config: &Config) -> Result<()> {
    if let Some(parallelism) = config.general.max_parallelism {
        if parallelism == 0 {
            anyhow::bail!("general.max_parallelism cannot be 0");
        }
    }

    if config.validation.max_file_bytes == 0 {
        anyhow::bail!("validation.max_file_bytes cannot be 0");
    }

    if !config.publisher.endpoint.is_empty() && config.publisher.api_token.is_empty() {
        anyhow::bail!("publisher.endpoint is set but publisher.api_token is empty");
    }

    if !config.general.input_dir.as_os_str().is_empty() {
        let input_dir = config.input_dir();
        if !input_dir.exists() {
            tracing::warn!("Input directory does not exist: {:?}", input_dir);
        }
    }

    Ok(())
}

/// Sync the loaded config into the durable settings table, so stage toggles
/// and publisher parameters live alongside the pipeline state they govern.
pub fn sync_settings(conn: &Connection, config: &Config) -> postforge_common::Result<()> {
    for (stage, enabled) in &config.stages {
        settings::set(conn, settings::STAGES_SECTION, stage, &enabled.to_string())?;
    }

    settings::set(conn, "publisher", "endpoint", &config.publisher.endpoint)?;
    settings::set(
        conn,
        "publisher",
        "collection_id",
        &config.publisher.collection_id,
    )?;
    settings::set(
        conn,
        "publisher",
        "delay_ms",
        &config.publisher.delay_ms.to_string(),
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.publisher.delay_ms, 1100);
        assert_eq!(config.validation.max_file_bytes, 2 * 1024 * 1024);
        assert!(config.stages.is_empty());
    }

    #[test]
    fn test_parse_minimal_toml() {
        let config: Config = toml::from_str(
            r#"
            [general]
            data_dir = "/var/lib/postforge"
            input_dir = "inbox"

            [publisher]
            endpoint = "https://api.example.net"
            api_token = "secret"
            collection_id = "blog-1"

            [stages]
            archive = false
            "#,
        )
        .unwrap();

        assert_eq!(config.publisher.collection_id, "blog-1");
        assert_eq!(config.stages.get("archive"), Some(&false));
        // Relative paths resolve against the data dir.
        assert_eq!(
            config.input_dir(),
            Path::new("/var/lib/postforge").join("inbox")
        );
        // Untouched sections keep defaults.
        assert_eq!(config.publisher.delay_ms, 1100);
    }

    #[test]
    fn test_validate_rejects_zero_parallelism() {
        let mut config = Config::default();
        config.general.max_parallelism = Some(0);
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_rejects_endpoint_without_token() {
        let mut config = Config::default();
        config.publisher.endpoint = "https://api.example.net".into();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_sync_settings_writes_stage_flags() {
        let pool = postforge_db::pool::init_memory_pool().unwrap();
        let conn = postforge_db::pool::get_conn(&pool).unwrap();

        let mut config = Config::default();
        config.stages.insert("archive".into(), false);
        sync_settings(&conn, &config).unwrap();

        assert!(!settings::stage_enabled(&conn, "archive").unwrap());
        assert!(settings::stage_enabled(&conn, "scan").unwrap());
    }
}
