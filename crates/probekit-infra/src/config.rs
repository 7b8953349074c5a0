//! Configuration loader for Probekit.
//!
//! Reads `config.toml` from the data directory (`~/.probekit/` in production)
//! and deserializes it into [`ProbekitConfig`]. Falls back to defaults when
//! the file is missing or malformed.

use std::path::Path;

use probekit_types::config::ProbekitConfig;

/// Smallest accepted auto-save period.
const MIN_AUTO_SAVE_INTERVAL_MS: u64 = 100;

/// Load configuration from `{data_dir}/config.toml`.
///
/// - If the file does not exist, returns [`ProbekitConfig::default()`].
/// - If the file exists but fails to parse, logs a warning and returns the default.
/// - Otherwise returns the parsed config with the auto-save floor applied.
pub async fn load_config(data_dir: &Path) -> ProbekitConfig {
    let config_path = data_dir.join("config.toml");

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config.toml found at {}, using defaults", config_path.display());
            return ProbekitConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return ProbekitConfig::default();
        }
    };

    match toml::from_str::<ProbekitConfig>(&content) {
        Ok(mut config) => {
            if config.checkpoint.auto_save_interval_ms < MIN_AUTO_SAVE_INTERVAL_MS {
                tracing::warn!(
                    configured = config.checkpoint.auto_save_interval_ms,
                    floor = MIN_AUTO_SAVE_INTERVAL_MS,
                    "auto_save_interval_ms below floor, clamping"
                );
                config.checkpoint.auto_save_interval_ms = MIN_AUTO_SAVE_INTERVAL_MS;
            }
            config
        }
        Err(err) => {
            tracing::warn!("Failed to parse {}: {err}, using defaults", config_path.display());
            ProbekitConfig::default()
        }
    }
}
