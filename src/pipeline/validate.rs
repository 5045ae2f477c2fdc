// src/pipeline/validate.rs

use std::path::Path;

use crate::error::Result;
use crate::models::Config;
use crate::utils::log;

/// Load and validate the configuration file, reporting the values that
/// shape a crawl.
pub fn run_validate(config_path: &Path) -> Result<Config> {
    log::header("Validating configuration");

    let mut config = Config::load(config_path)?;
    config.apply_env();

    match config.validate() {
        Ok(()) => {
            ::log::info!("Configuration OK: {}", config_path.display());
            log::sub_item(&format!("Endpoint: {}", config.github.endpoint));
            log::sub_item(&format!(
                "Token: {}",
                if config.github.token.is_some() {
                    "present"
                } else {
                    "missing (set GITHUB_TOKEN)"
                }
            ));
            log::sub_item(&format!(
                "Domain: {} .. {}",
                config.partition.domain_start,
                config.partition.resolved_domain_end()
            ));
            log::sub_item(&format!(
                "Windows: seed {}d, min {}d, max {}d",
                config.partition.seed_window_days,
                config.partition.min_window_days,
                config.partition.max_window_days
            ));
            log::sub_item(&format!(
                "Ceiling {} / page {}",
                config.partition.result_ceiling, config.partition.page_size
            ));
            log::sub_item(&format!(
                "Retries: {} x {}ms",
                config.retry.max_retries, config.retry.retry_delay_ms
            ));
            log::sub_item(&format!("Storage: {:?}", config.storage.backend));
            Ok(config)
        }
        Err(e) => {
            ::log::error!("Configuration invalid: {}", e);
            Err(e)
        }
    }
}
