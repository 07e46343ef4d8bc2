use crate::config::{LogLevel, SimulatorConfig};
use color_eyre::eyre::WrapErr;
use color_eyre::Result;
use log::info;
use std::fs::File;
use std::path::Path;

/// Load, parse and validate a configuration from a YAML file
pub fn load_config(config_path: &Path) -> Result<SimulatorConfig> {
    info!("Loading configuration from: {:?}", config_path);

    let file = File::open(config_path)
        .wrap_err_with(|| format!("Failed to open configuration '{}'", config_path.display()))?;
    let config: SimulatorConfig = serde_yaml::from_reader(file)
        .wrap_err_with(|| format!("Failed to parse configuration '{}'", config_path.display()))?;

    config.validate()?;
    info!(
        "Loaded {} PD publisher(s), {} PD subscriber(s), {} MD sender(s), {} MD listener(s)",
        config.pd_publishers.len(),
        config.pd_subscribers.len(),
        config.md_senders.len(),
        config.md_listeners.len()
    );

    Ok(config)
}

/// Parse and validate a configuration held in memory
pub fn load_config_str(yaml: &str) -> Result<SimulatorConfig> {
    let config: SimulatorConfig =
        serde_yaml::from_str(yaml).wrap_err("Failed to parse configuration")?;
    config.validate()?;
    Ok(config)
}

/// Command-line settings that take precedence over the YAML file
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub log_level: Option<LogLevel>,
}

/// Apply CLI overrides to a loaded configuration
pub fn apply_overrides(config: &mut SimulatorConfig, overrides: &CliOverrides) -> Result<()> {
    if let Some(level) = overrides.log_level {
        info!("Log level overridden to {:?}", level);
        config.logging.level = level;
    }

    config.validate()?;

    Ok(())
}
