//! Config command handlers

use std::path::PathBuf;

use anyhow::{Context, Result};

use nt2ws_core::Config;

use crate::output::{Output, OutputFormat};

/// Show current configuration
pub fn show(config_path: Option<&PathBuf>, output: &Output) -> Result<()> {
    let config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "port": config.port,
                    "bind_address": config.bind_address,
                    "robot": config.robot,
                    "team": config.team,
                    "remote_address": config.remote_address(),
                    "format": config.format.as_str(),
                    "type_tags": config.type_tags,
                    "allow_reconnect": config.allow_reconnect(),
                    "send_queue_capacity": config.send_queue_capacity,
                    "www_dir": config.www_dir,
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", config.listen_address());
        }
        OutputFormat::Human => {
            let effective_path = config_path
                .cloned()
                .unwrap_or_else(Config::config_file_path);
            println!("Configuration:");
            println!("  port:                {}", config.port);
            println!("  bind_address:        {}", config.bind_address);
            println!("  robot:               {}", config.robot);
            println!(
                "  team:                {}",
                config
                    .team
                    .map(|t| t.to_string())
                    .unwrap_or_else(|| "(not set)".to_string())
            );
            println!("  format:              {}", config.format.as_str());
            println!("  type_tags:           {}", config.type_tags);
            println!(
                "  allow_reconnect:     {}{}",
                config.allow_reconnect(),
                if config.allow_reconnect.is_none() {
                    " (format default)"
                } else {
                    ""
                }
            );
            println!("  send_queue_capacity: {}", config.send_queue_capacity);
            println!(
                "  www_dir:             {}",
                config
                    .www_dir
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "(not set)".to_string())
            );
            println!();
            println!("Remote address: {}", config.remote_address());
            println!("Config file:    {}", effective_path.display());
        }
    }

    Ok(())
}

/// Set a configuration value
pub fn set(
    key: String,
    value: String,
    config_path: Option<&PathBuf>,
    output: &Output,
) -> Result<()> {
    let save_path = config_path
        .cloned()
        .unwrap_or_else(Config::config_file_path);

    // Environment overrides apply to this process only; keep them out of the file
    let mut config = Config::load_file(&save_path).context("Failed to load configuration")?;

    config.set_field(&key, &value)?;
    config.validate()?;

    config
        .save_to_path(&save_path)
        .context("Failed to save configuration")?;

    output.success(&format!("Set {} = {}", key, value));

    Ok(())
}
