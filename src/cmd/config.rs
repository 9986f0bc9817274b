//! Configuration view and validation commands (`sketchpad config`).

use anyhow::Result;
use sketchpad::config::{CONFIG_FILE, Config, SketchpadToml};

use super::super::ConfigCommands;

pub fn cmd_config(config: &Config, command: Option<ConfigCommands>) -> Result<()> {
    let config_path = config.config_path();

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Sketchpad Configuration");
            println!("=======================");
            println!();

            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No {} found at {}", CONFIG_FILE, config_path.display());
                println!("Using defaults. Run 'sketchpad config init' to create one.");
            }
            println!();

            // Effective values, after environment and CLI overrides.
            let toml = &config.toml;
            println!("[server]");
            println!("  host = \"{}\"", toml.server.host);
            println!("  port = {}", toml.server.port);
            println!("  dev_mode = {}", toml.server.dev_mode);
            println!();
            println!("[sandbox]");
            println!("  template = \"{}\"", toml.sandbox.template);
            println!("  project_dir = \"{}\"", toml.sandbox.project_dir);
            println!("  component_path = \"{}\"", toml.sandbox.component_path);
            println!("  build_command = \"{}\"", toml.sandbox.build_command);
            println!("  dev_port = {}", toml.sandbox.dev_port);
            println!();
            println!("[model]");
            println!("  base_url = \"{}\"", toml.model.base_url);
            println!("  model = \"{}\"", toml.model.model);
            println!(
                "  api_key = {}",
                if config.api_key().is_some() { "set" } else { "not set" }
            );
            println!();
            println!("[repair]");
            println!("  max_iterations = {}", toml.repair.max_iterations);
            println!("  max_repair_turns = {}", toml.repair.max_repair_turns);
            println!("  build_timeout_secs = {}", toml.repair.build_timeout_secs);
            println!("  quality_score = {}", toml.repair.quality_score);
            println!();
            println!("[logging]");
            println!("  format = \"{}\"", toml.logging.format);
            if let Some(dir) = &toml.logging.dir {
                println!("  dir = \"{}\"", dir.display());
            }
            println!();
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config_path.exists() {
                println!("No {} found. Using defaults (valid).", CONFIG_FILE);
                return Ok(());
            }

            let warnings = config.toml.validate();
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("{} already exists at {}", CONFIG_FILE, config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            if !config.config_dir.exists() {
                std::fs::create_dir_all(&config.config_dir)?;
            }

            SketchpadToml::default().save(&config_path)?;

            println!("Created {} at {}", CONFIG_FILE, config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [server] host, port, dev_mode");
            println!("  - [sandbox] template, build_command, dev_command");
            println!("  - [model] model, temperatures");
            println!("  - [repair] max_iterations, max_repair_turns, timeouts");
            println!();
        }
    }

    Ok(())
}
