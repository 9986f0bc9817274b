//! Sandbox management commands (`sketchpad sandbox`).

use anyhow::{Context, Result};
use console::style;
use sketchpad::config::Config;

use super::super::SandboxCommands;
use super::serve::docker_pool;

pub async fn cmd_sandbox(config: &Config, command: SandboxCommands) -> Result<()> {
    let pool = docker_pool(config)?;

    match command {
        SandboxCommands::Prewarm => {
            let handle = pool.prewarm().await.context("Failed to provision sandbox")?;
            println!("{} Sandbox ready", style("✓").green().bold());
            println!("  id:  {}", style(&handle.id).yellow());
            println!("  url: {}", handle.endpoint);
            println!();
            println!(
                "Pass --sandbox-id {} to `sketchpad generate` to reuse it.",
                handle.id
            );
        }
        SandboxCommands::Destroy { id } => {
            pool.destroy(&id).await;
            println!("Sandbox {} destroyed.", id);
        }
    }

    Ok(())
}
