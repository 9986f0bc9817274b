use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sketchpad::config::{Config, LogFormat};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "sketchpad")]
#[command(version, about = "Turn hand-drawn sketches into running web UIs")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Operator log format: pretty or json. Overrides sketchpad.toml.
    #[arg(long, global = true)]
    pub log_format: Option<LogFormat>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP server
    Serve {
        /// Port to serve on (defaults to sketchpad.toml, then 3141)
        #[arg(short, long)]
        port: Option<u16>,

        /// Address to bind
        #[arg(long)]
        host: Option<String>,

        /// Enable dev mode (CORS permissive for a local frontend dev server)
        #[arg(long)]
        dev: bool,
    },
    /// Generate a UI from one sketch image and print the progress events
    Generate {
        /// Path to the sketch (PNG)
        image: PathBuf,

        /// Free-form style guide
        #[arg(short, long, default_value = "")]
        style: String,

        /// Extra instructions for the generator
        #[arg(short, long, default_value = "")]
        prompt: String,

        /// Palette overrides, e.g. "primary=#111827,accent=#f59e0b"
        #[arg(long)]
        palette: Option<String>,

        /// Reuse this sandbox instead of creating one
        #[arg(long)]
        sandbox_id: Option<String>,

        /// Print one JSON object per event
        #[arg(long)]
        json: bool,

        /// Open the sandbox URL in a browser when done
        #[arg(long)]
        open: bool,
    },
    /// Manage sandboxes
    Sandbox {
        #[command(subcommand)]
        command: SandboxCommands,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum SandboxCommands {
    /// Provision a sandbox and leave it running
    Prewarm,
    /// Terminate a sandbox
    Destroy { id: String },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Initialize a default sketchpad.toml file
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    let config = Config::load(&project_dir)?
        .with_verbose(cli.verbose)
        .with_log_format(cli.log_format);
    let _log_guard = sketchpad::logging::init(
        config.toml.logging.format,
        config.verbose,
        config.toml.logging.dir.as_deref(),
    );

    match &cli.command {
        Commands::Serve { port, host, dev } => {
            let config = config.with_server_overrides(host.clone(), *port, *dev);
            cmd::cmd_serve(&config).await?;
        }
        Commands::Generate {
            image,
            style,
            prompt,
            palette,
            sandbox_id,
            json,
            open,
        } => {
            cmd::cmd_generate(
                &config,
                cmd::GenerateArgs {
                    image,
                    style,
                    prompt,
                    palette: palette.as_deref(),
                    sandbox_id: sandbox_id.as_deref(),
                    json: *json,
                    open: *open,
                },
            )
            .await?;
        }
        Commands::Sandbox { command } => cmd::cmd_sandbox(&config, command.clone()).await?,
        Commands::Config { command } => cmd::cmd_config(&config, command.clone())?,
    }

    Ok(())
}
