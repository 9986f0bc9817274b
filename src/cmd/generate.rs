//! One-shot generation from the terminal (`sketchpad generate`).

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use console::style;
use sketchpad::config::Config;
use sketchpad::generate::ColorPalette;
use sketchpad::pipeline::GenerationRequest;
use sketchpad::stream::{self, ProgressEvent};

use super::serve::build_pipeline;

pub struct GenerateArgs<'a> {
    pub image: &'a Path,
    pub style: &'a str,
    pub prompt: &'a str,
    pub palette: Option<&'a str>,
    pub sandbox_id: Option<&'a str>,
    pub json: bool,
    pub open: bool,
}

/// Read an image file into a `data:` URL.
pub fn image_data_url(path: &Path) -> Result<String> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read image {}", path.display()))?;
    let media_type = match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "image/png",
    };
    Ok(format!("data:{};base64,{}", media_type, STANDARD.encode(bytes)))
}

pub async fn cmd_generate(config: &Config, args: GenerateArgs<'_>) -> Result<()> {
    let color_palette = match args.palette {
        Some(spec) => ColorPalette::default()
            .with_overrides(spec)
            .map_err(|e| anyhow::anyhow!("Invalid --palette: {}", e))?,
        None => ColorPalette::default(),
    };
    let request = GenerationRequest {
        image: image_data_url(args.image)?,
        style_guide: args.style.to_string(),
        custom_prompt: args.prompt.to_string(),
        color_palette,
        existing_sandbox_id: args.sandbox_id.map(str::to_string),
    };

    let pipeline = Arc::new(build_pipeline(config)?);
    let (sink, mut rx) = stream::channel();
    let task = {
        let pipeline = Arc::clone(&pipeline);
        tokio::spawn(async move { pipeline.run(request, sink).await })
    };

    let mut final_url = None;
    let mut failed = false;
    while let Some(event) = rx.recv().await {
        if args.json {
            println!("{}", serde_json::to_string(&event)?);
        } else {
            print_event(&event);
        }
        match event {
            ProgressEvent::Complete {
                sandbox_url,
                success,
                ..
            } => {
                final_url = Some(sandbox_url);
                failed = !success;
            }
            ProgressEvent::Error { .. } => failed = true,
            _ => {}
        }
    }
    task.await.context("Generation task panicked")?;

    if args.open
        && let Some(url) = &final_url
        && let Err(e) = open::that(url)
    {
        eprintln!("Failed to open browser: {}", e);
    }

    if failed {
        anyhow::bail!("Generation did not produce a working build");
    }
    Ok(())
}

fn print_event(event: &ProgressEvent) {
    match event {
        ProgressEvent::Start { message } => println!("{} {}", style("▶").cyan(), style(message).bold()),
        ProgressEvent::Iteration { current, max } => {
            println!("{} iteration {}/{}", style("↻").dim(), style(current).cyan(), max)
        }
        ProgressEvent::Log { message } => println!("  {}", style(message).dim()),
        ProgressEvent::Code { code } => {
            println!("  {} component updated ({} lines)", style("✎").yellow(), code.lines().count())
        }
        ProgressEvent::Sandbox { url, sandbox_id } => println!(
            "  {} sandbox {} at {}",
            style("◆").cyan(),
            style(sandbox_id).yellow(),
            style(url).underlined()
        ),
        ProgressEvent::Quality { score } => println!("  quality score: {}", style(score).bold()),
        ProgressEvent::Complete {
            code,
            sandbox_url,
            iterations,
            success,
            ..
        } => {
            println!();
            if *success {
                println!("{} Build passing after {} iteration(s)", style("✓").green().bold(), iterations);
            } else {
                println!("{} Build still failing after {} iteration(s)", style("✗").red().bold(), iterations);
            }
            println!("  Preview: {}", style(sandbox_url).underlined());
            println!();
            println!("{}", code);
        }
        ProgressEvent::Error { message } => {
            eprintln!("{} {}", style("Error:").red().bold(), message)
        }
    }
}
