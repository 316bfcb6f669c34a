use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rawframe_core::ExportArtifact;
use rawframe_hw::StreamRequest;
use rawframe_session::{
    save_artifact, CaptureError, CaptureSession, Config, ExportKind, SourceKind, Transport,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "rawframe", about = "Capture 4K frames as PNG, log PNG, or raw RGBA uploads")]
struct Cli {
    /// TOML config file (RAWFRAME_* environment variables still override it)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// V4L2 device path
    #[arg(short, long, global = true)]
    device: Option<String>,

    /// Frame source: v4l2 or test-pattern
    #[arg(long, global = true)]
    source: Option<SourceKind>,

    /// Raw upload endpoint URL
    #[arg(long, global = true)]
    endpoint: Option<String>,

    /// Output directory for saved artifacts
    #[arg(short, long, global = true)]
    output: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List V4L2 capture devices
    Devices,
    /// Capture a lossless PNG
    Png,
    /// Capture a PNG with the log tone curve applied
    Log,
    /// Capture raw RGBA8 and upload it with metadata
    Raw {
        /// Also save the raw bytes and metadata locally
        #[arg(long)]
        save: bool,
    },
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    match cli.command {
        Commands::Devices => {
            let devices = rawframe_hw::list_devices();
            if devices.is_empty() {
                println!("No V4L2 capture devices found");
            }
            for dev in devices {
                println!("{}  {} ({}, {})", dev.path, dev.name, dev.driver, dev.bus);
            }
        }
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Commands::Png => capture(&config, ExportKind::Png, true).await?,
        Commands::Log => capture(&config, ExportKind::LogPng, true).await?,
        Commands::Raw { save } => capture(&config, ExportKind::Raw, save).await?,
    }

    Ok(())
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env(),
    };
    if let Some(device) = &cli.device {
        config.camera_device = device.clone();
    }
    if let Some(source) = cli.source {
        config.source = source;
    }
    if let Some(endpoint) = &cli.endpoint {
        config.upload_url = endpoint.clone();
    }
    if let Some(output) = &cli.output {
        config.output_dir = output.clone();
    }
    Ok(config)
}

/// Start a session, run one export, and stop the session on every exit path.
async fn capture(config: &Config, kind: ExportKind, save: bool) -> Result<()> {
    let transport = Transport::new(&config.upload_url, config.upload_timeout())
        .context("failed to build upload client")?;
    let session = CaptureSession::new(config.video_source(), StreamRequest::default(), transport);

    let result = tokio::select! {
        result = run_export(&session, kind) => Some(result),
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("interrupted");
            None
        }
    };

    session.stop();
    let status = session.status();

    let saved = match (&result, save) {
        (Some(Ok(artifact)), true) => Some(write_artifact(config, artifact).await?),
        _ => None,
    };
    if let Some(path) = saved {
        println!("saved {}", path.display());
    }
    println!("{}", serde_json::to_string_pretty(&status)?);

    match result {
        Some(Ok(_)) => Ok(()),
        Some(Err(e)) => Err(e).context("capture failed"),
        None => anyhow::bail!("capture interrupted"),
    }
}

async fn run_export(
    session: &CaptureSession,
    kind: ExportKind,
) -> Result<ExportArtifact, CaptureError> {
    session.start().await?;
    session.export(kind).await
}

async fn write_artifact(config: &Config, artifact: &ExportArtifact) -> Result<PathBuf> {
    save_artifact(&config.output_dir, artifact)
        .await
        .with_context(|| format!("failed to save {}", artifact.file_name()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_raw_with_globals() {
        let cli = Cli::try_parse_from([
            "rawframe",
            "raw",
            "--save",
            "--source",
            "test-pattern",
            "--endpoint",
            "http://10.1.1.1:8000/upload-raw",
        ])
        .unwrap();
        assert!(matches!(cli.command, Commands::Raw { save: true }));
        assert_eq!(cli.source, Some(SourceKind::TestPattern));

        let config = load_config(&cli).unwrap();
        assert_eq!(config.source, SourceKind::TestPattern);
        assert_eq!(config.upload_url, "http://10.1.1.1:8000/upload-raw");
    }

    #[test]
    fn test_rejects_unknown_source() {
        assert!(Cli::try_parse_from(["rawframe", "--source", "webcam", "png"]).is_err());
    }
}
