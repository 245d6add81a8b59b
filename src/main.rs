//! sketch-servo CLI: drive a drawing robot from a camera feed.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sketch_servo::imaging::{CameraSource, OpenCvOps};
use sketch_servo::{
    load_artwork, ClientRole, CommandChannel, ControlLoop, ServoConfig, WebSocketConnector,
};

#[derive(Parser)]
#[command(name = "sketch-servo")]
#[command(about = "Visually servo a drawing robot along a target image on a detected canvas")]
#[command(version)]
struct Cli {
    /// Log level for this crate when RUST_LOG is not set.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Track the robot and send steering commands to the relay.
    Run(RunArgs),

    /// Print the default configuration as JSON.
    PrintConfig,
}

#[derive(Debug, Clone, Args)]
struct RunArgs {
    /// JSON configuration file; defaults are used for anything it omits.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Relay WebSocket URL (overrides the configuration).
    #[arg(long)]
    url: Option<String>,

    /// Target artwork image (overrides the configuration).
    #[arg(long)]
    artwork: Option<PathBuf>,

    /// Camera device index (overrides the configuration).
    #[arg(long)]
    camera: Option<i32>,

    /// Role announced to the relay.
    #[arg(long, value_enum)]
    role: Option<RoleArg>,

    /// Do not stream annotated frames to the UI.
    #[arg(long)]
    no_stream: bool,

    /// Track and steer without connecting to the relay.
    #[arg(long)]
    dry_run: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum RoleArg {
    Vision,
    Ui,
}

impl From<RoleArg> for ClientRole {
    fn from(role: RoleArg) -> Self {
        match role {
            RoleArg::Vision => ClientRole::Vision,
            RoleArg::Ui => ClientRole::Ui,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    match cli.command {
        Commands::Run(args) => run(args),
        Commands::PrintConfig => {
            let json = serde_json::to_string_pretty(&ServoConfig::default())?;
            println!("{json}");
            Ok(())
        }
    }
}

fn init_tracing(level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("sketch_servo={level},warn")));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_writer(std::io::stderr),
        )
        .init();
}

/// Ask the control loop to stop on Ctrl-C or SIGTERM
fn install_stop_handler(stop: Arc<AtomicBool>) -> Result<()> {
    ctrlc::set_handler(move || {
        if !stop.swap(true, Ordering::Relaxed) {
            info!("stop requested, finishing current frame");
        }
    })
    .context("installing signal handler")
}

fn load_config(args: &RunArgs) -> Result<ServoConfig> {
    let mut config = match &args.config {
        Some(path) => ServoConfig::from_json_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => ServoConfig::default(),
    };

    if let Some(url) = &args.url {
        config.command.url = url.clone();
    }
    if let Some(artwork) = &args.artwork {
        config.artwork_path = artwork.clone();
    }
    if let Some(camera) = args.camera {
        config.camera_index = camera;
    }
    if let Some(role) = args.role {
        config.command.role = role.into();
    }
    if args.no_stream {
        config.stream.enabled = false;
    }

    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn run(args: RunArgs) -> Result<()> {
    let config = load_config(&args)?;

    let artwork = load_artwork(&config.artwork_path)
        .with_context(|| format!("loading artwork {}", config.artwork_path.display()))?;
    let camera = CameraSource::open(config.camera_index).context("opening camera")?;

    let channel = if args.dry_run {
        info!("dry run, relay disabled");
        None
    } else {
        let connector = WebSocketConnector::new(config.command.url.clone(), config.command.connect_timeout());
        Some(CommandChannel::new(
            connector,
            config.command.role,
            config.command.reconnect_backoff(),
        ))
    };

    let mut servo = ControlLoop::new(&config, camera, OpenCvOps::new(), artwork, channel);
    install_stop_handler(servo.stop_handle())?;
    let frames = servo.run().context("control loop failed")?;
    info!(frames, "stopped");
    Ok(())
}
