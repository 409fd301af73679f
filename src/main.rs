//! Command-line driver for the acquisition engine.
//!
//! Runs simulated acquisitions against the mock microscope, prints generated
//! event streams in their wire form, and shows the effective configuration.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mimalloc::MiMalloc;
use rust_acqeng::acquisition::Acquisition;
use rust_acqeng::config::EngineConfig;
use rust_acqeng::engine::Engine;
use rust_acqeng::event::generators::{channels, multi_d_events, timelapse, z_stack, ChannelSetting};
use rust_acqeng::event::{wire, AcquisitionEvent, CaptureEvent};
use rust_acqeng::hardware::mock::MockCore;
use rust_acqeng::logging::{self, LogFormat};
use rust_acqeng::notification::AcqNotification;
use rust_acqeng::sink::BlackHoleSink;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{error, info};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[derive(Parser, Debug)]
#[command(name = "rust_acqeng")]
#[command(about = "Event-sequencing acquisition engine with a simulated microscope")]
#[command(version)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

/// Shape of the simulated multi-dimensional acquisition.
#[derive(clap::Args, Debug, Clone)]
struct Plan {
    /// Number of time points
    #[arg(long, default_value_t = 3)]
    time_points: usize,

    /// Interval between time points in ms
    #[arg(long, default_value_t = 0.0)]
    interval_ms: f64,

    /// Z slices per channel (0 disables the z-stack)
    #[arg(long, default_value_t = 5)]
    slices: i64,

    /// Z step in µm
    #[arg(long, default_value_t = 1.0)]
    z_step: f64,

    /// Channel presets of the `Channel` group
    #[arg(long, value_delimiter = ',', default_value = "DAPI,FITC")]
    channels: Vec<String>,

    /// Exposure per channel in ms
    #[arg(long, default_value_t = 10.0)]
    exposure_ms: f64,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a time-lapse x channel x z-stack acquisition on the mock core
    Run {
        #[command(flatten)]
        plan: Plan,

        /// Let the focus stage run hardware sequences
        #[arg(long)]
        sequence_z: bool,
    },
    /// Print the generated events in wire JSON, one per line
    Events {
        #[command(flatten)]
        plan: Plan,
    },
    /// Print the effective configuration as TOML
    Config,
}

impl Plan {
    fn events(&self) -> impl Iterator<Item = CaptureEvent> + Send {
        let mut modules = vec![timelapse(self.time_points, self.interval_ms)];
        let settings = self
            .channels
            .iter()
            .map(|preset| ChannelSetting::new("Channel", preset.as_str(), self.exposure_ms))
            .collect();
        modules.push(channels(settings));
        if self.slices > 0 {
            modules.push(z_stack(0, self.slices, self.z_step, 0.0));
        }
        multi_d_events(CaptureEvent::new(), modules)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => EngineConfig::load_from(path),
        None => EngineConfig::load(),
    }
    .context("loading configuration")?;

    let format = if cli.json_logs {
        LogFormat::Json
    } else {
        LogFormat::Pretty
    };
    logging::init_from_config(&config, format)?;

    match cli.command {
        Command::Run { plan, sequence_z } => run(config, plan, sequence_z).await,
        Command::Events { plan } => {
            for event in plan.events() {
                println!("{}", wire::to_string(&AcquisitionEvent::from(event))?);
            }
            Ok(())
        }
        Command::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

async fn run(config: EngineConfig, plan: Plan, sequence_z: bool) -> Result<()> {
    let mut core = MockCore::new();
    if sequence_z {
        core = core.with_stage_sequencing("Z", 1000);
    }
    let core = Arc::new(core);
    let engine = Engine::new(core.clone(), config);
    let sink = Arc::new(BlackHoleSink::new());
    let acquisition = Acquisition::new(&engine, sink.clone());

    let notifications = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&notifications);
    acquisition.add_listener(Arc::new(move |_: &AcqNotification| {
        counter.fetch_add(1, Ordering::Relaxed);
    }));

    info!(acquisition = %acquisition.id(), "Starting simulated acquisition");
    let submitted = acquisition.submit_iter(plan.events()).await?;
    if let Err(e) = submitted.wait().await {
        error!("Event submission failed: {}", e);
    }
    if let Err(e) = acquisition.finish().await?.wait().await {
        error!("Finishing failed: {}", e);
    }
    let outcome = acquisition.wait_for_completion().await;

    println!("Frames saved:        {}", sink.received());
    println!("Bytes saved:         {}", sink.bytes());
    println!("Notifications:       {}", notifications.load(Ordering::Relaxed));
    println!(
        "Sequences started:   {}",
        core.command_count("start_sequence_acquisition")
    );
    println!("Snaps:               {}", core.command_count("snap_image"));
    match outcome {
        Ok(()) => println!("Completed"),
        Err(cause) => println!("Aborted: {}", cause),
    }
    Ok(())
}
