//! LumaFlow - audio-driven stage lighting
//!
//! Command line front end: loads the configuration, sets up logging and
//! runs the pipeline on a synthetic signal.

#![warn(missing_docs)]

mod config;
mod logging_setup;
mod simulate;

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

use crate::config::AppConfig;

#[derive(Parser)]
#[command(name = "lumaflow")]
#[command(about = "Audio-driven stage lighting pipeline", long_about = None, version)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// More log output; repeat for trace
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline on a synthetic signal
    Simulate {
        /// Length of the run in seconds
        #[arg(short, long)]
        duration: Option<f64>,

        /// Pace frames at the audio rate
        #[arg(long)]
        realtime: bool,

        /// Tempo of the synthetic kick
        #[arg(long)]
        bpm: Option<f32>,

        /// Request a blackout at this time (ms)
        #[arg(long)]
        blackout_at: Option<u64>,
    },

    /// Validate the configuration and list the patch
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (mut config, base_dir) = AppConfig::load(cli.config.as_deref())?;
    let _log_guard = logging_setup::init(&config.logging, cli.verbose)?;
    info!("LumaFlow {} starting", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Simulate {
            duration,
            realtime,
            bpm,
            blackout_at,
        } => {
            let sim = &mut config.simulation;
            if let Some(duration) = duration {
                sim.duration_secs = duration;
            }
            if let Some(bpm) = bpm {
                sim.synthetic.bpm = bpm;
            }
            sim.realtime |= realtime;
            sim.blackout_at_ms = blackout_at.or(sim.blackout_at_ms);

            let summary = simulate::run(&config, base_dir.as_deref()).await?;
            print_summary(&summary);
        }
        Commands::Check => {
            let fixtures = config.fixtures(base_dir.as_deref())?;
            // Patch validation lives in the compositor
            lumaflow_control::Compositor::new(config.compositor.clone(), fixtures.clone())?;
            println!("Configuration OK: {} fixtures", fixtures.len());
            for f in &fixtures {
                println!(
                    "  #{:<4} {:<20} universe {:<3} {:>3}-{:<3} {}",
                    f.id,
                    f.name,
                    f.universe,
                    f.start_address,
                    f.end_address(),
                    f.profile.name
                );
            }
        }
    }

    Ok(())
}

fn print_summary(summary: &simulate::RunSummary) {
    println!(
        "Simulated {:.1} s{}",
        summary.duration_ms as f64 / 1000.0,
        if summary.interrupted { " (interrupted)" } else { "" }
    );
    println!(
        "  ticks {}  harmony jobs {} (dropped {}, stale ticks {})",
        summary.pipeline.ticks,
        summary.pipeline.harmony_jobs,
        summary.pipeline.harmony_jobs_dropped,
        summary.pipeline.harmony_stale_ticks
    );
    println!(
        "  tempo {:.1} bpm, final section {:?}, mode {:?}",
        summary.final_bpm, summary.final_section, summary.events.last_mode
    );
    for (at_ms, section) in &summary.events.sections {
        println!("    {:>8} ms  -> {:?}", at_ms, section);
    }
    println!(
        "  events: {} context, {} predictions, {} dropped",
        summary.events.count("context_updated"),
        summary.events.count("prediction"),
        summary.dropped_events
    );
    println!(
        "  effects triggered {}, optics commits {}, universe sends {}",
        summary.effects_triggered, summary.optics_commits, summary.universe_sends
    );
}
