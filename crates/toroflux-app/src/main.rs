use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use toroflux_app::{CommandSchedule, ConfigOverrides, ControlCommand, load_config, run_headless};
use toroflux_core::WorldState;
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "toroflux",
    version,
    about = "Run a toroidal current-field simulation headlessly"
)]
struct Cli {
    /// JSON configuration file; missing fields keep their defaults.
    #[arg(long)]
    config: Option<PathBuf>,
    /// RNG seed for a reproducible run.
    #[arg(long)]
    seed: Option<u64>,
    /// Grid cells per axis.
    #[arg(long)]
    resolution: Option<usize>,
    /// Number of agents.
    #[arg(long)]
    agents: Option<usize>,
    /// Simulated time per tick.
    #[arg(long)]
    dt: Option<f64>,
    /// Number of frames to run.
    #[arg(long, default_value_t = 300)]
    ticks: u64,
    /// Trigger a flood before this frame (repeatable).
    #[arg(long = "flood-at", value_name = "FRAME")]
    flood_at: Vec<u64>,
    /// Reset the world before this frame (repeatable).
    #[arg(long = "reset-at", value_name = "FRAME")]
    reset_at: Vec<u64>,
    /// Write a JSON run report to this path.
    #[arg(long, env = "TOROFLUX_REPORT")]
    report: Option<PathBuf>,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut config = load_config(cli.config.as_deref())?;
    ConfigOverrides {
        seed: cli.seed,
        resolution: cli.resolution,
        agents: cli.agents,
        dt: cli.dt,
    }
    .apply(&mut config);

    let mut world = WorldState::new(config).context("failed to build world")?;
    let mut schedule = CommandSchedule::new();
    for &frame in &cli.flood_at {
        schedule.schedule(frame, ControlCommand::TriggerFlood);
    }
    for &frame in &cli.reset_at {
        schedule.schedule(frame, ControlCommand::Reset);
    }

    info!(
        resolution = world.config().resolution,
        agents = world.agent_count(),
        ticks = cli.ticks,
        scheduled = schedule.len(),
        "Starting toroflux simulation"
    );
    let report = run_headless(&mut world, cli.ticks, &mut schedule)?;

    let summary = world.summary();
    info!(
        total_time = summary.total_time,
        circulation_re = summary.circulation.re,
        circulation_im = summary.circulation.im,
        circulation_magnitude = summary.circulation_magnitude,
        zero_risk_events = summary.zero_risk_events,
        circulating = summary.circulating_agents,
        agents = summary.agent_count,
        mean_sovereignty = summary.mean_sovereignty,
        mean_energy = summary.mean_energy,
        "Simulation summary"
    );

    if let Some(path) = cli.report.as_deref() {
        report.write_json(path)?;
        info!(path = %path.display(), "wrote run report");
    }
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}
