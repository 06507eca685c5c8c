//! Headless driver plumbing for toroflux worlds.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use toroflux_core::{TorofluxConfig, WorldState};
use tracing::{info, warn};

pub mod command;
pub mod report;

pub use command::{AppliedCommands, CommandSchedule, ControlError};
pub use report::{FrameStats, ReportSummary, RunReport};
pub use toroflux_core::ControlCommand;

/// Individual knobs that take precedence over a loaded configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ConfigOverrides {
    pub seed: Option<u64>,
    pub resolution: Option<usize>,
    pub agents: Option<usize>,
    pub dt: Option<f64>,
}

impl ConfigOverrides {
    pub fn apply(&self, config: &mut TorofluxConfig) {
        if let Some(seed) = self.seed {
            config.rng_seed = Some(seed);
        }
        if let Some(resolution) = self.resolution {
            config.resolution = resolution;
        }
        if let Some(agents) = self.agents {
            config.agent_count = agents;
        }
        if let Some(dt) = self.dt {
            config.dt = dt;
        }
    }
}

/// Load a JSON configuration, falling back to defaults when no path is given.
pub fn load_config(path: Option<&Path>) -> Result<TorofluxConfig> {
    let Some(path) = path else {
        return Ok(TorofluxConfig::default());
    };
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let config = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse config {}", path.display()))?;
    Ok(config)
}

/// Step `world` for `frames` frames, applying scheduled commands before each step.
pub fn run_headless(
    world: &mut WorldState,
    frames: u64,
    schedule: &mut CommandSchedule,
) -> Result<RunReport, ControlError> {
    let mut report = RunReport::new(world);
    let mut applied = AppliedCommands::default();

    for frame in 1..=frames {
        applied.merge(schedule.apply_due(world, frame)?);
        let events = world.step();
        report.record(frame, world, &events);
    }

    if !schedule.is_empty() {
        warn!(
            remaining = schedule.len(),
            frames, "scheduled commands fall after the last frame and were skipped"
        );
    }

    report.finalize(world, applied);
    let summary = &report.summary;
    info!(
        frames = summary.frame_count,
        floods = summary.floods_triggered,
        resets = summary.resets,
        zero_risk_frames = summary.zero_risk_frames,
        circulation_mean = summary.circulation_mean,
        "headless run complete"
    );
    Ok(report)
}
