use std::fs::{self, File};
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use toroflux_core::{RunSummary, TickEvents, WorldState};

use crate::command::AppliedCommands;

/// Machine-readable record of a headless run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub initial: FrameStats,
    pub frames: Vec<FrameStats>,
    pub summary: ReportSummary,
}

impl RunReport {
    #[must_use]
    pub fn new(world: &WorldState) -> Self {
        let initial = FrameStats::capture(0, world, None);
        Self {
            summary: ReportSummary::from_frames(&initial, &[], world.summary()),
            initial,
            frames: Vec::new(),
        }
    }

    pub fn record(&mut self, frame: u64, world: &WorldState, events: &TickEvents) {
        self.frames.push(FrameStats::capture(frame, world, Some(events)));
    }

    pub fn finalize(&mut self, world: &WorldState, applied: AppliedCommands) {
        let final_state = world.summary();
        let mut summary = ReportSummary::from_frames(&self.initial, &self.frames, final_state);
        summary.floods_triggered = applied.floods;
        summary.resets = applied.resets;
        summary.config_updates = applied.config_updates;
        self.summary = summary;
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let file = File::create(path)
            .with_context(|| format!("failed to create report {}", path.display()))?;
        serde_json::to_writer_pretty(file, self).context("failed to serialize run report")?;
        Ok(())
    }
}

/// World diagnostics captured after one frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrameStats {
    pub frame: u64,
    pub tick: u64,
    pub time: f64,
    pub circulation_magnitude: f64,
    pub total_magnitude: f64,
    pub agent_count: usize,
    pub circulating_agents: usize,
    pub mean_energy: f64,
    pub mean_sovereignty: f64,
    pub zero_risk_detected: bool,
    pub zero_risk_cells: usize,
    pub flood_intensity: Option<f64>,
}

impl FrameStats {
    #[must_use]
    pub fn capture(frame: u64, world: &WorldState, events: Option<&TickEvents>) -> Self {
        let summary = world.summary();
        Self {
            frame,
            tick: world.tick().0,
            time: world.time(),
            circulation_magnitude: summary.circulation_magnitude,
            total_magnitude: world.field().total_magnitude(),
            agent_count: summary.agent_count,
            circulating_agents: summary.circulating_agents,
            mean_energy: summary.mean_energy,
            mean_sovereignty: summary.mean_sovereignty,
            zero_risk_detected: events.is_some_and(|e| e.zero_risk_detected),
            zero_risk_cells: events.map_or(0, |e| e.zero_risk_cells),
            flood_intensity: events.and_then(|e| e.flood_intensity),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportSummary {
    pub frame_count: usize,
    pub floods_triggered: usize,
    pub resets: usize,
    pub config_updates: usize,
    pub zero_risk_frames: usize,
    pub flooded_frames: usize,
    pub circulation_mean: f64,
    pub circulation_min: f64,
    pub circulation_max: f64,
    pub final_state: RunSummary,
}

impl ReportSummary {
    fn from_frames(initial: &FrameStats, frames: &[FrameStats], final_state: RunSummary) -> Self {
        if frames.is_empty() {
            return Self {
                frame_count: 0,
                floods_triggered: 0,
                resets: 0,
                config_updates: 0,
                zero_risk_frames: 0,
                flooded_frames: 0,
                circulation_mean: initial.circulation_magnitude,
                circulation_min: initial.circulation_magnitude,
                circulation_max: initial.circulation_magnitude,
                final_state,
            };
        }

        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut sum = 0.0;
        for frame in frames {
            let value = frame.circulation_magnitude;
            min = min.min(value);
            max = max.max(value);
            sum += value;
        }

        Self {
            frame_count: frames.len(),
            floods_triggered: 0,
            resets: 0,
            config_updates: 0,
            zero_risk_frames: frames
                .iter()
                .filter(|f| f.zero_risk_detected)
                .count(),
            flooded_frames: frames
                .iter()
                .filter(|f| f.flood_intensity.is_some())
                .count(),
            circulation_mean: sum / frames.len() as f64,
            circulation_min: min,
            circulation_max: max,
            final_state,
        }
    }
}
