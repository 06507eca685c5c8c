//! Core simulation types for the toroflux workspace.
//!
//! A complex current field lives on a periodic grid wrapped around a torus.
//! Agents exchange energy with the cell beneath them and drift along the
//! local current, and a scripted flood can be injected on demand.

pub mod agent;
pub mod field;
pub mod geometry;

use rand::{SeedableRng, rngs::SmallRng};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use thiserror::Error;
use tracing::{debug, info};

pub use num_complex::Complex64;

pub use agent::{Agent, AgentAction, AgentArena, AgentId, Strategy, apply_action};
pub use field::{FieldTick, ToroidalField, gradient_magnitude, laplacian};
pub use geometry::{Point3, TorusGeometry, cell_index, grid_angle, wrap_angle};

/// High level simulation clock (ticks processed since construction or reset).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct Tick(pub u64);

impl Tick {
    /// Returns the next sequential tick.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }
}

/// Errors that can occur when constructing or reconfiguring world state.
#[derive(Debug, Error)]
pub enum WorldStateError {
    /// Indicates an invalid configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}

/// Coefficients of the field update and its scripted perturbations.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FieldConfig {
    /// Weight of the periodic Laplacian in the current update.
    pub diffusion_rate: f64,
    /// Weight of the `current · conj(current)` self term.
    pub self_interaction: f64,
    /// Weight of the (negative) gradient-magnitude term.
    pub advection_rate: f64,
    /// Weight of the Laplacian applied to the memory layer.
    pub memory_diffusion: f64,
    /// Force magnitude above which projection clips.
    pub lambda_threshold: f64,
    /// Retention factor of the projection filter memory, in `[0, 1]`.
    pub lambda_decay: f64,
    /// Phase magnitude (radians) above which a cell counts as knotted.
    pub knot_phase_threshold: f64,
    /// Hoarding level a knotted cell must exceed to signal zero risk.
    pub zero_risk_threshold: f64,
    /// Fraction of the healing vortex added to the current.
    pub healing_gain: f64,
    /// Blend factor of the healing magnitude into memory, in `[0, 1]`.
    pub memory_imprint: f64,
    /// Fraction of the flood pattern added to the current.
    pub flood_gain: f64,
    /// Standard deviation of the static potential layer.
    pub potential_scale: f64,
}

impl Default for FieldConfig {
    fn default() -> Self {
        Self {
            diffusion_rate: 0.01,
            self_interaction: 0.1,
            advection_rate: 0.05,
            memory_diffusion: 0.001,
            lambda_threshold: 0.8,
            lambda_decay: 0.9,
            knot_phase_threshold: 1.0,
            zero_risk_threshold: 0.7,
            healing_gain: 0.1,
            memory_imprint: 0.05,
            flood_gain: 0.5,
            potential_scale: 0.1,
        }
    }
}

/// Agent population and exchange parameters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentConfig {
    /// Probability that a spawned agent starts out circulating.
    pub circulate_fraction: f64,
    /// Fraction of its energy a circulator offers each tick.
    pub give_fraction: f64,
    /// Fraction of the local potential that caps a circulator's gift.
    pub potential_share: f64,
    /// Fraction of its capacity a hoarder tries to extract.
    pub extract_fraction: f64,
    /// Fraction of the local current magnitude that caps extraction.
    pub current_share: f64,
    /// Chance a hoarder converts after zero risk is detected.
    pub learn_probability: f64,
    /// Scale applied to the local current when advecting agents.
    pub drift_rate: f64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            circulate_fraction: 0.7,
            give_fraction: 0.1,
            potential_share: 0.5,
            extract_fraction: 0.2,
            current_share: 0.3,
            learn_probability: 0.3,
            drift_rate: 0.01,
        }
    }
}

/// Flood lifecycle parameters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FloodConfig {
    /// Intensity a freshly triggered flood starts at.
    pub initial_intensity: f64,
    /// Intensity lost per unit of simulated time.
    pub decay_rate: f64,
}

impl Default for FloodConfig {
    fn default() -> Self {
        Self {
            initial_intensity: 1.0,
            decay_rate: 0.2,
        }
    }
}

/// Largest accepted grid side; keeps `resolution²` cell buffers addressable.
pub const MAX_RESOLUTION: usize = 8_192;

/// Static configuration for a toroflux world.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TorofluxConfig {
    /// Cells along each grid axis.
    pub resolution: usize,
    /// Torus the grid is wrapped around.
    pub geometry: TorusGeometry,
    /// Number of agents spawned at construction and on reset.
    pub agent_count: usize,
    /// Simulated time advanced per tick.
    pub dt: f64,
    /// Optional RNG seed for reproducible worlds.
    pub rng_seed: Option<u64>,
    /// Maximum number of recent tick summaries retained in memory.
    pub history_capacity: usize,
    pub field: FieldConfig,
    pub agents: AgentConfig,
    pub flood: FloodConfig,
}

impl Default for TorofluxConfig {
    fn default() -> Self {
        Self {
            resolution: 64,
            geometry: TorusGeometry::default(),
            agent_count: 30,
            dt: 1.0 / 30.0,
            rng_seed: None,
            history_capacity: 1_000,
            field: FieldConfig::default(),
            agents: AgentConfig::default(),
            flood: FloodConfig::default(),
        }
    }
}

fn non_negative(values: &[f64]) -> bool {
    values.iter().all(|v| v.is_finite() && *v >= 0.0)
}

fn unit_interval(values: &[f64]) -> bool {
    values.iter().all(|v| (0.0..=1.0).contains(v))
}

impl TorofluxConfig {
    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), WorldStateError> {
        if self.resolution < 3 {
            return Err(WorldStateError::InvalidConfig(
                "resolution must be at least 3",
            ));
        }
        if self.resolution > MAX_RESOLUTION {
            return Err(WorldStateError::InvalidConfig("resolution is too large"));
        }
        if self.agent_count > u32::MAX as usize {
            return Err(WorldStateError::InvalidConfig("agent_count is too large"));
        }
        let geometry = self.geometry;
        if !(geometry.minor_radius > 0.0 && geometry.minor_radius < geometry.major_radius)
            || !geometry.major_radius.is_finite()
        {
            return Err(WorldStateError::InvalidConfig(
                "torus radii must satisfy 0 < minor_radius < major_radius",
            ));
        }
        if !(self.dt.is_finite() && self.dt > 0.0) {
            return Err(WorldStateError::InvalidConfig("dt must be positive"));
        }
        if self.history_capacity == 0 {
            return Err(WorldStateError::InvalidConfig(
                "history_capacity must be non-zero",
            ));
        }

        let field = &self.field;
        if !non_negative(&[
            field.diffusion_rate,
            field.self_interaction,
            field.advection_rate,
            field.memory_diffusion,
            field.knot_phase_threshold,
            field.zero_risk_threshold,
            field.healing_gain,
            field.flood_gain,
            field.potential_scale,
        ]) {
            return Err(WorldStateError::InvalidConfig(
                "field coefficients and thresholds must be non-negative",
            ));
        }
        if !(field.lambda_threshold.is_finite() && field.lambda_threshold > 0.0) {
            return Err(WorldStateError::InvalidConfig(
                "lambda_threshold must be positive",
            ));
        }
        if !unit_interval(&[field.lambda_decay, field.memory_imprint]) {
            return Err(WorldStateError::InvalidConfig(
                "lambda_decay and memory_imprint must lie in [0, 1]",
            ));
        }

        let agents = &self.agents;
        if !unit_interval(&[agents.circulate_fraction, agents.learn_probability]) {
            return Err(WorldStateError::InvalidConfig(
                "circulate_fraction and learn_probability must lie in [0, 1]",
            ));
        }
        if !non_negative(&[
            agents.give_fraction,
            agents.potential_share,
            agents.extract_fraction,
            agents.current_share,
            agents.drift_rate,
        ]) {
            return Err(WorldStateError::InvalidConfig(
                "agent exchange and drift parameters must be non-negative",
            ));
        }

        if !(self.flood.decay_rate.is_finite() && self.flood.decay_rate > 0.0) {
            return Err(WorldStateError::InvalidConfig(
                "flood decay_rate must be positive",
            ));
        }
        if !non_negative(&[self.flood.initial_intensity]) {
            return Err(WorldStateError::InvalidConfig(
                "flood initial_intensity must be non-negative",
            ));
        }
        Ok(())
    }

    /// Returns the configured RNG seed, generating one from entropy if absent.
    fn seeded_rng(&self) -> SmallRng {
        match self.rng_seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => {
                let seed: u64 = rand::random();
                SmallRng::seed_from_u64(seed)
            }
        }
    }
}

/// Scripted flood progress.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct FloodState {
    pub active: bool,
    pub intensity: f64,
}

/// Events emitted after processing a world tick.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct TickEvents {
    pub tick: Tick,
    /// Whether zero-risk detection fired during the field update.
    pub zero_risk_detected: bool,
    /// Cells flagged by that detection, counted before any flood clears them.
    pub zero_risk_cells: usize,
    /// Intensity the flood pattern was applied at, if a flood ran.
    pub flood_intensity: Option<f64>,
    /// Whether the flood ran out this tick.
    pub flood_ended: bool,
}

/// Per-tick diagnostics retained in the world history.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct TickSummary {
    pub tick: Tick,
    pub time: f64,
    pub circulation: Complex64,
    pub circulation_magnitude: f64,
    /// `Σ|current|` right after renormalization.
    pub renormalized_total: f64,
    /// `Σ|current|` at the end of the tick, after healing and flooding.
    pub total_magnitude: f64,
    pub clipped_forces: usize,
    pub zero_risk_cells: usize,
    pub agent_count: usize,
    pub circulating_agents: usize,
    pub mean_energy: f64,
    pub mean_sovereignty: f64,
    pub flood_intensity: Option<f64>,
}

/// End-of-run digest.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RunSummary {
    pub ticks: u64,
    pub total_time: f64,
    pub circulation: Complex64,
    pub circulation_magnitude: f64,
    pub zero_risk_events: u64,
    pub agent_count: usize,
    pub circulating_agents: usize,
    pub mean_sovereignty: f64,
    pub mean_energy: f64,
}

/// Control commands accepted by the world between ticks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlCommand {
    /// Start a flood at full intensity.
    TriggerFlood,
    /// Rebuild the world from its configuration.
    Reset,
    /// Swap in a new configuration. Geometry, resolution and population apply on the next reset.
    UpdateConfig(Box<TorofluxConfig>),
}

/// Apply a control command to the world.
pub fn apply_control_command(
    world: &mut WorldState,
    command: ControlCommand,
) -> Result<(), WorldStateError> {
    match command {
        ControlCommand::TriggerFlood => {
            world.trigger_flood();
            Ok(())
        }
        ControlCommand::Reset => {
            world.reset();
            Ok(())
        }
        ControlCommand::UpdateConfig(config) => world.update_config(*config),
    }
}

/// Aggregate world state: field, agents, flood, and history.
pub struct WorldState {
    config: TorofluxConfig,
    tick: Tick,
    time: f64,
    rng: SmallRng,
    field: ToroidalField,
    agents: AgentArena,
    hoarding: Vec<f64>,
    flood: FloodState,
    zero_risk_events: u64,
    next_ordinal: u32,
    history: VecDeque<TickSummary>,
}

impl fmt::Debug for WorldState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorldState")
            .field("config", &self.config)
            .field("tick", &self.tick)
            .field("time", &self.time)
            .field("flood", &self.flood)
            .field("agent_count", &self.agents.len())
            .finish()
    }
}

impl WorldState {
    /// Instantiate a new world using the supplied configuration.
    pub fn new(config: TorofluxConfig) -> Result<Self, WorldStateError> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: TorofluxConfig) -> Self {
        let mut rng = config.seeded_rng();
        let field = ToroidalField::new(config.resolution, config.geometry, config.field, &mut rng);
        let mut agents = AgentArena::with_capacity_and_key(config.agent_count);
        let mut next_ordinal = 0;
        for _ in 0..config.agent_count {
            agents.insert(Agent::random(
                next_ordinal,
                &config.geometry,
                &config.agents,
                &mut rng,
            ));
            next_ordinal += 1;
        }
        let cells = config.resolution * config.resolution;
        let history_capacity = config.history_capacity;
        Self {
            config,
            tick: Tick::zero(),
            time: 0.0,
            rng,
            field,
            agents,
            hoarding: vec![0.0; cells],
            flood: FloodState::default(),
            zero_risk_events: 0,
            next_ordinal,
            history: VecDeque::with_capacity(history_capacity),
        }
    }

    fn stage_agents(&mut self, dt: f64) {
        self.hoarding.fill(0.0);
        let resolution = self.field.resolution();
        // Signals from the previous field update drive learning this tick.
        let zero_risk_detected = self.field.any_zero_risk();
        let agent_config = self.config.agents;
        // The field keeps the geometry it was built with until the next reset.
        let geometry = *self.field.geometry();

        for agent in self.agents.values_mut() {
            let (i, j) = agent.cell(resolution);
            let idx = self.field.offset(i, j);
            let local_current = self.field.current()[idx];
            let local_potential = self.field.potential()[idx];

            let action = agent.decide(local_current, local_potential, &agent_config);
            apply_action(
                &mut self.field,
                idx,
                local_current,
                action,
                &mut self.hoarding,
            );
            agent.evolve(zero_risk_detected, &agent_config, &mut self.rng);
            agent.drift(local_current, dt, &agent_config, &geometry);
        }
    }

    fn stage_field(&mut self, dt: f64) -> FieldTick {
        let tick = self.field.update(dt, Some(&self.hoarding));
        if let Some(strength) = tick.healing_strength {
            self.zero_risk_events += 1;
            debug!(
                tick = self.tick.next().0,
                cells = tick.zero_risk_cells,
                strength,
                "zero-risk signal triggered healing response"
            );
        }
        tick
    }

    fn stage_flood(&mut self, dt: f64) -> (Option<f64>, bool) {
        if !self.flood.active {
            return (None, false);
        }
        self.flood.intensity -= self.config.flood.decay_rate * dt;
        let intensity = self.flood.intensity;
        self.field.flood(intensity);
        let ended = intensity <= 0.0;
        if ended {
            self.flood = FloodState::default();
            info!(tick = self.tick.next().0, "flood receded");
        }
        (Some(intensity), ended)
    }

    fn stage_history(&mut self, field_tick: &FieldTick, flood_intensity: Option<f64>) {
        let circulation = self.field.circulation_invariant();
        let agent_count = self.agents.len();
        let (circulating_agents, mean_energy, mean_sovereignty) = self.population_stats();
        let summary = TickSummary {
            tick: self.tick,
            time: self.time,
            circulation,
            circulation_magnitude: circulation.norm(),
            renormalized_total: field_tick.renormalized_total,
            total_magnitude: self.field.total_magnitude(),
            clipped_forces: field_tick.clipped_forces,
            zero_risk_cells: field_tick.zero_risk_cells,
            agent_count,
            circulating_agents,
            mean_energy,
            mean_sovereignty,
            flood_intensity,
        };
        while self.history.len() >= self.config.history_capacity {
            self.history.pop_front();
        }
        self.history.push_back(summary);
    }

    fn population_stats(&self) -> (usize, f64, f64) {
        let count = self.agents.len();
        if count == 0 {
            return (0, 0.0, 0.0);
        }
        let mut circulating = 0;
        let mut energy = 0.0;
        let mut sovereignty = 0.0;
        for agent in self.agents.values() {
            if agent.is_circulating() {
                circulating += 1;
            }
            energy += agent.energy;
            sovereignty += agent.sovereignty;
        }
        (
            circulating,
            energy / count as f64,
            sovereignty / count as f64,
        )
    }

    /// Execute one simulation tick: agents, field, flood, history.
    pub fn step(&mut self) -> TickEvents {
        let dt = self.config.dt;

        self.stage_agents(dt);
        let field_tick = self.stage_field(dt);
        let (flood_intensity, flood_ended) = self.stage_flood(dt);

        self.tick = self.tick.next();
        self.time += dt;
        self.stage_history(&field_tick, flood_intensity);

        TickEvents {
            tick: self.tick,
            zero_risk_detected: field_tick.healing_strength.is_some(),
            zero_risk_cells: field_tick.zero_risk_cells,
            flood_intensity,
            flood_ended,
        }
    }

    /// Start a flood at the configured intensity and pull every agent into circulation.
    pub fn trigger_flood(&mut self) {
        self.flood = FloodState {
            active: true,
            intensity: self.config.flood.initial_intensity,
        };
        for agent in self.agents.values_mut() {
            agent.join_flood();
        }
        info!(
            tick = self.tick.0,
            intensity = self.flood.intensity,
            agents = self.agents.len(),
            "flood triggered"
        );
    }

    /// Rebuild field, agents, RNG, and counters from the stored configuration.
    pub fn reset(&mut self) {
        let config = self.config.clone();
        *self = Self::build(config);
        info!(
            resolution = self.config.resolution,
            agents = self.agents.len(),
            "world reset"
        );
    }

    /// Replace the configuration after validating it.
    ///
    /// Field coefficients take effect immediately; geometry, resolution and
    /// agent count apply on the next [`reset`](Self::reset).
    pub fn update_config(&mut self, config: TorofluxConfig) -> Result<(), WorldStateError> {
        config.validate()?;
        self.field.set_config(config.field);
        while self.history.len() > config.history_capacity {
            self.history.pop_front();
        }
        self.config = config;
        Ok(())
    }

    /// Digest of the current state, suitable for end-of-run reporting.
    #[must_use]
    pub fn summary(&self) -> RunSummary {
        let circulation = self.field.circulation_invariant();
        let (circulating_agents, mean_energy, mean_sovereignty) = self.population_stats();
        RunSummary {
            ticks: self.tick.0,
            total_time: self.time,
            circulation,
            circulation_magnitude: circulation.norm(),
            zero_risk_events: self.zero_risk_events,
            agent_count: self.agents.len(),
            circulating_agents,
            mean_sovereignty,
            mean_energy,
        }
    }

    #[must_use]
    pub fn config(&self) -> &TorofluxConfig {
        &self.config
    }

    #[must_use]
    pub const fn tick(&self) -> Tick {
        self.tick
    }

    /// Simulated time elapsed since construction or reset.
    #[must_use]
    pub const fn time(&self) -> f64 {
        self.time
    }

    #[must_use]
    pub fn field(&self) -> &ToroidalField {
        &self.field
    }

    #[must_use]
    pub fn field_mut(&mut self) -> &mut ToroidalField {
        &mut self.field
    }

    /// Hoarding levels written by agents during the last tick.
    #[must_use]
    pub fn hoarding(&self) -> &[f64] {
        &self.hoarding
    }

    #[must_use]
    pub fn agents(&self) -> &AgentArena {
        &self.agents
    }

    #[must_use]
    pub fn agent(&self, id: AgentId) -> Option<&Agent> {
        self.agents.get(id)
    }

    #[must_use]
    pub fn agent_mut(&mut self, id: AgentId) -> Option<&mut Agent> {
        self.agents.get_mut(id)
    }

    #[must_use]
    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }

    /// Insert an agent, assigning it the next ordinal.
    pub fn spawn_agent(&mut self, mut agent: Agent) -> AgentId {
        agent.ordinal = self.next_ordinal;
        self.next_ordinal = self.next_ordinal.wrapping_add(1);
        self.agents.insert(agent)
    }

    pub fn remove_agent(&mut self, id: AgentId) -> Option<Agent> {
        self.agents.remove(id)
    }

    #[must_use]
    pub const fn flood(&self) -> FloodState {
        self.flood
    }

    /// Ticks on which zero-risk detection fired.
    #[must_use]
    pub const fn zero_risk_events(&self) -> u64 {
        self.zero_risk_events
    }

    /// Iterate over retained tick summaries, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &TickSummary> {
        self.history.iter()
    }

    /// Borrow the world RNG mutably for deterministic sampling.
    #[must_use]
    pub fn rng(&mut self) -> &mut SmallRng {
        &mut self.rng
    }
}
