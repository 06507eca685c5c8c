//! Agents that exchange energy with the field cell beneath them.

use std::f64::consts::TAU;

use num_complex::Complex64;
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use slotmap::{SlotMap, new_key_type};

use crate::AgentConfig;
use crate::field::{EPSILON_GUARD, ToroidalField};
use crate::geometry::{Point3, TorusGeometry, cell_index, wrap_angle};

new_key_type! {
    /// Stable handle for agents backed by a generational slot map.
    pub struct AgentId;
}

/// Agent storage in insertion order.
pub type AgentArena = SlotMap<AgentId, Agent>;

/// Hoarders whose `1 - risk_tolerance` drops below this double their hoarding signal.
const ZERO_RISK_TOLERANCE: f64 = 0.1;
const ZERO_RISK_HOARDING_MULTIPLIER: f64 = 2.0;
const RISK_RECOVERY_FLOOR: f64 = 0.3;
const RISK_RECOVERY_FACTOR: f64 = 1.2;
const CAPACITY_GROWTH: f64 = 1.001;
const INTELLIGENCE_GROWTH: f64 = 1.0005;
const SOVEREIGNTY_AFFECTION_THRESHOLD: f64 = 0.7;
const SOVEREIGNTY_GROWTH: f64 = 1.01;
const OVERFLOW_STEP: f64 = 0.001;
const FLOOD_SOVEREIGNTY_BOOST: f64 = 1.5;

/// Behaviour an agent follows when it meets the field.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Give energy back to the field.
    #[default]
    Circulate,
    /// Extract energy from the field.
    Hoard,
}

/// Exchange an agent requests against its cell.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum AgentAction {
    Give { amount: f64 },
    Take { amount: f64, hoarding: f64 },
}

/// Single agent riding the torus surface.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Agent {
    pub ordinal: u32,
    u: f64,
    v: f64,
    position: Point3,
    pub strategy: Strategy,
    pub energy: f64,
    pub affection: f64,
    pub risk_tolerance: f64,
    pub capacity: f64,
    pub intelligence: f64,
    pub sovereignty: f64,
    pub overflow_potential: f64,
}

impl Agent {
    /// Agent at `(u, v)` with neutral stats.
    #[must_use]
    pub fn at_angles(
        ordinal: u32,
        u: f64,
        v: f64,
        strategy: Strategy,
        geometry: &TorusGeometry,
    ) -> Self {
        let u = wrap_angle(u);
        let v = wrap_angle(v);
        Self {
            ordinal,
            u,
            v,
            position: geometry.torus_coords(u, v),
            strategy,
            energy: 1.0,
            affection: 0.0,
            risk_tolerance: 0.5,
            capacity: 1.0,
            intelligence: 1.0,
            sovereignty: 0.0,
            overflow_potential: 0.0,
        }
    }

    /// Sample a fresh agent at a uniform random point on the torus.
    pub fn random(
        ordinal: u32,
        geometry: &TorusGeometry,
        config: &AgentConfig,
        rng: &mut dyn RngCore,
    ) -> Self {
        let u = rng.random_range(0.0..TAU);
        let v = rng.random_range(0.0..TAU);
        let strategy = if rng.random::<f64>() < config.circulate_fraction {
            Strategy::Circulate
        } else {
            Strategy::Hoard
        };
        let mut agent = Self::at_angles(ordinal, u, v, strategy, geometry);
        agent.energy = 1.0 + rng.random::<f64>();
        agent.affection = rng.random::<f64>();
        agent.risk_tolerance = 0.5 + rng.random::<f64>() * 0.5;
        agent.sovereignty = rng.random::<f64>();
        agent
    }

    /// Canonical toroidal angles `(u, v)`.
    #[must_use]
    pub const fn angles(&self) -> (f64, f64) {
        (self.u, self.v)
    }

    /// Cartesian position derived from the current angles.
    #[must_use]
    pub const fn position(&self) -> Point3 {
        self.position
    }

    /// Grid cell `(i, j)` the agent projects onto.
    #[must_use]
    pub fn cell(&self, resolution: usize) -> (usize, usize) {
        (
            cell_index(self.u, resolution),
            cell_index(self.v, resolution),
        )
    }

    #[must_use]
    pub fn is_circulating(&self) -> bool {
        self.strategy == Strategy::Circulate
    }

    /// Choose an exchange given the local current and potential, settling the agent's energy.
    pub fn decide(
        &mut self,
        local_current: Complex64,
        local_potential: f64,
        config: &AgentConfig,
    ) -> AgentAction {
        match self.strategy {
            Strategy::Circulate => {
                let amount = (self.energy * config.give_fraction)
                    .min(local_potential * config.potential_share);
                self.energy -= amount;
                AgentAction::Give { amount }
            }
            Strategy::Hoard => {
                let amount = (self.capacity * config.extract_fraction)
                    .min(local_current.norm() * config.current_share);
                let risk_factor = 1.0 - self.risk_tolerance;
                let hoarding = if risk_factor < ZERO_RISK_TOLERANCE {
                    amount * ZERO_RISK_HOARDING_MULTIPLIER
                } else {
                    amount
                };
                self.energy += amount;
                AgentAction::Take { amount, hoarding }
            }
        }
    }

    /// Strategy learning and slow stat growth after an exchange.
    pub fn evolve(
        &mut self,
        zero_risk_detected: bool,
        config: &AgentConfig,
        rng: &mut dyn RngCore,
    ) {
        if zero_risk_detected
            && self.strategy == Strategy::Hoard
            && rng.random::<f64>() < config.learn_probability
        {
            self.strategy = Strategy::Circulate;
            self.risk_tolerance =
                RISK_RECOVERY_FLOOR.max(self.risk_tolerance * RISK_RECOVERY_FACTOR);
        }

        if self.strategy == Strategy::Circulate {
            self.capacity *= CAPACITY_GROWTH;
            self.intelligence *= INTELLIGENCE_GROWTH;
        }

        if self.affection > SOVEREIGNTY_AFFECTION_THRESHOLD {
            self.sovereignty = (self.sovereignty * SOVEREIGNTY_GROWTH).min(1.0);
            self.overflow_potential += OVERFLOW_STEP;
        }
    }

    /// Advect along the local current and refresh the cartesian position.
    pub fn drift(
        &mut self,
        local_current: Complex64,
        dt: f64,
        config: &AgentConfig,
        geometry: &TorusGeometry,
    ) {
        self.u = wrap_angle(self.u + local_current.re * config.drift_rate * dt);
        self.v = wrap_angle(self.v + local_current.im * config.drift_rate * dt);
        self.position = geometry.torus_coords(self.u, self.v);
    }

    /// Switch to circulation and saturate overflow when a flood starts.
    pub fn join_flood(&mut self) {
        self.strategy = Strategy::Circulate;
        self.sovereignty = (self.sovereignty * FLOOD_SOVEREIGNTY_BOOST).min(1.0);
        self.overflow_potential = 1.0;
    }
}

/// Write an agent's action into field cell `idx`.
///
/// `local` is the value the agent read before deciding; later agents on the
/// same cell overwrite the hoarding entry.
pub fn apply_action(
    field: &mut ToroidalField,
    idx: usize,
    local: Complex64,
    action: AgentAction,
    hoarding: &mut [f64],
) {
    match action {
        AgentAction::Give { amount } => {
            let phase = local.arg();
            field.current_mut()[idx] += Complex64::from_polar(amount, phase);
        }
        AgentAction::Take {
            amount,
            hoarding: signal,
        } => {
            let magnitude = local.norm();
            let reduction = amount.min(magnitude);
            field.current_mut()[idx] *= 1.0 - reduction / (magnitude + EPSILON_GUARD);
            hoarding[idx] = signal;
        }
    }
}
