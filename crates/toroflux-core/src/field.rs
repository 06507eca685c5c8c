//! Complex current field on a periodic grid.

use std::f64::consts::TAU;
use std::ops::{Add, Sub};

use num_complex::Complex64;
use rand::{Rng, RngCore};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::FieldConfig;
use crate::geometry::{TorusGeometry, grid_angle};

/// Guard added to denominators that may reach zero.
pub const EPSILON_GUARD: f64 = 1e-6;

/// Number of samples taken along the major circle for the circulation diagnostic.
const CIRCULATION_SAMPLES: usize = 100;

/// Amplitude of the healing vortex before it is scaled by signal strength.
const HEALING_AMPLITUDE: f64 = 0.3;

#[inline]
fn wrap_prev(k: usize, n: usize) -> usize {
    if k == 0 { n - 1 } else { k - 1 }
}

#[inline]
fn wrap_next(k: usize, n: usize) -> usize {
    if k + 1 == n { 0 } else { k + 1 }
}

/// Five-point periodic Laplacian written into `out`.
///
/// Each neighbour contributes `neighbour - centre`, so a constant field yields
/// exact zeros regardless of rounding.
pub fn laplacian_into<T>(cells: &[T], resolution: usize, out: &mut [T])
where
    T: Copy + Send + Sync + Add<Output = T> + Sub<Output = T>,
{
    let n = resolution;
    assert_eq!(cells.len(), n * n, "field length must be resolution²");
    assert_eq!(out.len(), n * n, "output length must be resolution²");

    out.par_chunks_mut(n).enumerate().for_each(|(i, row)| {
        let up = wrap_prev(i, n);
        let down = wrap_next(i, n);
        for (j, slot) in row.iter_mut().enumerate() {
            let left = wrap_prev(j, n);
            let right = wrap_next(j, n);
            let centre = cells[i * n + j];
            *slot = (cells[down * n + j] - centre)
                + (cells[up * n + j] - centre)
                + (cells[i * n + right] - centre)
                + (cells[i * n + left] - centre);
        }
    });
}

/// Allocating variant of [`laplacian_into`].
#[must_use]
pub fn laplacian<T>(cells: &[T], resolution: usize) -> Vec<T>
where
    T: Copy + Send + Sync + Default + Add<Output = T> + Sub<Output = T>,
{
    let mut out = vec![T::default(); cells.len()];
    laplacian_into(cells, resolution, &mut out);
    out
}

/// Forward-difference gradient magnitude, `|sqrt(gx² + gy²)|` with complex squaring.
pub fn gradient_magnitude_into(cells: &[Complex64], resolution: usize, out: &mut [f64]) {
    let n = resolution;
    assert_eq!(cells.len(), n * n, "field length must be resolution²");
    assert_eq!(out.len(), n * n, "output length must be resolution²");

    out.par_chunks_mut(n).enumerate().for_each(|(i, row)| {
        let down = wrap_next(i, n);
        for (j, slot) in row.iter_mut().enumerate() {
            let right = wrap_next(j, n);
            let centre = cells[i * n + j];
            let gx = cells[down * n + j] - centre;
            let gy = cells[i * n + right] - centre;
            *slot = (gx * gx + gy * gy).norm().sqrt();
        }
    });
}

/// Allocating variant of [`gradient_magnitude_into`].
#[must_use]
pub fn gradient_magnitude(cells: &[Complex64], resolution: usize) -> Vec<f64> {
    let mut out = vec![0.0; cells.len()];
    gradient_magnitude_into(cells, resolution, &mut out);
    out
}

fn standard_normal(rng: &mut dyn RngCore) -> f64 {
    // Box-Muller; u1 is kept away from zero so ln stays finite.
    let u1: f64 = rng.random::<f64>().max(f64::MIN_POSITIVE);
    let u2: f64 = rng.random::<f64>();
    (-2.0 * u1.ln()).sqrt() * (TAU * u2).cos()
}

/// Outcome of a single [`ToroidalField::update`].
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct FieldTick {
    /// `Σ|current|` immediately after renormalization.
    pub renormalized_total: f64,
    /// Cells whose force exceeded the projection threshold.
    pub clipped_forces: usize,
    /// Cells flagged by zero-risk detection (zero when detection did not run or fire).
    pub zero_risk_cells: usize,
    /// Strength passed to the healing response, when it ran.
    pub healing_strength: Option<f64>,
}

/// Complex current plus auxiliary real layers over an `n × n` periodic grid.
///
/// Cell `(i, j)` sits at angles `u = θ_j`, `v = θ_i`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToroidalField {
    resolution: usize,
    geometry: TorusGeometry,
    config: FieldConfig,
    theta: Vec<f64>,
    current: Vec<Complex64>,
    memory: Vec<f64>,
    potential: Vec<f64>,
    lambda_filter: Vec<f64>,
    zero_risk_signals: Vec<bool>,
    filtered_force: Vec<f64>,
    #[serde(skip)]
    scratch_current: Vec<Complex64>,
    #[serde(skip)]
    scratch_real: Vec<f64>,
}

impl ToroidalField {
    /// Build a field seeded with the double-vortex circulation.
    pub fn new(
        resolution: usize,
        geometry: TorusGeometry,
        config: FieldConfig,
        rng: &mut dyn RngCore,
    ) -> Self {
        assert!(resolution >= 3, "resolution must be at least 3");
        let len = resolution * resolution;
        let theta: Vec<f64> = (0..resolution).map(|k| grid_angle(k, resolution)).collect();

        let mut current = Vec::with_capacity(len);
        let mut memory = Vec::with_capacity(len);
        for i in 0..resolution {
            let v = theta[i];
            for &u in &theta {
                current.push(Complex64::new(u.cos() * v.sin(), u.sin() * v.cos()) * 0.5);
                memory.push((2.0 * u).sin() * (3.0 * v).cos());
            }
        }

        let potential = (0..len)
            .map(|_| standard_normal(rng) * config.potential_scale)
            .collect();

        Self {
            resolution,
            geometry,
            config,
            theta,
            current,
            memory,
            potential,
            lambda_filter: vec![1.0; len],
            zero_risk_signals: vec![false; len],
            filtered_force: vec![0.0; len],
            scratch_current: vec![Complex64::default(); len],
            scratch_real: vec![0.0; len],
        }
    }

    #[must_use]
    pub const fn resolution(&self) -> usize {
        self.resolution
    }

    #[must_use]
    pub const fn geometry(&self) -> &TorusGeometry {
        &self.geometry
    }

    #[must_use]
    pub const fn config(&self) -> &FieldConfig {
        &self.config
    }

    /// Swap update coefficients; the static potential keeps its original scale.
    pub fn set_config(&mut self, config: FieldConfig) {
        self.config = config;
    }

    /// Number of cells (`resolution²`).
    #[must_use]
    pub fn len(&self) -> usize {
        self.current.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.current.is_empty()
    }

    #[inline]
    #[must_use]
    pub fn offset(&self, i: usize, j: usize) -> usize {
        i * self.resolution + j
    }

    /// Angles `(u, v)` of cell `(i, j)`.
    #[must_use]
    pub fn cell_angles(&self, i: usize, j: usize) -> (f64, f64) {
        (self.theta[j], self.theta[i])
    }

    #[must_use]
    pub fn current(&self) -> &[Complex64] {
        &self.current
    }

    #[must_use]
    pub fn current_mut(&mut self) -> &mut [Complex64] {
        &mut self.current
    }

    #[must_use]
    pub fn memory(&self) -> &[f64] {
        &self.memory
    }

    #[must_use]
    pub fn memory_mut(&mut self) -> &mut [f64] {
        &mut self.memory
    }

    #[must_use]
    pub fn potential(&self) -> &[f64] {
        &self.potential
    }

    #[must_use]
    pub fn lambda_filter(&self) -> &[f64] {
        &self.lambda_filter
    }

    #[must_use]
    pub fn zero_risk_signals(&self) -> &[bool] {
        &self.zero_risk_signals
    }

    #[must_use]
    pub fn filtered_force(&self) -> &[f64] {
        &self.filtered_force
    }

    /// Whether any cell is currently flagged.
    #[must_use]
    pub fn any_zero_risk(&self) -> bool {
        self.zero_risk_signals.iter().any(|&flag| flag)
    }

    #[must_use]
    pub fn signal_count(&self) -> usize {
        self.zero_risk_signals.iter().filter(|&&flag| flag).count()
    }

    /// `Σ|current|` over the grid.
    #[must_use]
    pub fn total_magnitude(&self) -> f64 {
        self.current.iter().map(|c| c.norm()).sum()
    }

    #[must_use]
    pub fn mean_magnitude(&self) -> f64 {
        self.total_magnitude() / self.len() as f64
    }

    /// Clip forces to the projection threshold and fold the outcome into the filter memory.
    pub fn project_forces(&mut self, forces: &[f64]) -> Vec<f64> {
        assert_eq!(forces.len(), self.len(), "force length must be resolution²");
        let threshold = self.config.lambda_threshold;
        let decay = self.config.lambda_decay;
        let mut clipped = Vec::with_capacity(forces.len());
        for (force, filter) in forces.iter().zip(self.lambda_filter.iter_mut()) {
            let magnitude = force.abs();
            let passed = magnitude < threshold;
            if magnitude > threshold {
                clipped.push(force / magnitude * threshold);
            } else {
                clipped.push(*force);
            }
            *filter = decay * *filter + (1.0 - decay) * if passed { 1.0 } else { 0.0 };
        }
        clipped
    }

    /// Advance one explicit Euler step and renormalize.
    ///
    /// When `hoarding` is supplied, zero-risk detection (and the healing
    /// response, if it fires) runs after renormalization.
    pub fn update(&mut self, dt: f64, hoarding: Option<&[f64]>) -> FieldTick {
        let n = self.resolution;
        let cfg = self.config;
        let len = self.len();
        if self.scratch_current.len() != len {
            self.scratch_current.resize(len, Complex64::default());
        }
        if self.scratch_real.len() != len {
            self.scratch_real.resize(len, 0.0);
        }

        laplacian_into(&self.current, n, &mut self.scratch_current);
        gradient_magnitude_into(&self.current, n, &mut self.scratch_real);

        let forces: Vec<f64> = self.current.iter().map(|c| c.re * c.im).collect();
        let threshold = cfg.lambda_threshold;
        let clipped_forces = forces.iter().filter(|f| f.abs() > threshold).count();
        self.filtered_force = self.project_forces(&forces);

        let laplacian = &self.scratch_current;
        let gradient = &self.scratch_real;
        self.current
            .par_iter_mut()
            .zip(laplacian.par_iter())
            .zip(gradient.par_iter())
            .for_each(|((cell, lap), grad)| {
                let diffusion = *lap * cfg.diffusion_rate;
                let self_term = Complex64::new(cell.norm_sqr() * cfg.self_interaction, 0.0);
                let advection = Complex64::new(-cfg.advection_rate * *grad, 0.0);
                *cell += (diffusion + self_term + advection) * dt;
            });

        let renormalized_total = self.renormalize();

        laplacian_into(&self.memory, n, &mut self.scratch_real);
        for (value, lap) in self.memory.iter_mut().zip(self.scratch_real.iter()) {
            *value += cfg.memory_diffusion * lap * dt;
        }

        let mut tick = FieldTick {
            renormalized_total,
            clipped_forces,
            zero_risk_cells: 0,
            healing_strength: None,
        };

        if let Some(hoarding) = hoarding {
            let (detected, count) = self.detect_zero_risk(hoarding);
            if detected {
                let strength = count as f64 / self.len() as f64;
                self.healing_response(strength);
                tick.zero_risk_cells = count;
                tick.healing_strength = Some(strength);
            }
        }

        tick
    }

    /// Rescale so `Σ|current| = resolution²`, returning the new total.
    pub fn renormalize(&mut self) -> f64 {
        let total = self.total_magnitude();
        if total > 0.0 {
            let target = self.len() as f64;
            let scale = target / (total + EPSILON_GUARD);
            for cell in &mut self.current {
                *cell *= scale;
            }
            self.total_magnitude()
        } else {
            total
        }
    }

    /// Flag cells where a phase knot coincides with heavy hoarding.
    pub fn detect_zero_risk(&mut self, hoarding: &[f64]) -> (bool, usize) {
        assert_eq!(hoarding.len(), self.len(), "hoarding length must be resolution²");
        let phase_threshold = self.config.knot_phase_threshold;
        let signal_threshold = self.config.zero_risk_threshold;
        let mut count = 0;
        for ((flag, cell), &hoard) in self
            .zero_risk_signals
            .iter_mut()
            .zip(self.current.iter())
            .zip(hoarding.iter())
        {
            let knot = cell.arg().abs() > phase_threshold;
            let detection = if knot { hoard } else { 0.0 };
            *flag = detection > signal_threshold;
            if *flag {
                count += 1;
            }
        }
        (count > 0, count)
    }

    /// Add a gentle vortex on flagged cells and imprint it into memory.
    pub fn healing_response(&mut self, strength: f64) {
        let n = self.resolution;
        let gain = self.config.healing_gain;
        let imprint = self.config.memory_imprint;
        for i in 0..n {
            let v = self.theta[i];
            for j in 0..n {
                let u = self.theta[j];
                let idx = i * n + j;
                let healing = if self.zero_risk_signals[idx] {
                    Complex64::new(u.cos() * HEALING_AMPLITUDE, v.sin() * HEALING_AMPLITUDE)
                        * strength
                } else {
                    Complex64::default()
                };
                self.current[idx] += healing * gain;
                self.memory[idx] = (1.0 - imprint) * self.memory[idx] + imprint * healing.norm();
            }
        }
    }

    /// Inject the overflow pattern at `intensity`, clearing filters and signals.
    pub fn flood(&mut self, intensity: f64) -> Vec<Complex64> {
        let n = self.resolution;
        let gain = self.config.flood_gain;
        let mut overflow = Vec::with_capacity(self.len());
        for i in 0..n {
            let v = self.theta[i];
            for j in 0..n {
                let u = self.theta[j];
                let wave = Complex64::new(
                    (3.0 * u).sin() * (2.0 * v).cos(),
                    (2.0 * u).cos() * (3.0 * v).sin(),
                ) * intensity;
                self.current[i * n + j] += wave * gain;
                overflow.push(wave);
            }
        }
        self.lambda_filter.fill(1.0);
        self.zero_risk_signals.fill(false);
        overflow
    }

    /// Sum of the current sampled along the major circle at `v = 0`.
    #[must_use]
    pub fn circulation_invariant(&self) -> Complex64 {
        let n = self.resolution;
        let mut sum = Complex64::default();
        for k in 0..CIRCULATION_SAMPLES {
            let u = k as f64 * TAU / (CIRCULATION_SAMPLES - 1) as f64;
            let i = ((u / TAU) * (n - 1) as f64) as usize % n;
            sum += self.current[i * n];
        }
        sum
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{SeedableRng, rngs::SmallRng};

    fn test_field(resolution: usize) -> ToroidalField {
        let mut rng = SmallRng::seed_from_u64(7);
        ToroidalField::new(
            resolution,
            TorusGeometry::default(),
            FieldConfig::default(),
            &mut rng,
        )
    }

    #[test]
    fn laplacian_of_constant_field_is_exactly_zero() {
        let n = 9;
        let real = vec![0.1_f64; n * n];
        assert!(laplacian(&real, n).iter().all(|&v| v == 0.0));

        let complex = vec![Complex64::new(0.37, -1.9); n * n];
        assert!(
            laplacian(&complex, n)
                .iter()
                .all(|v| v.re == 0.0 && v.im == 0.0)
        );
    }

    #[test]
    fn laplacian_wraps_across_edges() {
        let n = 4;
        let mut cells = vec![0.0_f64; n * n];
        cells[0] = 1.0;
        let lap = laplacian(&cells, n);
        assert_eq!(lap[0], -4.0);
        // neighbours reached only through wraparound
        assert_eq!(lap[(n - 1) * n], 1.0);
        assert_eq!(lap[n - 1], 1.0);
        assert_eq!(lap[1], 1.0);
        assert_eq!(lap[n], 1.0);
        let sum: f64 = lap.iter().sum();
        assert!(sum.abs() < 1e-12);
    }

    #[test]
    fn gradient_of_constant_field_is_zero() {
        let n = 5;
        let cells = vec![Complex64::new(2.0, 1.0); n * n];
        assert!(gradient_magnitude(&cells, n).iter().all(|&g| g == 0.0));
    }

    #[test]
    fn gradient_uses_complex_squares() {
        let n = 3;
        let mut cells = vec![Complex64::default(); n * n];
        // gx at (0,0) = i, gy = 0 -> sqrt(|i²|) = 1
        cells[n] = Complex64::new(0.0, 1.0);
        let grad = gradient_magnitude(&cells, n);
        assert!((grad[0] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn initial_circulation_matches_double_vortex() {
        let field = test_field(8);
        let (u, v) = field.cell_angles(2, 5);
        let expected = Complex64::new(u.cos() * v.sin(), u.sin() * v.cos()) * 0.5;
        let actual = field.current()[field.offset(2, 5)];
        assert!((actual - expected).norm() < 1e-12);
        assert!(field.lambda_filter().iter().all(|&l| l == 1.0));
        assert!(!field.any_zero_risk());
    }

    #[test]
    fn update_renormalizes_total_magnitude() {
        let mut field = test_field(16);
        let target = 16.0 * 16.0;
        for _ in 0..25 {
            let tick = field.update(1.0 / 30.0, None);
            assert!(
                (tick.renormalized_total - target).abs() < 1e-6 * target,
                "total drifted to {}",
                tick.renormalized_total
            );
            assert!((field.total_magnitude() - target).abs() < 1e-6 * target);
            assert!(field.current().iter().all(|c| c.re.is_finite() && c.im.is_finite()));
        }
    }

    #[test]
    fn renormalize_leaves_zero_field_untouched() {
        let mut field = test_field(4);
        field.current_mut().fill(Complex64::default());
        assert_eq!(field.renormalize(), 0.0);
        assert!(field.current().iter().all(|c| c.norm() == 0.0));
    }

    #[test]
    fn projection_clips_and_tracks_filter() {
        let mut field = test_field(3);
        let mut forces = vec![0.1; 9];
        forces[0] = 2.0;
        forces[1] = -1.6;
        let clipped = field.project_forces(&forces);
        assert!((clipped[0] - 0.8).abs() < 1e-12);
        assert!((clipped[1] + 0.8).abs() < 1e-12);
        assert!((clipped[2] - 0.1).abs() < 1e-12);
        assert!((field.lambda_filter()[0] - 0.9).abs() < 1e-12);
        assert!((field.lambda_filter()[2] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn zero_risk_requires_knot_and_hoarding() {
        let mut field = test_field(4);
        let n = 4;
        field.current_mut().fill(Complex64::new(1.0, 0.0));
        // phase π/2 > 1.0 rad marks a knot
        field.current_mut()[0] = Complex64::new(0.0, 1.0);
        field.current_mut()[1] = Complex64::new(0.0, 1.0);

        let mut hoarding = vec![0.0; n * n];
        hoarding[0] = 0.9;
        hoarding[2] = 0.9; // no knot here
        hoarding[1] = 0.5; // knot, but below threshold

        let (detected, count) = field.detect_zero_risk(&hoarding);
        assert!(detected);
        assert_eq!(count, 1);
        assert!(field.zero_risk_signals()[0]);
        assert!(!field.zero_risk_signals()[1]);
        assert!(!field.zero_risk_signals()[2]);
    }

    #[test]
    fn healing_only_touches_flagged_cells_but_fades_memory() {
        let mut field = test_field(4);
        let mut hoarding = vec![0.0; 16];
        field.current_mut().fill(Complex64::new(1.0, 0.0));
        field.current_mut()[5] = Complex64::new(-1.0, 0.0);
        hoarding[5] = 1.0;
        field.detect_zero_risk(&hoarding);
        field.memory_mut().fill(1.0);

        let before = field.current().to_vec();
        field.healing_response(0.5);

        let (u, v) = field.cell_angles(1, 1);
        let healing = Complex64::new(u.cos() * 0.3, v.sin() * 0.3) * 0.5;
        assert!((field.current()[5] - (before[5] + healing * 0.1)).norm() < 1e-12);
        assert_eq!(field.current()[0], before[0]);
        assert!((field.memory()[0] - 0.95).abs() < 1e-12);
        assert!((field.memory()[5] - (0.95 + 0.05 * healing.norm())).abs() < 1e-12);
    }

    #[test]
    fn flood_resets_filters_and_signals() {
        let mut field = test_field(6);
        let hoarding = vec![1.0; 36];
        field.current_mut().fill(Complex64::new(-1.0, 0.0));
        assert!(field.detect_zero_risk(&hoarding).0);
        field.project_forces(&vec![5.0; 36]);

        let before = field.current().to_vec();
        let overflow = field.flood(0.5);
        assert!(!field.any_zero_risk());
        assert!(field.lambda_filter().iter().all(|&l| l == 1.0));
        for (idx, wave) in overflow.iter().enumerate() {
            assert!((field.current()[idx] - (before[idx] + *wave * 0.5)).norm() < 1e-12);
        }
        let (u, v) = field.cell_angles(1, 2);
        let expected = Complex64::new(
            (3.0 * u).sin() * (2.0 * v).cos(),
            (2.0 * u).cos() * (3.0 * v).sin(),
        ) * 0.5;
        assert!((overflow[field.offset(1, 2)] - expected).norm() < 1e-12);
    }

    #[test]
    fn circulation_samples_first_column() {
        let mut field = test_field(5);
        field.current_mut().fill(Complex64::default());
        for i in 0..5 {
            let idx = field.offset(i, 0);
            field.current_mut()[idx] = Complex64::new(1.0, -1.0);
        }
        let circulation = field.circulation_invariant();
        assert!((circulation.re - 100.0).abs() < 1e-9);
        assert!((circulation.im + 100.0).abs() < 1e-9);
    }

    #[test]
    fn update_with_hoarding_heals_flagged_cells() {
        let n = 4;
        let dt = 1.0 / 30.0;
        let mut field = test_field(n);
        // Uniform quarter-turn phase: no diffusion or advection, every cell knotted.
        field.current_mut().fill(Complex64::new(0.0, 1.0));
        let mut plain = field.clone();
        let mut hoarding = vec![0.0; n * n];
        hoarding[5] = 0.9;

        let baseline = plain.update(dt, None);
        assert_eq!(baseline.healing_strength, None);
        assert_eq!(baseline.zero_risk_cells, 0);

        let tick = field.update(dt, Some(&hoarding));
        assert_eq!(tick.zero_risk_cells, 1);
        assert_eq!(tick.healing_strength, Some(1.0 / 16.0));
        assert_eq!(field.signal_count(), 1);
        assert!(field.zero_risk_signals()[5]);

        let (u, v) = field.cell_angles(1, 1);
        let healing = Complex64::new(u.cos() * 0.3, v.sin() * 0.3) / 16.0;
        assert!((field.current()[5] - (plain.current()[5] + healing * 0.1)).norm() < 1e-12);
        for idx in (0..n * n).filter(|&idx| idx != 5) {
            assert_eq!(field.current()[idx], plain.current()[idx]);
        }
        let imprint = 0.95 * plain.memory()[5] + 0.05 * healing.norm();
        assert!((field.memory()[5] - imprint).abs() < 1e-12);
    }

    #[test]
    fn memory_diffuses_without_changing_its_sum() {
        let mut field = test_field(8);
        let before: f64 = field.memory().iter().sum();
        field.update(0.1, None);
        let after: f64 = field.memory().iter().sum();
        assert!((before - after).abs() < 1e-9);
    }
}
