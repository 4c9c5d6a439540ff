//! Single-site and block MCMC updates in the unconstrained space.

use rand::RngExt;
use rand::rngs::StdRng;

use crate::inference::StepTuning;
use crate::utils::sample_standard_normal;

/// Unconstrained log density seen by a step.
pub type LogDensityFn<'a> = dyn Fn(&[f64]) -> f64 + 'a;
/// Unconstrained log-density gradient seen by a gradient step.
pub type GradientFn<'a> = dyn Fn(&[f64]) -> Option<Vec<f64>> + 'a;

/// Current chain position and its log density.
#[derive(Debug, Clone)]
pub struct ChainPoint {
    pub position: Vec<f64>,
    pub log_density: f64,
}

/// Univariate slice sampler with stepping out and shrinkage.
///
/// Returns `true` if the coordinate moved.
pub fn slice_step(
    log_density: &LogDensityFn<'_>,
    point: &mut ChainPoint,
    index: usize,
    width: f64,
    tuning: StepTuning,
    rng: &mut StdRng,
) -> bool {
    let origin = point.position[index];
    let threshold = point.log_density + (1.0 - rng.random::<f64>()).ln();
    let mut scratch = point.position.clone();
    let mut evaluate = |value: f64| {
        scratch[index] = value;
        log_density(&scratch)
    };

    let mut left = width.mul_add(-rng.random::<f64>(), origin);
    let mut right = left + width;
    let mut left_budget = rng.random_range(0..tuning.slice_max_steps_out);
    let mut right_budget = tuning.slice_max_steps_out - 1 - left_budget;
    while left_budget > 0 && evaluate(left) > threshold {
        left -= width;
        left_budget -= 1;
    }
    while right_budget > 0 && evaluate(right) > threshold {
        right += width;
        right_budget -= 1;
    }

    for _ in 0..tuning.slice_max_shrinks {
        let candidate = (right - left).mul_add(rng.random::<f64>(), left);
        let candidate_log_density = evaluate(candidate);
        if candidate_log_density > threshold {
            point.position[index] = candidate;
            point.log_density = candidate_log_density;
            return true;
        }
        if candidate < origin {
            left = candidate;
        } else {
            right = candidate;
        }
    }
    false
}

/// Gaussian random-walk Metropolis update of one coordinate.
pub fn metropolis_step(
    log_density: &LogDensityFn<'_>,
    point: &mut ChainPoint,
    index: usize,
    scale: f64,
    rng: &mut StdRng,
) -> bool {
    let mut proposal = point.position.clone();
    proposal[index] += scale * sample_standard_normal(rng);
    let proposal_log_density = log_density(&proposal);
    if proposal_log_density.is_finite()
        && should_accept(proposal_log_density - point.log_density, rng)
    {
        point.position = proposal;
        point.log_density = proposal_log_density;
        true
    } else {
        false
    }
}

/// Metropolis-adjusted Langevin update of the coordinates in `indices`.
///
/// `step_sizes[j]` is the step size of coordinate `indices[j]`. Only those
/// gradient components are read, so other coordinates may have `NaN`
/// derivatives. Returns `false` without moving when a needed component is
/// unavailable at either end.
pub fn langevin_step(
    log_density: &LogDensityFn<'_>,
    gradient: &GradientFn<'_>,
    point: &mut ChainPoint,
    indices: &[usize],
    step_sizes: &[f64],
    rng: &mut StdRng,
) -> bool {
    let usable = |values: &[f64]| {
        indices
            .iter()
            .all(|&index| values.get(index).is_some_and(|value| value.is_finite()))
    };
    let current_gradient = match gradient(&point.position) {
        Some(values) if usable(values.as_slice()) => values,
        _ => return false,
    };

    let mut proposal = point.position.clone();
    for (&index, &step) in indices.iter().zip(step_sizes) {
        let drift = 0.5 * step * step * current_gradient[index];
        proposal[index] = step.mul_add(
            sample_standard_normal(rng),
            point.position[index] + drift,
        );
    }

    let proposal_log_density = log_density(&proposal);
    if !proposal_log_density.is_finite() {
        return false;
    }
    let proposal_gradient = match gradient(&proposal) {
        Some(values) if usable(values.as_slice()) => values,
        _ => return false,
    };

    let forward = transition_log_density(
        &proposal,
        &point.position,
        &current_gradient,
        indices,
        step_sizes,
    );
    let backward = transition_log_density(
        &point.position,
        &proposal,
        &proposal_gradient,
        indices,
        step_sizes,
    );
    if should_accept(
        proposal_log_density - point.log_density + backward - forward,
        rng,
    ) {
        point.position = proposal;
        point.log_density = proposal_log_density;
        true
    } else {
        false
    }
}

/// Log density (up to a constant) of a Langevin move `from -> to`.
fn transition_log_density(
    to: &[f64],
    from: &[f64],
    from_gradient: &[f64],
    indices: &[usize],
    step_sizes: &[f64],
) -> f64 {
    indices
        .iter()
        .zip(step_sizes)
        .map(|(&index, &step)| {
            let variance = step * step;
            let mean = (0.5 * variance).mul_add(from_gradient[index], from[index]);
            let centered = to[index] - mean;
            -centered * centered / (2.0 * variance)
        })
        .sum()
}

pub fn should_accept(log_acceptance: f64, rng: &mut StdRng) -> bool {
    log_acceptance >= 0.0 || rng.random::<f64>().ln() < log_acceptance
}

/// Multiplicative scale change for an observed acceptance rate.
pub fn adaptation_factor(acceptance: f64, target: (f64, f64), tuning: StepTuning) -> f64 {
    if acceptance < target.0 {
        tuning.scale_decrease_factor
    } else if acceptance > target.1 {
        tuning.scale_increase_factor
    } else {
        1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::{mean, population_std};
    use rand::SeedableRng;

    fn standard_normal(position: &[f64]) -> f64 {
        -0.5 * position.iter().map(|value| value * value).sum::<f64>()
    }

    fn standard_normal_gradient(position: &[f64]) -> Option<Vec<f64>> {
        Some(position.iter().map(|value| -value).collect())
    }

    fn start(dimension: usize) -> ChainPoint {
        let position = vec![0.5; dimension];
        let log_density = standard_normal(&position);
        ChainPoint {
            position,
            log_density,
        }
    }

    #[test]
    fn slice_sampler_targets_standard_normal() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut point = start(1);
        let mut draws = Vec::new();
        for _ in 0..6_000 {
            slice_step(
                &standard_normal,
                &mut point,
                0,
                1.0,
                StepTuning::default(),
                &mut rng,
            );
            draws.push(point.position[0]);
        }
        assert!(mean(&draws).abs() < 0.1);
        assert!((population_std(&draws) - 1.0).abs() < 0.1);
    }

    #[test]
    fn slice_step_keeps_other_coordinates() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut point = start(2);
        slice_step(
            &standard_normal,
            &mut point,
            1,
            1.0,
            StepTuning::default(),
            &mut rng,
        );
        assert!((point.position[0] - 0.5).abs() < f64::EPSILON);
        assert!((point.log_density - standard_normal(&point.position)).abs() < 1.0e-12);
    }

    #[test]
    fn langevin_step_ignores_derivatives_of_other_coordinates() {
        let partial_gradient =
            |position: &[f64]| -> Option<Vec<f64>> { Some(vec![-position[0], f64::NAN]) };
        let mut rng = StdRng::seed_from_u64(9);
        let mut point = start(2);
        let mut moved = 0_usize;
        for _ in 0..200 {
            if langevin_step(
                &standard_normal,
                &partial_gradient,
                &mut point,
                &[0],
                &[0.9],
                &mut rng,
            ) {
                moved += 1;
            }
        }
        assert!(moved > 50, "moved {moved} times");
        assert!((point.position[1] - 0.5).abs() < f64::EPSILON);

        let blocked = langevin_step(
            &standard_normal,
            &partial_gradient,
            &mut point,
            &[1],
            &[0.9],
            &mut rng,
        );
        assert!(!blocked);
    }

    #[test]
    fn langevin_sampler_targets_standard_normal() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut point = start(2);
        let mut draws = Vec::new();
        let mut accepted = 0_usize;
        for _ in 0..8_000 {
            if langevin_step(
                &standard_normal,
                &standard_normal_gradient,
                &mut point,
                &[0, 1],
                &[0.9, 0.9],
                &mut rng,
            ) {
                accepted += 1;
            }
            draws.push(point.position[1]);
        }
        assert!(accepted > 4_000);
        assert!(mean(&draws).abs() < 0.1);
        assert!((population_std(&draws) - 1.0).abs() < 0.1);
    }

    #[test]
    fn langevin_step_without_gradient_stays_put() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut point = start(1);
        let moved = langevin_step(
            &standard_normal,
            &|_: &[f64]| -> Option<Vec<f64>> { None },
            &mut point,
            &[0],
            &[0.5],
            &mut rng,
        );
        assert!(!moved);
        assert!((point.position[0] - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn metropolis_rejects_impossible_proposals() {
        let mut rng = StdRng::seed_from_u64(9);
        let mut point = start(1);
        let moved = metropolis_step(
            &|_: &[f64]| f64::NEG_INFINITY,
            &mut point,
            0,
            0.5,
            &mut rng,
        );
        assert!(!moved);
    }

    #[test]
    fn adaptation_factor_respects_window() {
        let tuning = StepTuning::default();
        let window = (0.2, 0.35);
        assert!((adaptation_factor(0.1, window, tuning) - 0.9).abs() < f64::EPSILON);
        assert!((adaptation_factor(0.5, window, tuning) - 1.1).abs() < f64::EPSILON);
        assert!((adaptation_factor(0.3, window, tuning) - 1.0).abs() < f64::EPSILON);
    }
}
