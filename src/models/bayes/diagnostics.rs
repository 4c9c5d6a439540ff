//! MCMC convergence and posterior-shape diagnostics.

use faer::Mat;
use num_traits::ToPrimitive;

use crate::inference::InferenceError;
use crate::utils::{mean, population_std, sample_variance, usize_to_f64};

/// Batches used by the batch-means Monte Carlo error.
pub const MC_ERROR_BATCHES: usize = 5;

/// Multi-chain effective sample size.
///
/// Autocorrelations come from the between/within variance estimate and the
/// pooled variogram at each lag; the sum is truncated at the first negative
/// pair of consecutive autocorrelations. Chains are cut to the shortest length.
#[must_use]
pub fn effective_sample_size(chains: &[&[f64]]) -> f64 {
    let n = chains.iter().map(|chain| chain.len()).min().unwrap_or(0);
    let m = chains.len();
    let total = usize_to_f64(m * n);
    if m == 0 || n < 4 {
        return total;
    }
    let chains = chains.iter().map(|chain| &chain[..n]).collect::<Vec<_>>();

    let var_plus = pooled_variance(&chains);
    if !(var_plus.is_finite() && var_plus > 0.0) {
        return total;
    }

    let rho = |lag: usize| -> f64 {
        let squared_steps = chains
            .iter()
            .map(|chain| {
                chain
                    .iter()
                    .zip(&chain[lag..])
                    .map(|(earlier, later)| {
                        let step = later - earlier;
                        step * step
                    })
                    .sum::<f64>()
            })
            .sum::<f64>();
        let variogram = squared_steps / usize_to_f64(m * (n - lag));
        1.0 - variogram / (2.0 * var_plus)
    };

    let mut rho_sum = 0.0;
    let mut lag = 1;
    while lag + 1 < n {
        let pair = rho(lag) + rho(lag + 1);
        if pair < 0.0 {
            break;
        }
        rho_sum += pair;
        lag += 2;
    }

    total / 2.0f64.mul_add(rho_sum, 1.0).max(f64::EPSILON)
}

/// Marginal posterior variance estimate `(n - 1)/n * W + B/n`.
fn pooled_variance(chains: &[&[f64]]) -> f64 {
    let m = chains.len();
    let n = chains.first().map_or(0, |chain| chain.len());
    let n_f64 = usize_to_f64(n);
    let chain_means = chains.iter().map(|chain| mean(chain)).collect::<Vec<_>>();
    let within = chains
        .iter()
        .zip(&chain_means)
        .map(|(chain, center)| sample_variance(chain, *center))
        .sum::<f64>()
        / usize_to_f64(m);
    let between = if m > 1 {
        n_f64 * sample_variance(&chain_means, mean(&chain_means))
    } else {
        0.0
    };
    ((n_f64 - 1.0) / n_f64).mul_add(within, between / n_f64)
}

/// Split potential scale reduction factor.
///
/// Each chain is cut to the shortest even length and split in half.
///
/// # Errors
///
/// Returns `InferenceError::InsufficientDraws` when chains hold fewer than
/// four draws.
pub fn split_rhat(chains: &[&[f64]]) -> Result<f64, InferenceError> {
    let shortest = chains.iter().map(|chain| chain.len()).min().unwrap_or(0);
    let used = shortest - shortest % 2;
    if chains.is_empty() || used < 4 {
        return Err(InferenceError::InsufficientDraws {
            minimum: 4,
            found: shortest,
        });
    }

    let half = used / 2;
    let halves = chains
        .iter()
        .flat_map(|chain| [&chain[..half], &chain[half..used]])
        .collect::<Vec<_>>();
    Ok(rhat_from_halves(&halves, half))
}

fn rhat_from_halves(chains: &[&[f64]], n: usize) -> f64 {
    let m = chains.len();
    let chain_means = chains.iter().map(|chain| mean(chain)).collect::<Vec<_>>();
    let within = chains
        .iter()
        .zip(&chain_means)
        .map(|(chain, center)| sample_variance(chain, *center))
        .sum::<f64>()
        / usize_to_f64(m);
    let n_f64 = usize_to_f64(n);
    let between = n_f64 * sample_variance(&chain_means, mean(&chain_means));

    if !(within.is_finite() && within > 0.0 && between.is_finite()) {
        return 1.0;
    }

    let var_plus = ((n_f64 - 1.0) / n_f64).mul_add(within, between / n_f64);
    if !var_plus.is_finite() || var_plus <= 0.0 {
        return 1.0;
    }

    (var_plus / within).sqrt().max(1.0)
}

/// Batch-means Monte Carlo standard error of the mean.
///
/// Draws are cut into `batches` equal consecutive batches (any remainder is
/// dropped) and the error is the standard deviation of batch means over
/// `sqrt(batches)`.
#[must_use]
pub fn mc_error(values: &[f64], batches: usize) -> f64 {
    if batches == 0 || values.len() < batches {
        return f64::NAN;
    }
    let size = values.len() / batches;
    let batch_means = values
        .chunks_exact(size)
        .take(batches)
        .map(mean)
        .collect::<Vec<_>>();
    population_std(&batch_means) / usize_to_f64(batches).sqrt()
}

/// Narrowest interval holding a `1 - alpha` fraction of the draws.
///
/// Returns `(NaN, NaN)` for an empty input.
#[must_use]
pub fn hpd_interval(values: &[f64], alpha: f64) -> (f64, f64) {
    let mut sorted = values
        .iter()
        .copied()
        .filter(|value| value.is_finite())
        .collect::<Vec<_>>();
    if sorted.is_empty() {
        return (f64::NAN, f64::NAN);
    }
    sorted.sort_by(f64::total_cmp);

    let n = sorted.len();
    let span = interval_span(n, alpha);
    if span >= n {
        return (sorted[0], sorted[n - 1]);
    }

    let (start, _) = sorted
        .iter()
        .zip(&sorted[span..])
        .map(|(low, high)| high - low)
        .enumerate()
        .fold((0, f64::INFINITY), |best, (index, width)| {
            if width < best.1 { (index, width) } else { best }
        });
    (sorted[start], sorted[start + span])
}

/// Index distance covering `floor((1 - alpha) * n)` draws.
fn interval_span(n: usize, alpha: f64) -> usize {
    let raw = ((1.0 - alpha) * usize_to_f64(n)).floor();
    raw.to_usize().unwrap_or(n)
}

/// Pearson correlation matrix of parameter columns.
///
/// Zero-variance columns give `NaN` off-diagonal entries.
#[must_use]
pub fn correlation_matrix(columns: &[Vec<f64>]) -> Mat<f64> {
    let dim = columns.len();
    let means = columns.iter().map(|column| mean(column)).collect::<Vec<_>>();
    let covariance = |i: usize, j: usize| -> f64 {
        let n = columns[i].len().min(columns[j].len());
        if n < 2 {
            return f64::NAN;
        }
        columns[i]
            .iter()
            .zip(&columns[j])
            .map(|(a, b)| (a - means[i]) * (b - means[j]))
            .sum::<f64>()
            / usize_to_f64(n - 1)
    };
    let scales = (0..dim).map(|i| covariance(i, i).sqrt()).collect::<Vec<_>>();
    Mat::from_fn(dim, dim, |i, j| {
        if i == j {
            1.0
        } else {
            covariance(i, j) / (scales[i] * scales[j])
        }
    })
}
