use flexure_bayes::utils::sample_standard_normal;
use flexure_bayes::{
    AnalysisMode, ElasticPlate, EstimationConfig, FlexureParams, ForwardModel, SamplerConfig,
    SpectralObservation, bayes_real_estimate, extract_te_f, render_map_table,
    render_summary_table,
};
use rand::SeedableRng;
use rand::rngs::StdRng;

const GRID_POINTS: u32 = 300;
const GRID_SPACING_M: f64 = 20.0e3;
const TRUE_TE_KM: f64 = 40.0;
const TRUE_F: f64 = 0.5;
const ADMITTANCE_NOISE: f64 = 0.005;
const COHERENCE_NOISE: f64 = 0.1;
const NOISE_SEED: u64 = 2024;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let plate = ElasticPlate::default();
    let observation = simulate_observation(&plate)?;

    let mode = std::env::args()
        .nth(1)
        .map_or(Ok(AnalysisMode::Joint), |value| value.parse())?;
    let config = EstimationConfig {
        sampler: SamplerConfig {
            samples: 1_000,
            tunes: 1_000,
            ..SamplerConfig::default()
        },
        ..EstimationConfig::for_mode(mode)
    };

    println!("Synthetic Te/F recovery");
    println!(
        "Grid: {GRID_POINTS} points at {:.0} km, truth Te={TRUE_TE_KM} km, F={TRUE_F}",
        GRID_SPACING_M / 1.0e3
    );
    println!(
        "Noise: admittance={ADMITTANCE_NOISE}, coherence={COHERENCE_NOISE}, mode={mode}"
    );
    println!(
        "Sampler: chains={}, tunes={}, draws={}, seed={}",
        config.sampler.chains, config.sampler.tunes, config.sampler.samples, config.sampler.seed
    );

    let estimate = bayes_real_estimate(&observation, &plate, &config)?;
    let te_f = extract_te_f(&estimate.map_estimate, &estimate.summary)?;

    println!("\nPosterior summary\n{}", render_summary_table(&estimate.summary));
    println!("\nMAP estimate\n{}", render_map_table(&estimate.map_estimate));
    if let Some(correlation) = estimate.summary.correlation_between("Te", "F") {
        println!("Te-F posterior correlation: {correlation:.3}");
    }
    println!(
        "\nTe: mean={:.2} sd={:.2} MAP={:.2} (truth {TRUE_TE_KM})",
        te_f.mean_te, te_f.std_te, te_f.best_te
    );
    println!(
        "F:  mean={:.2} sd={:.2} MAP={:.3} (truth {TRUE_F})",
        te_f.mean_f, te_f.std_f, te_f.best_f
    );
    for chain in estimate.trace.chains() {
        println!(
            "chain {} (seed {}): acceptance {:?}",
            chain.stats.chain, chain.stats.seed, chain.stats.acceptance_rates
        );
    }

    Ok(())
}

fn simulate_observation(
    plate: &ElasticPlate,
) -> Result<SpectralObservation, Box<dyn std::error::Error>> {
    let length = f64::from(GRID_POINTS) * GRID_SPACING_M;
    let k = (1..=GRID_POINTS)
        .map(|j| std::f64::consts::TAU * f64::from(j) / length)
        .collect::<Vec<_>>();
    let truth = plate.evaluate(&k, FlexureParams::new(TRUE_TE_KM, TRUE_F))?;

    let mut rng = StdRng::seed_from_u64(NOISE_SEED);
    let adm = truth
        .admittance
        .iter()
        .map(|value| ADMITTANCE_NOISE.mul_add(sample_standard_normal(&mut rng), *value))
        .collect();
    let coh = truth
        .coherence
        .iter()
        .map(|value| COHERENCE_NOISE.mul_add(sample_standard_normal(&mut rng), *value))
        .collect();

    let n = k.len();
    Ok(SpectralObservation::new(
        k,
        adm,
        vec![ADMITTANCE_NOISE; n],
        coh,
        vec![COHERENCE_NOISE; n],
    ))
}
