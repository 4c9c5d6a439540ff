//! Text rendering of posterior summaries and MAP estimates.

use comfy_table::{
    Attribute, Cell, Color, ContentArrangement, Table, presets::UTF8_FULL_CONDENSED,
};

use super::map::MapEstimate;
use super::posterior::{HIGH_RHAT_WARNING, LOW_ESS_WARNING, PosteriorSummary};

/// Render the posterior summary as a table with one row per parameter.
///
/// Poorly mixed parameters (`Rhat` or `n_eff` past the warning thresholds)
/// are highlighted.
#[must_use]
pub fn render_summary_table(summary: &PosteriorSummary) -> String {
    let mut table = make_table(&[
        "", "mean", "sd", "mc_error", "hpd_2.5", "hpd_97.5", "n_eff", "Rhat",
    ]);
    for row in &summary.rows {
        table.add_row(vec![
            Cell::new(row.name),
            value_cell(row.mean),
            value_cell(row.sd),
            value_cell(row.mc_error),
            value_cell(row.hpd_2_5),
            value_cell(row.hpd_97_5),
            flagged_cell(row.n_eff, row.n_eff < LOW_ESS_WARNING),
            flagged_cell(row.r_hat, row.r_hat > HIGH_RHAT_WARNING),
        ]);
    }
    table.to_string()
}

/// Render the MAP estimate with the optimizer that produced it.
#[must_use]
pub fn render_map_table(map_estimate: &MapEstimate) -> String {
    let mut table = make_table(&["parameter", "MAP"]);
    for (name, value) in &map_estimate.values {
        table.add_row(vec![Cell::new(name), Cell::new(format!("{value:.4}"))]);
    }
    table.add_row(vec![
        Cell::new("logp"),
        Cell::new(format!("{:.2}", map_estimate.log_density)),
    ]);
    table.add_row(vec![
        Cell::new("optimizer"),
        Cell::new(format!(
            "{} ({} iterations)",
            map_estimate.optimizer, map_estimate.iterations
        )),
    ]);
    table.to_string()
}

fn make_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(headers.iter().map(|h| Cell::new(*h)).collect::<Vec<_>>());
    table
}

fn value_cell(value: f64) -> Cell {
    Cell::new(format!("{value:.2}"))
}

fn flagged_cell(value: f64, flagged: bool) -> Cell {
    if flagged {
        value_cell(value)
            .fg(Color::Red)
            .add_attribute(Attribute::Bold)
    } else {
        value_cell(value)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use faer::Mat;

    use super::*;
    use crate::models::bayes::map::OptimizerKind;
    use crate::models::bayes::posterior::ParameterSummary;

    fn summary() -> PosteriorSummary {
        PosteriorSummary {
            rows: vec![
                ParameterSummary {
                    name: "Te",
                    mean: 40.12,
                    sd: 1.5,
                    mc_error: 0.05,
                    hpd_2_5: 37.2,
                    hpd_97_5: 43.1,
                    n_eff: 812.0,
                    r_hat: 1.0,
                },
                ParameterSummary {
                    name: "F",
                    mean: 0.5,
                    sd: 0.02,
                    mc_error: 0.0,
                    hpd_2_5: 0.46,
                    hpd_97_5: 0.54,
                    n_eff: 150.0,
                    r_hat: 1.2,
                },
            ],
            correlation: Mat::identity(2, 2),
        }
    }

    #[test]
    fn summary_table_lists_every_parameter() {
        let rendered = render_summary_table(&summary());
        for needle in ["mean", "hpd_97.5", "Rhat", "Te", "F", "40.12", "812.00"] {
            assert!(rendered.contains(needle), "missing {needle} in\n{rendered}");
        }
    }

    #[test]
    fn map_table_names_optimizer() {
        let map_estimate = MapEstimate {
            values: BTreeMap::from([("Te", 40.0), ("F", 0.5)]),
            log_density: -12.345,
            optimizer: OptimizerKind::Lbfgs,
            iterations: 17,
        };
        let rendered = render_map_table(&map_estimate);
        assert!(rendered.contains("L-BFGS (17 iterations)"));
        assert!(rendered.contains("-12.35") || rendered.contains("-12.34"));
        assert!(rendered.contains("40.0000"));
    }
}
