use crate::config::{AutopilotConfig, BiddingMode};
use plotters::prelude::*;
use rand::{rngs::StdRng, SeedableRng};
use rand_distr::{Beta, Distribution};
use std::fs;

/// Main function to generate all charts
pub fn generate_all_charts() -> Result<(), Box<dyn std::error::Error>> {
    // Create charts directory if it doesn't exist
    fs::create_dir_all("charts")?;

    let cfg = AutopilotConfig::default();
    generate_underspend_staircase(&cfg, BiddingMode::Cpc, "charts/underspend_factor_cpc.png")?;
    generate_underspend_staircase(&cfg, BiddingMode::Cpm, "charts/underspend_factor_cpm.png")?;
    generate_posterior_histogram()?;

    Ok(())
}

/// Plot the piecewise underspend factor table for one bidding mode
fn generate_underspend_staircase(
    cfg: &AutopilotConfig,
    mode: BiddingMode,
    filename: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let bid_cfg = cfg.bid(mode);

    let x_min = -1.0;
    let x_max = 1.5;
    let num_points = 1000;

    let mut points = Vec::with_capacity(num_points);
    for i in 0..num_points {
        let x = x_min + (x_max - x_min) * (i as f64) / (num_points as f64 - 1.0);
        let factor = bid_cfg
            .change_intervals
            .iter()
            .find(|interval| interval.contains(x))
            .map(|interval| interval.factor)
            .unwrap_or(0.0);
        points.push((x, factor));
    }

    let y_min = points.iter().map(|p| p.1).fold(f64::INFINITY, f64::min) - 0.1;
    let y_max = points.iter().map(|p| p.1).fold(f64::NEG_INFINITY, f64::max) + 0.1;

    let root = BitMapBackend::new(filename, (800, 600)).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption(
            format!("Underspend Adjustment Factor ({:?})", mode),
            ("sans-serif", 30),
        )
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(x_min..x_max, y_min..y_max)?;

    chart
        .configure_mesh()
        .x_desc("Underspend (spend / budget - 1)")
        .y_desc("Bid change factor")
        .draw()?;

    chart.draw_series(LineSeries::new(points, &BLUE))?;

    // Zero line marks the optimal-spend band
    chart.draw_series(LineSeries::new(
        vec![(x_min, 0.0), (x_max, 0.0)],
        &BLACK.mix(0.3),
    ))?;

    root.present()?;
    println!("Generated: {}", filename);

    Ok(())
}

/// Plot Beta posterior sample distributions for three candidates after a
/// synthetic training run with distinct success rates
fn generate_posterior_histogram() -> Result<(), Box<dyn std::error::Error>> {
    let filename = "charts/bandit_posteriors.png";

    // (label, trials, successes, color)
    let candidates: [(&str, u64, u64, &RGBColor); 3] = [
        ("strong (36/40)", 40, 36, &GREEN),
        ("average (20/40)", 40, 20, &BLUE),
        ("weak (8/40)", 40, 8, &RED),
    ];

    let mut rng = StdRng::seed_from_u64(42);
    const NUM_SAMPLES: usize = 10000;
    const NUM_BINS: usize = 50;
    let bin_width = 1.0 / NUM_BINS as f64;

    let mut all_bins: Vec<Vec<u32>> = Vec::new();
    for (_, trials, successes, _) in &candidates {
        let dist = Beta::new(1.0 + *successes as f64, 1.0 + (*trials - *successes) as f64)?;
        let mut bins = vec![0u32; NUM_BINS];
        for _ in 0..NUM_SAMPLES {
            let sample: f64 = dist.sample(&mut rng);
            let bin_idx = ((sample / bin_width).floor() as usize).min(NUM_BINS - 1);
            bins[bin_idx] += 1;
        }
        all_bins.push(bins);
    }

    let max_count = all_bins
        .iter()
        .flat_map(|bins| bins.iter())
        .max()
        .cloned()
        .unwrap_or(0);

    let root = BitMapBackend::new(filename, (800, 600)).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption("Bandit Posterior Samples", ("sans-serif", 30))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(0.0..1.0, 0u32..max_count + max_count / 10)?;

    chart
        .configure_mesh()
        .x_desc("Sampled success probability")
        .y_desc("Count")
        .draw()?;

    for ((label, _, _, color), bins) in candidates.iter().zip(all_bins.iter()) {
        let line_data: Vec<(f64, u32)> = bins
            .iter()
            .enumerate()
            .map(|(i, &count)| ((i as f64 + 0.5) * bin_width, count))
            .collect();
        chart
            .draw_series(LineSeries::new(line_data, *color))?
            .label(*label)
            .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], *color));
    }

    chart
        .configure_series_labels()
        .background_style(&WHITE.mix(0.8))
        .border_style(&BLACK)
        .draw()?;

    root.present()?;
    println!("Generated: {}", filename);

    Ok(())
}
