//! Bounded, derivative-free minimisation over a zooming grid.

use std::ops::RangeInclusive;

use anyhow::bail;

#[derive(Clone, Debug)]
pub struct HypergridSearchConfig {
    pub max_steps: u64,
    pub acceptable_residual: f64,
    pub bounds: Vec<RangeInclusive<f64>>,
    pub resolution: usize,
}
impl HypergridSearchConfig {
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.max_steps == 0 {
            bail!("at least one step must be specified")
        }
        if self.acceptable_residual < 0.0 {
            bail!("acceptable residual must be non-negative")
        }
        if self.bounds.is_empty() {
            bail!("at least one search dimension must be specified")
        }
        if self.bounds.iter().any(|bound| !(bound.start() <= bound.end())) {
            bail!("each search bound must be a non-empty range")
        }
        const MIN_RESOLUTION: usize = 3;
        if self.resolution < MIN_RESOLUTION {
            bail!("search resolution must be at least {MIN_RESOLUTION}")
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct HypergridSearchOutcome {
    pub steps: u64,
    pub optimal_values: Vec<f64>,
    pub optimal_residual: f64,
}

/// Advances `ordinals` to the next point of a grid with `resolution` points per dimension,
/// returning `false` once every point has been visited.
fn next_point(ordinals: &mut [usize], resolution: usize) -> bool {
    for ordinal in ordinals.iter_mut() {
        *ordinal += 1;
        if *ordinal < resolution {
            return true;
        }
        *ordinal = 0;
    }
    false
}

/// Evaluates `loss_f` over a regular grid spanning the current bounds, then narrows the bounds
/// around the best point and repeats, never leaving the initial bounds. Points rejected by
/// `constraint_f` are skipped.
pub fn hypergrid_search(
    config: &HypergridSearchConfig,
    mut constraint_f: impl FnMut(&[f64]) -> bool,
    mut loss_f: impl FnMut(&[f64]) -> f64,
) -> Result<HypergridSearchOutcome, anyhow::Error> {
    config.validate()?;

    let dimensions = config.bounds.len();
    let mut steps = 0;
    let mut values = vec![0.0; dimensions];
    let mut optimal_values: Vec<f64> = config
        .bounds
        .iter()
        .map(|bound| (bound.start() + bound.end()) / 2.0)
        .collect();
    let mut optimal_residual = f64::MAX;
    let mut ordinals = vec![0; dimensions];
    let mut bounds = config.bounds.clone();
    let inv_resolution = 1.0 / (config.resolution - 1) as f64;

    'outer: while steps < config.max_steps {
        steps += 1;

        ordinals.fill(0);
        loop {
            for (dimension, &ordinal) in ordinals.iter().enumerate() {
                let bound = &bounds[dimension];
                let range = bound.end() - bound.start();
                values[dimension] = f64::min(bound.start() + ordinal as f64 * range * inv_resolution, *bound.end());
            }
            if constraint_f(&values) {
                let residual = loss_f(&values);
                if residual < optimal_residual {
                    optimal_residual = residual;
                    optimal_values.copy_from_slice(&values);

                    if residual <= config.acceptable_residual {
                        break 'outer;
                    }
                }
            }
            if !next_point(&mut ordinals, config.resolution) {
                break;
            }
        }

        for (dimension, &value) in optimal_values.iter().enumerate() {
            let hard_bound = &config.bounds[dimension];
            let bound = &mut bounds[dimension];
            let new_range = 2.0 * (bound.end() - bound.start()) * inv_resolution;
            let new_start = f64::max(*hard_bound.start(), value - new_range / 2.0);
            let new_end = f64::min(new_start + new_range, *hard_bound.end());
            *bound = new_start..=new_end;
        }
    }

    Ok(HypergridSearchOutcome {
        steps,
        optimal_values,
        optimal_residual,
    })
}
