use anyhow::{Result, anyhow};
use std::cmp::Ordering;

/// Benjamini-Hochberg adjusted p-values (false discovery rate).
///
/// Adjusted values keep the input order. NaN p-values (genes that could not be
/// tested) stay NaN and do not count towards the number of tests.
///
/// # Arguments
/// * `p_values` - Raw p-values in `[0, 1]`, NaN allowed
///
/// # Returns
/// * `Result<Vec<f64>>` - Adjusted p-values, capped at 1
pub fn benjamini_hochberg(p_values: &[f64]) -> Result<Vec<f64>> {
    if p_values.is_empty() {
        return Err(anyhow!("Empty p-value array"));
    }

    for (i, &p) in p_values.iter().enumerate() {
        if !p.is_nan() && !(0.0..=1.0).contains(&p) {
            return Err(anyhow!("Invalid p-value at index {}: {}", i, p));
        }
    }

    let mut indexed: Vec<(usize, f64)> = p_values
        .iter()
        .enumerate()
        .filter(|(_, p)| !p.is_nan())
        .map(|(i, &p)| (i, p))
        .collect();
    indexed.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal));

    let n = indexed.len();
    let mut adjusted = vec![f64::NAN; p_values.len()];
    let mut running_min = 1.0f64;

    // Walk from the largest p-value down, keeping the adjusted values monotone
    for rank in (1..=n).rev() {
        let (orig_idx, p) = indexed[rank - 1];
        let candidate = (p * n as f64 / rank as f64).min(1.0);
        running_min = running_min.min(candidate);
        adjusted[orig_idx] = running_min;
    }

    Ok(adjusted)
}
