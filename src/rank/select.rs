//! Threshold selection turning per-channel scores into masks

use crate::config::validate_fraction;
use crate::error::Result;
use crate::pruner::Mask;
use ndarray::Array1;

fn ascending(scores: &Array1<f32>) -> Vec<f32> {
    let mut sorted = scores.to_vec();
    sorted.sort_by(f32::total_cmp);
    sorted
}

/// Index of the threshold score when `fraction` of `channels` is cut.
fn threshold_rank(fraction: f64, channels: usize) -> usize {
    (fraction * channels as f64).floor() as usize
}

/// Prune the lowest-scoring `fraction` of channels (higher score is better).
///
/// The threshold is the score at ascending rank `floor(fraction * C)`; every
/// channel scoring at least that much survives, so ties at the threshold all
/// survive. A rank past the end prunes everything.
pub fn keep_highest(scores: &Array1<f32>, fraction: f64) -> Result<Mask> {
    validate_fraction(fraction)?;
    let idx = threshold_rank(fraction, scores.len());
    let Some(&threshold) = ascending(scores).get(idx) else {
        return Ok(Mask::from_keep(&vec![false; scores.len()]));
    };
    Ok(keep_at_least(scores, threshold))
}

/// Prune the highest-scoring `fraction` of channels (lower score is better).
///
/// The threshold is the score at ascending rank `floor((1 - fraction) * C)`;
/// channels strictly below it survive. A rank past the end keeps everything.
pub fn keep_lowest(scores: &Array1<f32>, fraction: f64) -> Result<Mask> {
    validate_fraction(fraction)?;
    let idx = threshold_rank(1.0 - fraction, scores.len());
    let Some(&threshold) = ascending(scores).get(idx) else {
        return Ok(Mask::ones(scores.len()));
    };
    let keep: Vec<bool> = scores.iter().map(|&s| s < threshold).collect();
    Ok(Mask::from_keep(&keep))
}

/// Keep channels scoring at least `threshold`.
pub fn keep_at_least(scores: &Array1<f32>, threshold: f32) -> Mask {
    let keep: Vec<bool> = scores.iter().map(|&s| s >= threshold).collect();
    Mask::from_keep(&keep)
}
