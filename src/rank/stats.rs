//! Streaming per-channel statistics gathered by hooks
//!
//! Each accumulator follows the same lifecycle: `accumulate` while passes run,
//! `consume` once to rank (which resets it), `clear` to discard.

use crate::error::{PruneError, Result};
use ndarray::{concatenate, Array1, Array2, ArrayD, ArrayView1, ArrayView2, Axis, Ix4};
use tracing::warn;

/// Decay of the APoZ moving average.
pub const APOZ_DECAY: f32 = 0.99;

fn as_nchw(values: &ArrayD<f32>) -> Result<ndarray::ArrayView4<'_, f32>> {
    values
        .view()
        .into_dimensionality::<Ix4>()
        .map_err(|_| PruneError::ShapeMismatch {
            expected: vec![0, 0, 0, 0],
            actual: values.shape().to_vec(),
        })
}

fn check_channels(expected: usize, actual: usize) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(PruneError::ShapeMismatch {
            expected: vec![expected],
            actual: vec![actual],
        })
    }
}

/// Fraction of exactly-zero entries per channel of an (N, C, H, W) activation.
pub fn zero_fraction(activation: &ArrayD<f32>) -> Result<Array1<f32>> {
    let view = as_nchw(activation)?;
    let (n, c, h, w) = view.dim();
    let per_channel = (n * h * w).max(1) as f32;
    Ok(Array1::from_shape_fn(c, |ch| {
        let plane = view.index_axis(Axis(1), ch);
        plane.iter().filter(|&&v| v == 0.0).count() as f32 / per_channel
    }))
}

/// Spatial mean per sample and channel of an (N, C, H, W) tensor, shape (N, C).
pub fn spatial_means(values: &ArrayD<f32>) -> Result<Array2<f32>> {
    let view = as_nchw(values)?;
    let (_, _, h, w) = view.dim();
    let area = (h * w).max(1) as f32;
    Ok(view.sum_axis(Axis(3)).sum_axis(Axis(2)).mapv(|s| s / area))
}

/// Exponential moving average of per-channel zero fractions.
///
/// Starts at zero and blends one batch at a time as
/// `apoz = (1 - decay) * batch + decay * apoz`, so the result depends on the
/// order batches arrive in.
#[derive(Debug, Clone)]
pub struct ApozAccumulator {
    apoz: Array1<f32>,
    decay: f32,
    batches: usize,
}

impl ApozAccumulator {
    pub fn new(channels: usize) -> Self {
        Self::with_decay(channels, APOZ_DECAY)
    }

    pub fn with_decay(channels: usize, decay: f32) -> Self {
        Self {
            apoz: Array1::zeros(channels),
            decay,
            batches: 0,
        }
    }

    /// Blend the zero fractions of one batch
    pub fn accumulate(&mut self, zero_fraction: &Array1<f32>) -> Result<()> {
        check_channels(self.apoz.len(), zero_fraction.len())?;
        for (a, &z) in self.apoz.iter_mut().zip(zero_fraction) {
            *a = (1.0 - self.decay) * z + self.decay * *a;
        }
        self.batches += 1;
        Ok(())
    }

    /// Blend a raw (N, C, H, W) activation
    pub fn accumulate_activation(&mut self, activation: &ArrayD<f32>) -> Result<()> {
        self.accumulate(&zero_fraction(activation)?)
    }

    /// Current average without resetting
    pub fn apoz(&self) -> &Array1<f32> {
        &self.apoz
    }

    /// Number of batches blended since the last reset
    pub fn batches(&self) -> usize {
        self.batches
    }

    pub fn is_empty(&self) -> bool {
        self.batches == 0
    }

    /// Take the average and reset
    pub fn consume(&mut self, layer: &str) -> Result<Array1<f32>> {
        if self.is_empty() {
            return Err(PruneError::EmptyStatistics {
                layer: layer.to_string(),
            });
        }
        let channels = self.apoz.len();
        self.batches = 0;
        Ok(std::mem::replace(&mut self.apoz, Array1::zeros(channels)))
    }

    pub fn clear(&mut self) {
        self.apoz.fill(0.0);
        self.batches = 0;
    }
}

/// Growing list of per-sample channel rows, shape (rows, C) once stacked.
#[derive(Debug, Clone)]
pub struct SampleHistory {
    channels: usize,
    batches: Vec<Array2<f32>>,
}

impl SampleHistory {
    pub fn new(channels: usize) -> Self {
        Self {
            channels,
            batches: Vec::new(),
        }
    }

    /// Append one (N, C) batch
    pub fn accumulate(&mut self, rows: Array2<f32>) -> Result<()> {
        check_channels(self.channels, rows.ncols())?;
        self.batches.push(rows);
        Ok(())
    }

    /// Number of rows held
    pub fn rows(&self) -> usize {
        self.batches.iter().map(Array2::nrows).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.rows() == 0
    }

    /// Stack every row and reset
    pub fn consume(&mut self, layer: &str) -> Result<Array2<f32>> {
        if self.is_empty() {
            return Err(PruneError::EmptyStatistics {
                layer: layer.to_string(),
            });
        }
        let batches = std::mem::take(&mut self.batches);
        let views: Vec<ArrayView2<'_, f32>> = batches.iter().map(Array2::view).collect();
        concatenate(Axis(0), &views).map_err(|_| {
            let first = batches.first().map(|b| b.shape().to_vec());
            PruneError::ShapeMismatch {
                expected: vec![0, self.channels],
                actual: first.unwrap_or_default(),
            }
        })
    }

    pub fn clear(&mut self) {
        self.batches.clear();
    }
}

/// Shannon entropy per channel of `rows` (samples x channels).
///
/// Each channel's values are binned over the channel's own `[min, max]` range
/// into `bins` buckets (the maximum lands in the last one). A channel whose
/// values are all equal has entropy 0.
pub fn channel_entropy(rows: &Array2<f32>, bins: usize) -> Result<Array1<f32>> {
    if bins == 0 {
        return Err(PruneError::InvalidBins { value: bins });
    }
    Ok(rows
        .columns()
        .into_iter()
        .map(|column| column_entropy(column, bins))
        .collect())
}

fn column_entropy(column: ArrayView1<'_, f32>, bins: usize) -> f32 {
    let lo = column.fold(f32::INFINITY, |lo, &v| lo.min(v));
    let hi = column.fold(f32::NEG_INFINITY, |hi, &v| hi.max(v));
    let span = hi - lo;
    if span.is_nan() || span <= 0.0 {
        return 0.0;
    }
    let mut counts = vec![0usize; bins];
    for &v in column {
        let bin = (((v - lo) / span) * bins as f32).floor() as usize;
        counts[bin.min(bins - 1)] += 1;
    }
    let samples = column.len() as f32;
    counts
        .iter()
        .filter(|&&n| n > 0)
        .map(|&n| {
            let p = n as f32 / samples;
            -p * p.ln()
        })
        .sum()
}

/// Statistics written by a hook, plus the first error the hook hit.
///
/// Hooks cannot return errors to the pass that fires them; the fault is kept
/// and reported when the statistics are consumed.
#[derive(Debug)]
pub(crate) struct HookState<A> {
    pub(crate) stats: A,
    fault: Option<PruneError>,
}

impl<A> HookState<A> {
    pub(crate) fn new(stats: A) -> Self {
        Self { stats, fault: None }
    }

    pub(crate) fn record(&mut self, layer: &str, outcome: Result<()>) {
        if let Err(err) = outcome {
            warn!(layer, error = %err, "statistics hook failed");
            self.fault.get_or_insert(err);
        }
    }

    pub(crate) fn take_fault(&mut self) -> Result<()> {
        self.fault.take().map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{arr1, arr2, IxDyn};

    #[test]
    fn test_apoz_ema_scenario() {
        // TEST_ID: STAT-001
        let mut acc = ApozAccumulator::new(1);
        acc.accumulate(&arr1(&[1.0])).unwrap();
        assert_abs_diff_eq!(acc.apoz()[0], 0.01, epsilon = 1e-7);
        acc.accumulate(&arr1(&[0.0])).unwrap();
        assert_abs_diff_eq!(acc.apoz()[0], 0.0099, epsilon = 1e-7);

        let mut swapped = ApozAccumulator::new(1);
        swapped.accumulate(&arr1(&[0.0])).unwrap();
        swapped.accumulate(&arr1(&[1.0])).unwrap();
        assert_abs_diff_eq!(swapped.apoz()[0], 0.01, epsilon = 1e-7);
        assert!(
            (swapped.apoz()[0] - acc.apoz()[0]).abs() > 1e-5,
            "STAT-001 FALSIFIED: batch order must change the moving average"
        );
    }

    #[test]
    fn test_apoz_consume_resets() {
        let mut acc = ApozAccumulator::new(2);
        assert_eq!(
            acc.consume("c").unwrap_err(),
            PruneError::EmptyStatistics { layer: "c".into() }
        );
        acc.accumulate(&arr1(&[1.0, 0.5])).unwrap();
        let apoz = acc.consume("c").unwrap();
        assert_abs_diff_eq!(apoz[1], 0.005, epsilon = 1e-7);
        assert!(acc.is_empty());
        assert_eq!(acc.apoz(), &arr1(&[0.0, 0.0]));
    }

    #[test]
    fn test_apoz_rejects_wrong_channel_count() {
        let mut acc = ApozAccumulator::new(2);
        assert!(acc.accumulate(&arr1(&[1.0])).is_err());
        assert!(acc.is_empty());
    }

    #[test]
    fn test_zero_fraction_averages_batch_and_space() {
        // channel 0: 3 of 4 zeros, channel 1: none
        let values = vec![0.0, 0.0, 1.0, 2.0, 0.0, 5.0, 3.0, 4.0];
        let act = ArrayD::from_shape_vec(IxDyn(&[2, 2, 1, 2]), values).unwrap();
        let z = zero_fraction(&act).unwrap();
        assert_abs_diff_eq!(z[0], 0.75);
        assert_abs_diff_eq!(z[1], 0.0);
    }

    #[test]
    fn test_spatial_means_per_sample() {
        let values = vec![1.0, 3.0, 5.0, 7.0];
        let act = ArrayD::from_shape_vec(IxDyn(&[2, 1, 1, 2]), values).unwrap();
        assert_eq!(spatial_means(&act).unwrap(), arr2(&[[2.0], [6.0]]));
        assert!(spatial_means(&ArrayD::zeros(IxDyn(&[2, 2]))).is_err());
    }

    #[test]
    fn test_history_stacks_batches() {
        let mut history = SampleHistory::new(2);
        history.accumulate(arr2(&[[1.0, 2.0]])).unwrap();
        history.accumulate(arr2(&[[3.0, 4.0], [5.0, 6.0]])).unwrap();
        assert_eq!(history.rows(), 3);
        let rows = history.consume("c").unwrap();
        assert_eq!(rows, arr2(&[[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]]));
        assert!(history.is_empty(), "consumed history must start over");
    }

    #[test]
    fn test_entropy_uniform_and_degenerate() {
        // TEST_ID: STAT-002
        // column 0 spreads over 4 bins evenly, column 1 is constant
        let rows = arr2(&[[0.0, 1.0], [1.0, 1.0], [2.0, 1.0], [3.0, 1.0]]);
        let h = channel_entropy(&rows, 4).unwrap();
        assert_abs_diff_eq!(h[0], 4.0f32.ln(), epsilon = 1e-6);
        assert_abs_diff_eq!(h[1], 0.0);
    }

    #[test]
    fn test_entropy_max_lands_in_last_bin() {
        // 0 and 1 with two bins: one value per bin
        let rows = arr2(&[[0.0], [1.0]]);
        let h = channel_entropy(&rows, 2).unwrap();
        assert_abs_diff_eq!(h[0], 2.0f32.ln(), epsilon = 1e-6);
        assert_eq!(
            channel_entropy(&rows, 0).unwrap_err(),
            PruneError::InvalidBins { value: 0 }
        );
    }

    #[test]
    fn test_hook_state_keeps_first_fault() {
        let mut state = HookState::new(());
        state.record("c", Ok(()));
        state.record("c", Err(PruneError::NotBuilt));
        state.record("c", Err(PruneError::NoPruners));
        assert_eq!(state.take_fault(), Err(PruneError::NotBuilt));
        assert_eq!(state.take_fault(), Ok(()));
    }
}
