use serde::{Deserialize, Serialize};

use crate::track::PcmBuffer;

/// Fewest one-second blocks that give a meaningful measurement.
pub const MIN_BLOCKS: usize = 3;
pub const HISTOGRAM_BINS: usize = 100;
/// Bins holding at most this fraction of the tallest bin are discarded.
pub const HISTOGRAM_THRESHOLD: f64 = 0.15;
/// Fixes the estimator's scale to the reference DR14 metric.
pub const DR_CALIBRATION_OFFSET: f64 = 3.0;
/// Peak and RMS reported for a signal too short to measure.
pub const DEGENERATE_DB: f64 = -100.0;
/// Level of one 24-bit LSB, 20 * log10(2^-24). Stands in for the dB value
/// of silent blocks.
pub const SILENCE_DB: f64 = -144.494_397_918_711;
/// Floor sentinel: only DR values strictly above it are aggregated.
pub const MIN_DR: i32 = -10_000;

/// Result of measuring one track.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DrMeasurement {
    pub dr_value: i32,
    pub peak_db: f64,
    pub rms_db: f64,
    /// Number of complete one-second blocks analyzed.
    pub blocks: usize,
}

impl DrMeasurement {
    fn degenerate(blocks: usize) -> Self {
        Self {
            dr_value: 0,
            peak_db: DEGENERATE_DB,
            rms_db: DEGENERATE_DB,
            blocks,
        }
    }

    pub fn is_degenerate(&self) -> bool {
        self.blocks < MIN_BLOCKS
    }

    /// The value batch aggregation compares against [`MIN_DR`]. Degenerate
    /// measurements report the floor itself so they never qualify.
    pub fn aggregation_value(&self) -> i32 {
        if self.is_degenerate() {
            MIN_DR
        } else {
            self.dr_value
        }
    }
}

/// Convert a linear amplitude to dBFS. Zero and non-finite results map to
/// [`SILENCE_DB`].
pub fn db_fs(linear: f64) -> f64 {
    let db = 20.0 * linear.log10();
    if db.is_finite() {
        db
    } else {
        SILENCE_DB
    }
}

/// Per-channel levels of a single one-second block, in dBFS.
struct BlockStats {
    rms: Vec<f64>,
    peak: Vec<f64>,
}

fn compute_block_stats(samples: &[f32], channels: usize) -> BlockStats {
    let frames = samples.len() / channels;
    let mut rms = vec![0.0f64; channels];
    let mut peak = vec![0.0f64; channels];

    for ch in 0..channels {
        let mut sum_sq = 0.0f64;
        let mut ch_peak = 0.0f64;
        for &s in samples.iter().skip(ch).step_by(channels) {
            let v = s as f64;
            sum_sq += v * v;
            let abs_v = v.abs();
            if abs_v > ch_peak {
                ch_peak = abs_v;
            }
        }
        rms[ch] = db_fs((sum_sq / frames as f64).sqrt());
        peak[ch] = db_fs(ch_peak);
    }

    BlockStats { rms, peak }
}

/// Equal-width histogram over `[min, max]` of `values`, returning the bin
/// counts and bin centers. The last bin is closed on the right. A constant
/// input gets the range `[v - 0.5, v + 0.5]`.
fn histogram(values: &[f64], bins: usize) -> (Vec<usize>, Vec<f64>) {
    let mut lo = values.iter().copied().fold(f64::INFINITY, f64::min);
    let mut hi = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if lo == hi {
        lo -= 0.5;
        hi += 0.5;
    }

    let step = (hi - lo) / bins as f64;
    let mut edges: Vec<f64> = (0..=bins).map(|i| lo + i as f64 * step).collect();
    edges[bins] = hi;

    let norm = bins as f64 / (hi - lo);
    let mut counts = vec![0usize; bins];
    for &v in values {
        let mut idx = (((v - lo) * norm) as usize).min(bins - 1);
        // Float error can land a value one bin off its edges
        if idx > 0 && v < edges[idx] {
            idx -= 1;
        } else if idx + 1 < bins && v >= edges[idx + 1] {
            idx += 1;
        }
        counts[idx] += 1;
    }

    let centers = edges
        .windows(2)
        .map(|w| w[0] + (w[1] - w[0]) / 2.0)
        .collect();
    (counts, centers)
}

/// Frequency-weighted mean of the histogram bin centers, ignoring bins
/// that hold at most [`HISTOGRAM_THRESHOLD`] of the tallest bin.
fn trimmed_histogram_mean(values: &[f64]) -> f64 {
    let (counts, centers) = histogram(values, HISTOGRAM_BINS);
    let max_freq = counts.iter().copied().max().unwrap_or(0) as f64;
    let cutoff = max_freq * HISTOGRAM_THRESHOLD;

    let (weighted, total) = counts
        .iter()
        .zip(&centers)
        .filter(|(&n, _)| n as f64 > cutoff)
        .fold((0.0f64, 0usize), |(sum, total), (&n, &c)| {
            (sum + n as f64 * c, total + n)
        });

    if total == 0 {
        0.0
    } else {
        weighted / total as f64
    }
}

/// Measure the DR14 value, peak and RMS level of a decoded track.
///
/// 1. Split into one-second blocks, discarding the final partial block
/// 2. Fewer than [`MIN_BLOCKS`] blocks yields the degenerate result
/// 3. Per block per channel: RMS and peak in dBFS
/// 4. Per block: mean over channels of (peak - RMS)
/// 5. 100-bin histogram of the block values, drop bins at or below 15% of
///    the tallest one, frequency-weighted mean of the remaining centers
/// 6. DR = round(mean - 3), ties to even
///
/// The reported peak is the highest block peak; the reported RMS is the
/// per-channel mean block RMS averaged over channels.
pub fn compute_dr(buffer: &PcmBuffer) -> DrMeasurement {
    let channels = buffer.channels();
    let block_frames = buffer.sample_rate() as usize;
    let num_blocks = if block_frames == 0 {
        0
    } else {
        buffer.frames() / block_frames
    };

    if num_blocks < MIN_BLOCKS {
        return DrMeasurement::degenerate(num_blocks);
    }

    let blocks: Vec<BlockStats> = buffer
        .samples()
        .chunks_exact(block_frames * channels)
        .map(|chunk| compute_block_stats(chunk, channels))
        .collect();

    let block_dr: Vec<f64> = blocks
        .iter()
        .map(|b| {
            let spread: f64 = b.peak.iter().zip(&b.rms).map(|(p, r)| p - r).sum();
            spread / channels as f64
        })
        .collect();

    let mean = trimmed_histogram_mean(&block_dr);
    let dr_value = (mean - DR_CALIBRATION_OFFSET).round_ties_even() as i32;

    let peak_db = blocks
        .iter()
        .flat_map(|b| b.peak.iter().copied())
        .fold(f64::NEG_INFINITY, f64::max);

    let rms_db = (0..channels)
        .map(|ch| blocks.iter().map(|b| b.rms[ch]).sum::<f64>() / blocks.len() as f64)
        .sum::<f64>()
        / channels as f64;

    DrMeasurement {
        dr_value,
        peak_db,
        rms_db,
        blocks: blocks.len(),
    }
}
