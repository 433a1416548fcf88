//! Per-lane load sampling.

/// Ring buffer of recent cycle loads.
///
/// A sample is the share of the tick budget a cycle actually used, or 1.0
/// for a cycle that ran out of budget. The advertised load factor is the
/// mean of the highest quarter of samples, so one idle cycle does not hide
/// a lane that is mostly saturated.
#[derive(Debug, Clone)]
pub struct LoadTracker {
    samples: Vec<f32>,
    next: usize,
    percentile_size: usize,
}

impl LoadTracker {
    /// `sample_size` samples kept, top `percentile_size` averaged
    pub fn new(sample_size: usize, percentile_size: usize) -> Self {
        let sample_size = sample_size.max(1);
        Self {
            samples: vec![0.0; sample_size],
            next: 0,
            percentile_size: percentile_size.clamp(1, sample_size),
        }
    }

    pub fn push(&mut self, sample: f32) {
        let sample = if sample.is_nan() { 1.0 } else { sample.clamp(0.0, 1.0) };
        self.samples[self.next] = sample;
        self.next = (self.next + 1) % self.samples.len();
    }

    /// Worst sample in the window
    pub fn max(&self) -> f32 {
        self.samples.iter().copied().fold(0.0, f32::max)
    }

    /// Mean of the top `percentile_size` samples
    pub fn load_factor(&self) -> f32 {
        let mut sorted = self.samples.clone();
        sorted.sort_unstable_by(|a, b| b.total_cmp(a));
        let top = &sorted[..self.percentile_size];
        top.iter().sum::<f32>() / self.percentile_size as f32
    }

    pub fn sample_size(&self) -> usize {
        self.samples.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_idle() {
        let tracker = LoadTracker::new(16, 4);
        assert_eq!(tracker.max(), 0.0);
        assert_eq!(tracker.load_factor(), 0.0);
    }

    #[test]
    fn test_top_quartile_mean() {
        let mut tracker = LoadTracker::new(8, 2);
        for sample in [0.1, 0.9, 0.2, 0.7, 0.0, 0.0, 0.0, 0.0] {
            tracker.push(sample);
        }
        assert!((tracker.load_factor() - 0.8).abs() < 1e-6);
        assert!((tracker.max() - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_one_idle_cycle_does_not_hide_saturation() {
        let mut tracker = LoadTracker::new(16, 4);
        for _ in 0..15 {
            tracker.push(1.0);
        }
        tracker.push(0.0);
        assert_eq!(tracker.load_factor(), 1.0);
    }

    #[test]
    fn test_window_wraps() {
        let mut tracker = LoadTracker::new(4, 1);
        tracker.push(1.0);
        for _ in 0..4 {
            tracker.push(0.25);
        }
        assert_eq!(tracker.max(), 0.25);
    }

    #[test]
    fn test_samples_are_clamped() {
        let mut tracker = LoadTracker::new(2, 1);
        tracker.push(3.5);
        assert_eq!(tracker.max(), 1.0);
        tracker.push(-1.0);
        tracker.push(f32::NAN);
        assert_eq!(tracker.load_factor(), 1.0);
    }
}
