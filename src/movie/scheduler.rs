//! # Sample Scheduler
//!
//! Per-tick timing math for the box integrator. Every capture tick advances
//! a fractional `remainder` by `time_per_sample / time_per_frame` and
//! decides whether the tick contributes nothing (shutter still closed), a
//! partial weighted sample, or completes one or more output frames.
//!
//! The remainder is kept in double precision but every comparison against
//! the frame boundary and the shutter point is made on its `f32` cast.
//! Accumulated steps like `1/3 + 1/3 + 1/3` land at `0.999...` in double
//! and would miss the boundary; the float cast rounds them onto it. This
//! cast is load-bearing, not a style choice.

/// Immutable per-session sampling parameters.
#[derive(Debug, Clone, Copy)]
pub struct SamplingConfig {
    pub enabled: bool,
    /// Fraction of the frame period the shutter is open, in (0, 1].
    pub exposure: f32,
    pub time_per_sample: f64,
    pub time_per_frame: f64,
}

impl SamplingConfig {
    /// Derives the session config from the user settings. Sampling engages
    /// when the multiplier exceeds one and the exposure is positive; the
    /// host then runs at `fps * multiplier`.
    pub fn from_settings(fps: u32, multiplier: u32, exposure: f32) -> Self {
        let enabled = multiplier > 1 && exposure > 0.0;
        let host_rate = if enabled { fps * multiplier } else { fps };

        Self {
            enabled,
            exposure,
            time_per_sample: 1.0 / host_rate as f64,
            time_per_frame: 1.0 / fps as f64,
        }
    }

    /// The rate the host engine is forced to while this session records.
    pub fn host_framerate(&self) -> u32 {
        (1.0 / self.time_per_sample).round() as u32
    }
}

/// Mutable per-stream scheduling state.
#[derive(Debug, Clone, Copy, Default)]
pub struct SamplingState {
    /// Fractional sub-frame time carried across ticks, in frame periods.
    pub remainder: f64,
}

/// Receiver of the scheduler's decisions for one tick.
///
/// `emit` must convert and hand off the current work buffer contents; when
/// a tick completes more than one frame, `emit` is called once per copy
/// before `clear`, duplicating the just-converted frame.
pub trait SampleSink {
    fn weighted_add(&mut self, weight: f32);
    fn emit(&mut self);
    fn clear(&mut self);
}

/// Advances one capture tick.
pub fn advance<S: SampleSink>(state: &mut SamplingState, cfg: &SamplingConfig, sink: &mut S) {
    let exposure = cfg.exposure as f64;
    let shutter_close = 1.0 - exposure;

    let old = state.remainder;
    state.remainder += cfg.time_per_sample / cfg.time_per_frame;

    // All boundary comparisons go through the f32 cast, see module docs.
    let remainder = state.remainder as f32 as f64;

    if remainder <= shutter_close {
        // Shutter still closed, nothing to accumulate.
    } else if remainder < 1.0 {
        let weight = (state.remainder - shutter_close.max(old)) * (1.0 / exposure);
        sink.weighted_add(weight as f32);
    } else {
        let weight = (1.0 - shutter_close.max(old)) * (1.0 / exposure);
        sink.weighted_add(weight as f32);
        sink.emit();

        state.remainder -= 1.0;

        // A tick can complete several whole frames when the sample step
        // exceeds a frame period; each extra copy repeats the frame that
        // was just emitted.
        let additional = state.remainder as u32;
        if additional > 0 {
            for _ in 0..additional {
                sink.emit();
            }
            state.remainder -= additional as f64;
        }

        sink.clear();

        if state.remainder > f32::EPSILON as f64 && state.remainder > shutter_close {
            let weight = (state.remainder - shutter_close) * (1.0 / exposure);
            sink.weighted_add(weight as f32);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        weights: Vec<f32>,
        emits: usize,
        clears: usize,
        /// Weight sums between consecutive emits.
        per_frame: Vec<f32>,
        current: f32,
    }

    impl SampleSink for Recorder {
        fn weighted_add(&mut self, weight: f32) {
            self.weights.push(weight);
            self.current += weight;
        }

        fn emit(&mut self) {
            self.emits += 1;
            self.per_frame.push(self.current);
        }

        fn clear(&mut self) {
            self.clears += 1;
            self.current = 0.0;
        }
    }

    #[test]
    fn disabled_below_multiplier_two() {
        assert!(!SamplingConfig::from_settings(60, 1, 1.0).enabled);
        assert!(!SamplingConfig::from_settings(60, 0, 0.5).enabled);
        assert!(!SamplingConfig::from_settings(60, 32, 0.0).enabled);
        assert!(SamplingConfig::from_settings(60, 2, 0.5).enabled);
    }

    #[test]
    fn full_exposure_integrates_to_one() {
        let cfg = SamplingConfig::from_settings(60, 4, 1.0);
        let mut state = SamplingState::default();
        let mut sink = Recorder::default();

        for _ in 0..40 {
            advance(&mut state, &cfg, &mut sink);
        }

        assert_eq!(sink.emits, 10);
        assert_eq!(sink.clears, 10);
        for sum in &sink.per_frame {
            assert!((sum - 1.0).abs() < 1e-4, "per-frame weight sum {sum}");
        }
        // Every open-shutter sample carries 1/4 weight.
        for weight in &sink.weights {
            assert!((weight - 0.25).abs() < 1e-4);
        }
    }

    #[test]
    fn half_exposure_integrates_to_one() {
        let cfg = SamplingConfig::from_settings(60, 32, 0.5);
        let mut state = SamplingState::default();
        let mut sink = Recorder::default();

        for _ in 0..(32 * 60) {
            advance(&mut state, &cfg, &mut sink);
        }

        assert_eq!(sink.emits, 60);
        for sum in &sink.per_frame {
            assert!((sum - 1.0).abs() < 1e-4, "per-frame weight sum {sum}");
        }

        // Half the samples fall inside the closed-shutter window.
        let zero_ticks = 32 * 60 - sink.weights.len();
        assert!(zero_ticks > 0);
    }

    #[test]
    fn float_cast_catches_accumulated_thirds() {
        // 1/3 + 1/3 + 1/3 is 0.999... in double; the f32 cast must land it
        // on the frame boundary so the third tick emits.
        let cfg = SamplingConfig::from_settings(60, 3, 1.0);
        let mut state = SamplingState::default();
        let mut sink = Recorder::default();

        advance(&mut state, &cfg, &mut sink);
        advance(&mut state, &cfg, &mut sink);
        assert_eq!(sink.emits, 0);

        advance(&mut state, &cfg, &mut sink);
        assert_eq!(sink.emits, 1);
        assert!((sink.per_frame[0] - 1.0).abs() < 1e-4);
    }

    #[test]
    fn oversized_step_emits_duplicates() {
        // A sample step of 2.5 frame periods completes two frames in one
        // tick and carries 0.5 into the next.
        let cfg = SamplingConfig {
            enabled: true,
            exposure: 1.0,
            time_per_sample: 2.5,
            time_per_frame: 1.0,
        };
        let mut state = SamplingState::default();
        let mut sink = Recorder::default();

        advance(&mut state, &cfg, &mut sink);

        assert_eq!(sink.emits, 2);
        assert_eq!(sink.clears, 1);
        assert!((state.remainder - 0.5).abs() < 1e-9);
        // The carried tail re-opens the shutter with weight 0.5.
        assert!((sink.weights.last().unwrap() - 0.5).abs() < 1e-4);
    }

    #[test]
    fn shutter_close_suppresses_early_samples() {
        // With exposure 0.25 the first three quarters of each frame add
        // nothing.
        let cfg = SamplingConfig::from_settings(60, 8, 0.25);
        let mut state = SamplingState::default();
        let mut sink = Recorder::default();

        for _ in 0..8 {
            advance(&mut state, &cfg, &mut sink);
        }

        assert_eq!(sink.emits, 1);
        assert_eq!(sink.weights.len(), 2);
        assert!((sink.per_frame[0] - 1.0).abs() < 1e-4);
    }
}
