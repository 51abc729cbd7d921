//! # Beat Detection Module
//!
//! Rising-edge threshold detector with a bounded history of beat timestamps
//! for each channel, producing a BPM estimate from the mean inter-beat interval.
//!
//! ## Rule
//! A beat is recorded at time `t` iff `last_value < threshold <= value`.
//! `last_value` is updated on every observation whether or not a beat fired,
//! so a signal resting on the threshold cannot fire twice.
//!
//! ## Why a bounded window
//! Keeping only the most recent `max_beats` timestamps makes the rate track
//! recent behaviour and recover from noise bursts in constant memory.

use std::collections::VecDeque;

/// Default number of beat timestamps retained per channel
pub const MAX_BEATS_TRACKED: usize = 27;
/// Smallest history that can produce a rate
pub const MIN_BEATS_TRACKED: usize = 2;

/// Channel identifier for routing samples
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelId {
    /// Signal read directly from the device (maternal ECG)
    Primary,
    /// Combined minus primary (fetal ECG)
    Derived,
}

impl ChannelId {
    pub fn name(&self) -> &'static str {
        match self {
            ChannelId::Primary => "primary",
            ChannelId::Derived => "derived",
        }
    }

    fn index(&self) -> usize {
        match self {
            ChannelId::Primary => 0,
            ChannelId::Derived => 1,
        }
    }
}

struct ChannelState {
    threshold: f64,
    last_value: f64,
    beats: VecDeque<f64>,
    total_beats: u64,
}

impl ChannelState {
    fn new(threshold: f64, max_beats: usize) -> Self {
        Self {
            threshold,
            last_value: 0.0,
            beats: VecDeque::with_capacity(max_beats),
            total_beats: 0,
        }
    }
}

pub struct BeatDetector {
    channels: [ChannelState; 2],
    max_beats: usize,
}

impl BeatDetector {
    /// `max_beats` below `MIN_BEATS_TRACKED` leaves `bpm` stuck at 0;
    /// `Config::max_beats` validates the configured value.
    pub fn new(primary_threshold: f64, derived_threshold: f64, max_beats: usize) -> Self {
        Self {
            channels: [
                ChannelState::new(primary_threshold, max_beats),
                ChannelState::new(derived_threshold, max_beats),
            ],
            max_beats,
        }
    }

    fn channel(&self, channel: ChannelId) -> &ChannelState {
        &self.channels[channel.index()]
    }

    /// Feeds one sample observed at `t` seconds (monotonic clock).
    pub fn observe(&mut self, channel: ChannelId, value: f64, t: f64) {
        let max_beats = self.max_beats;
        let state = &mut self.channels[channel.index()];

        if state.last_value < state.threshold && state.threshold <= value {
            if state.beats.len() == max_beats {
                state.beats.pop_front();
            }
            state.beats.push_back(t);
            state.total_beats += 1;
            log::debug!("Beat on {} channel at {:.3}s", channel.name(), t);
        }

        state.last_value = value;
    }

    /// Rate in beats per minute, or 0 when fewer than two beats are retained.
    pub fn bpm(&self, channel: ChannelId) -> f64 {
        let beats = &self.channel(channel).beats;
        if beats.len() < 2 {
            return 0.0;
        }

        let deltas = beats.iter().zip(beats.iter().skip(1)).map(|(a, b)| b - a);
        let mean_delta = deltas.sum::<f64>() / (beats.len() - 1) as f64;

        if mean_delta == 0.0 {
            return 0.0;
        }
        60.0 / mean_delta
    }

    /// Timestamps currently retained, oldest first.
    #[allow(dead_code)]
    pub fn beats(&self, channel: ChannelId) -> impl Iterator<Item = f64> + '_ {
        self.channel(channel).beats.iter().copied()
    }

    /// Crossings seen since the last reset, including evicted ones.
    #[allow(dead_code)]
    pub fn total_beats(&self, channel: ChannelId) -> u64 {
        self.channel(channel).total_beats
    }

    pub fn reset(&mut self) {
        for state in self.channels.iter_mut() {
            state.last_value = 0.0;
            state.beats.clear();
            state.total_beats = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    #[test]
    fn test_no_beats_means_zero_bpm() {
        let detector = BeatDetector::new(0.6, 0.06, MAX_BEATS_TRACKED);
        assert_eq!(detector.bpm(ChannelId::Primary), 0.0);
        assert_eq!(detector.bpm(ChannelId::Derived), 0.0);
    }

    #[test]
    fn test_single_beat_means_zero_bpm() {
        let mut detector = BeatDetector::new(0.6, 0.06, MAX_BEATS_TRACKED);
        detector.observe(ChannelId::Primary, 1.0, 0.5);
        assert_eq!(detector.total_beats(ChannelId::Primary), 1);
        assert_eq!(detector.bpm(ChannelId::Primary), 0.0);
    }

    #[test]
    fn test_sawtooth_bpm_matches_mean_interval() {
        let mut detector = BeatDetector::new(0.5, 0.05, MAX_BEATS_TRACKED);
        let crossings = [1.0, 1.8, 2.7, 3.5];

        for &t in &crossings {
            // ramp up through the threshold, then fall back below it
            detector.observe(ChannelId::Primary, 0.2, t - 0.2);
            detector.observe(ChannelId::Primary, 0.4, t - 0.1);
            detector.observe(ChannelId::Primary, 0.9, t);
            detector.observe(ChannelId::Primary, 0.3, t + 0.1);
        }

        let beats: Vec<f64> = detector.beats(ChannelId::Primary).collect();
        assert_eq!(beats, crossings.to_vec());

        let mean = (3.5 - 1.0) / 3.0;
        assert!((detector.bpm(ChannelId::Primary) - 60.0 / mean).abs() < EPS);
    }

    #[test]
    fn test_threshold_is_inclusive_on_the_new_value() {
        let mut detector = BeatDetector::new(0.6, 0.06, MAX_BEATS_TRACKED);
        detector.observe(ChannelId::Primary, 0.6, 1.0);
        assert_eq!(detector.total_beats(ChannelId::Primary), 1);
    }

    #[test]
    fn test_resting_on_threshold_does_not_refire() {
        let mut detector = BeatDetector::new(0.6, 0.06, MAX_BEATS_TRACKED);
        detector.observe(ChannelId::Primary, 0.6, 1.0);
        detector.observe(ChannelId::Primary, 0.6, 2.0);
        detector.observe(ChannelId::Primary, 0.7, 3.0);
        assert_eq!(detector.total_beats(ChannelId::Primary), 1);
    }

    #[test]
    fn test_channels_are_independent() {
        let mut detector = BeatDetector::new(0.6, 0.06, MAX_BEATS_TRACKED);
        detector.observe(ChannelId::Derived, 0.1, 1.0);
        assert_eq!(detector.total_beats(ChannelId::Derived), 1);
        assert_eq!(detector.total_beats(ChannelId::Primary), 0);

        // 0.1 is below the primary threshold
        detector.observe(ChannelId::Primary, 0.1, 1.0);
        assert_eq!(detector.total_beats(ChannelId::Primary), 0);
    }

    #[test]
    fn test_window_evicts_oldest_beat() {
        let mut detector = BeatDetector::new(0.6, 0.06, 3);
        for i in 0..5 {
            detector.observe(ChannelId::Primary, 1.0, i as f64);
            detector.observe(ChannelId::Primary, 0.0, i as f64 + 0.5);
        }
        let beats: Vec<f64> = detector.beats(ChannelId::Primary).collect();
        assert_eq!(beats, vec![2.0, 3.0, 4.0]);
        assert_eq!(detector.total_beats(ChannelId::Primary), 5);
        assert!((detector.bpm(ChannelId::Primary) - 60.0).abs() < EPS);
    }

    #[test]
    fn test_duplicate_timestamps_do_not_divide_by_zero() {
        let mut detector = BeatDetector::new(0.6, 0.06, MAX_BEATS_TRACKED);
        detector.observe(ChannelId::Primary, 1.0, 4.0);
        detector.observe(ChannelId::Primary, 0.0, 4.0);
        detector.observe(ChannelId::Primary, 1.0, 4.0);
        assert_eq!(detector.bpm(ChannelId::Primary), 0.0);
    }

    #[test]
    fn test_reset_clears_history() {
        let mut detector = BeatDetector::new(0.6, 0.06, MAX_BEATS_TRACKED);
        detector.observe(ChannelId::Primary, 1.0, 1.0);
        detector.reset();
        assert_eq!(detector.beats(ChannelId::Primary).count(), 0);
        assert_eq!(detector.total_beats(ChannelId::Primary), 0);
    }
}
