use crate::config::AudioConfig;
use std::collections::VecDeque;

/// Cry decision state machine
///
/// `detected` switches on at `score >= enter` and off at `score <= exit`;
/// scores in between keep the current state. Every update also feeds a
/// rolling window whose majority drives the alarm.
#[derive(Debug, Clone)]
pub struct CryTracker {
    enter_threshold: f32,
    exit_threshold: f32,
    window: usize,
    min_positive: usize,
    detected: bool,
    recent: VecDeque<bool>,
}

impl CryTracker {
    pub fn new(
        enter_threshold: f32,
        exit_threshold: f32,
        window: usize,
        min_positive: usize,
    ) -> Self {
        let window = window.max(1);
        Self {
            enter_threshold,
            exit_threshold,
            window,
            min_positive,
            detected: false,
            recent: VecDeque::with_capacity(window),
        }
    }

    pub fn from_config(config: &AudioConfig) -> Self {
        Self::new(
            config.enter_threshold,
            config.exit_threshold,
            config.alarm_window,
            config.alarm_min_positive,
        )
    }

    /// Apply one cry score; returns the post-transition detection flag
    pub fn update(&mut self, score: f32) -> bool {
        if self.detected {
            if score <= self.exit_threshold {
                self.detected = false;
            }
        } else if score >= self.enter_threshold {
            self.detected = true;
        }

        if self.recent.len() == self.window {
            self.recent.pop_front();
        }
        self.recent.push_back(self.detected);

        self.detected
    }

    pub fn is_detected(&self) -> bool {
        self.detected
    }

    pub fn alarm_active(&self) -> bool {
        self.recent.iter().filter(|&&d| d).count() >= self.min_positive
    }

    pub fn recent(&self) -> Vec<bool> {
        self.recent.iter().copied().collect()
    }
}
