//! Displayed-progress driver.
//!
//! A [`ProgressDriver`] moves the visible percentage toward a target, either by
//! easing a fraction of the remaining distance on every frame or by assigning
//! the target outright and leaving any animation to the presentation layer.

use serde::{Deserialize, Serialize};

/// Fraction of the remaining distance covered per eased frame.
pub const EASING_FACTOR: f64 = 0.02;
/// Below this distance the displayed value snaps to the target.
pub const SNAP_THRESHOLD: f64 = 0.1;
/// Cap for targets while the job has not completed.
pub const MAX_ACTIVE_PERCENT: f64 = 99.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RenderMode {
    /// Step toward the target once per frame.
    #[default]
    Eased,
    /// Jump to the target immediately.
    Direct,
}

#[derive(Debug, Clone)]
pub struct ProgressDriver {
    mode: RenderMode,
    current: f64,
    target: f64,
    completed: bool,
}

impl ProgressDriver {
    pub fn new(mode: RenderMode) -> Self {
        Self {
            mode,
            current: 0.0,
            target: 0.0,
            completed: false,
        }
    }

    pub fn mode(&self) -> RenderMode {
        self.mode
    }

    /// Raise the target. Lower values are ignored so the display never moves backwards,
    /// and anything short of completion is capped at [`MAX_ACTIVE_PERCENT`].
    pub fn set_target(&mut self, target: f64) -> f64 {
        if self.completed || !target.is_finite() {
            return self.target;
        }
        let clamped = target.clamp(0.0, MAX_ACTIVE_PERCENT);
        if clamped > self.target {
            self.target = clamped;
        }
        if self.mode == RenderMode::Direct {
            self.current = self.target;
        }
        self.target
    }

    /// The only way to reach 100%.
    pub fn complete(&mut self) {
        self.completed = true;
        self.target = 100.0;
        if self.mode == RenderMode::Direct {
            self.current = self.target;
        }
    }

    /// Advance one animation frame. Returns `true` while the display is still moving.
    pub fn step(&mut self) -> bool {
        let remaining = self.target - self.current;
        if remaining.abs() > SNAP_THRESHOLD {
            self.current += remaining * EASING_FACTOR;
            true
        } else {
            self.current = self.target;
            false
        }
    }

    pub fn current(&self) -> f64 {
        self.current
    }

    pub fn target(&self) -> f64 {
        self.target
    }

    /// Whole-percent value shown next to the bar.
    pub fn rounded(&self) -> u8 {
        self.current.round().clamp(0.0, 100.0) as u8
    }

    pub fn is_settled(&self) -> bool {
        self.current == self.target
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    pub fn reset(&mut self) {
        self.current = 0.0;
        self.target = 0.0;
        self.completed = false;
    }
}

impl Default for ProgressDriver {
    fn default() -> Self {
        Self::new(RenderMode::default())
    }
}
