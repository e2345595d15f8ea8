//! Client-side progress estimation.
//!
//! The backend does not always report fine-grained progress, so while a job is
//! `processing` the displayed percentage is interpolated from a fixed list of
//! stages with expected durations. The estimate never exceeds
//! [`ESTIMATE_CEILING`]; 100% is reserved for the authoritative `completed`
//! status.

use crate::job::JobStatus;
use crate::selection::ProcessingMode;

/// Highest percentage an interpolated estimate may report.
pub const ESTIMATE_CEILING: f64 = 95.0;

/// Displayed percentage plus the status line that goes with it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Estimate {
    pub percent: f64,
    pub message: &'static str,
}

impl Estimate {
    const fn new(percent: f64, message: &'static str) -> Self {
        Self { percent, message }
    }
}

#[derive(Debug, Clone, Copy)]
struct Stage {
    target: f64,
    seconds: f64,
    message: &'static str,
}

const fn stage(target: f64, seconds: f64, message: &'static str) -> Stage {
    Stage {
        target,
        seconds,
        message,
    }
}

#[derive(Debug)]
struct Profile {
    uploaded: Estimate,
    queued: Estimate,
    stages: &'static [Stage],
    completed: Estimate,
    failed: Estimate,
}

const PRECISE_STAGES: [Stage; 6] = [
    stage(20.0, 8.0, "Initializing audio processor..."),
    stage(35.0, 15.0, "Analyzing audio characteristics..."),
    stage(50.0, 20.0, "Measuring loudness levels..."),
    stage(75.0, 40.0, "Normalizing audio..."),
    stage(90.0, 10.0, "Finalizing processed audio..."),
    stage(95.0, 7.0, "Uploading normalized file..."),
];

const FAST_STAGES: [Stage; 4] = [
    stage(30.0, 5.0, "Initializing fast processor..."),
    stage(60.0, 20.0, "Fast normalizing audio..."),
    stage(90.0, 5.0, "Finalizing processed audio..."),
    stage(95.0, 5.0, "Uploading normalized file..."),
];

static PRECISE: Profile = Profile {
    uploaded: Estimate::new(8.0, "Upload complete, queuing for processing..."),
    queued: Estimate::new(12.0, "Queued for processing..."),
    stages: &PRECISE_STAGES,
    completed: Estimate::new(100.0, "Processing complete!"),
    failed: Estimate::new(0.0, "Processing failed"),
};

static FAST: Profile = Profile {
    uploaded: Estimate::new(10.0, "Upload complete, queuing..."),
    queued: Estimate::new(20.0, "Queued for fast processing..."),
    stages: &FAST_STAGES,
    completed: Estimate::new(100.0, "Fast processing complete!"),
    failed: Estimate::new(0.0, "Fast processing failed"),
};

const FALLBACK_MESSAGE: &str = "Processing...";
const FINAL_STAGE_MESSAGE: &str = "Uploading normalized file...";

impl Profile {
    fn for_mode(mode: ProcessingMode) -> &'static Profile {
        match mode {
            ProcessingMode::Fast => &FAST,
            ProcessingMode::Precise => &PRECISE,
        }
    }

    fn processing(&self, elapsed_secs: f64) -> Estimate {
        if !elapsed_secs.is_finite() || elapsed_secs < 0.0 {
            return self.final_stage();
        }

        let mut cumulative = 0.0;
        for (index, current) in self.stages.iter().enumerate() {
            cumulative += current.seconds;
            let is_last = index + 1 == self.stages.len();
            if elapsed_secs <= cumulative || is_last {
                let start = if index > 0 {
                    self.stages[index - 1].target
                } else {
                    current.target
                };
                let into_stage = elapsed_secs - (cumulative - current.seconds);
                let fraction = (into_stage / current.seconds).min(1.0);
                let percent = (start + (current.target - start) * fraction).min(ESTIMATE_CEILING);
                return Estimate::new(percent, current.message);
            }
        }

        self.final_stage()
    }

    fn final_stage(&self) -> Estimate {
        let message = self
            .stages
            .last()
            .map(|stage| stage.message)
            .unwrap_or(FINAL_STAGE_MESSAGE);
        Estimate::new(ESTIMATE_CEILING, message)
    }
}

/// Estimate progress for a job.
///
/// `backend_progress` is the value reported by the backend or `0.0` when it
/// reported none. `elapsed_secs` is the wall-clock time since the status last
/// changed.
pub fn estimate(
    status: JobStatus,
    backend_progress: f64,
    elapsed_secs: f64,
    mode: ProcessingMode,
) -> Estimate {
    if backend_progress.is_finite() && backend_progress > 0.0 {
        return Estimate::new(
            backend_progress.min(100.0),
            backend_progress_message(status, backend_progress, mode),
        );
    }

    let profile = Profile::for_mode(mode);
    match status {
        JobStatus::Uploaded => profile.uploaded,
        JobStatus::Queued => profile.queued,
        JobStatus::Processing => profile.processing(elapsed_secs),
        JobStatus::Completed => profile.completed,
        JobStatus::Failed => profile.failed,
        JobStatus::Cancelled | JobStatus::Unknown => Estimate::new(0.0, FALLBACK_MESSAGE),
    }
}

/// Status line for an authoritative backend progress value, by coarse bands.
///
/// These bands intentionally differ from the stage table used by [`estimate`].
pub fn backend_progress_message(
    status: JobStatus,
    progress: f64,
    mode: ProcessingMode,
) -> &'static str {
    let fast = mode == ProcessingMode::Fast;
    match status {
        JobStatus::Completed => "Processing complete!",
        JobStatus::Failed => "Processing failed",
        JobStatus::Processing => {
            if progress <= 15.0 {
                if fast {
                    "Initializing fast processor..."
                } else {
                    "Initializing audio processor..."
                }
            } else if progress <= 35.0 {
                if fast {
                    "Fast analyzing audio..."
                } else {
                    "Analyzing audio characteristics..."
                }
            } else if progress <= 55.0 {
                "Normalizing audio..."
            } else if progress <= 85.0 {
                "Finalizing processed audio..."
            } else if progress <= 99.0 {
                "Uploading normalized file..."
            } else {
                "Processing complete!"
            }
        }
        JobStatus::Uploaded => "Upload complete, queuing for processing...",
        JobStatus::Queued if fast => "Queued for fast processing...",
        JobStatus::Queued => "Queued for processing...",
        JobStatus::Cancelled | JobStatus::Unknown => FALLBACK_MESSAGE,
    }
}
