//! Rolling frame timing for the frame loop.
//!
//! Each tick contributes one sample split into the wait (xrWaitFrame), render
//! (begin through the last view release) and submit (xrEndFrame) phases.

use std::collections::VecDeque;
use std::time::Duration;

const DEFAULT_WINDOW: usize = 1000;
/// 90 Hz until the runtime reports its display period.
const DEFAULT_BUDGET: Duration = Duration::from_nanos(11_111_111);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameSample {
    pub wait: Duration,
    pub render: Duration,
    pub submit: Duration,
    /// Whether a projection layer was submitted.
    pub rendered: bool,
}

impl FrameSample {
    pub fn total(&self) -> Duration {
        self.wait + self.render + self.submit
    }
}

#[derive(Debug)]
pub struct FrameTiming {
    samples: VecDeque<FrameSample>,
    window_size: usize,
    budget: Duration,
    total_frames: u64,
    missed_frames: u64,
    empty_frames: u64,
}

impl Default for FrameTiming {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW, DEFAULT_BUDGET)
    }
}

impl FrameTiming {
    pub fn new(window_size: usize, budget: Duration) -> Self {
        Self {
            samples: VecDeque::with_capacity(window_size),
            window_size: window_size.max(1),
            budget,
            total_frames: 0,
            missed_frames: 0,
            empty_frames: 0,
        }
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    /// Follow the runtime's predicted display period. Non-positive periods are ignored.
    pub fn set_display_period(&mut self, period_ns: i64) {
        if let Ok(ns) = u64::try_from(period_ns) {
            if ns > 0 {
                self.budget = Duration::from_nanos(ns);
            }
        }
    }

    pub fn record(&mut self, sample: FrameSample) {
        if self.samples.len() == self.window_size {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);

        self.total_frames += 1;
        if sample.total() > self.budget {
            self.missed_frames += 1;
        }
        if !sample.rendered {
            self.empty_frames += 1;
        }
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }

    pub fn missed_frames(&self) -> u64 {
        self.missed_frames
    }

    pub fn empty_frames(&self) -> u64 {
        self.empty_frames
    }

    fn sorted_ms(&self, pick: impl Fn(&FrameSample) -> Duration) -> Vec<f64> {
        let mut v: Vec<f64> = self
            .samples
            .iter()
            .map(|s| pick(s).as_secs_f64() * 1000.0)
            .collect();
        v.sort_by(f64::total_cmp);
        v
    }

    fn percentile(sorted: &[f64], p: f64) -> f64 {
        if sorted.is_empty() {
            return 0.0;
        }
        let idx = ((sorted.len() - 1) as f64 * p / 100.0).round() as usize;
        sorted[idx.min(sorted.len() - 1)]
    }

    pub fn stats(&self) -> FrameTimingStats {
        let wait = self.sorted_ms(|s| s.wait);
        let render = self.sorted_ms(|s| s.render);
        let submit = self.sorted_ms(|s| s.submit);
        let total = self.sorted_ms(FrameSample::total);

        let total_p50 = Self::percentile(&total, 50.0);
        FrameTimingStats {
            wait_p50: Self::percentile(&wait, 50.0),
            render_p50: Self::percentile(&render, 50.0),
            render_p99: Self::percentile(&render, 99.0),
            submit_p50: Self::percentile(&submit, 50.0),
            total_p50,
            total_p95: Self::percentile(&total, 95.0),
            total_p99: Self::percentile(&total, 99.0),
            fps: if total_p50 > 0.0 { 1000.0 / total_p50 } else { 0.0 },
            missed_pct: if self.total_frames > 0 {
                self.missed_frames as f64 / self.total_frames as f64 * 100.0
            } else {
                0.0
            },
            budget_ms: self.budget.as_secs_f64() * 1000.0,
            total_frames: self.total_frames,
            missed_frames: self.missed_frames,
            empty_frames: self.empty_frames,
        }
    }

    pub fn stats_sexp(&self) -> String {
        let s = self.stats();
        format!(
            "(:wait-p50 {:.1} :render-p50 {:.1} :render-p99 {:.1} :submit-p50 {:.1} :total-p50 {:.1} :total-p95 {:.1} :total-p99 {:.1} :budget {:.1} :missed-pct {:.1} :fps {:.0} :total-frames {} :missed-frames {} :empty-frames {})",
            s.wait_p50,
            s.render_p50,
            s.render_p99,
            s.submit_p50,
            s.total_p50,
            s.total_p95,
            s.total_p99,
            s.budget_ms,
            s.missed_pct,
            s.fps,
            s.total_frames,
            s.missed_frames,
            s.empty_frames,
        )
    }
}

/// Percentiles in milliseconds.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameTimingStats {
    pub wait_p50: f64,
    pub render_p50: f64,
    pub render_p99: f64,
    pub submit_p50: f64,
    pub total_p50: f64,
    pub total_p95: f64,
    pub total_p99: f64,
    pub fps: f64,
    pub missed_pct: f64,
    pub budget_ms: f64,
    pub total_frames: u64,
    pub missed_frames: u64,
    pub empty_frames: u64,
}
