use std::time::{Duration, Instant};

use tracing::warn;

pub const DEFAULT_TIMESTEP: Duration = Duration::from_nanos(16_666_667);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepMode {
    /// One update per call, stepped by the measured elapsed time.
    Variable,
    /// Updates in constant increments; leftover time carries over.
    Fixed { timestep: Duration },
}

impl StepMode {
    pub fn fixed_hz(hz: u32) -> Self {
        if hz == 0 {
            return StepMode::Fixed {
                timestep: DEFAULT_TIMESTEP,
            };
        }
        StepMode::Fixed {
            timestep: Duration::from_nanos(1_000_000_000 / u64::from(hz)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickPlan {
    pub steps: u32,
    pub step: Duration,
    /// Backlog discarded because it exceeded the catch-up cap.
    pub dropped_backlog: Duration,
}

impl TickPlan {
    fn idle() -> Self {
        Self {
            steps: 0,
            step: Duration::ZERO,
            dropped_backlog: Duration::ZERO,
        }
    }
}

#[derive(Debug)]
pub struct Clock {
    mode: StepMode,
    lag: Duration,
    running: bool,
    max_catch_up_steps: Option<u32>,
    last_measured: Option<Instant>,
}

impl Clock {
    pub fn new(mode: StepMode) -> Self {
        let mode = match mode {
            StepMode::Fixed { timestep } => StepMode::Fixed {
                timestep: normalize_non_zero_duration(timestep, DEFAULT_TIMESTEP),
            },
            StepMode::Variable => StepMode::Variable,
        };
        Self {
            mode,
            lag: Duration::ZERO,
            running: false,
            max_catch_up_steps: None,
            last_measured: None,
        }
    }

    /// Caps how many fixed steps a single call may run. Time beyond the cap
    /// is dropped instead of replayed later. `None` keeps every step.
    pub fn with_max_catch_up_steps(mut self, max_steps: Option<u32>) -> Self {
        self.max_catch_up_steps = max_steps.filter(|steps| *steps > 0);
        self
    }

    pub fn mode(&self) -> StepMode {
        self.mode
    }

    pub fn lag(&self) -> Duration {
        self.lag
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn start(&mut self) {
        self.running = true;
    }

    /// Cancels future ticking. Accumulated lag is kept.
    pub fn stop(&mut self) {
        self.running = false;
        self.last_measured = None;
    }

    pub fn plan(&mut self, elapsed: Duration) -> TickPlan {
        if !self.running {
            return TickPlan::idle();
        }

        match self.mode {
            StepMode::Variable => TickPlan {
                steps: 1,
                step: elapsed,
                dropped_backlog: Duration::ZERO,
            },
            StepMode::Fixed { timestep } => {
                self.lag = self.lag.saturating_add(elapsed);
                let plan = plan_fixed_steps(self.lag, timestep, self.max_catch_up_steps);
                self.lag = plan.remaining_lag;
                if plan.dropped_backlog > Duration::ZERO {
                    warn!(
                        dropped_backlog_ms = plan.dropped_backlog.as_millis() as u64,
                        max_catch_up_steps = ?self.max_catch_up_steps,
                        "clock_catch_up_clamped"
                    );
                }
                TickPlan {
                    steps: plan.steps,
                    step: timestep,
                    dropped_backlog: plan.dropped_backlog,
                }
            }
        }
    }

    /// Plans `elapsed` and runs `update` once per step. An `Err` is handed to
    /// `on_fatal` and the remaining steps still run. Returns the number of
    /// steps executed.
    pub fn run<E, U, F>(&mut self, elapsed: Duration, mut update: U, mut on_fatal: F) -> u32
    where
        U: FnMut(Duration) -> Result<(), E>,
        F: FnMut(E),
    {
        let plan = self.plan(elapsed);
        for _ in 0..plan.steps {
            if let Err(error) = update(plan.step) {
                on_fatal(error);
            }
        }
        plan.steps
    }

    /// Wall-clock time since the previous measurement. The first call after
    /// construction or `stop` returns zero.
    pub fn measure(&mut self, now: Instant) -> Duration {
        let elapsed = self
            .last_measured
            .map(|previous| now.saturating_duration_since(previous))
            .unwrap_or(Duration::ZERO);
        self.last_measured = Some(now);
        elapsed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FixedStepPlan {
    steps: u32,
    remaining_lag: Duration,
    dropped_backlog: Duration,
}

fn plan_fixed_steps(mut lag: Duration, timestep: Duration, max_steps: Option<u32>) -> FixedStepPlan {
    let cap = max_steps.unwrap_or(u32::MAX);
    let mut steps = 0u32;

    while lag >= timestep && steps < cap {
        lag = lag.saturating_sub(timestep);
        steps = steps.saturating_add(1);
    }

    if lag >= timestep {
        FixedStepPlan {
            steps,
            remaining_lag: Duration::ZERO,
            dropped_backlog: lag,
        }
    } else {
        FixedStepPlan {
            steps,
            remaining_lag: lag,
            dropped_backlog: Duration::ZERO,
        }
    }
}

fn normalize_non_zero_duration(value: Duration, fallback: Duration) -> Duration {
    if value.is_zero() {
        fallback
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed(ms: u64) -> Clock {
        let mut clock = Clock::new(StepMode::Fixed {
            timestep: Duration::from_millis(ms),
        });
        clock.start();
        clock
    }

    #[test]
    fn fixed_mode_accumulates_and_carries_remainder() {
        let mut clock = fixed(10);
        let plan = clock.plan(Duration::from_millis(25));
        assert_eq!(plan.steps, 2);
        assert_eq!(plan.step, Duration::from_millis(10));
        assert_eq!(clock.lag(), Duration::from_millis(5));

        assert_eq!(clock.plan(Duration::from_millis(5)).steps, 1);
        assert_eq!(clock.lag(), Duration::ZERO);
    }

    #[test]
    fn step_count_is_independent_of_chunking() {
        let mut whole = fixed(16);
        let mut chunked = fixed(16);

        let total_whole = whole.plan(Duration::from_millis(1000)).steps;
        let total_chunked: u32 = [3u64, 250, 17, 400, 1, 329]
            .iter()
            .map(|ms| chunked.plan(Duration::from_millis(*ms)).steps)
            .sum();

        assert_eq!(total_whole, 62);
        assert_eq!(total_whole, total_chunked);
        assert_eq!(whole.lag(), chunked.lag());
    }

    #[test]
    fn stopped_clock_neither_ticks_nor_accumulates() {
        let mut clock = fixed(10);
        clock.plan(Duration::from_millis(7));
        clock.stop();

        assert_eq!(clock.plan(Duration::from_millis(100)).steps, 0);
        assert_eq!(clock.lag(), Duration::from_millis(7));

        clock.start();
        assert_eq!(clock.plan(Duration::from_millis(3)).steps, 1);
    }

    #[test]
    fn variable_mode_runs_one_step_of_elapsed() {
        let mut clock = Clock::new(StepMode::Variable);
        clock.start();
        let plan = clock.plan(Duration::from_millis(33));
        assert_eq!(plan.steps, 1);
        assert_eq!(plan.step, Duration::from_millis(33));
    }

    #[test]
    fn catch_up_cap_drops_backlog() {
        let mut clock = fixed(10).with_max_catch_up_steps(Some(3));
        let plan = clock.plan(Duration::from_millis(95));
        assert_eq!(plan.steps, 3);
        assert_eq!(plan.dropped_backlog, Duration::from_millis(65));
        assert_eq!(clock.lag(), Duration::ZERO);
    }

    #[test]
    fn run_routes_errors_and_keeps_going() {
        let mut clock = fixed(10);
        let mut calls = 0;
        let mut failures = Vec::new();

        let steps = clock.run(
            Duration::from_millis(30),
            |_| {
                calls += 1;
                if calls == 2 {
                    Err("boom")
                } else {
                    Ok(())
                }
            },
            |error| failures.push(error),
        );

        assert_eq!(steps, 3);
        assert_eq!(calls, 3);
        assert_eq!(failures, vec!["boom"]);
    }

    #[test]
    fn zero_timestep_falls_back_to_default() {
        let clock = Clock::new(StepMode::Fixed {
            timestep: Duration::ZERO,
        });
        assert_eq!(
            clock.mode(),
            StepMode::Fixed {
                timestep: DEFAULT_TIMESTEP
            }
        );
    }

    #[test]
    fn measure_reports_wall_clock_delta() {
        let mut clock = Clock::new(StepMode::Variable);
        let base = Instant::now();
        assert_eq!(clock.measure(base), Duration::ZERO);
        assert_eq!(
            clock.measure(base + Duration::from_millis(40)),
            Duration::from_millis(40)
        );
    }
}
