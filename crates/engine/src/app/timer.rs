use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Repeat {
    Once,
    Forever,
    Times(u32),
}

impl Repeat {
    fn limit(self) -> Option<u32> {
        match self {
            Repeat::Once => Some(1),
            Repeat::Forever => None,
            Repeat::Times(count) => Some(count),
        }
    }
}

/// Fires `signal` every `interval` of scene time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timer {
    pub interval: Duration,
    pub repeats: Repeat,
    pub signal: String,
}

impl Timer {
    pub fn once(interval: Duration, signal: impl Into<String>) -> Self {
        Self {
            interval,
            repeats: Repeat::Once,
            signal: signal.into(),
        }
    }

    pub fn repeating(interval: Duration, repeats: Repeat, signal: impl Into<String>) -> Self {
        Self {
            interval,
            repeats,
            signal: signal.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerFired {
    pub id: TimerId,
    pub signal: String,
    /// How many times this timer has fired, including this one.
    pub count: u32,
}

#[derive(Debug)]
struct TimerState {
    timer: Timer,
    accumulated: Duration,
    fired: u32,
}

impl TimerState {
    fn finished(&self) -> bool {
        self.timer
            .repeats
            .limit()
            .is_some_and(|limit| self.fired >= limit)
    }
}

/// Scene-owned timers. Cancellation takes effect at the start of the next
/// scene update, never in the middle of one.
#[derive(Debug, Default)]
pub struct Timers {
    next_id: u64,
    active: BTreeMap<TimerId, TimerState>,
    pending_cancels: Vec<TimerId>,
}

impl Timers {
    pub fn add(&mut self, timer: Timer) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id = self.next_id.saturating_add(1);
        self.active.insert(
            id,
            TimerState {
                timer,
                accumulated: Duration::ZERO,
                fired: 0,
            },
        );
        id
    }

    pub fn cancel(&mut self, id: TimerId) -> bool {
        if !self.active.contains_key(&id) {
            return false;
        }
        self.pending_cancels.push(id);
        true
    }

    pub fn is_active(&self, id: TimerId) -> bool {
        self.active.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    pub(crate) fn flush_cancellations(&mut self) {
        for id in self.pending_cancels.drain(..) {
            self.active.remove(&id);
        }
    }

    pub(crate) fn advance(&mut self, elapsed: Duration) -> Vec<TimerFired> {
        let mut fired = Vec::new();
        for (id, state) in &mut self.active {
            state.accumulated = state.accumulated.saturating_add(elapsed);
            if state.timer.interval.is_zero() {
                if !state.finished() {
                    state.fired += 1;
                    fired.push(TimerFired {
                        id: *id,
                        signal: state.timer.signal.clone(),
                        count: state.fired,
                    });
                }
                continue;
            }
            while state.accumulated >= state.timer.interval && !state.finished() {
                state.accumulated -= state.timer.interval;
                state.fired += 1;
                fired.push(TimerFired {
                    id: *id,
                    signal: state.timer.signal.clone(),
                    count: state.fired,
                });
            }
        }
        self.active.retain(|_, state| !state.finished());
        fired
    }
}
