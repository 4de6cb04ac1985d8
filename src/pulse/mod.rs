pub mod expr;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use self::expr::{Evaluator, Scope};

/// Longest delay a pulse may ask for.
pub const MAX_DELAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Convert a millisecond count into a delay, capped at [`MAX_DELAY`].
pub fn delay_from_millis(ms: f64) -> Duration {
    Duration::try_from_secs_f64(ms / 1000.0)
        .unwrap_or(MAX_DELAY)
        .min(MAX_DELAY)
}

/// How a node paces its trigger events.
#[derive(Clone)]
pub enum Pulse {
    /// Fire every period.
    Fixed(Duration),
    /// Ask the expression for the next delay, in milliseconds, each time.
    Expression(Arc<dyn Evaluator>),
}

impl fmt::Debug for Pulse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pulse::Fixed(period) => f.debug_tuple("Fixed").field(period).finish(),
            Pulse::Expression(e) => f.debug_tuple("Expression").field(e).finish(),
        }
    }
}

/// Result of one evaluation of a pulse.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Step {
    pub delay: Duration,
    /// Whether this firing broadcasts a trigger. A zero-delay expression rests.
    pub emit: bool,
}

impl Pulse {
    /// Work out the delay until the next firing.
    ///
    /// `rest` is used when the expression yields exactly zero or fails, so a
    /// resting node keeps re-evaluating without spinning.
    pub fn step(&self, scope: impl FnOnce() -> Scope, rest: Duration) -> Step {
        match self {
            Pulse::Fixed(period) => Step {
                delay: *period,
                emit: true,
            },
            Pulse::Expression(expr) => match expr.evaluate(&scope()) {
                Ok(value) => {
                    let ms = value.abs();
                    if ms > 0.0 {
                        Step {
                            delay: delay_from_millis(ms),
                            emit: true,
                        }
                    } else {
                        Step { delay: rest, emit: false }
                    }
                }
                Err(e) => {
                    log::warn!("pulse expression failed: {e}");
                    Step { delay: rest, emit: false }
                }
            },
        }
    }
}

/// A pulse that is armed on the current node: the cancellable handle for the
/// next firing. Dropping it cancels the firing.
#[derive(Debug, Clone)]
pub struct PulseTimer {
    pub pulse: Pulse,
    pub deadline: Instant,
    pub fired: u64,
}

impl PulseTimer {
    pub fn arm(pulse: Pulse, now: Instant, first: Step) -> Self {
        Self {
            pulse,
            deadline: now + first.delay,
            fired: 0,
        }
    }

    pub fn reschedule(&mut self, now: Instant, step: Step) {
        self.deadline = now + step.delay;
        if step.emit {
            self.fired += 1;
        }
    }
}
