//! Bisection search for the highest load level that still passes.
//!
//! The engine is a plain interval state machine: callers ask for the next
//! value to probe, run the probe (an async remote measurement they own), and
//! feed the outcome back. Keeping the probe call outside the engine keeps
//! the algorithm synchronous and testable against scripted oracles.
//!
//! The search assumes the oracle is monotone: success for every value up to
//! some breakpoint, failure above it. The declared lower bound is assumed to
//! always succeed; the declared upper bound is not assumed to fail and is
//! probed first, as the optimistic fast path.

use tracing::debug;

use crate::result::ProbeOutcome;

#[derive(Debug, Clone)]
pub struct SearchEngine {
    lower0: f64,
    upper0: f64,
    lower: f64,
    upper: f64,
    precision: f64,
    adjust: f64,
    next: f64,
    best_mpps: f64,
    probes: u32,
}

/// Final state of a converged search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchOutcome {
    /// Seed bounds the search started from.
    pub lower_bound: f64,
    pub upper_bound: f64,
    /// Throughput of the probe that set the final lower bound, rounded to
    /// two decimals; 0 if no probe ever succeeded.
    pub measurement: f64,
    /// Highest value confirmed successful.
    pub converged: f64,
    pub probes: u32,
}

impl SearchEngine {
    pub fn new(lower: f64, upper: f64, precision: f64) -> Self {
        // Bias the first bisection step so that the interval width after it
        // is a power-of-2 multiple of the precision. When the first probed
        // value (the upper bound) fails, the remaining halvings then land on
        // integer multiples of the precision instead of fractions of it.
        let mut adjust = precision;
        while upper - lower > adjust {
            adjust *= 2.0;
        }
        adjust = (upper - lower - adjust) / 2.0;

        Self {
            lower0: lower,
            upper0: upper,
            lower,
            upper,
            precision,
            adjust,
            next: upper,
            best_mpps: 0.0,
            probes: 0,
        }
    }

    /// Next value to probe, or `None` once the interval has closed below the
    /// precision.
    pub fn next_value(&self) -> Option<f64> {
        if self.upper - self.lower >= self.precision {
            Some(self.next)
        } else {
            None
        }
    }

    /// Current `[lower, upper)` interval, for logging.
    pub fn interval(&self) -> (f64, f64) {
        (self.lower, self.upper)
    }

    /// Fold a probe outcome for the last value returned by `next_value`.
    pub fn record(&mut self, outcome: ProbeOutcome) {
        let value = self.next;
        if outcome.success {
            debug!(value, "success, raising lower bound");
            self.lower = value;
            self.best_mpps = outcome.mpps;
        } else {
            debug!(value, "failure, dropping upper bound");
            self.upper = value;
        }

        self.next = self.lower + (self.upper - self.lower) / 2.0 + self.adjust;
        // The bias only applies to the first real bisection step.
        self.adjust = 0.0;
        self.probes += 1;
    }

    pub fn finish(self) -> SearchOutcome {
        SearchOutcome {
            lower_bound: self.lower0,
            upper_bound: self.upper0,
            measurement: (self.best_mpps * 100.0).round() / 100.0,
            converged: self.lower,
            probes: self.probes,
        }
    }
}
