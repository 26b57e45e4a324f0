use tracing::{debug, info};

/// Decision returned by the failure counter after evaluating a check result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Check returned the expected OK code — counter reset.
    Ok,
    /// Check failed but the threshold is not reached yet.
    Counting { failures: u32 },
    /// Threshold reached. The action only fires if no back-off is active.
    Triggered { failures: u32 },
}

/// Mutable scheduler state shared by both run modes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunState {
    pub consecutive_failures: u32,
    pub backoff_remaining_secs: u64,
}

/// Failure counter and back-off timer.
///
/// Counts consecutive non-OK exit codes. Once `threshold` failures have
/// accumulated, `record` returns `Triggered`; the caller fires the action
/// only when `can_fire()` and then calls `action_fired()`, which resets the
/// counter and arms a back-off window of `backoff_secs` seconds.
pub struct FailureCounter {
    threshold: u32,
    backoff_secs: u64,
    expected_ok_code: i32,
    state: RunState,
}

impl FailureCounter {
    pub fn new(threshold: u32, backoff_secs: u64, expected_ok_code: i32) -> Self {
        Self {
            threshold,
            backoff_secs,
            expected_ok_code,
            state: RunState::default(),
        }
    }

    /// Evaluate one check result.
    ///
    /// `None` (spawn failure, signal, timeout) is never OK.
    pub fn record(&mut self, exit_code: Option<i32>) -> Decision {
        if exit_code == Some(self.expected_ok_code) {
            if self.state.consecutive_failures > 0 {
                info!(
                    previous_failures = self.state.consecutive_failures,
                    "check recovered, resetting failure count"
                );
            }
            self.state.consecutive_failures = 0;
            return Decision::Ok;
        }

        self.state.consecutive_failures = self.state.consecutive_failures.saturating_add(1);
        let failures = self.state.consecutive_failures;

        if failures >= self.threshold {
            Decision::Triggered { failures }
        } else {
            info!(
                ?exit_code,
                failures,
                threshold = self.threshold,
                "check failed"
            );
            Decision::Counting { failures }
        }
    }

    /// The action may fire only outside a back-off window.
    pub fn can_fire(&self) -> bool {
        self.state.backoff_remaining_secs == 0
    }

    pub fn is_backing_off(&self) -> bool {
        self.state.backoff_remaining_secs > 0
    }

    /// Reset the counter and arm back-off after the action ran.
    pub fn action_fired(&mut self) {
        self.state.consecutive_failures = 0;
        if self.backoff_secs > 0 {
            self.state.backoff_remaining_secs = self.backoff_secs;
            info!(backoff_secs = self.backoff_secs, "entering back-off");
        }
    }

    /// Account for one elapsed second of back-off. Returns the seconds left.
    pub fn tick_second(&mut self) -> u64 {
        if self.state.backoff_remaining_secs > 0 {
            self.state.backoff_remaining_secs -= 1;
            debug!(
                remaining_secs = self.state.backoff_remaining_secs,
                "backing off"
            );
            if self.state.backoff_remaining_secs == 0 {
                info!("back-off finished, checks resume");
            }
        }
        self.state.backoff_remaining_secs
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }
}
