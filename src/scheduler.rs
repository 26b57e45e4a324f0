/// The watchdog loop: run the watch command on a cadence, feed results into
/// the failure counter, and fire the action command when it triggers.
///
/// Two modes share the counter logic:
/// - direct: the watch command runs fresh every `interval_secs`, and not at
///   all while the remaining back-off exceeds the time needed to collect
///   `failure_threshold` new failures.
/// - buffered: stdin is drained into a ring buffer every second, and every
///   `interval_secs` the buffer is piped into the watch command unless
///   back-off is active.
use crate::config::Settings;
use crate::failure::{Decision, FailureCounter, RunState};
use crate::input::LineSource;
use crate::ring_buffer::RingBuffer;
use crate::runner::CommandRunner;
use std::time::Duration;
use tracing::{debug, info, warn};

const TICK: Duration = Duration::from_secs(1);

pub struct Scheduler<R> {
    runner: R,
    watch_command: String,
    action_command: String,
    interval_secs: u64,
    counter: FailureCounter,
    /// Direct mode: seconds slept since the last check.
    since_check_secs: u64,
    /// Buffered mode: seconds since the last interval boundary.
    elapsed_secs: u64,
}

impl<R: CommandRunner> Scheduler<R> {
    pub fn new(settings: &Settings, runner: R) -> Self {
        Self {
            runner,
            watch_command: settings.watch_command.clone(),
            action_command: settings.action_command.clone(),
            interval_secs: settings.interval_secs,
            counter: FailureCounter::new(
                settings.failure_threshold,
                settings.backoff_secs,
                settings.expected_ok_code,
            ),
            // The first direct-mode step checks immediately
            since_check_secs: settings.interval_secs,
            elapsed_secs: 0,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> RunState {
        self.counter.state()
    }

    /// Run the watch command once and act on the result.
    async fn check(&mut self, input: Option<&[u8]>) -> Decision {
        let result = self.runner.run(&self.watch_command, input).await;
        debug!(
            exit_code = ?result.exit_code,
            output = %result.output.trim_end(),
            "watch command finished"
        );

        let decision = self.counter.record(result.exit_code);
        if let Decision::Triggered { failures } = decision {
            if self.counter.can_fire() {
                warn!(
                    failures,
                    threshold = self.counter.threshold(),
                    action = %self.action_command,
                    "failure threshold reached, running action"
                );
                self.fire_action(input).await;
            } else {
                debug!(
                    failures,
                    backoff_remaining_secs = self.counter.state().backoff_remaining_secs,
                    "failure threshold reached during back-off, action suppressed"
                );
            }
        }
        decision
    }

    /// The action's exit code is not evaluated; only its output is logged.
    async fn fire_action(&mut self, input: Option<&[u8]>) {
        let result = self.runner.run(&self.action_command, input).await;
        let output = result.output.trim_end();
        if output.is_empty() {
            debug!(exit_code = ?result.exit_code, "action command finished");
        } else {
            info!(exit_code = ?result.exit_code, output = %output, "action command finished");
        }
        self.counter.action_fired();
    }

    /// One direct-mode step. Returns how long to sleep before the next step.
    pub async fn direct_step(&mut self) -> Duration {
        let state = self.counter.state();
        let gate = u64::from(self.counter.threshold()).saturating_mul(self.interval_secs);
        let allowed = state.backoff_remaining_secs < gate;
        let due = self.since_check_secs >= self.interval_secs;

        if allowed && due {
            self.since_check_secs = 0;
            self.check(None).await;
        }

        if self.counter.is_backing_off() {
            self.counter.tick_second();
            self.since_check_secs += 1;
            TICK
        } else {
            // Back-off may have ended part-way through an interval
            let pause = self
                .interval_secs
                .saturating_sub(self.since_check_secs)
                .max(1);
            self.since_check_secs += pause;
            Duration::from_secs(pause)
        }
    }

    /// One buffered-mode tick. Called after every elapsed second.
    pub async fn buffered_tick<L: LineSource>(&mut self, source: &mut L, buffer: &mut RingBuffer) {
        if !source.is_closed() {
            let lines = source.drain_ready();
            if !lines.is_empty() {
                debug!(lines = lines.len(), "buffered input lines");
                buffer.extend(lines);
            }
        }

        self.elapsed_secs += 1;
        if self.counter.is_backing_off() {
            self.counter.tick_second();
            if self.elapsed_secs >= self.interval_secs {
                self.elapsed_secs = 0;
                debug!("check skipped during back-off");
            }
            return;
        }

        if self.elapsed_secs >= self.interval_secs {
            self.elapsed_secs = 0;
            if buffer.is_empty() {
                debug!("no input buffered yet, checking with an empty buffer");
            } else {
                debug!(buffered_lines = buffer.len(), "checking buffered input");
            }
            let input = buffer.to_input_bytes();
            self.check(Some(input.as_slice())).await;
        }
    }

    /// Direct mode: loop forever.
    pub async fn run_direct(&mut self) {
        info!(
            watch = %self.watch_command,
            interval_secs = self.interval_secs,
            threshold = self.counter.threshold(),
            "watching (direct mode)"
        );
        loop {
            let pause = self.direct_step().await;
            tokio::time::sleep(pause).await;
        }
    }

    /// Buffered mode: loop forever, ticking once per second.
    pub async fn run_buffered<L: LineSource>(&mut self, mut source: L, mut buffer: RingBuffer) {
        info!(
            watch = %self.watch_command,
            interval_secs = self.interval_secs,
            threshold = self.counter.threshold(),
            buffer_lines = buffer.capacity(),
            "watching (buffered mode)"
        );
        loop {
            tokio::time::sleep(TICK).await;
            self.buffered_tick(&mut source, &mut buffer).await;
        }
    }
}
