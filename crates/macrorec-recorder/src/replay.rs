//! Timed replay of an event log through an injection facility
//!
//! Each event is due at `play_start + (timestamp - first_timestamp) / speed`.
//! Deadlines are absolute, so time spent injecting does not accumulate as drift.

use crate::events::{Event, EventLog};
use macrorec_core::{InputInjection, Result};
use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Interrupts a running replay. Clones share the same flag.
#[derive(Clone, Default)]
pub struct StopSignal {
    inner: Arc<StopInner>,
}

#[derive(Default)]
struct StopInner {
    stopped: Mutex<bool>,
    cvar: Condvar,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        *self.inner.stopped.lock() = true;
        self.inner.cvar.notify_all();
    }

    /// Re-arm for the next replay
    pub fn reset(&self) {
        *self.inner.stopped.lock() = false;
    }

    pub fn is_stopped(&self) -> bool {
        *self.inner.stopped.lock()
    }

    /// Sleep until `deadline` or until stopped. Returns true if stopped.
    pub fn wait_until(&self, deadline: Instant) -> bool {
        let mut stopped = self.inner.stopped.lock();
        while !*stopped {
            if self.inner.cvar.wait_until(&mut stopped, deadline).timed_out() {
                break;
            }
        }
        *stopped
    }

    /// Sleep until stopped
    pub fn wait(&self) {
        let mut stopped = self.inner.stopped.lock();
        while !*stopped {
            self.inner.cvar.wait(&mut stopped);
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReplayStats {
    pub clicks: usize,
    pub keys: usize,
}

impl ReplayStats {
    pub fn total(&self) -> usize {
        self.clicks + self.keys
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayOutcome {
    /// Nothing to play. Advisory, not an error.
    EmptyLog,
    Completed(ReplayStats),
    Cancelled(ReplayStats),
}

/// Replay recorded macros
#[derive(Debug, Clone)]
pub struct Replayer {
    speed: f64,
}

impl Replayer {
    pub fn new() -> Self {
        Self { speed: 1.0 }
    }

    /// Set playback speed (1.0 = real-time, 2.0 = 2x speed), clamped to 0.1..=10.0
    pub fn speed(mut self, speed: f64) -> Self {
        self.speed = if speed.is_finite() {
            speed.clamp(0.1, 10.0)
        } else {
            1.0
        };
        self
    }

    pub fn current_speed(&self) -> f64 {
        self.speed
    }

    /// Replay `log`, blocking the calling thread until the last event has been
    /// injected, an injection fails, or `stop` fires.
    pub fn play(
        &self,
        log: &EventLog,
        injector: &dyn InputInjection,
        stop: &StopSignal,
    ) -> Result<ReplayOutcome> {
        let Some(first) = log.first() else {
            tracing::info!("nothing to replay");
            return Ok(ReplayOutcome::EmptyLog);
        };
        let base = first.timestamp();
        let play_start = Instant::now();
        let mut stats = ReplayStats::default();

        tracing::info!(events = log.len(), speed = self.speed, "replay started");

        for event in log {
            // Negative offsets (clock irregularities in the source) are due immediately
            let offset = ((event.timestamp() - base) / self.speed).max(0.0);
            let deadline = Duration::try_from_secs_f64(offset)
                .ok()
                .and_then(|d| play_start.checked_add(d));
            let stopped = match deadline {
                Some(deadline) => stop.wait_until(deadline),
                None => {
                    stop.wait();
                    true
                }
            };
            if stopped {
                tracing::info!(dispatched = stats.total(), "replay cancelled");
                return Ok(ReplayOutcome::Cancelled(stats));
            }

            let injected = match event {
                Event::MouseClick { x, y, .. } => {
                    tracing::debug!(x, y, offset, "inject click");
                    injector.click_at(*x, *y).map(|_| stats.clicks += 1)
                }
                Event::KeyPress { key, .. } => {
                    tracing::debug!(%key, offset, "inject key");
                    injector.press_key(&key.token()).map(|_| stats.keys += 1)
                }
            };
            if let Err(e) = injected {
                tracing::warn!(error = %e, dispatched = stats.total(), "replay aborted");
                return Err(e);
            }
        }

        tracing::info!(clicks = stats.clicks, keys = stats.keys, "replay finished");
        Ok(ReplayOutcome::Completed(stats))
    }
}

impl Default for Replayer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{KeyRef, MouseButton};
    use crate::testing::RecordingInjector;
    use macrorec_core::{InjectedAction, MacroError};
    use std::thread;

    fn key(timestamp: f64, c: char) -> Event {
        Event::KeyPress {
            timestamp,
            key: KeyRef::Char(c),
        }
    }

    fn click(timestamp: f64, x: i32, y: i32) -> Event {
        Event::MouseClick {
            timestamp,
            x,
            y,
            button: MouseButton::Left,
            pressed: true,
        }
    }

    fn gaps(instants: &[Instant]) -> Vec<f64> {
        instants
            .windows(2)
            .map(|w| (w[1] - w[0]).as_secs_f64())
            .collect()
    }

    #[test]
    fn empty_log_is_advisory() {
        let injector = RecordingInjector::new();
        let outcome = Replayer::new()
            .play(&EventLog::new(), &injector, &StopSignal::new())
            .unwrap();
        assert_eq!(outcome, ReplayOutcome::EmptyLog);
        assert!(injector.actions().is_empty());
    }

    #[test]
    fn reproduces_relative_timing() {
        let base = 1_700_000_000.0;
        let log = EventLog::from(vec![
            click(base, 10, 20),
            key(base + 0.5, 'a'),
            Event::KeyPress {
                timestamp: base + 1.2,
                key: KeyRef::Named("esc".into()),
            },
        ]);
        let injector = RecordingInjector::new();
        let outcome = Replayer::new()
            .play(&log, &injector, &StopSignal::new())
            .unwrap();

        assert_eq!(
            outcome,
            ReplayOutcome::Completed(ReplayStats { clicks: 1, keys: 2 })
        );
        assert_eq!(
            injector.actions(),
            vec![
                InjectedAction::Click { x: 10, y: 20 },
                InjectedAction::Press { key: "a".into() },
                InjectedAction::Press { key: "esc".into() },
            ]
        );
        let g = gaps(&injector.instants());
        assert!((g[0] - 0.5).abs() < 0.05, "first gap {}", g[0]);
        assert!((g[1] - 0.7).abs() < 0.05, "second gap {}", g[1]);
    }

    #[test]
    fn speed_scales_delays() {
        let log = EventLog::from(vec![key(0.0, 'a'), key(0.4, 'b')]);
        let injector = RecordingInjector::new();
        Replayer::new()
            .speed(2.0)
            .play(&log, &injector, &StopSignal::new())
            .unwrap();
        let g = gaps(&injector.instants());
        assert!((g[0] - 0.2).abs() < 0.05, "gap {}", g[0]);
    }

    #[test]
    fn backwards_timestamps_play_immediately() {
        let log = EventLog::from(vec![key(10.0, 'a'), key(9.0, 'b'), key(10.0, 'c')]);
        let injector = RecordingInjector::new();
        let started = Instant::now();
        let outcome = Replayer::new()
            .play(&log, &injector, &StopSignal::new())
            .unwrap();
        assert_eq!(
            outcome,
            ReplayOutcome::Completed(ReplayStats { clicks: 0, keys: 3 })
        );
        assert!(started.elapsed() < Duration::from_millis(100));
    }

    #[test]
    fn stop_interrupts_a_long_wait() {
        let log = EventLog::from(vec![key(0.0, 'a'), key(3600.0, 'b')]);
        let injector = RecordingInjector::new();
        let stop = StopSignal::new();

        let stopper = {
            let stop = stop.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(100));
                stop.stop();
            })
        };
        let started = Instant::now();
        let outcome = Replayer::new().play(&log, &injector, &stop).unwrap();
        stopper.join().unwrap();

        assert_eq!(
            outcome,
            ReplayOutcome::Cancelled(ReplayStats { clicks: 0, keys: 1 })
        );
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(injector.actions().len(), 1);
    }

    #[test]
    fn injection_failure_aborts_replay() {
        let log = EventLog::from(vec![key(0.0, 'a'), key(0.0, 'b'), key(0.0, 'c')]);
        let injector = RecordingInjector::new();
        injector.fail_after(1);
        let err = Replayer::new()
            .play(&log, &injector, &StopSignal::new())
            .unwrap_err();
        assert!(matches!(err, MacroError::Injection(_)));
        assert_eq!(injector.actions().len(), 1);
    }

    #[test]
    fn speed_is_clamped() {
        assert_eq!(Replayer::new().speed(100.0).current_speed(), 10.0);
        assert_eq!(Replayer::new().speed(0.0).current_speed(), 0.1);
        assert_eq!(Replayer::new().speed(f64::NAN).current_speed(), 1.0);
    }
}
