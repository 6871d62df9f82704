//! Fixed-rate output pacing
//!
//! Each tick runs the compute step, sends the vector and measures how long
//! that took. If there is time left in the period, the scheduler sleeps it
//! off (minus any accumulated debt). If not, the next tick starts immediately,
//! a dropped frame is reported and the overrun is remembered as debt so that
//! the following ticks catch up instead of drifting.

use crate::sink::OutputSink;
use crate::types::StopSignal;
use std::time::{Duration, Instant};

/// What to do after a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaceDecision {
    /// Sleep this long before the next tick; debt is cleared
    Sleep(Duration),
    /// Start the next tick immediately, carrying `debt`
    Drop { debt: Duration },
}

/// Decide how to wait after a tick that took `processing`
pub fn pace(period: Duration, processing: Duration, debt: Duration) -> PaceDecision {
    let spent = processing.saturating_add(debt);
    if period > spent {
        PaceDecision::Sleep(period - spent)
    } else {
        PaceDecision::Drop {
            debt: processing.saturating_sub(period).saturating_mul(2),
        }
    }
}

/// Source of time for the scheduler
pub trait Clock {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration);
}

/// Wall clock backed by [`std::thread::sleep`]
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// The compute step run once per tick
pub trait TickSource {
    /// Produce the vector for this tick
    fn tick(&mut self) -> &[u8];

    /// Length of the vector, used for the teardown blackout
    fn width(&self) -> usize;
}

/// Counters gathered over a pacing run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PacingStats {
    pub ticks: u64,
    pub dropped: u64,
    pub sink_errors: u64,
    pub max_processing: Duration,
}

/// Runs ticks at a fixed period until stopped
pub struct PacingScheduler<C: Clock = SystemClock> {
    clock: C,
    period: Duration,
    universe: u16,
    stop: StopSignal,
}

impl PacingScheduler<SystemClock> {
    pub fn new(period: Duration, universe: u16, stop: StopSignal) -> Self {
        Self::with_clock(SystemClock, period, universe, stop)
    }
}

impl<C: Clock> PacingScheduler<C> {
    pub fn with_clock(clock: C, period: Duration, universe: u16, stop: StopSignal) -> Self {
        Self {
            clock,
            period,
            universe,
            stop,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Tick until the stop signal is set, then send one blackout
    ///
    /// Sink failures are logged and counted; they never end the loop.
    pub fn run<T, S>(&mut self, source: &mut T, sink: &mut S) -> PacingStats
    where
        T: TickSource + ?Sized,
        S: OutputSink + ?Sized,
    {
        let mut stats = PacingStats::default();
        let mut debt = Duration::ZERO;
        let mut wait = Duration::ZERO;

        log::info!(
            "Output loop started: {:.1} fps on universe {}",
            1.0 / self.period.as_secs_f64(),
            self.universe
        );

        while !self.stop.is_requested() {
            if !wait.is_zero() {
                self.clock.sleep(wait);
            }

            let start = self.clock.now();
            let data = source.tick();
            if let Err(e) = sink.send(self.universe, data) {
                log::error!("Failed to send output frame: {}", e);
                stats.sink_errors += 1;
            }
            let processing = self.clock.now().saturating_duration_since(start);

            stats.ticks += 1;
            stats.max_processing = stats.max_processing.max(processing);

            match pace(self.period, processing, debt) {
                PaceDecision::Sleep(duration) => {
                    wait = duration;
                    debt = Duration::ZERO;
                }
                PaceDecision::Drop { debt: carried } => {
                    log::warn!(
                        "Dropped frame: tick {} took {:?} (period {:?}, debt {:?})",
                        stats.ticks,
                        processing,
                        self.period,
                        debt
                    );
                    stats.dropped += 1;
                    wait = Duration::ZERO;
                    debt = carried;
                }
            }
            log::trace!("Tick {} processed in {:?}", stats.ticks, processing);
        }

        let blackout = vec![0u8; source.width()];
        if let Err(e) = sink.send(self.universe, &blackout) {
            log::error!("Failed to send teardown blackout: {}", e);
            stats.sink_errors += 1;
        }

        log::info!(
            "Output loop stopped after {} ticks ({} dropped)",
            stats.ticks,
            stats.dropped
        );
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;
    use crate::types::{Error, Result};
    use std::cell::Cell;
    use std::rc::Rc;

    /// Clock that only moves when told to
    #[derive(Clone)]
    struct ManualClock {
        origin: Instant,
        elapsed: Rc<Cell<Duration>>,
    }

    impl ManualClock {
        fn new() -> Self {
            Self {
                origin: Instant::now(),
                elapsed: Rc::new(Cell::new(Duration::ZERO)),
            }
        }

        fn advance(&self, by: Duration) {
            self.elapsed.set(self.elapsed.get() + by);
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            self.origin + self.elapsed.get()
        }

        fn sleep(&self, duration: Duration) {
            self.advance(duration);
        }
    }

    /// Burns a scripted amount of clock time per tick and stops after the script
    struct ScriptedSource {
        clock: ManualClock,
        costs: Vec<Duration>,
        starts: Vec<Instant>,
        stop: StopSignal,
        data: Vec<u8>,
    }

    impl TickSource for ScriptedSource {
        fn tick(&mut self) -> &[u8] {
            let n = self.starts.len();
            self.starts.push(self.clock.now());
            self.clock.advance(self.costs[n]);
            self.data = vec![n as u8 + 1; 3];
            if self.starts.len() == self.costs.len() {
                self.stop.request();
            }
            &self.data
        }

        fn width(&self) -> usize {
            3
        }
    }

    fn run_script(costs: Vec<Duration>) -> (PacingStats, Vec<Instant>, MemorySink) {
        let clock = ManualClock::new();
        let stop = StopSignal::new();
        let mut source = ScriptedSource {
            clock: clock.clone(),
            costs,
            starts: Vec::new(),
            stop: stop.clone(),
            data: Vec::new(),
        };
        let mut sink = MemorySink::new();
        let mut scheduler = PacingScheduler::with_clock(clock, ms(100), 0, stop);
        let stats = scheduler.run(&mut source, &mut sink);
        (stats, source.starts, sink)
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_pace_decisions() {
        assert_eq!(pace(ms(100), ms(20), ms(0)), PaceDecision::Sleep(ms(80)));
        assert_eq!(pace(ms(100), ms(20), ms(30)), PaceDecision::Sleep(ms(50)));
        assert_eq!(pace(ms(100), ms(150), ms(0)), PaceDecision::Drop { debt: ms(100) });
        // Debt alone can force a drop; the new debt never goes negative
        assert_eq!(pace(ms(100), ms(20), ms(100)), PaceDecision::Drop { debt: ms(0) });
        assert_eq!(pace(ms(100), ms(100), ms(0)), PaceDecision::Drop { debt: ms(0) });
    }

    #[test]
    fn test_steady_ticks_keep_the_period() {
        let (stats, starts, sink) = run_script(vec![ms(20); 5]);

        assert_eq!(stats.ticks, 5);
        assert_eq!(stats.dropped, 0);
        assert_eq!(stats.max_processing, ms(20));
        for pair in starts.windows(2) {
            assert_eq!(pair[1] - pair[0], ms(100));
        }
        // Five ticks and the teardown blackout
        assert_eq!(sink.len(), 6);
        assert_eq!(sink.last(), Some(vec![0, 0, 0]));
    }

    #[test]
    fn test_overrun_skips_sleep_and_recovers() {
        let (stats, starts, _) = run_script(vec![ms(20), ms(150), ms(20), ms(20), ms(20), ms(20)]);

        assert_eq!(stats.ticks, 6);
        assert!(stats.dropped >= 1);
        assert_eq!(stats.max_processing, ms(150));
        // No sleep after the slow tick
        assert_eq!(starts[2] - starts[1], ms(150));
        // Back on a steady period once the debt is paid
        assert_eq!(starts[5] - starts[4], ms(100));
    }

    #[test]
    fn test_stop_before_first_tick_only_blacks_out() {
        let clock = ManualClock::new();
        let stop = StopSignal::new();
        stop.request();
        let mut source = ScriptedSource {
            clock: clock.clone(),
            costs: vec![ms(1)],
            starts: Vec::new(),
            stop: stop.clone(),
            data: Vec::new(),
        };
        let mut sink = MemorySink::new();
        let stats = PacingScheduler::with_clock(clock, ms(100), 2, stop).run(&mut source, &mut sink);

        assert_eq!(stats.ticks, 0);
        assert_eq!(sink.sent(), vec![(2, vec![0, 0, 0])]);
    }

    struct FailingSink;

    impl OutputSink for FailingSink {
        fn send(&mut self, _universe: u16, _data: &[u8]) -> Result<()> {
            Err(Error::Sink("unplugged".to_string()))
        }
    }

    #[test]
    fn test_sink_errors_are_counted() {
        let clock = ManualClock::new();
        let stop = StopSignal::new();
        let mut source = ScriptedSource {
            clock: clock.clone(),
            costs: vec![ms(5); 3],
            starts: Vec::new(),
            stop: stop.clone(),
            data: Vec::new(),
        };
        let stats = PacingScheduler::with_clock(clock, ms(100), 0, stop).run(&mut source, &mut FailingSink);

        assert_eq!(stats.ticks, 3);
        // Three ticks plus the blackout
        assert_eq!(stats.sink_errors, 4);
    }
}
