//! Time-ordered event queue and the driver loop
//!
//! Events pop in ascending time; events with the same time pop in the order
//! they were scheduled. Together with a seeded RNG this makes every run
//! reproducible.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use log::debug;

use crate::bk_error::{SchedulingError, SimError};
use crate::bk_interface::SimTime;

/// An event waiting in the queue
struct Scheduled<E> {
    time: SimTime,
    seq: u64,
    event: E,
}

impl<E> PartialEq for Scheduled<E> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<E> Eq for Scheduled<E> {}

impl<E> PartialOrd for Scheduled<E> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<E> Ord for Scheduled<E> {
    // BinaryHeap is a max-heap: the earliest (time, seq) must compare greatest
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .time
            .total_cmp(&self.time)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Pending events plus the simulation clock
pub struct EventQueue<E> {
    now: SimTime,
    next_seq: u64,
    pending: BinaryHeap<Scheduled<E>>,
    // events that would fire at t = +inf are never run
    dropped: usize,
}

impl<E> EventQueue<E> {
    pub fn new() -> Self {
        Self {
            now: 0.0,
            next_seq: 0,
            pending: BinaryHeap::new(),
            dropped: 0,
        }
    }

    /// Current simulation time
    pub fn now(&self) -> SimTime {
        self.now
    }

    /// Schedule `event` at `now + delay`
    pub fn schedule(&mut self, delay: SimTime, event: E) -> Result<(), SchedulingError> {
        // also rejects NaN
        if !(delay >= 0.0) {
            return Err(SchedulingError::NegativeDelay {
                delay,
                now: self.now,
            });
        }
        self.push(self.now + delay, event);
        Ok(())
    }

    /// Schedule `event` at absolute `time`
    pub fn schedule_at(&mut self, time: SimTime, event: E) -> Result<(), SchedulingError> {
        if !(time >= self.now) {
            return Err(SchedulingError::InPast {
                time,
                now: self.now,
            });
        }
        self.push(time, event);
        Ok(())
    }

    fn push(&mut self, time: SimTime, event: E) {
        if time.is_infinite() {
            self.dropped += 1;
            return;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.pending.push(Scheduled { time, seq, event });
    }

    /// Pop the earliest event if it is due no later than `horizon`
    ///
    /// Advances the clock to the event's time. Events past the horizon stay
    /// queued and are never returned by this call.
    pub fn pop_until(&mut self, horizon: SimTime) -> Option<E> {
        if self.pending.peek()?.time > horizon {
            return None;
        }
        let next = self.pending.pop()?;
        self.now = next.time;
        Some(next.event)
    }

    /// Time of the next pending event
    pub fn peek_time(&self) -> Option<SimTime> {
        self.pending.peek().map(|s| s.time)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Number of events discarded because they would never fire
    pub fn dropped(&self) -> usize {
        self.dropped
    }
}

impl<E> Default for EventQueue<E> {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Driver
// ============================================================================

/// A model driven by an `EventQueue`
pub trait Simulation {
    type Event;

    fn queue_mut(&mut self) -> &mut EventQueue<Self::Event>;

    /// Apply one event; anything it schedules runs on a later iteration
    fn process(&mut self, event: Self::Event) -> Result<(), SimError>;
}

/// Process events until the queue is empty or the next one is after `until`
///
/// Returns the number of processed events. Stops at the first error.
pub fn run<S: Simulation>(sim: &mut S, until: SimTime) -> Result<usize, SimError> {
    let mut processed = 0;
    while let Some(event) = sim.queue_mut().pop_until(until) {
        sim.process(event)?;
        processed += 1;
    }
    debug!(
        "run stopped at t={} after {} events ({} pending)",
        sim.queue_mut().now(),
        processed,
        sim.queue_mut().len()
    );
    Ok(processed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pops_in_time_order() {
        let mut q = EventQueue::new();
        q.schedule(5.0, "c").unwrap();
        q.schedule(1.0, "a").unwrap();
        q.schedule(3.0, "b").unwrap();

        assert_eq!(q.pop_until(f64::MAX), Some("a"));
        assert_eq!(q.now(), 1.0);
        assert_eq!(q.pop_until(f64::MAX), Some("b"));
        assert_eq!(q.pop_until(f64::MAX), Some("c"));
        assert_eq!(q.now(), 5.0);
        assert_eq!(q.pop_until(f64::MAX), None);
    }

    #[test]
    fn test_equal_times_are_fifo() {
        let mut q = EventQueue::new();
        for i in 0..100 {
            q.schedule(2.0, i).unwrap();
        }
        q.schedule(1.0, -1).unwrap();

        assert_eq!(q.pop_until(10.0), Some(-1));
        for i in 0..100 {
            assert_eq!(q.pop_until(10.0), Some(i));
        }
    }

    #[test]
    fn test_delay_is_relative_to_now() {
        let mut q = EventQueue::new();
        q.schedule(10.0, 1).unwrap();
        q.pop_until(100.0);
        q.schedule(0.0, 2).unwrap();
        q.schedule(5.0, 3).unwrap();

        assert_eq!(q.peek_time(), Some(10.0));
        q.pop_until(100.0);
        assert_eq!(q.pop_until(100.0), Some(3));
        assert_eq!(q.now(), 15.0);
    }

    #[test]
    fn test_negative_delay_is_an_error() {
        let mut q: EventQueue<()> = EventQueue::new();
        assert_eq!(
            q.schedule(-1.0, ()),
            Err(SchedulingError::NegativeDelay {
                delay: -1.0,
                now: 0.0
            })
        );
        assert!(q.schedule(f64::NAN, ()).is_err());
        assert!(q.is_empty());
    }

    #[test]
    fn test_schedule_at_in_past_is_an_error() {
        let mut q = EventQueue::new();
        q.schedule(4.0, 0).unwrap();
        q.pop_until(10.0);
        assert!(matches!(
            q.schedule_at(3.0, 1),
            Err(SchedulingError::InPast { .. })
        ));
        assert!(q.schedule_at(4.0, 2).is_ok());
    }

    #[test]
    fn test_horizon_keeps_later_events() {
        let mut q = EventQueue::new();
        q.schedule(1.0, "early").unwrap();
        q.schedule(50.0, "late").unwrap();

        assert_eq!(q.pop_until(10.0), Some("early"));
        assert_eq!(q.pop_until(10.0), None);
        assert_eq!(q.now(), 1.0);
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn test_infinite_time_is_dropped() {
        let mut q = EventQueue::new();
        q.schedule(f64::INFINITY, ()).unwrap();
        assert!(q.is_empty());
        assert_eq!(q.dropped(), 1);
    }

    /// Counts down, scheduling its successor from inside `process`
    struct Countdown {
        queue: EventQueue<u32>,
        seen: Vec<(SimTime, u32)>,
    }

    impl Simulation for Countdown {
        type Event = u32;

        fn queue_mut(&mut self) -> &mut EventQueue<u32> {
            &mut self.queue
        }

        fn process(&mut self, event: u32) -> Result<(), SimError> {
            self.seen.push((self.queue.now(), event));
            if event > 0 {
                // same-time successor must not run re-entrantly
                self.queue.schedule(0.0, event - 1).map_err(|source| {
                    SimError::Scheduling {
                        time: self.queue.now(),
                        node: String::new(),
                        event: "countdown",
                        source,
                    }
                })?;
            }
            Ok(())
        }
    }

    #[test]
    fn test_run_processes_handler_scheduled_events() {
        let mut sim = Countdown {
            queue: EventQueue::new(),
            seen: Vec::new(),
        };
        sim.queue.schedule(2.0, 3).unwrap();
        sim.queue.schedule(2.0, 10).unwrap();

        let processed = run(&mut sim, 100.0).unwrap();
        assert_eq!(processed, 15);
        // FIFO at t=2: 3 and 10 first, then their children interleave in order
        assert_eq!(sim.seen[0], (2.0, 3));
        assert_eq!(sim.seen[1], (2.0, 10));
        assert_eq!(sim.seen[2], (2.0, 2));
        assert_eq!(sim.seen[3], (2.0, 9));
        assert!(sim.seen.windows(2).all(|w| w[0].0 <= w[1].0));
    }
}
