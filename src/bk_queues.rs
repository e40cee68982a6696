//! Supermarket queue model
//!
//! `n` servers with one queue each. Jobs arrive at rate `lambd * n`; each
//! arrival samples `d` distinct queues and joins the shortest. Interarrival
//! and service times are Weibull with the configured shape (shape 1 is the
//! exponential case).

use std::collections::VecDeque;

use log::{debug, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::bk_error::{ConfigError, SimError};
use crate::bk_interface::SimTime;
use crate::bk_scheduler::{self, EventQueue, Simulation};
use crate::bk_variates::weibull_rv;

// ============================================================================
// Configuration
// ============================================================================

/// Order in which a server picks up waiting jobs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Discipline {
    /// First come, first served
    #[default]
    Fifo,
    /// A new arrival preempts the running job, which resumes later
    PreemptiveLifo,
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Arrival rate per queue
    pub lambd: f64,
    /// Service rate
    pub mu: f64,
    /// Number of servers
    pub n: usize,
    /// Queues sampled per arrival
    pub d: usize,
    /// Weibull shape of interarrival and service times
    pub shape: f64,
    pub max_t: SimTime,
    pub discipline: Discipline,
    /// Queue-length snapshots every `monitor_interval`
    pub monitor_interval: Option<SimTime>,
    pub seed: Option<u64>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            lambd: 0.7,
            mu: 1.0,
            n: 10,
            d: 1,
            shape: 1.0,
            max_t: 100_000.0,
            discipline: Discipline::Fifo,
            monitor_interval: None,
            seed: None,
        }
    }
}

impl QueueConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            ("lambd", self.lambd),
            ("mu", self.mu),
            ("n", self.n as f64),
            ("d", self.d as f64),
            ("shape", self.shape),
            ("max_t", self.max_t),
            ("monitor_interval", self.monitor_interval.unwrap_or(1.0)),
        ];
        for (field, value) in checks {
            if !(value > 0.0) {
                return Err(ConfigError::NonPositive {
                    context: "queues".into(),
                    field,
                    value,
                });
            }
        }
        if self.d > self.n {
            return Err(ConfigError::TooManyChoices {
                context: "queues".into(),
                d: self.d,
                n: self.n,
            });
        }
        Ok(())
    }

    /// Arrivals outpace service
    pub fn is_unstable(&self) -> bool {
        self.lambd >= self.mu
    }

    /// CSV row: lambd,mu,shape,n,d,max_t,W
    pub fn csv_row(&self, w: f64) -> String {
        format!(
            "{},{},{},{},{},{},{}",
            self.lambd, self.mu, self.shape, self.n, self.d, self.max_t, w
        )
    }
}

// ============================================================================
// Events and state
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum QueueEvent {
    Arrival { job: u64 },
    /// `token` identifies the run that scheduled it; preempted runs go stale
    Completion { queue: usize, token: u64 },
    Monitor { interval: SimTime },
}

#[derive(Debug, Clone, Copy)]
struct Job {
    id: u64,
    arrived: SimTime,
    /// Service still owed
    remaining: SimTime,
}

#[derive(Debug, Clone, Copy)]
struct Running {
    job: Job,
    started: SimTime,
    token: u64,
}

pub struct QueueSim {
    config: QueueConfig,
    queue: EventQueue<QueueEvent>,
    rng: StdRng,
    seed_used: u64,

    running: Vec<Option<Running>>,
    waiting: Vec<VecDeque<Job>>,
    next_token: u64,

    arrived: usize,
    completed: usize,
    total_time_in_system: SimTime,
    preemptions: usize,
    snapshots: Vec<Vec<usize>>,
}

impl QueueSim {
    pub fn new(config: QueueConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        if config.is_unstable() {
            warn!(
                "The system is unstable: lambda ({}) >= mu ({})",
                config.lambd, config.mu
            );
        }

        let seed_used = config.seed.unwrap_or_else(|| rand::thread_rng().gen());
        let n = config.n;
        let mut sim = Self {
            queue: EventQueue::new(),
            rng: StdRng::seed_from_u64(seed_used),
            seed_used,
            running: vec![None; n],
            waiting: vec![VecDeque::new(); n],
            next_token: 0,
            arrived: 0,
            completed: 0,
            total_time_in_system: 0.0,
            preemptions: 0,
            snapshots: Vec::new(),
            config,
        };

        let first = sim.interarrival();
        // both delays are finite and non-negative once the config is valid
        let _ = sim.queue.schedule(first, QueueEvent::Arrival { job: 0 });
        if let Some(interval) = sim.config.monitor_interval {
            let _ = sim.queue.schedule(0.0, QueueEvent::Monitor { interval });
        }
        Ok(sim)
    }

    fn interarrival(&mut self) -> SimTime {
        let mean = 1.0 / (self.config.lambd * self.config.n as f64);
        weibull_rv(&mut self.rng, self.config.shape, mean)
    }

    fn service_time(&mut self) -> SimTime {
        weibull_rv(&mut self.rng, self.config.shape, 1.0 / self.config.mu)
    }

    /// Waiting jobs plus the running one
    pub fn queue_len(&self, i: usize) -> usize {
        self.running[i].is_some() as usize + self.waiting[i].len()
    }

    fn schedule(&mut self, delay: SimTime, event: QueueEvent) -> Result<(), SimError> {
        let name = match event {
            QueueEvent::Arrival { .. } => "Arrival",
            QueueEvent::Completion { .. } => "Completion",
            QueueEvent::Monitor { .. } => "Monitor",
        };
        self.queue
            .schedule(delay, event)
            .map_err(|source| SimError::Scheduling {
                time: self.queue.now(),
                node: "queues".into(),
                event: name,
                source,
            })
    }

    fn start(&mut self, index: usize, job: Job) -> Result<(), SimError> {
        let token = self.next_token;
        self.next_token += 1;
        self.running[index] = Some(Running {
            job,
            started: self.queue.now(),
            token,
        });
        self.schedule(job.remaining, QueueEvent::Completion { queue: index, token })
    }

    fn on_arrival(&mut self, id: u64) -> Result<(), SimError> {
        let now = self.queue.now();
        self.arrived += 1;

        let choices = rand::seq::index::sample(&mut self.rng, self.config.n, self.config.d);
        // first shortest in sample order
        let Some(index) = choices.iter().min_by_key(|&i| self.queue_len(i)) else {
            return Ok(());
        };

        let job = Job {
            id,
            arrived: now,
            remaining: self.service_time(),
        };
        match (self.config.discipline, self.running[index]) {
            (_, None) => self.start(index, job)?,
            (Discipline::Fifo, Some(_)) => self.waiting[index].push_back(job),
            (Discipline::PreemptiveLifo, Some(current)) => {
                let mut preempted = current.job;
                preempted.remaining = (preempted.remaining - (now - current.started)).max(0.0);
                self.waiting[index].push_front(preempted);
                self.preemptions += 1;
                debug!("job {} preempts job {} on queue {}", id, preempted.id, index);
                self.start(index, job)?;
            }
        }

        let next = self.interarrival();
        self.schedule(next, QueueEvent::Arrival { job: id + 1 })
    }

    fn on_completion(&mut self, index: usize, token: u64) -> Result<(), SimError> {
        let Some(current) = self.running[index].filter(|r| r.token == token) else {
            return Ok(());
        };
        self.completed += 1;
        self.total_time_in_system += self.queue.now() - current.job.arrived;

        self.running[index] = None;
        if let Some(next) = self.waiting[index].pop_front() {
            self.start(index, next)?;
        }
        Ok(())
    }

    fn on_monitor(&mut self, interval: SimTime) -> Result<(), SimError> {
        let lengths = (0..self.config.n).map(|i| self.queue_len(i)).collect();
        self.snapshots.push(lengths);
        self.schedule(interval, QueueEvent::Monitor { interval })
    }

    pub fn run(&mut self) -> Result<QueueResult, SimError> {
        let until = self.config.max_t;
        let events = bk_scheduler::run(self, until)?;
        Ok(QueueResult {
            seed_used: self.seed_used,
            events,
            arrived: self.arrived,
            completed: self.completed,
            preemptions: self.preemptions,
            average_time_in_system: (self.completed > 0)
                .then(|| self.total_time_in_system / self.completed as f64),
            snapshots: self.snapshots.clone(),
        })
    }
}

impl Simulation for QueueSim {
    type Event = QueueEvent;

    fn queue_mut(&mut self) -> &mut EventQueue<QueueEvent> {
        &mut self.queue
    }

    fn process(&mut self, event: QueueEvent) -> Result<(), SimError> {
        match event {
            QueueEvent::Arrival { job } => self.on_arrival(job),
            QueueEvent::Completion { queue, token } => self.on_completion(queue, token),
            QueueEvent::Monitor { interval } => self.on_monitor(interval),
        }
    }
}

// ============================================================================
// Results
// ============================================================================

#[derive(Debug, Clone)]
pub struct QueueResult {
    pub seed_used: u64,
    pub events: usize,
    pub arrived: usize,
    pub completed: usize,
    pub preemptions: usize,
    /// W: mean time from arrival to completion over completed jobs
    pub average_time_in_system: Option<SimTime>,
    /// Queue lengths (running job included) per monitor tick
    pub snapshots: Vec<Vec<usize>>,
}

impl QueueResult {
    /// Fraction of queues with length >= x, averaged over snapshots, for x in 0..=max_len
    pub fn time_averaged_fractions(&self, max_len: usize) -> Vec<f64> {
        (0..=max_len)
            .map(|x| {
                if self.snapshots.is_empty() {
                    return 0.0;
                }
                let total: f64 = self
                    .snapshots
                    .iter()
                    .map(|snap| {
                        let at_least = snap.iter().filter(|&&len| len >= x).count();
                        at_least as f64 / snap.len().max(1) as f64
                    })
                    .sum();
                total / self.snapshots.len() as f64
            })
            .collect()
    }
}

/// Expected fraction of queues with length >= x in the supermarket model
pub fn theoretical_fraction(lambd: f64, d: usize, x: usize) -> f64 {
    if d == 1 {
        lambd.powi(x as i32)
    } else {
        let d = d as f64;
        lambd.powf((d.powi(x as i32) - 1.0) / (d - 1.0))
    }
}

/// M/M/1 mean time in system with unit service rate: 1 / (1 - lambd)
pub fn mm1_time_in_system(lambd: f64) -> Option<f64> {
    (lambd < 1.0).then(|| 1.0 / (1.0 - lambd))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(lambd: f64, d: usize, discipline: Discipline) -> QueueConfig {
        QueueConfig {
            lambd,
            mu: 1.0,
            n: 10,
            d,
            shape: 1.0,
            max_t: 5_000.0,
            discipline,
            monitor_interval: Some(10.0),
            seed: Some(11),
        }
    }

    #[test]
    fn test_validation() {
        let mut c = QueueConfig::default();
        assert!(c.validate().is_ok());
        c.d = 11;
        assert!(matches!(c.validate(), Err(ConfigError::TooManyChoices { .. })));
        c.d = 1;
        c.mu = 0.0;
        assert!(matches!(
            c.validate(),
            Err(ConfigError::NonPositive { field: "mu", .. })
        ));
        c.mu = 1.0;
        c.shape = -1.0;
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_instability_flag() {
        assert!(config(1.2, 1, Discipline::Fifo).is_unstable());
        assert!(!config(0.5, 1, Discipline::Fifo).is_unstable());
        // unstable systems still run
        assert!(QueueSim::new(config(1.2, 1, Discipline::Fifo)).is_ok());
    }

    #[test]
    fn test_theoretical_fraction() {
        assert_eq!(theoretical_fraction(0.5, 1, 0), 1.0);
        assert_eq!(theoretical_fraction(0.5, 1, 3), 0.125);
        // d=2: lambda^(2^x - 1)
        assert_eq!(theoretical_fraction(0.5, 2, 2), 0.125);
        assert_eq!(theoretical_fraction(0.9, 2, 0), 1.0);
    }

    #[test]
    fn test_fifo_time_in_system_is_near_mm1() {
        let result = QueueSim::new(config(0.5, 1, Discipline::Fifo))
            .unwrap()
            .run()
            .unwrap();
        let w = result.average_time_in_system.unwrap();
        let expected = mm1_time_in_system(0.5).unwrap();
        assert!((w - expected).abs() < 0.3, "W = {}", w);
        assert!(result.completed <= result.arrived);
        assert_eq!(result.preemptions, 0);
    }

    #[test]
    fn test_more_choices_shorten_queues() {
        let one = QueueSim::new(config(0.9, 1, Discipline::Fifo))
            .unwrap()
            .run()
            .unwrap();
        let two = QueueSim::new(config(0.9, 2, Discipline::Fifo))
            .unwrap()
            .run()
            .unwrap();
        assert!(two.average_time_in_system < one.average_time_in_system);

        let fractions = two.time_averaged_fractions(5);
        assert_eq!(fractions.len(), 6);
        assert_eq!(fractions[0], 1.0);
        assert!(fractions.windows(2).all(|w| w[0] >= w[1]));
    }

    #[test]
    fn test_preemptive_lifo_preempts_and_completes() {
        let result = QueueSim::new(config(0.8, 1, Discipline::PreemptiveLifo))
            .unwrap()
            .run()
            .unwrap();
        assert!(result.preemptions > 0);
        assert!(result.completed > 0);
        // exponential service: LIFO-PR has the same mean as FIFO
        let w = result.average_time_in_system.unwrap();
        assert!((w - 5.0).abs() < 2.0, "W = {}", w);
    }

    #[test]
    fn test_same_seed_same_result() {
        let a = QueueSim::new(config(0.7, 2, Discipline::PreemptiveLifo))
            .unwrap()
            .run()
            .unwrap();
        let b = QueueSim::new(config(0.7, 2, Discipline::PreemptiveLifo))
            .unwrap()
            .run()
            .unwrap();
        assert_eq!(a.completed, b.completed);
        assert_eq!(a.average_time_in_system, b.average_time_in_system);
        assert_eq!(a.snapshots, b.snapshots);
    }

    #[test]
    fn test_csv_row() {
        let c = QueueConfig {
            max_t: 1000.0,
            ..QueueConfig::default()
        };
        assert_eq!(c.csv_row(2.5), "0.7,1,1,10,1,1000,2.5");
    }
}
