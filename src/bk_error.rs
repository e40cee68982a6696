use crate::bk_interface::SimTime;

/// Problems found while loading or validating a scenario
///
/// Always raised before the first event runs.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read scenario: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed scenario: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("{context}: `{field}` must be positive (got {value})")]
    NonPositive {
        context: String,
        field: &'static str,
        value: f64,
    },

    #[error("{context}: need 1 <= k <= n (got n={n}, k={k})")]
    Redundancy { context: String, n: usize, k: usize },

    #[error("{context}: storage {storage_size} cannot hold own {n} blocks of {block_size}")]
    InsufficientStorage {
        context: String,
        storage_size: u64,
        n: usize,
        block_size: u64,
    },

    #[error("{context}: d={d} exceeds n={n}")]
    TooManyChoices { context: String, d: usize, n: usize },

    #[error("invalid size `{0}`")]
    InvalidSize(String),

    #[error("invalid timespan `{0}`")]
    InvalidTimespan(String),

    #[error("scenario defines no nodes")]
    NoNodes,
}

/// Misuse of the event queue; always a bug in an event handler
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SchedulingError {
    #[error("negative delay {delay} at t={now}")]
    NegativeDelay { delay: SimTime, now: SimTime },

    #[error("time {time} is before now ({now})")]
    InPast { time: SimTime, now: SimTime },

    #[error("node {node} has left the network for good")]
    TerminalNode { node: String },
}

/// Fatal in-run failure, carries where and when it happened
#[derive(Debug, thiserror::Error)]
pub enum SimError {
    #[error("t={time}: {event} for {node}: {source}")]
    Scheduling {
        time: SimTime,
        node: String,
        event: &'static str,
        #[source]
        source: SchedulingError,
    },

    #[error("t={time}: {event} for {node}: invariant violated: {detail}")]
    Invariant {
        time: SimTime,
        node: String,
        event: &'static str,
        detail: String,
    },
}

/// A transfer log line that does not follow the expected layout
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LogParseError {
    #[error("missing `{field}` in `{line}`")]
    MissingField { field: &'static str, line: String },

    #[error("bad number `{value}` for `{field}`")]
    BadNumber { field: &'static str, value: String },
}
