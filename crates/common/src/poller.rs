//! Convergence poller
//!
//! Bounded retry loop that samples observable state until an expectation
//! holds. A sample that does not yet satisfy the expectation, or an action
//! that fails mid-render, is a reason to retry. Only exhausting the attempt
//! budget is a failure.

use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::view::{Row, RowSource};
use crate::{Error, Result};

/// Default attempt budget for one convergence wait
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default pause between attempts
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// A satisfied wait
#[derive(Debug, Clone)]
pub struct Converged<S> {
    /// The sample that satisfied the predicate
    pub sample: S,

    /// Attempts used, including the successful one
    pub attempts: u32,

    pub elapsed: Duration,
}

/// Bounded sampling loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvergencePoller {
    max_attempts: u32,
    interval: Duration,
}

impl Default for ConvergencePoller {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, DEFAULT_POLL_INTERVAL)
    }
}

impl ConvergencePoller {
    /// A budget of zero attempts is raised to one.
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            interval,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Upper bound on time spent sleeping between attempts
    pub fn sleep_budget(&self) -> Duration {
        self.interval * (self.max_attempts - 1)
    }

    /// Run `action` and test its sample with `predicate` until it holds or
    /// the attempt budget is spent. There is no sleep after the last attempt.
    pub fn poll_until<S, E, A, P>(&self, expectation: &str, mut action: A, mut predicate: P) -> Result<Converged<S>>
    where
        S: fmt::Debug,
        E: fmt::Display,
        A: FnMut() -> std::result::Result<S, E>,
        P: FnMut(&S) -> bool,
    {
        let start = Instant::now();
        let mut last_sample: Option<S> = None;
        let mut last_error: Option<String> = None;

        for attempt in 1..=self.max_attempts {
            match action() {
                Ok(sample) if predicate(&sample) => {
                    debug!("{} met on attempt {}/{}", expectation, attempt, self.max_attempts);
                    return Ok(Converged {
                        sample,
                        attempts: attempt,
                        elapsed: start.elapsed(),
                    });
                }
                Ok(sample) => {
                    debug!("{} not met on attempt {}/{}", expectation, attempt, self.max_attempts);
                    last_sample = Some(sample);
                }
                Err(e) => {
                    debug!(
                        "Sampling for {} failed on attempt {}/{}: {}",
                        expectation, attempt, self.max_attempts, e
                    );
                    last_error = Some(e.to_string());
                }
            }

            if attempt < self.max_attempts {
                std::thread::sleep(self.interval);
            }
        }

        let last_sample = match (last_sample, last_error) {
            (Some(sample), _) => format!("{:?}", sample),
            (None, Some(error)) => format!("<no sample: {}>", error),
            (None, None) => "<no sample>".to_string(),
        };

        warn!(
            "{} not met after {} attempt(s) in {:?}",
            expectation,
            self.max_attempts,
            start.elapsed()
        );

        Err(Error::ConvergenceTimeout {
            expectation: expectation.to_string(),
            attempts: self.max_attempts,
            last_sample,
        })
    }

    /// Refresh `view` and check `expectation` against its rows on every attempt.
    pub fn await_rows<V>(&self, view: &mut V, expectation: &RowExpectation) -> Result<Converged<Vec<Row>>>
    where
        V: RowSource + ?Sized,
    {
        self.poll_until(
            &expectation.to_string(),
            || -> Result<Vec<Row>> {
                view.refresh()?;
                view.query_rows()
            },
            |rows| expectation.is_met(rows),
        )
    }
}

/// Field constraints a row must satisfy. Each value must appear within the
/// row's text for that column.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowMatch {
    fields: Vec<(String, String)>,
}

impl RowMatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push((column.into(), value.into()));
        self
    }

    pub fn matches(&self, row: &Row) -> bool {
        self.fields.iter().all(|(column, value)| {
            row.get(column)
                .map(|text| text.contains(value.as_str()))
                .unwrap_or(false)
        })
    }
}

impl fmt::Display for RowMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fields: Vec<String> = self
            .fields
            .iter()
            .map(|(column, value)| format!("{}={:?}", column, value))
            .collect();
        write!(f, "{{{}}}", fields.join(", "))
    }
}

/// Reusable convergence strategies over a row collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowExpectation {
    /// Some row matches (after create or update)
    Present(RowMatch),
    /// No row matches
    Absent(RowMatch),
    /// Fewer rows than a previously recorded count (after delete)
    CountBelow(usize),
    /// More rows than a previously recorded count
    CountAbove(usize),
}

impl RowExpectation {
    pub fn is_met(&self, rows: &[Row]) -> bool {
        match self {
            RowExpectation::Present(m) => rows.iter().any(|row| m.matches(row)),
            RowExpectation::Absent(m) => !rows.iter().any(|row| m.matches(row)),
            RowExpectation::CountBelow(n) => rows.len() < *n,
            RowExpectation::CountAbove(n) => rows.len() > *n,
        }
    }
}

impl fmt::Display for RowExpectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowExpectation::Present(m) => write!(f, "row matching {} present", m),
            RowExpectation::Absent(m) => write!(f, "no row matching {}", m),
            RowExpectation::CountBelow(n) => write!(f, "row count below {}", n),
            RowExpectation::CountAbove(n) => write!(f, "row count above {}", n),
        }
    }
}
