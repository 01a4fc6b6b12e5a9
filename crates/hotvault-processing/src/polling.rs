//! Bounded retry loop with exponential backoff.
//!
//! The same engine drives binding retries, record-id confirmation and proof-set
//! creation polling. Callers supply the action and a classifier that decides whether
//! a successful response is terminal.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use hotvault_core::PollSettings;

/// What a classifier decided about one successful response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStep<T> {
    /// Terminal success.
    Done(T),
    /// Terminal failure reported by the remote side.
    Failed(String),
    /// Not there yet. `progressed` resets the interval to its initial value.
    Continue { progressed: bool },
}

/// Error returned by one attempt.
#[derive(Debug)]
pub enum AttemptError<E> {
    /// Counted towards the consecutive error limit, then retried.
    Retryable(E),
    /// Stops polling immediately.
    Fatal(E),
}

#[derive(Debug)]
pub enum PollOutcome<T, E> {
    Completed { value: T, attempts: u32 },
    Rejected { reason: String, attempts: u32 },
    Aborted { error: E, attempts: u32 },
    /// Every attempt was used without a terminal answer.
    Exhausted { attempts: u32, last_error: Option<E> },
    TooManyErrors { attempts: u32, last_error: E },
}

impl<T, E> PollOutcome<T, E> {
    pub fn attempts(&self) -> u32 {
        match self {
            PollOutcome::Completed { attempts, .. }
            | PollOutcome::Rejected { attempts, .. }
            | PollOutcome::Aborted { attempts, .. }
            | PollOutcome::Exhausted { attempts, .. }
            | PollOutcome::TooManyErrors { attempts, .. } => *attempts,
        }
    }
}

pub struct Poller {
    name: &'static str,
    settings: PollSettings,
}

impl Poller {
    pub fn new(name: &'static str, settings: PollSettings) -> Self {
        Self { name, settings }
    }

    pub fn settings(&self) -> &PollSettings {
        &self.settings
    }

    /// Run `action` until `classify` reports a terminal step or the limits are hit.
    ///
    /// `action` receives the 1-based attempt number. Attempt `max_attempts + 1` is never made.
    pub async fn run<V, T, E, A, Fut, C>(&self, mut action: A, mut classify: C) -> PollOutcome<T, E>
    where
        A: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<V, AttemptError<E>>>,
        C: FnMut(V) -> PollStep<T>,
        E: Display,
    {
        let settings = &self.settings;
        let mut interval = settings.initial_interval;
        let mut consecutive_errors = 0u32;
        let mut last_error: Option<E> = None;

        for attempt in 1..=settings.max_attempts {
            let delay = match action(attempt).await {
                Ok(value) => {
                    consecutive_errors = 0;
                    last_error = None;
                    match classify(value) {
                        PollStep::Done(value) => {
                            tracing::debug!(poll = self.name, attempt, "Poll completed");
                            return PollOutcome::Completed {
                                value,
                                attempts: attempt,
                            };
                        }
                        PollStep::Failed(reason) => {
                            tracing::warn!(poll = self.name, attempt, reason = %reason, "Poll rejected");
                            return PollOutcome::Rejected {
                                reason,
                                attempts: attempt,
                            };
                        }
                        PollStep::Continue { progressed } => {
                            if progressed {
                                interval = settings.initial_interval;
                            }
                            interval
                        }
                    }
                }
                Err(AttemptError::Fatal(error)) => {
                    tracing::warn!(poll = self.name, attempt, error = %error, "Poll aborted");
                    return PollOutcome::Aborted {
                        error,
                        attempts: attempt,
                    };
                }
                Err(AttemptError::Retryable(error)) => {
                    consecutive_errors += 1;
                    if consecutive_errors > settings.max_consecutive_errors {
                        tracing::warn!(
                            poll = self.name,
                            attempt,
                            consecutive_errors,
                            error = %error,
                            "Too many consecutive poll errors"
                        );
                        return PollOutcome::TooManyErrors {
                            attempts: attempt,
                            last_error: error,
                        };
                    }
                    tracing::debug!(poll = self.name, attempt, error = %error, "Poll attempt failed");
                    last_error = Some(error);
                    let delay = interval;
                    interval = next_error_interval(
                        interval,
                        settings.max_interval,
                        consecutive_errors,
                        settings.error_backoff_threshold,
                    );
                    delay
                }
            };

            if attempt < settings.max_attempts {
                tokio::time::sleep(delay).await;
            }
        }

        PollOutcome::Exhausted {
            attempts: settings.max_attempts,
            last_error,
        }
    }
}

/// Interval to use after an error; doubles once the threshold is passed, capped at `max`.
pub(crate) fn next_error_interval(
    current: Duration,
    max: Duration,
    consecutive_errors: u32,
    threshold: u32,
) -> Duration {
    if consecutive_errors > threshold {
        current.saturating_mul(2).min(max)
    } else {
        current
    }
}
