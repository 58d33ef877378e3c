// SPDX-License-Identifier: Apache-2.0

//! Deadlines and exponential backoff for polling the scanning backend.

use crate::config::BackoffConfig;
use crate::error::Error;
use rand::Rng;
use std::thread;
use std::time::{Duration, Instant};

/// A fixed point in time after which no further work should start.
///
/// One deadline is shared by every stage of a single image's scan, and the
/// time remaining bounds each network request made on its behalf.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
	started: Instant,
	expires_at: Instant,
}

impl Deadline {
	/// A deadline `budget` from now.
	///
	/// A budget too large for the platform's clock saturates at the latest
	/// instant it can represent.
	pub fn after(budget: Duration) -> Deadline {
		let started = Instant::now();
		Deadline {
			started,
			expires_at: far_future(started, budget),
		}
	}

	/// Time left before the deadline, or `None` once it has passed.
	pub fn remaining(&self) -> Option<Duration> {
		self.expires_at
			.checked_duration_since(Instant::now())
			.filter(|left| !left.is_zero())
	}

	/// Time since the deadline was created.
	pub fn elapsed(&self) -> Duration {
		self.started.elapsed()
	}
}

/// `start + budget`, or the furthest representable instant short of it.
fn far_future(start: Instant, budget: Duration) -> Instant {
	if let Some(end) = start.checked_add(budget) {
		return end;
	}

	// Halve the step whenever it would overflow.
	let mut step = budget;
	let mut end = start;
	while !step.is_zero() {
		match end.checked_add(step) {
			Some(next) => end = next,
			None => step /= 2,
		}
	}
	end
}

/// Produces successively longer, randomized waits between attempts.
#[derive(Debug)]
pub struct ExponentialBackoff {
	config: BackoffConfig,
	current: Duration,
}

impl ExponentialBackoff {
	pub fn new(config: BackoffConfig) -> ExponentialBackoff {
		ExponentialBackoff {
			current: config.initial_interval(),
			config,
		}
	}

	/// The next wait, after which the base interval grows by the multiplier.
	pub fn next_interval(&mut self) -> Duration {
		let base = self.current;
		let grown = base.mul_f64(self.config.multiplier);
		self.current = grown.min(self.config.max_interval());
		jitter(base, self.config.randomization_factor)
	}
}

/// Pick a wait uniformly from `interval * [1 - factor, 1 + factor]`.
fn jitter(interval: Duration, factor: f64) -> Duration {
	if factor <= 0.0 {
		return interval;
	}
	let scale = rand::rng().random_range((1.0 - factor)..=(1.0 + factor));
	interval.mul_f64(scale)
}

/// How a single attempt failed.
#[derive(Debug)]
pub enum Attempt {
	/// Worth trying again after a wait; carries a description for logging.
	Retry(String),
	/// Trying again won't help.
	Abort(Error),
}

/// Why a retry loop gave up.
#[derive(Debug, thiserror::Error)]
pub enum RetryError {
	#[error("deadline exceeded after {attempts} attempts in {elapsed:?} (last: {last})")]
	DeadlineExceeded {
		attempts: u32,
		elapsed: Duration,
		last: String,
	},
	#[error("{0}")]
	Aborted(Error),
}

/// Run `op` until it succeeds, aborts, or the next wait would cross `deadline`.
pub fn retry<T, F>(
	deadline: &Deadline,
	backoff: &mut ExponentialBackoff,
	mut op: F,
) -> Result<T, RetryError>
where
	F: FnMut() -> Result<T, Attempt>,
{
	let mut attempts = 0;

	loop {
		attempts += 1;

		let reason = match op() {
			Ok(value) => return Ok(value),
			Err(Attempt::Abort(error)) => return Err(RetryError::Aborted(error)),
			Err(Attempt::Retry(reason)) => reason,
		};

		let wait = backoff.next_interval();
		match deadline.remaining() {
			Some(left) if wait < left => {
				log::debug!(
					"attempt {} not ready, retrying in {:?} [reason: {}]",
					attempts,
					wait,
					reason
				);
				thread::sleep(wait);
			}
			_ => {
				return Err(RetryError::DeadlineExceeded {
					attempts,
					elapsed: deadline.elapsed(),
					last: reason,
				})
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::ks_error;

	fn fixed(initial_ms: u64, multiplier: f64, max_ms: u64) -> BackoffConfig {
		BackoffConfig {
			initial_interval_ms: initial_ms,
			multiplier,
			randomization_factor: 0.0,
			max_interval_ms: max_ms,
		}
	}

	#[test]
	fn backoff_grows_and_caps() {
		let mut backoff = ExponentialBackoff::new(fixed(100, 2.0, 500));
		let waits: Vec<u128> = (0..5).map(|_| backoff.next_interval().as_millis()).collect();
		assert_eq!(waits, vec![100, 200, 400, 500, 500]);
	}

	#[test]
	fn jitter_stays_in_bounds() {
		let base = Duration::from_millis(1000);
		for _ in 0..100 {
			let wait = jitter(base, 0.5);
			assert!(wait >= Duration::from_millis(500));
			assert!(wait <= Duration::from_millis(1500));
		}
	}

	#[test]
	fn retries_until_ready() {
		let deadline = Deadline::after(Duration::from_secs(5));
		let mut backoff = ExponentialBackoff::new(fixed(1, 1.0, 1));
		let mut calls = 0;

		let result = retry(&deadline, &mut backoff, || {
			calls += 1;
			if calls < 3 {
				Err(Attempt::Retry("analyzing".into()))
			} else {
				Ok(calls)
			}
		});

		assert_eq!(result.unwrap(), 3);
	}

	#[test]
	fn abort_stops_immediately() {
		let deadline = Deadline::after(Duration::from_secs(5));
		let mut backoff = ExponentialBackoff::new(fixed(1, 1.0, 1));
		let mut calls = 0;

		let result: Result<(), _> = retry(&deadline, &mut backoff, || {
			calls += 1;
			Err(Attempt::Abort(ks_error!("analysis_failed")))
		});

		assert!(matches!(result, Err(RetryError::Aborted(_))));
		assert_eq!(calls, 1);
	}

	#[test]
	fn gives_up_when_wait_crosses_deadline() {
		let deadline = Deadline::after(Duration::from_millis(30));
		let mut backoff = ExponentialBackoff::new(fixed(20, 1.0, 20));

		let result: Result<(), _> = retry(&deadline, &mut backoff, || {
			Err(Attempt::Retry("not_analyzed".into()))
		});

		match result {
			Err(RetryError::DeadlineExceeded { attempts, last, .. }) => {
				assert!(attempts >= 1);
				assert_eq!(last, "not_analyzed");
			}
			other => panic!("expected deadline exceeded, got {:?}", other),
		}
	}

	#[test]
	fn huge_budget_does_not_overflow() {
		let deadline = Deadline::after(Duration::from_secs(u64::MAX));
		assert!(deadline.remaining().is_some());
		assert!(deadline.elapsed() < Duration::from_secs(1));
	}

	#[test]
	fn expired_deadline_has_nothing_remaining() {
		let deadline = Deadline::after(Duration::ZERO);
		assert!(deadline.remaining().is_none());
	}
}
