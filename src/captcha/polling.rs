//! Reusable bounded polling.
//!
//! Every wait in the system that amounts to "probe, sleep, repeat, give up"
//! goes through [`poll_until`] so budget accounting and the tri-state result
//! are in one place instead of ad-hoc loops.

use std::future::Future;
use std::time::Duration;

/// Result of a bounded polling loop.
#[derive(Debug)]
pub enum PollOutcome<T> {
    /// The probe produced a value within the budget.
    Resolved(T),
    /// The budget ran out before the probe produced a value.
    TimedOut,
    /// The probe itself failed; polling stops immediately.
    Errored(anyhow::Error),
}

impl<T> PollOutcome<T> {
    pub fn is_resolved(&self) -> bool {
        matches!(self, PollOutcome::Resolved(_))
    }

    pub fn resolved(self) -> Option<T> {
        match self {
            PollOutcome::Resolved(v) => Some(v),
            _ => None,
        }
    }
}

/// Probe up to `budget` times, sleeping `interval` between probes.
///
/// The probe receives the zero-based iteration index so callers can emit
/// periodic progress (e.g. every 30th probe). The first probe runs
/// immediately; the sleep happens between probes, so a budget of `n` takes at
/// most `(n - 1) × interval` of wall-clock wait.
pub async fn poll_until<T, F, Fut>(interval: Duration, budget: u32, mut probe: F) -> PollOutcome<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = anyhow::Result<Option<T>>>,
{
    for iteration in 0..budget {
        match probe(iteration).await {
            Ok(Some(value)) => return PollOutcome::Resolved(value),
            Ok(None) => {}
            Err(e) => return PollOutcome::Errored(e),
        }
        if iteration + 1 < budget {
            tokio::time::sleep(interval).await;
        }
    }
    PollOutcome::TimedOut
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn resolves_when_the_probe_produces_a_value() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_probe = Arc::clone(&calls);

        let outcome = poll_until(Duration::from_secs(1), 300, move |i| {
            let calls = Arc::clone(&calls_probe);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(if i == 10 { Some("token") } else { None })
            }
        })
        .await;

        assert!(matches!(outcome, PollOutcome::Resolved("token")));
        // Probes 0..=10 ran, nothing after the resolution.
        assert_eq!(calls.load(Ordering::SeqCst), 11);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_the_budget_and_times_out() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_probe = Arc::clone(&calls);

        let outcome: PollOutcome<()> = poll_until(Duration::from_secs(1), 5, move |_| {
            let calls = Arc::clone(&calls_probe);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(None)
            }
        })
        .await;

        assert!(matches!(outcome, PollOutcome::TimedOut));
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn a_probe_error_stops_polling_immediately() {
        let outcome: PollOutcome<()> = poll_until(Duration::from_secs(1), 300, |i| async move {
            if i == 2 {
                Err(anyhow::anyhow!("transport dropped"))
            } else {
                Ok(None)
            }
        })
        .await;

        match outcome {
            PollOutcome::Errored(e) => assert!(e.to_string().contains("transport dropped")),
            other => panic!("expected Errored, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn zero_budget_times_out_without_probing() {
        let outcome: PollOutcome<()> =
            poll_until(Duration::from_secs(1), 0, |_| async move { panic!("probed") }).await;
        assert!(matches!(outcome, PollOutcome::TimedOut));
    }
}
