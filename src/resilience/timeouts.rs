//! Request deadline enforcement.
//!
//! # Responsibilities
//! - Run downstream work on its own task so a deadline can fire independently
//! - Decide the single terminal outcome when the deadline and completion race
//! - Leave timed-out work running; its late result is discarded
//!
//! # Design Decisions
//! - Uses Tokio's timer (`tokio::time`) as the clock, so tests can pause it
//! - The outcome is a compare-and-set on a [`TerminalCell`]; whoever claims
//!   it first decides the response

use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinError;

/// How a request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Terminal {
    Completed = 1,
    TimedOut = 2,
}

/// Single-assignment cell for a request's terminal outcome.
#[derive(Debug, Default)]
pub struct TerminalCell {
    state: AtomicU8,
}

impl TerminalCell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the outcome. Returns `false` if another writer got there first.
    pub fn try_resolve(&self, outcome: Terminal) -> bool {
        self.state
            .compare_exchange(0, outcome as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn resolved(&self) -> Option<Terminal> {
        match self.state.load(Ordering::Acquire) {
            1 => Some(Terminal::Completed),
            2 => Some(Terminal::TimedOut),
            _ => None,
        }
    }
}

/// Result of racing work against a deadline.
#[derive(Debug)]
pub enum DeadlineOutcome<T> {
    Completed(T),
    TimedOut,
    /// The work panicked before producing a value.
    Failed(JoinError),
}

/// Run `work` on a separate task and wait at most `deadline` for it.
///
/// On timeout the task is detached, not aborted. If the work finishes in the
/// instant the deadline fires, whichever side claims the cell first wins.
pub async fn run_with_deadline<F>(work: F, deadline: Duration) -> DeadlineOutcome<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let cell = Arc::new(TerminalCell::new());
    let task_cell = Arc::clone(&cell);

    let mut handle = tokio::spawn(async move {
        let output = work.await;
        if task_cell.try_resolve(Terminal::Completed) {
            Some(output)
        } else {
            tracing::debug!("Discarding result of work that finished after its deadline");
            None
        }
    });

    tokio::select! {
        joined = &mut handle => settle(joined),
        _ = tokio::time::sleep(deadline) => {
            if cell.try_resolve(Terminal::TimedOut) {
                DeadlineOutcome::TimedOut
            } else {
                // Completion already claimed the cell; its value is on the way.
                settle(handle.await)
            }
        }
    }
}

fn settle<T>(joined: Result<Option<T>, JoinError>) -> DeadlineOutcome<T> {
    match joined {
        Ok(Some(output)) => DeadlineOutcome::Completed(output),
        Ok(None) => DeadlineOutcome::TimedOut,
        Err(e) => DeadlineOutcome::Failed(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use tokio::time::Instant;

    #[test]
    fn first_writer_wins() {
        let cell = TerminalCell::new();
        assert_eq!(cell.resolved(), None);
        assert!(cell.try_resolve(Terminal::TimedOut));
        assert!(!cell.try_resolve(Terminal::Completed));
        assert_eq!(cell.resolved(), Some(Terminal::TimedOut));
    }

    #[tokio::test(start_paused = true)]
    async fn fast_work_completes() {
        let outcome = run_with_deadline(async { 7 }, Duration::from_secs(1)).await;
        assert!(matches!(outcome, DeadlineOutcome::Completed(7)));
    }

    #[tokio::test(start_paused = true)]
    async fn hung_work_times_out_at_deadline() {
        let start = Instant::now();
        let outcome =
            run_with_deadline(std::future::pending::<()>(), Duration::from_millis(250)).await;
        assert!(matches!(outcome, DeadlineOutcome::TimedOut));
        assert_eq!(start.elapsed(), Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_work_keeps_running() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&finished);
        let outcome = run_with_deadline(
            async move {
                tokio::time::sleep(Duration::from_secs(2)).await;
                flag.store(true, Ordering::SeqCst);
            },
            Duration::from_secs(1),
        )
        .await;
        assert!(matches!(outcome, DeadlineOutcome::TimedOut));
        assert!(!finished.load(Ordering::SeqCst));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(finished.load(Ordering::SeqCst), "abandoned work still runs to completion");
    }

    #[tokio::test]
    async fn panics_surface_as_failures() {
        let outcome = run_with_deadline(
            async {
                panic!("boom");
            },
            Duration::from_secs(5),
        )
        .await;
        assert!(matches!(outcome, DeadlineOutcome::Failed(e) if e.is_panic()));
    }
}
