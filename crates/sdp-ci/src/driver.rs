//! The CI green-loop: poll → classify → fix until the PR is green, an
//! escalation fires, or the iteration budget runs out.
//!
//! The loop is single-threaded and cooperative. Its whole state is the pair
//! `(iterations, pending_rounds)`; everything else is re-derived from each
//! poll. Cancellation is honored at every sleep and before every poll.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

use crate::autofix::Fixer;
use crate::checks::{CheckPoller, CheckRun};
use crate::classify::is_auto_fixable;
use crate::error::{CiError, Result};

/// Waits until `rx` carries `true`, without holding the watch guard across
/// an await point (needed for the future to stay `Send`).
async fn wait_for_cancel(
    rx: &mut watch::Receiver<bool>,
) -> std::result::Result<(), watch::error::RecvError> {
    loop {
        if *rx.borrow() {
            return Ok(());
        }
        rx.changed().await?;
    }
}

/// Terminal state of a loop run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopOutcome {
    /// Every check reported SUCCESS.
    Green,
    /// The escalation callback was invoked; a human takes over.
    Escalated,
    /// The iteration cap was reached before going green.
    MaxIter,
}

/// Context handed to the escalation callback.
#[derive(Debug, Clone)]
pub struct Escalation {
    pub pr_number: u64,
    pub reason: String,
    /// The checks that forced escalation (may be empty for poll failures).
    pub checks: Vec<CheckRun>,
}

/// Invoked exactly once, right before the loop terminates `Escalated`.
pub type EscalationCallback = Box<dyn FnMut(&Escalation) + Send>;

/// Invoked when polling itself fails (checkpoint save hook).
pub type PollErrorCallback = Box<dyn FnMut(&CiError) + Send>;

/// Loop tuning.
#[derive(Debug, Clone)]
pub struct CiLoopConfig {
    pub pr_number: u64,
    /// Fix iterations before giving up.
    pub max_iter: u32,
    /// Consecutive pending-only rounds before escalating; 0 disables the cap.
    pub max_pending_retries: u32,
    /// Sleep before each poll; `None` polls immediately.
    pub poll_delay: Option<Duration>,
    /// Sleep after a pending-only round.
    pub retry_delay: Duration,
}

/// Drives one pull request toward green.
pub struct CiLoop {
    config: CiLoopConfig,
    poller: Arc<dyn CheckPoller>,
    fixer: Option<Arc<dyn Fixer>>,
    escalation: EscalationCallback,
    on_poll_error: Option<PollErrorCallback>,
    cancel: Option<watch::Receiver<bool>>,
    iterations: u32,
    pending_rounds: u32,
}

impl CiLoop {
    pub fn new(
        config: CiLoopConfig,
        poller: Arc<dyn CheckPoller>,
        escalation: EscalationCallback,
    ) -> Self {
        Self {
            config,
            poller,
            fixer: None,
            escalation,
            on_poll_error: None,
            cancel: None,
            iterations: 0,
            pending_rounds: 0,
        }
    }

    pub fn with_fixer(mut self, fixer: Arc<dyn Fixer>) -> Self {
        self.fixer = Some(fixer);
        self
    }

    pub fn with_poll_error_callback(mut self, callback: PollErrorCallback) -> Self {
        self.on_poll_error = Some(callback);
        self
    }

    pub fn with_cancel(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Fix iterations consumed so far.
    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    /// Pending-only rounds observed so far.
    pub fn pending_rounds(&self) -> u32 {
        self.pending_rounds
    }

    /// Sleep that aborts with [`CiError::Cancelled`] when the signal flips.
    async fn sleep_cancellable(&mut self, duration: Duration) -> Result<()> {
        let Some(rx) = &mut self.cancel else {
            tokio::time::sleep(duration).await;
            return Ok(());
        };
        if *rx.borrow() {
            return Err(CiError::Cancelled);
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            changed = wait_for_cancel(rx) => match changed {
                Ok(()) => Err(CiError::Cancelled),
                // Sender gone: cancellation can never fire.
                Err(_) => {
                    tokio::time::sleep(duration).await;
                    Ok(())
                }
            },
        }
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.as_ref().is_some_and(|rx| *rx.borrow()) {
            return Err(CiError::Cancelled);
        }
        Ok(())
    }

    fn escalate(&mut self, reason: impl Into<String>, checks: Vec<CheckRun>) -> LoopOutcome {
        let escalation = Escalation {
            pr_number: self.config.pr_number,
            reason: reason.into(),
            checks,
        };
        warn!(pr = escalation.pr_number, "escalating: {}", escalation.reason);
        (self.escalation)(&escalation);
        LoopOutcome::Escalated
    }

    /// Run the loop to a terminal outcome.
    pub async fn run(&mut self) -> Result<LoopOutcome> {
        loop {
            if let Some(delay) = self.config.poll_delay {
                self.sleep_cancellable(delay).await?;
            }
            self.check_cancelled()?;

            let checks = match self.poller.get_checks(self.config.pr_number).await {
                Ok(checks) => checks,
                Err(e) => {
                    warn!("poll failed: {e}");
                    if let Some(callback) = &mut self.on_poll_error {
                        callback(&e);
                    }
                    return Ok(self.escalate(format!("poll failed: {e}"), Vec::new()));
                }
            };

            if checks.iter().all(|c| c.state.is_green()) {
                info!(
                    pr = self.config.pr_number,
                    iterations = self.iterations,
                    "all checks green"
                );
                return Ok(LoopOutcome::Green);
            }

            if checks.iter().any(|c| c.state.is_pending()) {
                self.pending_rounds += 1;
                info!(
                    pending_rounds = self.pending_rounds,
                    "checks still running"
                );
                if self.config.max_pending_retries > 0
                    && self.pending_rounds >= self.config.max_pending_retries
                {
                    return Ok(self.escalate(
                        format!("still pending after {} rounds", self.pending_rounds),
                        checks,
                    ));
                }
                self.sleep_cancellable(self.config.retry_delay).await?;
                continue;
            }

            // Partition failures. Unknown states count as escalation; they
            // are non-green and nothing we know how to fix.
            let mut escalate: Vec<CheckRun> = Vec::new();
            let mut auto_fix: Vec<CheckRun> = Vec::new();
            for check in checks {
                if check.state.is_failing() && is_auto_fixable(&check.name) {
                    if self.fixer.is_some() {
                        auto_fix.push(check);
                    } else {
                        escalate.push(check);
                    }
                } else if !check.state.is_green() {
                    escalate.push(check);
                }
            }

            if !escalate.is_empty() {
                return Ok(self.escalate("non-auto-fixable checks failing", escalate));
            }

            self.iterations += 1;
            if self.iterations >= self.config.max_iter {
                warn!(max_iter = self.config.max_iter, "iteration budget exhausted");
                return Ok(LoopOutcome::MaxIter);
            }

            let fixer = self.fixer.as_ref().expect("auto_fix implies fixer").clone();
            info!(
                iteration = self.iterations,
                checks = auto_fix.len(),
                "running auto-fix"
            );
            if let Err(e) = fixer.fix(&auto_fix).await {
                return Ok(self.escalate(format!("fix failed: {e}"), auto_fix));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autofix::FixReport;
    use crate::checks::CheckState;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    fn check(name: &str, state: CheckState) -> CheckRun {
        CheckRun {
            name: name.to_string(),
            state,
        }
    }

    struct ScriptedPoller {
        responses: Mutex<VecDeque<Result<Vec<CheckRun>>>>,
    }

    impl ScriptedPoller {
        fn new(responses: Vec<Result<Vec<CheckRun>>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
            })
        }
    }

    #[async_trait]
    impl CheckPoller for ScriptedPoller {
        async fn get_checks(&self, _pr: u64) -> Result<Vec<CheckRun>> {
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(vec![check("go-test", CheckState::Success)]))
        }
    }

    struct CountingFixer {
        calls: AtomicU32,
        fail: bool,
    }

    impl CountingFixer {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                fail,
            })
        }
    }

    #[async_trait]
    impl Fixer for CountingFixer {
        async fn fix(&self, _failing: &[CheckRun]) -> Result<FixReport> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(CiError::UnparsableFailureLog);
            }
            Ok(FixReport {
                fix_types: vec!["go-test".to_string()],
                diagnostics_path: "unused.md".into(),
                commit_message: "fix(ci): auto-fix go-test [F001]".to_string(),
            })
        }
    }

    fn config(max_iter: u32, max_pending: u32) -> CiLoopConfig {
        CiLoopConfig {
            pr_number: 7,
            max_iter,
            max_pending_retries: max_pending,
            poll_delay: None,
            retry_delay: Duration::ZERO,
        }
    }

    fn no_escalation() -> (EscalationCallback, Arc<AtomicU32>) {
        let count = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&count);
        (
            Box::new(move |_e: &Escalation| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
            count,
        )
    }

    #[tokio::test]
    async fn test_pending_then_green_counts_rounds_not_iterations() {
        let poller = ScriptedPoller::new(vec![
            Ok(vec![check("go-test", CheckState::Pending)]),
            Ok(vec![check("go-test", CheckState::Pending)]),
            Ok(vec![
                check("go-test", CheckState::Success),
                check("go-build", CheckState::Success),
            ]),
        ]);
        let (escalation, escalations) = no_escalation();
        let mut ci_loop = CiLoop::new(config(5, 0), poller, escalation);
        let outcome = ci_loop.run().await.unwrap();

        assert_eq!(outcome, LoopOutcome::Green);
        assert_eq!(ci_loop.pending_rounds(), 2);
        assert_eq!(ci_loop.iterations(), 0);
        assert_eq!(escalations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_pending_cap_escalates_without_iterating() {
        let poller = ScriptedPoller::new(vec![
            Ok(vec![check("go-test", CheckState::Pending)]),
            Ok(vec![check("go-test", CheckState::InProgress)]),
        ]);
        let (escalation, escalations) = no_escalation();
        let mut ci_loop = CiLoop::new(config(5, 2), poller, escalation);
        let outcome = ci_loop.run().await.unwrap();

        assert_eq!(outcome, LoopOutcome::Escalated);
        assert_eq!(ci_loop.pending_rounds(), 2);
        assert_eq!(ci_loop.iterations(), 0);
        assert_eq!(escalations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_auto_fix_then_green() {
        let poller = ScriptedPoller::new(vec![
            Ok(vec![check("go-test", CheckState::Failure)]),
            Ok(vec![check("go-test", CheckState::Success)]),
        ]);
        let fixer = CountingFixer::new(false);
        let (escalation, escalations) = no_escalation();
        let mut ci_loop =
            CiLoop::new(config(5, 0), poller, escalation).with_fixer(fixer.clone());
        let outcome = ci_loop.run().await.unwrap();

        assert_eq!(outcome, LoopOutcome::Green);
        assert_eq!(fixer.calls.load(Ordering::SeqCst), 1);
        assert_eq!(ci_loop.iterations(), 1);
        assert_eq!(escalations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_nil_fixer_escalates_auto_fixable_failure() {
        let poller = ScriptedPoller::new(vec![Ok(vec![check("go-test", CheckState::Failure)])]);
        let (escalation, escalations) = no_escalation();
        let mut ci_loop = CiLoop::new(config(5, 0), poller, escalation);
        let outcome = ci_loop.run().await.unwrap();

        assert_eq!(outcome, LoopOutcome::Escalated);
        assert_eq!(escalations.load(Ordering::SeqCst), 1);
        assert_eq!(ci_loop.iterations(), 0);
    }

    #[tokio::test]
    async fn test_non_fixable_failure_escalates() {
        let poller = ScriptedPoller::new(vec![Ok(vec![
            check("go-test", CheckState::Failure),
            check("security-scan", CheckState::Failure),
        ])]);
        let fixer = CountingFixer::new(false);
        let (escalation, escalations) = no_escalation();
        let mut ci_loop = CiLoop::new(config(5, 0), poller, escalation).with_fixer(fixer.clone());
        let outcome = ci_loop.run().await.unwrap();

        assert_eq!(outcome, LoopOutcome::Escalated);
        assert_eq!(fixer.calls.load(Ordering::SeqCst), 0);
        assert_eq!(escalations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unknown_state_escalates() {
        let poller = ScriptedPoller::new(vec![Ok(vec![
            check("weird", CheckState::Other("NEUTRAL".to_string())),
            check("go-build", CheckState::Success),
        ])]);
        let (escalation, escalations) = no_escalation();
        let mut ci_loop = CiLoop::new(config(5, 0), poller, escalation);
        assert_eq!(ci_loop.run().await.unwrap(), LoopOutcome::Escalated);
        assert_eq!(escalations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_max_iter_reached() {
        let responses = std::iter::repeat_with(|| {
            Ok(vec![check("go-test", CheckState::Failure)])
        })
        .take(5)
        .collect();
        let poller = ScriptedPoller::new(responses);
        let fixer = CountingFixer::new(false);
        let (escalation, _) = no_escalation();
        let mut ci_loop = CiLoop::new(config(3, 0), poller, escalation).with_fixer(fixer.clone());
        let outcome = ci_loop.run().await.unwrap();

        assert_eq!(outcome, LoopOutcome::MaxIter);
        assert_eq!(ci_loop.iterations(), 3);
        // The budget-exhausting iteration does not run the fixer.
        assert_eq!(fixer.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_fix_error_escalates_after_callback() {
        let poller = ScriptedPoller::new(vec![Ok(vec![check("go-test", CheckState::Failure)])]);
        let fixer = CountingFixer::new(true);
        let (escalation, escalations) = no_escalation();
        let mut ci_loop = CiLoop::new(config(5, 0), poller, escalation).with_fixer(fixer);
        let outcome = ci_loop.run().await.unwrap();

        assert_eq!(outcome, LoopOutcome::Escalated);
        assert_eq!(escalations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_poll_error_invokes_poll_callback_and_escalates() {
        let poller = ScriptedPoller::new(vec![Err(CiError::ChecksCommand("gh died".to_string()))]);
        let poll_errors = Arc::new(AtomicU32::new(0));
        let poll_counter = Arc::clone(&poll_errors);
        let (escalation, _) = no_escalation();
        let mut ci_loop = CiLoop::new(config(5, 0), poller, escalation)
            .with_poll_error_callback(Box::new(move |_e| {
                poll_counter.fetch_add(1, Ordering::SeqCst);
            }));
        let outcome = ci_loop.run().await.unwrap();

        assert_eq!(outcome, LoopOutcome::Escalated);
        assert_eq!(poll_errors.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancellation_aborts_sleep() {
        let responses = std::iter::repeat_with(|| {
            Ok(vec![check("go-test", CheckState::Pending)])
        })
        .take(100)
        .collect();
        let poller = ScriptedPoller::new(responses);
        let (tx, rx) = watch::channel(false);
        let (escalation, _) = no_escalation();
        let mut ci_loop = CiLoop::new(
            CiLoopConfig {
                pr_number: 7,
                max_iter: 5,
                max_pending_retries: 0,
                poll_delay: None,
                retry_delay: Duration::from_secs(60),
            },
            poller,
            escalation,
        )
        .with_cancel(rx);

        let handle = tokio::spawn(async move { ci_loop.run().await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();
        let result = handle.await.unwrap();
        assert!(matches!(result, Err(CiError::Cancelled)));
    }
}
