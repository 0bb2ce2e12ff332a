//! Wait - Poll a provider-side condition until it holds or time runs out
//!
//! ```ignore
//! let running = ctx
//!     .wait()
//!     .at_most(Duration::from_secs(300))
//!     .check_every(Duration::from_secs(10))
//!     .until(ctx.prompter(), || async { instance_is_running(&client, &id).await })
//!     .await;
//! ```
//!
//! Each tick sleeps first and then evaluates the predicate, which must do a
//! fresh read every time. The engine itself never calls anything else, so
//! the state-changing call that started the transition runs exactly once.

use std::convert::Infallible;
use std::future::Future;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::time::Instant;

use crate::config::WaitDefaults;
use crate::error::ReconcileError;
use crate::provider::ProviderError;
use crate::resource::ResourceId;

/// What the operator is asked when a wait times out
#[derive(Debug, Clone)]
pub struct WaitPrompt {
    pub description: String,
    /// Total time waited so far
    pub waited: Duration,
}

/// Supplies the continue-waiting decision (e.g., the CLI asking y/n)
pub trait Prompter: Send + Sync {
    fn continue_waiting(&self, prompt: &WaitPrompt) -> bool;
}

/// Always declines to keep waiting
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPrompt;

impl Prompter for NoPrompt {
    fn continue_waiting(&self, _prompt: &WaitPrompt) -> bool {
        false
    }
}

impl<F> Prompter for F
where
    F: Fn(&WaitPrompt) -> bool + Send + Sync,
{
    fn continue_waiting(&self, prompt: &WaitPrompt) -> bool {
        self(prompt)
    }
}

/// Bounds of one blocking poll loop
#[derive(Debug, Clone, PartialEq)]
pub struct Wait {
    at_most: Duration,
    check_every: Duration,
    prompt: bool,
    backoff: f64,
    max_interval: Duration,
    description: String,
}

impl Wait {
    pub fn at_most(mut self, duration: Duration) -> Self {
        self.at_most = duration;
        self
    }

    pub fn check_every(mut self, interval: Duration) -> Self {
        self.check_every = interval;
        self.max_interval = self.max_interval.max(interval);
        self
    }

    pub fn prompt(mut self, prompt: bool) -> Self {
        self.prompt = prompt;
        self
    }

    /// Grow the poll interval by `multiplier` after each tick, up to `max_interval`
    pub fn backoff(mut self, multiplier: f64, max_interval: Duration) -> Self {
        self.backoff = multiplier.max(1.0);
        self.max_interval = max_interval.max(self.check_every);
        self
    }

    /// Text shown to the operator when prompting
    pub fn described(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn from_defaults(defaults: &WaitDefaults) -> Self {
        Self {
            at_most: defaults.at_most(),
            check_every: defaults.check_every(),
            prompt: defaults.prompt,
            backoff: 1.0,
            max_interval: defaults.check_every(),
            description: "condition".to_string(),
        }
    }

    /// Poll `predicate` until it returns true. Returns false on timeout.
    pub async fn until<F, Fut>(&self, prompter: &dyn Prompter, mut predicate: F) -> bool
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        let result: Result<bool, Infallible> = self
            .try_until(prompter, || {
                let fut = predicate();
                async move { Ok(fut.await) }
            })
            .await;
        match result {
            Ok(satisfied) => satisfied,
            Err(never) => match never {},
        }
    }

    /// Like [`Wait::until`], but an error from the predicate stops the wait
    pub async fn try_until<F, Fut, E>(&self, prompter: &dyn Prompter, mut predicate: F) -> Result<bool, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<bool, E>>,
    {
        let started = Instant::now();
        let mut deadline = started + self.at_most;
        let mut interval = self.check_every;
        let mut ticks = 0u32;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            tokio::time::sleep(interval.min(remaining)).await;
            ticks += 1;

            if predicate().await? {
                debug!("{} satisfied after {} check(s)", self.description, ticks);
                return Ok(true);
            }

            let now = Instant::now();
            if now >= deadline {
                let waited = now - started;
                if self.prompt
                    && prompter.continue_waiting(&WaitPrompt {
                        description: self.description.clone(),
                        waited,
                    })
                {
                    info!("Continuing to wait for {} ({:?} so far)", self.description, waited);
                    deadline = now + self.at_most;
                } else {
                    warn!("Timed out waiting for {} after {:?}", self.description, waited);
                    return Ok(false);
                }
            }

            interval = self.next_interval(interval);
        }
    }

    /// Wait for a fallible predicate and turn a timeout into a fatal error
    /// naming the resource and the unmet target state
    pub async fn require<F, Fut>(
        &self,
        prompter: &dyn Prompter,
        resource: &ResourceId,
        target: &str,
        predicate: F,
    ) -> Result<(), ReconcileError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<bool, ProviderError>>,
    {
        let wait = self.clone().described(format!("{} to reach {}", resource, target));
        match wait.try_until(prompter, predicate).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(ReconcileError::WaitTimeout {
                resource: resource.clone(),
                target: target.to_string(),
            }),
            Err(e) => Err(e.for_resource(resource.clone()).into()),
        }
    }

    fn next_interval(&self, current: Duration) -> Duration {
        if self.backoff <= 1.0 {
            return current;
        }
        current.mul_f64(self.backoff).min(self.max_interval)
    }
}

impl Default for Wait {
    fn default() -> Self {
        Self::from_defaults(&WaitDefaults::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    fn wait(at_most: u64, every: u64) -> Wait {
        Wait::default()
            .at_most(Duration::from_secs(at_most))
            .check_every(Duration::from_secs(every))
    }

    #[tokio::test(start_paused = true)]
    async fn satisfied_predicate_returns_true() {
        let calls = AtomicUsize::new(0);
        let start = Instant::now();

        let ok = wait(60, 5)
            .until(&NoPrompt, || {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move { n >= 3 }
            })
            .await;

        assert!(ok);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn never_true_times_out_at_max_duration() {
        let start = Instant::now();
        let ok = wait(30, 7).until(&NoPrompt, || async { false }).await;

        assert!(!ok);
        // never before the bound, and the last tick is clamped to it
        assert_eq!(start.elapsed(), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn prompt_disabled_never_asks() {
        let asked = AtomicUsize::new(0);
        let prompter = |_: &WaitPrompt| {
            asked.fetch_add(1, Ordering::SeqCst);
            true
        };

        let ok = wait(10, 5).prompt(false).until(&prompter, || async { false }).await;

        assert!(!ok);
        assert_eq!(asked.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn operator_can_extend_the_wait() {
        let asked = Arc::new(Mutex::new(Vec::new()));
        let record = asked.clone();
        let prompter = move |p: &WaitPrompt| {
            let mut seen = record.lock().unwrap();
            seen.push(p.waited);
            seen.len() < 2
        };
        let start = Instant::now();

        let ok = wait(10, 5)
            .prompt(true)
            .described("instance to reach running")
            .until(&prompter, || async { false })
            .await;

        assert!(!ok);
        assert_eq!(
            *asked.lock().unwrap(),
            vec![Duration::from_secs(10), Duration::from_secs(20)]
        );
        assert_eq!(start.elapsed(), Duration::from_secs(20));
    }

    #[tokio::test(start_paused = true)]
    async fn operator_extension_lets_slow_predicate_succeed() {
        let calls = AtomicUsize::new(0);
        let ok = wait(10, 5)
            .prompt(true)
            .until(&|_: &WaitPrompt| true, || {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move { n == 3 }
            })
            .await;
        assert!(ok);
    }

    #[tokio::test(start_paused = true)]
    async fn predicate_error_stops_the_wait() {
        let calls = AtomicUsize::new(0);
        let result: Result<bool, String> = wait(60, 1)
            .try_until(&NoPrompt, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("permission denied".to_string()) }
            })
            .await;

        assert_eq!(result, Err("permission denied".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_grows_interval_up_to_cap() {
        let ticks = Arc::new(Mutex::new(Vec::new()));
        let record = ticks.clone();
        let start = Instant::now();

        let _ = wait(100, 1)
            .backoff(2.0, Duration::from_secs(5))
            .until(&NoPrompt, || {
                record.lock().unwrap().push(start.elapsed().as_secs());
                async { false }
            })
            .await;

        let ticks = ticks.lock().unwrap();
        assert_eq!(&ticks[..6], &[1, 3, 7, 12, 17, 22]);
        assert_eq!(*ticks.last().unwrap(), 100);
    }

    #[tokio::test(start_paused = true)]
    async fn require_reports_resource_and_target_on_timeout() {
        let id = ResourceId::new("ec2.instance", "web");
        let err = wait(20, 10)
            .require(&NoPrompt, &id, "running", || async { Ok(false) })
            .await
            .unwrap_err();

        match err {
            ReconcileError::WaitTimeout { resource, target } => {
                assert_eq!(resource, id);
                assert_eq!(target, "running");
            }
            other => panic!("Expected WaitTimeout, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn require_attaches_resource_to_provider_errors() {
        let id = ResourceId::new("ec2.instance", "web");
        let err = wait(20, 10)
            .require(&NoPrompt, &id, "running", || async {
                Err(ProviderError::new("access denied"))
            })
            .await
            .unwrap_err();

        match err {
            ReconcileError::Provider(e) => assert_eq!(e.resource_id, Some(id)),
            other => panic!("Expected Provider error, got {other:?}"),
        }
    }
}
