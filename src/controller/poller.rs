//! Bounded readiness polling
//!
//! The platform API is eventually consistent: an object that was just
//! created may not be readable yet, and a deleted one may linger. Every
//! wait in the driver goes through [`wait_until`], which observes at most
//! `max_attempts` times with a cooperative sleep before each observation.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::controller::platform::{Platform, ResourceKind};
use crate::error::{Error, Result};

#[cfg(feature = "metrics")]
use crate::controller::metrics;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl PollPolicy {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::new(Duration::from_millis(1000), 10)
    }
}

/// Poll `probe` until it reports true
///
/// A probe error counts as a negative observation.
pub async fn wait_until<F, Fut>(what: &str, policy: PollPolicy, mut probe: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    for attempt in 1..=policy.max_attempts {
        tokio::time::sleep(policy.interval).await;
        match probe().await {
            Ok(true) => {
                debug!(attempt, "{} ready", what);
                return Ok(());
            }
            Ok(false) => {}
            Err(e) => debug!(attempt, error = %e, "{} not ready", what),
        }
    }

    warn!(
        "Timed out waiting for {} after {} attempts",
        what, policy.max_attempts
    );
    Err(Error::Timeout {
        what: what.to_string(),
        attempts: policy.max_attempts,
    })
}

/// Wait until the named object can be read
pub async fn wait_for_presence(
    platform: &dyn Platform,
    namespace: &str,
    kind: ResourceKind,
    name: &str,
    policy: PollPolicy,
) -> Result<()> {
    let what = format!("{} {} to appear", kind, name);
    let result = wait_until(&what, policy, move || async move {
        platform.get(namespace, kind, name).await.map(|_| true)
    })
    .await;
    record_timeout(kind, &result);
    result
}

/// Wait until reading the named object reports NotFound
///
/// Any other read error keeps the poll going.
pub async fn wait_for_absence(
    platform: &dyn Platform,
    namespace: &str,
    kind: ResourceKind,
    name: &str,
    policy: PollPolicy,
) -> Result<()> {
    let what = format!("{} {} to be deleted", kind, name);
    let result = wait_until(&what, policy, move || async move {
        match platform.get(namespace, kind, name).await {
            Ok(_) => Ok(false),
            Err(e) if e.is_not_found() => Ok(true),
            Err(e) => Err(e),
        }
    })
    .await;
    record_timeout(kind, &result);
    result
}

#[cfg(feature = "metrics")]
fn record_timeout(kind: ResourceKind, result: &Result<()>) {
    if matches!(result, Err(Error::Timeout { .. })) {
        metrics::inc_poll_timeout(kind.as_str());
    }
}

#[cfg(not(feature = "metrics"))]
fn record_timeout(_kind: ResourceKind, _result: &Result<()>) {}
