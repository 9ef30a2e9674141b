//! Remote Client Wrapper
//!
//! `RemoteClient` owns the target (one fixed endpoint, or a shuffled list of
//! candidates), creates the underlying client lazily, and reuses it until a
//! connection failure forces it to be recreated. Calls failing at the
//! connection level are retried up to the configured budget; a dynamic target
//! moves on to the next candidate before each retry.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::endpoint::{Endpoint, EndpointPool};
use crate::error::{RemoteError, Result};
use crate::metrics;

/// Default delay before the first retry
const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_secs(1);
/// Upper bound for the delay between retries
const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(5);
/// Backoff multiplier (exponential factor)
const BACKOFF_MULTIPLIER: u32 = 2;

/// Creates an underlying client bound to one endpoint.
///
/// Implemented by the transport layer. Creating a client may itself fail with
/// `RemoteError::Connection`, which consumes a retry attempt like a failed
/// call does.
#[async_trait]
pub trait Connector<T>: Send + Sync {
    async fn connect(&self, endpoint: &Endpoint) -> Result<T>;
}

/// `Connector` backed by a plain function or closure.
pub struct FnConnector<F>(F);

impl<F> FnConnector<F> {
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<T, F> Connector<T> for FnConnector<F>
where
    T: Send + 'static,
    F: Fn(&Endpoint) -> Result<T> + Send + Sync,
{
    async fn connect(&self, endpoint: &Endpoint) -> Result<T> {
        (self.0)(endpoint)
    }
}

/// Where the wrapper sends its calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// One explicitly configured endpoint, retried as-is.
    Static(Endpoint),
    /// Candidates in the order chosen at construction.
    Dynamic(Vec<Endpoint>),
}

impl Target {
    fn endpoint_at(&self, cursor: usize) -> &Endpoint {
        match self {
            Target::Static(endpoint) => endpoint,
            Target::Dynamic(candidates) => &candidates[cursor % candidates.len()],
        }
    }
}

/// Retry budget and backoff between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; total attempts are `retries + 1`.
    pub retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(retries: u32) -> Self {
        Self {
            retries,
            ..Self::default()
        }
    }

    pub fn with_backoff(mut self, initial: Duration) -> Self {
        self.initial_backoff = initial;
        self
    }

    /// Policy that retries immediately, without sleeping.
    pub fn immediate(retries: u32) -> Self {
        Self::new(retries).with_backoff(Duration::ZERO)
    }

    pub fn max_attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 0,
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
        }
    }
}

/// The lazily-created client and the candidate cursor
struct Slot<T> {
    client: Option<T>,
    cursor: usize,
}

/// Failover and retry wrapper around an underlying remote client.
pub struct RemoteClient<T> {
    connector: Arc<dyn Connector<T>>,
    target: Target,
    policy: RetryPolicy,
    slot: Mutex<Slot<T>>,
}

impl<T> fmt::Debug for RemoteClient<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteClient")
            .field("target", &self.target)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl<T: Clone + Send> RemoteClient<T> {
    /// Wrapper bound to one fixed endpoint; the pool is never consulted.
    pub fn fixed(connector: Arc<dyn Connector<T>>, endpoint: Endpoint, policy: RetryPolicy) -> Self {
        Self::with_target(connector, Target::Static(endpoint), policy)
    }

    /// Wrapper over the pool, with candidates shuffled once for this instance.
    pub fn from_pool(
        connector: Arc<dyn Connector<T>>,
        pool: &EndpointPool,
        policy: RetryPolicy,
    ) -> Result<Self> {
        Self::with_order(connector, pool.shuffled(), policy)
    }

    /// Wrapper over candidates tried in exactly the given order.
    pub fn with_order(
        connector: Arc<dyn Connector<T>>,
        candidates: Vec<Endpoint>,
        policy: RetryPolicy,
    ) -> Result<Self> {
        if candidates.is_empty() {
            return Err(RemoteError::Configuration(
                "endpoint pool is empty".to_string(),
            ));
        }
        Ok(Self::with_target(connector, Target::Dynamic(candidates), policy))
    }

    fn with_target(connector: Arc<dyn Connector<T>>, target: Target, policy: RetryPolicy) -> Self {
        Self {
            connector,
            target,
            policy,
            slot: Mutex::new(Slot {
                client: None,
                cursor: 0,
            }),
        }
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Endpoint the next attempt will use.
    pub async fn current_endpoint(&self) -> Endpoint {
        let slot = self.slot.lock().await;
        self.target.endpoint_at(slot.cursor).clone()
    }

    /// Run `op` against the underlying client, retrying connection failures.
    ///
    /// `op` receives a handle to the client and may be invoked once per
    /// attempt. Failures other than `RemoteError::Connection` are returned
    /// immediately. Once `retries + 1` attempts have failed to connect, the
    /// last failure is surfaced as `RemoteError::ConnectionFailed`.
    pub async fn call<R, F, Fut>(&self, operation: &str, mut op: F) -> Result<R>
    where
        F: FnMut(T) -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        let max_attempts = self.policy.max_attempts();
        let mut backoff = self.policy.initial_backoff;
        let mut last_failure: Option<(Endpoint, RemoteError)> = None;

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                metrics::record_retry(operation);
                if !backoff.is_zero() {
                    tokio::time::sleep(backoff).await;
                }
                backoff = (backoff * BACKOFF_MULTIPLIER).min(self.policy.max_backoff);
            }

            let (cursor, endpoint, client) = self.acquire().await;
            let result = match client {
                Ok(client) => {
                    debug!(operation, endpoint = %endpoint, attempt, "Calling remote service");
                    op(client).await
                }
                Err(e) => Err(e),
            };

            match result {
                Ok(value) => {
                    metrics::record_call(operation, "success");
                    return Ok(value);
                }
                Err(e) if e.is_connection_failure() => {
                    warn!(
                        operation,
                        endpoint = %endpoint,
                        attempt,
                        max_attempts,
                        error = %e,
                        "Connection failure talking to remote service"
                    );
                    self.invalidate(cursor).await;
                    last_failure = Some((endpoint, e));
                }
                Err(e) => {
                    metrics::record_call(operation, "error");
                    return Err(e);
                }
            }
        }

        metrics::record_call(operation, "connection_failed");
        let (endpoint, reason) = match last_failure {
            Some((endpoint, RemoteError::Connection(reason))) => (endpoint.to_string(), reason),
            Some((endpoint, other)) => (endpoint.to_string(), other.to_string()),
            None => (String::new(), "no attempt was made".to_string()),
        };
        warn!(operation, endpoint = %endpoint, attempts = max_attempts, "Giving up on remote service");

        Err(RemoteError::ConnectionFailed {
            endpoint,
            attempts: max_attempts,
            reason,
        })
    }

    /// Current cursor, endpoint and client, creating the client if there is none.
    async fn acquire(&self) -> (usize, Endpoint, Result<T>) {
        let mut slot = self.slot.lock().await;
        let cursor = slot.cursor;
        let endpoint = self.target.endpoint_at(cursor).clone();

        if let Some(client) = &slot.client {
            return (cursor, endpoint, Ok(client.clone()));
        }

        debug!(endpoint = %endpoint, "Creating remote client");
        let result = self.connector.connect(&endpoint).await;
        metrics::record_connect(&endpoint.to_string(), result.is_ok());
        if let Ok(client) = &result {
            slot.client = Some(client.clone());
        }
        (cursor, endpoint, result)
    }

    /// Drop the client after a connection failure on `cursor` and pick the
    /// next candidate.
    ///
    /// A no-op when another caller already moved past `cursor`, so several
    /// failures on the same endpoint advance the cursor only once.
    async fn invalidate(&self, cursor: usize) {
        let mut slot = self.slot.lock().await;
        if slot.cursor != cursor {
            return;
        }
        slot.client = None;
        if let Target::Dynamic(candidates) = &self.target {
            slot.cursor = (cursor + 1) % candidates.len();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Client handle that records which endpoint it was created for
    #[derive(Clone)]
    struct Probe {
        endpoint: Endpoint,
    }

    fn counting_connector(created: Arc<AtomicU32>) -> Arc<dyn Connector<Probe>> {
        Arc::new(FnConnector::new(move |endpoint: &Endpoint| {
            created.fetch_add(1, Ordering::SeqCst);
            Ok(Probe {
                endpoint: endpoint.clone(),
            })
        }))
    }

    fn candidates() -> Vec<Endpoint> {
        vec![
            Endpoint::new("host1", 9292),
            Endpoint::new("host2", 9293),
            Endpoint::new("host3", 9294),
        ]
    }

    #[test]
    fn test_retry_policy_attempts() {
        assert_eq!(RetryPolicy::new(0).max_attempts(), 1);
        assert_eq!(RetryPolicy::new(3).max_attempts(), 4);
        assert_eq!(RetryPolicy::new(u32::MAX).max_attempts(), u32::MAX);
        assert_eq!(RetryPolicy::default().initial_backoff, Duration::from_secs(1));
    }

    #[test]
    fn test_empty_pool_rejected() {
        let created = Arc::new(AtomicU32::new(0));
        let result = RemoteClient::with_order(
            counting_connector(created),
            Vec::new(),
            RetryPolicy::immediate(1),
        );
        assert!(matches!(result, Err(RemoteError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_client_is_reused_across_calls() {
        let created = Arc::new(AtomicU32::new(0));
        let client = RemoteClient::fixed(
            counting_connector(created.clone()),
            Endpoint::new("host4", 9295),
            RetryPolicy::immediate(0),
        );

        for _ in 0..3 {
            let host = client
                .call("get_image", |probe| async move { Ok(probe.endpoint.host) })
                .await
                .unwrap();
            assert_eq!(host, "host4");
        }
        assert_eq!(created.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_connection_failure_recreates_client() {
        let created = Arc::new(AtomicU32::new(0));
        let calls = Arc::new(AtomicU32::new(0));
        let client = RemoteClient::fixed(
            counting_connector(created.clone()),
            Endpoint::new("host4", 9295),
            RetryPolicy::immediate(1),
        );

        let result = client
            .call("get_image", |_probe| {
                let calls = calls.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(RemoteError::Connection("reset by peer".into()))
                    } else {
                        Ok(())
                    }
                }
            })
            .await;

        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(created.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_non_connection_failure_not_retried() {
        let created = Arc::new(AtomicU32::new(0));
        let calls = Arc::new(AtomicU32::new(0));
        let client = RemoteClient::with_order(
            counting_connector(created.clone()),
            candidates(),
            RetryPolicy::immediate(5),
        )
        .unwrap();

        let result: Result<()> = client
            .call("get_image", |_probe| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(RemoteError::NotAuthorized("forbidden".into()))
                }
            })
            .await;

        assert_eq!(result, Err(RemoteError::NotAuthorized("forbidden".into())));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        // The client survives a non-connection failure
        assert_eq!(client.current_endpoint().await, Endpoint::new("host1", 9292));
    }

    #[tokio::test]
    async fn test_connect_failure_consumes_attempt() {
        let connects = Arc::new(AtomicU32::new(0));
        let connects_clone = connects.clone();
        let connector: Arc<dyn Connector<Probe>> =
            Arc::new(FnConnector::new(move |endpoint: &Endpoint| {
                connects_clone.fetch_add(1, Ordering::SeqCst);
                if endpoint.host == "host1" {
                    Err(RemoteError::Connection("connection refused".into()))
                } else {
                    Ok(Probe {
                        endpoint: endpoint.clone(),
                    })
                }
            }));

        let client =
            RemoteClient::with_order(connector, candidates(), RetryPolicy::immediate(1)).unwrap();
        let host = client
            .call("get_image", |probe| async move { Ok(probe.endpoint.host) })
            .await
            .unwrap();

        assert_eq!(host, "host2");
        assert_eq!(connects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_dynamic_cursor_wraps_around() {
        let created = Arc::new(AtomicU32::new(0));
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let client = RemoteClient::with_order(
            counting_connector(created),
            candidates(),
            RetryPolicy::immediate(4),
        )
        .unwrap();

        let result: Result<()> = client
            .call("get_image", |probe| {
                let seen = seen.clone();
                async move {
                    seen.lock().unwrap().push(probe.endpoint.host);
                    Err(RemoteError::Connection("down".into()))
                }
            })
            .await;

        assert!(matches!(
            result,
            Err(RemoteError::ConnectionFailed { attempts: 5, .. })
        ));
        assert_eq!(
            *seen.lock().unwrap(),
            vec!["host1", "host2", "host3", "host1", "host2"]
        );
    }

    #[tokio::test]
    async fn test_concurrent_failures_advance_cursor_once() {
        let created = Arc::new(AtomicU32::new(0));
        let client = RemoteClient::with_order(
            counting_connector(created),
            candidates(),
            RetryPolicy::immediate(0),
        )
        .unwrap();
        // Both calls hold host1 before either reports the failure
        let barrier = Arc::new(tokio::sync::Barrier::new(2));

        let failing_call = || {
            let barrier = barrier.clone();
            client.call("get_image", move |_probe| {
                let barrier = barrier.clone();
                async move {
                    barrier.wait().await;
                    Err::<(), _>(RemoteError::Connection("down".into()))
                }
            })
        };
        let (first, second) = tokio::join!(failing_call(), failing_call());

        assert!(matches!(first, Err(RemoteError::ConnectionFailed { .. })));
        assert!(matches!(second, Err(RemoteError::ConnectionFailed { .. })));
        assert_eq!(client.current_endpoint().await, Endpoint::new("host2", 9293));
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_between_retries() {
        let created = Arc::new(AtomicU32::new(0));
        let client = RemoteClient::fixed(
            counting_connector(created),
            Endpoint::new("host4", 9295),
            RetryPolicy::new(3).with_backoff(Duration::from_secs(2)),
        );

        let start = tokio::time::Instant::now();
        let result: Result<()> = client
            .call("get_image", |_probe| async {
                Err(RemoteError::Connection("down".into()))
            })
            .await;

        assert!(result.is_err());
        // 2s + 4s + 5s (capped)
        assert_eq!(start.elapsed(), Duration::from_secs(11));
    }
}
