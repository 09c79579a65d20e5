use anyhow::{anyhow, Context, Result};
use log::debug;
use std::future::Future;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};

const DIAL_TIMEOUT: Duration = Duration::from_secs(3);

/// How many times to try an operation and how long to wait in between.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub delay: Duration,
    pub max_attempts: u32,
    /// After this many attempts the delay switches to the second value.
    pub escalation: Option<(u32, Duration)>,
}

impl RetryPolicy {
    pub const fn fixed(delay: Duration, max_attempts: u32) -> Self {
        Self {
            delay,
            max_attempts,
            escalation: None,
        }
    }

    pub const fn escalating(
        delay: Duration,
        after: u32,
        escalated: Duration,
        max_attempts: u32,
    ) -> Self {
        Self {
            delay,
            max_attempts,
            escalation: Some((after, escalated)),
        }
    }

    /// Opening an SSH channel for one local connection.
    pub const fn tunnel_dial() -> Self {
        Self::fixed(Duration::from_millis(500), 11)
    }

    /// Waiting for a local listener to accept connections end to end.
    pub const fn readiness_probe() -> Self {
        Self::escalating(Duration::from_secs(1), 6, Duration::from_secs(2), 15)
    }

    /// Waiting for a freshly started app to report `STARTED`.
    pub const fn app_start() -> Self {
        Self::fixed(Duration::from_secs(1), 16)
    }

    /// Delay to apply after the given (1-based) failed attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self.escalation {
            Some((after, escalated)) if attempt >= after => escalated,
            _ => self.delay,
        }
    }
}

/// Runs `op` until it succeeds or the policy is exhausted, returning the last error.
pub async fn retry<T, F, Fut>(policy: RetryPolicy, mut op: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op(attempt).await {
            Ok(v) => return Ok(v),
            Err(e) if attempt >= policy.max_attempts => return Err(e),
            Err(e) => {
                debug!("attempt {attempt}/{} failed: {e:#}", policy.max_attempts);
                sleep(policy.delay_for(attempt)).await;
            }
        }
    }
}

/// Polls `op` until it reports `true`. An error aborts polling immediately.
pub async fn poll_until<F, Fut>(policy: RetryPolicy, mut op: F) -> Result<bool>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    for attempt in 1..=policy.max_attempts {
        if op(attempt).await? {
            return Ok(true);
        }
        if attempt < policy.max_attempts {
            sleep(policy.delay_for(attempt)).await;
        }
    }
    Ok(false)
}

/// Dials `addr` until a TCP connection succeeds.
pub async fn wait_for_connection(addr: &str, policy: RetryPolicy) -> Result<()> {
    retry(policy, |attempt| async move {
        debug!("waiting for {addr} attempt {attempt}");
        let stream = timeout(DIAL_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| anyhow!("dial {addr} timed out"))?
            .with_context(|| format!("dial {addr}"))?;
        drop(stream);
        Ok(())
    })
    .await
    .map_err(|e| anyhow!("connection fail after {} attempts: {e:#}", policy.max_attempts))
}
