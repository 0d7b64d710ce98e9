//! Transport abstraction and the retrying request executor.
//!
//! The executor never surfaces a transport failure to its caller. A request
//! either yields a response or, after the retry policy is exhausted, yields
//! `None` with the failure recorded in the core log.

use crate::config::RetryTactics;
use crate::http::request::ProbeRequest;
use crate::http::response::ProbeResponse;
use crate::logsink::LogHandle;
use async_trait::async_trait;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct TransportError(pub String);

/// One concrete way of putting a request on the wire. The per-call timeout
/// override exists for timing probes, which need a ceiling above the rule's
/// threshold.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        req: &ProbeRequest,
        timeout: Option<Duration>,
    ) -> Result<ProbeResponse, TransportError>;
}

/// Per-call retry parameters; the shared constants live in `RetryTactics`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total tries. Zero behaves like one.
    pub max_attempts: u32,
    pub backoff: bool,
}

impl RetryPolicy {
    /// Single attempt, no backoff. Used for timing probes and second-request
    /// follow-ups where retrying would skew the measurement.
    pub fn single() -> Self {
        Self {
            max_attempts: 1,
            backoff: false,
        }
    }
}

pub struct RequestExecutor {
    transport: Arc<dyn Transport>,
    tactics: RetryTactics,
    log: LogHandle,
}

impl RequestExecutor {
    pub fn new(transport: Arc<dyn Transport>, tactics: RetryTactics, log: LogHandle) -> Self {
        Self {
            transport,
            tactics,
            log,
        }
    }

    async fn backoff_sleep(&self, attempt: u32) {
        let jitter: f64 = rand::thread_rng().gen_range(0.0..1.0);
        let secs = 2f64.powi(attempt.saturating_sub(1) as i32) * self.tactics.base_delay_seconds
            + jitter;
        tokio::time::sleep(Duration::from_secs_f64(secs)).await;
    }

    /// Sends with retries. A response whose status is in the retryable set
    /// counts as a failed attempt and is never returned.
    pub async fn send(
        &self,
        req: &ProbeRequest,
        policy: RetryPolicy,
        timeout: Option<Duration>,
    ) -> Option<ProbeResponse> {
        let max_attempts = policy.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let failure = match self.transport.send(req, timeout).await {
                Ok(resp) if !self.tactics.retryable_status_codes.contains(&resp.status) => {
                    return Some(resp);
                }
                Ok(resp) => {
                    self.log
                        .error(format!("Retryable status {}", resp.status), &req.url);
                    None
                }
                Err(e) => Some(e),
            };
            if attempt >= max_attempts {
                match failure {
                    Some(e) => self.log.error(format!("ERROR: {e}"), &req.url),
                    None => {
                        if self.tactics.log_retry_exhaustion {
                            self.log.error(
                                format!("Retries exhausted after {attempt} attempts"),
                                &req.url,
                            );
                        }
                    }
                }
                return None;
            }
            if policy.backoff {
                self.backoff_sleep(attempt).await;
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::MockTransport;
    use super::*;
    use crate::logsink::LogSink;

    fn request() -> ProbeRequest {
        ProbeRequest {
            method: "GET".into(),
            url: "http://example.com/probe".into(),
            headers: vec![],
            body: None,
        }
    }

    async fn sink() -> (tempfile::TempDir, LogSink, LogHandle) {
        let dir = tempfile::tempdir().unwrap();
        let sink = LogSink::create(dir.path()).await.unwrap();
        let handle = sink.handle();
        (dir, sink, handle)
    }

    #[tokio::test]
    async fn retryable_status_is_retried_then_dropped() {
        let transport = Arc::new(MockTransport::new());
        transport.push_status(503);
        transport.push_status(503);
        transport.push_status(503);
        let (_dir, sink, log) = sink().await;
        let exec = RequestExecutor::new(transport.clone(), RetryTactics::default(), log);

        let got = exec
            .send(
                &request(),
                RetryPolicy {
                    max_attempts: 3,
                    backoff: false,
                },
                None,
            )
            .await;
        assert!(got.is_none());
        assert_eq!(transport.call_count(), 3);
        drop(exec);
        sink.shutdown().await;
    }

    #[tokio::test]
    async fn success_after_failure_returns_the_response() {
        let transport = Arc::new(MockTransport::new());
        transport.push_error("connection reset");
        transport.push_status(200);
        let (_dir, sink, log) = sink().await;
        let exec = RequestExecutor::new(transport.clone(), RetryTactics::default(), log);

        let got = exec
            .send(
                &request(),
                RetryPolicy {
                    max_attempts: 3,
                    backoff: false,
                },
                None,
            )
            .await;
        assert_eq!(got.unwrap().status, 200);
        assert_eq!(transport.call_count(), 2);
        drop(exec);
        sink.shutdown().await;
    }

    #[tokio::test]
    async fn backoff_spaces_attempts_exponentially_and_stops_at_the_cap() {
        let transport = Arc::new(MockTransport::new());
        transport.push_status(503);
        transport.push_status(503);
        transport.push_status(503);
        let (_dir, sink, log) = sink().await;
        let tactics = RetryTactics {
            retryable_status_codes: vec![503],
            base_delay_seconds: 0.05,
            log_retry_exhaustion: false,
        };
        let exec = RequestExecutor::new(transport.clone(), tactics, log);

        let got = exec
            .send(
                &request(),
                RetryPolicy {
                    max_attempts: 3,
                    backoff: true,
                },
                None,
            )
            .await;
        assert!(got.is_none());
        assert_eq!(transport.call_count(), 3);

        // Each gap is at least 2^(n-1) * base; jitter only adds on top.
        let instants = transport.call_instants();
        assert!(instants[1] - instants[0] >= Duration::from_millis(50));
        assert!(instants[2] - instants[1] >= Duration::from_millis(100));
        drop(exec);
        sink.shutdown().await;
    }

    #[tokio::test]
    async fn zero_attempts_still_sends_once() {
        let transport = Arc::new(MockTransport::new());
        transport.push_error("refused");
        let (_dir, sink, log) = sink().await;
        let exec = RequestExecutor::new(transport.clone(), RetryTactics::default(), log);

        let got = exec
            .send(
                &request(),
                RetryPolicy {
                    max_attempts: 0,
                    backoff: false,
                },
                None,
            )
            .await;
        assert!(got.is_none());
        assert_eq!(transport.call_count(), 1);
        drop(exec);
        sink.shutdown().await;
    }

    #[tokio::test]
    async fn hard_failure_at_exhaustion_lands_in_the_core_log() {
        let transport = Arc::new(MockTransport::new());
        transport.push_error("refused");
        let (_dir, sink, log) = sink().await;
        let core_path = sink.core_log_path().to_path_buf();
        let exec = RequestExecutor::new(transport, RetryTactics::default(), log);

        exec.send(&request(), RetryPolicy::single(), None).await;
        drop(exec);
        sink.shutdown().await;

        let content = std::fs::read_to_string(core_path).unwrap();
        assert!(content.contains("ERROR: refused"));
        assert!(content.contains("For target:http://example.com/probe"));
    }
}
