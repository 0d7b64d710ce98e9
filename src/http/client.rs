//! Reqwest-backed transport and the per-batch client factory.

use crate::config::ClientTuning;
use crate::error::ScanError;
use crate::http::executor::{Transport, TransportError};
use crate::http::request::ProbeRequest;
use crate::http::response::ProbeResponse;
use async_trait::async_trait;
use reqwest::{header, redirect::Policy, Client, Method};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub struct ReqwestTransport {
    client: Client,
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(
        &self,
        req: &ProbeRequest,
        timeout: Option<Duration>,
    ) -> Result<ProbeResponse, TransportError> {
        let method = Method::from_bytes(req.method.as_bytes())
            .map_err(|_| TransportError(format!("invalid method {}", req.method)))?;
        let start = Instant::now();

        let mut request = self.client.request(method, &req.url);
        for (key, value) in &req.headers {
            if let (Ok(name), Ok(val)) = (
                header::HeaderName::from_bytes(key.as_bytes()),
                header::HeaderValue::from_str(value),
            ) {
                request = request.header(name, val);
            }
        }
        if let Some(body) = &req.body {
            request = request.body(body.clone());
        }
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        let response = request
            .send()
            .await
            .map_err(|e| TransportError(e.to_string()))?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("").to_string()))
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError(e.to_string()))?
            .to_vec();

        Ok(ProbeResponse {
            status,
            headers,
            body,
            elapsed: start.elapsed(),
        })
    }
}

/// Builds transports bound to one proxy (or none). The scheduler creates a
/// fresh client per proxy batch when rotation is on.
pub trait ClientFactory: Send + Sync {
    fn make(&self, proxy: Option<&str>) -> Result<Arc<dyn Transport>, ScanError>;
}

pub struct ReqwestFactory {
    tuning: ClientTuning,
    concurrency: usize,
}

impl ReqwestFactory {
    pub fn new(tuning: ClientTuning, concurrency: usize) -> Self {
        Self {
            tuning,
            concurrency,
        }
    }
}

impl ClientFactory for ReqwestFactory {
    fn make(&self, proxy: Option<&str>) -> Result<Arc<dyn Transport>, ScanError> {
        let mut builder = Client::builder()
            .connect_timeout(Duration::from_secs(self.tuning.connect_timeout_secs))
            .timeout(Duration::from_secs(self.tuning.read_timeout_secs))
            .pool_idle_timeout(Duration::from_secs(self.tuning.pool_timeout_secs))
            .pool_max_idle_per_host(self.tuning.keepalive_connections(self.concurrency))
            .redirect(Policy::none())
            .danger_accept_invalid_certs(true);
        if let Some(proxy) = proxy {
            let proxy = reqwest::Proxy::all(proxy)
                .map_err(|e| ScanError::Config(format!("invalid proxy {proxy}: {e}")))?;
            builder = builder.proxy(proxy);
        }
        let client = builder
            .build()
            .map_err(|e| ScanError::RunFatal(format!("cannot build http client: {e}")))?;
        Ok(Arc::new(ReqwestTransport { client }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_rejects_a_malformed_proxy() {
        let factory = ReqwestFactory::new(ClientTuning::default(), 4);
        assert!(factory.make(Some("not a proxy")).is_err());
        assert!(factory.make(Some("http://127.0.0.1:8080")).is_ok());
        assert!(factory.make(None).is_ok());
    }
}
