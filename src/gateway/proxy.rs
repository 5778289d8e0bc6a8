//! Reverse proxy forwarding requests to a selected service instance

use axum::{
    body::Body,
    http::{HeaderMap, Request, StatusCode},
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use reqwest::Client;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

use crate::config::ProxyConfig;
use crate::error::{AppError, Result};
use crate::gateway::load_balancer::{Lease, LoadBalancer};
use crate::metrics::RequestObserver;

/// Headers that describe a single hop and are never forwarded
const HOP_BY_HOP: [&str; 9] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "host",
];

/// Forwards inbound requests for a logical service to one of its instances
pub struct ReverseProxy {
    client: Client,
    balancer: Arc<LoadBalancer>,
    observer: Arc<dyn RequestObserver>,
    timeout: Duration,
    max_body_bytes: usize,
}

impl ReverseProxy {
    pub fn new(
        balancer: Arc<LoadBalancer>,
        observer: Arc<dyn RequestObserver>,
        config: &ProxyConfig,
    ) -> Result<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            balancer,
            observer,
            timeout: config.timeout(),
            max_body_bytes: config.max_body_bytes,
        })
    }

    /// Forward `request` to an instance of `service`.
    ///
    /// `sub_path` is the path below the service prefix and always starts
    /// with `/`. Failures are turned into error responses here, so the
    /// caller always gets a response back.
    pub async fn forward(&self, service: &str, sub_path: &str, request: Request<Body>) -> Response {
        let observed = ObservedRequest::start(self.observer.as_ref(), service);

        let response = match self.try_forward(service, sub_path, request).await {
            Ok(response) => response,
            Err(e) => e.into_response(),
        };

        observed.finish(response.status());
        response
    }

    async fn try_forward(
        &self,
        service: &str,
        sub_path: &str,
        request: Request<Body>,
    ) -> Result<Response> {
        let (parts, body) = request.into_parts();
        let body = Limited::new(body, self.max_body_bytes)
            .collect()
            .await
            .map_err(|e| {
                if e.downcast_ref::<LengthLimitError>().is_some() {
                    AppError::PayloadTooLarge(self.max_body_bytes)
                } else {
                    AppError::RequestBody(e.to_string())
                }
            })?
            .to_bytes();

        let lease = self.balancer.select(service).map_err(|e| {
            info!(service = %service, "No healthy instance available");
            e
        })?;
        let url = target_url(&lease, sub_path, parts.uri.query());

        debug!(
            service = %service,
            instance = %lease.id,
            method = %parts.method,
            target = %url,
            "Forwarding request"
        );

        let upstream = self
            .client
            .request(parts.method, &url)
            .headers(forwardable_headers(&parts.headers))
            .timeout(self.timeout)
            .body(body)
            .send()
            .await
            .map_err(|e| {
                error!(
                    service = %service,
                    instance = %lease.id,
                    target = %url,
                    error = %e,
                    "Proxy request failed"
                );
                if e.is_timeout() {
                    AppError::Timeout {
                        instance_id: lease.id.clone(),
                    }
                } else {
                    AppError::BackendUnreachable {
                        instance_id: lease.id.clone(),
                        reason: e.to_string(),
                    }
                }
            })?;

        let mut response = Response::builder().status(upstream.status());
        if let Some(headers) = response.headers_mut() {
            *headers = forwardable_headers(upstream.headers());
        }

        // The lease rides along with the body so the instance stays
        // in-flight until the response has been streamed out.
        let body = upstream.bytes_stream().map(move |chunk| {
            let _lease: &Lease = &lease;
            chunk
        });

        response
            .body(Body::from_stream(body))
            .map_err(|e| AppError::Internal(format!("Failed to build proxy response: {}", e)))
    }
}

/// Observer bracket around one proxied request.
///
/// Dropped without `finish` when the caller goes away mid-request, in which
/// case the request is reported as cancelled.
struct ObservedRequest<'a> {
    observer: &'a dyn RequestObserver,
    service: &'a str,
    started: Instant,
    finished: bool,
}

impl<'a> ObservedRequest<'a> {
    fn start(observer: &'a dyn RequestObserver, service: &'a str) -> Self {
        observer.on_request_start(service);
        Self {
            observer,
            service,
            started: Instant::now(),
            finished: false,
        }
    }

    fn finish(mut self, status: StatusCode) {
        self.finished = true;
        self.observer
            .on_request_end(self.service, self.started.elapsed(), status);
    }
}

impl Drop for ObservedRequest<'_> {
    fn drop(&mut self) {
        if !self.finished {
            debug!(service = %self.service, "Proxied request cancelled by caller");
            self.observer
                .on_request_cancelled(self.service, self.started.elapsed());
        }
    }
}

/// Absolute URL on the selected instance for `sub_path` and `query`
pub fn target_url(lease: &Lease, sub_path: &str, query: Option<&str>) -> String {
    let mut url = format!("{}{}", lease.base_url(), sub_path);
    if let Some(query) = query.filter(|q| !q.is_empty()) {
        url.push('?');
        url.push_str(query);
    }
    url
}

/// Copy of `headers` without hop-by-hop headers or `Host`
fn forwardable_headers(headers: &HeaderMap) -> HeaderMap {
    let mut forwarded = headers.clone();
    for name in HOP_BY_HOP {
        forwarded.remove(name);
    }
    forwarded
}
