// Copyright 2024 The Fluxstore Authors. All rights reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Admission interceptor (C3): a `tower` middleware wrapping every RPC
//! handler with the admission-and-release dance. Implemented as a single
//! `tower::Service` rather than tonic's separate unary/streaming
//! interceptor hooks, since tonic services are uniform at the
//! `http::Request`/`http::Response` layer — the same admission logic
//! applies whether the handler is unary, client-streaming, or
//! server-streaming.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tonic::body::BoxBody;
use tower::{Layer, Service};

use crate::limiter::{CallKind, ClientLimiter};
use crate::registry::LimiterRegistry;

type Hook = Arc<dyn Fn(&str, &str, CallKind) + Send + Sync>;

/// Classifies a fully-qualified gRPC method path into a limiter pool.
/// Anything unrecognized defaults to `Bulk`, the more constrained class,
/// fail-safe.
pub fn classify_method(path: &str) -> CallKind {
    match path {
        "/fluxstore.v1.FileService/ListFiles" => CallKind::List,
        "/fluxstore.v1.FileService/UploadFile" | "/fluxstore.v1.FileService/GetFile" => CallKind::Bulk,
        _ => CallKind::Bulk,
    }
}

/// Derives the client identity for a request, in the priority order spec'd
/// in section 4.3: configured metadata header, then forwarded-for, then
/// peer address host, then `"unknown"`.
pub fn derive_client_id<B>(req: &http::Request<B>, metadata_key: Option<&str>) -> String {
    if let Some(key) = metadata_key {
        if let Some(value) = req.headers().get(key).and_then(|v| v.to_str().ok()) {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                return trimmed.to_string();
            }
        }
    }

    if let Some(forwarded) = req.headers().get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = forwarded.split(',').next() {
            let trimmed = first.trim();
            if !trimmed.is_empty() {
                return trimmed.to_string();
            }
        }
    }

    if let Some(connect_info) = req.extensions().get::<tonic::transport::server::TcpConnectInfo>() {
        if let Some(addr) = connect_info.remote_addr() {
            return addr.ip().to_string();
        }
    }

    "unknown".to_string()
}

/// `tower::Layer` that produces [`ConcurrencyService`] instances.
#[derive(Clone)]
pub struct ConcurrencyLayer {
    registry: Arc<LimiterRegistry>,
    metadata_key: Option<String>,
    on_acquire: Option<Hook>,
    on_release: Option<Hook>,
    on_reject: Option<Hook>,
}

impl ConcurrencyLayer {
    pub fn new(registry: Arc<LimiterRegistry>, metadata_key: Option<String>) -> Self {
        Self {
            registry,
            metadata_key,
            on_acquire: None,
            on_release: None,
            on_reject: None,
        }
    }

    pub fn on_acquire(mut self, hook: impl Fn(&str, &str, CallKind) + Send + Sync + 'static) -> Self {
        self.on_acquire = Some(Arc::new(hook));
        self
    }

    pub fn on_release(mut self, hook: impl Fn(&str, &str, CallKind) + Send + Sync + 'static) -> Self {
        self.on_release = Some(Arc::new(hook));
        self
    }

    pub fn on_reject(mut self, hook: impl Fn(&str, &str, CallKind) + Send + Sync + 'static) -> Self {
        self.on_reject = Some(Arc::new(hook));
        self
    }
}

impl<S> Layer<S> for ConcurrencyLayer {
    type Service = ConcurrencyService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ConcurrencyService {
            inner,
            registry: self.registry.clone(),
            metadata_key: self.metadata_key.clone(),
            on_acquire: self.on_acquire.clone(),
            on_release: self.on_release.clone(),
            on_reject: self.on_reject.clone(),
        }
    }
}

#[derive(Clone)]
pub struct ConcurrencyService<S> {
    inner: S,
    registry: Arc<LimiterRegistry>,
    metadata_key: Option<String>,
    on_acquire: Option<Hook>,
    on_release: Option<Hook>,
    on_reject: Option<Hook>,
}

/// Releases the acquired slot exactly once, on every exit path of the
/// wrapped call — success, failure, or the future being dropped mid-flight
/// because the caller cancelled. This is the Rust substitute for the
/// original interceptor's `defer release()`.
struct ReleaseGuard {
    limiter: Arc<ClientLimiter>,
    kind: CallKind,
    client_id: String,
    method: String,
    on_release: Option<Hook>,
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        match self.kind {
            CallKind::Bulk => self.limiter.release_bulk(),
            CallKind::List => self.limiter.release_list(),
        }
        if let Some(hook) = self.on_release.clone() {
            let client_id = self.client_id.clone();
            let method = self.method.clone();
            let kind = self.kind;
            fluxstore_util::spawn!("concurrency_on_release", async move { hook(&method, &client_id, kind) });
        }
    }
}

impl<S, ReqBody> Service<http::Request<ReqBody>> for ConcurrencyService<S>
where
    S: Service<http::Request<ReqBody>, Response = http::Response<BoxBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    ReqBody: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: http::Request<ReqBody>) -> Self::Future {
        let method = req.uri().path().to_string();
        let kind = classify_method(&method);
        let client_id = derive_client_id(&req, self.metadata_key.as_deref());

        // Clone the inner service the way tower middleware conventionally
        // does so `self.inner` stays ready for the next call while this one
        // is in flight.
        let mut inner = self.inner.clone();
        let registry = self.registry.clone();
        let on_acquire = self.on_acquire.clone();
        let on_release = self.on_release.clone();
        let on_reject = self.on_reject.clone();

        Box::pin(async move {
            let limiter = match registry.get(&client_id) {
                Ok(limiter) => limiter,
                Err(_) => {
                    return Ok(rejection_response(kind));
                }
            };

            let admitted = match kind {
                CallKind::Bulk => limiter.try_acquire_bulk(),
                CallKind::List => limiter.try_acquire_list(),
            };

            if !admitted {
                if let Some(hook) = on_reject {
                    let client_id = client_id.clone();
                    let method = method.clone();
                    fluxstore_util::spawn!("concurrency_on_reject", async move { hook(&method, &client_id, kind) });
                }
                return Ok(rejection_response(kind));
            }

            if let Some(hook) = on_acquire {
                let client_id = client_id.clone();
                let method = method.clone();
                fluxstore_util::spawn!("concurrency_on_acquire", async move { hook(&method, &client_id, kind) });
            }

            let _release_guard = ReleaseGuard {
                limiter,
                kind,
                client_id,
                method,
                on_release,
            };

            inner.call(req).await
        })
    }
}

/// Builds a gRPC `ResourceExhausted` response naming the rejected class,
/// without invoking the downstream handler.
fn rejection_response(kind: CallKind) -> http::Response<BoxBody> {
    let class = match kind {
        CallKind::Bulk => "Upload/Download",
        CallKind::List => "ListFiles",
    };
    let status = tonic::Status::resource_exhausted(format!("too many concurrent {class} requests"));
    status.to_http()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn classifies_known_methods() {
        assert_eq!(classify_method("/fluxstore.v1.FileService/ListFiles"), CallKind::List);
        assert_eq!(classify_method("/fluxstore.v1.FileService/UploadFile"), CallKind::Bulk);
        assert_eq!(classify_method("/fluxstore.v1.FileService/GetFile"), CallKind::Bulk);
    }

    #[test]
    fn unknown_method_defaults_to_bulk() {
        assert_eq!(classify_method("/fluxstore.v1.FileService/Nonexistent"), CallKind::Bulk);
    }

    #[test]
    fn derives_identity_from_metadata_header_first() {
        let req = http::Request::builder()
            .header("x-client-id", "alice")
            .header("x-forwarded-for", "10.0.0.9")
            .body(())
            .unwrap();
        assert_eq!(derive_client_id(&req, Some("x-client-id")), "alice");
    }

    #[test]
    fn falls_back_to_forwarded_for_then_unknown() {
        let req = http::Request::builder()
            .header("x-forwarded-for", "10.0.0.9, 10.0.0.1")
            .body(())
            .unwrap();
        assert_eq!(derive_client_id(&req, Some("x-client-id")), "10.0.0.9");

        let bare = http::Request::builder().body(()).unwrap();
        assert_eq!(derive_client_id(&bare, None), "unknown");
    }

    #[test]
    fn blank_header_value_is_skipped() {
        let req = http::Request::builder()
            .header("x-client-id", "   ")
            .header("x-forwarded-for", "10.0.0.9")
            .body(())
            .unwrap();
        assert_eq!(derive_client_id(&req, Some("x-client-id")), "10.0.0.9");
    }
}
