//! Worker → coordinator transports.
//!
//! [`ControlPlane`] is the RPC seam the worker agent talks through.
//! [`HttpControlPlane`] speaks the coordinator's JSON API over plain
//! HTTP/1.1; [`LocalControlPlane`] calls an in-process coordinator.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::Method;
use http_body_util::{BodyExt, Full};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::coordinator::Coordinator;
use crate::error::{ClientError, ClientResult};
use crate::proto::*;

/// The coordinator RPCs a worker uses.
pub trait ControlPlane: Send + Sync {
    fn register(&self, req: RegisterRequest) -> impl Future<Output = ClientResult<RegisterAck>> + Send;

    fn heartbeat(
        &self,
        worker_id: &str,
        req: HeartbeatRequest,
    ) -> impl Future<Output = ClientResult<HeartbeatAck>> + Send;

    fn list_assignments(
        &self,
        worker_id: &str,
    ) -> impl Future<Output = ClientResult<Vec<Assignment>>> + Send;

    fn create_resource(
        &self,
        req: CreateResourceRequest,
    ) -> impl Future<Output = ClientResult<CreateResourceAck>> + Send;

    fn update_resource(
        &self,
        name: &str,
        req: UpdateResourceRequest,
    ) -> impl Future<Output = ClientResult<UpdateResourceAck>> + Send;

    fn delete_resource(&self, name: &str) -> impl Future<Output = ClientResult<DeleteResourceAck>> + Send;

    fn find_capable_workers(
        &self,
        req: FindCapableRequest,
    ) -> impl Future<Output = ClientResult<FindCapableResponse>> + Send;
}

// ── In-process ─────────────────────────────────────────────────────

/// Calls a coordinator living in the same process.
#[derive(Clone)]
pub struct LocalControlPlane {
    coordinator: Arc<Coordinator>,
}

impl LocalControlPlane {
    pub fn new(coordinator: Arc<Coordinator>) -> Self {
        Self { coordinator }
    }
}

impl ControlPlane for LocalControlPlane {
    async fn register(&self, req: RegisterRequest) -> ClientResult<RegisterAck> {
        Ok(self.coordinator.register(req)?)
    }

    async fn heartbeat(&self, worker_id: &str, req: HeartbeatRequest) -> ClientResult<HeartbeatAck> {
        Ok(self.coordinator.heartbeat(worker_id, req)?)
    }

    async fn list_assignments(&self, worker_id: &str) -> ClientResult<Vec<Assignment>> {
        Ok(self.coordinator.list_assignments(worker_id)?)
    }

    async fn create_resource(&self, req: CreateResourceRequest) -> ClientResult<CreateResourceAck> {
        Ok(self.coordinator.create_resource(req)?)
    }

    async fn update_resource(
        &self,
        name: &str,
        req: UpdateResourceRequest,
    ) -> ClientResult<UpdateResourceAck> {
        Ok(self.coordinator.update_resource(name, req)?)
    }

    async fn delete_resource(&self, name: &str) -> ClientResult<DeleteResourceAck> {
        Ok(self.coordinator.delete_resource(name)?)
    }

    async fn find_capable_workers(&self, req: FindCapableRequest) -> ClientResult<FindCapableResponse> {
        Ok(self.coordinator.find_capable_workers(req)?)
    }
}

// ── HTTP ───────────────────────────────────────────────────────────

/// JSON-over-HTTP/1.1 client for the coordinator API.
///
/// Each call opens a fresh connection, so a coordinator restart never
/// leaves the worker holding a dead socket.
#[derive(Debug, Clone)]
pub struct HttpControlPlane {
    endpoint: String,
    timeout: Duration,
}

impl HttpControlPlane {
    /// `endpoint` is `host:port`, optionally prefixed with `http://`.
    pub fn new(endpoint: impl Into<String>) -> Self {
        let endpoint = endpoint.into();
        let endpoint = endpoint
            .strip_prefix("http://")
            .unwrap_or(&endpoint)
            .trim_end_matches('/')
            .to_string();
        Self {
            endpoint,
            timeout: Duration::from_secs(5),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn transport(&self, err: impl Display) -> ClientError {
        ClientError::Transport {
            endpoint: self.endpoint.clone(),
            message: err.to_string(),
        }
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&(impl Serialize + Sync)>,
    ) -> ClientResult<T> {
        let uri = format!("http://{}/v1{path}", self.endpoint);
        let payload = match body {
            Some(body) => serde_json::to_vec(body).map_err(|e| ClientError::Decode(e.to_string()))?,
            None => Vec::new(),
        };

        let exchange = async {
            let stream = tokio::net::TcpStream::connect(&self.endpoint)
                .await
                .map_err(|e| self.transport(e))?;
            let io = TokioIo::new(stream);
            let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
                .await
                .map_err(|e| self.transport(e))?;

            // Drive the connection in the background.
            tokio::spawn(async move {
                if let Err(e) = conn.await {
                    debug!(error = %e, "coordinator connection closed");
                }
            });

            let req = http::Request::builder()
                .method(method)
                .uri(&uri)
                .header("host", &self.endpoint)
                .header("content-type", "application/json")
                .header("user-agent", "meridian-worker/0.1")
                .body(Full::new(Bytes::from(payload)))
                .map_err(|e| self.transport(e))?;

            let resp = sender.send_request(req).await.map_err(|e| self.transport(e))?;
            let status = resp.status();
            let bytes = resp
                .into_body()
                .collect()
                .await
                .map_err(|e| self.transport(e))?
                .to_bytes();
            Ok::<_, ClientError>((status, bytes))
        };

        let (status, bytes) = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| self.transport(format!("no response within {:?}", self.timeout)))??;

        let envelope: ApiResponse<T> = serde_json::from_slice(&bytes)
            .map_err(|e| ClientError::Decode(format!("{uri} returned {status}: {e}")))?;
        match envelope {
            ApiResponse {
                error: Some(error), ..
            } => Err(ClientError::Coordinator(error)),
            ApiResponse {
                success: true,
                data: Some(data),
                ..
            } => Ok(data),
            _ => Err(ClientError::Decode(format!("{uri} returned {status} with an empty envelope"))),
        }
    }
}

/// Percent-encode a path segment.
fn segment(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for b in raw.bytes() {
        if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'~' | b':') {
            out.push(char::from(b));
        } else {
            out.push_str(&format!("%{b:02X}"));
        }
    }
    out
}

const NO_BODY: Option<&()> = None;

impl ControlPlane for HttpControlPlane {
    async fn register(&self, req: RegisterRequest) -> ClientResult<RegisterAck> {
        self.call(Method::POST, "/workers/register", Some(&req)).await
    }

    async fn heartbeat(&self, worker_id: &str, req: HeartbeatRequest) -> ClientResult<HeartbeatAck> {
        let path = format!("/workers/{}/heartbeat", segment(worker_id));
        self.call(Method::POST, &path, Some(&req)).await
    }

    async fn list_assignments(&self, worker_id: &str) -> ClientResult<Vec<Assignment>> {
        let path = format!("/workers/{}/assignments", segment(worker_id));
        self.call(Method::GET, &path, NO_BODY).await
    }

    async fn create_resource(&self, req: CreateResourceRequest) -> ClientResult<CreateResourceAck> {
        self.call(Method::POST, "/resources", Some(&req)).await
    }

    async fn update_resource(
        &self,
        name: &str,
        req: UpdateResourceRequest,
    ) -> ClientResult<UpdateResourceAck> {
        let path = format!("/resources/{}", segment(name));
        self.call(Method::PUT, &path, Some(&req)).await
    }

    async fn delete_resource(&self, name: &str) -> ClientResult<DeleteResourceAck> {
        let path = format!("/resources/{}", segment(name));
        self.call(Method::DELETE, &path, NO_BODY).await
    }

    async fn find_capable_workers(&self, req: FindCapableRequest) -> ClientResult<FindCapableResponse> {
        self.call(Method::POST, "/capabilities/match", Some(&req)).await
    }
}
