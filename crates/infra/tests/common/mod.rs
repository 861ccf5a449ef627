#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};

pub const SECRET_HEADER: &str = "x-push-secret";
pub const SECRET: &str = "test-secret";

/// A request as the tenant saw it.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: Method,
    pub path: String,
    pub secret: Option<String>,
    pub body: Bytes,
}

impl Recorded {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).unwrap()
    }
}

#[derive(Clone)]
struct TenantState {
    status: StatusCode,
    body: &'static str,
    delay: Duration,
    requests: Arc<Mutex<Vec<Recorded>>>,
}

/// Tenant backend stand-in on an ephemeral port; answers every request with a
/// fixed status and body.
pub struct MockTenant {
    pub base_url: String,
    requests: Arc<Mutex<Vec<Recorded>>>,
    handle: tokio::task::JoinHandle<()>,
}

impl MockTenant {
    pub async fn spawn(status: u16, body: &'static str) -> Self {
        Self::spawn_delayed(status, body, Duration::ZERO).await
    }

    /// Accepts each request, then holds the response back for `delay`.
    pub async fn spawn_delayed(status: u16, body: &'static str, delay: Duration) -> Self {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let state = TenantState {
            status: StatusCode::from_u16(status).unwrap(),
            body,
            delay,
            requests: requests.clone(),
        };
        let app = Router::new().fallback(record).with_state(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{}", addr),
            requests,
            handle,
        }
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }
}

impl Drop for MockTenant {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn record(
    State(state): State<TenantState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    state.requests.lock().unwrap().push(Recorded {
        method,
        path: uri.path().to_string(),
        secret: headers
            .get(SECRET_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        body,
    });
    if !state.delay.is_zero() {
        tokio::time::sleep(state.delay).await;
    }
    (
        state.status,
        [(header::CONTENT_TYPE, "application/json")],
        state.body,
    )
        .into_response()
}

/// Base URL nothing listens on.
pub async fn unreachable_url() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}", addr)
}

pub fn gateway() -> pushdeck_infra::push::PushGateway {
    pushdeck_infra::push::PushGateway::new(
        pushdeck_infra::push::PushConfig::new(SECRET)
            .with_secret_header(SECRET_HEADER)
            .with_timeout(Duration::from_secs(2)),
    )
    .unwrap()
}
