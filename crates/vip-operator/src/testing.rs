//! Fake API server for tests that need a real `kube::Client`

use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use kube::client::Body;
use kube::Client;

/// Answers every request with a fixed status and body
#[derive(Clone)]
pub(crate) struct FixedResponse {
    status: u16,
    body: serde_json::Value,
}

impl tower::Service<http::Request<Body>> for FixedResponse {
    type Response = http::Response<Body>;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _req: http::Request<Body>) -> Self::Future {
        let status = self.status;
        let body = self.body.clone();
        Box::pin(async move {
            let body_bytes = serde_json::to_vec(&body).unwrap();
            let response = http::Response::builder()
                .status(status)
                .header("content-type", "application/json")
                .body(Body::from(body_bytes))
                .unwrap();
            Ok(response)
        })
    }
}

/// Client whose every call gets `status` and `body`; needs a tokio runtime
pub(crate) fn fake_client(status: u16, body: serde_json::Value) -> Client {
    Client::new(FixedResponse { status, body }, "default")
}

/// A `Status` failure body as the API server sends it
pub(crate) fn failure(code: u16, reason: &str) -> serde_json::Value {
    serde_json::json!({
        "kind": "Status",
        "apiVersion": "v1",
        "metadata": {},
        "status": "Failure",
        "message": format!("test {reason}"),
        "reason": reason,
        "code": code
    })
}
