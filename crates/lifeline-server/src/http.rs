//! `ProofTransport` over the liveness server's JSON API.
//!
//! ```text
//! POST   /v1/proofs                     submit_proof
//! POST   /v1/proofs/verify              verify_proof
//! GET    /v1/wallets/{id}/status        get_status
//! GET    /v1/wallets/{id}/proofs?limit  get_proofs
//! POST   /v1/enrollments                enroll_wallet
//! DELETE /v1/enrollments/{id}           revoke_enrollment
//! POST   /v1/recovery-triggers          trigger_recovery
//! ```
//!
//! Every endpoint answers with an `ApiResponse`. A 4xx carrying an
//! `ApiResponse` body is a rejection, not a transport failure.

use anyhow::{Context, Result};
use async_trait::async_trait;
use lifeline_pol::{
    ApiResponse, Enrollment, PolProof, ProofTransport, RecoveryTrigger, TransportError,
};
use reqwest::{Client, RequestBuilder};
use std::time::Duration;

#[derive(Clone)]
pub struct HttpTransport {
    base: String,
    client: Client,
    auth_token: Option<String>,
    timeout_secs: u64,
}

impl HttpTransport {
    pub fn new(base: &str, auth_token: Option<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            base: base.trim_end_matches('/').to_string(),
            client,
            auth_token,
            timeout_secs: timeout.as_secs(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.base, path)
    }

    async fn send(&self, request: RequestBuilder) -> Result<ApiResponse, TransportError> {
        let request = match self.auth_token {
            Some(ref token) => request.bearer_auth(token),
            None => request,
        };
        let resp = request.send().await.map_err(|e| self.map_error(e))?;
        let status = resp.status();
        let body = resp.text().await.map_err(|e| self.map_error(e))?;

        if status.is_success() || status.is_client_error() {
            if let Ok(reply) = serde_json::from_str::<ApiResponse>(&body) {
                return Ok(reply);
            }
        }
        if status.is_success() {
            return Err(TransportError::Decode(format!("unexpected body: {}", truncate(&body))));
        }
        Err(TransportError::Http {
            status: status.as_u16(),
            message: truncate(&body).to_string(),
        })
    }

    fn map_error(&self, e: reqwest::Error) -> TransportError {
        if e.is_timeout() {
            TransportError::Timeout(self.timeout_secs)
        } else if e.is_decode() {
            TransportError::Decode(e.to_string())
        } else {
            TransportError::Connection(e.to_string())
        }
    }
}

fn truncate(body: &str) -> &str {
    match body.char_indices().nth(200) {
        Some((i, _)) => &body[..i],
        None => body,
    }
}

#[async_trait]
impl ProofTransport for HttpTransport {
    async fn submit_proof(&self, proof: &PolProof) -> Result<ApiResponse, TransportError> {
        self.send(self.client.post(self.url("proofs")).json(proof)).await
    }

    async fn get_status(&self, wallet_id: &str) -> Result<ApiResponse, TransportError> {
        let url = self.url(&format!("wallets/{}/status", wallet_id));
        self.send(self.client.get(url)).await
    }

    async fn get_proofs(
        &self,
        wallet_id: &str,
        limit: usize,
    ) -> Result<ApiResponse, TransportError> {
        let url = self.url(&format!("wallets/{}/proofs?limit={}", wallet_id, limit));
        self.send(self.client.get(url)).await
    }

    async fn enroll_wallet(&self, enrollment: &Enrollment) -> Result<ApiResponse, TransportError> {
        self.send(self.client.post(self.url("enrollments")).json(enrollment))
            .await
    }

    async fn revoke_enrollment(&self, wallet_id: &str) -> Result<ApiResponse, TransportError> {
        let url = self.url(&format!("enrollments/{}", wallet_id));
        self.send(self.client.delete(url)).await
    }

    async fn trigger_recovery(
        &self,
        trigger: &RecoveryTrigger,
    ) -> Result<ApiResponse, TransportError> {
        self.send(self.client.post(self.url("recovery-triggers")).json(trigger))
            .await
    }

    async fn verify_proof(&self, proof: &PolProof) -> Result<ApiResponse, TransportError> {
        self.send(self.client.post(self.url("proofs/verify")).json(proof))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP reply and hand back the request head
    async fn serve_once(
        status: &'static str,
        body: &'static str,
    ) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 8192];
            let n = socket.read(&mut buf).await.unwrap();
            let reply = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\n\
                 Content-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            socket.write_all(reply.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&buf[..n]).to_string()
        });
        (format!("http://{}", addr), handle)
    }

    fn transport(base: &str) -> HttpTransport {
        HttpTransport::new(base, Some("token-1".into()), Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_status_request() {
        let (base, server) =
            serve_once("200 OK", r#"{"success":true,"message":"status","data":{"x":1}}"#).await;
        let reply = transport(&base).get_status("wallet-1").await.unwrap();
        assert!(reply.success);
        assert_eq!(reply.data.unwrap()["x"], 1);

        let head = server.await.unwrap();
        assert!(head.starts_with("GET /v1/wallets/wallet-1/status"));
        assert!(head.to_lowercase().contains("authorization: bearer token-1"));
    }

    #[tokio::test]
    async fn test_rejection_is_not_transport_error() {
        let (base, _server) =
            serve_once("403 Forbidden", r#"{"success":false,"message":"bad signature"}"#).await;
        let reply = transport(&base).revoke_enrollment("wallet-1").await.unwrap();
        assert!(!reply.success);
        assert_eq!(reply.message, "bad signature");
    }

    #[tokio::test]
    async fn test_server_error() {
        let (base, _server) = serve_once("503 Service Unavailable", "maintenance").await;
        let err = transport(&base).get_proofs("wallet-1", 5).await.unwrap_err();
        assert_eq!(
            err,
            TransportError::Http {
                status: 503,
                message: "maintenance".into()
            }
        );
    }

    #[tokio::test]
    async fn test_garbage_body() {
        let (base, _server) = serve_once("200 OK", "<html>").await;
        let err = transport(&base).get_status("wallet-1").await.unwrap_err();
        assert!(matches!(err, TransportError::Decode(_)));
    }

    #[tokio::test]
    async fn test_unreachable() {
        // Bind then drop to get a port nobody listens on
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };
        let err = transport(&format!("http://{}", addr))
            .get_status("wallet-1")
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Connection(_)));
    }

    #[test]
    fn test_url_building() {
        let t = transport("https://pol.example.com/");
        assert_eq!(t.url("proofs"), "https://pol.example.com/v1/proofs");
    }
}
