//! HTTP delivery-agreement handshake.
//!
//! Before a URL is accepted as a push target the gateway sends it an
//! `OPTIONS` request carrying its origin in `WebHook-Request-Origin`. The
//! target agrees by answering 2xx with `WebHook-Allowed-Origin` set to that
//! origin or `*`. Redirects are not followed and proxies are bypassed. A
//! named host is pinned to the addresses the URL guard vetted, so a second
//! DNS answer cannot steer the request elsewhere.

use crate::domain::error::GatewayError;
use crate::ports::{AgreementError, DeliveryAgreement, WebhookTarget};
use async_trait::async_trait;
use reqwest::{redirect, Client, ClientBuilder, Method};
use std::time::Duration;
use tracing::debug;
use url::Host;

pub const REQUEST_ORIGIN_HEADER: &str = "WebHook-Request-Origin";
pub const ALLOWED_ORIGIN_HEADER: &str = "WebHook-Allowed-Origin";

/// Handshake over HTTP(S)
#[derive(Debug, Clone)]
pub struct HttpDeliveryAgreement {
    client: Client,
    timeout: Duration,
}

impl HttpDeliveryAgreement {
    pub fn new(timeout: Duration) -> Result<Self, GatewayError> {
        let client = builder(timeout)
            .build()
            .map_err(|e| GatewayError::HttpClient(e.to_string()))?;
        Ok(Self { client, timeout })
    }

    /// Shared client for literal or unresolved hosts; a one-off client
    /// with the name pinned to `target.addrs` otherwise.
    fn client_for(&self, target: &WebhookTarget) -> Result<Client, AgreementError> {
        match target.url.host() {
            Some(Host::Domain(domain)) if !target.addrs.is_empty() => builder(self.timeout)
                .resolve_to_addrs(domain, &target.addrs)
                .build()
                .map_err(|e| AgreementError::Transport(e.to_string())),
            _ => Ok(self.client.clone()),
        }
    }
}

fn builder(timeout: Duration) -> ClientBuilder {
    Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout)
        .redirect(redirect::Policy::none())
        .no_proxy()
        .user_agent(concat!("eventmesh-gateway/", env!("CARGO_PKG_VERSION")))
}

#[async_trait]
impl DeliveryAgreement for HttpDeliveryAgreement {
    async fn obtain_delivery_agreement(
        &self,
        target: &WebhookTarget,
        origin: &str,
    ) -> Result<bool, AgreementError> {
        let url = &target.url;
        let response = self
            .client_for(target)?
            .request(Method::OPTIONS, url.clone())
            .header(REQUEST_ORIGIN_HEADER, origin)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AgreementError::Timeout
                } else {
                    AgreementError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        let allowed = response
            .headers()
            .get(ALLOWED_ORIGIN_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim);
        let agreed = status.is_success() && origin_allowed(allowed, origin);
        debug!(
            url = %url,
            pinned = target.addrs.len(),
            status = status.as_u16(),
            allowed_origin = allowed.unwrap_or(""),
            agreed,
            "Webhook handshake answered"
        );
        Ok(agreed)
    }
}

fn origin_allowed(allowed: Option<&str>, origin: &str) -> bool {
    match allowed {
        Some("*") => true,
        Some(value) => value.eq_ignore_ascii_case(origin),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use url::Url;

    const AGREED: &str = "HTTP/1.1 200 OK\r\nWebHook-Allowed-Origin: eventmesh.idc1\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";

    /// Serve one canned HTTP response and return the raw request
    async fn serve_once(
        response: &'static str,
    ) -> (WebhookTarget, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let n = socket.read(&mut buf).await.unwrap();
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            String::from_utf8_lossy(&buf[..n]).to_string()
        });
        let url = Url::parse(&format!("http://{addr}/hook")).unwrap();
        (WebhookTarget::new(url, vec![addr]), handle)
    }

    #[test]
    fn test_origin_matching() {
        assert!(origin_allowed(Some("*"), "eventmesh.idc1"));
        assert!(origin_allowed(Some("EventMesh.IDC1"), "eventmesh.idc1"));
        assert!(!origin_allowed(Some("other"), "eventmesh.idc1"));
        assert!(!origin_allowed(None, "eventmesh.idc1"));
    }

    #[tokio::test]
    async fn test_target_agrees() {
        let (target, server) = serve_once(AGREED).await;
        let agreement = HttpDeliveryAgreement::new(Duration::from_secs(2)).unwrap();
        assert!(agreement
            .obtain_delivery_agreement(&target, "eventmesh.idc1")
            .await
            .unwrap());

        let request = server.await.unwrap();
        assert!(request.starts_with("OPTIONS /hook"));
        assert!(request
            .to_ascii_lowercase()
            .contains("webhook-request-origin: eventmesh.idc1"));
    }

    #[tokio::test]
    async fn test_missing_header_is_refusal() {
        let (target, _server) = serve_once(
            "HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;
        let agreement = HttpDeliveryAgreement::new(Duration::from_secs(2)).unwrap();
        assert!(!agreement
            .obtain_delivery_agreement(&target, "eventmesh.idc1")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_redirect_is_refusal() {
        let (target, _server) = serve_once(
            "HTTP/1.1 302 Found\r\nLocation: http://127.0.0.1:1/\r\nWebHook-Allowed-Origin: *\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;
        let agreement = HttpDeliveryAgreement::new(Duration::from_secs(2)).unwrap();
        assert!(!agreement
            .obtain_delivery_agreement(&target, "eventmesh.idc1")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let target = WebhookTarget::unresolved(Url::parse(&format!("http://{addr}/hook")).unwrap());
        let agreement = HttpDeliveryAgreement::new(Duration::from_secs(2)).unwrap();
        assert!(agreement
            .obtain_delivery_agreement(&target, "eventmesh.idc1")
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_named_host_connects_to_vetted_addrs() {
        let (served, server) = serve_once(AGREED).await;
        let port = served.addrs[0].port();
        let pinned: SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();
        // .invalid never resolves, so only the pinned address can be reached
        let url = Url::parse(&format!("http://rebind.invalid:{port}/hook")).unwrap();
        let target = WebhookTarget::new(url, vec![pinned]);

        let agreement = HttpDeliveryAgreement::new(Duration::from_secs(2)).unwrap();
        assert!(agreement
            .obtain_delivery_agreement(&target, "eventmesh.idc1")
            .await
            .unwrap());

        let request = server.await.unwrap().to_ascii_lowercase();
        assert!(request.contains(&format!("host: rebind.invalid:{port}")));
    }

    #[tokio::test]
    async fn test_named_host_without_addrs_resolves_itself() {
        let url = Url::parse("http://rebind.invalid:9/hook").unwrap();
        let agreement = HttpDeliveryAgreement::new(Duration::from_secs(2)).unwrap();
        let result = agreement
            .obtain_delivery_agreement(&WebhookTarget::unresolved(url), "eventmesh.idc1")
            .await;
        assert!(result.is_err());
    }
}
