//! HTTP request/response forwarding to resolved backends

use gateway_core::{Address, Deadline, GatewayError, Result};
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::{Body, Bytes};
use hyper::header::{HeaderMap, HeaderName, HeaderValue, CONNECTION, HOST};
use hyper::{Request, Response, Uri, Version};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::tokio::TokioExecutor;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, warn};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Where a request is being sent
#[derive(Clone, Debug)]
pub struct UpstreamTarget {
    /// Logical service name, used in errors and logs
    pub service: String,
    pub address: Address,
    /// Rewritten request target, e.g. `/login?next=1`
    pub path_and_query: String,
    /// Keep the caller's Host header instead of the backend authority
    pub preserve_host: bool,
}

impl UpstreamTarget {
    pub fn uri(&self) -> Result<Uri> {
        format!("http://{}{}", self.address.authority(), self.path_and_query)
            .parse()
            .map_err(|e| {
                GatewayError::BadRequest(format!(
                    "cannot build upstream URI for {}{}: {}",
                    self.address, self.path_and_query, e
                ))
            })
    }
}

/// HTTP request forwarder with connection pooling.
///
/// The whole exchange, response body included, is bounded by the caller's
/// deadline so a stalled backend never yields a partial response.
pub struct RequestForwarder {
    client: Client<HttpConnector, Full<Bytes>>,
    connect_timeout: Duration,
}

impl RequestForwarder {
    pub fn new(connect_timeout: Duration) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(connect_timeout));
        connector.set_keepalive(Some(Duration::from_secs(30)));

        let client = Client::builder(TokioExecutor::new()).build::<_, Full<Bytes>>(connector);

        Self {
            client,
            connect_timeout,
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Buffer the caller's request body, bounded by `max_bytes` and `deadline`.
    ///
    /// Runs before the backend exchange so a slow or oversized upload is
    /// reported as the caller's fault, not the backend's.
    pub async fn read_body<B>(body: B, max_bytes: usize, deadline: Deadline) -> Result<Bytes>
    where
        B: Body<Data = Bytes>,
        B::Error: Into<BoxError>,
    {
        let collect = async {
            match Limited::new(body, max_bytes).collect().await {
                Ok(collected) => Ok(collected.to_bytes()),
                Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
                    Err(GatewayError::PayloadTooLarge(max_bytes))
                }
                Err(e) => Err(GatewayError::BadRequest(format!(
                    "failed to read request body: {}",
                    e
                ))),
            }
        };

        deadline.run(collect, || GatewayError::RequestTimeout).await
    }

    /// Forward a buffered `request` to `target` and return the backend's response.
    ///
    /// Method, headers (minus hop-by-hop), query string and body are relayed
    /// unchanged. Backend error statuses are returned as-is; only transport
    /// failures and deadline expiry become errors.
    pub async fn forward(
        &self,
        request: Request<Bytes>,
        target: &UpstreamTarget,
        deadline: Deadline,
    ) -> Result<Response<Bytes>> {
        let uri = target.uri()?;
        debug!("Forwarding {} {} to {}", request.method(), target.path_and_query, uri);

        let exchange = async {
            let (mut parts, body) = request.into_parts();

            parts.headers = Self::filter_headers(&parts.headers);
            if !target.preserve_host {
                let authority = HeaderValue::from_str(&target.address.authority())
                    .map_err(|e| GatewayError::Internal(e.to_string()))?;
                parts.headers.insert(HOST, authority);
            }
            parts.uri = uri;
            parts.version = Version::HTTP_11;

            let outbound = Request::from_parts(parts, Full::new(body));
            let response = self.client.request(outbound).await.map_err(|e| {
                warn!("Backend request to {} failed: {}", target.address, e);
                GatewayError::UpstreamUnavailable {
                    service: target.service.clone(),
                    reason: e.to_string(),
                }
            })?;

            debug!("Backend {} responded with {}", target.address, response.status());

            let (mut parts, body) = response.into_parts();
            let body_bytes = Self::collect_body(body).await.map_err(|e| {
                warn!("Backend {} response body interrupted: {}", target.address, e);
                GatewayError::UpstreamUnavailable {
                    service: target.service.clone(),
                    reason: format!("response interrupted: {}", e),
                }
            })?;
            parts.headers = Self::filter_headers(&parts.headers);

            debug!("Response body size: {} bytes", body_bytes.len());
            Ok::<_, GatewayError>(Response::from_parts(parts, body_bytes))
        };

        deadline
            .run(exchange, || {
                warn!("Backend {} timed out", target.address);
                GatewayError::UpstreamTimeout(target.service.clone())
            })
            .await
    }

    /// Collect an entire body into Bytes
    pub async fn collect_body<B>(body: B) -> anyhow::Result<Bytes>
    where
        B: Body<Data = Bytes>,
        B::Error: Into<BoxError>,
    {
        match body.collect().await {
            Ok(collected) => Ok(collected.to_bytes()),
            Err(e) => {
                let e: BoxError = e.into();
                Err(anyhow::anyhow!(e))
            }
        }
    }

    /// Copy end-to-end headers, dropping hop-by-hop ones and any named in `Connection`
    pub fn filter_headers(headers: &HeaderMap) -> HeaderMap {
        let connection_tokens: HashSet<String> = headers
            .get_all(CONNECTION)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .map(|token| token.trim().to_ascii_lowercase())
            .filter(|token| !token.is_empty())
            .collect();

        let mut filtered = HeaderMap::with_capacity(headers.len());
        for (name, value) in headers.iter() {
            if Self::is_hop_by_hop_header(name) || connection_tokens.contains(name.as_str()) {
                continue;
            }
            filtered.append(name.clone(), value.clone());
        }
        filtered
    }

    /// Check if header is hop-by-hop (should not be forwarded)
    fn is_hop_by_hop_header(name: &HeaderName) -> bool {
        matches!(
            name.as_str(),
            "connection"
                | "keep-alive"
                | "proxy-authenticate"
                | "proxy-authorization"
                | "proxy-connection"
                | "te"
                | "trailer"
                | "trailers"
                | "transfer-encoding"
                | "upgrade"
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::StatusCode;

    fn target(port: u16) -> UpstreamTarget {
        UpstreamTarget {
            service: "auth-service".to_string(),
            address: Address::new("127.0.0.1", port),
            path_and_query: "/login?next=%2Fhome".to_string(),
            preserve_host: true,
        }
    }

    #[test]
    fn test_forwarder_creation() {
        let forwarder = RequestForwarder::new(Duration::from_secs(10));
        assert_eq!(forwarder.connect_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_target_uri() {
        let uri = target(4000).uri().unwrap();
        assert_eq!(uri.to_string(), "http://127.0.0.1:4000/login?next=%2Fhome");

        let v6 = UpstreamTarget {
            address: Address::new("::1", 4000),
            ..target(4000)
        };
        assert_eq!(v6.uri().unwrap().to_string(), "http://[::1]:4000/login?next=%2Fhome");
    }

    #[test]
    fn test_hop_by_hop_headers() {
        assert!(RequestForwarder::is_hop_by_hop_header(&CONNECTION));
        assert!(RequestForwarder::is_hop_by_hop_header(&HeaderName::from_static("keep-alive")));
        assert!(RequestForwarder::is_hop_by_hop_header(&HeaderName::from_static(
            "transfer-encoding"
        )));
        assert!(!RequestForwarder::is_hop_by_hop_header(&HeaderName::from_static("content-type")));
        assert!(!RequestForwarder::is_hop_by_hop_header(&HeaderName::from_static("authorization")));
    }

    #[test]
    fn test_filter_headers_keeps_repeated_values() {
        let mut headers = HeaderMap::new();
        headers.append("accept", HeaderValue::from_static("application/json"));
        headers.append("x-role", HeaderValue::from_static("admin"));
        headers.append("x-role", HeaderValue::from_static("client"));
        headers.append("connection", HeaderValue::from_static("keep-alive, x-session-hint"));
        headers.append("x-session-hint", HeaderValue::from_static("abc"));
        headers.append("authorization", HeaderValue::from_static("Bearer t"));

        let filtered = RequestForwarder::filter_headers(&headers);
        let roles: Vec<&str> = filtered
            .get_all("x-role")
            .iter()
            .map(|v| v.to_str().unwrap())
            .collect();
        assert_eq!(roles, vec!["admin", "client"]);
        assert!(filtered.get("connection").is_none());
        assert!(filtered.get("x-session-hint").is_none());
        assert_eq!(filtered.get("authorization").unwrap(), "Bearer t");
        assert_eq!(filtered.get("accept").unwrap(), "application/json");
    }

    #[tokio::test]
    async fn test_connection_refused_is_upstream_unavailable() {
        // Bind then drop to get a port with no listener
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let forwarder = RequestForwarder::new(Duration::from_secs(2));
        let request = Request::get("/auth/login").body(Bytes::new()).unwrap();

        let err = forwarder
            .forward(request, &target(port), Deadline::after(Duration::from_secs(5)))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::UpstreamUnavailable { ref service, .. } if service == "auth-service"));
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY.as_u16());
    }

    #[tokio::test]
    async fn test_read_body_within_limit() {
        let body = Full::new(Bytes::from_static(b"{\"email\":\"a@b.com\"}"));
        let bytes = RequestForwarder::read_body(body, 1024, Deadline::after(Duration::from_secs(1)))
            .await
            .unwrap();
        assert_eq!(bytes.as_ref(), b"{\"email\":\"a@b.com\"}");
    }

    #[tokio::test]
    async fn test_read_body_over_limit_is_413() {
        let body = Full::new(Bytes::from(vec![b'x'; 2048]));
        let err = RequestForwarder::read_body(body, 1024, Deadline::after(Duration::from_secs(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::PayloadTooLarge(1024)));
        assert_eq!(err.status_code(), StatusCode::PAYLOAD_TOO_LARGE.as_u16());
    }

    #[tokio::test]
    async fn test_stalled_upload_is_408() {
        let body = http_body_util::StreamBody::new(futures::stream::pending::<
            std::result::Result<hyper::body::Frame<Bytes>, std::convert::Infallible>,
        >());
        let err = RequestForwarder::read_body(body, 1024, Deadline::after(Duration::from_millis(50)))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::RequestTimeout));
        assert_eq!(err.status_code(), StatusCode::REQUEST_TIMEOUT.as_u16());
    }
}
