//! HTTP client for the Consul agent API

use gateway_core::{Address, Deadline, GatewayError, ServiceRegistration};
use reqwest::{Method, RequestBuilder, Response, Url};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use thiserror::Error;
use tracing::debug;

const TOKEN_HEADER: &str = "X-Consul-Token";

#[derive(Error, Debug)]
pub enum ConsulError {
    #[error("invalid Consul address '{0}'")]
    InvalidAddress(String),

    #[error("Consul request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Consul returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Consul did not answer before the deadline")]
    Timeout,
}

impl From<ConsulError> for GatewayError {
    fn from(err: ConsulError) -> Self {
        match err {
            ConsulError::Timeout => GatewayError::RegistryTimeout,
            ConsulError::InvalidAddress(address) => {
                GatewayError::InvalidConfiguration(format!("invalid Consul address '{}'", address))
            }
            other => GatewayError::RegistryUnavailable(other.to_string()),
        }
    }
}

/// Entry of `GET /v1/agent/services`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AgentService {
    #[serde(rename = "ID")]
    id: String,
    service: String,
    #[serde(default)]
    address: String,
    port: u16,
    #[serde(default)]
    tags: Option<Vec<String>>,
}

/// Body of `PUT /v1/agent/service/register`
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct RegisterRequest<'a> {
    #[serde(rename = "ID")]
    id: &'a str,
    name: &'a str,
    address: &'a str,
    port: u16,
    tags: &'a [String],
}

/// ConsulClient talks to a local Consul agent
#[derive(Clone)]
pub struct ConsulClient {
    http: reqwest::Client,
    base_url: Url,
    token: Option<String>,
}

impl ConsulClient {
    /// Create a client for the agent at `address` (e.g. `http://127.0.0.1:8500`)
    pub fn new(address: &str, token: Option<String>) -> Result<Self, ConsulError> {
        Self::with_http_client(reqwest::Client::new(), address, token)
    }

    /// Create a client reusing an existing HTTP client
    pub fn with_http_client(
        http: reqwest::Client,
        address: &str,
        token: Option<String>,
    ) -> Result<Self, ConsulError> {
        let mut base_url =
            Url::parse(address).map_err(|_| ConsulError::InvalidAddress(address.to_string()))?;
        if base_url.host_str().is_none() {
            return Err(ConsulError::InvalidAddress(address.to_string()));
        }
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self {
            http,
            base_url,
            token,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// List the services registered with the agent, ordered by registration id.
    ///
    /// Services registered without an address inherit the agent's host.
    pub async fn list_services(
        &self,
        deadline: Deadline,
    ) -> Result<Vec<ServiceRegistration>, ConsulError> {
        let url = self.endpoint("v1/agent/services")?;
        let response = self.send(self.request(Method::GET, url), deadline).await?;

        let services: BTreeMap<String, AgentService> =
            Self::with_deadline(response.json(), deadline).await??;
        let fallback_host = self.base_url.host_str().unwrap_or("127.0.0.1");

        let registrations: Vec<ServiceRegistration> = services
            .into_values()
            .map(|service| {
                let host = if service.address.is_empty() {
                    fallback_host.to_string()
                } else {
                    service.address
                };
                ServiceRegistration {
                    id: service.id,
                    name: service.service,
                    address: Address::new(host, service.port),
                    tags: service.tags.unwrap_or_default(),
                }
            })
            .collect();

        debug!("Consul reported {} services", registrations.len());
        Ok(registrations)
    }

    /// Register a service instance with the agent
    pub async fn register(
        &self,
        registration: &ServiceRegistration,
        deadline: Deadline,
    ) -> Result<(), ConsulError> {
        let url = self.endpoint("v1/agent/service/register")?;
        let body = RegisterRequest {
            id: &registration.id,
            name: &registration.name,
            address: &registration.address.host,
            port: registration.address.port,
            tags: &registration.tags,
        };

        self.send(self.request(Method::PUT, url).json(&body), deadline)
            .await?;
        debug!(
            "Registered {} ({}) at {}",
            registration.name, registration.id, registration.address
        );
        Ok(())
    }

    /// Remove a service instance from the agent
    pub async fn deregister(&self, id: &str, deadline: Deadline) -> Result<(), ConsulError> {
        let mut url = self.endpoint("v1/agent/service/deregister")?;
        url.path_segments_mut()
            .map_err(|_| ConsulError::InvalidAddress(self.base_url.to_string()))?
            .push(id);

        self.send(self.request(Method::PUT, url), deadline).await?;
        debug!("Deregistered {}", id);
        Ok(())
    }

    fn endpoint(&self, path: &str) -> Result<Url, ConsulError> {
        self.base_url
            .join(path)
            .map_err(|_| ConsulError::InvalidAddress(self.base_url.to_string()))
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.http.request(method, url);
        match &self.token {
            Some(token) => builder.header(TOKEN_HEADER, token),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder, deadline: Deadline) -> Result<Response, ConsulError> {
        let response = Self::with_deadline(builder.send(), deadline).await??;
        let status = response.status();
        if !status.is_success() {
            let body = Self::with_deadline(response.text(), deadline)
                .await?
                .unwrap_or_default();
            return Err(ConsulError::Status {
                status: status.as_u16(),
                body: body.trim().to_string(),
            });
        }
        Ok(response)
    }

    async fn with_deadline<F, T>(fut: F, deadline: Deadline) -> Result<T, ConsulError>
    where
        F: Future<Output = T>,
    {
        tokio::time::timeout_at(deadline.instant(), fut)
            .await
            .map_err(|_| ConsulError::Timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn deadline() -> Deadline {
        Deadline::after(Duration::from_secs(5))
    }

    #[test]
    fn test_base_url_normalized() {
        let client = ConsulClient::new("http://consul.internal:8500/prefix", None).unwrap();
        assert_eq!(client.base_url().as_str(), "http://consul.internal:8500/prefix/");
        assert_eq!(
            client.endpoint("v1/agent/services").unwrap().as_str(),
            "http://consul.internal:8500/prefix/v1/agent/services"
        );
    }

    #[test]
    fn test_invalid_address() {
        assert!(matches!(
            ConsulClient::new("not a url", None),
            Err(ConsulError::InvalidAddress(_))
        ));
    }

    #[tokio::test]
    async fn test_list_services() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/agent/services"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "users-1": {
                    "ID": "users-1", "Service": "users-service",
                    "Address": "10.0.0.2", "Port": 4001, "Tags": null
                },
                "auth-1": {
                    "ID": "auth-1", "Service": "auth-service",
                    "Address": "10.0.0.5", "Port": 4000, "Tags": ["v1"]
                },
                "auth-0": {
                    "ID": "auth-0", "Service": "auth-service",
                    "Address": "", "Port": 4002
                }
            })))
            .mount(&server)
            .await;

        let client = ConsulClient::new(&server.uri(), None).unwrap();
        let services = client.list_services(deadline()).await.unwrap();

        let ids: Vec<&str> = services.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["auth-0", "auth-1", "users-1"]);
        assert_eq!(services[0].address, Address::new("127.0.0.1", 4002));
        assert_eq!(services[1].address, Address::new("10.0.0.5", 4000));
        assert_eq!(services[1].tags, vec!["v1".to_string()]);
        assert!(services[2].tags.is_empty());
    }

    #[tokio::test]
    async fn test_token_header_sent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/agent/services"))
            .and(header("X-Consul-Token", "secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let client = ConsulClient::new(&server.uri(), Some("secret".to_string())).unwrap();
        let services = client.list_services(deadline()).await.unwrap();
        assert!(services.is_empty());
    }

    #[tokio::test]
    async fn test_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/agent/services"))
            .respond_with(ResponseTemplate::new(403).set_body_string("ACL not found"))
            .mount(&server)
            .await;

        let client = ConsulClient::new(&server.uri(), None).unwrap();
        let err = client.list_services(deadline()).await.unwrap_err();
        assert!(matches!(err, ConsulError::Status { status: 403, ref body } if body == "ACL not found"));
        assert!(matches!(GatewayError::from(err), GatewayError::RegistryUnavailable(_)));
    }

    #[tokio::test]
    async fn test_deadline_exceeded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/agent/services"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({}))
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let client = ConsulClient::new(&server.uri(), None).unwrap();
        let err = client
            .list_services(Deadline::after(Duration::from_millis(100)))
            .await
            .unwrap_err();
        assert!(matches!(err, ConsulError::Timeout));
        assert!(matches!(GatewayError::from(err), GatewayError::RegistryTimeout));
    }

    #[tokio::test]
    async fn test_register_and_deregister() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/v1/agent/service/register"))
            .and(body_json(json!({
                "ID": "auth-1",
                "Name": "auth-service",
                "Address": "10.0.0.5",
                "Port": 4000,
                "Tags": ["v1"]
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/v1/agent/service/deregister/auth-1"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = ConsulClient::new(&server.uri(), None).unwrap();
        let mut registration =
            ServiceRegistration::new("auth-1", "auth-service", Address::new("10.0.0.5", 4000));
        registration.tags.push("v1".to_string());

        client.register(&registration, deadline()).await.unwrap();
        client.deregister("auth-1", deadline()).await.unwrap();
    }

    #[tokio::test]
    async fn test_unreachable_agent() {
        // Bind then drop to get a port with no listener
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let client = ConsulClient::new(&format!("http://127.0.0.1:{}", port), None).unwrap();
        let err = client.list_services(deadline()).await.unwrap_err();
        let err = GatewayError::from(err);
        assert!(matches!(err, GatewayError::RegistryUnavailable(_)), "got {:?}", err);
        assert_eq!(err.status_code(), 502);
    }
}
