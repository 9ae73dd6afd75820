use thiserror::Error;

pub type Result<T> = std::result::Result<T, GatewayError>;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("service '{0}' is not registered")]
    ServiceNotFound(String),

    #[error("service registry unavailable: {0}")]
    RegistryUnavailable(String),

    #[error("service registry did not answer before the deadline")]
    RegistryTimeout,

    #[error("upstream '{service}' unavailable: {reason}")]
    UpstreamUnavailable { service: String, reason: String },

    #[error("upstream '{0}' did not respond before the deadline")]
    UpstreamTimeout(String),

    #[error("no route for {0}")]
    RouteNotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("request body exceeds {0} bytes")]
    PayloadTooLarge(usize),

    #[error("request body not received before the deadline")]
    RequestTimeout,

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration parse error: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// HTTP status code reported to the caller for this error
    pub fn status_code(&self) -> u16 {
        match self {
            // Every registry failure means "cannot route": one status, told apart by kind()
            GatewayError::ServiceNotFound(_)
            | GatewayError::RegistryUnavailable(_)
            | GatewayError::RegistryTimeout
            | GatewayError::UpstreamUnavailable { .. } => 502,
            GatewayError::UpstreamTimeout(_) => 504,
            GatewayError::RouteNotFound(_) => 404,
            GatewayError::BadRequest(_) => 400,
            GatewayError::RequestTimeout => 408,
            GatewayError::PayloadTooLarge(_) => 413,
            _ => 500,
        }
    }

    /// Whether the failure happened while trying to reach the registry or a backend
    pub fn is_routing_failure(&self) -> bool {
        matches!(self.status_code(), 502 | 504)
    }

    /// Short label used for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::ServiceNotFound(_) => "not_found",
            GatewayError::RegistryUnavailable(_) => "registry_unavailable",
            GatewayError::RegistryTimeout => "registry_timeout",
            GatewayError::UpstreamUnavailable { .. } => "upstream_unavailable",
            GatewayError::UpstreamTimeout(_) => "upstream_timeout",
            GatewayError::RouteNotFound(_) => "no_route",
            GatewayError::BadRequest(_) => "bad_request",
            GatewayError::RequestTimeout => "request_timeout",
            GatewayError::PayloadTooLarge(_) => "payload_too_large",
            _ => "internal",
        }
    }
}
