//! Core routing and service registry functionality
//!
//! This library provides:
//! - Service registrations and their network addresses
//! - The `ServiceResolver` capability and per-request deadlines
//! - An in-memory service registry
//! - The prefix routing table and path rewriting
//! - Gateway configuration

pub mod address;
pub mod config;
pub mod deadline;
pub mod error;
pub mod registry;
pub mod resolver;
pub mod route;

pub use address::{Address, ServiceRegistration};
pub use config::{GatewayConfig, LogFormat, RegistryKind, SelectionPolicy};
pub use deadline::Deadline;
pub use error::{GatewayError, Result};
pub use registry::ServiceRegistry;
pub use resolver::ServiceResolver;
pub use route::{Route, RouteMatch, RouteTable};
