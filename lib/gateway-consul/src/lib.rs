//! Consul service registry integration
pub mod client;
pub mod discovery;

pub use client::{ConsulClient, ConsulError};
pub use discovery::ConsulResolver;
