// src/proxy/mod.rs
mod endpoint;
mod pool;
mod proxy;

pub use endpoint::Endpoint;
pub use pool::{EndpointStatus, PoolError, ServerPool};
pub use proxy::{Proxy, ProxyError};
