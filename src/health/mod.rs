// src/health/mod.rs
mod monitor;
mod prober;

pub use monitor::HealthMonitor;
pub use prober::{is_reachable, Prober, TcpProber, DEFAULT_DIAL_TIMEOUT};
