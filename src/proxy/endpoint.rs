// src/proxy/endpoint.rs
use chrono::{DateTime, Utc};
use std::fmt;
use tokio::sync::RwLock;
use url::Url;

/// One backend: a fixed address plus its liveness flag.
#[derive(Debug)]
pub struct Endpoint {
    pub url: Url,

    // Runtime state
    alive: RwLock<bool>,
    last_status_change: RwLock<Option<DateTime<Utc>>>,
}

impl Endpoint {
    /// New endpoints start alive until a probe says otherwise.
    pub fn new(url: Url) -> Self {
        Self {
            url,
            alive: RwLock::new(true),
            last_status_change: RwLock::new(None),
        }
    }

    pub async fn is_alive(&self) -> bool {
        *self.alive.read().await
    }

    /// Store the liveness flag. Returns `true` when the value flipped, in which
    /// case the flip time is recorded.
    pub async fn set_alive(&self, alive: bool) -> bool {
        let mut flag = self.alive.write().await;
        let flipped = *flag != alive;
        if flipped {
            *self.last_status_change.write().await = Some(Utc::now());
        }
        *flag = alive;
        flipped
    }

    /// When the flag last flipped. `None` means it has held since startup.
    pub async fn last_status_change(&self) -> Option<DateTime<Utc>> {
        *self.last_status_change.read().await
    }

    /// Human-readable start of the current state, for log lines.
    pub async fn state_since(&self) -> String {
        match self.last_status_change().await {
            Some(at) => at.to_rfc3339(),
            None => "startup".to_string(),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url)
    }
}
