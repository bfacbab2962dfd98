use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::error::LinkError;
use crate::link::{self, LinkActor, LinkConfig, LinkHandle, Role};

/// Entry point for backend I/O from async code.
///
/// Every blocking call (connects, one-shot queries, and the rounds of every
/// persistent link opened here) waits for one of `max_in_flight` permits
/// before it is handed to tokio's blocking pool. Callers beyond that limit
/// queue on the semaphore instead of piling up threads.
#[derive(Clone)]
pub struct BackendPool {
    config: Arc<LinkConfig>,
    permits: Arc<Semaphore>,
}

impl BackendPool {
    pub fn new(config: LinkConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_in_flight.max(1)));
        Self {
            config: Arc::new(config),
            permits,
        }
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Number of blocking calls that could start right now
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// Run a one-shot request: open, send role (and payload), drain, close.
    pub async fn one_shot(&self, role: Role, payload: Option<String>) -> String {
        let _permit = match self.permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return LinkError::Worker("blocking pool closed".to_string()).to_reply(),
        };

        let config = self.config.clone();
        let joined = tokio::task::spawn_blocking(move || {
            link::one_shot(&config, role, payload.as_deref())
        })
        .await;

        match joined {
            Ok(reply) => reply,
            Err(e) => {
                warn!(%role, "one-shot backend worker failed: {}", e);
                LinkError::Worker(e.to_string()).to_reply()
            }
        }
    }

    /// Open a persistent link. Nothing is sent yet; the caller announces
    /// its role with the first exchange.
    pub async fn connect(&self) -> Result<LinkHandle, LinkError> {
        let stream = {
            let _permit = self
                .permits
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| LinkError::Worker("blocking pool closed".to_string()))?;

            let config = self.config.clone();
            tokio::task::spawn_blocking(move || link::connect(&config))
                .await
                .map_err(|e| LinkError::Worker(e.to_string()))??
        };

        let handle = LinkActor::spawn(stream, self.config.read_timeout, self.permits.clone());
        debug!(link = %handle.id(), addr = %self.config.addr, "connected to backend");
        Ok(handle)
    }
}
