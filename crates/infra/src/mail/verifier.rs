//! Startup probe of the mail relay.
//!
//! Connects (and authenticates, when credentials are configured) without
//! sending anything. The outcome is logged only; it never gates queue
//! consumption.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{error, info};

use super::MailError;

#[async_trait]
pub trait RelayProbe: Send + Sync {
    /// Human-readable relay name for logs.
    fn relay(&self) -> &str;

    /// One handshake against the relay.
    async fn probe(&self) -> Result<bool, MailError>;
}

/// Run the probe in the background. The handle yields whether it succeeded.
pub fn spawn_mail_verifier(probe: Arc<dyn RelayProbe>) -> JoinHandle<bool> {
    tokio::spawn(async move {
        match probe.probe().await {
            Ok(true) => {
                info!(relay = probe.relay(), "mail relay verified");
                true
            }
            Ok(false) => {
                error!(relay = probe.relay(), "mail relay rejected the handshake");
                false
            }
            Err(err) => {
                error!(relay = probe.relay(), error = %err, "mail relay verification failed");
                false
            }
        }
    })
}
