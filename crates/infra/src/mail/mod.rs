//! Outbound mail: the notification handler's delivery path and the
//! startup relay probe.

pub mod smtp;
pub mod verifier;

use async_trait::async_trait;
use tracing::info;

pub use crate::jobs::payload::EmailData;
pub use smtp::{SmtpConfig, SmtpMailer};
pub use verifier::{RelayProbe, spawn_mail_verifier};

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("mail configuration error: {0}")]
    Config(String),
    #[error("invalid address '{0}'")]
    Address(String),
    #[error("failed to build message: {0}")]
    Message(String),
    #[error("smtp error: {0}")]
    Smtp(String),
}

/// Sends one email.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &EmailData) -> Result<(), MailError>;
}

/// Mailer that only logs; used when no relay is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: &EmailData) -> Result<(), MailError> {
        info!(to = %email.to, subject = %email.subject, "mail relay not configured; email logged only");
        Ok(())
    }
}
