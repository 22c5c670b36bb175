//! Outbound e-mail collaborator.
//!
//! Delivery itself lives outside the session core. The default `LogMailer`
//! only logs the reset link.

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

/// Mail delivery errors.
#[derive(Debug, Error)]
pub enum MailError {
    #[error("Mail delivery failed: {0}")]
    Delivery(String),
}

/// Sends account e-mails.
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Send a password reset message carrying `token` to `to`.
    async fn send_password_reset(&self, to: &str, token: &str) -> Result<(), MailError>;
}

/// Build the reset link embedded in the e-mail.
pub fn reset_link(base_url: &str, token: &str) -> String {
    format!("{}/reset-password?token={token}", base_url.trim_end_matches('/'))
}

/// Mailer that logs the reset link instead of delivering it.
#[derive(Debug, Clone)]
pub struct LogMailer {
    base_url: String,
}

impl LogMailer {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl Mailer for LogMailer {
    async fn send_password_reset(&self, to: &str, token: &str) -> Result<(), MailError> {
        info!(to, link = %reset_link(&self.base_url, token), "password reset e-mail");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_link_joins_base_and_token() {
        assert_eq!(
            reset_link("http://localhost:3000/", "abc"),
            "http://localhost:3000/reset-password?token=abc"
        );
    }
}
