//! Outbound SMS delivery.
//!
//! No provider is wired in yet: `SimulatedTransport` only logs what would be
//! sent. A real provider would return its message id here and advance the
//! stored message status through delivery callbacks.

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("sms provider rejected the message: {0}")]
    Rejected(String),
}

#[async_trait::async_trait]
pub trait SmsTransport: Send + Sync {
    /// Sends `body` to `to` and returns the provider message id, if any.
    async fn send(&self, to: &str, body: &str) -> Result<Option<String>, TransportError>;
}

pub struct SimulatedTransport;

#[async_trait::async_trait]
impl SmsTransport for SimulatedTransport {
    async fn send(&self, to: &str, body: &str) -> Result<Option<String>, TransportError> {
        if to.trim().is_empty() {
            return Err(TransportError::Rejected("empty recipient".into()));
        }
        tracing::info!(to, chars = body.chars().count(), "[sms simulation] outbound message");
        tracing::debug!(to, "[sms simulation] body: {body}");
        Ok(None)
    }
}
