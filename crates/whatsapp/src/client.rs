use crate::error::ClientResult;
use crate::types::{Jid, OutgoingMessage, SessionState};
use async_trait::async_trait;

/// Operations the bridge needs from whatever owns the WhatsApp session.
///
/// Connection progress (connected, paired, logged out) is reported out of band as
/// [`crate::socket::WhatsAppEvent`]s, not through these return values.
#[async_trait]
pub trait MessagingClient: Send + Sync {
    /// Opens the session and reports whether a linked device is already behind it.
    async fn connect(&self) -> ClientResult<SessionState>;

    /// Asks for a code to type into WhatsApp → Linked Devices → Link with phone number.
    async fn request_pairing_code(&self, phone: &str) -> ClientResult<String>;

    /// Asks for a QR payload to scan instead of a pairing code.
    async fn request_qr_code(&self) -> ClientResult<String>;

    /// Sends one message and returns the protocol message id.
    async fn send(&self, to: &Jid, message: &OutgoingMessage) -> ClientResult<String>;

    /// Asks the session itself rather than trusting cached status.
    async fn is_connected(&self) -> ClientResult<bool>;
}
