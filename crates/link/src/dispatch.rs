use crate::status::StatusStore;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use whatsbridge_whatsapp::jid::build_jid;
use whatsbridge_whatsapp::{ClientError, MessagingClient, OutgoingMessage};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("WhatsApp bot is not connected. Please wait for connection or scan QR code.")]
    NotConnected,

    #[error("{0}")]
    InvalidRecipient(ClientError),

    #[error("Failed to send message: {0}")]
    Send(ClientError),
}

impl DispatchError {
    /// The underlying reason without the request-level prefix, as reported per
    /// target in bulk results.
    pub fn reason(&self) -> String {
        match self {
            DispatchError::NotConnected => self.to_string(),
            DispatchError::InvalidRecipient(e) | DispatchError::Send(e) => e.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SendReceipt {
    pub phone_number: String,
    pub message_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BulkStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BulkResult {
    pub phone_number: String,
    pub status: BulkStatus,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BulkReport {
    pub total: usize,
    pub results: Vec<BulkResult>,
}

/// Forwards sends to the client, gated on the shared connection status.
#[derive(Clone)]
pub struct Dispatcher {
    client: Arc<dyn MessagingClient>,
    status: StatusStore,
}

impl Dispatcher {
    pub fn new(client: Arc<dyn MessagingClient>, status: StatusStore) -> Self {
        Self { client, status }
    }

    pub async fn send(
        &self,
        phone_number: &str,
        message: &OutgoingMessage,
    ) -> Result<SendReceipt, DispatchError> {
        if !self.status.is_connected() {
            return Err(DispatchError::NotConnected);
        }

        let jid = build_jid(phone_number).map_err(DispatchError::InvalidRecipient)?;
        let message_id = self.client.send(&jid, message).await.map_err(|e| {
            warn!(to = %jid, kind = message.kind(), "Send failed: {}", e);
            DispatchError::Send(e)
        })?;

        info!(to = %jid, kind = message.kind(), "Message sent");
        Ok(SendReceipt {
            phone_number: phone_number.to_string(),
            message_id,
        })
    }

    /// Sends `text` to every number in order. One entry per input number, failures
    /// included; nothing short-circuits.
    pub async fn send_bulk(&self, phone_numbers: &[String], text: &str) -> BulkReport {
        let message = OutgoingMessage::Text(text.to_string());
        let mut results = Vec::with_capacity(phone_numbers.len());

        for phone in phone_numbers {
            let result = match self.send(phone, &message).await {
                Ok(_) => BulkResult {
                    phone_number: phone.clone(),
                    status: BulkStatus::Success,
                    message: "Message sent".to_string(),
                },
                Err(e) => BulkResult {
                    phone_number: phone.clone(),
                    status: BulkStatus::Error,
                    message: e.reason(),
                },
            };
            results.push(result);
        }

        let failed = results
            .iter()
            .filter(|r| r.status == BulkStatus::Error)
            .count();
        info!(total = results.len(), failed, "Bulk send finished");

        BulkReport {
            total: results.len(),
            results,
        }
    }
}
