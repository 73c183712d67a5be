use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use whatsbridge_whatsapp::{MediaKind, MediaMessage};

pub const SERVICE_NAME: &str = "WhatsApp Bot API";

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub phone_number: String,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct SendMediaRequest {
    pub phone_number: String,
    pub url: String,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub mimetype: Option<String>,
}

impl SendMediaRequest {
    pub fn into_media(self, kind: MediaKind) -> (String, MediaMessage) {
        let media = MediaMessage::new(kind, self.url)
            .with_caption(self.caption)
            .with_filename(self.filename)
            .with_mimetype(self.mimetype);
        (self.phone_number, media)
    }
}

#[derive(Debug, Deserialize)]
pub struct SendBulkRequest {
    pub phone_numbers: Vec<String>,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct SendMessageResponse {
    pub status: &'static str,
    pub message: String,
    pub phone_number: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub message_id: String,
}

#[derive(Debug, Serialize)]
pub struct ActionResponse {
    pub status: &'static str,
    pub message: &'static str,
}

#[derive(Debug, Serialize)]
pub struct RootResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
    pub connected: bool,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub connected: bool,
}

#[derive(Debug, Serialize)]
pub struct LiveCheckResponse {
    pub connected: bool,
    pub checked_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
