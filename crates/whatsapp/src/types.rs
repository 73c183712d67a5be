use serde::{Deserialize, Serialize};
use std::fmt;

pub const DEFAULT_USER_SERVER: &str = "s.whatsapp.net";

/// Recipient identifier, `user@server`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Jid {
    pub user: String,
    pub server: String,
}

impl Jid {
    pub fn new(user: impl Into<String>, server: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            server: server.into(),
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let (user, server) = raw.split_once('@')?;
        // Device suffixes ("123:4@s.whatsapp.net") belong to the session, not the account.
        let user = user.split(':').next().unwrap_or(user);
        if user.is_empty() || server.is_empty() {
            return None;
        }
        Some(Self::new(user, server))
    }
}

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.user, self.server)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Audio,
    Document,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Audio => "audio",
            MediaKind::Document => "document",
        }
    }

    pub fn default_mimetype(&self) -> &'static str {
        match self {
            MediaKind::Image => "image/jpeg",
            MediaKind::Audio => "audio/ogg",
            MediaKind::Document => "application/octet-stream",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaMessage {
    pub kind: MediaKind,
    pub url: String,
    pub caption: Option<String>,
    pub filename: Option<String>,
    pub mimetype: Option<String>,
}

impl MediaMessage {
    pub fn new(kind: MediaKind, url: impl Into<String>) -> Self {
        Self {
            kind,
            url: url.into(),
            caption: None,
            filename: None,
            mimetype: None,
        }
    }

    pub fn with_caption(mut self, caption: Option<String>) -> Self {
        self.caption = caption.filter(|c| !c.is_empty());
        self
    }

    pub fn with_filename(mut self, filename: Option<String>) -> Self {
        self.filename = filename.filter(|f| !f.is_empty());
        self
    }

    pub fn with_mimetype(mut self, mimetype: Option<String>) -> Self {
        self.mimetype = mimetype.filter(|m| !m.is_empty());
        self
    }

    fn url_file_name(&self) -> Option<String> {
        let parsed = url::Url::parse(&self.url).ok()?;
        let name = parsed.path_segments()?.next_back()?;
        if name.is_empty() {
            None
        } else {
            Some(name.to_string())
        }
    }

    pub fn resolved_filename(&self) -> Option<String> {
        if self.filename.is_some() {
            return self.filename.clone();
        }
        match self.kind {
            MediaKind::Document => {
                Some(self.url_file_name().unwrap_or_else(|| "document".to_string()))
            }
            _ => None,
        }
    }

    pub fn resolved_mimetype(&self) -> String {
        if let Some(ref m) = self.mimetype {
            return m.clone();
        }
        let name = self
            .filename
            .clone()
            .or_else(|| self.url_file_name())
            .unwrap_or_default();
        let ext = name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_lowercase())
            .unwrap_or_default();
        let guessed = match ext.as_str() {
            "jpg" | "jpeg" => "image/jpeg",
            "png" => "image/png",
            "gif" => "image/gif",
            "webp" => "image/webp",
            "mp3" => "audio/mpeg",
            "ogg" | "opus" => "audio/ogg",
            "m4a" => "audio/mp4",
            "wav" => "audio/wav",
            "pdf" => "application/pdf",
            "txt" => "text/plain",
            "csv" => "text/csv",
            "zip" => "application/zip",
            "doc" => "application/msword",
            "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
            "xls" => "application/vnd.ms-excel",
            "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            _ => self.kind.default_mimetype(),
        };
        guessed.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutgoingMessage {
    Text(String),
    Media(MediaMessage),
}

impl OutgoingMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            OutgoingMessage::Text(_) => "text",
            OutgoingMessage::Media(m) => m.kind.as_str(),
        }
    }
}

/// Whether `connect` found a linked device behind the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Authenticated,
    Unauthenticated,
}

#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub from: String,
    pub push_name: Option<String>,
    pub text: Option<String>,
    pub timestamp: Option<chrono::DateTime<chrono::Utc>>,
}
