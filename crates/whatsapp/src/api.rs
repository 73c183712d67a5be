use crate::client::MessagingClient;
use crate::error::{ClientError, ClientResult};
use crate::jid::normalize_phone;
use crate::types::{Jid, MediaKind, OutgoingMessage, SessionState};
use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, Method, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

const DEFAULT_RETRY_AFTER_SECS: u64 = 60;
const INTEGRATION: &str = "WHATSAPP-BAILEYS";

/// Where the gateway lives and which of its instances is ours.
#[derive(Debug, Clone)]
pub struct GatewayEndpoint {
    pub base_url: Url,
    pub api_key: String,
    pub instance: String,
}

impl GatewayEndpoint {
    pub fn new(base_url: &str, api_key: &str, instance: &str) -> ClientResult<Self> {
        let mut base_url = Url::parse(base_url)
            .map_err(|e| ClientError::Validation(format!("gateway url '{}': {}", base_url, e)))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self {
            base_url,
            api_key: api_key.to_string(),
            instance: instance.to_string(),
        })
    }

    pub fn http_url(&self, path: &str) -> ClientResult<Url> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| ClientError::Validation(format!("gateway path '{}': {}", path, e)))
    }

    pub fn ws_url(&self) -> ClientResult<Url> {
        let mut url = self.http_url(&format!("ws/{}", self.instance))?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme)
            .map_err(|_| ClientError::Validation(format!("cannot derive websocket url from {}", self.base_url)))?;
        Ok(url)
    }
}

struct GatewayResponse {
    status: StatusCode,
    retry_after: Option<u64>,
    data: Value,
}

impl GatewayResponse {
    fn into_result(self) -> ClientResult<Value> {
        if self.status.is_success() {
            Ok(self.data)
        } else {
            Err(error_for_status(self.status, self.retry_after, &self.data))
        }
    }
}

/// `MessagingClient` backed by a REST gateway that owns the protocol session.
#[derive(Clone)]
pub struct GatewayApi {
    client: Client,
    endpoint: GatewayEndpoint,
}

impl GatewayApi {
    pub fn new(endpoint: GatewayEndpoint) -> Self {
        let client = Client::builder()
            .user_agent("whatsbridge/0.1")
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client, endpoint }
    }

    pub fn endpoint(&self) -> &GatewayEndpoint {
        &self.endpoint
    }

    async fn call_raw(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<Value>,
    ) -> ClientResult<GatewayResponse> {
        let url = self.endpoint.http_url(path)?;
        debug!(%method, %url, "Gateway request");

        let mut request = self
            .client
            .request(method, url)
            .header("apikey", &self.endpoint.api_key);
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ClientError::Timeout(e.to_string())
            } else {
                ClientError::Network(e)
            }
        })?;

        let status = response.status();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok());
        let text = response.text().await?;
        let data = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };

        Ok(GatewayResponse {
            status,
            retry_after,
            data,
        })
    }

    async fn call(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<Value>,
    ) -> ClientResult<Value> {
        self.call_raw(method, path, query, body).await?.into_result()
    }

    async fn create_instance(&self) -> ClientResult<()> {
        info!(instance = %self.endpoint.instance, "Creating gateway instance");
        self.call(
            Method::POST,
            "instance/create",
            &[],
            Some(json!({
                "instanceName": self.endpoint.instance,
                "integration": INTEGRATION,
                "qrcode": false,
            })),
        )
        .await?;
        Ok(())
    }

    async fn connection_state(&self) -> ClientResult<Option<String>> {
        let response = self
            .call_raw(
                Method::GET,
                &format!("instance/connectionState/{}", self.endpoint.instance),
                &[],
                None,
            )
            .await?;
        if response.status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let data = response.into_result()?;
        let state = data
            .pointer("/instance/state")
            .or_else(|| data.get("state"))
            .and_then(|v| v.as_str())
            .unwrap_or("close")
            .to_string();
        Ok(Some(state))
    }
}

#[async_trait]
impl MessagingClient for GatewayApi {
    async fn connect(&self) -> ClientResult<SessionState> {
        match self.connection_state().await? {
            None => {
                self.create_instance().await?;
                Ok(SessionState::Unauthenticated)
            }
            Some(state) if state == "open" => Ok(SessionState::Authenticated),
            Some(state) => {
                debug!(%state, "Gateway instance exists but is not linked");
                Ok(SessionState::Unauthenticated)
            }
        }
    }

    async fn request_pairing_code(&self, phone: &str) -> ClientResult<String> {
        let number = normalize_phone(phone)?;
        let data = self
            .call(
                Method::GET,
                &format!("instance/connect/{}", self.endpoint.instance),
                &[("number", number.as_str())],
                None,
            )
            .await?;

        data.get("pairingCode")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(String::from)
            .ok_or_else(|| ClientError::Api(format!("No pairing code in response: {}", gateway_message(&data))))
    }

    async fn request_qr_code(&self) -> ClientResult<String> {
        let data = self
            .call(
                Method::GET,
                &format!("instance/connect/{}", self.endpoint.instance),
                &[],
                None,
            )
            .await?;

        data.get("code")
            .or_else(|| data.pointer("/qrcode/code"))
            .or_else(|| data.get("base64"))
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(String::from)
            .ok_or_else(|| ClientError::Api(format!("No QR code in response: {}", gateway_message(&data))))
    }

    async fn send(&self, to: &Jid, message: &OutgoingMessage) -> ClientResult<String> {
        let instance = &self.endpoint.instance;
        let (path, body) = match message {
            OutgoingMessage::Text(text) => (
                format!("message/sendText/{}", instance),
                json!({ "number": to.user, "text": text }),
            ),
            OutgoingMessage::Media(media) if media.kind == MediaKind::Audio => (
                format!("message/sendWhatsAppAudio/{}", instance),
                json!({ "number": to.user, "audio": media.url }),
            ),
            OutgoingMessage::Media(media) => {
                let mut body = json!({
                    "number": to.user,
                    "mediatype": media.kind.as_str(),
                    "mimetype": media.resolved_mimetype(),
                    "media": media.url,
                });
                if let Some(ref caption) = media.caption {
                    body["caption"] = json!(caption);
                }
                if let Some(file_name) = media.resolved_filename() {
                    body["fileName"] = json!(file_name);
                }
                (format!("message/sendMedia/{}", instance), body)
            }
        };

        let data = self.call(Method::POST, &path, &[], Some(body)).await?;
        let id = data
            .pointer("/key/id")
            .and_then(|v| v.as_str())
            .map(String::from)
            .unwrap_or_default();
        if id.is_empty() {
            debug!(to = %to, "Gateway accepted message without returning an id");
        }
        Ok(id)
    }

    async fn is_connected(&self) -> ClientResult<bool> {
        Ok(self.connection_state().await?.as_deref() == Some("open"))
    }
}

fn error_for_status(status: StatusCode, retry_after: Option<u64>, data: &Value) -> ClientError {
    let msg = gateway_message(data);
    match status.as_u16() {
        429 => ClientError::RateLimited {
            retry_after: retry_after.unwrap_or(DEFAULT_RETRY_AFTER_SECS),
        },
        401 | 403 => ClientError::Auth(msg),
        408 | 504 => ClientError::Timeout(msg),
        400 | 422 => ClientError::Validation(msg),
        code => ClientError::Api(format!("{} {}", code, msg)),
    }
}

/// Gateways nest the human readable part differently depending on the route.
fn gateway_message(data: &Value) -> String {
    fn text(v: &Value) -> Option<String> {
        match v {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Array(items) => {
                let parts: Vec<String> = items.iter().filter_map(text).collect();
                if parts.is_empty() {
                    None
                } else {
                    Some(parts.join("; "))
                }
            }
            _ => None,
        }
    }

    data.pointer("/response/message")
        .and_then(text)
        .or_else(|| data.get("message").and_then(text))
        .or_else(|| data.get("error").and_then(text))
        .or_else(|| text(data))
        .unwrap_or_else(|| data.to_string())
}
