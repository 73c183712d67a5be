use crate::api::GatewayEndpoint;
use crate::types::InboundMessage;
use anyhow::{anyhow, Result};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message as WsMessage};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// What the session reports asynchronously.
#[derive(Debug, Clone)]
pub enum WhatsAppEvent {
    Connected,
    /// A device finished linking. `user` is empty when the gateway reports a pair
    /// attempt that did not produce an account.
    PairStatus { user: String },
    QrCode { code: String },
    LoggedOut { reason: Option<String> },
    Disconnected,
    Message(InboundMessage),
}

/// Streams gateway events for one instance into `event_tx`.
pub struct EventSocket {
    endpoint: GatewayEndpoint,
    event_tx: mpsc::UnboundedSender<WhatsAppEvent>,
    read_timeout: Duration,
}

const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(60);

impl EventSocket {
    pub fn new(endpoint: GatewayEndpoint, event_tx: mpsc::UnboundedSender<WhatsAppEvent>) -> Self {
        Self {
            endpoint,
            event_tx,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }

    /// After one silent window a ping goes out; a second silent window drops the
    /// connection.
    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    pub async fn run(self, shutdown: CancellationToken) {
        let mut backoff = Duration::from_secs(1);
        let max_backoff = Duration::from_secs(30);

        loop {
            let outcome = tokio::select! {
                _ = shutdown.cancelled() => break,
                outcome = self.connect_and_listen() => outcome,
            };

            if self.event_tx.is_closed() {
                debug!("Event receiver dropped, stopping event socket");
                break;
            }

            match outcome {
                Ok(()) => {
                    info!("Gateway event stream closed gracefully");
                    backoff = Duration::from_secs(1);
                }
                Err(e) => {
                    error!("Gateway event stream error: {}. Reconnecting in {:?}", e, backoff);
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = sleep(backoff) => {}
            }
            backoff = std::cmp::min(backoff * 2, max_backoff);
        }

        info!("Gateway event socket stopped");
    }

    async fn connect_and_listen(&self) -> Result<()> {
        let url = self.endpoint.ws_url()?;
        info!("Connecting to gateway events: {}", url);

        let mut request = url.as_str().into_client_request()?;
        request
            .headers_mut()
            .insert("apikey", self.endpoint.api_key.parse()?);

        let (ws_stream, _) = connect_async(request).await?;
        info!("Gateway websocket connected");

        let (mut write, mut read) = ws_stream.split();
        let mut ping_sent = false;

        loop {
            let frame = timeout(self.read_timeout, read.next()).await;
            if matches!(frame, Ok(Some(Ok(_)))) {
                ping_sent = false;
            }
            match frame {
                Ok(Some(Ok(WsMessage::Text(text)))) => {
                    debug!("Received: {}", text.as_str());
                    match parse_event(&text) {
                        Ok(Some(event)) => {
                            if self.event_tx.send(event).is_err() {
                                return Ok(());
                            }
                        }
                        Ok(None) => {}
                        Err(e) => warn!("Error handling gateway frame: {}", e),
                    }
                }
                Ok(Some(Ok(WsMessage::Ping(payload)))) => {
                    write.send(WsMessage::Pong(payload)).await?;
                }
                Ok(Some(Ok(WsMessage::Close(_)))) => {
                    info!("Gateway websocket closed by server");
                    break;
                }
                Ok(Some(Err(e))) => {
                    return Err(anyhow!("WebSocket error: {}", e));
                }
                Ok(None) => {
                    info!("Gateway websocket stream ended");
                    break;
                }
                Err(_) if ping_sent => {
                    return Err(anyhow!(
                        "No traffic from gateway for {:?}, assuming the connection is dead",
                        self.read_timeout * 2
                    ));
                }
                Err(_) => {
                    debug!("Gateway quiet, sending ping");
                    write.send(WsMessage::Ping(Default::default())).await?;
                    ping_sent = true;
                }
                _ => {}
            }
        }

        Ok(())
    }
}

/// Decodes one `{event, data}` frame. Frames for events the bridge does not track
/// yield `Ok(None)`.
pub fn parse_event(text: &str) -> Result<Option<WhatsAppEvent>> {
    let frame: Value = serde_json::from_str(text)?;
    let name = frame
        .get("event")
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow!("No event name"))?
        .to_lowercase()
        .replace('_', ".");
    let empty = Value::Null;
    let data = frame.get("data").unwrap_or(&empty);

    let event = match name.as_str() {
        "connection.update" => {
            let state = data.get("state").and_then(|v| v.as_str()).unwrap_or("");
            match state {
                "open" => Some(WhatsAppEvent::Connected),
                "close" => {
                    let reason = data.get("statusReason").and_then(|v| v.as_u64());
                    // 401 from the protocol side means the linked device was removed.
                    if reason == Some(401) {
                        Some(WhatsAppEvent::LoggedOut {
                            reason: Some("device unlinked".to_string()),
                        })
                    } else {
                        Some(WhatsAppEvent::Disconnected)
                    }
                }
                _ => None,
            }
        }
        "pair.status" | "pair.success" => {
            let user = data
                .pointer("/id/user")
                .or_else(|| data.get("wuid"))
                .and_then(|v| v.as_str())
                .map(|raw| {
                    crate::types::Jid::parse(raw)
                        .map(|jid| jid.user)
                        .unwrap_or_else(|| raw.to_string())
                })
                .unwrap_or_default();
            Some(WhatsAppEvent::PairStatus { user })
        }
        "qrcode.updated" => data
            .pointer("/qrcode/code")
            .or_else(|| data.get("code"))
            .and_then(|v| v.as_str())
            .map(|code| WhatsAppEvent::QrCode {
                code: code.to_string(),
            }),
        "logout.instance" => Some(WhatsAppEvent::LoggedOut {
            reason: data
                .get("reason")
                .and_then(|v| v.as_str())
                .map(String::from),
        }),
        "messages.upsert" => parse_inbound(data).map(WhatsAppEvent::Message),
        _ => None,
    };

    Ok(event)
}

fn parse_inbound(data: &Value) -> Option<InboundMessage> {
    let from = data.pointer("/key/remoteJid")?.as_str()?.to_string();
    let text = data
        .pointer("/message/conversation")
        .or_else(|| data.pointer("/message/extendedTextMessage/text"))
        .and_then(|v| v.as_str())
        .map(String::from);
    let timestamp = data
        .get("messageTimestamp")
        .and_then(|v| v.as_i64())
        .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0));

    Some(InboundMessage {
        from,
        push_name: data.get("pushName").and_then(|v| v.as_str()).map(String::from),
        text,
        timestamp,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn silent_gateway() -> (GatewayEndpoint, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            // Complete the handshake, then never read or write again.
            let _ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            sleep(Duration::from_secs(30)).await;
        });
        let endpoint =
            GatewayEndpoint::new(&format!("http://{}", addr), "key", "bot").unwrap();
        (endpoint, server)
    }

    #[tokio::test]
    async fn test_half_open_socket_is_dropped() {
        let (endpoint, server) = silent_gateway().await;
        let (tx, _rx) = mpsc::unbounded_channel();
        let socket = EventSocket::new(endpoint, tx).with_read_timeout(Duration::from_millis(100));

        let outcome = timeout(Duration::from_secs(5), socket.connect_and_listen())
            .await
            .expect("listener gave up on the silent gateway");

        let err = outcome.unwrap_err();
        assert!(err.to_string().contains("No traffic from gateway"));
        server.abort();
    }

    #[test]
    fn test_connection_update_open_is_connected() {
        let event = parse_event(r#"{"event":"connection.update","data":{"state":"open"}}"#).unwrap();
        assert!(matches!(event, Some(WhatsAppEvent::Connected)));
    }

    #[test]
    fn test_connection_close_with_401_is_logout() {
        let event = parse_event(
            r#"{"event":"CONNECTION_UPDATE","data":{"state":"close","statusReason":401}}"#,
        )
        .unwrap();
        assert!(matches!(event, Some(WhatsAppEvent::LoggedOut { .. })));

        let event = parse_event(
            r#"{"event":"connection.update","data":{"state":"close","statusReason":428}}"#,
        )
        .unwrap();
        assert!(matches!(event, Some(WhatsAppEvent::Disconnected)));
    }

    #[test]
    fn test_pair_status_extracts_user() {
        let event =
            parse_event(r#"{"event":"pair.status","data":{"id":{"user":"923001234567"}}}"#).unwrap();
        match event {
            Some(WhatsAppEvent::PairStatus { user }) => assert_eq!(user, "923001234567"),
            other => panic!("unexpected event: {:?}", other),
        }

        let event = parse_event(
            r#"{"event":"pair.success","data":{"wuid":"923001234567:3@s.whatsapp.net"}}"#,
        )
        .unwrap();
        match event {
            Some(WhatsAppEvent::PairStatus { user }) => assert_eq!(user, "923001234567"),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_inbound_message_is_decoded() {
        let event = parse_event(
            r#"{"event":"messages.upsert","data":{"key":{"remoteJid":"111@s.whatsapp.net"},"pushName":"Ann","message":{"conversation":"hi"},"messageTimestamp":1730000000}}"#,
        )
        .unwrap();
        match event {
            Some(WhatsAppEvent::Message(msg)) => {
                assert_eq!(msg.from, "111@s.whatsapp.net");
                assert_eq!(msg.text.as_deref(), Some("hi"));
                assert!(msg.timestamp.is_some());
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_and_malformed_frames() {
        assert!(parse_event(r#"{"event":"presence.update","data":{}}"#)
            .unwrap()
            .is_none());
        assert!(parse_event(r#"{"data":{}}"#).is_err());
        assert!(parse_event("not json").is_err());
    }
}
