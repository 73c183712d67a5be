use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;

pub const INITIAL_MESSAGE: &str = "Not connected yet";

/// Where the connection lifecycle currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Connecting,
    AwaitingPairing,
    Connected,
    Failed,
    LoggedOut,
    Disconnected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub connected: bool,
    pub message: String,
    pub pairing_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qr_code: Option<String>,
    pub state: Phase,
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self {
            connected: false,
            message: INITIAL_MESSAGE.to_string(),
            pairing_code: None,
            qr_code: None,
            state: Phase::Idle,
        }
    }
}

/// Every way the status record may change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusUpdate {
    SupervisorStarted,
    PairingCodeIssued(String),
    QrCodeIssued(String),
    Connected,
    PairStatus { user: String },
    ConnectionLost,
    LoggedOut { reason: Option<String> },
    Failed(String),
    DisconnectedByUser,
}

impl ConnectionStatus {
    fn clear_codes(&mut self) {
        self.pairing_code = None;
        self.qr_code = None;
    }

    /// Applies `update` in place. Returns false when the update carried nothing to
    /// apply.
    pub fn apply(&mut self, update: StatusUpdate) -> bool {
        match update {
            StatusUpdate::SupervisorStarted => {
                self.connected = false;
                self.message = "Connecting...".to_string();
                self.clear_codes();
                self.state = Phase::Connecting;
            }
            StatusUpdate::PairingCodeIssued(code) => {
                self.connected = false;
                self.message = format!("Use pairing code: {}", code);
                self.pairing_code = Some(code);
                self.qr_code = None;
                self.state = Phase::AwaitingPairing;
            }
            StatusUpdate::QrCodeIssued(code) => {
                self.connected = false;
                self.message = "Scan the QR code to link this device".to_string();
                self.pairing_code = None;
                self.qr_code = Some(code);
                self.state = Phase::AwaitingPairing;
            }
            StatusUpdate::Connected => {
                self.connected = true;
                self.message = "Connected successfully".to_string();
                self.clear_codes();
                self.state = Phase::Connected;
            }
            StatusUpdate::PairStatus { user } => {
                if user.is_empty() {
                    return false;
                }
                self.connected = true;
                self.message = format!("Logged in as: {}", user);
                self.clear_codes();
                self.state = Phase::Connected;
            }
            StatusUpdate::ConnectionLost => {
                self.connected = false;
                self.message = "Connection lost, waiting for the session to reconnect".to_string();
                self.state = Phase::Disconnected;
            }
            StatusUpdate::LoggedOut { reason } => {
                self.connected = false;
                self.message = match reason {
                    Some(reason) if !reason.is_empty() => format!("Logged out: {}", reason),
                    _ => "Logged out".to_string(),
                };
                self.clear_codes();
                self.state = Phase::LoggedOut;
            }
            StatusUpdate::Failed(err) => {
                self.connected = false;
                self.message = format!("Connection error: {}", err);
                self.clear_codes();
                self.state = Phase::Failed;
            }
            StatusUpdate::DisconnectedByUser => {
                self.connected = false;
                self.message = "Disconnected by user".to_string();
                self.state = Phase::Disconnected;
            }
        }
        true
    }
}

/// Shared connection status. Writes are serialized through the watch sender and
/// readers always get a consistent snapshot.
#[derive(Clone)]
pub struct StatusStore {
    tx: Arc<watch::Sender<ConnectionStatus>>,
}

impl Default for StatusStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusStore {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ConnectionStatus::default());
        Self { tx: Arc::new(tx) }
    }

    pub fn snapshot(&self) -> ConnectionStatus {
        self.tx.borrow().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.tx.borrow().connected
    }

    pub fn apply(&self, update: StatusUpdate) -> bool {
        tracing::debug!(?update, "Applying status update");
        self.tx.send_if_modified(|status| status.apply(update))
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_updates() -> Vec<StatusUpdate> {
        vec![
            StatusUpdate::SupervisorStarted,
            StatusUpdate::PairingCodeIssued("ABCD-1234".to_string()),
            StatusUpdate::QrCodeIssued("2@qr".to_string()),
            StatusUpdate::Connected,
            StatusUpdate::PairStatus {
                user: "923001234567".to_string(),
            },
            StatusUpdate::PairStatus {
                user: String::new(),
            },
            StatusUpdate::ConnectionLost,
            StatusUpdate::LoggedOut { reason: None },
            StatusUpdate::Failed("boom".to_string()),
            StatusUpdate::DisconnectedByUser,
        ]
    }

    #[test]
    fn starts_not_connected() {
        let store = StatusStore::new();
        let status = store.snapshot();
        assert!(!status.connected);
        assert_eq!(status.message, "Not connected yet");
        assert_eq!(status.pairing_code, None);
        assert_eq!(status.state, Phase::Idle);
    }

    #[test]
    fn connected_always_clears_pairing_code() {
        // Every update applied on top of every reachable "awaiting code" state.
        for first in all_updates() {
            for second in all_updates() {
                let mut status = ConnectionStatus::default();
                status.apply(StatusUpdate::PairingCodeIssued("ABCD-1234".to_string()));
                status.apply(first.clone());
                status.apply(second.clone());
                if status.connected {
                    assert_eq!(status.pairing_code, None, "{:?} then {:?}", first, second);
                    assert_eq!(status.qr_code, None, "{:?} then {:?}", first, second);
                }
            }
        }
    }

    #[test]
    fn logout_clears_pairing_code() {
        let mut status = ConnectionStatus::default();
        status.apply(StatusUpdate::PairingCodeIssued("ABCD-1234".to_string()));
        status.apply(StatusUpdate::LoggedOut {
            reason: Some("device unlinked".to_string()),
        });
        assert!(!status.connected);
        assert_eq!(status.pairing_code, None);
        assert_eq!(status.message, "Logged out: device unlinked");
        assert_eq!(status.state, Phase::LoggedOut);
    }

    #[test]
    fn pair_status_with_user_connects() {
        let store = StatusStore::new();
        assert!(store.apply(StatusUpdate::PairStatus {
            user: "923001234567".to_string()
        }));
        let status = store.snapshot();
        assert!(status.connected);
        assert_eq!(status.message, "Logged in as: 923001234567");
    }

    #[test]
    fn pair_status_without_user_is_ignored() {
        let store = StatusStore::new();
        assert!(!store.apply(StatusUpdate::PairStatus {
            user: String::new()
        }));
        assert_eq!(store.snapshot(), ConnectionStatus::default());
    }

    #[test]
    fn disconnect_by_user_keeps_codes() {
        let mut status = ConnectionStatus::default();
        status.apply(StatusUpdate::PairingCodeIssued("ABCD-1234".to_string()));
        status.apply(StatusUpdate::DisconnectedByUser);
        assert_eq!(status.message, "Disconnected by user");
        assert_eq!(status.pairing_code.as_deref(), Some("ABCD-1234"));
    }

    #[test]
    fn serializes_null_pairing_code_and_hides_missing_qr() {
        let json = serde_json::to_value(ConnectionStatus::default()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "connected": false,
                "message": "Not connected yet",
                "pairing_code": null,
                "state": "idle",
            })
        );
    }

    #[tokio::test]
    async fn subscribers_see_updates() {
        let store = StatusStore::new();
        let mut rx = store.subscribe();
        store.apply(StatusUpdate::Connected);
        rx.changed().await.unwrap();
        assert!(rx.borrow().connected);
    }
}
