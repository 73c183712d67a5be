use crate::status::{StatusStore, StatusUpdate};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use whatsbridge_whatsapp::session::Session;
use whatsbridge_whatsapp::socket::WhatsAppEvent;
use whatsbridge_whatsapp::{ClientError, MessagingClient, SessionState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthMethod {
    #[default]
    PairingCode,
    QrCode,
}

#[derive(Debug, Clone, Default)]
pub struct SupervisorConfig {
    pub phone_number: Option<String>,
    pub auth: AuthMethod,
}

/// Drives the session from startup to linked, then keeps the status record in step
/// with what the client reports.
pub struct Supervisor {
    client: Arc<dyn MessagingClient>,
    status: StatusStore,
    config: SupervisorConfig,
    session: Option<(Session, PathBuf)>,
}

impl Supervisor {
    pub fn new(client: Arc<dyn MessagingClient>, status: StatusStore, config: SupervisorConfig) -> Self {
        Self {
            client,
            status,
            config,
            session: None,
        }
    }

    /// Keep the session file at `path` in step with pair and logout events.
    pub fn with_session(mut self, session: Session, path: PathBuf) -> Self {
        self.session = Some((session, path));
        self
    }

    pub fn spawn(
        self,
        events: mpsc::UnboundedReceiver<WhatsAppEvent>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(self.run(events, shutdown))
    }

    pub async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<WhatsAppEvent>,
        shutdown: CancellationToken,
    ) {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = self.start() => {}
        }

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => {
                        warn!("Client event stream ended");
                        break;
                    }
                },
            }
        }
    }

    /// Runs the one-shot startup sequence: connect, then pairing code or QR code.
    /// Failures end up in the status record; there is no retry beyond the single
    /// pairing → QR fallback.
    pub async fn start(&self) {
        self.status.apply(StatusUpdate::SupervisorStarted);
        info!("Opening WhatsApp session");

        match self.client.connect().await {
            Ok(SessionState::Authenticated) => {
                // An open session emits no further connection.update, so this is the
                // only place the record learns about it.
                info!("Session already linked and open");
                self.status.apply(StatusUpdate::Connected);
            }
            Ok(SessionState::Unauthenticated) => self.authenticate().await,
            Err(e) => self.fail(&e),
        }
    }

    async fn authenticate(&self) {
        let phone = match (self.config.auth, self.config.phone_number.as_deref()) {
            (AuthMethod::QrCode, _) => return self.present_qr().await,
            (AuthMethod::PairingCode, Some(phone)) if !phone.trim().is_empty() => phone,
            (AuthMethod::PairingCode, _) => {
                warn!("No phone number configured for pairing, using QR code instead");
                return self.present_qr().await;
            }
        };

        match self.client.request_pairing_code(phone).await {
            Ok(code) => {
                info!(%code, "Pairing code issued");
                info!("Enter this code in WhatsApp → Linked Devices → Link with phone number");
                self.status.apply(StatusUpdate::PairingCodeIssued(code));
            }
            Err(e) if e.is_rate_limited() => {
                warn!("Pairing code request was rate limited ({}), falling back to QR code", e);
                self.present_qr().await;
            }
            Err(e) => self.fail(&e),
        }
    }

    async fn present_qr(&self) {
        match self.client.request_qr_code().await {
            Ok(code) => {
                info!(qr = %code, "Scan this QR code in WhatsApp → Linked Devices");
                self.status.apply(StatusUpdate::QrCodeIssued(code));
            }
            Err(e) => self.fail(&e),
        }
    }

    fn fail(&self, e: &ClientError) {
        warn!(
            retryable = e.is_retryable(),
            hint = e.user_message(),
            "Error connecting WhatsApp client: {}",
            e
        );
        self.status.apply(StatusUpdate::Failed(e.to_string()));
    }

    pub fn handle_event(&mut self, event: WhatsAppEvent) {
        match event {
            WhatsAppEvent::Connected => {
                info!("Connection established, the bridge is online");
                self.status.apply(StatusUpdate::Connected);
            }
            WhatsAppEvent::PairStatus { user } => {
                if !user.is_empty() {
                    info!("Logged in as: {}", user);
                    self.update_session(|s| s.record_pairing(&user));
                }
                self.status.apply(StatusUpdate::PairStatus { user });
            }
            WhatsAppEvent::QrCode { code } => {
                // Gateways refresh the QR payload periodically; only follow it while
                // we are actually showing one.
                if self.status.snapshot().qr_code.is_some() {
                    info!(qr = %code, "QR code refreshed");
                    self.status.apply(StatusUpdate::QrCodeIssued(code));
                }
            }
            WhatsAppEvent::LoggedOut { reason } => {
                warn!(reason = reason.as_deref().unwrap_or("unknown"), "Session logged out");
                self.update_session(Session::forget_pairing);
                self.status.apply(StatusUpdate::LoggedOut { reason });
            }
            WhatsAppEvent::Disconnected => {
                warn!("Connection to WhatsApp lost");
                self.status.apply(StatusUpdate::ConnectionLost);
            }
            WhatsAppEvent::Message(message) => {
                info!(
                    from = %message.from,
                    name = message.push_name.as_deref().unwrap_or(""),
                    text = message.text.as_deref().unwrap_or(""),
                    "New message"
                );
            }
        }
    }

    fn update_session(&mut self, change: impl FnOnce(&mut Session)) {
        if let Some((ref mut session, ref path)) = self.session {
            change(session);
            if let Err(e) = session.save(path) {
                warn!("Failed to save session to {}: {}", path.display(), e);
            }
        }
    }
}
