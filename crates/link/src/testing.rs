//! Scriptable in-memory `MessagingClient` for tests.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use whatsbridge_whatsapp::{
    ClientError, ClientResult, Jid, MessagingClient, OutgoingMessage, SessionState,
};

pub struct FakeClient {
    connect: Mutex<Option<ClientResult<SessionState>>>,
    pairing: Mutex<Option<ClientResult<String>>>,
    qr: Mutex<Option<ClientResult<String>>>,
    failing: Mutex<HashSet<String>>,
    live: AtomicBool,
    calls: Mutex<Vec<String>>,
}

impl Default for FakeClient {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl FakeClient {
    /// Unlinked session, pairing code `ABCD-1234`, QR payload `2@qr-payload`,
    /// every send succeeds.
    pub fn new() -> Self {
        Self {
            connect: Mutex::new(None),
            pairing: Mutex::new(None),
            qr: Mutex::new(None),
            failing: Mutex::new(HashSet::new()),
            live: AtomicBool::new(false),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_connect(self, result: ClientResult<SessionState>) -> Self {
        *lock(&self.connect) = Some(result);
        self
    }

    pub fn with_pairing(self, result: ClientResult<String>) -> Self {
        *lock(&self.pairing) = Some(result);
        self
    }

    pub fn with_qr(self, result: ClientResult<String>) -> Self {
        *lock(&self.qr) = Some(result);
        self
    }

    /// Sends to `user` fail with a gateway error.
    pub fn failing_for(self, user: &str) -> Self {
        lock(&self.failing).insert(user.to_string());
        self
    }

    pub fn set_live(&self, live: bool) {
        self.live.store(live, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    pub fn sent(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.starts_with("send:"))
            .collect()
    }

    fn record(&self, call: String) {
        lock(&self.calls).push(call);
    }
}

#[async_trait]
impl MessagingClient for FakeClient {
    async fn connect(&self) -> ClientResult<SessionState> {
        self.record("connect".to_string());
        lock(&self.connect)
            .take()
            .unwrap_or(Ok(SessionState::Unauthenticated))
    }

    async fn request_pairing_code(&self, phone: &str) -> ClientResult<String> {
        self.record(format!("pairing:{}", phone));
        lock(&self.pairing)
            .take()
            .unwrap_or_else(|| Ok("ABCD-1234".to_string()))
    }

    async fn request_qr_code(&self) -> ClientResult<String> {
        self.record("qr".to_string());
        lock(&self.qr)
            .take()
            .unwrap_or_else(|| Ok("2@qr-payload".to_string()))
    }

    async fn send(&self, to: &Jid, message: &OutgoingMessage) -> ClientResult<String> {
        self.record(format!("send:{}:{}", to.user, message.kind()));
        if lock(&self.failing).contains(&to.user) {
            return Err(ClientError::Api(format!("500 could not deliver to {}", to.user)));
        }
        Ok(format!("MSG-{}", to.user))
    }

    async fn is_connected(&self) -> ClientResult<bool> {
        self.record("is_connected".to_string());
        Ok(self.live.load(Ordering::SeqCst))
    }
}
