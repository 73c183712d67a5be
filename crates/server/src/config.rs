use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;
use whatsbridge_whatsapp::session::Session;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub gateway: GatewayConfig,
    pub whatsapp: WhatsAppConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub base_url: String,
    pub api_key: String,
    pub instance: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WhatsAppConfig {
    pub phone_number: Option<String>,
    pub use_qr: bool,
    pub session_path: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8000".to_string(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            api_key: String::new(),
            instance: "whatsbridge".to_string(),
        }
    }
}

pub fn default_config_path() -> PathBuf {
    if let Ok(path) = std::env::var("WHATSBRIDGE_CONFIG") {
        return PathBuf::from(path);
    }
    if let Some(proj_dirs) = ProjectDirs::from("com", "whatsbridge", "whatsbridge") {
        proj_dirs.config_dir().join("config.toml")
    } else {
        PathBuf::from("config/default.toml")
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: Config =
            toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
        Ok(config)
    }

    /// File if present, defaults otherwise; environment variables win over both.
    pub fn load_or_default(path: &Path) -> Self {
        let mut config = if path.exists() {
            Self::load(path).unwrap_or_else(|e| {
                warn!("Ignoring config file: {:#}", e);
                Self::default()
            })
        } else {
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok());
        config
    }

    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("WHATSBRIDGE_BIND") {
            self.server.bind_addr = v;
        }
        if let Some(v) = var("WHATSAPP_GATEWAY_URL") {
            self.gateway.base_url = v;
        }
        if let Some(v) = var("WHATSAPP_GATEWAY_KEY") {
            self.gateway.api_key = v;
        }
        if let Some(v) = var("WHATSAPP_INSTANCE") {
            self.gateway.instance = v;
        }
        if let Some(v) = var("WHATSAPP_PHONE") {
            let v = v.trim().to_string();
            self.whatsapp.phone_number = (!v.is_empty()).then_some(v);
        }
        if let Some(v) = var("WHATSAPP_USE_QR") {
            self.whatsapp.use_qr = parse_flag(&v);
        }
        if let Some(v) = var("WHATSAPP_SESSION_PATH") {
            self.whatsapp.session_path = Some(PathBuf::from(v));
        }
    }

    pub fn session_path(&self) -> Result<PathBuf> {
        match &self.whatsapp.session_path {
            Some(path) => Ok(path.clone()),
            None => Session::default_path(),
        }
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
