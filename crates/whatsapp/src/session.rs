use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

/// What the bridge remembers about its linked account between restarts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub instance: String,
    #[serde(default)]
    pub paired_jid: Option<String>,
    #[serde(default)]
    pub paired_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(instance: &str) -> Self {
        Self {
            instance: instance.to_string(),
            paired_jid: None,
            paired_at: None,
        }
    }

    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }

        let encrypted = fs::read(path)
            .with_context(|| format!("reading session file {}", path.display()))?;
        let decrypted = Self::decrypt(&key_path(path), &encrypted)?;
        let session: Session = serde_json::from_slice(&decrypted)?;
        Ok(Some(session))
    }

    /// Loads the session for `instance`, starting fresh when the file is missing,
    /// unreadable or belongs to another instance.
    pub fn load_or_new(path: &Path, instance: &str) -> Self {
        match Self::load(path) {
            Ok(Some(session)) if session.instance == instance => session,
            Ok(Some(session)) => {
                tracing::warn!(
                    stored = %session.instance,
                    configured = %instance,
                    "Session file belongs to another instance, starting fresh"
                );
                Self::new(instance)
            }
            Ok(None) => Self::new(instance),
            Err(e) => {
                tracing::warn!("Failed to load session from {}: {}", path.display(), e);
                Self::new(instance)
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_vec(self)?;
        let encrypted = Self::encrypt(&key_path(path), &json)?;
        write_secure_file(path, &encrypted)?;
        Ok(())
    }

    pub fn record_pairing(&mut self, user: &str) {
        self.paired_jid = Some(user.to_string());
        self.paired_at = Some(Utc::now());
    }

    pub fn forget_pairing(&mut self) {
        self.paired_jid = None;
        self.paired_at = None;
    }

    pub fn is_paired(&self) -> bool {
        self.paired_jid.is_some()
    }

    pub fn default_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("com", "whatsbridge", "whatsbridge")
            .ok_or_else(|| anyhow!("Could not determine project directories"))?;
        Ok(proj_dirs.data_dir().join("session.db"))
    }

    fn get_or_create_key(key_path: &Path) -> Result<[u8; 32]> {
        if key_path.exists() {
            let key_bytes = fs::read(key_path)?;
            if key_bytes.len() == 32 {
                let mut key = [0u8; 32];
                key.copy_from_slice(&key_bytes);
                return Ok(key);
            }
        }

        let mut key = [0u8; 32];
        rand::thread_rng().fill(&mut key);
        write_secure_file(key_path, &key)?;

        Ok(key)
    }

    fn encrypt(key_path: &Path, plaintext: &[u8]) -> Result<Vec<u8>> {
        use aes_gcm::{
            aead::{Aead, KeyInit},
            Aes256Gcm, Nonce,
        };

        let key = Self::get_or_create_key(key_path)?;
        let cipher = Aes256Gcm::new(aes_gcm::aead::Key::<Aes256Gcm>::from_slice(&key));

        let mut nonce_bytes = [0u8; 12];
        rand::thread_rng().fill(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| anyhow!("Encryption failed"))?;

        let mut result = nonce_bytes.to_vec();
        result.extend_from_slice(&ciphertext);
        Ok(result)
    }

    fn decrypt(key_path: &Path, ciphertext: &[u8]) -> Result<Vec<u8>> {
        use aes_gcm::{
            aead::{Aead, KeyInit},
            Aes256Gcm, Nonce,
        };

        if ciphertext.len() < 12 {
            return Err(anyhow!("Invalid ciphertext"));
        }
        if !key_path.exists() {
            return Err(anyhow!("Session key {} is missing", key_path.display()));
        }

        let key = Self::get_or_create_key(key_path)?;
        let cipher = Aes256Gcm::new(aes_gcm::aead::Key::<Aes256Gcm>::from_slice(&key));

        let nonce = Nonce::from_slice(&ciphertext[..12]);
        let plaintext = cipher
            .decrypt(nonce, &ciphertext[12..])
            .map_err(|_| anyhow!("Decryption failed"))?;

        Ok(plaintext)
    }
}

fn key_path(session_path: &Path) -> PathBuf {
    let mut name = session_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "session".into());
    name.push(".key");
    session_path.with_file_name(name)
}

fn write_secure_file(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = file.metadata()?.permissions();
        perms.set_mode(0o600);
        fs::set_permissions(path, perms)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_session_path(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "whatsbridge-session-{}-{}",
            tag,
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&dir);
        dir.join("session.db")
    }

    #[test]
    fn test_saved_session_is_encrypted_and_loads_back() {
        let path = temp_session_path("roundtrip");
        let mut session = Session::new("bot");
        session.record_pairing("923001234567");
        session.save(&path).unwrap();

        let raw = fs::read(&path).unwrap();
        assert!(!String::from_utf8_lossy(&raw).contains("923001234567"));
        assert!(key_path(&path).exists());

        let loaded = Session::load(&path).unwrap().expect("session present");
        assert_eq!(loaded, session);
        assert!(loaded.is_paired());

        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_load_or_new_ignores_other_instances() {
        let path = temp_session_path("instance");
        let mut session = Session::new("old");
        session.record_pairing("111");
        session.save(&path).unwrap();

        let fresh = Session::load_or_new(&path, "new");
        assert_eq!(fresh.instance, "new");
        assert!(!fresh.is_paired());

        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_missing_session_loads_as_none() {
        let path = temp_session_path("missing");
        assert!(Session::load(&path).unwrap().is_none());
    }
}
