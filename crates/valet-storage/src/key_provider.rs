use std::{
    fmt,
    sync::{Arc, Mutex},
};

use base64::{engine::general_purpose, Engine as _};
use rand::{rngs::OsRng, RngCore};
use thiserror::Error;
use tracing::debug;

use crate::keyring_keychain::is_mock;

/// 256-bit key sealing the file keychain.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyMaterial {
    /// Where the key lives, for logs. Never the key itself.
    pub id: String,
    pub bytes: [u8; 32],
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("id", &self.id)
            .field("bytes", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("keyring error: {0}")]
    Keyring(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("generation error: {0}")]
    Generation(String),
}

/// Source of the file keychain's sealing key.
pub trait KeyProvider: Send + Sync {
    /// The existing key, or a freshly generated one that is persisted first.
    fn load_or_create(&self) -> Result<KeyMaterial, KeyError>;
}

/// Keeps the sealing key in the OS keyring, base64-encoded.
#[derive(Debug, Clone)]
pub struct KeyringProvider {
    service: String,
    account: String,
}

impl KeyringProvider {
    pub fn new(service: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            account: account.into(),
        }
    }

    fn key_id(&self) -> String {
        format!("keyring:{}/{}", self.service, self.account)
    }
}

impl KeyProvider for KeyringProvider {
    fn load_or_create(&self) -> Result<KeyMaterial, KeyError> {
        let entry = keyring::Entry::new(&self.service, &self.account)
            .map_err(|e| KeyError::Keyring(e.to_string()))?;
        // A key kept only in the mock store would be lost with this entry,
        // leaving everything sealed under it unreadable.
        if is_mock(&entry) {
            return Err(KeyError::Keyring(
                "no persistent credential store on this platform".to_string(),
            ));
        }

        match entry.get_password() {
            Ok(secret) => decode_key(self.key_id(), &secret),
            Err(keyring::Error::NoEntry) => {
                debug!(id = %self.key_id(), "generating sealing key");
                let material = generate_key(self.key_id());
                entry
                    .set_password(&encode_key(&material))
                    .map_err(|e| KeyError::Keyring(e.to_string()))?;
                Ok(material)
            }
            Err(err) => Err(KeyError::Keyring(err.to_string())),
        }
    }
}

/// Process-local key for tests and throwaway stores.
#[derive(Debug, Default, Clone)]
pub struct InMemoryKeyProvider {
    inner: Arc<Mutex<Option<KeyMaterial>>>,
}

impl KeyProvider for InMemoryKeyProvider {
    fn load_or_create(&self) -> Result<KeyMaterial, KeyError> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|err| KeyError::Generation(format!("lock poisoned: {err}")))?;

        Ok(guard
            .get_or_insert_with(|| generate_key("memory".to_string()))
            .clone())
    }
}

fn generate_key(id: String) -> KeyMaterial {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    KeyMaterial { id, bytes }
}

fn encode_key(material: &KeyMaterial) -> String {
    general_purpose::STANDARD.encode(material.bytes)
}

fn decode_key(id: String, secret: &str) -> Result<KeyMaterial, KeyError> {
    let decoded = general_purpose::STANDARD
        .decode(secret.trim())
        .map_err(|e| KeyError::Decode(e.to_string()))?;

    let bytes: [u8; 32] = decoded
        .as_slice()
        .try_into()
        .map_err(|_| KeyError::Decode(format!("expected 32 bytes, got {}", decoded.len())))?;
    Ok(KeyMaterial { id, bytes })
}
