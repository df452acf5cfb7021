use std::collections::BTreeSet;

use crate::{
    accessibility::Accessibility,
    config::{Flavor, Scope, ValetConfig},
    error::ValetError,
    keychain::Keychain,
    valet::Valet,
};

/// Entries backed by secure hardware. Reads and updates block until the user
/// confirms their presence; `prompt` is the text shown in that confirmation UI.
#[derive(Debug, Clone)]
pub struct SecureEnclaveValet<K: Keychain> {
    inner: Valet<K>,
}

impl<K: Keychain> SecureEnclaveValet<K> {
    pub fn new(identifier: impl Into<String>, keychain: K) -> Result<Self, ValetError> {
        Self::from_config(
            ValetConfig::new(
                Scope::App(identifier.into()),
                Accessibility::WhenPasscodeSetThisDeviceOnly,
                Flavor::SecureEnclave,
            ),
            keychain,
        )
    }

    pub fn shared(group: impl Into<String>, keychain: K) -> Result<Self, ValetError> {
        Self::from_config(
            ValetConfig::new(
                Scope::SharedAccessGroup(group.into()),
                Accessibility::WhenPasscodeSetThisDeviceOnly,
                Flavor::SecureEnclave,
            ),
            keychain,
        )
    }

    pub fn from_config(config: ValetConfig, keychain: K) -> Result<Self, ValetError> {
        if config.flavor != Flavor::SecureEnclave {
            return Err(ValetError::invalid_configuration(format!(
                "expected secure-enclave flavor, got {:?}",
                config.flavor
            )));
        }
        Ok(Self {
            inner: Valet::from_config(config, keychain)?,
        })
    }

    pub fn config(&self) -> &ValetConfig {
        self.inner.config()
    }

    pub fn identifier(&self) -> &str {
        self.inner.identifier()
    }

    pub fn accessibility(&self) -> Accessibility {
        self.inner.accessibility()
    }

    pub fn is_shared(&self) -> bool {
        self.inner.is_shared()
    }

    /// The underlying facade, e.g. as a migration source.
    pub fn as_valet(&self) -> &Valet<K> {
        &self.inner
    }

    pub fn get(&self, key: &str, prompt: Option<&str>) -> Result<Vec<u8>, ValetError> {
        self.inner.get_with_prompt(key, prompt)
    }

    pub fn set(&self, key: &str, value: &[u8], prompt: Option<&str>) -> Result<(), ValetError> {
        self.inner.set_with_prompt(key, value, prompt)
    }

    pub fn get_string(&self, key: &str, prompt: Option<&str>) -> Result<String, ValetError> {
        self.inner.get_string_with_prompt(key, prompt)
    }

    pub fn set_string(
        &self,
        key: &str,
        value: &str,
        prompt: Option<&str>,
    ) -> Result<(), ValetError> {
        self.inner.set_with_prompt(key, value.as_bytes(), prompt)
    }

    /// Checks without prompting.
    pub fn has_key(&self, key: &str) -> Result<bool, ValetError> {
        self.inner.has_key(key)
    }

    pub fn all_keys(&self) -> Result<BTreeSet<String>, ValetError> {
        self.inner.all_keys()
    }

    pub fn remove(&self, key: &str) -> Result<(), ValetError> {
        self.inner.remove(key)
    }

    pub fn remove_all(&self) -> Result<(), ValetError> {
        self.inner.remove_all()
    }

    /// Fails on devices without a passcode. Never prompts.
    pub fn can_access_keychain(&self) -> bool {
        self.inner.can_access_keychain()
    }
}
