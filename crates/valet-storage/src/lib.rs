//! Keychain backends for the `valet-core` facades.
//! `KeyringKeychain` talks to the platform credential store and indexes its
//! accounts on disk; `EncryptedFileKeychain` seals entries with AES-GCM under a
//! key kept in the OS keyring (or a test double).

pub mod file_keychain;
pub mod key_provider;
pub mod keyring_keychain;

pub use file_keychain::EncryptedFileKeychain;
pub use key_provider::{InMemoryKeyProvider, KeyProvider, KeyringProvider};
pub use keyring_keychain::{CredentialStore, KeyringKeychain, PlatformStore};
