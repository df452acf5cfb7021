use std::path::PathBuf;

use color_eyre::Result;
use dirs::data_dir;
use tracing::debug;
use valet_core::{InMemoryKeychain, Keychain};
use valet_storage::{EncryptedFileKeychain, KeyringKeychain, KeyringProvider};

use crate::config::{Backend, Config};

const KEYRING_SERVICE: &str = "valet-cli";
const FILE_KEY_ACCOUNT: &str = "file-keychain-key";

/// Resolve the default data directory for the file backend.
pub fn default_data_dir() -> Result<PathBuf> {
    let base = data_dir().ok_or_else(|| color_eyre::eyre::eyre!("no data dir available"))?;
    Ok(base.join("valet"))
}

fn data_root(config: &Config) -> Result<PathBuf> {
    match &config.data_dir {
        Some(root) => Ok(root.clone()),
        None => default_data_dir(),
    }
}

/// Build the keychain for the selected backend.
pub fn keychain_for(backend: Backend, config: &Config) -> Result<Box<dyn Keychain>> {
    match backend {
        Backend::Keyring => {
            let index_root = data_root(config)?.join("keyring-index");
            debug!(?index_root, "using OS keyring");
            Ok(Box::new(KeyringKeychain::new(index_root)))
        }
        Backend::File => {
            let root = data_root(config)?.join("entries");
            debug!(?root, "using encrypted file keychain");
            Ok(Box::new(EncryptedFileKeychain::new(
                root,
                KeyringProvider::new(KEYRING_SERVICE, FILE_KEY_ACCOUNT),
            )))
        }
        Backend::Memory => {
            debug!("using in-memory keychain");
            Ok(Box::new(InMemoryKeychain::new()))
        }
    }
}
