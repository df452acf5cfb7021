use std::{
    fs,
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
    sync::OnceLock,
};

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, instrument, warn};
use valet_core::{query::Query, Accessibility, Keychain, OsStatus};

use crate::key_provider::{KeyMaterial, KeyProvider};

/// Keychain kept in AES-256-GCM sealed files: a directory per service
/// namespace and one JSON file per entry, so writers never rewrite each
/// other's entries. For hosts without an OS credential store; the sealing key
/// comes from a `KeyProvider` (OS keyring in production) and is loaded once
/// per handle.
///
/// Presence-protected entries are not supported.
pub struct EncryptedFileKeychain<P: KeyProvider> {
    root: PathBuf,
    key_provider: P,
    cipher: OnceLock<Aes256Gcm>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredItem {
    account: String,
    #[serde(default)]
    access_group: Option<String>,
    accessible: Accessibility,
    #[serde(default)]
    synchronizable: bool,
    nonce: String,
    ciphertext: String,
}

impl StoredItem {
    fn matches(&self, query: &Query) -> bool {
        self.accessible == query.accessible
            && self.synchronizable == query.synchronizable
            && query.account.as_ref().is_none_or(|a| *a == self.account)
            && query
                .access_group
                .as_ref()
                .is_none_or(|g| self.access_group.as_ref() == Some(g))
    }
}

impl<P: KeyProvider> EncryptedFileKeychain<P> {
    pub fn new(root: impl Into<PathBuf>, key_provider: P) -> Self {
        Self {
            root: root.into(),
            key_provider,
            cipher: OnceLock::new(),
        }
    }

    fn namespace_dir(&self, service: &str) -> PathBuf {
        self.root.join(URL_SAFE_NO_PAD.encode(service))
    }

    fn entry_path(&self, service: &str, account: &str) -> PathBuf {
        self.namespace_dir(service)
            .join(format!("{}.json", URL_SAFE_NO_PAD.encode(account)))
    }

    fn cipher(&self) -> Result<&Aes256Gcm, OsStatus> {
        if let Some(cipher) = self.cipher.get() {
            return Ok(cipher);
        }
        let material = self.key_provider.load_or_create().map_err(|err| {
            warn!(%err, "sealing key unavailable");
            OsStatus::NOT_AVAILABLE
        })?;
        let cipher = build_cipher(&material)?;
        Ok(self.cipher.get_or_init(|| cipher))
    }

    fn seal(&self, query: &Query, account: &str, data: &[u8]) -> Result<StoredItem, OsStatus> {
        let cipher = self.cipher()?;
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let aad = associated_data(&query.service, account);
        let ciphertext = cipher
            .encrypt(
                &nonce,
                Payload {
                    msg: data,
                    aad: aad.as_bytes(),
                },
            )
            .map_err(|err| {
                warn!(%err, "encrypt failed");
                OsStatus::NOT_AVAILABLE
            })?;

        Ok(StoredItem {
            account: account.to_string(),
            access_group: query.access_group.clone(),
            accessible: query.accessible,
            synchronizable: query.synchronizable,
            nonce: URL_SAFE_NO_PAD.encode(nonce.as_slice()),
            ciphertext: URL_SAFE_NO_PAD.encode(ciphertext),
        })
    }

    fn open(&self, service: &str, item: &StoredItem) -> Result<Vec<u8>, OsStatus> {
        let cipher = self.cipher()?;
        let nonce_bytes = URL_SAFE_NO_PAD
            .decode(&item.nonce)
            .map_err(|_| OsStatus::DECODE)?;
        if nonce_bytes.len() != 12 {
            return Err(OsStatus::DECODE);
        }
        let ciphertext = URL_SAFE_NO_PAD
            .decode(&item.ciphertext)
            .map_err(|_| OsStatus::DECODE)?;
        let aad = associated_data(service, &item.account);

        cipher
            .decrypt(
                Nonce::from_slice(&nonce_bytes),
                Payload {
                    msg: &ciphertext,
                    aad: aad.as_bytes(),
                },
            )
            .map_err(|_| OsStatus::DECODE)
    }

    /// The entry addressed by the query's account, if its attributes match.
    fn find_one(&self, query: &Query) -> Result<(PathBuf, StoredItem), OsStatus> {
        let account = query.account.as_deref().ok_or(OsStatus::PARAM)?;
        let path = self.entry_path(&query.service, account);
        match read_item(&path)? {
            Some(item) if item.matches(query) => Ok((path, item)),
            _ => Err(OsStatus::ITEM_NOT_FOUND),
        }
    }

    /// Every entry of the query's namespace whose attributes match.
    fn find_all(&self, query: &Query) -> Result<Vec<(PathBuf, StoredItem)>, OsStatus> {
        if query.account.is_some() {
            return self.find_one(query).map(|found| vec![found]);
        }

        let entries = match fs::read_dir(self.namespace_dir(&query.service)) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(io_status(err)),
        };

        let mut found = Vec::new();
        for entry in entries {
            let path = entry.map_err(io_status)?.path();
            // Skips in-flight temp files.
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            if let Some(item) = read_item(&path)? {
                if item.matches(query) {
                    found.push((path, item));
                }
            }
        }
        Ok(found)
    }
}

impl<P: KeyProvider> Keychain for EncryptedFileKeychain<P> {
    #[instrument(skip_all, fields(service = %query.service))]
    fn add(&self, query: &Query, data: &[u8]) -> Result<(), OsStatus> {
        ensure_supported(query)?;
        let account = query.account.as_deref().ok_or(OsStatus::PARAM)?;
        let sealed = self.seal(query, account, data)?;
        write_item(&self.entry_path(&query.service, account), &sealed, false)
    }

    #[instrument(skip_all, fields(service = %query.service))]
    fn update(&self, query: &Query, data: &[u8]) -> Result<(), OsStatus> {
        ensure_supported(query)?;
        let (path, mut item) = self.find_one(query)?;
        let sealed = self.seal(query, &item.account, data)?;
        // Keep the entry's original group and flags; only the value changes.
        item.nonce = sealed.nonce;
        item.ciphertext = sealed.ciphertext;
        write_item(&path, &item, true)
    }

    #[instrument(skip_all, fields(service = %query.service))]
    fn copy_data(&self, query: &Query) -> Result<Vec<u8>, OsStatus> {
        ensure_supported(query)?;
        let (_, item) = self.find_one(query)?;
        self.open(&query.service, &item)
    }

    #[instrument(skip_all, fields(service = %query.service))]
    fn copy_accounts(&self, query: &Query) -> Result<Vec<String>, OsStatus> {
        ensure_supported(query)?;
        let accounts: Vec<String> = self
            .find_all(query)?
            .into_iter()
            .map(|(_, item)| item.account)
            .collect();
        if accounts.is_empty() {
            return Err(OsStatus::ITEM_NOT_FOUND);
        }
        Ok(accounts)
    }

    fn contains(&self, query: &Query) -> Result<(), OsStatus> {
        ensure_supported(query)?;
        self.find_one(query).map(|_| ())
    }

    #[instrument(skip_all, fields(service = %query.service))]
    fn delete(&self, query: &Query) -> Result<(), OsStatus> {
        ensure_supported(query)?;
        let mut deleted = 0;
        for (path, _) in self.find_all(query)? {
            match fs::remove_file(&path) {
                Ok(()) => deleted += 1,
                // Removed concurrently by another handle.
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => return Err(io_status(err)),
            }
        }
        if deleted == 0 {
            return Err(OsStatus::ITEM_NOT_FOUND);
        }
        debug!(count = deleted, "deleted entry files");
        Ok(())
    }
}

fn ensure_supported(query: &Query) -> Result<(), OsStatus> {
    if query.requires_user_presence() {
        return Err(OsStatus::UNIMPLEMENTED);
    }
    Ok(())
}

fn associated_data(service: &str, account: &str) -> String {
    format!("{service}\n{account}")
}

fn read_item(path: &Path) -> Result<Option<StoredItem>, OsStatus> {
    match fs::read(path) {
        Ok(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(|err| {
            warn!(%err, path = %path.display(), "corrupt entry file");
            OsStatus::DECODE
        }),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(io_status(err)),
    }
}

/// Atomically place `item` at `path`. Without `replace`, an existing file is
/// left alone and the write reports `DUPLICATE_ITEM`.
fn write_item(path: &Path, item: &StoredItem, replace: bool) -> Result<(), OsStatus> {
    let parent = path.parent().ok_or(OsStatus::PARAM)?;
    fs::create_dir_all(parent).map_err(io_status)?;

    let mut tmp = NamedTempFile::new_in(parent).map_err(io_status)?;
    let json = serde_json::to_vec_pretty(item).map_err(|err| {
        warn!(%err, "failed to encode entry");
        OsStatus::NOT_AVAILABLE
    })?;
    tmp.write_all(&json).map_err(io_status)?;
    tmp.flush().map_err(io_status)?;

    let persisted = if replace {
        tmp.persist(path)
    } else {
        tmp.persist_noclobber(path)
    };
    match persisted {
        Ok(_) => Ok(()),
        Err(err) if err.error.kind() == ErrorKind::AlreadyExists => Err(OsStatus::DUPLICATE_ITEM),
        Err(err) => Err(io_status(err.error)),
    }
}

fn build_cipher(material: &KeyMaterial) -> Result<Aes256Gcm, OsStatus> {
    Aes256Gcm::new_from_slice(&material.bytes).map_err(|err| {
        warn!(%err, key = %material.id, "cipher init failed");
        OsStatus::NOT_AVAILABLE
    })
}

fn io_status(err: std::io::Error) -> OsStatus {
    warn!(%err, "file keychain io failure");
    if err.kind() == ErrorKind::PermissionDenied {
        OsStatus::INTERACTION_NOT_ALLOWED
    } else {
        OsStatus::NOT_AVAILABLE
    }
}
