use std::{
    fs::{self, OpenOptions},
    io::ErrorKind,
    path::PathBuf,
};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use tracing::{debug, instrument, warn};
use valet_core::{query::Query, Keychain, OsStatus};

/// Secrets addressed by service and account. Absent entries report
/// `ITEM_NOT_FOUND`.
pub trait CredentialStore: Send + Sync {
    fn read(&self, service: &str, account: &str) -> Result<Vec<u8>, OsStatus>;
    fn write(&self, service: &str, account: &str, secret: &[u8]) -> Result<(), OsStatus>;
    fn erase(&self, service: &str, account: &str) -> Result<(), OsStatus>;
}

/// The platform credential store behind the `keyring` crate: Keychain
/// Services on Apple targets, Credential Manager on Windows, the kernel
/// keyring on Linux. Targets where `keyring` only has its in-process mock are
/// refused with `NOT_AVAILABLE` rather than losing writes.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlatformStore;

impl PlatformStore {
    fn entry(&self, service: &str, account: &str) -> Result<keyring::Entry, OsStatus> {
        let entry = keyring::Entry::new(service, account).map_err(|err| status_for(&err))?;
        if is_mock(&entry) {
            warn!("no persistent credential store on this platform");
            return Err(OsStatus::NOT_AVAILABLE);
        }
        Ok(entry)
    }
}

impl CredentialStore for PlatformStore {
    fn read(&self, service: &str, account: &str) -> Result<Vec<u8>, OsStatus> {
        self.entry(service, account)?
            .get_secret()
            .map_err(|err| status_for(&err))
    }

    fn write(&self, service: &str, account: &str, secret: &[u8]) -> Result<(), OsStatus> {
        self.entry(service, account)?
            .set_secret(secret)
            .map_err(|err| status_for(&err))
    }

    fn erase(&self, service: &str, account: &str) -> Result<(), OsStatus> {
        self.entry(service, account)?
            .delete_credential()
            .map_err(|err| status_for(&err))
    }
}

/// Whether `entry` lives in `keyring`'s mock store, which forgets every
/// credential when the entry is dropped.
pub(crate) fn is_mock(entry: &keyring::Entry) -> bool {
    entry.get_credential().is::<keyring::mock::MockCredential>()
}

/// Keychain backed by a credential store (the platform one by default).
///
/// Credential stores cannot enumerate entries, so the accounts of each
/// namespace are indexed as empty marker files under `index_root`, one per
/// account. Synchronized and presence-protected queries cannot be expressed
/// and report `UNIMPLEMENTED`.
#[derive(Debug)]
pub struct KeyringKeychain<S = PlatformStore> {
    index_root: PathBuf,
    store: S,
}

impl KeyringKeychain {
    pub fn new(index_root: impl Into<PathBuf>) -> Self {
        Self::with_store(index_root, PlatformStore)
    }
}

impl<S: CredentialStore> KeyringKeychain<S> {
    pub fn with_store(index_root: impl Into<PathBuf>, store: S) -> Self {
        Self {
            index_root: index_root.into(),
            store,
        }
    }

    fn index_dir(&self, query: &Query) -> PathBuf {
        self.index_root
            .join(URL_SAFE_NO_PAD.encode(entry_service(query)))
    }

    fn marker(&self, query: &Query, account: &str) -> PathBuf {
        self.index_dir(query).join(URL_SAFE_NO_PAD.encode(account))
    }

    fn index(&self, query: &Query, account: &str) -> Result<(), OsStatus> {
        let dir = self.index_dir(query);
        fs::create_dir_all(&dir).map_err(io_status)?;
        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(dir.join(URL_SAFE_NO_PAD.encode(account)))
            .map(|_| ())
            .map_err(io_status)
    }

    /// Drop the marker; `true` if there was one.
    fn unindex(&self, query: &Query, account: &str) -> Result<bool, OsStatus> {
        match fs::remove_file(self.marker(query, account)) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(io_status(err)),
        }
    }

    fn indexed_accounts(&self, query: &Query) -> Result<Vec<String>, OsStatus> {
        let entries = match fs::read_dir(self.index_dir(query)) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(io_status(err)),
        };

        let mut accounts = Vec::new();
        for entry in entries {
            let name = entry.map_err(io_status)?.file_name();
            accounts.push(decode_marker(&name.to_string_lossy())?);
        }
        accounts.sort();
        Ok(accounts)
    }
}

impl<S: CredentialStore> Keychain for KeyringKeychain<S> {
    #[instrument(skip_all, fields(service = %query.service))]
    fn add(&self, query: &Query, data: &[u8]) -> Result<(), OsStatus> {
        let account = account_of(query)?;
        let service = entry_service(query);
        match self.store.read(&service, account) {
            Ok(_) => return Err(OsStatus::DUPLICATE_ITEM),
            Err(OsStatus::ITEM_NOT_FOUND) => {}
            Err(status) => return Err(status),
        }
        self.store.write(&service, account, data)?;

        if let Err(status) = self.index(query, account) {
            // An unindexed secret could never be listed or cleared.
            if let Err(erase) = self.store.erase(&service, account) {
                warn!(%erase, "failed to erase unindexed credential");
            }
            return Err(status);
        }
        Ok(())
    }

    #[instrument(skip_all, fields(service = %query.service))]
    fn update(&self, query: &Query, data: &[u8]) -> Result<(), OsStatus> {
        let account = account_of(query)?;
        let service = entry_service(query);
        self.store.read(&service, account)?;
        self.store.write(&service, account, data)
    }

    #[instrument(skip_all, fields(service = %query.service))]
    fn copy_data(&self, query: &Query) -> Result<Vec<u8>, OsStatus> {
        self.store.read(&entry_service(query), account_of(query)?)
    }

    fn copy_accounts(&self, query: &Query) -> Result<Vec<String>, OsStatus> {
        ensure_supported(query)?;
        let accounts = self.indexed_accounts(query)?;
        if accounts.is_empty() {
            return Err(OsStatus::ITEM_NOT_FOUND);
        }
        Ok(accounts)
    }

    fn contains(&self, query: &Query) -> Result<(), OsStatus> {
        self.copy_data(query).map(|_| ())
    }

    #[instrument(skip_all, fields(service = %query.service))]
    fn delete(&self, query: &Query) -> Result<(), OsStatus> {
        ensure_supported(query)?;
        let accounts = match &query.account {
            Some(_) => vec![account_of(query)?.to_string()],
            None => self.indexed_accounts(query)?,
        };

        let service = entry_service(query);
        let mut deleted = 0;
        for account in &accounts {
            let erased = match self.store.erase(&service, account) {
                Ok(()) => true,
                Err(OsStatus::ITEM_NOT_FOUND) => false,
                Err(status) => return Err(status),
            };
            let unindexed = self.unindex(query, account)?;
            if erased || unindexed {
                deleted += 1;
            }
        }

        if deleted == 0 {
            return Err(OsStatus::ITEM_NOT_FOUND);
        }
        debug!(count = deleted, "deleted keyring entries");
        Ok(())
    }
}

fn ensure_supported(query: &Query) -> Result<(), OsStatus> {
    if query.synchronizable || query.requires_user_presence() {
        return Err(OsStatus::UNIMPLEMENTED);
    }
    Ok(())
}

fn account_of(query: &Query) -> Result<&str, OsStatus> {
    ensure_supported(query)?;
    query.account.as_deref().ok_or(OsStatus::PARAM)
}

/// Keyring service for a query; the access group joins the namespace since
/// the keyring has no separate attribute for it.
fn entry_service(query: &Query) -> String {
    match &query.access_group {
        Some(group) => format!("{}@{}", query.service, group),
        None => query.service.clone(),
    }
}

fn decode_marker(name: &str) -> Result<String, OsStatus> {
    URL_SAFE_NO_PAD
        .decode(name)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .ok_or_else(|| {
            warn!(marker = name, "corrupt keyring index");
            OsStatus::DECODE
        })
}

fn io_status(err: std::io::Error) -> OsStatus {
    warn!(%err, "keyring index io failure");
    if err.kind() == ErrorKind::PermissionDenied {
        OsStatus::INTERACTION_NOT_ALLOWED
    } else {
        OsStatus::NOT_AVAILABLE
    }
}

fn status_for(err: &keyring::Error) -> OsStatus {
    match err {
        keyring::Error::NoEntry => OsStatus::ITEM_NOT_FOUND,
        keyring::Error::NoStorageAccess(_) => OsStatus::INTERACTION_NOT_ALLOWED,
        keyring::Error::Invalid(_, _) | keyring::Error::TooLong(_, _) => OsStatus::PARAM,
        keyring::Error::BadEncoding(_) => OsStatus::DECODE,
        other => {
            warn!(err = %other, "keyring failure");
            OsStatus::NOT_AVAILABLE
        }
    }
}
