use std::collections::BTreeSet;

use tracing::{debug, instrument, warn};

use crate::{
    accessibility::Accessibility,
    config::{Flavor, Scope, ValetConfig},
    error::ValetError,
    keychain::Keychain,
    query::Query,
    status::OsStatus,
};

const CANARY_KEY: &str = "valet.canary";
const CANARY_VALUE: &[u8] = b"valet.canary.value";

/// Reads and writes entries of one configuration in a keychain.
#[derive(Debug, Clone)]
pub struct Valet<K: Keychain> {
    config: ValetConfig,
    base_query: Query,
    keychain: K,
}

impl<K: Keychain> Valet<K> {
    /// Entries private to this application.
    pub fn new(
        identifier: impl Into<String>,
        accessibility: Accessibility,
        keychain: K,
    ) -> Result<Self, ValetError> {
        let config = ValetConfig::new(Scope::App(identifier.into()), accessibility, Flavor::Standard);
        Self::from_config(config, keychain)
    }

    /// Entries shared by every application entitled to `group`.
    pub fn shared(
        group: impl Into<String>,
        accessibility: Accessibility,
        keychain: K,
    ) -> Result<Self, ValetError> {
        let config = ValetConfig::new(
            Scope::SharedAccessGroup(group.into()),
            accessibility,
            Flavor::Standard,
        );
        Self::from_config(config, keychain)
    }

    /// Entries synchronized across the user's devices. Device-local policies
    /// are rejected.
    pub fn synchronizable(
        identifier: impl Into<String>,
        accessibility: Accessibility,
        keychain: K,
    ) -> Result<Self, ValetError> {
        let config = ValetConfig::new(
            Scope::App(identifier.into()),
            accessibility,
            Flavor::Synchronizable,
        );
        Self::from_config(config, keychain)
    }

    /// Synchronized entries in a shared access group.
    pub fn shared_synchronizable(
        group: impl Into<String>,
        accessibility: Accessibility,
        keychain: K,
    ) -> Result<Self, ValetError> {
        let config = ValetConfig::new(
            Scope::SharedAccessGroup(group.into()),
            accessibility,
            Flavor::Synchronizable,
        );
        Self::from_config(config, keychain)
    }

    pub fn from_config(config: ValetConfig, keychain: K) -> Result<Self, ValetError> {
        config.validate()?;
        let base_query = config.base_query();
        Ok(Self {
            config,
            base_query,
            keychain,
        })
    }

    pub fn config(&self) -> &ValetConfig {
        &self.config
    }

    pub fn identifier(&self) -> &str {
        self.config.scope.identifier()
    }

    pub fn accessibility(&self) -> Accessibility {
        self.config.accessibility
    }

    pub fn is_shared(&self) -> bool {
        self.config.is_shared()
    }

    pub fn is_synchronizable(&self) -> bool {
        self.config.flavor == Flavor::Synchronizable
    }

    /// Store `value` under `key`, replacing any previous value.
    pub fn set(&self, key: &str, value: &[u8]) -> Result<(), ValetError> {
        self.set_with_prompt(key, value, None)
    }

    pub fn get(&self, key: &str) -> Result<Vec<u8>, ValetError> {
        self.get_with_prompt(key, None)
    }

    pub fn set_string(&self, key: &str, value: &str) -> Result<(), ValetError> {
        self.set(key, value.as_bytes())
    }

    pub fn get_string(&self, key: &str) -> Result<String, ValetError> {
        self.get_string_with_prompt(key, None)
    }

    /// Whether `get` would find an entry. Never shows a prompt: protected
    /// entries that would need one count as present.
    #[instrument(skip_all, fields(key = %key))]
    pub fn has_key(&self, key: &str) -> Result<bool, ValetError> {
        check_key(key)?;
        self.exists_without_ui(key)
    }

    #[instrument(skip_all, fields(service = %self.base_query.service))]
    pub fn all_keys(&self) -> Result<BTreeSet<String>, ValetError> {
        match self.keychain.copy_accounts(&self.base_query) {
            Ok(accounts) => Ok(accounts
                .into_iter()
                .filter(|account| account != CANARY_KEY)
                .collect()),
            Err(OsStatus::ITEM_NOT_FOUND) => Ok(BTreeSet::new()),
            Err(status) => Err(ValetError::from_status(status, None)),
        }
    }

    /// Delete the entry under `key`. Removing an absent key succeeds.
    #[instrument(skip_all, fields(key = %key))]
    pub fn remove(&self, key: &str) -> Result<(), ValetError> {
        check_key(key)?;
        ignore_not_found(self.keychain.delete(&self.base_query.for_account(key)), key)
    }

    /// Delete every entry of this configuration.
    #[instrument(skip_all, fields(service = %self.base_query.service))]
    pub fn remove_all(&self) -> Result<(), ValetError> {
        ignore_not_found(self.keychain.delete(&self.base_query), "")
    }

    /// Write, read back and delete a canary entry to confirm this
    /// configuration is usable on the current device. The canary key is
    /// reserved and refused by every other operation.
    #[instrument(skip_all, fields(service = %self.base_query.service))]
    pub fn can_access_keychain(&self) -> bool {
        let outcome = self.exercise_canary();
        if let Err(err) = self.remove_canary() {
            debug!(%err, "failed to remove canary");
        }
        match outcome {
            Ok(accessible) => accessible,
            Err(err) => {
                debug!(%err, "keychain not accessible");
                false
            }
        }
    }

    fn exercise_canary(&self) -> Result<bool, ValetError> {
        // A leftover canary would turn the write into a prompting update.
        self.remove_canary()?;
        let query = self.base_query.for_account(CANARY_KEY);
        self.keychain
            .add(&query, CANARY_VALUE)
            .map_err(|status| ValetError::from_status(status, Some(CANARY_KEY)))?;
        if query.requires_user_presence() {
            return self.exists_without_ui(CANARY_KEY);
        }
        let data = self
            .keychain
            .copy_data(&query)
            .map_err(|status| ValetError::from_status(status, Some(CANARY_KEY)))?;
        Ok(data == CANARY_VALUE)
    }

    fn remove_canary(&self) -> Result<(), ValetError> {
        ignore_not_found(
            self.keychain.delete(&self.base_query.for_account(CANARY_KEY)),
            CANARY_KEY,
        )
    }

    fn exists_without_ui(&self, key: &str) -> Result<bool, ValetError> {
        let query = self.base_query.for_account(key).without_authentication_ui();
        match self.keychain.contains(&query) {
            Ok(()) => Ok(true),
            Err(OsStatus::ITEM_NOT_FOUND) => Ok(false),
            Err(OsStatus::INTERACTION_NOT_ALLOWED) if query.requires_user_presence() => Ok(true),
            Err(status) => Err(ValetError::from_status(status, Some(key))),
        }
    }

    /// Copy every entry of `source` into this configuration.
    ///
    /// Nothing is written if any source key already exists here. If a write
    /// fails, entries written so far are removed again. With
    /// `remove_on_completion` the source entries are deleted once every write
    /// has succeeded.
    #[instrument(skip_all, fields(service = %self.base_query.service))]
    pub fn migrate_from<S: Keychain>(
        &self,
        source: &Valet<S>,
        remove_on_completion: bool,
    ) -> Result<(), ValetError> {
        let keys = source.all_keys()?;
        if keys.is_empty() {
            debug!("nothing to migrate");
            return Ok(());
        }

        for key in &keys {
            if self.has_key(key)? {
                return Err(ValetError::invalid_argument(format!(
                    "key {key} already exists in the destination"
                )));
            }
        }

        let mut entries = Vec::with_capacity(keys.len());
        for key in keys {
            let value = source.get(&key)?;
            entries.push((key, value));
        }

        for (index, (key, value)) in entries.iter().enumerate() {
            if let Err(err) = self.set(key, value) {
                warn!(%err, "migration write failed, rolling back");
                for (written, _) in &entries[..index] {
                    if let Err(rollback) = self.remove(written) {
                        warn!(%rollback, "failed to roll back migrated entry");
                    }
                }
                return Err(err);
            }
        }

        if remove_on_completion {
            for (key, _) in &entries {
                source.remove(key)?;
            }
        }
        debug!(count = entries.len(), "migrated entries");
        Ok(())
    }

    #[instrument(skip_all, fields(key = %key))]
    pub(crate) fn set_with_prompt(
        &self,
        key: &str,
        value: &[u8],
        prompt: Option<&str>,
    ) -> Result<(), ValetError> {
        check_key(key)?;
        if value.is_empty() {
            return Err(ValetError::invalid_argument("value must not be empty"));
        }

        let query = self.base_query.for_account(key).with_prompt(prompt);
        match self.keychain.add(&query, value) {
            Ok(()) => Ok(()),
            Err(OsStatus::DUPLICATE_ITEM) => {
                debug!("entry exists, updating");
                self.keychain
                    .update(&query, value)
                    .map_err(|status| ValetError::from_status(status, Some(key)))
            }
            Err(status) => Err(ValetError::from_status(status, Some(key))),
        }
    }

    #[instrument(skip_all, fields(key = %key))]
    pub(crate) fn get_with_prompt(
        &self,
        key: &str,
        prompt: Option<&str>,
    ) -> Result<Vec<u8>, ValetError> {
        check_key(key)?;
        let query = self.base_query.for_account(key).with_prompt(prompt);
        self.keychain
            .copy_data(&query)
            .map_err(|status| ValetError::from_status(status, Some(key)))
    }

    pub(crate) fn get_string_with_prompt(
        &self,
        key: &str,
        prompt: Option<&str>,
    ) -> Result<String, ValetError> {
        let bytes = self.get_with_prompt(key, prompt)?;
        String::from_utf8(bytes).map_err(|_| ValetError::InvalidEncoding {
            key: key.to_string(),
        })
    }
}

fn check_key(key: &str) -> Result<(), ValetError> {
    if key.is_empty() {
        return Err(ValetError::invalid_argument("key must not be empty"));
    }
    if key == CANARY_KEY {
        return Err(ValetError::invalid_argument(format!("key {key} is reserved")));
    }
    Ok(())
}

fn ignore_not_found(result: Result<(), OsStatus>, key: &str) -> Result<(), ValetError> {
    match result {
        Ok(()) | Err(OsStatus::ITEM_NOT_FOUND) => Ok(()),
        Err(status) => Err(ValetError::from_status(status, Some(key))),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::keychain::InMemoryKeychain;

    /// Accepts a fixed number of adds, then reports the store as unavailable.
    struct FailingAdds {
        inner: InMemoryKeychain,
        adds_left: AtomicUsize,
    }

    impl Keychain for FailingAdds {
        fn add(&self, query: &Query, data: &[u8]) -> Result<(), OsStatus> {
            let left = self.adds_left.load(Ordering::SeqCst);
            if left == 0 {
                return Err(OsStatus::NOT_AVAILABLE);
            }
            self.adds_left.store(left - 1, Ordering::SeqCst);
            self.inner.add(query, data)
        }

        fn update(&self, query: &Query, data: &[u8]) -> Result<(), OsStatus> {
            self.inner.update(query, data)
        }

        fn copy_data(&self, query: &Query) -> Result<Vec<u8>, OsStatus> {
            self.inner.copy_data(query)
        }

        fn copy_accounts(&self, query: &Query) -> Result<Vec<String>, OsStatus> {
            self.inner.copy_accounts(query)
        }

        fn contains(&self, query: &Query) -> Result<(), OsStatus> {
            self.inner.contains(query)
        }

        fn delete(&self, query: &Query) -> Result<(), OsStatus> {
            self.inner.delete(query)
        }
    }

    fn valet(keychain: &InMemoryKeychain) -> Valet<InMemoryKeychain> {
        Valet::new("com.example.app", Accessibility::WhenUnlocked, keychain.clone())
            .expect("valid configuration")
    }

    #[test]
    fn set_then_get_returns_same_bytes() {
        let keychain = InMemoryKeychain::new();
        for accessibility in Accessibility::ALL {
            let valet = Valet::new("com.example.app", accessibility, keychain.clone())
                .expect("valid configuration");
            let payload = [0u8, 159, 146, 150, 255];
            valet.set("blob", &payload).expect("set");
            assert_eq!(valet.get("blob").expect("get"), payload);
        }
    }

    #[test]
    fn set_overwrites_existing_value() {
        let keychain = InMemoryKeychain::new();
        let valet = valet(&keychain);
        valet.set_string("token", "first").expect("set");
        valet.set_string("token", "second").expect("overwrite");
        assert_eq!(valet.get_string("token").expect("get"), "second");
        assert_eq!(keychain.len(), 1);
    }

    #[test]
    fn remove_then_get_is_not_found_and_remove_is_idempotent() {
        let valet = valet(&InMemoryKeychain::new());
        valet.set_string("token", "secret").expect("set");
        valet.remove("token").expect("remove");
        valet.remove("token").expect("remove again");

        assert_eq!(
            valet.get("token"),
            Err(ValetError::NotFound {
                key: "token".into()
            })
        );
    }

    #[test]
    fn has_key_tracks_stored_entries() {
        let valet = valet(&InMemoryKeychain::new());
        assert!(!valet.has_key("token").expect("has_key"));
        valet.set_string("token", "secret").expect("set");
        assert!(valet.has_key("token").expect("has_key"));
        assert!(!valet.has_key("other").expect("has_key"));
    }

    #[test]
    fn all_keys_is_order_independent_and_clears() {
        let valet = valet(&InMemoryKeychain::new());
        assert!(valet.all_keys().expect("empty").is_empty());

        for key in ["zeta", "alpha", "mid"] {
            valet.set_string(key, "v").expect("set");
        }
        let expected: BTreeSet<String> =
            ["alpha", "mid", "zeta"].into_iter().map(String::from).collect();
        assert_eq!(valet.all_keys().expect("keys"), expected);

        valet.remove_all().expect("remove all");
        valet.remove_all().expect("remove all again");
        assert!(valet.all_keys().expect("keys").is_empty());
    }

    #[test]
    fn configurations_do_not_see_each_others_entries() {
        let keychain = InMemoryKeychain::with_access_groups(["com.example.app"]);
        let private = valet(&keychain);
        let other_policy =
            Valet::new("com.example.app", Accessibility::Always, keychain.clone()).expect("valet");
        let shared = Valet::shared("com.example.app", Accessibility::WhenUnlocked, keychain.clone())
            .expect("valet");

        private.set_string("token", "private").expect("set");
        assert!(!other_policy.has_key("token").expect("has_key"));
        assert!(!shared.has_key("token").expect("has_key"));
        assert!(shared.is_shared());
        assert!(!private.is_shared());
    }

    #[test]
    fn empty_key_and_value_are_rejected() {
        let valet = valet(&InMemoryKeychain::new());
        assert!(matches!(
            valet.set("", b"v"),
            Err(ValetError::InvalidArgument { .. })
        ));
        assert!(matches!(
            valet.set("k", b""),
            Err(ValetError::InvalidArgument { .. })
        ));
        assert!(matches!(valet.get(""), Err(ValetError::InvalidArgument { .. })));
    }

    #[test]
    fn get_string_rejects_invalid_utf8() {
        let valet = valet(&InMemoryKeychain::new());
        valet.set("raw", &[0xff, 0xfe]).expect("set");
        assert_eq!(
            valet.get_string("raw"),
            Err(ValetError::InvalidEncoding { key: "raw".into() })
        );
    }

    #[test]
    fn synchronizable_rejects_device_local_policy() {
        let keychain = InMemoryKeychain::new();
        let result = Valet::synchronizable(
            "com.example.app",
            Accessibility::AfterFirstUnlockThisDeviceOnly,
            keychain.clone(),
        );
        assert!(matches!(result, Err(ValetError::InvalidConfiguration { .. })));

        let synced = Valet::synchronizable("com.example.app", Accessibility::AfterFirstUnlock, keychain)
            .expect("valid");
        assert!(synced.is_synchronizable());
        synced.set_string("k", "v").expect("set");
        assert_eq!(synced.get_string("k").expect("get"), "v");
    }

    #[test]
    fn unentitled_shared_group_is_access_denied() {
        let keychain = InMemoryKeychain::new();
        let shared = Valet::shared("team.other", Accessibility::WhenUnlocked, keychain)
            .expect("valid configuration");
        assert!(matches!(
            shared.set_string("k", "v"),
            Err(ValetError::AccessDenied { .. })
        ));
        assert!(!shared.can_access_keychain());
    }

    #[test]
    fn locked_device_is_access_denied() {
        let keychain = InMemoryKeychain::new();
        let valet = valet(&keychain);
        valet.set_string("k", "v").expect("set");
        keychain.lock();
        assert!(matches!(valet.get("k"), Err(ValetError::AccessDenied { .. })));
        assert!(!valet.can_access_keychain());
    }

    #[test]
    fn can_access_keychain_leaves_no_canary() {
        let keychain = InMemoryKeychain::new();
        let valet = valet(&keychain);
        assert!(valet.can_access_keychain());
        assert!(keychain.is_empty());
    }

    #[test]
    fn migrate_copies_entries_and_optionally_removes_source() {
        let keychain = InMemoryKeychain::new();
        let source = Valet::new("legacy", Accessibility::AfterFirstUnlock, keychain.clone())
            .expect("valet");
        let destination = valet(&keychain);
        source.set_string("a", "1").expect("set");
        source.set_string("b", "2").expect("set");

        destination.migrate_from(&source, true).expect("migrate");
        assert_eq!(destination.get_string("a").expect("get"), "1");
        assert_eq!(destination.get_string("b").expect("get"), "2");
        assert!(source.all_keys().expect("keys").is_empty());
    }

    #[test]
    fn migrate_refuses_when_destination_has_key() {
        let keychain = InMemoryKeychain::new();
        let source = Valet::new("legacy", Accessibility::Always, keychain.clone()).expect("valet");
        let destination = valet(&keychain);
        source.set_string("a", "1").expect("set");
        source.set_string("b", "2").expect("set");
        destination.set_string("b", "existing").expect("set");

        let err = destination
            .migrate_from(&source, true)
            .expect_err("collision must fail");
        assert!(matches!(err, ValetError::InvalidArgument { .. }));
        assert!(!destination.has_key("a").expect("has_key"));
        assert_eq!(source.all_keys().expect("keys").len(), 2);
    }

    #[test]
    fn migrate_keeps_source_without_remove_on_completion() {
        let keychain = InMemoryKeychain::new();
        let source = Valet::new("legacy", Accessibility::Always, keychain.clone()).expect("valet");
        let destination = valet(&keychain);
        source.set_string("a", "1").expect("set");
        source.set_string("b", "2").expect("set");

        destination.migrate_from(&source, false).expect("migrate");
        assert_eq!(destination.all_keys().expect("keys"), source.all_keys().expect("keys"));
        assert_eq!(source.get_string("b").expect("source kept"), "2");
        assert_eq!(destination.get_string("b").expect("copied"), "2");
    }

    #[test]
    fn migrate_rolls_back_when_a_write_fails() {
        let keychain = InMemoryKeychain::new();
        let source = Valet::new("legacy", Accessibility::Always, keychain.clone()).expect("valet");
        for key in ["a", "b", "c"] {
            source.set_string(key, key).expect("set");
        }
        let destination = Valet::new(
            "com.example.app",
            Accessibility::WhenUnlocked,
            FailingAdds {
                inner: keychain.clone(),
                adds_left: AtomicUsize::new(2),
            },
        )
        .expect("valet");

        assert_eq!(
            destination.migrate_from(&source, true),
            Err(ValetError::StoreUnavailable {
                status: OsStatus::NOT_AVAILABLE
            })
        );
        assert!(destination.all_keys().expect("keys").is_empty());
        assert_eq!(source.all_keys().expect("keys").len(), 3);
        assert_eq!(keychain.len(), 3);
    }

    #[test]
    fn shared_synchronizable_needs_entitlement_and_portable_policy() {
        let keychain = InMemoryKeychain::with_access_groups(["team.shared"]);
        let device_local = Valet::shared_synchronizable(
            "team.shared",
            Accessibility::WhenUnlockedThisDeviceOnly,
            keychain.clone(),
        );
        assert!(matches!(
            device_local,
            Err(ValetError::InvalidConfiguration { .. })
        ));

        let valet = Valet::shared_synchronizable(
            "team.shared",
            Accessibility::AfterFirstUnlock,
            keychain.clone(),
        )
        .expect("valid configuration");
        assert!(valet.is_shared());
        assert!(valet.is_synchronizable());
        valet.set_string("k", "v").expect("set");
        assert_eq!(valet.get_string("k").expect("get"), "v");

        let shared = Valet::shared("team.shared", Accessibility::AfterFirstUnlock, keychain.clone())
            .expect("valid configuration");
        assert!(!shared.has_key("k").expect("has_key"));

        let unentitled =
            Valet::shared_synchronizable("team.other", Accessibility::AfterFirstUnlock, keychain)
                .expect("valid configuration");
        assert!(matches!(
            unentitled.set_string("k", "v"),
            Err(ValetError::AccessDenied { .. })
        ));
    }

    #[test]
    fn canary_key_is_reserved() {
        let keychain = InMemoryKeychain::new();
        let valet = valet(&keychain);
        for result in [
            valet.set(CANARY_KEY, b"mine"),
            valet.get(CANARY_KEY).map(|_| ()),
            valet.remove(CANARY_KEY),
            valet.has_key(CANARY_KEY).map(|_| ()),
        ] {
            assert!(matches!(result, Err(ValetError::InvalidArgument { .. })));
        }

        valet.set_string("token", "secret").expect("set");
        assert!(valet.can_access_keychain());
        assert_eq!(valet.get_string("token").expect("untouched"), "secret");
        assert_eq!(valet.all_keys().expect("keys").len(), 1);
    }
}
