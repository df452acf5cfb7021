use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard},
};

use tracing::debug;

use super::Keychain;
use crate::{
    accessibility::Accessibility,
    query::{AccessControl, AuthenticationUi, Query},
    status::OsStatus,
};

const DEFAULT_ACCESS_GROUP: &str = "app.default";

/// How the simulated user answers presence prompts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PresenceResponse {
    #[default]
    Approve,
    Cancel,
    Fail,
}

/// Simulated device conditions that gate access to entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceState {
    pub passcode_set: bool,
    pub locked: bool,
    pub unlocked_since_boot: bool,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self {
            passcode_set: true,
            locked: false,
            unlocked_since_boot: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct ItemKey {
    service: String,
    access_group: String,
    account: String,
    synchronizable: bool,
}

#[derive(Debug, Clone)]
struct StoredItem {
    data: Vec<u8>,
    accessible: Accessibility,
    access_control: Option<AccessControl>,
}

#[derive(Debug)]
struct State {
    items: BTreeMap<ItemKey, StoredItem>,
    device: DeviceState,
    presence: PresenceResponse,
    prompts: Vec<Option<String>>,
    access_groups: Vec<String>,
}

/// Keychain held in process memory that follows the OS store's rules for
/// matching, access groups, lock state and presence prompts. Clones share state.
#[derive(Debug, Clone)]
pub struct InMemoryKeychain {
    inner: Arc<Mutex<State>>,
}

impl Default for InMemoryKeychain {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryKeychain {
    pub fn new() -> Self {
        Self::with_access_groups(Vec::<String>::new())
    }

    /// Keychain whose process is entitled to the given shared access groups in
    /// addition to its private default group.
    pub fn with_access_groups<I, S>(groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut access_groups = vec![DEFAULT_ACCESS_GROUP.to_string()];
        access_groups.extend(groups.into_iter().map(Into::into));
        Self {
            inner: Arc::new(Mutex::new(State {
                items: BTreeMap::new(),
                device: DeviceState::default(),
                presence: PresenceResponse::default(),
                prompts: Vec::new(),
                access_groups,
            })),
        }
    }

    pub fn device_state(&self) -> DeviceState {
        self.state().map(|s| s.device).unwrap_or_default()
    }

    /// Setting or clearing the passcode. Clearing it deletes every
    /// passcode-bound entry.
    pub fn set_passcode(&self, passcode_set: bool) {
        if let Ok(mut state) = self.state() {
            state.device.passcode_set = passcode_set;
            if !passcode_set {
                state
                    .items
                    .retain(|_, item| item.accessible != Accessibility::WhenPasscodeSetThisDeviceOnly);
            }
        }
    }

    pub fn lock(&self) {
        if let Ok(mut state) = self.state() {
            state.device.locked = true;
        }
    }

    pub fn unlock(&self) {
        if let Ok(mut state) = self.state() {
            state.device.locked = false;
            state.device.unlocked_since_boot = true;
        }
    }

    /// Restart the device: locked, and not yet unlocked since boot.
    pub fn reboot(&self) {
        if let Ok(mut state) = self.state() {
            state.device.locked = true;
            state.device.unlocked_since_boot = false;
        }
    }

    pub fn respond_to_presence(&self, response: PresenceResponse) {
        if let Ok(mut state) = self.state() {
            state.presence = response;
        }
    }

    /// Prompt texts shown so far, in order. `None` is the system default text.
    pub fn prompts(&self) -> Vec<Option<String>> {
        self.state().map(|s| s.prompts.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.state().map(|s| s.items.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn state(&self) -> Result<MutexGuard<'_, State>, OsStatus> {
        self.inner.lock().map_err(|_| OsStatus::NOT_AVAILABLE)
    }
}

impl State {
    fn check_access_group(&self, query: &Query) -> Result<(), OsStatus> {
        match &query.access_group {
            Some(group) if !self.access_groups.contains(group) => {
                Err(OsStatus::MISSING_ENTITLEMENT)
            }
            _ => Ok(()),
        }
    }

    fn matches(&self, key: &ItemKey, item: &StoredItem, query: &Query) -> bool {
        key.service == query.service
            && key.synchronizable == query.synchronizable
            && item.accessible == query.accessible
            && query.account.as_ref().is_none_or(|a| *a == key.account)
            && query.access_group.as_ref().is_none_or(|g| *g == key.access_group)
    }

    fn matching_keys(&self, query: &Query) -> Vec<ItemKey> {
        self.items
            .iter()
            .filter(|(key, item)| self.matches(key, item, query))
            .map(|(key, _)| key.clone())
            .collect()
    }

    fn single_match(&self, query: &Query) -> Result<ItemKey, OsStatus> {
        if query.account.is_none() {
            return Err(OsStatus::PARAM);
        }
        self.matching_keys(query)
            .into_iter()
            .next()
            .ok_or(OsStatus::ITEM_NOT_FOUND)
    }

    fn check_device(&self, accessible: Accessibility) -> Result<(), OsStatus> {
        let device = self.device;
        if accessible == Accessibility::WhenPasscodeSetThisDeviceOnly && !device.passcode_set {
            return Err(OsStatus::INTERACTION_NOT_ALLOWED);
        }
        if accessible.requires_unlocked_device() && device.locked {
            return Err(OsStatus::INTERACTION_NOT_ALLOWED);
        }
        let after_first_unlock = matches!(
            accessible,
            Accessibility::AfterFirstUnlock | Accessibility::AfterFirstUnlockThisDeviceOnly
        );
        if after_first_unlock && !device.unlocked_since_boot {
            return Err(OsStatus::INTERACTION_NOT_ALLOWED);
        }
        Ok(())
    }

    fn check_presence(&mut self, item: &ItemKey, query: &Query) -> Result<(), OsStatus> {
        let protected = self
            .items
            .get(item)
            .is_some_and(|stored| stored.access_control == Some(AccessControl::UserPresence));
        if !protected {
            return Ok(());
        }
        if query.authentication_ui == AuthenticationUi::Fail {
            return Err(OsStatus::INTERACTION_NOT_ALLOWED);
        }

        self.prompts.push(query.operation_prompt.clone());
        match self.presence {
            PresenceResponse::Approve => Ok(()),
            PresenceResponse::Cancel => Err(OsStatus::USER_CANCELED),
            PresenceResponse::Fail => Err(OsStatus::AUTH_FAILED),
        }
    }
}

impl Keychain for InMemoryKeychain {
    fn add(&self, query: &Query, data: &[u8]) -> Result<(), OsStatus> {
        let mut state = self.state()?;
        state.check_access_group(query)?;
        let account = query.account.clone().ok_or(OsStatus::PARAM)?;
        state.check_device(query.accessible)?;
        if !state.matching_keys(query).is_empty() {
            return Err(OsStatus::DUPLICATE_ITEM);
        }

        let key = ItemKey {
            service: query.service.clone(),
            access_group: query
                .access_group
                .clone()
                .unwrap_or_else(|| DEFAULT_ACCESS_GROUP.to_string()),
            account,
            synchronizable: query.synchronizable,
        };
        debug!(service = %key.service, group = %key.access_group, "adding keychain item");
        state.items.insert(
            key,
            StoredItem {
                data: data.to_vec(),
                accessible: query.accessible,
                access_control: query.access_control,
            },
        );
        Ok(())
    }

    fn update(&self, query: &Query, data: &[u8]) -> Result<(), OsStatus> {
        let mut state = self.state()?;
        state.check_access_group(query)?;
        let key = state.single_match(query)?;
        state.check_device(query.accessible)?;
        state.check_presence(&key, query)?;
        if let Some(item) = state.items.get_mut(&key) {
            item.data = data.to_vec();
        }
        Ok(())
    }

    fn copy_data(&self, query: &Query) -> Result<Vec<u8>, OsStatus> {
        let mut state = self.state()?;
        state.check_access_group(query)?;
        let key = state.single_match(query)?;
        state.check_device(query.accessible)?;
        state.check_presence(&key, query)?;
        state
            .items
            .get(&key)
            .map(|item| item.data.clone())
            .ok_or(OsStatus::ITEM_NOT_FOUND)
    }

    fn copy_accounts(&self, query: &Query) -> Result<Vec<String>, OsStatus> {
        let state = self.state()?;
        state.check_access_group(query)?;
        let accounts: Vec<String> = state
            .matching_keys(query)
            .into_iter()
            .map(|key| key.account)
            .collect();
        if accounts.is_empty() {
            return Err(OsStatus::ITEM_NOT_FOUND);
        }
        Ok(accounts)
    }

    fn contains(&self, query: &Query) -> Result<(), OsStatus> {
        let mut state = self.state()?;
        state.check_access_group(query)?;
        let key = state.single_match(query)?;
        state.check_presence(&key, query)
    }

    fn delete(&self, query: &Query) -> Result<(), OsStatus> {
        let mut state = self.state()?;
        state.check_access_group(query)?;
        let keys = state.matching_keys(query);
        if keys.is_empty() {
            return Err(OsStatus::ITEM_NOT_FOUND);
        }
        for key in keys {
            state.items.remove(&key);
        }
        Ok(())
    }
}
