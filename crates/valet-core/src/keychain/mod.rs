//! Seam between the facades and an OS-managed credential store.

use std::sync::Arc;

use crate::{query::Query, status::OsStatus};

mod memory;

pub use memory::{DeviceState, InMemoryKeychain, PresenceResponse};

/// Primitive operations of a keychain. Calls are synchronous and may block,
/// for instance while a presence prompt is on screen.
pub trait Keychain: Send + Sync {
    /// Insert a new entry; `DUPLICATE_ITEM` if one already matches the query.
    fn add(&self, query: &Query, data: &[u8]) -> Result<(), OsStatus>;

    /// Replace the value of the entry matching the query.
    fn update(&self, query: &Query, data: &[u8]) -> Result<(), OsStatus>;

    /// Value of the single entry matching the query.
    fn copy_data(&self, query: &Query) -> Result<Vec<u8>, OsStatus>;

    /// Accounts of every entry matching the query. Reads attributes only and
    /// never prompts.
    fn copy_accounts(&self, query: &Query) -> Result<Vec<String>, OsStatus>;

    /// `Ok` if an entry matches without returning its value.
    fn contains(&self, query: &Query) -> Result<(), OsStatus>;

    /// Delete every matching entry; `ITEM_NOT_FOUND` if nothing matched.
    fn delete(&self, query: &Query) -> Result<(), OsStatus>;
}

impl<K: Keychain + ?Sized> Keychain for Box<K> {
    fn add(&self, query: &Query, data: &[u8]) -> Result<(), OsStatus> {
        (**self).add(query, data)
    }

    fn update(&self, query: &Query, data: &[u8]) -> Result<(), OsStatus> {
        (**self).update(query, data)
    }

    fn copy_data(&self, query: &Query) -> Result<Vec<u8>, OsStatus> {
        (**self).copy_data(query)
    }

    fn copy_accounts(&self, query: &Query) -> Result<Vec<String>, OsStatus> {
        (**self).copy_accounts(query)
    }

    fn contains(&self, query: &Query) -> Result<(), OsStatus> {
        (**self).contains(query)
    }

    fn delete(&self, query: &Query) -> Result<(), OsStatus> {
        (**self).delete(query)
    }
}

impl<K: Keychain + ?Sized> Keychain for Arc<K> {
    fn add(&self, query: &Query, data: &[u8]) -> Result<(), OsStatus> {
        (**self).add(query, data)
    }

    fn update(&self, query: &Query, data: &[u8]) -> Result<(), OsStatus> {
        (**self).update(query, data)
    }

    fn copy_data(&self, query: &Query) -> Result<Vec<u8>, OsStatus> {
        (**self).copy_data(query)
    }

    fn copy_accounts(&self, query: &Query) -> Result<Vec<String>, OsStatus> {
        (**self).copy_accounts(query)
    }

    fn contains(&self, query: &Query) -> Result<(), OsStatus> {
        (**self).contains(query)
    }

    fn delete(&self, query: &Query) -> Result<(), OsStatus> {
        (**self).delete(query)
    }
}
