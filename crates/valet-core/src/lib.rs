//! Facade over an OS credential store: typed accessibility policies, the
//! configuration rules that bind them, and the queries sent to the store.
//! Backends live in `valet-storage`; this crate ships an in-memory keychain
//! that follows the OS store's rules.

pub mod accessibility;
pub mod config;
pub mod error;
pub mod keychain;
pub mod query;
pub mod secure_enclave;
pub mod status;
pub mod valet;

pub use accessibility::Accessibility;
pub use config::{Flavor, Scope, ValetConfig};
pub use error::ValetError;
pub use keychain::{InMemoryKeychain, Keychain};
pub use secure_enclave::SecureEnclaveValet;
pub use status::OsStatus;
pub use valet::Valet;
