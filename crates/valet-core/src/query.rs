//! Attribute dictionary passed to keychain backends.

use crate::accessibility::Accessibility;

/// Access-control requirement attached to an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessControl {
    /// Every read or update of the entry needs an interactive presence check.
    UserPresence,
}

/// Whether the store may show authentication UI to satisfy a query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum AuthenticationUi {
    #[default]
    Allow,
    /// Never prompt; protected entries report interaction-not-allowed instead.
    Fail,
}

/// One keychain query. `account` is the entry key; `None` addresses every entry
/// in the service namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub service: String,
    pub account: Option<String>,
    pub access_group: Option<String>,
    pub accessible: Accessibility,
    pub synchronizable: bool,
    pub access_control: Option<AccessControl>,
    pub operation_prompt: Option<String>,
    pub authentication_ui: AuthenticationUi,
}

impl Query {
    pub fn new(service: impl Into<String>, accessible: Accessibility) -> Self {
        Self {
            service: service.into(),
            account: None,
            access_group: None,
            accessible,
            synchronizable: false,
            access_control: None,
            operation_prompt: None,
            authentication_ui: AuthenticationUi::Allow,
        }
    }

    pub fn for_account(&self, account: &str) -> Self {
        Self {
            account: Some(account.to_string()),
            ..self.clone()
        }
    }

    pub fn with_prompt(mut self, prompt: Option<&str>) -> Self {
        self.operation_prompt = prompt.map(str::to_string);
        self
    }

    pub fn without_authentication_ui(mut self) -> Self {
        self.authentication_ui = AuthenticationUi::Fail;
        self
    }

    pub fn requires_user_presence(&self) -> bool {
        self.access_control == Some(AccessControl::UserPresence)
    }
}
