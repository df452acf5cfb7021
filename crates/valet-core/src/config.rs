use serde::{Deserialize, Serialize};

use crate::{
    accessibility::Accessibility,
    error::ValetError,
    query::{AccessControl, Query},
};

/// Storage behaviour layered on top of the base configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Flavor {
    #[default]
    Standard,
    /// Entries synchronize across the user's devices.
    Synchronizable,
    /// Entries are protected by secure hardware and need user presence on access.
    SecureEnclave,
}

impl Flavor {
    fn tag(self) -> &'static str {
        match self {
            Flavor::Standard => "standard",
            Flavor::Synchronizable => "synchronizable",
            Flavor::SecureEnclave => "secure-enclave",
        }
    }
}

/// Namespace an entry lives in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "kind", content = "name")]
pub enum Scope {
    /// Private to the application.
    App(String),
    /// Shared by every application entitled to the access group.
    SharedAccessGroup(String),
}

impl Scope {
    pub fn identifier(&self) -> &str {
        match self {
            Scope::App(identifier) | Scope::SharedAccessGroup(identifier) => identifier,
        }
    }

    fn tag(&self) -> &'static str {
        match self {
            Scope::App(_) => "app",
            Scope::SharedAccessGroup(_) => "shared",
        }
    }
}

/// Immutable description of where and how a facade stores entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValetConfig {
    pub scope: Scope,
    pub accessibility: Accessibility,
    pub flavor: Flavor,
}

impl ValetConfig {
    pub fn new(scope: Scope, accessibility: Accessibility, flavor: Flavor) -> Self {
        Self {
            scope,
            accessibility,
            flavor,
        }
    }

    /// Reject combinations the OS store cannot honour.
    pub fn validate(&self) -> Result<(), ValetError> {
        let identifier = self.scope.identifier();
        if identifier.trim().is_empty() {
            return Err(ValetError::invalid_configuration(
                "identifier must not be empty",
            ));
        }

        match self.flavor {
            Flavor::Standard => Ok(()),
            Flavor::Synchronizable if self.accessibility.is_device_local() => {
                Err(ValetError::invalid_configuration(format!(
                    "{} is device-local and cannot be synchronized",
                    self.accessibility
                )))
            }
            Flavor::Synchronizable => Ok(()),
            Flavor::SecureEnclave
                if self.accessibility != Accessibility::WhenPasscodeSetThisDeviceOnly =>
            {
                Err(ValetError::invalid_configuration(format!(
                    "secure enclave storage requires {}, got {}",
                    Accessibility::WhenPasscodeSetThisDeviceOnly,
                    self.accessibility
                )))
            }
            Flavor::SecureEnclave => Ok(()),
        }
    }

    pub fn is_shared(&self) -> bool {
        matches!(self.scope, Scope::SharedAccessGroup(_))
    }

    /// Service attribute that namespaces every entry of this configuration.
    /// Any differing field yields a different namespace.
    pub fn service_name(&self) -> String {
        format!(
            "valet.{}.{}.{}.{}",
            self.flavor.tag(),
            self.scope.tag(),
            self.scope.identifier(),
            self.accessibility.as_attribute()
        )
    }

    /// Attributes shared by every query this configuration issues.
    pub fn base_query(&self) -> Query {
        let mut query = Query::new(self.service_name(), self.accessibility);
        if let Scope::SharedAccessGroup(group) = &self.scope {
            query.access_group = Some(group.clone());
        }
        match self.flavor {
            Flavor::Standard => {}
            Flavor::Synchronizable => query.synchronizable = true,
            Flavor::SecureEnclave => query.access_control = Some(AccessControl::UserPresence),
        }
        query
    }
}
