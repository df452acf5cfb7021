use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// When the OS store allows an entry to be read, relative to the device lock
/// state and backup/restore behaviour.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum Accessibility {
    /// Readable only while the device is unlocked. Migrates with encrypted backups.
    #[default]
    WhenUnlocked,
    /// Readable once the device has been unlocked after a restart. Migrates with
    /// encrypted backups.
    AfterFirstUnlock,
    /// Always readable. Migrates with encrypted backups.
    Always,
    /// Readable only while unlocked, and only while a passcode is set. Never
    /// migrates; removing the passcode deletes these entries.
    WhenPasscodeSetThisDeviceOnly,
    /// Like `WhenUnlocked`, but never migrates to another device.
    WhenUnlockedThisDeviceOnly,
    /// Like `AfterFirstUnlock`, but never migrates to another device.
    AfterFirstUnlockThisDeviceOnly,
    /// Like `Always`, but never migrates to another device.
    AlwaysThisDeviceOnly,
}

impl Accessibility {
    pub const ALL: [Accessibility; 7] = [
        Accessibility::WhenUnlocked,
        Accessibility::AfterFirstUnlock,
        Accessibility::Always,
        Accessibility::WhenPasscodeSetThisDeviceOnly,
        Accessibility::WhenUnlockedThisDeviceOnly,
        Accessibility::AfterFirstUnlockThisDeviceOnly,
        Accessibility::AlwaysThisDeviceOnly,
    ];

    /// Device-local policies never leave the device, so they cannot be synchronized.
    pub fn is_device_local(self) -> bool {
        matches!(
            self,
            Accessibility::WhenPasscodeSetThisDeviceOnly
                | Accessibility::WhenUnlockedThisDeviceOnly
                | Accessibility::AfterFirstUnlockThisDeviceOnly
                | Accessibility::AlwaysThisDeviceOnly
        )
    }

    /// Whether reads are refused while the device is locked.
    pub fn requires_unlocked_device(self) -> bool {
        matches!(
            self,
            Accessibility::WhenUnlocked
                | Accessibility::WhenUnlockedThisDeviceOnly
                | Accessibility::WhenPasscodeSetThisDeviceOnly
        )
    }

    /// Name of the OS attribute constant for this policy.
    pub fn as_attribute(self) -> &'static str {
        match self {
            Accessibility::WhenUnlocked => "AccessibleWhenUnlocked",
            Accessibility::AfterFirstUnlock => "AccessibleAfterFirstUnlock",
            Accessibility::Always => "AccessibleAlways",
            Accessibility::WhenPasscodeSetThisDeviceOnly => {
                "AccessibleWhenPasscodeSetThisDeviceOnly"
            }
            Accessibility::WhenUnlockedThisDeviceOnly => "AccessibleWhenUnlockedThisDeviceOnly",
            Accessibility::AfterFirstUnlockThisDeviceOnly => {
                "AccessibleAfterFirstUnlockThisDeviceOnly"
            }
            Accessibility::AlwaysThisDeviceOnly => "AccessibleAlwaysThisDeviceOnly",
        }
    }

    fn as_name(self) -> &'static str {
        match self {
            Accessibility::WhenUnlocked => "when-unlocked",
            Accessibility::AfterFirstUnlock => "after-first-unlock",
            Accessibility::Always => "always",
            Accessibility::WhenPasscodeSetThisDeviceOnly => "when-passcode-set-this-device-only",
            Accessibility::WhenUnlockedThisDeviceOnly => "when-unlocked-this-device-only",
            Accessibility::AfterFirstUnlockThisDeviceOnly => {
                "after-first-unlock-this-device-only"
            }
            Accessibility::AlwaysThisDeviceOnly => "always-this-device-only",
        }
    }
}

impl fmt::Display for Accessibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_name())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown accessibility policy: {0}")]
pub struct ParseAccessibilityError(pub String);

impl FromStr for Accessibility {
    type Err = ParseAccessibilityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Accessibility::ALL
            .into_iter()
            .find(|a| a.as_name() == s)
            .ok_or_else(|| ParseAccessibilityError(s.to_string()))
    }
}
