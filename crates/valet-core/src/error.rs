use thiserror::Error;

use crate::status::OsStatus;

/// Errors surfaced by the facades.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValetError {
    /// Incompatible accessibility/sharing/synchronization/hardware combination.
    #[error("invalid configuration: {reason}")]
    InvalidConfiguration { reason: String },
    /// Caller passed an unusable key or value.
    #[error("invalid argument: {reason}")]
    InvalidArgument { reason: String },
    /// No entry is stored under the key.
    #[error("entry not found for key: {key}")]
    NotFound { key: String },
    /// The store refused the operation (device locked, no passcode, missing entitlement).
    #[error("access denied: {status}")]
    AccessDenied { status: OsStatus },
    /// The user dismissed the presence prompt.
    #[error("user cancelled the authentication prompt")]
    UserCancelled,
    /// The user failed the presence check.
    #[error("user authentication failed")]
    AuthenticationFailed,
    /// A string was requested but the stored bytes are not UTF-8.
    #[error("stored value for key {key} is not valid UTF-8")]
    InvalidEncoding { key: String },
    /// Any other failure reported by the store.
    #[error("store unavailable: {status}")]
    StoreUnavailable { status: OsStatus },
}

impl ValetError {
    /// Map a failed store call onto the error taxonomy. `key` names the entry
    /// involved, if any.
    pub fn from_status(status: OsStatus, key: Option<&str>) -> Self {
        match status {
            OsStatus::ITEM_NOT_FOUND => ValetError::NotFound {
                key: key.unwrap_or_default().to_string(),
            },
            OsStatus::USER_CANCELED => ValetError::UserCancelled,
            OsStatus::AUTH_FAILED => ValetError::AuthenticationFailed,
            OsStatus::INTERACTION_NOT_ALLOWED | OsStatus::MISSING_ENTITLEMENT => {
                ValetError::AccessDenied { status }
            }
            _ => ValetError::StoreUnavailable { status },
        }
    }

    pub(crate) fn invalid_configuration(reason: impl Into<String>) -> Self {
        ValetError::InvalidConfiguration {
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_argument(reason: impl Into<String>) -> Self {
        ValetError::InvalidArgument {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_statuses_onto_taxonomy() {
        assert_eq!(
            ValetError::from_status(OsStatus::ITEM_NOT_FOUND, Some("token")),
            ValetError::NotFound {
                key: "token".into()
            }
        );
        assert_eq!(
            ValetError::from_status(OsStatus::USER_CANCELED, None),
            ValetError::UserCancelled
        );
        assert_eq!(
            ValetError::from_status(OsStatus::AUTH_FAILED, None),
            ValetError::AuthenticationFailed
        );
        assert!(matches!(
            ValetError::from_status(OsStatus::MISSING_ENTITLEMENT, None),
            ValetError::AccessDenied { .. }
        ));
        assert!(matches!(
            ValetError::from_status(OsStatus::new(-9999), None),
            ValetError::StoreUnavailable { status } if status.code == -9999
        ));
    }
}
