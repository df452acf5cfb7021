use std::fmt;

/// Status code returned by the OS credential store for a failed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OsStatus {
    pub code: i32,
}

impl OsStatus {
    pub const UNIMPLEMENTED: OsStatus = OsStatus::new(-4);
    pub const PARAM: OsStatus = OsStatus::new(-50);
    pub const USER_CANCELED: OsStatus = OsStatus::new(-128);
    pub const NOT_AVAILABLE: OsStatus = OsStatus::new(-25291);
    pub const AUTH_FAILED: OsStatus = OsStatus::new(-25293);
    pub const DUPLICATE_ITEM: OsStatus = OsStatus::new(-25299);
    pub const ITEM_NOT_FOUND: OsStatus = OsStatus::new(-25300);
    pub const INTERACTION_NOT_ALLOWED: OsStatus = OsStatus::new(-25308);
    pub const DECODE: OsStatus = OsStatus::new(-26275);
    pub const MISSING_ENTITLEMENT: OsStatus = OsStatus::new(-34018);

    pub const fn new(code: i32) -> Self {
        Self { code }
    }

    pub fn describe(&self) -> &'static str {
        match *self {
            OsStatus::UNIMPLEMENTED => "function or operation not implemented",
            OsStatus::PARAM => "invalid parameter",
            OsStatus::USER_CANCELED => "user canceled the operation",
            OsStatus::NOT_AVAILABLE => "no keychain is available",
            OsStatus::AUTH_FAILED => "authorization/authentication failed",
            OsStatus::DUPLICATE_ITEM => "item already exists",
            OsStatus::ITEM_NOT_FOUND => "item not found",
            OsStatus::INTERACTION_NOT_ALLOWED => "user interaction is not allowed",
            OsStatus::DECODE => "unable to decode the stored data",
            OsStatus::MISSING_ENTITLEMENT => "missing entitlement",
            _ => "unknown status",
        }
    }
}

impl fmt::Display for OsStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "keychain status {} ({})", self.code, self.describe())
    }
}

impl std::error::Error for OsStatus {}
