//! Caller identity: login method + client UUID
//!
//! An [`Identity`] is fixed when a session opens and never changes for the
//! lifetime of that session.

use crate::error::{TeeError, TeeResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A 16-byte UUID in its structured `{u32, u16, u16, [u8; 8]}` form
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TeeUuid {
    pub time_low: u32,
    pub time_mid: u16,
    pub time_hi_and_version: u16,
    pub clock_seq_and_node: [u8; 8],
}

impl TeeUuid {
    pub const fn new(
        time_low: u32,
        time_mid: u16,
        time_hi_and_version: u16,
        clock_seq_and_node: [u8; 8],
    ) -> Self {
        Self {
            time_low,
            time_mid,
            time_hi_and_version,
            clock_seq_and_node,
        }
    }

    /// A UUID whose every byte is `b` (the well-known service UUIDs look like this)
    pub const fn repeated(b: u8) -> Self {
        let w = b as u16;
        Self {
            time_low: u32::from_ne_bytes([b, b, b, b]),
            time_mid: w << 8 | w,
            time_hi_and_version: w << 8 | w,
            clock_seq_and_node: [b; 8],
        }
    }

    /// Fresh random client UUID
    pub fn random() -> Self {
        uuid::Uuid::new_v4().into()
    }

    pub fn to_bytes(&self) -> [u8; 16] {
        *uuid::Uuid::from(*self).as_bytes()
    }
}

impl From<uuid::Uuid> for TeeUuid {
    fn from(u: uuid::Uuid) -> Self {
        let (time_low, time_mid, time_hi_and_version, node) = u.as_fields();
        Self {
            time_low,
            time_mid,
            time_hi_and_version,
            clock_seq_and_node: *node,
        }
    }
}

impl From<TeeUuid> for uuid::Uuid {
    fn from(u: TeeUuid) -> Self {
        uuid::Uuid::from_fields(
            u.time_low,
            u.time_mid,
            u.time_hi_and_version,
            &u.clock_seq_and_node,
        )
    }
}

impl fmt::Display for TeeUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", uuid::Uuid::from(*self).hyphenated())
    }
}

/// How the caller authenticated itself when opening a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum LoginMethod {
    /// No login data
    Public = 0x0,
    /// User running the client application
    User = 0x1,
    /// Group of the user running the client application
    Group = 0x2,
    /// The client application itself
    Application = 0x4,
    UserApplication = 0x5,
    GroupApplication = 0x6,
    /// Required by the trusted storage service
    Identify = 0x7,
}

impl TryFrom<u32> for LoginMethod {
    type Error = TeeError;

    fn try_from(v: u32) -> TeeResult<Self> {
        Ok(match v {
            0x0 => LoginMethod::Public,
            0x1 => LoginMethod::User,
            0x2 => LoginMethod::Group,
            0x4 => LoginMethod::Application,
            0x5 => LoginMethod::UserApplication,
            0x6 => LoginMethod::GroupApplication,
            0x7 => LoginMethod::Identify,
            _ => return Err(TeeError::BadParameters),
        })
    }
}

/// The calling principal of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub login: LoginMethod,
    pub uuid: TeeUuid,
}

impl Identity {
    pub fn new(login: LoginMethod, uuid: TeeUuid) -> Self {
        Self { login, uuid }
    }

    pub fn public() -> Self {
        Self::new(LoginMethod::Public, TeeUuid::repeated(0))
    }
}
