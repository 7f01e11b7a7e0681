//! Result taxonomy shared by every TEE operation
//!
//! Each failure kind maps to exactly one 32-bit wire code:
//! - `0x1..=0xD`: session/service lifecycle and storage I/O failures
//! - `0xFFFF0000..`: generic and detailed failures
//! - `0xFFFF6000..`: timer sub-range
//! - `0xFFFF7000..`: RPMB (replay-protected storage controller) sub-range
//!
//! Success is `Ok(_)`; the numeric success code only exists at the boundary
//! (see [`return_code`]).

use thiserror::Error;

/// Wire code for success.
pub const TEE_SUCCESS: u32 = 0x0;

/// Result type alias for TEE operations
pub type TeeResult<T> = Result<T, TeeError>;

/// Coarse classification of failures, used by callers to decide what to do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Caller bug detectable before any algorithm runs; never retried
    Protocol,
    /// Call sequencing bug; reported, not retried
    State,
    /// Wrong key or tampered data
    Authentication,
    /// Transient resource exhaustion; caller may retry after backoff
    Resource,
    /// Terminal for the session
    Fatal,
    /// Accepted but not complete; caller must poll or wait for notification
    Pending,
    /// Trusted storage I/O failure
    Storage,
}

/// Every failure an operation can report
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TeeError {
    // --- lifecycle block ---
    #[error("invalid command")]
    InvalidCmd,

    #[error("service does not exist")]
    ServiceNotExist,

    #[error("session does not exist")]
    SessionNotExist,

    #[error("session limit reached for service")]
    SessionMaximum,

    #[error("service already registered")]
    RegisterExistService,

    #[error("global task crashed")]
    TargetDeadFatal,

    #[error("failed to read data")]
    ReadData,

    #[error("failed to write data")]
    WriteData,

    #[error("failed to truncate object")]
    TruncateObject,

    #[error("failed to seek data")]
    SeekData,

    #[error("failed to sync data")]
    SyncData,

    #[error("failed to rename object")]
    RenameObject,

    #[error("failed to load trusted application")]
    TrustedAppLoad,

    // --- generic block ---
    #[error("generic failure")]
    Generic,

    #[error("access denied")]
    AccessDenied,

    #[error("operation cancelled")]
    Cancel,

    #[error("concurrent access conflict")]
    AccessConflict,

    #[error("too much data for the operation")]
    ExcessData,

    #[error("bad data format")]
    BadFormat,

    #[error("bad parameters")]
    BadParameters,

    #[error("operation not valid in the current state")]
    BadState,

    #[error("item not found")]
    ItemNotFound,

    #[error("not implemented")]
    NotImplemented,

    #[error("not supported")]
    NotSupported,

    #[error("no data")]
    NoData,

    #[error("out of memory")]
    OutOfMemory,

    #[error("busy")]
    Busy,

    #[error("communication failure")]
    Communication,

    #[error("security violation detected")]
    Security,

    #[error("output buffer too short: {required} bytes required")]
    ShortBuffer { required: usize },

    // --- asynchronous completion ---
    #[error("pending (asynchronous call accepted)")]
    Pending,

    #[error("pending (command not complete)")]
    Pending2,

    // --- detailed block ---
    #[error("timeout")]
    Timeout,

    #[error("overflow")]
    Overflow,

    #[error("trusted application crashed")]
    TargetDead,

    #[error("not enough storage space")]
    StorageNoSpace,

    #[error("MAC invalid")]
    MacInvalid,

    #[error("signature invalid")]
    SignatureInvalid,

    #[error("time not set")]
    TimeNotSet,

    #[error("time needs reset")]
    TimeNeedsReset,

    #[error("failure")]
    Fail,

    #[error("timer error: {0}")]
    Timer(#[from] TimerError),

    #[error("RPMB error: {0}")]
    Rpmb(#[from] RpmbError),
}

/// Timer sub-taxonomy (`0xFFFF6000..`)
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerError {
    #[error("generic timer failure")]
    Generic,
    #[error("timer creation failed")]
    CreateFailed,
    #[error("timer destruction failed")]
    DestroyFailed,
    #[error("timer not found")]
    NotFound,
}

/// RPMB controller sub-taxonomy (`0xFFFF7000..`)
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpmbError {
    #[error("controller failure")]
    Generic,
    #[error("MAC check failed")]
    MacFail,
    #[error("write counter check failed")]
    CounterFail,
    #[error("address check failed")]
    AddrFail,
    #[error("write failed")]
    WriteFail,
    #[error("read failed")]
    ReadFail,
    #[error("authentication key not programmed")]
    KeyNotProgrammed,
    #[error("unexpected response message type")]
    RespUnexpectedMsgType,
    #[error("unexpected response block count")]
    RespUnexpectedBlockCount,
    #[error("unexpected response block index")]
    RespUnexpectedBlockIndex,
    #[error("unexpected response write counter")]
    RespUnexpectedWriteCounter,
    #[error("unexpected response nonce")]
    RespUnexpectedNonce,
    #[error("unexpected response MAC")]
    RespUnexpectedMac,
    #[error("file not found")]
    FileNotFound,
    #[error("no space left")]
    NoSpace,
}

const TIMER_BASE: u32 = 0xFFFF_6000;
const RPMB_BASE: u32 = 0xFFFF_7000;
const RPMB_RESP_BASE: u32 = 0xFFFF_7100;

impl TimerError {
    pub fn code(&self) -> u32 {
        match self {
            TimerError::Generic => TIMER_BASE,
            TimerError::CreateFailed => TIMER_BASE + 1,
            TimerError::DestroyFailed => TIMER_BASE + 2,
            TimerError::NotFound => TIMER_BASE + 3,
        }
    }

    fn from_code(code: u32) -> Option<Self> {
        Some(match code.checked_sub(TIMER_BASE)? {
            0 => TimerError::Generic,
            1 => TimerError::CreateFailed,
            2 => TimerError::DestroyFailed,
            3 => TimerError::NotFound,
            _ => return None,
        })
    }
}

impl RpmbError {
    pub fn code(&self) -> u32 {
        match self {
            RpmbError::Generic => RPMB_BASE + 1,
            RpmbError::MacFail => RPMB_BASE + 2,
            RpmbError::CounterFail => RPMB_BASE + 3,
            RpmbError::AddrFail => RPMB_BASE + 4,
            RpmbError::WriteFail => RPMB_BASE + 5,
            RpmbError::ReadFail => RPMB_BASE + 6,
            RpmbError::KeyNotProgrammed => RPMB_BASE + 7,
            RpmbError::RespUnexpectedMsgType => RPMB_RESP_BASE,
            RpmbError::RespUnexpectedBlockCount => RPMB_RESP_BASE + 1,
            RpmbError::RespUnexpectedBlockIndex => RPMB_RESP_BASE + 2,
            RpmbError::RespUnexpectedWriteCounter => RPMB_RESP_BASE + 3,
            RpmbError::RespUnexpectedNonce => RPMB_RESP_BASE + 4,
            RpmbError::RespUnexpectedMac => RPMB_RESP_BASE + 5,
            RpmbError::FileNotFound => RPMB_RESP_BASE + 6,
            RpmbError::NoSpace => RPMB_RESP_BASE + 7,
        }
    }

    fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            c if c == RPMB_BASE + 1 => RpmbError::Generic,
            c if c == RPMB_BASE + 2 => RpmbError::MacFail,
            c if c == RPMB_BASE + 3 => RpmbError::CounterFail,
            c if c == RPMB_BASE + 4 => RpmbError::AddrFail,
            c if c == RPMB_BASE + 5 => RpmbError::WriteFail,
            c if c == RPMB_BASE + 6 => RpmbError::ReadFail,
            c if c == RPMB_BASE + 7 => RpmbError::KeyNotProgrammed,
            c if c == RPMB_RESP_BASE => RpmbError::RespUnexpectedMsgType,
            c if c == RPMB_RESP_BASE + 1 => RpmbError::RespUnexpectedBlockCount,
            c if c == RPMB_RESP_BASE + 2 => RpmbError::RespUnexpectedBlockIndex,
            c if c == RPMB_RESP_BASE + 3 => RpmbError::RespUnexpectedWriteCounter,
            c if c == RPMB_RESP_BASE + 4 => RpmbError::RespUnexpectedNonce,
            c if c == RPMB_RESP_BASE + 5 => RpmbError::RespUnexpectedMac,
            c if c == RPMB_RESP_BASE + 6 => RpmbError::FileNotFound,
            c if c == RPMB_RESP_BASE + 7 => RpmbError::NoSpace,
            _ => return None,
        })
    }
}

impl TeeError {
    /// The 32-bit wire code of this failure
    pub fn code(&self) -> u32 {
        match self {
            TeeError::InvalidCmd => 0x1,
            TeeError::ServiceNotExist => 0x2,
            TeeError::SessionNotExist => 0x3,
            TeeError::SessionMaximum => 0x4,
            TeeError::RegisterExistService => 0x5,
            TeeError::TargetDeadFatal => 0x6,
            TeeError::ReadData => 0x7,
            TeeError::WriteData => 0x8,
            TeeError::TruncateObject => 0x9,
            TeeError::SeekData => 0xA,
            TeeError::SyncData => 0xB,
            TeeError::RenameObject => 0xC,
            TeeError::TrustedAppLoad => 0xD,
            TeeError::Generic => 0xFFFF_0000,
            TeeError::AccessDenied => 0xFFFF_0001,
            TeeError::Cancel => 0xFFFF_0002,
            TeeError::AccessConflict => 0xFFFF_0003,
            TeeError::ExcessData => 0xFFFF_0004,
            TeeError::BadFormat => 0xFFFF_0005,
            TeeError::BadParameters => 0xFFFF_0006,
            TeeError::BadState => 0xFFFF_0007,
            TeeError::ItemNotFound => 0xFFFF_0008,
            TeeError::NotImplemented => 0xFFFF_0009,
            TeeError::NotSupported => 0xFFFF_000A,
            TeeError::NoData => 0xFFFF_000B,
            TeeError::OutOfMemory => 0xFFFF_000C,
            TeeError::Busy => 0xFFFF_000D,
            TeeError::Communication => 0xFFFF_000E,
            TeeError::Security => 0xFFFF_000F,
            TeeError::ShortBuffer { .. } => 0xFFFF_0010,
            TeeError::Pending => 0xFFFF_2000,
            TeeError::Pending2 => 0xFFFF_2001,
            TeeError::Timeout => 0xFFFF_3001,
            TeeError::Overflow => 0xFFFF_300F,
            TeeError::TargetDead => 0xFFFF_3024,
            TeeError::StorageNoSpace => 0xFFFF_3041,
            TeeError::MacInvalid => 0xFFFF_3071,
            TeeError::SignatureInvalid => 0xFFFF_3072,
            TeeError::TimeNotSet => 0xFFFF_5000,
            TeeError::TimeNeedsReset => 0xFFFF_5001,
            TeeError::Fail => 0xFFFF_5002,
            TeeError::Timer(e) => e.code(),
            TeeError::Rpmb(e) => e.code(),
        }
    }

    /// Decode a wire code. Returns `None` for success and for unassigned codes.
    ///
    /// A decoded `ShortBuffer` reports `required: 0`; the size travels in the
    /// output parameter, not in the code.
    pub fn from_code(code: u32) -> Option<Self> {
        let err = match code {
            0x1 => TeeError::InvalidCmd,
            0x2 => TeeError::ServiceNotExist,
            0x3 => TeeError::SessionNotExist,
            0x4 => TeeError::SessionMaximum,
            0x5 => TeeError::RegisterExistService,
            0x6 => TeeError::TargetDeadFatal,
            0x7 => TeeError::ReadData,
            0x8 => TeeError::WriteData,
            0x9 => TeeError::TruncateObject,
            0xA => TeeError::SeekData,
            0xB => TeeError::SyncData,
            0xC => TeeError::RenameObject,
            0xD => TeeError::TrustedAppLoad,
            0xFFFF_0000 => TeeError::Generic,
            0xFFFF_0001 => TeeError::AccessDenied,
            0xFFFF_0002 => TeeError::Cancel,
            0xFFFF_0003 => TeeError::AccessConflict,
            0xFFFF_0004 => TeeError::ExcessData,
            0xFFFF_0005 => TeeError::BadFormat,
            0xFFFF_0006 => TeeError::BadParameters,
            0xFFFF_0007 => TeeError::BadState,
            0xFFFF_0008 => TeeError::ItemNotFound,
            0xFFFF_0009 => TeeError::NotImplemented,
            0xFFFF_000A => TeeError::NotSupported,
            0xFFFF_000B => TeeError::NoData,
            0xFFFF_000C => TeeError::OutOfMemory,
            0xFFFF_000D => TeeError::Busy,
            0xFFFF_000E => TeeError::Communication,
            0xFFFF_000F => TeeError::Security,
            0xFFFF_0010 => TeeError::ShortBuffer { required: 0 },
            0xFFFF_2000 => TeeError::Pending,
            0xFFFF_2001 => TeeError::Pending2,
            0xFFFF_3001 => TeeError::Timeout,
            0xFFFF_300F => TeeError::Overflow,
            0xFFFF_3024 => TeeError::TargetDead,
            0xFFFF_3041 => TeeError::StorageNoSpace,
            0xFFFF_3071 => TeeError::MacInvalid,
            0xFFFF_3072 => TeeError::SignatureInvalid,
            0xFFFF_5000 => TeeError::TimeNotSet,
            0xFFFF_5001 => TeeError::TimeNeedsReset,
            0xFFFF_5002 => TeeError::Fail,
            other => {
                if let Some(e) = TimerError::from_code(other) {
                    return Some(TeeError::Timer(e));
                }
                return RpmbError::from_code(other).map(TeeError::Rpmb);
            }
        };
        Some(err)
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            TeeError::InvalidCmd
            | TeeError::BadParameters
            | TeeError::BadFormat
            | TeeError::ExcessData
            | TeeError::ServiceNotExist
            | TeeError::SessionNotExist
            | TeeError::RegisterExistService
            | TeeError::ItemNotFound
            | TeeError::NotImplemented
            | TeeError::NotSupported
            | TeeError::NoData => ErrorClass::Protocol,
            TeeError::BadState
            | TeeError::AccessConflict
            | TeeError::AccessDenied
            | TeeError::Cancel
            | TeeError::TimeNotSet
            | TeeError::TimeNeedsReset => ErrorClass::State,
            TeeError::MacInvalid | TeeError::SignatureInvalid => ErrorClass::Authentication,
            TeeError::OutOfMemory
            | TeeError::StorageNoSpace
            | TeeError::Busy
            | TeeError::SessionMaximum
            | TeeError::ShortBuffer { .. }
            | TeeError::Timeout
            | TeeError::Overflow => ErrorClass::Resource,
            TeeError::TargetDead
            | TeeError::TargetDeadFatal
            | TeeError::Communication
            | TeeError::Security
            | TeeError::TrustedAppLoad
            | TeeError::Generic
            | TeeError::Fail => ErrorClass::Fatal,
            TeeError::Pending | TeeError::Pending2 => ErrorClass::Pending,
            TeeError::ReadData
            | TeeError::WriteData
            | TeeError::TruncateObject
            | TeeError::SeekData
            | TeeError::SyncData
            | TeeError::RenameObject
            | TeeError::Timer(_)
            | TeeError::Rpmb(_) => ErrorClass::Storage,
        }
    }

    /// Whether the caller may retry after backing off. Nothing retries internally.
    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Resource && !matches!(self, TeeError::ShortBuffer { .. })
    }

    /// Whether the session that produced this error must be closed and reopened
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TeeError::TargetDead
                | TeeError::TargetDeadFatal
                | TeeError::Communication
                | TeeError::Security
        )
    }

    /// A pending code is never a final outcome
    pub fn is_pending(&self) -> bool {
        self.class() == ErrorClass::Pending
    }
}

/// Collapse an operation outcome into its wire code
pub fn return_code<T>(result: &TeeResult<T>) -> u32 {
    match result {
        Ok(_) => TEE_SUCCESS,
        Err(e) => e.code(),
    }
}
