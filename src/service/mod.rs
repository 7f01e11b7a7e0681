//! Services and their command catalogues
//!
//! Each service has its own closed command enumeration. IDs overlap across
//! services (Echo, Storage and Crypto all start at 0x10), so a raw ID only
//! means something together with the service it was sent to.

pub mod crypt;
pub mod echo;
pub mod global;
pub mod storage;

pub use storage::{MemoryStorage, OpenFiles, StorageBackend};

use crate::crypto::{Algorithm, HashAlgorithm};
use crate::error::{TeeError, TeeResult};
use crate::identity::TeeUuid;
use crate::param::{ParamShape, ParamType};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Reserved "unknown" command ID, never dispatchable
pub const CMD_ID_UNKNOWN: u32 = 0x7FFF_FFFE;
/// Reserved upper bound of every command enumeration
pub const CMD_ID_MAX: u32 = 0x7FFF_FFFF;

use ParamType::{
    MemrefInout as MIO, MemrefInput as MI, MemrefOutput as MO, None as NONE, ValueInput as VI,
    ValueOutput as VO,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServiceId {
    Global,
    Echo,
    Storage,
    Crypto,
}

impl ServiceId {
    pub const ALL: [ServiceId; 4] = [
        ServiceId::Global,
        ServiceId::Echo,
        ServiceId::Storage,
        ServiceId::Crypto,
    ];

    pub const fn uuid(&self) -> TeeUuid {
        match self {
            ServiceId::Global => TeeUuid::repeated(0x00),
            ServiceId::Echo => TeeUuid::repeated(0x01),
            ServiceId::Storage => TeeUuid::repeated(0x02),
            ServiceId::Crypto => TeeUuid::repeated(0x04),
        }
    }

    /// Look up a registered service by UUID
    pub fn from_uuid(uuid: &TeeUuid) -> TeeResult<Self> {
        Self::ALL
            .into_iter()
            .find(|s| s.uuid() == *uuid)
            .ok_or(TeeError::ServiceNotExist)
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "global" => Some(ServiceId::Global),
            "echo" => Some(ServiceId::Echo),
            "storage" => Some(ServiceId::Storage),
            "crypto" | "crypt" => Some(ServiceId::Crypto),
            _ => None,
        }
    }

    /// Resolve a raw command ID against this service's enumeration
    pub fn command(&self, id: u32) -> TeeResult<Command> {
        if id >= CMD_ID_UNKNOWN {
            return Err(TeeError::InvalidCmd);
        }
        Ok(match self {
            ServiceId::Global => Command::Global(GlobalCommand::from_id(id)?),
            ServiceId::Echo => Command::Echo(EchoCommand::from_id(id)?),
            ServiceId::Storage => Command::Storage(StorageCommand::from_id(id)?),
            ServiceId::Crypto => Command::Crypt(CryptCommand::from_id(id)?),
        })
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServiceId::Global => "global",
            ServiceId::Echo => "echo",
            ServiceId::Storage => "storage",
            ServiceId::Crypto => "crypto",
        };
        f.write_str(name)
    }
}

/// A command resolved against its service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Global(GlobalCommand),
    Echo(EchoCommand),
    Storage(StorageCommand),
    Crypt(CryptCommand),
}

impl Command {
    /// Parameter layout the handler expects. `None` means the command is
    /// refused before its parameters are looked at.
    pub fn shape(&self) -> Option<ParamShape> {
        match self {
            Command::Global(c) => c.shape(),
            Command::Echo(c) => Some(c.shape()),
            Command::Storage(c) => Some(c.shape()),
            Command::Crypt(c) => c.shape(),
        }
    }
}

/// Declares a closed command enumeration with contiguous wire IDs
macro_rules! command_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident = $id:expr),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u32)]
        pub enum $name {
            $($variant = $id),+
        }

        impl $name {
            pub fn from_id(id: u32) -> TeeResult<Self> {
                match id {
                    $(x if x == $id => Ok($name::$variant),)+
                    _ => Err(TeeError::InvalidCmd),
                }
            }

            pub fn id(&self) -> u32 {
                *self as u32
            }
        }
    };
}

command_enum! {
    /// Global service commands (0x0 is the invalid ID)
    GlobalCommand {
        BootAck = 0x1,
        OpenSession = 0x2,
        CloseSession = 0x3,
        LoadSecureApp = 0x4,
        NeedLoadApp = 0x5,
        RegisterAgent = 0x6,
        UnregisterAgent = 0x7,
        RegisterNotifyMemory = 0x8,
        UnregisterNotifyMemory = 0x9,
        InitContentPath = 0xA,
        TerminateContentPath = 0xB,
        AllocExceptionMem = 0xC,
        TeeTime = 0xD,
    }
}

impl GlobalCommand {
    pub fn shape(&self) -> Option<ParamShape> {
        use GlobalCommand::*;
        match self {
            BootAck => Some([NONE, NONE, NONE, NONE]),
            NeedLoadApp => Some([VO, NONE, NONE, NONE]),
            RegisterNotifyMemory => Some([VI, VO, NONE, NONE]),
            UnregisterNotifyMemory => Some([VI, NONE, NONE, NONE]),
            AllocExceptionMem => Some([VI, NONE, NONE, NONE]),
            TeeTime => Some([VO, NONE, NONE, NONE]),
            OpenSession | CloseSession | LoadSecureApp | RegisterAgent | UnregisterAgent
            | InitContentPath | TerminateContentPath => None,
        }
    }
}

command_enum! {
    /// Echo service commands (0x10 is the invalid ID)
    EchoCommand {
        SendCmd = 0x11,
    }
}

impl EchoCommand {
    pub fn shape(&self) -> ParamShape {
        [MI, MO, NONE, NONE]
    }
}

command_enum! {
    /// Storage service commands (0x10 is the invalid ID)
    StorageCommand {
        Open = 0x11,
        Close = 0x12,
        CloseAll = 0x13,
        Read = 0x14,
        Write = 0x15,
        Seek = 0x16,
        Tell = 0x17,
        Truncate = 0x18,
        Remove = 0x19,
        Finfo = 0x1A,
        Fsync = 0x1B,
    }
}

impl StorageCommand {
    pub fn shape(&self) -> ParamShape {
        use StorageCommand::*;
        match self {
            Open => [MI, VI, MO, NONE],
            Close | Fsync => [MI, NONE, NONE, NONE],
            CloseAll => [NONE, NONE, NONE, NONE],
            Read => [MI, MO, NONE, NONE],
            Write => [MI, MI, NONE, NONE],
            Seek | Truncate => [MI, VI, NONE, NONE],
            Tell | Finfo => [MI, VO, NONE, NONE],
            Remove => [MI, NONE, NONE, NONE],
        }
    }
}

command_enum! {
    /// Crypto service commands (0x10 is the invalid ID)
    CryptCommand {
        Encrypt = 0x11,
        Decrypt = 0x12,
        Md5 = 0x13,
        Sha1 = 0x14,
        Sha224 = 0x15,
        Sha256 = 0x16,
        Sha384 = 0x17,
        Sha512 = 0x18,
        HmacMd5 = 0x19,
        HmacSha1 = 0x1A,
        HmacSha224 = 0x1B,
        HmacSha256 = 0x1C,
        HmacSha384 = 0x1D,
        HmacSha512 = 0x1E,
        CipherAesCbc = 0x1F,
        CipherAesCbcCts = 0x20,
        CipherAesEcb = 0x21,
        CipherAesEcbPkcs5 = 0x22,
        CipherAesCtr = 0x23,
        CipherAesCbcMac = 0x24,
        CipherAesXcbcMac = 0x25,
        CipherAesCmac = 0x26,
        CipherAesCcm = 0x27,
        CipherAesXts = 0x28,
        CipherDesEcb = 0x29,
        CipherDesCbc = 0x2A,
        CipherDes3Ecb = 0x2B,
        CipherDes3Cbc = 0x2C,
        CipherRnd = 0x2D,
        CipherDk = 0x2E,
        RsaesPkcs1V15 = 0x2F,
        RsaesOaepSha1 = 0x30,
        RsaesOaepSha224 = 0x31,
        RsaesOaepSha256 = 0x32,
        RsaesOaepSha384 = 0x33,
        RsaesOaepSha512 = 0x34,
        RsaNopad = 0x35,
        RsassaPkcs1V15Md5 = 0x36,
        RsassaPkcs1V15Sha1 = 0x37,
        RsassaPkcs1V15Sha224 = 0x38,
        RsassaPkcs1V15Sha256 = 0x39,
        RsassaPkcs1V15Sha384 = 0x3A,
        RsassaPkcs1V15Sha512 = 0x3B,
        RsassaPssSha1 = 0x3C,
        RsassaPssSha224 = 0x3D,
        RsassaPssSha256 = 0x3E,
        RsassaPssSha384 = 0x3F,
        RsassaPssSha512 = 0x40,
        DsaSha1 = 0x41,
    }
}

impl CryptCommand {
    /// The algorithm a stateful crypto command drives
    pub fn algorithm(&self) -> Option<Algorithm> {
        use CryptCommand::*;
        use HashAlgorithm as H;
        Some(match self {
            Md5 => Algorithm::Digest(H::Md5),
            Sha1 => Algorithm::Digest(H::Sha1),
            Sha224 => Algorithm::Digest(H::Sha224),
            Sha256 => Algorithm::Digest(H::Sha256),
            Sha384 => Algorithm::Digest(H::Sha384),
            Sha512 => Algorithm::Digest(H::Sha512),
            HmacMd5 => Algorithm::Hmac(H::Md5),
            HmacSha1 => Algorithm::Hmac(H::Sha1),
            HmacSha224 => Algorithm::Hmac(H::Sha224),
            HmacSha256 => Algorithm::Hmac(H::Sha256),
            HmacSha384 => Algorithm::Hmac(H::Sha384),
            HmacSha512 => Algorithm::Hmac(H::Sha512),
            CipherAesCbc => Algorithm::AesCbc,
            CipherAesCbcCts => Algorithm::AesCbcCts,
            CipherAesEcb => Algorithm::AesEcb,
            CipherAesEcbPkcs5 => Algorithm::AesEcbPkcs5,
            CipherAesCtr => Algorithm::AesCtr,
            CipherAesCbcMac => Algorithm::AesCbcMac,
            CipherAesXcbcMac => Algorithm::AesXcbcMac,
            CipherAesCmac => Algorithm::AesCmac,
            CipherAesCcm => Algorithm::AesCcm,
            CipherAesXts => Algorithm::AesXts,
            CipherDesEcb => Algorithm::DesEcb,
            CipherDesCbc => Algorithm::DesCbc,
            CipherDes3Ecb => Algorithm::Des3Ecb,
            CipherDes3Cbc => Algorithm::Des3Cbc,
            RsaesPkcs1V15 => Algorithm::RsaesPkcs1V15,
            RsaesOaepSha1 => Algorithm::RsaesOaep(H::Sha1),
            RsaesOaepSha224 => Algorithm::RsaesOaep(H::Sha224),
            RsaesOaepSha256 => Algorithm::RsaesOaep(H::Sha256),
            RsaesOaepSha384 => Algorithm::RsaesOaep(H::Sha384),
            RsaesOaepSha512 => Algorithm::RsaesOaep(H::Sha512),
            RsaNopad => Algorithm::RsaNoPad,
            RsassaPkcs1V15Md5 => Algorithm::RsassaPkcs1V15(H::Md5),
            RsassaPkcs1V15Sha1 => Algorithm::RsassaPkcs1V15(H::Sha1),
            RsassaPkcs1V15Sha224 => Algorithm::RsassaPkcs1V15(H::Sha224),
            RsassaPkcs1V15Sha256 => Algorithm::RsassaPkcs1V15(H::Sha256),
            RsassaPkcs1V15Sha384 => Algorithm::RsassaPkcs1V15(H::Sha384),
            RsassaPkcs1V15Sha512 => Algorithm::RsassaPkcs1V15(H::Sha512),
            RsassaPssSha1 => Algorithm::RsassaPss(H::Sha1),
            RsassaPssSha224 => Algorithm::RsassaPss(H::Sha224),
            RsassaPssSha256 => Algorithm::RsassaPss(H::Sha256),
            RsassaPssSha384 => Algorithm::RsassaPss(H::Sha384),
            RsassaPssSha512 => Algorithm::RsassaPss(H::Sha512),
            DsaSha1 => Algorithm::DsaSha1,
            Encrypt | Decrypt | CipherRnd | CipherDk => return None,
        })
    }

    pub fn shape(&self) -> Option<ParamShape> {
        use crate::crypto::AlgorithmClass as C;
        match self {
            CryptCommand::Encrypt | CryptCommand::Decrypt => None,
            CryptCommand::CipherRnd => Some([NONE, NONE, NONE, MO]),
            CryptCommand::CipherDk => Some([MI, VI, MI, MO]),
            other => other.algorithm().map(|alg| match alg.class() {
                C::Digest => [NONE, VI, MI, MO],
                C::Cipher | C::AuthenticatedEncryption | C::Mac => [MI, VI, MI, MO],
                C::AsymmetricCipher | C::Signature => [MI, VI, MI, MIO],
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::param::encode_types;

    #[test]
    fn test_service_uuids() {
        assert_eq!(ServiceId::from_uuid(&TeeUuid::repeated(2)).unwrap(), ServiceId::Storage);
        assert_eq!(ServiceId::from_uuid(&TeeUuid::repeated(4)).unwrap(), ServiceId::Crypto);
        // the UT service is not registered at this layer
        assert_eq!(
            ServiceId::from_uuid(&TeeUuid::repeated(3)),
            Err(TeeError::ServiceNotExist)
        );
    }

    #[test]
    fn test_sentinels_always_invalid() {
        for service in ServiceId::ALL {
            assert_eq!(service.command(CMD_ID_UNKNOWN), Err(TeeError::InvalidCmd));
            assert_eq!(service.command(CMD_ID_MAX), Err(TeeError::InvalidCmd));
        }
        assert_eq!(ServiceId::Global.command(0x0), Err(TeeError::InvalidCmd));
        assert_eq!(ServiceId::Crypto.command(0x10), Err(TeeError::InvalidCmd));
        assert_eq!(ServiceId::Crypto.command(0x42), Err(TeeError::InvalidCmd));
    }

    #[test]
    fn test_ids_are_per_service() {
        assert_eq!(
            ServiceId::Echo.command(0x11).unwrap(),
            Command::Echo(EchoCommand::SendCmd)
        );
        assert_eq!(
            ServiceId::Storage.command(0x11).unwrap(),
            Command::Storage(StorageCommand::Open)
        );
        assert_eq!(
            ServiceId::Crypto.command(0x11).unwrap(),
            Command::Crypt(CryptCommand::Encrypt)
        );
        assert_eq!(ServiceId::Echo.command(0x12), Err(TeeError::InvalidCmd));
    }

    #[test]
    fn test_crypt_ids_follow_header_order() {
        assert_eq!(CryptCommand::CipherAesCbc.id(), 0x1F);
        assert_eq!(CryptCommand::CipherRnd.id(), 0x2D);
        assert_eq!(CryptCommand::DsaSha1.id(), 0x41);
        assert_eq!(CryptCommand::from_id(0x2E).unwrap(), CryptCommand::CipherDk);
        assert_eq!(StorageCommand::Fsync.id(), 0x1B);
        assert_eq!(GlobalCommand::TeeTime.id(), 0xD);
    }

    #[test]
    fn test_crypt_shapes() {
        let aes = CryptCommand::CipherAesCbc.shape().unwrap();
        assert_eq!(aes, [MI, VI, MI, MO]);
        assert_eq!(
            encode_types(aes[0] as u32, aes[1] as u32, aes[2] as u32, aes[3] as u32),
            0x6515
        );
        assert_eq!(CryptCommand::Sha256.shape().unwrap()[0], NONE);
        assert_eq!(CryptCommand::RsassaPssSha256.shape().unwrap()[3], MIO);
        assert_eq!(CryptCommand::Encrypt.shape(), None);
    }

    #[test]
    fn test_service_names() {
        assert_eq!(ServiceId::from_name("Crypto"), Some(ServiceId::Crypto));
        assert_eq!(ServiceId::from_name("ut"), None);
        assert_eq!(ServiceId::Storage.to_string(), "storage");
    }
}
