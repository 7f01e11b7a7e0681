//! Objects: key material and data referenced by opaque handles
//!
//! - **Types**: object classes, attribute IDs and usage/handle flags
//! - **Registry**: per-session arena that owns every object and hands out
//!   generation-tagged [`ObjectHandle`]s

pub mod attribute;
pub mod registry;

pub use attribute::{Attribute, AttributeContent, AttributeId};
pub use registry::{ObjectEntry, ObjectRegistry};

use crate::error::{TeeError, TeeResult};
use serde::{Deserialize, Serialize};

/// Maximum length of an object name in bytes
pub const MAX_OBJECT_NAME_LEN: usize = 255;

/// Usage flags stored in [`ObjectInfo::object_usage`]
pub mod usage {
    pub const EXTRACTABLE: u32 = 0x0000_0001;
    pub const ENCRYPT: u32 = 0x0000_0002;
    pub const DECRYPT: u32 = 0x0000_0004;
    pub const MAC: u32 = 0x0000_0008;
    pub const SIGN: u32 = 0x0000_0010;
    pub const VERIFY: u32 = 0x0000_0020;
    pub const DERIVE: u32 = 0x0000_0040;
    pub const ALL: u32 = 0xFFFF_FFFF;
}

/// Handle flags stored in [`ObjectInfo::handle_flags`]
pub mod handle_flags {
    pub const PERSISTENT: u32 = 0x0001_0000;
    pub const INITIALIZED: u32 = 0x0002_0000;
    pub const KEY_SET: u32 = 0x0004_0000;
}

/// Class of key (or pure data) held by an object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum ObjectType {
    Aes = 0xA000_0010,
    Des = 0xA000_0011,
    Des3 = 0xA000_0013,
    HmacMd5 = 0xA000_0001,
    HmacSha1 = 0xA000_0002,
    HmacSha224 = 0xA000_0003,
    HmacSha256 = 0xA000_0004,
    HmacSha384 = 0xA000_0005,
    HmacSha512 = 0xA000_0006,
    RsaPublicKey = 0xA000_0030,
    RsaKeypair = 0xA100_0030,
    DsaPublicKey = 0xA000_0031,
    DsaKeypair = 0xA100_0031,
    DhKeypair = 0xA100_0032,
    GenericSecret = 0xA000_0000,
    Data = 0xA100_0033,
}

impl TryFrom<u32> for ObjectType {
    type Error = TeeError;

    fn try_from(v: u32) -> TeeResult<Self> {
        Ok(match v {
            0xA000_0010 => ObjectType::Aes,
            0xA000_0011 => ObjectType::Des,
            0xA000_0013 => ObjectType::Des3,
            0xA000_0001 => ObjectType::HmacMd5,
            0xA000_0002 => ObjectType::HmacSha1,
            0xA000_0003 => ObjectType::HmacSha224,
            0xA000_0004 => ObjectType::HmacSha256,
            0xA000_0005 => ObjectType::HmacSha384,
            0xA000_0006 => ObjectType::HmacSha512,
            0xA000_0030 => ObjectType::RsaPublicKey,
            0xA100_0030 => ObjectType::RsaKeypair,
            0xA000_0031 => ObjectType::DsaPublicKey,
            0xA100_0031 => ObjectType::DsaKeypair,
            0xA100_0032 => ObjectType::DhKeypair,
            0xA000_0000 => ObjectType::GenericSecret,
            0xA100_0033 => ObjectType::Data,
            _ => return Err(TeeError::NotSupported),
        })
    }
}

impl ObjectType {
    /// Attributes an object of this type may carry
    pub fn permitted_attributes(&self) -> &'static [AttributeId] {
        use AttributeId::*;
        match self {
            ObjectType::Aes
            | ObjectType::Des
            | ObjectType::Des3
            | ObjectType::HmacMd5
            | ObjectType::HmacSha1
            | ObjectType::HmacSha224
            | ObjectType::HmacSha256
            | ObjectType::HmacSha384
            | ObjectType::HmacSha512
            | ObjectType::GenericSecret => &[SecretValue],
            ObjectType::RsaPublicKey => &[RsaModulus, RsaPublicExponent],
            ObjectType::RsaKeypair => &[
                RsaModulus,
                RsaPublicExponent,
                RsaPrivateExponent,
                RsaPrime1,
                RsaPrime2,
                RsaExponent1,
                RsaExponent2,
                RsaCoefficient,
            ],
            ObjectType::DsaPublicKey => &[DsaPrime, DsaSubprime, DsaBase, DsaPublicValue],
            ObjectType::DsaKeypair => &[
                DsaPrime,
                DsaSubprime,
                DsaBase,
                DsaPublicValue,
                DsaPrivateValue,
            ],
            ObjectType::DhKeypair => &[
                DhPrime,
                DhSubprime,
                DhBase,
                DhXBits,
                DhPublicValue,
                DhPrivateValue,
            ],
            ObjectType::Data => &[],
        }
    }

    /// Only pure data objects may be populated again without a reset
    pub fn permits_repopulate(&self) -> bool {
        matches!(self, ObjectType::Data)
    }

    pub fn is_secret_key(&self) -> bool {
        self.permitted_attributes() == [AttributeId::SecretValue]
    }
}

/// Metadata snapshot of an object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectInfo {
    pub object_type: ObjectType,
    /// Current key size in bytes (0 until populated)
    pub object_size: u32,
    pub max_object_size: u32,
    pub object_usage: u32,
    pub data_size: u32,
    pub data_position: u32,
    pub handle_flags: u32,
}

/// Opaque, copyable reference to an object in one session's registry
///
/// A handle names its owning session and a generation-tagged slot, so a
/// closed or foreign handle can never resolve to a live object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectHandle {
    session: u32,
    index: u32,
    generation: u32,
}

/// Size of the wire form of an [`ObjectHandle`]
pub const HANDLE_WIRE_LEN: usize = 12;

impl ObjectHandle {
    pub(crate) fn new(session: u32, index: u32, generation: u32) -> Self {
        Self {
            session,
            index,
            generation,
        }
    }

    pub fn session(&self) -> u32 {
        self.session
    }

    pub(crate) fn index(&self) -> usize {
        self.index as usize
    }

    pub(crate) fn generation(&self) -> u32 {
        self.generation
    }

    /// Little-endian `{session, index, generation}`, used as the key reference memref
    pub fn to_bytes(&self) -> [u8; HANDLE_WIRE_LEN] {
        let mut out = [0u8; HANDLE_WIRE_LEN];
        out[..4].copy_from_slice(&self.session.to_le_bytes());
        out[4..8].copy_from_slice(&self.index.to_le_bytes());
        out[8..].copy_from_slice(&self.generation.to_le_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> TeeResult<Self> {
        if bytes.len() != HANDLE_WIRE_LEN {
            return Err(TeeError::BadParameters);
        }
        let word = |i: usize| u32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);
        Ok(Self::new(word(0), word(4), word(8)))
    }
}
