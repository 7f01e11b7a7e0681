//! Object attributes
//!
//! The two top bytes of an attribute ID are a class/type discriminant:
//! bit 29 marks a value (integer pair) attribute, bit 28 a public one.

use crate::error::{TeeError, TeeResult};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

const FLAG_VALUE: u32 = 0x2000_0000;
const FLAG_PUBLIC: u32 = 0x1000_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum AttributeId {
    SecretValue = 0xC000_0000,
    RsaModulus = 0xD000_0130,
    RsaPublicExponent = 0xD000_0230,
    RsaPrivateExponent = 0xC000_0330,
    RsaPrime1 = 0xC000_0430,
    RsaPrime2 = 0xC000_0530,
    RsaExponent1 = 0xC000_0630,
    RsaExponent2 = 0xC000_0730,
    RsaCoefficient = 0xC000_0830,
    DsaPrime = 0xD000_1031,
    DsaSubprime = 0xD000_1131,
    DsaBase = 0xD000_1231,
    DsaPublicValue = 0xD000_0131,
    DsaPrivateValue = 0xC000_0231,
    DhPrime = 0xD000_1032,
    DhSubprime = 0xD000_1132,
    DhBase = 0xD000_1232,
    DhXBits = 0xF000_1332,
    DhPublicValue = 0xD000_0132,
    DhPrivateValue = 0xC000_0232,
    RsaOaepLabel = 0xD000_0930,
    RsaPssSaltLength = 0xF000_0A30,
}

impl TryFrom<u32> for AttributeId {
    type Error = TeeError;

    fn try_from(v: u32) -> TeeResult<Self> {
        use AttributeId::*;
        const ALL: [AttributeId; 22] = [
            SecretValue,
            RsaModulus,
            RsaPublicExponent,
            RsaPrivateExponent,
            RsaPrime1,
            RsaPrime2,
            RsaExponent1,
            RsaExponent2,
            RsaCoefficient,
            DsaPrime,
            DsaSubprime,
            DsaBase,
            DsaPublicValue,
            DsaPrivateValue,
            DhPrime,
            DhSubprime,
            DhBase,
            DhXBits,
            DhPublicValue,
            DhPrivateValue,
            RsaOaepLabel,
            RsaPssSaltLength,
        ];
        ALL.into_iter()
            .find(|id| *id as u32 == v)
            .ok_or(TeeError::BadParameters)
    }
}

impl AttributeId {
    pub fn is_value(&self) -> bool {
        *self as u32 & FLAG_VALUE != 0
    }

    pub fn is_public(&self) -> bool {
        *self as u32 & FLAG_PUBLIC != 0
    }
}

/// Payload of an attribute
#[derive(Clone, PartialEq, Eq)]
pub enum AttributeContent {
    Ref(Vec<u8>),
    Value { a: u32, b: u32 },
}

impl std::fmt::Debug for AttributeContent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttributeContent::Ref(bytes) => write!(f, "Ref({} bytes)", bytes.len()),
            AttributeContent::Value { a, b } => write!(f, "Value({}, {})", a, b),
        }
    }
}

impl Drop for AttributeContent {
    fn drop(&mut self) {
        if let AttributeContent::Ref(bytes) = self {
            bytes.zeroize();
        }
    }
}

/// One attribute as supplied by a caller (raw ID, not yet validated)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub id: u32,
    pub content: AttributeContent,
}

impl Attribute {
    pub fn reference(id: AttributeId, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            id: id as u32,
            content: AttributeContent::Ref(bytes.into()),
        }
    }

    pub fn value(id: AttributeId, a: u32, b: u32) -> Self {
        Self {
            id: id as u32,
            content: AttributeContent::Value { a, b },
        }
    }

    /// Resolve the ID and check that the content kind matches what the ID declares
    pub fn checked_id(&self) -> TeeResult<AttributeId> {
        let id = AttributeId::try_from(self.id)?;
        let is_value = matches!(self.content, AttributeContent::Value { .. });
        if id.is_value() != is_value {
            return Err(TeeError::BadParameters);
        }
        Ok(id)
    }

    /// Byte length of a reference attribute
    pub fn len(&self) -> usize {
        match &self.content {
            AttributeContent::Ref(bytes) => bytes.len(),
            AttributeContent::Value { .. } => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn bytes(&self) -> Option<&[u8]> {
        match &self.content {
            AttributeContent::Ref(bytes) => Some(bytes),
            AttributeContent::Value { .. } => None,
        }
    }
}
