//! Crypto operations: algorithm catalogue, per-operation state machine and
//! the engine seam behind it
//!
//! - **Operation**: enforces `init → update* → final` call sequences
//! - **Engine**: the algorithm implementations (external; a software engine
//!   covering SHA-2, HMAC-SHA-2 and AES is bundled)
//! - **KDF**: hash-counter key derivation modes

pub mod engine;
pub mod kdf;
pub mod operation;

pub use engine::{CryptoEngine, OperationContext, SoftwareEngine};
pub use kdf::{DeriveHash, DeriveMode};
pub use operation::{CryptoOperation, OperationState};

use crate::error::{TeeError, TeeResult};
use crate::object::{usage, Attribute, AttributeId, ObjectEntry, ObjectType};

/// Direction value for encryption in a cipher command's value slot
pub const CIPHER_ENCRYPT: u32 = 0;
/// Direction value for decryption in a cipher command's value slot
pub const CIPHER_DECRYPT: u32 = 1;

/// Step requested by a crypto command (slot 1, value `a`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Phase {
    Init = 0,
    Update = 1,
    UpdateAad = 2,
    DoFinal = 3,
    CompareFinal = 4,
    SignDigest = 5,
    VerifyDigest = 6,
}

impl TryFrom<u32> for Phase {
    type Error = TeeError;

    fn try_from(v: u32) -> TeeResult<Self> {
        Ok(match v {
            0 => Phase::Init,
            1 => Phase::Update,
            2 => Phase::UpdateAad,
            3 => Phase::DoFinal,
            4 => Phase::CompareFinal,
            5 => Phase::SignDigest,
            6 => Phase::VerifyDigest,
            _ => return Err(TeeError::BadParameters),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashAlgorithm {
    Md5,
    Sha1,
    Sha224,
    Sha256,
    Sha384,
    Sha512,
}

impl HashAlgorithm {
    pub fn output_len(&self) -> usize {
        match self {
            HashAlgorithm::Md5 => 16,
            HashAlgorithm::Sha1 => 20,
            HashAlgorithm::Sha224 => 28,
            HashAlgorithm::Sha256 => 32,
            HashAlgorithm::Sha384 => 48,
            HashAlgorithm::Sha512 => 64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Algorithm {
    AesCbc,
    AesCbcCts,
    AesEcb,
    AesEcbPkcs5,
    AesCtr,
    AesCbcMac,
    AesXcbcMac,
    AesCmac,
    AesCcm,
    AesXts,
    DesEcb,
    DesCbc,
    Des3Ecb,
    Des3Cbc,
    Digest(HashAlgorithm),
    Hmac(HashAlgorithm),
    RsaesPkcs1V15,
    RsaesOaep(HashAlgorithm),
    RsaNoPad,
    RsassaPkcs1V15(HashAlgorithm),
    RsassaPss(HashAlgorithm),
    DsaSha1,
}

/// Which call sequences an algorithm supports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlgorithmClass {
    Cipher,
    AuthenticatedEncryption,
    Mac,
    Digest,
    AsymmetricCipher,
    Signature,
}

impl Algorithm {
    pub fn class(&self) -> AlgorithmClass {
        match self {
            Algorithm::AesCbc
            | Algorithm::AesCbcCts
            | Algorithm::AesEcb
            | Algorithm::AesEcbPkcs5
            | Algorithm::AesCtr
            | Algorithm::AesXts
            | Algorithm::DesEcb
            | Algorithm::DesCbc
            | Algorithm::Des3Ecb
            | Algorithm::Des3Cbc => AlgorithmClass::Cipher,
            Algorithm::AesCcm => AlgorithmClass::AuthenticatedEncryption,
            Algorithm::AesCbcMac | Algorithm::AesXcbcMac | Algorithm::AesCmac | Algorithm::Hmac(_) => {
                AlgorithmClass::Mac
            }
            Algorithm::Digest(_) => AlgorithmClass::Digest,
            Algorithm::RsaesPkcs1V15 | Algorithm::RsaesOaep(_) | Algorithm::RsaNoPad => {
                AlgorithmClass::AsymmetricCipher
            }
            Algorithm::RsassaPkcs1V15(_) | Algorithm::RsassaPss(_) | Algorithm::DsaSha1 => {
                AlgorithmClass::Signature
            }
        }
    }

    pub fn requires_key(&self) -> bool {
        self.class() != AlgorithmClass::Digest
    }

    /// Whether an object of `object_type` can key this algorithm
    pub fn accepts_key(&self, object_type: ObjectType) -> bool {
        use ObjectType::*;
        match self {
            Algorithm::AesCbc
            | Algorithm::AesCbcCts
            | Algorithm::AesEcb
            | Algorithm::AesEcbPkcs5
            | Algorithm::AesCtr
            | Algorithm::AesCbcMac
            | Algorithm::AesXcbcMac
            | Algorithm::AesCmac
            | Algorithm::AesCcm
            | Algorithm::AesXts => object_type == Aes,
            Algorithm::DesEcb | Algorithm::DesCbc => object_type == Des,
            Algorithm::Des3Ecb | Algorithm::Des3Cbc => object_type == Des3,
            Algorithm::Digest(_) => false,
            Algorithm::Hmac(hash) => {
                let typed = match hash {
                    HashAlgorithm::Md5 => HmacMd5,
                    HashAlgorithm::Sha1 => HmacSha1,
                    HashAlgorithm::Sha224 => HmacSha224,
                    HashAlgorithm::Sha256 => HmacSha256,
                    HashAlgorithm::Sha384 => HmacSha384,
                    HashAlgorithm::Sha512 => HmacSha512,
                };
                object_type == typed || object_type == GenericSecret
            }
            Algorithm::RsaesPkcs1V15
            | Algorithm::RsaesOaep(_)
            | Algorithm::RsaNoPad
            | Algorithm::RsassaPkcs1V15(_)
            | Algorithm::RsassaPss(_) => matches!(object_type, RsaPublicKey | RsaKeypair),
            Algorithm::DsaSha1 => matches!(object_type, DsaPublicKey | DsaKeypair),
        }
    }
}

/// What an initialized operation does
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationMode {
    Encrypt,
    Decrypt,
    Mac,
    Digest,
    Sign,
    Verify,
}

impl OperationMode {
    /// Mode for `algorithm` given the direction word of the init command
    pub fn for_algorithm(algorithm: Algorithm, direction: u32) -> TeeResult<Self> {
        let encrypt = match direction {
            CIPHER_ENCRYPT => true,
            CIPHER_DECRYPT => false,
            _ => return Err(TeeError::BadParameters),
        };
        Ok(match algorithm.class() {
            AlgorithmClass::Cipher
            | AlgorithmClass::AuthenticatedEncryption
            | AlgorithmClass::AsymmetricCipher => {
                if encrypt {
                    OperationMode::Encrypt
                } else {
                    OperationMode::Decrypt
                }
            }
            AlgorithmClass::Mac => OperationMode::Mac,
            AlgorithmClass::Digest => OperationMode::Digest,
            AlgorithmClass::Signature => {
                if encrypt {
                    OperationMode::Sign
                } else {
                    OperationMode::Verify
                }
            }
        })
    }

    /// Usage flag the key object must carry
    pub fn required_usage(&self) -> u32 {
        match self {
            OperationMode::Encrypt => usage::ENCRYPT,
            OperationMode::Decrypt => usage::DECRYPT,
            OperationMode::Mac => usage::MAC,
            OperationMode::Digest => 0,
            OperationMode::Sign => usage::SIGN,
            OperationMode::Verify => usage::VERIFY,
        }
    }
}

/// Key material copied out of an object when it is bound to an operation
#[derive(Debug, Clone)]
pub struct KeyMaterial {
    pub object_type: ObjectType,
    pub usage: u32,
    attributes: Vec<Attribute>,
}

impl KeyMaterial {
    pub fn new(object_type: ObjectType, usage: u32, attributes: Vec<Attribute>) -> Self {
        Self {
            object_type,
            usage,
            attributes,
        }
    }

    /// Snapshot a populated object. Unpopulated objects cannot key anything.
    pub fn from_entry(entry: &ObjectEntry) -> TeeResult<Self> {
        if !entry.is_populated() {
            return Err(TeeError::BadState);
        }
        Ok(Self::new(
            entry.info.object_type,
            entry.info.object_usage,
            entry.attributes().cloned().collect(),
        ))
    }

    pub fn attribute(&self, id: AttributeId) -> Option<&Attribute> {
        self.attributes
            .iter()
            .find(|a| AttributeId::try_from(a.id).ok() == Some(id))
    }

    /// The secret value of a symmetric key
    pub fn secret(&self) -> TeeResult<&[u8]> {
        self.attribute(AttributeId::SecretValue)
            .and_then(|a| a.bytes())
            .ok_or(TeeError::BadState)
    }
}

/// Compare two byte strings in time independent of where they differ
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    std::hint::black_box(diff) == 0
}
