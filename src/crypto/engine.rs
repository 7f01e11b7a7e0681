//! Crypto engine seam and the bundled software engine
//!
//! The dispatcher never touches algorithm code directly: it asks a
//! [`CryptoEngine`] for an [`OperationContext`] when an operation is
//! initialized, then drives that context through the state machine in
//! [`super::operation`].

use super::kdf::{self, DeriveHash, DeriveMode};
use super::{Algorithm, HashAlgorithm, KeyMaterial, OperationMode};
use crate::error::{TeeError, TeeResult};
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes::{Aes128, Aes192, Aes256, Block};
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, InvalidLength, KeyIvInit, StreamCipher};
use cbc::{Decryptor as CbcDecrypt, Encryptor as CbcEncrypt};
use cbc_mac::CbcMac;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::digest::DynDigest;
use sha2::{Sha224, Sha256, Sha384, Sha512};
use zeroize::Zeroizing;

const AES_BLOCK: usize = 16;

fn keyed<K: KeyInit>(key: &[u8]) -> TeeResult<K> {
    K::new_from_slice(key).map_err(|_| TeeError::BadParameters)
}

/// Algorithm provider behind every crypto command
pub trait CryptoEngine: Send + Sync {
    /// Start a new context for `algorithm` in `mode`
    fn start(
        &self,
        algorithm: Algorithm,
        mode: OperationMode,
        key: Option<&KeyMaterial>,
        iv: &[u8],
    ) -> TeeResult<Box<dyn OperationContext>>;

    /// Fill `out` with random bytes
    fn random(&self, out: &mut [u8]) -> TeeResult<()>;

    /// Derive `out_len` bytes from a shared secret
    fn derive_key(
        &self,
        mode: DeriveMode,
        hash: DeriveHash,
        secret: &[u8],
        other_info: &[u8],
        out_len: usize,
    ) -> TeeResult<Vec<u8>>;
}

/// Running state of one initialized operation
///
/// The `*_len` methods report exactly how many bytes the matching call will
/// produce, so callers can reject a short output buffer before any state
/// changes.
pub trait OperationContext: Send {
    fn update_len(&self, input_len: usize) -> usize;

    fn update(&mut self, input: &[u8]) -> TeeResult<Vec<u8>>;

    fn final_len(&self, input_len: usize) -> usize;

    fn finish(&mut self, input: &[u8]) -> TeeResult<Vec<u8>>;

    fn update_aad(&mut self, _aad: &[u8]) -> TeeResult<()> {
        Err(TeeError::NotSupported)
    }

    fn signature_len(&self) -> usize {
        0
    }

    fn sign_digest(&mut self, _digest: &[u8]) -> TeeResult<Vec<u8>> {
        Err(TeeError::NotSupported)
    }

    fn verify_digest(&mut self, _digest: &[u8], _signature: &[u8]) -> TeeResult<()> {
        Err(TeeError::NotSupported)
    }
}

/// Pure software engine: SHA-2 digests, HMAC-SHA-2, AES (ECB, CBC, CTR,
/// CBC-MAC), OS randomness and the hash-counter KDFs. Everything else
/// reports `NotSupported`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SoftwareEngine;

impl SoftwareEngine {
    pub fn new() -> Self {
        Self
    }
}

impl CryptoEngine for SoftwareEngine {
    fn start(
        &self,
        algorithm: Algorithm,
        mode: OperationMode,
        key: Option<&KeyMaterial>,
        iv: &[u8],
    ) -> TeeResult<Box<dyn OperationContext>> {
        match algorithm {
            Algorithm::Digest(hash) => Ok(Box::new(DigestContext::new(hash)?)),
            Algorithm::Hmac(hash) => {
                let key = key.ok_or(TeeError::BadState)?;
                Ok(Box::new(HmacContext::new(hash, key.secret()?)?))
            }
            Algorithm::AesEcb | Algorithm::AesCbc | Algorithm::AesCtr | Algorithm::AesCbcMac => {
                let key = key.ok_or(TeeError::BadState)?;
                Ok(Box::new(AesContext::new(algorithm, mode, key.secret()?, iv)?))
            }
            other => {
                log::debug!("software engine has no implementation for {:?}", other);
                Err(TeeError::NotSupported)
            }
        }
    }

    fn random(&self, out: &mut [u8]) -> TeeResult<()> {
        rand::rngs::OsRng
            .try_fill_bytes(out)
            .map_err(|_| TeeError::Generic)
    }

    fn derive_key(
        &self,
        mode: DeriveMode,
        hash: DeriveHash,
        secret: &[u8],
        other_info: &[u8],
        out_len: usize,
    ) -> TeeResult<Vec<u8>> {
        kdf::derive(mode, hash, secret, other_info, out_len)
    }
}

// ---- digests ----

struct DigestContext {
    hasher: Box<dyn DynDigest + Send>,
}

impl DigestContext {
    fn new(hash: HashAlgorithm) -> TeeResult<Self> {
        let hasher: Box<dyn DynDigest + Send> = match hash {
            HashAlgorithm::Sha224 => Box::new(Sha224::default()),
            HashAlgorithm::Sha256 => Box::new(Sha256::default()),
            HashAlgorithm::Sha384 => Box::new(Sha384::default()),
            HashAlgorithm::Sha512 => Box::new(Sha512::default()),
            HashAlgorithm::Md5 | HashAlgorithm::Sha1 => return Err(TeeError::NotSupported),
        };
        Ok(Self { hasher })
    }
}

impl OperationContext for DigestContext {
    fn update_len(&self, _input_len: usize) -> usize {
        0
    }

    fn update(&mut self, input: &[u8]) -> TeeResult<Vec<u8>> {
        self.hasher.update(input);
        Ok(Vec::new())
    }

    fn final_len(&self, _input_len: usize) -> usize {
        self.hasher.output_size()
    }

    fn finish(&mut self, input: &[u8]) -> TeeResult<Vec<u8>> {
        self.hasher.update(input);
        Ok(self.hasher.finalize_reset().into_vec())
    }
}

// ---- HMAC ----

enum HmacState {
    Sha224(Hmac<Sha224>),
    Sha256(Hmac<Sha256>),
    Sha384(Hmac<Sha384>),
    Sha512(Hmac<Sha512>),
}

macro_rules! each_hmac {
    ($state:expr, $m:ident => $body:expr) => {
        match $state {
            HmacState::Sha224($m) => $body,
            HmacState::Sha256($m) => $body,
            HmacState::Sha384($m) => $body,
            HmacState::Sha512($m) => $body,
        }
    };
}

struct HmacContext {
    state: Option<HmacState>,
    output_len: usize,
}

impl HmacContext {
    fn new(hash: HashAlgorithm, key: &[u8]) -> TeeResult<Self> {
        let state = match hash {
            HashAlgorithm::Sha224 => HmacState::Sha224(keyed(key)?),
            HashAlgorithm::Sha256 => HmacState::Sha256(keyed(key)?),
            HashAlgorithm::Sha384 => HmacState::Sha384(keyed(key)?),
            HashAlgorithm::Sha512 => HmacState::Sha512(keyed(key)?),
            HashAlgorithm::Md5 | HashAlgorithm::Sha1 => return Err(TeeError::NotSupported),
        };
        Ok(Self {
            state: Some(state),
            output_len: hash.output_len(),
        })
    }
}

impl OperationContext for HmacContext {
    fn update_len(&self, _input_len: usize) -> usize {
        0
    }

    fn update(&mut self, input: &[u8]) -> TeeResult<Vec<u8>> {
        let state = self.state.as_mut().ok_or(TeeError::BadState)?;
        each_hmac!(state, mac => Mac::update(mac, input));
        Ok(Vec::new())
    }

    fn final_len(&self, _input_len: usize) -> usize {
        self.output_len
    }

    fn finish(&mut self, input: &[u8]) -> TeeResult<Vec<u8>> {
        let state = self.state.take().ok_or(TeeError::BadState)?;
        Ok(each_hmac!(state, mac => {
            let mut mac = mac;
            Mac::update(&mut mac, input);
            Mac::finalize(mac).into_bytes().to_vec()
        }))
    }
}

// ---- AES ----

type Ctr<C> = ctr::Ctr128BE<C>;

macro_rules! aes_family {
    ($name:ident, $wrap:ident) => {
        enum $name {
            Aes128($wrap<Aes128>),
            Aes192($wrap<Aes192>),
            Aes256($wrap<Aes256>),
        }
    };
}

aes_family!(CbcEncryptor, CbcEncrypt);
aes_family!(CbcDecryptor, CbcDecrypt);
aes_family!(CtrCipher, Ctr);
aes_family!(CbcMacState, CbcMac);

macro_rules! each_aes {
    ($family:ident, $state:expr, $c:ident => $body:expr) => {
        match $state {
            $family::Aes128($c) => $body,
            $family::Aes192($c) => $body,
            $family::Aes256($c) => $body,
        }
    };
}

/// Key the mode wrapper matching the key length; IV length is checked by the mode crate
macro_rules! aes_with_iv {
    ($family:ident, $key:expr, $iv:expr) => {
        match $key.len() {
            16 => KeyIvInit::new_from_slices($key, $iv).map($family::Aes128),
            24 => KeyIvInit::new_from_slices($key, $iv).map($family::Aes192),
            32 => KeyIvInit::new_from_slices($key, $iv).map($family::Aes256),
            _ => Err(InvalidLength),
        }
        .map_err(|_| TeeError::BadParameters)?
    };
}

enum AesKey {
    Aes128(Aes128),
    Aes192(Aes192),
    Aes256(Aes256),
}

impl AesKey {
    fn new(key: &[u8]) -> TeeResult<Self> {
        Ok(match key.len() {
            16 => AesKey::Aes128(keyed(key)?),
            24 => AesKey::Aes192(keyed(key)?),
            32 => AesKey::Aes256(keyed(key)?),
            _ => return Err(TeeError::BadParameters),
        })
    }
}

enum AesCipher {
    Ecb { key: AesKey, decrypt: bool },
    CbcEncrypt(CbcEncryptor),
    CbcDecrypt(CbcDecryptor),
    Ctr(CtrCipher),
    /// The optional IV is folded into the first block, then dropped
    CbcMac {
        mac: Option<CbcMacState>,
        iv: Option<Zeroizing<[u8; AES_BLOCK]>>,
    },
}

struct AesContext {
    cipher: AesCipher,
    /// Input bytes waiting for a full block
    pending: Zeroizing<Vec<u8>>,
}

impl AesContext {
    fn new(algorithm: Algorithm, op: OperationMode, key: &[u8], iv: &[u8]) -> TeeResult<Self> {
        let decrypt = op == OperationMode::Decrypt;
        let cipher = match algorithm {
            Algorithm::AesEcb => AesCipher::Ecb {
                key: AesKey::new(key)?,
                decrypt,
            },
            Algorithm::AesCbc if decrypt => AesCipher::CbcDecrypt(aes_with_iv!(CbcDecryptor, key, iv)),
            Algorithm::AesCbc => AesCipher::CbcEncrypt(aes_with_iv!(CbcEncryptor, key, iv)),
            Algorithm::AesCtr => AesCipher::Ctr(aes_with_iv!(CtrCipher, key, iv)),
            Algorithm::AesCbcMac => {
                let mac = match key.len() {
                    16 => CbcMacState::Aes128(keyed(key)?),
                    24 => CbcMacState::Aes192(keyed(key)?),
                    32 => CbcMacState::Aes256(keyed(key)?),
                    _ => return Err(TeeError::BadParameters),
                };
                let iv = match iv.len() {
                    0 => None,
                    AES_BLOCK => {
                        let mut block = Zeroizing::new([0u8; AES_BLOCK]);
                        block.copy_from_slice(iv);
                        Some(block)
                    }
                    _ => return Err(TeeError::BadParameters),
                };
                AesCipher::CbcMac { mac: Some(mac), iv }
            }
            _ => return Err(TeeError::NotSupported),
        };

        Ok(Self {
            cipher,
            pending: Zeroizing::new(Vec::new()),
        })
    }

    fn is_stream(&self) -> bool {
        matches!(self.cipher, AesCipher::Ctr(_))
    }

    fn process_block(&mut self, block: &mut Block) -> TeeResult<()> {
        match &mut self.cipher {
            AesCipher::Ecb { key, decrypt: false } => {
                each_aes!(AesKey, key, c => c.encrypt_block(block))
            }
            AesCipher::Ecb { key, decrypt: true } => {
                each_aes!(AesKey, key, c => c.decrypt_block(block))
            }
            AesCipher::CbcEncrypt(c) => each_aes!(CbcEncryptor, c, c => c.encrypt_block_mut(block)),
            AesCipher::CbcDecrypt(c) => each_aes!(CbcDecryptor, c, c => c.decrypt_block_mut(block)),
            AesCipher::CbcMac { mac, iv } => {
                if let Some(iv) = iv.take() {
                    for (b, v) in block.iter_mut().zip(iv.iter()) {
                        *b ^= v;
                    }
                }
                let mac = mac.as_mut().ok_or(TeeError::BadState)?;
                each_aes!(CbcMacState, mac, m => Mac::update(m, block.as_slice()));
            }
            AesCipher::Ctr(_) => {}
        }
        Ok(())
    }

    fn absorb(&mut self, input: &[u8]) -> TeeResult<Vec<u8>> {
        if let AesCipher::Ctr(c) = &mut self.cipher {
            let mut out = input.to_vec();
            each_aes!(CtrCipher, c, c => c.apply_keystream(&mut out));
            return Ok(out);
        }

        self.pending.extend_from_slice(input);
        let whole = self.pending.len() / AES_BLOCK * AES_BLOCK;
        let ready: Zeroizing<Vec<u8>> = Zeroizing::new(self.pending.drain(..whole).collect());
        let mac_only = matches!(self.cipher, AesCipher::CbcMac { .. });
        let mut out = Vec::with_capacity(if mac_only { 0 } else { whole });
        for chunk in ready.chunks(AES_BLOCK) {
            let mut block = Block::clone_from_slice(chunk);
            self.process_block(&mut block)?;
            if !mac_only {
                out.extend_from_slice(&block);
            }
        }
        Ok(out)
    }
}

impl OperationContext for AesContext {
    fn update_len(&self, input_len: usize) -> usize {
        match self.cipher {
            AesCipher::Ctr(_) => input_len,
            AesCipher::CbcMac { .. } => 0,
            _ => (self.pending.len() + input_len) / AES_BLOCK * AES_BLOCK,
        }
    }

    fn update(&mut self, input: &[u8]) -> TeeResult<Vec<u8>> {
        self.absorb(input)
    }

    fn final_len(&self, input_len: usize) -> usize {
        match self.cipher {
            AesCipher::CbcMac { .. } => AES_BLOCK,
            _ => self.update_len(input_len),
        }
    }

    fn finish(&mut self, input: &[u8]) -> TeeResult<Vec<u8>> {
        if !self.is_stream() && (self.pending.len() + input.len()) % AES_BLOCK != 0 {
            return Err(TeeError::BadParameters);
        }
        let out = self.absorb(input)?;
        match &mut self.cipher {
            AesCipher::CbcMac { mac, .. } => {
                let mac = mac.take().ok_or(TeeError::BadState)?;
                Ok(each_aes!(CbcMacState, mac, m => Mac::finalize(m).into_bytes().to_vec()))
            }
            _ => Ok(out),
        }
    }
}
