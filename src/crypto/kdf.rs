//! Hash-counter key derivation
//!
//! Every supported mode expands a shared secret `Z` as
//! `H(Z || counter_be32 || other_info)` over successive counters until
//! enough output exists. KDF1 counts from 0; X9.63/concatenation and KDF2
//! count from 1.

use crate::error::{TeeError, TeeResult};
use sha2::{Digest, Sha224, Sha256, Sha384, Sha512};

/// Largest `other_info` accepted (five SHA-512 blocks)
pub const MAX_OTHER_INFO_LEN: usize = 5 * 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum DeriveMode {
    Asn1 = 0,
    /// ANSI X9.63, identical to the NIST concatenation KDF
    Concat = 1,
    OmaDrm = 2,
    Kdf1 = 3,
    Kdf2 = 4,
}

impl TryFrom<u32> for DeriveMode {
    type Error = TeeError;

    fn try_from(v: u32) -> TeeResult<Self> {
        Ok(match v {
            0 => DeriveMode::Asn1,
            1 => DeriveMode::Concat,
            2 => DeriveMode::OmaDrm,
            3 => DeriveMode::Kdf1,
            4 => DeriveMode::Kdf2,
            _ => return Err(TeeError::BadParameters),
        })
    }
}

impl DeriveMode {
    fn first_counter(&self) -> TeeResult<u32> {
        match self {
            DeriveMode::Kdf1 => Ok(0),
            DeriveMode::Concat | DeriveMode::Kdf2 => Ok(1),
            DeriveMode::Asn1 | DeriveMode::OmaDrm => Err(TeeError::NotSupported),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum DeriveHash {
    Sha1 = 0,
    Sha224 = 1,
    Sha256 = 2,
    Sha384 = 3,
    Sha512 = 4,
}

impl TryFrom<u32> for DeriveHash {
    type Error = TeeError;

    fn try_from(v: u32) -> TeeResult<Self> {
        Ok(match v {
            0 => DeriveHash::Sha1,
            1 => DeriveHash::Sha224,
            2 => DeriveHash::Sha256,
            3 => DeriveHash::Sha384,
            4 => DeriveHash::Sha512,
            _ => return Err(TeeError::BadParameters),
        })
    }
}

fn hash_block(hash: DeriveHash, parts: &[&[u8]]) -> TeeResult<Vec<u8>> {
    fn run<D: Digest>(parts: &[&[u8]]) -> Vec<u8> {
        let mut h = D::new();
        for p in parts {
            h.update(p);
        }
        h.finalize().to_vec()
    }

    Ok(match hash {
        DeriveHash::Sha1 => return Err(TeeError::NotSupported),
        DeriveHash::Sha224 => run::<Sha224>(parts),
        DeriveHash::Sha256 => run::<Sha256>(parts),
        DeriveHash::Sha384 => run::<Sha384>(parts),
        DeriveHash::Sha512 => run::<Sha512>(parts),
    })
}

/// Derive `out_len` bytes from `secret`
pub fn derive(
    mode: DeriveMode,
    hash: DeriveHash,
    secret: &[u8],
    other_info: &[u8],
    out_len: usize,
) -> TeeResult<Vec<u8>> {
    if out_len == 0 || secret.is_empty() {
        return Err(TeeError::BadParameters);
    }
    if other_info.len() > MAX_OTHER_INFO_LEN {
        return Err(TeeError::ExcessData);
    }

    let mut counter = mode.first_counter()?;
    let mut out = Vec::with_capacity(out_len);
    while out.len() < out_len {
        let block = hash_block(hash, &[secret, &counter.to_be_bytes(), other_info])?;
        let take = (out_len - out.len()).min(block.len());
        out.extend_from_slice(&block[..take]);
        counter = counter.checked_add(1).ok_or(TeeError::Overflow)?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kdf2_first_block_is_hash_with_counter_one() {
        let out = derive(DeriveMode::Kdf2, DeriveHash::Sha256, b"secret", b"info", 32).unwrap();
        let mut h = Sha256::new();
        h.update(b"secret");
        h.update(1u32.to_be_bytes());
        h.update(b"info");
        assert_eq!(out, h.finalize().to_vec());
    }

    #[test]
    fn test_concat_matches_kdf2() {
        let a = derive(DeriveMode::Concat, DeriveHash::Sha384, b"z", b"", 70).unwrap();
        let b = derive(DeriveMode::Kdf2, DeriveHash::Sha384, b"z", b"", 70).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 70);
    }

    #[test]
    fn test_kdf1_differs() {
        let a = derive(DeriveMode::Kdf1, DeriveHash::Sha256, b"z", b"", 16).unwrap();
        let b = derive(DeriveMode::Kdf2, DeriveHash::Sha256, b"z", b"", 16).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_rejections() {
        assert_eq!(
            derive(DeriveMode::Asn1, DeriveHash::Sha256, b"z", b"", 16),
            Err(TeeError::NotSupported)
        );
        assert_eq!(
            derive(DeriveMode::Kdf2, DeriveHash::Sha1, b"z", b"", 16),
            Err(TeeError::NotSupported)
        );
        assert_eq!(
            derive(DeriveMode::Kdf2, DeriveHash::Sha256, b"z", b"", 0),
            Err(TeeError::BadParameters)
        );
        let long = vec![0u8; MAX_OTHER_INFO_LEN + 1];
        assert_eq!(
            derive(DeriveMode::Kdf2, DeriveHash::Sha256, b"z", &long, 16),
            Err(TeeError::ExcessData)
        );
        assert_eq!(DeriveMode::try_from(5), Err(TeeError::BadParameters));
    }
}
