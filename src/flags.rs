//! Operation flag decoding
//!
//! Callers describe a crypto operation with a 32-bit bitmask. The bitmask is
//! decoded exactly once into an immutable [`OperationDescriptor`]; nothing
//! past this module sees the raw bits.
//!
//! Each family of bits (key class, mode, algorithm) is resolved from an
//! ordered table where the first set bit wins. Setting more than one bit of a
//! family is tolerated with a warning unless [`DecodePolicy::Strict`] is used.

use crate::error::{Result, TeeError};
use std::fmt;
use tracing::warn;

pub const AES: u32 = 1;
pub const RSA: u32 = 2;
pub const ENCRYPT: u32 = 4;
pub const DECRYPT: u32 = 8;
pub const SIGN: u32 = 16;
pub const VERIFY: u32 = 32;
pub const CBC_NOPAD: u32 = 64;
pub const CTR: u32 = 128;
pub const ENC_RSAES: u32 = 256;
pub const ENC_RSA: u32 = 512;
pub const SIGN_RSASSA: u32 = 1024;
pub const SIGN_RSASSA_MGF: u32 = 2048;
pub const SHA256: u32 = 4096;
pub const SHA512: u32 = 8192;
pub const DIGEST: u32 = 16384;

/// Every bit with a defined meaning
pub const KNOWN_BITS: u32 = DIGEST | (DIGEST - 1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Encrypt,
    Decrypt,
    Sign,
    Verify,
    Digest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyClass {
    Symmetric,
    Asymmetric,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    AesCbcNoPad,
    AesCtr,
    RsaesPkcs1OaepMgf1Sha256,
    RsaNoPad,
    RsassaPkcs1V15Sha256,
    RsassaPkcs1PssMgf1Sha256,
    Sha256,
    Sha512,
}

impl Algorithm {
    /// Key class an algorithm operates with
    pub fn key_class(self) -> KeyClass {
        match self {
            Algorithm::AesCbcNoPad | Algorithm::AesCtr => KeyClass::Symmetric,
            Algorithm::RsaesPkcs1OaepMgf1Sha256
            | Algorithm::RsaNoPad
            | Algorithm::RsassaPkcs1V15Sha256
            | Algorithm::RsassaPkcs1PssMgf1Sha256 => KeyClass::Asymmetric,
            Algorithm::Sha256 | Algorithm::Sha512 => KeyClass::None,
        }
    }

    /// GlobalPlatform algorithm name, as accepted on the command line
    pub fn name(self) -> &'static str {
        match self {
            Algorithm::AesCbcNoPad => "TEE_ALG_AES_CBC_NOPAD",
            Algorithm::AesCtr => "TEE_ALG_AES_CTR",
            Algorithm::RsaesPkcs1OaepMgf1Sha256 => "TEE_ALG_RSAES_PKCS1_OAEP_MGF1_SHA256",
            Algorithm::RsaNoPad => "TEE_ALG_RSA_NOPAD",
            Algorithm::RsassaPkcs1V15Sha256 => "TEE_ALG_RSASSA_PKCS1_V1_5_SHA256",
            Algorithm::RsassaPkcs1PssMgf1Sha256 => "TEE_ALG_RSASSA_PKCS1_PSS_MGF1_SHA256",
            Algorithm::Sha256 => "TEE_ALG_SHA256",
            Algorithm::Sha512 => "TEE_ALG_SHA512",
        }
    }

    /// Wire bit selecting this algorithm
    pub fn bit(self) -> u32 {
        ALGORITHM_TABLE
            .iter()
            .find(|(_, alg)| *alg == self)
            .map(|(bit, _)| *bit)
            .unwrap_or(0)
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Key class bits, highest priority first
pub const KEY_CLASS_TABLE: [(u32, KeyClass); 2] =
    [(AES, KeyClass::Symmetric), (RSA, KeyClass::Asymmetric)];

/// Mode bits, highest priority first
pub const MODE_TABLE: [(u32, Mode); 4] = [
    (ENCRYPT, Mode::Encrypt),
    (DECRYPT, Mode::Decrypt),
    (SIGN, Mode::Sign),
    (VERIFY, Mode::Verify),
];

/// Algorithm bits, highest priority first
pub const ALGORITHM_TABLE: [(u32, Algorithm); 8] = [
    (CBC_NOPAD, Algorithm::AesCbcNoPad),
    (CTR, Algorithm::AesCtr),
    (ENC_RSAES, Algorithm::RsaesPkcs1OaepMgf1Sha256),
    (ENC_RSA, Algorithm::RsaNoPad),
    (SIGN_RSASSA, Algorithm::RsassaPkcs1V15Sha256),
    (SIGN_RSASSA_MGF, Algorithm::RsassaPkcs1PssMgf1Sha256),
    (SHA256, Algorithm::Sha256),
    (SHA512, Algorithm::Sha512),
];

/// How to treat bitmasks that set several bits of one family
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DecodePolicy {
    /// First set bit in table order wins
    #[default]
    Priority,
    /// Ambiguous or undefined bits are rejected
    Strict,
}

/// Decoded operation request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationDescriptor {
    pub mode: Option<Mode>,
    pub algorithm: Option<Algorithm>,
    pub key_class: KeyClass,
}

/// Fully resolved operation, ready to execute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedOperation {
    pub mode: Mode,
    pub algorithm: Algorithm,
}

impl OperationDescriptor {
    /// Checks that the descriptor names exactly one executable operation and
    /// that mode, algorithm and key class agree
    pub fn resolve(&self) -> Result<ResolvedOperation> {
        let mode = self
            .mode
            .ok_or_else(|| TeeError::bad_params("no operation mode selected"))?;
        let algorithm = self
            .algorithm
            .ok_or_else(|| TeeError::bad_params("no algorithm selected"))?;

        if mode == Mode::Digest {
            return match algorithm {
                Algorithm::Sha256 | Algorithm::Sha512 => Ok(ResolvedOperation { mode, algorithm }),
                other => Err(TeeError::NotSupported(format!(
                    "{} is not a digest algorithm",
                    other
                ))),
            };
        }

        if algorithm.key_class() != self.key_class {
            return Err(TeeError::bad_params(format!(
                "{} does not match key class {:?}",
                algorithm, self.key_class
            )));
        }

        let compatible = match mode {
            Mode::Encrypt | Mode::Decrypt => !matches!(
                algorithm,
                Algorithm::RsassaPkcs1V15Sha256 | Algorithm::RsassaPkcs1PssMgf1Sha256
            ),
            Mode::Sign | Mode::Verify => matches!(
                algorithm,
                Algorithm::RsassaPkcs1V15Sha256 | Algorithm::RsassaPkcs1PssMgf1Sha256
            ),
            Mode::Digest => false,
        };
        if !compatible {
            return Err(TeeError::NotSupported(format!(
                "{} cannot be used to {:?}",
                algorithm, mode
            )));
        }

        Ok(ResolvedOperation { mode, algorithm })
    }

    /// Assembles the wire bitmask describing this descriptor
    pub fn to_flags(&self) -> u32 {
        let mut flags = 0;
        flags |= match self.key_class {
            KeyClass::Symmetric => AES,
            KeyClass::Asymmetric => RSA,
            KeyClass::None => 0,
        };
        flags |= match self.mode {
            Some(Mode::Encrypt) => ENCRYPT,
            Some(Mode::Decrypt) => DECRYPT,
            Some(Mode::Sign) => SIGN,
            Some(Mode::Verify) => VERIFY,
            Some(Mode::Digest) => DIGEST,
            None => 0,
        };
        flags |= self.algorithm.map(Algorithm::bit).unwrap_or(0);
        flags
    }
}

/// Picks the first table entry whose bit is set
fn first_match<T: Copy>(
    flags: u32,
    table: &[(u32, T)],
    family: &str,
    policy: DecodePolicy,
) -> Result<Option<T>> {
    let mut hits = table.iter().filter(|(bit, _)| flags & bit != 0);
    let first = hits.next().map(|(_, v)| *v);
    let extra = hits.count();
    if extra > 0 {
        match policy {
            DecodePolicy::Priority => {
                warn!(flags, family, "multiple bits set, highest priority wins");
            }
            DecodePolicy::Strict => {
                return Err(TeeError::bad_params(format!(
                    "ambiguous {} bits in {:#x}",
                    family, flags
                )));
            }
        }
    }
    Ok(first)
}

/// Decodes a bitmask with the default priority policy
pub fn decode(flags: u32) -> Result<OperationDescriptor> {
    decode_with(flags, DecodePolicy::Priority)
}

pub fn decode_with(flags: u32, policy: DecodePolicy) -> Result<OperationDescriptor> {
    if policy == DecodePolicy::Strict && flags & !KNOWN_BITS != 0 {
        return Err(TeeError::bad_params(format!(
            "undefined bits {:#x}",
            flags & !KNOWN_BITS
        )));
    }

    let algorithm = first_match(flags, &ALGORITHM_TABLE, "algorithm", policy)?;

    if flags & DIGEST != 0 {
        return Ok(OperationDescriptor {
            mode: Some(Mode::Digest),
            algorithm,
            key_class: KeyClass::None,
        });
    }

    let mode = first_match(flags, &MODE_TABLE, "mode", policy)?;
    let key_class = first_match(flags, &KEY_CLASS_TABLE, "key class", policy)?;

    if mode.is_none() && key_class.is_none() {
        return Err(TeeError::bad_params(format!(
            "flags {:#x} select no mode and no key class",
            flags
        )));
    }

    Ok(OperationDescriptor {
        mode,
        algorithm,
        key_class: key_class.unwrap_or(KeyClass::None),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn descriptor(mode: Option<Mode>, algorithm: Option<Algorithm>, key_class: KeyClass) -> OperationDescriptor {
        OperationDescriptor {
            mode,
            algorithm,
            key_class,
        }
    }

    #[test]
    fn test_zero_flags_rejected() {
        assert!(matches!(decode(0), Err(TeeError::BadParameters(_))));
    }

    #[test]
    fn test_single_bits() {
        assert_eq!(decode(AES).unwrap(), descriptor(None, None, KeyClass::Symmetric));
        assert_eq!(decode(RSA).unwrap(), descriptor(None, None, KeyClass::Asymmetric));
        assert_eq!(
            decode(ENCRYPT).unwrap(),
            descriptor(Some(Mode::Encrypt), None, KeyClass::None)
        );
        assert_eq!(
            decode(DECRYPT).unwrap(),
            descriptor(Some(Mode::Decrypt), None, KeyClass::None)
        );
        assert_eq!(
            decode(SIGN).unwrap(),
            descriptor(Some(Mode::Sign), None, KeyClass::None)
        );
        assert_eq!(
            decode(VERIFY).unwrap(),
            descriptor(Some(Mode::Verify), None, KeyClass::None)
        );
        assert_eq!(
            decode(DIGEST).unwrap(),
            descriptor(Some(Mode::Digest), None, KeyClass::None)
        );
    }

    #[test]
    fn test_lone_algorithm_bit_rejected() {
        for (bit, _) in ALGORITHM_TABLE {
            assert!(decode(bit).is_err(), "bit {:#x}", bit);
        }
    }

    #[test]
    fn test_algorithm_table() {
        for (bit, alg) in ALGORITHM_TABLE {
            let d = decode(ENCRYPT | bit).unwrap();
            assert_eq!(d.algorithm, Some(alg));
            assert_eq!(d.mode, Some(Mode::Encrypt));
        }
    }

    #[test]
    fn test_digest_overrides_key_class() {
        let d = decode(DIGEST | SHA512 | AES | ENCRYPT).unwrap();
        assert_eq!(d, descriptor(Some(Mode::Digest), Some(Algorithm::Sha512), KeyClass::None));
    }

    #[test]
    fn test_priority_tie_break() {
        let d = decode(AES | ENCRYPT | DECRYPT | CTR | CBC_NOPAD).unwrap();
        assert_eq!(d.mode, Some(Mode::Encrypt));
        assert_eq!(d.algorithm, Some(Algorithm::AesCbcNoPad));

        let d = decode(RSA | SIGN | VERIFY | SIGN_RSASSA_MGF).unwrap();
        assert_eq!(d.mode, Some(Mode::Sign));
    }

    #[test]
    fn test_strict_rejects_ambiguity() {
        let err = decode_with(AES | ENCRYPT | DECRYPT | CTR, DecodePolicy::Strict);
        assert!(matches!(err, Err(TeeError::BadParameters(_))));
        let err = decode_with(AES | ENCRYPT | CTR | 1 << 20, DecodePolicy::Strict);
        assert!(matches!(err, Err(TeeError::BadParameters(_))));
        assert!(decode_with(AES | ENCRYPT | CTR, DecodePolicy::Strict).is_ok());
    }

    #[test]
    fn test_resolve() {
        let op = decode(AES | DECRYPT | CTR).unwrap().resolve().unwrap();
        assert_eq!(op.mode, Mode::Decrypt);
        assert_eq!(op.algorithm, Algorithm::AesCtr);

        // RSA algorithm with an AES key class
        assert!(decode(AES | ENCRYPT | ENC_RSAES).unwrap().resolve().is_err());
        // signature algorithm used for encryption
        assert!(matches!(
            decode(RSA | ENCRYPT | SIGN_RSASSA).unwrap().resolve(),
            Err(TeeError::NotSupported(_))
        ));
        // no algorithm at all
        assert!(decode(RSA | SIGN).unwrap().resolve().is_err());
        assert!(matches!(
            decode(DIGEST | CTR).unwrap().resolve(),
            Err(TeeError::NotSupported(_))
        ));
    }

    proptest! {
        #[test]
        fn prop_to_flags_decodes_back(mode_idx in 0usize..4, alg_idx in 0usize..6) {
            let (_, mode) = MODE_TABLE[mode_idx];
            let (_, algorithm) = ALGORITHM_TABLE[alg_idx];
            let d = descriptor(Some(mode), Some(algorithm), algorithm.key_class());
            prop_assert_eq!(decode_with(d.to_flags(), DecodePolicy::Strict).unwrap(), d);
        }

        #[test]
        fn prop_decode_never_panics(flags in any::<u32>()) {
            let _ = decode(flags);
            let _ = decode_with(flags, DecodePolicy::Strict);
        }
    }
}
