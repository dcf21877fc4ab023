//! Single-shot cryptographic transforms
//!
//! The engine executes one resolved operation per call:
//! - **Cipher**: AES-CBC without padding, AES-CTR (128-bit big-endian counter)
//! - **Asymmetric**: RSAES-OAEP and raw RSA encrypt/decrypt, RSASSA PKCS#1
//!   v1.5 and PSS sign/verify over a caller-computed SHA-256 digest
//! - **Digest**: SHA-256, SHA-512
//!
//! Results go to the caller's output slot. When the slot is too small the
//! required size is reported and nothing is written. Every call holds an
//! operation handle from the pool for its whole duration.

use crate::error::{Result, TeeError};
use crate::flags::{Algorithm, Mode, ResolvedOperation};
use crate::handle::{HandleKind, HandlePool};
use crate::keys::{KeyHandle, KeyMaterial};
use crate::params::Memref;
use cbc::cipher::block_padding::NoPadding;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, StreamCipher};
use rand::rngs::OsRng;
use ring::digest;
use rsa::traits::{PrivateKeyParts, PublicKeyParts};
use rsa::{BigUint, Oaep, Pkcs1v15Sign, Pss, RsaPrivateKey};
use sha2::Sha256;
use tracing::debug;
use zeroize::Zeroizing;

pub const AES_BLOCK_SIZE: usize = 16;
pub const IV_SIZE: usize = 16;
/// Length of the SHA-256 digest that signatures are computed over
pub const SIGNED_DIGEST_SIZE: usize = 32;

macro_rules! with_aes {
    ($key:expr, $cipher:ident => $body:expr) => {
        match $key.len() {
            16 => {
                type $cipher = aes::Aes128;
                $body
            }
            24 => {
                type $cipher = aes::Aes192;
                $body
            }
            32 => {
                type $cipher = aes::Aes256;
                $body
            }
            n => Err(TeeError::Crypto(format!("invalid AES key length {}", n))),
        }
    };
}

/// Initialization vector carried in the output slot on entry, zero-filled
/// when the slot is shorter than a block
pub fn iv_from_slot(output: &Memref<'_>) -> [u8; IV_SIZE] {
    let mut iv = [0u8; IV_SIZE];
    let contents = output.contents();
    let n = contents.len().min(IV_SIZE);
    iv[..n].copy_from_slice(&contents[..n]);
    iv
}

#[derive(Debug, Clone)]
pub struct CryptoEngine {
    pool: HandlePool,
}

impl CryptoEngine {
    pub fn new(pool: HandlePool) -> Self {
        Self { pool }
    }

    /// Runs `op` over `input`, writing the result to `output`
    ///
    /// `key` is ignored for digests and required for everything else.
    pub fn execute(
        &self,
        op: ResolvedOperation,
        key: Option<&KeyHandle>,
        input: &[u8],
        output: &mut Memref<'_>,
    ) -> Result<()> {
        if op.mode == Mode::Digest {
            return self.digest(op.algorithm, input, output);
        }

        let key = key.ok_or_else(|| TeeError::bad_params("operation requires a key"))?;
        if key.key_type().key_class() != op.algorithm.key_class() {
            return Err(TeeError::bad_params(format!(
                "key {} ({:?}) cannot be used with {}",
                key.id(),
                key.key_type(),
                op.algorithm
            )));
        }

        match op.algorithm {
            Algorithm::AesCbcNoPad | Algorithm::AesCtr => {
                let iv = iv_from_slot(output);
                self.cipher(op, key, &iv, input, output)
            }
            _ => self.asymmetric(op, key, input, output),
        }
    }

    /// Symmetric transform; output length equals input length
    pub fn cipher(
        &self,
        op: ResolvedOperation,
        key: &KeyHandle,
        iv: &[u8; IV_SIZE],
        input: &[u8],
        output: &mut Memref<'_>,
    ) -> Result<()> {
        let _operation = self.pool.acquire(HandleKind::Operation)?;

        let key_bytes = match key.material() {
            KeyMaterial::Aes(k) => k,
            KeyMaterial::Rsa(_) => return Err(TeeError::bad_params("cipher needs an AES key")),
        };
        let encrypt = match op.mode {
            Mode::Encrypt => true,
            Mode::Decrypt => false,
            other => {
                return Err(TeeError::NotSupported(format!(
                    "{:?} with {}",
                    other, op.algorithm
                )))
            }
        };
        if op.algorithm == Algorithm::AesCbcNoPad && input.len() % AES_BLOCK_SIZE != 0 {
            return Err(TeeError::bad_params(format!(
                "input length {} is not a multiple of the block size",
                input.len()
            )));
        }
        if output.capacity() < input.len() {
            return Err(output.short(input.len()));
        }

        let mut buf = Zeroizing::new(input.to_vec());
        match op.algorithm {
            Algorithm::AesCbcNoPad => aes_cbc(encrypt, key_bytes, iv, &mut buf)?,
            Algorithm::AesCtr => aes_ctr(key_bytes, iv, &mut buf)?,
            other => return Err(TeeError::NotSupported(format!("{} is not a cipher", other))),
        }

        debug!(key_id = key.id(), algorithm = %op.algorithm, len = buf.len(), "Cipher complete");
        output.write(&buf)
    }

    /// RSA encrypt/decrypt/sign/verify
    pub fn asymmetric(
        &self,
        op: ResolvedOperation,
        key: &KeyHandle,
        input: &[u8],
        output: &mut Memref<'_>,
    ) -> Result<()> {
        let _operation = self.pool.acquire(HandleKind::Operation)?;

        let rsa_key: &RsaPrivateKey = match key.material() {
            KeyMaterial::Rsa(k) => &**k,
            KeyMaterial::Aes(_) => return Err(TeeError::bad_params("operation needs an RSA key")),
        };
        let modulus_len = rsa_key.size();

        match (op.mode, op.algorithm) {
            (Mode::Encrypt, Algorithm::RsaesPkcs1OaepMgf1Sha256) => {
                if output.capacity() < modulus_len {
                    return Err(output.short(modulus_len));
                }
                let ciphertext = rsa_key
                    .to_public_key()
                    .encrypt(&mut OsRng, Oaep::new::<Sha256>(), input)
                    .map_err(crypto_error)?;
                output.write(&ciphertext)
            }
            (Mode::Decrypt, Algorithm::RsaesPkcs1OaepMgf1Sha256) => {
                let plaintext = Zeroizing::new(
                    rsa_key
                        .decrypt(Oaep::new::<Sha256>(), input)
                        .map_err(crypto_error)?,
                );
                output.write(&plaintext)
            }
            (Mode::Encrypt | Mode::Decrypt, Algorithm::RsaNoPad) => {
                if output.capacity() < modulus_len {
                    return Err(output.short(modulus_len));
                }
                let result = rsa_nopad(rsa_key, op.mode == Mode::Encrypt, input)?;
                output.write(&result)
            }
            (Mode::Sign, Algorithm::RsassaPkcs1V15Sha256 | Algorithm::RsassaPkcs1PssMgf1Sha256) => {
                check_digest_len(input)?;
                if output.capacity() < modulus_len {
                    return Err(output.short(modulus_len));
                }
                let signature = if op.algorithm == Algorithm::RsassaPkcs1V15Sha256 {
                    rsa_key.sign(Pkcs1v15Sign::new::<Sha256>(), input)
                } else {
                    rsa_key.sign_with_rng(&mut OsRng, Pss::new::<Sha256>(), input)
                }
                .map_err(crypto_error)?;
                debug!(key_id = key.id(), algorithm = %op.algorithm, "Digest signed");
                output.write(&signature)
            }
            (
                Mode::Verify,
                Algorithm::RsassaPkcs1V15Sha256 | Algorithm::RsassaPkcs1PssMgf1Sha256,
            ) => {
                check_digest_len(input)?;
                let signature = output.contents();
                if signature.is_empty() {
                    return Err(TeeError::bad_params("no signature supplied"));
                }
                let public = rsa_key.to_public_key();
                let verified = if op.algorithm == Algorithm::RsassaPkcs1V15Sha256 {
                    public.verify(Pkcs1v15Sign::new::<Sha256>(), input, signature)
                } else {
                    public.verify(Pss::new::<Sha256>(), input, signature)
                };
                verified.map_err(|_| TeeError::SignatureInvalid)?;
                debug!(key_id = key.id(), algorithm = %op.algorithm, "Signature verified");
                Ok(())
            }
            (mode, algorithm) => Err(TeeError::NotSupported(format!(
                "{:?} with {}",
                mode, algorithm
            ))),
        }
    }

    /// Hash of `input`; no key is involved
    pub fn digest(&self, algorithm: Algorithm, input: &[u8], output: &mut Memref<'_>) -> Result<()> {
        let _operation = self.pool.acquire(HandleKind::Operation)?;

        let hash = match algorithm {
            Algorithm::Sha256 => &digest::SHA256,
            Algorithm::Sha512 => &digest::SHA512,
            other => return Err(TeeError::NotSupported(format!("{} is not a digest", other))),
        };
        let value = digest::digest(hash, input);
        output.write(value.as_ref())
    }
}

fn crypto_error(e: rsa::Error) -> TeeError {
    TeeError::Crypto(e.to_string())
}

fn invalid_length<E: std::fmt::Display>(e: E) -> TeeError {
    TeeError::Crypto(format!("cipher init failed: {}", e))
}

fn check_digest_len(digest: &[u8]) -> Result<()> {
    if digest.len() != SIGNED_DIGEST_SIZE {
        return Err(TeeError::bad_params(format!(
            "expected a {}-byte digest, got {} bytes",
            SIGNED_DIGEST_SIZE,
            digest.len()
        )));
    }
    Ok(())
}

fn aes_cbc(encrypt: bool, key: &[u8], iv: &[u8; IV_SIZE], buf: &mut [u8]) -> Result<()> {
    let len = buf.len();
    with_aes!(key, C => {
        if encrypt {
            cbc::Encryptor::<C>::new_from_slices(key, iv)
                .map_err(invalid_length)?
                .encrypt_padded_mut::<NoPadding>(buf, len)
                .map_err(|_| TeeError::bad_params("input is not block aligned"))?;
        } else {
            cbc::Decryptor::<C>::new_from_slices(key, iv)
                .map_err(invalid_length)?
                .decrypt_padded_mut::<NoPadding>(buf)
                .map_err(|_| TeeError::bad_params("input is not block aligned"))?;
        }
        Ok(())
    })
}

fn aes_ctr(key: &[u8], iv: &[u8; IV_SIZE], buf: &mut [u8]) -> Result<()> {
    with_aes!(key, C => {
        let mut cipher = ctr::Ctr128BE::<C>::new_from_slices(key, iv).map_err(invalid_length)?;
        cipher.apply_keystream(buf);
        Ok(())
    })
}

/// Textbook RSA: `input^e mod n` or `input^d mod n`, left-padded to the
/// modulus length
fn rsa_nopad(key: &RsaPrivateKey, encrypt: bool, input: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    let modulus_len = key.size();
    let n = key.n();
    let m = BigUint::from_bytes_be(input);
    if input.len() > modulus_len || &m >= n {
        return Err(TeeError::bad_params("input is not smaller than the modulus"));
    }
    let exponent = if encrypt { key.e() } else { key.d() };
    let bytes = Zeroizing::new(m.modpow(exponent, n).to_bytes_be());
    let mut out = Zeroizing::new(vec![0u8; modulus_len]);
    out[modulus_len - bytes.len()..].copy_from_slice(&bytes);
    Ok(out)
}
